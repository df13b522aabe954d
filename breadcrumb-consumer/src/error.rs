use breadcrumb_common::store::StoreError;
use breadcrumb_common::writer::FlushError;
use rdkafka::error::KafkaError;
use thiserror::Error;

use crate::source::SourceError;

/// Enumeration of errors that stop the consumer.
#[derive(Error, Debug)]
pub enum ConsumerError {
    #[error("failed to connect to the breadcrumb store: {0}")]
    StoreError(#[from] StoreError),
    #[error("failed to set up the kafka consumer: {0}")]
    KafkaError(#[from] KafkaError),
    #[error("staged rows could not be flushed: {0}")]
    FlushError(#[from] FlushError),
    #[error("event source failed after {failures} consecutive errors: {error}")]
    SourceError { failures: u32, error: SourceError },
}
