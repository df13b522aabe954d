use std::sync::{Arc, Weak};

use async_trait::async_trait;
use rdkafka::{
    consumer::{CommitMode, Consumer, StreamConsumer},
    error::KafkaError,
    ClientConfig, Message,
};
use tracing::{info, warn};

use crate::config::KafkaConfig;
use crate::source::{Acknowledge, Delivery, EventSource, SourceError};

/// Subscription to the breadcrumb topic.
///
/// Offsets are only stored once a delivery is acknowledged, so anything not
/// fully handled before a crash is delivered again.
#[derive(Clone)]
pub struct KafkaSource {
    inner: Arc<Inner>,
}

struct Inner {
    consumer: StreamConsumer,
    topic: String,
}

impl KafkaSource {
    pub fn new(config: &KafkaConfig) -> Result<Self, KafkaError> {
        let mut client_config = ClientConfig::new();
        client_config
            .set("bootstrap.servers", &config.kafka_hosts)
            .set("statistics.interval.ms", "10000")
            .set("group.id", config.kafka_consumer_group.as_str())
            .set("auto.offset.reset", &config.kafka_consumer_offset_reset);

        client_config.set("enable.auto.offset.store", "false");

        if config.kafka_tls {
            client_config
                .set("security.protocol", "ssl")
                .set("enable.ssl.certificate.verification", "false");
        };

        let consumer: StreamConsumer = client_config.create()?;
        consumer.subscribe(&[config.kafka_topic.as_str()])?;
        info!(topic = config.kafka_topic.as_str(), "subscribed to breadcrumb topic");

        let inner = Inner {
            consumer,
            topic: config.kafka_topic.0.clone(),
        };
        Ok(Self {
            inner: Arc::new(inner),
        })
    }
}

#[async_trait]
impl EventSource for KafkaSource {
    async fn recv(&self) -> Result<Delivery, SourceError> {
        let message = self.inner.consumer.recv().await?;

        let offset = Offset {
            handle: Arc::downgrade(&self.inner),
            partition: message.partition(),
            offset: message.offset(),
        };

        Ok(Delivery::new(
            message.payload().map(<[u8]>::to_vec),
            Box::new(offset),
        ))
    }

    async fn close(&self) {
        // Push whatever was stored since the last auto commit.
        if let Err(e) = self.inner.consumer.commit_consumer_state(CommitMode::Sync) {
            warn!("failed to commit offsets on close: {}", e);
        }

        self.inner.consumer.unsubscribe();
    }
}

struct Offset {
    handle: Weak<Inner>,
    partition: i32,
    offset: i64,
}

impl Acknowledge for Offset {
    fn ack(self: Box<Self>) -> Result<(), SourceError> {
        let inner = self.handle.upgrade().ok_or(SourceError::Gone)?;
        // The committed offset is the next one to read.
        inner
            .consumer
            .store_offset(&inner.topic, self.partition, self.offset + 1)?;
        Ok(())
    }
}
