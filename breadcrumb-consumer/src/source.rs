use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use rdkafka::error::KafkaError;
use tokio::sync::{mpsc, Mutex};

#[derive(Debug, thiserror::Error)]
pub enum SourceError {
    #[error("Kafka error: {0}")]
    Kafka(#[from] KafkaError),
    #[error("Consumer gone")]
    Gone,
    #[error("event source closed")]
    Closed,
}

/// Confirms a delivery to the transport so it is not redelivered.
pub trait Acknowledge: Send {
    fn ack(self: Box<Self>) -> Result<(), SourceError>;
}

/// One message as handed out by an `EventSource`.
pub struct Delivery {
    pub payload: Option<Vec<u8>>,
    acknowledge: Box<dyn Acknowledge>,
}

impl Delivery {
    pub fn new(payload: Option<Vec<u8>>, acknowledge: Box<dyn Acknowledge>) -> Self {
        Self {
            payload,
            acknowledge,
        }
    }

    pub fn ack(self) -> Result<(), SourceError> {
        self.acknowledge.ack()
    }
}

/// A subscription yielding raw breadcrumb payloads.
#[async_trait]
pub trait EventSource: Send + Sync {
    /// Wait for the next delivery. `SourceError::Closed` means no more will come.
    async fn recv(&self) -> Result<Delivery, SourceError>;

    /// Stop the subscription. Called once, after the last `recv`.
    async fn close(&self);
}

/// An `EventSource` fed from an in-process channel, counting acknowledgements.
pub struct ChannelSource {
    receiver: Mutex<mpsc::Receiver<Vec<u8>>>,
    acked: Arc<AtomicU64>,
}

impl ChannelSource {
    pub fn new(buffer: usize) -> (mpsc::Sender<Vec<u8>>, Self) {
        let (sender, receiver) = mpsc::channel(buffer);
        let source = Self {
            receiver: Mutex::new(receiver),
            acked: Arc::new(AtomicU64::new(0)),
        };

        (sender, source)
    }

    pub fn acked(&self) -> u64 {
        self.acked.load(Ordering::SeqCst)
    }
}

struct CountingAck(Arc<AtomicU64>);

impl Acknowledge for CountingAck {
    fn ack(self: Box<Self>) -> Result<(), SourceError> {
        self.0.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

#[async_trait]
impl EventSource for ChannelSource {
    async fn recv(&self) -> Result<Delivery, SourceError> {
        let payload = self
            .receiver
            .lock()
            .await
            .recv()
            .await
            .ok_or(SourceError::Closed)?;

        Ok(Delivery::new(
            Some(payload),
            Box::new(CountingAck(self.acked.clone())),
        ))
    }

    async fn close(&self) {
        self.receiver.lock().await.close();
    }
}
