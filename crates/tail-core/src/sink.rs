//! Downstream emission trait.
//!
//! The tail loop hands every event to an `EventSink`. A bounded queue
//! behind the sink is the only backpressure mechanism: `emit` waits while
//! the consumer is behind.

use anyhow::Result;
use tokio::sync::mpsc;

use crate::event::FlatEvent;

/// Trait for delivering events to the downstream consumer.
///
/// Source code uses generics for static dispatch:
///
/// ```ignore
/// pub async fn drain<K: EventSink>(sink: &K, events: Vec<FlatEvent>) -> Result<()> {
///     for event in events {
///         sink.emit(event).await?;
///     }
///     Ok(())
/// }
/// ```
#[async_trait::async_trait]
pub trait EventSink: Send + Sync {
    /// Deliver one event, waiting for queue capacity if necessary.
    ///
    /// An error means the consumer is gone and no further events can be
    /// delivered.
    async fn emit(&self, event: FlatEvent) -> Result<()>;
}

/// Sink backed by a bounded tokio channel.
#[derive(Debug, Clone)]
pub struct ChannelSink {
    tx: mpsc::Sender<FlatEvent>,
}

impl ChannelSink {
    pub fn new(tx: mpsc::Sender<FlatEvent>) -> Self {
        Self { tx }
    }

    /// Create a sink and the receiving half of its queue.
    pub fn bounded(capacity: usize) -> (Self, mpsc::Receiver<FlatEvent>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (Self { tx }, rx)
    }
}

#[async_trait::async_trait]
impl EventSink for ChannelSink {
    async fn emit(&self, event: FlatEvent) -> Result<()> {
        self.tx
            .send(event)
            .await
            .map_err(|_| anyhow::anyhow!("downstream queue is closed"))
    }
}
