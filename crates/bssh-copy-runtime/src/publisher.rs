//! Event publishers.

use std::sync::Arc;

use async_trait::async_trait;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::sync::{mpsc, Mutex};

use bssh_copy_core::capability::EventPublisher;
use bssh_copy_core::error::{CopyError, Result};
use bssh_copy_core::event::EventEnvelope;

/// Hands published events to an in-process receiver, usually the event loop.
#[derive(Clone)]
pub struct ChannelPublisher {
    tx: mpsc::UnboundedSender<EventEnvelope>,
}

impl ChannelPublisher {
    /// Create a publisher and the receiving end of its channel.
    pub fn new() -> (Self, mpsc::UnboundedReceiver<EventEnvelope>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

#[async_trait]
impl EventPublisher for ChannelPublisher {
    async fn publish(&self, event: EventEnvelope) -> Result<()> {
        self.tx
            .send(event)
            .map_err(|_| CopyError::Internal("event channel closed".to_string()))
    }
}

/// Writes each event as one JSON line.
pub struct NdjsonPublisher<W> {
    writer: Mutex<W>,
}

impl<W> NdjsonPublisher<W>
where
    W: AsyncWrite + Unpin + Send,
{
    pub fn new(writer: W) -> Self {
        Self {
            writer: Mutex::new(writer),
        }
    }
}

impl NdjsonPublisher<tokio::io::Stdout> {
    pub fn stdout() -> Self {
        Self::new(tokio::io::stdout())
    }
}

#[async_trait]
impl<W> EventPublisher for NdjsonPublisher<W>
where
    W: AsyncWrite + Unpin + Send,
{
    async fn publish(&self, event: EventEnvelope) -> Result<()> {
        let mut line = serde_json::to_vec(&event)?;
        line.push(b'\n');
        let mut writer = self.writer.lock().await;
        writer
            .write_all(&line)
            .await
            .map_err(|e| CopyError::Internal(format!("failed to write event: {}", e)))?;
        writer
            .flush()
            .await
            .map_err(|e| CopyError::Internal(format!("failed to flush event: {}", e)))
    }
}

/// Publishes every event to each inner publisher in order.
#[derive(Clone, Default)]
pub struct FanoutPublisher {
    targets: Vec<Arc<dyn EventPublisher>>,
}

impl FanoutPublisher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, target: Arc<dyn EventPublisher>) -> Self {
        self.targets.push(target);
        self
    }
}

#[async_trait]
impl EventPublisher for FanoutPublisher {
    async fn publish(&self, event: EventEnvelope) -> Result<()> {
        for target in &self.targets {
            target.publish(event.clone()).await?;
        }
        Ok(())
    }
}
