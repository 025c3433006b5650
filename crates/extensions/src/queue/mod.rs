//! Inbound message queue seam.

pub mod sqs;

use async_trait::async_trait;

pub use sqs::SqsMessageQueue;

#[derive(Debug, thiserror::Error)]
pub enum QueueError {
    #[error("Failed to receive from queue {queue}: {message}")]
    Receive { queue: String, message: String },

    #[error("Failed to delete message from queue {queue}: {message}")]
    Delete { queue: String, message: String },
}

/// A received message. `receipt_handle` is what deletion needs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueMessage {
    pub message_id: String,
    pub receipt_handle: String,
    pub body: String,
}

#[async_trait]
pub trait MessageQueue: Send + Sync {
    /// Name used as the ledger's `queue_name`.
    fn name(&self) -> &str;

    /// Receive up to `max_messages` messages. An empty result means the
    /// queue is drained for now.
    async fn receive(&self, max_messages: i32) -> Result<Vec<QueueMessage>, QueueError>;

    async fn delete(&self, receipt_handle: &str) -> Result<(), QueueError>;
}
