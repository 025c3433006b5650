//! Amazon SQS implementation of [`MessageQueue`].

use async_trait::async_trait;
use aws_config::BehaviorVersion;
use aws_sdk_sqs::Client;

use super::{MessageQueue, QueueError, QueueMessage};

/// SQS caps a single receive at ten messages.
const SQS_MAX_BATCH: i32 = 10;

/// Short long-poll so an idle queue returns promptly.
const WAIT_TIME_SECS: i32 = 2;

pub struct SqsMessageQueue {
    client: Client,
    queue_url: String,
    name: String,
}

impl SqsMessageQueue {
    pub fn new(client: Client, name: impl Into<String>, queue_url: impl Into<String>) -> Self {
        Self {
            client,
            queue_url: queue_url.into(),
            name: name.into(),
        }
    }

    /// Build a client from the default AWS credential chain.
    pub async fn from_env(name: impl Into<String>, queue_url: impl Into<String>) -> Self {
        let config = aws_config::load_defaults(BehaviorVersion::latest()).await;
        Self::new(Client::new(&config), name, queue_url)
    }
}

#[async_trait]
impl MessageQueue for SqsMessageQueue {
    fn name(&self) -> &str {
        &self.name
    }

    async fn receive(&self, max_messages: i32) -> Result<Vec<QueueMessage>, QueueError> {
        let output = self
            .client
            .receive_message()
            .queue_url(&self.queue_url)
            .max_number_of_messages(max_messages.clamp(1, SQS_MAX_BATCH))
            .wait_time_seconds(WAIT_TIME_SECS)
            .send()
            .await
            .map_err(|e| QueueError::Receive {
                queue: self.name.clone(),
                message: e.to_string(),
            })?;

        let messages = output
            .messages()
            .iter()
            .filter_map(|m| match (m.message_id(), m.receipt_handle()) {
                (Some(id), Some(handle)) => Some(QueueMessage {
                    message_id: id.to_string(),
                    receipt_handle: handle.to_string(),
                    body: m.body().unwrap_or_default().to_string(),
                }),
                _ => {
                    tracing::warn!(queue = %self.name, "Skipping SQS message without id or receipt handle");
                    None
                }
            })
            .collect();
        Ok(messages)
    }

    async fn delete(&self, receipt_handle: &str) -> Result<(), QueueError> {
        self.client
            .delete_message()
            .queue_url(&self.queue_url)
            .receipt_handle(receipt_handle)
            .send()
            .await
            .map_err(|e| QueueError::Delete {
                queue: self.name.clone(),
                message: e.to_string(),
            })?;
        Ok(())
    }
}
