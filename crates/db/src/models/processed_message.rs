//! Inbound message ledger rows.

use gradepush_core::types::{DbId, Timestamp};
use serde::Serialize;
use sqlx::FromRow;

use super::status::{MessageStatus, StatusId};

/// A row from the `processed_messages` table.
#[derive(Debug, Clone, FromRow, Serialize)]
pub struct ProcessedMessage {
    pub id: DbId,
    pub queue_name: String,
    pub message_id: String,
    pub status_id: StatusId,
    pub attempts: i32,
    pub payload: String,
    pub error_message: Option<String>,
    pub created_at: Timestamp,
    pub updated_at: Timestamp,
}

impl ProcessedMessage {
    pub fn status(&self) -> Option<MessageStatus> {
        MessageStatus::from_id(self.status_id)
    }

    /// Processed messages are never handled again.
    pub fn is_processed(&self) -> bool {
        self.status() == Some(MessageStatus::Processed)
    }
}

/// Outcome of one processing attempt, upserted by `(queue_name, message_id)`.
#[derive(Debug, Clone)]
pub struct RecordMessageOutcome {
    pub queue_name: String,
    pub message_id: String,
    pub status: MessageStatus,
    pub payload: String,
    pub error_message: Option<String>,
}
