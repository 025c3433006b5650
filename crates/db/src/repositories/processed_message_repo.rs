//! Repository for the `processed_messages` ledger.

use gradepush_core::types::DbId;
use sqlx::PgPool;

use crate::models::processed_message::{ProcessedMessage, RecordMessageOutcome};
use crate::models::status::MessageStatus;

/// Column list for `processed_messages` queries.
const COLUMNS: &str = "\
    id, queue_name, message_id, status_id, attempts, payload, error_message, \
    created_at, updated_at";

pub struct ProcessedMessageRepo;

impl ProcessedMessageRepo {
    pub async fn find(
        pool: &PgPool,
        queue_name: &str,
        message_id: &str,
    ) -> Result<Option<ProcessedMessage>, sqlx::Error> {
        let query = format!(
            "SELECT {COLUMNS} FROM processed_messages WHERE queue_name = $1 AND message_id = $2"
        );
        sqlx::query_as::<_, ProcessedMessage>(&query)
            .bind(queue_name)
            .bind(message_id)
            .fetch_optional(pool)
            .await
    }

    pub async fn find_by_id(
        pool: &PgPool,
        id: DbId,
    ) -> Result<Option<ProcessedMessage>, sqlx::Error> {
        let query = format!("SELECT {COLUMNS} FROM processed_messages WHERE id = $1");
        sqlx::query_as::<_, ProcessedMessage>(&query)
            .bind(id)
            .fetch_optional(pool)
            .await
    }

    /// Record the outcome of one attempt. The first attempt inserts the row;
    /// later attempts overwrite status and error and bump `attempts`.
    pub async fn record(
        pool: &PgPool,
        outcome: &RecordMessageOutcome,
    ) -> Result<ProcessedMessage, sqlx::Error> {
        let query = format!(
            "INSERT INTO processed_messages \
                 (queue_name, message_id, status_id, attempts, payload, error_message) \
             VALUES ($1, $2, $3, 1, $4, $5) \
             ON CONFLICT (queue_name, message_id) DO UPDATE \
             SET status_id = EXCLUDED.status_id, \
                 attempts = processed_messages.attempts + 1, \
                 payload = EXCLUDED.payload, \
                 error_message = EXCLUDED.error_message \
             RETURNING {COLUMNS}"
        );
        sqlx::query_as::<_, ProcessedMessage>(&query)
            .bind(&outcome.queue_name)
            .bind(&outcome.message_id)
            .bind(outcome.status.id())
            .bind(&outcome.payload)
            .bind(&outcome.error_message)
            .fetch_one(pool)
            .await
    }

    /// Most recent rows with the given status.
    pub async fn list_by_status(
        pool: &PgPool,
        status: MessageStatus,
        limit: i64,
    ) -> Result<Vec<ProcessedMessage>, sqlx::Error> {
        let query = format!(
            "SELECT {COLUMNS} FROM processed_messages \
             WHERE status_id = $1 \
             ORDER BY updated_at DESC \
             LIMIT $2"
        );
        sqlx::query_as::<_, ProcessedMessage>(&query)
            .bind(status.id())
            .bind(limit)
            .fetch_all(pool)
            .await
    }
}
