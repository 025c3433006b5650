//! Queue processor: drains an inbound queue into the engine.
//!
//! Every message ends in one of three ledger states (`processed`, `ignored`,
//! `failed`) and is then deleted from the queue. A message is only left on
//! the queue when the ledger itself cannot be read or written, so that a
//! later poll can retry it.

use std::sync::Arc;
use std::time::Duration;

use gradepush_core::error::CoreError;
use gradepush_core::normalizer::{normalize_message, NormalizedEvent};
use gradepush_core::types::DbId;
use gradepush_db::models::processed_message::RecordMessageOutcome;
use gradepush_db::models::status::MessageStatus;
use serde::Serialize;
use tokio_util::sync::CancellationToken;

use crate::engine::ExtensionEngine;
use crate::error::ExtensionError;
use crate::queue::{MessageQueue, QueueMessage};
use crate::store::ExtensionStore;

/// Default number of messages per receive.
pub const DEFAULT_BATCH_SIZE: i32 = 10;

/// Default cap on receives per run.
pub const DEFAULT_MAX_BATCHES: u32 = 50;

/// Counts for one processor run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ProcessSummary {
    pub received: usize,
    pub processed: usize,
    pub ignored: usize,
    pub failed: usize,
    /// Already processed earlier; deleted without re-applying.
    pub duplicates: usize,
    /// Left on the queue because the ledger was unavailable.
    pub retained: usize,
}

/// Ledger status plus error or ignore reason for one evaluation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessageOutcome {
    pub status: MessageStatus,
    pub detail: Option<String>,
}

/// Normalize and apply one message body.
///
/// Never fails: every problem becomes a `failed` outcome with its text.
pub async fn evaluate_body(engine: &ExtensionEngine, body: &str) -> MessageOutcome {
    let update = match normalize_message(body) {
        Ok(NormalizedEvent::Update(update)) => update,
        Ok(NormalizedEvent::Ignored { reason }) => {
            return MessageOutcome {
                status: MessageStatus::Ignored,
                detail: Some(reason),
            }
        }
        Err(e) => {
            return MessageOutcome {
                status: MessageStatus::Failed,
                detail: Some(e.to_string()),
            }
        }
    };

    match engine.apply_update(&update).await {
        Ok(report) if report.is_success() => MessageOutcome {
            status: MessageStatus::Processed,
            detail: None,
        },
        Ok(report) => MessageOutcome {
            status: MessageStatus::Failed,
            detail: report.error_summary(),
        },
        Err(e) => MessageOutcome {
            status: MessageStatus::Failed,
            detail: Some(e.to_string()),
        },
    }
}

/// Re-run a failed or ignored ledger entry from its stored payload.
pub async fn retry_message(
    store: &dyn ExtensionStore,
    engine: &ExtensionEngine,
    ledger_id: DbId,
) -> Result<MessageStatus, ExtensionError> {
    let row = store
        .find_message_by_id(ledger_id)
        .await?
        .ok_or_else(|| ExtensionError::not_found("processed_message", ledger_id))?;
    if row.is_processed() {
        return Err(CoreError::Conflict(format!(
            "Message {} on {} was already processed",
            row.message_id, row.queue_name
        ))
        .into());
    }

    let outcome = evaluate_body(engine, &row.payload).await;
    let recorded = store
        .record_message(&RecordMessageOutcome {
            queue_name: row.queue_name,
            message_id: row.message_id,
            status: outcome.status,
            payload: row.payload,
            error_message: outcome.detail,
        })
        .await?;
    tracing::info!(
        ledger_id,
        status = %outcome.status,
        attempts = recorded.attempts,
        "Message retried",
    );
    Ok(outcome.status)
}

pub struct QueueProcessor {
    queue: Arc<dyn MessageQueue>,
    store: Arc<dyn ExtensionStore>,
    engine: Arc<ExtensionEngine>,
    batch_size: i32,
    max_batches: u32,
}

impl QueueProcessor {
    pub fn new(
        queue: Arc<dyn MessageQueue>,
        store: Arc<dyn ExtensionStore>,
        engine: Arc<ExtensionEngine>,
    ) -> Self {
        Self {
            queue,
            store,
            engine,
            batch_size: DEFAULT_BATCH_SIZE,
            max_batches: DEFAULT_MAX_BATCHES,
        }
    }

    pub fn with_limits(mut self, batch_size: i32, max_batches: u32) -> Self {
        self.batch_size = batch_size.max(1);
        self.max_batches = max_batches.max(1);
        self
    }

    /// Receive and handle batches until the queue is empty or the batch
    /// cap is reached. Only a receive failure aborts the run.
    pub async fn run_once(&self) -> Result<ProcessSummary, ExtensionError> {
        let mut summary = ProcessSummary::default();
        for _ in 0..self.max_batches {
            let messages = self.queue.receive(self.batch_size).await?;
            if messages.is_empty() {
                break;
            }
            for message in &messages {
                self.handle(message, &mut summary).await;
            }
        }

        if summary.received > 0 {
            tracing::info!(
                queue = self.queue.name(),
                received = summary.received,
                processed = summary.processed,
                ignored = summary.ignored,
                failed = summary.failed,
                duplicates = summary.duplicates,
                retained = summary.retained,
                "Queue run finished",
            );
        }
        Ok(summary)
    }

    async fn handle(&self, message: &QueueMessage, summary: &mut ProcessSummary) {
        summary.received += 1;
        let queue_name = self.queue.name();

        match self.store.find_message(queue_name, &message.message_id).await {
            Ok(Some(existing)) if existing.is_processed() => {
                tracing::debug!(
                    queue = queue_name,
                    message_id = %message.message_id,
                    "Message already processed",
                );
                summary.duplicates += 1;
                self.delete(message).await;
                return;
            }
            Ok(_) => {}
            Err(e) => {
                tracing::error!(
                    queue = queue_name,
                    message_id = %message.message_id,
                    error = %e,
                    "Ledger lookup failed; leaving message on queue",
                );
                summary.retained += 1;
                return;
            }
        }

        let outcome = evaluate_body(&self.engine, &message.body).await;
        let record = RecordMessageOutcome {
            queue_name: queue_name.to_string(),
            message_id: message.message_id.clone(),
            status: outcome.status,
            payload: message.body.clone(),
            error_message: outcome.detail.clone(),
        };
        if let Err(e) = self.store.record_message(&record).await {
            tracing::error!(
                queue = queue_name,
                message_id = %message.message_id,
                error = %e,
                "Failed to record message outcome; leaving message on queue",
            );
            summary.retained += 1;
            return;
        }

        match outcome.status {
            MessageStatus::Processed => summary.processed += 1,
            MessageStatus::Ignored => {
                tracing::info!(
                    queue = queue_name,
                    message_id = %message.message_id,
                    reason = outcome.detail.as_deref().unwrap_or(""),
                    "Message ignored",
                );
                summary.ignored += 1;
            }
            MessageStatus::Failed => {
                tracing::warn!(
                    queue = queue_name,
                    message_id = %message.message_id,
                    error = outcome.detail.as_deref().unwrap_or(""),
                    "Message failed",
                );
                summary.failed += 1;
            }
        }
        self.delete(message).await;
    }

    async fn delete(&self, message: &QueueMessage) {
        if let Err(e) = self.queue.delete(&message.receipt_handle).await {
            tracing::warn!(
                queue = self.queue.name(),
                message_id = %message.message_id,
                error = %e,
                "Failed to delete message",
            );
        }
    }

    /// Poll the queue every `poll_interval` until cancelled.
    pub async fn run(&self, poll_interval: Duration, cancel: CancellationToken) {
        let mut ticker = tokio::time::interval(poll_interval);
        tracing::info!(
            queue = self.queue.name(),
            poll_interval_ms = poll_interval.as_millis() as u64,
            "Queue processor started",
        );

        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    tracing::info!(queue = self.queue.name(), "Queue processor shutting down");
                    break;
                }
                _ = ticker.tick() => {
                    if let Err(e) = self.run_once().await {
                        tracing::error!(queue = self.queue.name(), error = %e, "Queue run failed");
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;
    use gradepush_core::activity::ActivityType;
    use gradepush_core::schedule::ActivitySchedule;
    use serde_json::json;

    use super::*;
    use crate::test_support::{at, FakeQueue, Harness, STUDENT_CODE};

    fn envelope(entity: serde_json::Value) -> String {
        json!({ "Message": json!({ "entity": entity }).to_string() }).to_string()
    }

    fn ec_grant_body() -> String {
        envelope(json!({
            "student_extenuating_circumstances": {
                "student_code": STUDENT_CODE,
                "request_id": "EC-1",
                "identifier": "LAWS0024A6UF-001",
                "status": "APPROVED",
                "decision": { "type": "EXT", "new_deadline": "2025-02-27" }
            }
        }))
    }

    fn setup() -> (Harness, Arc<FakeQueue>) {
        let h = Harness::new();
        h.add_mapping(10, "assign", 77, "LAWS0024A6UF", "001");
        h.set_schedule(
            ActivityType::Assign,
            77,
            ActivitySchedule {
                open: None,
                close: Some(at("2025-02-17T12:00:00Z")),
                time_limit_secs: None,
            },
        );
        h.add_user(500, STUDENT_CODE);
        h.enrol(10, 500);
        (h, Arc::new(FakeQueue::new("ec")))
    }

    fn processor(h: &Harness, queue: &Arc<FakeQueue>) -> QueueProcessor {
        QueueProcessor::new(queue.clone(), h.store.clone(), Arc::new(h.engine())).with_limits(2, 10)
    }

    #[tokio::test]
    async fn processes_and_deletes_message() {
        let (h, queue) = setup();
        queue.push("m-1", &ec_grant_body());

        let summary = processor(&h, &queue).run_once().await.unwrap();
        assert_eq!(summary.received, 1);
        assert_eq!(summary.processed, 1);
        assert_eq!(queue.deleted(), vec!["m-1".to_string()]);

        let row = h.store.message("ec", "m-1").unwrap();
        assert_eq!(row.status(), Some(MessageStatus::Processed));
        assert_eq!(row.attempts, 1);
        assert_eq!(
            h.user_override(ActivityType::Assign, 77, 500).unwrap().close,
            Some(at("2025-02-27T12:00:00Z"))
        );
    }

    #[tokio::test]
    async fn duplicate_delivery_makes_no_collaborator_calls() {
        let (h, queue) = setup();
        let processor = processor(&h, &queue);
        queue.push("m-1", &ec_grant_body());
        processor.run_once().await.unwrap();

        let lms_calls = h.activity_calls() + h.directory_calls();
        queue.push("m-1", &ec_grant_body());
        let summary = processor.run_once().await.unwrap();

        assert_eq!(summary.duplicates, 1);
        assert_eq!(summary.processed, 0);
        assert_eq!(h.activity_calls() + h.directory_calls(), lms_calls);
        assert_eq!(queue.deleted().len(), 2);
        assert_eq!(h.store.message("ec", "m-1").unwrap().attempts, 1);
    }

    #[tokio::test]
    async fn malformed_message_is_failed_and_deleted() {
        let (h, queue) = setup();
        queue.push("bad", "{not json");

        let summary = processor(&h, &queue).run_once().await.unwrap();
        assert_eq!(summary.failed, 1);
        assert_eq!(queue.deleted(), vec!["bad".to_string()]);

        let row = h.store.message("ec", "bad").unwrap();
        assert_eq!(row.status(), Some(MessageStatus::Failed));
        assert!(row.error_message.unwrap().starts_with("Malformed JSON"));
    }

    #[tokio::test]
    async fn pending_decision_is_ignored_with_reason() {
        let (h, queue) = setup();
        queue.push(
            "m-2",
            &envelope(json!({
                "student_extenuating_circumstances": {
                    "student_code": STUDENT_CODE,
                    "request_id": "EC-2",
                    "identifier": "LAWS0024A6UF-001",
                    "status": "PENDING",
                    "decision": { "type": "EXT", "new_deadline": "2025-02-27" }
                }
            })),
        );

        let summary = processor(&h, &queue).run_once().await.unwrap();
        assert_eq!(summary.ignored, 1);
        let row = h.store.message("ec", "m-2").unwrap();
        assert_eq!(row.status(), Some(MessageStatus::Ignored));
        assert!(row.error_message.is_some());
        assert_eq!(h.override_count(ActivityType::Assign, 77), 0);
    }

    #[tokio::test]
    async fn ledger_outage_leaves_message_on_queue() {
        let (h, queue) = setup();
        h.store.set_fail_ledger(true);
        queue.push("m-1", &ec_grant_body());

        let summary = processor(&h, &queue).run_once().await.unwrap();
        assert_eq!(summary.retained, 1);
        assert!(queue.deleted().is_empty());
        assert_eq!(h.activity_calls(), 0);
    }

    #[tokio::test]
    async fn drains_several_batches() {
        let (h, queue) = setup();
        for i in 0..5 {
            queue.push(&format!("m-{i}"), "{}");
        }
        let summary = processor(&h, &queue).run_once().await.unwrap();
        assert_eq!(summary.received, 5);
        assert_eq!(summary.failed, 5);
        assert_eq!(queue.receive_calls(), 4);
    }

    #[tokio::test]
    async fn failed_mapping_marks_message_failed() {
        let (h, queue) = setup();
        h.fail_reads(ActivityType::Assign, 77);
        queue.push("m-1", &ec_grant_body());

        let summary = processor(&h, &queue).run_once().await.unwrap();
        assert_eq!(summary.failed, 1);
        let row = h.store.message("ec", "m-1").unwrap();
        assert!(row.error_message.unwrap().starts_with("mapping "));
    }

    #[tokio::test]
    async fn oversized_provision_fails_instead_of_looping() {
        let (h, queue) = setup();
        queue.push(
            "m-9",
            &envelope(json!({
                "student_assessment": {
                    "assessment_id": "RAA-9",
                    "student_code": STUDENT_CODE,
                    "accommodation_type": "RAA",
                    "accessibility_assessment_status": "Approved",
                    "student_provisions": { "no_dys_ext": "99999999" }
                }
            })),
        );

        let summary = processor(&h, &queue).run_once().await.unwrap();
        assert_eq!(summary.failed, 1);
        assert_eq!(queue.deleted(), vec!["m-9".to_string()]);

        let row = h.store.message("ec", "m-9").unwrap();
        assert_eq!(row.status(), Some(MessageStatus::Failed));
        assert!(row.error_message.unwrap().contains("representable deadline range"));
        assert_eq!(h.override_count(ActivityType::Assign, 77), 0);
    }

    #[tokio::test]
    async fn retry_reprocesses_failed_message() {
        let (h, queue) = setup();
        h.fail_reads(ActivityType::Assign, 77);
        queue.push("m-1", &ec_grant_body());
        processor(&h, &queue).run_once().await.unwrap();
        let ledger_id = h.store.message("ec", "m-1").unwrap().id;

        h.clear_failures();
        let engine = h.engine();
        let status = retry_message(h.store.as_ref(), &engine, ledger_id).await.unwrap();
        assert_eq!(status, MessageStatus::Processed);
        assert_eq!(h.store.message("ec", "m-1").unwrap().attempts, 2);

        let again = retry_message(h.store.as_ref(), &engine, ledger_id).await;
        assert_matches!(again, Err(ExtensionError::Core(CoreError::Conflict(_))));
    }
}
