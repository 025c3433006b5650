//! Persistence seam for the engine.
//!
//! [`ExtensionStore`] is everything the engine reads or writes locally:
//! mappings, the override ledger, tombstones, tiers, the message ledger,
//! pending enrolments and deferred tasks. [`PgExtensionStore`] delegates to
//! the `gradepush-db` repositories.

use async_trait::async_trait;
use gradepush_core::activity::{ComponentRef, ExtensionFamily, OverrideSubject};
use gradepush_core::provision::TierTable;
use gradepush_core::scan::ScanRequest;
use gradepush_core::types::DbId;
use gradepush_db::models::enrolment_event::EnrolmentEvent;
use gradepush_db::models::extension_task::{
    CreateExtensionTask, ExtensionTask, ScanQueued, TaskKind,
};
use gradepush_db::models::mapping::{AssessmentMapping, RegisterMapping};
use gradepush_db::models::override_record::{CreateExtensionOverride, ExtensionOverride};
use gradepush_db::models::processed_message::{ProcessedMessage, RecordMessageOutcome};
use gradepush_db::models::status::MessageStatus;
use gradepush_db::repositories::{
    ComponentGradeRepo, EnrolmentEventRepo, ExtensionTaskRepo, ExtensionTierRepo, MappingRepo,
    OverrideRepo, ProcessedMessageRepo, WithdrawalRepo,
};
use gradepush_db::DbPool;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Store unavailable: {0}")]
    Unavailable(String),
}

#[async_trait]
pub trait ExtensionStore: Send + Sync {
    // -- mappings --------------------------------------------------------

    /// A mapping that has not been soft-deleted (enabled or not).
    async fn get_mapping(&self, id: DbId) -> Result<Option<AssessmentMapping>, StoreError>;

    async fn mappings_for_component(
        &self,
        component: &ComponentRef,
    ) -> Result<Vec<AssessmentMapping>, StoreError>;

    async fn mappings_for_courses(
        &self,
        course_ids: &[DbId],
    ) -> Result<Vec<AssessmentMapping>, StoreError>;

    /// Extension-enabled mappings with `id > after_id`, ordered by id.
    async fn mapping_page(
        &self,
        course_id: Option<DbId>,
        after_id: DbId,
        limit: i64,
    ) -> Result<Vec<AssessmentMapping>, StoreError>;

    async fn soft_delete_mapping(&self, id: DbId) -> Result<bool, StoreError>;

    /// Upsert the component, then create a mapping onto it.
    async fn create_mapping(&self, input: &RegisterMapping) -> Result<AssessmentMapping, StoreError>;

    // -- override ledger -------------------------------------------------

    async fn find_active_override(
        &self,
        mapping_id: DbId,
        subject: OverrideSubject,
        family: ExtensionFamily,
    ) -> Result<Option<ExtensionOverride>, StoreError>;

    async fn active_overrides(&self, mapping_id: DbId) -> Result<Vec<ExtensionOverride>, StoreError>;

    async fn upsert_override(
        &self,
        input: &CreateExtensionOverride,
    ) -> Result<ExtensionOverride, StoreError>;

    async fn update_override(
        &self,
        id: DbId,
        override_id: Option<DbId>,
        source_record_id: Option<&str>,
    ) -> Result<(), StoreError>;

    async fn mark_override_restored(&self, id: DbId, restored_by: &str) -> Result<bool, StoreError>;

    // -- tombstones and tiers --------------------------------------------

    async fn record_withdrawal(
        &self,
        family: ExtensionFamily,
        source_record_id: &str,
        student_code: &str,
    ) -> Result<bool, StoreError>;

    async fn is_withdrawn(
        &self,
        family: ExtensionFamily,
        source_record_id: &str,
    ) -> Result<bool, StoreError>;

    async fn tier_table(&self) -> Result<TierTable, StoreError>;

    // -- message ledger --------------------------------------------------

    async fn find_message(
        &self,
        queue_name: &str,
        message_id: &str,
    ) -> Result<Option<ProcessedMessage>, StoreError>;

    async fn find_message_by_id(&self, id: DbId) -> Result<Option<ProcessedMessage>, StoreError>;

    async fn record_message(
        &self,
        outcome: &RecordMessageOutcome,
    ) -> Result<ProcessedMessage, StoreError>;

    async fn list_messages(
        &self,
        status: MessageStatus,
        limit: i64,
    ) -> Result<Vec<ProcessedMessage>, StoreError>;

    // -- enrolments ------------------------------------------------------

    async fn record_enrolment(&self, course_id: DbId, user_id: DbId) -> Result<bool, StoreError>;

    /// Events never tried, or last tried at least `retry_after_secs` ago.
    async fn pending_enrolments(
        &self,
        limit: i64,
        retry_after_secs: i64,
    ) -> Result<Vec<EnrolmentEvent>, StoreError>;

    async fn delete_enrolments(&self, ids: &[DbId]) -> Result<(), StoreError>;

    async fn bump_enrolment_attempts(&self, ids: &[DbId]) -> Result<(), StoreError>;

    // -- deferred tasks --------------------------------------------------

    async fn create_task(&self, input: &CreateExtensionTask) -> Result<ExtensionTask, StoreError>;

    /// Queue a scan unless a queued one covers it. The check and the insert
    /// are atomic with respect to other callers.
    async fn create_scan_task(&self, request: &ScanRequest) -> Result<ScanQueued, StoreError>;

    /// Pending or running tasks of one kind.
    async fn queued_tasks(&self, kind: TaskKind) -> Result<Vec<ExtensionTask>, StoreError>;

    async fn claim_task(&self, worker: &str) -> Result<Option<ExtensionTask>, StoreError>;

    async fn requeue_task(&self, id: DbId, last_mapping_id: DbId) -> Result<(), StoreError>;

    async fn complete_task(&self, id: DbId) -> Result<(), StoreError>;

    async fn fail_task(&self, id: DbId, error: &str) -> Result<(), StoreError>;
}

// ---------------------------------------------------------------------------
// Postgres implementation
// ---------------------------------------------------------------------------

/// [`ExtensionStore`] backed by the `gradepush-db` repositories.
#[derive(Clone)]
pub struct PgExtensionStore {
    pool: DbPool,
}

impl PgExtensionStore {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl ExtensionStore for PgExtensionStore {
    async fn get_mapping(&self, id: DbId) -> Result<Option<AssessmentMapping>, StoreError> {
        Ok(MappingRepo::find_by_id(&self.pool, id).await?)
    }

    async fn mappings_for_component(
        &self,
        component: &ComponentRef,
    ) -> Result<Vec<AssessmentMapping>, StoreError> {
        Ok(MappingRepo::list_active_by_component(&self.pool, component).await?)
    }

    async fn mappings_for_courses(
        &self,
        course_ids: &[DbId],
    ) -> Result<Vec<AssessmentMapping>, StoreError> {
        Ok(MappingRepo::list_active_by_courses(&self.pool, course_ids).await?)
    }

    async fn mapping_page(
        &self,
        course_id: Option<DbId>,
        after_id: DbId,
        limit: i64,
    ) -> Result<Vec<AssessmentMapping>, StoreError> {
        Ok(MappingRepo::list_active_page(&self.pool, course_id, after_id, limit).await?)
    }

    async fn soft_delete_mapping(&self, id: DbId) -> Result<bool, StoreError> {
        Ok(MappingRepo::soft_delete(&self.pool, id).await?)
    }

    async fn create_mapping(&self, input: &RegisterMapping) -> Result<AssessmentMapping, StoreError> {
        let component = ComponentGradeRepo::upsert(&self.pool, &input.component).await?;
        Ok(MappingRepo::create(&self.pool, &input.mapping(component.id)).await?)
    }

    async fn find_active_override(
        &self,
        mapping_id: DbId,
        subject: OverrideSubject,
        family: ExtensionFamily,
    ) -> Result<Option<ExtensionOverride>, StoreError> {
        Ok(OverrideRepo::find_active(&self.pool, mapping_id, subject, family).await?)
    }

    async fn active_overrides(&self, mapping_id: DbId) -> Result<Vec<ExtensionOverride>, StoreError> {
        Ok(OverrideRepo::list_active_for_mapping(&self.pool, mapping_id).await?)
    }

    async fn upsert_override(
        &self,
        input: &CreateExtensionOverride,
    ) -> Result<ExtensionOverride, StoreError> {
        Ok(OverrideRepo::upsert_active(&self.pool, input).await?)
    }

    async fn update_override(
        &self,
        id: DbId,
        override_id: Option<DbId>,
        source_record_id: Option<&str>,
    ) -> Result<(), StoreError> {
        OverrideRepo::update_active(&self.pool, id, override_id, source_record_id).await?;
        Ok(())
    }

    async fn mark_override_restored(&self, id: DbId, restored_by: &str) -> Result<bool, StoreError> {
        Ok(OverrideRepo::mark_restored(&self.pool, id, restored_by).await?)
    }

    async fn record_withdrawal(
        &self,
        family: ExtensionFamily,
        source_record_id: &str,
        student_code: &str,
    ) -> Result<bool, StoreError> {
        Ok(WithdrawalRepo::record(&self.pool, family, source_record_id, student_code).await?)
    }

    async fn is_withdrawn(
        &self,
        family: ExtensionFamily,
        source_record_id: &str,
    ) -> Result<bool, StoreError> {
        Ok(WithdrawalRepo::exists(&self.pool, family, source_record_id).await?)
    }

    async fn tier_table(&self) -> Result<TierTable, StoreError> {
        let rows = ExtensionTierRepo::list(&self.pool).await?;
        let entries = rows
            .iter()
            .filter_map(|row| {
                let entry = row.to_entry();
                if entry.is_none() {
                    tracing::warn!(
                        tier_id = row.id,
                        extension_kind = %row.extension_kind,
                        "Ignoring tier with unknown extension kind",
                    );
                }
                entry
            })
            .collect();
        Ok(TierTable::new(entries))
    }

    async fn find_message(
        &self,
        queue_name: &str,
        message_id: &str,
    ) -> Result<Option<ProcessedMessage>, StoreError> {
        Ok(ProcessedMessageRepo::find(&self.pool, queue_name, message_id).await?)
    }

    async fn find_message_by_id(&self, id: DbId) -> Result<Option<ProcessedMessage>, StoreError> {
        Ok(ProcessedMessageRepo::find_by_id(&self.pool, id).await?)
    }

    async fn record_message(
        &self,
        outcome: &RecordMessageOutcome,
    ) -> Result<ProcessedMessage, StoreError> {
        Ok(ProcessedMessageRepo::record(&self.pool, outcome).await?)
    }

    async fn list_messages(
        &self,
        status: MessageStatus,
        limit: i64,
    ) -> Result<Vec<ProcessedMessage>, StoreError> {
        Ok(ProcessedMessageRepo::list_by_status(&self.pool, status, limit).await?)
    }

    async fn record_enrolment(&self, course_id: DbId, user_id: DbId) -> Result<bool, StoreError> {
        Ok(EnrolmentEventRepo::record(&self.pool, course_id, user_id).await?)
    }

    async fn pending_enrolments(
        &self,
        limit: i64,
        retry_after_secs: i64,
    ) -> Result<Vec<EnrolmentEvent>, StoreError> {
        Ok(EnrolmentEventRepo::list_pending(&self.pool, limit, retry_after_secs).await?)
    }

    async fn delete_enrolments(&self, ids: &[DbId]) -> Result<(), StoreError> {
        EnrolmentEventRepo::delete_many(&self.pool, ids).await?;
        Ok(())
    }

    async fn bump_enrolment_attempts(&self, ids: &[DbId]) -> Result<(), StoreError> {
        EnrolmentEventRepo::increment_attempts(&self.pool, ids).await?;
        Ok(())
    }

    async fn create_task(&self, input: &CreateExtensionTask) -> Result<ExtensionTask, StoreError> {
        Ok(ExtensionTaskRepo::create(&self.pool, input).await?)
    }

    async fn create_scan_task(&self, request: &ScanRequest) -> Result<ScanQueued, StoreError> {
        Ok(ExtensionTaskRepo::create_scan(&self.pool, request).await?)
    }

    async fn queued_tasks(&self, kind: TaskKind) -> Result<Vec<ExtensionTask>, StoreError> {
        Ok(ExtensionTaskRepo::list_queued(&self.pool, kind).await?)
    }

    async fn claim_task(&self, worker: &str) -> Result<Option<ExtensionTask>, StoreError> {
        Ok(ExtensionTaskRepo::claim_next(&self.pool, worker).await?)
    }

    async fn requeue_task(&self, id: DbId, last_mapping_id: DbId) -> Result<(), StoreError> {
        Ok(ExtensionTaskRepo::requeue(&self.pool, id, last_mapping_id).await?)
    }

    async fn complete_task(&self, id: DbId) -> Result<(), StoreError> {
        Ok(ExtensionTaskRepo::complete(&self.pool, id).await?)
    }

    async fn fail_task(&self, id: DbId, error: &str) -> Result<(), StoreError> {
        Ok(ExtensionTaskRepo::fail(&self.pool, id, error).await?)
    }
}
