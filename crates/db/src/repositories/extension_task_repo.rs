//! Repository for deferred `extension_tasks`.
//!
//! Uses `TaskStatus` from `models::status` for every transition.

use gradepush_core::scan::{find_covering, ScanRequest};
use gradepush_core::types::DbId;
use sqlx::PgPool;

use crate::models::extension_task::{CreateExtensionTask, ExtensionTask, ScanQueued, TaskKind};
use crate::models::status::{StatusId, TaskStatus};

/// Column list for `extension_tasks` queries.
const COLUMNS: &str = "\
    id, task_kind, course_id, mapping_id, extension_scope, last_mapping_id, \
    status_id, attempts, claimed_by, error_message, started_at, completed_at, \
    created_at, updated_at";

/// Statuses of tasks that are queued or in progress.
const QUEUED_STATUSES: [StatusId; 2] = [TaskStatus::Pending as StatusId, TaskStatus::Running as StatusId];

/// Transaction-scoped advisory lock held while a scan request is checked
/// against the queue and inserted.
const SCAN_QUEUE_LOCK: i64 = 0x6770_7363_616e_7131;

pub struct ExtensionTaskRepo;

impl ExtensionTaskRepo {
    pub async fn create(
        pool: &PgPool,
        input: &CreateExtensionTask,
    ) -> Result<ExtensionTask, sqlx::Error> {
        sqlx::query_as::<_, ExtensionTask>(&Self::insert_query())
            .bind(input.task_kind.as_str())
            .bind(input.course_id)
            .bind(input.mapping_id)
            .bind(input.extension_scope.as_str())
            .bind(TaskStatus::Pending.id())
            .fetch_one(pool)
            .await
    }

    /// Queue a scan unless a pending or running scan covers it.
    ///
    /// The overlap check and the insert run in one transaction holding
    /// [`SCAN_QUEUE_LOCK`], so concurrent requests are serialized.
    pub async fn create_scan(
        pool: &PgPool,
        request: &ScanRequest,
    ) -> Result<ScanQueued, sqlx::Error> {
        let mut tx = pool.begin().await?;
        sqlx::query("SELECT pg_advisory_xact_lock($1)")
            .bind(SCAN_QUEUE_LOCK)
            .execute(&mut *tx)
            .await?;

        let query = format!(
            "SELECT {COLUMNS} FROM extension_tasks \
             WHERE task_kind = $1 AND status_id = ANY($2) \
             ORDER BY id"
        );
        let queued: Vec<ScanRequest> = sqlx::query_as::<_, ExtensionTask>(&query)
            .bind(TaskKind::Scan.as_str())
            .bind(&QUEUED_STATUSES[..])
            .fetch_all(&mut *tx)
            .await?
            .iter()
            .filter_map(ExtensionTask::scan_request)
            .collect();
        if let Some(existing) = find_covering(&queued, request) {
            return Ok(ScanQueued::Covered(*existing));
        }

        let input = CreateExtensionTask::scan(request);
        let task = sqlx::query_as::<_, ExtensionTask>(&Self::insert_query())
            .bind(input.task_kind.as_str())
            .bind(input.course_id)
            .bind(input.mapping_id)
            .bind(input.extension_scope.as_str())
            .bind(TaskStatus::Pending.id())
            .fetch_one(&mut *tx)
            .await?;
        tx.commit().await?;
        Ok(ScanQueued::Created(task))
    }

    fn insert_query() -> String {
        format!(
            "INSERT INTO extension_tasks (task_kind, course_id, mapping_id, extension_scope, status_id) \
             VALUES ($1, $2, $3, $4, $5) \
             RETURNING {COLUMNS}"
        )
    }

    pub async fn find_by_id(pool: &PgPool, id: DbId) -> Result<Option<ExtensionTask>, sqlx::Error> {
        let query = format!("SELECT {COLUMNS} FROM extension_tasks WHERE id = $1");
        sqlx::query_as::<_, ExtensionTask>(&query)
            .bind(id)
            .fetch_optional(pool)
            .await
    }

    /// Pending or running tasks of one kind, oldest first.
    pub async fn list_queued(
        pool: &PgPool,
        kind: TaskKind,
    ) -> Result<Vec<ExtensionTask>, sqlx::Error> {
        let query = format!(
            "SELECT {COLUMNS} FROM extension_tasks \
             WHERE task_kind = $1 AND status_id = ANY($2) \
             ORDER BY id"
        );
        sqlx::query_as::<_, ExtensionTask>(&query)
            .bind(kind.as_str())
            .bind(&QUEUED_STATUSES[..])
            .fetch_all(pool)
            .await
    }

    /// Atomically claim the oldest pending task.
    ///
    /// Uses `SELECT FOR UPDATE SKIP LOCKED` so several workers never claim
    /// the same task.
    pub async fn claim_next(
        pool: &PgPool,
        worker: &str,
    ) -> Result<Option<ExtensionTask>, sqlx::Error> {
        let query = format!(
            "UPDATE extension_tasks \
             SET status_id = $2, claimed_by = $1, attempts = attempts + 1, \
                 started_at = COALESCE(started_at, NOW()) \
             WHERE id = ( \
                 SELECT id FROM extension_tasks \
                 WHERE status_id = $3 \
                 ORDER BY id \
                 LIMIT 1 \
                 FOR UPDATE SKIP LOCKED \
             ) \
             RETURNING {COLUMNS}"
        );
        sqlx::query_as::<_, ExtensionTask>(&query)
            .bind(worker)
            .bind(TaskStatus::Running.id())
            .bind(TaskStatus::Pending.id())
            .fetch_optional(pool)
            .await
    }

    /// Put a partially processed task back in the queue with a new cursor.
    pub async fn requeue(
        pool: &PgPool,
        id: DbId,
        last_mapping_id: DbId,
    ) -> Result<(), sqlx::Error> {
        sqlx::query(
            "UPDATE extension_tasks \
             SET status_id = $2, last_mapping_id = $3, claimed_by = NULL \
             WHERE id = $1",
        )
        .bind(id)
        .bind(TaskStatus::Pending.id())
        .bind(last_mapping_id)
        .execute(pool)
        .await?;
        Ok(())
    }

    pub async fn complete(pool: &PgPool, id: DbId) -> Result<(), sqlx::Error> {
        sqlx::query(
            "UPDATE extension_tasks \
             SET status_id = $2, completed_at = NOW(), error_message = NULL \
             WHERE id = $1",
        )
        .bind(id)
        .bind(TaskStatus::Completed.id())
        .execute(pool)
        .await?;
        Ok(())
    }

    pub async fn fail(pool: &PgPool, id: DbId, error: &str) -> Result<(), sqlx::Error> {
        sqlx::query(
            "UPDATE extension_tasks \
             SET status_id = $2, completed_at = NOW(), error_message = $3 \
             WHERE id = $1",
        )
        .bind(id)
        .bind(TaskStatus::Failed.id())
        .bind(error)
        .execute(pool)
        .await?;
        Ok(())
    }
}
