//! Deferred extension tasks.
//!
//! Scans, new-mapping backfills and enrolment runs are queued as rows in
//! `extension_tasks` and claimed one at a time by [`TaskRunner`]. A full
//! scan processes one page per claim and requeues itself with the last
//! mapping id until the page comes back short.

use std::sync::Arc;
use std::time::Duration;

use gradepush_core::activity::ActivityType;
use gradepush_core::error::CoreError;
use gradepush_core::scan::{covered_by, ScanRequest};
use gradepush_core::types::DbId;
use gradepush_db::models::extension_task::{
    CreateExtensionTask, ExtensionTask, ScanQueued, TaskKind,
};
use gradepush_db::models::mapping::{AssessmentMapping, RegisterMapping};
use gradepush_db::models::status::TaskStatus;
use tokio_util::sync::CancellationToken;
use tracing::Instrument;
use uuid::Uuid;

use crate::applier::ApplyReport;
use crate::error::ExtensionError;
use crate::rescan::Rescanner;
use crate::store::ExtensionStore;

/// Default polling interval for the task loop.
const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(30);

// ---------------------------------------------------------------------------
// Enqueueing
// ---------------------------------------------------------------------------

/// Queue a full re-scan unless a pending or running scan already covers it.
pub async fn request_scan(
    store: &dyn ExtensionStore,
    request: ScanRequest,
) -> Result<ExtensionTask, ExtensionError> {
    let task = match store.create_scan_task(&request).await? {
        ScanQueued::Created(task) => task,
        ScanQueued::Covered(existing) => return Err(covered_by(&existing).into()),
    };
    tracing::info!(
        task_id = task.id,
        course_id = request.course_id,
        scope = %request.scope,
        "Extension scan queued",
    );
    Ok(task)
}

/// Queue the backfill for a newly created mapping.
pub async fn enqueue_new_mapping(
    store: &dyn ExtensionStore,
    mapping_id: DbId,
) -> Result<ExtensionTask, ExtensionError> {
    let mapping = store
        .get_mapping(mapping_id)
        .await?
        .ok_or_else(|| ExtensionError::not_found("assessment_mapping", mapping_id))?;
    let task = store
        .create_task(&CreateExtensionTask::new_mapping(mapping.course_id, mapping.id))
        .await?;
    tracing::info!(task_id = task.id, mapping_id, "New mapping backfill queued");
    Ok(task)
}

/// Register a mapping and its component, then queue the backfill.
///
/// A mapping registered with extensions disabled gets no backfill.
pub async fn register_mapping(
    store: &dyn ExtensionStore,
    input: &RegisterMapping,
) -> Result<(AssessmentMapping, Option<ExtensionTask>), ExtensionError> {
    if ActivityType::parse(&input.activity_type).is_none() {
        return Err(CoreError::Validation(format!(
            "Unsupported activity type '{}'",
            input.activity_type
        ))
        .into());
    }
    if input.component.map_code.trim().is_empty() || input.component.mab_seq.trim().is_empty() {
        return Err(CoreError::Validation("Component needs a map code and sequence".into()).into());
    }

    let mapping = store.create_mapping(input).await?;
    tracing::info!(
        mapping_id = mapping.id,
        course_id = mapping.course_id,
        component = %mapping.component(),
        "Mapping registered",
    );
    if !mapping.accepts_extensions() {
        return Ok((mapping, None));
    }
    let task = enqueue_new_mapping(store, mapping.id).await?;
    Ok((mapping, Some(task)))
}

/// Make sure an enrolment run is queued while events are due, that is never
/// tried or last tried at least `retry_after_secs` ago.
///
/// Returns the created task, if one was needed.
pub async fn ensure_enrolment_task(
    store: &dyn ExtensionStore,
    retry_after_secs: i64,
) -> Result<Option<ExtensionTask>, ExtensionError> {
    if store.pending_enrolments(1, retry_after_secs).await?.is_empty() {
        return Ok(None);
    }
    queue_enrolment_run(store).await
}

async fn queue_enrolment_run(
    store: &dyn ExtensionStore,
) -> Result<Option<ExtensionTask>, ExtensionError> {
    if !store.queued_tasks(TaskKind::Enrolments).await?.is_empty() {
        return Ok(None);
    }
    let task = store.create_task(&CreateExtensionTask::enrolments()).await?;
    tracing::debug!(task_id = task.id, "Enrolment run queued");
    Ok(Some(task))
}

/// Record a new enrolment and queue a run for it.
///
/// Returns `false` if the enrolment was already pending.
pub async fn enqueue_enrolment(
    store: &dyn ExtensionStore,
    course_id: DbId,
    user_id: DbId,
) -> Result<bool, ExtensionError> {
    let created = store.record_enrolment(course_id, user_id).await?;
    if created {
        queue_enrolment_run(store).await?;
    }
    Ok(created)
}

// ---------------------------------------------------------------------------
// Runner
// ---------------------------------------------------------------------------

/// Outcome of one claimed task.
#[derive(Debug, Clone)]
pub struct TaskRun {
    pub task_id: DbId,
    pub kind: Option<TaskKind>,
    /// `Pending` when the task was requeued with a new cursor.
    pub status: TaskStatus,
    pub report: ApplyReport,
}

enum Step {
    Done(ApplyReport),
    Continue { cursor: DbId, report: ApplyReport },
}

pub struct TaskRunner {
    store: Arc<dyn ExtensionStore>,
    rescanner: Arc<Rescanner>,
    worker: String,
    poll_interval: Duration,
}

impl TaskRunner {
    pub fn new(
        store: Arc<dyn ExtensionStore>,
        rescanner: Arc<Rescanner>,
        worker: impl Into<String>,
    ) -> Self {
        Self {
            store,
            rescanner,
            worker: worker.into(),
            poll_interval: DEFAULT_POLL_INTERVAL,
        }
    }

    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }

    /// Claim and run the oldest pending task. `None` if there was nothing
    /// to do.
    pub async fn run_next(&self) -> Result<Option<TaskRun>, ExtensionError> {
        let Some(task) = self.store.claim_task(&self.worker).await? else {
            return Ok(None);
        };

        let run_id = Uuid::now_v7();
        let span = tracing::info_span!(
            "extension_task",
            task_id = task.id,
            kind = %task.task_kind,
            run_id = %run_id,
        );
        let kind = task.kind();

        let run = async {
            match self.execute(&task).await {
                Ok(Step::Done(report)) => {
                    self.store.complete_task(task.id).await?;
                    tracing::info!(
                        applied = report.applied,
                        failed = report.failures.len(),
                        "Task completed",
                    );
                    Ok::<_, ExtensionError>((TaskStatus::Completed, report))
                }
                Ok(Step::Continue { cursor, report }) => {
                    self.store.requeue_task(task.id, cursor).await?;
                    tracing::info!(cursor, applied = report.applied, "Task requeued");
                    Ok((TaskStatus::Pending, report))
                }
                Err(e) => {
                    tracing::error!(error = %e, "Task failed");
                    self.store.fail_task(task.id, &e.to_string()).await?;
                    Ok((TaskStatus::Failed, ApplyReport::default()))
                }
            }
        }
        .instrument(span)
        .await?;

        Ok(Some(TaskRun {
            task_id: task.id,
            kind,
            status: run.0,
            report: run.1,
        }))
    }

    async fn execute(&self, task: &ExtensionTask) -> Result<Step, ExtensionError> {
        match task.kind() {
            Some(TaskKind::Scan) => {
                let request = task.scan_request().ok_or_else(|| {
                    CoreError::Validation(format!(
                        "Task {} has an invalid scan scope '{}'",
                        task.id, task.extension_scope
                    ))
                })?;
                let batch = self
                    .rescanner
                    .scan_batch(&request, task.last_mapping_id)
                    .await?;
                Ok(match batch.next_cursor {
                    Some(cursor) => Step::Continue {
                        cursor,
                        report: batch.report,
                    },
                    None => Step::Done(batch.report),
                })
            }
            Some(TaskKind::NewMapping) => {
                let mapping_id = task.mapping_id.ok_or_else(|| {
                    CoreError::Validation(format!("Task {} has no mapping id", task.id))
                })?;
                Ok(Step::Done(
                    self.rescanner.process_new_mapping(mapping_id).await?,
                ))
            }
            Some(TaskKind::Enrolments) => {
                let run = self.rescanner.process_enrolments().await?;
                Ok(Step::Done(run.report))
            }
            None => Err(CoreError::Validation(format!(
                "Task {} has unknown kind '{}'",
                task.id, task.task_kind
            ))
            .into()),
        }
    }

    /// Run tasks until none are pending or `cancel` fires.
    pub async fn drain(&self, cancel: &CancellationToken) -> Result<usize, ExtensionError> {
        ensure_enrolment_task(
            self.store.as_ref(),
            self.rescanner.config().enrolment_retry_secs,
        )
        .await?;
        let mut count = 0;
        while !cancel.is_cancelled() {
            if self.run_next().await?.is_none() {
                break;
            }
            count += 1;
        }
        Ok(count)
    }

    /// Poll for tasks every `poll_interval` until cancelled.
    pub async fn run(&self, cancel: CancellationToken) {
        let mut ticker = tokio::time::interval(self.poll_interval);
        tracing::info!(
            worker = %self.worker,
            poll_interval_ms = self.poll_interval.as_millis() as u64,
            "Task runner started",
        );

        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    tracing::info!("Task runner shutting down");
                    break;
                }
                _ = ticker.tick() => {
                    match self.drain(&cancel).await {
                        Ok(0) => {}
                        Ok(count) => tracing::debug!(count, "Tasks run"),
                        Err(e) => tracing::error!(error = %e, "Task cycle failed"),
                    }
                }
            }
        }
    }
}
