//! Extension applier: writes and reverses schedule overrides per mapping.
//!
//! EC extensions are per-user overrides ([`ec`]); accommodations are group
//! overrides shared by every student with the same magnitude on the same
//! activity ([`raa`]). Every override written is tracked by one active row in
//! the `extension_overrides` ledger, and reversing an override marks that
//! row restored ([`removal`] handles whole-mapping removal).

mod ec;
mod raa;
mod removal;

pub use removal::RemovalSummary;

use std::fmt;
use std::sync::Arc;

use gradepush_core::activity::{ActivityType, OverrideSubject};
use gradepush_core::types::DbId;
use gradepush_db::models::mapping::AssessmentMapping;
use gradepush_db::models::override_record::ExtensionOverride;
use serde::Serialize;

use crate::clock::Clock;
use crate::error::ExtensionError;
use crate::lms::{ActivityRegistry, ActivityStore, CourseDirectory};
use crate::store::ExtensionStore;

// ---------------------------------------------------------------------------
// Outcomes
// ---------------------------------------------------------------------------

/// Why a mapping was left untouched.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SkipReason {
    MappingDisabled,
    /// The source record was explicitly deleted earlier.
    Withdrawn,
    NoDeadline,
    /// The deadline (or the new EC deadline) has already passed.
    PastDeadline,
    NothingToExtend,
    NoActiveOverride,
    /// The active override belongs to a different source record.
    SourceMismatch,
    /// The update is for a different component than the mapping's.
    OtherComponent,
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            SkipReason::MappingDisabled => "mapping disabled",
            SkipReason::Withdrawn => "source record withdrawn",
            SkipReason::NoDeadline => "activity has no deadline",
            SkipReason::PastDeadline => "deadline already passed",
            SkipReason::NothingToExtend => "nothing to extend",
            SkipReason::NoActiveOverride => "no active override",
            SkipReason::SourceMismatch => "override belongs to another source record",
            SkipReason::OtherComponent => "different component",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", content = "reason", rename_all = "snake_case")]
pub enum ApplyOutcome {
    /// A new override and ledger row were written.
    Applied,
    /// An active override was rewritten in place.
    Updated,
    /// An override was reversed and its ledger row restored.
    Reverted,
    Skipped(SkipReason),
}

/// One mapping that failed during a batch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MappingFailure {
    pub mapping_id: DbId,
    pub course_id: DbId,
    pub error: String,
}

/// Aggregate of a batch of per-mapping applications.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ApplyReport {
    pub applied: usize,
    pub updated: usize,
    pub reverted: usize,
    pub skipped: usize,
    pub failures: Vec<MappingFailure>,
}

impl ApplyReport {
    pub fn record(&mut self, outcome: ApplyOutcome) {
        match outcome {
            ApplyOutcome::Applied => self.applied += 1,
            ApplyOutcome::Updated => self.updated += 1,
            ApplyOutcome::Reverted => self.reverted += 1,
            ApplyOutcome::Skipped(_) => self.skipped += 1,
        }
    }

    /// Log and collect a per-mapping failure.
    pub fn fail(&mut self, mapping: &AssessmentMapping, error: &ExtensionError) {
        tracing::error!(
            mapping_id = mapping.id,
            course_id = mapping.course_id,
            error = %error,
            "Extension update failed for mapping",
        );
        self.failures.push(MappingFailure {
            mapping_id: mapping.id,
            course_id: mapping.course_id,
            error: error.to_string(),
        });
    }

    pub fn merge(&mut self, other: ApplyReport) {
        self.applied += other.applied;
        self.updated += other.updated;
        self.reverted += other.reverted;
        self.skipped += other.skipped;
        self.failures.extend(other.failures);
    }

    pub fn is_success(&self) -> bool {
        self.failures.is_empty()
    }

    /// Failures joined into one line for the message ledger.
    pub fn error_summary(&self) -> Option<String> {
        if self.failures.is_empty() {
            return None;
        }
        Some(
            self.failures
                .iter()
                .map(|f| format!("mapping {}: {}", f.mapping_id, f.error))
                .collect::<Vec<_>>()
                .join("; "),
        )
    }
}

// ---------------------------------------------------------------------------
// Applier
// ---------------------------------------------------------------------------

pub struct ExtensionApplier {
    store: Arc<dyn ExtensionStore>,
    directory: Arc<dyn CourseDirectory>,
    registry: ActivityRegistry,
    clock: Arc<dyn Clock>,
    /// Recorded as `created_by` / `restored_by` on ledger rows.
    actor: String,
}

impl ExtensionApplier {
    pub fn new(
        store: Arc<dyn ExtensionStore>,
        directory: Arc<dyn CourseDirectory>,
        registry: ActivityRegistry,
        clock: Arc<dyn Clock>,
        actor: impl Into<String>,
    ) -> Self {
        Self {
            store,
            directory,
            registry,
            clock,
            actor: actor.into(),
        }
    }

    fn activity_store(
        &self,
        activity_type: &str,
    ) -> Result<(ActivityType, Arc<dyn ActivityStore>), ExtensionError> {
        ActivityType::parse(activity_type)
            .and_then(|t| self.registry.get(t).map(|s| (t, s)))
            .ok_or_else(|| ExtensionError::UnsupportedActivity(activity_type.to_string()))
    }

    fn skip(&self, mapping: &AssessmentMapping, reason: SkipReason) -> ApplyOutcome {
        tracing::info!(
            mapping_id = mapping.id,
            course_id = mapping.course_id,
            reason = %reason,
            "Skipping extension for mapping",
        );
        ApplyOutcome::Skipped(reason)
    }

    /// Undo the override a ledger row tracks and mark the row restored.
    ///
    /// With a backup the subject's previous override is written back;
    /// without one the override is deleted (already gone is fine).
    pub(crate) async fn reverse(&self, row: &ExtensionOverride) -> Result<(), ExtensionError> {
        let (_, activity) = self.activity_store(&row.activity_type)?;
        let subject = row.subject().ok_or(ExtensionError::InvalidSubject(row.id))?;

        match row.backup_schedule()? {
            Some(backup) => {
                match subject {
                    OverrideSubject::User(user_id) => {
                        activity
                            .write_user_override(row.activity_instance_id, user_id, &backup)
                            .await?
                    }
                    OverrideSubject::Group(group_id) => {
                        activity
                            .write_group_override(row.activity_instance_id, group_id, &backup)
                            .await?
                    }
                };
            }
            None => {
                let override_id = match row.override_id {
                    Some(id) => Some(id),
                    None => activity
                        .find_override(row.activity_instance_id, subject)
                        .await?
                        .map(|o| o.id),
                };
                if let Some(override_id) = override_id {
                    match activity
                        .delete_override(row.activity_instance_id, override_id)
                        .await
                    {
                        Ok(()) => {}
                        Err(e) if e.is_not_found() => {
                            tracing::debug!(override_id, "Override already removed");
                        }
                        Err(e) => return Err(e.into()),
                    }
                }
            }
        }

        self.store.mark_override_restored(row.id, &self.actor).await?;
        tracing::info!(
            ledger_id = row.id,
            mapping_id = row.mapping_id,
            subject = %subject,
            extension_type = %row.extension_type,
            "Override reversed",
        );
        Ok(())
    }
}
