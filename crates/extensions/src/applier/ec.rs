//! Extenuating-circumstance overrides (one per user per mapping).

use chrono::Utc;
use gradepush_core::activity::{ExtensionFamily, OverrideSubject};
use gradepush_core::normalizer::EcGrant;
use gradepush_core::schedule::{ec_deadline, ec_override};
use gradepush_core::types::DbId;
use gradepush_db::models::mapping::AssessmentMapping;
use gradepush_db::models::override_record::CreateExtensionOverride;

use super::{ApplyOutcome, ExtensionApplier, SkipReason};
use crate::error::ExtensionError;

impl ExtensionApplier {
    /// Apply an EC grant for one user on one mapping.
    ///
    /// The new deadline keeps the activity's original time of day (UTC). An
    /// existing active row is updated in place and keeps its original
    /// backup; otherwise any override the user already had is snapshotted
    /// into a new ledger row before the EC override is written over it.
    pub async fn apply_ec(
        &self,
        mapping: &AssessmentMapping,
        user_id: DbId,
        grant: &EcGrant,
    ) -> Result<ApplyOutcome, ExtensionError> {
        if !mapping.accepts_extensions() {
            return Ok(self.skip(mapping, SkipReason::MappingDisabled));
        }
        if grant.component != mapping.component() {
            return Ok(ApplyOutcome::Skipped(SkipReason::OtherComponent));
        }
        if self
            .store
            .is_withdrawn(ExtensionFamily::Ec, &grant.source_record_id)
            .await?
        {
            return Ok(self.skip(mapping, SkipReason::Withdrawn));
        }

        let (activity_type, activity) = self.activity_store(&mapping.activity_type)?;
        let instance_id = mapping.activity_instance_id;
        let schedule = activity.get_current_schedule(instance_id).await?;
        let Some(original_close) = schedule.close else {
            return Ok(self.skip(mapping, SkipReason::NoDeadline));
        };

        let new_close = ec_deadline(grant.new_deadline, original_close, &Utc)
            .ok_or(ExtensionError::InvalidDeadline(grant.new_deadline))?;
        if new_close <= self.clock.now() {
            return Ok(self.skip(mapping, SkipReason::PastDeadline));
        }

        let subject = OverrideSubject::User(user_id);
        let existing = activity.find_override(instance_id, subject).await?;
        let plan = ec_override(new_close, existing.as_ref().map(|o| &o.schedule));

        let active = self
            .store
            .find_active_override(mapping.id, subject, ExtensionFamily::Ec)
            .await?;

        // The ledger row exists before the live override is written, so an
        // interrupted apply never leaves an EC override without its backup.
        let (row, outcome) = match active {
            Some(row) => (row, ApplyOutcome::Updated),
            None => {
                let backup = existing
                    .as_ref()
                    .map(|o| serde_json::to_value(o.schedule))
                    .transpose()?;
                let row = self
                    .store
                    .upsert_override(&CreateExtensionOverride {
                        mapping_id: mapping.id,
                        activity_type,
                        activity_instance_id: instance_id,
                        subject,
                        extension_type: ExtensionFamily::Ec,
                        override_id: None,
                        backup,
                        source_record_id: Some(grant.source_record_id.clone()),
                        created_by: self.actor.clone(),
                    })
                    .await?;
                (row, ApplyOutcome::Applied)
            }
        };

        let override_id = activity
            .write_user_override(instance_id, user_id, &plan)
            .await?;
        self.store
            .update_override(row.id, Some(override_id), Some(&grant.source_record_id))
            .await?;

        tracing::info!(
            mapping_id = mapping.id,
            user_id,
            source_record_id = %grant.source_record_id,
            new_close = %new_close,
            outcome = ?outcome,
            "EC override in place",
        );
        Ok(outcome)
    }

    /// Reverse the user's EC override on a mapping if it came from
    /// `source_record_id`. Anything else is a logged no-op.
    pub async fn withdraw_ec(
        &self,
        mapping: &AssessmentMapping,
        user_id: DbId,
        source_record_id: &str,
    ) -> Result<ApplyOutcome, ExtensionError> {
        let Some(row) = self
            .store
            .find_active_override(mapping.id, OverrideSubject::User(user_id), ExtensionFamily::Ec)
            .await?
        else {
            return Ok(self.skip(mapping, SkipReason::NoActiveOverride));
        };

        if row.source_record_id.as_deref() != Some(source_record_id) {
            tracing::info!(
                mapping_id = mapping.id,
                user_id,
                requested = source_record_id,
                active = row.source_record_id.as_deref().unwrap_or(""),
                "EC withdrawal does not match the active override",
            );
            return Ok(ApplyOutcome::Skipped(SkipReason::SourceMismatch));
        }

        self.reverse(&row).await?;
        Ok(ApplyOutcome::Reverted)
    }
}
