//! Accommodation (RAA) overrides, applied through shared per-magnitude
//! groups.

use std::sync::Arc;

use gradepush_core::activity::{ActivityType, ExtensionFamily, OverrideSubject};
use gradepush_core::normalizer::AccommodationUpdate;
use gradepush_core::provision::{ExtensionDirective, TierTable};
use gradepush_core::schedule::{is_raa_group_for, plan_accommodation, raa_group_name, PlanSkip};
use gradepush_core::types::DbId;
use gradepush_db::models::mapping::AssessmentMapping;
use gradepush_db::models::override_record::CreateExtensionOverride;

use super::{ApplyOutcome, ExtensionApplier, SkipReason};
use crate::error::ExtensionError;
use crate::lms::ActivityStore;

impl ExtensionApplier {
    /// The directive an update grants on this mapping, falling back to the
    /// tier table for approved records without explicit values.
    fn raa_directive(
        mapping: &AssessmentMapping,
        update: &AccommodationUpdate,
        tiers: &TierTable,
    ) -> Option<ExtensionDirective> {
        if update.directive.is_some() {
            return update.directive;
        }
        if !update.is_approved() {
            return None;
        }
        update
            .provision_tier
            .as_deref()
            .and_then(|tier| tiers.lookup(tier, mapping.assessment_type.as_deref()))
    }

    /// Put the user in the RAA group matching their accommodation on this
    /// mapping's activity, or take them out of every RAA group if they are
    /// no longer entitled.
    pub async fn apply_raa(
        &self,
        mapping: &AssessmentMapping,
        user_id: DbId,
        update: &AccommodationUpdate,
        tiers: &TierTable,
    ) -> Result<ApplyOutcome, ExtensionError> {
        if !mapping.accepts_extensions() {
            return Ok(self.skip(mapping, SkipReason::MappingDisabled));
        }
        if self
            .store
            .is_withdrawn(ExtensionFamily::Raa, &update.source_record_id)
            .await?
        {
            return Ok(self.skip(mapping, SkipReason::Withdrawn));
        }

        let Some(directive) = Self::raa_directive(mapping, update, tiers) else {
            return self.revoke_raa(mapping, user_id).await;
        };

        let (activity_type, activity) = self.activity_store(&mapping.activity_type)?;
        let instance_id = mapping.activity_instance_id;
        let schedule = activity.get_current_schedule(instance_id).await?;
        if schedule.has_closed(self.clock.now()) {
            return Ok(self.skip(mapping, SkipReason::PastDeadline));
        }

        let plan = match plan_accommodation(&schedule, &directive) {
            Ok(plan) => plan,
            Err(PlanSkip::NoDeadline) => return Ok(self.skip(mapping, SkipReason::NoDeadline)),
            Err(PlanSkip::NothingToExtend) => {
                return Ok(self.skip(mapping, SkipReason::NothingToExtend))
            }
            Err(PlanSkip::OutOfRange) => {
                return Err(ExtensionError::ExtensionOutOfRange {
                    mapping_id: mapping.id,
                    directive: directive.label(),
                })
            }
        };

        let name = raa_group_name(activity_type, instance_id, &directive);
        let group = self
            .directory
            .find_or_create_group(mapping.course_id, &name)
            .await?;

        self.leave_raa_groups(mapping, activity_type, &activity, user_id, Some(group.id))
            .await?;
        if self.directory.add_group_member(group.id, user_id).await? {
            tracing::debug!(group_id = group.id, user_id, group = %name, "Added user to RAA group");
        }

        let subject = OverrideSubject::Group(group.id);
        let active = self
            .store
            .find_active_override(mapping.id, subject, ExtensionFamily::Raa)
            .await?;
        let override_id = activity
            .write_group_override(instance_id, group.id, &plan)
            .await?;

        let outcome = match active {
            Some(row) => {
                if row.override_id != Some(override_id) {
                    self.store
                        .update_override(row.id, Some(override_id), None)
                        .await?;
                }
                ApplyOutcome::Updated
            }
            None => {
                self.store
                    .upsert_override(&CreateExtensionOverride {
                        mapping_id: mapping.id,
                        activity_type,
                        activity_instance_id: instance_id,
                        subject,
                        extension_type: ExtensionFamily::Raa,
                        override_id: Some(override_id),
                        backup: None,
                        source_record_id: None,
                        created_by: self.actor.clone(),
                    })
                    .await?;
                ApplyOutcome::Applied
            }
        };

        tracing::info!(
            mapping_id = mapping.id,
            course_id = mapping.course_id,
            user_id,
            group = %name,
            "RAA override in place",
        );
        Ok(outcome)
    }

    /// Remove the user from this activity's RAA groups.
    pub async fn revoke_raa(
        &self,
        mapping: &AssessmentMapping,
        user_id: DbId,
    ) -> Result<ApplyOutcome, ExtensionError> {
        let (activity_type, activity) = self.activity_store(&mapping.activity_type)?;
        let schedule = activity
            .get_current_schedule(mapping.activity_instance_id)
            .await?;
        if schedule.has_closed(self.clock.now()) {
            return Ok(self.skip(mapping, SkipReason::PastDeadline));
        }

        if self
            .leave_raa_groups(mapping, activity_type, &activity, user_id, None)
            .await?
        {
            tracing::info!(
                mapping_id = mapping.id,
                course_id = mapping.course_id,
                user_id,
                "RAA membership revoked",
            );
            Ok(ApplyOutcome::Reverted)
        } else {
            Ok(ApplyOutcome::Skipped(SkipReason::NoActiveOverride))
        }
    }

    /// Leave every RAA group of the mapping's activity except `keep`.
    /// A group left empty has its override reversed.
    ///
    /// Returns whether any membership changed.
    async fn leave_raa_groups(
        &self,
        mapping: &AssessmentMapping,
        activity_type: ActivityType,
        activity: &Arc<dyn ActivityStore>,
        user_id: DbId,
        keep: Option<DbId>,
    ) -> Result<bool, ExtensionError> {
        let instance_id = mapping.activity_instance_id;
        let groups = self.directory.user_groups(mapping.course_id, user_id).await?;

        let mut changed = false;
        for group in groups
            .iter()
            .filter(|g| Some(g.id) != keep && is_raa_group_for(&g.name, activity_type, instance_id))
        {
            if !self.directory.remove_group_member(group.id, user_id).await? {
                continue;
            }
            changed = true;
            tracing::debug!(group_id = group.id, user_id, group = %group.name, "Removed user from RAA group");

            if self.directory.group_member_count(group.id).await? > 0 {
                continue;
            }
            let subject = OverrideSubject::Group(group.id);
            match self
                .store
                .find_active_override(mapping.id, subject, ExtensionFamily::Raa)
                .await?
            {
                Some(row) => self.reverse(&row).await?,
                None => {
                    if let Some(found) = activity.find_override(instance_id, subject).await? {
                        activity.delete_override(instance_id, found.id).await?;
                    }
                }
            }
        }
        Ok(changed)
    }
}
