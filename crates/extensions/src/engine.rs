//! Routes one canonical update through the mapping resolver and applier.

use std::sync::Arc;

use gradepush_core::activity::ExtensionFamily;
use gradepush_core::normalizer::{ExtensionUpdate, WithdrawalReason};
use gradepush_core::provision::TierTable;
use gradepush_core::types::DbId;
use gradepush_db::models::mapping::AssessmentMapping;

use crate::applier::{ApplyOutcome, ApplyReport, ExtensionApplier, SkipReason};
use crate::error::ExtensionError;
use crate::resolver::{MappingResolver, StudentMappings};
use crate::store::ExtensionStore;

pub struct ExtensionEngine {
    store: Arc<dyn ExtensionStore>,
    resolver: MappingResolver,
    applier: ExtensionApplier,
}

impl ExtensionEngine {
    pub fn new(
        store: Arc<dyn ExtensionStore>,
        resolver: MappingResolver,
        applier: ExtensionApplier,
    ) -> Self {
        Self {
            store,
            resolver,
            applier,
        }
    }

    pub fn applier(&self) -> &ExtensionApplier {
        &self.applier
    }

    pub fn resolver(&self) -> &MappingResolver {
        &self.resolver
    }

    /// Tier table for RAA updates; EC updates never consult it.
    pub async fn tiers_for(&self, family: ExtensionFamily) -> Result<TierTable, ExtensionError> {
        match family {
            ExtensionFamily::Raa => Ok(self.store.tier_table().await?),
            ExtensionFamily::Ec => Ok(TierTable::default()),
        }
    }

    /// Apply one streamed update to every mapping it concerns.
    ///
    /// Lookup failures abort the update; failures on individual mappings
    /// are collected into the report and the rest still run.
    pub async fn apply_update(&self, update: &ExtensionUpdate) -> Result<ApplyReport, ExtensionError> {
        if let ExtensionUpdate::Withdrawal(w) = update {
            if w.reason == WithdrawalReason::Deleted
                && self
                    .store
                    .record_withdrawal(w.family, &w.source_record_id, &w.student_code)
                    .await?
            {
                tracing::info!(
                    family = %w.family,
                    source_record_id = %w.source_record_id,
                    "Source record tombstoned",
                );
            }
        }

        let student_code = update.student_code();
        let target = match update {
            ExtensionUpdate::AccommodationStatusChange(_)
            | ExtensionUpdate::AccommodationProvisions(_) => {
                self.resolver.for_student(student_code).await?
            }
            ExtensionUpdate::EcGrant(grant) => {
                self.resolver
                    .for_component_and_student(&grant.component, student_code)
                    .await?
            }
            ExtensionUpdate::Withdrawal(w) => match w.family {
                ExtensionFamily::Raa => self.resolver.for_student(student_code).await?,
                ExtensionFamily::Ec => {
                    let component = w
                        .component
                        .as_ref()
                        .ok_or_else(|| ExtensionError::MissingComponent(w.source_record_id.clone()))?;
                    self.resolver
                        .for_component_and_student(component, student_code)
                        .await?
                }
            },
        };

        let Some(StudentMappings { user, mappings }) = target else {
            return Ok(ApplyReport::default());
        };
        if mappings.is_empty() {
            tracing::debug!(
                student_code,
                family = %update.family(),
                "No mappings for update",
            );
            return Ok(ApplyReport::default());
        }

        let tiers = self.tiers_for(update.family()).await?;
        let mut report = ApplyReport::default();
        for mapping in &mappings {
            match self.apply_to_mapping(mapping, user.id, update, &tiers).await {
                Ok(outcome) => report.record(outcome),
                Err(e) => report.fail(mapping, &e),
            }
        }

        tracing::info!(
            student_code,
            source_record_id = update.source_record_id(),
            family = %update.family(),
            mappings = mappings.len(),
            applied = report.applied,
            updated = report.updated,
            reverted = report.reverted,
            skipped = report.skipped,
            failed = report.failures.len(),
            "Extension update applied",
        );
        Ok(report)
    }

    /// Apply an update to one already-resolved mapping and user.
    pub async fn apply_to_mapping(
        &self,
        mapping: &AssessmentMapping,
        user_id: DbId,
        update: &ExtensionUpdate,
        tiers: &TierTable,
    ) -> Result<ApplyOutcome, ExtensionError> {
        match update {
            ExtensionUpdate::AccommodationStatusChange(a)
            | ExtensionUpdate::AccommodationProvisions(a) => {
                self.applier.apply_raa(mapping, user_id, a, tiers).await
            }
            ExtensionUpdate::EcGrant(grant) => self.applier.apply_ec(mapping, user_id, grant).await,
            ExtensionUpdate::Withdrawal(w) => match w.family {
                ExtensionFamily::Raa => self.applier.revoke_raa(mapping, user_id).await,
                ExtensionFamily::Ec => match &w.component {
                    Some(component) if *component != mapping.component() => {
                        Ok(ApplyOutcome::Skipped(SkipReason::OtherComponent))
                    }
                    _ => {
                        self.applier
                            .withdraw_ec(mapping, user_id, &w.source_record_id)
                            .await
                    }
                },
            },
        }
    }
}
