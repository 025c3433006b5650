//! Mapping removal: reverse every override, then soft-delete.

use gradepush_core::types::DbId;

use super::ExtensionApplier;
use crate::error::ExtensionError;

/// What a successful removal undid.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RemovalSummary {
    pub mapping_id: DbId,
    pub reversed: usize,
}

impl ExtensionApplier {
    /// Reverse all active overrides of a mapping and soft-delete it.
    ///
    /// The mapping is only deleted if every reversal succeeded; otherwise it
    /// stays in place (with the rows that did reverse marked restored) so the
    /// removal can be retried.
    pub async fn remove_mapping(&self, mapping_id: DbId) -> Result<RemovalSummary, ExtensionError> {
        let mapping = self
            .store
            .get_mapping(mapping_id)
            .await?
            .ok_or_else(|| ExtensionError::not_found("assessment_mapping", mapping_id))?;

        let rows = self.store.active_overrides(mapping.id).await?;
        let mut reversed = 0;
        let mut errors = Vec::new();
        for row in &rows {
            match self.reverse(row).await {
                Ok(()) => reversed += 1,
                Err(e) => {
                    tracing::error!(
                        mapping_id,
                        course_id = mapping.course_id,
                        ledger_id = row.id,
                        error = %e,
                        "Failed to reverse override during mapping removal",
                    );
                    errors.push(e.to_string());
                }
            }
        }

        if let Some(first_error) = errors.first() {
            return Err(ExtensionError::RemovalIncomplete {
                mapping_id,
                failed: errors.len(),
                first_error: first_error.clone(),
            });
        }

        self.store.soft_delete_mapping(mapping_id).await?;
        tracing::info!(mapping_id, course_id = mapping.course_id, reversed, "Mapping removed");
        Ok(RemovalSummary {
            mapping_id,
            reversed,
        })
    }
}
