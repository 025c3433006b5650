//! Tier configuration rows.

use gradepush_core::provision::{ExtensionKind, TierEntry};
use gradepush_core::types::{DbId, Timestamp};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// A row from the `extension_tiers` table.
#[derive(Debug, Clone, FromRow, Serialize)]
pub struct ExtensionTier {
    pub id: DbId,
    /// Assessment type the tier applies to, or `*` for any.
    pub assessment_type: String,
    pub tier: String,
    pub extension_kind: String,
    pub extension_value: f64,
    pub break_value: Option<f64>,
    pub enabled: bool,
    pub created_at: Timestamp,
    pub updated_at: Timestamp,
}

impl ExtensionTier {
    /// Convert to a lookup entry. Rows with an unknown kind are dropped.
    pub fn to_entry(&self) -> Option<TierEntry> {
        Some(TierEntry {
            assessment_type: self.assessment_type.clone(),
            tier: self.tier.clone(),
            kind: ExtensionKind::parse(&self.extension_kind)?,
            value: self.extension_value,
            break_value: self.break_value,
            enabled: self.enabled,
        })
    }
}

/// DTO for inserting or replacing a tier row.
#[derive(Debug, Clone, Deserialize)]
pub struct UpsertExtensionTier {
    pub assessment_type: String,
    pub tier: String,
    pub extension_kind: String,
    pub extension_value: f64,
    pub break_value: Option<f64>,
    pub enabled: Option<bool>,
}
