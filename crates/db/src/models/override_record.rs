//! Override ledger rows (`extension_overrides`).

use gradepush_core::activity::{ActivityType, ExtensionFamily, OverrideSubject};
use gradepush_core::schedule::ScheduleOverride;
use gradepush_core::types::{DbId, Timestamp};
use serde::Serialize;
use sqlx::FromRow;

/// A row from the `extension_overrides` table.
///
/// Exactly one of `user_id` / `group_id` is set (CHECK constraint). A row is
/// active until `restored_at` is set.
#[derive(Debug, Clone, FromRow, Serialize)]
pub struct ExtensionOverride {
    pub id: DbId,
    pub mapping_id: DbId,
    pub activity_type: String,
    pub activity_instance_id: DbId,
    pub user_id: Option<DbId>,
    pub group_id: Option<DbId>,
    pub extension_type: String,
    /// Override id in the activity store.
    pub override_id: Option<DbId>,
    /// Schedule the subject had before this extension, if any.
    pub backup: Option<serde_json::Value>,
    pub source_record_id: Option<String>,
    pub created_by: String,
    pub restored_by: Option<String>,
    pub restored_at: Option<Timestamp>,
    pub created_at: Timestamp,
    pub updated_at: Timestamp,
}

impl ExtensionOverride {
    pub fn subject(&self) -> Option<OverrideSubject> {
        OverrideSubject::from_columns(self.user_id, self.group_id)
    }

    pub fn family(&self) -> Option<ExtensionFamily> {
        ExtensionFamily::parse(&self.extension_type)
    }

    pub fn activity(&self) -> Option<ActivityType> {
        ActivityType::parse(&self.activity_type)
    }

    pub fn is_active(&self) -> bool {
        self.restored_at.is_none()
    }

    /// Decode the backup snapshot.
    pub fn backup_schedule(&self) -> Result<Option<ScheduleOverride>, serde_json::Error> {
        self.backup
            .as_ref()
            .map(|v| serde_json::from_value(v.clone()))
            .transpose()
    }
}

/// DTO for inserting a new active ledger row.
#[derive(Debug, Clone)]
pub struct CreateExtensionOverride {
    pub mapping_id: DbId,
    pub activity_type: ActivityType,
    pub activity_instance_id: DbId,
    pub subject: OverrideSubject,
    pub extension_type: ExtensionFamily,
    pub override_id: Option<DbId>,
    pub backup: Option<serde_json::Value>,
    pub source_record_id: Option<String>,
    pub created_by: String,
}
