//! Tombstones for explicitly deleted source records.

use gradepush_core::types::{DbId, Timestamp};
use serde::Serialize;
use sqlx::FromRow;

/// A row from the `extension_withdrawals` table.
#[derive(Debug, Clone, FromRow, Serialize)]
pub struct ExtensionWithdrawal {
    pub id: DbId,
    pub extension_type: String,
    pub source_record_id: String,
    pub student_code: String,
    pub created_at: Timestamp,
    pub updated_at: Timestamp,
}
