//! SITS assessment component rows.

use gradepush_core::activity::ComponentRef;
use gradepush_core::types::{DbId, Timestamp};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// A row from the `component_grades` table.
#[derive(Debug, Clone, FromRow, Serialize)]
pub struct ComponentGrade {
    pub id: DbId,
    pub map_code: String,
    pub mab_seq: String,
    pub mab_name: Option<String>,
    /// Assessment type used for tier lookups (e.g. `EXAM`, `CW`).
    pub assessment_type: Option<String>,
    pub created_at: Timestamp,
    pub updated_at: Timestamp,
}

impl ComponentGrade {
    pub fn component(&self) -> ComponentRef {
        ComponentRef::new(&self.map_code, &self.mab_seq)
    }
}

/// DTO for registering a component.
#[derive(Debug, Clone, Deserialize)]
pub struct CreateComponentGrade {
    pub map_code: String,
    pub mab_seq: String,
    pub mab_name: Option<String>,
    pub assessment_type: Option<String>,
}
