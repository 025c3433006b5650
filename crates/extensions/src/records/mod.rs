//! Student-records (SITS) roster collaborator.

pub mod sits;

use async_trait::async_trait;
use gradepush_core::activity::ComponentRef;
use gradepush_core::types::DbId;
use serde::{Deserialize, Serialize};

pub use sits::SitsApiClient;

#[derive(Debug, thiserror::Error)]
pub enum RecordsApiError {
    #[error("Student records request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("Student records API returned HTTP {0}")]
    HttpStatus(u16),

    #[error("Student records API failed after {attempts} attempt(s): {last_error}")]
    Exhausted { attempts: u32, last_error: String },
}

/// One student on a component roster.
///
/// `accommodation` and each entry of `extenuating_circumstances` are entity
/// objects in the same shapes as queue events (e.g.
/// `{"student_assessment": {...}}`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StudentRecord {
    pub student_code: String,
    #[serde(default)]
    pub moodle_user_id: Option<DbId>,
    #[serde(default)]
    pub accommodation: Option<serde_json::Value>,
    #[serde(default)]
    pub extenuating_circumstances: Vec<serde_json::Value>,
}

#[async_trait]
pub trait StudentRecordsApi: Send + Sync {
    /// Roster for one component. `fresh` bypasses any cache; `attempts`
    /// bounds the number of tries on transient failure.
    async fn get_students_for_component(
        &self,
        component: &ComponentRef,
        fresh: bool,
        attempts: u32,
    ) -> Result<Vec<StudentRecord>, RecordsApiError>;
}
