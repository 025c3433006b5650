//! Engine error type aggregating every collaborator failure.

use gradepush_core::error::CoreError;
use gradepush_core::normalizer::NormalizeError;
use gradepush_core::types::DbId;

use crate::lms::LmsError;
use crate::queue::QueueError;
use crate::records::RecordsApiError;
use crate::store::StoreError;

#[derive(Debug, thiserror::Error)]
pub enum ExtensionError {
    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Lms(#[from] LmsError),

    #[error(transparent)]
    RecordsApi(#[from] RecordsApiError),

    #[error(transparent)]
    Queue(#[from] QueueError),

    #[error(transparent)]
    Normalize(#[from] NormalizeError),

    #[error(transparent)]
    Core(#[from] CoreError),

    #[error("Invalid override backup: {0}")]
    Backup(#[from] serde_json::Error),

    #[error("No activity store registered for activity type '{0}'")]
    UnsupportedActivity(String),

    #[error("Ledger row {0} has no valid override subject")]
    InvalidSubject(DbId),

    #[error("EC deadline {0} does not exist for the activity's time of day")]
    InvalidDeadline(chrono::NaiveDate),

    #[error("Accommodation {directive} on mapping {mapping_id} exceeds the representable deadline range")]
    ExtensionOutOfRange { mapping_id: DbId, directive: String },

    #[error("EC withdrawal for source record {0} does not name a component")]
    MissingComponent(String),

    #[error(
        "Mapping {mapping_id} was not removed: {failed} override(s) could not be reversed ({first_error})"
    )]
    RemovalIncomplete {
        mapping_id: DbId,
        failed: usize,
        first_error: String,
    },
}

impl ExtensionError {
    pub fn not_found(entity: &'static str, id: DbId) -> Self {
        ExtensionError::Core(CoreError::NotFound { entity, id })
    }
}
