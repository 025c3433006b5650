use crate::types::DbId;

/// Domain errors shared by every layer.
#[derive(Debug, thiserror::Error)]
pub enum CoreError {
    /// A mapping, ledger row or task id that does not exist.
    #[error("Entity not found: {entity} with id {id}")]
    NotFound { entity: &'static str, id: DbId },

    /// Input that can never be processed as given (bad identifier, scope,
    /// task row).
    #[error("Validation failed: {0}")]
    Validation(String),

    /// The request clashes with existing state, e.g. an overlapping scan or
    /// retrying a message that already succeeded.
    #[error("Conflict: {0}")]
    Conflict(String),
}
