//! Pending enrolment rows awaiting extension processing.

use gradepush_core::types::{DbId, Timestamp};
use serde::Serialize;
use sqlx::FromRow;

/// A row from the `enrolment_events` table.
#[derive(Debug, Clone, FromRow, Serialize)]
pub struct EnrolmentEvent {
    pub id: DbId,
    pub course_id: DbId,
    pub user_id: DbId,
    /// Times the user was looked for in the roster without being found.
    pub attempts: i32,
    /// When the last unsuccessful run looked for the user.
    pub last_attempt_at: Option<Timestamp>,
    pub created_at: Timestamp,
    pub updated_at: Timestamp,
}
