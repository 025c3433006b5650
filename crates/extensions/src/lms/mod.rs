//! Learning-platform collaborators: activity stores and the course
//! directory (users, enrolments, groups).

pub mod rest;

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use gradepush_core::activity::{ActivityType, OverrideSubject};
use gradepush_core::schedule::{ActivitySchedule, ScheduleOverride};
use gradepush_core::types::DbId;
use serde::{Deserialize, Serialize};

pub use rest::{LmsRestClient, RestActivityStore};

// ---------------------------------------------------------------------------
// Error
// ---------------------------------------------------------------------------

#[derive(Debug, thiserror::Error)]
pub enum LmsError {
    #[error("LMS request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("LMS returned HTTP {status} for {path}")]
    HttpStatus { status: u16, path: String },

    #[error("LMS resource not found: {0}")]
    NotFound(String),

    #[error("Unexpected LMS response: {0}")]
    InvalidResponse(String),
}

impl LmsError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, LmsError::NotFound(_))
    }
}

// ---------------------------------------------------------------------------
// Types
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LmsUser {
    pub id: DbId,
    pub student_code: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LmsGroup {
    pub id: DbId,
    pub course_id: DbId,
    pub name: String,
}

/// An override as currently stored on an activity.
#[derive(Debug, Clone, PartialEq)]
pub struct ActivityOverride {
    pub id: DbId,
    pub subject: OverrideSubject,
    pub schedule: ScheduleOverride,
}

// ---------------------------------------------------------------------------
// Traits
// ---------------------------------------------------------------------------

/// Schedule and override operations for one activity type.
///
/// Writes are upserts keyed by subject: writing the same subject twice
/// replaces the override and returns the same id.
#[async_trait]
pub trait ActivityStore: Send + Sync {
    fn activity_type(&self) -> ActivityType;

    async fn get_current_schedule(&self, instance_id: DbId) -> Result<ActivitySchedule, LmsError>;

    async fn find_override(
        &self,
        instance_id: DbId,
        subject: OverrideSubject,
    ) -> Result<Option<ActivityOverride>, LmsError>;

    async fn write_user_override(
        &self,
        instance_id: DbId,
        user_id: DbId,
        schedule: &ScheduleOverride,
    ) -> Result<DbId, LmsError>;

    async fn write_group_override(
        &self,
        instance_id: DbId,
        group_id: DbId,
        schedule: &ScheduleOverride,
    ) -> Result<DbId, LmsError>;

    async fn delete_override(&self, instance_id: DbId, override_id: DbId) -> Result<(), LmsError>;
}

/// Users, enrolments and groups.
#[async_trait]
pub trait CourseDirectory: Send + Sync {
    async fn find_user_by_student_code(&self, student_code: &str)
        -> Result<Option<LmsUser>, LmsError>;

    async fn enrolled_course_ids(&self, user_id: DbId) -> Result<Vec<DbId>, LmsError>;

    async fn is_enrolled(&self, course_id: DbId, user_id: DbId) -> Result<bool, LmsError>;

    async fn find_or_create_group(&self, course_id: DbId, name: &str) -> Result<LmsGroup, LmsError>;

    async fn user_groups(&self, course_id: DbId, user_id: DbId) -> Result<Vec<LmsGroup>, LmsError>;

    /// Returns `false` if the user was already a member.
    async fn add_group_member(&self, group_id: DbId, user_id: DbId) -> Result<bool, LmsError>;

    /// Returns `false` if the user was not a member.
    async fn remove_group_member(&self, group_id: DbId, user_id: DbId) -> Result<bool, LmsError>;

    async fn group_member_count(&self, group_id: DbId) -> Result<usize, LmsError>;
}

// ---------------------------------------------------------------------------
// Registry
// ---------------------------------------------------------------------------

/// Activity stores keyed by the activity type they serve.
#[derive(Clone, Default)]
pub struct ActivityRegistry {
    stores: HashMap<ActivityType, Arc<dyn ActivityStore>>,
}

impl ActivityRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a store, replacing any previous one for its type.
    pub fn register(&mut self, store: Arc<dyn ActivityStore>) {
        self.stores.insert(store.activity_type(), store);
    }

    pub fn with(mut self, store: Arc<dyn ActivityStore>) -> Self {
        self.register(store);
        self
    }

    pub fn get(&self, activity_type: ActivityType) -> Option<Arc<dyn ActivityStore>> {
        self.stores.get(&activity_type).cloned()
    }

    pub fn supported(&self) -> Vec<ActivityType> {
        ActivityType::ALL
            .into_iter()
            .filter(|t| self.stores.contains_key(t))
            .collect()
    }
}
