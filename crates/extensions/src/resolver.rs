//! Mapping resolution: which mappings an update applies to.
//!
//! Disabled and soft-deleted mappings are filtered by the store and checked
//! again here. An empty result is not an error.

use std::sync::Arc;

use gradepush_core::activity::ComponentRef;
use gradepush_db::models::mapping::AssessmentMapping;

use crate::error::ExtensionError;
use crate::lms::{CourseDirectory, LmsUser};
use crate::store::ExtensionStore;

/// A student's LMS account and the mappings that apply to them.
#[derive(Debug, Clone)]
pub struct StudentMappings {
    pub user: LmsUser,
    pub mappings: Vec<AssessmentMapping>,
}

pub struct MappingResolver {
    store: Arc<dyn ExtensionStore>,
    directory: Arc<dyn CourseDirectory>,
}

impl MappingResolver {
    pub fn new(store: Arc<dyn ExtensionStore>, directory: Arc<dyn CourseDirectory>) -> Self {
        Self { store, directory }
    }

    async fn find_user(&self, student_code: &str) -> Result<Option<LmsUser>, ExtensionError> {
        let user = self.directory.find_user_by_student_code(student_code).await?;
        if user.is_none() {
            tracing::info!(student_code, "No LMS user for student code");
        }
        Ok(user)
    }

    /// Every active mapping in the courses the student is enrolled on.
    pub async fn for_student(
        &self,
        student_code: &str,
    ) -> Result<Option<StudentMappings>, ExtensionError> {
        let Some(user) = self.find_user(student_code).await? else {
            return Ok(None);
        };
        let course_ids = self.directory.enrolled_course_ids(user.id).await?;
        let mappings = retain_active(self.store.mappings_for_courses(&course_ids).await?);
        Ok(Some(StudentMappings { user, mappings }))
    }

    /// Active mappings for one component, across every course.
    pub async fn for_component(
        &self,
        component: &ComponentRef,
    ) -> Result<Vec<AssessmentMapping>, ExtensionError> {
        Ok(retain_active(self.store.mappings_for_component(component).await?))
    }

    /// Active mappings for one component in courses the student is on.
    pub async fn for_component_and_student(
        &self,
        component: &ComponentRef,
        student_code: &str,
    ) -> Result<Option<StudentMappings>, ExtensionError> {
        let mappings = self.for_component(component).await?;
        if mappings.is_empty() {
            tracing::debug!(component = %component, "No active mappings for component");
            return Ok(None);
        }
        let Some(user) = self.find_user(student_code).await? else {
            return Ok(None);
        };

        let mut enrolled = Vec::with_capacity(mappings.len());
        for mapping in mappings {
            if self.directory.is_enrolled(mapping.course_id, user.id).await? {
                enrolled.push(mapping);
            }
        }
        Ok(Some(StudentMappings {
            user,
            mappings: enrolled,
        }))
    }
}

fn retain_active(mut mappings: Vec<AssessmentMapping>) -> Vec<AssessmentMapping> {
    mappings.retain(|m| {
        let keep = m.accepts_extensions();
        if !keep {
            tracing::debug!(mapping_id = m.id, course_id = m.course_id, "Skipping disabled mapping");
        }
        keep
    });
    mappings
}
