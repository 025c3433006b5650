//! Assessment mapping rows (component grade to local activity).

use gradepush_core::activity::{ActivityType, ComponentRef};
use gradepush_core::types::{DbId, Timestamp};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

use super::component_grade::CreateComponentGrade;

/// A row from `assessment_mappings`, joined with its component grade.
#[derive(Debug, Clone, FromRow, Serialize)]
pub struct AssessmentMapping {
    pub id: DbId,
    pub course_id: DbId,
    pub component_grade_id: DbId,
    pub activity_type: String,
    pub activity_instance_id: DbId,
    pub extension_enabled: bool,
    pub deleted_at: Option<Timestamp>,
    pub map_code: String,
    pub mab_seq: String,
    pub assessment_type: Option<String>,
    pub created_at: Timestamp,
    pub updated_at: Timestamp,
}

impl AssessmentMapping {
    /// Parsed activity type; `None` for types this service cannot extend.
    pub fn activity(&self) -> Option<ActivityType> {
        ActivityType::parse(&self.activity_type)
    }

    pub fn component(&self) -> ComponentRef {
        ComponentRef::new(&self.map_code, &self.mab_seq)
    }

    /// Not soft-deleted and extensions switched on.
    pub fn accepts_extensions(&self) -> bool {
        self.extension_enabled && self.deleted_at.is_none()
    }
}

/// DTO for creating a mapping.
#[derive(Debug, Clone, Deserialize)]
pub struct CreateAssessmentMapping {
    pub course_id: DbId,
    pub component_grade_id: DbId,
    pub activity_type: String,
    pub activity_instance_id: DbId,
    /// Defaults to `true`.
    pub extension_enabled: Option<bool>,
}

/// DTO for registering a mapping together with its component.
#[derive(Debug, Clone, Deserialize)]
pub struct RegisterMapping {
    pub course_id: DbId,
    pub activity_type: String,
    pub activity_instance_id: DbId,
    pub component: CreateComponentGrade,
    pub extension_enabled: Option<bool>,
}

impl RegisterMapping {
    pub fn mapping(&self, component_grade_id: DbId) -> CreateAssessmentMapping {
        CreateAssessmentMapping {
            course_id: self.course_id,
            component_grade_id,
            activity_type: self.activity_type.clone(),
            activity_instance_id: self.activity_instance_id,
            extension_enabled: self.extension_enabled,
        }
    }
}
