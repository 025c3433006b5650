//! Repository for `assessment_mappings`.
//!
//! Every read joins `component_grades` so callers get the component
//! reference and assessment type alongside the mapping. "Active" means
//! extension-enabled and not soft-deleted.

use gradepush_core::activity::ComponentRef;
use gradepush_core::types::DbId;
use sqlx::PgPool;

use crate::models::mapping::{AssessmentMapping, CreateAssessmentMapping};

/// Column list for joined mapping queries (`m` = mapping, `cg` = component).
const COLUMNS: &str = "\
    m.id, m.course_id, m.component_grade_id, m.activity_type, m.activity_instance_id, \
    m.extension_enabled, m.deleted_at, cg.map_code, cg.mab_seq, cg.assessment_type, \
    m.created_at, m.updated_at";

const FROM: &str = "assessment_mappings m JOIN component_grades cg ON cg.id = m.component_grade_id";

const ACTIVE: &str = "m.extension_enabled = TRUE AND m.deleted_at IS NULL";

pub struct MappingRepo;

impl MappingRepo {
    pub async fn create(
        pool: &PgPool,
        input: &CreateAssessmentMapping,
    ) -> Result<AssessmentMapping, sqlx::Error> {
        let id: DbId = sqlx::query_scalar(
            "INSERT INTO assessment_mappings \
                 (course_id, component_grade_id, activity_type, activity_instance_id, extension_enabled) \
             VALUES ($1, $2, $3, $4, $5) \
             RETURNING id",
        )
        .bind(input.course_id)
        .bind(input.component_grade_id)
        .bind(&input.activity_type)
        .bind(input.activity_instance_id)
        .bind(input.extension_enabled.unwrap_or(true))
        .fetch_one(pool)
        .await?;

        let query = format!("SELECT {COLUMNS} FROM {FROM} WHERE m.id = $1");
        sqlx::query_as::<_, AssessmentMapping>(&query)
            .bind(id)
            .fetch_one(pool)
            .await
    }

    /// Find a mapping that has not been soft-deleted. Disabled mappings are
    /// returned so callers can log why they were skipped.
    pub async fn find_by_id(
        pool: &PgPool,
        id: DbId,
    ) -> Result<Option<AssessmentMapping>, sqlx::Error> {
        let query = format!("SELECT {COLUMNS} FROM {FROM} WHERE m.id = $1 AND m.deleted_at IS NULL");
        sqlx::query_as::<_, AssessmentMapping>(&query)
            .bind(id)
            .fetch_optional(pool)
            .await
    }

    /// Active mappings for one assessment component, across all courses.
    pub async fn list_active_by_component(
        pool: &PgPool,
        component: &ComponentRef,
    ) -> Result<Vec<AssessmentMapping>, sqlx::Error> {
        let query = format!(
            "SELECT {COLUMNS} FROM {FROM} \
             WHERE cg.map_code = $1 AND cg.mab_seq = $2 AND {ACTIVE} \
             ORDER BY m.id"
        );
        sqlx::query_as::<_, AssessmentMapping>(&query)
            .bind(&component.map_code)
            .bind(&component.mab_seq)
            .fetch_all(pool)
            .await
    }

    /// Active mappings in any of the given courses.
    pub async fn list_active_by_courses(
        pool: &PgPool,
        course_ids: &[DbId],
    ) -> Result<Vec<AssessmentMapping>, sqlx::Error> {
        if course_ids.is_empty() {
            return Ok(Vec::new());
        }
        let query = format!(
            "SELECT {COLUMNS} FROM {FROM} \
             WHERE m.course_id = ANY($1) AND {ACTIVE} \
             ORDER BY m.id"
        );
        sqlx::query_as::<_, AssessmentMapping>(&query)
            .bind(course_ids)
            .fetch_all(pool)
            .await
    }

    /// Next page of active mappings with `id > after_id`, ordered by id.
    /// `course_id = None` pages through every course.
    pub async fn list_active_page(
        pool: &PgPool,
        course_id: Option<DbId>,
        after_id: DbId,
        limit: i64,
    ) -> Result<Vec<AssessmentMapping>, sqlx::Error> {
        let query = format!(
            "SELECT {COLUMNS} FROM {FROM} \
             WHERE m.id > $1 AND ($2::BIGINT IS NULL OR m.course_id = $2) AND {ACTIVE} \
             ORDER BY m.id \
             LIMIT $3"
        );
        sqlx::query_as::<_, AssessmentMapping>(&query)
            .bind(after_id)
            .bind(course_id)
            .bind(limit)
            .fetch_all(pool)
            .await
    }

    pub async fn set_extension_enabled(
        pool: &PgPool,
        id: DbId,
        enabled: bool,
    ) -> Result<bool, sqlx::Error> {
        let result = sqlx::query(
            "UPDATE assessment_mappings SET extension_enabled = $2 \
             WHERE id = $1 AND deleted_at IS NULL",
        )
        .bind(id)
        .bind(enabled)
        .execute(pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Soft-delete a mapping. Returns `false` if it was already deleted.
    pub async fn soft_delete(pool: &PgPool, id: DbId) -> Result<bool, sqlx::Error> {
        let result = sqlx::query(
            "UPDATE assessment_mappings SET deleted_at = NOW() \
             WHERE id = $1 AND deleted_at IS NULL",
        )
        .bind(id)
        .execute(pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }
}
