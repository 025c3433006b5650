//! Repository for the `component_grades` table.

use gradepush_core::activity::ComponentRef;
use sqlx::PgPool;

use crate::models::component_grade::{ComponentGrade, CreateComponentGrade};

/// Column list for `component_grades` queries.
const COLUMNS: &str = "id, map_code, mab_seq, mab_name, assessment_type, created_at, updated_at";

pub struct ComponentGradeRepo;

impl ComponentGradeRepo {
    /// Insert a component, or refresh its name and assessment type if the
    /// `(map_code, mab_seq)` pair already exists.
    pub async fn upsert(
        pool: &PgPool,
        input: &CreateComponentGrade,
    ) -> Result<ComponentGrade, sqlx::Error> {
        let query = format!(
            "INSERT INTO component_grades (map_code, mab_seq, mab_name, assessment_type) \
             VALUES ($1, $2, $3, $4) \
             ON CONFLICT (map_code, mab_seq) DO UPDATE \
             SET mab_name = EXCLUDED.mab_name, assessment_type = EXCLUDED.assessment_type \
             RETURNING {COLUMNS}"
        );
        sqlx::query_as::<_, ComponentGrade>(&query)
            .bind(&input.map_code)
            .bind(&input.mab_seq)
            .bind(&input.mab_name)
            .bind(&input.assessment_type)
            .fetch_one(pool)
            .await
    }

    pub async fn find_by_component(
        pool: &PgPool,
        component: &ComponentRef,
    ) -> Result<Option<ComponentGrade>, sqlx::Error> {
        let query =
            format!("SELECT {COLUMNS} FROM component_grades WHERE map_code = $1 AND mab_seq = $2");
        sqlx::query_as::<_, ComponentGrade>(&query)
            .bind(&component.map_code)
            .bind(&component.mab_seq)
            .fetch_optional(pool)
            .await
    }
}
