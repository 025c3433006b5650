//! Repository for pending `enrolment_events`.

use gradepush_core::types::DbId;
use sqlx::PgPool;

use crate::models::enrolment_event::EnrolmentEvent;

/// Column list for `enrolment_events` queries.
const COLUMNS: &str = "id, course_id, user_id, attempts, last_attempt_at, created_at, updated_at";

pub struct EnrolmentEventRepo;

impl EnrolmentEventRepo {
    /// Queue a user enrolment. Returns `false` if it was already pending.
    pub async fn record(pool: &PgPool, course_id: DbId, user_id: DbId) -> Result<bool, sqlx::Error> {
        let result = sqlx::query(
            "INSERT INTO enrolment_events (course_id, user_id) VALUES ($1, $2) \
             ON CONFLICT (course_id, user_id) DO NOTHING",
        )
        .bind(course_id)
        .bind(user_id)
        .execute(pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Oldest pending events, grouped by course.
    ///
    /// Events already tried are only due again `retry_after_secs` after
    /// their last attempt.
    pub async fn list_pending(
        pool: &PgPool,
        limit: i64,
        retry_after_secs: i64,
    ) -> Result<Vec<EnrolmentEvent>, sqlx::Error> {
        let query = format!(
            "SELECT {COLUMNS} FROM enrolment_events \
             WHERE last_attempt_at IS NULL \
                OR last_attempt_at <= NOW() - make_interval(secs => $2) \
             ORDER BY course_id, id LIMIT $1"
        );
        sqlx::query_as::<_, EnrolmentEvent>(&query)
            .bind(limit)
            .bind(retry_after_secs as f64)
            .fetch_all(pool)
            .await
    }

    pub async fn delete_many(pool: &PgPool, ids: &[DbId]) -> Result<u64, sqlx::Error> {
        if ids.is_empty() {
            return Ok(0);
        }
        let result = sqlx::query("DELETE FROM enrolment_events WHERE id = ANY($1)")
            .bind(ids)
            .execute(pool)
            .await?;
        Ok(result.rows_affected())
    }

    pub async fn increment_attempts(pool: &PgPool, ids: &[DbId]) -> Result<u64, sqlx::Error> {
        if ids.is_empty() {
            return Ok(0);
        }
        let result = sqlx::query(
            "UPDATE enrolment_events \
             SET attempts = attempts + 1, last_attempt_at = NOW() \
             WHERE id = ANY($1)",
        )
        .bind(ids)
        .execute(pool)
        .await?;
        Ok(result.rows_affected())
    }
}
