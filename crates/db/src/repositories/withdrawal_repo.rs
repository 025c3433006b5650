//! Repository for withdrawal tombstones.

use gradepush_core::activity::ExtensionFamily;
use sqlx::PgPool;

pub struct WithdrawalRepo;

impl WithdrawalRepo {
    /// Record an explicit deletion. Returns `false` if already recorded.
    pub async fn record(
        pool: &PgPool,
        family: ExtensionFamily,
        source_record_id: &str,
        student_code: &str,
    ) -> Result<bool, sqlx::Error> {
        let result = sqlx::query(
            "INSERT INTO extension_withdrawals (extension_type, source_record_id, student_code) \
             VALUES ($1, $2, $3) \
             ON CONFLICT (extension_type, source_record_id) DO NOTHING",
        )
        .bind(family.as_str())
        .bind(source_record_id)
        .bind(student_code)
        .execute(pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    pub async fn exists(
        pool: &PgPool,
        family: ExtensionFamily,
        source_record_id: &str,
    ) -> Result<bool, sqlx::Error> {
        sqlx::query_scalar::<_, bool>(
            "SELECT EXISTS ( \
                 SELECT 1 FROM extension_withdrawals \
                 WHERE extension_type = $1 AND source_record_id = $2 \
             )",
        )
        .bind(family.as_str())
        .bind(source_record_id)
        .fetch_one(pool)
        .await
    }
}
