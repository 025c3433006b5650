//! Repository for `extension_tiers`.

use sqlx::PgPool;

use crate::models::extension_tier::{ExtensionTier, UpsertExtensionTier};

/// Column list for `extension_tiers` queries.
const COLUMNS: &str = "\
    id, assessment_type, tier, extension_kind, extension_value, break_value, enabled, \
    created_at, updated_at";

pub struct ExtensionTierRepo;

impl ExtensionTierRepo {
    pub async fn list(pool: &PgPool) -> Result<Vec<ExtensionTier>, sqlx::Error> {
        let query = format!("SELECT {COLUMNS} FROM extension_tiers ORDER BY tier, assessment_type");
        sqlx::query_as::<_, ExtensionTier>(&query).fetch_all(pool).await
    }

    pub async fn upsert(
        pool: &PgPool,
        input: &UpsertExtensionTier,
    ) -> Result<ExtensionTier, sqlx::Error> {
        let query = format!(
            "INSERT INTO extension_tiers \
                 (assessment_type, tier, extension_kind, extension_value, break_value, enabled) \
             VALUES ($1, $2, $3, $4, $5, $6) \
             ON CONFLICT (assessment_type, tier) DO UPDATE \
             SET extension_kind = EXCLUDED.extension_kind, \
                 extension_value = EXCLUDED.extension_value, \
                 break_value = EXCLUDED.break_value, \
                 enabled = EXCLUDED.enabled \
             RETURNING {COLUMNS}"
        );
        sqlx::query_as::<_, ExtensionTier>(&query)
            .bind(&input.assessment_type)
            .bind(&input.tier)
            .bind(&input.extension_kind)
            .bind(input.extension_value)
            .bind(input.break_value)
            .bind(input.enabled.unwrap_or(true))
            .fetch_one(pool)
            .await
    }
}
