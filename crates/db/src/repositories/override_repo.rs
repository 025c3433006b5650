//! Repository for the `extension_overrides` ledger.
//!
//! Rows are never deleted: reversing an extension sets `restored_at`. The
//! partial unique indexes allow at most one active row per
//! `(mapping, subject, extension_type)`, and inserts use them as conflict
//! targets so concurrent workers converge on a single row.

use gradepush_core::activity::{ExtensionFamily, OverrideSubject};
use gradepush_core::types::DbId;
use sqlx::PgPool;

use crate::models::override_record::{CreateExtensionOverride, ExtensionOverride};

/// Column list for `extension_overrides` queries.
const COLUMNS: &str = "\
    id, mapping_id, activity_type, activity_instance_id, user_id, group_id, \
    extension_type, override_id, backup, source_record_id, \
    created_by, restored_by, restored_at, created_at, updated_at";

pub struct OverrideRepo;

impl OverrideRepo {
    /// The active row for a subject on a mapping, if any.
    pub async fn find_active(
        pool: &PgPool,
        mapping_id: DbId,
        subject: OverrideSubject,
        family: ExtensionFamily,
    ) -> Result<Option<ExtensionOverride>, sqlx::Error> {
        let query = format!(
            "SELECT {COLUMNS} FROM extension_overrides \
             WHERE mapping_id = $1 AND extension_type = $2 AND restored_at IS NULL \
               AND user_id IS NOT DISTINCT FROM $3 AND group_id IS NOT DISTINCT FROM $4"
        );
        sqlx::query_as::<_, ExtensionOverride>(&query)
            .bind(mapping_id)
            .bind(family.as_str())
            .bind(subject.user_id())
            .bind(subject.group_id())
            .fetch_optional(pool)
            .await
    }

    /// All active rows on a mapping, oldest first.
    pub async fn list_active_for_mapping(
        pool: &PgPool,
        mapping_id: DbId,
    ) -> Result<Vec<ExtensionOverride>, sqlx::Error> {
        let query = format!(
            "SELECT {COLUMNS} FROM extension_overrides \
             WHERE mapping_id = $1 AND restored_at IS NULL \
             ORDER BY id"
        );
        sqlx::query_as::<_, ExtensionOverride>(&query)
            .bind(mapping_id)
            .fetch_all(pool)
            .await
    }

    /// Insert an active row. If one already exists for the same subject the
    /// source record is refreshed, the override id is replaced when one is
    /// given, and the original backup is kept.
    pub async fn upsert_active(
        pool: &PgPool,
        input: &CreateExtensionOverride,
    ) -> Result<ExtensionOverride, sqlx::Error> {
        let conflict_target = match input.subject {
            OverrideSubject::User(_) => {
                "(mapping_id, user_id, extension_type) WHERE restored_at IS NULL AND user_id IS NOT NULL"
            }
            OverrideSubject::Group(_) => {
                "(mapping_id, group_id, extension_type) WHERE restored_at IS NULL AND group_id IS NOT NULL"
            }
        };
        let query = format!(
            "INSERT INTO extension_overrides \
                 (mapping_id, activity_type, activity_instance_id, user_id, group_id, \
                  extension_type, override_id, backup, source_record_id, created_by) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10) \
             ON CONFLICT {conflict_target} DO UPDATE \
             SET override_id = COALESCE(EXCLUDED.override_id, extension_overrides.override_id), \
                 source_record_id = EXCLUDED.source_record_id \
             RETURNING {COLUMNS}"
        );
        sqlx::query_as::<_, ExtensionOverride>(&query)
            .bind(input.mapping_id)
            .bind(input.activity_type.as_str())
            .bind(input.activity_instance_id)
            .bind(input.subject.user_id())
            .bind(input.subject.group_id())
            .bind(input.extension_type.as_str())
            .bind(input.override_id)
            .bind(&input.backup)
            .bind(&input.source_record_id)
            .bind(&input.created_by)
            .fetch_one(pool)
            .await
    }

    /// Update the override id and source record of an active row in place.
    pub async fn update_active(
        pool: &PgPool,
        id: DbId,
        override_id: Option<DbId>,
        source_record_id: Option<&str>,
    ) -> Result<bool, sqlx::Error> {
        let result = sqlx::query(
            "UPDATE extension_overrides \
             SET override_id = $2, source_record_id = $3 \
             WHERE id = $1 AND restored_at IS NULL",
        )
        .bind(id)
        .bind(override_id)
        .bind(source_record_id)
        .execute(pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Mark a row restored. Returns `false` if it was already restored.
    pub async fn mark_restored(
        pool: &PgPool,
        id: DbId,
        restored_by: &str,
    ) -> Result<bool, sqlx::Error> {
        let result = sqlx::query(
            "UPDATE extension_overrides \
             SET restored_at = NOW(), restored_by = $2 \
             WHERE id = $1 AND restored_at IS NULL",
        )
        .bind(id)
        .bind(restored_by)
        .execute(pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }
}
