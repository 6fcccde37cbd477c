//! Database query functions for the `diary_entries` table.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use sqlx::PgPool;

use crate::models::DiaryEntryRow;

/// Append a diary entry under the same per-user lock as plan saves.
pub async fn append_diary_entry(
    pool: &PgPool,
    user_id: &str,
    estimate: &serde_json::Value,
    co2_kg: Option<f64>,
    recorded_at: DateTime<Utc>,
) -> Result<DiaryEntryRow> {
    let mut tx = pool.begin().await.context("failed to begin transaction")?;

    sqlx::query("SELECT pg_advisory_xact_lock(hashtext($1))")
        .bind(user_id)
        .execute(&mut *tx)
        .await
        .context("failed to take user lock")?;

    let row = sqlx::query_as::<_, DiaryEntryRow>(
        "INSERT INTO diary_entries (user_id, estimate, co2_kg, recorded_at) \
         VALUES ($1, $2, $3, $4) \
         RETURNING *",
    )
    .bind(user_id)
    .bind(estimate)
    .bind(co2_kg)
    .bind(recorded_at)
    .fetch_one(&mut *tx)
    .await
    .context("failed to insert diary entry")?;

    tx.commit().await.context("failed to commit transaction")?;
    Ok(row)
}

/// Most recent diary entries for a user, newest first.
pub async fn list_recent_diary(
    pool: &PgPool,
    user_id: &str,
    limit: i64,
) -> Result<Vec<DiaryEntryRow>> {
    let rows = sqlx::query_as::<_, DiaryEntryRow>(
        "SELECT * FROM diary_entries \
         WHERE user_id = $1 \
         ORDER BY recorded_at DESC, id DESC \
         LIMIT $2",
    )
    .bind(user_id)
    .bind(limit)
    .fetch_all(pool)
    .await
    .context("failed to list diary entries")?;

    Ok(rows)
}
