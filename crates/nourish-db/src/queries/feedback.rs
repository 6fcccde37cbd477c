//! Database query functions for the `feedback_records` table.
//!
//! Records are append-only; there is no update path.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use sqlx::{PgPool, Postgres, Transaction};
use uuid::Uuid;

use crate::models::FeedbackRow;

/// Parameters for one feedback record.
#[derive(Debug, Clone)]
pub struct NewFeedbackRecord<'a> {
    pub id: Uuid,
    pub user_id: &'a str,
    pub session_id: Uuid,
    pub plan_id: Uuid,
    pub plan_version: i32,
    pub plan_fingerprint: &'a str,
    pub feedback: &'a str,
    pub delta: &'a serde_json::Value,
    pub created_at: DateTime<Utc>,
}

/// Insert a feedback record inside an open transaction. A record whose id
/// is already stored is left untouched.
pub(crate) async fn insert_feedback_tx(
    tx: &mut Transaction<'_, Postgres>,
    record: &NewFeedbackRecord<'_>,
) -> Result<()> {
    sqlx::query(
        "INSERT INTO feedback_records \
         (id, user_id, session_id, plan_id, plan_version, plan_fingerprint, feedback, delta, created_at) \
         VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9) \
         ON CONFLICT (id) DO NOTHING",
    )
    .bind(record.id)
    .bind(record.user_id)
    .bind(record.session_id)
    .bind(record.plan_id)
    .bind(record.plan_version)
    .bind(record.plan_fingerprint)
    .bind(record.feedback)
    .bind(record.delta)
    .bind(record.created_at)
    .execute(&mut **tx)
    .await
    .with_context(|| format!("failed to insert feedback record {}", record.id))?;

    Ok(())
}

/// Append one record on its own, under the per-user lock plan saves take.
pub async fn append_feedback(pool: &PgPool, record: &NewFeedbackRecord<'_>) -> Result<()> {
    let mut tx = pool.begin().await.context("failed to begin transaction")?;

    sqlx::query("SELECT pg_advisory_xact_lock(hashtext($1))")
        .bind(record.user_id)
        .execute(&mut *tx)
        .await
        .context("failed to take user lock")?;

    insert_feedback_tx(&mut tx, record).await?;

    tx.commit().await.context("failed to commit transaction")?;
    Ok(())
}

/// Most recent feedback records for a user, newest first.
pub async fn list_recent_feedback(
    pool: &PgPool,
    user_id: &str,
    limit: i64,
) -> Result<Vec<FeedbackRow>> {
    let rows = sqlx::query_as::<_, FeedbackRow>(
        "SELECT * FROM feedback_records \
         WHERE user_id = $1 \
         ORDER BY created_at DESC \
         LIMIT $2",
    )
    .bind(user_id)
    .bind(limit)
    .fetch_all(pool)
    .await
    .context("failed to list feedback records")?;

    Ok(rows)
}

/// Every feedback record of one session, oldest first.
pub async fn list_feedback_for_session(
    pool: &PgPool,
    session_id: Uuid,
) -> Result<Vec<FeedbackRow>> {
    let rows = sqlx::query_as::<_, FeedbackRow>(
        "SELECT * FROM feedback_records \
         WHERE session_id = $1 \
         ORDER BY created_at, id",
    )
    .bind(session_id)
    .fetch_all(pool)
    .await
    .context("failed to list session feedback")?;

    Ok(rows)
}
