//! Database query functions for the `approved_plans` table.
//!
//! Writes go through [`save_approved_plan`], which stores the plan and its
//! feedback chain in one transaction serialized per user.

use anyhow::{Context, Result};
use sqlx::PgPool;
use tracing::debug;
use uuid::Uuid;

use crate::models::ApprovedPlanRow;
use crate::queries::feedback::{NewFeedbackRecord, insert_feedback_tx};

/// Parameters for persisting an approved plan.
#[derive(Debug, Clone)]
pub struct NewApprovedPlan<'a> {
    pub plan_id: Uuid,
    pub user_id: &'a str,
    pub session_id: Uuid,
    pub version: i32,
    pub fingerprint: &'a str,
    pub plan: &'a serde_json::Value,
    pub sustainability: &'a serde_json::Value,
    pub total_cost: f64,
    pub over_budget: bool,
}

/// Persist an approved plan together with the feedback records that led to
/// it.
///
/// The transaction takes a per-user advisory lock, so concurrent saves for
/// the same user run one after another. Returns `false` when the plan id was
/// already stored, in which case nothing is written.
pub async fn save_approved_plan(
    pool: &PgPool,
    plan: &NewApprovedPlan<'_>,
    feedback: &[NewFeedbackRecord<'_>],
) -> Result<bool> {
    let mut tx = pool.begin().await.context("failed to begin transaction")?;

    sqlx::query("SELECT pg_advisory_xact_lock(hashtext($1))")
        .bind(plan.user_id)
        .execute(&mut *tx)
        .await
        .context("failed to take user lock")?;

    let result = sqlx::query(
        "INSERT INTO approved_plans \
         (plan_id, user_id, session_id, version, fingerprint, plan, sustainability, \
          total_cost, over_budget) \
         VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9) \
         ON CONFLICT (plan_id) DO NOTHING",
    )
    .bind(plan.plan_id)
    .bind(plan.user_id)
    .bind(plan.session_id)
    .bind(plan.version)
    .bind(plan.fingerprint)
    .bind(plan.plan)
    .bind(plan.sustainability)
    .bind(plan.total_cost)
    .bind(plan.over_budget)
    .execute(&mut *tx)
    .await
    .context("failed to insert approved plan")?;

    if result.rows_affected() == 0 {
        debug!(plan_id = %plan.plan_id, "approved plan already stored");
        // Rolls back on drop.
        return Ok(false);
    }

    for record in feedback {
        insert_feedback_tx(&mut tx, record).await?;
    }

    tx.commit().await.context("failed to commit transaction")?;
    Ok(true)
}

/// Fetch an approved plan by id.
pub async fn get_approved_plan(pool: &PgPool, plan_id: Uuid) -> Result<Option<ApprovedPlanRow>> {
    let row =
        sqlx::query_as::<_, ApprovedPlanRow>("SELECT * FROM approved_plans WHERE plan_id = $1")
            .bind(plan_id)
            .fetch_optional(pool)
            .await
            .context("failed to fetch approved plan")?;

    Ok(row)
}

/// List a user's approved plans, newest first.
pub async fn list_approved_plans(
    pool: &PgPool,
    user_id: &str,
    limit: i64,
) -> Result<Vec<ApprovedPlanRow>> {
    let rows = sqlx::query_as::<_, ApprovedPlanRow>(
        "SELECT * FROM approved_plans \
         WHERE user_id = $1 \
         ORDER BY approved_at DESC \
         LIMIT $2",
    )
    .bind(user_id)
    .bind(limit)
    .fetch_all(pool)
    .await
    .context("failed to list approved plans")?;

    Ok(rows)
}
