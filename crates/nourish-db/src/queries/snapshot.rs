//! Consistent multi-table read of a user's durable context.

use anyhow::{Context, Result};
use sqlx::PgPool;

use crate::models::{ApprovedPlanRow, DiaryEntryRow, FeedbackRow, UserProfile};

/// Raw rows behind a memory snapshot.
#[derive(Debug, Clone)]
pub struct SnapshotRows {
    pub profile: UserProfile,
    pub latest_plan: Option<ApprovedPlanRow>,
    pub recent_feedback: Vec<FeedbackRow>,
    pub recent_diary: Vec<DiaryEntryRow>,
}

/// Load profile, latest approved plan, recent feedback and recent diary
/// entries inside one repeatable-read transaction, so the result reflects a
/// single committed state. Returns `None` for an unknown user.
pub async fn load_snapshot(
    pool: &PgPool,
    user_id: &str,
    feedback_limit: i64,
    diary_limit: i64,
) -> Result<Option<SnapshotRows>> {
    let mut tx = pool.begin().await.context("failed to begin transaction")?;

    sqlx::query("SET TRANSACTION ISOLATION LEVEL REPEATABLE READ, READ ONLY")
        .execute(&mut *tx)
        .await
        .context("failed to set snapshot isolation")?;

    let Some(profile) =
        sqlx::query_as::<_, UserProfile>("SELECT * FROM user_profiles WHERE user_id = $1")
            .bind(user_id)
            .fetch_optional(&mut *tx)
            .await
            .context("failed to fetch profile")?
    else {
        return Ok(None);
    };

    let latest_plan = sqlx::query_as::<_, ApprovedPlanRow>(
        "SELECT * FROM approved_plans \
         WHERE user_id = $1 \
         ORDER BY approved_at DESC \
         LIMIT 1",
    )
    .bind(user_id)
    .fetch_optional(&mut *tx)
    .await
    .context("failed to fetch latest approved plan")?;

    let recent_feedback = sqlx::query_as::<_, FeedbackRow>(
        "SELECT * FROM feedback_records \
         WHERE user_id = $1 \
         ORDER BY created_at DESC \
         LIMIT $2",
    )
    .bind(user_id)
    .bind(feedback_limit)
    .fetch_all(&mut *tx)
    .await
    .context("failed to fetch recent feedback")?;

    let recent_diary = sqlx::query_as::<_, DiaryEntryRow>(
        "SELECT * FROM diary_entries \
         WHERE user_id = $1 \
         ORDER BY recorded_at DESC, id DESC \
         LIMIT $2",
    )
    .bind(user_id)
    .bind(diary_limit)
    .fetch_all(&mut *tx)
    .await
    .context("failed to fetch recent diary entries")?;

    tx.commit().await.context("failed to commit transaction")?;

    Ok(Some(SnapshotRows {
        profile,
        latest_plan,
        recent_feedback,
        recent_diary,
    }))
}
