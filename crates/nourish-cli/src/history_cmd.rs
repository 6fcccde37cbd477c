//! `nourish history` command: approved plans, recent feedback and diary.

use anyhow::Result;
use sqlx::PgPool;

use nourish_core::memory::{MemoryStore, PgMemoryStore, StoredPlan};
use nourish_core::model::PlanBundle;
use nourish_db::queries::plans as plan_db;

use crate::render;

/// Run the history command.
pub async fn run_history(pool: &PgPool, user_id: &str, limit: usize) -> Result<()> {
    let store = PgMemoryStore::new(pool.clone()).with_limits(limit, limit);
    let snapshot = store.load_snapshot(user_id).await?;

    let rows =
        plan_db::list_approved_plans(pool, user_id, i64::try_from(limit).unwrap_or(i64::MAX))
            .await?;
    if rows.is_empty() {
        println!("No approved plans for {user_id} yet.");
    } else {
        println!("Approved plans ({}):", rows.len());
        for row in &rows {
            println!(
                "  {}  v{}  {:>8.2}{}  {}",
                row.approved_at.format("%Y-%m-%d %H:%M"),
                row.version,
                row.total_cost,
                if row.over_budget { " (over budget)" } else { "" },
                row.plan_id
            );
        }
    }

    if let Some(StoredPlan { plan, report, .. }) = snapshot.latest_plan {
        println!("\nLatest plan:\n");
        println!("{}", render::plan(&PlanBundle { plan, report }));
    }

    if !snapshot.recent_feedback.is_empty() {
        println!("Recent feedback:");
        for record in &snapshot.recent_feedback {
            println!(
                "  {}  on v{}: {}",
                record.created_at.format("%Y-%m-%d %H:%M"),
                record.plan_version,
                record.feedback
            );
        }
    }

    if !snapshot.recent_diary.is_empty() {
        println!("\nFood diary:");
        for entry in &snapshot.recent_diary {
            println!(
                "  {}  {} ({:.0} kcal)",
                entry.recorded_at.format("%Y-%m-%d %H:%M"),
                entry.estimate.food,
                entry.estimate.calories
            );
        }
    }
    Ok(())
}
