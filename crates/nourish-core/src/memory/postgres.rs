//! [`MemoryStore`] over the `nourish-db` query layer.

use async_trait::async_trait;
use sqlx::PgPool;
use tracing::debug;

use nourish_db::models::{ApprovedPlanRow, DiaryEntryRow, FeedbackRow};
use nourish_db::queries::{diary, feedback, plans, snapshot};

use super::{DiaryEntry, MemorySnapshot, MemoryStore, SaveOutcome, StoreError, StoredPlan};
use crate::model::{FeedbackRecord, MealPlan, SustainabilityReport};

fn unavailable(err: anyhow::Error) -> StoreError {
    StoreError::Unavailable(format!("{err:#}"))
}

/// Writes keyed by user: a missing profile row surfaces as a foreign key
/// violation, which no retry can fix.
fn write_failed(user_id: &str, err: anyhow::Error) -> StoreError {
    let missing_user = err
        .chain()
        .filter_map(|cause| cause.downcast_ref::<sqlx::Error>())
        .any(|e| matches!(e, sqlx::Error::Database(db) if db.is_foreign_key_violation()));
    if missing_user {
        StoreError::UnknownUser(user_id.to_owned())
    } else {
        unavailable(err)
    }
}

fn corrupt(what: &str, err: serde_json::Error) -> StoreError {
    StoreError::Corrupt(format!("{what}: {err}"))
}

fn plan_from_row(row: ApprovedPlanRow) -> Result<StoredPlan, StoreError> {
    Ok(StoredPlan {
        plan: serde_json::from_value(row.plan)
            .map_err(|e| corrupt(&format!("plan {}", row.plan_id), e))?,
        report: serde_json::from_value(row.sustainability)
            .map_err(|e| corrupt(&format!("report of plan {}", row.plan_id), e))?,
        approved_at: row.approved_at,
    })
}

fn feedback_from_row(row: FeedbackRow) -> Result<FeedbackRecord, StoreError> {
    Ok(FeedbackRecord {
        id: row.id,
        session_id: row.session_id,
        plan_id: row.plan_id,
        plan_version: u32::try_from(row.plan_version).unwrap_or_default(),
        plan_fingerprint: row.plan_fingerprint,
        feedback: row.feedback,
        delta: serde_json::from_value(row.delta)
            .map_err(|e| corrupt(&format!("feedback {}", row.id), e))?,
        created_at: row.created_at,
    })
}

fn diary_from_row(row: DiaryEntryRow) -> Result<DiaryEntry, StoreError> {
    Ok(DiaryEntry {
        estimate: serde_json::from_value(row.estimate)
            .map_err(|e| corrupt(&format!("diary entry {}", row.id), e))?,
        co2_kg: row.co2_kg,
        recorded_at: row.recorded_at,
    })
}

fn version(v: u32) -> i32 {
    i32::try_from(v).unwrap_or(i32::MAX)
}

pub struct PgMemoryStore {
    pool: PgPool,
    feedback_limit: i64,
    diary_limit: i64,
}

impl PgMemoryStore {
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool,
            feedback_limit: 10,
            diary_limit: 10,
        }
    }

    pub fn with_limits(mut self, feedback: usize, diary: usize) -> Self {
        self.feedback_limit = i64::try_from(feedback).unwrap_or(i64::MAX);
        self.diary_limit = i64::try_from(diary).unwrap_or(i64::MAX);
        self
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

#[async_trait]
impl MemoryStore for PgMemoryStore {
    async fn load_snapshot(&self, user_id: &str) -> Result<MemorySnapshot, StoreError> {
        let rows = snapshot::load_snapshot(&self.pool, user_id, self.feedback_limit, self.diary_limit)
            .await
            .map_err(unavailable)?
            .ok_or_else(|| StoreError::UnknownUser(user_id.to_owned()))?;

        Ok(MemorySnapshot {
            profile: rows.profile,
            latest_plan: rows.latest_plan.map(plan_from_row).transpose()?,
            recent_feedback: rows
                .recent_feedback
                .into_iter()
                .map(feedback_from_row)
                .collect::<Result<_, _>>()?,
            recent_diary: rows
                .recent_diary
                .into_iter()
                .map(diary_from_row)
                .collect::<Result<_, _>>()?,
        })
    }

    async fn save_approved_plan(
        &self,
        user_id: &str,
        plan: &MealPlan,
        report: &SustainabilityReport,
        records: &[FeedbackRecord],
    ) -> Result<SaveOutcome, StoreError> {
        let plan_json = serde_json::to_value(plan).map_err(|e| corrupt("plan", e))?;
        let report_json = serde_json::to_value(report).map_err(|e| corrupt("report", e))?;
        let fingerprint = plan.fingerprint();
        let deltas = records
            .iter()
            .map(|r| serde_json::to_value(&r.delta))
            .collect::<Result<Vec<_>, _>>()
            .map_err(|e| corrupt("feedback delta", e))?;

        let new_records: Vec<feedback::NewFeedbackRecord<'_>> = records
            .iter()
            .zip(&deltas)
            .map(|(r, delta)| feedback::NewFeedbackRecord {
                id: r.id,
                user_id,
                session_id: r.session_id,
                plan_id: r.plan_id,
                plan_version: version(r.plan_version),
                plan_fingerprint: &r.plan_fingerprint,
                feedback: &r.feedback,
                delta,
                created_at: r.created_at,
            })
            .collect();

        let saved = plans::save_approved_plan(
            &self.pool,
            &plans::NewApprovedPlan {
                plan_id: plan.id,
                user_id,
                session_id: plan.session_id,
                version: version(plan.version),
                fingerprint: &fingerprint,
                plan: &plan_json,
                sustainability: &report_json,
                total_cost: plan.total_cost,
                over_budget: plan.over_budget,
            },
            &new_records,
        )
        .await
        .map_err(|e| write_failed(user_id, e))?;

        debug!(user_id = %user_id, plan_id = %plan.id, saved, "approved plan write");
        Ok(if saved {
            SaveOutcome::Saved
        } else {
            SaveOutcome::AlreadySaved
        })
    }

    async fn append_feedback(
        &self,
        user_id: &str,
        record: &FeedbackRecord,
    ) -> Result<(), StoreError> {
        let delta = serde_json::to_value(&record.delta).map_err(|e| corrupt("feedback delta", e))?;
        feedback::append_feedback(
            &self.pool,
            &feedback::NewFeedbackRecord {
                id: record.id,
                user_id,
                session_id: record.session_id,
                plan_id: record.plan_id,
                plan_version: version(record.plan_version),
                plan_fingerprint: &record.plan_fingerprint,
                feedback: &record.feedback,
                delta: &delta,
                created_at: record.created_at,
            },
        )
        .await
        .map_err(|e| write_failed(user_id, e))
    }

    async fn append_diary_entry(
        &self,
        user_id: &str,
        entry: &DiaryEntry,
    ) -> Result<(), StoreError> {
        let estimate =
            serde_json::to_value(&entry.estimate).map_err(|e| corrupt("diary estimate", e))?;
        diary::append_diary_entry(&self.pool, user_id, &estimate, entry.co2_kg, entry.recorded_at)
            .await
            .map_err(|e| write_failed(user_id, e))?;
        Ok(())
    }
}
