//! Durable per-user memory: profile, approved plans, feedback history and
//! food diary.
//!
//! The core only depends on [`MemoryStore`]. A save must be atomic with
//! respect to a concurrent [`MemoryStore::load_snapshot`] for the same user,
//! and saves for one user are serialized.

pub mod in_memory;
pub mod postgres;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::generator::vision::NutritionEstimate;
use crate::model::{FeedbackRecord, MealPlan, SustainabilityReport, UserProfile};

pub use in_memory::InMemoryStore;
pub use postgres::PgMemoryStore;

#[derive(Debug, Clone, thiserror::Error)]
pub enum StoreError {
    #[error("memory store unavailable: {0}")]
    Unavailable(String),

    #[error("no profile for user {0:?}")]
    UnknownUser(String),

    #[error("stored data is corrupt: {0}")]
    Corrupt(String),
}

/// An approved plan as read back from memory.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredPlan {
    pub plan: MealPlan,
    pub report: SustainabilityReport,
    pub approved_at: DateTime<Utc>,
}

/// One analyzed diary photo.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DiaryEntry {
    pub estimate: NutritionEstimate,
    pub co2_kg: Option<f64>,
    pub recorded_at: DateTime<Utc>,
}

/// Prior context surfaced to the stages. Read-only to the pipeline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MemorySnapshot {
    pub profile: UserProfile,
    pub latest_plan: Option<StoredPlan>,
    /// Newest first.
    pub recent_feedback: Vec<FeedbackRecord>,
    /// Newest first.
    pub recent_diary: Vec<DiaryEntry>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SaveOutcome {
    Saved,
    /// The plan id was already stored; nothing was written.
    AlreadySaved,
}

#[async_trait]
pub trait MemoryStore: Send + Sync {
    /// Profile plus recent history, as of one consistent point in time.
    async fn load_snapshot(&self, user_id: &str) -> Result<MemorySnapshot, StoreError>;

    /// Persist an approved plan, its report and the feedback chain behind
    /// it in one atomic write. Saving a plan id twice is a no-op.
    async fn save_approved_plan(
        &self,
        user_id: &str,
        plan: &MealPlan,
        report: &SustainabilityReport,
        feedback: &[FeedbackRecord],
    ) -> Result<SaveOutcome, StoreError>;

    /// Record one rejection as soon as it happens. Re-appending a record
    /// id is a no-op.
    async fn append_feedback(
        &self,
        user_id: &str,
        record: &FeedbackRecord,
    ) -> Result<(), StoreError>;

    async fn append_diary_entry(&self, user_id: &str, entry: &DiaryEntry)
    -> Result<(), StoreError>;
}

// Compile-time assertion: MemoryStore must be object-safe.
const _: () = {
    fn _assert_object_safe(_: &dyn MemoryStore) {}
};
