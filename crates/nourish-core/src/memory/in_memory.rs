//! Process-local [`MemoryStore`] for tests and embedders without a database.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::RwLock;
use uuid::Uuid;

use super::{DiaryEntry, MemorySnapshot, MemoryStore, SaveOutcome, StoreError, StoredPlan};
use crate::model::{FeedbackRecord, MealPlan, SustainabilityReport, UserProfile};

#[derive(Debug, Default)]
struct UserMemory {
    profile: Option<UserProfile>,
    plans: Vec<StoredPlan>,
    plan_ids: HashSet<Uuid>,
    feedback: Vec<FeedbackRecord>,
    feedback_ids: HashSet<Uuid>,
    diary: Vec<DiaryEntry>,
}

impl UserMemory {
    fn push_feedback(&mut self, record: &FeedbackRecord) {
        if self.feedback_ids.insert(record.id) {
            self.feedback.push(record.clone());
        }
    }
}

/// Each user's memory sits behind its own lock: a save holds the write
/// half for the whole update, a snapshot copies under the read half.
pub struct InMemoryStore {
    users: RwLock<HashMap<String, Arc<RwLock<UserMemory>>>>,
    feedback_limit: usize,
    diary_limit: usize,
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self {
            users: RwLock::new(HashMap::new()),
            feedback_limit: 10,
            diary_limit: 10,
        }
    }

    pub fn with_limits(mut self, feedback: usize, diary: usize) -> Self {
        self.feedback_limit = feedback;
        self.diary_limit = diary;
        self
    }

    async fn user(&self, user_id: &str) -> Arc<RwLock<UserMemory>> {
        if let Some(existing) = self.users.read().await.get(user_id) {
            return Arc::clone(existing);
        }
        let mut users = self.users.write().await;
        Arc::clone(users.entry(user_id.to_owned()).or_default())
    }

    async fn known_user(&self, user_id: &str) -> Result<Arc<RwLock<UserMemory>>, StoreError> {
        self.users
            .read()
            .await
            .get(user_id)
            .cloned()
            .ok_or_else(|| StoreError::UnknownUser(user_id.to_owned()))
    }

    /// Create or replace a profile.
    pub async fn set_profile(&self, profile: UserProfile) {
        let user = self.user(&profile.user_id).await;
        user.write().await.profile = Some(profile);
    }

    /// Every approved plan for a user, oldest first.
    pub async fn approved_plans(&self, user_id: &str) -> Vec<StoredPlan> {
        match self.known_user(user_id).await {
            Ok(user) => user.read().await.plans.clone(),
            Err(_) => Vec::new(),
        }
    }

    /// Every feedback record for a user, oldest first.
    pub async fn feedback(&self, user_id: &str) -> Vec<FeedbackRecord> {
        match self.known_user(user_id).await {
            Ok(user) => user.read().await.feedback.clone(),
            Err(_) => Vec::new(),
        }
    }
}

#[async_trait]
impl MemoryStore for InMemoryStore {
    async fn load_snapshot(&self, user_id: &str) -> Result<MemorySnapshot, StoreError> {
        let user = self.known_user(user_id).await?;
        let memory = user.read().await;
        let profile = memory
            .profile
            .clone()
            .ok_or_else(|| StoreError::UnknownUser(user_id.to_owned()))?;
        Ok(MemorySnapshot {
            profile,
            latest_plan: memory.plans.last().cloned(),
            recent_feedback: memory
                .feedback
                .iter()
                .rev()
                .take(self.feedback_limit)
                .cloned()
                .collect(),
            recent_diary: memory
                .diary
                .iter()
                .rev()
                .take(self.diary_limit)
                .cloned()
                .collect(),
        })
    }

    async fn save_approved_plan(
        &self,
        user_id: &str,
        plan: &MealPlan,
        report: &SustainabilityReport,
        feedback: &[FeedbackRecord],
    ) -> Result<SaveOutcome, StoreError> {
        let user = self.known_user(user_id).await?;
        let mut memory = user.write().await;
        if memory.profile.is_none() {
            return Err(StoreError::UnknownUser(user_id.to_owned()));
        }
        if !memory.plan_ids.insert(plan.id) {
            return Ok(SaveOutcome::AlreadySaved);
        }
        memory.plans.push(StoredPlan {
            plan: plan.clone(),
            report: report.clone(),
            approved_at: Utc::now(),
        });
        for record in feedback {
            memory.push_feedback(record);
        }
        Ok(SaveOutcome::Saved)
    }

    async fn append_feedback(
        &self,
        user_id: &str,
        record: &FeedbackRecord,
    ) -> Result<(), StoreError> {
        let user = self.known_user(user_id).await?;
        user.write().await.push_feedback(record);
        Ok(())
    }

    async fn append_diary_entry(
        &self,
        user_id: &str,
        entry: &DiaryEntry,
    ) -> Result<(), StoreError> {
        let user = self.known_user(user_id).await?;
        user.write().await.diary.push(entry.clone());
        Ok(())
    }
}
