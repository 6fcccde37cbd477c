//! Session entry points.
//!
//! A [`SessionManager`] owns every live session. Each session has its own
//! pipeline run, feedback controller and plan history behind its own lock;
//! sessions share nothing except the [`MemoryStore`].

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

use chrono::Utc;
use serde::Serialize;
use tokio::sync::{Mutex, RwLock};
use tracing::{info, warn};
use uuid::Uuid;

use crate::answer::answer_question;
use crate::config::PlannerConfig;
use crate::error::PlannerError;
use crate::extract::ConstraintExtractor;
use crate::feedback::{Approval, FeedbackController, FeedbackState};
use crate::generator::Generator;
use crate::generator::vision::{VisionAnalyzer, VisionError};
use crate::intent::{Intent, IntentClassifier, SessionView};
use crate::memory::{DiaryEntry, MemorySnapshot, MemoryStore, StoreError};
use crate::model::{ConstraintsDelta, EffectiveConstraints, MealPlan, PlanBundle, food};
use crate::pipeline::{PipelineRun, PipelineState, PlanObserver, PlanPipeline, PlanningInput};
use crate::stages::StageKind;

const UNRECOGNIZED_REPLY: &str = "Sorry, I didn't catch that. You can ask for a meal plan, \
tell me what to change about the current one, or ask a nutrition question.";

/// What an entry point did, for the caller to render.
#[derive(Debug, Clone, Serialize)]
pub struct SessionReply {
    pub session_id: Uuid,
    /// How the utterance was read; `None` for approvals.
    pub intent: Option<Intent>,
    pub pipeline: PipelineState,
    pub feedback: FeedbackState,
    /// Set when this call produced or approved a plan.
    pub plan: Option<PlanBundle>,
    pub message: String,
}

struct Session {
    id: Uuid,
    user_id: String,
    snapshot: MemorySnapshot,
    run: PipelineRun,
    controller: FeedbackController,
    /// Every plan version, oldest first.
    plans: Vec<PlanBundle>,
}

impl Session {
    fn latest(&self) -> Option<&PlanBundle> {
        self.plans.last()
    }

    fn next_version(&self) -> u32 {
        self.latest().map_or(1, |b| b.plan.version + 1)
    }

    fn view(&self) -> SessionView {
        SessionView {
            has_plan: !self.plans.is_empty(),
            awaiting_approval: matches!(
                self.controller.state(),
                FeedbackState::AwaitingApproval | FeedbackState::Stalled
            ),
        }
    }

    fn planning_input(&self) -> PlanningInput {
        PlanningInput {
            session_id: self.id,
            user_id: self.user_id.clone(),
            version: self.next_version(),
            profile: self.snapshot.profile.clone(),
            constraints: EffectiveConstraints::resolve(
                &self.snapshot.profile,
                self.controller.constraints(),
            ),
            snapshot: self.snapshot.clone(),
        }
    }

    fn reply(
        &self,
        intent: Option<Intent>,
        plan: Option<PlanBundle>,
        message: String,
    ) -> SessionReply {
        SessionReply {
            session_id: self.id,
            intent,
            pipeline: self.run.state.clone(),
            feedback: self.controller.state(),
            plan,
            message,
        }
    }
}

fn describe(plan: &MealPlan) -> String {
    let mut text = format!(
        "Plan v{} ({} days): {} Total cost {:.2} against a {:.2} budget.",
        plan.version,
        plan.days.len(),
        plan.summary,
        plan.total_cost,
        plan.budget_ceiling
    );
    if plan.over_budget {
        text.push_str(&format!(
            " This is {:.2} over budget; approve it explicitly if that is acceptable.",
            plan.overage()
        ));
    }
    text
}

pub struct SessionManager {
    generator: Arc<dyn Generator>,
    vision: Option<Arc<dyn VisionAnalyzer>>,
    store: Arc<dyn MemoryStore>,
    config: PlannerConfig,
    pipeline: PlanPipeline,
    classifier: IntentClassifier,
    extractor: ConstraintExtractor,
    sessions: RwLock<HashMap<Uuid, Arc<Mutex<Session>>>>,
    /// Each user's current session.
    active: RwLock<HashMap<String, Uuid>>,
}

impl SessionManager {
    pub fn new(
        generator: Arc<dyn Generator>,
        store: Arc<dyn MemoryStore>,
        config: PlannerConfig,
    ) -> Self {
        let timeout = config.generator_timeout();
        Self {
            pipeline: PlanPipeline::new(Arc::clone(&generator), config.clone()),
            classifier: IntentClassifier::new(Arc::clone(&generator), timeout),
            extractor: ConstraintExtractor::new(Arc::clone(&generator), timeout),
            generator,
            vision: None,
            store,
            config,
            sessions: RwLock::new(HashMap::new()),
            active: RwLock::new(HashMap::new()),
        }
    }

    pub fn with_vision(mut self, analyzer: Arc<dyn VisionAnalyzer>) -> Self {
        self.vision = Some(analyzer);
        self
    }

    pub fn with_observer(mut self, observer: Arc<dyn PlanObserver>) -> Self {
        self.pipeline = self.pipeline.with_observer(observer);
        self
    }

    pub fn config(&self) -> &PlannerConfig {
        &self.config
    }

    // -----------------------------------------------------------------------
    // Entry points
    // -----------------------------------------------------------------------

    /// Handle one utterance in the user's current session, opening a session
    /// (and loading their memory) if there is none.
    pub async fn start_or_continue_session(
        &self,
        user_id: &str,
        utterance: &str,
    ) -> Result<SessionReply, PlannerError> {
        let handle = self.session_for_user(user_id).await?;
        let mut guard = handle.lock().await;
        let session = &mut *guard;

        let intent = self.classifier.classify(utterance, session.view()).await;
        info!(
            user_id = %user_id,
            session_id = %session.id,
            intent = ?intent,
            "handling utterance"
        );

        match intent {
            Intent::NewPlanRequest {
                days,
                meals_per_day,
            } => self.new_plan(session, intent, utterance, days, meals_per_day).await,
            Intent::RefinementFeedback => self.refine(session, intent, utterance).await,
            Intent::GeneralQuestion => {
                let answer = answer_question(
                    &self.generator,
                    self.config.generator_timeout(),
                    utterance,
                    &session.snapshot,
                )
                .await;
                Ok(session.reply(Some(intent), None, answer))
            }
            Intent::Unrecognized => {
                Ok(session.reply(Some(intent), None, UNRECOGNIZED_REPLY.to_owned()))
            }
        }
    }

    /// Approve the latest plan. Fails with [`PlannerError::OverBudget`] for
    /// a plan flagged over budget.
    pub async fn approve_plan(&self, session_id: Uuid) -> Result<SessionReply, PlannerError> {
        self.approve(session_id, false).await
    }

    /// Approve the latest plan, accepting that it is over budget.
    pub async fn approve_over_budget(
        &self,
        session_id: Uuid,
    ) -> Result<SessionReply, PlannerError> {
        self.approve(session_id, true).await
    }

    /// Reject the latest plan with free-text feedback and replan.
    pub async fn reject_plan(
        &self,
        session_id: Uuid,
        feedback: &str,
    ) -> Result<SessionReply, PlannerError> {
        let handle = self.session(session_id).await?;
        let mut guard = handle.lock().await;
        self.refine(&mut guard, Intent::RefinementFeedback, feedback)
            .await
    }

    /// Analyze a food photo and add it to the user's diary. Independent of
    /// any planning session.
    pub async fn append_diary(
        &self,
        user_id: &str,
        image: &Path,
    ) -> Result<DiaryEntry, PlannerError> {
        let vision = self.vision.as_ref().ok_or(VisionError::NotConfigured)?;
        let limit = self.config.generator_timeout();
        let estimate = match tokio::time::timeout(limit, vision.analyze(image)).await {
            Ok(result) => result?,
            Err(_) => {
                warn!(
                    user_id = %user_id,
                    timeout_ms = limit.as_millis() as u64,
                    "vision analysis timed out"
                );
                return Err(VisionError::Timeout(limit).into());
            }
        };
        let entry = DiaryEntry {
            co2_kg: Some(food::serving_co2_kg(&estimate.food)),
            estimate,
            recorded_at: Utc::now(),
        };
        self.store.append_diary_entry(user_id, &entry).await?;
        info!(user_id = %user_id, food = %entry.estimate.food, "diary entry recorded");
        Ok(entry)
    }

    pub async fn snapshot(&self, user_id: &str) -> Result<MemorySnapshot, PlannerError> {
        Ok(self.store.load_snapshot(user_id).await?)
    }

    /// Every plan version of a session, oldest first.
    pub async fn plans(&self, session_id: Uuid) -> Result<Vec<PlanBundle>, PlannerError> {
        let handle = self.session(session_id).await?;
        let guard = handle.lock().await;
        Ok(guard.plans.clone())
    }

    /// Drop a session. Its unapproved state is discarded.
    pub async fn end_session(&self, session_id: Uuid) -> bool {
        let removed = self.sessions.write().await.remove(&session_id);
        let Some(handle) = removed else {
            return false;
        };
        let user_id = handle.lock().await.user_id.clone();
        let mut active = self.active.write().await;
        if active.get(&user_id) == Some(&session_id) {
            active.remove(&user_id);
        }
        info!(session_id = %session_id, user_id = %user_id, "session ended");
        true
    }

    // -----------------------------------------------------------------------
    // Internals
    // -----------------------------------------------------------------------

    async fn session(&self, session_id: Uuid) -> Result<Arc<Mutex<Session>>, PlannerError> {
        self.sessions
            .read()
            .await
            .get(&session_id)
            .cloned()
            .ok_or(PlannerError::UnknownSession(session_id))
    }

    async fn session_for_user(&self, user_id: &str) -> Result<Arc<Mutex<Session>>, PlannerError> {
        let current = self.active.read().await.get(user_id).copied();
        if let Some(id) = current {
            if let Ok(handle) = self.session(id).await {
                return Ok(handle);
            }
        }

        let snapshot = self.store.load_snapshot(user_id).await?;
        let mut active = self.active.write().await;
        if let Some(id) = active.get(user_id).copied() {
            if let Ok(handle) = self.session(id).await {
                return Ok(handle);
            }
        }

        let id = Uuid::new_v4();
        let handle = Arc::new(Mutex::new(Session {
            id,
            user_id: user_id.to_owned(),
            snapshot,
            run: PipelineRun::default(),
            controller: FeedbackController::new(self.config.convergence_cap),
            plans: Vec::new(),
        }));
        self.sessions.write().await.insert(id, Arc::clone(&handle));
        active.insert(user_id.to_owned(), id);
        info!(user_id = %user_id, session_id = %id, "session started");
        Ok(handle)
    }

    async fn new_plan(
        &self,
        session: &mut Session,
        intent: Intent,
        utterance: &str,
        days: Option<u8>,
        meals_per_day: Option<u8>,
    ) -> Result<SessionReply, PlannerError> {
        session.snapshot = self.store.load_snapshot(&session.user_id).await?;

        let mut delta = match self.extractor.extract(utterance, &Default::default()).await {
            Ok(delta) => delta,
            Err(err) => {
                warn!(session_id = %session.id, error = %err, "planning without request details");
                ConstraintsDelta::default()
            }
        };
        delta.days = days.or(delta.days);
        delta.meals_per_day = meals_per_day.or(delta.meals_per_day);
        session
            .controller
            .start_plan(&delta, session.snapshot.profile.budget_ceiling);

        let input = session.planning_input();
        let bundle = self
            .pipeline
            .run(&mut session.run, &input, StageKind::NutritionTargets)
            .await?;
        session.controller.plan_ready();
        session.plans.push(bundle.clone());

        let message = describe(&bundle.plan);
        Ok(session.reply(Some(intent), Some(bundle), message))
    }

    async fn refine(
        &self,
        session: &mut Session,
        intent: Intent,
        feedback: &str,
    ) -> Result<SessionReply, PlannerError> {
        let Some(rejected) = session.latest().map(|b| b.plan.clone()) else {
            return Err(PlannerError::InvalidState(
                "there is no plan to give feedback on yet".to_owned(),
            ));
        };
        let base = session.planning_input();
        let recorded = session.controller.records().len();

        let result = session
            .controller
            .reject(
                feedback,
                &rejected,
                &self.extractor,
                &self.pipeline,
                &mut session.run,
                base,
            )
            .await;

        if session.controller.records().len() > recorded {
            if let Some(record) = session.controller.records().last() {
                if let Err(err) = self.store.append_feedback(&session.user_id, record).await {
                    warn!(
                        session_id = %session.id,
                        error = %err,
                        "feedback not persisted yet; it will be saved with the approved plan"
                    );
                }
            }
        }

        let refined = result?;
        session.plans.push(refined.bundle.clone());
        let message = format!(
            "Updated from {}. {}",
            refined.entry,
            describe(&refined.bundle.plan)
        );
        Ok(session.reply(Some(intent), Some(refined.bundle), message))
    }

    async fn approve(
        &self,
        session_id: Uuid,
        accept_over_budget: bool,
    ) -> Result<SessionReply, PlannerError> {
        let handle = self.session(session_id).await?;
        let mut guard = handle.lock().await;
        let session = &mut *guard;
        let latest = session.latest().cloned();

        let approval = session
            .controller
            .check_approval(latest.as_ref().map(|b| &b.plan), accept_over_budget)?;
        let (Approval::Proceed, Some(bundle)) = (approval, latest) else {
            return Ok(session.reply(
                None,
                session.latest().cloned(),
                "This plan is already approved.".to_owned(),
            ));
        };

        self.save_with_retry(session, &bundle).await?;
        session.controller.mark_approved();
        info!(
            session_id = %session.id,
            plan_id = %bundle.plan.id,
            version = bundle.plan.version,
            "plan approved"
        );

        match self.store.load_snapshot(&session.user_id).await {
            Ok(snapshot) => session.snapshot = snapshot,
            Err(err) => warn!(session_id = %session.id, error = %err, "could not refresh memory"),
        }

        let message = format!("Plan v{} approved and saved.", bundle.plan.version);
        Ok(session.reply(None, Some(bundle), message))
    }

    /// Save the plan and the session's feedback chain, retrying with
    /// doubling backoff. The plan is not approved unless this succeeds.
    async fn save_with_retry(
        &self,
        session: &Session,
        bundle: &PlanBundle,
    ) -> Result<(), PlannerError> {
        let attempts = self.config.store_retries.max(1);
        let mut backoff = self.config.store_backoff();
        let mut last: Option<StoreError> = None;

        for attempt in 1..=attempts {
            match self
                .store
                .save_approved_plan(
                    &session.user_id,
                    &bundle.plan,
                    &bundle.report,
                    session.controller.records(),
                )
                .await
            {
                Ok(outcome) => {
                    info!(session_id = %session.id, outcome = ?outcome, attempt, "approved plan stored");
                    return Ok(());
                }
                Err(StoreError::UnknownUser(user)) => return Err(PlannerError::UnknownUser(user)),
                Err(err) => {
                    warn!(
                        session_id = %session.id,
                        attempt,
                        error = %err,
                        "saving approved plan failed"
                    );
                    last = Some(err);
                    if attempt < attempts {
                        tokio::time::sleep(backoff).await;
                        backoff *= 2;
                    }
                }
            }
        }
        Err(PlannerError::StoreUnavailable(last.unwrap_or_else(|| {
            StoreError::Unavailable("no save attempted".to_owned())
        })))
    }
}
