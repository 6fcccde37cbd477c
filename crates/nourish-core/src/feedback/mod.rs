//! The approve/reject/refine loop.
//!
//! A [`FeedbackController`] belongs to one session. Each rejection is
//! extracted into a delta, merged into the session constraints, recorded
//! against the rejected plan, and replanned from the earliest stage whose
//! inputs changed. A fixed number of cycles is allowed before the loop
//! halts.

use std::collections::{BTreeMap, BTreeSet};

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};
use uuid::Uuid;

use crate::error::PlannerError;
use crate::extract::ConstraintExtractor;
use crate::model::{
    Constraints, ConstraintsDelta, EffectiveConstraints, FeedbackRecord, MealPlan, PlanBundle,
};
use crate::pipeline::{PipelineRun, PlanPipeline, PlanningInput};
use crate::stages::StageKind;

// ---------------------------------------------------------------------------
// Re-entry policy
// ---------------------------------------------------------------------------

/// What a piece of feedback is about.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum FeedbackCategory {
    Budget,
    Allergy,
    Dietary,
    Preference,
    Schedule,
    Profile,
}

impl FeedbackCategory {
    fn default_stage(self) -> StageKind {
        match self {
            Self::Budget => StageKind::BudgetOptimization,
            Self::Profile => StageKind::NutritionTargets,
            Self::Allergy | Self::Dietary | Self::Preference | Self::Schedule => {
                StageKind::MealDesign
            }
        }
    }
}

/// Categories a delta touches. An empty delta counts as a preference.
pub fn categories(delta: &ConstraintsDelta) -> BTreeSet<FeedbackCategory> {
    let mut found = BTreeSet::new();
    if delta.budget.is_some() {
        found.insert(FeedbackCategory::Budget);
    }
    if !delta.allergies.is_empty() {
        found.insert(FeedbackCategory::Allergy);
    }
    if !delta.avoid.is_empty() || !delta.remove_dislikes.is_empty() {
        found.insert(FeedbackCategory::Dietary);
    }
    if !delta.include.is_empty() || !delta.limit.is_empty() || delta.notes.is_some() {
        found.insert(FeedbackCategory::Preference);
    }
    if delta.days.is_some() || delta.meals_per_day.is_some() {
        found.insert(FeedbackCategory::Schedule);
    }
    if delta.goal.is_some() {
        found.insert(FeedbackCategory::Profile);
    }
    if found.is_empty() {
        found.insert(FeedbackCategory::Preference);
    }
    found
}

/// Feedback category to re-entry stage. Categories missing from a
/// configured table use the built-in mapping.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ReentryPolicy(BTreeMap<FeedbackCategory, StageKind>);

impl Default for ReentryPolicy {
    fn default() -> Self {
        use FeedbackCategory::*;
        Self(
            [Budget, Allergy, Dietary, Preference, Schedule, Profile]
                .into_iter()
                .map(|c| (c, c.default_stage()))
                .collect(),
        )
    }
}

impl ReentryPolicy {
    pub fn stage_for(&self, category: FeedbackCategory) -> StageKind {
        self.0
            .get(&category)
            .copied()
            .unwrap_or_else(|| category.default_stage())
    }

    /// Earliest stage among the categories present.
    pub fn entry_for(&self, categories: &BTreeSet<FeedbackCategory>) -> StageKind {
        categories
            .iter()
            .map(|c| self.stage_for(*c))
            .min()
            .unwrap_or_else(|| self.stage_for(FeedbackCategory::Preference))
    }
}

// ---------------------------------------------------------------------------
// Controller
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FeedbackState {
    /// No plan yet.
    Idle,
    AwaitingApproval,
    Refining,
    Approved,
    /// The last refinement could not produce a plan. Only more feedback
    /// or a new plan request moves on from here.
    Stalled,
    /// The convergence cap was reached.
    Halted,
}

/// Result of a successful refinement.
#[derive(Debug, Clone)]
pub struct Refined {
    pub bundle: PlanBundle,
    pub entry: StageKind,
    pub categories: BTreeSet<FeedbackCategory>,
    pub record: FeedbackRecord,
}

/// What approving the current plan requires.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Approval {
    /// Persist the plan, then call [`FeedbackController::mark_approved`].
    Proceed,
    /// Nothing to do.
    AlreadyApproved,
}

#[derive(Debug, Clone)]
pub struct FeedbackController {
    state: FeedbackState,
    cycles: u32,
    cap: u32,
    constraints: Constraints,
    records: Vec<FeedbackRecord>,
}

impl FeedbackController {
    pub fn new(cap: u32) -> Self {
        Self {
            state: FeedbackState::Idle,
            cycles: 0,
            cap,
            constraints: Constraints::default(),
            records: Vec::new(),
        }
    }

    pub fn state(&self) -> FeedbackState {
        self.state
    }

    /// Rejections handled since the last approval or new plan request.
    pub fn cycles(&self) -> u32 {
        self.cycles
    }

    pub fn constraints(&self) -> &Constraints {
        &self.constraints
    }

    /// Feedback recorded since the last approval, oldest first.
    pub fn records(&self) -> &[FeedbackRecord] {
        &self.records
    }

    /// Begin a fresh chain for a new plan request.
    pub fn start_plan(&mut self, delta: &ConstraintsDelta, reference_cost: f64) {
        self.state = FeedbackState::Idle;
        self.cycles = 0;
        self.records.clear();
        self.constraints = Constraints::default();
        self.constraints.merge(delta, reference_cost);
    }

    /// A plan from a new request is ready for review.
    pub fn plan_ready(&mut self) {
        self.state = FeedbackState::AwaitingApproval;
    }

    /// Handle a rejection of `rejected` and replan.
    ///
    /// An extraction failure leaves everything as it was and does not count
    /// as a cycle. A pipeline failure leaves the controller `Stalled` with
    /// the feedback already merged and recorded.
    #[allow(clippy::too_many_arguments)]
    pub async fn reject(
        &mut self,
        feedback: &str,
        rejected: &MealPlan,
        extractor: &ConstraintExtractor,
        pipeline: &PlanPipeline,
        run: &mut PipelineRun,
        base: PlanningInput,
    ) -> Result<Refined, PlannerError> {
        match self.state {
            FeedbackState::AwaitingApproval | FeedbackState::Stalled | FeedbackState::Approved => {}
            FeedbackState::Halted => {
                return Err(PlannerError::ConvergenceExceeded {
                    cycles: self.cycles,
                });
            }
            FeedbackState::Idle | FeedbackState::Refining => {
                return Err(PlannerError::InvalidState(
                    "there is no plan to give feedback on".to_owned(),
                ));
            }
        }
        if self.cycles >= self.cap {
            warn!(
                session_id = %base.session_id,
                cycles = self.cycles,
                cap = self.cap,
                "refinement cap reached, halting"
            );
            self.state = FeedbackState::Halted;
            return Err(PlannerError::ConvergenceExceeded {
                cycles: self.cycles,
            });
        }

        let delta = extractor.extract(feedback, &self.constraints).await?;

        self.constraints.merge(&delta, rejected.total_cost);
        let record = FeedbackRecord {
            id: Uuid::new_v4(),
            session_id: base.session_id,
            plan_id: rejected.id,
            plan_version: rejected.version,
            plan_fingerprint: rejected.fingerprint(),
            feedback: feedback.to_owned(),
            delta: delta.clone(),
            created_at: Utc::now(),
        };
        self.records.push(record.clone());

        let categories = categories(&delta);
        let entry = pipeline.config().reentry.entry_for(&categories);
        self.cycles += 1;
        self.state = FeedbackState::Refining;
        info!(
            session_id = %base.session_id,
            cycle = self.cycles,
            entry = %entry,
            categories = ?categories,
            "refining plan"
        );

        let input = PlanningInput {
            constraints: EffectiveConstraints::resolve(&base.profile, &self.constraints),
            ..base
        };
        match pipeline.run(run, &input, entry).await {
            Ok(bundle) => {
                self.state = FeedbackState::AwaitingApproval;
                Ok(Refined {
                    bundle,
                    entry,
                    categories,
                    record,
                })
            }
            Err(err) => {
                self.state = FeedbackState::Stalled;
                Err(err)
            }
        }
    }

    /// Decide whether `plan` (the latest one) may be approved.
    pub fn check_approval(
        &self,
        plan: Option<&MealPlan>,
        accept_over_budget: bool,
    ) -> Result<Approval, PlannerError> {
        match self.state {
            FeedbackState::Approved => Ok(Approval::AlreadyApproved),
            FeedbackState::AwaitingApproval => {
                let plan = plan.ok_or_else(|| {
                    PlannerError::InvalidState("no plan awaiting approval".to_owned())
                })?;
                if plan.over_budget && !accept_over_budget {
                    return Err(PlannerError::OverBudget {
                        plan_id: plan.id,
                        overage: plan.overage(),
                    });
                }
                Ok(Approval::Proceed)
            }
            FeedbackState::Halted => Err(PlannerError::ConvergenceExceeded {
                cycles: self.cycles,
            }),
            FeedbackState::Stalled => Err(PlannerError::InvalidState(
                "the last refinement did not produce a plan; send new feedback or start over"
                    .to_owned(),
            )),
            FeedbackState::Idle | FeedbackState::Refining => Err(PlannerError::InvalidState(
                "no plan awaiting approval".to_owned(),
            )),
        }
    }

    /// The plan is durably saved. Session constraints stay in force for any
    /// later refinement of the approved plan.
    pub fn mark_approved(&mut self) {
        self.state = FeedbackState::Approved;
        self.cycles = 0;
        self.records.clear();
    }
}
