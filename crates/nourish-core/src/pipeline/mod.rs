//! The plan pipeline state machine.
//!
//! Drives the five stages in order, retrying each one with the previous
//! attempts' problems fed back, and records every state change on a
//! [`PipelineRun`]. A run keeps its stage artifacts so a refinement can
//! re-enter part way down the chain and leave earlier outputs untouched.

use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::config::PlannerConfig;
use crate::error::PlannerError;
use crate::generator::Generator;
use crate::memory::MemorySnapshot;
use crate::model::{
    EffectiveConstraints, MealDesign, MealPlan, NutritionTarget, PlanBundle, PricedPlan,
    SustainabilityReport, UserProfile,
};
use crate::stages::{
    BudgetStage, Issue, IssueKind, MealDesignStage, NutritionTargetStage, Stage, StageInput,
    StageKind, StageOutcome, SustainabilityStage, ValidationStage,
};

// ---------------------------------------------------------------------------
// States
// ---------------------------------------------------------------------------

/// Where a pipeline run is.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum PipelineState {
    Idle,
    TargetsComputed,
    MealsDesigned,
    BudgetOptimized,
    Validated,
    SustainabilityScored,
    Complete,
    Failed { stage: StageKind, reason: String },
}

impl PipelineState {
    /// Check whether `from -> to` is an edge of the state graph:
    ///
    /// ```text
    /// idle -> targets_computed -> meals_designed -> budget_optimized
    ///      -> validated -> sustainability_scored -> complete
    /// any running state -> failed
    /// complete | failed -> idle | targets_computed | meals_designed
    ///                      | budget_optimized | validated   (re-entry)
    /// ```
    pub fn is_valid_transition(from: &PipelineState, to: &PipelineState) -> bool {
        use PipelineState::*;
        matches!(
            (from, to),
            (Idle, TargetsComputed)
                | (TargetsComputed, MealsDesigned)
                | (MealsDesigned, BudgetOptimized)
                | (BudgetOptimized, Validated)
                | (Validated, SustainabilityScored)
                | (SustainabilityScored, Complete)
                | (
                    Idle | TargetsComputed | MealsDesigned | BudgetOptimized | Validated
                        | SustainabilityScored,
                    Failed { .. }
                )
                | (
                    Complete | Failed { .. },
                    Idle | TargetsComputed | MealsDesigned | BudgetOptimized | Validated
                )
        )
    }

    /// The state a run must be in for `stage` to run next.
    pub fn before(stage: StageKind) -> Self {
        match stage {
            StageKind::NutritionTargets => Self::Idle,
            StageKind::MealDesign => Self::TargetsComputed,
            StageKind::BudgetOptimization => Self::MealsDesigned,
            StageKind::Validation => Self::BudgetOptimized,
            StageKind::Sustainability => Self::Validated,
        }
    }

    /// The state reached once `stage` succeeds.
    pub fn after(stage: StageKind) -> Self {
        match stage {
            StageKind::NutritionTargets => Self::TargetsComputed,
            StageKind::MealDesign => Self::MealsDesigned,
            StageKind::BudgetOptimization => Self::BudgetOptimized,
            StageKind::Validation => Self::Validated,
            StageKind::Sustainability => Self::SustainabilityScored,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Complete | Self::Failed { .. })
    }

    /// The stage a non-terminal run would execute next.
    fn pending_stage(&self) -> Option<StageKind> {
        match self {
            Self::Idle => Some(StageKind::NutritionTargets),
            Self::TargetsComputed => Some(StageKind::MealDesign),
            Self::MealsDesigned => Some(StageKind::BudgetOptimization),
            Self::BudgetOptimized => Some(StageKind::Validation),
            Self::Validated | Self::SustainabilityScored => Some(StageKind::Sustainability),
            Self::Complete | Self::Failed { .. } => None,
        }
    }
}

impl fmt::Display for PipelineState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Idle => f.write_str("idle"),
            Self::TargetsComputed => f.write_str("targets_computed"),
            Self::MealsDesigned => f.write_str("meals_designed"),
            Self::BudgetOptimized => f.write_str("budget_optimized"),
            Self::Validated => f.write_str("validated"),
            Self::SustainabilityScored => f.write_str("sustainability_scored"),
            Self::Complete => f.write_str("complete"),
            Self::Failed { stage, reason } => write!(f, "failed({stage}: {reason})"),
        }
    }
}

// ---------------------------------------------------------------------------
// Run state
// ---------------------------------------------------------------------------

/// Outputs of the stages that have run, kept between runs of one session.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Artifacts {
    pub targets: Option<NutritionTarget>,
    pub design: Option<MealDesign>,
    pub priced: Option<PricedPlan>,
    pub plan: Option<MealPlan>,
    pub report: Option<SustainabilityReport>,
}

impl Artifacts {
    fn has(&self, stage: StageKind) -> bool {
        match stage {
            StageKind::NutritionTargets => self.targets.is_some(),
            StageKind::MealDesign => self.design.is_some(),
            StageKind::BudgetOptimization => self.priced.is_some(),
            StageKind::Validation => self.plan.is_some(),
            StageKind::Sustainability => self.report.is_some(),
        }
    }

    /// The earliest stage without an output.
    pub fn first_missing(&self) -> Option<StageKind> {
        StageKind::ALL.into_iter().find(|s| !self.has(*s))
    }

    /// Drop the outputs of `stage` and everything after it.
    pub fn reset_from(&mut self, stage: StageKind) {
        for s in stage.and_after() {
            match s {
                StageKind::NutritionTargets => self.targets = None,
                StageKind::MealDesign => self.design = None,
                StageKind::BudgetOptimization => self.priced = None,
                StageKind::Validation => self.plan = None,
                StageKind::Sustainability => self.report = None,
            }
        }
    }
}

/// One session's pipeline: current state plus the artifacts produced so far.
#[derive(Debug, Clone, PartialEq)]
pub struct PipelineRun {
    pub state: PipelineState,
    pub artifacts: Artifacts,
}

impl Default for PipelineRun {
    fn default() -> Self {
        Self {
            state: PipelineState::Idle,
            artifacts: Artifacts::default(),
        }
    }
}

/// Everything the stages read besides upstream artifacts.
#[derive(Debug, Clone)]
pub struct PlanningInput {
    pub session_id: Uuid,
    pub user_id: String,
    /// Version the produced plan will carry.
    pub version: u32,
    pub profile: UserProfile,
    pub constraints: EffectiveConstraints,
    pub snapshot: MemorySnapshot,
}

// ---------------------------------------------------------------------------
// Observers
// ---------------------------------------------------------------------------

/// Notified on every pipeline state change. Extension point for agents
/// that react to plans (recipes, ordering, review).
pub trait PlanObserver: Send + Sync {
    fn on_transition(&self, session_id: Uuid, from: &PipelineState, to: &PipelineState);
}

// Compile-time assertion: PlanObserver must be object-safe.
const _: () = {
    fn _assert_object_safe(_: &dyn PlanObserver) {}
};

// ---------------------------------------------------------------------------
// Pipeline
// ---------------------------------------------------------------------------

/// Map an exhausted stage issue to the user-facing error.
fn failure(stage: StageKind, issue: Issue) -> PlannerError {
    match issue.kind {
        IssueKind::Generation(source) => PlannerError::Generation { stage, source },
        IssueKind::Invariant => PlannerError::InvariantViolation {
            stage,
            detail: issue.detail,
        },
        IssueKind::Malformed => PlannerError::StageFailed {
            stage,
            reason: issue.detail,
        },
    }
}

pub struct PlanPipeline {
    generator: Arc<dyn Generator>,
    config: PlannerConfig,
    observers: Vec<Arc<dyn PlanObserver>>,
}

impl PlanPipeline {
    pub fn new(generator: Arc<dyn Generator>, config: PlannerConfig) -> Self {
        Self {
            generator,
            config,
            observers: Vec::new(),
        }
    }

    pub fn with_observer(mut self, observer: Arc<dyn PlanObserver>) -> Self {
        self.observers.push(observer);
        self
    }

    pub fn config(&self) -> &PlannerConfig {
        &self.config
    }

    /// Run from `entry` (or the earliest stage with a missing output, if
    /// that comes first) through to `Complete`.
    ///
    /// Validation always runs, so every successful run yields a new plan
    /// version. Sustainability never fails the run: when scoring is
    /// exhausted the table heuristic is attached instead.
    pub async fn run(
        &self,
        run: &mut PipelineRun,
        input: &PlanningInput,
        entry: StageKind,
    ) -> Result<PlanBundle, PlannerError> {
        let mut entry = entry.min(StageKind::Validation);
        if let Some(missing) = run.artifacts.first_missing() {
            entry = entry.min(missing);
        }
        info!(
            session_id = %input.session_id,
            user_id = %input.user_id,
            version = input.version,
            entry = %entry,
            "running plan pipeline"
        );

        if let Some(stage) = run.state.pending_stage().filter(|_| run.state != PipelineState::Idle)
        {
            warn!(
                session_id = %input.session_id,
                state = %run.state,
                "previous run was interrupted"
            );
            self.advance(
                run,
                input.session_id,
                PipelineState::Failed {
                    stage,
                    reason: "interrupted".to_owned(),
                },
            )?;
        }
        run.artifacts.reset_from(entry);
        self.advance(run, input.session_id, PipelineState::before(entry))?;

        if entry <= StageKind::NutritionTargets {
            let targets = self.step(&NutritionTargetStage, run, input).await?;
            run.artifacts.targets = Some(targets);
            self.advance(run, input.session_id, PipelineState::TargetsComputed)?;
        }
        if entry <= StageKind::MealDesign {
            let design = self.step(&MealDesignStage, run, input).await?;
            run.artifacts.design = Some(design);
            self.advance(run, input.session_id, PipelineState::MealsDesigned)?;
        }
        if entry <= StageKind::BudgetOptimization {
            let priced = self.step(&BudgetStage, run, input).await?;
            run.artifacts.priced = Some(priced);
            self.advance(run, input.session_id, PipelineState::BudgetOptimized)?;
        }

        let plan = self.step(&ValidationStage, run, input).await?;
        run.artifacts.plan = Some(plan.clone());
        self.advance(run, input.session_id, PipelineState::Validated)?;

        let report = match self.drive(&SustainabilityStage, &run.artifacts, input).await {
            Ok(report) => report,
            Err(issue) => {
                warn!(
                    session_id = %input.session_id,
                    reason = %issue,
                    "sustainability scoring unavailable, using heuristic estimate"
                );
                SustainabilityReport::heuristic(&plan.grocery)
            }
        };
        run.artifacts.report = Some(report.clone());
        self.advance(run, input.session_id, PipelineState::SustainabilityScored)?;
        self.advance(run, input.session_id, PipelineState::Complete)?;

        info!(
            session_id = %input.session_id,
            plan_id = %plan.id,
            version = plan.version,
            total_cost = plan.total_cost,
            over_budget = plan.over_budget,
            "plan complete"
        );
        Ok(PlanBundle { plan, report })
    }

    /// Move `run` to `to`, notifying observers. Staying put is a no-op.
    fn advance(
        &self,
        run: &mut PipelineRun,
        session_id: Uuid,
        to: PipelineState,
    ) -> Result<(), PlannerError> {
        if run.state == to {
            return Ok(());
        }
        if !PipelineState::is_valid_transition(&run.state, &to) {
            return Err(PlannerError::InvalidState(format!(
                "invalid pipeline transition: {} -> {}",
                run.state, to
            )));
        }
        debug!(session_id = %session_id, from = %run.state, to = %to, "pipeline transition");
        for observer in &self.observers {
            observer.on_transition(session_id, &run.state, &to);
        }
        run.state = to;
        Ok(())
    }

    /// Drive a stage and move the run to `Failed` when it gives up.
    async fn step<S: Stage>(
        &self,
        stage: &S,
        run: &mut PipelineRun,
        input: &PlanningInput,
    ) -> Result<S::Output, PlannerError> {
        let result = self.drive(stage, &run.artifacts, input).await;
        match result {
            Ok(output) => Ok(output),
            Err(issue) => {
                let kind = stage.kind();
                error!(
                    session_id = %input.session_id,
                    stage = %kind,
                    reason = %issue,
                    "stage failed"
                );
                self.advance(
                    run,
                    input.session_id,
                    PipelineState::Failed {
                        stage: kind,
                        reason: issue.detail.clone(),
                    },
                )?;
                Err(failure(kind, issue))
            }
        }
    }

    /// Attempt a stage up to `stage_retries + 1` times, feeding each
    /// rejected attempt's issue into the next.
    async fn drive<S: Stage>(
        &self,
        stage: &S,
        artifacts: &Artifacts,
        planning: &PlanningInput,
    ) -> Result<S::Output, Issue> {
        let kind = stage.kind();
        let attempts = self.config.stage_retries + 1;
        let mut feedback: Vec<String> = Vec::new();
        let mut last = None;

        for attempt in 0..attempts {
            let input = StageInput {
                generator: self.generator.as_ref(),
                config: &self.config,
                planning,
                artifacts,
                attempt,
                feedback: &feedback,
            };
            let outcome = stage.attempt(&input).await;
            match outcome {
                StageOutcome::Success(output) => {
                    info!(
                        session_id = %planning.session_id,
                        stage = %kind,
                        attempt = attempt,
                        "stage succeeded"
                    );
                    return Ok(output);
                }
                StageOutcome::Retryable(issue) => {
                    warn!(
                        session_id = %planning.session_id,
                        stage = %kind,
                        attempt = attempt,
                        reason = %issue,
                        "stage attempt rejected"
                    );
                    feedback.push(issue.detail.clone());
                    last = Some(issue);
                }
                StageOutcome::Fatal(issue) => return Err(issue),
            }
        }
        Err(last.unwrap_or_else(|| Issue::malformed("stage was given no attempts")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn forward_edges_are_valid() {
        let chain = [
            PipelineState::Idle,
            PipelineState::TargetsComputed,
            PipelineState::MealsDesigned,
            PipelineState::BudgetOptimized,
            PipelineState::Validated,
            PipelineState::SustainabilityScored,
            PipelineState::Complete,
        ];
        for pair in chain.windows(2) {
            assert!(PipelineState::is_valid_transition(&pair[0], &pair[1]));
            assert!(!PipelineState::is_valid_transition(&pair[1], &pair[0]));
        }
    }

    #[test]
    fn skipping_a_stage_is_invalid() {
        assert!(!PipelineState::is_valid_transition(
            &PipelineState::Idle,
            &PipelineState::MealsDesigned
        ));
        assert!(!PipelineState::is_valid_transition(
            &PipelineState::Validated,
            &PipelineState::Complete
        ));
    }

    #[test]
    fn failed_is_absorbing_until_rewound() {
        let failed = PipelineState::Failed {
            stage: StageKind::MealDesign,
            reason: "peanut".into(),
        };
        assert!(PipelineState::is_valid_transition(
            &PipelineState::TargetsComputed,
            &failed
        ));
        assert!(!PipelineState::is_valid_transition(&PipelineState::Complete, &failed));
        assert!(!PipelineState::is_valid_transition(&failed, &PipelineState::Complete));
        assert!(PipelineState::is_valid_transition(&failed, &PipelineState::TargetsComputed));
    }

    #[test]
    fn before_and_after_bracket_each_stage() {
        for stage in StageKind::ALL {
            assert!(PipelineState::is_valid_transition(
                &PipelineState::before(stage),
                &PipelineState::after(stage)
            ));
        }
    }

    #[test]
    fn reset_keeps_upstream_artifacts() {
        let mut artifacts = Artifacts {
            design: Some(MealDesign { days: vec![] }),
            ..Artifacts::default()
        };
        assert_eq!(artifacts.first_missing(), Some(StageKind::NutritionTargets));
        artifacts.reset_from(StageKind::BudgetOptimization);
        assert!(artifacts.design.is_some());
        artifacts.reset_from(StageKind::MealDesign);
        assert!(artifacts.design.is_none());
    }
}
