//! The planning stages.
//!
//! Each stage is a [`Stage`]: one attempt consumes upstream artifacts plus
//! the planning input and returns a [`StageOutcome`]. Retries and state
//! transitions belong to [`crate::pipeline::PlanPipeline`].

pub mod budget;
pub mod chef;
pub mod doctor;
pub mod manager;
pub mod sustainability;

use std::fmt;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::config::PlannerConfig;
use crate::generator::{GenerationError, GenerationRequest, Generator, decode, invoke_checked};
use crate::model::{Day, NutritionTarget, food};
use crate::pipeline::{Artifacts, PlanningInput};

pub use budget::BudgetStage;
pub use chef::MealDesignStage;
pub use doctor::NutritionTargetStage;
pub use manager::ValidationStage;
pub use sustainability::SustainabilityStage;

/// Pipeline stages in execution order.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum StageKind {
    NutritionTargets,
    MealDesign,
    BudgetOptimization,
    Validation,
    Sustainability,
}

impl StageKind {
    pub const ALL: [StageKind; 5] = [
        Self::NutritionTargets,
        Self::MealDesign,
        Self::BudgetOptimization,
        Self::Validation,
        Self::Sustainability,
    ];

    /// Stages from `self` to the end, in order.
    pub fn and_after(self) -> impl Iterator<Item = StageKind> {
        Self::ALL.into_iter().filter(move |s| *s >= self)
    }
}

impl fmt::Display for StageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::NutritionTargets => "nutrition_targets",
            Self::MealDesign => "meal_design",
            Self::BudgetOptimization => "budget_optimization",
            Self::Validation => "validation",
            Self::Sustainability => "sustainability",
        };
        f.write_str(s)
    }
}

/// Category of a failed attempt.
#[derive(Debug, Clone, PartialEq)]
pub enum IssueKind {
    /// The generator call itself failed or returned the wrong shape.
    Generation(GenerationError),
    /// The output breaks a hard rule: allergy, diet, calorie band, budget.
    Invariant,
    /// The output is well-formed JSON but incomplete or inconsistent.
    Malformed,
}

/// Why an attempt did not succeed.
#[derive(Debug, Clone, PartialEq)]
pub struct Issue {
    pub kind: IssueKind,
    pub detail: String,
}

impl Issue {
    pub fn invariant(detail: impl Into<String>) -> Self {
        Self {
            kind: IssueKind::Invariant,
            detail: detail.into(),
        }
    }

    pub fn malformed(detail: impl Into<String>) -> Self {
        Self {
            kind: IssueKind::Malformed,
            detail: detail.into(),
        }
    }
}

impl From<GenerationError> for Issue {
    fn from(err: GenerationError) -> Self {
        Self {
            detail: err.to_string(),
            kind: IssueKind::Generation(err),
        }
    }
}

impl fmt::Display for Issue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.detail)
    }
}

/// Result of one stage attempt.
#[derive(Debug, Clone, PartialEq)]
pub enum StageOutcome<T> {
    Success(T),
    /// Worth another attempt with the issue fed back.
    Retryable(Issue),
    /// Retrying cannot help.
    Fatal(Issue),
}

impl<T> From<Result<T, Issue>> for StageOutcome<T> {
    fn from(result: Result<T, Issue>) -> Self {
        match result {
            Ok(v) => Self::Success(v),
            Err(issue) => Self::Retryable(issue),
        }
    }
}

/// Everything one attempt may read.
pub struct StageInput<'a> {
    pub generator: &'a dyn Generator,
    pub config: &'a PlannerConfig,
    pub planning: &'a PlanningInput,
    pub artifacts: &'a Artifacts,
    /// Zero-based attempt number.
    pub attempt: u32,
    /// Issues from earlier attempts of this stage.
    pub feedback: &'a [String],
}

impl StageInput<'_> {
    /// Send a request (as a retry when `attempt > 0`) and decode the answer.
    pub async fn ask<T: DeserializeOwned>(&self, request: GenerationRequest) -> Result<T, Issue> {
        let request = request.retry(self.attempt, self.feedback);
        let value =
            invoke_checked(self.generator, &request, self.config.generator_timeout()).await?;
        Ok(decode(&request.schema, value)?)
    }
}

/// One step of the pipeline.
#[async_trait]
pub trait Stage: Send + Sync {
    type Output: Send;

    fn kind(&self) -> StageKind;

    async fn attempt(&self, input: &StageInput<'_>) -> StageOutcome<Self::Output>;
}

/// Problems found in a set of days, split by severity.
#[derive(Debug, Default)]
pub(crate) struct Findings {
    pub invariants: Vec<String>,
    pub malformed: Vec<String>,
}

impl Findings {
    pub fn is_clean(&self) -> bool {
        self.invariants.is_empty() && self.malformed.is_empty()
    }

    /// Collapse into one issue; hard-rule breaches take precedence.
    pub fn into_issue(self) -> Option<Issue> {
        const SHOWN: usize = 6;
        let summarize = |list: Vec<String>| {
            let extra = list.len().saturating_sub(SHOWN);
            let mut text = list.into_iter().take(SHOWN).collect::<Vec<_>>().join("; ");
            if extra > 0 {
                text.push_str(&format!("; and {extra} more"));
            }
            text
        };
        if !self.invariants.is_empty() {
            Some(Issue::invariant(summarize(self.invariants)))
        } else if !self.malformed.is_empty() {
            Some(Issue::malformed(summarize(self.malformed)))
        } else {
            None
        }
    }
}

/// Check days against shape, exclusions, limits and daily nutrition.
pub(crate) fn audit_days(
    days: &[Day],
    input: &PlanningInput,
    target: &NutritionTarget,
    config: &PlannerConfig,
) -> Findings {
    let c = &input.constraints;
    let mut findings = Findings::default();

    if days.len() != c.days as usize {
        findings
            .malformed
            .push(format!("expected {} days, got {}", c.days, days.len()));
    }

    for day in days {
        if day.meals.len() != c.meals_per_day as usize {
            findings.malformed.push(format!(
                "day {}: expected {} meals, got {}",
                day.day,
                c.meals_per_day,
                day.meals.len()
            ));
        }
        for meal in &day.meals {
            if meal.items.is_empty() {
                findings
                    .malformed
                    .push(format!("day {} {}: no items", day.day, meal.name));
            }
            for item in &meal.items {
                let numbers = [item.calories, item.protein_g, item.carbs_g, item.fat_g];
                if numbers.iter().any(|n| !n.is_finite() || *n < 0.0) {
                    findings.malformed.push(format!(
                        "day {} {}: {:?} has invalid nutrition numbers",
                        day.day, meal.name, item.name
                    ));
                }
                if let Some(allergen) = food::first_conflict(&item.name, &c.allergies) {
                    findings.invariants.push(format!(
                        "day {} {}: {:?} conflicts with the {allergen} allergy",
                        day.day, meal.name, item.name
                    ));
                }
                if let Some(reason) = food::diet_violation(&item.name, c.diet_type) {
                    findings.invariants.push(format!(
                        "day {} {}: {:?} contains {reason}, not allowed on a {} diet",
                        day.day, meal.name, item.name, c.diet_type
                    ));
                }
                if let Some(disliked) = food::first_conflict(&item.name, &c.avoid) {
                    findings.invariants.push(format!(
                        "day {} {}: {:?} contains {disliked}, which the user avoids",
                        day.day, meal.name, item.name
                    ));
                }
            }
        }

        for term in &c.limit {
            let count = day
                .items()
                .filter(|i| food::conflicts_with(&i.name, term))
                .count();
            if count > 1 {
                findings.malformed.push(format!(
                    "day {}: {term} appears {count} times, at most once per day",
                    day.day
                ));
            }
        }

        let totals = day.totals();
        let tolerance = target.calories * config.calorie_tolerance;
        if (totals.calories - target.calories).abs() > tolerance {
            findings.invariants.push(format!(
                "day {}: {:.0} kcal is outside {:.0} +/- {:.0}",
                day.day, totals.calories, target.calories, tolerance
            ));
        }
        let protein_floor = target.protein_g * config.protein_floor;
        if totals.protein_g < protein_floor {
            findings.invariants.push(format!(
                "day {}: {:.0} g protein is below the {:.0} g floor",
                day.day, totals.protein_g, protein_floor
            ));
        }
    }
    findings
}
