//! Final review: re-check the priced plan, then ask for a summary and a
//! verdict and assemble the versioned [`MealPlan`].

use async_trait::async_trait;
use chrono::Utc;
use serde::Deserialize;
use serde_json::json;
use uuid::Uuid;

use super::{Issue, Stage, StageInput, StageKind, StageOutcome, audit_days};
use crate::generator::{GenerationRequest, OutputSchema, Task};
use crate::model::plan::total_cost;
use crate::model::{DailyTotals, GroceryList, MealPlan, PricedPlan};

const COST_EPSILON: f64 = 0.01;

const DOCTOR_NOTE: &str = "Consult a doctor or registered dietitian before starting a new diet.";

const SCHEMA: OutputSchema = OutputSchema {
    name: "plan_review",
    schema: r#"{
        "type": "object",
        "required": ["summary", "verdict"],
        "properties": {
            "summary": {"type": "string"},
            "verdict": {"type": "string"},
            "warnings": {"type": "array", "items": {"type": "string"}}
        }
    }"#,
    example: r#"{"summary": "Three balanced days...", "verdict": "Safe for the stated goal. Consult a doctor before starting.", "warnings": []}"#,
};

const INSTRUCTIONS: &str = "Review the final plan as a project manager. Write a short \
summary for the user, a verdict on whether it fits the goal (recommend consulting a \
doctor), and warnings for anything the user should know, such as going over budget.";

#[derive(Debug, Deserialize)]
struct Answer {
    summary: String,
    verdict: String,
    #[serde(default)]
    warnings: Vec<String>,
}

/// Hard checks on the budget stage output. Anything found here is a bug in
/// an upstream stage, not something another review call can fix.
fn recheck(priced: &PricedPlan, input: &StageInput<'_>) -> Option<Issue> {
    let target = input.artifacts.targets.as_ref()?;
    let mut findings = audit_days(&priced.days, input.planning, target, input.config);

    let summed = total_cost(&priced.days);
    if (summed - priced.total_cost).abs() > COST_EPSILON {
        findings.malformed.push(format!(
            "line costs add up to {summed:.2} but the plan total is {:.2}",
            priced.total_cost
        ));
    }
    if priced.total_cost > priced.budget_ceiling + COST_EPSILON && !priced.over_budget {
        findings.invariants.push(format!(
            "total {:.2} exceeds the {:.2} ceiling without being flagged",
            priced.total_cost, priced.budget_ceiling
        ));
    }
    findings.into_issue()
}

/// The "manager": validation and presentation.
pub struct ValidationStage;

#[async_trait]
impl Stage for ValidationStage {
    type Output = MealPlan;

    fn kind(&self) -> StageKind {
        StageKind::Validation
    }

    async fn attempt(&self, input: &StageInput<'_>) -> StageOutcome<MealPlan> {
        let (Some(target), Some(priced)) = (
            input.artifacts.targets.as_ref(),
            input.artifacts.priced.as_ref(),
        ) else {
            return StageOutcome::Fatal(Issue::malformed("targets or priced plan missing"));
        };
        if let Some(issue) = recheck(priced, input) {
            return StageOutcome::Fatal(issue);
        }

        let daily: Vec<DailyTotals> = priced.days.iter().map(|d| d.totals()).collect();
        let grocery = GroceryList::from_days(&priced.days);
        let overage = (priced.total_cost - priced.budget_ceiling).max(0.0);

        let request = GenerationRequest::new(
            Task::Review,
            "a meal-plan project manager",
            INSTRUCTIONS,
            json!({
                "days": priced.days,
                "daily": daily,
                "total_cost": priced.total_cost,
                "budget_ceiling": priced.budget_ceiling,
                "over_budget": priced.over_budget,
                "overage": overage,
                "target": target,
                "substitutions": priced.substitutions,
            }),
            SCHEMA,
        );

        let result = async {
            let answer: Answer = input.ask(request).await?;
            if answer.summary.trim().is_empty() {
                return Err(Issue::malformed("summary is empty"));
            }

            let mut warnings: Vec<String> = answer
                .warnings
                .into_iter()
                .map(|w| w.trim().to_owned())
                .filter(|w| !w.is_empty())
                .collect();
            if priced.over_budget {
                warnings.push(format!(
                    "This plan costs {:.2}, which is {overage:.2} over your {:.2} budget. \
                     No cheaper swap kept your nutrition targets.",
                    priced.total_cost, priced.budget_ceiling
                ));
            }

            let mut verdict = answer.verdict.trim().to_owned();
            if !verdict.to_lowercase().contains("doctor") {
                if !verdict.is_empty() {
                    verdict.push(' ');
                }
                verdict.push_str(DOCTOR_NOTE);
            }

            Ok(MealPlan {
                id: Uuid::new_v4(),
                session_id: input.planning.session_id,
                version: input.planning.version,
                days: priced.days.clone(),
                target: target.clone(),
                daily,
                grocery,
                total_cost: priced.total_cost,
                budget_ceiling: priced.budget_ceiling,
                over_budget: priced.over_budget,
                substitutions: priced.substitutions.clone(),
                summary: answer.summary.trim().to_owned(),
                verdict,
                warnings,
                created_at: Utc::now(),
            })
        }
        .await;
        result.into()
    }
}
