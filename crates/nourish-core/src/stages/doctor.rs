//! Nutrition targets: a deterministic metabolic baseline that the generator
//! may adjust inside the safe band.

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;
use tracing::debug;

use nourish_db::models::{Goal, Sex, UserProfile};

use super::{Issue, Stage, StageInput, StageKind, StageOutcome};
use crate::generator::{GenerationRequest, OutputSchema, Task};
use crate::model::{CalorieBand, NutritionTarget};

/// Lowest daily intake any plan may target.
pub fn safety_floor(sex: Sex) -> f64 {
    match sex {
        Sex::Male => 1500.0,
        Sex::Female => 1200.0,
    }
}

/// Mifflin-St Jeor basal metabolic rate.
pub fn bmr(profile: &UserProfile) -> f64 {
    let base = 10.0 * profile.weight_kg + 6.25 * profile.height_cm - 5.0 * f64::from(profile.age);
    match profile.sex {
        Sex::Male => base + 5.0,
        Sex::Female => base - 161.0,
    }
}

/// Safe calorie band for a goal, never below the safety floor.
pub fn safe_band(tdee: f64, goal: Goal, sex: Sex) -> CalorieBand {
    let floor = safety_floor(sex);
    let (min, max) = match goal {
        Goal::WeightLoss => (tdee - 1000.0, tdee - 100.0),
        Goal::Maintain => (tdee - 150.0, tdee + 150.0),
        Goal::WeightGain => (tdee + 100.0, tdee + 700.0),
    };
    CalorieBand {
        min: min.max(floor).round(),
        max: max.max(floor).round(),
    }
}

fn goal_offset(goal: Goal) -> f64 {
    match goal {
        Goal::WeightLoss => -400.0,
        Goal::Maintain => 0.0,
        Goal::WeightGain => 300.0,
    }
}

/// Macro split for a calorie level: 2 g protein per kg (capped at 40 % of
/// energy), 25 % of energy from fat, carbohydrates for the rest.
pub fn macros_for(calories: f64, weight_kg: f64) -> (f64, f64, f64) {
    let protein = (2.0 * weight_kg).min(calories * 0.40 / 4.0).round();
    let fat = (calories * 0.25 / 9.0).round();
    let carbs = ((calories - protein * 4.0 - fat * 9.0) / 4.0).max(0.0).round();
    (protein, carbs, fat)
}

/// The deterministic starting point for a profile and goal.
pub fn baseline(profile: &UserProfile, goal: Goal) -> NutritionTarget {
    let bmr = bmr(profile);
    let tdee = bmr * profile.activity.multiplier();
    let band = safe_band(tdee, goal, profile.sex);
    let calories = band.clamp((tdee + goal_offset(goal)).round());
    let (protein_g, carbs_g, fat_g) = macros_for(calories, profile.weight_kg);
    NutritionTarget {
        calories,
        protein_g,
        carbs_g,
        fat_g,
        bmr: bmr.round(),
        tdee: tdee.round(),
        band,
        rationale: format!(
            "Mifflin-St Jeor BMR {:.0} x activity {} = {:.0} kcal maintenance, adjusted for {goal}",
            bmr,
            profile.activity.multiplier(),
            tdee
        ),
    }
}

const SCHEMA: OutputSchema = OutputSchema {
    name: "nutrition_target",
    schema: r#"{
        "type": "object",
        "required": ["calories", "protein_g", "carbs_g", "fat_g"],
        "properties": {
            "calories": {"type": "number"},
            "protein_g": {"type": "number"},
            "carbs_g": {"type": "number"},
            "fat_g": {"type": "number"},
            "rationale": {"type": "string"}
        }
    }"#,
    example: r#"{"calories": 1650, "protein_g": 130, "carbs_g": 165, "fat_g": 46, "rationale": "..."}"#,
};

const INSTRUCTIONS: &str = "Review the baseline daily targets computed for this client. \
Keep them unless the profile or notes justify a change. Calories must stay inside the \
safe band. Protein must not drop below the baseline.";

#[derive(Debug, Deserialize)]
struct Answer {
    calories: f64,
    protein_g: f64,
    carbs_g: f64,
    fat_g: f64,
    #[serde(default)]
    rationale: String,
}

/// The "doctor": daily calorie and macro targets.
pub struct NutritionTargetStage;

impl NutritionTargetStage {
    fn check(
        answer: Answer,
        base: &NutritionTarget,
        protein_floor: f64,
    ) -> Result<NutritionTarget, Issue> {
        let numbers = [answer.calories, answer.protein_g, answer.carbs_g, answer.fat_g];
        if numbers.iter().any(|n| !n.is_finite() || *n < 0.0) {
            return Err(Issue::malformed("targets must be non-negative numbers"));
        }
        if !base.band.contains(answer.calories) {
            return Err(Issue::invariant(format!(
                "{:.0} kcal is outside the safe band {:.0}-{:.0}",
                answer.calories, base.band.min, base.band.max
            )));
        }
        if answer.protein_g < base.protein_g * protein_floor {
            return Err(Issue::invariant(format!(
                "{:.0} g protein is below the {:.0} g minimum",
                answer.protein_g,
                base.protein_g * protein_floor
            )));
        }
        let energy = answer.protein_g * 4.0 + answer.carbs_g * 4.0 + answer.fat_g * 9.0;
        if (energy - answer.calories).abs() > answer.calories * 0.15 {
            return Err(Issue::malformed(format!(
                "macros add up to {energy:.0} kcal but calories is {:.0}",
                answer.calories
            )));
        }
        Ok(NutritionTarget {
            calories: answer.calories,
            protein_g: answer.protein_g,
            carbs_g: answer.carbs_g,
            fat_g: answer.fat_g,
            bmr: base.bmr,
            tdee: base.tdee,
            band: base.band,
            rationale: if answer.rationale.trim().is_empty() {
                base.rationale.clone()
            } else {
                answer.rationale
            },
        })
    }
}

#[async_trait]
impl Stage for NutritionTargetStage {
    type Output = NutritionTarget;

    fn kind(&self) -> StageKind {
        StageKind::NutritionTargets
    }

    async fn attempt(&self, input: &StageInput<'_>) -> StageOutcome<NutritionTarget> {
        let profile = &input.planning.profile;
        let goal = input.planning.constraints.goal;
        let base = baseline(profile, goal);
        debug!(
            calories = base.calories,
            min = base.band.min,
            max = base.band.max,
            "baseline targets"
        );

        let request = GenerationRequest::new(
            Task::NutritionTargets,
            "a clinical nutritionist",
            INSTRUCTIONS,
            json!({
                "profile": {
                    "age": profile.age,
                    "sex": profile.sex,
                    "height_cm": profile.height_cm,
                    "weight_kg": profile.weight_kg,
                    "goal_weight_kg": profile.goal_weight_kg,
                    "activity": profile.activity,
                },
                "goal": goal,
                "baseline": base,
                "band": base.band,
                "notes": input.planning.constraints.notes,
            }),
            SCHEMA,
        );

        let result = async {
            let answer: Answer = input.ask(request).await?;
            Self::check(answer, &base, input.config.protein_floor)
        }
        .await;
        result.into()
    }
}
