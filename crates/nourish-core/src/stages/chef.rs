//! Meal design.

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;

use super::{Issue, Stage, StageInput, StageKind, StageOutcome, audit_days};
use crate::generator::{GenerationRequest, OutputSchema, Task};
use crate::model::{Day, Meal, MealDesign, MealItem};

const SCHEMA: OutputSchema = OutputSchema {
    name: "meal_design",
    schema: r#"{
        "type": "object",
        "required": ["days"],
        "properties": {
            "days": {
                "type": "array",
                "items": {
                    "type": "object",
                    "required": ["meals"],
                    "properties": {
                        "meals": {
                            "type": "array",
                            "items": {
                                "type": "object",
                                "required": ["name", "items"],
                                "properties": {
                                    "name": {"type": "string"},
                                    "items": {
                                        "type": "array",
                                        "items": {
                                            "type": "object",
                                            "required": ["name", "calories", "protein_g"],
                                            "properties": {
                                                "name": {"type": "string"},
                                                "quantity": {"type": "number"},
                                                "unit": {"type": "string"},
                                                "calories": {"type": "number"},
                                                "protein_g": {"type": "number"},
                                                "carbs_g": {"type": "number"},
                                                "fat_g": {"type": "number"}
                                            }
                                        }
                                    }
                                }
                            }
                        }
                    }
                }
            }
        }
    }"#,
    example: r#"{"days": [{"meals": [{"name": "Breakfast", "items": [{"name": "Vegetable poha", "quantity": 1, "unit": "bowl", "calories": 320, "protein_g": 8, "carbs_g": 55, "fat_g": 7}]}]}]}"#,
};

const INSTRUCTIONS: &str = "Design the meals. Produce exactly `days` days with exactly \
`meals_per_day` meals each. Every day must land within the calorie tolerance of the \
target and reach the protein target. Never use anything in `allergies` or `avoid`, or \
anything the diet type excludes. Items in `limit` may appear at most once per day. \
Work in `include` items where sensible. Vary meals across days and take \
`recent_feedback` into account.";

#[derive(Debug, Deserialize)]
struct ItemAnswer {
    name: String,
    #[serde(default = "one")]
    quantity: f64,
    #[serde(default = "serving")]
    unit: String,
    calories: f64,
    protein_g: f64,
    #[serde(default)]
    carbs_g: f64,
    #[serde(default)]
    fat_g: f64,
}

fn one() -> f64 {
    1.0
}

fn serving() -> String {
    "serving".to_owned()
}

#[derive(Debug, Deserialize)]
struct MealAnswer {
    name: String,
    items: Vec<ItemAnswer>,
}

#[derive(Debug, Deserialize)]
struct DayAnswer {
    meals: Vec<MealAnswer>,
}

#[derive(Debug, Deserialize)]
struct Answer {
    days: Vec<DayAnswer>,
}

fn into_days(answer: Answer) -> Vec<Day> {
    answer
        .days
        .into_iter()
        .enumerate()
        .map(|(i, d)| Day {
            day: i as u32 + 1,
            meals: d
                .meals
                .into_iter()
                .map(|m| Meal {
                    name: m.name.trim().to_owned(),
                    items: m
                        .items
                        .into_iter()
                        .map(|it| MealItem {
                            name: it.name.trim().to_owned(),
                            quantity: it.quantity,
                            unit: it.unit,
                            calories: it.calories,
                            protein_g: it.protein_g,
                            carbs_g: it.carbs_g,
                            fat_g: it.fat_g,
                            cost: None,
                        })
                        .collect(),
                })
                .collect(),
        })
        .collect()
}

/// The "chef": meals that satisfy targets and exclusions.
pub struct MealDesignStage;

#[async_trait]
impl Stage for MealDesignStage {
    type Output = MealDesign;

    fn kind(&self) -> StageKind {
        StageKind::MealDesign
    }

    async fn attempt(&self, input: &StageInput<'_>) -> StageOutcome<MealDesign> {
        let Some(target) = input.artifacts.targets.as_ref() else {
            return StageOutcome::Fatal(Issue::malformed("nutrition targets missing"));
        };
        let c = &input.planning.constraints;
        let snapshot = &input.planning.snapshot;

        let request = GenerationRequest::new(
            Task::MealDesign,
            "a home chef who plans healthy, affordable meals",
            INSTRUCTIONS,
            json!({
                "target": {
                    "calories": target.calories,
                    "protein_g": target.protein_g,
                    "carbs_g": target.carbs_g,
                    "fat_g": target.fat_g,
                },
                "calorie_tolerance": input.config.calorie_tolerance,
                "days": c.days,
                "meals_per_day": c.meals_per_day,
                "diet_type": c.diet_type,
                "allergies": c.allergies,
                "avoid": c.avoid,
                "include": c.include,
                "limit": c.limit,
                "cuisine": c.cuisine,
                "notes": c.notes,
                "previous_plan": snapshot.latest_plan.as_ref().map(|p| &p.plan.days),
                "recent_feedback": snapshot
                    .recent_feedback
                    .iter()
                    .map(|r| r.feedback.as_str())
                    .collect::<Vec<_>>(),
            }),
            SCHEMA,
        );

        let result = async {
            let answer: Answer = input.ask(request).await?;
            let days = into_days(answer);
            let findings = audit_days(&days, input.planning, target, input.config);
            match findings.into_issue() {
                Some(issue) => Err(issue),
                None => Ok(MealDesign { days }),
            }
        }
        .await;
        result.into()
    }
}
