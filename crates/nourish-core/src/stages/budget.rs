//! Cost optimization: price every item, then substitute cheaper
//! alternatives until the plan fits the ceiling.

use std::collections::{BTreeSet, HashMap};

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;
use tracing::{info, warn};

use super::{Issue, Stage, StageInput, StageKind, StageOutcome};
use crate::config::PlannerConfig;
use crate::generator::{GenerationRequest, OutputSchema, Task};
use crate::model::plan::{all_items, total_cost};
use crate::model::{
    Day, EffectiveConstraints, MealDesign, MealItem, NutritionTarget, PricedPlan, Substitution,
    food,
};

const EPSILON: f64 = 1e-6;

const SCHEMA: OutputSchema = OutputSchema {
    name: "pricing",
    schema: r#"{
        "type": "object",
        "required": ["prices"],
        "properties": {
            "prices": {
                "type": "array",
                "items": {
                    "type": "object",
                    "required": ["item", "cost"],
                    "properties": {
                        "item": {"type": "string"},
                        "cost": {"type": "number"},
                        "alternatives": {
                            "type": "array",
                            "items": {
                                "type": "object",
                                "required": ["name", "calories", "protein_g", "cost"],
                                "properties": {
                                    "name": {"type": "string"},
                                    "quantity": {"type": "number"},
                                    "unit": {"type": "string"},
                                    "calories": {"type": "number"},
                                    "protein_g": {"type": "number"},
                                    "carbs_g": {"type": "number"},
                                    "fat_g": {"type": "number"},
                                    "cost": {"type": "number"}
                                }
                            }
                        }
                    }
                }
            }
        }
    }"#,
    example: r#"{"prices": [{"item": "Grilled chicken", "cost": 3.2, "alternatives": [{"name": "Chickpea curry", "quantity": 1, "unit": "bowl", "calories": 410, "protein_g": 19, "carbs_g": 50, "fat_g": 12, "cost": 1.1}]}]}"#,
};

const INSTRUCTIONS: &str = "Estimate the cost of one listed serving of every item at local \
grocery prices. For expensive items, suggest cheaper alternatives with similar calories \
and protein, each with its own nutrition and cost. Alternatives must respect the \
allergies, avoid list and diet type.";

#[derive(Debug, Deserialize)]
struct Alternative {
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
    cost: f64,
}

fn one() -> f64 {
    1.0
}

fn serving() -> String {
    "serving".to_owned()
}

#[derive(Debug, Deserialize)]
struct Quote {
    item: String,
    cost: f64,
    #[serde(default)]
    alternatives: Vec<Alternative>,
}

#[derive(Debug, Deserialize)]
struct Answer {
    prices: Vec<Quote>,
}

/// First occurrence of every distinct item, keyed by normalized name.
fn distinct_items(days: &[Day]) -> Vec<(String, &MealItem)> {
    let mut seen = BTreeSet::new();
    all_items(days)
        .filter_map(|item| {
            let key = food::normalize(&item.name);
            seen.insert(key.clone()).then_some((key, item))
        })
        .collect()
}

fn exclusion_reason(name: &str, c: &EffectiveConstraints) -> Option<String> {
    if let Some(allergen) = food::first_conflict(name, &c.allergies) {
        return Some(format!("{allergen} allergy"));
    }
    if let Some(reason) = food::diet_violation(name, c.diet_type) {
        return Some(format!("{reason} on a {} diet", c.diet_type));
    }
    food::first_conflict(name, &c.avoid).map(|d| format!("avoids {d}"))
}

fn keeps_targets(days: &[Day], target: &NutritionTarget, config: &PlannerConfig) -> bool {
    days.iter().all(|day| {
        let t = day.totals();
        (t.calories - target.calories).abs() <= target.calories * config.calorie_tolerance
            && t.protein_g >= target.protein_g * config.protein_floor
    })
}

fn substitute(days: &[Day], key: &str, alt: &Alternative) -> (Vec<Day>, usize) {
    let mut days = days.to_vec();
    let mut replaced = 0;
    for item in days
        .iter_mut()
        .flat_map(|d| d.meals.iter_mut())
        .flat_map(|m| m.items.iter_mut())
        .filter(|i| food::normalize(&i.name) == key)
    {
        *item = MealItem {
            name: alt.name.clone(),
            quantity: alt.quantity,
            unit: alt.unit.clone(),
            calories: alt.calories,
            protein_g: alt.protein_g,
            carbs_g: alt.carbs_g,
            fat_g: alt.fat_g,
            cost: Some(alt.cost),
        };
        replaced += 1;
    }
    (days, replaced)
}

/// Price the design and bring it under the ceiling.
///
/// Items are substituted highest cost-per-calorie first, each with its
/// cheapest alternative that keeps every day on its calorie and protein
/// targets. When nothing more can be substituted the plan is flagged
/// over budget. Unsafe alternatives make the attempt retryable.
fn optimize(
    answer: Answer,
    design: &MealDesign,
    target: &NutritionTarget,
    c: &EffectiveConstraints,
    config: &PlannerConfig,
) -> Result<PricedPlan, Issue> {
    let mut quotes: HashMap<String, Quote> = HashMap::new();
    for quote in answer.prices {
        if !quote.cost.is_finite() || quote.cost < 0.0 {
            return Err(Issue::malformed(format!(
                "invalid cost {} for {:?}",
                quote.cost, quote.item
            )));
        }
        quotes.insert(food::normalize(&quote.item), quote);
    }

    let mut days = design.days.clone();
    let mut missing = BTreeSet::new();
    for item in days
        .iter_mut()
        .flat_map(|d| d.meals.iter_mut())
        .flat_map(|m| m.items.iter_mut())
    {
        match quotes.get(&food::normalize(&item.name)) {
            Some(q) => item.cost = Some(q.cost),
            None => {
                missing.insert(item.name.clone());
            }
        }
    }
    if !missing.is_empty() {
        return Err(Issue::malformed(format!(
            "no price for: {}",
            missing.into_iter().collect::<Vec<_>>().join(", ")
        )));
    }

    let ceiling = c.budget_ceiling;
    let mut total = total_cost(&days);
    let mut substitutions = Vec::new();
    let mut unsafe_offers = Vec::new();

    if total > ceiling + EPSILON {
        let mut candidates: Vec<(String, f64)> = distinct_items(&days)
            .into_iter()
            .filter_map(|(key, item)| {
                let cost = item.cost?;
                Some((key, cost / item.calories.max(1.0)))
            })
            .collect();
        candidates.sort_by(|a, b| b.1.total_cmp(&a.1).then_with(|| a.0.cmp(&b.0)));

        for (key, _) in candidates {
            if total <= ceiling + EPSILON {
                break;
            }
            let Some(quote) = quotes.get(&key) else {
                continue;
            };

            let mut offers: Vec<&Alternative> = Vec::new();
            for alt in &quote.alternatives {
                if !alt.cost.is_finite() || alt.cost < 0.0 || alt.cost >= quote.cost {
                    continue;
                }
                if let Some(reason) = exclusion_reason(&alt.name, c) {
                    unsafe_offers.push(format!("{:?} for {:?} ({reason})", alt.name, quote.item));
                    continue;
                }
                offers.push(alt);
            }
            offers.sort_by(|a, b| a.cost.total_cmp(&b.cost));

            for alt in offers {
                let (trial, occurrences) = substitute(&days, &key, alt);
                if !keeps_targets(&trial, target, config) {
                    continue;
                }
                let before = total;
                days = trial;
                total = total_cost(&days);
                info!(
                    replaced = %quote.item,
                    with = %alt.name,
                    occurrences,
                    saving = before - total,
                    "substituted cheaper item"
                );
                substitutions.push(Substitution {
                    replaced: quote.item.clone(),
                    with: alt.name.clone(),
                    occurrences,
                    saving: before - total,
                });
                break;
            }
        }
    }

    let over_budget = total > ceiling + EPSILON;
    if over_budget && !unsafe_offers.is_empty() {
        return Err(Issue::invariant(format!(
            "plan costs {total:.2}, over the {ceiling:.2} ceiling, and these alternatives are not allowed: {}",
            unsafe_offers.join("; ")
        )));
    }
    if over_budget {
        warn!(
            total,
            ceiling, "no substitution keeps the nutrition targets; flagging plan over budget"
        );
    }

    Ok(PricedPlan {
        days,
        total_cost: total,
        budget_ceiling: ceiling,
        over_budget,
        substitutions,
    })
}

/// The "budget" stage.
pub struct BudgetStage;

#[async_trait]
impl Stage for BudgetStage {
    type Output = PricedPlan;

    fn kind(&self) -> StageKind {
        StageKind::BudgetOptimization
    }

    async fn attempt(&self, input: &StageInput<'_>) -> StageOutcome<PricedPlan> {
        let (Some(target), Some(design)) = (
            input.artifacts.targets.as_ref(),
            input.artifacts.design.as_ref(),
        ) else {
            return StageOutcome::Fatal(Issue::malformed("targets or meal design missing"));
        };
        let c = &input.planning.constraints;

        let items: Vec<_> = distinct_items(&design.days)
            .into_iter()
            .map(|(_, item)| {
                json!({
                    "name": item.name,
                    "quantity": item.quantity,
                    "unit": item.unit,
                    "calories": item.calories,
                    "protein_g": item.protein_g,
                })
            })
            .collect();

        let request = GenerationRequest::new(
            Task::Pricing,
            "a frugal grocery shopper",
            INSTRUCTIONS,
            json!({
                "budget_ceiling": c.budget_ceiling,
                "days": c.days,
                "items": items,
                "allergies": c.allergies,
                "avoid": c.avoid,
                "diet_type": c.diet_type,
            }),
            SCHEMA,
        );

        let result = async {
            let answer: Answer = input.ask(request).await?;
            optimize(answer, design, target, c, input.config)
        }
        .await;
        result.into()
    }
}
