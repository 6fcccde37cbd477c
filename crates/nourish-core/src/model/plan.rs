use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::food;
use super::nutrition::{DailyTotals, NutritionTarget};

/// One line of a meal.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MealItem {
    pub name: String,
    pub quantity: f64,
    pub unit: String,
    pub calories: f64,
    pub protein_g: f64,
    #[serde(default)]
    pub carbs_g: f64,
    #[serde(default)]
    pub fat_g: f64,
    /// Estimated cost of this line; set by the budget stage.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cost: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Meal {
    pub name: String,
    pub items: Vec<MealItem>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Day {
    /// 1-based position in the plan.
    pub day: u32,
    pub meals: Vec<Meal>,
}

impl Day {
    pub fn items(&self) -> impl Iterator<Item = &MealItem> {
        self.meals.iter().flat_map(|m| m.items.iter())
    }

    pub fn totals(&self) -> DailyTotals {
        self.items().fold(
            DailyTotals {
                day: self.day,
                calories: 0.0,
                protein_g: 0.0,
                carbs_g: 0.0,
                fat_g: 0.0,
                cost: 0.0,
            },
            |mut acc, item| {
                acc.calories += item.calories;
                acc.protein_g += item.protein_g;
                acc.carbs_g += item.carbs_g;
                acc.fat_g += item.fat_g;
                acc.cost += item.cost.unwrap_or(0.0);
                acc
            },
        )
    }
}

/// Every item across a sequence of days.
pub fn all_items(days: &[Day]) -> impl Iterator<Item = &MealItem> {
    days.iter().flat_map(Day::items)
}

/// Sum of line costs across days.
pub fn total_cost(days: &[Day]) -> f64 {
    all_items(days).map(|i| i.cost.unwrap_or(0.0)).sum()
}

/// Output of the meal design stage: unpriced days.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MealDesign {
    pub days: Vec<Day>,
}

/// A replacement made to bring the plan under budget.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Substitution {
    pub replaced: String,
    pub with: String,
    pub occurrences: usize,
    pub saving: f64,
}

/// Output of the budget stage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PricedPlan {
    pub days: Vec<Day>,
    pub total_cost: f64,
    pub budget_ceiling: f64,
    pub over_budget: bool,
    pub substitutions: Vec<Substitution>,
}

/// Aggregated shopping line.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GroceryLine {
    pub name: String,
    pub quantity: f64,
    pub unit: String,
    pub occurrences: usize,
    pub total_cost: f64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GroceryList {
    pub lines: Vec<GroceryLine>,
    pub total_cost: f64,
}

impl GroceryList {
    /// Aggregate items by normalized name and unit, ordered by name.
    pub fn from_days(days: &[Day]) -> Self {
        let mut lines: BTreeMap<(String, String), GroceryLine> = BTreeMap::new();
        for item in all_items(days) {
            let key = (food::normalize(&item.name), food::normalize(&item.unit));
            let line = lines.entry(key).or_insert_with(|| GroceryLine {
                name: item.name.clone(),
                quantity: 0.0,
                unit: item.unit.clone(),
                occurrences: 0,
                total_cost: 0.0,
            });
            line.quantity += item.quantity;
            line.occurrences += 1;
            line.total_cost += item.cost.unwrap_or(0.0);
        }
        let lines: Vec<GroceryLine> = lines.into_values().collect();
        let total_cost = lines.iter().map(|l| l.total_cost).sum();
        Self { lines, total_cost }
    }
}

/// A complete, validated plan version.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MealPlan {
    pub id: Uuid,
    pub session_id: Uuid,
    pub version: u32,
    pub days: Vec<Day>,
    pub target: NutritionTarget,
    pub daily: Vec<DailyTotals>,
    pub grocery: GroceryList,
    pub total_cost: f64,
    pub budget_ceiling: f64,
    pub over_budget: bool,
    pub substitutions: Vec<Substitution>,
    pub summary: String,
    pub verdict: String,
    pub warnings: Vec<String>,
    pub created_at: DateTime<Utc>,
}

impl MealPlan {
    /// Amount by which the plan exceeds its ceiling (zero when within).
    pub fn overage(&self) -> f64 {
        (self.total_cost - self.budget_ceiling).max(0.0)
    }

    /// Content fingerprint over everything except identity and timestamps.
    pub fn fingerprint(&self) -> String {
        super::fingerprint(&(
            &self.days,
            &self.target,
            self.total_cost,
            self.budget_ceiling,
            self.over_budget,
        ))
    }

    pub fn average_daily_cost(&self) -> f64 {
        if self.days.is_empty() {
            0.0
        } else {
            self.total_cost / self.days.len() as f64
        }
    }
}
