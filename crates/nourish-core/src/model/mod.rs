//! Domain data model shared by the stages, the controller and the store.

pub mod constraints;
pub mod feedback;
pub mod food;
pub mod nutrition;
pub mod plan;
pub mod sustainability;

use serde::Serialize;
use sha2::{Digest, Sha256};

pub use constraints::{BudgetDirective, Constraints, ConstraintsDelta, EffectiveConstraints};
pub use feedback::FeedbackRecord;
pub use nourish_db::models::{ActivityLevel, DietType, Goal, Sex, UserProfile};
pub use nutrition::{CalorieBand, DailyTotals, NutritionTarget};
pub use plan::{
    Day, GroceryLine, GroceryList, Meal, MealDesign, MealItem, MealPlan, PricedPlan, Substitution,
};
pub use sustainability::{Impact, ReportSource, SustainabilityReport};

/// Hex SHA-256 of a value's JSON encoding.
pub fn fingerprint<T: Serialize + ?Sized>(value: &T) -> String {
    let bytes = serde_json::to_vec(value).unwrap_or_default();
    hex::encode(Sha256::digest(&bytes))
}

/// A completed pipeline run: the plan and its footprint.
#[derive(Debug, Clone, PartialEq, Serialize, serde::Deserialize)]
pub struct PlanBundle {
    pub plan: MealPlan,
    pub report: SustainabilityReport,
}
