use serde::{Deserialize, Serialize};

/// Inclusive calorie range considered safe for a profile and goal.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CalorieBand {
    pub min: f64,
    pub max: f64,
}

impl CalorieBand {
    pub fn contains(&self, kcal: f64) -> bool {
        kcal >= self.min && kcal <= self.max
    }

    pub fn clamp(&self, kcal: f64) -> f64 {
        kcal.clamp(self.min, self.max)
    }
}

/// Daily calorie and macro targets.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NutritionTarget {
    pub calories: f64,
    pub protein_g: f64,
    pub carbs_g: f64,
    pub fat_g: f64,
    pub bmr: f64,
    pub tdee: f64,
    pub band: CalorieBand,
    #[serde(default)]
    pub rationale: String,
}

/// Totals for one day of a plan.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DailyTotals {
    pub day: u32,
    pub calories: f64,
    pub protein_g: f64,
    pub carbs_g: f64,
    pub fat_g: f64,
    pub cost: f64,
}
