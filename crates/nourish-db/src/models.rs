use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

// ---------------------------------------------------------------------------
// Enums
// ---------------------------------------------------------------------------

/// Error returned when a stored or user-supplied string does not name a
/// known enum variant.
#[derive(Debug, Clone, thiserror::Error)]
#[error("invalid {kind}: {value:?}")]
pub struct ParseEnumError {
    pub kind: &'static str,
    pub value: String,
}

impl ParseEnumError {
    fn new(kind: &'static str, value: &str) -> Self {
        Self {
            kind,
            value: value.to_owned(),
        }
    }
}

/// Biological sex, used only for the metabolic rate equation and the
/// calorie safety floor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "text", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum Sex {
    Male,
    Female,
}

impl fmt::Display for Sex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Male => "male",
            Self::Female => "female",
        };
        f.write_str(s)
    }
}

impl FromStr for Sex {
    type Err = ParseEnumError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "male" => Ok(Self::Male),
            "female" => Ok(Self::Female),
            other => Err(ParseEnumError::new("sex", other)),
        }
    }
}

// ---------------------------------------------------------------------------

/// Habitual activity level.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "text", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum ActivityLevel {
    Sedentary,
    Light,
    Moderate,
    VeryActive,
}

impl ActivityLevel {
    /// Multiplier applied to the basal metabolic rate.
    pub fn multiplier(self) -> f64 {
        match self {
            Self::Sedentary => 1.2,
            Self::Light => 1.375,
            Self::Moderate => 1.55,
            Self::VeryActive => 1.9,
        }
    }
}

impl fmt::Display for ActivityLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Sedentary => "sedentary",
            Self::Light => "light",
            Self::Moderate => "moderate",
            Self::VeryActive => "very_active",
        };
        f.write_str(s)
    }
}

impl FromStr for ActivityLevel {
    type Err = ParseEnumError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "sedentary" => Ok(Self::Sedentary),
            "light" => Ok(Self::Light),
            "moderate" => Ok(Self::Moderate),
            "very_active" => Ok(Self::VeryActive),
            other => Err(ParseEnumError::new("activity level", other)),
        }
    }
}

// ---------------------------------------------------------------------------

/// Body-weight goal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "text", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum Goal {
    WeightLoss,
    Maintain,
    WeightGain,
}

impl fmt::Display for Goal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::WeightLoss => "weight_loss",
            Self::Maintain => "maintain",
            Self::WeightGain => "weight_gain",
        };
        f.write_str(s)
    }
}

impl FromStr for Goal {
    type Err = ParseEnumError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "weight_loss" | "lose" => Ok(Self::WeightLoss),
            "maintain" => Ok(Self::Maintain),
            "weight_gain" | "gain" => Ok(Self::WeightGain),
            other => Err(ParseEnumError::new("goal", other)),
        }
    }
}

// ---------------------------------------------------------------------------

/// Dietary pattern. Each variant excludes a fixed family of ingredients.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "text", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum DietType {
    Omnivore,
    Eggetarian,
    Vegetarian,
    Vegan,
}

impl fmt::Display for DietType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Omnivore => "omnivore",
            Self::Eggetarian => "eggetarian",
            Self::Vegetarian => "vegetarian",
            Self::Vegan => "vegan",
        };
        f.write_str(s)
    }
}

impl FromStr for DietType {
    type Err = ParseEnumError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "omnivore" | "non_vegetarian" => Ok(Self::Omnivore),
            "eggetarian" => Ok(Self::Eggetarian),
            "vegetarian" => Ok(Self::Vegetarian),
            "vegan" => Ok(Self::Vegan),
            other => Err(ParseEnumError::new("diet type", other)),
        }
    }
}

// ---------------------------------------------------------------------------
// Row structs
// ---------------------------------------------------------------------------

/// A user's durable health profile. Only explicit profile edits write it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow)]
pub struct UserProfile {
    pub user_id: String,
    pub display_name: Option<String>,
    pub age: i32,
    pub sex: Sex,
    pub height_cm: f64,
    pub weight_kg: f64,
    pub goal_weight_kg: Option<f64>,
    pub activity: ActivityLevel,
    pub goal: Goal,
    pub diet_type: DietType,
    pub allergies: Vec<String>,
    pub dislikes: Vec<String>,
    pub cuisine: Option<String>,
    /// Spending ceiling for one plan horizon.
    pub budget_ceiling: f64,
    pub meals_per_day: i32,
    /// Default plan horizon in days (1-7).
    pub plan_days: i32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// An approved plan as persisted. The plan body and its sustainability
/// report are stored as JSON documents owned by the core crate.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct ApprovedPlanRow {
    pub plan_id: Uuid,
    pub user_id: String,
    pub session_id: Uuid,
    pub version: i32,
    pub fingerprint: String,
    pub plan: serde_json::Value,
    pub sustainability: serde_json::Value,
    pub total_cost: f64,
    pub over_budget: bool,
    pub approved_at: DateTime<Utc>,
}

/// One rejection in a refinement chain. Rows are never updated.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct FeedbackRow {
    pub id: Uuid,
    pub user_id: String,
    pub session_id: Uuid,
    pub plan_id: Uuid,
    pub plan_version: i32,
    pub plan_fingerprint: String,
    pub feedback: String,
    pub delta: serde_json::Value,
    pub created_at: DateTime<Utc>,
}

/// A food-diary entry produced by image analysis.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct DiaryEntryRow {
    pub id: i64,
    pub user_id: String,
    pub estimate: serde_json::Value,
    pub co2_kg: Option<f64>,
    pub recorded_at: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
