//! Database query functions for the `user_profiles` table.

use anyhow::{Context, Result};
use sqlx::PgPool;

use crate::models::{ActivityLevel, DietType, Goal, Sex, UserProfile};

/// Parameters for creating or replacing a profile.
#[derive(Debug, Clone)]
pub struct NewProfile<'a> {
    pub user_id: &'a str,
    pub display_name: Option<&'a str>,
    pub age: i32,
    pub sex: Sex,
    pub height_cm: f64,
    pub weight_kg: f64,
    pub goal_weight_kg: Option<f64>,
    pub activity: ActivityLevel,
    pub goal: Goal,
    pub diet_type: DietType,
    pub allergies: &'a [String],
    pub dislikes: &'a [String],
    pub cuisine: Option<&'a str>,
    pub budget_ceiling: f64,
    pub meals_per_day: i32,
    pub plan_days: i32,
}

/// Insert a profile or overwrite every mutable field of an existing one.
/// `created_at` survives the overwrite.
pub async fn upsert_profile(pool: &PgPool, new: &NewProfile<'_>) -> Result<UserProfile> {
    let profile = sqlx::query_as::<_, UserProfile>(
        "INSERT INTO user_profiles \
         (user_id, display_name, age, sex, height_cm, weight_kg, goal_weight_kg, activity, \
          goal, diet_type, allergies, dislikes, cuisine, budget_ceiling, meals_per_day, plan_days) \
         VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16) \
         ON CONFLICT (user_id) DO UPDATE SET \
            display_name = EXCLUDED.display_name, \
            age = EXCLUDED.age, \
            sex = EXCLUDED.sex, \
            height_cm = EXCLUDED.height_cm, \
            weight_kg = EXCLUDED.weight_kg, \
            goal_weight_kg = EXCLUDED.goal_weight_kg, \
            activity = EXCLUDED.activity, \
            goal = EXCLUDED.goal, \
            diet_type = EXCLUDED.diet_type, \
            allergies = EXCLUDED.allergies, \
            dislikes = EXCLUDED.dislikes, \
            cuisine = EXCLUDED.cuisine, \
            budget_ceiling = EXCLUDED.budget_ceiling, \
            meals_per_day = EXCLUDED.meals_per_day, \
            plan_days = EXCLUDED.plan_days, \
            updated_at = now() \
         RETURNING *",
    )
    .bind(new.user_id)
    .bind(new.display_name)
    .bind(new.age)
    .bind(new.sex)
    .bind(new.height_cm)
    .bind(new.weight_kg)
    .bind(new.goal_weight_kg)
    .bind(new.activity)
    .bind(new.goal)
    .bind(new.diet_type)
    .bind(new.allergies)
    .bind(new.dislikes)
    .bind(new.cuisine)
    .bind(new.budget_ceiling)
    .bind(new.meals_per_day)
    .bind(new.plan_days)
    .fetch_one(pool)
    .await
    .with_context(|| format!("failed to upsert profile {:?}", new.user_id))?;

    Ok(profile)
}

/// Fetch a profile by user id.
pub async fn get_profile(pool: &PgPool, user_id: &str) -> Result<Option<UserProfile>> {
    let profile =
        sqlx::query_as::<_, UserProfile>("SELECT * FROM user_profiles WHERE user_id = $1")
            .bind(user_id)
            .fetch_optional(pool)
            .await
            .context("failed to fetch profile")?;

    Ok(profile)
}

/// List all profiles ordered by user id.
pub async fn list_profiles(pool: &PgPool) -> Result<Vec<UserProfile>> {
    let profiles =
        sqlx::query_as::<_, UserProfile>("SELECT * FROM user_profiles ORDER BY user_id")
            .fetch_all(pool)
            .await
            .context("failed to list profiles")?;

    Ok(profiles)
}
