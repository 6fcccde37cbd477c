//! `nourish profile` commands: the only way a stored profile changes.

use anyhow::{Context, Result, bail};
use sqlx::PgPool;

use nourish_db::queries::profiles::{self, NewProfile};

use crate::ProfileCommands;
use crate::render;

/// Dispatch a profile subcommand.
pub async fn run_profile_command(command: ProfileCommands, pool: &PgPool) -> Result<()> {
    match command {
        ProfileCommands::Set {
            user,
            name,
            age,
            sex,
            height_cm,
            weight_kg,
            goal_weight_kg,
            activity,
            goal,
            diet,
            allergies,
            dislikes,
            cuisine,
            budget,
            meals_per_day,
            days,
        } => {
            validate_body(age, height_cm, weight_kg, goal_weight_kg)?;
            if !(budget.is_finite() && budget > 0.0) {
                bail!("--budget must be a positive amount, got {budget}");
            }
            let allergies = normalize_terms(&allergies);
            let dislikes = normalize_terms(&dislikes);

            let saved = profiles::upsert_profile(
                pool,
                &NewProfile {
                    user_id: &user,
                    display_name: name.as_deref(),
                    age,
                    sex,
                    height_cm,
                    weight_kg,
                    goal_weight_kg,
                    activity,
                    goal,
                    diet_type: diet,
                    allergies: &allergies,
                    dislikes: &dislikes,
                    cuisine: cuisine.as_deref(),
                    budget_ceiling: budget,
                    meals_per_day,
                    plan_days: days,
                },
            )
            .await?;

            tracing::info!(user_id = %saved.user_id, "profile saved");
            println!("Profile saved.");
            println!("{}", render::profile(&saved));
        }
        ProfileCommands::Show { user } => {
            let profile = profiles::get_profile(pool, &user).await?.with_context(|| {
                format!("no profile for user {user:?}; create one with `nourish profile set`")
            })?;
            println!("{}", render::profile(&profile));
        }
    }
    Ok(())
}

fn validate_body(
    age: i32,
    height_cm: f64,
    weight_kg: f64,
    goal_weight_kg: Option<f64>,
) -> Result<()> {
    if !(13..=120).contains(&age) {
        bail!("--age must be between 13 and 120, got {age}");
    }
    if !(height_cm.is_finite() && (50.0..=272.0).contains(&height_cm)) {
        bail!("--height-cm must be between 50 and 272, got {height_cm}");
    }
    for (flag, kg) in [("--weight-kg", Some(weight_kg)), ("--goal-weight-kg", goal_weight_kg)] {
        if let Some(kg) = kg {
            if !(kg.is_finite() && (20.0..=400.0).contains(&kg)) {
                bail!("{flag} must be between 20 and 400, got {kg}");
            }
        }
    }
    Ok(())
}

/// Lowercase, trim and de-duplicate allergy or dislike terms, keeping the
/// order they were given in.
fn normalize_terms(terms: &[String]) -> Vec<String> {
    let mut out: Vec<String> = Vec::with_capacity(terms.len());
    for term in terms {
        let term = term.trim().to_lowercase();
        if !term.is_empty() && !out.contains(&term) {
            out.push(term);
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn terms_are_trimmed_lowercased_and_unique() {
        let raw = vec![
            " Peanut".to_owned(),
            "shellfish".to_owned(),
            "PEANUT ".to_owned(),
            "".to_owned(),
        ];
        assert_eq!(normalize_terms(&raw), ["peanut", "shellfish"]);
    }

    #[test]
    fn body_measurements_are_range_checked() {
        assert!(validate_body(34, 165.0, 72.0, Some(65.0)).is_ok());
        assert!(validate_body(8, 165.0, 72.0, None).is_err());
        assert!(validate_body(34, 16.5, 72.0, None).is_err());
        let err = validate_body(34, 165.0, 72.0, Some(f64::NAN)).unwrap_err();
        assert!(err.to_string().contains("--goal-weight-kg"));
    }
}
