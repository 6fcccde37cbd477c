//! Free text to structured constraint deltas.

use std::sync::Arc;
use std::time::Duration;

use serde_json::json;
use tracing::{info, warn};

use crate::generator::{
    GenerationError, GenerationRequest, Generator, OutputSchema, Task, decode, invoke_checked,
};
use crate::model::{BudgetDirective, Constraints, ConstraintsDelta};

/// The extractor could not get a usable delta, even with the stricter
/// retry. The user should rephrase.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
#[error("could not understand the feedback, please rephrase ({reason})")]
pub struct ExtractionFailed {
    pub reason: String,
}

const SCHEMA: OutputSchema = OutputSchema {
    name: "constraints_delta",
    schema: r#"{
        "type": "object",
        "required": ["allergies", "avoid", "include", "limit"],
        "properties": {
            "budget": {
                "type": ["object", "null"],
                "required": ["direction"],
                "properties": {
                    "direction": {"enum": ["target", "decrease", "increase", "maintain"]},
                    "amount": {"type": "number"}
                }
            },
            "allergies": {"type": "array", "items": {"type": "string"}},
            "avoid": {"type": "array", "items": {"type": "string"}},
            "remove_dislikes": {"type": "array", "items": {"type": "string"}},
            "include": {"type": "array", "items": {"type": "string"}},
            "limit": {"type": "array", "items": {"type": "string"}},
            "days": {"type": ["integer", "null"], "minimum": 0, "maximum": 255},
            "meals_per_day": {"type": ["integer", "null"], "minimum": 0, "maximum": 255},
            "goal": {"enum": ["weight_loss", "maintain", "weight_gain", null]},
            "notes": {"type": ["string", "null"]}
        }
    }"#,
    example: r#"{"budget": {"direction": "decrease"}, "allergies": ["shellfish"], "avoid": [], "remove_dislikes": [], "include": [], "limit": ["egg"], "days": null, "meals_per_day": null, "goal": null, "notes": null}"#,
};

const INSTRUCTIONS: &str = "Extract what the user's message changes about their meal plan.\n\
- budget: {\"direction\": \"target\", \"amount\": N} for an explicit total, \
\"decrease\" for cheaper, \"increase\" for more expensive, \"maintain\" to keep it; null if not mentioned\n\
- allergies: newly declared allergies\n\
- avoid: foods they no longer want\n\
- remove_dislikes: foods they previously disliked but now accept\n\
- include: foods they want added\n\
- limit: foods there is too much of\n\
- days (1-7), meals_per_day (1-6), goal (weight_loss|maintain|weight_gain): only if stated\n\
- notes: any other preference, as one sentence\n\
Only report what the message says. Never drop an existing allergy.";

/// Turns utterances into [`ConstraintsDelta`]s.
#[derive(Clone)]
pub struct ConstraintExtractor {
    generator: Arc<dyn Generator>,
    timeout: Duration,
}

impl ConstraintExtractor {
    pub fn new(generator: Arc<dyn Generator>, timeout: Duration) -> Self {
        Self { generator, timeout }
    }

    /// Extract a delta, retrying once in strict mode when the first answer
    /// is unusable.
    pub async fn extract(
        &self,
        utterance: &str,
        current: &Constraints,
    ) -> Result<ConstraintsDelta, ExtractionFailed> {
        let base = GenerationRequest::new(
            Task::ExtractConstraints,
            "a dietitian's assistant who turns requests into structured changes",
            INSTRUCTIONS,
            json!({ "utterance": utterance, "current": current }),
            SCHEMA,
        );

        let mut problems: Vec<String> = Vec::new();
        for attempt in 0..2 {
            let request = base.clone().retry(attempt, &problems);
            match self.attempt(&request).await {
                Ok(delta) => {
                    info!(attempt, empty = delta.is_empty(), "extracted constraints");
                    return Ok(delta);
                }
                Err(e) => {
                    warn!(attempt, error = %e, "constraint extraction attempt failed");
                    problems.push(e.to_string());
                }
            }
        }
        Err(ExtractionFailed {
            reason: problems.pop().unwrap_or_default(),
        })
    }

    async fn attempt(
        &self,
        request: &GenerationRequest,
    ) -> Result<ConstraintsDelta, GenerationError> {
        let value = invoke_checked(self.generator.as_ref(), request, self.timeout).await?;
        let delta: ConstraintsDelta = decode(&SCHEMA, value)?;
        validate(&delta).map_err(|detail| GenerationError::schema(SCHEMA.name, detail))?;
        Ok(delta)
    }
}

fn validate(delta: &ConstraintsDelta) -> Result<(), String> {
    if let Some(days) = delta.days {
        if !(1..=7).contains(&days) {
            return Err(format!("days must be 1-7, got {days}"));
        }
    }
    if let Some(meals) = delta.meals_per_day {
        if !(1..=6).contains(&meals) {
            return Err(format!("meals_per_day must be 1-6, got {meals}"));
        }
    }
    if let Some(BudgetDirective::Target { amount }) = delta.budget {
        if !amount.is_finite() || amount <= 0.0 {
            return Err(format!("budget target must be positive, got {amount}"));
        }
    }
    Ok(())
}
