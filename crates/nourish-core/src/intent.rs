//! Utterance classification.

use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{debug, warn};

use crate::generator::{
    GenerationRequest, Generator, OutputSchema, Task, decode, invoke_checked,
};

/// What the user wants from an utterance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Intent {
    /// Build a fresh plan, optionally with horizon hints.
    NewPlanRequest {
        days: Option<u8>,
        meals_per_day: Option<u8>,
    },
    /// Criticism of the plan on the table.
    RefinementFeedback,
    GeneralQuestion,
    Unrecognized,
}

/// The parts of session state that change how an utterance reads.
#[derive(Debug, Clone, Copy, Default)]
pub struct SessionView {
    pub has_plan: bool,
    pub awaiting_approval: bool,
}

const SCHEMA: OutputSchema = OutputSchema {
    name: "intent",
    schema: r#"{
        "type": "object",
        "required": ["intent", "confidence"],
        "properties": {
            "intent": {"type": "string"},
            "confidence": {"type": "number"},
            "duration": {"type": ["integer", "null"]},
            "meals_per_day": {"type": ["integer", "null"]}
        }
    }"#,
    example: r#"{"intent": "CREATE_PLAN", "confidence": 0.9, "duration": 3, "meals_per_day": 3}"#,
};

const INSTRUCTIONS: &str = "Classify the user's message. intent is one of:\n\
- CREATE_PLAN: asks for a new meal plan\n\
- REGENERATE_PLAN: criticises or wants changes to the current plan\n\
- ANSWER_DURATION: only states how many days (and maybe meals per day) to plan\n\
- GENERAL_QUESTION: anything else about food, nutrition, or their plan\n\
Set duration (1-7) and meals_per_day (1-6) when the message states them, \
otherwise null. confidence is between 0 and 1.";

/// Confidence below this counts as ambiguous.
const MIN_CONFIDENCE: f64 = 0.5;

#[derive(Debug, Deserialize)]
struct Answer {
    intent: String,
    confidence: f64,
    #[serde(default)]
    duration: Option<i64>,
    #[serde(default)]
    meals_per_day: Option<i64>,
}

#[derive(Clone)]
pub struct IntentClassifier {
    generator: Arc<dyn Generator>,
    timeout: Duration,
}

impl IntentClassifier {
    pub fn new(generator: Arc<dyn Generator>, timeout: Duration) -> Self {
        Self { generator, timeout }
    }

    /// Classify an utterance. Never fails: anything unusable from the
    /// generator yields [`Intent::Unrecognized`].
    pub async fn classify(&self, utterance: &str, session: SessionView) -> Intent {
        let utterance = utterance.trim();
        if utterance.is_empty() {
            return Intent::Unrecognized;
        }

        let request = GenerationRequest::new(
            Task::ClassifyIntent,
            "the intake assistant of a meal-planning service",
            INSTRUCTIONS,
            json!({
                "utterance": utterance,
                "has_plan": session.has_plan,
                "awaiting_approval": session.awaiting_approval,
            }),
            SCHEMA,
        );

        let answer: Answer = match invoke_checked(self.generator.as_ref(), &request, self.timeout)
            .await
            .and_then(|v| decode(&SCHEMA, v))
        {
            Ok(a) => a,
            Err(e) => {
                warn!(error = %e, "intent classification failed, treating as unrecognized");
                return Intent::Unrecognized;
            }
        };

        let intent = interpret(&answer, session);
        debug!(
            label = %answer.intent,
            confidence = answer.confidence,
            ?intent,
            "classified utterance"
        );
        intent
    }
}

fn bounded(value: Option<i64>, max: i64) -> Option<u8> {
    value
        .filter(|v| (1..=max).contains(v))
        .and_then(|v| u8::try_from(v).ok())
}

fn interpret(answer: &Answer, session: SessionView) -> Intent {
    if !answer.confidence.is_finite() || answer.confidence < MIN_CONFIDENCE {
        return Intent::Unrecognized;
    }
    let days = bounded(answer.duration, 7);
    let meals_per_day = bounded(answer.meals_per_day, 6);

    match answer.intent.trim().to_ascii_uppercase().as_str() {
        "CREATE_PLAN" | "NEW_PLAN_REQUEST" => Intent::NewPlanRequest { days, meals_per_day },
        "ANSWER_DURATION" if days.is_some() => Intent::NewPlanRequest { days, meals_per_day },
        "REGENERATE_PLAN" | "REFINEMENT_FEEDBACK" => {
            if session.has_plan {
                Intent::RefinementFeedback
            } else {
                Intent::NewPlanRequest { days, meals_per_day }
            }
        }
        "GENERAL_QUESTION" => Intent::GeneralQuestion,
        _ => Intent::Unrecognized,
    }
}
