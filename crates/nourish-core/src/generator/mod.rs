//! Gateway to the language model that does every reasoning step.
//!
//! Callers describe the job as a [`GenerationRequest`]; a [`Generator`]
//! returns a JSON value or a [`GenerationError`]. [`invoke_checked`] adds
//! the call timeout and the JSON Schema check, so stages only deal
//! with domain validation.
//!
//! ```text
//! stage --GenerationRequest--> invoke_checked --> &dyn Generator
//!                                   |                  |
//!                                timeout          ProcessGenerator (subprocess)
//!                                schema check     test fakes
//! ```

pub mod json;
pub mod process;
pub mod vision;

use std::fmt;
use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;
use serde_json::Value;

pub use process::ProcessGenerator;

/// The reasoning step a request belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Task {
    ClassifyIntent,
    ExtractConstraints,
    NutritionTargets,
    MealDesign,
    Pricing,
    Review,
    Sustainability,
    Answer,
}

impl fmt::Display for Task {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::ClassifyIntent => "classify_intent",
            Self::ExtractConstraints => "extract_constraints",
            Self::NutritionTargets => "nutrition_targets",
            Self::MealDesign => "meal_design",
            Self::Pricing => "pricing",
            Self::Review => "review",
            Self::Sustainability => "sustainability",
            Self::Answer => "answer",
        };
        f.write_str(s)
    }
}

/// Shape the generator's JSON answer must have.
#[derive(Debug, Clone, Copy, Serialize)]
pub struct OutputSchema {
    pub name: &'static str,
    /// JSON Schema the answer is validated against. Also sent in the prompt.
    pub schema: &'static str,
    /// A literal example answer, shown to the model.
    pub example: &'static str,
}

impl OutputSchema {
    /// Validate `value` against the JSON Schema, reporting every violation.
    pub fn check(&self, value: &Value) -> Result<(), GenerationError> {
        let schema: Value = serde_json::from_str(self.schema)
            .map_err(|e| GenerationError::schema(self.name, format!("invalid schema: {e}")))?;
        let validator = jsonschema::validator_for(&schema)
            .map_err(|e| GenerationError::schema(self.name, format!("invalid schema: {e}")))?;
        let errors: Vec<String> = validator
            .iter_errors(value)
            .map(|e| format!("{}: {}", e.instance_path, e))
            .collect();
        if errors.is_empty() {
            Ok(())
        } else {
            Err(GenerationError::schema(self.name, errors.join("; ")))
        }
    }
}

/// One call to the generator.
#[derive(Debug, Clone, Serialize)]
pub struct GenerationRequest {
    pub task: Task,
    /// Who the model should act as.
    pub persona: &'static str,
    pub instructions: String,
    /// Structured inputs for this step.
    pub context: Value,
    pub schema: OutputSchema,
    /// Zero-based attempt number; later attempts get stricter wording.
    pub attempt: u32,
    /// Problems with earlier attempts, oldest first.
    pub feedback: Vec<String>,
}

impl GenerationRequest {
    pub fn new(
        task: Task,
        persona: &'static str,
        instructions: impl Into<String>,
        context: Value,
        schema: OutputSchema,
    ) -> Self {
        Self {
            task,
            persona,
            instructions: instructions.into(),
            context,
            schema,
            attempt: 0,
            feedback: Vec::new(),
        }
    }

    /// Same request as a retry with the given failure history.
    pub fn retry(mut self, attempt: u32, feedback: &[String]) -> Self {
        self.attempt = attempt;
        self.feedback = feedback.to_vec();
        self
    }

    /// Render the request as a single prompt.
    pub fn render_prompt(&self) -> String {
        let mut out = String::new();
        out.push_str(&format!("You are {}.\n\n", self.persona));
        out.push_str(&self.instructions);
        out.push_str("\n\n## Input\n\n```json\n");
        out.push_str(
            &serde_json::to_string_pretty(&self.context).unwrap_or_else(|_| "{}".to_owned()),
        );
        out.push_str("\n```\n\n## Output\n\n");
        out.push_str(&format!(
            "Answer with one JSON object ({}) valid against this JSON Schema:\n\n\
             ```json\n{}\n```\n\nExample:\n{}\n",
            self.schema.name, self.schema.schema, self.schema.example
        ));

        if !self.feedback.is_empty() {
            out.push_str("\n## Problems With Previous Attempts\n\n");
            for (i, problem) in self.feedback.iter().enumerate() {
                out.push_str(&format!("{}. {problem}\n", i + 1));
            }
            out.push_str("\nFix every problem listed above.\n");
        }
        if self.attempt > 0 {
            out.push_str(
                "\nSTRICT MODE: output only the JSON object. No prose, no markdown fences, \
                 no keys other than the ones listed.\n",
            );
        }
        out
    }
}

/// Ways a generator call can fail.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum GenerationError {
    #[error("generator timed out after {0:?}")]
    Timeout(Duration),

    #[error("output does not match {schema}: {detail}")]
    SchemaViolation { schema: &'static str, detail: String },

    #[error("provider error: {0}")]
    ProviderError(String),
}

impl GenerationError {
    pub fn schema(schema: &'static str, detail: impl Into<String>) -> Self {
        Self::SchemaViolation {
            schema,
            detail: detail.into(),
        }
    }
}

/// A model provider.
#[async_trait]
pub trait Generator: Send + Sync {
    /// Short name used in logs.
    fn name(&self) -> &str;

    /// Run one request. Implementations return the parsed JSON answer and
    /// leave schema checks to [`invoke_checked`].
    async fn invoke(&self, request: &GenerationRequest) -> Result<Value, GenerationError>;
}

const _: () = {
    fn _assert_object_safe(_: &dyn Generator) {}
};

/// Invoke with a timeout and the request's schema check.
pub async fn invoke_checked(
    generator: &dyn Generator,
    request: &GenerationRequest,
    timeout: Duration,
) -> Result<Value, GenerationError> {
    let value = match tokio::time::timeout(timeout, generator.invoke(request)).await {
        Ok(result) => result?,
        Err(_) => {
            tracing::warn!(
                generator = generator.name(),
                task = %request.task,
                ?timeout,
                "generator call timed out"
            );
            return Err(GenerationError::Timeout(timeout));
        }
    };
    request.schema.check(&value)?;
    Ok(value)
}

/// Deserialize a checked value into a typed answer.
pub fn decode<T: serde::de::DeserializeOwned>(
    schema: &OutputSchema,
    value: Value,
) -> Result<T, GenerationError> {
    serde_json::from_value(value).map_err(|e| GenerationError::schema(schema.name, e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    const SCHEMA: OutputSchema = OutputSchema {
        name: "pair",
        schema: r#"{
            "type": "object",
            "required": ["a", "b"],
            "properties": {
                "a": {"type": "number"},
                "b": {"type": "number"},
                "note": {"type": ["string", "null"]}
            }
        }"#,
        example: r#"{"a": 1, "b": 2}"#,
    };

    struct Sleepy;

    #[async_trait]
    impl Generator for Sleepy {
        fn name(&self) -> &str {
            "sleepy"
        }

        async fn invoke(&self, _request: &GenerationRequest) -> Result<Value, GenerationError> {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok(json!({"a": 1, "b": 2}))
        }
    }

    struct Echo(Value);

    #[async_trait]
    impl Generator for Echo {
        fn name(&self) -> &str {
            "echo"
        }

        async fn invoke(&self, _request: &GenerationRequest) -> Result<Value, GenerationError> {
            Ok(self.0.clone())
        }
    }

    fn request() -> GenerationRequest {
        GenerationRequest::new(Task::Answer, "a tester", "Say hi.", json!({}), SCHEMA)
    }

    #[test]
    fn schema_reports_missing_keys() {
        let err = SCHEMA.check(&json!({"a": 1})).unwrap_err();
        let GenerationError::SchemaViolation { schema, detail } = &err else {
            panic!("expected a schema violation, got {err:?}");
        };
        assert_eq!(*schema, "pair");
        assert!(detail.contains("\"b\""), "{detail}");
        assert!(SCHEMA.check(&json!([1, 2])).is_err());
    }

    #[test]
    fn schema_rejects_wrong_types_anywhere() {
        assert!(SCHEMA.check(&json!({"a": "one", "b": 2})).is_err());
        assert!(SCHEMA.check(&json!({"a": 1, "b": 2, "note": 3})).is_err());
        assert!(SCHEMA.check(&json!({"a": 1, "b": 2.5, "note": null})).is_ok());
        assert!(SCHEMA.check(&json!({"a": 1, "b": 2, "extra": true})).is_ok());
    }

    #[test]
    fn prompt_carries_the_json_schema() {
        let prompt = request().render_prompt();
        assert!(prompt.contains("JSON Schema"));
        assert!(prompt.contains(r#""required": ["a", "b"]"#));
        assert!(prompt.contains(r#"{"a": 1, "b": 2}"#));
    }

    #[test]
    fn retry_prompt_lists_previous_problems() {
        let prompt = request()
            .retry(1, &["contained peanut".to_owned()])
            .render_prompt();
        assert!(prompt.contains("## Problems With Previous Attempts"));
        assert!(prompt.contains("1. contained peanut"));
        assert!(prompt.contains("STRICT MODE"));
        assert!(!request().render_prompt().contains("STRICT MODE"));
    }

    #[tokio::test]
    async fn timeout_maps_to_timeout_error() {
        let err = invoke_checked(&Sleepy, &request(), Duration::from_millis(20))
            .await
            .unwrap_err();
        assert!(matches!(err, GenerationError::Timeout(_)));
    }

    #[tokio::test]
    async fn checked_invoke_rejects_incomplete_answers() {
        let err = invoke_checked(&Echo(json!({"a": 1})), &request(), Duration::from_secs(1))
            .await
            .unwrap_err();
        assert!(matches!(err, GenerationError::SchemaViolation { .. }));

        let err = invoke_checked(
            &Echo(json!({"a": 1, "b": [2]})),
            &request(),
            Duration::from_secs(1),
        )
        .await
        .unwrap_err();
        assert!(matches!(err, GenerationError::SchemaViolation { .. }));

        let ok = invoke_checked(&Echo(json!({"a": 1, "b": 2})), &request(), Duration::from_secs(1))
            .await
            .unwrap();
        assert_eq!(ok["b"], 2);
    }

    #[test]
    fn generator_is_object_safe() {
        let g: Box<dyn Generator> = Box::new(Echo(json!(null)));
        assert_eq!(g.name(), "echo");
    }
}
