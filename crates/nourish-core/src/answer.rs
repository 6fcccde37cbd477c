//! Answers to general questions, grounded in the user's memory.

use std::sync::Arc;
use std::time::Duration;

use serde::Deserialize;
use serde_json::json;
use tracing::warn;

use crate::generator::{GenerationRequest, Generator, OutputSchema, Task, decode, invoke_checked};
use crate::memory::MemorySnapshot;

/// Reply used when the generator cannot answer.
pub const FALLBACK_ANSWER: &str =
    "Sorry, I couldn't answer that right now. Please try asking again in a moment.";

const SCHEMA: OutputSchema = OutputSchema {
    name: "answer",
    schema: r#"{
        "type": "object",
        "required": ["answer"],
        "properties": {"answer": {"type": "string"}}
    }"#,
    example: r#"{"answer": "Dal and brown rice together give you a complete protein."}"#,
};

const INSTRUCTIONS: &str = "Answer the user's question in a short, friendly paragraph. \
Use their profile, their approved plan and their recent food diary when relevant. \
Do not give medical diagnoses; suggest seeing a doctor for medical concerns.";

#[derive(Deserialize)]
struct Answer {
    answer: String,
}

/// Answer `question` with the snapshot as context. Never fails.
pub async fn answer_question(
    generator: &Arc<dyn Generator>,
    timeout: Duration,
    question: &str,
    snapshot: &MemorySnapshot,
) -> String {
    let request = GenerationRequest::new(
        Task::Answer,
        "a friendly nutrition assistant",
        INSTRUCTIONS,
        json!({
            "question": question,
            "profile": snapshot.profile,
            "approved_plan": snapshot.latest_plan.as_ref().map(|p| &p.plan),
            "recent_diary": snapshot.recent_diary,
        }),
        SCHEMA,
    );

    match invoke_checked(generator.as_ref(), &request, timeout)
        .await
        .and_then(|v| decode::<Answer>(&SCHEMA, v))
    {
        Ok(a) if !a.answer.trim().is_empty() => a.answer.trim().to_owned(),
        Ok(_) => FALLBACK_ANSWER.to_owned(),
        Err(e) => {
            warn!(error = %e, "question answering failed");
            FALLBACK_ANSWER.to_owned()
        }
    }
}
