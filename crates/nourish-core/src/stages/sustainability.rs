//! Carbon footprint scoring. Advisory only: the pipeline substitutes the
//! table-based heuristic when this stage cannot produce a report.

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;

use super::{Issue, Stage, StageInput, StageKind, StageOutcome};
use crate::generator::{GenerationRequest, OutputSchema, Task};
use crate::model::sustainability::estimate_co2_kg;
use crate::model::{ReportSource, SustainabilityReport};

const SCHEMA: OutputSchema = OutputSchema {
    name: "sustainability",
    schema: r#"{
        "type": "object",
        "required": ["co2_kg", "score"],
        "properties": {
            "co2_kg": {"type": "number"},
            "score": {"type": "number"},
            "high_emission_items": {"type": "array", "items": {"type": "string"}},
            "swaps": {"type": "array", "items": {"type": "string"}}
        }
    }"#,
    example: r#"{"co2_kg": 9.4, "score": 72, "high_emission_items": ["Paneer tikka"], "swaps": ["Swap paneer for tofu twice a week"]}"#,
};

const INSTRUCTIONS: &str = "Estimate the total CO2 footprint in kg of the grocery list \
and score it from 0 (high impact) to 100 (eco-friendly). Name the highest-emission \
items and suggest practical lower-impact swaps. `heuristic_co2_kg` is a rough table \
estimate you may refine.";

#[derive(Debug, Deserialize)]
struct Answer {
    co2_kg: f64,
    score: f64,
    #[serde(default)]
    high_emission_items: Vec<String>,
    #[serde(default)]
    swaps: Vec<String>,
}

fn check(answer: Answer) -> Result<SustainabilityReport, Issue> {
    if !answer.co2_kg.is_finite() || answer.co2_kg < 0.0 {
        return Err(Issue::malformed(format!(
            "co2_kg must be non-negative, got {}",
            answer.co2_kg
        )));
    }
    if !(0.0..=100.0).contains(&answer.score) {
        return Err(Issue::malformed(format!(
            "score must be between 0 and 100, got {}",
            answer.score
        )));
    }
    Ok(SustainabilityReport {
        co2_kg: Some(answer.co2_kg),
        score: Some(answer.score.round() as u8),
        high_emission_items: answer.high_emission_items,
        swaps: answer.swaps,
        source: ReportSource::Generator,
    })
}

pub struct SustainabilityStage;

#[async_trait]
impl Stage for SustainabilityStage {
    type Output = SustainabilityReport;

    fn kind(&self) -> StageKind {
        StageKind::Sustainability
    }

    async fn attempt(&self, input: &StageInput<'_>) -> StageOutcome<SustainabilityReport> {
        let Some(plan) = input.artifacts.plan.as_ref() else {
            return StageOutcome::Fatal(Issue::malformed("validated plan missing"));
        };

        let request = GenerationRequest::new(
            Task::Sustainability,
            "an environmental food scientist",
            INSTRUCTIONS,
            json!({
                "grocery": plan.grocery.lines,
                "heuristic_co2_kg": estimate_co2_kg(&plan.grocery),
            }),
            SCHEMA,
        );

        let result = async {
            let answer: Answer = input.ask(request).await?;
            check(answer)
        }
        .await;
        result.into()
    }
}
