use serde::{Deserialize, Serialize};

use super::food;
use super::plan::GroceryList;

/// Where a sustainability report's numbers came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReportSource {
    Generator,
    /// The scoring call failed; CO2 is the table estimate and there is no
    /// score.
    Heuristic,
}

/// Carbon footprint of a plan. Never blocks approval.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SustainabilityReport {
    pub co2_kg: Option<f64>,
    /// 0-100, higher is greener. `None` means the score is unavailable.
    pub score: Option<u8>,
    pub high_emission_items: Vec<String>,
    pub swaps: Vec<String>,
    pub source: ReportSource,
}

impl SustainabilityReport {
    /// Table-based fallback used when scoring fails.
    pub fn heuristic(grocery: &GroceryList) -> Self {
        let mut high: Vec<(String, f64)> = grocery
            .lines
            .iter()
            .map(|l| (l.name.clone(), food::serving_co2_kg(&l.name)))
            .filter(|(_, kg)| *kg >= 0.8)
            .collect();
        high.sort_by(|a, b| b.1.total_cmp(&a.1));
        Self {
            co2_kg: Some(estimate_co2_kg(grocery)),
            score: None,
            high_emission_items: high.into_iter().map(|(name, _)| name).collect(),
            swaps: Vec::new(),
            source: ReportSource::Heuristic,
        }
    }

    pub fn impact(&self) -> Option<Impact> {
        self.score.map(Impact::from_score)
    }
}

/// Sum of per-serving table estimates over the grocery list.
pub fn estimate_co2_kg(grocery: &GroceryList) -> f64 {
    grocery
        .lines
        .iter()
        .map(|l| food::serving_co2_kg(&l.name) * l.occurrences as f64)
        .sum()
}

/// Score band.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Impact {
    High,
    Moderate,
    EcoFriendly,
}

impl Impact {
    pub fn from_score(score: u8) -> Self {
        match score {
            0..50 => Self::High,
            50..80 => Self::Moderate,
            _ => Self::EcoFriendly,
        }
    }
}

impl std::fmt::Display for Impact {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Self::High => "high impact",
            Self::Moderate => "moderate",
            Self::EcoFriendly => "eco-friendly",
        })
    }
}
