//! Tunables for the planning core.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::feedback::ReentryPolicy;

/// Planner configuration. Every field has a default, so a partial
/// `[planner]` table in the CLI config file is enough.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PlannerConfig {
    /// Automatic retries per stage after the first attempt.
    pub stage_retries: u32,
    /// Upper bound on a single generator call.
    pub generator_timeout_ms: u64,
    /// Rejection cycles allowed per session before the loop halts.
    pub convergence_cap: u32,
    /// Allowed relative deviation of a day's calories from the target.
    pub calorie_tolerance: f64,
    /// Fraction of the protein target every day must reach.
    pub protein_floor: f64,
    /// Attempts at a durable save before reporting the store unavailable.
    pub store_retries: u32,
    /// Delay between store attempts; doubles after each failure.
    pub store_backoff_ms: u64,
    /// Feedback records surfaced in a memory snapshot.
    pub feedback_history: usize,
    /// Diary entries surfaced in a memory snapshot.
    pub diary_history: usize,
    /// Which stage a refinement restarts from, per feedback category.
    pub reentry: ReentryPolicy,
}

impl PlannerConfig {
    pub fn generator_timeout(&self) -> Duration {
        Duration::from_millis(self.generator_timeout_ms)
    }

    pub fn store_backoff(&self) -> Duration {
        Duration::from_millis(self.store_backoff_ms)
    }
}

impl Default for PlannerConfig {
    fn default() -> Self {
        Self {
            stage_retries: 2,
            generator_timeout_ms: 60_000,
            convergence_cap: 5,
            calorie_tolerance: 0.10,
            protein_floor: 0.9,
            store_retries: 3,
            store_backoff_ms: 200,
            feedback_history: 10,
            diary_history: 10,
            reentry: ReentryPolicy::default(),
        }
    }
}
