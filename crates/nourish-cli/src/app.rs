//! Wiring: the session manager over the configured generator, vision
//! client and PostgreSQL memory.

use std::sync::Arc;

use sqlx::PgPool;

use nourish_core::SessionManager;
use nourish_core::generator::ProcessGenerator;
use nourish_core::generator::vision::ProcessVisionAnalyzer;
use nourish_core::memory::PgMemoryStore;

use crate::config::NourishConfig;

pub fn session_manager(config: &NourishConfig, pool: PgPool) -> SessionManager {
    let generator = ProcessGenerator::new(
        config.generator.command.clone(),
        config.generator.args.clone(),
    );
    let store = PgMemoryStore::new(pool).with_limits(
        config.planner.feedback_history,
        config.planner.diary_history,
    );
    tracing::debug!(generator = %generator.program(), "session manager ready");

    let manager = SessionManager::new(Arc::new(generator), Arc::new(store), config.planner.clone());
    match &config.vision {
        Some(vision) => manager.with_vision(Arc::new(ProcessVisionAnalyzer::new(
            vision.command.clone(),
            vision.args.clone(),
        ))),
        None => manager,
    }
}
