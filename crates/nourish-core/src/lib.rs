//! The nourish planning core.
//!
//! A session turns a user's utterances into a meal plan by running a fixed
//! chain of stages ([`pipeline::PlanPipeline`]) and refines the plan from
//! rejection feedback ([`feedback::FeedbackController`]). Durable context
//! comes from a [`memory::MemoryStore`]; every reasoning step goes through a
//! [`generator::Generator`].

pub mod answer;
pub mod config;
pub mod error;
pub mod extract;
pub mod feedback;
pub mod generator;
pub mod intent;
pub mod memory;
pub mod model;
pub mod pipeline;
pub mod session;
pub mod stages;

pub use config::PlannerConfig;
pub use error::PlannerError;
pub use session::{SessionManager, SessionReply};
