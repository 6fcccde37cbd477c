//! Persistence for nourish: user profiles, approved plans, feedback history
//! and the food diary.

pub mod config;
pub mod models;
pub mod pool;
pub mod queries;
