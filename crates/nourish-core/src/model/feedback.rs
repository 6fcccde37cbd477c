use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::constraints::ConstraintsDelta;

/// One rejection and what was extracted from it. Immutable once created.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeedbackRecord {
    pub id: Uuid,
    pub session_id: Uuid,
    pub plan_id: Uuid,
    pub plan_version: u32,
    pub plan_fingerprint: String,
    pub feedback: String,
    pub delta: ConstraintsDelta,
    pub created_at: DateTime<Utc>,
}
