//! The error surface of the session entry points.

use uuid::Uuid;

use crate::extract::ExtractionFailed;
use crate::generator::GenerationError;
use crate::generator::vision::VisionError;
use crate::memory::StoreError;
use crate::stages::StageKind;

/// Terminal, user-visible failures. Recoverable problems are retried inside
/// the owning stage or controller and only show up here once local retries
/// are exhausted.
#[derive(Debug, thiserror::Error)]
pub enum PlannerError {
    #[error("unable to produce a plan meeting your constraints: {stage} stage got no usable response ({source})")]
    Generation {
        stage: StageKind,
        #[source]
        source: GenerationError,
    },

    #[error("unable to produce a plan meeting your constraints: {stage} stage kept violating a hard rule ({detail})")]
    InvariantViolation { stage: StageKind, detail: String },

    #[error(transparent)]
    ExtractionFailed(#[from] ExtractionFailed),

    #[error(
        "stopped after {cycles} refinement rounds without an approved plan; \
         please restart the session or adjust your profile"
    )]
    ConvergenceExceeded { cycles: u32 },

    #[error("could not save to memory: {0}")]
    StoreUnavailable(#[source] StoreError),

    #[error("unable to produce a plan meeting your constraints: {stage} stage failed ({reason})")]
    StageFailed { stage: StageKind, reason: String },

    #[error("plan {plan_id} is {overage:.2} over budget; approve it explicitly to accept the overage")]
    OverBudget { plan_id: Uuid, overage: f64 },

    #[error("unknown session {0}")]
    UnknownSession(Uuid),

    #[error("no profile for user {0:?}; create one first")]
    UnknownUser(String),

    #[error("{0}")]
    InvalidState(String),

    #[error(transparent)]
    Vision(#[from] VisionError),
}

impl PlannerError {
    /// The stage a pipeline failure is attributed to, if any.
    pub fn stage(&self) -> Option<StageKind> {
        match self {
            Self::Generation { stage, .. }
            | Self::InvariantViolation { stage, .. }
            | Self::StageFailed { stage, .. } => Some(*stage),
            _ => None,
        }
    }
}

impl From<StoreError> for PlannerError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::UnknownUser(user) => Self::UnknownUser(user),
            other => Self::StoreUnavailable(other),
        }
    }
}
