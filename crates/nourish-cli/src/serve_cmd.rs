//! `nourish serve`: the session entry points over HTTP.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Deserialize;
use tokio_util::sync::CancellationToken;
use tower_http::cors::CorsLayer;
use uuid::Uuid;

use nourish_core::generator::vision::VisionError;
use nourish_core::{PlannerError, SessionManager};

type AppState = Arc<SessionManager>;

// ---------------------------------------------------------------------------
// Error type
// ---------------------------------------------------------------------------

pub struct AppError {
    status: StatusCode,
    kind: &'static str,
    message: String,
}

impl AppError {
    pub fn bad_request(msg: impl Into<String>) -> Self {
        Self {
            status: StatusCode::BAD_REQUEST,
            kind: "bad_request",
            message: msg.into(),
        }
    }

    pub fn not_found(msg: impl Into<String>) -> Self {
        Self {
            status: StatusCode::NOT_FOUND,
            kind: "not_found",
            message: msg.into(),
        }
    }
}

impl From<PlannerError> for AppError {
    fn from(err: PlannerError) -> Self {
        let (status, kind) = match &err {
            PlannerError::UnknownSession(_) => (StatusCode::NOT_FOUND, "unknown_session"),
            PlannerError::UnknownUser(_) => (StatusCode::NOT_FOUND, "unknown_user"),
            PlannerError::ExtractionFailed(_) => {
                (StatusCode::UNPROCESSABLE_ENTITY, "extraction_failed")
            }
            PlannerError::OverBudget { .. } => (StatusCode::CONFLICT, "over_budget"),
            PlannerError::InvalidState(_) => (StatusCode::CONFLICT, "invalid_state"),
            PlannerError::ConvergenceExceeded { .. } => {
                (StatusCode::CONFLICT, "convergence_exceeded")
            }
            PlannerError::StoreUnavailable(_) => {
                (StatusCode::SERVICE_UNAVAILABLE, "store_unavailable")
            }
            PlannerError::Generation { .. } => (StatusCode::BAD_GATEWAY, "generation"),
            PlannerError::InvariantViolation { .. } => {
                (StatusCode::UNPROCESSABLE_ENTITY, "invariant_violation")
            }
            PlannerError::StageFailed { .. } => (StatusCode::UNPROCESSABLE_ENTITY, "stage_failed"),
            PlannerError::Vision(VisionError::NotConfigured) => {
                (StatusCode::NOT_IMPLEMENTED, "vision_not_configured")
            }
            PlannerError::Vision(VisionError::Timeout(_)) => {
                (StatusCode::GATEWAY_TIMEOUT, "vision_timeout")
            }
            PlannerError::Vision(_) => (StatusCode::BAD_GATEWAY, "vision"),
        };
        Self {
            status,
            kind,
            message: err.to_string(),
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> axum::response::Response {
        let body = serde_json::json!({ "error": self.message, "kind": self.kind });
        (self.status, Json(body)).into_response()
    }
}

// ---------------------------------------------------------------------------
// Request types
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
pub struct UtteranceRequest {
    pub user_id: String,
    pub utterance: String,
}

#[derive(Debug, Default, Deserialize)]
pub struct ApproveQuery {
    /// Accept a plan flagged over budget.
    #[serde(default)]
    pub over_budget: bool,
}

#[derive(Debug, Deserialize)]
pub struct RejectRequest {
    pub feedback: String,
}

#[derive(Debug, Deserialize)]
pub struct DiaryRequest {
    pub image_path: PathBuf,
}

// ---------------------------------------------------------------------------
// Router
// ---------------------------------------------------------------------------

pub fn build_router(manager: AppState) -> Router {
    Router::new()
        .route("/sessions", post(converse))
        .route("/sessions/{id}", axum::routing::delete(end_session))
        .route("/sessions/{id}/plans", get(list_plans))
        .route("/sessions/{id}/approve", post(approve))
        .route("/sessions/{id}/reject", post(reject))
        .route("/users/{id}/diary", post(append_diary))
        .route("/users/{id}/snapshot", get(snapshot))
        .layer(CorsLayer::permissive())
        .with_state(manager)
}

// ---------------------------------------------------------------------------
// Entry point
// ---------------------------------------------------------------------------

pub async fn run_serve(manager: SessionManager, addr: &str) -> Result<()> {
    let app = build_router(Arc::new(manager));
    let addr: SocketAddr = addr
        .parse()
        .with_context(|| format!("invalid listen address: {addr}"))?;

    let cancel = CancellationToken::new();
    let cancel_clone = cancel.clone();
    tokio::spawn(async move {
        tokio::signal::ctrl_c().await.ok();
        cancel_clone.cancel();
    });

    tracing::info!("nourish serve listening on http://{addr}");
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;
    axum::serve(listener, app)
        .with_graceful_shutdown(cancel.cancelled_owned())
        .await?;
    tracing::info!("nourish serve shut down");
    Ok(())
}

// ---------------------------------------------------------------------------
// Handlers
// ---------------------------------------------------------------------------

async fn converse(
    State(manager): State<AppState>,
    Json(req): Json<UtteranceRequest>,
) -> Result<axum::response::Response, AppError> {
    if req.utterance.trim().is_empty() {
        return Err(AppError::bad_request("utterance must not be empty"));
    }
    let reply = manager
        .start_or_continue_session(&req.user_id, &req.utterance)
        .await?;
    Ok(Json(reply).into_response())
}

async fn approve(
    State(manager): State<AppState>,
    Path(id): Path<Uuid>,
    Query(query): Query<ApproveQuery>,
) -> Result<axum::response::Response, AppError> {
    let reply = if query.over_budget {
        manager.approve_over_budget(id).await?
    } else {
        manager.approve_plan(id).await?
    };
    Ok(Json(reply).into_response())
}

async fn reject(
    State(manager): State<AppState>,
    Path(id): Path<Uuid>,
    Json(req): Json<RejectRequest>,
) -> Result<axum::response::Response, AppError> {
    if req.feedback.trim().is_empty() {
        return Err(AppError::bad_request("feedback must not be empty"));
    }
    let reply = manager.reject_plan(id, &req.feedback).await?;
    Ok(Json(reply).into_response())
}

async fn list_plans(
    State(manager): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<axum::response::Response, AppError> {
    let plans = manager.plans(id).await?;
    Ok(Json(plans).into_response())
}

async fn end_session(
    State(manager): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<StatusCode, AppError> {
    if manager.end_session(id).await {
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(AppError::not_found(format!("session {id} not found")))
    }
}

async fn append_diary(
    State(manager): State<AppState>,
    Path(user_id): Path<String>,
    Json(req): Json<DiaryRequest>,
) -> Result<axum::response::Response, AppError> {
    let entry = manager.append_diary(&user_id, &req.image_path).await?;
    Ok((StatusCode::CREATED, Json(entry)).into_response())
}

async fn snapshot(
    State(manager): State<AppState>,
    Path(user_id): Path<String>,
) -> Result<axum::response::Response, AppError> {
    let snapshot = manager.snapshot(&user_id).await?;
    Ok(Json(snapshot).into_response())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use async_trait::async_trait;
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use chrono::Utc;
    use serde_json::Value;
    use tower::ServiceExt;

    use nourish_core::generator::vision::{NutritionEstimate, VisionAnalyzer, VisionError};
    use nourish_core::generator::{GenerationError, GenerationRequest, Generator};
    use nourish_core::memory::InMemoryStore;
    use nourish_core::model::{ActivityLevel, DietType, Goal, Sex, UserProfile};
    use nourish_core::{PlannerConfig, SessionManager};

    /// A generator whose provider is always down.
    struct Offline;

    #[async_trait]
    impl Generator for Offline {
        fn name(&self) -> &str {
            "offline"
        }

        async fn invoke(&self, _request: &GenerationRequest) -> Result<Value, GenerationError> {
            Err(GenerationError::ProviderError("offline".to_owned()))
        }
    }

    /// A vision model that never answers.
    struct Stuck;

    #[async_trait]
    impl VisionAnalyzer for Stuck {
        async fn analyze(
            &self,
            _image: &std::path::Path,
        ) -> Result<NutritionEstimate, VisionError> {
            std::future::pending().await
        }
    }

    fn profile(user_id: &str) -> UserProfile {
        UserProfile {
            user_id: user_id.to_owned(),
            display_name: None,
            age: 40,
            sex: Sex::Male,
            height_cm: 178.0,
            weight_kg: 82.0,
            goal_weight_kg: None,
            activity: ActivityLevel::Moderate,
            goal: Goal::Maintain,
            diet_type: DietType::Vegetarian,
            allergies: vec!["sesame".to_owned()],
            dislikes: vec![],
            cuisine: None,
            budget_ceiling: 80.0,
            meals_per_day: 3,
            plan_days: 5,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    async fn router() -> axum::Router {
        let store = Arc::new(InMemoryStore::new());
        store.set_profile(profile("ravi")).await;
        let manager = SessionManager::new(Arc::new(Offline), store, PlannerConfig::default());
        super::build_router(Arc::new(manager))
    }

    async fn send(
        app: axum::Router,
        method: &str,
        uri: &str,
        body: Option<Value>,
    ) -> (StatusCode, Value) {
        let request = Request::builder().method(method).uri(uri);
        let request = match body {
            Some(json) => request
                .header("content-type", "application/json")
                .body(Body::from(json.to_string()))
                .unwrap(),
            None => request.body(Body::empty()).unwrap(),
        };
        let response = app.oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), 1_048_576)
            .await
            .unwrap();
        let json = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap()
        };
        (status, json)
    }

    #[tokio::test]
    async fn snapshot_of_a_known_user() {
        let (status, json) = send(router().await, "GET", "/users/ravi/snapshot", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["profile"]["diet_type"], "vegetarian");
        assert_eq!(json["latest_plan"], Value::Null);
    }

    #[tokio::test]
    async fn unknown_user_is_not_found() {
        let (status, json) = send(router().await, "GET", "/users/nobody/snapshot", None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(json["kind"], "unknown_user");
    }

    #[tokio::test]
    async fn offline_generator_reads_as_unrecognized() {
        let body = serde_json::json!({ "user_id": "ravi", "utterance": "plan me a week" });
        let (status, json) = send(router().await, "POST", "/sessions", Some(body)).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["intent"]["kind"], "unrecognized");
        assert_eq!(json["pipeline"]["state"], "idle");
        assert_eq!(json["plan"], Value::Null);
    }

    #[tokio::test]
    async fn empty_utterance_is_a_bad_request() {
        let body = serde_json::json!({ "user_id": "ravi", "utterance": "  " });
        let (status, _) = send(router().await, "POST", "/sessions", Some(body)).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn approving_an_unknown_session_is_not_found() {
        let uri = format!("/sessions/{}/approve?over_budget=true", uuid::Uuid::new_v4());
        let (status, json) = send(router().await, "POST", &uri, None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(json["kind"], "unknown_session");
    }

    #[tokio::test]
    async fn approving_before_any_plan_conflicts() {
        let app = router().await;
        let body = serde_json::json!({ "user_id": "ravi", "utterance": "hello" });
        let (_, reply) = send(app.clone(), "POST", "/sessions", Some(body)).await;
        let session = reply["session_id"].as_str().unwrap().to_owned();

        let (status, json) =
            send(app.clone(), "POST", &format!("/sessions/{session}/approve"), None).await;
        assert_eq!(status, StatusCode::CONFLICT);
        assert_eq!(json["kind"], "invalid_state");

        let (status, _) = send(app.clone(), "DELETE", &format!("/sessions/{session}"), None).await;
        assert_eq!(status, StatusCode::NO_CONTENT);
        let (status, _) = send(app, "DELETE", &format!("/sessions/{session}"), None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn diary_without_vision_is_not_implemented() {
        let body = serde_json::json!({ "image_path": "/tmp/lunch.jpg" });
        let (status, json) = send(router().await, "POST", "/users/ravi/diary", Some(body)).await;
        assert_eq!(status, StatusCode::NOT_IMPLEMENTED);
        assert_eq!(json["kind"], "vision_not_configured");
    }

    #[tokio::test]
    async fn stuck_vision_is_a_gateway_timeout() {
        let store = Arc::new(InMemoryStore::new());
        store.set_profile(profile("ravi")).await;
        let config = PlannerConfig {
            generator_timeout_ms: 50,
            ..PlannerConfig::default()
        };
        let manager =
            SessionManager::new(Arc::new(Offline), store, config).with_vision(Arc::new(Stuck));
        let app = super::build_router(Arc::new(manager));

        let body = serde_json::json!({ "image_path": "/tmp/lunch.jpg" });
        let (status, json) = send(app, "POST", "/users/ravi/diary", Some(body)).await;
        assert_eq!(status, StatusCode::GATEWAY_TIMEOUT);
        assert_eq!(json["kind"], "vision_timeout");
    }

    #[tokio::test]
    async fn malformed_session_id_is_rejected() {
        let body = serde_json::json!({ "feedback": "cheaper" });
        let (status, _) =
            send(router().await, "POST", "/sessions/not-a-uuid/reject", Some(body)).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }
}
