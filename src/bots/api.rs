use std::sync::Arc;

use axum::{
    Json, Router,
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
};
use serde::Serialize;

use super::models::JobStatus;
use super::orchestrator::Orchestrator;
use crate::errors::OrchestratorError;

// ── Shared application state ──────────────────────────────────────────

pub struct AppState {
    pub orchestrator: Orchestrator,
}

pub type SharedState = Arc<AppState>;

// ── Response payload types ────────────────────────────────────────────

#[derive(Serialize)]
pub struct SpawnResponse {
    pub run_id: i64,
}

#[derive(Serialize)]
pub struct JobStatusResponse {
    pub job_id: i64,
    pub status: JobStatus,
}

// ── Error handling ────────────────────────────────────────────────────

#[derive(Debug)]
pub enum ApiError {
    NotFound(String),
    Conflict(String),
    Unprocessable(String),
    TooManyRequests(String),
    Unavailable(String),
    Internal(String),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            ApiError::NotFound(msg) => (StatusCode::NOT_FOUND, msg),
            ApiError::Conflict(msg) => (StatusCode::CONFLICT, msg),
            ApiError::Unprocessable(msg) => (StatusCode::UNPROCESSABLE_ENTITY, msg),
            ApiError::TooManyRequests(msg) => (StatusCode::TOO_MANY_REQUESTS, msg),
            ApiError::Unavailable(msg) => (StatusCode::SERVICE_UNAVAILABLE, msg),
            ApiError::Internal(msg) => (StatusCode::INTERNAL_SERVER_ERROR, msg),
        };
        (status, Json(serde_json::json!({"error": message}))).into_response()
    }
}

impl From<OrchestratorError> for ApiError {
    fn from(err: OrchestratorError) -> Self {
        let msg = err.to_string();
        match err {
            OrchestratorError::AlreadyRunning { .. } | OrchestratorError::NotRunning { .. } => {
                ApiError::Conflict(msg)
            }
            OrchestratorError::CapacityExceeded { .. } => ApiError::TooManyRequests(msg),
            OrchestratorError::JobNotFound { .. }
            | OrchestratorError::ProjectNotFound { .. }
            | OrchestratorError::RunNotFound { .. } => ApiError::NotFound(msg),
            OrchestratorError::InvalidJob(_) => ApiError::Unprocessable(msg),
            OrchestratorError::ShuttingDown => ApiError::Unavailable(msg),
            OrchestratorError::Store(e) => {
                tracing::error!(error = %format!("{:#}", e), "Store failure in API handler");
                ApiError::Internal(msg)
            }
        }
    }
}

// ── Router ────────────────────────────────────────────────────────────

pub fn api_router() -> Router<SharedState> {
    Router::new()
        .route("/api/jobs/{id}/runs", post(spawn_run))
        .route("/api/jobs/{id}/stop", post(stop_run))
        .route("/api/jobs/{id}/status", get(job_status))
        .route("/api/runs/active", get(active_runs))
        .route("/api/runs/{id}", get(get_run))
        .route("/health", get(health_check))
}

// ── Handlers ──────────────────────────────────────────────────────────

async fn health_check() -> &'static str {
    "ok"
}

async fn spawn_run(
    State(state): State<SharedState>,
    Path(job_id): Path<i64>,
) -> Result<impl IntoResponse, ApiError> {
    let run_id = state.orchestrator.spawn(job_id).await?;
    Ok((StatusCode::CREATED, Json(SpawnResponse { run_id })))
}

async fn stop_run(
    State(state): State<SharedState>,
    Path(job_id): Path<i64>,
) -> Result<impl IntoResponse, ApiError> {
    let run = state.orchestrator.stop(job_id).await?;
    Ok(Json(run))
}

async fn job_status(
    State(state): State<SharedState>,
    Path(job_id): Path<i64>,
) -> Result<impl IntoResponse, ApiError> {
    let status = state.orchestrator.get_status(job_id).await?;
    Ok(Json(JobStatusResponse { job_id, status }))
}

async fn active_runs(State(state): State<SharedState>) -> impl IntoResponse {
    Json(state.orchestrator.list_active().await)
}

async fn get_run(
    State(state): State<SharedState>,
    Path(run_id): Path<i64>,
) -> Result<impl IntoResponse, ApiError> {
    let run = state.orchestrator.get_run_with_logs(run_id).await?;
    Ok(Json(run))
}

// ── Tests ─────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bots::db::{BotDb, DbHandle};
    use crate::bots::events::EventBus;
    use crate::bots::git::GitClient;
    use crate::bots::models::JobType;
    use crate::bots::orchestrator::OrchestratorConfig;
    use crate::bots::records::RunRecorder;
    use crate::bots::test_support::{GatedGenerator, seed_remote};
    use axum::body::Body;
    use axum::http::Request;
    use http_body_util::BodyExt;
    use serde_json::json;
    use tower::ServiceExt;

    const REPLY: &str = r##"{"summary": "Add changelog",
        "edits": [{"action": "write", "path": "CHANGELOG.md", "content": "# Changelog\n"}]}"##;

    struct TestApp {
        state: SharedState,
        generator: Arc<GatedGenerator>,
        _root: tempfile::TempDir,
    }

    impl TestApp {
        fn new(max: usize) -> Self {
            let root = tempfile::tempdir().unwrap();
            let generator = Arc::new(GatedGenerator::new(REPLY));
            let db = DbHandle::new(BotDb::new_in_memory().unwrap());
            let orchestrator = Orchestrator::new(
                RunRecorder::new(db, EventBus::new()),
                Arc::new(GitClient::default()),
                generator.clone(),
                OrchestratorConfig {
                    max_concurrent_runs: max,
                    workspace_root: root.path().join("workspaces"),
                    ..OrchestratorConfig::default()
                },
            );
            Self {
                state: Arc::new(AppState { orchestrator }),
                generator,
                _root: root,
            }
        }

        fn router(&self) -> Router {
            api_router().with_state(self.state.clone())
        }

        async fn add_job(&self, url: &str, configuration: serde_json::Value) -> i64 {
            let url = url.to_string();
            self.state
                .orchestrator
                .db()
                .call(move |db| {
                    let project = db.create_project("demo", &url, "main")?;
                    Ok(db
                        .create_job(project.id, "custom", JobType::Custom, &configuration)?
                        .id)
                })
                .await
                .unwrap()
        }

        async fn send(&self, method: &str, uri: &str) -> (StatusCode, serde_json::Value) {
            let request = Request::builder()
                .method(method)
                .uri(uri)
                .body(Body::empty())
                .unwrap();
            let response = self.router().oneshot(request).await.unwrap();
            let status = response.status();
            let bytes = response.into_body().collect().await.unwrap().to_bytes();
            let body = serde_json::from_slice(&bytes).unwrap_or(serde_json::Value::Null);
            (status, body)
        }
    }

    #[tokio::test]
    async fn test_health_check() {
        let app = TestApp::new(1);
        let request = Request::builder()
            .uri("/health")
            .body(Body::empty())
            .unwrap();
        let response = app.router().oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = response.into_body().collect().await.unwrap().to_bytes();
        assert_eq!(&body[..], b"ok");
    }

    #[tokio::test]
    async fn test_spawn_unknown_job_is_404() {
        let app = TestApp::new(1);
        let (status, body) = app.send("POST", "/api/jobs/42/runs").await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert!(body["error"].as_str().unwrap().contains("42"));
    }

    #[tokio::test]
    async fn test_spawn_invalid_job_is_422() {
        let app = TestApp::new(1);
        let job_id = app.add_job("/unused", json!({})).await;
        let (status, _) = app.send("POST", &format!("/api/jobs/{}/runs", job_id)).await;
        assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    }

    #[tokio::test]
    async fn test_spawn_conflict_capacity_and_stop() {
        let remote = seed_remote(&[("README.md", "# demo\n")]);
        let app = TestApp::new(1);
        let first = app.add_job(remote.url(), json!({"prompt": "x"})).await;
        let second = app.add_job(remote.url(), json!({"prompt": "y"})).await;

        let (status, body) = app.send("POST", &format!("/api/jobs/{}/runs", first)).await;
        assert_eq!(status, StatusCode::CREATED);
        let run_id = body["run_id"].as_i64().unwrap();

        let (status, _) = app.send("POST", &format!("/api/jobs/{}/runs", first)).await;
        assert_eq!(status, StatusCode::CONFLICT);
        let (status, _) = app.send("POST", &format!("/api/jobs/{}/runs", second)).await;
        assert_eq!(status, StatusCode::TOO_MANY_REQUESTS);

        let (status, body) = app.send("GET", "/api/runs/active").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body[0]["run_id"], run_id);
        let (_, body) = app.send("GET", &format!("/api/jobs/{}/status", first)).await;
        assert_eq!(body["status"], "running");

        app.generator.entered().await;
        let (status, body) = app.send("POST", &format!("/api/jobs/{}/stop", first)).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "cancelled");
        app.generator.release();
        app.state.orchestrator.wait_idle().await;

        let (status, _) = app.send("POST", &format!("/api/jobs/{}/stop", first)).await;
        assert_eq!(status, StatusCode::CONFLICT);
        let (_, body) = app.send("GET", &format!("/api/jobs/{}/status", first)).await;
        assert_eq!(body["status"], "stopped");

        let (status, body) = app.send("GET", &format!("/api/runs/{}", run_id)).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "cancelled");
        assert!(body["logs"].as_array().unwrap().iter().any(|l| l["message"] == "cancelled"));
    }

    #[tokio::test]
    async fn test_status_of_unknown_job_is_404() {
        let app = TestApp::new(1);
        let (status, body) = app.send("GET", "/api/jobs/41/status").await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["error"], "Job 41 not found");
    }

    #[tokio::test]
    async fn test_get_missing_run_is_404() {
        let app = TestApp::new(1);
        let (status, _) = app.send("GET", "/api/runs/7").await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }
}
