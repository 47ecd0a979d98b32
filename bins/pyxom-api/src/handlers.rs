// HTTP route handlers for the Pyxom API

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Json, Response},
};
use pyxom_common::types::{AttemptRejection, AttemptResult};
use pyxom_engine::{ExerciseSpec, GradingError};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{error, info};

use crate::{metrics, AppState};

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ValidateRequest {
    pub source_code: String,
}

#[derive(Debug, Serialize)]
pub struct ValidateResponse {
    pub ok: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub violation: Option<AttemptRejection>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GradeRequest {
    pub source_code: String,
    pub exercise: ExerciseSpec,
    #[serde(default)]
    pub request_hints: bool,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GradeExerciseRequest {
    pub source_code: String,
    #[serde(default)]
    pub request_hints: bool,
}

fn error_response(endpoint: &str, status: StatusCode, message: String) -> Response {
    metrics::record_request(endpoint, status.as_u16());
    (status, Json(serde_json::json!({ "error": message }))).into_response()
}

/// Shared tail of both grading endpoints: metrics, redaction, status mapping
fn grading_response(endpoint: &str, outcome: Result<AttemptResult, GradingError>) -> Response {
    match outcome {
        Ok(attempt) => {
            metrics::record_attempt(&attempt);
            metrics::record_request(endpoint, StatusCode::OK.as_u16());
            (StatusCode::OK, Json(attempt.redacted())).into_response()
        }
        Err(e) => {
            error!(endpoint = endpoint, error = %e, "Grading failed");
            metrics::record_grading_error();
            error_response(endpoint, StatusCode::SERVICE_UNAVAILABLE, e.to_string())
        }
    }
}

/// GET /status - Health check endpoint
pub async fn health_check() -> impl IntoResponse {
    (StatusCode::OK, "OK")
}

/// GET /pool - Worker pool snapshot
pub async fn pool_status(State(state): State<Arc<AppState>>) -> Response {
    match state.runner.pool().status().await {
        Ok(status) => {
            metrics::update_pool_gauges(&status);
            (StatusCode::OK, Json(status)).into_response()
        }
        Err(e) => error_response("/pool", StatusCode::SERVICE_UNAVAILABLE, e.to_string()),
    }
}

/// GET /metrics - Prometheus text format
pub async fn metrics_text(State(state): State<Arc<AppState>>) -> Response {
    if let Ok(status) = state.runner.pool().status().await {
        metrics::update_pool_gauges(&status);
    }
    match metrics::render_metrics() {
        Ok(body) => (StatusCode::OK, body).into_response(),
        Err(e) => {
            error!(error = %e, "Failed to render metrics");
            (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()).into_response()
        }
    }
}

/// POST /validate - Security gate only, nothing is executed
pub async fn validate(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<ValidateRequest>,
) -> Response {
    let response = match state.runner.validator().validate(&payload.source_code) {
        Ok(()) => ValidateResponse { ok: true, violation: None },
        Err(violation) => {
            info!(construct = %violation.construct, "Validation rejected submission");
            ValidateResponse {
                ok: false,
                violation: Some(violation.to_rejection()),
            }
        }
    };
    metrics::record_request("/validate", StatusCode::OK.as_u16());
    (StatusCode::OK, Json(response)).into_response()
}

/// POST /grade - Grade against an exercise carried in the request
pub async fn grade(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<GradeRequest>,
) -> Response {
    info!(
        exercise_id = %payload.exercise.id,
        tests = payload.exercise.tests.len(),
        "Grade request received"
    );
    let outcome = state
        .runner
        .grade(&payload.source_code, &payload.exercise, payload.request_hints)
        .await;
    grading_response("/grade", outcome)
}

/// GET /exercises - Catalog listing
pub async fn list_exercises(State(state): State<Arc<AppState>>) -> Response {
    metrics::record_request("/exercises", StatusCode::OK.as_u16());
    (StatusCode::OK, Json(state.catalog.summaries())).into_response()
}

/// POST /exercises/{id}/grade - Grade against a catalog exercise
pub async fn grade_exercise(
    State(state): State<Arc<AppState>>,
    Path(exercise_id): Path<String>,
    Json(payload): Json<GradeExerciseRequest>,
) -> Response {
    let Some(exercise) = state.catalog.get(&exercise_id) else {
        return error_response(
            "/exercises/:id/grade",
            StatusCode::NOT_FOUND,
            format!("Unknown exercise '{}'", exercise_id),
        );
    };

    info!(exercise_id = %exercise_id, "Grade request received");
    let outcome = state
        .runner
        .grade(&payload.source_code, exercise, payload.request_hints)
        .await;
    grading_response("/exercises/:id/grade", outcome)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::Catalog;
    use axum::body::to_bytes;
    use pyxom_engine::sandbox::process::ProcessSandboxFactory;
    use pyxom_engine::{PoolConfig, RunnerConfig, TestRunner, WorkerPool};
    use serde_json::Value;

    const CATALOG: &str = r#"{
        "exercises": [
            {
                "id": "echo",
                "title": "Echo",
                "tests": [
                    { "input": "hola", "expected": "hola" },
                    { "input": "secreto", "expected": "secreto", "hidden": true }
                ]
            }
        ]
    }"#;

    // Nothing in these tests reaches an interpreter: rejected or unknown
    // submissions never execute, and a closed pool fails before dispatch.
    fn state() -> Arc<AppState> {
        let pool = WorkerPool::new(
            PoolConfig::default(),
            Arc::new(ProcessSandboxFactory::new("/nonexistent/python3")),
        );
        Arc::new(AppState {
            runner: TestRunner::new(pool, RunnerConfig::default()),
            catalog: Catalog::from_json(CATALOG).unwrap(),
        })
    }

    async fn body_json(response: Response) -> Value {
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn test_validate_accepts_and_rejects() {
        let state = state();

        let ok = validate(
            State(state.clone()),
            Json(ValidateRequest { source_code: "print(int(input()) * 2)".into() }),
        )
        .await;
        assert_eq!(ok.status(), StatusCode::OK);
        assert_eq!(body_json(ok).await["ok"], true);

        let rejected = validate(
            State(state),
            Json(ValidateRequest { source_code: "import subprocess\n".into() }),
        )
        .await;
        let body = body_json(rejected).await;
        assert_eq!(body["ok"], false);
        assert_eq!(body["violation"]["construct"], "subprocess");
        assert_eq!(body["violation"]["kind"], "SecurityViolation");
    }

    #[tokio::test]
    async fn test_grade_unknown_exercise_is_not_found() {
        let response = grade_exercise(
            State(state()),
            Path("nope".to_string()),
            Json(GradeExerciseRequest { source_code: "print(1)".into(), request_hints: false }),
        )
        .await;
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        assert!(body_json(response).await["error"].as_str().unwrap().contains("nope"));
    }

    #[tokio::test]
    async fn test_grade_rejected_submission() {
        let response = grade_exercise(
            State(state()),
            Path("echo".to_string()),
            Json(GradeExerciseRequest {
                source_code: "import os\nos.system('ls')".into(),
                request_hints: false,
            }),
        )
        .await;
        assert_eq!(response.status(), StatusCode::OK);

        let body = body_json(response).await;
        assert_eq!(body["overallPassed"], false);
        assert_eq!(body["rejection"]["construct"], "os");
        assert_eq!(body["testRunResults"].as_array().unwrap().len(), 0);
        assert_eq!(body["maxPossiblePoints"], 2);
    }

    #[tokio::test]
    async fn test_closed_pool_is_service_unavailable() {
        let state = state();
        state.runner.pool().shutdown().await;

        let response = grade_exercise(
            State(state),
            Path("echo".to_string()),
            Json(GradeExerciseRequest { source_code: "print(input())".into(), request_hints: false }),
        )
        .await;
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
        assert!(body_json(response).await["error"].is_string());
    }

    #[tokio::test]
    async fn test_list_exercises_hides_tests() {
        let response = list_exercises(State(state())).await;
        let body = body_json(response).await;
        assert_eq!(body[0]["id"], "echo");
        assert_eq!(body[0]["totalTests"], 2);
        assert!(body[0].get("tests").is_none());
    }

    #[tokio::test]
    #[ignore] // Requires python3 on PATH
    async fn test_grade_redacts_hidden_tests() {
        let pool = WorkerPool::new(PoolConfig::default(), Arc::new(ProcessSandboxFactory::new("python3")));
        let state = Arc::new(AppState {
            runner: TestRunner::new(pool, RunnerConfig::default()),
            catalog: Catalog::from_json(CATALOG).unwrap(),
        });

        let response = grade_exercise(
            State(state),
            Path("echo".to_string()),
            Json(GradeExerciseRequest { source_code: "print(input())".into(), request_hints: false }),
        )
        .await;
        let body = body_json(response).await;
        assert_eq!(body["overallPassed"], true);
        assert_eq!(body["testRunResults"][0]["actualOutput"], "hola\n");
        assert_eq!(body["testRunResults"][1]["testCase"]["input"], "[hidden]");
        assert_eq!(body["testRunResults"][1]["passed"], true);
    }
}
