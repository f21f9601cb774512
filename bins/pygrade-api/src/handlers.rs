// HTTP route handlers for the grading API

use axum::{
    extract::State,
    http::{header, StatusCode},
    response::{IntoResponse, Json, Response},
};
use chrono::{DateTime, Utc};
use pygrade_common::types::{Question, Termination, Test};
use pygrade_engine::engine::probe;
use pygrade_engine::{grade_attempt, run_program, run_test_cases, RunSummary, SessionError};
use serde::Deserialize;
use std::sync::Arc;
use std::time::Instant;
use tracing::{error, info, warn};

use crate::metrics;
use crate::AppState;

#[derive(Debug, Deserialize)]
pub struct RunRequest {
    pub question: Question,
    pub code: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GradeRequest {
    pub test: Test,
    pub student_id: String,
    #[serde(default)]
    pub start_time: Option<DateTime<Utc>>,
    #[serde(default)]
    pub answers: Vec<String>,
    #[serde(default)]
    pub order: Option<Vec<usize>>,
    #[serde(default = "default_termination")]
    pub termination: Termination,
}

fn default_termination() -> Termination {
    Termination::Submitted
}

fn error_response(status: StatusCode, message: String, retryable: bool) -> Response {
    (
        status,
        Json(serde_json::json!({
            "error": message,
            "retryable": retryable
        })),
    )
        .into_response()
}

/// POST /run - Immediate feedback for one question: the program's own output
/// plus the test case results
pub async fn run_question(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<RunRequest>,
) -> impl IntoResponse {
    if let Err(e) = payload.question.validate() {
        return error_response(StatusCode::BAD_REQUEST, e, false);
    }
    if !payload.question.is_auto_graded() {
        return error_response(
            StatusCode::BAD_REQUEST,
            format!("question '{}' is not auto-graded", payload.question.id),
            false,
        );
    }

    metrics::RUNS_TOTAL.inc();
    let timer = metrics::GRADING_DURATION
        .with_label_values(&["run"])
        .start_timer();

    let result = match run_program(state.sandbox.as_ref(), &payload.code).await {
        Ok(program_output) => run_test_cases(
            state.sandbox.as_ref(),
            &payload.code,
            &payload.question.test_cases,
        )
        .await
        .map(|results| (program_output, results)),
        Err(e) => Err(e),
    };
    timer.observe_duration();

    match result {
        Ok((program_output, results)) => {
            metrics::record_results(&results);
            let summary = RunSummary::from_results(&results);

            info!(
                question_id = %payload.question.id,
                passed = summary.passed,
                total = summary.total,
                "Run completed"
            );

            (
                StatusCode::OK,
                Json(serde_json::json!({
                    "allPassed": summary.all_passed(),
                    "programOutput": program_output,
                    "summary": summary
                })),
            )
                .into_response()
        }
        Err(e) => {
            error!(question_id = %payload.question.id, error = %e, "Sandbox unavailable");
            error_response(StatusCode::SERVICE_UNAVAILABLE, e.to_string(), e.is_retryable())
        }
    }
}

/// POST /grade - Final grading pass over a whole answer sheet
pub async fn grade(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<GradeRequest>,
) -> impl IntoResponse {
    let start = Instant::now();
    let start_time = payload.start_time.unwrap_or_else(Utc::now);

    let result = grade_attempt(
        state.sandbox.as_ref(),
        &payload.test,
        payload.order.as_deref(),
        &payload.answers,
        &payload.student_id,
        start_time,
        payload.termination,
    )
    .await;

    match result {
        Ok(attempt) => {
            metrics::ATTEMPTS_GRADED_TOTAL.inc();
            metrics::GRADING_DURATION
                .with_label_values(&["grade"])
                .observe(start.elapsed().as_secs_f64());

            if attempt.needs_regrade() {
                warn!(attempt_id = %attempt.id, "Attempt graded with unavailable sandbox; regrade needed");
            }

            info!(
                attempt_id = %attempt.id,
                test_id = %attempt.test_id,
                total_score = attempt.total_score,
                percentage = attempt.percentage,
                execution_ms = start.elapsed().as_millis() as u64,
                "Attempt graded"
            );

            (StatusCode::CREATED, Json(attempt)).into_response()
        }
        Err(e @ (SessionError::InvalidTest(_) | SessionError::InvalidOrder(_) | SessionError::QuestionOutOfRange(_))) => {
            error_response(StatusCode::BAD_REQUEST, e.to_string(), false)
        }
        Err(SessionError::Execution(e)) => {
            error!(error = %e, "Grading failed");
            error_response(StatusCode::SERVICE_UNAVAILABLE, e.to_string(), e.is_retryable())
        }
    }
}

/// GET /health - Liveness check
pub async fn health_check() -> impl IntoResponse {
    (StatusCode::OK, "OK")
}

/// GET /health/sandbox - Open and close one sandbox session
pub async fn sandbox_health(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let backend = state.sandbox.name();

    match probe(state.sandbox.as_ref()).await {
        Ok(()) => (
            StatusCode::OK,
            Json(serde_json::json!({
                "status": "ok",
                "backend": backend
            })),
        )
            .into_response(),
        Err(e) => {
            warn!(backend = backend, error = %e, "Sandbox health check failed");
            (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(serde_json::json!({
                    "status": "unavailable",
                    "backend": backend,
                    "error": e.to_string()
                })),
            )
                .into_response()
        }
    }
}

/// GET /metrics - Prometheus text format
pub async fn export_metrics() -> impl IntoResponse {
    match metrics::render() {
        Ok(body) => (
            StatusCode::OK,
            [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
            body,
        )
            .into_response(),
        Err(e) => {
            error!(error = %e, "Failed to encode metrics");
            error_response(StatusCode::INTERNAL_SERVER_ERROR, e.to_string(), false)
        }
    }
}
