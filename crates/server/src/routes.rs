//! Endpoint handlers.
//!
//! Each endpoint maps to exactly one controller operation and serializes the
//! request body into that operation's parameters. Status codes: 200 on
//! success, 400 for malformed input, 409 for busy/wrong-state rejections,
//! 500 for everything else. Every mutating response carries the controller
//! state observed after the operation.

use axum::extract::{Multipart, State};
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::{Json, Router};
use bc_core::controller::{Controller, RunAllParams, SetupParams};
use bc_core::error::{ControllerError, ErrorKind};
use bc_protocol::{
    ControllerState, HealthResponse, ResetResponse, RunAllRequest, RunAllResponse,
    RunSignalPathRequest, RunSignalPathResponse, SequenceStructureResponse, SetupResponse,
    ShutdownRequest, ShutdownResponse, StatusResponse,
};
use chrono::Utc;
use serde_json::json;
use std::sync::Arc;

#[derive(Clone)]
pub struct AppState {
    pub controller: Arc<Controller>,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/", get(index))
        .route("/health", get(health))
        .route("/status", get(status))
        .route("/setup", post(setup))
        .route("/sequence/structure", get(sequence_structure))
        .route("/run-signal-path", post(run_signal_path))
        .route("/run-all", post(run_all))
        .route("/shutdown", post(shutdown))
        .route("/reset", post(reset))
        .with_state(state)
}

fn error_status(err: &ControllerError) -> StatusCode {
    match err.kind() {
        ErrorKind::Busy | ErrorKind::InvalidState => StatusCode::CONFLICT,
        ErrorKind::Validation => StatusCode::BAD_REQUEST,
        ErrorKind::Failed => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

async fn index() -> Json<serde_json::Value> {
    Json(json!({
        "service": "benchctl",
        "version": env!("CARGO_PKG_VERSION"),
        "endpoints": {
            "GET /": "Service information",
            "GET /health": "Quick health check",
            "GET /status": "Detailed status",
            "POST /setup": "Upload project and launch the analyzer",
            "GET /sequence/structure": "Signal paths and measurements of the loaded sequence",
            "POST /run-signal-path": "Run all checked measurements in one signal path",
            "POST /run-all": "Run all checked measurements and export reports",
            "POST /shutdown": "Close the analyzer",
            "POST /reset": "Kill the analyzer and clear state",
        },
    }))
}

async fn health(State(state): State<AppState>) -> Json<HealthResponse> {
    let status = state.controller.status().await;
    let label = if status.state == ControllerState::Error {
        "degraded"
    } else {
        "healthy"
    };
    Json(HealthResponse {
        status: label.to_string(),
        state: status.state,
        uptime_seconds: status.uptime_seconds,
        timestamp: Utc::now(),
    })
}

async fn status(State(state): State<AppState>) -> Json<StatusResponse> {
    Json(StatusResponse::from(state.controller.status().await))
}

async fn setup(
    State(state): State<AppState>,
    mut multipart: Multipart,
) -> (StatusCode, Json<SetupResponse>) {
    let mut file: Option<(String, Vec<u8>)> = None;
    let mut project_name = None;
    let mut mode = None;
    let mut launch_args = None;

    loop {
        let field = match multipart.next_field().await {
            Ok(Some(field)) => field,
            Ok(None) => break,
            Err(e) => {
                return setup_rejection(
                    &state,
                    StatusCode::BAD_REQUEST,
                    format!("invalid multipart body: {e}"),
                )
            }
        };
        let name = field.name().map(str::to_string);
        match name.as_deref() {
            Some("file") => {
                let file_name = field
                    .file_name()
                    .unwrap_or("project.bproj")
                    .to_string();
                match field.bytes().await {
                    Ok(bytes) => file = Some((file_name, bytes.to_vec())),
                    Err(e) => {
                        return setup_rejection(
                            &state,
                            StatusCode::BAD_REQUEST,
                            format!("failed to read uploaded file: {e}"),
                        )
                    }
                }
            }
            Some("project_name") => project_name = field.text().await.ok(),
            Some("mode") => mode = field.text().await.ok(),
            Some("launch_args") => launch_args = field.text().await.ok(),
            _ => {}
        }
    }

    let Some((file_name, bytes)) = file else {
        return setup_rejection(
            &state,
            StatusCode::BAD_REQUEST,
            "no file provided; send the project file as `file` in multipart/form-data"
                .to_string(),
        );
    };

    let params = SetupParams {
        file_name,
        bytes,
        project_name,
        mode,
        launch_args,
    };
    match state.controller.setup(params).await {
        Ok(outcome) => (
            StatusCode::OK,
            Json(SetupResponse {
                success: true,
                message: "analyzer launched and project loaded successfully".to_string(),
                project_name: Some(outcome.identity.name),
                project_sha256: Some(outcome.identity.sha256),
                project_path: Some(outcome.identity.stored_path),
                killed_processes: outcome.killed_processes,
                state: state.controller.state(),
            }),
        ),
        Err(e) => setup_rejection(&state, error_status(&e), e.to_string()),
    }
}

fn setup_rejection(
    state: &AppState,
    code: StatusCode,
    message: String,
) -> (StatusCode, Json<SetupResponse>) {
    (
        code,
        Json(SetupResponse {
            success: false,
            message,
            project_name: None,
            project_sha256: None,
            project_path: None,
            killed_processes: 0,
            state: state.controller.state(),
        }),
    )
}

async fn sequence_structure(
    State(state): State<AppState>,
) -> (StatusCode, Json<SequenceStructureResponse>) {
    match state.controller.sequence_structure().await {
        Ok(structure) => {
            let total_measurements = structure.total_measurements();
            (
                StatusCode::OK,
                Json(SequenceStructureResponse {
                    success: true,
                    message: "sequence structure retrieved successfully".to_string(),
                    total_signal_paths: structure.signal_paths.len(),
                    total_measurements,
                    signal_paths: structure.signal_paths,
                    state: state.controller.state(),
                }),
            )
        }
        Err(e) => (
            error_status(&e),
            Json(SequenceStructureResponse {
                success: false,
                message: e.to_string(),
                signal_paths: Vec::new(),
                total_signal_paths: 0,
                total_measurements: 0,
                state: state.controller.state(),
            }),
        ),
    }
}

async fn run_signal_path(
    State(state): State<AppState>,
    Json(request): Json<RunSignalPathRequest>,
) -> (StatusCode, Json<RunSignalPathResponse>) {
    let outcome = state
        .controller
        .run_signal_path(&request.signal_path, request.timeout_seconds)
        .await;

    match outcome {
        Ok(summary) => {
            let message = format!(
                "signal path '{}' completed: {}/{} passed",
                request.signal_path, summary.measurements_passed, summary.measurements_run
            );
            (
                StatusCode::OK,
                Json(RunSignalPathResponse {
                    success: summary.all_succeeded(),
                    message,
                    signal_path: request.signal_path,
                    run_id: Some(summary.run_id),
                    measurements_run: summary.measurements_run,
                    measurements_passed: summary.measurements_passed,
                    measurements_failed: summary.measurements_failed,
                    total_duration_seconds: summary.total_duration_seconds,
                    results: summary.results,
                    state: state.controller.state(),
                }),
            )
        }
        Err(ControllerError::RunAborted { summary, source }) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(RunSignalPathResponse {
                success: false,
                message: format!("run aborted: {source}"),
                signal_path: request.signal_path,
                run_id: Some(summary.run_id),
                measurements_run: summary.measurements_run,
                measurements_passed: summary.measurements_passed,
                measurements_failed: summary.measurements_failed,
                total_duration_seconds: summary.total_duration_seconds,
                results: summary.results,
                state: state.controller.state(),
            }),
        ),
        Err(e) => (
            error_status(&e),
            Json(RunSignalPathResponse {
                success: false,
                message: e.to_string(),
                signal_path: request.signal_path,
                run_id: None,
                measurements_run: 0,
                measurements_passed: 0,
                measurements_failed: 0,
                total_duration_seconds: 0.0,
                results: Vec::new(),
                state: state.controller.state(),
            }),
        ),
    }
}

async fn run_all(
    State(state): State<AppState>,
    request: Option<Json<RunAllRequest>>,
) -> (StatusCode, Json<RunAllResponse>) {
    let Json(request) = request.unwrap_or_default();

    let params = RunAllParams {
        timeout_seconds: request.timeout_seconds,
        export_csv: request.export_csv,
        export_pdf: request.export_pdf,
        report_directory: request.report_directory,
    };
    match state.controller.run_all(params).await {
        Ok(outcome) => {
            let summary = outcome.summary;
            let mut message = format!(
                "all measurements completed: {}/{} passed",
                summary.measurements_passed, summary.measurements_run
            );
            for warning in &outcome.export_warnings {
                message.push_str("; ");
                message.push_str(warning);
            }
            (
                StatusCode::OK,
                Json(RunAllResponse {
                    success: summary.all_succeeded(),
                    message,
                    run_id: Some(summary.run_id),
                    signal_paths_run: summary.signal_paths_run,
                    measurements_run: summary.measurements_run,
                    measurements_passed: summary.measurements_passed,
                    measurements_failed: summary.measurements_failed,
                    total_duration_seconds: summary.total_duration_seconds,
                    all_passed: summary.all_passed(),
                    csv_report_path: summary.csv_report_path.clone(),
                    pdf_report_path: summary.pdf_report_path.clone(),
                    results: summary.results,
                    state: state.controller.state(),
                }),
            )
        }
        Err(ControllerError::RunAborted { summary, source }) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(RunAllResponse {
                success: false,
                message: format!("run aborted: {source}"),
                run_id: Some(summary.run_id),
                signal_paths_run: summary.signal_paths_run,
                measurements_run: summary.measurements_run,
                measurements_passed: summary.measurements_passed,
                measurements_failed: summary.measurements_failed,
                total_duration_seconds: summary.total_duration_seconds,
                all_passed: false,
                csv_report_path: None,
                pdf_report_path: None,
                results: summary.results,
                state: state.controller.state(),
            }),
        ),
        Err(e) => (
            error_status(&e),
            Json(RunAllResponse {
                success: false,
                message: e.to_string(),
                run_id: None,
                signal_paths_run: 0,
                measurements_run: 0,
                measurements_passed: 0,
                measurements_failed: 0,
                total_duration_seconds: 0.0,
                all_passed: false,
                csv_report_path: None,
                pdf_report_path: None,
                results: Vec::new(),
                state: state.controller.state(),
            }),
        ),
    }
}

async fn shutdown(
    State(state): State<AppState>,
    request: Option<Json<ShutdownRequest>>,
) -> (StatusCode, Json<ShutdownResponse>) {
    let Json(request) = request.unwrap_or_default();

    match state.controller.shutdown(request.force).await {
        Ok(()) => (
            StatusCode::OK,
            Json(ShutdownResponse {
                success: true,
                message: "analyzer shutdown complete".to_string(),
                state: state.controller.state(),
            }),
        ),
        Err(e) => (
            error_status(&e),
            Json(ShutdownResponse {
                success: false,
                message: e.to_string(),
                state: state.controller.state(),
            }),
        ),
    }
}

async fn reset(State(state): State<AppState>) -> (StatusCode, Json<ResetResponse>) {
    match state.controller.reset().await {
        Ok(killed) => (
            StatusCode::OK,
            Json(ResetResponse {
                success: true,
                message: format!("reset complete, killed {killed} process(es)"),
                killed_processes: killed,
                state: state.controller.state(),
            }),
        ),
        Err(e) => (
            error_status(&e),
            Json(ResetResponse {
                success: false,
                message: e.to_string(),
                killed_processes: 0,
                state: state.controller.state(),
            }),
        ),
    }
}
