//! HTTP request and response bodies.
//!
//! One request/response pair per server endpoint. Every mutating response
//! carries a `success` flag, a human-readable `message`, and the controller
//! `state` observed after the operation, so a client can always recover
//! context from the response alone.

use crate::sequence_models::{MeasurementResult, SignalPath};
use crate::state_models::{ControllerState, ServerStatus};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use uuid::Uuid;

fn default_true() -> bool {
    true
}

/// Response for `GET /health`.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct HealthResponse {
    /// "healthy", or "degraded" when the controller is in the error state.
    pub status: String,

    pub state: ControllerState,

    pub uptime_seconds: f64,

    pub timestamp: DateTime<Utc>,
}

/// Response for `GET /status`.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct StatusResponse {
    pub state: ControllerState,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub project_name: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub project_sha256: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub project_path: Option<PathBuf>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pid: Option<u32>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_error_at: Option<DateTime<Utc>>,

    pub server_started_at: DateTime<Utc>,

    pub uptime_seconds: f64,
}

impl From<ServerStatus> for StatusResponse {
    fn from(status: ServerStatus) -> Self {
        let (project_name, project_sha256, project_path) = match status.project {
            Some(p) => (Some(p.name), Some(p.sha256), Some(p.stored_path)),
            None => (None, None, None),
        };
        let (last_error, last_error_at) = match status.last_error {
            Some(e) => (Some(e.message), Some(e.at)),
            None => (None, None),
        };
        Self {
            state: status.state,
            project_name,
            project_sha256,
            project_path,
            pid: status.pid,
            last_error,
            last_error_at,
            server_started_at: status.server_started_at,
            uptime_seconds: status.uptime_seconds,
        }
    }
}

/// Response for `POST /setup`.
///
/// The project file itself arrives as the `file` part of a multipart form;
/// `project_name`, `mode`, and `launch_args` are optional sibling fields.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct SetupResponse {
    pub success: bool,

    pub message: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub project_name: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub project_sha256: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub project_path: Option<PathBuf>,

    /// Stray analyzer processes reclaimed before the launch.
    #[serde(default)]
    pub killed_processes: u32,

    pub state: ControllerState,
}

/// Response for `GET /sequence/structure`.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct SequenceStructureResponse {
    pub success: bool,

    pub message: String,

    #[serde(default)]
    pub signal_paths: Vec<SignalPath>,

    #[serde(default)]
    pub total_signal_paths: usize,

    #[serde(default)]
    pub total_measurements: usize,

    pub state: ControllerState,
}

/// Request for `POST /run-signal-path`.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct RunSignalPathRequest {
    /// Name of the signal path to run.
    pub signal_path: String,

    /// Per-measurement timeout. Defaults server-side when omitted.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_seconds: Option<f64>,
}

/// Response for `POST /run-signal-path`.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct RunSignalPathResponse {
    pub success: bool,

    pub message: String,

    pub signal_path: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub run_id: Option<Uuid>,

    #[serde(default)]
    pub measurements_run: usize,

    #[serde(default)]
    pub measurements_passed: usize,

    #[serde(default)]
    pub measurements_failed: usize,

    #[serde(default)]
    pub total_duration_seconds: f64,

    #[serde(default)]
    pub results: Vec<MeasurementResult>,

    pub state: ControllerState,
}

/// Request for `POST /run-all`. All fields optional.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct RunAllRequest {
    /// Per-measurement timeout. Defaults server-side when omitted.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_seconds: Option<f64>,

    #[serde(default = "default_true")]
    pub export_csv: bool,

    #[serde(default)]
    pub export_pdf: bool,

    /// Target directory for exported reports. Defaults to the server's
    /// reports directory.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub report_directory: Option<PathBuf>,
}

impl Default for RunAllRequest {
    fn default() -> Self {
        Self {
            timeout_seconds: None,
            export_csv: true,
            export_pdf: false,
            report_directory: None,
        }
    }
}

/// Response for `POST /run-all`.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct RunAllResponse {
    pub success: bool,

    pub message: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub run_id: Option<Uuid>,

    #[serde(default)]
    pub signal_paths_run: usize,

    #[serde(default)]
    pub measurements_run: usize,

    #[serde(default)]
    pub measurements_passed: usize,

    #[serde(default)]
    pub measurements_failed: usize,

    #[serde(default)]
    pub total_duration_seconds: f64,

    /// Whether every successfully completed measurement passed its limits.
    #[serde(default)]
    pub all_passed: bool,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub csv_report_path: Option<PathBuf>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pdf_report_path: Option<PathBuf>,

    #[serde(default)]
    pub results: Vec<MeasurementResult>,

    pub state: ControllerState,
}

/// Request for `POST /shutdown`.
#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
pub struct ShutdownRequest {
    /// Force-kill the analyzer if the graceful close does not complete.
    #[serde(default)]
    pub force: bool,
}

/// Response for `POST /shutdown`.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct ShutdownResponse {
    pub success: bool,

    pub message: String,

    pub state: ControllerState,
}

/// Response for `POST /reset`.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct ResetResponse {
    pub success: bool,

    pub message: String,

    /// Analyzer processes killed by the reclaim scan.
    #[serde(default)]
    pub killed_processes: u32,

    pub state: ControllerState,
}
