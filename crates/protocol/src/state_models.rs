//! Controller lifecycle state models.
//!
//! This module defines the structures for tracking the lifecycle of the
//! supervised analyzer application and the project loaded into it.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;

/// Lifecycle state of the supervised analyzer application.
///
/// Normal progression during a session:
/// NotRunning -> Starting -> Idle -> RunningStep -> Idle
///
/// Special state:
/// - Error: the last operation failed; the process may or may not still be
///   alive. Only `reset` or a fresh `setup` leave this state.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ControllerState {
    /// No controlled process exists.
    NotRunning,

    /// Process launch and project load in progress.
    Starting,

    /// Process running, project loaded, ready to execute.
    Idle,

    /// A measurement or signal path is executing.
    RunningStep,

    /// Last operation failed; explicit recovery required.
    Error,
}

impl ControllerState {
    /// Wire name of the state, matching its serde representation.
    pub fn as_str(self) -> &'static str {
        match self {
            ControllerState::NotRunning => "not_running",
            ControllerState::Starting => "starting",
            ControllerState::Idle => "idle",
            ControllerState::RunningStep => "running_step",
            ControllerState::Error => "error",
        }
    }
}

impl fmt::Display for ControllerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Identity of the currently loaded project artifact.
///
/// Created once per successful setup and replaced wholesale on the next one,
/// never mutated in place.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct ProjectIdentity {
    /// Display name, defaulting to the uploaded file's stem.
    pub name: String,

    /// SHA-256 over the exact uploaded bytes, as 64 lowercase hex chars.
    ///
    /// The same bytes always produce the same digest, so clients can verify
    /// which revision of a project the server is holding.
    pub sha256: String,

    /// Where the uploaded file was persisted inside the working directory.
    pub stored_path: PathBuf,

    /// When the project was loaded into the analyzer.
    pub loaded_at: DateTime<Utc>,
}

/// Read-only view of the supervised analyzer process.
///
/// The supervisor owns the underlying child; everything else sees only this
/// handle. It is invalidated the moment the process is confirmed dead or
/// killed, so a stale pid is never reused.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProcessHandle {
    /// OS process id of the analyzer.
    pub pid: u32,

    /// When the process was launched.
    pub launched_at: DateTime<Utc>,
}

/// The most recent failure recorded by the controller.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct LastError {
    pub message: String,
    pub at: DateTime<Utc>,
}

/// Snapshot of the full server state, recomputed on each status query.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct ServerStatus {
    /// Current controller state.
    pub state: ControllerState,

    /// Identity of the loaded project, if any.
    pub project: Option<ProjectIdentity>,

    /// Pid of the supervised analyzer process, if any.
    pub pid: Option<u32>,

    /// Most recent recorded failure, if any.
    pub last_error: Option<LastError>,

    /// When the server started.
    pub server_started_at: DateTime<Utc>,

    /// Seconds since the server started.
    pub uptime_seconds: f64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_controller_state_wire_names() {
        assert_eq!(ControllerState::NotRunning.as_str(), "not_running");
        assert_eq!(ControllerState::Starting.as_str(), "starting");
        assert_eq!(ControllerState::Idle.as_str(), "idle");
        assert_eq!(ControllerState::RunningStep.as_str(), "running_step");
        assert_eq!(ControllerState::Error.as_str(), "error");
    }

    #[test]
    fn test_controller_state_serde_matches_as_str() {
        for state in [
            ControllerState::NotRunning,
            ControllerState::Starting,
            ControllerState::Idle,
            ControllerState::RunningStep,
            ControllerState::Error,
        ] {
            let json = serde_json::to_string(&state).unwrap();
            assert_eq!(json, format!("\"{}\"", state.as_str()));
        }
    }

    #[test]
    fn test_project_identity_roundtrip() {
        let identity = ProjectIdentity {
            name: "demo".to_string(),
            sha256: "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
                .to_string(),
            stored_path: PathBuf::from("/tmp/benchctl/projects/demo.bproj"),
            loaded_at: Utc::now(),
        };

        let json = serde_json::to_string(&identity).unwrap();
        let back: ProjectIdentity = serde_json::from_str(&json).unwrap();
        assert_eq!(back, identity);
    }
}
