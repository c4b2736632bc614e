//! Controller configuration.

use std::path::PathBuf;
use std::time::Duration;

/// Static configuration for a [`crate::controller::Controller`] instance.
///
/// All values are decided at server startup (CLI arguments); nothing here
/// changes while the controller is running.
#[derive(Debug, Clone)]
pub struct ControllerConfig {
    /// Analyzer executable. A bare name is resolved through `PATH` at launch.
    pub executable: PathBuf,

    /// Command-line pattern identifying analyzer processes for the reclaim
    /// scan. Matches stale instances from crashed sessions, not just the
    /// tracked pid.
    pub process_match: String,

    /// Operating mode passed to the analyzer at launch, e.g. "sequence".
    /// Empty means the analyzer's own default.
    pub default_mode: String,

    /// Extra launch arguments, whitespace-separated.
    pub default_launch_args: String,

    /// Per-measurement timeout when a request does not supply one.
    pub default_measurement_timeout: Duration,

    /// How long a graceful close may take before it counts as failed.
    pub close_timeout: Duration,

    /// Reclaim stray analyzer instances before every launch.
    pub kill_existing_on_setup: bool,
}

impl ControllerConfig {
    /// Configuration for an analyzer reachable as `executable`, with the
    /// reclaim pattern defaulting to the executable's file name.
    pub fn for_executable(executable: impl Into<PathBuf>) -> Self {
        let executable = executable.into();
        let process_match = executable
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| executable.to_string_lossy().into_owned());
        Self {
            executable,
            process_match,
            default_mode: "sequence".to_string(),
            default_launch_args: String::new(),
            default_measurement_timeout: Duration::from_secs(120),
            close_timeout: Duration::from_secs(10),
            kill_existing_on_setup: true,
        }
    }
}
