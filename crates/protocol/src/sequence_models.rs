//! Sequence structure and measurement result models.
//!
//! The structure types mirror the hierarchy the analyzer exposes for a loaded
//! project: a sequence of signal paths, each containing ordered measurements.
//! The snapshot is read-only and must be re-queried whenever the project
//! changes; it is never cached across runs.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;
use uuid::Uuid;

/// A single test item within a signal path.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct Measurement {
    /// Zero-based position within the signal path.
    pub index: usize,

    /// Display name, unique within its signal path.
    pub name: String,

    /// Whether the item is selected to run. Unchecked measurements are
    /// skipped by every run scope.
    pub checked: bool,
}

/// A named group of measurements within a loaded sequence.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct SignalPath {
    /// Zero-based position within the sequence.
    pub index: usize,

    /// Display name, unique within the sequence.
    pub name: String,

    /// Whether the path is selected for run-all scope.
    pub checked: bool,

    /// Measurements in declared order.
    pub measurements: Vec<Measurement>,
}

/// Read-only snapshot of the loaded sequence, as reported by the analyzer.
#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq, Eq)]
pub struct SequenceStructure {
    /// Signal paths in declared order.
    pub signal_paths: Vec<SignalPath>,
}

impl SequenceStructure {
    /// Total number of measurements across all signal paths, checked or not.
    pub fn total_measurements(&self) -> usize {
        self.signal_paths.iter().map(|sp| sp.measurements.len()).sum()
    }

    /// Look up a signal path by display name.
    pub fn signal_path(&self, name: &str) -> Option<&SignalPath> {
        self.signal_paths.iter().find(|sp| sp.name == name)
    }
}

/// Outcome of a single measurement invocation.
///
/// `success` and `passed` are orthogonal: `success` means the automation call
/// completed without fault, `passed` is the measurement's own verdict against
/// its limits. A measurement can complete successfully and still fail.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct MeasurementResult {
    /// Signal path the measurement belongs to.
    pub signal_path: String,

    /// Measurement display name.
    pub name: String,

    /// Whether the automation call completed without fault.
    pub success: bool,

    /// The analyzer's pass/fail verdict. Always false when `success` is.
    pub passed: bool,

    /// Wall-clock duration of the invocation.
    pub duration_seconds: f64,

    /// Metered readings by name, e.g. `"Level (dBrA)" -> -0.31`.
    ///
    /// BTreeMap keeps key order stable across serializations.
    #[serde(default)]
    pub meter_values: BTreeMap<String, f64>,

    /// Fault description when `success` is false.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Aggregate outcome of one run scope (a single signal path or all checked
/// paths).
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct RunSummary {
    /// Unique id for this run, for correlating logs and reports.
    pub run_id: Uuid,

    /// Number of signal paths the run walked.
    pub signal_paths_run: usize,

    /// Measurements attempted (checked items the runner reached).
    pub measurements_run: usize,

    /// Measurements that completed and passed their limits.
    pub measurements_passed: usize,

    /// Measurements that completed but failed their limits.
    ///
    /// Faulted calls (`success == false`) are counted in `measurements_run`
    /// but in neither passed nor failed.
    pub measurements_failed: usize,

    /// Sum of per-measurement durations.
    pub total_duration_seconds: f64,

    /// Per-measurement outcomes in execution order.
    pub results: Vec<MeasurementResult>,

    /// Exported CSV report, when requested and successful.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub csv_report_path: Option<PathBuf>,

    /// Exported PDF report, when requested and successful.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pdf_report_path: Option<PathBuf>,
}

impl RunSummary {
    /// Start an empty summary with a fresh run id.
    pub fn new() -> Self {
        Self {
            run_id: Uuid::new_v4(),
            signal_paths_run: 0,
            measurements_run: 0,
            measurements_passed: 0,
            measurements_failed: 0,
            total_duration_seconds: 0.0,
            results: Vec::new(),
            csv_report_path: None,
            pdf_report_path: None,
        }
    }

    /// Whether every attempted measurement completed without fault.
    pub fn all_succeeded(&self) -> bool {
        self.results.iter().all(|r| r.success)
    }

    /// Whether every successfully completed measurement also passed.
    pub fn all_passed(&self) -> bool {
        self.results.iter().filter(|r| r.success).all(|r| r.passed)
    }

    /// Fold one result into the aggregate counters.
    pub fn record(&mut self, result: MeasurementResult) {
        self.measurements_run += 1;
        if result.success {
            if result.passed {
                self.measurements_passed += 1;
            } else {
                self.measurements_failed += 1;
            }
        }
        self.total_duration_seconds += result.duration_seconds;
        self.results.push(result);
    }
}

impl Default for RunSummary {
    fn default() -> Self {
        Self::new()
    }
}
