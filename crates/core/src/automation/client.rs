//! AutomationClient trait and supporting types.
//!
//! The analyzer's native automation interface is host-specific; everything
//! above it depends only on this trait, so a test double can simulate
//! latency, partial failure, and timeouts without a real analyzer present.

use async_trait::async_trait;
use bc_protocol::{MeasurementResult, SequenceStructure};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

/// Report formats the analyzer can export.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReportFormat {
    Csv,
    Pdf,
}

impl ReportFormat {
    pub fn extension(self) -> &'static str {
        match self {
            ReportFormat::Csv => "csv",
            ReportFormat::Pdf => "pdf",
        }
    }
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum AutomationError {
    #[error("failed to load project: {0}")]
    LoadFailure(String),
    #[error("failed to query sequence structure: {0}")]
    QueryFailure(String),
    #[error("measurement execution failed: {0}")]
    ExecutionFailure(String),
    #[error("report export failed: {0}")]
    ExportFailure(String),
    #[error("automation call timed out after {0:.1}s")]
    Timeout(f64),
}

impl AutomationError {
    /// Whether this failure leaves the analyzer in an indeterminate state.
    ///
    /// A timeout means the call was abandoned mid-flight; the session cannot
    /// be assumed usable afterwards.
    pub fn is_timeout(&self) -> bool {
        matches!(self, AutomationError::Timeout(_))
    }
}

/// Capability boundary to the running analyzer application.
///
/// Every call must honor its timeout (the explicit parameter where one is
/// taken, the implementation's configured default otherwise) and return
/// [`AutomationError::Timeout`] on expiry rather than blocking indefinitely.
#[async_trait]
pub trait AutomationClient: Send + Sync {
    /// Open the project file in the running analyzer.
    async fn load_project(&self, path: &Path, mode: &str, args: &str)
        -> Result<(), AutomationError>;

    /// Snapshot the loaded sequence's signal paths and measurements.
    async fn sequence_structure(&self) -> Result<SequenceStructure, AutomationError>;

    /// Run a single measurement and return its verdict and meter readings.
    async fn run_measurement(
        &self,
        signal_path: &str,
        measurement: &str,
        timeout: Duration,
    ) -> Result<MeasurementResult, AutomationError>;

    /// Export a report for the last run into `directory`, returning the
    /// written file's path.
    async fn export_report(
        &self,
        format: ReportFormat,
        directory: &Path,
    ) -> Result<PathBuf, AutomationError>;

    /// Ask the analyzer to close its session and exit cooperatively.
    async fn request_close(&self, timeout: Duration) -> Result<(), AutomationError>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    struct TestClient {
        reachable: bool,
    }

    #[async_trait]
    impl AutomationClient for TestClient {
        async fn load_project(
            &self,
            _path: &Path,
            _mode: &str,
            _args: &str,
        ) -> Result<(), AutomationError> {
            if self.reachable {
                Ok(())
            } else {
                Err(AutomationError::LoadFailure("no session".to_string()))
            }
        }

        async fn sequence_structure(&self) -> Result<SequenceStructure, AutomationError> {
            Ok(SequenceStructure::default())
        }

        async fn run_measurement(
            &self,
            signal_path: &str,
            measurement: &str,
            _timeout: Duration,
        ) -> Result<MeasurementResult, AutomationError> {
            Ok(MeasurementResult {
                signal_path: signal_path.to_string(),
                name: measurement.to_string(),
                success: true,
                passed: true,
                duration_seconds: 0.0,
                meter_values: BTreeMap::new(),
                error: None,
            })
        }

        async fn export_report(
            &self,
            format: ReportFormat,
            directory: &Path,
        ) -> Result<PathBuf, AutomationError> {
            Ok(directory.join(format!("report.{}", format.extension())))
        }

        async fn request_close(&self, _timeout: Duration) -> Result<(), AutomationError> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_trait_object_dispatch() {
        let client: Box<dyn AutomationClient> = Box::new(TestClient { reachable: true });
        client
            .load_project(Path::new("/tmp/demo.bproj"), "sequence", "")
            .await
            .unwrap();
        let result = client
            .run_measurement("Analog Output", "Level and Gain", Duration::from_secs(5))
            .await
            .unwrap();
        assert!(result.success);
        assert_eq!(result.signal_path, "Analog Output");
    }

    #[tokio::test]
    async fn test_load_failure_surfaces() {
        let client = TestClient { reachable: false };
        let err = client
            .load_project(Path::new("/tmp/demo.bproj"), "sequence", "")
            .await
            .unwrap_err();
        assert!(matches!(err, AutomationError::LoadFailure(_)));
        assert!(!err.is_timeout());
    }

    #[test]
    fn test_report_format_extensions() {
        assert_eq!(ReportFormat::Csv.extension(), "csv");
        assert_eq!(ReportFormat::Pdf.extension(), "pdf");
    }

    #[test]
    fn test_timeout_classification() {
        assert!(AutomationError::Timeout(120.0).is_timeout());
        assert!(!AutomationError::ExecutionFailure("x".to_string()).is_timeout());
    }
}
