//! Mock automation client for testing.
//!
//! Scripted stand-in for a real analyzer session: the structure it reports,
//! per-measurement verdicts, injected faults, and artificial latency are all
//! configurable. Also served behind the `--mock-automation` server flag for
//! protocol-level smoke testing without an analyzer installed.

use crate::automation::client::{AutomationClient, AutomationError, ReportFormat};
use async_trait::async_trait;
use bc_protocol::{Measurement, MeasurementResult, SequenceStructure, SignalPath};
use chrono::Utc;
use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::Duration;

/// Scripted outcome for one measurement.
#[derive(Debug, Clone)]
pub enum Behavior {
    /// Call completes, verdict passes.
    Pass,
    /// Call completes, verdict fails its limits.
    FailLimits,
    /// Call faults with an execution failure.
    Fault(String),
    /// Call times out.
    TimeOut,
}

pub struct MockClient {
    structure: SequenceStructure,
    behaviors: HashMap<String, Behavior>,
    latency: Option<Duration>,
    load_failure: Option<String>,
    query_failure: Option<String>,
    export_failure: Option<String>,
    refuse_close: bool,
    calls: Mutex<Vec<String>>,
}

impl MockClient {
    /// Client reporting `structure` with every measurement passing.
    pub fn new(structure: SequenceStructure) -> Self {
        Self {
            structure,
            behaviors: HashMap::new(),
            latency: None,
            load_failure: None,
            query_failure: None,
            export_failure: None,
            refuse_close: false,
            calls: Mutex::new(Vec::new()),
        }
    }

    /// Client reporting the demo structure with every measurement passing.
    pub fn demo() -> Self {
        Self::new(demo_structure())
    }

    /// Script the outcome of one measurement by name.
    pub fn with_behavior(mut self, measurement: &str, behavior: Behavior) -> Self {
        self.behaviors.insert(measurement.to_string(), behavior);
        self
    }

    /// Sleep this long inside every automation call.
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = Some(latency);
        self
    }

    /// Make `load_project` fail.
    pub fn failing_load(mut self, message: &str) -> Self {
        self.load_failure = Some(message.to_string());
        self
    }

    /// Make `sequence_structure` fail.
    pub fn failing_query(mut self, message: &str) -> Self {
        self.query_failure = Some(message.to_string());
        self
    }

    /// Make `export_report` fail.
    pub fn failing_export(mut self, message: &str) -> Self {
        self.export_failure = Some(message.to_string());
        self
    }

    /// Make `request_close` time out.
    pub fn refusing_close(mut self) -> Self {
        self.refuse_close = true;
        self
    }

    /// Operations invoked so far, in order.
    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    fn record(&self, call: String) {
        self.calls.lock().unwrap().push(call);
    }

    async fn simulate_latency(&self) {
        if let Some(latency) = self.latency {
            tokio::time::sleep(latency).await;
        }
    }
}

#[async_trait]
impl AutomationClient for MockClient {
    async fn load_project(
        &self,
        path: &Path,
        mode: &str,
        _args: &str,
    ) -> Result<(), AutomationError> {
        self.record(format!("load_project:{}:{mode}", path.display()));
        self.simulate_latency().await;
        match &self.load_failure {
            Some(message) => Err(AutomationError::LoadFailure(message.clone())),
            None => Ok(()),
        }
    }

    async fn sequence_structure(&self) -> Result<SequenceStructure, AutomationError> {
        self.record("sequence_structure".to_string());
        self.simulate_latency().await;
        match &self.query_failure {
            Some(message) => Err(AutomationError::QueryFailure(message.clone())),
            None => Ok(self.structure.clone()),
        }
    }

    async fn run_measurement(
        &self,
        signal_path: &str,
        measurement: &str,
        timeout: Duration,
    ) -> Result<MeasurementResult, AutomationError> {
        self.record(format!("run_measurement:{signal_path}/{measurement}"));
        self.simulate_latency().await;

        let behavior = self.behaviors.get(measurement).unwrap_or(&Behavior::Pass);
        let duration_seconds = self.latency.map_or(0.01, |l| l.as_secs_f64());

        match behavior {
            Behavior::Fault(message) => {
                Err(AutomationError::ExecutionFailure(message.clone()))
            }
            Behavior::TimeOut => Err(AutomationError::Timeout(timeout.as_secs_f64())),
            verdict => {
                let passed = matches!(verdict, Behavior::Pass);
                let mut meter_values = BTreeMap::new();
                meter_values.insert("Level (dBrA)".to_string(), -0.31);
                meter_values.insert("THD+N (%)".to_string(), 0.0021);
                Ok(MeasurementResult {
                    signal_path: signal_path.to_string(),
                    name: measurement.to_string(),
                    success: true,
                    passed,
                    duration_seconds,
                    meter_values,
                    error: None,
                })
            }
        }
    }

    async fn export_report(
        &self,
        format: ReportFormat,
        directory: &Path,
    ) -> Result<PathBuf, AutomationError> {
        self.record(format!("export_report:{}", format.extension()));
        self.simulate_latency().await;
        if let Some(message) = &self.export_failure {
            return Err(AutomationError::ExportFailure(message.clone()));
        }
        let stamp = Utc::now().format("%Y%m%d-%H%M%S%.3f");
        Ok(directory.join(format!("run-report-{stamp}.{}", format.extension())))
    }

    async fn request_close(&self, timeout: Duration) -> Result<(), AutomationError> {
        self.record("request_close".to_string());
        if self.refuse_close {
            return Err(AutomationError::Timeout(timeout.as_secs_f64()));
        }
        self.simulate_latency().await;
        Ok(())
    }
}

/// The structure used by the demo mock and the smoke-test suite:
/// "Analog Output" (checked, 3 checked measurements) and "Digital Input"
/// (checked, 2 measurements of which 1 is checked).
pub fn demo_structure() -> SequenceStructure {
    SequenceStructure {
        signal_paths: vec![
            SignalPath {
                index: 0,
                name: "Analog Output".to_string(),
                checked: true,
                measurements: vec![
                    Measurement {
                        index: 0,
                        name: "Level and Gain".to_string(),
                        checked: true,
                    },
                    Measurement {
                        index: 1,
                        name: "THD+N".to_string(),
                        checked: true,
                    },
                    Measurement {
                        index: 2,
                        name: "Frequency Response".to_string(),
                        checked: true,
                    },
                ],
            },
            SignalPath {
                index: 1,
                name: "Digital Input".to_string(),
                checked: true,
                measurements: vec![
                    Measurement {
                        index: 0,
                        name: "Bit Depth".to_string(),
                        checked: true,
                    },
                    Measurement {
                        index: 1,
                        name: "Jitter".to_string(),
                        checked: false,
                    },
                ],
            },
        ],
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_mock_client_passes_by_default() {
        let client = MockClient::demo();
        let result = client
            .run_measurement("Analog Output", "THD+N", Duration::from_secs(5))
            .await
            .unwrap();
        assert!(result.success);
        assert!(result.passed);
        assert!(!result.meter_values.is_empty());
    }

    #[tokio::test]
    async fn test_mock_client_scripted_fault() {
        let client = MockClient::demo()
            .with_behavior("THD+N", Behavior::Fault("instrument fault".to_string()));

        let err = client
            .run_measurement("Analog Output", "THD+N", Duration::from_secs(5))
            .await
            .unwrap_err();
        assert!(matches!(err, AutomationError::ExecutionFailure(_)));

        // Other measurements are unaffected.
        let result = client
            .run_measurement("Analog Output", "Level and Gain", Duration::from_secs(5))
            .await
            .unwrap();
        assert!(result.passed);
    }

    #[tokio::test]
    async fn test_mock_client_scripted_timeout() {
        let client = MockClient::demo().with_behavior("Bit Depth", Behavior::TimeOut);
        let err = client
            .run_measurement("Digital Input", "Bit Depth", Duration::from_secs(30))
            .await
            .unwrap_err();
        assert_eq!(err, AutomationError::Timeout(30.0));
    }

    #[tokio::test]
    async fn test_mock_client_records_calls_in_order() {
        let client = MockClient::demo();
        client.sequence_structure().await.unwrap();
        client
            .run_measurement("Analog Output", "Level and Gain", Duration::from_secs(5))
            .await
            .unwrap();

        let calls = client.calls();
        assert_eq!(calls.len(), 2);
        assert_eq!(calls[0], "sequence_structure");
        assert_eq!(calls[1], "run_measurement:Analog Output/Level and Gain");
    }

    #[tokio::test]
    async fn test_mock_client_failing_load() {
        let client = MockClient::demo().failing_load("file is corrupt");
        let err = client
            .load_project(Path::new("/tmp/x.bproj"), "sequence", "")
            .await
            .unwrap_err();
        assert!(matches!(err, AutomationError::LoadFailure(_)));
    }

    #[test]
    fn test_demo_structure_shape() {
        let structure = demo_structure();
        assert_eq!(structure.signal_paths.len(), 2);
        assert_eq!(structure.total_measurements(), 5);

        let checked: usize = structure
            .signal_paths
            .iter()
            .filter(|sp| sp.checked)
            .map(|sp| sp.measurements.iter().filter(|m| m.checked).count())
            .sum();
        assert_eq!(checked, 4);
    }
}
