//! Sequence execution engine.
//!
//! The runner walks a sequence structure for one scope, a single signal
//! path or all checked paths, invoking the automation client once per
//! checked measurement and folding the outcomes into a [`RunSummary`].
//!
//! Failure policy: a single measurement's execution failure is recorded as a
//! non-passing result and the walk continues, so operators get the complete
//! picture of one run instead of an early abort. A timeout aborts the whole
//! scope immediately: the analyzer is presumed to be in an indeterminate
//! state afterwards.

use crate::automation::{AutomationClient, AutomationError, ReportFormat};
use bc_protocol::{MeasurementResult, RunSummary, SequenceStructure, SignalPath};
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;
use tracing::{info, warn};

/// What part of the structure a run covers.
#[derive(Debug, Clone, Copy)]
pub enum RunScope<'a> {
    /// One signal path by name. The named path runs even when unchecked
    /// (an explicit request wins), but unchecked measurements inside it are
    /// still skipped.
    SignalPath(&'a str),

    /// Every checked signal path, in declared order.
    AllChecked,
}

#[derive(Error, Debug)]
pub enum RunnerError {
    #[error("signal path `{0}` not found in the loaded sequence")]
    UnknownSignalPath(String),

    /// The scope was aborted mid-walk; `summary` holds everything gathered
    /// up to the abort.
    #[error("run aborted: {source}")]
    Aborted {
        summary: RunSummary,
        source: AutomationError,
    },
}

/// Report export settings for a completed run-all.
#[derive(Debug, Clone)]
pub struct ExportOptions {
    pub csv: bool,
    pub pdf: bool,
    pub directory: PathBuf,
}

pub struct SequenceRunner<'a> {
    client: &'a dyn AutomationClient,
}

impl<'a> SequenceRunner<'a> {
    pub fn new(client: &'a dyn AutomationClient) -> Self {
        Self { client }
    }

    /// Walk `scope` over `structure`, one automation call per checked
    /// measurement, with `timeout` applied to each call.
    pub async fn run(
        &self,
        structure: &SequenceStructure,
        scope: RunScope<'_>,
        timeout: Duration,
    ) -> Result<RunSummary, RunnerError> {
        let selected: Vec<&SignalPath> = match scope {
            RunScope::SignalPath(name) => {
                let path = structure
                    .signal_path(name)
                    .ok_or_else(|| RunnerError::UnknownSignalPath(name.to_string()))?;
                vec![path]
            }
            RunScope::AllChecked => structure
                .signal_paths
                .iter()
                .filter(|sp| sp.checked)
                .collect(),
        };

        let mut summary = RunSummary::new();

        for path in selected {
            summary.signal_paths_run += 1;
            for measurement in path.measurements.iter().filter(|m| m.checked) {
                info!(
                    "running measurement: signal_path={}, measurement={}",
                    path.name, measurement.name
                );

                match self
                    .client
                    .run_measurement(&path.name, &measurement.name, timeout)
                    .await
                {
                    Ok(result) => summary.record(result),
                    Err(AutomationError::ExecutionFailure(message)) => {
                        warn!(
                            "measurement `{}` faulted, continuing: {message}",
                            measurement.name
                        );
                        summary.record(MeasurementResult {
                            signal_path: path.name.clone(),
                            name: measurement.name.clone(),
                            success: false,
                            passed: false,
                            duration_seconds: 0.0,
                            meter_values: BTreeMap::new(),
                            error: Some(message),
                        });
                    }
                    Err(source) => {
                        warn!(
                            "measurement `{}` aborted the run: {source}",
                            measurement.name
                        );
                        return Err(RunnerError::Aborted { summary, source });
                    }
                }
            }
        }

        info!(
            "run complete: {}/{} passed across {} signal path(s)",
            summary.measurements_passed, summary.measurements_run, summary.signal_paths_run
        );
        Ok(summary)
    }

    /// Request the configured report exports and attach the resulting paths
    /// to `summary`. A failed export leaves its path `None`; the returned
    /// warnings describe what went wrong.
    pub async fn export(&self, summary: &mut RunSummary, options: &ExportOptions) -> Vec<String> {
        let mut warnings = Vec::new();

        if options.csv {
            match self
                .client
                .export_report(ReportFormat::Csv, &options.directory)
                .await
            {
                Ok(path) => {
                    info!("CSV report exported to {}", path.display());
                    summary.csv_report_path = Some(path);
                }
                Err(e) => {
                    warn!("CSV export failed: {e}");
                    warnings.push(format!("CSV export failed: {e}"));
                }
            }
        }

        if options.pdf {
            match self
                .client
                .export_report(ReportFormat::Pdf, &options.directory)
                .await
            {
                Ok(path) => {
                    info!("PDF report exported to {}", path.display());
                    summary.pdf_report_path = Some(path);
                }
                Err(e) => {
                    warn!("PDF export failed: {e}");
                    warnings.push(format!("PDF export failed: {e}"));
                }
            }
        }

        warnings
    }
}
