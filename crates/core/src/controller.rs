//! Controller state machine and operation entry points.
//!
//! The controller owns the lifecycle state of the analyzer application and
//! serializes every client-triggered operation against it. The analyzer
//! accepts exactly one automation session, so there is a single execution
//! slot: a mutating operation holds it for its whole duration, and a
//! concurrent mutating call is rejected immediately with `Busy` rather than
//! queued. Snapshot reads (`status`) take only a short state lock and are
//! never starved behind a long-running operation.
//!
//! State, project identity, and process handle are updated together under
//! one lock, as a single unit: identity and handle exist
//! simultaneously exactly when the state says a session exists.

use crate::automation::{AutomationClient, AutomationError};
use crate::config::ControllerConfig;
use crate::error::ControllerError;
use crate::runner::{ExportOptions, RunScope, RunnerError, SequenceRunner};
use crate::store::ProjectStore;
use crate::supervisor::ProcessSupervisor;
use bc_protocol::{
    ControllerState, LastError, ProjectIdentity, RunSummary, SequenceStructure, ServerStatus,
};
use chrono::{DateTime, Utc};
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing::{error, info, warn};

/// Inputs to [`Controller::setup`].
#[derive(Debug, Clone)]
pub struct SetupParams {
    /// File name from the upload, reduced to its final component on store.
    pub file_name: String,

    /// Exact uploaded bytes.
    pub bytes: Vec<u8>,

    /// Display name override; defaults to the file stem.
    pub project_name: Option<String>,

    /// Analyzer operating mode; defaults from configuration.
    pub mode: Option<String>,

    /// Extra launch arguments; defaults from configuration.
    pub launch_args: Option<String>,
}

/// Result of a successful [`Controller::setup`].
#[derive(Debug, Clone)]
pub struct SetupOutcome {
    pub identity: ProjectIdentity,
    pub pid: u32,
    pub killed_processes: u32,
}

/// Inputs to [`Controller::run_all`].
#[derive(Debug, Clone)]
pub struct RunAllParams {
    pub timeout_seconds: Option<f64>,
    pub export_csv: bool,
    pub export_pdf: bool,
    pub report_directory: Option<PathBuf>,
}

/// Result of a successful [`Controller::run_all`].
#[derive(Debug, Clone)]
pub struct RunAllOutcome {
    pub summary: RunSummary,

    /// Export problems that did not fail the run (paths stay unset).
    pub export_warnings: Vec<String>,
}

/// The state unit guarded by the snapshot lock.
#[derive(Debug, Clone)]
struct Shared {
    state: ControllerState,
    project: Option<ProjectIdentity>,
    handle: Option<bc_protocol::ProcessHandle>,
    last_error: Option<LastError>,
}

impl Default for Shared {
    fn default() -> Self {
        Self {
            state: ControllerState::NotRunning,
            project: None,
            handle: None,
            last_error: None,
        }
    }
}

pub struct Controller {
    config: ControllerConfig,
    store: ProjectStore,
    client: Arc<dyn AutomationClient>,

    /// The execution slot. Mutating operations `try_lock` it and hold it for
    /// their whole duration; holding it is also the only way to touch the
    /// supervisor.
    slot: tokio::sync::Mutex<ProcessSupervisor>,

    /// Snapshot state, held only long enough to copy or update it.
    shared: Mutex<Shared>,

    started_at: DateTime<Utc>,
}

impl Controller {
    pub fn new(
        config: ControllerConfig,
        store: ProjectStore,
        client: Arc<dyn AutomationClient>,
    ) -> Self {
        let supervisor = ProcessSupervisor::new(&config.executable, config.process_match.clone());
        Self {
            config,
            store,
            client,
            slot: tokio::sync::Mutex::new(supervisor),
            shared: Mutex::new(Shared::default()),
            started_at: Utc::now(),
        }
    }

    /// Current state, from a short snapshot read.
    pub fn state(&self) -> ControllerState {
        self.shared.lock().unwrap().state
    }

    /// Full status snapshot. Also performs crash detection: when no
    /// operation holds the execution slot and the tracked process has died,
    /// the controller transitions to Error and invalidates the handle before
    /// the snapshot is taken.
    pub async fn status(&self) -> ServerStatus {
        self.probe_process();
        let shared = self.shared.lock().unwrap().clone();
        ServerStatus {
            state: shared.state,
            project: shared.project,
            pid: shared.handle.map(|h| h.pid),
            last_error: shared.last_error,
            server_started_at: self.started_at,
            uptime_seconds: uptime_seconds(self.started_at),
        }
    }

    /// Upload a project, (re)launch the analyzer, and load the project into
    /// it.
    pub async fn setup(&self, params: SetupParams) -> Result<SetupOutcome, ControllerError> {
        let mut supervisor = self.acquire_slot()?;
        self.require_state(
            "setup",
            &[
                ControllerState::NotRunning,
                ControllerState::Idle,
                ControllerState::Error,
            ],
        )?;

        info!("setup requested: file={}", params.file_name);

        // Tear down whatever session existed; its identity and handle are
        // gone the moment we start replacing them.
        if supervisor.handle().is_some() {
            info!("shutting down existing analyzer instance before setup");
            supervisor.force_kill().await;
        }
        {
            let mut shared = self.shared.lock().unwrap();
            shared.state = ControllerState::Starting;
            shared.project = None;
            shared.handle = None;
        }

        let killed = if self.config.kill_existing_on_setup {
            match supervisor.kill_matching().await {
                Ok(count) => count,
                Err(e) => {
                    warn!("stray-process reclaim failed, continuing: {e}");
                    0
                }
            }
        } else {
            0
        };

        let identity = match self
            .store
            .store(
                &params.file_name,
                params.project_name.as_deref(),
                &params.bytes,
            )
            .await
        {
            Ok(identity) => identity,
            Err(e) => return Err(self.fail(e.into())),
        };

        let mode = params
            .mode
            .unwrap_or_else(|| self.config.default_mode.clone());
        let args = params
            .launch_args
            .unwrap_or_else(|| self.config.default_launch_args.clone());

        let handle = match supervisor.launch(&mode, &args).await {
            Ok(handle) => handle,
            Err(e) => return Err(self.fail(e.into())),
        };
        {
            // From here a failure retains identity and handle, so the client
            // can inspect what was in flight.
            let mut shared = self.shared.lock().unwrap();
            shared.handle = Some(handle);
            shared.project = Some(identity.clone());
        }

        if let Err(e) = self
            .client
            .load_project(&identity.stored_path, &mode, &args)
            .await
        {
            return Err(self.fail(e.into()));
        }

        {
            let mut shared = self.shared.lock().unwrap();
            shared.state = ControllerState::Idle;
            shared.last_error = None;
        }
        info!(
            "analyzer ready: project={}, sha256={}, pid={}",
            identity.name, identity.sha256, handle.pid
        );

        Ok(SetupOutcome {
            identity,
            pid: handle.pid,
            killed_processes: killed,
        })
    }

    /// Snapshot the loaded sequence's structure.
    ///
    /// Read-only: claims the execution slot because it uses the exclusive
    /// automation session, but performs no state transition: a query
    /// failure surfaces to the caller and leaves the state Idle.
    pub async fn sequence_structure(&self) -> Result<SequenceStructure, ControllerError> {
        let _supervisor = self.acquire_slot()?;
        self.require_state("sequence_structure", &[ControllerState::Idle])?;
        Ok(self.client.sequence_structure().await?)
    }

    /// Run all checked measurements in one signal path.
    pub async fn run_signal_path(
        &self,
        signal_path: &str,
        timeout_seconds: Option<f64>,
    ) -> Result<RunSummary, ControllerError> {
        if signal_path.is_empty() {
            return Err(ControllerError::Validation(
                "signal_path must not be empty".to_string(),
            ));
        }
        let timeout = self.resolve_timeout(timeout_seconds)?;

        let _supervisor = self.acquire_slot()?;
        self.require_state("run_signal_path", &[ControllerState::Idle])?;
        self.set_state(ControllerState::RunningStep);

        let outcome = self
            .execute_run(RunScope::SignalPath(signal_path), timeout)
            .await;
        match outcome {
            Ok(summary) => {
                self.set_state(ControllerState::Idle);
                Ok(summary)
            }
            Err(e) => Err(e),
        }
    }

    /// Run all checked measurements in all checked signal paths, then export
    /// the requested reports.
    pub async fn run_all(&self, params: RunAllParams) -> Result<RunAllOutcome, ControllerError> {
        let timeout = self.resolve_timeout(params.timeout_seconds)?;

        let _supervisor = self.acquire_slot()?;
        self.require_state("run_all", &[ControllerState::Idle])?;
        self.set_state(ControllerState::RunningStep);

        let mut summary = match self.execute_run(RunScope::AllChecked, timeout).await {
            Ok(summary) => summary,
            Err(e) => return Err(e),
        };

        let mut export_warnings = Vec::new();
        if params.export_csv || params.export_pdf {
            let directory = match params.report_directory {
                Some(directory) => Some(directory),
                None => match self.store.ensure_reports_dir().await {
                    Ok(directory) => Some(directory),
                    Err(e) => {
                        warn!("reports directory unavailable, skipping export: {e}");
                        export_warnings.push(format!("report export skipped: {e}"));
                        None
                    }
                },
            };
            if let Some(directory) = directory {
                let runner = SequenceRunner::new(self.client.as_ref());
                let warnings = runner
                    .export(
                        &mut summary,
                        &ExportOptions {
                            csv: params.export_csv,
                            pdf: params.export_pdf,
                            directory,
                        },
                    )
                    .await;
                export_warnings.extend(warnings);
            }
        }

        self.set_state(ControllerState::Idle);
        Ok(RunAllOutcome {
            summary,
            export_warnings,
        })
    }

    /// Close the analyzer cooperatively; `force` falls back to a kill when
    /// the graceful close does not complete in time.
    pub async fn shutdown(&self, force: bool) -> Result<(), ControllerError> {
        let mut supervisor = self.acquire_slot()?;
        let state = self.state();
        if state == ControllerState::NotRunning {
            return Err(ControllerError::InvalidState {
                operation: "shutdown",
                state,
            });
        }

        let close_timeout = self.config.close_timeout;
        let mut close_error: Option<AutomationError> = None;
        let graceful = if supervisor.handle().is_some() {
            info!("closing analyzer gracefully...");
            match self.client.request_close(close_timeout).await {
                Ok(()) => supervisor.wait_exit(close_timeout).await,
                Err(e) => {
                    warn!("graceful close failed: {e}");
                    close_error = Some(e);
                    false
                }
            }
        } else {
            // No live process; only state is left to clear.
            true
        };

        if !graceful && !force {
            let source =
                close_error.unwrap_or(AutomationError::Timeout(close_timeout.as_secs_f64()));
            // The operation failed but the session may still be usable:
            // stay in the current state, record what happened.
            self.record_last_error(format!("shutdown failed: {source}"));
            return Err(source.into());
        }

        if !graceful {
            info!("force-killing analyzer...");
            supervisor.force_kill().await;
            if let Err(e) = supervisor.kill_matching().await {
                warn!("stray-process reclaim failed during shutdown: {e}");
            }
        }

        {
            let mut shared = self.shared.lock().unwrap();
            shared.state = ControllerState::NotRunning;
            shared.project = None;
            shared.handle = None;
        }
        info!("analyzer shutdown complete");
        Ok(())
    }

    /// Kill every analyzer process and clear all state. Always lands in
    /// NotRunning; returns how many processes were killed.
    pub async fn reset(&self) -> Result<u32, ControllerError> {
        let mut supervisor = self.acquire_slot()?;
        info!("resetting controller...");

        let killed = match supervisor.kill_matching().await {
            Ok(count) => count,
            Err(e) => {
                warn!("reclaim scan failed during reset: {e}");
                0
            }
        };
        // The scan reaps the tracked child when the pattern matched it; make
        // sure it is gone either way.
        supervisor.force_kill().await;

        *self.shared.lock().unwrap() = Shared::default();
        info!("reset complete, killed {killed} process(es)");
        Ok(killed)
    }

    async fn execute_run(
        &self,
        scope: RunScope<'_>,
        timeout: Duration,
    ) -> Result<RunSummary, ControllerError> {
        let structure = match self.client.sequence_structure().await {
            Ok(structure) => structure,
            Err(e) => return Err(self.fail(e.into())),
        };

        let runner = SequenceRunner::new(self.client.as_ref());
        match runner.run(&structure, scope, timeout).await {
            Ok(summary) => Ok(summary),
            Err(RunnerError::UnknownSignalPath(name)) => {
                // Client named something that does not exist; the session is
                // untouched, so this is a rejection, not an error state.
                self.set_state(ControllerState::Idle);
                Err(ControllerError::Validation(format!(
                    "signal path `{name}` not found in the loaded sequence"
                )))
            }
            Err(RunnerError::Aborted { summary, source }) => {
                self.record_failure(format!("run aborted: {source}"));
                Err(ControllerError::RunAborted { summary, source })
            }
        }
    }

    fn acquire_slot(&self) -> Result<tokio::sync::MutexGuard<'_, ProcessSupervisor>, ControllerError> {
        self.slot.try_lock().map_err(|_| ControllerError::Busy)
    }

    fn require_state(
        &self,
        operation: &'static str,
        allowed: &[ControllerState],
    ) -> Result<(), ControllerError> {
        let state = self.state();
        if allowed.contains(&state) {
            Ok(())
        } else {
            Err(ControllerError::InvalidState { operation, state })
        }
    }

    fn resolve_timeout(&self, timeout_seconds: Option<f64>) -> Result<Duration, ControllerError> {
        match timeout_seconds {
            None => Ok(self.config.default_measurement_timeout),
            Some(t) if (1.0..=3600.0).contains(&t) => Ok(Duration::from_secs_f64(t)),
            Some(t) => Err(ControllerError::Validation(format!(
                "timeout_seconds must be between 1 and 3600, got {t}"
            ))),
        }
    }

    fn set_state(&self, state: ControllerState) {
        self.shared.lock().unwrap().state = state;
    }

    fn record_last_error(&self, message: String) {
        error!("{message}");
        self.shared.lock().unwrap().last_error = Some(LastError {
            message,
            at: Utc::now(),
        });
    }

    fn record_failure(&self, message: String) {
        error!("{message}");
        let mut shared = self.shared.lock().unwrap();
        shared.state = ControllerState::Error;
        shared.last_error = Some(LastError {
            message,
            at: Utc::now(),
        });
    }

    fn fail(&self, err: ControllerError) -> ControllerError {
        self.record_failure(err.to_string());
        err
    }

    /// Crash detection, only when no operation holds the execution slot: an
    /// in-flight operation will surface its own failures.
    fn probe_process(&self) {
        let Ok(mut supervisor) = self.slot.try_lock() else {
            return;
        };
        let Some(pid) = supervisor.reap_if_exited() else {
            return;
        };

        let mut shared = self.shared.lock().unwrap();
        shared.handle = None;
        if shared.state != ControllerState::Error {
            let message = ControllerError::ProcessDied { pid }.to_string();
            warn!("{message}");
            shared.state = ControllerState::Error;
            shared.last_error = Some(LastError {
                message,
                at: Utc::now(),
            });
        }
    }
}

fn uptime_seconds(started_at: DateTime<Utc>) -> f64 {
    (Utc::now() - started_at).num_milliseconds() as f64 / 1000.0
}
