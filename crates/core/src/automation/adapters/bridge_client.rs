//! Automation client backed by the vendor's automation-bridge helper.
//!
//! The analyzer's native automation interface is only reachable in-process
//! on its host; the vendor ships a small console bridge that proxies it over
//! stdin/stdout as line-delimited JSON, one request per line, one response
//! per line, correlated by id:
//!
//! ```text
//! -> {"id":1,"op":"load_project","params":{"path":"...","mode":"sequence","args":""}}
//! <- {"id":1,"ok":true,"result":null}
//! ```
//!
//! The bridge process is spawned lazily on the first call and kept for the
//! session. A timed-out call kills the bridge: after an abandoned request the
//! stream position is unknown and the session cannot be trusted.

use crate::automation::client::{AutomationClient, AutomationError, ReportFormat};
use async_trait::async_trait;
use bc_protocol::{MeasurementResult, SequenceStructure};
use serde_json::{json, Value};
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::{Duration, Instant};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, Lines};
use tokio::process::{Child, ChildStdin, ChildStdout, Command};
use tokio::sync::Mutex;
use tracing::{debug, warn};

struct BridgeSession {
    child: Child,
    stdin: ChildStdin,
    stdout: Lines<BufReader<ChildStdout>>,
    next_id: u64,
}

pub struct BridgeClient {
    program: PathBuf,
    default_timeout: Duration,
    session: Mutex<Option<BridgeSession>>,
}

impl BridgeClient {
    /// Create a client for the bridge executable at `program`.
    ///
    /// `default_timeout` bounds the calls whose trait signature carries no
    /// explicit timeout (project load, structure query, export).
    pub fn new(program: impl Into<PathBuf>, default_timeout: Duration) -> Self {
        Self {
            program: program.into(),
            default_timeout,
            session: Mutex::new(None),
        }
    }

    fn resolve_program(&self) -> Result<PathBuf, String> {
        if self.program.components().count() > 1 {
            return Ok(self.program.clone());
        }
        which::which(&self.program).map_err(|e| format!("{}: {e}", self.program.display()))
    }

    async fn ensure_session<'a>(
        &self,
        slot: &'a mut Option<BridgeSession>,
    ) -> Result<&'a mut BridgeSession, String> {
        if slot.is_none() {
            let program = self.resolve_program()?;
            debug!("spawning automation bridge: {}", program.display());

            let mut child = Command::new(&program)
                .stdin(Stdio::piped())
                .stdout(Stdio::piped())
                .stderr(Stdio::null())
                .spawn()
                .map_err(|e| format!("failed to spawn bridge `{}`: {e}", program.display()))?;

            let stdin = child
                .stdin
                .take()
                .ok_or_else(|| "failed to capture bridge stdin".to_string())?;
            let stdout = child
                .stdout
                .take()
                .ok_or_else(|| "failed to capture bridge stdout".to_string())?;

            *slot = Some(BridgeSession {
                child,
                stdin,
                stdout: BufReader::new(stdout).lines(),
                next_id: 1,
            });
        }
        match slot.as_mut() {
            Some(session) => Ok(session),
            None => Err("bridge session unavailable".to_string()),
        }
    }

    /// Send one request and wait for its response, bounded by `timeout`.
    ///
    /// `fail` wraps transport-level problems into the caller's error kind so
    /// a broken pipe during a load surfaces as a load failure, not a generic
    /// one.
    async fn call(
        &self,
        op: &str,
        params: Value,
        timeout: Duration,
        fail: impl Fn(String) -> AutomationError,
    ) -> Result<Value, AutomationError> {
        let mut guard = self.session.lock().await;

        let exchange = async {
            let session = self.ensure_session(&mut guard).await.map_err(&fail)?;

            let id = session.next_id;
            session.next_id += 1;

            let request = json!({"id": id, "op": op, "params": params});
            let mut line = request.to_string();
            line.push('\n');
            session
                .stdin
                .write_all(line.as_bytes())
                .await
                .map_err(|e| fail(format!("bridge write failed: {e}")))?;

            loop {
                let reply = session
                    .stdout
                    .next_line()
                    .await
                    .map_err(|e| fail(format!("bridge read failed: {e}")))?
                    .ok_or_else(|| fail("bridge exited unexpectedly".to_string()))?;

                let value: Value = serde_json::from_str(&reply)
                    .map_err(|e| fail(format!("malformed bridge reply: {e}")))?;

                // Stale replies from an earlier session are skipped, not fatal.
                if value.get("id").and_then(Value::as_u64) != Some(id) {
                    continue;
                }

                if value.get("ok").and_then(Value::as_bool) == Some(true) {
                    return Ok(value.get("result").cloned().unwrap_or(Value::Null));
                }
                let message = value
                    .get("error")
                    .and_then(Value::as_str)
                    .unwrap_or("unspecified bridge error")
                    .to_string();
                return Err(fail(message));
            }
        };

        let outcome = tokio::time::timeout(timeout, exchange).await;
        match outcome {
            Ok(outcome) => outcome,
            Err(_) => {
                // The request was abandoned mid-flight; the stream position
                // is unknown, so the session is torn down.
                if let Some(mut session) = guard.take() {
                    warn!("bridge call `{op}` timed out, killing bridge session");
                    let _ = session.child.start_kill();
                }
                Err(AutomationError::Timeout(timeout.as_secs_f64()))
            }
        }
    }
}

#[async_trait]
impl AutomationClient for BridgeClient {
    async fn load_project(
        &self,
        path: &Path,
        mode: &str,
        args: &str,
    ) -> Result<(), AutomationError> {
        self.call(
            "load_project",
            json!({"path": path, "mode": mode, "args": args}),
            self.default_timeout,
            AutomationError::LoadFailure,
        )
        .await
        .map(|_| ())
    }

    async fn sequence_structure(&self) -> Result<SequenceStructure, AutomationError> {
        let result = self
            .call(
                "sequence_structure",
                Value::Null,
                self.default_timeout,
                AutomationError::QueryFailure,
            )
            .await?;
        serde_json::from_value(result)
            .map_err(|e| AutomationError::QueryFailure(format!("malformed structure: {e}")))
    }

    async fn run_measurement(
        &self,
        signal_path: &str,
        measurement: &str,
        timeout: Duration,
    ) -> Result<MeasurementResult, AutomationError> {
        let started = Instant::now();
        let result = self
            .call(
                "run_measurement",
                json!({
                    "signal_path": signal_path,
                    "measurement": measurement,
                    "timeout_seconds": timeout.as_secs_f64(),
                }),
                timeout,
                AutomationError::ExecutionFailure,
            )
            .await?;

        let passed = result
            .get("passed")
            .and_then(Value::as_bool)
            .unwrap_or(false);
        let meter_values = result
            .get("meter_values")
            .cloned()
            .map(|v| serde_json::from_value(v).unwrap_or_default())
            .unwrap_or_default();

        Ok(MeasurementResult {
            signal_path: signal_path.to_string(),
            name: measurement.to_string(),
            success: true,
            passed,
            duration_seconds: started.elapsed().as_secs_f64(),
            meter_values,
            error: None,
        })
    }

    async fn export_report(
        &self,
        format: ReportFormat,
        directory: &Path,
    ) -> Result<PathBuf, AutomationError> {
        let result = self
            .call(
                "export_report",
                json!({"format": format.extension(), "directory": directory}),
                self.default_timeout,
                AutomationError::ExportFailure,
            )
            .await?;
        result
            .get("path")
            .and_then(Value::as_str)
            .map(PathBuf::from)
            .ok_or_else(|| {
                AutomationError::ExportFailure("bridge reply missing report path".to_string())
            })
    }

    async fn request_close(&self, timeout: Duration) -> Result<(), AutomationError> {
        // A close that cannot complete counts as a timeout, whatever the
        // transport reported: requestClose either succeeds or times out.
        self.call(
            "request_close",
            json!({"timeout_seconds": timeout.as_secs_f64()}),
            timeout,
            |_| AutomationError::Timeout(timeout.as_secs_f64()),
        )
        .await?;

        // The bridge exits with the analyzer; reap it so the next call
        // starts a fresh session.
        let mut guard = self.session.lock().await;
        if let Some(mut session) = guard.take() {
            let _ = tokio::time::timeout(timeout, session.child.wait()).await;
        }
        Ok(())
    }
}
