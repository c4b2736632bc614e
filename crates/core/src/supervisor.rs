//! Analyzer OS-process supervision.
//!
//! The supervisor is the single owner of the analyzer child process: it
//! launches it, answers liveness queries, force-terminates it, and reclaims
//! stray analyzer instances left behind by crashed sessions. Everything else
//! sees only the read-only [`ProcessHandle`].

use bc_protocol::ProcessHandle;
use chrono::Utc;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;
use tokio::process::{Child, Command};
use tracing::{info, warn};

#[derive(Error, Debug)]
pub enum SupervisorError {
    #[error("analyzer executable `{program}` not found: {reason}")]
    ExecutableNotFound { program: String, reason: String },

    #[error("failed to launch `{program}`: {source}")]
    LaunchFailure {
        program: String,
        source: std::io::Error,
    },

    #[error("process scan failed: {0}")]
    ScanFailure(String),
}

struct SupervisedChild {
    child: Child,
    handle: ProcessHandle,
}

pub struct ProcessSupervisor {
    executable: PathBuf,
    match_pattern: String,
    supervised: Option<SupervisedChild>,
}

impl ProcessSupervisor {
    /// Create a supervisor for `executable`, reclaiming stray processes
    /// whose command line contains `match_pattern`.
    pub fn new(executable: impl Into<PathBuf>, match_pattern: impl Into<String>) -> Self {
        Self {
            executable: executable.into(),
            match_pattern: match_pattern.into(),
            supervised: None,
        }
    }

    fn resolve_executable(&self) -> Result<PathBuf, SupervisorError> {
        if self.executable.components().count() > 1 {
            return Ok(self.executable.clone());
        }
        which::which(&self.executable).map_err(|e| SupervisorError::ExecutableNotFound {
            program: self.executable.to_string_lossy().into_owned(),
            reason: e.to_string(),
        })
    }

    /// Launch the analyzer with the given operating mode and extra arguments.
    ///
    /// Replaces any previously supervised child; callers are expected to have
    /// torn the old one down first.
    pub async fn launch(&mut self, mode: &str, args: &str) -> Result<ProcessHandle, SupervisorError> {
        let program = self.resolve_executable()?;

        let mut command = Command::new(&program);
        if !mode.is_empty() {
            command.arg("--mode").arg(mode);
        }
        command.args(args.split_whitespace());
        command.stdin(std::process::Stdio::null());
        command.stdout(std::process::Stdio::null());
        command.stderr(std::process::Stdio::null());

        let child = command
            .spawn()
            .map_err(|source| SupervisorError::LaunchFailure {
                program: program.to_string_lossy().into_owned(),
                source,
            })?;

        let pid = child.id().ok_or_else(|| SupervisorError::LaunchFailure {
            program: program.to_string_lossy().into_owned(),
            source: std::io::Error::other("process exited before a pid could be read"),
        })?;

        let handle = ProcessHandle {
            pid,
            launched_at: Utc::now(),
        };
        info!("launched analyzer `{}` with pid {pid}", program.display());
        self.supervised = Some(SupervisedChild { child, handle });
        Ok(handle)
    }

    /// Handle of the currently supervised process, if any.
    pub fn handle(&self) -> Option<ProcessHandle> {
        self.supervised.as_ref().map(|s| s.handle)
    }

    /// Whether the supervised process is still running. Pure query: reaps a
    /// dead child but never changes a live one.
    pub fn is_alive(&mut self) -> bool {
        match self.supervised.as_mut() {
            Some(supervised) => matches!(supervised.child.try_wait(), Ok(None)),
            None => false,
        }
    }

    /// Drop the supervised child if it is no longer running, returning its
    /// pid. Leaves a live child untouched.
    pub fn reap_if_exited(&mut self) -> Option<u32> {
        let supervised = self.supervised.as_mut()?;
        match supervised.child.try_wait() {
            Ok(None) => None,
            _ => {
                let pid = supervised.handle.pid;
                self.supervised = None;
                Some(pid)
            }
        }
    }

    /// Wait up to `timeout` for the supervised process to exit on its own,
    /// e.g. after a cooperative close request. Returns true once it has.
    pub async fn wait_exit(&mut self, timeout: Duration) -> bool {
        let Some(supervised) = self.supervised.as_mut() else {
            return true;
        };
        match tokio::time::timeout(timeout, supervised.child.wait()).await {
            Ok(_) => {
                self.supervised = None;
                true
            }
            Err(_) => false,
        }
    }

    /// Kill the supervised process immediately. Returns true if one existed.
    pub async fn force_kill(&mut self) -> bool {
        let Some(mut supervised) = self.supervised.take() else {
            return false;
        };
        let pid = supervised.handle.pid;
        if let Err(e) = supervised.child.start_kill() {
            warn!("kill of analyzer pid {pid} failed: {e}");
        }
        let _ = supervised.child.wait().await;
        info!("force-killed analyzer pid {pid}");
        true
    }

    /// Reclaim all analyzer processes matching the configured pattern, not
    /// just the tracked one: a stale instance from a crashed session must be
    /// terminated too. Returns the number of processes killed.
    pub async fn kill_matching(&mut self) -> Result<u32, SupervisorError> {
        let pids = scan_matching(&self.match_pattern).await?;
        if pids.is_empty() {
            info!("no analyzer processes matching `{}` to kill", self.match_pattern);
        } else {
            info!(
                "found {} analyzer process(es) matching `{}`: {:?}",
                pids.len(),
                self.match_pattern,
                pids
            );
        }

        let mut killed = 0;
        for pid in &pids {
            if kill_pid(*pid).await {
                killed += 1;
            } else {
                warn!("failed to kill analyzer pid {pid}");
            }
        }

        // Reap our own child if the scan took it down with the rest.
        if let Some(supervised) = self.supervised.as_mut() {
            if pids.contains(&supervised.handle.pid) {
                let _ = supervised.child.wait().await;
                self.supervised = None;
            }
        }

        if killed > 0 {
            info!("killed {killed} analyzer process(es)");
        }
        Ok(killed)
    }
}

#[cfg(unix)]
async fn scan_matching(pattern: &str) -> Result<Vec<u32>, SupervisorError> {
    let output = Command::new("pgrep")
        .arg("-f")
        .arg(pattern)
        .output()
        .await
        .map_err(|e| SupervisorError::ScanFailure(format!("pgrep: {e}")))?;

    // pgrep exits 1 when nothing matches; that is not a failure.
    let stdout = String::from_utf8_lossy(&output.stdout);
    let own_pid = std::process::id();
    Ok(stdout
        .lines()
        .filter_map(|line| line.trim().parse::<u32>().ok())
        .filter(|pid| *pid != own_pid)
        .collect())
}

#[cfg(unix)]
async fn kill_pid(pid: u32) -> bool {
    Command::new("kill")
        .arg("-9")
        .arg(pid.to_string())
        .status()
        .await
        .map(|status| status.success())
        .unwrap_or(false)
}

#[cfg(windows)]
async fn scan_matching(pattern: &str) -> Result<Vec<u32>, SupervisorError> {
    let filter = format!("IMAGENAME eq {pattern}*");
    let output = Command::new("tasklist")
        .args(["/FO", "CSV", "/NH", "/FI", &filter])
        .output()
        .await
        .map_err(|e| SupervisorError::ScanFailure(format!("tasklist: {e}")))?;

    let stdout = String::from_utf8_lossy(&output.stdout);
    Ok(stdout
        .lines()
        .filter_map(|line| {
            let mut fields = line.split("\",\"");
            let _image = fields.next()?;
            fields.next()?.trim_matches('"').parse::<u32>().ok()
        })
        .collect())
}

#[cfg(windows)]
async fn kill_pid(pid: u32) -> bool {
    Command::new("taskkill")
        .args(["/F", "/PID", &pid.to_string()])
        .status()
        .await
        .map(|status| status.success())
        .unwrap_or(false)
}
