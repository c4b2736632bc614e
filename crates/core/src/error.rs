//! Controller error types.
//!
//! Everything a controller operation can fail with, and the coarse kind used
//! by the HTTP layer to pick a status code.

use crate::automation::AutomationError;
use crate::store::StoreError;
use crate::supervisor::SupervisorError;
use bc_protocol::{ControllerState, RunSummary};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ControllerError {
    /// Another mutating operation is in flight. Rejected immediately, never
    /// queued.
    #[error("another operation is already in flight")]
    Busy,

    /// The operation is not allowed in the current state.
    #[error("operation `{operation}` not allowed in state `{state}`")]
    InvalidState {
        operation: &'static str,
        state: ControllerState,
    },

    /// Malformed client input, rejected before touching controller state.
    #[error("invalid request: {0}")]
    Validation(String),

    #[error(transparent)]
    Supervisor(#[from] SupervisorError),

    #[error(transparent)]
    Automation(#[from] AutomationError),

    #[error(transparent)]
    Store(#[from] StoreError),

    /// The tracked analyzer process died out from under the controller.
    #[error("analyzer process died unexpectedly (pid {pid})")]
    ProcessDied { pid: u32 },

    /// A run was aborted mid-scope; results gathered up to the abort are
    /// preserved so the client still gets a partial picture.
    #[error("run aborted: {source}")]
    RunAborted {
        summary: RunSummary,
        source: AutomationError,
    },
}

/// Coarse classification for surfacing errors over HTTP.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Rejected without touching controller state: concurrent operation.
    Busy,
    /// Rejected without touching controller state: wrong state for the
    /// operation.
    InvalidState,
    /// Rejected without touching controller state: bad input.
    Validation,
    /// The operation itself failed.
    Failed,
}

impl ControllerError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            ControllerError::Busy => ErrorKind::Busy,
            ControllerError::InvalidState { .. } => ErrorKind::InvalidState,
            ControllerError::Validation(_) => ErrorKind::Validation,
            _ => ErrorKind::Failed,
        }
    }
}
