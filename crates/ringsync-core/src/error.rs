//! Error types for backend calls and session operations

use crate::buffer::state::BufferPhase;
use thiserror::Error;

/// Failure reported by an opaque backend call
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum BackendError {
    #[error("Backend not available")]
    Unavailable,

    #[error("No audio host: {0}")]
    NoHost(String),

    #[error("Device is busy or allocated exclusively elsewhere")]
    Busy,

    #[error("Buffer position changed while locking")]
    PositionChanged,

    #[error("Invalid parameter: {0}")]
    InvalidParam(String),

    #[error("Buffer memory was lost")]
    BufferLost,

    #[error("Driver error: {0}")]
    Driver(String),
}

/// Errors that can occur during device session operations
#[derive(Error, Debug)]
pub enum SessionError {
    #[error("Device unavailable: {0}")]
    DeviceUnavailable(#[source] BackendError),

    #[error("Device busy during {op}")]
    DeviceBusy { op: &'static str },

    #[error("Driver call {op} failed: {source}")]
    Driver {
        op: &'static str,
        #[source]
        source: BackendError,
    },

    #[error("Failed to create hardware buffer: {0}")]
    BufferCreationFailed(#[source] BackendError),

    #[error("Lock of {len} bytes at offset {offset} failed, requery and retry")]
    LockFailed { offset: usize, len: usize },

    #[error("Contract violation in {op}: {reason}")]
    ContractViolation { op: &'static str, reason: String },
}

impl SessionError {
    /// Map a backend failure for the named operation without altering it
    pub(crate) fn from_backend(op: &'static str, source: BackendError) -> Self {
        match source {
            BackendError::Busy => SessionError::DeviceBusy { op },
            source => SessionError::Driver { op, source },
        }
    }

    pub(crate) fn lock_failed(offset: usize, len: usize, source: BackendError) -> Self {
        match source {
            BackendError::PositionChanged => SessionError::LockFailed { offset, len },
            source => SessionError::Driver { op: "lock", source },
        }
    }

    pub(crate) fn wrong_phase(op: &'static str, phase: BufferPhase) -> Self {
        SessionError::ContractViolation {
            op,
            reason: format!("buffer is {:?}", phase),
        }
    }

    /// Whether the caller may simply requery and retry the operation.
    ///
    /// Only a lock that lost a race with the hardware cursor qualifies.
    pub fn is_retriable(&self) -> bool {
        matches!(self, SessionError::LockFailed { .. })
    }
}

pub type Result<T, E = SessionError> = std::result::Result<T, E>;
