//! Error types for the wiping engine.
//!
//! There are two layers of errors:
//! - `EngineError`: session-level problems that prevent a session from being
//!   created or controlled (bad configuration, unknown algorithm, no session).
//! - `TaskError`: a failure recorded on a single `WipeTask`. Task errors never
//!   escape a worker; they are stored on the task and reported in snapshots.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::io;
use std::path::PathBuf;
use thiserror::Error;

/// Errors that can occur at the engine/session level.
#[derive(Debug, Error)]
pub enum EngineError {
    /// No algorithm with this name is registered
    #[error("Unknown wipe algorithm: {name}")]
    AlgorithmNotFound { name: String },

    /// Settings were rejected at apply time
    #[error("Invalid configuration: {reason}")]
    Configuration { reason: String },

    /// `begin_session` was called without any paths
    #[error("No targets were given")]
    NoTargets,

    /// A session is still running; a new one cannot start until it drains
    #[error("A wipe session is already running")]
    SessionActive,

    /// Control call made while no session exists
    #[error("No wipe session has been started")]
    NoSession,

    /// Tasks were submitted after the worker pool started
    #[error("Scheduler already started; no more tasks can be submitted")]
    SchedulerSealed,

    /// I/O failure outside any task (e.g. spawning a worker thread)
    #[error("I/O error on {}: {source}", path.display())]
    Io { path: PathBuf, source: io::Error },
}

impl EngineError {
    pub(crate) fn config(reason: impl Into<String>) -> Self {
        EngineError::Configuration {
            reason: reason.into(),
        }
    }
}

/// Classification of a task-local failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TaskErrorKind {
    /// Access denied; elevated privileges may help
    PermissionDenied,
    /// File is locked or opened exclusively by another process
    SharingViolation,
    /// Any other disk or OS error
    Io,
    /// Directory expansion found a symlink cycle
    FilesystemLoop,
    /// Target is a symbolic link and links are not followed
    Symlink,
    /// Read-back of the final pass did not match what was written
    VerificationFailed,
    /// The wipe was aborted by a panic on the worker thread
    Internal,
}

impl fmt::Display for TaskErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            TaskErrorKind::PermissionDenied => "permission denied",
            TaskErrorKind::SharingViolation => "sharing violation",
            TaskErrorKind::Io => "I/O error",
            TaskErrorKind::FilesystemLoop => "filesystem loop",
            TaskErrorKind::Symlink => "symbolic link",
            TaskErrorKind::VerificationFailed => "verification failed",
            TaskErrorKind::Internal => "internal error",
        };
        f.write_str(label)
    }
}

/// Failure detail recorded on a task that ended in `Failed`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Error)]
#[error("{kind}: {message}")]
pub struct TaskError {
    pub kind: TaskErrorKind,
    pub message: String,
    /// OS error code, when the failure came from the OS
    pub raw_os_error: Option<i32>,
    /// True if a new session might succeed (after elevation or once a lock is released)
    pub retryable: bool,
}

// ERROR_SHARING_VIOLATION / ERROR_LOCK_VIOLATION
const WIN_SHARING_VIOLATION: i32 = 32;
const WIN_LOCK_VIOLATION: i32 = 33;

impl TaskError {
    pub fn new(kind: TaskErrorKind, message: impl Into<String>) -> Self {
        let retryable = matches!(
            kind,
            TaskErrorKind::PermissionDenied | TaskErrorKind::SharingViolation
        );
        TaskError {
            kind,
            message: message.into(),
            raw_os_error: None,
            retryable,
        }
    }

    /// Classify an I/O error. `NotFound` should be handled by the caller as Missing.
    pub fn from_io(err: &io::Error) -> Self {
        let raw = err.raw_os_error();
        let kind = if err.kind() == io::ErrorKind::PermissionDenied {
            TaskErrorKind::PermissionDenied
        } else if cfg!(windows) && matches!(raw, Some(WIN_SHARING_VIOLATION | WIN_LOCK_VIOLATION)) {
            TaskErrorKind::SharingViolation
        } else {
            TaskErrorKind::Io
        };
        let mut error = TaskError::new(kind, err.to_string());
        error.raw_os_error = raw;
        error
    }

    pub fn is_permission_denied(&self) -> bool {
        self.kind == TaskErrorKind::PermissionDenied
    }
}

/// Why a task stopped early, as seen from inside a worker.
#[derive(Debug)]
pub(crate) enum TaskFailure {
    /// The target no longer exists
    Missing,
    Failed(TaskError),
}

impl From<io::Error> for TaskFailure {
    fn from(err: io::Error) -> Self {
        if err.kind() == io::ErrorKind::NotFound {
            TaskFailure::Missing
        } else {
            TaskFailure::Failed(TaskError::from_io(&err))
        }
    }
}

impl From<TaskError> for TaskFailure {
    fn from(err: TaskError) -> Self {
        TaskFailure::Failed(err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_permission_denied_is_retryable() {
        let err = io::Error::new(io::ErrorKind::PermissionDenied, "denied");
        let task_err = TaskError::from_io(&err);
        assert_eq!(task_err.kind, TaskErrorKind::PermissionDenied);
        assert!(task_err.retryable);
        assert!(task_err.is_permission_denied());
    }

    #[test]
    fn test_generic_io_error_is_not_retryable() {
        let err = io::Error::new(io::ErrorKind::Other, "disk on fire");
        let task_err = TaskError::from_io(&err);
        assert_eq!(task_err.kind, TaskErrorKind::Io);
        assert!(!task_err.retryable);
        assert_eq!(task_err.to_string(), "I/O error: disk on fire");
    }

    #[test]
    fn test_not_found_maps_to_missing() {
        let err = io::Error::new(io::ErrorKind::NotFound, "gone");
        assert!(matches!(TaskFailure::from(err), TaskFailure::Missing));
    }

    #[test]
    fn test_engine_error_messages() {
        let err = EngineError::AlgorithmNotFound {
            name: "rot13".to_string(),
        };
        assert_eq!(err.to_string(), "Unknown wipe algorithm: rot13");
        assert_eq!(
            EngineError::config("threads out of range").to_string(),
            "Invalid configuration: threads out of range"
        );
    }
}
