//! Core data model for wipe tasks.
//!
//! - TaskState: the per-task lifecycle
//! - TaskSnapshot: an immutable copy of a task, safe to hand to observers

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use uuid::Uuid;
use crate::error::TaskError;

/// The state of a single wipe task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TaskState {
    /// Queued, not yet picked up by a worker
    Pending,
    /// A worker is overwriting the file
    Processing,
    /// Parked at a pass boundary by a pause request
    Pausing,
    /// All passes written and the destruction step completed
    Finished,
    /// Stopped by a cancellation request
    Canceled,
    /// An I/O or permission error stopped the task
    Failed,
    /// The target vanished before the worker opened it
    Missing,
}

impl TaskState {
    pub const ALL: [TaskState; 7] = [
        TaskState::Pending,
        TaskState::Processing,
        TaskState::Pausing,
        TaskState::Finished,
        TaskState::Canceled,
        TaskState::Failed,
        TaskState::Missing,
    ];

    /// Returns true if this state is terminal (no further changes expected).
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            TaskState::Finished | TaskState::Canceled | TaskState::Failed | TaskState::Missing
        )
    }

    /// Whether the lifecycle allows moving from `self` to `next`.
    pub fn can_transition_to(&self, next: TaskState) -> bool {
        use TaskState::*;
        matches!(
            (self, next),
            (Pending, Processing)
                | (Pending, Canceled)
                | (Processing, Pausing)
                | (Pausing, Processing)
                | (Processing, Finished)
                | (Processing, Failed)
                | (Processing, Missing)
                | (Processing, Canceled)
                | (Pausing, Canceled)
        )
    }
}

impl std::fmt::Display for TaskState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TaskState::Pending => write!(f, "Pending"),
            TaskState::Processing => write!(f, "Processing"),
            TaskState::Pausing => write!(f, "Pausing"),
            TaskState::Finished => write!(f, "Finished"),
            TaskState::Canceled => write!(f, "Canceled"),
            TaskState::Failed => write!(f, "Failed"),
            TaskState::Missing => write!(f, "Missing"),
        }
    }
}

/// Point-in-time copy of a task.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskSnapshot {
    pub id: Uuid,
    /// Position in submission order
    pub index: usize,
    pub path: PathBuf,
    /// Byte length captured at discovery
    pub size: u64,
    pub state: TaskState,
    /// Bytes written across all passes so far
    pub bytes_processed: u64,
    pub passes_completed: u32,
    pub error: Option<TaskError>,
}
