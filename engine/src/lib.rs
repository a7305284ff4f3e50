//! # Wiper Engine - Secure File Wiping Library
//!
//! A headless engine that destroys the contents of files and folders by
//! overwriting them with one or more data patterns before removing them.
//! Designed as the foundation for multiple front ends (CLI, shell integration, automation).
//!
//! ## Overview
//!
//! The engine provides:
//! - Folder expansion into a flat, ordered list of file tasks, with symlink loop detection
//! - A catalogue of overwrite algorithms (zero fill, random, DoD 5220.22-M, Schneier, Gutmann)
//! - A bounded worker pool with FIFO pickup, cooperative pause/resume and cancel
//! - Per-task state tracking with failure isolation (locked, missing and protected files)
//! - Aggregated state and byte counters pushed to observers
//! - A recommendation to relaunch elevated when permission failures pile up
//!
//! ## Basic Usage
//!
//! ```no_run
//! use wiper_engine::{ProcessingSettings, WipeEngine};
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let engine = WipeEngine::default();
//!
//! // Pick an algorithm and adjust its repeat count (clamped to the configured bounds)
//! let mut algorithm = engine.registry().select("zero")?;
//! engine.registry().set_repeats(&mut algorithm, 3);
//!
//! // Wipe a folder with up to four files in flight
//! let session = engine.begin_session(
//!     &["C:\\Users\\me\\secrets"],
//!     &algorithm,
//!     &ProcessingSettings::parallel(4),
//! )?;
//!
//! let summary = session.wait();
//! println!("{} wiped, {} failed", summary.counts.finished, summary.counts.failed);
//! if summary.elevation_recommended {
//!     println!("Some files need administrator rights");
//! }
//! # Ok(())
//! # }
//! ```
//!
//! ## Modules
//!
//! - **algorithm**: Wipe algorithms and the registry that hands them out
//! - **pattern**: Byte streams written by each pass
//! - **model**: Task lifecycle states and snapshots
//! - **task**: A single file wipe and its state machine
//! - **scheduler**: Worker pool and the pause/cancel gate
//! - **progress**: State and byte counters plus the observer trait
//! - **session**: `WipeEngine` and `SessionHandle`
//! - **fs_ops**: Low-level filesystem operations
//! - **config**: Bounds and settings
//! - **error**: Error types and handling

pub mod algorithm;
pub mod config;
pub mod error;
pub mod fs_ops;
pub mod model;
pub mod pattern;
pub mod progress;
pub mod scheduler;
pub mod session;
pub mod task;

// Re-export main types and functions
pub use algorithm::{AlgorithmRegistry, PassPattern, RepeatPolicy, WipeAlgorithm};
pub use config::{Bounds, DestructionPolicy, EngineConfig, ProcessingSettings};
pub use error::{EngineError, TaskError, TaskErrorKind};
pub use fs_ops::{expand_targets, Expansion};
pub use model::{TaskSnapshot, TaskState};
pub use progress::{
    ProgressAggregator, ProgressEvent, ProgressObserver, ProgressSnapshot, WipingOverallCounts,
    WipingStateCounts,
};
pub use scheduler::{Scheduler, SessionControl};
pub use session::{SessionHandle, SessionSummary, WipeEngine};
pub use task::{TaskContext, WipeTask};
