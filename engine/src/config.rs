//! Engine configuration.
//!
//! Settings arrive from the caller (a settings file, a UI) and are validated
//! here, before any session starts. Nothing in this module reaches into a
//! global; the pieces are handed to `WipeEngine` and `begin_session` explicitly.

use serde::{Deserialize, Serialize};
use crate::error::EngineError;

/// Persisted bounds for user-editable numbers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Bounds {
    pub thread_count_minimum: usize,
    pub thread_count_maximum: usize,
    pub repeats_minimum: u32,
    pub repeats_maximum: u32,
}

impl Default for Bounds {
    fn default() -> Self {
        Bounds {
            thread_count_minimum: 1,
            thread_count_maximum: 16,
            repeats_minimum: 1,
            repeats_maximum: 35,
        }
    }
}

impl Bounds {
    pub fn validate(&self) -> Result<(), EngineError> {
        if self.thread_count_minimum == 0 {
            return Err(EngineError::config("thread count minimum must be at least 1"));
        }
        if self.thread_count_minimum > self.thread_count_maximum {
            return Err(EngineError::config(format!(
                "thread count bounds are inverted: [{}, {}]",
                self.thread_count_minimum, self.thread_count_maximum
            )));
        }
        if self.repeats_minimum == 0 {
            return Err(EngineError::config("repeats minimum must be at least 1"));
        }
        if self.repeats_minimum > self.repeats_maximum {
            return Err(EngineError::config(format!(
                "repeats bounds are inverted: [{}, {}]",
                self.repeats_minimum, self.repeats_maximum
            )));
        }
        Ok(())
    }

    /// Clamp a repeat count into `[repeats_minimum, repeats_maximum]`.
    ///
    /// Never panics; with inverted bounds the maximum wins.
    pub fn clamp_repeats(&self, repeats: u32) -> u32 {
        repeats.max(self.repeats_minimum).min(self.repeats_maximum)
    }

    pub fn clamp_thread_count(&self, threads: usize) -> usize {
        threads
            .max(self.thread_count_minimum)
            .min(self.thread_count_maximum)
    }
}

/// How many files are wiped at once.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProcessingSettings {
    pub allow_parallel: bool,
    /// Only meaningful when `allow_parallel` is true
    pub thread_count: usize,
}

impl Default for ProcessingSettings {
    fn default() -> Self {
        ProcessingSettings {
            allow_parallel: false,
            thread_count: Bounds::default().clamp_thread_count(num_cpus::get()),
        }
    }
}

impl ProcessingSettings {
    pub fn sequential() -> Self {
        ProcessingSettings {
            allow_parallel: false,
            thread_count: 1,
        }
    }

    pub fn parallel(thread_count: usize) -> Self {
        ProcessingSettings {
            allow_parallel: true,
            thread_count,
        }
    }

    /// Rejects a thread count outside the bounds when parallel mode is on.
    pub fn validate(&self, bounds: &Bounds) -> Result<(), EngineError> {
        if !self.allow_parallel {
            return Ok(());
        }
        if self.thread_count < bounds.thread_count_minimum
            || self.thread_count > bounds.thread_count_maximum
        {
            return Err(EngineError::config(format!(
                "thread count {} is outside [{}, {}]",
                self.thread_count, bounds.thread_count_minimum, bounds.thread_count_maximum
            )));
        }
        Ok(())
    }

    /// Number of workers a session will run with.
    pub fn effective_concurrency(&self) -> usize {
        if self.allow_parallel {
            self.thread_count.max(1)
        } else {
            1
        }
    }
}

/// What happens to a file once all of its passes are written.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum DestructionPolicy {
    /// Truncate, scrub timestamps, rename to a random name, then remove
    #[default]
    Delete,
    /// Truncate to zero length and leave the entry in place
    Truncate,
    /// Leave the overwritten content in place
    Keep,
}

impl std::fmt::Display for DestructionPolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DestructionPolicy::Delete => write!(f, "delete"),
            DestructionPolicy::Truncate => write!(f, "truncate"),
            DestructionPolicy::Keep => write!(f, "keep"),
        }
    }
}

/// Engine-wide configuration, fixed for the lifetime of a `WipeEngine`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub bounds: Bounds,
    /// Size of a single write call in bytes
    pub buffer_size: usize,
    pub destruction: DestructionPolicy,
    /// Read the file back after the last pass and compare
    pub verify_final_pass: bool,
    /// Follow links that resolve inside the selected folder. Links pointing
    /// outside a selection are always rejected.
    pub follow_symlinks: bool,
    /// Permission failures needed before elevation is recommended
    pub elevation_threshold: usize,
    /// Remove expanded folders once empty (only with `DestructionPolicy::Delete`)
    pub remove_empty_directories: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        EngineConfig {
            bounds: Bounds::default(),
            buffer_size: 1024 * 1024,
            destruction: DestructionPolicy::Delete,
            verify_final_pass: false,
            follow_symlinks: false,
            elevation_threshold: 1,
            remove_empty_directories: true,
        }
    }
}

impl EngineConfig {
    pub fn validate(&self) -> Result<(), EngineError> {
        self.bounds.validate()?;
        if self.buffer_size == 0 {
            return Err(EngineError::config("buffer size must be greater than zero"));
        }
        if self.elevation_threshold == 0 {
            return Err(EngineError::config("elevation threshold must be at least 1"));
        }
        Ok(())
    }
}
