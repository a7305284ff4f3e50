//! Session orchestration.
//!
//! `WipeEngine` turns a selection of paths into a running session: it expands
//! folders, builds the aggregator and worker pool, and hands back a
//! `SessionHandle` for control and observation. Only one session runs at a time.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Condvar, Mutex, MutexGuard};
use std::time::Duration;
use uuid::Uuid;
use crate::algorithm::{AlgorithmRegistry, WipeAlgorithm};
use crate::config::{DestructionPolicy, EngineConfig, ProcessingSettings};
use crate::error::EngineError;
use crate::fs_ops;
use crate::model::{TaskSnapshot, TaskState};
use crate::progress::{
    ProgressAggregator, ProgressObserver, ProgressSnapshot, WipingOverallCounts, WipingStateCounts,
};
use crate::scheduler::{Scheduler, SessionControl};
use crate::task::{TaskContext, WipeTask};

/// Final report of a drained session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionSummary {
    pub session_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub algorithm: String,
    pub counts: WipingStateCounts,
    pub overall: WipingOverallCounts,
    pub failed: Vec<TaskSnapshot>,
    pub missing: Vec<TaskSnapshot>,
    pub elevation_recommended: bool,
}

impl SessionSummary {
    pub fn has_failures(&self) -> bool {
        self.counts.failed > 0
    }

    pub fn duration(&self) -> chrono::Duration {
        self.finished_at - self.started_at
    }
}

struct SessionShared {
    id: Uuid,
    started_at: DateTime<Utc>,
    algorithm: String,
    concurrency: usize,
    config: EngineConfig,
    aggregator: Arc<ProgressAggregator>,
    control: Arc<SessionControl>,
    tasks: Vec<Arc<WipeTask>>,
    directories: Vec<PathBuf>,
    scheduler: Mutex<Scheduler>,
    summary: Mutex<Option<SessionSummary>>,
    finished: Condvar,
}

impl SessionShared {
    fn scheduler(&self) -> MutexGuard<'_, Scheduler> {
        self.scheduler.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn summary(&self) -> MutexGuard<'_, Option<SessionSummary>> {
        self.summary.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Runs once, after every task is terminal.
    fn complete(&self) {
        if self.config.destruction == DestructionPolicy::Delete
            && self.config.remove_empty_directories
            && !self.directories.is_empty()
        {
            let removed = fs_ops::remove_empty_directories(&self.directories);
            tracing::debug!(session = %self.id, removed, "removed emptied folders");
        }

        let snapshots: Vec<TaskSnapshot> = self.tasks.iter().map(|t| t.snapshot()).collect();
        let progress = self.aggregator.snapshot();
        let summary = SessionSummary {
            session_id: self.id,
            started_at: self.started_at,
            finished_at: Utc::now(),
            algorithm: self.algorithm.clone(),
            counts: progress.states,
            overall: progress.overall,
            failed: snapshots
                .iter()
                .filter(|t| t.state == TaskState::Failed)
                .cloned()
                .collect(),
            missing: snapshots
                .iter()
                .filter(|t| t.state == TaskState::Missing)
                .cloned()
                .collect(),
            elevation_recommended: self.aggregator.elevation_recommended(),
        };

        tracing::info!(
            session = %self.id,
            finished = summary.counts.finished,
            failed = summary.counts.failed,
            missing = summary.counts.missing,
            canceled = summary.counts.canceled,
            bytes_written = summary.overall.total_wiped_size,
            "wipe session finished"
        );

        self.aggregator.notify_session_completed(&summary);
        *self.summary() = Some(summary);
        self.finished.notify_all();
    }
}

/// Control and observation handle for one session.
#[derive(Clone)]
pub struct SessionHandle {
    shared: Arc<SessionShared>,
}

impl SessionHandle {
    pub fn id(&self) -> Uuid {
        self.shared.id
    }

    pub fn started_at(&self) -> DateTime<Utc> {
        self.shared.started_at
    }

    /// Worker pool size fixed at session start.
    pub fn concurrency(&self) -> usize {
        self.shared.concurrency
    }

    /// Ask workers to park at their next checkpoint. Returns false if
    /// already paused, cancelled or finished.
    pub fn pause(&self) -> bool {
        if self.is_finished() {
            return false;
        }
        let paused = self.shared.scheduler().pause_all();
        if paused {
            tracing::info!(session = %self.shared.id, "pause requested");
        }
        paused
    }

    pub fn resume(&self) -> bool {
        let resumed = self.shared.scheduler().resume_all();
        if resumed {
            tracing::info!(session = %self.shared.id, "resumed");
        }
        resumed
    }

    /// Cancel all tasks that have not finished. Passes already being
    /// written complete first.
    pub fn cancel(&self) -> bool {
        if self.is_finished() {
            return false;
        }
        let cancelled = self.shared.scheduler().cancel_all();
        if cancelled {
            tracing::info!(session = %self.shared.id, "cancel requested");
        }
        cancelled
    }

    pub fn is_paused(&self) -> bool {
        self.shared.control.is_paused()
    }

    pub fn snapshot(&self) -> ProgressSnapshot {
        self.shared.aggregator.snapshot()
    }

    /// Per-task view in expansion order.
    pub fn tasks(&self) -> Vec<TaskSnapshot> {
        self.shared.tasks.iter().map(|t| t.snapshot()).collect()
    }

    pub fn elevation_recommended(&self) -> bool {
        self.shared.aggregator.elevation_recommended()
    }

    pub fn is_finished(&self) -> bool {
        self.shared.summary().is_some()
    }

    /// A copy of the summary if the session has drained.
    pub fn summary(&self) -> Option<SessionSummary> {
        self.shared.summary().clone()
    }

    /// Block until every task is terminal.
    pub fn wait(&self) -> SessionSummary {
        let summary = {
            let mut guard = self.shared.summary();
            loop {
                if let Some(summary) = guard.as_ref() {
                    break summary.clone();
                }
                guard = self
                    .shared
                    .finished
                    .wait(guard)
                    .unwrap_or_else(|e| e.into_inner());
            }
        };
        self.shared.scheduler().join();
        summary
    }

    /// Like `wait`, but gives up after `timeout`.
    pub fn wait_timeout(&self, timeout: Duration) -> Option<SessionSummary> {
        let guard = self.shared.summary();
        let (guard, _) = self
            .shared
            .finished
            .wait_timeout_while(guard, timeout, |summary| summary.is_none())
            .unwrap_or_else(|e| e.into_inner());
        let summary = guard.clone();
        drop(guard);
        if summary.is_some() {
            self.shared.scheduler().join();
        }
        summary
    }
}

impl std::fmt::Debug for SessionHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionHandle")
            .field("id", &self.shared.id)
            .field("algorithm", &self.shared.algorithm)
            .field("tasks", &self.shared.tasks.len())
            .field("finished", &self.is_finished())
            .finish()
    }
}

/// Entry point for callers: owns configuration, the algorithm catalogue and
/// the observers attached to every session.
pub struct WipeEngine {
    config: EngineConfig,
    registry: AlgorithmRegistry,
    observers: Mutex<Vec<Arc<dyn ProgressObserver>>>,
    current: Mutex<Option<SessionHandle>>,
}

impl WipeEngine {
    pub fn new(config: EngineConfig) -> Result<Self, EngineError> {
        config.validate()?;
        let registry = AlgorithmRegistry::new(config.bounds);
        Ok(WipeEngine {
            config,
            registry,
            observers: Mutex::new(Vec::new()),
            current: Mutex::new(None),
        })
    }

    pub fn with_defaults() -> Self {
        let config = EngineConfig::default();
        WipeEngine {
            registry: AlgorithmRegistry::new(config.bounds),
            config,
            observers: Mutex::new(Vec::new()),
            current: Mutex::new(None),
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn registry(&self) -> &AlgorithmRegistry {
        &self.registry
    }

    pub fn registry_mut(&mut self) -> &mut AlgorithmRegistry {
        &mut self.registry
    }

    /// Attach an observer to every session started after this call.
    pub fn subscribe(&self, observer: Arc<dyn ProgressObserver>) {
        self.observers
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(observer);
    }

    fn current(&self) -> MutexGuard<'_, Option<SessionHandle>> {
        self.current.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Expand `paths`, queue one task per file and start the worker pool.
    pub fn begin_session<P: AsRef<Path>>(
        &self,
        paths: &[P],
        algorithm: &WipeAlgorithm,
        settings: &ProcessingSettings,
    ) -> Result<SessionHandle, EngineError> {
        let mut current = self.current();
        if current.as_ref().map_or(false, |session| !session.is_finished()) {
            return Err(EngineError::SessionActive);
        }
        if paths.is_empty() {
            return Err(EngineError::NoTargets);
        }
        settings.validate(&self.config.bounds)?;
        algorithm.validate(&self.config.bounds)?;
        let concurrency = settings.effective_concurrency();

        let expansion = fs_ops::expand_targets(paths, self.config.follow_symlinks);
        let observers = self
            .observers
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone();
        let aggregator = Arc::new(ProgressAggregator::with_observers(
            self.config.elevation_threshold,
            observers,
        ));
        let control = Arc::new(SessionControl::new());

        let mut scheduler = Scheduler::new(TaskContext {
            algorithm: algorithm.clone(),
            config: self.config.clone(),
            aggregator: Arc::clone(&aggregator),
            control: Arc::clone(&control),
        });
        let tasks = scheduler.submit(expansion.tasks)?;

        let shared = Arc::new(SessionShared {
            id: Uuid::new_v4(),
            started_at: Utc::now(),
            algorithm: algorithm.name.clone(),
            concurrency,
            config: self.config.clone(),
            aggregator,
            control,
            tasks,
            directories: expansion.directories,
            scheduler: Mutex::new(scheduler),
            summary: Mutex::new(None),
            finished: Condvar::new(),
        });

        tracing::info!(
            session = %shared.id,
            tasks = shared.tasks.len(),
            algorithm = %shared.algorithm,
            passes = algorithm.repeats(),
            concurrency,
            "wipe session started"
        );

        let hook = Arc::clone(&shared);
        shared.scheduler().start(concurrency, move || hook.complete())?;

        let handle = SessionHandle { shared };
        *current = Some(handle.clone());
        Ok(handle)
    }

    /// The most recent session, finished or not.
    pub fn current_session(&self) -> Option<SessionHandle> {
        self.current().clone()
    }

    fn with_session<T>(&self, f: impl FnOnce(&SessionHandle) -> T) -> Result<T, EngineError> {
        self.current()
            .as_ref()
            .map(f)
            .ok_or(EngineError::NoSession)
    }

    pub fn pause(&self) -> Result<bool, EngineError> {
        self.with_session(SessionHandle::pause)
    }

    pub fn resume(&self) -> Result<bool, EngineError> {
        self.with_session(SessionHandle::resume)
    }

    pub fn cancel(&self) -> Result<bool, EngineError> {
        self.with_session(SessionHandle::cancel)
    }

    pub fn snapshot(&self) -> Result<ProgressSnapshot, EngineError> {
        self.with_session(SessionHandle::snapshot)
    }
}

impl Default for WipeEngine {
    fn default() -> Self {
        Self::with_defaults()
    }
}
