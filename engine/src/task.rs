//! Wipe tasks and their execution.
//!
//! A `WipeTask` is shared between the scheduler queue, the session's task list
//! and the worker that runs it, but only the owning worker ever mutates it.
//! Everyone else reads through `snapshot()`.

use std::panic::{self, AssertUnwindSafe};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};
use uuid::Uuid;
use crate::algorithm::WipeAlgorithm;
use crate::config::EngineConfig;
use crate::error::{TaskError, TaskFailure};
use crate::fs_ops;
use crate::model::{TaskSnapshot, TaskState};
use crate::pattern::plan_passes;
use crate::progress::ProgressAggregator;
use crate::scheduler::{Gate, SessionControl};

#[derive(Debug)]
struct TaskStatus {
    state: TaskState,
    bytes_processed: u64,
    passes_completed: u32,
    error: Option<TaskError>,
}

/// One file targeted for destruction.
#[derive(Debug)]
pub struct WipeTask {
    id: Uuid,
    index: usize,
    path: PathBuf,
    size: u64,
    status: Mutex<TaskStatus>,
}

/// Everything a worker needs to execute tasks of one session.
#[derive(Debug)]
pub struct TaskContext {
    pub algorithm: WipeAlgorithm,
    pub config: EngineConfig,
    pub aggregator: Arc<ProgressAggregator>,
    pub control: Arc<SessionControl>,
}

enum Outcome {
    Finished,
    Canceled,
}

impl WipeTask {
    /// A Pending task for `path` with the size captured at discovery.
    pub fn new(index: usize, path: impl Into<PathBuf>, size: u64) -> Self {
        WipeTask {
            id: Uuid::new_v4(),
            index,
            path: path.into(),
            size,
            status: Mutex::new(TaskStatus {
                state: TaskState::Pending,
                bytes_processed: 0,
                passes_completed: 0,
                error: None,
            }),
        }
    }

    /// A task that is already Failed when it is created (rejected during expansion).
    pub fn failed(index: usize, path: impl Into<PathBuf>, error: TaskError) -> Self {
        let task = WipeTask::new(index, path, 0);
        {
            let mut status = task.lock();
            status.state = TaskState::Failed;
            status.error = Some(error);
        }
        task
    }

    fn lock(&self) -> MutexGuard<'_, TaskStatus> {
        self.status.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn index(&self) -> usize {
        self.index
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn size(&self) -> u64 {
        self.size
    }

    pub fn state(&self) -> TaskState {
        self.lock().state
    }

    pub fn bytes_processed(&self) -> u64 {
        self.lock().bytes_processed
    }

    pub fn failed_with_permission_error(&self) -> bool {
        self.lock()
            .error
            .as_ref()
            .map_or(false, TaskError::is_permission_denied)
    }

    pub fn snapshot(&self) -> TaskSnapshot {
        let status = self.lock();
        TaskSnapshot {
            id: self.id,
            index: self.index,
            path: self.path.clone(),
            size: self.size,
            state: status.state,
            bytes_processed: status.bytes_processed,
            passes_completed: status.passes_completed,
            error: status.error.clone(),
        }
    }

    /// Move to `next` if the lifecycle allows it, then report the change.
    ///
    /// Returns false (and changes nothing) for disallowed moves, which makes
    /// repeated or late requests such as canceling a finished task a no-op.
    pub(crate) fn transition(&self, next: TaskState, aggregator: &ProgressAggregator) -> bool {
        self.transition_with(next, None, aggregator)
    }

    fn transition_with(
        &self,
        next: TaskState,
        error: Option<TaskError>,
        aggregator: &ProgressAggregator,
    ) -> bool {
        let old = {
            let mut status = self.lock();
            let old = status.state;
            if !old.can_transition_to(next) {
                return false;
            }
            status.state = next;
            if error.is_some() {
                status.error = error;
            }
            old
        };
        tracing::debug!(
            index = self.index,
            path = %self.path.display(),
            from = %old,
            to = %next,
            "task state"
        );
        aggregator.on_task_state_change(self, old, next);
        true
    }

    /// Force a task that is not yet terminal into Failed, whatever state it
    /// was left in. Used when `execute` unwinds.
    pub(crate) fn abort(&self, error: TaskError, aggregator: &ProgressAggregator) -> bool {
        let old = {
            let mut status = self.lock();
            let old = status.state;
            if old.is_terminal() {
                return false;
            }
            status.state = TaskState::Failed;
            status.error = Some(error);
            old
        };
        let published = panic::catch_unwind(AssertUnwindSafe(|| {
            aggregator.on_task_state_change(self, old, TaskState::Failed)
        }));
        if published.is_err() {
            tracing::error!(index = self.index, "observer panicked while reporting abort");
        }
        true
    }

    fn add_bytes(&self, pass: u32, delta: u64, aggregator: &ProgressAggregator) {
        {
            let mut status = self.lock();
            if status.state.is_terminal() {
                return;
            }
            status.bytes_processed += delta;
        }
        aggregator.on_bytes_written(self, pass, delta);
    }

    fn complete_pass(&self) {
        self.lock().passes_completed += 1;
    }

    /// Run this task to a terminal state. Never panics on I/O failure;
    /// every fault is recorded on the task.
    pub(crate) fn execute(&self, ctx: &TaskContext) {
        let aggregator = ctx.aggregator.as_ref();
        if ctx.control.is_cancelled() {
            self.transition(TaskState::Canceled, aggregator);
            return;
        }
        if !self.transition(TaskState::Processing, aggregator) {
            return;
        }

        match self.overwrite(ctx) {
            Ok(Outcome::Finished) => {
                self.transition(TaskState::Finished, aggregator);
            }
            Ok(Outcome::Canceled) => {
                self.transition(TaskState::Canceled, aggregator);
            }
            Err(TaskFailure::Missing) => {
                tracing::info!(path = %self.path.display(), "target vanished before wipe");
                self.transition(TaskState::Missing, aggregator);
            }
            Err(TaskFailure::Failed(error)) => {
                tracing::warn!(path = %self.path.display(), error = %error, "wipe failed");
                self.transition_with(TaskState::Failed, Some(error), aggregator);
            }
        }
    }

    fn overwrite(&self, ctx: &TaskContext) -> Result<Outcome, TaskFailure> {
        let mut file = fs_ops::open_target(&self.path, ctx.config.follow_symlinks)?;
        let plans = plan_passes(&ctx.algorithm);
        let buffer_len = usize::try_from(self.size)
            .map_or(ctx.config.buffer_size, |size| size.min(ctx.config.buffer_size));
        let mut buffer = vec![0u8; buffer_len];

        for (pass, plan) in plans.iter().enumerate() {
            let pass = pass as u32;
            if pass > 0 {
                if let Gate::Cancelled = self.pass_boundary(ctx) {
                    return Ok(Outcome::Canceled);
                }
            }
            tracing::debug!(
                index = self.index,
                pass = pass + 1,
                total = plans.len(),
                pattern = plan.label(),
                "pass start"
            );
            fs_ops::write_pass(&mut file, plan, self.size, &mut buffer, |n| {
                self.add_bytes(pass, n, &ctx.aggregator)
            })?;
            self.complete_pass();
        }

        if ctx.config.verify_final_pass {
            if let Some(last) = plans.last() {
                fs_ops::verify_pass(&mut file, last, self.size, ctx.config.buffer_size)?;
            }
        }

        fs_ops::destroy(&self.path, file, ctx.config.destruction)?;
        Ok(Outcome::Finished)
    }

    /// Pause/cancel checkpoint between two passes.
    fn pass_boundary(&self, ctx: &TaskContext) -> Gate {
        if ctx.control.is_paused() {
            self.transition(TaskState::Pausing, &ctx.aggregator);
            match ctx.control.wait_while_paused() {
                Gate::Proceed => {
                    self.transition(TaskState::Processing, &ctx.aggregator);
                }
                Gate::Cancelled => return Gate::Cancelled,
            }
        }
        if ctx.control.is_cancelled() {
            Gate::Cancelled
        } else {
            Gate::Proceed
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::algorithm::AlgorithmRegistry;
    use crate::config::DestructionPolicy;
    use std::fs;

    fn context(algorithm: &str, repeats: u32, config: EngineConfig) -> TaskContext {
        let registry = AlgorithmRegistry::new(config.bounds);
        let mut algorithm = registry.select(algorithm).expect("Algorithm should exist");
        registry.set_repeats(&mut algorithm, repeats);
        TaskContext {
            algorithm,
            config,
            aggregator: Arc::new(ProgressAggregator::new(1)),
            control: Arc::new(SessionControl::new()),
        }
    }

    fn registered(ctx: &TaskContext, task: WipeTask) -> Arc<WipeTask> {
        let task = Arc::new(task);
        ctx.aggregator.register_tasks(std::slice::from_ref(&task));
        task
    }

    #[test]
    fn test_execute_wipes_and_deletes() {
        let temp_dir = tempfile::tempdir().expect("Failed to create temp dir");
        let path = temp_dir.path().join("secret.txt");
        fs::write(&path, vec![0xAB; 3000]).expect("Failed to write file");

        let ctx = context("zero", 2, EngineConfig::default());
        let task = registered(&ctx, WipeTask::new(0, &path, 3000));
        task.execute(&ctx);

        let snapshot = task.snapshot();
        assert_eq!(snapshot.state, TaskState::Finished);
        assert_eq!(snapshot.bytes_processed, 6000);
        assert_eq!(snapshot.passes_completed, 2);
        assert!(!path.exists(), "File should be deleted after wiping");

        let overall = ctx.aggregator.snapshot().overall;
        assert_eq!(overall.wiped_file_size, 3000);
        assert_eq!(overall.total_wiped_size, 6000);
    }

    #[test]
    fn test_execute_keep_policy_leaves_pattern() {
        let temp_dir = tempfile::tempdir().expect("Failed to create temp dir");
        let path = temp_dir.path().join("kept.bin");
        fs::write(&path, vec![0x00; 256]).expect("Failed to write file");

        let config = EngineConfig {
            destruction: DestructionPolicy::Keep,
            verify_final_pass: true,
            ..EngineConfig::default()
        };
        let ctx = context("schneier", 1, config);
        let task = registered(&ctx, WipeTask::new(0, &path, 256));
        task.execute(&ctx);

        assert_eq!(task.state(), TaskState::Finished);
        assert_eq!(task.bytes_processed(), 256 * 7);
        assert_eq!(fs::read(&path).expect("Failed to read file").len(), 256);
    }

    #[test]
    fn test_zero_byte_file_finishes_without_bytes() {
        let temp_dir = tempfile::tempdir().expect("Failed to create temp dir");
        let path = temp_dir.path().join("empty.txt");
        fs::write(&path, b"").expect("Failed to write file");

        let ctx = context("zero", 3, EngineConfig::default());
        let task = registered(&ctx, WipeTask::new(0, &path, 0));
        task.execute(&ctx);

        assert_eq!(task.state(), TaskState::Finished);
        assert_eq!(task.bytes_processed(), 0);
        assert_eq!(ctx.aggregator.snapshot().overall.total_wiped_size, 0);
    }

    #[test]
    fn test_vanished_file_is_missing_not_failed() {
        let temp_dir = tempfile::tempdir().expect("Failed to create temp dir");
        let path = temp_dir.path().join("vanishing.txt");
        fs::write(&path, b"soon gone").expect("Failed to write file");

        let ctx = context("zero", 1, EngineConfig::default());
        let task = registered(&ctx, WipeTask::new(0, &path, 9));
        fs::remove_file(&path).expect("Failed to remove file");
        task.execute(&ctx);

        assert_eq!(task.state(), TaskState::Missing);
        assert!(task.snapshot().error.is_none());
        assert_eq!(ctx.aggregator.snapshot().states.missing, 1);
    }

    #[test]
    fn test_cancelled_before_start() {
        let temp_dir = tempfile::tempdir().expect("Failed to create temp dir");
        let path = temp_dir.path().join("untouched.txt");
        fs::write(&path, b"still here").expect("Failed to write file");

        let ctx = context("zero", 1, EngineConfig::default());
        let task = registered(&ctx, WipeTask::new(0, &path, 10));
        ctx.control.cancel();
        task.execute(&ctx);

        assert_eq!(task.state(), TaskState::Canceled);
        assert_eq!(fs::read(&path).expect("Failed to read"), b"still here");
    }

    #[test]
    fn test_cancel_after_finished_is_noop() {
        let temp_dir = tempfile::tempdir().expect("Failed to create temp dir");
        let path = temp_dir.path().join("done.txt");
        fs::write(&path, b"abc").expect("Failed to write file");

        let ctx = context("zero", 1, EngineConfig::default());
        let task = registered(&ctx, WipeTask::new(0, &path, 3));
        task.execute(&ctx);
        assert_eq!(task.state(), TaskState::Finished);

        let before = ctx.aggregator.snapshot();
        assert!(!task.transition(TaskState::Canceled, &ctx.aggregator));
        assert_eq!(task.state(), TaskState::Finished);
        assert_eq!(ctx.aggregator.snapshot(), before);
    }

    #[test]
    fn test_failed_at_creation_is_not_executed() {
        let ctx = context("zero", 1, EngineConfig::default());
        let error = TaskError::new(crate::error::TaskErrorKind::FilesystemLoop, "loop");
        let task = registered(&ctx, WipeTask::failed(0, "/loop", error));
        task.execute(&ctx);
        assert_eq!(task.state(), TaskState::Failed);
        assert_eq!(ctx.aggregator.snapshot().states.failed, 1);
        assert_eq!(ctx.aggregator.snapshot().states.processing, 0);
    }

    #[test]
    fn test_abort_fails_processing_task_once() {
        let ctx = context("zero", 1, EngineConfig::default());
        let task = registered(&ctx, WipeTask::new(0, "/stuck.bin", 5));
        assert!(task.transition(TaskState::Processing, &ctx.aggregator));

        let error = || TaskError::new(crate::error::TaskErrorKind::Internal, "aborted");
        assert!(task.abort(error(), &ctx.aggregator));
        assert!(!task.abort(error(), &ctx.aggregator), "Terminal tasks stay as they are");

        assert_eq!(task.state(), TaskState::Failed);
        let states = ctx.aggregator.snapshot().states;
        assert_eq!(states.failed, 1);
        assert_eq!(states.processing, 0);
    }

    #[cfg(unix)]
    #[test]
    fn test_permission_denied_is_failed() {
        use std::os::unix::fs::PermissionsExt;

        let temp_dir = tempfile::tempdir().expect("Failed to create temp dir");
        let path = temp_dir.path().join("readonly.txt");
        fs::write(&path, b"locked").expect("Failed to write file");
        fs::set_permissions(&path, fs::Permissions::from_mode(0o444)).expect("Failed to chmod");

        // root ignores file modes; nothing to observe in that case
        if fs::OpenOptions::new().write(true).open(&path).is_ok() {
            return;
        }

        let ctx = context("zero", 1, EngineConfig::default());
        let task = registered(&ctx, WipeTask::new(0, &path, 6));
        task.execute(&ctx);

        assert_eq!(task.state(), TaskState::Failed);
        assert!(task.failed_with_permission_error());
        assert!(ctx.aggregator.elevation_recommended());
    }
}
