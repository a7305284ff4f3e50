//! Bounded worker pool for wipe tasks.
//!
//! Tasks are queued FIFO on a crossbeam channel. `start` seals the queue,
//! spawns `concurrency` workers, and each worker repeatedly takes the oldest
//! queued task and runs it to a terminal state. A worker owns at most one task
//! at a time, so no more than `concurrency` tasks are ever Processing.
//!
//! Pause and cancellation are cooperative: workers look at `SessionControl`
//! between tasks and between passes, never in the middle of a pass.

use crossbeam_channel::{unbounded, Receiver, Sender};
use std::io;
use std::panic::{self, AssertUnwindSafe};
use std::path::PathBuf;
use std::sync::{Arc, Condvar, Mutex, MutexGuard};
use std::thread::{self, JoinHandle};
use crate::error::{EngineError, TaskError, TaskErrorKind};
use crate::model::TaskState;
use crate::task::{TaskContext, WipeTask};

/// What a worker should do after a checkpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Gate {
    Proceed,
    Cancelled,
}

#[derive(Debug, Default)]
struct ControlFlags {
    paused: bool,
    cancelled: bool,
}

/// Shared pause gate and cancellation flag for one session.
#[derive(Debug, Default)]
pub struct SessionControl {
    flags: Mutex<ControlFlags>,
    changed: Condvar,
}

impl SessionControl {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, ControlFlags> {
        self.flags.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Returns false if already paused or cancelled.
    pub fn pause(&self) -> bool {
        let mut flags = self.lock();
        if flags.paused || flags.cancelled {
            return false;
        }
        flags.paused = true;
        true
    }

    /// Returns false if not paused.
    pub fn resume(&self) -> bool {
        let mut flags = self.lock();
        if !flags.paused {
            return false;
        }
        flags.paused = false;
        self.changed.notify_all();
        true
    }

    /// Returns false if already cancelled. Also releases paused workers.
    pub fn cancel(&self) -> bool {
        let mut flags = self.lock();
        if flags.cancelled {
            return false;
        }
        flags.cancelled = true;
        flags.paused = false;
        self.changed.notify_all();
        true
    }

    pub fn is_paused(&self) -> bool {
        self.lock().paused
    }

    pub fn is_cancelled(&self) -> bool {
        self.lock().cancelled
    }

    /// Block while paused. Returns `Cancelled` if the session was cancelled.
    pub fn wait_while_paused(&self) -> Gate {
        let mut flags = self.lock();
        while flags.paused && !flags.cancelled {
            flags = self.changed.wait(flags).unwrap_or_else(|e| e.into_inner());
        }
        if flags.cancelled {
            Gate::Cancelled
        } else {
            Gate::Proceed
        }
    }
}

type DrainHook = Box<dyn FnOnce() + Send + 'static>;
type WorkerBody = Box<dyn FnOnce() + Send + 'static>;

/// Runs the hook when the last worker lets go of it, even if that worker panicked.
struct DrainGuard {
    hook: Mutex<Option<DrainHook>>,
}

impl Drop for DrainGuard {
    fn drop(&mut self) {
        let hook = self.hook.get_mut().unwrap_or_else(|e| e.into_inner()).take();
        if let Some(hook) = hook {
            hook();
        }
    }
}

/// FIFO task queue plus the worker threads that drain it.
pub struct Scheduler {
    context: Arc<TaskContext>,
    sender: Option<Sender<Arc<WipeTask>>>,
    receiver: Receiver<Arc<WipeTask>>,
    tasks: Vec<Arc<WipeTask>>,
    queued: usize,
    workers: Vec<JoinHandle<()>>,
}

impl Scheduler {
    pub fn new(context: TaskContext) -> Self {
        let (sender, receiver) = unbounded();
        Scheduler {
            context: Arc::new(context),
            sender: Some(sender),
            receiver,
            tasks: Vec::new(),
            queued: 0,
            workers: Vec::new(),
        }
    }

    pub fn context(&self) -> &Arc<TaskContext> {
        &self.context
    }

    /// Every submitted task, in submission order.
    pub fn tasks(&self) -> &[Arc<WipeTask>] {
        &self.tasks
    }

    /// Register tasks with the aggregator and queue the Pending ones.
    ///
    /// Tasks created in a terminal state are counted but never queued.
    pub fn submit(&mut self, tasks: Vec<WipeTask>) -> Result<Vec<Arc<WipeTask>>, EngineError> {
        let sender = self.sender.as_ref().ok_or(EngineError::SchedulerSealed)?;
        let tasks: Vec<Arc<WipeTask>> = tasks.into_iter().map(Arc::new).collect();
        self.context.aggregator.register_tasks(&tasks);

        for task in &tasks {
            if task.state() != TaskState::Pending {
                continue;
            }
            // receiver lives in self, so the channel cannot be disconnected here
            if sender.send(Arc::clone(task)).is_ok() {
                self.queued += 1;
            }
        }
        self.tasks.extend(tasks.iter().cloned());
        Ok(tasks)
    }

    /// Seal the queue and spawn the workers.
    ///
    /// `on_drained` runs exactly once, on the thread of the last worker to
    /// exit (or immediately if there is nothing to run). If a worker cannot
    /// be spawned the session is cancelled and the error is returned; the
    /// workers already running drain the rest of the queue as Canceled.
    pub fn start<F>(&mut self, concurrency: usize, on_drained: F) -> Result<usize, EngineError>
    where
        F: FnOnce() + Send + 'static,
    {
        self.start_with(concurrency, Box::new(on_drained), |name, body| {
            thread::Builder::new().name(name).spawn(body)
        })
    }

    fn start_with<S>(
        &mut self,
        concurrency: usize,
        on_drained: DrainHook,
        mut spawn: S,
    ) -> Result<usize, EngineError>
    where
        S: FnMut(String, WorkerBody) -> io::Result<JoinHandle<()>>,
    {
        if concurrency == 0 {
            return Err(EngineError::config("concurrency must be at least 1"));
        }
        let sender = self.sender.take().ok_or(EngineError::SchedulerSealed)?;
        drop(sender);

        let guard = Arc::new(DrainGuard {
            hook: Mutex::new(Some(on_drained)),
        });
        let worker_count = concurrency.min(self.queued);

        for worker_id in 0..worker_count {
            let name = format!("wipe-worker-{}", worker_id);
            let receiver = self.receiver.clone();
            let context = Arc::clone(&self.context);
            let worker_guard = Arc::clone(&guard);
            let body: WorkerBody = Box::new(move || {
                let _guard = worker_guard;
                worker_loop(worker_id, receiver, context);
            });
            match spawn(name.clone(), body) {
                Ok(handle) => self.workers.push(handle),
                Err(source) => {
                    tracing::error!(worker = %name, error = %source, "failed to spawn worker");
                    self.abandon_queue();
                    return Err(EngineError::Io {
                        path: PathBuf::from(name),
                        source,
                    });
                }
            }
        }

        tracing::debug!(workers = worker_count, queued = self.queued, "scheduler started");
        Ok(worker_count)
    }

    /// Cancel the session and mark every task still queued as Canceled.
    fn abandon_queue(&self) {
        self.context.control.cancel();
        while let Ok(task) = self.receiver.try_recv() {
            task.transition(TaskState::Canceled, &self.context.aggregator);
        }
    }

    pub fn pause_all(&self) -> bool {
        self.context.control.pause()
    }

    pub fn resume_all(&self) -> bool {
        self.context.control.resume()
    }

    pub fn cancel_all(&self) -> bool {
        self.context.control.cancel()
    }

    /// Wait for all workers to exit. Returns the number that panicked.
    pub fn join(&mut self) -> usize {
        let mut panicked = 0;
        for handle in self.workers.drain(..) {
            let name = handle.thread().name().unwrap_or("wipe-worker").to_string();
            if handle.join().is_err() {
                tracing::error!(worker = %name, "worker thread panicked");
                panicked += 1;
            }
        }
        panicked
    }
}

fn worker_loop(worker_id: usize, receiver: Receiver<Arc<WipeTask>>, context: Arc<TaskContext>) {
    while let Ok(task) = receiver.recv() {
        // a paused session holds the next task in Pending
        if let Gate::Cancelled = context.control.wait_while_paused() {
            task.transition(TaskState::Canceled, &context.aggregator);
            continue;
        }
        tracing::debug!(worker = worker_id, index = task.index(), "picked up task");
        if panic::catch_unwind(AssertUnwindSafe(|| task.execute(&context))).is_err() {
            tracing::error!(worker = worker_id, index = task.index(), "task panicked");
            let error = TaskError::new(TaskErrorKind::Internal, "wipe aborted by a panic");
            task.abort(error, &context.aggregator);
        }
    }
    tracing::debug!(worker = worker_id, "queue drained");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::algorithm::AlgorithmRegistry;
    use crate::config::EngineConfig;
    use crate::progress::{ProgressAggregator, ProgressEvent, ProgressObserver, ProgressSnapshot};
    use std::fs;
    use std::path::Path;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::mpsc;
    use std::time::Duration;

    fn scheduler() -> Scheduler {
        let registry = AlgorithmRegistry::default();
        Scheduler::new(TaskContext {
            algorithm: registry.select("zero").expect("zero should exist"),
            config: EngineConfig::default(),
            aggregator: Arc::new(ProgressAggregator::new(1)),
            control: Arc::new(SessionControl::new()),
        })
    }

    #[test]
    fn test_control_pause_is_idempotent() {
        let control = SessionControl::new();
        assert!(control.pause());
        assert!(!control.pause(), "Second pause should be a no-op");
        assert!(control.resume());
        assert!(!control.resume());
    }

    #[test]
    fn test_cancel_releases_paused_waiter() {
        let control = Arc::new(SessionControl::new());
        control.pause();
        let waiter = {
            let control = Arc::clone(&control);
            thread::spawn(move || control.wait_while_paused())
        };
        thread::sleep(Duration::from_millis(20));
        assert!(control.cancel());
        assert_eq!(waiter.join().expect("Waiter panicked"), Gate::Cancelled);
        assert!(!control.pause(), "Cannot pause a cancelled session");
    }

    #[test]
    fn test_submit_after_start_is_rejected() {
        let mut scheduler = scheduler();
        scheduler.start(1, || {}).expect("Failed to start");
        let result = scheduler.submit(vec![WipeTask::new(0, "/tmp/x", 0)]);
        assert!(matches!(result, Err(EngineError::SchedulerSealed)));
        assert!(matches!(scheduler.start(1, || {}), Err(EngineError::SchedulerSealed)));
    }

    #[test]
    fn test_empty_queue_drains_immediately() {
        let mut scheduler = scheduler();
        let (tx, rx) = mpsc::channel();
        let workers = scheduler
            .start(4, move || tx.send(()).expect("Failed to signal"))
            .expect("Failed to start");
        assert_eq!(workers, 0);
        rx.recv_timeout(Duration::from_secs(1)).expect("Drain hook should have run");
    }

    #[test]
    fn test_runs_all_tasks_and_calls_hook_once() {
        let temp_dir = tempfile::tempdir().expect("Failed to create temp dir");
        let mut tasks = Vec::new();
        for i in 0..6 {
            let path = temp_dir.path().join(format!("f{}.bin", i));
            fs::write(&path, vec![1u8; 100]).expect("Failed to write file");
            tasks.push(WipeTask::new(i, path, 100));
        }

        let mut scheduler = scheduler();
        scheduler.submit(tasks).expect("Failed to submit");
        let (tx, rx) = mpsc::channel();
        let workers = scheduler
            .start(3, move || tx.send(()).expect("Failed to signal"))
            .expect("Failed to start");
        assert_eq!(workers, 3);
        assert_eq!(scheduler.join(), 0);

        rx.recv_timeout(Duration::from_secs(5)).expect("Drain hook should have run");
        assert!(rx.try_recv().is_err(), "Drain hook must run only once");
        assert!(scheduler.tasks().iter().all(|t| t.state() == TaskState::Finished));
        assert_eq!(scheduler.context().aggregator.snapshot().states.finished, 6);
    }

    fn queued_files(dir: &Path, count: usize) -> Vec<WipeTask> {
        (0..count)
            .map(|i| {
                let path = dir.join(format!("f{}.bin", i));
                fs::write(&path, vec![1u8; 100]).expect("Failed to write file");
                WipeTask::new(i, path, 100)
            })
            .collect()
    }

    #[test]
    fn test_spawn_failure_cancels_session() {
        let temp_dir = tempfile::tempdir().expect("Failed to create temp dir");
        let mut scheduler = scheduler();
        scheduler
            .submit(queued_files(temp_dir.path(), 4))
            .expect("Failed to submit");

        let (tx, rx) = mpsc::channel();
        let mut spawned = 0;
        let result = scheduler.start_with(
            3,
            Box::new(move || tx.send(()).expect("Failed to signal")),
            |name, body| {
                spawned += 1;
                if spawned > 1 {
                    return Err(io::Error::new(io::ErrorKind::Other, "no more threads"));
                }
                thread::Builder::new().name(name).spawn(body)
            },
        );

        match result {
            Err(EngineError::Io { path, .. }) => assert_eq!(path, PathBuf::from("wipe-worker-1")),
            other => panic!("Expected a spawn error, got {:?}", other),
        }
        assert!(scheduler.context().control.is_cancelled());
        assert!(!scheduler.pause_all(), "A cancelled session cannot be paused");
        assert_eq!(scheduler.join(), 0);

        rx.recv_timeout(Duration::from_secs(5)).expect("Drain hook should have run");
        assert!(scheduler.tasks().iter().all(|t| t.state().is_terminal()));
        let states = scheduler.context().aggregator.snapshot().states;
        assert_eq!(states.active(), 0);
    }

    struct PanicOnFirstWrite {
        fired: AtomicBool,
    }

    impl ProgressObserver for PanicOnFirstWrite {
        fn on_progress(&self, event: &ProgressEvent, _snapshot: &ProgressSnapshot) {
            if matches!(event, ProgressEvent::BytesWritten { .. })
                && !self.fired.swap(true, Ordering::SeqCst)
            {
                panic!("observer failure");
            }
        }
    }

    #[test]
    fn test_panicking_observer_fails_only_its_task() {
        let temp_dir = tempfile::tempdir().expect("Failed to create temp dir");
        let mut scheduler = scheduler();
        scheduler.context().aggregator.subscribe(Arc::new(PanicOnFirstWrite {
            fired: AtomicBool::new(false),
        }));
        scheduler
            .submit(queued_files(temp_dir.path(), 2))
            .expect("Failed to submit");

        let (tx, rx) = mpsc::channel();
        scheduler
            .start(1, move || tx.send(()).expect("Failed to signal"))
            .expect("Failed to start");
        assert_eq!(scheduler.join(), 0, "The worker should survive the panic");
        rx.recv_timeout(Duration::from_secs(5)).expect("Drain hook should have run");

        let first = scheduler.tasks()[0].snapshot();
        assert_eq!(first.state, TaskState::Failed);
        assert_eq!(first.error.map(|e| e.kind), Some(TaskErrorKind::Internal));
        assert_eq!(scheduler.tasks()[1].state(), TaskState::Finished);

        let states = scheduler.context().aggregator.snapshot().states;
        assert_eq!(states.failed, 1);
        assert_eq!(states.finished, 1);
        assert_eq!(states.processing, 0);
    }

    #[test]
    fn test_cancel_all_before_start_cancels_pending() {
        let temp_dir = tempfile::tempdir().expect("Failed to create temp dir");
        let path = temp_dir.path().join("kept.bin");
        fs::write(&path, b"keep me").expect("Failed to write file");

        let mut scheduler = scheduler();
        scheduler.submit(vec![WipeTask::new(0, &path, 7)]).expect("Failed to submit");
        assert!(scheduler.cancel_all());
        scheduler.start(1, || {}).expect("Failed to start");
        scheduler.join();

        assert_eq!(scheduler.tasks()[0].state(), TaskState::Canceled);
        assert_eq!(fs::read(&path).expect("Failed to read"), b"keep me");
    }
}
