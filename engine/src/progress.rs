//! Progress aggregation and observer notifications.
//!
//! Workers report state changes and written bytes to a `ProgressAggregator`.
//! The aggregator applies each update under one mutex, takes a consistent
//! snapshot, and then notifies every registered `ProgressObserver` once with
//! that snapshot. Observers only ever see copies; they cannot mutate the counts.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::{Arc, Mutex, MutexGuard, RwLock};
use uuid::Uuid;
use crate::model::TaskState;
use crate::session::SessionSummary;
use crate::task::WipeTask;

/// Number of tasks currently in each state.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WipingStateCounts {
    pub pending: usize,
    pub processing: usize,
    pub pausing: usize,
    pub finished: usize,
    pub canceled: usize,
    pub failed: usize,
    pub missing: usize,
}

impl WipingStateCounts {
    pub fn get(&self, state: TaskState) -> usize {
        match state {
            TaskState::Pending => self.pending,
            TaskState::Processing => self.processing,
            TaskState::Pausing => self.pausing,
            TaskState::Finished => self.finished,
            TaskState::Canceled => self.canceled,
            TaskState::Failed => self.failed,
            TaskState::Missing => self.missing,
        }
    }

    fn slot(&mut self, state: TaskState) -> &mut usize {
        match state {
            TaskState::Pending => &mut self.pending,
            TaskState::Processing => &mut self.processing,
            TaskState::Pausing => &mut self.pausing,
            TaskState::Finished => &mut self.finished,
            TaskState::Canceled => &mut self.canceled,
            TaskState::Failed => &mut self.failed,
            TaskState::Missing => &mut self.missing,
        }
    }

    fn increment(&mut self, state: TaskState) {
        *self.slot(state) += 1;
    }

    fn decrement(&mut self, state: TaskState) {
        let slot = self.slot(state);
        debug_assert!(*slot > 0, "state count for {} would underflow", state);
        *slot = slot.saturating_sub(1);
    }

    /// Sum over all states; equals the number of tasks submitted.
    pub fn total(&self) -> usize {
        TaskState::ALL.iter().map(|s| self.get(*s)).sum()
    }

    /// Tasks that have not reached a terminal state.
    pub fn active(&self) -> usize {
        self.pending + self.processing + self.pausing
    }

    pub fn iter(&self) -> impl Iterator<Item = (TaskState, usize)> + '_ {
        TaskState::ALL.iter().map(move |s| (*s, self.get(*s)))
    }
}

/// Byte totals for a session.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WipingOverallCounts {
    /// Sum of captured sizes of all submitted tasks
    pub total_file_size: u64,
    /// File bytes overwritten at least once (first pass)
    pub wiped_file_size: u64,
    /// Bytes physically written across all passes
    pub total_wiped_size: u64,
}

/// A consistent copy of both aggregates.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProgressSnapshot {
    /// Increases by one with every applied update
    pub revision: u64,
    pub states: WipingStateCounts,
    pub overall: WipingOverallCounts,
    pub permission_failures: usize,
}

/// What caused a notification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProgressEvent {
    /// Tasks were added to the session
    Registered { count: usize },
    StateChanged {
        task_id: Uuid,
        index: usize,
        path: PathBuf,
        old: TaskState,
        new: TaskState,
    },
    BytesWritten {
        task_id: Uuid,
        index: usize,
        pass: u32,
        delta: u64,
    },
}

/// Receives progress notifications.
///
/// Called synchronously from worker threads; implementations should return quickly
/// and must not call back into the `WipeEngine` that owns the session.
pub trait ProgressObserver: Send + Sync {
    /// One call per applied update.
    fn on_progress(&self, event: &ProgressEvent, snapshot: &ProgressSnapshot);

    /// Called at most once per session, when permission failures reach the threshold.
    fn on_elevation_recommended(&self, _permission_failures: usize) {}

    /// Called once, after the last task of the session is terminal.
    fn on_session_completed(&self, _summary: &SessionSummary) {}
}

#[derive(Debug, Default)]
struct Aggregate {
    snapshot: ProgressSnapshot,
    elevation_signalled: bool,
}

/// Thread-safe owner of a session's counters.
pub struct ProgressAggregator {
    inner: Mutex<Aggregate>,
    observers: RwLock<Vec<Arc<dyn ProgressObserver>>>,
    elevation_threshold: usize,
}

impl ProgressAggregator {
    pub fn new(elevation_threshold: usize) -> Self {
        ProgressAggregator {
            inner: Mutex::new(Aggregate::default()),
            observers: RwLock::new(Vec::new()),
            elevation_threshold: elevation_threshold.max(1),
        }
    }

    pub fn with_observers(
        elevation_threshold: usize,
        observers: Vec<Arc<dyn ProgressObserver>>,
    ) -> Self {
        let aggregator = Self::new(elevation_threshold);
        for observer in observers {
            aggregator.subscribe(observer);
        }
        aggregator
    }

    pub fn subscribe(&self, observer: Arc<dyn ProgressObserver>) {
        self.observers
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .push(observer);
    }

    fn lock(&self) -> MutexGuard<'_, Aggregate> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn observers(&self) -> Vec<Arc<dyn ProgressObserver>> {
        self.observers
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    pub fn snapshot(&self) -> ProgressSnapshot {
        self.lock().snapshot
    }

    pub fn elevation_recommended(&self) -> bool {
        self.lock().elevation_signalled
    }

    /// Count newly submitted tasks in whatever state they were created in.
    pub fn register_tasks(&self, tasks: &[Arc<WipeTask>]) {
        if tasks.is_empty() {
            return;
        }
        let (snapshot, elevate) = {
            let mut agg = self.lock();
            for task in tasks {
                let state = task.state();
                agg.snapshot.states.increment(state);
                agg.snapshot.overall.total_file_size += task.size();
                if state == TaskState::Failed && task.failed_with_permission_error() {
                    agg.snapshot.permission_failures += 1;
                }
            }
            agg.snapshot.revision += 1;
            let elevate = self.check_elevation(&mut agg);
            (agg.snapshot, elevate)
        };
        self.publish(&ProgressEvent::Registered { count: tasks.len() }, &snapshot, elevate);
    }

    /// Move one task between state counts.
    pub fn on_task_state_change(&self, task: &WipeTask, old: TaskState, new: TaskState) {
        let permission_failure = new == TaskState::Failed && task.failed_with_permission_error();
        let (snapshot, elevate) = {
            let mut agg = self.lock();
            agg.snapshot.states.decrement(old);
            agg.snapshot.states.increment(new);
            if permission_failure {
                agg.snapshot.permission_failures += 1;
            }
            agg.snapshot.revision += 1;
            let elevate = self.check_elevation(&mut agg);
            (agg.snapshot, elevate)
        };
        let event = ProgressEvent::StateChanged {
            task_id: task.id(),
            index: task.index(),
            path: task.path().to_path_buf(),
            old,
            new,
        };
        self.publish(&event, &snapshot, elevate);
    }

    /// Account for `delta` bytes written by `task` during zero-based `pass`.
    pub fn on_bytes_written(&self, task: &WipeTask, pass: u32, delta: u64) {
        if delta == 0 {
            return;
        }
        let snapshot = {
            let mut agg = self.lock();
            let overall = &mut agg.snapshot.overall;
            overall.total_wiped_size += delta;
            if pass == 0 {
                overall.wiped_file_size =
                    (overall.wiped_file_size + delta).min(overall.total_file_size);
            }
            agg.snapshot.revision += 1;
            agg.snapshot
        };
        let event = ProgressEvent::BytesWritten {
            task_id: task.id(),
            index: task.index(),
            pass,
            delta,
        };
        self.publish(&event, &snapshot, false);
    }

    pub(crate) fn notify_session_completed(&self, summary: &SessionSummary) {
        for observer in self.observers() {
            observer.on_session_completed(summary);
        }
    }

    fn check_elevation(&self, agg: &mut Aggregate) -> bool {
        let reached = agg.snapshot.permission_failures >= self.elevation_threshold;
        if !agg.elevation_signalled && reached {
            agg.elevation_signalled = true;
            return true;
        }
        false
    }

    fn publish(&self, event: &ProgressEvent, snapshot: &ProgressSnapshot, elevate: bool) {
        let observers = self.observers();
        for observer in &observers {
            observer.on_progress(event, snapshot);
        }
        if elevate {
            tracing::warn!(
                permission_failures = snapshot.permission_failures,
                "permission failures reached threshold; elevation recommended"
            );
            for observer in &observers {
                observer.on_elevation_recommended(snapshot.permission_failures);
            }
        }
    }
}

impl std::fmt::Debug for ProgressAggregator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProgressAggregator")
            .field("snapshot", &self.snapshot())
            .field("elevation_threshold", &self.elevation_threshold)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{TaskError, TaskErrorKind};
    use std::sync::atomic::{AtomicUsize, Ordering};

    // Test helper: records every snapshot it is handed
    #[derive(Default)]
    struct RecordingObserver {
        snapshots: Mutex<Vec<ProgressSnapshot>>,
        elevations: AtomicUsize,
    }

    impl ProgressObserver for RecordingObserver {
        fn on_progress(&self, _event: &ProgressEvent, snapshot: &ProgressSnapshot) {
            self.snapshots.lock().unwrap().push(*snapshot);
        }

        fn on_elevation_recommended(&self, _permission_failures: usize) {
            self.elevations.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn tasks(sizes: &[u64]) -> Vec<Arc<WipeTask>> {
        sizes
            .iter()
            .enumerate()
            .map(|(i, size)| Arc::new(WipeTask::new(i, format!("/tmp/file{}", i), *size)))
            .collect()
    }

    #[test]
    fn test_register_counts_pending_and_sizes() {
        let aggregator = ProgressAggregator::new(1);
        aggregator.register_tasks(&tasks(&[10, 20, 30]));
        let snapshot = aggregator.snapshot();
        assert_eq!(snapshot.states.pending, 3);
        assert_eq!(snapshot.states.total(), 3);
        assert_eq!(snapshot.overall.total_file_size, 60);
        assert_eq!(snapshot.revision, 1);
    }

    #[test]
    fn test_state_change_preserves_total() {
        let aggregator = ProgressAggregator::new(1);
        let tasks = tasks(&[10, 20]);
        aggregator.register_tasks(&tasks);
        aggregator.on_task_state_change(&tasks[0], TaskState::Pending, TaskState::Processing);
        aggregator.on_task_state_change(&tasks[0], TaskState::Processing, TaskState::Finished);
        let snapshot = aggregator.snapshot();
        assert_eq!(snapshot.states.finished, 1);
        assert_eq!(snapshot.states.pending, 1);
        assert_eq!(snapshot.states.total(), 2);
        assert_eq!(snapshot.states.active(), 1);
    }

    #[test]
    fn test_bytes_written_first_pass_counts_as_logical() {
        let aggregator = ProgressAggregator::new(1);
        let tasks = tasks(&[100]);
        aggregator.register_tasks(&tasks);
        aggregator.on_bytes_written(&tasks[0], 0, 100);
        aggregator.on_bytes_written(&tasks[0], 1, 100);
        aggregator.on_bytes_written(&tasks[0], 2, 100);
        let overall = aggregator.snapshot().overall;
        assert_eq!(overall.wiped_file_size, 100);
        assert_eq!(overall.total_wiped_size, 300);
    }

    #[test]
    fn test_zero_delta_is_not_published() {
        let aggregator = ProgressAggregator::new(1);
        let observer = Arc::new(RecordingObserver::default());
        aggregator.subscribe(observer.clone());
        let tasks = tasks(&[0]);
        aggregator.register_tasks(&tasks);
        aggregator.on_bytes_written(&tasks[0], 0, 0);
        assert_eq!(observer.snapshots.lock().unwrap().len(), 1);
    }

    #[test]
    fn test_one_notification_per_update() {
        let aggregator = ProgressAggregator::new(1);
        let observer = Arc::new(RecordingObserver::default());
        aggregator.subscribe(observer.clone());
        let tasks = tasks(&[4096]);
        aggregator.register_tasks(&tasks);
        aggregator.on_task_state_change(&tasks[0], TaskState::Pending, TaskState::Processing);
        aggregator.on_bytes_written(&tasks[0], 0, 4096);

        let snapshots = observer.snapshots.lock().unwrap();
        assert_eq!(snapshots.len(), 3);
        let revisions: Vec<u64> = snapshots.iter().map(|s| s.revision).collect();
        assert_eq!(revisions, vec![1, 2, 3]);
    }

    #[test]
    fn test_elevation_signalled_once() {
        let aggregator = ProgressAggregator::new(2);
        let observer = Arc::new(RecordingObserver::default());
        aggregator.subscribe(observer.clone());

        let denied = || TaskError::new(TaskErrorKind::PermissionDenied, "Access is denied");
        let failed: Vec<Arc<WipeTask>> = (0..3)
            .map(|i| Arc::new(WipeTask::failed(i, format!("/locked/{}", i), denied())))
            .collect();

        aggregator.register_tasks(&failed[..1]);
        assert!(!aggregator.elevation_recommended());
        aggregator.register_tasks(&failed[1..]);
        assert!(aggregator.elevation_recommended());
        assert_eq!(aggregator.snapshot().permission_failures, 3);
        assert_eq!(observer.elevations.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_counts_iterate_in_state_order() {
        let counts = WipingStateCounts {
            pending: 1,
            failed: 2,
            ..WipingStateCounts::default()
        };
        let collected: Vec<_> = counts.iter().filter(|(_, n)| *n > 0).collect();
        assert_eq!(collected, vec![(TaskState::Pending, 1), (TaskState::Failed, 2)]);
    }
}
