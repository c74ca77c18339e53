//! Per-job task bookkeeping.
//!
//! [`JobTracker`] holds at most one background task per job id. A caller
//! first [`reserve`](JobTracker::reserve)s the id, does any synchronous
//! preparation, then [`spawn`](Reservation::spawn)s the task. While the id
//! is reserved or running, further reservations for it are refused, which
//! is what keeps the re-drive sweep from double-submitting a job this
//! process is already driving.
//!
//! Every task gets a child of the tracker's root [`CancellationToken`].

use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use avatarflow_core::types::DocId;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

struct TrackedJob {
    generation: u64,
    cancel: CancellationToken,
    handle: Option<JoinHandle<()>>,
}

#[derive(Default)]
struct Registry {
    next_generation: u64,
    jobs: HashMap<DocId, TrackedJob>,
}

impl Registry {
    /// Remove `id` only if it still belongs to `generation`.
    fn release(&mut self, id: &str, generation: u64) {
        if self.jobs.get(id).is_some_and(|job| job.generation == generation) {
            self.jobs.remove(id);
        }
    }
}

type SharedRegistry = Arc<Mutex<Registry>>;

fn lock(registry: &SharedRegistry) -> MutexGuard<'_, Registry> {
    // The registry holds no invariant a panicking holder could break.
    registry.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Tracks in-flight job tasks by job id.
pub struct JobTracker {
    registry: SharedRegistry,
    root: CancellationToken,
}

impl Default for JobTracker {
    fn default() -> Self {
        Self::new()
    }
}

impl JobTracker {
    pub fn new() -> Self {
        Self {
            registry: Arc::default(),
            root: CancellationToken::new(),
        }
    }

    /// Claim `id`. Returns `None` when the id is already reserved or
    /// running, or after [`shutdown`](Self::shutdown).
    pub fn reserve(&self, id: &str) -> Option<Reservation> {
        if self.root.is_cancelled() {
            return None;
        }

        let mut registry = lock(&self.registry);
        if registry.jobs.contains_key(id) {
            return None;
        }

        registry.next_generation += 1;
        let generation = registry.next_generation;
        let cancel = self.root.child_token();
        registry.jobs.insert(
            id.to_string(),
            TrackedJob {
                generation,
                cancel: cancel.clone(),
                handle: None,
            },
        );

        Some(Reservation {
            registry: Arc::clone(&self.registry),
            id: id.to_string(),
            generation,
            cancel,
            spawned: false,
        })
    }

    /// Cancel the task for `id` and forget it. Returns `false` when
    /// nothing was tracked.
    pub fn cancel(&self, id: &str) -> bool {
        let removed = lock(&self.registry).jobs.remove(id);
        match removed {
            Some(job) => {
                job.cancel.cancel();
                true
            }
            None => false,
        }
    }

    /// Cancel every tracked task. Returns the number cancelled.
    pub fn cancel_all(&self) -> usize {
        let drained: Vec<TrackedJob> = lock(&self.registry)
            .jobs
            .drain()
            .map(|(_, job)| job)
            .collect();
        for job in &drained {
            job.cancel.cancel();
        }
        drained.len()
    }

    pub fn is_tracked(&self, id: &str) -> bool {
        lock(&self.registry).jobs.contains_key(id)
    }

    pub fn tracked_ids(&self) -> Vec<DocId> {
        lock(&self.registry).jobs.keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        lock(&self.registry).jobs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Cancel the root token, then wait up to `timeout` per task for a
    /// clean exit. No reservations are granted afterwards.
    pub async fn shutdown(&self, timeout: Duration) {
        self.root.cancel();

        let drained: Vec<(DocId, TrackedJob)> = lock(&self.registry).jobs.drain().collect();
        for (id, job) in drained {
            job.cancel.cancel();
            if let Some(handle) = job.handle {
                if tokio::time::timeout(timeout, handle).await.is_err() {
                    tracing::warn!(
                        job_id = %id,
                        "Job task did not stop before the shutdown timeout",
                    );
                }
            }
        }
    }
}

/// Exclusive claim on a job id, released on drop unless a task was spawned.
pub struct Reservation {
    registry: SharedRegistry,
    id: DocId,
    generation: u64,
    cancel: CancellationToken,
    spawned: bool,
}

impl Reservation {
    pub fn job_id(&self) -> &str {
        &self.id
    }

    /// Start the job task. The tracker entry is released when the task
    /// finishes.
    pub fn spawn<F, Fut>(mut self, task: F) -> TaskCompletion
    where
        F: FnOnce(CancellationToken) -> Fut,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let (done_tx, done_rx) = oneshot::channel();
        let future = task(self.cancel.clone());
        let registry = Arc::clone(&self.registry);
        let id = self.id.clone();
        let generation = self.generation;

        // Hold the lock across spawn so the task cannot release its entry
        // before the handle is stored.
        let mut guard = lock(&self.registry);
        let handle = tokio::spawn(async move {
            future.await;
            lock(&registry).release(&id, generation);
            let _ = done_tx.send(());
        });
        if let Some(job) = guard.jobs.get_mut(&self.id) {
            if job.generation == self.generation {
                job.handle = Some(handle);
            }
        }
        drop(guard);

        self.spawned = true;
        TaskCompletion(done_rx)
    }
}

impl Drop for Reservation {
    fn drop(&mut self) {
        if !self.spawned {
            lock(&self.registry).release(&self.id, self.generation);
        }
    }
}

/// Resolves when a spawned job task has finished.
pub struct TaskCompletion(oneshot::Receiver<()>);

impl TaskCompletion {
    /// Wait for the task. Also returns if the task panicked.
    pub async fn wait(self) {
        let _ = self.0.await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn second_reservation_for_same_id_is_refused() {
        let tracker = JobTracker::new();
        let first = tracker.reserve("job-1").unwrap();
        assert!(tracker.reserve("job-1").is_none());
        assert!(tracker.reserve("job-2").is_some());
        drop(first);
        assert!(tracker.reserve("job-1").is_some());
    }

    #[tokio::test]
    async fn finished_task_releases_its_id() {
        let tracker = JobTracker::new();
        let done = tracker.reserve("job-1").unwrap().spawn(|_| async {});
        done.wait().await;

        assert!(!tracker.is_tracked("job-1"));
        assert!(tracker.reserve("job-1").is_some());
    }

    #[tokio::test]
    async fn running_task_blocks_reservation() {
        let tracker = JobTracker::new();
        let (release_tx, release_rx) = oneshot::channel::<()>();
        let done = tracker.reserve("job-1").unwrap().spawn(|_| async move {
            let _ = release_rx.await;
        });

        assert!(tracker.is_tracked("job-1"));
        assert!(tracker.reserve("job-1").is_none());

        release_tx.send(()).unwrap();
        done.wait().await;
        assert!(tracker.is_empty());
    }

    #[tokio::test]
    async fn cancel_signals_the_task() {
        let tracker = JobTracker::new();
        let done = tracker
            .reserve("job-1")
            .unwrap()
            .spawn(|cancel| async move { cancel.cancelled().await });

        assert!(tracker.cancel("job-1"));
        done.wait().await;
        assert!(!tracker.cancel("job-1"));
    }

    #[tokio::test]
    async fn release_after_cancel_does_not_evict_new_reservation() {
        let tracker = JobTracker::new();
        let done = tracker
            .reserve("job-1")
            .unwrap()
            .spawn(|cancel| async move { cancel.cancelled().await });
        tracker.cancel("job-1");

        let replacement = tracker.reserve("job-1").unwrap();
        done.wait().await;

        // The old task finished after the new reservation was made.
        assert!(tracker.is_tracked("job-1"));
        drop(replacement);
        assert!(!tracker.is_tracked("job-1"));
    }

    #[tokio::test]
    async fn shutdown_cancels_everything_and_refuses_new_work() {
        let tracker = JobTracker::new();
        for id in ["a", "b", "c"] {
            tracker
                .reserve(id)
                .unwrap()
                .spawn(|cancel| async move { cancel.cancelled().await });
        }
        assert_eq!(tracker.len(), 3);

        tracker.shutdown(Duration::from_secs(1)).await;
        assert!(tracker.is_empty());
        assert!(tracker.reserve("d").is_none());
    }
}
