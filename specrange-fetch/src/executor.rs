//! Task executors for background queries.
//!
//! Queries are fire-and-forget closures. [`RayonSpawner`] runs them on the
//! global rayon pool; [`QueuedSpawner`] holds them until the host runs them,
//! which gives single-threaded hosts and tests full control over completion
//! order.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, PoisonError};

/// A boxed background task.
pub type Task = Box<dyn FnOnce() + Send + 'static>;

/// Something that can run a [`Task`] eventually.
pub trait Spawn: Send + Sync {
    /// Schedules `task`; must not run it inline.
    fn spawn(&self, task: Task);
}

/// Runs tasks on the rayon global thread pool.
#[derive(Debug, Default, Clone, Copy)]
pub struct RayonSpawner;

impl Spawn for RayonSpawner {
    fn spawn(&self, task: Task) {
        rayon::spawn(task);
    }
}

/// Holds tasks in submission order until explicitly run.
///
/// Clones share the same queue.
#[derive(Default, Clone)]
pub struct QueuedSpawner {
    tasks: Arc<Mutex<VecDeque<Task>>>,
}

impl QueuedSpawner {
    /// Creates an empty queue.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of tasks waiting to run.
    #[must_use]
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    /// Returns true if no task is waiting.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// Runs the oldest waiting task. Returns false if none was waiting.
    pub fn run_next(&self) -> bool {
        self.run_at(0)
    }

    /// Runs the newest waiting task. Returns false if none was waiting.
    pub fn run_last(&self) -> bool {
        let len = self.len();
        len > 0 && self.run_at(len - 1)
    }

    /// Runs the task at queue position `index`.
    pub fn run_at(&self, index: usize) -> bool {
        // Taken out before running: tasks may spawn more work.
        let task = self.lock().remove(index);
        match task {
            Some(task) => {
                task();
                true
            }
            None => false,
        }
    }

    /// Runs tasks until the queue is empty, including ones spawned meanwhile.
    pub fn run_all(&self) -> usize {
        let mut ran = 0;
        while self.run_next() {
            ran += 1;
        }
        ran
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, VecDeque<Task>> {
        self.tasks.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Spawn for QueuedSpawner {
    fn spawn(&self, task: Task) {
        self.lock().push_back(task);
    }
}

impl std::fmt::Debug for QueuedSpawner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QueuedSpawner")
            .field("pending", &self.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::mpsc::channel;
    use std::time::Duration;

    #[test]
    fn test_queued_spawner_order_control() {
        let spawner = QueuedSpawner::new();
        let (tx, rx) = channel();
        for i in 0..3 {
            let tx = tx.clone();
            spawner.spawn(Box::new(move || tx.send(i).unwrap()));
        }
        assert_eq!(spawner.len(), 3);
        assert!(spawner.run_last());
        assert!(spawner.run_next());
        assert_eq!(spawner.run_all(), 1);
        assert!(!spawner.run_next());
        assert_eq!(rx.try_iter().collect::<Vec<_>>(), vec![2, 0, 1]);
    }

    #[test]
    fn test_rayon_spawner_runs_task() {
        let (tx, rx) = channel();
        RayonSpawner.spawn(Box::new(move || tx.send(42).unwrap()));
        assert_eq!(rx.recv_timeout(Duration::from_secs(5)).unwrap(), 42);
    }
}
