//! Task Graph
//!
//! Dependency-driven submission on a rayon thread pool. A task is spawned
//! only when every fence it depends on has completed, so worker threads never
//! block on each other.

use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;

use rayon::{ThreadPool, ThreadPoolBuilder};
use tracing::error;

use crate::error::ScheduleError;

use super::job::JobFence;

#[derive(Debug, Default)]
struct TaskCounters {
    submitted: AtomicU64,
    panicked: AtomicUsize,
}

/// Submits closures gated on completion fences.
#[derive(Clone)]
pub struct TaskGraph {
    pool: Arc<ThreadPool>,
    counters: Arc<TaskCounters>,
}

impl TaskGraph {
    /// Create a task graph with its own worker pool.
    ///
    /// `threads == 0` lets rayon pick the thread count.
    pub fn new(threads: usize) -> Result<Self, ScheduleError> {
        let pool = ThreadPoolBuilder::new()
            .num_threads(threads)
            .thread_name(|index| format!("trellis-worker-{index}"))
            .build()
            .map_err(|err| ScheduleError::ThreadPool(err.to_string()))?;
        Ok(Self {
            pool: Arc::new(pool),
            counters: Arc::default(),
        })
    }

    /// Number of worker threads.
    pub fn thread_count(&self) -> usize {
        self.pool.current_num_threads()
    }

    /// Tasks submitted so far.
    pub fn submitted(&self) -> u64 {
        self.counters.submitted.load(Ordering::Relaxed)
    }

    /// Tasks whose work panicked.
    pub fn panicked(&self) -> usize {
        self.counters.panicked.load(Ordering::Relaxed)
    }

    /// Run `op` inside the worker pool, so rayon parallel iterators use it.
    pub fn install<R, F>(&self, op: F) -> R
    where
        R: Send,
        F: FnOnce() -> R + Send,
    {
        self.pool.install(op)
    }

    /// Schedule `work` to run after every fence in `dependencies`.
    ///
    /// The returned fence completes when `work` returns, or after it
    /// panics. A panic is logged and counted, never propagated.
    pub fn schedule<F>(&self, dependencies: &[JobFence], work: F) -> JobFence
    where
        F: FnOnce() + Send + 'static,
    {
        self.counters.submitted.fetch_add(1, Ordering::Relaxed);

        let done = JobFence::pending();
        let gate = JobFence::combine(dependencies.iter().cloned());

        let pool = Arc::clone(&self.pool);
        let counters = Arc::clone(&self.counters);
        let finished = done.clone();
        gate.on_complete(move || {
            pool.spawn(move || {
                if let Err(payload) = panic::catch_unwind(AssertUnwindSafe(work)) {
                    counters.panicked.fetch_add(1, Ordering::Relaxed);
                    error!(reason = panic_message(payload.as_ref()), "task panicked");
                }
                finished.complete();
            });
        });

        done
    }
}

impl std::fmt::Debug for TaskGraph {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TaskGraph")
            .field("threads", &self.thread_count())
            .field("submitted", &self.submitted())
            .field("panicked", &self.panicked())
            .finish()
    }
}

pub(crate) fn panic_message(payload: &(dyn std::any::Any + Send)) -> &str {
    if let Some(message) = payload.downcast_ref::<&'static str>() {
        message
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message
    } else {
        "non-string panic payload"
    }
}
