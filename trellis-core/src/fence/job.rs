//! Job Fences
//!
//! A [`JobFence`] is a cloneable completion handle. It starts pending and
//! completes exactly once. Waiters block on a condition variable;
//! continuations registered with [`JobFence::on_complete`] run on the thread
//! that completes the fence, or immediately if it already has.
//!
//! Fences combine: [`JobFence::combine`] produces a fence that completes
//! when every distinct input has.

use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::{Condvar, Mutex};
use smallvec::SmallVec;

type Continuation = Box<dyn FnOnce() + Send + 'static>;

#[derive(Default)]
struct FenceState {
    completed: bool,
    continuations: Vec<Continuation>,
}

#[derive(Default)]
struct FenceShared {
    state: Mutex<FenceState>,
    signal: Condvar,
}

/// Handle that reports when a unit of work has finished.
#[derive(Clone)]
pub struct JobFence {
    shared: Arc<FenceShared>,
}

impl JobFence {
    /// Create a fence that has not completed.
    pub fn pending() -> Self {
        Self {
            shared: Arc::new(FenceShared::default()),
        }
    }

    /// Create a fence that is already complete.
    pub fn completed() -> Self {
        let fence = Self::pending();
        fence.shared.state.lock().completed = true;
        fence
    }

    /// Mark the fence complete, wake waiters and run continuations.
    ///
    /// Completing twice is a no-op.
    pub fn complete(&self) {
        let continuations = {
            let mut state = self.shared.state.lock();
            if state.completed {
                return;
            }
            state.completed = true;
            std::mem::take(&mut state.continuations)
        };
        self.shared.signal.notify_all();
        for continuation in continuations {
            continuation();
        }
    }

    /// Check completion without blocking.
    pub fn is_complete(&self) -> bool {
        self.shared.state.lock().completed
    }

    /// Block until the fence completes.
    pub fn wait(&self) {
        let mut state = self.shared.state.lock();
        while !state.completed {
            self.shared.signal.wait(&mut state);
        }
    }

    /// Block until the fence completes or the timeout elapses.
    ///
    /// Returns true if the fence completed.
    pub fn wait_timeout(&self, timeout: Duration) -> bool {
        let mut state = self.shared.state.lock();
        if !state.completed {
            self.shared.signal.wait_while_for(&mut state, |state| !state.completed, timeout);
        }
        state.completed
    }

    /// Run `continuation` once the fence completes.
    pub fn on_complete<F>(&self, continuation: F)
    where
        F: FnOnce() + Send + 'static,
    {
        {
            let mut state = self.shared.state.lock();
            if !state.completed {
                state.continuations.push(Box::new(continuation));
                return;
            }
        }
        continuation();
    }

    /// True if both handles name the same fence.
    pub fn ptr_eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.shared, &other.shared)
    }

    /// Combine fences into one that completes when all of them have.
    ///
    /// Duplicate handles count once. Already completed inputs are dropped;
    /// a single remaining input is returned as is.
    pub fn combine<I>(fences: I) -> Self
    where
        I: IntoIterator<Item = JobFence>,
    {
        let mut distinct: SmallVec<[JobFence; 8]> = SmallVec::new();
        for fence in fences {
            if fence.is_complete() || distinct.iter().any(|seen| seen.ptr_eq(&fence)) {
                continue;
            }
            distinct.push(fence);
        }

        match distinct.len() {
            0 => Self::completed(),
            1 => distinct.remove(0),
            count => {
                let combined = Self::pending();
                let remaining = Arc::new(AtomicUsize::new(count));
                for fence in distinct {
                    let remaining = Arc::clone(&remaining);
                    let combined = combined.clone();
                    fence.on_complete(move || {
                        if remaining.fetch_sub(1, Ordering::AcqRel) == 1 {
                            combined.complete();
                        }
                    });
                }
                combined
            }
        }
    }
}

impl Default for JobFence {
    fn default() -> Self {
        Self::completed()
    }
}

impl fmt::Debug for JobFence {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("JobFence")
            .field("id", &Arc::as_ptr(&self.shared))
            .field("completed", &self.is_complete())
            .finish()
    }
}
