//! Deferred command queue.
//!
//! External collaborators never touch the GPU directly; they enqueue
//! zero-argument thunks here, and the render thread drains the queue at one
//! fixed point per frame. Submission is multi-producer and never blocks
//! beyond the push itself; execution happens only on the render thread.

use std::collections::VecDeque;

use parking_lot::Mutex;
use tracing::trace;

/// A queued GPU command: runs once, on the render thread.
pub type Thunk = Box<dyn FnOnce() + Send + 'static>;

/// FIFO queue of deferred GPU commands.
#[derive(Default)]
pub struct DeferredCommandQueue {
    inner: Mutex<VecDeque<Thunk>>,
}

impl DeferredCommandQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a thunk to the queue.
    ///
    /// Infallible and non-blocking: the lock is held only for the push.
    /// Callable from any thread, any time before the next drain.
    pub fn submit(&self, thunk: impl FnOnce() + Send + 'static) {
        self.inner.lock().push_back(Box::new(thunk));
    }

    /// Drains the queue, running every thunk exactly once in FIFO order.
    ///
    /// The queue contents are swapped out under the lock and executed
    /// outside it, so thunks may themselves call [`submit`](Self::submit);
    /// anything enqueued during execution waits for the next drain.
    ///
    /// Returns the number of thunks executed.
    pub fn execute(&self) -> usize {
        let drained: VecDeque<Thunk> = std::mem::take(&mut *self.inner.lock());
        let count = drained.len();
        for thunk in drained {
            thunk();
        }
        if count > 0 {
            trace!("Executed {} deferred commands", count);
        }
        count
    }

    /// Number of thunks currently waiting.
    pub fn len(&self) -> usize {
        self.inner.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.lock().is_empty()
    }
}
