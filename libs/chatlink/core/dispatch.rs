//! Dispatch queue
//!
//! Process-wide list of deferred callbacks. Any thread may post; the
//! consumer drains once per application tick.

use parking_lot::Mutex;
use std::sync::Arc;
use tracing::trace;

type Deferred = Box<dyn FnOnce() + Send>;

/// Thread-safe FIFO of deferred callbacks
#[derive(Clone, Default)]
pub struct DispatchQueue {
    pending: Arc<Mutex<Vec<Deferred>>>,
}

impl DispatchQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a callback
    pub fn post<F>(&self, callback: F)
    where
        F: FnOnce() + Send + 'static,
    {
        self.pending.lock().push(Box::new(callback));
    }

    /// Swap the queue with an empty one and run the snapshot in FIFO order.
    ///
    /// Callbacks posted while draining run on the next call. Returns the
    /// number of callbacks executed.
    pub fn drain_and_run(&self) -> usize {
        let batch = std::mem::take(&mut *self.pending.lock());
        let count = batch.len();
        for callback in batch {
            callback();
        }
        if count > 0 {
            trace!(count, "Dispatched deferred callbacks");
        }
        count
    }

    pub fn len(&self) -> usize {
        self.pending.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.lock().is_empty()
    }
}
