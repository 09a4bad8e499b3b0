//! Per-slot resource release queues.
//!
//! Destroying a GPU resource is only safe once the fence of the frame slot
//! that last used it has signaled. [`ReleaseRing`] holds one FIFO of destroy
//! thunks per frame slot; a thunk enqueued while slot `i` is current runs
//! when slot `i` comes around again, exactly one full cycle later, after
//! the slot's fence wait has proven all prior GPU work retired.

use std::collections::VecDeque;

use parking_lot::Mutex;
use tracing::{debug, trace};

use crate::queue::Thunk;

/// Ring of per-frame-slot destroy queues.
pub struct ReleaseRing {
    slots: Vec<Mutex<VecDeque<Thunk>>>,
}

impl ReleaseRing {
    /// Creates a ring with one queue per frame slot.
    pub fn new(slot_count: usize) -> Self {
        Self {
            slots: (0..slot_count).map(|_| Mutex::new(VecDeque::new())).collect(),
        }
    }

    /// Number of frame slots in the ring.
    #[inline]
    pub fn slot_count(&self) -> usize {
        self.slots.len()
    }

    /// Schedules a destroy thunk on `slot`'s queue.
    ///
    /// The thunk runs when `slot` is next drained, never earlier. Callable
    /// from any thread.
    ///
    /// # Panics
    ///
    /// Panics if `slot` is out of range.
    pub fn destroy_later(&self, slot: usize, thunk: impl FnOnce() + Send + 'static) {
        self.slots[slot].lock().push_back(Box::new(thunk));
        trace!("Deferred destroy scheduled on slot {}", slot);
    }

    /// Runs and clears `slot`'s queue in FIFO order.
    ///
    /// The caller must have waited on the slot's fence first.
    ///
    /// Returns the number of destroys executed.
    pub fn drain(&self, slot: usize) -> usize {
        let drained: VecDeque<Thunk> = std::mem::take(&mut *self.slots[slot].lock());
        let count = drained.len();
        for thunk in drained {
            thunk();
        }
        if count > 0 {
            debug!("Released {} deferred resources on slot {}", count, slot);
        }
        count
    }

    /// Drains every slot. Shutdown path only, after a device-wide idle
    /// wait.
    pub fn drain_all(&self) -> usize {
        (0..self.slots.len()).map(|slot| self.drain(slot)).sum()
    }

    /// Total thunks currently pending across all slots.
    pub fn pending(&self) -> usize {
        self.slots.iter().map(|slot| slot.lock().len()).sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[test]
    fn test_drain_runs_only_its_slot() {
        let ring = ReleaseRing::new(3);
        let counter = Arc::new(AtomicUsize::new(0));

        for slot in 0..3 {
            let c = counter.clone();
            ring.destroy_later(slot, move || {
                c.fetch_add(1 << slot, Ordering::SeqCst);
            });
        }

        assert_eq!(ring.drain(1), 1);
        assert_eq!(counter.load(Ordering::SeqCst), 0b010);
        assert_eq!(ring.pending(), 2);

        assert_eq!(ring.drain(1), 0);
        assert_eq!(counter.load(Ordering::SeqCst), 0b010);
    }

    #[test]
    fn test_drain_preserves_fifo_order() {
        let ring = ReleaseRing::new(2);
        let log = Arc::new(Mutex::new(Vec::new()));

        for i in 0..4 {
            let log = log.clone();
            ring.destroy_later(0, move || log.lock().push(i));
        }

        assert_eq!(ring.drain(0), 4);
        assert_eq!(*log.lock(), vec![0, 1, 2, 3]);
    }

    #[test]
    fn test_drain_all_empties_every_slot() {
        let ring = ReleaseRing::new(4);
        let counter = Arc::new(AtomicUsize::new(0));

        for slot in 0..4 {
            for _ in 0..2 {
                let c = counter.clone();
                ring.destroy_later(slot, move || {
                    c.fetch_add(1, Ordering::SeqCst);
                });
            }
        }

        assert_eq!(ring.drain_all(), 8);
        assert_eq!(counter.load(Ordering::SeqCst), 8);
        assert_eq!(ring.pending(), 0);
    }
}
