//! Fixed ring of reusable slots for producer/processor handoff.
//!
//! A [`SlotRing<T>`] owns `N` pre-allocated buffers of identical capacity. Each
//! slot cycles through
//!
//! ```text
//! Empty -> Filling -> Filled -> Processing -> Empty
//! ```
//!
//! The fill side and the process side each walk the ring with their own cursor.
//! A cursor only advances when its owner commits the slot, so buffers are
//! handed to the processor in strict fill order and a slot is never visible
//! to both sides at once.
//!
//! # Overflow
//!
//! The fill side never blocks. If the next fill slot is still Filled or being
//! processed, [`SlotRing::try_acquire_fill`] returns [`AcquireError::Busy`] and
//! the refusal is counted. The caller is expected to drop the batch.
//!
//! # Shutdown
//!
//! [`SlotRing::mark_stream_finished`] is a one-way latch for the current
//! stream: it wakes every waiter and [`SlotRing::wait_for_filled`] returns
//! `false` once no Filled slot remains at the process cursor. Slots that were
//! already Filled when the latch was set are still handed out.
//! [`SlotRing::reset`] starts a new stream and re-arms the latch.
//!
//! # Example
//!
//! ```
//! use flim_pool::SlotRing;
//!
//! let ring = SlotRing::<u32>::new(4, 128);
//!
//! let mut slot = ring.try_acquire_fill().unwrap();
//! slot[..3].copy_from_slice(&[1, 2, 3]);
//! slot.commit(3);
//!
//! assert!(ring.wait_for_filled());
//! let batch = ring.try_acquire_process().unwrap();
//! assert_eq!(&batch[..], &[1, 2, 3]);
//! batch.commit();
//! ```

use parking_lot::{Condvar, Mutex};
use std::ops::{Deref, DerefMut};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, trace};

/// Lifecycle state of a single slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SlotState {
    /// Available to the fill side.
    Empty,
    /// Loaned to the fill side.
    Filling,
    /// Committed by the fill side, waiting for the processor.
    Filled,
    /// Loaned to the process side.
    Processing,
}

/// Reasons a slot could not be loaned.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum AcquireError {
    /// The slot at the cursor is not in the state the caller needs.
    #[error("slot {index} is {state:?}")]
    Busy {
        /// Cursor position that was refused.
        index: usize,
        /// State the slot was found in.
        state: SlotState,
    },
}

struct Slot<T> {
    state: SlotState,
    len: usize,
    /// `None` while the buffer is loaned out.
    data: Option<Vec<T>>,
}

struct RingState<T> {
    slots: Vec<Slot<T>>,
    fill_idx: usize,
    process_idx: usize,
    finished: bool,
    /// Bumped by `reset()` so handles from a previous stream do not move cursors.
    epoch: u64,
}

/// Counters describing ring traffic since construction.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RingStats {
    /// Fill attempts refused because the next slot was not Empty.
    pub overflows: u64,
    /// Slots committed by the fill side.
    pub filled: u64,
    /// Slots returned to Empty by the process side.
    pub processed: u64,
}

/// Circular pool of fixed-capacity buffers shared by one fill side and one
/// process side.
pub struct SlotRing<T> {
    inner: Mutex<RingState<T>>,
    cond: Condvar,
    slot_capacity: usize,
    overflows: AtomicU64,
    filled: AtomicU64,
    processed: AtomicU64,
}

impl<T: Clone + Default + Send + 'static> SlotRing<T> {
    /// Create a ring of `slots` buffers, each holding `slot_capacity` elements.
    ///
    /// # Panics
    /// Panics if `slots` or `slot_capacity` is 0.
    pub fn new(slots: usize, slot_capacity: usize) -> Arc<Self> {
        assert!(slots > 0, "ring must have at least one slot");
        assert!(slot_capacity > 0, "slot capacity must be greater than 0");

        let slots = (0..slots)
            .map(|_| Slot {
                state: SlotState::Empty,
                len: 0,
                data: Some(vec![T::default(); slot_capacity]),
            })
            .collect();

        Arc::new(Self {
            inner: Mutex::new(RingState {
                slots,
                fill_idx: 0,
                process_idx: 0,
                finished: false,
                epoch: 0,
            }),
            cond: Condvar::new(),
            slot_capacity,
            overflows: AtomicU64::new(0),
            filled: AtomicU64::new(0),
            processed: AtomicU64::new(0),
        })
    }
}

impl<T: Send + 'static> SlotRing<T> {
    /// Loan the slot at the fill cursor.
    ///
    /// Never blocks. Returns [`AcquireError::Busy`] when the slot is not Empty,
    /// which means the processor has fallen a full ring behind.
    pub fn try_acquire_fill(self: &Arc<Self>) -> Result<FillSlot<T>, AcquireError> {
        let mut inner = self.inner.lock();
        let index = inner.fill_idx;
        let epoch = inner.epoch;
        let slot = &mut inner.slots[index];

        let data = match (slot.state, slot.data.take()) {
            (SlotState::Empty, Some(data)) => data,
            (state, data) => {
                slot.data = data;
                drop(inner);
                self.overflows.fetch_add(1, Ordering::Relaxed);
                trace!(index, ?state, "fill slot busy");
                return Err(AcquireError::Busy { index, state });
            }
        };
        slot.state = SlotState::Filling;

        Ok(FillSlot {
            ring: Arc::clone(self),
            index,
            epoch,
            data: Some(data),
        })
    }

    /// Block until the slot at the process cursor is Filled.
    ///
    /// Returns `false` once the stream is finished and nothing is left to
    /// drain.
    pub fn wait_for_filled(&self) -> bool {
        let mut inner = self.inner.lock();
        loop {
            let idx = inner.process_idx;
            if inner.slots[idx].state == SlotState::Filled {
                return true;
            }
            if inner.finished {
                return false;
            }
            self.cond.wait(&mut inner);
        }
    }

    /// Loan the slot at the process cursor if it is Filled.
    pub fn try_acquire_process(self: &Arc<Self>) -> Result<ProcessSlot<T>, AcquireError> {
        let mut inner = self.inner.lock();
        let index = inner.process_idx;
        let epoch = inner.epoch;
        let slot = &mut inner.slots[index];

        let data = match (slot.state, slot.data.take()) {
            (SlotState::Filled, Some(data)) => data,
            (state, data) => {
                slot.data = data;
                return Err(AcquireError::Busy { index, state });
            }
        };
        slot.state = SlotState::Processing;

        Ok(ProcessSlot {
            ring: Arc::clone(self),
            index,
            epoch,
            len: slot.len,
            data: Some(data),
        })
    }

    /// Wait for the next Filled slot and loan it.
    ///
    /// Returns `None` when the stream has finished and the ring is drained.
    pub fn acquire_for_process(self: &Arc<Self>) -> Option<ProcessSlot<T>> {
        loop {
            if !self.wait_for_filled() {
                return None;
            }
            if let Ok(slot) = self.try_acquire_process() {
                return Some(slot);
            }
        }
    }

    /// Latch the stream as finished and wake every waiter.
    pub fn mark_stream_finished(&self) {
        let mut inner = self.inner.lock();
        if !inner.finished {
            inner.finished = true;
            debug!("slot ring stream finished");
        }
        self.cond.notify_all();
    }

    /// Whether [`mark_stream_finished`](Self::mark_stream_finished) has been
    /// called since the last reset.
    pub fn is_finished(&self) -> bool {
        self.inner.lock().finished
    }

    /// Force every slot to Empty, rewind both cursors and re-arm the
    /// finished latch.
    ///
    /// Handles still on loan from before the reset return their buffers but
    /// no longer move any cursor.
    pub fn reset(&self) {
        let mut inner = self.inner.lock();
        for slot in &mut inner.slots {
            slot.state = SlotState::Empty;
            slot.len = 0;
        }
        inner.fill_idx = 0;
        inner.process_idx = 0;
        inner.finished = false;
        inner.epoch = inner.epoch.wrapping_add(1);
        self.cond.notify_all();
        debug!(slots = inner.slots.len(), "slot ring reset");
    }

    /// Number of slots in the ring.
    pub fn slot_count(&self) -> usize {
        self.inner.lock().slots.len()
    }

    /// Elements per slot.
    pub fn slot_capacity(&self) -> usize {
        self.slot_capacity
    }

    /// Current state of slot `index`.
    ///
    /// # Panics
    /// Panics if `index >= self.slot_count()`.
    pub fn slot_state(&self, index: usize) -> SlotState {
        self.inner.lock().slots[index].state
    }

    /// Slots currently in the Filled state.
    pub fn filled_count(&self) -> usize {
        self.inner
            .lock()
            .slots
            .iter()
            .filter(|s| s.state == SlotState::Filled)
            .count()
    }

    /// Snapshot of traffic counters.
    pub fn stats(&self) -> RingStats {
        RingStats {
            overflows: self.overflows.load(Ordering::Relaxed),
            filled: self.filled.load(Ordering::Relaxed),
            processed: self.processed.load(Ordering::Relaxed),
        }
    }

    fn finish_fill(&self, index: usize, epoch: u64, data: Vec<T>, len: Option<usize>) {
        let mut inner = self.inner.lock();
        let current = inner.epoch == epoch;
        let n = inner.slots.len();
        let slot = &mut inner.slots[index];
        slot.data = Some(data);
        if !current {
            return;
        }
        match len {
            Some(len) => {
                slot.state = SlotState::Filled;
                slot.len = len;
                inner.fill_idx = (index + 1) % n;
                self.filled.fetch_add(1, Ordering::Relaxed);
                self.cond.notify_all();
            }
            None => {
                slot.state = SlotState::Empty;
                slot.len = 0;
            }
        }
    }

    fn finish_process(&self, index: usize, epoch: u64, data: Vec<T>) {
        let mut inner = self.inner.lock();
        let current = inner.epoch == epoch;
        let n = inner.slots.len();
        let slot = &mut inner.slots[index];
        slot.data = Some(data);
        if !current {
            return;
        }
        slot.state = SlotState::Empty;
        slot.len = 0;
        inner.process_idx = (index + 1) % n;
        self.processed.fetch_add(1, Ordering::Relaxed);
        self.cond.notify_all();
    }
}

/// A slot on loan to the fill side.
///
/// Dereferences to the full slot capacity. Dropping without
/// [`commit`](Self::commit) aborts the fill.
pub struct FillSlot<T: Send + 'static> {
    ring: Arc<SlotRing<T>>,
    index: usize,
    epoch: u64,
    data: Option<Vec<T>>,
}

impl<T: Send + 'static> FillSlot<T> {
    /// Ring position of this slot.
    pub fn index(&self) -> usize {
        self.index
    }

    /// Mark the first `len` elements as valid and hand the slot to the
    /// processor. `len` is clamped to the slot capacity.
    pub fn commit(mut self, len: usize) {
        if let Some(data) = self.data.take() {
            let len = len.min(data.len());
            self.ring.finish_fill(self.index, self.epoch, data, Some(len));
        }
    }

    /// Return the slot to Empty without advancing the fill cursor.
    pub fn abort(mut self) {
        self.release_empty();
    }

    fn release_empty(&mut self) {
        if let Some(data) = self.data.take() {
            self.ring.finish_fill(self.index, self.epoch, data, None);
        }
    }
}

impl<T: Send + 'static> Deref for FillSlot<T> {
    type Target = [T];

    fn deref(&self) -> &[T] {
        self.data.as_deref().unwrap_or(&[])
    }
}

impl<T: Send + 'static> DerefMut for FillSlot<T> {
    fn deref_mut(&mut self) -> &mut [T] {
        self.data.as_deref_mut().unwrap_or(&mut [])
    }
}

impl<T: Send + 'static> Drop for FillSlot<T> {
    fn drop(&mut self) {
        self.release_empty();
    }
}

/// A Filled slot on loan to the process side.
///
/// Dereferences to the committed elements only. Dropping the handle commits
/// it, so a consumer that unwinds cannot wedge the ring.
pub struct ProcessSlot<T: Send + 'static> {
    ring: Arc<SlotRing<T>>,
    index: usize,
    epoch: u64,
    len: usize,
    data: Option<Vec<T>>,
}

impl<T: Send + 'static> ProcessSlot<T> {
    /// Ring position of this slot.
    pub fn index(&self) -> usize {
        self.index
    }

    /// Return the slot to Empty and advance the process cursor.
    pub fn commit(mut self) {
        self.release();
    }

    fn release(&mut self) {
        if let Some(data) = self.data.take() {
            self.ring.finish_process(self.index, self.epoch, data);
        }
    }
}

impl<T: Send + 'static> Deref for ProcessSlot<T> {
    type Target = [T];

    fn deref(&self) -> &[T] {
        match &self.data {
            Some(data) => &data[..self.len],
            None => &[],
        }
    }
}

impl<T: Send + 'static> Drop for ProcessSlot<T> {
    fn drop(&mut self) {
        self.release();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;
    use std::time::Duration;

    #[test]
    fn test_fill_then_process() {
        let ring = SlotRing::<u32>::new(2, 8);

        let mut slot = ring.try_acquire_fill().unwrap();
        assert_eq!(slot.len(), 8);
        slot[0] = 7;
        slot[1] = 9;
        slot.commit(2);

        assert_eq!(ring.slot_state(0), SlotState::Filled);
        let batch = ring.acquire_for_process().unwrap();
        assert_eq!(&batch[..], &[7, 9]);
        batch.commit();

        assert_eq!(ring.slot_state(0), SlotState::Empty);
        assert_eq!(ring.stats().processed, 1);
    }

    #[test]
    fn test_busy_when_full() {
        let ring = SlotRing::<u8>::new(2, 4);
        ring.try_acquire_fill().unwrap().commit(1);
        ring.try_acquire_fill().unwrap().commit(1);

        let err = ring.try_acquire_fill().err().unwrap();
        assert_eq!(
            err,
            AcquireError::Busy {
                index: 0,
                state: SlotState::Filled
            }
        );
        assert_eq!(ring.stats().overflows, 1);

        // Draining one slot frees the fill cursor again.
        ring.acquire_for_process().unwrap().commit();
        assert!(ring.try_acquire_fill().is_ok());
    }

    #[test]
    fn test_abort_does_not_advance() {
        let ring = SlotRing::<u8>::new(3, 4);
        let slot = ring.try_acquire_fill().unwrap();
        assert_eq!(slot.index(), 0);
        slot.abort();

        let slot = ring.try_acquire_fill().unwrap();
        assert_eq!(slot.index(), 0);
        drop(slot);
        assert_eq!(ring.slot_state(0), SlotState::Empty);
        assert_eq!(ring.stats().filled, 0);
    }

    #[test]
    fn test_commit_clamps_length() {
        let ring = SlotRing::<u8>::new(1, 4);
        ring.try_acquire_fill().unwrap().commit(100);
        let batch = ring.try_acquire_process().unwrap();
        assert_eq!(batch.len(), 4);
    }

    #[test]
    fn test_process_requires_filled() {
        let ring = SlotRing::<u8>::new(2, 4);
        let _filling = ring.try_acquire_fill().unwrap();
        assert!(matches!(
            ring.try_acquire_process(),
            Err(AcquireError::Busy {
                state: SlotState::Filling,
                ..
            })
        ));
    }

    #[test]
    fn test_finished_drains_remaining() {
        let ring = SlotRing::<u8>::new(4, 4);
        ring.try_acquire_fill().unwrap().commit(1);
        ring.try_acquire_fill().unwrap().commit(1);
        ring.mark_stream_finished();

        assert!(ring.acquire_for_process().is_some());
        assert!(ring.acquire_for_process().is_some());
        assert!(ring.acquire_for_process().is_none());
        assert!(!ring.wait_for_filled());
    }

    #[test]
    fn test_finish_unblocks_waiter() {
        let ring = SlotRing::<u8>::new(2, 4);
        let waiter = {
            let ring = Arc::clone(&ring);
            thread::spawn(move || ring.wait_for_filled())
        };
        thread::sleep(Duration::from_millis(20));
        ring.mark_stream_finished();
        assert!(!waiter.join().unwrap());
    }

    #[test]
    fn test_reset_rearms_and_ignores_stale_handles() {
        let ring = SlotRing::<u8>::new(2, 4);
        let stale = ring.try_acquire_fill().unwrap();
        ring.mark_stream_finished();
        ring.reset();

        assert!(!ring.is_finished());
        stale.commit(2);
        assert_eq!(ring.slot_state(0), SlotState::Empty);
        assert_eq!(ring.filled_count(), 0);

        let slot = ring.try_acquire_fill().unwrap();
        assert_eq!(slot.index(), 0);
    }

    #[test]
    fn test_ordered_across_threads() {
        let ring = SlotRing::<u64>::new(4, 16);
        let producer = {
            let ring = Arc::clone(&ring);
            thread::spawn(move || {
                let mut next = 0u64;
                while next < 1000 {
                    match ring.try_acquire_fill() {
                        Ok(mut slot) => {
                            slot[0] = next;
                            slot.commit(1);
                            next += 1;
                        }
                        Err(_) => thread::yield_now(),
                    }
                }
                ring.mark_stream_finished();
            })
        };

        let mut seen = Vec::new();
        while let Some(batch) = ring.acquire_for_process() {
            seen.extend_from_slice(&batch);
        }
        producer.join().unwrap();

        assert_eq!(seen, (0..1000).collect::<Vec<_>>());
    }
}
