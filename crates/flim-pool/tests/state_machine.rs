//! Exhaustive check of the slot ring protocol.
//!
//! Every sequence of fill/process operations up to a fixed depth is replayed
//! against a fresh ring. Before each acquire the state of the slot under the
//! cursor is recorded and compared with what the ring handed out.

use flim_pool::{FillSlot, ProcessSlot, SlotRing, SlotState};
use std::sync::Arc;

#[derive(Debug, Clone, Copy)]
enum Op {
    AcquireFill,
    CommitFill,
    AbortFill,
    AcquireProcess,
    CommitProcess,
}

const OPS: [Op; 5] = [
    Op::AcquireFill,
    Op::CommitFill,
    Op::AbortFill,
    Op::AcquireProcess,
    Op::CommitProcess,
];

struct Harness {
    ring: Arc<SlotRing<u32>>,
    fill: Option<FillSlot<u32>>,
    process: Option<ProcessSlot<u32>>,
    next_value: u32,
    expected: std::collections::VecDeque<u32>,
}

impl Harness {
    fn new(slots: usize) -> Self {
        Self {
            ring: SlotRing::new(slots, 2),
            fill: None,
            process: None,
            next_value: 0,
            expected: Default::default(),
        }
    }

    fn states(&self) -> Vec<SlotState> {
        (0..self.ring.slot_count())
            .map(|i| self.ring.slot_state(i))
            .collect()
    }

    fn apply(&mut self, op: Op) {
        let before = self.states();
        match op {
            Op::AcquireFill => {
                if self.fill.is_some() {
                    return;
                }
                if let Ok(slot) = self.ring.try_acquire_fill() {
                    assert_eq!(
                        before[slot.index()],
                        SlotState::Empty,
                        "fill handed out a slot that was {:?}",
                        before[slot.index()]
                    );
                    self.fill = Some(slot);
                }
            }
            Op::CommitFill => {
                if let Some(mut slot) = self.fill.take() {
                    slot[0] = self.next_value;
                    self.expected.push_back(self.next_value);
                    self.next_value += 1;
                    slot.commit(1);
                }
            }
            Op::AbortFill => {
                if let Some(slot) = self.fill.take() {
                    slot.abort();
                }
            }
            Op::AcquireProcess => {
                if self.process.is_some() {
                    return;
                }
                if let Ok(slot) = self.ring.try_acquire_process() {
                    assert_eq!(
                        before[slot.index()],
                        SlotState::Filled,
                        "process handed out a slot that was {:?}",
                        before[slot.index()]
                    );
                    let want = self.expected.pop_front();
                    assert_eq!(Some(slot[0]), want, "buffers processed out of order");
                    self.process = Some(slot);
                }
            }
            Op::CommitProcess => {
                if let Some(slot) = self.process.take() {
                    slot.commit();
                }
            }
        }

        let loaned_fill = self
            .states()
            .iter()
            .filter(|s| **s == SlotState::Filling)
            .count();
        let loaned_process = self
            .states()
            .iter()
            .filter(|s| **s == SlotState::Processing)
            .count();
        assert_eq!(loaned_fill, usize::from(self.fill.is_some()));
        assert_eq!(loaned_process, usize::from(self.process.is_some()));
        if let (Some(f), Some(p)) = (&self.fill, &self.process) {
            assert_ne!(f.index(), p.index(), "slot loaned to both sides");
        }
    }
}

fn run_all(slots: usize, depth: u32) {
    let total = OPS.len().pow(depth);
    for mut code in 0..total {
        let mut harness = Harness::new(slots);
        for _ in 0..depth {
            harness.apply(OPS[code % OPS.len()]);
            code /= OPS.len();
        }
    }
}

#[test]
fn exhaustive_single_slot() {
    run_all(1, 7);
}

#[test]
fn exhaustive_two_slots() {
    run_all(2, 7);
}

#[test]
fn exhaustive_eight_slots() {
    run_all(8, 7);
}

#[test]
fn overflow_then_recovery() {
    let ring = SlotRing::<u32>::new(2, 4);
    ring.try_acquire_fill().unwrap().commit(1);
    ring.try_acquire_fill().unwrap().commit(1);

    for _ in 0..10 {
        assert!(ring.try_acquire_fill().is_err());
    }
    assert_eq!(ring.stats().overflows, 10);

    ring.acquire_for_process().unwrap().commit();
    ring.acquire_for_process().unwrap().commit();
    assert!(ring.try_acquire_fill().is_ok());
}
