use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU32, Ordering};

use crate::schedule::WorkUnit;

/// A virtual user and how many iterations it has completed.
#[derive(Debug, PartialEq, Eq)]
pub struct VuSlot {
    pub id: u32,
    pub iterations: u64,
}

impl VuSlot {
    pub fn work_unit(&self) -> WorkUnit {
        WorkUnit {
            vu: self.id,
            iteration: self.iterations,
        }
    }
}

/// Bounded pool of virtual users for an arrival-rate executor.
///
/// `pre_allocated` VUs exist from the start; more are created on demand up to
/// `max`. A VU runs one iteration at a time: it is taken out of the pool for
/// the iteration and handed back afterwards.
pub struct VuPool {
    idle: Mutex<VecDeque<VuSlot>>,
    created: AtomicU32,
    max: u32,
}

impl VuPool {
    pub fn new(pre_allocated: usize, max: usize) -> Self {
        let max = max.max(pre_allocated).min(u32::MAX as usize) as u32;
        let pre = (pre_allocated as u32).min(max);
        let idle = (1..=pre)
            .map(|id| VuSlot { id, iterations: 0 })
            .collect();
        Self {
            idle: Mutex::new(idle),
            created: AtomicU32::new(pre),
            max,
        }
    }

    /// An idle VU, a freshly created one, or `None` when all `max` are busy.
    pub fn acquire(&self) -> Option<VuSlot> {
        if let Some(slot) = self.idle.lock().pop_front() {
            return Some(slot);
        }
        self.created
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| {
                (n < self.max).then(|| n + 1)
            })
            .ok()
            .map(|previous| VuSlot {
                id: previous + 1,
                iterations: 0,
            })
    }

    /// Return a VU after its iteration, counting the iteration.
    pub fn release(&self, mut slot: VuSlot) {
        slot.iterations += 1;
        self.idle.lock().push_back(slot);
    }

    pub fn created(&self) -> u32 {
        self.created.load(Ordering::SeqCst)
    }

    pub fn max(&self) -> u32 {
        self.max
    }
}
