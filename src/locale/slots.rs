//! Keyed lock table serializing read-then-write sequences per logical slot.
//! Unrelated keys never contend; idle slots are dropped from the table.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::lock_api::ArcMutexGuard;
use parking_lot::{Mutex, RawMutex};

#[derive(Default)]
pub struct SlotLocks {
    slots: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

/// Held lock on one slot; released on drop.
pub struct SlotGuard<'a> {
    locks: &'a SlotLocks,
    key: String,
    guard: Option<ArcMutexGuard<RawMutex, ()>>,
}

impl SlotLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Block until the slot `key` is free, then hold it.
    pub fn lock(&self, key: impl Into<String>) -> SlotGuard<'_> {
        let key = key.into();
        let slot = {
            let mut slots = self.slots.lock();
            Arc::clone(slots.entry(key.clone()).or_default())
        };
        let guard = slot.lock_arc();
        SlotGuard {
            locks: self,
            key,
            guard: Some(guard),
        }
    }

    #[cfg(test)]
    fn active(&self) -> usize {
        self.slots.lock().len()
    }
}

impl Drop for SlotGuard<'_> {
    fn drop(&mut self) {
        let mut slots = self.locks.slots.lock();
        self.guard.take();
        let idle = slots
            .get(&self.key)
            .is_some_and(|slot| Arc::strong_count(slot) == 1);
        if idle {
            slots.remove(&self.key);
        }
    }
}
