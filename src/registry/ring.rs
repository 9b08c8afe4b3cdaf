//! Materialized weighted ring for round-robin selection.
//!
//! Each endpoint appears `weight` times; a shared atomic cursor walks the
//! sequence. The ring is published by atomic replacement so selectors never
//! see a partially-built ring, and the cursor wraps through overflow without
//! ever producing a negative index.

use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;

use arc_swap::ArcSwap;

use super::endpoint::Endpoint;

pub struct WeightedRing {
    slots: ArcSwap<Vec<Endpoint>>,
    cursor: AtomicI64,
}

impl WeightedRing {
    pub fn new() -> Self {
        Self {
            slots: ArcSwap::from_pointee(Vec::new()),
            cursor: AtomicI64::new(0),
        }
    }

    /// Publish a freshly expanded slot sequence and reset the cursor.
    pub fn rebuild(&self, expanded: Vec<Endpoint>) {
        self.slots.store(Arc::new(expanded));
        self.cursor.store(0, Ordering::Relaxed);
    }

    /// Current slot sequence.
    pub fn snapshot(&self) -> Arc<Vec<Endpoint>> {
        self.slots.load_full()
    }

    pub fn len(&self) -> usize {
        self.slots.load().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Claim the next raw cursor value. Callers reduce it with
    /// [`slot_index`] against their pool size.
    pub fn advance(&self) -> i64 {
        self.cursor.fetch_add(1, Ordering::Relaxed)
    }
}

impl Default for WeightedRing {
    fn default() -> Self {
        Self::new()
    }
}

/// Non-negative modulo, so cursor wraparound stays a valid index.
pub fn slot_index(raw: i64, len: usize) -> usize {
    debug_assert!(len > 0);
    raw.rem_euclid(len as i64) as usize
}
