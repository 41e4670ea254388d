//! TTL-based duplicate suppression for incoming events.
//!
//! Upstream delivery is at-least-once: the forge may redeliver a webhook and
//! the normalizer may restart mid-batch. An event is a duplicate when the
//! same `(mr_id, kind, payload hash)` was seen within the TTL window.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use crate::ingress::EventKind;
use crate::types::MrId;

/// The identity of a logical event for dedupe purposes.
pub type DedupeKey = (MrId, EventKind, String);

/// A self-pruning TTL set with internal synchronization.
pub struct DedupeSet {
    ttl: Duration,
    seen: Mutex<HashMap<DedupeKey, Instant>>,
}

impl DedupeSet {
    pub fn new(ttl: Duration) -> Self {
        DedupeSet {
            ttl,
            seen: Mutex::new(HashMap::new()),
        }
    }

    /// Records the key and reports whether it was new.
    ///
    /// A key seen longer than the TTL ago counts as new again. Expired
    /// entries are pruned opportunistically on every insert, which bounds the
    /// map to the events of one TTL window.
    pub fn insert_if_new(&self, key: DedupeKey) -> bool {
        let now = Instant::now();
        let mut seen = self.seen.lock().expect("dedupe lock poisoned");
        seen.retain(|_, stamp| now.duration_since(*stamp) < self.ttl);
        match seen.get(&key) {
            Some(_) => false,
            None => {
                seen.insert(key, now);
                true
            }
        }
    }

    #[cfg(test)]
    fn len(&self) -> usize {
        self.seen.lock().expect("dedupe lock poisoned").len()
    }
}
