use std::collections::{HashSet, VecDeque};

use parking_lot::Mutex;

struct Recent {
    ids: HashSet<String>,
    /// Insertion order, oldest first.
    order: VecDeque<String>,
}

/// Bounded FIFO memory of recently seen inbound notification ids.
///
/// Collapses provider retries that arrive while the id is still remembered.
/// Process-local and best-effort: double-booking is prevented elsewhere.
pub struct DedupGate {
    capacity: usize,
    recent: Mutex<Recent>,
}

impl DedupGate {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            capacity,
            recent: Mutex::new(Recent {
                ids: HashSet::with_capacity(capacity),
                order: VecDeque::with_capacity(capacity),
            }),
        }
    }

    /// `true` if `id` was already seen. Otherwise remembers it (evicting the
    /// oldest id at capacity) and returns `false`.
    pub fn seen(&self, id: &str) -> bool {
        let mut recent = self.recent.lock();
        if recent.ids.contains(id) {
            drop(recent);
            metrics::counter!(crate::observability::DEDUP_HITS_TOTAL).increment(1);
            tracing::debug!(notification_id = id, "duplicate delivery suppressed");
            return true;
        }
        if recent.order.len() >= self.capacity
            && let Some(oldest) = recent.order.pop_front()
        {
            recent.ids.remove(&oldest);
        }
        recent.ids.insert(id.to_string());
        recent.order.push_back(id.to_string());
        false
    }

    pub fn len(&self) -> usize {
        self.recent.lock().order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

impl Default for DedupGate {
    fn default() -> Self {
        Self::new(crate::limits::DEFAULT_DEDUP_CAPACITY)
    }
}
