//! Pending identifiers awaiting one bulk fetch.

use std::collections::HashSet;
use std::hash::Hash;
use std::sync::Arc;

use tokio::sync::Notify;

/// Identifiers accumulated for one upcoming bulk fetch under one parameter.
///
/// Append-only while open. Once detached from the fetcher's bookkeeping it is
/// handed whole to the dispatch task and never grows again.
#[derive(Debug)]
pub struct Batch<K> {
    seq: u64,
    ids: Vec<K>,
    seen: HashSet<K>,
    /// Wakes the dispatch task early when the batch fills.
    trigger: Arc<Notify>,
}

impl<K> Batch<K>
where
    K: Eq + Hash + Clone,
{
    /// Open a batch holding its first identifier.
    pub fn open(seq: u64, first: K) -> Self {
        let mut batch = Self {
            seq,
            ids: Vec::new(),
            seen: HashSet::new(),
            trigger: Arc::new(Notify::new()),
        };
        batch.push(first);
        batch
    }

    /// Append an identifier; a repeat is ignored.
    ///
    /// Returns true if the identifier was new to this batch.
    pub fn push(&mut self, id: K) -> bool {
        if !self.seen.insert(id.clone()) {
            return false;
        }
        self.ids.push(id);
        true
    }

    /// True if `id` is part of this batch.
    pub fn contains(&self, id: &K) -> bool {
        self.seen.contains(id)
    }

    /// Sequence number unique within the owning fetcher.
    pub fn seq(&self) -> u64 {
        self.seq
    }

    /// Identifiers in arrival order.
    pub fn ids(&self) -> &[K] {
        &self.ids
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    /// True once the batch holds `max` identifiers.
    pub fn is_full(&self, max: usize) -> bool {
        self.ids.len() >= max
    }

    /// Handle used to dispatch this batch ahead of its delay window.
    pub fn trigger(&self) -> Arc<Notify> {
        Arc::clone(&self.trigger)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_push_dedupes_and_keeps_order() {
        let mut batch = Batch::open(1, "b");
        assert!(batch.push("a"));
        assert!(!batch.push("b"));
        assert!(batch.push("c"));

        assert_eq!(batch.ids(), &["b", "a", "c"]);
        assert!(batch.contains(&"a"));
        assert!(!batch.contains(&"z"));
        assert_eq!(batch.seq(), 1);
    }

    #[test]
    fn test_is_full() {
        let mut batch = Batch::open(0, 1u32);
        assert!(!batch.is_full(2));
        batch.push(2);
        assert!(batch.is_full(2));
        assert_eq!(batch.len(), 2);
        assert!(!batch.is_empty());
    }
}
