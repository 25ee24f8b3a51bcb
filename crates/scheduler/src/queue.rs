//! Eligible queue: priority-first, FIFO within a priority band.
//!
//! Admissions land in an `incoming` lane and only join the `ready` lane when
//! the next slice begins, so a boundary that becomes eligible mid-slice is
//! never dequeued by that slice.

use std::cmp::Reverse;
use std::collections::{BTreeMap, HashMap};

use crate::types::{BoundaryId, Priority};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
struct QueueKey {
    rank: Reverse<Priority>,
    seq: u64,
}

impl QueueKey {
    fn new(priority: Priority, seq: u64) -> Self {
        Self {
            rank: Reverse(priority),
            seq,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Lane {
    Ready,
    Incoming,
}

#[derive(Debug, Default)]
pub struct EligibleQueue {
    ready: BTreeMap<QueueKey, BoundaryId>,
    incoming: BTreeMap<QueueKey, BoundaryId>,
    index: HashMap<BoundaryId, (QueueKey, Lane)>,
}

impl EligibleQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Admit a boundary. `seq` is its registration order; lower runs first
    /// within a band. Re-pushing an already queued id is a no-op.
    pub fn push(&mut self, id: BoundaryId, priority: Priority, seq: u64) {
        if self.index.contains_key(&id) {
            return;
        }
        let key = QueueKey::new(priority, seq);
        self.incoming.insert(key, id.clone());
        self.index.insert(id, (key, Lane::Incoming));
    }

    /// Freeze the set of dequeueable boundaries for a new slice.
    pub fn begin_slice(&mut self) {
        for (key, id) in std::mem::take(&mut self.incoming) {
            if let Some(entry) = self.index.get_mut(&id) {
                entry.1 = Lane::Ready;
            }
            self.ready.insert(key, id);
        }
    }

    /// Highest-priority, earliest boundary from the ready lane.
    pub fn pop(&mut self) -> Option<BoundaryId> {
        let (_, id) = self.ready.pop_first()?;
        self.index.remove(&id);
        Some(id)
    }

    pub fn remove(&mut self, id: &str) -> bool {
        let Some((key, lane)) = self.index.remove(id) else {
            return false;
        };
        match lane {
            Lane::Ready => self.ready.remove(&key),
            Lane::Incoming => self.incoming.remove(&key),
        };
        true
    }

    /// Move a queued boundary to a new band, keeping its FIFO position.
    pub fn reprioritize(&mut self, id: &str, priority: Priority) -> bool {
        let Some((key, lane)) = self.index.get(id).copied() else {
            return false;
        };
        let new_key = QueueKey::new(priority, key.seq);
        let map = match lane {
            Lane::Ready => &mut self.ready,
            Lane::Incoming => &mut self.incoming,
        };
        let Some(boundary) = map.remove(&key) else {
            return false;
        };
        map.insert(new_key, boundary.clone());
        self.index.insert(boundary, (new_key, lane));
        true
    }

    pub fn contains(&self, id: &str) -> bool {
        self.index.contains_key(id)
    }

    /// Both lanes.
    pub fn len(&self) -> usize {
        self.index.len()
    }

    pub fn is_empty(&self) -> bool {
        self.index.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn id(s: &str) -> BoundaryId {
        BoundaryId::from(s)
    }

    fn drain(q: &mut EligibleQueue) -> Vec<String> {
        q.begin_slice();
        std::iter::from_fn(|| q.pop()).map(|b| b.to_string()).collect()
    }

    #[test]
    fn higher_priority_first_even_if_later() {
        let mut q = EligibleQueue::new();
        q.push(id("b"), Priority::Normal, 1);
        q.push(id("a"), Priority::High, 2);
        assert_eq!(drain(&mut q), vec!["a", "b"]);
    }

    #[test]
    fn fifo_within_band() {
        let mut q = EligibleQueue::new();
        q.push(id("x"), Priority::Normal, 1);
        q.push(id("y"), Priority::Normal, 2);
        q.push(id("z"), Priority::Normal, 3);
        assert_eq!(drain(&mut q), vec!["x", "y", "z"]);
    }

    #[test]
    fn incoming_invisible_until_next_slice() {
        let mut q = EligibleQueue::new();
        q.push(id("first"), Priority::Low, 1);
        q.begin_slice();
        q.push(id("late"), Priority::Critical, 2);

        assert_eq!(q.pop(), Some(id("first")));
        assert_eq!(q.pop(), None);
        assert_eq!(q.len(), 1);

        q.begin_slice();
        assert_eq!(q.pop(), Some(id("late")));
        assert!(q.is_empty());
    }

    #[test]
    fn remove_from_either_lane() {
        let mut q = EligibleQueue::new();
        q.push(id("a"), Priority::Normal, 1);
        q.begin_slice();
        q.push(id("b"), Priority::Normal, 2);
        assert!(q.remove("a"));
        assert!(q.remove("b"));
        assert!(!q.remove("b"));
        assert!(q.is_empty());
    }

    #[test]
    fn reprioritize_keeps_seq() {
        let mut q = EligibleQueue::new();
        q.push(id("a"), Priority::Low, 1);
        q.push(id("b"), Priority::Normal, 2);
        q.push(id("c"), Priority::Normal, 3);
        assert!(q.reprioritize("a", Priority::Normal));
        assert_eq!(drain(&mut q), vec!["a", "b", "c"]);
        assert!(!q.reprioritize("missing", Priority::High));
    }

    #[test]
    fn duplicate_push_ignored() {
        let mut q = EligibleQueue::new();
        q.push(id("a"), Priority::Normal, 1);
        q.push(id("a"), Priority::High, 5);
        assert_eq!(q.len(), 1);
        assert!(q.contains("a"));
        assert_eq!(drain(&mut q), vec!["a"]);
    }
}
