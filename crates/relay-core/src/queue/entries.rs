//! Ordered in-memory entry queue.
//!
//! Pure data structure: no locking, no I/O. The engine wraps it in its lock
//! and persists `to_stored()` after every mutation.

use chrono::{DateTime, Utc};

use super::{EntryStatus, QueueEntry, StoredEntry};
use crate::domain::{QueueCounts, RequestId};

/// Entries in insertion (`seq`) order.
#[derive(Debug)]
pub struct EntryQueue {
    entries: Vec<QueueEntry>,
    next_seq: u64,
}

impl EntryQueue {
    pub fn new() -> Self {
        Self {
            entries: Vec::new(),
            next_seq: 1,
        }
    }

    /// Build from restored entries (any order). Later duplicates of an id
    /// are returned rather than kept.
    pub fn from_restored(mut restored: Vec<QueueEntry>) -> (Self, Vec<QueueEntry>) {
        restored.sort_by_key(|entry| entry.seq);
        let mut queue = Self::new();
        let mut duplicates = Vec::new();
        for entry in restored {
            if queue.contains(entry.id) {
                duplicates.push(entry);
                continue;
            }
            queue.next_seq = queue.next_seq.max(entry.seq.saturating_add(1));
            queue.entries.push(entry);
        }
        if queue.next_seq == u64::MAX {
            queue.renumber();
        }
        (queue, duplicates)
    }

    /// Reserve the sequence number for the next enqueue.
    pub fn allocate_seq(&mut self) -> u64 {
        if self.next_seq == u64::MAX {
            self.renumber();
        }
        let seq = self.next_seq;
        self.next_seq += 1;
        seq
    }

    /// Compact sequence numbers to `1..=len`, keeping the order.
    fn renumber(&mut self) {
        for (seq, entry) in (1..).zip(self.entries.iter_mut()) {
            entry.seq = seq;
        }
        self.next_seq = self.entries.len() as u64 + 1;
    }

    /// Append an entry. Its `seq` must come from `allocate_seq`.
    pub fn push(&mut self, entry: QueueEntry) {
        debug_assert!(self.entries.last().is_none_or(|last| last.seq < entry.seq));
        self.entries.push(entry);
    }

    pub fn contains(&self, id: RequestId) -> bool {
        self.entries.iter().any(|entry| entry.id == id)
    }

    pub fn get(&self, id: RequestId) -> Option<&QueueEntry> {
        self.entries.iter().find(|entry| entry.id == id)
    }

    pub fn get_mut(&mut self, id: RequestId) -> Option<&mut QueueEntry> {
        self.entries.iter_mut().find(|entry| entry.id == id)
    }

    pub fn remove(&mut self, id: RequestId) -> Option<QueueEntry> {
        let index = self.entries.iter().position(|entry| entry.id == id)?;
        Some(self.entries.remove(index))
    }

    /// Lowest-`seq` entry claimable at `now`.
    pub fn next_ready_mut(&mut self, now: DateTime<Utc>) -> Option<&mut QueueEntry> {
        self.entries.iter_mut().find(|entry| entry.is_ready(now))
    }

    /// Earliest future `retry_at` among pending entries; when the next
    /// delayed entry becomes claimable.
    pub fn earliest_retry(&self) -> Option<DateTime<Utc>> {
        self.entries
            .iter()
            .filter(|entry| entry.status == EntryStatus::Pending)
            .filter_map(|entry| entry.retry_at)
            .min()
    }

    /// Counts of the entries currently held (session totals are added by the engine).
    pub fn counts(&self) -> QueueCounts {
        let mut counts = QueueCounts::default();
        for entry in &self.entries {
            match entry.status {
                EntryStatus::Pending => counts.pending += 1,
                EntryStatus::InFlight => {
                    counts.pending += 1;
                    counts.in_flight += 1;
                }
                EntryStatus::Succeeded => counts.succeeded += 1,
                EntryStatus::PermanentlyFailed => counts.permanently_failed += 1,
            }
        }
        counts
    }

    pub fn to_stored(&self) -> Vec<StoredEntry> {
        self.entries.iter().map(QueueEntry::to_stored).collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = &QueueEntry> {
        self.entries.iter()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Drop every entry. Sequence numbers keep increasing.
    pub fn clear(&mut self) -> Vec<QueueEntry> {
        std::mem::take(&mut self.entries)
    }
}

impl Default for EntryQueue {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::RequestError;
    use crate::queue::FailureRecord;
    use crate::testing::Harness;
    use chrono::{Duration, TimeZone};

    fn now() -> DateTime<Utc> {
        Utc.timestamp_opt(1_700_000_000, 0).unwrap()
    }

    fn queue_of(harness: &Harness, labels: &[&str]) -> EntryQueue {
        let mut queue = EntryQueue::new();
        for label in labels {
            let seq = queue.allocate_seq();
            queue.push(harness.entry(seq, harness.request(label)));
        }
        queue
    }

    #[test]
    fn claims_in_insertion_order() {
        let harness = Harness::new();
        let mut queue = queue_of(&harness, &["a", "b", "c"]);

        let first = queue.next_ready_mut(now()).unwrap();
        assert_eq!(first.seq, 1);
        first.start_attempt();

        let second = queue.next_ready_mut(now()).unwrap();
        assert_eq!(second.seq, 2);
    }

    #[test]
    fn delayed_entry_is_skipped_until_due() {
        let harness = Harness::new();
        let mut queue = queue_of(&harness, &["a", "b"]);

        let first = queue.next_ready_mut(now()).unwrap();
        first.start_attempt();
        let due = now() + Duration::seconds(5);
        first.schedule_retry(due, FailureRecord::new(now(), &RequestError::transient("x")));

        assert_eq!(queue.next_ready_mut(now()).unwrap().seq, 2);
        assert_eq!(queue.earliest_retry(), Some(due));
        assert_eq!(queue.next_ready_mut(due).unwrap().seq, 1);
    }

    #[test]
    fn counts_treat_in_flight_as_pending() {
        let harness = Harness::new();
        let mut queue = queue_of(&harness, &["a", "b", "c"]);
        queue.next_ready_mut(now()).unwrap().start_attempt();
        let failed = queue.next_ready_mut(now()).unwrap();
        failed.start_attempt();
        failed.mark_permanently_failed(FailureRecord::new(now(), &RequestError::permanent("no")));

        let counts = queue.counts();
        assert_eq!(counts.pending, 2);
        assert_eq!(counts.in_flight, 1);
        assert_eq!(counts.permanently_failed, 1);
        assert_eq!(counts.total(), 3);
    }

    #[test]
    fn restore_orders_by_seq_and_continues_numbering() {
        let harness = Harness::new();
        let a = harness.entry(4, harness.request("a"));
        let b = harness.entry(2, harness.request("b"));
        let (mut queue, duplicates) = EntryQueue::from_restored(vec![a, b]);

        assert!(duplicates.is_empty());
        let order: Vec<u64> = queue.iter().map(|e| e.seq).collect();
        assert_eq!(order, vec![2, 4]);
        assert_eq!(queue.allocate_seq(), 5);
    }

    #[test]
    fn restore_survives_exhausted_sequence_numbers() {
        let harness = Harness::new();
        let last = harness.entry(u64::MAX, harness.request("last"));
        let first = harness.entry(3, harness.request("first"));
        let (last_id, first_id) = (last.id, first.id);
        let (mut queue, _) = EntryQueue::from_restored(vec![last, first]);

        let order: Vec<_> = queue.iter().map(|e| (e.id, e.seq)).collect();
        assert_eq!(order, vec![(first_id, 1), (last_id, 2)]);

        let seq = queue.allocate_seq();
        assert_eq!(seq, 3);
        queue.push(harness.entry(seq, harness.request("new")));
        assert_eq!(queue.len(), 3);
    }

    #[test]
    fn restore_rejects_duplicate_ids() {
        let harness = Harness::new();
        let a = harness.entry(1, harness.request("a"));
        let mut copy = a.clone();
        copy.seq = 2;
        let (queue, duplicates) = EntryQueue::from_restored(vec![a, copy]);
        assert_eq!(queue.len(), 1);
        assert_eq!(duplicates.len(), 1);
        assert_eq!(duplicates[0].seq, 2);
    }

    #[test]
    fn remove_by_id() {
        let harness = Harness::new();
        let mut queue = queue_of(&harness, &["a", "b"]);
        let id = queue.iter().next().unwrap().id;
        assert!(queue.remove(id).is_some());
        assert!(!queue.contains(id));
        assert_eq!(queue.len(), 1);
    }
}
