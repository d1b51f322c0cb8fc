//! Per-partition offset tracking for at-least-once delivery
//!
//! [`OffsetTracker`] keeps, for every partition, the ledger of offsets that
//! have been handed to the AMQP peer and the subset the peer has settled.
//! From that it derives the commit point: the smallest offset below which
//! everything is settled, extended by any contiguous run of out-of-order
//! settlements above it. Commit values follow Kafka's convention (the
//! committed offset is the next offset to fetch).
//!
//! All mutating calls come from the endpoint reactor; `commits` is called
//! from the consumer worker thread. A single mutex keeps snapshots
//! consistent.

use std::collections::{BTreeSet, HashMap};
use std::sync::Mutex;

use tracing::debug;

use crate::amqp::DeliveryTag;

use super::KafkaRecord;

/// Tracks dispatched and settled offsets per partition
#[derive(Debug, Default)]
pub struct OffsetTracker {
    inner: Mutex<TrackerState>,
}

#[derive(Debug, Default)]
struct TrackerState {
    /// Dispatched, not yet settled deliveries keyed by tag
    in_flight: HashMap<DeliveryTag, (i32, i64)>,

    /// Per-partition settlement ledgers
    partitions: HashMap<i32, PartitionLedger>,
}

#[derive(Debug)]
struct PartitionLedger {
    /// Next offset whose settlement will advance the commit point
    next_to_commit: i64,

    /// Settled offsets above `next_to_commit` (out-of-order settlements)
    settled_above: BTreeSet<i64>,

    /// Whether the commit point advanced since the last `commits` call
    dirty: bool,
}

impl OffsetTracker {
    /// Create an empty tracker
    pub fn new() -> Self {
        Self::default()
    }

    /// Record that the offset of `record` has been dispatched under `tag`
    pub fn track(&self, tag: DeliveryTag, record: &KafkaRecord) {
        let mut state = self.inner.lock().unwrap();

        state
            .in_flight
            .insert(tag, (record.partition, record.offset));

        state
            .partitions
            .entry(record.partition)
            .or_insert_with(|| PartitionLedger {
                next_to_commit: record.offset,
                settled_above: BTreeSet::new(),
                dirty: false,
            });
    }

    /// Mark the delivery under `tag` as settled by the peer.
    ///
    /// Unknown tags are ignored; settlements may arrive after the endpoint
    /// cleared the tracker on tear-down.
    pub fn delivered(&self, tag: DeliveryTag) {
        let mut state = self.inner.lock().unwrap();

        let Some((partition, offset)) = state.in_flight.remove(&tag) else {
            debug!(%tag, "settlement for unknown delivery tag ignored");
            return;
        };

        let Some(ledger) = state.partitions.get_mut(&partition) else {
            return;
        };

        if offset == ledger.next_to_commit {
            ledger.next_to_commit = offset + 1;
            // absorb any contiguous out-of-order settlements above
            while ledger.settled_above.remove(&ledger.next_to_commit) {
                ledger.next_to_commit += 1;
            }
            ledger.dirty = true;
        } else if offset > ledger.next_to_commit {
            ledger.settled_above.insert(offset);
        }
        // offsets below next_to_commit are already covered by a commit point
    }

    /// Offsets safe to commit, keyed by partition.
    ///
    /// Only partitions whose commit point advanced since the previous call
    /// are returned, so the sequence of values per partition is monotone
    /// non-decreasing and idle partitions cost nothing.
    pub fn commits(&self) -> HashMap<i32, i64> {
        let mut state = self.inner.lock().unwrap();
        let mut commits = HashMap::new();

        for (partition, ledger) in state.partitions.iter_mut() {
            if ledger.dirty {
                ledger.dirty = false;
                commits.insert(*partition, ledger.next_to_commit);
            }
        }

        commits
    }

    /// Drop all state (link tear-down); later `delivered` calls are no-ops
    pub fn clear(&self) {
        let mut state = self.inner.lock().unwrap();
        state.in_flight.clear();
        state.partitions.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(partition: i32, offset: i64) -> KafkaRecord {
        KafkaRecord {
            topic: "orders".to_string(),
            partition,
            offset,
            key: None,
            value: Vec::new(),
        }
    }

    fn tag(value: u64) -> DeliveryTag {
        DeliveryTag::new(value)
    }

    #[test]
    fn test_in_order_settlement() {
        let tracker = OffsetTracker::new();
        for (t, o) in [(1, 10), (2, 11), (3, 12)] {
            tracker.track(tag(t), &record(0, o));
        }

        tracker.delivered(tag(1));
        assert_eq!(tracker.commits(), HashMap::from([(0, 11)]));

        tracker.delivered(tag(2));
        tracker.delivered(tag(3));
        assert_eq!(tracker.commits(), HashMap::from([(0, 13)]));
    }

    #[test]
    fn test_out_of_order_settlement() {
        // offsets 5, 6, 7 dispatched; peer settles 6, 5, 7
        let tracker = OffsetTracker::new();
        for (t, o) in [(1, 5), (2, 6), (3, 7)] {
            tracker.track(tag(t), &record(0, o));
        }

        tracker.delivered(tag(2)); // offset 6 alone
        assert!(tracker.commits().is_empty());

        tracker.delivered(tag(1)); // offset 5 closes the gap through 6
        assert_eq!(tracker.commits(), HashMap::from([(0, 7)]));

        tracker.delivered(tag(3)); // offset 7
        assert_eq!(tracker.commits(), HashMap::from([(0, 8)]));
    }

    #[test]
    fn test_commits_empty_without_settlements() {
        let tracker = OffsetTracker::new();
        tracker.track(tag(1), &record(0, 42));
        assert!(tracker.commits().is_empty());
    }

    #[test]
    fn test_commits_are_monotone_and_bounded() {
        let tracker = OffsetTracker::new();
        let mut last_commit = i64::MIN;
        let mut max_delivered = i64::MIN;

        // settle in a scrambled order and observe every intermediate value
        let offsets = [(1u64, 3i64), (2, 1), (3, 0), (4, 2), (5, 4)];
        for (t, o) in offsets {
            tracker.track(tag(t), &record(0, o));
        }
        for (t, o) in [(1u64, 3i64), (3, 0), (5, 4), (2, 1), (4, 2)] {
            tracker.delivered(tag(t));
            max_delivered = max_delivered.max(o);
            if let Some(commit) = tracker.commits().get(&0) {
                assert!(*commit >= last_commit);
                assert!(*commit <= max_delivered + 1);
                last_commit = *commit;
            }
        }
        assert_eq!(last_commit, 5);
    }

    #[test]
    fn test_partitions_are_independent() {
        let tracker = OffsetTracker::new();
        tracker.track(tag(1), &record(0, 100));
        tracker.track(tag(2), &record(1, 200));

        tracker.delivered(tag(2));
        assert_eq!(tracker.commits(), HashMap::from([(1, 201)]));

        tracker.delivered(tag(1));
        assert_eq!(tracker.commits(), HashMap::from([(0, 101)]));
    }

    #[test]
    fn test_delivered_unknown_tag_is_noop() {
        let tracker = OffsetTracker::new();
        tracker.delivered(tag(99));
        assert!(tracker.commits().is_empty());
    }

    #[test]
    fn test_clear_forgets_everything() {
        let tracker = OffsetTracker::new();
        tracker.track(tag(1), &record(0, 10));
        tracker.clear();

        // settlement after clear is tolerated and produces no commit
        tracker.delivered(tag(1));
        assert!(tracker.commits().is_empty());
    }

    #[test]
    fn test_duplicate_settlement_is_ignored() {
        let tracker = OffsetTracker::new();
        tracker.track(tag(1), &record(0, 10));
        tracker.delivered(tag(1));
        tracker.delivered(tag(1));
        assert_eq!(tracker.commits(), HashMap::from([(0, 11)]));
    }
}
