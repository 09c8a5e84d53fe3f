//! Commit positions for messages that settle out of order.
//!
//! Lanes settle messages of one partition in any order, but Kafka commits a
//! single position per partition and everything below it counts as consumed.
//! The position committed is therefore the lowest offset still in flight, or
//! one past the highest settled offset when nothing is in flight.

use std::collections::{BTreeSet, HashMap};

/// Where a message was read from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct Position {
    pub(crate) topic: String,
    pub(crate) partition: i32,
    pub(crate) offset: i64,
}

#[derive(Debug, Default)]
struct PartitionOffsets {
    in_flight: BTreeSet<i64>,
    next: Option<i64>,
    committed: Option<i64>,
}

/// In-flight and settled offsets of every partition a subscription reads.
#[derive(Debug, Default)]
pub(crate) struct OffsetTracker {
    partitions: HashMap<(String, i32), PartitionOffsets>,
}

impl OffsetTracker {
    /// Note that `position` was handed to the subscriber.
    pub(crate) fn track(&mut self, position: &Position) {
        self.partitions
            .entry((position.topic.clone(), position.partition))
            .or_default()
            .in_flight
            .insert(position.offset);
    }

    /// Note that `position` was handled.
    ///
    /// Returns the offset to commit for its partition when the committable
    /// position moved forward.
    pub(crate) fn settle(&mut self, position: &Position) -> Option<i64> {
        let partition = self
            .partitions
            .get_mut(&(position.topic.clone(), position.partition))?;
        if !partition.in_flight.remove(&position.offset) {
            return None;
        }

        let after = position.offset + 1;
        partition.next = Some(partition.next.map_or(after, |next| next.max(after)));

        let commit = partition.in_flight.first().copied().or(partition.next)?;
        if partition.committed.is_some_and(|committed| committed >= commit) {
            return None;
        }
        partition.committed = Some(commit);
        Some(commit)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn at(partition: i32, offset: i64) -> Position {
        Position {
            topic: "booking-created".to_string(),
            partition,
            offset,
        }
    }

    #[test]
    fn in_order_settling_commits_each_message() {
        let mut offsets = OffsetTracker::default();
        offsets.track(&at(0, 10));
        offsets.track(&at(0, 11));

        assert_eq!(offsets.settle(&at(0, 10)), Some(11));
        assert_eq!(offsets.settle(&at(0, 11)), Some(12));
    }

    #[test]
    fn later_offset_waits_for_an_earlier_one() {
        let mut offsets = OffsetTracker::default();
        offsets.track(&at(0, 10));
        offsets.track(&at(0, 11));
        offsets.track(&at(0, 12));

        assert_eq!(offsets.settle(&at(0, 12)), None);
        assert_eq!(offsets.settle(&at(0, 11)), None);
        assert_eq!(offsets.settle(&at(0, 10)), Some(13));
    }

    #[test]
    fn partial_progress_stops_at_the_lowest_unsettled_offset() {
        let mut offsets = OffsetTracker::default();
        offsets.track(&at(0, 10));
        offsets.track(&at(0, 11));
        offsets.track(&at(0, 12));

        assert_eq!(offsets.settle(&at(0, 10)), Some(11));
        assert_eq!(offsets.settle(&at(0, 12)), None);
        assert_eq!(offsets.settle(&at(0, 11)), Some(13));
    }

    #[test]
    fn partitions_are_independent() {
        let mut offsets = OffsetTracker::default();
        offsets.track(&at(0, 5));
        offsets.track(&at(1, 7));

        assert_eq!(offsets.settle(&at(1, 7)), Some(8));
        assert_eq!(offsets.settle(&at(0, 5)), Some(6));
    }

    #[test]
    fn untracked_or_repeated_settles_are_ignored() {
        let mut offsets = OffsetTracker::default();
        assert_eq!(offsets.settle(&at(0, 1)), None);

        offsets.track(&at(0, 1));
        assert_eq!(offsets.settle(&at(0, 1)), Some(2));
        assert_eq!(offsets.settle(&at(0, 1)), None);
    }

    #[test]
    fn reread_after_rebalance_does_not_move_backwards() {
        let mut offsets = OffsetTracker::default();
        offsets.track(&at(0, 3));
        assert_eq!(offsets.settle(&at(0, 3)), Some(4));

        offsets.track(&at(0, 2));
        assert_eq!(offsets.settle(&at(0, 2)), None);
    }
}
