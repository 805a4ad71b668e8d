//! Allocation engine: reconstructs which batch each entry consumed.
//!
//! Attribution is never stored. It is recomputed from a member's batches and
//! consumption events with a first-fit policy: every event, in chronological
//! order, consumes the oldest batch of the same pass type that was already
//! purchased at entry time and still has unattributed capacity.
//!
//! The engine is a pure function. It never mutates the caller's batches and
//! never fails; events it cannot place are returned as orphans so the display
//! layer can still show an approximate balance alongside a diagnostic.
//!
//! # Ordering
//!
//! Computation runs oldest-first: batches by `(purchase_date, id)` and events
//! by `(entry_time, id)`. Ids are creation-ordered, so ties on the timestamp
//! resolve the same way no matter how the input slices were ordered.
//! The result is presented newest-first: batches by descending purchase date,
//! and each batch's events by descending entry time.
//!
//! # Example
//!
//! ```
//! use passledger_core::allocation::allocate;
//!
//! let result = allocate(&[], &[]);
//! assert!(result.batches.is_empty());
//! assert_eq!(result.total_remaining_computed, 0);
//! ```
//!
//! Inputs must already be filtered to a single member; the engine scans every
//! batch for every event.

use crate::types::{BatchId, ConsumptionEvent, EntitlementBatch};
use serde::Serialize;

/// An event together with the batch balance right after it was attributed.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct AttributedEvent {
    /// The consumption event
    pub event: ConsumptionEvent,
    /// Remaining uses of the batch immediately after this event
    pub snapshot_remaining: u32,
}

/// One batch with the events attributed to it.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct BatchAllocation {
    /// The batch as supplied (live counter untouched)
    pub batch: EntitlementBatch,
    /// Attributed events, newest first
    pub events: Vec<AttributedEvent>,
    /// Number of attributed events; never exceeds `purchase_count`
    pub used_count: u32,
}

impl BatchAllocation {
    /// Remaining uses recomputed from history.
    #[must_use]
    pub const fn computed_remaining(&self) -> u32 {
        self.batch.purchase_count.saturating_sub(self.used_count)
    }
}

/// Output of [`allocate`].
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct AllocationResult {
    /// Batches, newest purchase first
    pub batches: Vec<BatchAllocation>,
    /// Events no batch could absorb, oldest first
    pub orphan_events: Vec<ConsumptionEvent>,
    /// Sum of recomputed remaining uses over active batches
    pub total_remaining_computed: u64,
}

impl AllocationResult {
    /// Allocation for a specific batch.
    #[must_use]
    pub fn batch(&self, batch_id: BatchId) -> Option<&BatchAllocation> {
        self.batches.iter().find(|a| a.batch.id == batch_id)
    }

    /// Number of events attributed to some batch.
    #[must_use]
    pub fn attributed_count(&self) -> usize {
        self.batches.iter().map(|a| a.events.len()).sum()
    }

    /// Whether every event found a batch.
    #[must_use]
    pub fn has_orphans(&self) -> bool {
        !self.orphan_events.is_empty()
    }
}

/// Attributes every event to a batch under the first-fit policy.
///
/// See the [module documentation](self) for the ordering rules.
#[must_use]
pub fn allocate(batches: &[EntitlementBatch], events: &[ConsumptionEvent]) -> AllocationResult {
    let mut batch_order: Vec<usize> = (0..batches.len()).collect();
    batch_order.sort_by_key(|&i| (batches[i].purchase_date, batches[i].id));

    let mut event_order: Vec<usize> = (0..events.len()).collect();
    event_order.sort_by_key(|&i| (events[i].entry_time, events[i].id));

    // Arena indexed by slot in `batch_order`.
    let mut used = vec![0_u32; batches.len()];
    let mut attributed: Vec<Vec<AttributedEvent>> = vec![Vec::new(); batches.len()];
    let mut orphan_events = Vec::new();

    for &e in &event_order {
        let event = &events[e];
        let target = batch_order.iter().enumerate().find_map(|(slot, &b)| {
            let batch = &batches[b];
            let fits = batch.pass_type == event.pass_type
                && batch.purchase_date <= event.entry_time
                && used[slot] < batch.purchase_count;
            fits.then_some(slot)
        });

        match target {
            Some(slot) => {
                used[slot] += 1;
                let batch = &batches[batch_order[slot]];
                attributed[slot].push(AttributedEvent {
                    event: event.clone(),
                    snapshot_remaining: batch.purchase_count - used[slot],
                });
            }
            None => orphan_events.push(event.clone()),
        }
    }

    let mut total_remaining_computed: u64 = 0;
    let mut allocations = Vec::with_capacity(batches.len());

    for (slot, events) in attributed.into_iter().enumerate().rev() {
        let batch = batches[batch_order[slot]].clone();
        let mut events = events;
        events.reverse();

        let allocation = BatchAllocation {
            batch,
            events,
            used_count: used[slot],
        };
        if allocation.batch.active {
            total_remaining_computed += u64::from(allocation.computed_remaining());
        }
        allocations.push(allocation);
    }

    AllocationResult {
        batches: allocations,
        orphan_events,
        total_remaining_computed,
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::types::{EventId, MemberId, PassType};
    use chrono::{DateTime, TimeZone, Utc};

    fn jan(day: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 1, day, 9, 0, 0).unwrap()
    }

    fn batch(id: i64, pass: &str, count: u32, bought: DateTime<Utc>) -> EntitlementBatch {
        EntitlementBatch {
            id: BatchId::new(id),
            member_id: MemberId::new(1),
            pass_type: PassType::new(pass),
            purchase_count: count,
            remaining_count: count,
            purchase_date: bought,
            active: true,
            last_used_date: None,
        }
    }

    fn event(id: i64, pass: &str, at: DateTime<Utc>) -> ConsumptionEvent {
        ConsumptionEvent {
            id: EventId::new(id),
            member_id: MemberId::new(1),
            pass_type: PassType::new(pass),
            entry_time: at,
        }
    }

    #[test]
    fn oldest_batch_is_consumed_first() {
        let batches = vec![batch(1, "10-visit", 1, jan(1)), batch(2, "10-visit", 1, jan(5))];
        let events = vec![
            event(1, "10-visit", jan(10)),
            event(2, "10-visit", jan(12)),
            event(3, "10-visit", jan(15)),
        ];

        let result = allocate(&batches, &events);

        let a = result.batch(BatchId::new(1)).unwrap();
        assert_eq!(a.used_count, 1);
        assert_eq!(a.events[0].event.id, EventId::new(1));
        assert_eq!(a.events[0].snapshot_remaining, 0);

        let b = result.batch(BatchId::new(2)).unwrap();
        assert_eq!(b.used_count, 1);
        assert_eq!(b.events[0].event.id, EventId::new(2));
        assert_eq!(b.events[0].snapshot_remaining, 0);

        assert_eq!(result.orphan_events, vec![event(3, "10-visit", jan(15))]);
        assert_eq!(result.total_remaining_computed, 0);
    }

    #[test]
    fn event_before_purchase_is_orphaned() {
        let batches = vec![batch(1, "12회권", 12, jan(10))];
        let events = vec![event(1, "12회권", jan(5))];

        let result = allocate(&batches, &events);

        assert_eq!(result.orphan_events.len(), 1);
        assert_eq!(result.batches[0].used_count, 0);
        assert_eq!(result.total_remaining_computed, 12);
    }

    #[test]
    fn total_of_maximal_batches_does_not_wrap() {
        let batches = vec![
            batch(1, "무제한", u32::MAX, jan(1)),
            batch(2, "무제한", u32::MAX, jan(2)),
            batch(3, "무제한", u32::MAX, jan(3)),
        ];
        let events = vec![event(1, "무제한", jan(4))];

        let result = allocate(&batches, &events);

        assert_eq!(result.batch(BatchId::new(1)).unwrap().computed_remaining(), u32::MAX - 1);
        assert_eq!(result.total_remaining_computed, 3 * u64::from(u32::MAX) - 1);
    }

    #[test]
    fn event_only_consumes_matching_pass_type() {
        let batches = vec![batch(1, "1회권", 1, jan(1)), batch(2, "12회권", 12, jan(2))];
        let events = vec![event(1, "12회권", jan(3))];

        let result = allocate(&batches, &events);

        assert_eq!(result.batch(BatchId::new(1)).unwrap().used_count, 0);
        assert_eq!(result.batch(BatchId::new(2)).unwrap().used_count, 1);
        assert!(!result.has_orphans());
    }

    #[test]
    fn purchase_at_entry_instant_is_eligible() {
        let batches = vec![batch(1, "1회권", 1, jan(3))];
        let events = vec![event(1, "1회권", jan(3))];

        let result = allocate(&batches, &events);

        assert_eq!(result.batches[0].used_count, 1);
    }

    #[test]
    fn snapshots_count_down_per_batch() {
        let batches = vec![batch(1, "12회권", 12, jan(1))];
        let events = vec![
            event(3, "12회권", jan(4)),
            event(1, "12회권", jan(2)),
            event(2, "12회권", jan(3)),
        ];

        let result = allocate(&batches, &events);
        let snapshots: Vec<(EventId, u32)> = result.batches[0]
            .events
            .iter()
            .map(|a| (a.event.id, a.snapshot_remaining))
            .collect();

        // Newest first for display.
        assert_eq!(
            snapshots,
            vec![
                (EventId::new(3), 9),
                (EventId::new(2), 10),
                (EventId::new(1), 11),
            ]
        );
    }

    #[test]
    fn batches_are_presented_newest_first() {
        let batches = vec![
            batch(2, "1회권", 1, jan(5)),
            batch(1, "1회권", 1, jan(1)),
            batch(3, "1회권", 1, jan(9)),
        ];

        let result = allocate(&batches, &[]);
        let ids: Vec<i64> = result.batches.iter().map(|a| a.batch.id.get()).collect();

        assert_eq!(ids, vec![3, 2, 1]);
    }

    #[test]
    fn purchase_date_ties_break_on_creation_order() {
        let batches = vec![batch(7, "1회권", 1, jan(1)), batch(4, "1회권", 1, jan(1))];
        let events = vec![event(1, "1회권", jan(2))];

        let result = allocate(&batches, &events);

        assert_eq!(result.batch(BatchId::new(4)).unwrap().used_count, 1);
        assert_eq!(result.batch(BatchId::new(7)).unwrap().used_count, 0);
        let ids: Vec<i64> = result.batches.iter().map(|a| a.batch.id.get()).collect();
        assert_eq!(ids, vec![7, 4]);
    }

    #[test]
    fn inactive_batches_absorb_history_but_not_balance() {
        let mut retired = batch(1, "12회권", 12, jan(1));
        retired.active = false;
        let batches = vec![retired, batch(2, "12회권", 12, jan(2))];
        let events = vec![event(1, "12회권", jan(3))];

        let result = allocate(&batches, &events);

        assert_eq!(result.batch(BatchId::new(1)).unwrap().used_count, 1);
        assert_eq!(result.total_remaining_computed, 12);
    }

    #[test]
    fn live_counters_are_ignored_and_untouched() {
        let mut drifted = batch(1, "12회권", 12, jan(1));
        drifted.remaining_count = 3;
        let batches = vec![drifted.clone()];

        let result = allocate(&batches, &[event(1, "12회권", jan(2))]);

        assert_eq!(result.batches[0].computed_remaining(), 11);
        assert_eq!(result.batches[0].batch, drifted);
        assert_eq!(batches[0], drifted);
    }

    #[test]
    fn empty_inputs() {
        let result = allocate(&[], &[event(1, "1회권", jan(1))]);
        assert!(result.batches.is_empty());
        assert_eq!(result.orphan_events.len(), 1);
        assert_eq!(result.attributed_count(), 0);
    }
}
