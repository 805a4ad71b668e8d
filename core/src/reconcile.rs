//! Reconciliation: compares live batch counters with recomputed history.
//!
//! Read-only diagnostics for audit and operator surfaces. Nothing here blocks
//! live entry; a non-empty report means the stored counters or the event log
//! need an operator's attention.

use crate::allocation::{AllocationResult, allocate};
use crate::types::{BatchId, ConsumptionEvent, EntitlementBatch};
use serde::Serialize;
use thiserror::Error;

/// A disagreement between live state and history.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Divergence {
    /// A batch's live counter differs from `purchase_count - used_count`.
    Counter {
        /// The batch
        batch_id: BatchId,
        /// `remaining_count` as stored
        live_remaining: u32,
        /// Remaining uses recomputed from events
        computed_remaining: u32,
    },
    /// Events the allocation engine could not attribute to any batch.
    OrphanEvents {
        /// The unattributable events, oldest first
        events: Vec<ConsumptionEvent>,
    },
}

impl Divergence {
    /// Short label used for logs and metrics.
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::Counter { .. } => "counter",
            Self::OrphanEvents { .. } => "orphan_events",
        }
    }
}

/// Operator-facing error wrapping a non-empty reconciliation.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("Inconsistent ledger data: {} divergence(s)", divergences.len())]
pub struct InconsistentData {
    /// Everything the reporter found
    pub divergences: Vec<Divergence>,
}

/// Runs the allocation engine and reports every divergence.
///
/// Counter divergences come first, in the allocation's display order
/// (newest batch first), followed by a single `OrphanEvents` entry when any
/// event was unattributable.
#[must_use]
pub fn reconcile(batches: &[EntitlementBatch], events: &[ConsumptionEvent]) -> Vec<Divergence> {
    divergences_in(&allocate(batches, events))
}

/// Reports divergences for an allocation that was already computed.
#[must_use]
pub fn divergences_in(allocation: &AllocationResult) -> Vec<Divergence> {
    let mut divergences: Vec<Divergence> = allocation
        .batches
        .iter()
        .filter(|a| a.batch.remaining_count != a.computed_remaining())
        .map(|a| Divergence::Counter {
            batch_id: a.batch.id,
            live_remaining: a.batch.remaining_count,
            computed_remaining: a.computed_remaining(),
        })
        .collect();

    if allocation.has_orphans() {
        divergences.push(Divergence::OrphanEvents {
            events: allocation.orphan_events.clone(),
        });
    }

    for divergence in &divergences {
        match divergence {
            Divergence::Counter {
                batch_id,
                live_remaining,
                computed_remaining,
            } => tracing::warn!(
                batch_id = %batch_id,
                live_remaining,
                computed_remaining,
                "Live counter diverges from recomputed history"
            ),
            Divergence::OrphanEvents { events } => tracing::warn!(
                orphan_count = events.len(),
                "Consumption events could not be attributed to any batch"
            ),
        }
    }

    divergences
}

/// Like [`reconcile`], but as a `Result` for callers that treat any
/// divergence as a failure.
///
/// # Errors
///
/// Returns [`InconsistentData`] when at least one divergence was found.
pub fn ensure_consistent(
    batches: &[EntitlementBatch],
    events: &[ConsumptionEvent],
) -> Result<(), InconsistentData> {
    let divergences = reconcile(batches, events);
    if divergences.is_empty() {
        Ok(())
    } else {
        Err(InconsistentData { divergences })
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::types::{EventId, MemberId, PassType};
    use chrono::{DateTime, TimeZone, Utc};

    fn jan(day: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 1, day, 18, 30, 0).unwrap()
    }

    fn batch(id: i64, count: u32, remaining: u32, bought: DateTime<Utc>) -> EntitlementBatch {
        EntitlementBatch {
            id: BatchId::new(id),
            member_id: MemberId::new(9),
            pass_type: PassType::new("12회권"),
            purchase_count: count,
            remaining_count: remaining,
            purchase_date: bought,
            active: true,
            last_used_date: None,
        }
    }

    fn entry(id: i64, at: DateTime<Utc>) -> ConsumptionEvent {
        ConsumptionEvent {
            id: EventId::new(id),
            member_id: MemberId::new(9),
            pass_type: PassType::new("12회권"),
            entry_time: at,
        }
    }

    #[test]
    fn consistent_ledger_reports_nothing() {
        let batches = vec![batch(1, 12, 10, jan(1))];
        let events = vec![entry(1, jan(2)), entry(2, jan(3))];

        assert!(reconcile(&batches, &events).is_empty());
        assert!(ensure_consistent(&batches, &events).is_ok());
    }

    #[test]
    fn corrupted_counter_is_reported_once() {
        let batches = vec![batch(1, 12, 10, jan(1)), batch(2, 12, 12, jan(4))];
        let events = vec![entry(1, jan(2)), entry(2, jan(3))];
        let mut corrupted = batches;
        corrupted[0].remaining_count = 11;

        let divergences = reconcile(&corrupted, &events);

        assert_eq!(
            divergences,
            vec![Divergence::Counter {
                batch_id: BatchId::new(1),
                live_remaining: 11,
                computed_remaining: 10,
            }]
        );
    }

    #[test]
    fn orphans_are_reported_as_one_entry() {
        let batches = vec![batch(1, 1, 0, jan(5))];
        let events = vec![entry(1, jan(2)), entry(2, jan(6))];

        let divergences = reconcile(&batches, &events);

        assert_eq!(divergences.len(), 1);
        assert_eq!(divergences[0].kind(), "orphan_events");
        match &divergences[0] {
            Divergence::OrphanEvents { events } => assert_eq!(events[0].id, EventId::new(1)),
            Divergence::Counter { .. } => unreachable!("counter matches history"),
        }
    }

    #[test]
    fn ensure_consistent_wraps_divergences() {
        let batches = vec![batch(1, 12, 3, jan(1))];

        let error = ensure_consistent(&batches, &[]).unwrap_err();

        assert_eq!(error.divergences.len(), 1);
        assert_eq!(format!("{error}"), "Inconsistent ledger data: 1 divergence(s)");
    }

    #[test]
    fn divergence_serializes_with_kind_tag() {
        let divergence = Divergence::Counter {
            batch_id: BatchId::new(3),
            live_remaining: 5,
            computed_remaining: 4,
        };

        let json = serde_json::to_value(&divergence).unwrap();

        assert_eq!(json["kind"], "counter");
        assert_eq!(json["batch_id"], 3);
    }
}
