//! Metric names and descriptions.
//!
//! The ledger records through the `metrics` facade; whichever recorder the
//! host process installs (Prometheus, statsd, none) receives them.
//!
//! - `ledger.consume.total{outcome}`: entries by outcome
//! - `ledger.consume.conflicts`: commits that found their batch drained
//! - `ledger.consume.attempts`: attempts per entry
//! - `ledger.reconcile.divergences{kind}`: divergences found by statements
//! - `ledger.store.errors{kind}`: backend failures, recorded by store adapters

use metrics::{Unit, describe_counter, describe_histogram};

/// Entries by outcome label.
pub const CONSUME_TOTAL: &str = "ledger.consume.total";

/// Commits that lost the race for a batch's last use.
pub const CONSUME_CONFLICTS: &str = "ledger.consume.conflicts";

/// Attempts taken per entry, including retries.
pub const CONSUME_ATTEMPTS: &str = "ledger.consume.attempts";

/// Divergences surfaced while building statements.
pub const RECONCILE_DIVERGENCES: &str = "ledger.reconcile.divergences";

/// Backend failures by kind.
pub use passledger_core::store::STORE_ERRORS;

/// Registers descriptions for every ledger metric with the installed recorder.
pub fn describe_metrics() {
    describe_counter!(CONSUME_TOTAL, Unit::Count, "Entries processed, by outcome");
    describe_counter!(
        CONSUME_CONFLICTS,
        Unit::Count,
        "Consumption commits that found the batch already drained"
    );
    describe_histogram!(CONSUME_ATTEMPTS, Unit::Count, "Attempts per entry");
    describe_counter!(
        RECONCILE_DIVERGENCES,
        Unit::Count,
        "Live-counter or orphan-event divergences, by kind"
    );
    describe_counter!(STORE_ERRORS, Unit::Count, "Store failures, by kind");
}
