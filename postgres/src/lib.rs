//! `PostgreSQL` backend for the pass ledger.
//!
//! [`PostgresLedger`] implements every collaborator trait from
//! `passledger-core` over one connection pool:
//!
//! - `members`: identity and QR tokens ([`MemberDirectory`])
//! - `purchase_history`: entitlement batches ([`EntitlementStore`])
//! - `entry_logs`: the consumption log ([`ConsumptionLog`])
//! - `reservations` and `rooms`: the reservation bypass ([`ReservationDesk`])
//!
//! The consumption commit is a single transaction: a conditional decrement
//! (`remaining_count > 0 AND is_active`) followed by the event insert. A
//! decrement that matches no row reports [`CommitOutcome::Exhausted`] and
//! the coordinator retries with fresh reads.
//!
//! # Example
//!
//! ```ignore
//! use passledger_postgres::PostgresLedger;
//! use std::time::Duration;
//!
//! let ledger = PostgresLedger::connect("postgres://localhost/passledger", 10, Duration::from_secs(30)).await?;
//! ledger.migrate().await?;
//! ```
//!
//! [`MemberDirectory`]: passledger_core::store::MemberDirectory
//! [`EntitlementStore`]: passledger_core::store::EntitlementStore
//! [`ConsumptionLog`]: passledger_core::store::ConsumptionLog
//! [`ReservationDesk`]: passledger_core::store::ReservationDesk
//! [`CommitOutcome::Exhausted`]: passledger_core::store::CommitOutcome::Exhausted

#![forbid(unsafe_code)]
#![warn(missing_docs)]

mod ledger;

pub use ledger::PostgresLedger;

use passledger_core::store::{STORE_ERRORS, StoreError};

/// SQLSTATE codes the ledger distinguishes.
mod sqlstate {
    pub const SERIALIZATION_FAILURE: &str = "40001";
    pub const DEADLOCK_DETECTED: &str = "40P01";
    pub const UNIQUE_VIOLATION: &str = "23505";
}

/// Maps a driver error onto the collaborator error vocabulary.
pub(crate) fn store_error(context: &str, err: &sqlx::Error) -> StoreError {
    let mapped = match err {
        sqlx::Error::Database(db_err) => match db_err.code().as_deref() {
            Some(sqlstate::SERIALIZATION_FAILURE | sqlstate::DEADLOCK_DETECTED) => {
                StoreError::ConcurrencyConflict(format!("{context}: {err}"))
            }
            Some(sqlstate::UNIQUE_VIOLATION) => StoreError::Duplicate(format!("{context}: {err}")),
            _ => StoreError::Database(format!("{context}: {err}")),
        },
        sqlx::Error::PoolTimedOut | sqlx::Error::PoolClosed | sqlx::Error::Io(_) => {
            StoreError::Unavailable(format!("{context}: {err}"))
        }
        _ => StoreError::Database(format!("{context}: {err}")),
    };

    metrics::counter!(STORE_ERRORS, "kind" => mapped.kind()).increment(1);
    mapped
}
