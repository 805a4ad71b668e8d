//! # Pass Ledger Testing
//!
//! Testing utilities for the pass ledger.
//!
//! This crate provides:
//! - [`InMemoryLedger`]: every collaborator trait over shared in-memory state
//! - [`StaleEntitlements`]: an entitlement store that keeps serving drained batches
//! - [`FixedClock`]: deterministic time
//!
//! ## Example
//!
//! ```ignore
//! use passledger_testing::{InMemoryLedger, test_clock};
//! use passledger_runtime::{LedgerService, RetryPolicy};
//! use std::sync::Arc;
//!
//! #[tokio::test]
//! async fn entry_consumes_a_pass() {
//!     let ledger = Arc::new(InMemoryLedger::new());
//!     let member = ledger.add_member("Kim", "010-1234-5678");
//!     ledger.add_batch(member.id, "12회권", 12, test_time(0));
//!
//!     let service = LedgerService::with_backend(ledger, Arc::new(test_clock()), RetryPolicy::default());
//!     let outcome = service.enter(member.scan_token.as_str()).await.unwrap();
//!
//!     assert_eq!(outcome.remaining(), Some(11));
//! }
//! ```

use chrono::{DateTime, Duration, Utc};
use passledger_core::environment::Clock;

pub mod ledger_mocks;

/// Mock implementations of environment traits.
pub mod mocks {
    use super::{Clock, DateTime, Utc};

    /// Fixed clock for deterministic tests
    ///
    /// Always returns the same time, making tests reproducible.
    #[derive(Debug, Clone, Copy)]
    pub struct FixedClock {
        time: DateTime<Utc>,
    }

    impl FixedClock {
        /// Create a new fixed clock at the given time
        #[must_use]
        pub const fn new(time: DateTime<Utc>) -> Self {
            Self { time }
        }
    }

    impl Clock for FixedClock {
        fn now(&self) -> DateTime<Utc> {
            self.time
        }
    }

    /// Create a default fixed clock for tests (2025-01-01 00:00:00 UTC)
    #[must_use]
    pub fn test_clock() -> FixedClock {
        FixedClock::new(super::test_time(0))
    }
}

/// The test epoch (2025-01-01 00:00:00 UTC) shifted by `minutes`.
#[must_use]
pub fn test_time(minutes: i64) -> DateTime<Utc> {
    DateTime::<Utc>::UNIX_EPOCH + Duration::seconds(1_735_689_600) + Duration::minutes(minutes)
}

/// Installs a test-writer tracing subscriber once per process.
///
/// Honors `RUST_LOG`; later calls are no-ops.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("passledger=debug")),
        )
        .with_test_writer()
        .try_init();
}

pub use ledger_mocks::{InMemoryLedger, RoomState, StaleEntitlements};
pub use mocks::{FixedClock, test_clock};

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fixed_clock() {
        let clock = test_clock();
        assert_eq!(clock.now(), clock.now());
    }

    #[test]
    fn test_time_starts_at_new_year_2025() {
        assert_eq!(test_time(0).to_rfc3339(), "2025-01-01T00:00:00+00:00");
        assert!(test_time(1) > test_time(0));
    }
}
