//! # Pass Ledger Core
//!
//! Core types and pure logic for a membership facility's pass ledger.
//!
//! Members buy *passes* (entitlement batches), each granting a fixed number
//! of uses of one pass type. Every entry is logged as a consumption event.
//! This crate decides, from those two records alone, which batch each entry
//! consumed and what every balance should be.
//!
//! ## Modules
//!
//! - [`types`]: members, batches, events, reservations and their identifiers
//! - [`catalog`]: products on sale
//! - [`allocation`]: the allocation engine (`allocate`)
//! - [`reconcile`]: the reconciliation reporter (`reconcile`)
//! - [`store`]: collaborator traits the runtime drives
//! - [`environment`]: injected dependencies such as the clock
//!
//! ## Example
//!
//! ```
//! use passledger_core::allocation::allocate;
//! use passledger_core::reconcile::reconcile;
//!
//! // Balances for a member with no history.
//! let allocation = allocate(&[], &[]);
//! assert_eq!(allocation.total_remaining_computed, 0);
//! assert!(reconcile(&[], &[]).is_empty());
//! ```

// Re-export commonly used types
pub use chrono::{DateTime, Utc};

pub mod allocation;
pub mod catalog;
pub mod reconcile;
pub mod store;
pub mod types;

/// Environment module - Dependency injection traits
///
/// External dependencies are abstracted behind traits and injected into the
/// runtime, so tests can pin them.
pub mod environment {
    use chrono::{DateTime, Utc};

    /// Clock trait - abstracts time operations for testability
    ///
    /// # Examples
    ///
    /// ```
    /// use passledger_core::environment::{Clock, SystemClock};
    ///
    /// let clock = SystemClock;
    /// let before = clock.now();
    /// assert!(clock.now() >= before);
    /// ```
    pub trait Clock: Send + Sync {
        /// Get the current time
        fn now(&self) -> DateTime<Utc>;
    }

    /// Wall clock used in production.
    #[derive(Debug, Clone, Copy, Default)]
    pub struct SystemClock;

    impl Clock for SystemClock {
        fn now(&self) -> DateTime<Utc> {
            Utc::now()
        }
    }
}
