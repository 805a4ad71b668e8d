//! Collaborator traits for the stores the ledger reads and writes.
//!
//! The ledger owns no persistence. It talks to four collaborators:
//!
//! - [`MemberDirectory`]: members keyed by scan token
//! - [`EntitlementStore`]: purchased batches, including the single atomic
//!   consumption commit
//! - [`ConsumptionLog`]: the append-only entry history
//! - [`ReservationDesk`]: pending room bookings
//!
//! # Implementations
//!
//! - `PostgresLedger` (in `passledger-postgres`): production implementation
//! - `InMemoryLedger` (in `passledger-testing`): fast, deterministic testing
//!
//! # Dyn Compatibility
//!
//! Every method returns a boxed future instead of using `async fn` so the
//! coordinator can hold `Arc<dyn EntitlementStore>` and friends.

use crate::types::{
    BatchId, ConsumptionEvent, EntitlementBatch, Member, MemberId, NewBatch, NewMember, PassType,
    Reservation, ReservationId, ScanToken,
};
use chrono::{DateTime, Utc};
use std::future::Future;
use std::pin::Pin;
use thiserror::Error;

/// Counter that store adapters increment on every backend failure, labelled
/// with [`StoreError::kind`].
pub const STORE_ERRORS: &str = "ledger.store.errors";

/// Boxed future returned by every collaborator method.
pub type StoreFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T, StoreError>> + Send + 'a>>;

/// Errors reported by store collaborators.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    /// The backing store could not be reached.
    #[error("Store unavailable: {0}")]
    Unavailable(String),

    /// The store aborted the operation because of a concurrent writer.
    ///
    /// Retrying the whole operation with fresh reads is safe.
    #[error("Concurrency conflict: {0}")]
    ConcurrencyConflict(String),

    /// A uniqueness constraint rejected the write.
    #[error("Duplicate record: {0}")]
    Duplicate(String),

    /// Any other database failure.
    #[error("Database error: {0}")]
    Database(String),
}

impl StoreError {
    /// Whether retrying with fresh reads may succeed.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(self, Self::ConcurrencyConflict(_))
    }

    /// Short label for metrics.
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::Unavailable(_) => "unavailable",
            Self::ConcurrencyConflict(_) => "conflict",
            Self::Duplicate(_) => "duplicate",
            Self::Database(_) => "database",
        }
    }
}

/// Result of the atomic consumption commit.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum CommitOutcome {
    /// The batch was decremented and the event appended, together.
    Committed {
        /// The batch after the decrement
        batch: EntitlementBatch,
        /// The appended event
        event: ConsumptionEvent,
    },
    /// The conditional decrement matched no row: the batch had no remaining
    /// uses (or was deactivated) by the time the commit ran. Nothing was
    /// written.
    Exhausted,
}

/// Member lookup.
pub trait MemberDirectory: Send + Sync {
    /// Finds the member whose QR code carries `token`.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if the directory cannot be read.
    fn find_by_token(&self, token: ScanToken) -> StoreFuture<'_, Option<Member>>;

    /// Finds the member registered with `phone_number`.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if the directory cannot be read.
    fn find_by_phone(&self, phone_number: String) -> StoreFuture<'_, Option<Member>>;

    /// Registers a new member.
    ///
    /// # Errors
    ///
    /// - `Duplicate`: phone number or token already registered
    /// - `Database`/`Unavailable`: write failed
    fn register(&self, member: NewMember) -> StoreFuture<'_, Member>;

    /// Removes a member that was registered but never completed sign-up.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if the delete fails.
    fn unregister(&self, member_id: MemberId) -> StoreFuture<'_, ()>;
}

/// Durable store of entitlement batches.
pub trait EntitlementStore: Send + Sync {
    /// Point read of one batch.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if the store cannot be read.
    fn batch(&self, batch_id: BatchId) -> StoreFuture<'_, Option<EntitlementBatch>>;

    /// Every batch the member ever bought, in any order.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if the store cannot be read.
    fn batches_for_member(&self, member_id: MemberId) -> StoreFuture<'_, Vec<EntitlementBatch>>;

    /// Active batches with `remaining_count > 0` purchased at or before
    /// `entry_time`, oldest first (`purchase_date`, then id). When
    /// `pass_type` is set only batches of that type are returned.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if the store cannot be read.
    fn eligible_batches(
        &self,
        member_id: MemberId,
        pass_type: Option<PassType>,
        entry_time: DateTime<Utc>,
    ) -> StoreFuture<'_, Vec<EntitlementBatch>>;

    /// Inserts a freshly purchased batch with `remaining_count == purchase_count`.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if the write fails.
    fn issue(&self, batch: NewBatch) -> StoreFuture<'_, EntitlementBatch>;

    /// Consumes one use of a batch as a single atomic unit.
    ///
    /// Implementations must, atomically: check the batch is active with
    /// `remaining_count > 0`, decrement it, set `last_used_date` to
    /// `entry_time`, and append a [`ConsumptionEvent`] for the batch's pass
    /// type. If the check fails nothing is written and
    /// [`CommitOutcome::Exhausted`] is returned.
    ///
    /// # Errors
    ///
    /// - `ConcurrencyConflict`: the store aborted the unit (retryable)
    /// - `Database`/`Unavailable`: nothing was committed
    fn commit_consumption(
        &self,
        batch_id: BatchId,
        entry_time: DateTime<Utc>,
    ) -> StoreFuture<'_, CommitOutcome>;
}

/// Append-only entry history.
pub trait ConsumptionLog: Send + Sync {
    /// Every event logged for the member, in any order.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if the log cannot be read.
    fn events_for_member(&self, member_id: MemberId) -> StoreFuture<'_, Vec<ConsumptionEvent>>;
}

/// Room reservation collaborator.
pub trait ReservationDesk: Send + Sync {
    /// The member's pending reservation, if any.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if reservations cannot be read.
    fn find_pending(&self, member_id: MemberId) -> StoreFuture<'_, Option<Reservation>>;

    /// Marks a pending reservation completed and its room occupied.
    ///
    /// Returns `false` without writing if the reservation is no longer
    /// pending (another kiosk fulfilled it first).
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if the write fails.
    fn fulfil(&self, reservation_id: ReservationId, at: DateTime<Utc>) -> StoreFuture<'_, bool>;
}
