//! Consumption coordinator: the live entry-time decrement.
//!
//! # Flow
//!
//! 1. Resolve the member from the scanned token (`NotFound` otherwise).
//! 2. A pending room reservation admits the member without touching the
//!    ledger.
//! 3. Otherwise pick the oldest eligible batch (active, `remaining_count > 0`,
//!    bought no later than the entry, by purchase date) and commit one use through
//!    [`EntitlementStore::commit_consumption`], which decrements the counter
//!    and appends the event as one atomic unit.
//! 4. If the commit finds the batch already drained by a concurrent entry,
//!    re-read and try again under the [`RetryPolicy`]. When the policy is
//!    exhausted the caller gets `Conflict`.
//!
//! The batch choice mirrors the allocation engine's first-fit policy, so the
//! live counters and the recomputed history agree as long as every
//! decrement goes through here.

use crate::metrics as names;
use crate::retry::{RetryPolicy, retry_if};
use chrono::{DateTime, Utc};
use passledger_core::store::{
    CommitOutcome, EntitlementStore, MemberDirectory, ReservationDesk, StoreError,
};
use passledger_core::types::{
    ConsumptionEvent, EntitlementBatch, Member, MemberId, PassType, Reservation,
    ReservationStatus, ScanToken,
};
use serde::Serialize;
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use thiserror::Error;

/// Input to [`ConsumptionCoordinator::consume`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ConsumeRequest {
    /// Normalized scan token
    pub token: ScanToken,
    /// Restrict consumption to one pass type; `None` takes the oldest
    /// eligible batch of any type
    pub pass_type: Option<PassType>,
    /// When the member entered
    pub entry_time: DateTime<Utc>,
}

impl ConsumeRequest {
    /// Entry with no pass-type restriction.
    #[must_use]
    pub const fn new(token: ScanToken, entry_time: DateTime<Utc>) -> Self {
        Self {
            token,
            pass_type: None,
            entry_time,
        }
    }

    /// Restricts the entry to batches of `pass_type`.
    #[must_use]
    pub fn with_pass_type(mut self, pass_type: PassType) -> Self {
        self.pass_type = Some(pass_type);
        self
    }
}

/// Successful entry.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum ConsumeOutcome {
    /// One use was taken from a batch.
    PassConsumed {
        /// The member who entered
        member: Member,
        /// The batch after the decrement
        batch: EntitlementBatch,
        /// The logged event
        event: ConsumptionEvent,
    },
    /// A pending reservation was fulfilled; no batch or event was touched.
    ReservationFulfilled {
        /// The member who entered
        member: Member,
        /// The completed reservation
        reservation: Reservation,
    },
}

impl ConsumeOutcome {
    /// The admitted member.
    #[must_use]
    pub const fn member(&self) -> &Member {
        match self {
            Self::PassConsumed { member, .. } | Self::ReservationFulfilled { member, .. } => member,
        }
    }

    /// Remaining uses of the consumed batch, if a pass was consumed.
    #[must_use]
    pub const fn remaining(&self) -> Option<u32> {
        match self {
            Self::PassConsumed { batch, .. } => Some(batch.remaining_count),
            Self::ReservationFulfilled { .. } => None,
        }
    }

    const fn label(&self) -> &'static str {
        match self {
            Self::PassConsumed { .. } => "pass_consumed",
            Self::ReservationFulfilled { .. } => "reservation_fulfilled",
        }
    }
}

/// Why an entry was refused.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConsumeError {
    /// No member carries the scanned token.
    #[error("No member registered for scan token {0}")]
    NotFound(ScanToken),

    /// The member has no active batch with remaining uses.
    #[error("Member {member_id} has no eligible entitlement")]
    NoEligibleEntitlement {
        /// The member
        member_id: MemberId,
        /// The requested pass type, if restricted
        pass_type: Option<PassType>,
    },

    /// Concurrent entries kept winning the race; re-invoking may succeed.
    #[error("Consumption for member {member_id} conflicted after {attempts} attempts")]
    Conflict {
        /// The member
        member_id: MemberId,
        /// Attempts made before giving up
        attempts: usize,
    },

    /// A collaborator failed; nothing was committed.
    #[error(transparent)]
    Store(#[from] StoreError),
}

impl ConsumeError {
    /// Whether re-invoking `consume` with the same input may succeed.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(self, Self::Conflict { .. })
    }

    const fn label(&self) -> &'static str {
        match self {
            Self::NotFound(_) => "not_found",
            Self::NoEligibleEntitlement { .. } => "no_eligible_entitlement",
            Self::Conflict { .. } => "conflict",
            Self::Store(_) => "store_error",
        }
    }
}

/// Failure of a single attempt, before retry policy is applied.
#[derive(Debug)]
enum AttemptError {
    /// The chosen batch was drained between read and commit.
    LostRace(EntitlementBatch),
    Store(StoreError),
    Refused(ConsumeError),
}

impl AttemptError {
    const fn is_retryable(&self) -> bool {
        match self {
            Self::LostRace(_) => true,
            Self::Store(err) => err.is_retryable(),
            Self::Refused(_) => false,
        }
    }
}

impl From<StoreError> for AttemptError {
    fn from(err: StoreError) -> Self {
        Self::Store(err)
    }
}

impl fmt::Display for AttemptError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::LostRace(batch) => write!(f, "batch {} drained concurrently", batch.id),
            Self::Store(err) => write!(f, "{err}"),
            Self::Refused(err) => write!(f, "{err}"),
        }
    }
}

/// Live decision and decrement procedure invoked at entry time.
#[derive(Clone)]
pub struct ConsumptionCoordinator {
    members: Arc<dyn MemberDirectory>,
    entitlements: Arc<dyn EntitlementStore>,
    reservations: Arc<dyn ReservationDesk>,
    retry: RetryPolicy,
}

impl ConsumptionCoordinator {
    /// Creates a coordinator over the given collaborators.
    #[must_use]
    pub fn new(
        members: Arc<dyn MemberDirectory>,
        entitlements: Arc<dyn EntitlementStore>,
        reservations: Arc<dyn ReservationDesk>,
        retry: RetryPolicy,
    ) -> Self {
        Self {
            members,
            entitlements,
            reservations,
            retry,
        }
    }

    /// The retry policy applied to lost races.
    #[must_use]
    pub const fn retry_policy(&self) -> &RetryPolicy {
        &self.retry
    }

    /// Admits a member, consuming one use of their oldest eligible batch
    /// unless a pending reservation covers the entry.
    ///
    /// # Errors
    ///
    /// - `NotFound`: unknown token
    /// - `NoEligibleEntitlement`: nothing left to consume
    /// - `Conflict`: concurrent entries won every attempt
    /// - `Store`: a collaborator failed; nothing was committed
    #[tracing::instrument(
        name = "consume",
        skip(self, request),
        fields(token = %request.token, entry_time = %request.entry_time)
    )]
    pub async fn consume(&self, request: ConsumeRequest) -> Result<ConsumeOutcome, ConsumeError> {
        let result = self.run(&request).await;

        match &result {
            Ok(outcome) => {
                metrics::counter!(names::CONSUME_TOTAL, "outcome" => outcome.label()).increment(1);
            }
            Err(err) => {
                tracing::info!(error = %err, "Entry refused");
                metrics::counter!(names::CONSUME_TOTAL, "outcome" => err.label()).increment(1);
            }
        }

        result
    }

    async fn run(&self, request: &ConsumeRequest) -> Result<ConsumeOutcome, ConsumeError> {
        let member = self
            .members
            .find_by_token(request.token.clone())
            .await?
            .ok_or_else(|| ConsumeError::NotFound(request.token.clone()))?;

        let attempts = AtomicUsize::new(0);
        let result = retry_if(
            &self.retry,
            |attempt| {
                attempts.store(attempt + 1, Ordering::Relaxed);
                self.attempt(&member, request, attempt)
            },
            AttemptError::is_retryable,
        )
        .await;

        let attempts = attempts.load(Ordering::Relaxed);
        #[allow(clippy::cast_precision_loss)]
        metrics::histogram!(names::CONSUME_ATTEMPTS).record(attempts as f64);

        result.map_err(|err| match err {
            AttemptError::Refused(err) => err,
            AttemptError::Store(err) if !err.is_retryable() => ConsumeError::Store(err),
            AttemptError::LostRace(_) | AttemptError::Store(_) => ConsumeError::Conflict {
                member_id: member.id,
                attempts,
            },
        })
    }

    async fn attempt(
        &self,
        member: &Member,
        request: &ConsumeRequest,
        attempt: usize,
    ) -> Result<ConsumeOutcome, AttemptError> {
        tracing::debug!(member_id = %member.id, attempt, "Consumption attempt");

        if let Some(reservation) = self.reservations.find_pending(member.id).await? {
            return self.fulfil_reservation(member, reservation, request.entry_time).await;
        }

        let eligible = self
            .entitlements
            .eligible_batches(member.id, request.pass_type.clone(), request.entry_time)
            .await?;

        let Some(target) = eligible.into_iter().next() else {
            return Err(AttemptError::Refused(ConsumeError::NoEligibleEntitlement {
                member_id: member.id,
                pass_type: request.pass_type.clone(),
            }));
        };

        match self
            .entitlements
            .commit_consumption(target.id, request.entry_time)
            .await?
        {
            CommitOutcome::Committed { batch, event } => {
                tracing::info!(
                    member_id = %member.id,
                    batch_id = %batch.id,
                    event_id = %event.id,
                    pass_type = %batch.pass_type,
                    remaining = batch.remaining_count,
                    "Pass consumed"
                );
                Ok(ConsumeOutcome::PassConsumed {
                    member: member.clone(),
                    batch,
                    event,
                })
            }
            CommitOutcome::Exhausted => {
                metrics::counter!(names::CONSUME_CONFLICTS).increment(1);
                Err(AttemptError::LostRace(target))
            }
        }
    }

    async fn fulfil_reservation(
        &self,
        member: &Member,
        reservation: Reservation,
        at: DateTime<Utc>,
    ) -> Result<ConsumeOutcome, AttemptError> {
        let won = self.reservations.fulfil(reservation.id, at).await?;
        if won {
            tracing::info!(
                member_id = %member.id,
                reservation_id = %reservation.id,
                room_id = %reservation.room_id,
                "Reservation fulfilled"
            );
        } else {
            // Same arrival scanned twice: never falls through to a pass.
            tracing::warn!(
                member_id = %member.id,
                reservation_id = %reservation.id,
                "Reservation already fulfilled by a concurrent entry"
            );
        }

        Ok(ConsumeOutcome::ReservationFulfilled {
            member: member.clone(),
            reservation: Reservation {
                status: ReservationStatus::Completed,
                ..reservation
            },
        })
    }
}

impl fmt::Debug for ConsumptionCoordinator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConsumptionCoordinator")
            .field("retry", &self.retry)
            .finish_non_exhaustive()
    }
}
