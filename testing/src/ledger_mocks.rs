//! In-memory ledger testing utilities
//!
//! Provides fast, deterministic stand-ins for every ledger collaborator:
//! - [`InMemoryLedger`]: members, batches, events and reservations behind one lock
//! - [`StaleEntitlements`]: serves a frozen eligibility snapshot to force lost races
//!
//! The consumption commit holds the lock for the whole check-decrement-append
//! unit, which gives the same guarantee as the production conditional update.

use chrono::{DateTime, Utc};
use passledger_core::store::{
    CommitOutcome, ConsumptionLog, EntitlementStore, MemberDirectory, ReservationDesk, StoreError,
    StoreFuture,
};
use passledger_core::types::{
    BatchId, ConsumptionEvent, EntitlementBatch, EventId, Member, MemberId, NewBatch, NewMember,
    PassType, Reservation, ReservationId, ReservationStatus, RoomId, ScanToken,
};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

/// Occupancy of a room, as the reservation desk records it.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub struct RoomState {
    /// Whether a member checked in
    pub occupied: bool,
    /// Members currently in the room
    pub current_users: u32,
}

#[derive(Debug, Default)]
struct LedgerState {
    members: BTreeMap<MemberId, Member>,
    batches: BTreeMap<BatchId, EntitlementBatch>,
    events: Vec<ConsumptionEvent>,
    reservations: BTreeMap<ReservationId, Reservation>,
    rooms: BTreeMap<RoomId, RoomState>,
    next_id: i64,
}

impl LedgerState {
    const fn next_id(&mut self) -> i64 {
        self.next_id += 1;
        self.next_id
    }
}

/// In-memory implementation of every ledger collaborator.
///
/// # Example
///
/// ```
/// use passledger_testing::InMemoryLedger;
/// use chrono::Utc;
///
/// let ledger = InMemoryLedger::new();
/// let member = ledger.add_member("Kim", "010-1234-5678");
/// let batch = ledger.add_batch(member.id, "12회권", 12, Utc::now());
///
/// assert_eq!(ledger.batch_snapshot(batch.id).unwrap().remaining_count, 12);
/// ```
#[derive(Clone, Debug, Default)]
pub struct InMemoryLedger {
    state: Arc<Mutex<LedgerState>>,
    fail_issue: Arc<AtomicBool>,
    unavailable: Arc<AtomicBool>,
}

impl InMemoryLedger {
    /// Create a new empty ledger
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, LedgerState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn check_available(&self) -> Result<(), StoreError> {
        if self.unavailable.load(Ordering::SeqCst) {
            Err(StoreError::Unavailable("in-memory ledger switched off".to_string()))
        } else {
            Ok(())
        }
    }

    /// Make every subsequent operation fail with `Unavailable`.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    /// Make the next `issue` call fail with a database error.
    pub fn fail_next_issue(&self) {
        self.fail_issue.store(true, Ordering::SeqCst);
    }

    /// Seed a member with a fresh scan token.
    pub fn add_member(&self, name: &str, phone_number: &str) -> Member {
        let mut state = self.lock();
        let member = Member {
            id: MemberId::new(state.next_id()),
            name: name.to_string(),
            phone_number: phone_number.to_string(),
            scan_token: ScanToken::generate(),
        };
        state.members.insert(member.id, member.clone());
        member
    }

    /// Seed a full, active batch.
    pub fn add_batch(
        &self,
        member_id: MemberId,
        pass_type: &str,
        purchase_count: u32,
        purchase_date: DateTime<Utc>,
    ) -> EntitlementBatch {
        insert_batch(
            &mut self.lock(),
            NewBatch {
                member_id,
                pass_type: PassType::new(pass_type),
                purchase_count,
                purchase_date,
            },
        )
    }

    /// Seed an event directly, bypassing the live counters (legacy backfill).
    pub fn add_event(
        &self,
        member_id: MemberId,
        pass_type: &str,
        entry_time: DateTime<Utc>,
    ) -> ConsumptionEvent {
        let mut state = self.lock();
        let event = ConsumptionEvent {
            id: EventId::new(state.next_id()),
            member_id,
            pass_type: PassType::new(pass_type),
            entry_time,
        };
        state.events.push(event.clone());
        event
    }

    /// Seed a pending reservation for a vacant room.
    pub fn add_reservation(&self, member_id: MemberId) -> Reservation {
        let mut state = self.lock();
        let room_id = RoomId::new(state.next_id());
        state.rooms.insert(room_id, RoomState::default());
        let reservation = Reservation {
            id: ReservationId::new(state.next_id()),
            member_id,
            room_id,
            status: ReservationStatus::Pending,
        };
        state.reservations.insert(reservation.id, reservation.clone());
        reservation
    }

    /// Overwrite a batch's live counter, simulating drift.
    pub fn corrupt_remaining(&self, batch_id: BatchId, remaining_count: u32) {
        if let Some(batch) = self.lock().batches.get_mut(&batch_id) {
            batch.remaining_count = remaining_count;
        }
    }

    /// Deactivate a batch.
    pub fn deactivate(&self, batch_id: BatchId) {
        if let Some(batch) = self.lock().batches.get_mut(&batch_id) {
            batch.active = false;
        }
    }

    /// Current state of one batch.
    #[must_use]
    pub fn batch_snapshot(&self, batch_id: BatchId) -> Option<EntitlementBatch> {
        self.lock().batches.get(&batch_id).cloned()
    }

    /// Every logged event, in append order.
    #[must_use]
    pub fn event_snapshot(&self) -> Vec<ConsumptionEvent> {
        self.lock().events.clone()
    }

    /// Current state of one reservation.
    #[must_use]
    pub fn reservation_snapshot(&self, reservation_id: ReservationId) -> Option<Reservation> {
        self.lock().reservations.get(&reservation_id).cloned()
    }

    /// Current occupancy of one room.
    #[must_use]
    pub fn room_snapshot(&self, room_id: RoomId) -> Option<RoomState> {
        self.lock().rooms.get(&room_id).copied()
    }

    /// Number of registered members.
    #[must_use]
    pub fn member_count(&self) -> usize {
        self.lock().members.len()
    }
}

fn insert_batch(state: &mut LedgerState, new: NewBatch) -> EntitlementBatch {
    let batch = EntitlementBatch {
        id: BatchId::new(state.next_id()),
        member_id: new.member_id,
        pass_type: new.pass_type,
        purchase_count: new.purchase_count,
        remaining_count: new.purchase_count,
        purchase_date: new.purchase_date,
        active: true,
        last_used_date: None,
    };
    state.batches.insert(batch.id, batch.clone());
    batch
}

fn eligible(
    state: &LedgerState,
    member_id: MemberId,
    pass_type: Option<&PassType>,
    entry_time: DateTime<Utc>,
) -> Vec<EntitlementBatch> {
    let mut batches: Vec<EntitlementBatch> = state
        .batches
        .values()
        .filter(|b| b.member_id == member_id && b.is_eligible())
        .filter(|b| b.purchase_date <= entry_time)
        .filter(|b| pass_type.is_none_or(|p| *p == b.pass_type))
        .cloned()
        .collect();
    batches.sort_by_key(|b| (b.purchase_date, b.id));
    batches
}

impl MemberDirectory for InMemoryLedger {
    fn find_by_token(&self, token: ScanToken) -> StoreFuture<'_, Option<Member>> {
        Box::pin(async move {
            self.check_available()?;
            Ok(self
                .lock()
                .members
                .values()
                .find(|m| m.scan_token == token)
                .cloned())
        })
    }

    fn find_by_phone(&self, phone_number: String) -> StoreFuture<'_, Option<Member>> {
        Box::pin(async move {
            self.check_available()?;
            Ok(self
                .lock()
                .members
                .values()
                .find(|m| m.phone_number == phone_number)
                .cloned())
        })
    }

    fn register(&self, member: NewMember) -> StoreFuture<'_, Member> {
        Box::pin(async move {
            self.check_available()?;
            let mut state = self.lock();
            if state
                .members
                .values()
                .any(|m| m.phone_number == member.phone_number || m.scan_token == member.scan_token)
            {
                return Err(StoreError::Duplicate(member.phone_number));
            }
            let member = Member {
                id: MemberId::new(state.next_id()),
                name: member.name,
                phone_number: member.phone_number,
                scan_token: member.scan_token,
            };
            state.members.insert(member.id, member.clone());
            Ok(member)
        })
    }

    fn unregister(&self, member_id: MemberId) -> StoreFuture<'_, ()> {
        Box::pin(async move {
            self.check_available()?;
            self.lock().members.remove(&member_id);
            Ok(())
        })
    }
}

impl EntitlementStore for InMemoryLedger {
    fn batch(&self, batch_id: BatchId) -> StoreFuture<'_, Option<EntitlementBatch>> {
        Box::pin(async move {
            self.check_available()?;
            Ok(self.batch_snapshot(batch_id))
        })
    }

    fn batches_for_member(&self, member_id: MemberId) -> StoreFuture<'_, Vec<EntitlementBatch>> {
        Box::pin(async move {
            self.check_available()?;
            Ok(self
                .lock()
                .batches
                .values()
                .filter(|b| b.member_id == member_id)
                .cloned()
                .collect())
        })
    }

    fn eligible_batches(
        &self,
        member_id: MemberId,
        pass_type: Option<PassType>,
        entry_time: DateTime<Utc>,
    ) -> StoreFuture<'_, Vec<EntitlementBatch>> {
        Box::pin(async move {
            self.check_available()?;
            Ok(eligible(&self.lock(), member_id, pass_type.as_ref(), entry_time))
        })
    }

    fn issue(&self, batch: NewBatch) -> StoreFuture<'_, EntitlementBatch> {
        Box::pin(async move {
            self.check_available()?;
            if self.fail_issue.swap(false, Ordering::SeqCst) {
                return Err(StoreError::Database("injected issue failure".to_string()));
            }
            Ok(insert_batch(&mut self.lock(), batch))
        })
    }

    fn commit_consumption(
        &self,
        batch_id: BatchId,
        entry_time: DateTime<Utc>,
    ) -> StoreFuture<'_, CommitOutcome> {
        Box::pin(async move {
            self.check_available()?;
            let mut state = self.lock();

            let Some(batch) = state.batches.get_mut(&batch_id).filter(|b| b.is_eligible()) else {
                return Ok(CommitOutcome::Exhausted);
            };
            batch.remaining_count -= 1;
            batch.last_used_date = Some(entry_time);
            let batch = batch.clone();

            let event = ConsumptionEvent {
                id: EventId::new(state.next_id()),
                member_id: batch.member_id,
                pass_type: batch.pass_type.clone(),
                entry_time,
            };
            state.events.push(event.clone());

            Ok(CommitOutcome::Committed { batch, event })
        })
    }
}

impl ConsumptionLog for InMemoryLedger {
    fn events_for_member(&self, member_id: MemberId) -> StoreFuture<'_, Vec<ConsumptionEvent>> {
        Box::pin(async move {
            self.check_available()?;
            Ok(self
                .lock()
                .events
                .iter()
                .filter(|e| e.member_id == member_id)
                .cloned()
                .collect())
        })
    }
}

impl ReservationDesk for InMemoryLedger {
    fn find_pending(&self, member_id: MemberId) -> StoreFuture<'_, Option<Reservation>> {
        Box::pin(async move {
            self.check_available()?;
            Ok(self
                .lock()
                .reservations
                .values()
                .find(|r| r.member_id == member_id && r.status == ReservationStatus::Pending)
                .cloned())
        })
    }

    fn fulfil(&self, reservation_id: ReservationId, _at: DateTime<Utc>) -> StoreFuture<'_, bool> {
        Box::pin(async move {
            self.check_available()?;
            let mut state = self.lock();

            let Some(reservation) = state
                .reservations
                .get_mut(&reservation_id)
                .filter(|r| r.status == ReservationStatus::Pending)
            else {
                return Ok(false);
            };
            reservation.status = ReservationStatus::Completed;
            let room_id = reservation.room_id;

            let room = state.rooms.entry(room_id).or_default();
            room.occupied = true;
            room.current_users = 1;
            Ok(true)
        })
    }
}

/// Entitlement store whose eligibility reads are frozen at construction.
///
/// Every other call goes to the wrapped [`InMemoryLedger`]. Once the frozen
/// batches are drained, every commit reports `Exhausted`, so a coordinator
/// using this store keeps losing the race until its retries run out.
#[derive(Clone, Debug)]
pub struct StaleEntitlements {
    inner: InMemoryLedger,
    frozen: Vec<EntitlementBatch>,
}

impl StaleEntitlements {
    /// Freeze the member's currently eligible batches.
    #[must_use]
    pub fn freeze(inner: InMemoryLedger, member_id: MemberId) -> Self {
        let frozen = eligible(&inner.lock(), member_id, None, DateTime::<Utc>::MAX_UTC);
        Self { inner, frozen }
    }
}

impl EntitlementStore for StaleEntitlements {
    fn batch(&self, batch_id: BatchId) -> StoreFuture<'_, Option<EntitlementBatch>> {
        self.inner.batch(batch_id)
    }

    fn batches_for_member(&self, member_id: MemberId) -> StoreFuture<'_, Vec<EntitlementBatch>> {
        self.inner.batches_for_member(member_id)
    }

    fn eligible_batches(
        &self,
        member_id: MemberId,
        pass_type: Option<PassType>,
        entry_time: DateTime<Utc>,
    ) -> StoreFuture<'_, Vec<EntitlementBatch>> {
        Box::pin(async move {
            Ok(self
                .frozen
                .iter()
                .filter(|b| b.member_id == member_id && b.purchase_date <= entry_time)
                .filter(|b| pass_type.as_ref().is_none_or(|p| *p == b.pass_type))
                .cloned()
                .collect())
        })
    }

    fn issue(&self, batch: NewBatch) -> StoreFuture<'_, EntitlementBatch> {
        self.inner.issue(batch)
    }

    fn commit_consumption(
        &self,
        batch_id: BatchId,
        entry_time: DateTime<Utc>,
    ) -> StoreFuture<'_, CommitOutcome> {
        self.inner.commit_consumption(batch_id, entry_time)
    }
}
