//! Ledger service: the operations the kiosk surfaces call.
//!
//! Wraps the collaborators, the coordinator and the pure read-path logic
//! behind one handle: entry, purchase, enrollment and balance statements.

use crate::coordinator::{ConsumeError, ConsumeOutcome, ConsumeRequest, ConsumptionCoordinator};
use crate::metrics as names;
use crate::retry::RetryPolicy;
use passledger_core::allocation::{AllocationResult, allocate};
use passledger_core::catalog::{Catalog, PassProduct};
use passledger_core::environment::Clock;
use passledger_core::reconcile::{Divergence, InconsistentData, divergences_in};
use passledger_core::store::{
    ConsumptionLog, EntitlementStore, MemberDirectory, ReservationDesk, StoreError,
};
use passledger_core::types::{
    EntitlementBatch, Member, NewBatch, NewMember, ParseScanTokenError, ScanToken,
};
use serde::Serialize;
use std::sync::Arc;
use thiserror::Error;

/// Errors from [`LedgerService`] operations.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum LedgerError {
    /// The scanned payload carried no token.
    #[error(transparent)]
    InvalidScan(#[from] ParseScanTokenError),

    /// No member carries the token.
    #[error("No member registered for scan token {0}")]
    NotFound(ScanToken),

    /// The product is not in the catalog.
    #[error("Unknown pass product: {0}")]
    UnknownProduct(String),

    /// The phone number already belongs to a member.
    #[error("Phone number {0} is already enrolled")]
    AlreadyEnrolled(String),

    /// Entry was refused.
    #[error(transparent)]
    Consume(#[from] ConsumeError),

    /// A collaborator failed.
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// A member's balance view: live counters next to recomputed history.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct MemberStatement {
    /// The member
    pub member: Member,
    /// Attribution of every entry, newest batch first
    pub allocation: AllocationResult,
    /// Sum of live `remaining_count` over active batches
    pub live_total_remaining: u64,
    /// Disagreements between live counters and history
    pub divergences: Vec<Divergence>,
}

impl MemberStatement {
    /// Whether the live counters match history and every event was placed.
    #[must_use]
    pub fn is_consistent(&self) -> bool {
        self.divergences.is_empty()
    }

    /// The statement's divergences as an error, for callers that treat any
    /// drift as a failure.
    ///
    /// # Errors
    ///
    /// Returns [`InconsistentData`] when at least one divergence was found.
    pub fn ensure_consistent(&self) -> Result<(), InconsistentData> {
        if self.is_consistent() {
            Ok(())
        } else {
            Err(InconsistentData {
                divergences: self.divergences.clone(),
            })
        }
    }
}

/// A completed sign-up.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct Enrollment {
    /// The new member
    pub member: Member,
    /// Their first pass
    pub batch: EntitlementBatch,
}

/// Entry point for the kiosk surfaces.
#[derive(Clone)]
pub struct LedgerService {
    members: Arc<dyn MemberDirectory>,
    entitlements: Arc<dyn EntitlementStore>,
    log: Arc<dyn ConsumptionLog>,
    coordinator: ConsumptionCoordinator,
    catalog: Catalog,
    clock: Arc<dyn Clock>,
}

impl LedgerService {
    /// Builds a service over a backend implementing every collaborator.
    #[must_use]
    pub fn with_backend<B>(backend: Arc<B>, clock: Arc<dyn Clock>, retry: RetryPolicy) -> Self
    where
        B: MemberDirectory + EntitlementStore + ConsumptionLog + ReservationDesk + 'static,
    {
        let members: Arc<dyn MemberDirectory> = backend.clone();
        let entitlements: Arc<dyn EntitlementStore> = backend.clone();
        let reservations: Arc<dyn ReservationDesk> = backend.clone();
        let log: Arc<dyn ConsumptionLog> = backend;

        Self {
            coordinator: ConsumptionCoordinator::new(
                Arc::clone(&members),
                Arc::clone(&entitlements),
                reservations,
                retry,
            ),
            members,
            entitlements,
            log,
            catalog: Catalog::standard(),
            clock,
        }
    }

    /// Replaces the product catalog.
    #[must_use]
    pub fn with_catalog(mut self, catalog: Catalog) -> Self {
        self.catalog = catalog;
        self
    }

    /// Products on sale.
    #[must_use]
    pub const fn catalog(&self) -> &Catalog {
        &self.catalog
    }

    /// The underlying coordinator.
    #[must_use]
    pub const fn coordinator(&self) -> &ConsumptionCoordinator {
        &self.coordinator
    }

    /// Handles a scan at the entry kiosk, stamped with the current time.
    ///
    /// # Errors
    ///
    /// `InvalidScan` for an empty payload, otherwise the coordinator's
    /// refusals as [`LedgerError::Consume`].
    pub async fn enter(&self, raw_scan: &str) -> Result<ConsumeOutcome, LedgerError> {
        let token = ScanToken::from_scan(raw_scan)?;
        self.consume(ConsumeRequest::new(token, self.clock.now())).await
    }

    /// Runs the coordinator for an explicit request.
    ///
    /// # Errors
    ///
    /// The coordinator's refusals as [`LedgerError::Consume`].
    pub async fn consume(&self, request: ConsumeRequest) -> Result<ConsumeOutcome, LedgerError> {
        Ok(self.coordinator.consume(request).await?)
    }

    /// Issues a new batch of `product_name` to the member.
    ///
    /// # Errors
    ///
    /// - `NotFound`: unknown token
    /// - `UnknownProduct`: not in the catalog
    /// - `Store`: the write failed
    pub async fn purchase(
        &self,
        token: ScanToken,
        product_name: &str,
    ) -> Result<EntitlementBatch, LedgerError> {
        let product = self.product(product_name)?;
        let member = self.member(token).await?;

        let batch = self.issue(&member, &product).await?;
        tracing::info!(
            member_id = %member.id,
            batch_id = %batch.id,
            pass_type = %batch.pass_type,
            uses = batch.purchase_count,
            "Pass purchased"
        );
        Ok(batch)
    }

    /// Registers a member and issues their first pass.
    ///
    /// If the first pass cannot be issued the member record is removed
    /// again.
    ///
    /// # Errors
    ///
    /// - `AlreadyEnrolled`: the phone number is taken
    /// - `UnknownProduct`: not in the catalog
    /// - `Store`: a write failed
    pub async fn enroll(
        &self,
        name: &str,
        phone_number: &str,
        product_name: &str,
    ) -> Result<Enrollment, LedgerError> {
        let product = self.product(product_name)?;

        if self
            .members
            .find_by_phone(phone_number.to_string())
            .await?
            .is_some()
        {
            return Err(LedgerError::AlreadyEnrolled(phone_number.to_string()));
        }

        let member = self
            .members
            .register(NewMember {
                name: name.to_string(),
                phone_number: phone_number.to_string(),
                scan_token: ScanToken::generate(),
            })
            .await
            .map_err(|err| match err {
                StoreError::Duplicate(_) => LedgerError::AlreadyEnrolled(phone_number.to_string()),
                other => LedgerError::Store(other),
            })?;

        match self.issue(&member, &product).await {
            Ok(batch) => {
                tracing::info!(member_id = %member.id, batch_id = %batch.id, "Member enrolled");
                Ok(Enrollment { member, batch })
            }
            Err(err) => {
                tracing::error!(member_id = %member.id, error = %err, "First pass failed, removing member");
                if let Err(cleanup) = self.members.unregister(member.id).await {
                    tracing::error!(member_id = %member.id, error = %cleanup, "Member cleanup failed");
                }
                Err(err.into())
            }
        }
    }

    /// Builds the member's balance statement.
    ///
    /// # Errors
    ///
    /// - `NotFound`: unknown token
    /// - `Store`: batches or events could not be read
    pub async fn statement(&self, token: ScanToken) -> Result<MemberStatement, LedgerError> {
        let member = self.member(token).await?;

        let (batches, events) = tokio::try_join!(
            self.entitlements.batches_for_member(member.id),
            self.log.events_for_member(member.id),
        )?;

        let allocation = allocate(&batches, &events);
        let divergences = divergences_in(&allocation);
        for divergence in &divergences {
            metrics::counter!(names::RECONCILE_DIVERGENCES, "kind" => divergence.kind()).increment(1);
        }

        let live_total_remaining = batches
            .iter()
            .filter(|b| b.active)
            .map(|b| u64::from(b.remaining_count))
            .sum();

        Ok(MemberStatement {
            member,
            allocation,
            live_total_remaining,
            divergences,
        })
    }

    fn product(&self, name: &str) -> Result<PassProduct, LedgerError> {
        self.catalog
            .find(name)
            .cloned()
            .ok_or_else(|| LedgerError::UnknownProduct(name.to_string()))
    }

    async fn member(&self, token: ScanToken) -> Result<Member, LedgerError> {
        self.members
            .find_by_token(token.clone())
            .await?
            .ok_or(LedgerError::NotFound(token))
    }

    async fn issue(
        &self,
        member: &Member,
        product: &PassProduct,
    ) -> Result<EntitlementBatch, StoreError> {
        self.entitlements
            .issue(NewBatch {
                member_id: member.id,
                pass_type: product.name.clone(),
                purchase_count: product.uses,
                purchase_date: self.clock.now(),
            })
            .await
    }
}

impl std::fmt::Debug for LedgerService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LedgerService")
            .field("coordinator", &self.coordinator)
            .field("catalog", &self.catalog)
            .finish_non_exhaustive()
    }
}
