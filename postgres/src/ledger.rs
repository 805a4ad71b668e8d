//! [`PostgresLedger`]: the collaborator traits over a `PgPool`.

use crate::store_error;
use chrono::{DateTime, Utc};
use passledger_core::store::{
    CommitOutcome, ConsumptionLog, EntitlementStore, MemberDirectory, ReservationDesk, StoreError,
    StoreFuture,
};
use passledger_core::types::{
    BatchId, ConsumptionEvent, EntitlementBatch, EventId, Member, MemberId, NewBatch, NewMember,
    PassType, Reservation, ReservationId, ReservationStatus, RoomId, ScanToken,
};
use sqlx::Row;
use sqlx::postgres::{PgPool, PgPoolOptions, PgRow};
use std::time::Duration;

const BATCH_COLUMNS: &str = "id, member_id, pass_type, purchase_count, remaining_count, \
                             purchase_date, is_active, last_used_date";

/// PostgreSQL-backed ledger.
///
/// Cloning is cheap; clones share the pool.
#[derive(Clone, Debug)]
pub struct PostgresLedger {
    pool: PgPool,
}

impl PostgresLedger {
    /// Wrap an existing connection pool.
    #[must_use]
    pub const fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Connect with a fresh pool.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Unavailable`] if no connection can be opened.
    pub async fn connect(
        database_url: &str,
        max_connections: u32,
        connect_timeout: Duration,
    ) -> Result<Self, StoreError> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .acquire_timeout(connect_timeout)
            .connect(database_url)
            .await
            .map_err(|e| StoreError::Unavailable(format!("Failed to connect: {e}")))?;

        tracing::info!(max_connections, "Connected to PostgreSQL");
        Ok(Self::from_pool(pool))
    }

    /// Create the ledger tables if they don't already exist.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Database`] if migration fails.
    pub async fn migrate(&self) -> Result<(), StoreError> {
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .map_err(|e| StoreError::Database(format!("Migration failed: {e}")))?;
        Ok(())
    }

    /// Get the underlying connection pool.
    #[must_use]
    pub const fn pool(&self) -> &PgPool {
        &self.pool
    }
}

fn count(context: &str, value: i32) -> Result<u32, StoreError> {
    u32::try_from(value).map_err(|_| StoreError::Database(format!("{context}: negative count {value}")))
}

fn member_from_row(row: &PgRow) -> Result<Member, StoreError> {
    let map = |e: sqlx::Error| store_error("Failed to decode member", &e);
    Ok(Member {
        id: MemberId::new(row.try_get("id").map_err(map)?),
        name: row.try_get("name").map_err(map)?,
        phone_number: row.try_get("phone_number").map_err(map)?,
        scan_token: ScanToken::new(row.try_get::<String, _>("qr_code").map_err(map)?),
    })
}

fn batch_from_row(row: &PgRow) -> Result<EntitlementBatch, StoreError> {
    let map = |e: sqlx::Error| store_error("Failed to decode batch", &e);
    Ok(EntitlementBatch {
        id: BatchId::new(row.try_get("id").map_err(map)?),
        member_id: MemberId::new(row.try_get("member_id").map_err(map)?),
        pass_type: PassType::new(row.try_get::<String, _>("pass_type").map_err(map)?),
        purchase_count: count("purchase_count", row.try_get("purchase_count").map_err(map)?)?,
        remaining_count: count("remaining_count", row.try_get("remaining_count").map_err(map)?)?,
        purchase_date: row.try_get("purchase_date").map_err(map)?,
        active: row.try_get("is_active").map_err(map)?,
        last_used_date: row.try_get("last_used_date").map_err(map)?,
    })
}

fn event_from_row(row: &PgRow) -> Result<ConsumptionEvent, StoreError> {
    let map = |e: sqlx::Error| store_error("Failed to decode entry log", &e);
    Ok(ConsumptionEvent {
        id: EventId::new(row.try_get("id").map_err(map)?),
        member_id: MemberId::new(row.try_get("member_id").map_err(map)?),
        pass_type: PassType::new(row.try_get::<String, _>("pass_type").map_err(map)?),
        entry_time: row.try_get("entry_time").map_err(map)?,
    })
}

fn reservation_from_row(row: &PgRow) -> Result<Reservation, StoreError> {
    let map = |e: sqlx::Error| store_error("Failed to decode reservation", &e);
    let status: String = row.try_get("status").map_err(map)?;
    let status = match status.as_str() {
        "pending" => ReservationStatus::Pending,
        "completed" => ReservationStatus::Completed,
        other => {
            return Err(StoreError::Database(format!(
                "Invalid reservation status: {other}"
            )));
        }
    };

    Ok(Reservation {
        id: ReservationId::new(row.try_get("id").map_err(map)?),
        member_id: MemberId::new(row.try_get("member_id").map_err(map)?),
        room_id: RoomId::new(row.try_get("room_id").map_err(map)?),
        status,
    })
}

impl MemberDirectory for PostgresLedger {
    fn find_by_token(&self, token: ScanToken) -> StoreFuture<'_, Option<Member>> {
        Box::pin(async move {
            let row = sqlx::query(
                "SELECT id, name, phone_number, qr_code FROM members WHERE qr_code = $1",
            )
            .bind(token.as_str())
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| store_error("Failed to find member by token", &e))?;

            row.as_ref().map(member_from_row).transpose()
        })
    }

    fn find_by_phone(&self, phone_number: String) -> StoreFuture<'_, Option<Member>> {
        Box::pin(async move {
            let row = sqlx::query(
                "SELECT id, name, phone_number, qr_code FROM members WHERE phone_number = $1",
            )
            .bind(&phone_number)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| store_error("Failed to find member by phone", &e))?;

            row.as_ref().map(member_from_row).transpose()
        })
    }

    fn register(&self, member: NewMember) -> StoreFuture<'_, Member> {
        Box::pin(async move {
            let row = sqlx::query(
                r"
                INSERT INTO members (name, phone_number, qr_code)
                VALUES ($1, $2, $3)
                RETURNING id, name, phone_number, qr_code
                ",
            )
            .bind(&member.name)
            .bind(&member.phone_number)
            .bind(member.scan_token.as_str())
            .fetch_one(&self.pool)
            .await
            .map_err(|e| store_error("Failed to register member", &e))?;

            let member = member_from_row(&row)?;
            tracing::debug!(member_id = %member.id, "Member registered");
            Ok(member)
        })
    }

    fn unregister(&self, member_id: MemberId) -> StoreFuture<'_, ()> {
        Box::pin(async move {
            sqlx::query("DELETE FROM members WHERE id = $1")
                .bind(member_id.get())
                .execute(&self.pool)
                .await
                .map_err(|e| store_error("Failed to unregister member", &e))?;

            tracing::debug!(member_id = %member_id, "Member unregistered");
            Ok(())
        })
    }
}

impl EntitlementStore for PostgresLedger {
    fn batch(&self, batch_id: BatchId) -> StoreFuture<'_, Option<EntitlementBatch>> {
        Box::pin(async move {
            let query = format!("SELECT {BATCH_COLUMNS} FROM purchase_history WHERE id = $1");
            let row = sqlx::query(&query)
                .bind(batch_id.get())
                .fetch_optional(&self.pool)
                .await
                .map_err(|e| store_error("Failed to load batch", &e))?;

            row.as_ref().map(batch_from_row).transpose()
        })
    }

    fn batches_for_member(&self, member_id: MemberId) -> StoreFuture<'_, Vec<EntitlementBatch>> {
        Box::pin(async move {
            let query = format!(
                "SELECT {BATCH_COLUMNS} FROM purchase_history WHERE member_id = $1 ORDER BY id"
            );
            let rows = sqlx::query(&query)
                .bind(member_id.get())
                .fetch_all(&self.pool)
                .await
                .map_err(|e| store_error("Failed to load batches", &e))?;

            rows.iter().map(batch_from_row).collect()
        })
    }

    fn eligible_batches(
        &self,
        member_id: MemberId,
        pass_type: Option<PassType>,
        entry_time: DateTime<Utc>,
    ) -> StoreFuture<'_, Vec<EntitlementBatch>> {
        Box::pin(async move {
            let query = format!(
                r"
                SELECT {BATCH_COLUMNS}
                FROM purchase_history
                WHERE member_id = $1
                  AND is_active
                  AND remaining_count > 0
                  AND ($2::TEXT IS NULL OR pass_type = $2)
                  AND purchase_date <= $3
                ORDER BY purchase_date ASC, id ASC
                "
            );
            let rows = sqlx::query(&query)
                .bind(member_id.get())
                .bind(pass_type.as_ref().map(PassType::as_str))
                .bind(entry_time)
                .fetch_all(&self.pool)
                .await
                .map_err(|e| store_error("Failed to load eligible batches", &e))?;

            rows.iter().map(batch_from_row).collect()
        })
    }

    fn issue(&self, batch: NewBatch) -> StoreFuture<'_, EntitlementBatch> {
        Box::pin(async move {
            let purchase_count = i32::try_from(batch.purchase_count).map_err(|_| {
                StoreError::Database(format!("purchase_count out of range: {}", batch.purchase_count))
            })?;

            let query = format!(
                r"
                INSERT INTO purchase_history
                    (member_id, pass_type, purchase_count, remaining_count, purchase_date, is_active)
                VALUES ($1, $2, $3, $3, $4, TRUE)
                RETURNING {BATCH_COLUMNS}
                "
            );
            let row = sqlx::query(&query)
                .bind(batch.member_id.get())
                .bind(batch.pass_type.as_str())
                .bind(purchase_count)
                .bind(batch.purchase_date)
                .fetch_one(&self.pool)
                .await
                .map_err(|e| store_error("Failed to issue batch", &e))?;

            batch_from_row(&row)
        })
    }

    fn commit_consumption(
        &self,
        batch_id: BatchId,
        entry_time: DateTime<Utc>,
    ) -> StoreFuture<'_, CommitOutcome> {
        Box::pin(async move {
            let mut tx = self
                .pool
                .begin()
                .await
                .map_err(|e| store_error("Failed to start transaction", &e))?;

            // The predicate is re-checked against the latest committed row,
            // so two kiosks can never both take the last use.
            let query = format!(
                r"
                UPDATE purchase_history
                SET remaining_count = remaining_count - 1,
                    last_used_date = $2
                WHERE id = $1 AND remaining_count > 0 AND is_active
                RETURNING {BATCH_COLUMNS}
                "
            );
            let row = sqlx::query(&query)
                .bind(batch_id.get())
                .bind(entry_time)
                .fetch_optional(&mut *tx)
                .await
                .map_err(|e| store_error("Failed to decrement batch", &e))?;

            let Some(row) = row else {
                let _ = tx.rollback().await;
                tracing::debug!(batch_id = %batch_id, "Batch drained before commit");
                return Ok(CommitOutcome::Exhausted);
            };
            let batch = batch_from_row(&row)?;

            let row = sqlx::query(
                r"
                INSERT INTO entry_logs (member_id, pass_type, entry_time)
                VALUES ($1, $2, $3)
                RETURNING id, member_id, pass_type, entry_time
                ",
            )
            .bind(batch.member_id.get())
            .bind(batch.pass_type.as_str())
            .bind(entry_time)
            .fetch_one(&mut *tx)
            .await
            .map_err(|e| store_error("Failed to append entry log", &e))?;
            let event = event_from_row(&row)?;

            tx.commit()
                .await
                .map_err(|e| store_error("Failed to commit consumption", &e))?;

            Ok(CommitOutcome::Committed { batch, event })
        })
    }
}

impl ConsumptionLog for PostgresLedger {
    fn events_for_member(&self, member_id: MemberId) -> StoreFuture<'_, Vec<ConsumptionEvent>> {
        Box::pin(async move {
            let rows = sqlx::query(
                r"
                SELECT id, member_id, pass_type, entry_time
                FROM entry_logs
                WHERE member_id = $1
                ORDER BY entry_time ASC, id ASC
                ",
            )
            .bind(member_id.get())
            .fetch_all(&self.pool)
            .await
            .map_err(|e| store_error("Failed to load entry logs", &e))?;

            rows.iter().map(event_from_row).collect()
        })
    }
}

impl ReservationDesk for PostgresLedger {
    fn find_pending(&self, member_id: MemberId) -> StoreFuture<'_, Option<Reservation>> {
        Box::pin(async move {
            let row = sqlx::query(
                r"
                SELECT id, member_id, room_id, status
                FROM reservations
                WHERE member_id = $1 AND status = $2
                ORDER BY id
                LIMIT 1
                ",
            )
            .bind(member_id.get())
            .bind(ReservationStatus::Pending.as_str())
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| store_error("Failed to find pending reservation", &e))?;

            row.as_ref().map(reservation_from_row).transpose()
        })
    }

    fn fulfil(&self, reservation_id: ReservationId, at: DateTime<Utc>) -> StoreFuture<'_, bool> {
        Box::pin(async move {
            let mut tx = self
                .pool
                .begin()
                .await
                .map_err(|e| store_error("Failed to start transaction", &e))?;

            let room: Option<(i64,)> = sqlx::query_as(
                r"
                UPDATE reservations
                SET status = $2
                WHERE id = $1 AND status = $3
                RETURNING room_id
                ",
            )
            .bind(reservation_id.get())
            .bind(ReservationStatus::Completed.as_str())
            .bind(ReservationStatus::Pending.as_str())
            .fetch_optional(&mut *tx)
            .await
            .map_err(|e| store_error("Failed to complete reservation", &e))?;

            let Some((room_id,)) = room else {
                let _ = tx.rollback().await;
                return Ok(false);
            };

            sqlx::query(
                r"
                UPDATE rooms
                SET status = 'occupied', current_users = 1, updated_at = $2
                WHERE id = $1
                ",
            )
            .bind(room_id)
            .bind(at)
            .execute(&mut *tx)
            .await
            .map_err(|e| store_error("Failed to occupy room", &e))?;

            tx.commit()
                .await
                .map_err(|e| store_error("Failed to commit reservation", &e))?;

            Ok(true)
        })
    }
}
