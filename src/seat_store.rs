//! Authoritative relational store for seats and orders. Seat status
//! transitions are guarded by row-level optimistic concurrency control: the
//! `UPDATE ... WHERE status = $expected AND version = $expected` pattern
//! guarantees at most one caller's update is ever `applied`, independent of
//! [`crate::safe_lock::SafeLock`] behavior.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use dashmap::DashMap;
use sqlx::{PgPool, Postgres, Row, Transaction};
use tokio_util::sync::CancellationToken;

use crate::core_types::{SeatId, TrainTag, Version};
use crate::error::{CoreError, CoreResult};
use crate::models::{Order, OrderStatus, Seat, SeatStatus};

#[async_trait]
pub trait SeatTransaction: Send {
    async fn get(&mut self, seat_id: SeatId) -> CoreResult<Option<Seat>>;

    /// Read-validate-CAS-sleep-reread loop. Exits on success, on a terminal
    /// `NotAvailable` (seat status is not `Available`), once `max_retries` is
    /// exhausted, or as soon as `cancel` fires (returns `Cancelled`).
    async fn cas_status_retry(
        &mut self,
        seat_id: SeatId,
        new_status: SeatStatus,
        max_retries: u32,
        cancel: &CancellationToken,
    ) -> CoreResult<bool>;

    async fn commit(self: Box<Self>) -> CoreResult<()>;
    async fn rollback(self: Box<Self>) -> CoreResult<()>;
}

#[async_trait]
pub trait SeatStore: Send + Sync {
    async fn get(&self, seat_id: SeatId) -> CoreResult<Option<Seat>>;
    async fn by_tag(&self, tag: &TrainTag) -> CoreResult<Vec<Seat>>;

    /// Rejects a negative `expected_version` instead of sending it to the
    /// database, since no real row can ever carry one.
    async fn cas_status(
        &self,
        seat_id: SeatId,
        expected_version: Version,
        new_status: SeatStatus,
    ) -> CoreResult<bool>;

    async fn begin(&self) -> CoreResult<Box<dyn SeatTransaction>>;

    /// Every distinct, non-deleted `train_tag` in the store. Used once at
    /// startup to seed the Bloom admission filter.
    async fn distinct_tags(&self) -> CoreResult<Vec<TrainTag>>;

    /// Idempotent insert-or-update keyed on `order_id`, the consumer's
    /// redelivery-safety mechanism.
    async fn upsert_order(&self, order: &Order) -> CoreResult<()>;

    async fn get_order(&self, order_id: &str) -> CoreResult<Option<Order>>;

    async fn count_orders(&self) -> CoreResult<usize>;
}

// ---------------------------------------------------------------------
// Postgres-backed implementation
// ---------------------------------------------------------------------

pub struct PgSeatStore {
    pool: PgPool,
}

impl PgSeatStore {
    pub async fn connect(database_url: &str) -> CoreResult<Self> {
        let pool = sqlx::postgres::PgPoolOptions::new()
            .max_connections(10)
            .acquire_timeout(Duration::from_secs(5))
            .connect(database_url)
            .await?;
        sqlx::migrate!("./migrations")
            .run(&pool)
            .await
            .map_err(|e| CoreError::StoreFailure(e.to_string()))?;
        Ok(Self { pool })
    }

    pub async fn health_check(&self) -> CoreResult<()> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }
}

fn row_to_seat(row: &sqlx::postgres::PgRow) -> Seat {
    Seat {
        seat_id: row.get("seat_id"),
        train_tag: row.get("train_tag"),
        seat_number: row.get("seat_number"),
        price: row.get("price"),
        status: status_from_i16(row.get::<i16, _>("status")),
        version: row.get("version"),
        created_at: row.get("created_at"),
        updated_at: row.get("updated_at"),
    }
}

fn row_to_order(row: &sqlx::postgres::PgRow) -> Order {
    Order {
        order_id: row.get("order_id"),
        user_ref: row.get("user_ref"),
        seat_id: row.get("seat_id"),
        total_price: row.get("total_price"),
        status: order_status_from_i16(row.get::<i16, _>("status")),
        created_at: row.get("created_at"),
        updated_at: row.get("updated_at"),
    }
}

fn status_from_i16(v: i16) -> SeatStatus {
    match v {
        0 => SeatStatus::Available,
        1 => SeatStatus::Sold,
        2 => SeatStatus::Refunded,
        _ => SeatStatus::Deleted,
    }
}

fn status_to_i16(s: SeatStatus) -> i16 {
    match s {
        SeatStatus::Available => 0,
        SeatStatus::Sold => 1,
        SeatStatus::Refunded => 2,
        SeatStatus::Deleted => 3,
    }
}

fn order_status_from_i16(v: i16) -> OrderStatus {
    match v {
        0 => OrderStatus::Pending,
        1 => OrderStatus::Paid,
        2 => OrderStatus::Refunded,
        _ => OrderStatus::Deleted,
    }
}

fn order_status_to_i16(s: OrderStatus) -> i16 {
    match s {
        OrderStatus::Pending => 0,
        OrderStatus::Paid => 1,
        OrderStatus::Refunded => 2,
        OrderStatus::Deleted => 3,
    }
}

#[async_trait]
impl SeatStore for PgSeatStore {
    async fn get(&self, seat_id: SeatId) -> CoreResult<Option<Seat>> {
        let row = sqlx::query("SELECT * FROM seats WHERE seat_id = $1")
            .bind(seat_id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.as_ref().map(row_to_seat))
    }

    async fn by_tag(&self, tag: &TrainTag) -> CoreResult<Vec<Seat>> {
        let rows = sqlx::query("SELECT * FROM seats WHERE train_tag = $1 AND status != $2")
            .bind(tag)
            .bind(status_to_i16(SeatStatus::Deleted))
            .fetch_all(&self.pool)
            .await?;
        Ok(rows.iter().map(row_to_seat).collect())
    }

    async fn cas_status(
        &self,
        seat_id: SeatId,
        expected_version: Version,
        new_status: SeatStatus,
    ) -> CoreResult<bool> {
        if expected_version < 0 {
            return Ok(false);
        }
        let result = sqlx::query(
            "UPDATE seats SET status = $1, version = version + 1, updated_at = $2 \
             WHERE seat_id = $3 AND status = $4 AND version = $5",
        )
        .bind(status_to_i16(new_status))
        .bind(Utc::now())
        .bind(seat_id)
        .bind(status_to_i16(SeatStatus::Available))
        .bind(expected_version)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn begin(&self) -> CoreResult<Box<dyn SeatTransaction>> {
        let tx = self.pool.begin().await?;
        Ok(Box::new(PgSeatTransaction { tx }))
    }

    async fn distinct_tags(&self) -> CoreResult<Vec<TrainTag>> {
        let rows = sqlx::query("SELECT DISTINCT train_tag FROM seats WHERE status != $1")
            .bind(status_to_i16(SeatStatus::Deleted))
            .fetch_all(&self.pool)
            .await?;
        Ok(rows.iter().map(|r| r.get("train_tag")).collect())
    }

    async fn upsert_order(&self, order: &Order) -> CoreResult<()> {
        sqlx::query(
            "INSERT INTO orders (order_id, user_ref, seat_id, total_price, status, created_at, updated_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7) \
             ON CONFLICT (order_id) DO UPDATE SET \
               user_ref = EXCLUDED.user_ref, \
               seat_id = EXCLUDED.seat_id, \
               total_price = EXCLUDED.total_price, \
               status = EXCLUDED.status, \
               updated_at = EXCLUDED.updated_at",
        )
        .bind(&order.order_id)
        .bind(&order.user_ref)
        .bind(order.seat_id)
        .bind(order.total_price)
        .bind(order_status_to_i16(order.status))
        .bind(order.created_at)
        .bind(order.updated_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn get_order(&self, order_id: &str) -> CoreResult<Option<Order>> {
        let row = sqlx::query("SELECT * FROM orders WHERE order_id = $1")
            .bind(order_id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.as_ref().map(row_to_order))
    }

    async fn count_orders(&self) -> CoreResult<usize> {
        let row = sqlx::query("SELECT COUNT(*) AS n FROM orders")
            .fetch_one(&self.pool)
            .await?;
        let n: i64 = row.get("n");
        Ok(n as usize)
    }
}

struct PgSeatTransaction {
    tx: Transaction<'static, Postgres>,
}

#[async_trait]
impl SeatTransaction for PgSeatTransaction {
    async fn get(&mut self, seat_id: SeatId) -> CoreResult<Option<Seat>> {
        let row = sqlx::query("SELECT * FROM seats WHERE seat_id = $1 FOR UPDATE")
            .bind(seat_id)
            .fetch_optional(&mut *self.tx)
            .await?;
        Ok(row.as_ref().map(row_to_seat))
    }

    async fn cas_status_retry(
        &mut self,
        seat_id: SeatId,
        new_status: SeatStatus,
        max_retries: u32,
        cancel: &CancellationToken,
    ) -> CoreResult<bool> {
        for attempt in 0..=max_retries {
            let seat = match self.get(seat_id).await? {
                Some(s) => s,
                None => return Ok(false),
            };
            if !seat.is_available() {
                return Ok(false);
            }
            let result = sqlx::query(
                "UPDATE seats SET status = $1, version = version + 1, updated_at = $2 \
                 WHERE seat_id = $3 AND status = $4 AND version = $5",
            )
            .bind(status_to_i16(new_status))
            .bind(Utc::now())
            .bind(seat_id)
            .bind(status_to_i16(SeatStatus::Available))
            .bind(seat.version)
            .execute(&mut *self.tx)
            .await?;
            if result.rows_affected() > 0 {
                return Ok(true);
            }
            if attempt < max_retries {
                tokio::select! {
                    _ = cancel.cancelled() => return Err(CoreError::Cancelled),
                    _ = tokio::time::sleep(Duration::from_millis(10)) => {}
                }
            }
        }
        Ok(false)
    }

    async fn commit(self: Box<Self>) -> CoreResult<()> {
        self.tx.commit().await?;
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> CoreResult<()> {
        self.tx.rollback().await?;
        Ok(())
    }
}

// ---------------------------------------------------------------------
// In-memory stand-in used by orchestrator/read-through unit tests
// ---------------------------------------------------------------------

#[derive(Clone, Default)]
pub struct InMemorySeatStore {
    seats: Arc<DashMap<SeatId, Seat>>,
    orders: Arc<DashMap<String, Order>>,
}

impl InMemorySeatStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn seed(&self, seat: Seat) {
        self.seats.insert(seat.seat_id, seat);
    }

    async fn get_inner(&self, seat_id: SeatId) -> CoreResult<Option<Seat>> {
        Ok(self.seats.get(&seat_id).map(|s| s.clone()))
    }

    fn cas_status_inner(
        &self,
        seat_id: SeatId,
        expected_version: Version,
        new_status: SeatStatus,
    ) -> CoreResult<bool> {
        if expected_version < 0 {
            return Ok(false);
        }
        let mut entry = match self.seats.get_mut(&seat_id) {
            Some(e) => e,
            None => return Ok(false),
        };
        if entry.status != SeatStatus::Available || entry.version != expected_version {
            return Ok(false);
        }
        entry.status = new_status;
        entry.version += 1;
        entry.updated_at = Utc::now();
        Ok(true)
    }
}

#[async_trait]
impl SeatStore for InMemorySeatStore {
    async fn get(&self, seat_id: SeatId) -> CoreResult<Option<Seat>> {
        self.get_inner(seat_id).await
    }

    async fn by_tag(&self, tag: &TrainTag) -> CoreResult<Vec<Seat>> {
        Ok(self
            .seats
            .iter()
            .filter(|e| &e.train_tag == tag && e.status != SeatStatus::Deleted)
            .map(|e| e.clone())
            .collect())
    }

    async fn cas_status(
        &self,
        seat_id: SeatId,
        expected_version: Version,
        new_status: SeatStatus,
    ) -> CoreResult<bool> {
        self.cas_status_inner(seat_id, expected_version, new_status)
    }

    async fn begin(&self) -> CoreResult<Box<dyn SeatTransaction>> {
        Ok(Box::new(InMemorySeatTransaction {
            seats: self.seats.clone(),
            undo: Vec::new(),
        }))
    }

    async fn distinct_tags(&self) -> CoreResult<Vec<TrainTag>> {
        let mut tags: Vec<TrainTag> = self
            .seats
            .iter()
            .filter(|e| e.status != SeatStatus::Deleted)
            .map(|e| e.train_tag.clone())
            .collect();
        tags.sort();
        tags.dedup();
        Ok(tags)
    }

    async fn upsert_order(&self, order: &Order) -> CoreResult<()> {
        self.orders.insert(order.order_id.clone(), order.clone());
        Ok(())
    }

    async fn get_order(&self, order_id: &str) -> CoreResult<Option<Order>> {
        Ok(self.orders.get(order_id).map(|o| o.clone()))
    }

    async fn count_orders(&self) -> CoreResult<usize> {
        Ok(self.orders.len())
    }
}

/// Mirrors the rollback semantics of a real `sqlx::Transaction` by keeping
/// an undo log of every seat this transaction mutated, replayed in reverse
/// on `rollback`.
struct InMemorySeatTransaction {
    seats: Arc<DashMap<SeatId, Seat>>,
    undo: Vec<(SeatId, Seat)>,
}

impl InMemorySeatTransaction {
    fn cas_status(
        &self,
        seat_id: SeatId,
        expected_version: Version,
        new_status: SeatStatus,
    ) -> CoreResult<bool> {
        if expected_version < 0 {
            return Ok(false);
        }
        let mut entry = match self.seats.get_mut(&seat_id) {
            Some(e) => e,
            None => return Ok(false),
        };
        if entry.status != SeatStatus::Available || entry.version != expected_version {
            return Ok(false);
        }
        entry.status = new_status;
        entry.version += 1;
        entry.updated_at = Utc::now();
        Ok(true)
    }
}

#[async_trait]
impl SeatTransaction for InMemorySeatTransaction {
    async fn get(&mut self, seat_id: SeatId) -> CoreResult<Option<Seat>> {
        Ok(self.seats.get(&seat_id).map(|s| s.clone()))
    }

    async fn cas_status_retry(
        &mut self,
        seat_id: SeatId,
        new_status: SeatStatus,
        max_retries: u32,
        cancel: &CancellationToken,
    ) -> CoreResult<bool> {
        for attempt in 0..=max_retries {
            let seat = match self.get(seat_id).await? {
                Some(s) => s,
                None => return Ok(false),
            };
            if !seat.is_available() {
                return Ok(false);
            }
            self.undo.push((seat_id, seat.clone()));
            if self.cas_status(seat_id, seat.version, new_status)? {
                return Ok(true);
            }
            self.undo.pop();
            if attempt < max_retries {
                tokio::select! {
                    _ = cancel.cancelled() => return Err(CoreError::Cancelled),
                    _ = tokio::time::sleep(Duration::from_millis(10)) => {}
                }
            }
        }
        Ok(false)
    }

    async fn commit(self: Box<Self>) -> CoreResult<()> {
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> CoreResult<()> {
        for (seat_id, original) in self.undo.into_iter().rev() {
            self.seats.insert(seat_id, original);
        }
        Ok(())
    }
}
