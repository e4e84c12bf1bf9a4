//! Domain entities: `Seat` and `Order`, plus their status state machines.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::core_types::{Money, OrderId, SeatId, TrainTag, UserRef, Version};

/// Lifecycle states of a seat. Transitions are restricted: a seat only ever
/// moves `Available -> Sold -> Refunded`, or `Available -> Deleted`. Every
/// successful transition increments `version` by exactly 1.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum SeatStatus {
    Available,
    Sold,
    Refunded,
    Deleted,
}

impl SeatStatus {
    /// Whether `self -> next` is a legal transition.
    pub fn can_transition_to(self, next: SeatStatus) -> bool {
        matches!(
            (self, next),
            (SeatStatus::Available, SeatStatus::Sold)
                | (SeatStatus::Available, SeatStatus::Deleted)
                | (SeatStatus::Sold, SeatStatus::Refunded)
        )
    }
}

/// A single seat on a single train. Created by admin bulk load; mutated only
/// through optimistic-locked transitions in [`crate::seat_store::SeatStore`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Seat {
    pub seat_id: SeatId,
    pub train_tag: TrainTag,
    pub seat_number: String,
    pub price: Money,
    pub status: SeatStatus,
    pub version: Version,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Seat {
    pub fn is_available(&self) -> bool {
        self.status == SeatStatus::Available
    }
}

/// Order lifecycle. `Pending` is the only state this crate ever writes;
/// `Paid` is applied by an external payment callback out of scope here.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderStatus {
    Pending,
    Paid,
    Refunded,
    Deleted,
}

/// An order references exactly one seat. The seat referenced by any
/// `Pending`/`Paid` order has status `Sold`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Order {
    pub order_id: OrderId,
    pub user_ref: UserRef,
    pub seat_id: SeatId,
    pub total_price: Money,
    pub status: OrderStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Order {
    pub fn new_pending(order_id: OrderId, user_ref: UserRef, seat: &Seat) -> Self {
        let now = Utc::now();
        Self {
            order_id,
            user_ref,
            seat_id: seat.seat_id,
            total_price: seat.price,
            status: OrderStatus::Pending,
            created_at: now,
            updated_at: now,
        }
    }
}

/// Diagnostic read model reported by `GET /ticket/cache/stats`. Not part of
/// any invariant; purely observability.
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct StockSnapshot {
    pub train_tag: TrainTag,
    pub local_cache_count: usize,
    pub distributed_cache_count: usize,
}
