//! trainrush - a high-concurrency train-ticket purchasing backend.
//!
//! # Modules
//!
//! - [`config`] - typed, validated application configuration
//! - [`error`] - crate-wide error type and HTTP mapping
//! - [`logging`] - structured `tracing` initialization
//! - [`core_types`] - shared type aliases
//! - [`models`] - `Seat`/`Order` domain entities and status state machines
//! - [`local_cache`] - in-process seat-list cache
//! - [`protector`] - cache-defense primitives (single-flight, Bloom, limiter)
//! - [`distributed_cache`] - remote hash-store cache
//! - [`safe_lock`] - distributed per-seat mutex
//! - [`seat_store`] - optimistic-locked relational seat/order store
//! - [`order_broker`] - order work queue producer/consumer
//! - [`read_through`] - query path across the three cache tiers
//! - [`orchestrator`] - the end-to-end buy flow
//! - [`http`] - Axum gateway

pub mod config;
pub mod core_types;
pub mod distributed_cache;
pub mod error;
pub mod http;
pub mod local_cache;
pub mod logging;
pub mod models;
pub mod order_broker;
pub mod orchestrator;
pub mod protector;
pub mod read_through;
pub mod safe_lock;
pub mod seat_store;

pub use config::AppConfig;
pub use error::{CoreError, CoreResult};
pub use models::{Order, OrderStatus, Seat, SeatStatus};
pub use orchestrator::PurchaseOrchestrator;
