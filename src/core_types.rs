//! Core type aliases shared across every module.
//!
//! These carry semantic meaning beyond the primitive they wrap and give us a
//! single place to evolve representations later (e.g. seat_id to a newtype).

use rust_decimal::Decimal;

/// Opaque seat identifier, globally unique.
pub type SeatId = i64;

/// A train identifier. Kept string-valued: the set of trains is open and
/// managed by an upstream admin system, not enumerated here.
pub type TrainTag = String;

/// Opaque, externally-issued user identity. Authentication itself is out of
/// scope; we only carry the reference through.
pub type UserRef = String;

/// Order identifier, globally unique, also the broker consumer's
/// idempotency key.
pub type OrderId = String;

/// Monetary amount. `rust_decimal::Decimal` avoids floating-point error in
/// price arithmetic.
pub type Money = Decimal;

/// Optimistic-concurrency version counter. Starts at 0, incremented by
/// exactly 1 on every successful state transition.
pub type Version = i64;
