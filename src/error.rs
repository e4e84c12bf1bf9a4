//! Crate-wide error type and its mapping onto the HTTP response envelope.

use thiserror::Error;

use crate::http::types::{ApiError, error_codes};

/// Every failure mode named by the purchase and read-through flows.
#[derive(Debug, Error)]
pub enum CoreError {
    #[error("rate limit exceeded")]
    Throttled,

    #[error("not found")]
    NotFound,

    #[error("empty result")]
    Empty,

    #[error("resource busy, try again")]
    Busy,

    #[error("seat not available")]
    Unavailable,

    #[error("lost race to another buyer")]
    LostRace,

    #[error("cache sync failed: {0}")]
    CacheSyncFailed(String),

    #[error("broker send failed: {0}")]
    BrokerSendFailed(String),

    #[error("store failure: {0}")]
    StoreFailure(String),

    #[error("operation cancelled")]
    Cancelled,

    #[error(transparent)]
    Sqlx(#[from] sqlx::Error),

    #[error(transparent)]
    Redis(#[from] redis::RedisError),

    #[error(transparent)]
    Lapin(#[from] lapin::Error),
}

impl From<CoreError> for ApiError {
    fn from(err: CoreError) -> Self {
        match err {
            CoreError::Throttled => ApiError::rate_limited("rate limit exceeded"),
            CoreError::NotFound | CoreError::Empty => {
                ApiError::not_found(err.to_string())
            }
            CoreError::Busy => ApiError::conflict(error_codes::SEAT_BUSY, "seat is busy, retry"),
            CoreError::Unavailable => {
                ApiError::conflict(error_codes::SEAT_UNAVAILABLE, "seat not available")
            }
            CoreError::LostRace => {
                ApiError::conflict(error_codes::LOST_RACE, "lost race to another buyer")
            }
            CoreError::Cancelled => ApiError::internal("operation cancelled"),
            CoreError::CacheSyncFailed(msg) => ApiError::internal(format!("cache sync: {msg}")),
            CoreError::BrokerSendFailed(msg) => ApiError::internal(format!("broker: {msg}")),
            CoreError::StoreFailure(msg) => ApiError::db_error(msg),
            CoreError::Sqlx(e) => ApiError::db_error(e.to_string()),
            CoreError::Redis(e) => ApiError::internal(format!("redis: {e}")),
            CoreError::Lapin(e) => ApiError::internal(format!("amqp: {e}")),
        }
    }
}

pub type CoreResult<T> = Result<T, CoreError>;
