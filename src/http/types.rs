//! Unified HTTP response envelope and error mapping.

use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::Serialize;
use utoipa::ToSchema;

/// Error codes carried in the envelope's `code` field on failure.
pub mod error_codes {
    pub const SUCCESS: i32 = 200;
    pub const INVALID_PARAMETER: i32 = 1001;
    pub const SEAT_UNAVAILABLE: i32 = 1002;
    pub const SEAT_BUSY: i32 = 1003;
    pub const LOST_RACE: i32 = 1004;
    pub const MISSING_AUTH: i32 = 2001;
    pub const NOT_FOUND: i32 = 4001;
    pub const RATE_LIMITED: i32 = 4291;
    pub const INTERNAL_ERROR: i32 = 5000;
    pub const DB_ERROR: i32 = 5001;
}

/// `{code, msg, total, total_page, data}` — the external response contract.
#[derive(Debug, Serialize, ToSchema)]
pub struct ApiResponse<T> {
    pub code: i32,
    pub msg: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub total: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub total_page: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
}

pub fn ok<T>(data: T) -> (StatusCode, Json<ApiResponse<T>>) {
    (
        StatusCode::OK,
        Json(ApiResponse {
            code: error_codes::SUCCESS,
            msg: "ok".to_string(),
            total: None,
            total_page: None,
            data: Some(data),
        }),
    )
}

pub fn ok_paged<T>(data: T, total: i64, page_size: i64) -> (StatusCode, Json<ApiResponse<T>>) {
    let total_page = if page_size > 0 {
        (total + page_size - 1) / page_size
    } else {
        0
    };
    (
        StatusCode::OK,
        Json(ApiResponse {
            code: error_codes::SUCCESS,
            msg: "ok".to_string(),
            total: Some(total),
            total_page: Some(total_page),
            data: Some(data),
        }),
    )
}

#[derive(Debug)]
pub struct ApiError {
    pub status: StatusCode,
    pub code: i32,
    pub message: String,
}

impl ApiError {
    pub fn bad_request(msg: impl Into<String>) -> Self {
        Self {
            status: StatusCode::BAD_REQUEST,
            code: error_codes::INVALID_PARAMETER,
            message: msg.into(),
        }
    }

    pub fn not_found(msg: impl Into<String>) -> Self {
        Self {
            status: StatusCode::NOT_FOUND,
            code: error_codes::NOT_FOUND,
            message: msg.into(),
        }
    }

    pub fn conflict(code: i32, msg: impl Into<String>) -> Self {
        Self {
            status: StatusCode::CONFLICT,
            code,
            message: msg.into(),
        }
    }

    pub fn rate_limited(msg: impl Into<String>) -> Self {
        Self {
            status: StatusCode::TOO_MANY_REQUESTS,
            code: error_codes::RATE_LIMITED,
            message: msg.into(),
        }
    }

    pub fn db_error(msg: impl Into<String>) -> Self {
        Self {
            status: StatusCode::INTERNAL_SERVER_ERROR,
            code: error_codes::DB_ERROR,
            message: msg.into(),
        }
    }

    pub fn internal(msg: impl Into<String>) -> Self {
        Self {
            status: StatusCode::INTERNAL_SERVER_ERROR,
            code: error_codes::INTERNAL_ERROR,
            message: msg.into(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = ApiResponse::<()> {
            code: self.code,
            msg: self.message,
            total: None,
            total_page: None,
            data: None,
        };
        (self.status, Json(body)).into_response()
    }
}

pub type ApiResult<T> = Result<(StatusCode, Json<ApiResponse<T>>), ApiError>;
