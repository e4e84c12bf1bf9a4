//! `GET /ticket/list` and `POST /ticket/buy`.

use axum::Json;
use axum::extract::{Query, State};
use axum::http::HeaderMap;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use utoipa::ToSchema;

use crate::http::state::AppState;
use crate::http::types::{ApiError, ApiResult, ok};
use crate::models::SeatStatus;

#[derive(Debug, Deserialize, ToSchema)]
pub struct ListQuery {
    pub train_tag: String,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct SeatView {
    pub seat_id: i64,
    pub train_tag: String,
    pub seat_number: String,
    pub price: String,
    pub status: SeatStatus,
}

#[utoipa::path(
    get,
    path = "/ticket/list",
    params(("train_tag" = String, Query, description = "Train identifier")),
    responses((status = 200, description = "Seats for the given train"))
)]
pub async fn list_seats(
    State(state): State<AppState>,
    Query(query): Query<ListQuery>,
) -> ApiResult<Vec<SeatView>> {
    if query.train_tag.trim().is_empty() {
        return Err(ApiError::bad_request("train_tag is required"));
    }

    let seats = state
        .read_through
        .list_by_tag(&query.train_tag)
        .await
        .map_err(ApiError::from)?;

    let views = seats
        .into_iter()
        .map(|s| SeatView {
            seat_id: s.seat_id,
            train_tag: s.train_tag,
            seat_number: s.seat_number,
            price: s.price.to_string(),
            status: s.status,
        })
        .collect();

    Ok(ok(views))
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct BuyRequest {
    pub seat_id: i64,
    pub train_tag: String,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct BuyResponse {
    pub order_id: String,
    pub seat_id: i64,
    pub user_id: String,
    pub status: String,
}

const USER_HEADER: &str = "X-User-Id";

#[utoipa::path(
    post,
    path = "/ticket/buy",
    request_body = BuyRequest,
    responses((status = 200, description = "Purchase succeeded"))
)]
pub async fn buy_ticket(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(req): Json<BuyRequest>,
) -> ApiResult<BuyResponse> {
    let user_id = headers
        .get(USER_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string)
        .ok_or_else(|| {
            ApiError::bad_request(format!("missing {USER_HEADER} header"))
        })?;

    // Per-request token: the HTTP layer doesn't yet propagate client
    // disconnects into cancellation, so this never fires today, but gives
    // the orchestrator a cancellation context to observe as that wiring
    // lands.
    let cancel = CancellationToken::new();
    let order = state
        .orchestrator
        .buy(req.seat_id, user_id.clone(), &cancel)
        .await
        .map_err(ApiError::from)?;

    Ok(ok(BuyResponse {
        order_id: order.order_id,
        seat_id: order.seat_id,
        user_id,
        status: "pending".to_string(),
    }))
}
