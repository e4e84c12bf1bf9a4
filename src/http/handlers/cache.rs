//! `POST /ticket/cache/warmup` and `GET /ticket/cache/stats`.

use axum::Json;
use axum::extract::{Query, State};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::http::state::AppState;
use crate::http::types::{ApiError, ApiResult, ok};
use crate::models::StockSnapshot;

#[derive(Debug, Deserialize, ToSchema)]
pub struct WarmupRequest {
    pub train_tag: String,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct WarmupResponse {
    pub train_tag: String,
    pub seats_loaded: usize,
}

#[utoipa::path(
    post,
    path = "/ticket/cache/warmup",
    request_body = WarmupRequest,
    responses((status = 200, description = "Cache warmed for the given train"))
)]
pub async fn warmup(
    State(state): State<AppState>,
    Json(req): Json<WarmupRequest>,
) -> ApiResult<WarmupResponse> {
    let seats = state
        .read_through
        .list_by_tag(&req.train_tag)
        .await
        .map_err(ApiError::from)?;

    Ok(ok(WarmupResponse {
        train_tag: req.train_tag,
        seats_loaded: seats.len(),
    }))
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct StatsQuery {
    pub train_tag: String,
}

#[utoipa::path(
    get,
    path = "/ticket/cache/stats",
    params(("train_tag" = String, Query, description = "Train identifier")),
    responses((status = 200, description = "Per-tier cache counts for a train"))
)]
pub async fn cache_stats(
    State(state): State<AppState>,
    Query(query): Query<StatsQuery>,
) -> ApiResult<StockSnapshot> {
    let distributed_cache_count = state
        .distributed_cache
        .cache_stats(&query.train_tag)
        .await
        .map_err(ApiError::from)?;

    Ok(ok(StockSnapshot {
        train_tag: query.train_tag.clone(),
        local_cache_count: state.local_cache.len_for(&query.train_tag),
        distributed_cache_count,
    }))
}
