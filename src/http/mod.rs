//! Axum gateway: router wiring, shared state, response envelope.

pub mod handlers;
pub mod state;
pub mod types;

use axum::Router;
use axum::routing::{get, post};
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

use state::AppState;

#[derive(OpenApi)]
#[openapi(
    paths(
        handlers::ticket::list_seats,
        handlers::ticket::buy_ticket,
        handlers::cache::warmup,
        handlers::cache::cache_stats,
    ),
    components(schemas(
        handlers::ticket::ListQuery,
        handlers::ticket::SeatView,
        handlers::ticket::BuyRequest,
        handlers::ticket::BuyResponse,
        handlers::cache::WarmupRequest,
        handlers::cache::WarmupResponse,
        handlers::cache::StatsQuery,
        crate::models::SeatStatus,
        crate::models::StockSnapshot,
    ))
)]
struct ApiDoc;

pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/ticket/list", get(handlers::ticket::list_seats))
        .route("/ticket/buy", post(handlers::ticket::buy_ticket))
        .route("/ticket/cache/warmup", post(handlers::cache::warmup))
        .route("/ticket/cache/stats", get(handlers::cache::cache_stats))
        .merge(SwaggerUi::new("/swagger-ui").url("/api-docs/openapi.json", ApiDoc::openapi()))
        .with_state(state)
}
