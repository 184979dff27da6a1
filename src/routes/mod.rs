//! Router assembly.
//!
//! SYSTEM CONTEXT
//! ==============
//! One Axum router carries the realtime socket at `/api/ws`, the two
//! privileged board endpoints, and a health probe. Requests are traced
//! through `tower_http`.

pub mod boards;
pub mod ws;

use axum::Router;
use axum::http::StatusCode;
use axum::routing::{get, post};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::state::AppState;

pub fn app(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/api/ws", get(ws::handle_ws))
        .route("/api/boards/{id}/ws-users", get(boards::ws_users))
        .route("/api/boards/{id}/events", post(boards::post_event))
        .route("/healthz", get(healthz))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn healthz() -> StatusCode {
    StatusCode::OK
}
