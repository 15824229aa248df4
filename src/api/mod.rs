// WebSocket transport for owners and observers

pub mod websocket;

pub use websocket::{create_ws_router, ws_handler, WsAppState};

use axum::Router;
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};

/// Full HTTP router with CORS applied
pub fn create_router(state: Arc<WsAppState>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    create_ws_router(state).layer(cors)
}
