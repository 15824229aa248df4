use crate::host::HostHandle;
use crate::simulation::{Owner, Placement, Vec3};
use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        Query, State,
    },
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::get,
    Router,
};
use serde::Deserialize;
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{error, info, warn};
use uuid::Uuid;

/// Query parameters for WebSocket upgrade
///
/// Coordinates are where the owner enters the world; they default to the
/// world origin at ground level.
#[derive(Debug, Deserialize)]
pub struct WsQuery {
    pub owner: Uuid,
    pub name: String,
    #[serde(default)]
    pub x: f64,
    #[serde(default = "default_y")]
    pub y: f64,
    #[serde(default)]
    pub z: f64,
    #[serde(default)]
    pub yaw: f32,
}

fn default_y() -> f64 {
    64.0
}

impl WsQuery {
    fn placement(&self) -> Placement {
        Placement {
            position: Vec3::new(self.x, self.y, self.z),
            yaw: self.yaw,
        }
    }
}

/// Shared application state for WebSocket handler
#[derive(Clone)]
pub struct WsAppState {
    pub host: HostHandle,
}

/// GET /ws?owner=<uuid>&name=<name> - WebSocket upgrade handler
pub async fn ws_handler(
    Query(params): Query<WsQuery>,
    State(state): State<Arc<WsAppState>>,
    ws: WebSocketUpgrade,
) -> Response {
    let name = params.name.trim();
    if name.is_empty() {
        return (StatusCode::BAD_REQUEST, "owner name is required").into_response();
    }
    let placement = params.placement();
    if !placement.position.is_finite() || !placement.yaw.is_finite() {
        return (StatusCode::BAD_REQUEST, "invalid placement").into_response();
    }

    let owner = Owner::new(params.owner, name);
    info!(owner = %owner, "WebSocket upgrade request received");
    ws.on_upgrade(move |socket| handle_socket(socket, state, owner, placement))
}

/// Create WebSocket router
pub fn create_ws_router(state: Arc<WsAppState>) -> Router {
    Router::new()
        .route("/ws", get(ws_handler))
        .with_state(state)
}

/// Handle one owner's connection from join to disconnect
async fn handle_socket(mut socket: WebSocket, state: Arc<WsAppState>, owner: Owner, placement: Placement) {
    // Subscribe before the snapshot so no broadcast falls between the two
    let mut frames_rx = state.host.subscribe();

    let existing = match state.host.snapshot().await {
        Ok(frames) => frames,
        Err(e) => {
            error!(owner = %owner, error = %e, "Failed to snapshot live companions");
            return;
        }
    };
    for frame in existing {
        if let Err(e) = socket.send(Message::Binary(frame)).await {
            warn!(owner = %owner, error = %e, "Failed to send companion snapshot");
            return;
        }
    }

    if let Err(e) = state.host.join(owner.clone(), placement) {
        error!(owner = %owner, error = %e, "Failed to join owner");
        return;
    }

    info!(owner = %owner, "WebSocket connection established");

    loop {
        tokio::select! {
            Some(msg) = socket.recv() => {
                match msg {
                    Ok(Message::Binary(bytes)) => {
                        if let Err(e) = state.host.inbound(owner.id, bytes) {
                            error!(owner = %owner, error = %e, "Failed to queue inbound frame");
                            break;
                        }
                    }
                    Ok(Message::Close(_)) => {
                        info!(owner = %owner, "WebSocket client disconnected");
                        break;
                    }
                    Ok(Message::Ping(data)) => {
                        if let Err(e) = socket.send(Message::Pong(data)).await {
                            error!(owner = %owner, error = %e, "Failed to send pong");
                            break;
                        }
                    }
                    Ok(_) => {
                        // Ignore text, pong messages
                    }
                    Err(e) => {
                        warn!(owner = %owner, error = %e, "WebSocket error");
                        break;
                    }
                }
            }

            result = frames_rx.recv() => {
                match result {
                    Ok(frame) => {
                        if let Err(e) = socket.send(Message::Binary(frame)).await {
                            error!(owner = %owner, error = %e, "Failed to send broadcast frame");
                            break;
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        warn!(owner = %owner, skipped = skipped, "WebSocket lagged, skipped broadcasts");
                    }
                    Err(broadcast::error::RecvError::Closed) => {
                        error!("Broadcast channel closed");
                        break;
                    }
                }
            }

            else => {
                break;
            }
        }
    }

    if let Err(e) = state.host.disconnect(owner.id) {
        warn!(owner = %owner, error = %e, "Failed to queue disconnect");
    }
    info!(owner = %owner, "WebSocket connection closed");
}
