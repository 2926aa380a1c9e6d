//! Sync endpoint routes: a stateless HTTP `push`/`pull` fallback plus the
//! duplex WebSocket upgrade.

use std::sync::Arc;

use axum::{
    extract::{ws::WebSocketUpgrade, State},
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};

use crate::auth::AuthContext;
use crate::error::Result;
use crate::handlers::{handle_pull, handle_push, handle_websocket_connection, PullQuery, PullResponse, PushRequest, PushResponse};
use crate::handlers::websocket::WsContext;
use crate::AppState;

/// Create sync routes.
pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/sync/push", post(push_handler))
        .route("/sync/pull", get(pull_handler))
        .route("/sync/ws", get(websocket_handler))
}

/// POST /sync/push - stateless push fallback for clients not holding a
/// live session.
async fn push_handler(
    State(state): State<AppState>,
    auth: AuthContext,
    Json(request): Json<PushRequest>,
) -> Result<Json<PushResponse>> {
    for op in &request.ops {
        if op.owner_id() != &auth.owner_id {
            return Err(crate::error::AppError::Unauthorized);
        }
    }
    let acks = handle_push(&state.pool, &state.engine, &state.sessions, &request.ops).await?;
    Ok(Json(PushResponse { batch_id: request.batch_id, acks }))
}

/// GET /sync/pull - stateless pull fallback.
async fn pull_handler(
    State(state): State<AppState>,
    auth: AuthContext,
    axum::extract::Query(mut query): axum::extract::Query<PullQuery>,
) -> Result<Json<PullResponse>> {
    if query.owner_id != auth.owner_id {
        return Err(crate::error::AppError::Unauthorized);
    }
    query.owner_id = auth.owner_id;
    Ok(Json(handle_pull(&state.engine, query)))
}

/// GET /sync/ws - the duplex sync channel. Authentication happens inside
/// the `HELLO` handshake, not at upgrade time, since the token travels in
/// the first frame rather than a header for parity with non-browser clients.
async fn websocket_handler(State(state): State<AppState>, ws: WebSocketUpgrade) -> impl IntoResponse {
    let ctx = Arc::new(WsContext {
        pool: state.pool.clone(),
        config: state.config.clone(),
        engine: state.engine.clone(),
        sessions: state.sessions.clone(),
        verifier: state.verifier.clone(),
    });

    ws.on_upgrade(move |socket| handle_websocket_connection(socket, ctx))
}
