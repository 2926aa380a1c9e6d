//! WebSocket connection lifecycle: `HELLO` handshake, catch-up pull, and the
//! live duplex loop that interleaves client frames, heartbeat, and
//! bus-driven delivery of other devices' commits.

use std::sync::Arc;
use std::time::Duration;

use axum::extract::ws::{Message, WebSocket};
use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio::time::Instant;
use vectorsync_engine::{ReorderBuffer, ReorderOutcome, Session, SessionState};

use crate::auth::TokenVerifier;
use crate::config::Config;
use crate::db;
use crate::registry::EngineRuntime;
use crate::websocket::{ClientMessage, ServerMessage, SessionRegistry};

use super::push::handle_push;
use super::pull::{handle_pull, PullQuery};

const PULL_CHUNK_SIZE: usize = 500;
const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(10);

type WsSink = SplitSink<WebSocket, Message>;
type WsStream = SplitStream<WebSocket>;

/// Everything one connection needs: shared runtime state plus the transport.
pub struct WsContext {
    pub pool: sqlx::PgPool,
    pub config: Arc<Config>,
    pub engine: Arc<EngineRuntime>,
    pub sessions: Arc<SessionRegistry>,
    pub verifier: Arc<dyn TokenVerifier>,
}

pub async fn handle_websocket_connection(socket: WebSocket, ctx: Arc<WsContext>) {
    let (mut ws_sender, mut ws_receiver) = socket.split();

    let first = tokio::time::timeout(HANDSHAKE_TIMEOUT, ws_receiver.next()).await;
    let raw_text = match first {
        Ok(Some(Ok(Message::Text(text)))) => text,
        _ => {
            send_frame(&mut ws_sender, &ServerMessage::error(None, "protocol", "expected HELLO within 10s", false)).await.ok();
            return;
        }
    };

    let (hello_id, device_id, owner_id, auth_token, last_known_seq) = match serde_json::from_str::<ClientMessage>(&raw_text) {
        Ok(ClientMessage::Hello { id, device_id, owner_id, auth_token, last_known_seq, .. }) => {
            (id, device_id, owner_id, auth_token, last_known_seq)
        }
        _ => {
            send_frame(&mut ws_sender, &ServerMessage::error(None, "protocol", "expected HELLO", false)).await.ok();
            return;
        }
    };

    let auth = match ctx.verifier.verify(&auth_token) {
        Ok(auth) => auth,
        Err(_) => {
            send_frame(&mut ws_sender, &ServerMessage::error(Some(hello_id), "unauthorized", "invalid token", false)).await.ok();
            return;
        }
    };
    if auth.owner_id != owner_id || auth.device_id != device_id {
        send_frame(&mut ws_sender, &ServerMessage::error(Some(hello_id), "unauthorized", "token does not match declared identity", false)).await.ok();
        return;
    }

    let now = chrono::Utc::now().timestamp_millis() as u64;

    // A device that dropped its transport recently keeps its session_id and
    // last_ack_seq reserved for it; pick that identity back up instead of
    // starting a fresh one. A resumed session must still be `Live` (not
    // `Draining`) to accept the `CatchingUp` transition; a backpressured
    // session that disconnected gets a fresh identity instead.
    let resumed = ctx
        .sessions
        .try_resume(&owner_id, &device_id, ctx.config.reconnect_window_secs)
        .filter(|(id, _)| ctx.sessions.transition(id, SessionState::CatchingUp).is_ok());

    let (session_id, baseline_ack, fresh_session) = match resumed {
        Some((id, last_ack_seq)) => (id, last_ack_seq, None),
        None => {
            let session_id = uuid::Uuid::new_v4().to_string();
            let mut session = Session::new(session_id.clone(), owner_id.clone(), device_id.clone(), now);
            if session.transition(SessionState::CatchingUp).is_err() {
                return;
            }
            (session_id, 0, Some(session))
        }
    };

    let head_seq = ctx.engine.head_seq(&owner_id);
    if send_frame(
        &mut ws_sender,
        &ServerMessage::HelloOk { id: hello_id, session_id: session_id.clone(), server_head_seq: head_seq, server_time: now },
    )
    .await
    .is_err()
    {
        return;
    }

    let since_seq = last_known_seq.max(baseline_ack);
    if send_catch_up(&mut ws_sender, &ctx, &owner_id, since_seq).await.is_err() {
        return;
    }

    // The full catch-up pull already delivered every committed op the peer
    // queue held for this device; nothing further to replay from it.
    let queued = ctx.engine.drain_queue(&device_id);
    if !queued.is_empty() {
        tracing::debug!(%device_id, drained = queued.len(), "cleared server-edge queue on reconnect");
    }

    let (tx, mut rx) = mpsc::channel::<ServerMessage>(ctx.config.session_outbound_buffer);
    let subscription = ctx.engine.subscribe(&owner_id);

    match fresh_session {
        Some(mut session) => {
            session.ack(head_seq);
            if session.transition(SessionState::Live).is_err() {
                return;
            }
            ctx.sessions.register(session, tx.clone());
        }
        None => {
            ctx.sessions.ack(&session_id, head_seq);
            if ctx.sessions.transition(&session_id, SessionState::Live).is_err() {
                return;
            }
            ctx.sessions.resume(&session_id, tx.clone());
        }
    }

    tracing::info!(%session_id, %owner_id, %device_id, "session live");

    run_session_loop(&mut ws_sender, &mut ws_receiver, &ctx, &owner_id, &device_id, &session_id, tx, &mut rx, subscription).await;

    ctx.engine.unsubscribe(&owner_id, subscription);
    // Held, not destroyed: a reconnect within `reconnect_window_secs` resumes
    // this exact session_id (see `try_resume` above). The periodic reaper in
    // `main.rs` is what actually tears it down once the window elapses.
    ctx.sessions.disconnect(&session_id, &owner_id);
    tracing::info!(%session_id, %owner_id, %device_id, "session disconnected, held for reconnect");
}

#[allow(clippy::too_many_arguments)]
async fn run_session_loop(
    ws_sender: &mut WsSink,
    ws_receiver: &mut WsStream,
    ctx: &WsContext,
    owner_id: &str,
    device_id: &str,
    session_id: &str,
    tx: mpsc::Sender<ServerMessage>,
    rx: &mut mpsc::Receiver<ServerMessage>,
    subscription: vectorsync_engine::Subscription,
) {
    let mut heartbeat = tokio::time::interval(Duration::from_secs(ctx.config.heartbeat_interval_secs.max(1)));
    let mut bus_poll = tokio::time::interval(Duration::from_millis(250));
    let mut last_client_activity = Instant::now();
    let miss_deadline = Duration::from_secs(ctx.config.heartbeat_interval_secs * ctx.config.heartbeat_miss_limit as u64);

    let next_expected = ctx.sessions.last_ack_seq(session_id).unwrap_or(0) + 1;
    let mut reorder = ReorderBuffer::with_config(
        next_expected,
        ctx.config.reorder_buffer_size,
        ctx.config.reorder_buffer_timeout_ms,
    );

    loop {
        tokio::select! {
            incoming = ws_receiver.next() => {
                match incoming {
                    Some(Ok(Message::Text(text))) => {
                        last_client_activity = Instant::now();
                        if let Some(reply) = dispatch_client_message(ctx, owner_id, device_id, session_id, &text).await {
                            let _ = tx.send(reply).await;
                        }
                    }
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        tracing::warn!(%session_id, error = %e, "websocket read error");
                        break;
                    }
                }
            }

            outgoing = rx.recv() => {
                match outgoing {
                    Some(msg) => { if send_frame(ws_sender, &msg).await.is_err() { break; } }
                    None => break,
                }
            }

            _ = heartbeat.tick() => {
                if last_client_activity.elapsed() > miss_deadline {
                    tracing::info!(%session_id, "heartbeat missed past limit, closing");
                    break;
                }
            }

            _ = bus_poll.tick() => {
                let last_ack = ctx.sessions.last_ack_seq(session_id).unwrap_or(0);
                let now_ms = chrono::Utc::now().timestamp_millis() as u64;
                let mut outcomes = Vec::new();

                for logged in ctx.engine.drain_bus(owner_id, subscription) {
                    if logged.op.op_id().device_id == device_id || logged.op_seq <= last_ack {
                        continue;
                    }
                    outcomes.push(reorder.ingest(logged.op_seq, logged, now_ms));
                }
                outcomes.extend(reorder.check_timeout(now_ms));

                let (overflowed, gap_timeout) = deliver_reorder_outcomes(&tx, session_id, outcomes);

                if overflowed {
                    let _ = ctx.sessions.transition(session_id, SessionState::Draining);
                    tracing::warn!(%session_id, "outbound buffer full, session draining");
                    break;
                }
                if gap_timeout {
                    let _ = ctx.sessions.transition(session_id, SessionState::CatchingUp);
                    break;
                }
            }
        }
    }
}

/// Feed one round of reorder outcomes to the outbound channel. Returns
/// `(overflowed, gap_timeout)`; a gap timeout means the buffer gave up
/// waiting for a missing `op_seq` and the session must fall back to a full
/// catch-up pull rather than risk delivering out of order.
fn deliver_reorder_outcomes(
    tx: &mpsc::Sender<ServerMessage>,
    session_id: &str,
    outcomes: Vec<ReorderOutcome<vectorsync_engine::LoggedOp>>,
) -> (bool, bool) {
    let mut overflowed = false;
    let mut gap_timeout = false;

    'outer: for outcome in outcomes {
        match outcome {
            ReorderOutcome::Ready(items) => {
                for item in items {
                    let deliver = ServerMessage::Deliver {
                        op_seq: item.op_seq,
                        op: item.op,
                        merged_state_digest: item.merged_state_digest,
                    };
                    if tx.try_send(deliver).is_err() {
                        overflowed = true;
                        break 'outer;
                    }
                }
            }
            ReorderOutcome::Buffered => {}
            ReorderOutcome::GapTimeout { expected, dropped } => {
                tracing::warn!(%session_id, expected, dropped, "reorder buffer gap timed out, forcing catch-up");
                gap_timeout = true;
                break 'outer;
            }
        }
    }

    (overflowed, gap_timeout)
}

async fn send_catch_up(
    ws_sender: &mut WsSink,
    ctx: &WsContext,
    owner_id: &str,
    since_seq: u64,
) -> Result<(), axum::Error> {
    let mut since = since_seq;
    loop {
        let chunk = handle_pull(
            &ctx.engine,
            PullQuery { owner_id: owner_id.to_string(), since_seq: since, limit: Some(PULL_CHUNK_SIZE) },
        );
        let has_more = chunk.has_more;
        let advanced = chunk.ops.len() as u64;
        let ops = chunk.ops;

        send_frame(ws_sender, &ServerMessage::PullChunk { id: "catch-up".to_string(), ops, has_more }).await?;

        if !has_more {
            return Ok(());
        }
        since += advanced;
    }
}

async fn dispatch_client_message(
    ctx: &WsContext,
    owner_id: &str,
    device_id: &str,
    session_id: &str,
    text: &str,
) -> Option<ServerMessage> {
    let msg: ClientMessage = match serde_json::from_str(text) {
        Ok(msg) => msg,
        Err(e) => return Some(ServerMessage::error(None, "protocol", format!("malformed frame: {e}"), false)),
    };

    match msg {
        ClientMessage::Hello { id, .. } => {
            Some(ServerMessage::error(Some(id), "protocol", "unexpected second HELLO", false))
        }

        ClientMessage::Push { id, batch_id, ops } => {
            for op in &ops {
                if op.owner_id() != owner_id {
                    return Some(ServerMessage::error(Some(id), "unauthorized", "op owner_id does not match session", false));
                }
            }
            match handle_push(&ctx.pool, &ctx.engine, &ctx.sessions, &ops).await {
                Ok(acks) => Some(ServerMessage::PushResult { id, batch_id, acks }),
                Err(e) => Some(ServerMessage::error(Some(id), e.code(), e.to_string(), e.retryable())),
            }
        }

        ClientMessage::Pull { id, since_seq, limit } => {
            let response = handle_pull(&ctx.engine, PullQuery { owner_id: owner_id.to_string(), since_seq, limit: Some(limit) });
            Some(ServerMessage::PullChunk { id, ops: response.ops, has_more: response.has_more })
        }

        ClientMessage::Ack { up_to_seq, .. } => {
            ctx.sessions.ack(session_id, up_to_seq);
            let session = Session {
                last_ack_seq: up_to_seq,
                ..Session::new(session_id, owner_id, device_id, 0)
            };
            if let Err(e) = db::upsert_session(&ctx.pool, &session).await {
                tracing::warn!(error = %e, "failed to persist session ack");
            }
            None
        }

        ClientMessage::Ping { id, nonce, .. } => {
            let sent_at = chrono::Utc::now().timestamp_millis() as u64;
            Some(ServerMessage::Pong { id, nonce, sent_at })
        }
    }
}

async fn send_frame(ws_sender: &mut WsSink, msg: &ServerMessage) -> Result<(), axum::Error> {
    let text = serde_json::to_string(msg).expect("ServerMessage always serializes");
    ws_sender.send(Message::Text(text.into())).await
}
