//! Push handler: commits a batch of operations through the shared engine
//! runtime, persists whatever lands, and reports a per-op ack.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use vectorsync_engine::{Operation, PushResult};

use crate::db;
use crate::error::{AppError, Result};
use crate::registry::EngineRuntime;
use crate::websocket::{AckResult, SessionRegistry};

/// Request body for the stateless `POST /sync/push` fallback.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PushRequest {
    pub batch_id: String,
    pub ops: Vec<Operation>,
}

/// Response body for the stateless `POST /sync/push` fallback.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PushResponse {
    pub batch_id: String,
    pub acks: HashMap<String, AckResult>,
}

/// Commit `ops` and persist every newly-committed record and log entry.
///
/// Idempotent replay (an op already committed) is reported as a success ack
/// without touching storage again.
pub async fn handle_push(
    pool: &sqlx::PgPool,
    engine: &EngineRuntime,
    sessions: &SessionRegistry,
    ops: &[Operation],
) -> Result<HashMap<String, AckResult>> {
    let acks = engine.push(ops);
    let mut by_op_id: HashMap<String, AckResult> = HashMap::new();

    for (op, ack) in ops.iter().zip(acks.into_iter()) {
        let key = ack.op_id.to_string();
        match ack.result {
            PushResult::Committed(op_seq) => {
                persist_commit(pool, engine, op, op_seq).await?;
                queue_for_offline_peers(engine, sessions, op);
                by_op_id.insert(key, AckResult::Ok { op_seq });
            }
            PushResult::AlreadyCommitted(op_seq) => {
                by_op_id.insert(key, AckResult::Ok { op_seq });
            }
            PushResult::Rejected(err) => {
                let wrapped = AppError::Engine(err.clone());
                by_op_id.insert(
                    key,
                    AckResult::Err {
                        code: wrapped.code(),
                        message: err.to_string(),
                        retryable: wrapped.retryable(),
                    },
                );
            }
        }
    }

    Ok(by_op_id)
}

/// Append the committed op to the owner's durable log and write through its
/// post-merge record state (a delete leaves a tombstoned record in place,
/// never removes the row outright — that's `expired_tombstones`' job).
async fn persist_commit(
    pool: &sqlx::PgPool,
    engine: &EngineRuntime,
    op: &Operation,
    op_seq: u64,
) -> Result<()> {
    let owner_id = op.owner_id().clone();

    let logged = engine
        .pull(&owner_id, op_seq.saturating_sub(1), 1)
        .into_iter()
        .next()
        .ok_or_else(|| {
            AppError::Internal(format!(
                "committed op_seq {op_seq} missing from in-memory log for owner {owner_id}"
            ))
        })?;
    db::insert_logged_op(pool, &owner_id, &logged).await?;

    let record = engine.get_record(&owner_id, op.record_id()).ok_or_else(|| {
        AppError::Internal(format!(
            "committed record {} missing from in-memory store for owner {owner_id}",
            op.record_id()
        ))
    })?;
    db::upsert_record(pool, &record).await?;

    Ok(())
}

/// A peer device of the same owner that has no live connection right now
/// won't see this commit via bus fan-out, so stash it in its server-edge
/// queue. Multiple edits to the same record while the peer stays offline
/// collapse onto one queue entry rather than growing unbounded.
fn queue_for_offline_peers(engine: &EngineRuntime, sessions: &SessionRegistry, op: &Operation) {
    let owner_id = op.owner_id();
    let origin_device = &op.op_id().device_id;
    let now = chrono::Utc::now().timestamp_millis() as u64;

    for device_id in sessions.offline_peer_devices(owner_id, origin_device) {
        engine.enqueue(&device_id, op.clone(), now);
    }
}
