//! Pull handler: serves an owner's committed op log tail straight through
//! the shared engine runtime.

use serde::{Deserialize, Serialize};
use vectorsync_engine::Operation;

use crate::registry::EngineRuntime;

/// Query parameters for the stateless `GET /sync/pull` fallback.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PullQuery {
    pub owner_id: String,
    #[serde(default)]
    pub since_seq: u64,
    pub limit: Option<usize>,
}

/// Response body for the stateless `GET /sync/pull` fallback.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PullResponse {
    pub ops: Vec<Operation>,
    pub has_more: bool,
}

const DEFAULT_LIMIT: usize = 100;
const MAX_LIMIT: usize = 1000;

pub fn handle_pull(engine: &EngineRuntime, query: PullQuery) -> PullResponse {
    let limit = query.limit.unwrap_or(DEFAULT_LIMIT).clamp(1, MAX_LIMIT);

    let tail = engine.pull(&query.owner_id, query.since_seq, limit + 1);
    let has_more = tail.len() > limit;
    let ops = tail.into_iter().take(limit).map(|logged| logged.op).collect();

    PullResponse { ops, has_more }
}
