//! Wire protocol for the duplex sync channel.
//!
//! Every frame is a self-describing JSON object tagged by `type`, carrying a
//! client-assigned `id` for correlating requests with their responses. The
//! stateless HTTP fallback (`routes::sync`) reuses the same `PUSH`/`PULL`
//! semantics without a session, so the request/response bodies there mirror
//! these shapes directly.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use vectorsync_engine::Operation;

/// Messages a device sends to the server.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    Hello {
        id: String,
        device_id: String,
        owner_id: String,
        auth_token: String,
        last_known_seq: u64,
        protocol_version: u32,
    },
    Push {
        id: String,
        batch_id: String,
        ops: Vec<Operation>,
    },
    Pull {
        id: String,
        since_seq: u64,
        limit: usize,
    },
    Ack {
        id: String,
        up_to_seq: u64,
    },
    Ping {
        id: String,
        nonce: String,
        sent_at: u64,
    },
}

/// The outcome of committing one op within a `PUSH` batch.
#[derive(Debug, Clone, Serialize)]
#[serde(untagged)]
pub enum AckResult {
    Ok { op_seq: u64 },
    Err { code: &'static str, message: String, retryable: bool },
}

/// Messages the server sends to a device.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    HelloOk {
        id: String,
        session_id: String,
        server_head_seq: u64,
        server_time: u64,
    },
    PushResult {
        id: String,
        batch_id: String,
        acks: HashMap<String, AckResult>,
    },
    PullChunk {
        id: String,
        ops: Vec<Operation>,
        has_more: bool,
    },
    Deliver {
        op_seq: u64,
        op: Operation,
        merged_state_digest: String,
    },
    Pong {
        id: String,
        nonce: String,
        sent_at: u64,
    },
    Error {
        id: Option<String>,
        code: &'static str,
        message: String,
        retryable: bool,
    },
}

impl ServerMessage {
    pub fn error(id: Option<String>, code: &'static str, message: impl Into<String>, retryable: bool) -> Self {
        ServerMessage::Error {
            id,
            code,
            message: message.into(),
            retryable,
        }
    }
}
