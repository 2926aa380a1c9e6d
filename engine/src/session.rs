//! Per-session state machine (C6): one live transport connection bound to
//! `(owner_id, device_id)`.
//!
//! `HANDSHAKING → CATCHING_UP → LIVE → DRAINING → CLOSED`, with `CLOSED`
//! reachable from any state (transport loss beyond the reconnect window).

use crate::{error::Result, DeviceId, Error, OwnerId};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    Handshaking,
    CatchingUp,
    Live,
    Draining,
    Closed,
}

impl SessionState {
    /// Whether moving from `self` to `next` is one of the transitions named
    /// in the orchestrator's state machine.
    pub fn can_transition_to(self, next: SessionState) -> bool {
        use SessionState::*;
        match (self, next) {
            (_, Closed) => true,
            (Handshaking, CatchingUp) => true,
            (CatchingUp, Live) => true,
            (Live, Draining) => true,
            (Live, CatchingUp) => true, // reorder-buffer gap forces a re-catch-up
            _ => false,
        }
    }
}

/// A live connection between one device and the server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Session {
    pub session_id: String,
    pub owner_id: OwnerId,
    pub device_id: DeviceId,
    pub opened_at: u64,
    /// The highest owner `op_seq` this device has acknowledged.
    pub last_ack_seq: u64,
    pub subscribed: bool,
    pub state: SessionState,
}

impl Session {
    pub fn new(
        session_id: impl Into<String>,
        owner_id: impl Into<OwnerId>,
        device_id: impl Into<DeviceId>,
        opened_at: u64,
    ) -> Self {
        Self {
            session_id: session_id.into(),
            owner_id: owner_id.into(),
            device_id: device_id.into(),
            opened_at,
            last_ack_seq: 0,
            subscribed: false,
            state: SessionState::Handshaking,
        }
    }

    /// Attempt a state transition, rejecting ones not in the allowed graph.
    pub fn transition(&mut self, next: SessionState) -> Result<()> {
        if !self.state.can_transition_to(next) {
            return Err(Error::InvalidSessionState(self.device_id.clone()));
        }
        tracing::info!(
            session_id = %self.session_id,
            owner_id = %self.owner_id,
            device_id = %self.device_id,
            from = ?self.state,
            to = ?next,
            "session state transition"
        );
        self.state = next;
        Ok(())
    }

    pub fn ack(&mut self, up_to_seq: u64) {
        self.last_ack_seq = self.last_ack_seq.max(up_to_seq);
    }

    pub fn is_live(&self) -> bool {
        self.state == SessionState::Live
    }

    pub fn is_terminal(&self) -> bool {
        self.state == SessionState::Closed
    }
}
