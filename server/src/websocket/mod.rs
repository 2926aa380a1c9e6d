//! Duplex sync channel over WebSocket.
//!
//! A device that completes `HELLO` gets a live session: pushes and pulls
//! flow over the same socket as the stateless HTTP routes, plus unsolicited
//! `DELIVER` frames as other devices commit changes to the same owner.

mod manager;
mod protocol;

pub use manager::{MessageSender, SendOutcome, SessionRegistry};
pub use protocol::{AckResult, ClientMessage, ServerMessage};
