//! Request handlers for sync operations.

mod pull;
mod push;
pub mod websocket;

pub use pull::*;
pub use push::*;
pub use websocket::handle_websocket_connection;
