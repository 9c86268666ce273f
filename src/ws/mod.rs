pub mod actor;
pub mod handler;
pub mod protocol;

use axum::extract::ws::Message;
use tokio::sync::mpsc;

use crate::presence::{ConnectionId, Identity, Role};

/// Direct channel to one socket's writer task: replies, pongs, close frames.
/// Presence broadcasts travel on the separate outbox. Both are bounded; a
/// client that stops reading loses replies instead of growing the queue.
pub type ControlSender = mpsc::Sender<Message>;

/// Frames that may wait for the writer on one connection.
pub const CONTROL_CAPACITY: usize = 16;

/// Per-connection context handed to the protocol dispatcher.
#[derive(Debug, Clone)]
pub struct HubSession {
    pub connection_id: ConnectionId,
    /// `None` for anonymous connections
    pub identity: Option<Identity>,
    /// Role from the token, used to gate admin-only invocations
    pub role: Role,
}

impl HubSession {
    pub fn label(&self) -> &str {
        self.identity
            .as_ref()
            .map(|i| i.username.as_str())
            .unwrap_or("anonymous")
    }
}
