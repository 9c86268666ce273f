use serde::{Deserialize, Serialize};

use super::ConnectionRecord;

/// Events pushed to hub clients.
///
/// Wire form is `{"event": "<Name>", "data": <payload>}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data")]
pub enum PresenceEvent {
    /// A connection was registered. Sent to the privileged group.
    UserConnected(ConnectionRecord),
    /// A registered connection closed. Carries the departing username.
    UserDisconnected(String),
    /// Reply to a roster query.
    ConnectedUsersList(Vec<ConnectionRecord>),
}

impl PresenceEvent {
    pub fn name(&self) -> &'static str {
        match self {
            Self::UserConnected(_) => "UserConnected",
            Self::UserDisconnected(_) => "UserDisconnected",
            Self::ConnectedUsersList(_) => "ConnectedUsersList",
        }
    }
}
