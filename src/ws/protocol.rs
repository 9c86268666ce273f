//! JSON text protocol spoken on the hub socket.
//!
//! Client → server: `{"invocation": "GetConnectedUsers"}`,
//! `{"invocation": "JoinAdminGroup"}`.
//! Server → client: [`PresenceEvent`]s and `{"event": "Error", ...}`.

use axum::extract::ws::Message;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc::error::TrySendError;

use crate::presence::{PresenceEvent, PresenceTracker};
use crate::ws::{ControlSender, HubSession};

/// Operations a connected client may invoke.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "invocation")]
pub enum Invocation {
    GetConnectedUsers,
    JoinAdminGroup,
}

#[derive(Debug, Serialize)]
struct ErrorPayload<'a> {
    code: u16,
    message: &'a str,
}

#[derive(Debug, Serialize)]
#[serde(tag = "event", content = "data")]
enum ErrorEvent<'a> {
    Error(ErrorPayload<'a>),
}

/// Decode and dispatch one text frame.
pub fn handle_text_message(
    text: &str,
    tx: &ControlSender,
    tracker: &PresenceTracker,
    session: &HubSession,
) {
    let invocation = match serde_json::from_str::<Invocation>(text) {
        Ok(invocation) => invocation,
        Err(e) => {
            tracing::warn!(
                connection_id = %session.connection_id,
                error = %e,
                "Failed to decode hub invocation"
            );
            send_error(tx, 400, "Invalid invocation");
            return;
        }
    };

    dispatch(invocation, tx, tracker, session);
}

/// Admin-only invocations from other roles are dropped without a reply.
pub fn dispatch(
    invocation: Invocation,
    tx: &ControlSender,
    tracker: &PresenceTracker,
    session: &HubSession,
) {
    match invocation {
        Invocation::GetConnectedUsers => {
            if let Some(users) = tracker.list_connected(session.role) {
                send_event(tx, &PresenceEvent::ConnectedUsersList(users));
            }
        }
        Invocation::JoinAdminGroup => {
            tracker.join_privileged_group(session.connection_id, session.role);
        }
    }
}

/// Serialize a presence event into a text frame.
pub fn encode_event(event: &PresenceEvent) -> Option<Message> {
    match serde_json::to_string(event) {
        Ok(json) => Some(Message::Text(json.into())),
        Err(e) => {
            tracing::error!(event = event.name(), error = %e, "Failed to encode presence event");
            None
        }
    }
}

/// Queue a frame for the writer. A full queue means the client is not
/// reading; the frame is dropped.
pub fn queue(tx: &ControlSender, msg: Message) {
    if let Err(TrySendError::Full(_)) = tx.try_send(msg) {
        tracing::debug!("Control queue full, reply dropped");
    }
}

fn send_event(tx: &ControlSender, event: &PresenceEvent) {
    if let Some(msg) = encode_event(event) {
        queue(tx, msg);
    }
}

/// Send an error event to this connection only.
pub fn send_error(tx: &ControlSender, code: u16, message: &str) {
    let event = ErrorEvent::Error(ErrorPayload { code, message });
    if let Ok(json) = serde_json::to_string(&event) {
        queue(tx, Message::Text(json.into()));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::presence::{ConnectionId, Identity, Role};
    use tokio::sync::mpsc;

    fn session(tracker: &PresenceTracker, username: &str, role: Role) -> HubSession {
        let connection_id = ConnectionId::new();
        let (outbox, _rx) = mpsc::channel(8);
        tracker.attach(connection_id, outbox);
        let identity = Identity::new(username, role);
        tracker.register(connection_id, identity.clone());
        HubSession {
            connection_id,
            identity: Some(identity),
            role,
        }
    }

    fn next_json(rx: &mut mpsc::Receiver<Message>) -> serde_json::Value {
        match rx.try_recv().expect("expected a reply") {
            Message::Text(text) => serde_json::from_str(text.as_str()).unwrap(),
            other => panic!("unexpected frame: {:?}", other),
        }
    }

    #[test]
    fn test_admin_gets_roster() {
        let tracker = PresenceTracker::new();
        let admin = session(&tracker, "bob", Role::Admin);
        session(&tracker, "alice", Role::Customer);

        let (tx, mut rx) = mpsc::channel(8);
        handle_text_message(r#"{"invocation":"GetConnectedUsers"}"#, &tx, &tracker, &admin);

        let reply = next_json(&mut rx);
        assert_eq!(reply["event"], "ConnectedUsersList");
        assert_eq!(reply["data"].as_array().unwrap().len(), 2);
    }

    #[test]
    fn test_customer_roster_query_is_silent() {
        let tracker = PresenceTracker::new();
        let customer = session(&tracker, "alice", Role::Customer);

        let (tx, mut rx) = mpsc::channel(8);
        handle_text_message(r#"{"invocation":"GetConnectedUsers"}"#, &tx, &tracker, &customer);
        handle_text_message(r#"{"invocation":"JoinAdminGroup"}"#, &tx, &tracker, &customer);

        assert!(rx.try_recv().is_err());
        assert!(!tracker.is_privileged(customer.connection_id));
    }

    #[test]
    fn test_join_admin_group() {
        let tracker = PresenceTracker::new();
        let connection_id = ConnectionId::new();
        let (outbox, _rx) = mpsc::channel(8);
        tracker.attach(connection_id, outbox);
        let anonymous_admin = HubSession {
            connection_id,
            identity: None,
            role: Role::Admin,
        };

        let (tx, _control_rx) = mpsc::channel(8);
        handle_text_message(r#"{"invocation":"JoinAdminGroup"}"#, &tx, &tracker, &anonymous_admin);
        assert!(tracker.is_privileged(connection_id));
    }

    #[test]
    fn test_garbage_gets_error_event() {
        let tracker = PresenceTracker::new();
        let customer = session(&tracker, "alice", Role::Customer);

        let (tx, mut rx) = mpsc::channel(8);
        handle_text_message("not json", &tx, &tracker, &customer);
        handle_text_message(r#"{"invocation":"DropTables"}"#, &tx, &tracker, &customer);

        for _ in 0..2 {
            let reply = next_json(&mut rx);
            assert_eq!(reply["event"], "Error");
            assert_eq!(reply["data"]["code"], 400);
        }
    }

    #[test]
    fn test_unread_roster_replies_are_bounded() {
        let tracker = PresenceTracker::new();
        let admin = session(&tracker, "bob", Role::Admin);

        let (tx, mut rx) = mpsc::channel(2);
        for _ in 0..10 {
            handle_text_message(r#"{"invocation":"GetConnectedUsers"}"#, &tx, &tracker, &admin);
        }

        assert_eq!(next_json(&mut rx)["event"], "ConnectedUsersList");
        assert_eq!(next_json(&mut rx)["event"], "ConnectedUsersList");
        assert!(rx.try_recv().is_err());
    }
}
