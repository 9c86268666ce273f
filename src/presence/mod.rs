//! Live presence: who is connected to the hub right now.
//!
//! The tracker owns the registry of identified connections and the
//! privileged (Admin) observer group. The WebSocket actor attaches each
//! socket's outbound queue, registers the identity resolved from its token,
//! and deregisters on close.

pub mod event;
pub mod tracker;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

pub use event::PresenceEvent;
pub use tracker::{Outbox, PresenceTracker};

/// Opaque per-socket identifier. Minted by the transport, never reused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ConnectionId(Uuid);

impl ConnectionId {
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }
}

impl Default for ConnectionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Role classification carried in access tokens.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum Role {
    Admin,
    #[default]
    Customer,
}

impl Role {
    pub const ADMIN: &'static str = "Admin";
    pub const CUSTOMER: &'static str = "Customer";

    /// Anything other than the exact string "Admin" is a customer.
    pub fn from_claim(role: Option<&str>) -> Self {
        match role {
            Some(Self::ADMIN) => Self::Admin,
            _ => Self::Customer,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Admin => Self::ADMIN,
            Self::Customer => Self::CUSTOMER,
        }
    }

    pub fn is_admin(&self) -> bool {
        matches!(self, Self::Admin)
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Authenticated principal behind a connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identity {
    pub username: String,
    pub role: Role,
}

impl Identity {
    pub fn new(username: impl Into<String>, role: Role) -> Self {
        Self {
            username: username.into(),
            role,
        }
    }

    /// Build an identity from token claims. Returns `None` when the username
    /// is missing or blank; such connections stay anonymous.
    pub fn from_claims(username: Option<&str>, role: Option<&str>) -> Option<Self> {
        let username = username.map(str::trim).filter(|u| !u.is_empty())?;
        Some(Self::new(username, Role::from_claim(role)))
    }
}

/// One tracked, identified connection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectionRecord {
    pub connection_id: ConnectionId,
    pub username: String,
    pub role: Role,
    pub connected_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_role_defaults_to_customer() {
        assert_eq!(Role::from_claim(None), Role::Customer);
        assert_eq!(Role::from_claim(Some("Customer")), Role::Customer);
        assert_eq!(Role::from_claim(Some("admin")), Role::Customer);
        assert_eq!(Role::from_claim(Some("Admin")), Role::Admin);
    }

    #[test]
    fn test_identity_requires_username() {
        assert!(Identity::from_claims(None, Some("Admin")).is_none());
        assert!(Identity::from_claims(Some("   "), Some("Admin")).is_none());

        let identity = Identity::from_claims(Some("alice"), None).unwrap();
        assert_eq!(identity.username, "alice");
        assert_eq!(identity.role, Role::Customer);
    }

    #[test]
    fn test_record_serializes_camel_case() {
        let record = ConnectionRecord {
            connection_id: ConnectionId::new(),
            username: "bob".to_string(),
            role: Role::Admin,
            connected_at: Utc::now(),
        };
        let json = serde_json::to_value(&record).unwrap();
        assert_eq!(json["username"], "bob");
        assert_eq!(json["role"], "Admin");
        assert!(json["connectionId"].is_string());
        assert!(json["connectedAt"].is_string());
    }
}
