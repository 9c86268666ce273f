use std::sync::Arc;

use crate::auth::jwt::TokenSettings;
use crate::db::DbPool;
use crate::presence::PresenceTracker;

/// Shared application state passed to all handlers via axum State extractor.
#[derive(Clone)]
pub struct AppState {
    /// SQLite connection wrapped in Arc<Mutex>
    pub db: DbPool,
    /// Access token signing key and validation parameters
    pub tokens: Arc<TokenSettings>,
    /// Live hub connections and the admin observer group
    pub presence: PresenceTracker,
    /// Serve hub sockets without a valid token as untracked connections
    pub allow_anonymous: bool,
    /// Per-connection presence event queue size
    pub outbox_capacity: usize,
}
