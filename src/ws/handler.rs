use axum::{
    extract::{
        ws::{CloseFrame, Message, WebSocket, WebSocketUpgrade},
        Query, State,
    },
    response::Response,
};
use serde::Deserialize;

use crate::auth::jwt;
use crate::presence::{Identity, Role};
use crate::state::AppState;
use crate::ws::actor;

/// Query parameters for the hub connection.
/// Browsers cannot set headers on WebSocket upgrades, so the token rides in
/// `?access_token=`.
#[derive(Debug, Deserialize)]
pub struct HubAuthQuery {
    #[serde(default)]
    pub access_token: Option<String>,
}

/// 4001 = token expired, 4002 = token missing or invalid
const CLOSE_TOKEN_EXPIRED: u16 = 4001;
const CLOSE_TOKEN_INVALID: u16 = 4002;

/// GET /ws?access_token=JWT
/// Valid token: the connection is tracked under the token's username/role.
/// Anything else is either closed with a 400x code or, when anonymous
/// sockets are allowed, served untracked.
pub async fn ws_upgrade(
    State(state): State<AppState>,
    Query(params): Query<HubAuthQuery>,
    ws: WebSocketUpgrade,
) -> Response {
    let token = params.access_token.filter(|t| !t.is_empty());

    let rejection = match token.as_deref().map(|t| jwt::validate_access_token(&state.tokens, t)) {
        Some(Ok(claims)) => {
            let identity = claims.identity();
            let role = claims.role();
            tracing::info!(
                user_id = %claims.sub,
                username = claims.username.as_deref().unwrap_or(""),
                role = %role,
                "Hub connection authenticated"
            );
            return ws.on_upgrade(move |socket| handle_connection(socket, state, identity, role));
        }
        Some(Err(err)) => match err.kind() {
            jsonwebtoken::errors::ErrorKind::ExpiredSignature => {
                (CLOSE_TOKEN_EXPIRED, "Token expired")
            }
            _ => (CLOSE_TOKEN_INVALID, "Token invalid"),
        },
        None => (CLOSE_TOKEN_INVALID, "Token missing"),
    };

    if state.allow_anonymous {
        tracing::debug!(reason = rejection.1, "Serving hub connection anonymously");
        return ws.on_upgrade(move |socket| handle_connection(socket, state, None, Role::Customer));
    }

    let (close_code, reason) = rejection;
    tracing::warn!(close_code = close_code, reason = reason, "Hub auth failed");

    // Upgrade, then immediately close with the error code
    ws.on_upgrade(move |mut socket| async move {
        let close_frame = CloseFrame {
            code: close_code,
            reason: reason.into(),
        };
        let _ = socket.send(Message::Close(Some(close_frame))).await;
    })
}

async fn handle_connection(
    socket: WebSocket,
    state: AppState,
    identity: Option<Identity>,
    role: Role,
) {
    actor::run_connection(socket, state, identity, role).await;
}
