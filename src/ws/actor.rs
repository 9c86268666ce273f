use axum::extract::ws::{CloseFrame, Message, WebSocket};
use futures_util::{stream::SplitSink, SinkExt, StreamExt};
use std::time::Duration;
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::time::{interval, timeout};

use crate::presence::{ConnectionId, Identity, PresenceEvent, Role};
use crate::state::AppState;
use crate::ws::{protocol, ControlSender, HubSession, CONTROL_CAPACITY};

/// Ping interval: server sends WebSocket ping every 30 seconds.
/// Catches peers that vanished without a close frame.
const PING_INTERVAL: Duration = Duration::from_secs(30);

/// Pong timeout: if pong not received within 10 seconds after ping, close.
const PONG_TIMEOUT: Duration = Duration::from_secs(10);

/// How long the writer may keep flushing (e.g. a close frame) after the
/// reader has stopped.
const WRITER_DRAIN: Duration = Duration::from_secs(1);

/// Run the actor-per-connection pattern for a hub WebSocket.
///
/// - Writer task: owns the sink, drains the control channel and the
///   bounded presence outbox
/// - Reader loop: decodes client invocations and dispatches them
///
/// The connection is attached to the presence tracker for its whole life
/// and registered only when it carries an identity. Every exit path ends in
/// `deregister`.
pub async fn run_connection(
    socket: WebSocket,
    state: AppState,
    identity: Option<Identity>,
    role: Role,
) {
    let session = HubSession {
        connection_id: ConnectionId::new(),
        identity,
        role,
    };
    let connection_id = session.connection_id;

    let (ws_sender, mut ws_receiver) = socket.split();
    let (tx, control_rx) = mpsc::channel::<Message>(CONTROL_CAPACITY);
    let (outbox, outbox_rx) = mpsc::channel::<PresenceEvent>(state.outbox_capacity.max(1));

    state.presence.attach(connection_id, outbox);
    match &session.identity {
        Some(identity) => {
            state.presence.register(connection_id, identity.clone());
        }
        None => {
            tracing::debug!(connection_id = %connection_id, "Anonymous hub connection, not tracked");
        }
    }

    tracing::info!(
        connection_id = %connection_id,
        user = session.label(),
        "Hub actor started"
    );

    let mut writer_handle = tokio::spawn(writer_task(ws_sender, control_rx, outbox_rx));

    let (pong_tx, pong_rx) = mpsc::channel::<()>(1);
    let mut ping_handle = tokio::spawn(keepalive(tx.clone(), pong_rx, PING_INTERVAL, PONG_TIMEOUT));

    loop {
        let frame = tokio::select! {
            frame = ws_receiver.next() => frame,
            _ = &mut ping_handle => {
                tracing::info!(connection_id = %connection_id, "Keepalive ended, dropping hub connection");
                break;
            }
        };

        match frame {
            Some(Ok(msg)) => match msg {
                Message::Text(text) => {
                    protocol::handle_text_message(text.as_str(), &tx, &state.presence, &session);
                }
                Message::Binary(_) => {
                    protocol::send_error(&tx, 415, "Binary frames are not supported");
                }
                Message::Pong(_) => {
                    // At most one pong is remembered between pings
                    let _ = pong_tx.try_send(());
                }
                Message::Ping(data) => {
                    protocol::queue(&tx, Message::Pong(data));
                }
                Message::Close(frame) => {
                    tracing::info!(
                        connection_id = %connection_id,
                        reason = ?frame,
                        "Client initiated close"
                    );
                    break;
                }
            },
            Some(Err(e)) => {
                tracing::warn!(
                    connection_id = %connection_id,
                    error = %e,
                    "WebSocket receive error"
                );
                break;
            }
            None => {
                tracing::info!(connection_id = %connection_id, "WebSocket stream ended");
                break;
            }
        }
    }

    state.presence.deregister(connection_id);
    ping_handle.abort();
    drop(tx);

    if timeout(WRITER_DRAIN, &mut writer_handle).await.is_err() {
        writer_handle.abort();
    }

    tracing::info!(
        connection_id = %connection_id,
        user = session.label(),
        "Hub actor stopped"
    );
}

/// Ping on every `every` tick and wait `grace` for a pong. Returns after
/// queueing a 1001 close when the peer stays silent, or when the writer is
/// gone.
async fn keepalive(
    ping_tx: ControlSender,
    mut pong_rx: mpsc::Receiver<()>,
    every: Duration,
    grace: Duration,
) {
    let mut ping_timer = interval(every);
    // Skip the first immediate tick
    ping_timer.tick().await;

    loop {
        ping_timer.tick().await;

        // A pong that arrived unasked must not answer this ping
        while pong_rx.try_recv().is_ok() {}

        if let Err(TrySendError::Closed(_)) =
            ping_tx.try_send(Message::Ping(vec![1, 2, 3, 4].into()))
        {
            // Writer is gone
            return;
        }

        match timeout(grace, pong_rx.recv()).await {
            Ok(Some(())) => {}
            _ => {
                tracing::warn!("Pong timeout, closing hub connection");
                protocol::queue(
                    &ping_tx,
                    Message::Close(Some(CloseFrame {
                        code: 1001,
                        reason: "Pong timeout".into(),
                    })),
                );
                return;
            }
        }
    }
}

/// Writer task: forwards control messages and presence events to the sink.
async fn writer_task(
    mut ws_sender: SplitSink<WebSocket, Message>,
    mut control_rx: mpsc::Receiver<Message>,
    mut outbox_rx: mpsc::Receiver<PresenceEvent>,
) {
    loop {
        let msg = tokio::select! {
            Some(msg) = control_rx.recv() => msg,
            Some(event) = outbox_rx.recv() => match protocol::encode_event(&event) {
                Some(msg) => msg,
                None => continue,
            },
            else => break,
        };

        if ws_sender.send(msg).await.is_err() {
            // Socket is broken; the reader loop will notice and clean up
            break;
        }
    }
}
