//! WebSocket upgrade and connection lifecycle for live sessions.

use std::sync::atomic::{AtomicI64, Ordering};

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::response::IntoResponse;
use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tracing::{debug, info, info_span, warn, Instrument};
use uuid::Uuid;

use super::session::{LiveSession, LIVE_ENDPOINT};
use crate::metrics;
use crate::state::AppState;

/// Global counter for active live sessions.
static ACTIVE_LIVE_SESSIONS: AtomicI64 = AtomicI64::new(0);

/// Outbound queue depth per connection.
const WS_SEND_BUFFER_SIZE: usize = 32;

/// Live redaction endpoint.
pub async fn blur_live(ws: WebSocketUpgrade, State(state): State<AppState>) -> impl IntoResponse {
    metrics::record_ws_connection(LIVE_ENDPOINT);

    ws.on_upgrade(|socket| async move {
        let count = ACTIVE_LIVE_SESSIONS.fetch_add(1, Ordering::SeqCst) + 1;
        metrics::set_ws_active_connections(count);

        // Released on every exit, including a panicking session
        let _guard = scopeguard::guard((), |_| {
            let count = ACTIVE_LIVE_SESSIONS.fetch_sub(1, Ordering::SeqCst) - 1;
            metrics::set_ws_active_connections(count);
        });

        let session_id = Uuid::new_v4();
        handle_live_socket(socket, state)
            .instrument(info_span!("live_session", %session_id))
            .await;
    })
}

async fn handle_live_socket(socket: WebSocket, state: AppState) {
    info!("Live session opened");
    let (ws_sender, receiver) = socket.split();

    // Single writer: every reply and probe is one whole message on the wire.
    let (tx, mut rx) = mpsc::channel::<Message>(WS_SEND_BUFFER_SIZE);
    let send_task = tokio::spawn(async move {
        let mut ws_sender = ws_sender;
        while let Some(msg) = rx.recv().await {
            if let Err(e) = ws_sender.send(msg).await {
                debug!("Live socket send failed: {}", e);
                break;
            }
        }
        // Already-closed sockets report an error here; nothing left to do.
        let _ = ws_sender.close().await;
    });

    let session = LiveSession::from_state(&state);
    match session.run(receiver, tx).await {
        Ok(stats) => info!(
            messages = stats.messages,
            frames = stats.frames,
            errors = stats.errors,
            "Live session closed"
        ),
        Err(e) => warn!("Live session ended: {}", e),
    }

    if let Err(e) = send_task.await {
        warn!("Live writer task failed: {}", e);
    }
}
