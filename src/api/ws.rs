//! Chat WebSocket: one connection is one session with its own browser.
//!
//! Inbound text frames are queued by a reader task and handled one at a
//! time; outbound frames go through a writer task. Each inbound message gets
//! exactly one `reply` frame, possibly preceded by `progress` frames.

use crate::agent::session::Session;
use crate::agent::types::{InboundMessage, OutboundMessage, TaskStage, TurnStatus};
use crate::state::AppState;
use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        State,
    },
    response::Response,
};
use futures::{FutureExt, SinkExt, StreamExt};
use std::panic::AssertUnwindSafe;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use tokio::sync::mpsc;

const MALFORMED_REPLY: &str =
    r#"I couldn't read that message. Send JSON like {"text": "search for rust tutorials"}."#;
const EMPTY_REPLY: &str = "Please type what you would like me to do.";
const BUSY_REPLY: &str = "All browser sessions are in use. Please try again later.";
const PANIC_REPLY: &str = "Something went wrong while handling your message. Please try again.";

/// WebSocket upgrade handler for `/ws`.
pub async fn ws_handler(ws: WebSocketUpgrade, State(state): State<Arc<AppState>>) -> Response {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

/// Serve one chat session until the client goes away.
async fn handle_socket(socket: WebSocket, state: Arc<AppState>) {
    let session_id = uuid::Uuid::new_v4().to_string();
    let (mut sender, mut receiver) = socket.split();

    // Writer: everything outbound funnels through this channel
    let (out_tx, mut out_rx) = mpsc::unbounded_channel::<OutboundMessage>();
    let send_task = tokio::spawn(async move {
        while let Some(msg) = out_rx.recv().await {
            let json = match serde_json::to_string(&msg) {
                Ok(json) => json,
                Err(e) => {
                    tracing::error!("Failed to serialize outbound frame: {}", e);
                    continue;
                }
            };
            if sender.send(Message::Text(json)).await.is_err() {
                break; // Client disconnected
            }
        }
        let _ = sender.close().await;
    });

    // Held for the whole session so each slot covers one live browser
    let slot = match Arc::clone(&state.session_slots).try_acquire_owned() {
        Ok(slot) => slot,
        Err(_) => {
            tracing::warn!("Session limit reached; refusing session {}", session_id);
            let _ = out_tx.send(OutboundMessage::reply(TurnStatus::Error, BUSY_REPLY));
            drop(out_tx);
            let _ = send_task.await;
            return;
        }
    };

    let browser = match state.launcher.launch(&session_id).await {
        Ok(browser) => browser,
        Err(e) => {
            tracing::error!("Browser launch failed for session {}: {}", session_id, e);
            let _ = out_tx.send(OutboundMessage::reply(
                TurnStatus::Error,
                format!("Could not start the browser: {}", e),
            ));
            drop(out_tx);
            let _ = send_task.await;
            return;
        }
    };

    state.sessions.register(&session_id);
    let mut session = Session::new(session_id.clone(), browser);

    // Reader: queue text frames; clears the session's connection flag when the client leaves
    let reader_connected = session.connection();
    let (in_tx, mut in_rx) = mpsc::unbounded_channel::<String>();
    let recv_task = tokio::spawn(async move {
        while let Some(Ok(msg)) = receiver.next().await {
            match msg {
                Message::Text(text) => {
                    if in_tx.send(text).is_err() {
                        break;
                    }
                }
                Message::Close(_) => break,
                // Axum answers pings itself
                _ => {}
            }
        }
        reader_connected.store(false, Ordering::SeqCst);
    });

    while let Some(text) = in_rx.recv().await {
        if !session.is_connected() {
            tracing::debug!("Session {} gone; dropping queued messages", session_id);
            break;
        }

        let reply = handle_text(&state, &mut session, &text, &out_tx).await;

        if !session.is_connected() {
            tracing::debug!("Session {} disconnected mid-turn; reply discarded", session_id);
            break;
        }
        let _ = out_tx.send(reply);
    }

    if let Err(e) = session
        .close(state.config.browser.cookie_export_dir.as_deref())
        .await
    {
        tracing::warn!("Failed to close browser for session {}: {}", session_id, e);
    }

    recv_task.abort();
    drop(out_tx);
    let _ = send_task.await;

    drop(slot);
    state.sessions.unregister(&session_id);
}

/// Produce the single reply for one inbound frame
async fn handle_text(
    state: &AppState,
    session: &mut Session,
    raw: &str,
    progress: &mpsc::UnboundedSender<OutboundMessage>,
) -> OutboundMessage {
    let inbound: InboundMessage = match serde_json::from_str(raw) {
        Ok(inbound) => inbound,
        Err(e) => {
            tracing::debug!("Malformed frame on session {}: {}", session.id, e);
            return OutboundMessage::reply(TurnStatus::Error, MALFORMED_REPLY);
        }
    };

    let text = inbound.text.trim();
    if text.is_empty() {
        return OutboundMessage::reply(TurnStatus::Clarify, EMPTY_REPLY);
    }

    tracing::info!("Session {} message: {}", session.id, text);

    let turn = AssertUnwindSafe(state.engine.run_turn(session, text, progress));
    match turn.catch_unwind().await {
        Ok(reply) => reply,
        Err(_) => {
            tracing::error!("Turn panicked on session {}", session.id);
            session.stage = TaskStage::Idle;
            OutboundMessage::reply(TurnStatus::Error, PANIC_REPLY)
        }
    }
}
