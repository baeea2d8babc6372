//! The `/ws` tick stream.
//!
//! Every connected client sees the same sequence of [`ControlFrame`]s:
//! one `tick` frame per completed month plus one-shot control frames
//! such as `llm_config_required`. Because the one-shot frames are
//! broadcast exactly once (when the engine pauses), the handler replays
//! the current gateway-health state to each client on connect -- a
//! dashboard opened mid-outage would otherwise sit on a silent stream
//! with no explanation.
//!
//! The stream is one-way: client text and binary input is ignored, only
//! ping and close are honored. A consumer that falls behind the
//! broadcast buffer skips ahead to the newest frame rather than
//! stalling the engine.

use axum::extract::ws::{Message, WebSocket};
use axum::extract::{State, WebSocketUpgrade};
use axum::response::IntoResponse;
use tokio::sync::broadcast::error::RecvError;
use tracing::{debug, warn};

use crate::state::{AppState, ControlFrame};

/// Upgrade an HTTP request into the tick stream.
///
/// # Route
///
/// `GET /ws`
pub async fn ws_ticks(ws: WebSocketUpgrade, State(state): State<AppState>) -> impl IntoResponse {
    ws.on_upgrade(move |socket| stream_frames(socket, state))
}

/// Drive one client: catch-up frame, then the live broadcast until
/// either side goes away.
async fn stream_frames(mut socket: WebSocket, state: AppState) {
    debug!("tick-stream client connected");
    let mut frames = state.subscribe();

    // Catch-up: the unhealthy-gateway frame was broadcast once when the
    // engine paused, so a late joiner has to be told directly.
    if state.operator.is_llm_unhealthy()
        && push_frame(&mut socket, &ControlFrame::LlmConfigRequired)
            .await
            .is_err()
    {
        return;
    }

    loop {
        tokio::select! {
            received = frames.recv() => match received {
                Ok(frame) => {
                    if push_frame(&mut socket, &frame).await.is_err() {
                        debug!("tick-stream client dropped mid-send");
                        return;
                    }
                }
                Err(RecvError::Lagged(missed)) => {
                    warn!(missed, "tick-stream client lagged; resuming from the newest frame");
                }
                Err(RecvError::Closed) => {
                    // The engine is shutting down; close the stream
                    // properly instead of letting the socket dangle.
                    let _ = socket.send(Message::Close(None)).await;
                    return;
                }
            },
            incoming = socket.recv() => {
                if !keep_open(&mut socket, incoming).await {
                    debug!("tick-stream client disconnected");
                    return;
                }
            }
        }
    }
}

/// Serialize and send one frame. `Err` means the client is gone; a
/// frame that fails to serialize is skipped, not fatal.
async fn push_frame(socket: &mut WebSocket, frame: &ControlFrame) -> Result<(), ()> {
    let payload = match serde_json::to_string(frame) {
        Ok(payload) => payload,
        Err(error) => {
            warn!(%error, "frame serialization failed, skipping");
            return Ok(());
        }
    };
    socket
        .send(Message::Text(payload.into()))
        .await
        .map_err(|_| ())
}

/// React to one message from the client. Returns `false` once the
/// connection should be torn down.
async fn keep_open(socket: &mut WebSocket, incoming: Option<Result<Message, axum::Error>>) -> bool {
    match incoming {
        // Closed cleanly or the peer vanished.
        None | Some(Ok(Message::Close(_))) => false,
        Some(Ok(Message::Ping(payload))) => socket.send(Message::Pong(payload)).await.is_ok(),
        // The stream is one-way; whatever else the client says is noise.
        Some(Ok(_)) => true,
        Some(Err(error)) => {
            debug!(%error, "tick-stream receive error");
            false
        }
    }
}
