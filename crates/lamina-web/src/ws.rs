//! WebSocket progress streaming.
//!
//! The client opens `/api/jobs/{id}/stream` and sends a subscription frame
//! first: `{"subscribe": "<job_id>", "caller": "<identity>"}`. The server
//! replays `events.log`, then forwards live events until `terminal`. A
//! subscriber that lags beyond the bus queue is disconnected and is
//! expected to reconnect and replay.

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Path, State};
use axum::response::Response;
use futures_util::StreamExt;
use serde::Deserialize;
use tokio_stream::wrappers::errors::BroadcastStreamRecvError;
use tokio_stream::wrappers::BroadcastStream;
use tracing::{debug, info, warn};
use uuid::Uuid;

use lamina_acquisition::progress::{EventKind, ProgressEvent};

use crate::state::SharedState;

#[derive(Deserialize)]
struct SubscribeFrame {
    subscribe: Uuid,
    #[serde(default)]
    caller: String,
}

/// `GET /api/jobs/{id}/stream`
pub async fn stream(
    State(state): State<SharedState>,
    Path(job_id): Path<Uuid>,
    ws: WebSocketUpgrade,
) -> Response {
    ws.on_upgrade(move |socket| handle_socket(state, job_id, socket))
}

async fn handle_socket(state: SharedState, job_id: Uuid, mut socket: WebSocket) {
    // The first client frame must subscribe to the path's job.
    let frame = match socket.recv().await {
        Some(Ok(Message::Text(text))) => text,
        _ => {
            let _ = socket.send(Message::Close(None)).await;
            return;
        }
    };
    let subscription: SubscribeFrame = match serde_json::from_str(&frame) {
        Ok(s) => s,
        Err(e) => {
            debug!(job_id = %job_id, "bad subscription frame: {e}");
            let _ = socket.send(Message::Close(None)).await;
            return;
        }
    };
    if subscription.subscribe != job_id {
        let _ = socket.send(Message::Close(None)).await;
        return;
    }
    info!(job_id = %job_id, caller = %subscription.caller, "progress stream subscribed");

    // Attach to the live channel before replaying so no event can fall in
    // between; the client may see duplicates around the boundary.
    let mut live = BroadcastStream::new(state.bus.subscribe(job_id));

    let history = state.storage.read_events(job_id).unwrap_or_default();
    let mut saw_terminal = false;
    for event in &history {
        if send_event(&mut socket, event).await.is_err() {
            return;
        }
        saw_terminal |= event.kind == EventKind::Terminal;
    }
    if saw_terminal {
        let _ = socket.send(Message::Close(None)).await;
        return;
    }

    loop {
        tokio::select! {
            received = live.next() => match received {
                Some(Ok(event)) => {
                    let terminal = event.kind == EventKind::Terminal;
                    if send_event(&mut socket, &event).await.is_err() {
                        return;
                    }
                    if terminal {
                        break;
                    }
                }
                Some(Err(BroadcastStreamRecvError::Lagged(skipped))) => {
                    warn!(job_id = %job_id, skipped, "subscriber lagged, dropping");
                    break;
                }
                None => break,
            },
            client = socket.recv() => match client {
                None | Some(Err(_)) | Some(Ok(Message::Close(_))) => return,
                Some(Ok(_)) => {}
            },
        }
    }
    let _ = socket.send(Message::Close(None)).await;
}

async fn send_event(socket: &mut WebSocket, event: &ProgressEvent) -> Result<(), axum::Error> {
    let json = serde_json::to_string(event).unwrap_or_default();
    socket.send(Message::Text(json.into())).await
}
