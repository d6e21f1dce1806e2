use super::AppState;
use crate::session::{ConnectionId, DeliveryTarget, ProgressEvent, SessionRegistry};
use anyhow::Result;
use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        State,
    },
    response::Response,
};
use futures::{sink::SinkExt, stream::SplitSink, StreamExt};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

/// Frames a client may send, e.g. `{"event": "join", "data": {"session_id": "abc"}}`.
#[derive(Debug, Deserialize, PartialEq)]
#[serde(tag = "event", content = "data", rename_all = "snake_case")]
pub enum ClientEvent {
    Join { session_id: String },
    Leave { session_id: String },
}

#[derive(Debug, Serialize, PartialEq)]
#[serde(tag = "event", content = "data", rename_all = "snake_case")]
pub enum ServerEvent {
    Joined { session_id: String },
    DownloadProgress { percentage: String },
}

impl From<&ProgressEvent> for ServerEvent {
    fn from(event: &ProgressEvent) -> Self {
        ServerEvent::DownloadProgress {
            percentage: event.percentage(),
        }
    }
}

/// GET /ws
pub async fn ws_handler(ws: WebSocketUpgrade, State(state): State<Arc<AppState>>) -> Response {
    let registry = Arc::clone(&state.registry);
    let shutdown = state.shutdown.clone();
    ws.on_upgrade(move |socket| handle_socket(socket, registry, shutdown))
}

async fn handle_socket(
    socket: WebSocket,
    registry: Arc<SessionRegistry>,
    shutdown: CancellationToken,
) {
    let connection_id = ConnectionId::new_v4();
    // The registry only keeps a weak handle; this task owns the queue.
    let (progress_tx, mut progress_rx) = mpsc::unbounded_channel::<ProgressEvent>();
    let (mut sink, mut stream) = socket.split();
    info!(%connection_id, "Event channel opened");

    loop {
        tokio::select! {
            incoming = stream.next() => match incoming {
                Some(Ok(Message::Text(text))) => {
                    let reply = handle_client_text(&registry, connection_id, &progress_tx, text.as_str());
                    if let Some(reply) = reply {
                        if let Err(e) = send_event(&mut sink, &reply).await {
                            debug!(%connection_id, "Failed to send reply: {:#}", e);
                            break;
                        }
                    }
                }
                Some(Ok(Message::Close(_))) | None => break,
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    debug!(%connection_id, "Event channel error: {}", e);
                    break;
                }
            },
            Some(event) = progress_rx.recv() => {
                trace!(
                    %connection_id,
                    session_id = %event.session_id,
                    queued_ms = event.timestamp.elapsed().map(|d| d.as_millis() as u64).unwrap_or_default(),
                    "Relaying progress"
                );
                if let Err(e) = send_event(&mut sink, &ServerEvent::from(&event)).await {
                    debug!(%connection_id, "Failed to send progress: {:#}", e);
                    break;
                }
            }
            _ = shutdown.cancelled() => {
                let _ = sink.send(Message::Close(None)).await;
                break;
            }
        }
    }

    let released = registry.leave_connection(connection_id);
    info!(%connection_id, released, "Event channel closed");
}

/// Apply one text frame from a client and return the reply to send, if any.
fn handle_client_text(
    registry: &SessionRegistry,
    connection_id: ConnectionId,
    progress_tx: &mpsc::UnboundedSender<ProgressEvent>,
    text: &str,
) -> Option<ServerEvent> {
    let event = match serde_json::from_str::<ClientEvent>(text) {
        Ok(event) => event,
        Err(e) => {
            warn!(%connection_id, "Ignoring malformed event {:?}: {}", text, e);
            return None;
        }
    };

    match event {
        ClientEvent::Join { session_id } => {
            let session_id = session_id.trim();
            if session_id.is_empty() {
                warn!(%connection_id, "Ignoring join without a session_id");
                return None;
            }
            registry.join(session_id, DeliveryTarget::new(connection_id, progress_tx));
            Some(ServerEvent::Joined {
                session_id: session_id.to_string(),
            })
        }
        ClientEvent::Leave { session_id } => {
            if !registry.leave(session_id.trim(), connection_id) {
                debug!(%connection_id, session_id = %session_id, "Leave for a session this connection does not own");
            }
            None
        }
    }
}

async fn send_event(sink: &mut SplitSink<WebSocket, Message>, event: &ServerEvent) -> Result<()> {
    let json = serde_json::to_string(event)?;
    sink.send(Message::Text(json.into())).await?;
    Ok(())
}
