//! WebSocket session lifecycle: one task per client from upgrade through
//! disconnect.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::extract::ws::{Message, WebSocket};
use ember_core::ConnectionId;
use futures::{Sink, SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument};

use super::connection::ClientConnection;
use super::dispatch::RelayEvent;

/// How long the writer may take to flush and send its close frame.
const WRITER_CLOSE_TIMEOUT: Duration = Duration::from_secs(1);

/// What the read loop does with one inbound frame.
#[derive(Debug)]
enum FrameAction {
    Forward(RelayEvent),
    Close,
    Ignore,
}

fn classify_frame(id: &ConnectionId, msg: Message) -> FrameAction {
    match msg {
        Message::Text(text) => FrameAction::Forward(RelayEvent::Message {
            id: id.clone(),
            text: text.to_string(),
        }),
        Message::Binary(data) => match std::str::from_utf8(&data) {
            Ok(text) => FrameAction::Forward(RelayEvent::Message {
                id: id.clone(),
                text: text.to_owned(),
            }),
            Err(e) => FrameAction::Forward(RelayEvent::Undecodable {
                id: id.clone(),
                reason: format!("binary frame of {} bytes is not UTF-8: {e}", data.len()),
            }),
        },
        Message::Close(_) => FrameAction::Close,
        // axum answers pings itself.
        Message::Ping(_) | Message::Pong(_) => FrameAction::Ignore,
    }
}

/// Drain `queue` into `sink` until the queue ends or `closing` fires, then
/// close the sink. Messages already queued go out before the close.
async fn write_loop<S>(
    mut sink: S,
    mut queue: mpsc::Receiver<Arc<String>>,
    closing: CancellationToken,
) where
    S: Sink<Message> + Unpin,
{
    loop {
        let text = tokio::select! {
            biased;
            text = queue.recv() => match text {
                Some(text) => text,
                None => break,
            },
            () = closing.cancelled() => break,
        };
        if sink.send(Message::Text(text.as_str().into())).await.is_err() {
            break;
        }
    }
    // Also flushes the reply to a client-initiated close.
    let _ = sink.close().await;
}

/// Run a WebSocket session for a connected client.
///
/// 1. Registers the client with the dispatcher
/// 2. Spawns a writer draining the client's outbound queue into the socket
/// 3. Forwards inbound frames to the dispatcher until close, error or shutdown
/// 4. Deregisters the client and lets the writer finish the close handshake
#[instrument(skip_all, fields(connection_id = %id, %remote_addr))]
pub async fn run_ws_session(
    ws: WebSocket,
    id: ConnectionId,
    remote_addr: SocketAddr,
    events: mpsc::Sender<RelayEvent>,
    max_send_queue: usize,
    cancel: CancellationToken,
) {
    let (ws_tx, mut ws_rx) = ws.split();

    let (send_tx, send_rx) = mpsc::channel::<Arc<String>>(max_send_queue.max(1));
    let connection = Arc::new(ClientConnection::new(id.clone(), remote_addr, send_tx));

    if events
        .send(RelayEvent::Connected(Arc::clone(&connection)))
        .await
        .is_err()
    {
        debug!("dispatcher gone, refusing connection");
        return;
    }

    let closing = cancel.child_token();
    let writer = tokio::spawn(write_loop(ws_tx, send_rx, closing.clone()));

    loop {
        let frame = tokio::select! {
            () = cancel.cancelled() => {
                debug!("server shutting down, ending session");
                break;
            }
            frame = ws_rx.next() => frame,
        };

        let msg = match frame {
            Some(Ok(msg)) => msg,
            Some(Err(e)) => {
                let _ = events
                    .send(RelayEvent::TransportError {
                        id: id.clone(),
                        error: e.to_string(),
                    })
                    .await;
                break;
            }
            None => break,
        };

        match classify_frame(&id, msg) {
            FrameAction::Forward(event) => {
                if events.send(event).await.is_err() {
                    break;
                }
            }
            FrameAction::Close => {
                info!("client sent close frame");
                break;
            }
            FrameAction::Ignore => {}
        }
    }

    connection.mark_closed();
    let _ = events.send(RelayEvent::Disconnected { id }).await;

    closing.cancel();
    let abort = writer.abort_handle();
    if tokio::time::timeout(WRITER_CLOSE_TIMEOUT, writer).await.is_err() {
        debug!("writer did not close in time, aborting");
        abort.abort();
    }
}
