use axum::extract::ws::{CloseFrame, Message, WebSocket};
use futures_util::{SinkExt, StreamExt};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{interval, timeout};

use crate::config::KeepaliveConfig;
use crate::hub::Hub;
use crate::ws::ConnectionSender;

/// Run the actor-per-connection pattern for one hub socket.
///
/// Splits the WebSocket into reader and writer halves:
/// - Writer task: owns the sink, drains the connection's outbox
/// - Reader loop: hands text frames to the hub
///
/// The outbox sender lives in the registry, so any handler in the room can
/// enqueue frames for this client without touching the socket.
pub async fn run_connection(socket: WebSocket, hub: Arc<Hub>, keepalive: KeepaliveConfig) {
    let (ws_sender, mut ws_receiver) = socket.split();
    let (tx, rx) = mpsc::unbounded_channel::<Message>();

    // Spawn the writer first so the admission frames are flushed immediately
    let mut writer_handle = tokio::spawn(writer_task(ws_sender, rx));

    let id = match hub.connect(tx.clone()) {
        Ok(id) => id,
        Err(e) => {
            tracing::warn!(room = %hub.room(), error = %e, "Connection not admitted");
            writer_handle.abort();
            return;
        }
    };

    tracing::debug!(room = %hub.room(), connection_id = %id, "WebSocket actor started");

    let (pong_tx, pong_rx) = mpsc::unbounded_channel::<()>();
    let ping_handle = keepalive
        .enabled
        .then(|| spawn_ping_task(tx.clone(), pong_rx, keepalive.clone(), id.clone()));

    loop {
        tokio::select! {
            frame = ws_receiver.next() => match frame {
                Some(Ok(Message::Text(text))) => {
                    hub.handle_text(&id, text.as_str());
                }
                Some(Ok(Message::Binary(data))) => {
                    tracing::debug!(
                        connection_id = %id,
                        bytes = data.len(),
                        "Ignoring binary frame"
                    );
                }
                Some(Ok(Message::Ping(data))) => {
                    let _ = tx.send(Message::Pong(data));
                }
                Some(Ok(Message::Pong(_))) => {
                    let _ = pong_tx.send(());
                }
                Some(Ok(Message::Close(frame))) => {
                    tracing::debug!(connection_id = %id, reason = ?frame, "Client initiated close");
                    break;
                }
                Some(Err(e)) => {
                    tracing::warn!(connection_id = %id, error = %e, "WebSocket receive error");
                    break;
                }
                None => {
                    tracing::debug!(connection_id = %id, "WebSocket stream ended");
                    break;
                }
            },
            // Writer gone means the socket can no longer be written to
            _ = &mut writer_handle => {
                tracing::debug!(connection_id = %id, "Writer task ended");
                break;
            }
        }
    }

    writer_handle.abort();
    if let Some(handle) = ping_handle {
        handle.abort();
    }

    hub.disconnect(&id);
    tracing::debug!(
        room = %hub.room(),
        connection_id = %id,
        connections = hub.registry().len(),
        "WebSocket actor stopped"
    );
}

/// Writer task: receives messages from the outbox and forwards them to the WebSocket sink.
async fn writer_task(
    mut ws_sender: futures_util::stream::SplitSink<WebSocket, Message>,
    mut rx: mpsc::UnboundedReceiver<Message>,
) {
    while let Some(msg) = rx.recv().await {
        let closing = matches!(msg, Message::Close(_));
        if ws_sender.send(msg).await.is_err() || closing {
            break;
        }
    }
}

/// Periodic pings; closes the connection when a pong misses its deadline.
fn spawn_ping_task(
    tx: ConnectionSender,
    mut pong_rx: mpsc::UnboundedReceiver<()>,
    keepalive: KeepaliveConfig,
    id: String,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ping_timer = interval(keepalive.ping_interval());
        // Skip the first immediate tick
        ping_timer.tick().await;

        loop {
            ping_timer.tick().await;

            if tx.send(Message::Ping(vec![1, 2, 3, 4].into())).is_err() {
                break;
            }

            match timeout(keepalive.pong_timeout(), pong_rx.recv()).await {
                Ok(Some(())) => {}
                _ => {
                    tracing::warn!(connection_id = %id, "Pong timeout, closing connection");
                    let _ = tx.send(Message::Close(Some(CloseFrame {
                        code: 1001,
                        reason: "Pong timeout".into(),
                    })));
                    break;
                }
            }
        }
    })
}
