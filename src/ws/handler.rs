//! Per-connection WebSocket task.
//!
//! Each accepted socket gets one task running [`run_connection`]: a writer
//! half draining the connection's mailbox (the only writer, so per-socket
//! FIFO holds) and a reader half applying client frames. The task ends when
//! the client closes, the socket errors, or the mailbox is closed by an
//! eviction; the connection is unregistered on every exit path.

use axum::extract::ws::{CloseFrame, Message, WebSocket};
use futures::{SinkExt, StreamExt};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use super::messages::{ClientMessage, ServerMessage};
use super::{ConnectionHandle, SessionManager};

/// Close code sent when the connect-time token is invalid or expired
pub const CLOSE_UNAUTHORIZED: u16 = 4401;

#[inline]
fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

/// Reject an unauthenticated handshake with the 4401 close code
pub async fn close_unauthorized(mut socket: WebSocket) {
    let _ = socket
        .send(Message::Close(Some(CloseFrame {
            code: CLOSE_UNAUTHORIZED,
            reason: "invalid or expired token".into(),
        })))
        .await;
}

/// Apply one parsed client frame to the connection
///
/// Split out of the socket loop so the protocol logic is testable without a
/// live socket.
pub fn apply_client_message(
    manager: &SessionManager,
    handle: &Arc<ConnectionHandle>,
    message: ClientMessage,
    now: u64,
) {
    handle.touch(now);
    match message {
        ClientMessage::Ping => {
            handle.mailbox().push(ServerMessage::Pong);
        }
        ClientMessage::Pong => {}
        ClientMessage::Subscribe {
            subscription,
            symbols,
        } => {
            manager.subscribe(&handle.connection_id, &subscription);
            tracing::debug!(
                connection_id = handle.connection_id.as_str(),
                subscription = subscription.as_str(),
                symbols = ?symbols,
                "Subscribed"
            );
            handle.mailbox().push(ServerMessage::SubscriptionConfirmed {
                subscription,
                subscribed: true,
            });
        }
        ClientMessage::Unsubscribe { subscription } => {
            manager.unsubscribe(&handle.connection_id, &subscription);
            handle.mailbox().push(ServerMessage::SubscriptionConfirmed {
                subscription,
                subscribed: false,
            });
        }
    }
}

/// Drive an accepted, authenticated connection until it ends
pub async fn run_connection(
    socket: WebSocket,
    handle: Arc<ConnectionHandle>,
    manager: Arc<SessionManager>,
) {
    let (mut sink, mut stream) = socket.split();

    let writer_handle = Arc::clone(&handle);
    let mut writer = tokio::spawn(async move {
        while let Some(message) = writer_handle.mailbox().recv().await {
            let text = match serde_json::to_string(&message) {
                Ok(text) => text,
                Err(e) => {
                    tracing::warn!(error = %e, "Failed to serialize outbound frame");
                    continue;
                }
            };
            if sink.send(Message::Text(text.into())).await.is_err() {
                break;
            }
        }
    });

    loop {
        tokio::select! {
            frame = stream.next() => {
                match frame {
                    Some(Ok(Message::Text(text))) => {
                        match serde_json::from_str::<ClientMessage>(&text) {
                            Ok(message) => {
                                apply_client_message(&manager, &handle, message, now_ms())
                            }
                            Err(e) => {
                                tracing::debug!(
                                    connection_id = handle.connection_id.as_str(),
                                    error = %e,
                                    "Ignoring unparseable client frame"
                                );
                            }
                        }
                    }
                    // Transport-level pongs also count as liveness
                    Some(Ok(Message::Pong(_))) => handle.touch(now_ms()),
                    Some(Ok(Message::Ping(_))) => handle.touch(now_ms()),
                    Some(Ok(Message::Close(_))) | Some(Err(_)) | None => break,
                    Some(Ok(_)) => {}
                }
            }
            // Writer ends when the mailbox is closed (eviction) or the sink fails
            _ = &mut writer => break,
        }
    }

    manager.unregister(&handle.connection_id);
    writer.abort();
}
