//! Relay pump
//!
//! Each upgraded socket runs two tasks: a read loop (this module's entry
//! points, driven by the connection's own task) and a spawned writer task
//! draining the leg's outbound queue. The two directions of a pairing are
//! the two legs' read loops; neither buffers, reorders, or inspects frames
//! beyond the PC-side control-message policy.
//!
//! A read error, a close frame, a write failure, or the leg's close signal
//! all end the loop; the coordinator's detach then force-closes the peer so
//! a stale leg is never left registered.

use std::sync::Arc;

use axum::extract::ws::{Message, WebSocket};
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tracing::{debug, info};

use crate::api::AppState;
use crate::registry::LegHandle;

/// Drive an upgraded PC-leg socket until it fails or is closed.
pub(crate) async fn run_pc_leg(state: AppState, pin: String, socket: WebSocket) {
    let (sink, stream) = socket.split();
    let (handle, outbound) = LegHandle::new();

    state.coordinator.attach_pc(&pin, handle.clone()).await;
    info!(pin = %pin, "PC leg connected");

    tokio::spawn(write_loop(sink, outbound, handle.clone()));
    read_pc(&state, &pin, stream, &handle).await;

    state.coordinator.detach_pc(&pin, &handle).await;
    handle.close();
}

/// Drive an upgraded user-leg socket until it fails or is closed.
pub(crate) async fn run_user_leg(state: AppState, pin: String, socket: WebSocket) {
    let (sink, stream) = socket.split();
    let (handle, outbound) = LegHandle::new();

    // Admission was checked before the upgrade; losing the re-validation
    // race here just drops the socket.
    if let Err(err) = state.coordinator.attach_user(&pin, handle.clone()).await {
        debug!(pin = %pin, error = %err, "user leg refused after upgrade");
        return;
    }
    info!(pin = %pin, "user leg connected");

    tokio::spawn(write_loop(sink, outbound, handle.clone()));
    read_user(&state, &pin, stream, &handle).await;

    state.coordinator.detach_user(&pin, &handle).await;
    handle.close();
}

async fn read_pc(
    state: &AppState,
    pin: &str,
    mut stream: SplitStream<WebSocket>,
    handle: &Arc<LegHandle>,
) {
    loop {
        tokio::select! {
            frame = stream.next() => match frame {
                Some(Ok(Message::Text(text))) => {
                    state.coordinator.handle_pc_frame(pin, text).await;
                }
                Some(Ok(Message::Binary(frame))) => {
                    state.coordinator.relay_to_user(pin, Message::Binary(frame));
                }
                Some(Ok(Message::Close(_))) | None => break,
                Some(Ok(_)) => {} // ping/pong, answered by the transport
                Some(Err(err)) => {
                    debug!(pin = %pin, error = %err, "PC leg read failed");
                    break;
                }
            },
            _ = handle.wait_closed() => break,
        }
    }
}

async fn read_user(
    state: &AppState,
    pin: &str,
    mut stream: SplitStream<WebSocket>,
    handle: &Arc<LegHandle>,
) {
    loop {
        tokio::select! {
            frame = stream.next() => match frame {
                Some(Ok(frame @ (Message::Text(_) | Message::Binary(_)))) => {
                    state.coordinator.relay_to_pc(pin, frame);
                }
                Some(Ok(Message::Close(_))) | None => break,
                Some(Ok(_)) => {}
                Some(Err(err)) => {
                    debug!(pin = %pin, error = %err, "user leg read failed");
                    break;
                }
            },
            _ = handle.wait_closed() => break,
        }
    }
}

/// Drain a leg's outbound queue into its socket. A write failure closes the
/// leg, which in turn ends its read loop and tears the pairing down.
async fn write_loop(
    mut sink: SplitSink<WebSocket, Message>,
    mut outbound: mpsc::UnboundedReceiver<Message>,
    handle: Arc<LegHandle>,
) {
    loop {
        tokio::select! {
            frame = outbound.recv() => match frame {
                Some(frame) => {
                    if sink.send(frame).await.is_err() {
                        handle.close();
                        break;
                    }
                }
                None => break,
            },
            _ = handle.wait_closed() => break,
        }
    }
    let _ = sink.close().await;
}
