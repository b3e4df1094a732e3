use futures::{SinkExt, StreamExt};
use log::{debug, error, info};
use std::sync::Arc;
use tokio::sync::{mpsc, watch};
use warp::ws::{Message, WebSocket, Ws};
use warp::{reply, Filter, Rejection, Reply};

use super::types::{Connections, HealthResponse, CALLER_HEADER};
use crate::session_management::{serve_connection, SessionController, SessionServices};

const FRAME_BUFFER: usize = 16;
const REPLY_BUFFER: usize = 64;

/// GET /health
pub fn health_route(
    connections: Connections,
) -> impl Filter<Extract = (impl Reply,), Error = Rejection> + Clone {
    warp::path("health")
        .and(warp::path::end())
        .and(warp::get())
        .map(move || {
            reply::json(&HealthResponse {
                status: "ok",
                connections: connections.count(),
            })
        })
}

/// GET /session, upgraded to a WebSocket carrying JSON call frames.
///
/// Connections stop reading frames once `shutdown` turns true, which tears their session down.
pub fn session_route(
    services: Arc<SessionServices>,
    connections: Connections,
    shutdown: watch::Receiver<bool>,
) -> impl Filter<Extract = (impl Reply,), Error = Rejection> + Clone {
    warp::path("session")
        .and(warp::path::end())
        .and(warp::header::<String>(CALLER_HEADER))
        .and(warp::ws())
        .map(move |caller_id: String, ws: Ws| {
            let services = services.clone();
            let connections = connections.clone();
            let shutdown = shutdown.clone();
            ws.on_upgrade(move |socket| {
                handle_socket(socket, caller_id, services, connections, shutdown)
            })
        })
}

async fn handle_socket(
    socket: WebSocket,
    caller_id: String,
    services: Arc<SessionServices>,
    connections: Connections,
    mut shutdown: watch::Receiver<bool>,
) {
    let open = connections.opened();
    info!("Caller {} connected ({} open)", caller_id, open);

    let (mut ws_tx, mut ws_rx) = socket.split();
    let (frames_tx, frames_rx) = mpsc::channel::<String>(FRAME_BUFFER);
    let (replies_tx, mut replies_rx) = mpsc::channel(REPLY_BUFFER);

    let controller = SessionController::new(services, &caller_id);
    let session = tokio::spawn(serve_connection(controller, frames_rx, replies_tx));

    let writer = tokio::spawn(async move {
        while let Some(reply) = replies_rx.recv().await {
            let text = match reply.to_json() {
                Ok(text) => text,
                Err(e) => {
                    error!("Unable to encode reply to call {}: {}", reply.id, e);
                    continue;
                }
            };
            if ws_tx.send(Message::text(text)).await.is_err() {
                break;
            }
            if reply.is_terminal() {
                debug!("Call {} answered", reply.id);
            }
        }
        let _ = ws_tx.close().await;
    });

    let mut stopping = *shutdown.borrow();
    while !stopping {
        let message = tokio::select! {
            message = ws_rx.next() => message,
            changed = shutdown.changed() => {
                stopping = changed.is_err() || *shutdown.borrow();
                continue;
            }
        };
        let message = match message {
            Some(Ok(message)) => message,
            None => break,
            Some(Err(e)) => {
                debug!("WebSocket error from {}: {}", caller_id, e);
                break;
            }
        };
        if message.is_close() {
            break;
        }
        let Ok(text) = message.to_str() else {
            continue;
        };
        if frames_tx.send(text.to_string()).await.is_err() {
            break;
        }
    }
    if stopping {
        info!("Closing the session of {} for shutdown", caller_id);
    }
    drop(frames_tx);

    if let Err(e) = session.await {
        error!("Session task for {} failed: {}", caller_id, e);
    }
    let _ = writer.await;

    let open = connections.closed();
    info!("Caller {} disconnected ({} open)", caller_id, open);
}
