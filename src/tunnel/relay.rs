//! WebSocket to TCP relay run by the tunnel worker.
//!
//! Every WebSocket client accepted on the listen port gets its own TCP connection to
//! `127.0.0.1:<target>`. Bytes are copied verbatim in both directions until either side
//! closes. Browser remote-desktop clients offer the `binary` subprotocol, which is echoed
//! back when present.

use crate::error_handling::types::{NetworkError, TunnelError};
use futures::{SinkExt, StreamExt};
use log::{debug, info, warn};
use std::net::Ipv4Addr;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tokio_tungstenite::tungstenite::http::header::SEC_WEBSOCKET_PROTOCOL;
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{accept_hdr_async, WebSocketStream};

pub const SUBPROTOCOL: &str = "binary";

const CHUNK_SIZE: usize = 16 * 1024;

/// Accepts WebSocket clients on `listen_port` forever.
pub async fn serve(listen_port: u16, target_port: u16) -> Result<(), TunnelError> {
    let listener = TcpListener::bind((Ipv4Addr::UNSPECIFIED, listen_port))
        .await
        .map_err(NetworkError::BindFail)?;
    info!(
        "Tunnel listening on port {} for target 127.0.0.1:{}",
        listen_port, target_port
    );

    loop {
        let (stream, peer) = match listener.accept().await {
            Ok(accepted) => accepted,
            Err(e) => {
                warn!("Tunnel accept failed: {}", e);
                continue;
            }
        };
        debug!("Tunnel client {} connected", peer);

        tokio::spawn(async move {
            match handle_client(stream, target_port).await {
                Ok(()) => debug!("Tunnel client {} done", peer),
                Err(e) => warn!("Tunnel client {}: {}", peer, e),
            }
        });
    }
}

/// Runs the WebSocket handshake on `stream` and relays it to the target port.
pub async fn handle_client(stream: TcpStream, target_port: u16) -> Result<(), TunnelError> {
    let ws = accept_hdr_async(stream, negotiate_subprotocol)
        .await
        .map_err(|e| TunnelError::RelayFailed(format!("handshake: {}", e)))?;

    let target = TcpStream::connect((Ipv4Addr::LOCALHOST, target_port))
        .await
        .map_err(|e| TunnelError::RelayFailed(format!("target {}: {}", target_port, e)))?;

    relay(ws, target).await
}

#[allow(clippy::result_large_err)]
fn negotiate_subprotocol(request: &Request, mut response: Response) -> Result<Response, ErrorResponse> {
    let offered = request
        .headers()
        .get_all(SEC_WEBSOCKET_PROTOCOL)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .flat_map(|value| value.split(','))
        .any(|protocol| protocol.trim() == SUBPROTOCOL);

    if offered {
        response
            .headers_mut()
            .insert(SEC_WEBSOCKET_PROTOCOL, HeaderValue::from_static(SUBPROTOCOL));
    }
    Ok(response)
}

/// Copies bytes between `ws` and `target` until one side closes.
pub async fn relay<S>(ws: WebSocketStream<S>, target: TcpStream) -> Result<(), TunnelError>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let (mut ws_tx, mut ws_rx) = ws.split();
    let (mut tcp_rx, mut tcp_tx) = target.into_split();

    let inbound = async {
        while let Some(message) = ws_rx.next().await {
            let message = message.map_err(|e| TunnelError::RelayFailed(e.to_string()))?;
            let written = match message {
                Message::Binary(data) => tcp_tx.write_all(&data).await,
                Message::Text(text) => tcp_tx.write_all(text.as_bytes()).await,
                Message::Close(_) => break,
                _ => continue,
            };
            written.map_err(|e| TunnelError::RelayFailed(e.to_string()))?;
        }
        let _ = tcp_tx.shutdown().await;
        Ok::<(), TunnelError>(())
    };

    let outbound = async {
        let mut buf = vec![0u8; CHUNK_SIZE];
        loop {
            let n = tcp_rx
                .read(&mut buf)
                .await
                .map_err(|e| TunnelError::RelayFailed(e.to_string()))?;
            if n == 0 {
                break;
            }
            ws_tx
                .send(Message::binary(buf[..n].to_vec()))
                .await
                .map_err(|e| TunnelError::RelayFailed(e.to_string()))?;
        }
        let _ = ws_tx.close().await;
        Ok::<(), TunnelError>(())
    };

    tokio::select! {
        result = inbound => result,
        result = outbound => result,
    }
}
