use log::info;
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;

use tokio::net::TcpListener;
use tokio::sync::watch;
use warp::{Filter, Rejection, Reply};

use super::routes::{health_route, session_route};
use super::types::Connections;
use crate::error_handling::types::WebError;
use crate::session_management::SessionServices;

/// HTTP front of the gateway: the session WebSocket and a health probe
pub struct WebServer {
    services: Arc<SessionServices>,
    connections: Connections,
    shutdown: Arc<watch::Sender<bool>>,
}

impl WebServer {
    pub fn new(services: Arc<SessionServices>) -> Self {
        Self {
            services,
            connections: Connections::new(),
            shutdown: Arc::new(watch::Sender::new(false)),
        }
    }

    /// Number of currently open session connections
    pub fn connections(&self) -> usize {
        self.connections.count()
    }

    pub fn routes(
        &self,
    ) -> impl Filter<Extract = (impl Reply,), Error = Rejection> + Clone + Send + Sync + 'static
    {
        session_route(
            self.services.clone(),
            self.connections.clone(),
            self.shutdown.subscribe(),
        )
        .or(health_route(self.connections.clone()))
    }

    /// Serves until `signal` resolves, then closes every open connection.
    ///
    /// Returns only after each connection has destroyed its session, so no container or
    /// tunnel outlives the server.
    pub async fn start(
        &self,
        addr: SocketAddr,
        signal: impl Future<Output = ()> + Send + 'static,
    ) -> Result<(), WebError> {
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|e| WebError::BadAddress(format!("{}: {}", addr, e)))?;
        info!("Listening for sessions on {}", addr);

        let shutdown = self.shutdown.clone();
        warp::serve(self.routes())
            .incoming(listener)
            .graceful(async move {
                signal.await;
                info!("Shutting down, closing open sessions");
                shutdown.send_replace(true);
            })
            .run()
            .await;

        self.connections.drained().await;
        info!("All sessions closed");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::configuration::types::{ControlConfig, VisibilityConfig};
    use crate::container_management::{ContainerEngine, DockerCli};
    use crate::directory::StaticDirectory;
    use crate::network::PortAllocator;
    use crate::session_management::fakes::{FakeLauncher, FakeRuntime, Monitor};
    use crate::session_management::{SecretGenerator, SessionSettings};
    use crate::tunnel::{WorkerCommand, WorkerLauncher};
    use crate::web_interface::types::CALLER_HEADER;
    use futures::{SinkExt, Stream, StreamExt};
    use std::net::Ipv4Addr;
    use std::time::Duration;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpStream;
    use tokio_tungstenite::connect_async;
    use tokio_tungstenite::tungstenite::client::IntoClientRequest;
    use tokio_tungstenite::tungstenite::Message;

    fn services() -> Arc<SessionServices> {
        let directory = Arc::new(
            StaticDirectory::default()
                .with_user("alice")
                .with_image("img1", "img1.img.gz"),
        );
        let ports = Arc::new(PortAllocator::new(None));
        Arc::new(SessionServices {
            identities: directory.clone(),
            catalog: directory,
            engine: ContainerEngine::new(Arc::new(DockerCli::new("true").unwrap())),
            tunnels: Arc::new(WorkerLauncher::new(
                WorkerCommand::new("true", Vec::new()),
                ports.clone(),
            )),
            ports,
            secrets: SecretGenerator::new(),
            settings: SessionSettings {
                visibility: VisibilityConfig {
                    attempts: 1,
                    interval_ms: 10,
                },
                ..Default::default()
            },
        })
    }

    fn fake_services(
        runtime: Arc<FakeRuntime>,
        launcher: Arc<FakeLauncher>,
    ) -> Arc<SessionServices> {
        let directory = Arc::new(
            StaticDirectory::default()
                .with_user("alice")
                .with_image("img1", "img1.img.gz"),
        );
        Arc::new(SessionServices {
            identities: directory.clone(),
            catalog: directory,
            engine: ContainerEngine::new(runtime),
            tunnels: launcher,
            ports: Arc::new(PortAllocator::new(None)),
            secrets: SecretGenerator::new(),
            settings: SessionSettings {
                control: ControlConfig {
                    connect_attempts: 5,
                    marker_attempts: 5,
                    poll_interval_ms: 20,
                    ..Default::default()
                },
                visibility: VisibilityConfig {
                    attempts: 3,
                    interval_ms: 10,
                },
                ..Default::default()
            },
        })
    }

    async fn wait_until_up(port: u16) {
        for _ in 0..50 {
            if TcpStream::connect((Ipv4Addr::LOCALHOST, port)).await.is_ok() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        panic!("web server never came up");
    }

    async fn spawn_server() -> (Arc<WebServer>, u16) {
        let port = PortAllocator::allocate().unwrap();
        let server = Arc::new(WebServer::new(services()));
        let running = server.clone();
        tokio::spawn(async move {
            let _ = running
                .start(
                    SocketAddr::from((Ipv4Addr::LOCALHOST, port)),
                    std::future::pending(),
                )
                .await;
        });

        wait_until_up(port).await;
        (server, port)
    }

    async fn get(port: u16, path: &str) -> String {
        let mut stream = TcpStream::connect((Ipv4Addr::LOCALHOST, port)).await.unwrap();
        let request = format!(
            "GET {} HTTP/1.1\r\nHost: localhost\r\nConnection: close\r\n\r\n",
            path
        );
        stream.write_all(request.as_bytes()).await.unwrap();
        let mut response = String::new();
        stream.read_to_string(&mut response).await.unwrap();
        response
    }

    async fn next_text<S>(ws: &mut S) -> String
    where
        S: Stream<Item = Result<Message, tokio_tungstenite::tungstenite::Error>> + Unpin,
    {
        loop {
            match ws.next().await.unwrap().unwrap() {
                Message::Text(text) => return text.to_string(),
                Message::Ping(_) | Message::Pong(_) => continue,
                other => panic!("unexpected frame {:?}", other),
            }
        }
    }

    #[tokio::test]
    async fn test_start_on_taken_address() {
        let held = std::net::TcpListener::bind((Ipv4Addr::LOCALHOST, 0)).unwrap();
        let server = WebServer::new(services());

        let result = server
            .start(held.local_addr().unwrap(), std::future::pending())
            .await;
        assert!(matches!(result, Err(WebError::BadAddress(_))));
    }

    #[tokio::test]
    async fn test_health() {
        let (_server, port) = spawn_server().await;

        let response = get(port, "/health").await;
        assert!(response.starts_with("HTTP/1.1 200"));
        assert!(response.ends_with(r#"{"status":"ok","connections":0}"#));
    }

    #[tokio::test]
    async fn test_session_requires_caller_header() {
        let (_server, port) = spawn_server().await;

        let result = connect_async(format!("ws://127.0.0.1:{}/session", port)).await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_session_calls() {
        let (server, port) = spawn_server().await;

        let mut request = format!("ws://127.0.0.1:{}/session", port)
            .into_client_request()
            .unwrap();
        request
            .headers_mut()
            .insert(CALLER_HEADER, "alice".parse().unwrap());
        let (mut ws, _) = connect_async(request).await.unwrap();

        ws.send(Message::text(
            r#"{"id": 1, "method": "start", "image_id": "missing-image"}"#,
        ))
        .await
        .unwrap();
        assert_eq!(next_text(&mut ws).await, r#"{"id":1,"progress":"validating"}"#);
        assert_eq!(next_text(&mut ws).await, r#"{"id":1,"error":"ImageNotFound"}"#);
        assert_eq!(server.connections(), 1);

        ws.send(Message::text("hello")).await.unwrap();
        assert_eq!(next_text(&mut ws).await, r#"{"id":0,"error":"BadRequest"}"#);

        ws.send(Message::text(r#"{"id": 2, "method": "destroy"}"#))
            .await
            .unwrap();
        assert_eq!(next_text(&mut ws).await, r#"{"id":2,"result":null}"#);

        ws.close(None).await.unwrap();
        for _ in 0..50 {
            if server.connections() == 0 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        assert_eq!(server.connections(), 0);
    }

    #[tokio::test]
    async fn test_shutdown_destroys_open_sessions() {
        let runtime = Arc::new(FakeRuntime::new(Monitor::Echo));
        let launcher = Arc::new(FakeLauncher::default());
        let server = Arc::new(WebServer::new(fake_services(
            runtime.clone(),
            launcher.clone(),
        )));

        let port = PortAllocator::allocate().unwrap();
        let (stop_tx, stop_rx) = tokio::sync::oneshot::channel::<()>();
        let running = server.clone();
        let serving = tokio::spawn(async move {
            running
                .start(SocketAddr::from((Ipv4Addr::LOCALHOST, port)), async move {
                    let _ = stop_rx.await;
                })
                .await
        });
        wait_until_up(port).await;

        let mut request = format!("ws://127.0.0.1:{}/session", port)
            .into_client_request()
            .unwrap();
        request
            .headers_mut()
            .insert(CALLER_HEADER, "alice".parse().unwrap());
        let (mut ws, _) = connect_async(request).await.unwrap();

        ws.send(Message::text(
            r#"{"id": 1, "method": "start", "image_id": "img1"}"#,
        ))
        .await
        .unwrap();
        let outcome = loop {
            let text = next_text(&mut ws).await;
            if !text.contains("progress") {
                break text;
            }
        };
        assert!(outcome.starts_with(r#"{"id":1,"result":{"#), "{}", outcome);
        assert_eq!(server.connections(), 1);
        assert_eq!(runtime.kills(), 0);

        stop_tx.send(()).unwrap();
        tokio::time::timeout(Duration::from_secs(5), serving)
            .await
            .unwrap()
            .unwrap()
            .unwrap();

        assert_eq!(server.connections(), 0);
        assert_eq!(runtime.kills(), 1);
        assert_eq!(launcher.kills(), 1);
    }
}
