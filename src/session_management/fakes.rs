//! Test doubles for the container runtime and the tunnel launcher.

use crate::container_management::runtime::{ContainerRuntime, RuntimeError};
use crate::container_management::types::ContainerSpec;
use crate::error_handling::types::TunnelError;
use crate::tunnel::{Tunnel, TunnelLauncher};
use async_trait::async_trait;
use std::collections::BTreeMap;
use std::net::Ipv4Addr;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;

pub(crate) const MARKER: &str = "(qemu)";

#[derive(Debug, Clone, Copy, PartialEq)]
pub(crate) enum Monitor {
    /// Answers with the marker once the credential arrived twice
    Echo,
    /// Accepts and never answers
    Silent,
    /// Nothing listens on the monitor port
    Absent,
}

/// Container runtime that runs nothing but a fake emulator monitor
pub(crate) struct FakeRuntime {
    pub(crate) conflict: bool,
    pub(crate) visible: bool,
    pub(crate) monitor: Monitor,
    pub(crate) creates: AtomicUsize,
    pub(crate) kills: AtomicUsize,
    pub(crate) env: Mutex<BTreeMap<String, String>>,
    pub(crate) received: Arc<Mutex<String>>,
    pub(crate) monitor_closed: Arc<AtomicBool>,
}

impl FakeRuntime {
    pub(crate) fn new(monitor: Monitor) -> Self {
        Self {
            conflict: false,
            visible: true,
            monitor,
            creates: AtomicUsize::new(0),
            kills: AtomicUsize::new(0),
            env: Mutex::new(BTreeMap::new()),
            received: Arc::new(Mutex::new(String::new())),
            monitor_closed: Arc::new(AtomicBool::new(false)),
        }
    }

    pub(crate) fn kills(&self) -> usize {
        self.kills.load(Ordering::SeqCst)
    }

    pub(crate) fn creates(&self) -> usize {
        self.creates.load(Ordering::SeqCst)
    }

    async fn spawn_monitor(&self, port: u16) {
        let listener = TcpListener::bind((Ipv4Addr::LOCALHOST, port)).await.unwrap();
        let behavior = self.monitor;
        let received = self.received.clone();
        let closed = self.monitor_closed.clone();

        tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut buf = [0u8; 256];
            let mut answered = false;
            loop {
                let n = match socket.read(&mut buf).await {
                    Ok(0) | Err(_) => break,
                    Ok(n) => n,
                };
                let text = {
                    let mut received = received.lock().unwrap();
                    received.push_str(&String::from_utf8_lossy(&buf[..n]));
                    received.clone()
                };
                if behavior == Monitor::Echo && !answered && text.matches('\n').count() >= 3 {
                    answered = true;
                    socket
                        .write_all(format!("{}\n", MARKER).as_bytes())
                        .await
                        .unwrap();
                }
            }
            closed.store(true, Ordering::SeqCst);
        });
    }
}

#[async_trait]
impl ContainerRuntime for FakeRuntime {
    async fn create_and_start(&self, spec: &ContainerSpec) -> Result<String, RuntimeError> {
        if self.conflict {
            return Err(RuntimeError::Conflict(format!(
                "The container name \"/{}\" is already in use",
                spec.name
            )));
        }
        self.creates.fetch_add(1, Ordering::SeqCst);
        *self.env.lock().unwrap() = spec.env.clone();

        if self.monitor != Monitor::Absent {
            let port: u16 = spec.env["MONITOR_PORT"].parse().unwrap();
            self.spawn_monitor(port).await;
        }
        Ok(format!("id-{}", spec.name))
    }

    async fn kill(&self, _name: &str) -> Result<(), RuntimeError> {
        self.kills.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn inspect(&self, _name: &str) -> Result<Option<String>, RuntimeError> {
        if self.visible && self.creates() > 0 {
            Ok(Some("running".to_string()))
        } else {
            Ok(None)
        }
    }

    async fn is_available(&self) -> bool {
        true
    }
}

pub(crate) struct FakeTunnel {
    pub(crate) port: u16,
    pub(crate) kills: Arc<AtomicUsize>,
}

#[async_trait]
impl Tunnel for FakeTunnel {
    fn port(&self) -> u16 {
        self.port
    }

    async fn kill(&mut self) {
        self.kills.fetch_add(1, Ordering::SeqCst);
    }
}

#[derive(Default)]
pub(crate) struct FakeLauncher {
    pub(crate) fail: bool,
    pub(crate) constructed: AtomicUsize,
    pub(crate) kills: Arc<AtomicUsize>,
    pub(crate) target: Mutex<Option<u16>>,
    pub(crate) in_use: Mutex<Vec<u16>>,
}

impl FakeLauncher {
    pub(crate) fn kills(&self) -> usize {
        self.kills.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl TunnelLauncher for FakeLauncher {
    async fn construct(
        &self,
        target_port: u16,
        in_use: &[u16],
    ) -> Result<Box<dyn Tunnel>, TunnelError> {
        if self.fail {
            return Err(TunnelError::RelayFailed("no worker".to_string()));
        }
        self.constructed.fetch_add(1, Ordering::SeqCst);
        *self.target.lock().unwrap() = Some(target_port);
        *self.in_use.lock().unwrap() = in_use.to_vec();
        Ok(Box::new(FakeTunnel {
            port: 6080,
            kills: self.kills.clone(),
        }))
    }
}
