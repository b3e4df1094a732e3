use crate::error_handling::types::TunnelError;
use crate::network::port_allocator::PortAllocator;
use async_trait::async_trait;
use log::{debug, info, warn};
use std::process::Stdio;
use std::sync::Arc;
use tokio::process::{Child, Command};

/// A running tunnel from a public WebSocket port to a local TCP port.
#[async_trait]
pub trait Tunnel: Send + Sync {
    /// Port clients connect to.
    fn port(&self) -> u16;

    /// Stops the tunnel. Idempotent, never fails.
    async fn kill(&mut self);
}

#[async_trait]
pub trait TunnelLauncher: Send + Sync {
    /// Starts a tunnel to `target_port` on a fresh port outside `in_use`.
    async fn construct(
        &self,
        target_port: u16,
        in_use: &[u16],
    ) -> Result<Box<dyn Tunnel>, TunnelError>;
}

/// How to start a tunnel worker process.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkerCommand {
    pub program: String,
    /// Arguments placed before the `tunnel` subcommand
    pub prefix: Vec<String>,
}

impl WorkerCommand {
    pub fn new(program: impl Into<String>, prefix: Vec<String>) -> Self {
        Self {
            program: program.into(),
            prefix,
        }
    }

    /// The running executable, which carries the `tunnel` subcommand itself.
    pub fn current_exe() -> Result<Self, TunnelError> {
        let exe = std::env::current_exe().map_err(TunnelError::SpawnFailed)?;
        Ok(Self::new(exe.to_string_lossy(), Vec::new()))
    }

    pub fn args(&self, listen_port: u16, target_port: u16) -> Vec<String> {
        let mut args = self.prefix.clone();
        args.extend([
            "tunnel".to_string(),
            "--listen-port".to_string(),
            listen_port.to_string(),
            "--target-port".to_string(),
            target_port.to_string(),
        ]);
        args
    }
}

/// Tunnel served by an isolated worker process.
#[derive(Debug)]
pub struct AccessTunnel {
    port: u16,
    target_port: u16,
    worker: Option<Child>,
}

impl AccessTunnel {
    /// Allocates a listen port outside `in_use` and spawns the worker relaying it to
    /// `target_port`.
    pub async fn construct(
        command: &WorkerCommand,
        ports: &PortAllocator,
        target_port: u16,
        in_use: &[u16],
    ) -> Result<Self, TunnelError> {
        let [port] = ports.next_ports::<1>(in_use)?;
        let worker = Command::new(&command.program)
            .args(command.args(port, target_port))
            .stdin(Stdio::null())
            .kill_on_drop(true)
            .spawn()
            .map_err(TunnelError::SpawnFailed)?;

        info!(
            "Tunnel worker {} started: port {} -> {}",
            worker.id().unwrap_or_default(),
            port,
            target_port
        );
        Ok(Self {
            port,
            target_port,
            worker: Some(worker),
        })
    }

    pub fn target_port(&self) -> u16 {
        self.target_port
    }

    pub fn pid(&self) -> Option<u32> {
        self.worker.as_ref().and_then(|worker| worker.id())
    }
}

#[async_trait]
impl Tunnel for AccessTunnel {
    fn port(&self) -> u16 {
        self.port
    }

    async fn kill(&mut self) {
        let Some(mut worker) = self.worker.take() else {
            return;
        };
        let pid = worker.id().unwrap_or_default();

        match worker.try_wait() {
            Ok(Some(status)) => debug!("Tunnel worker {} already exited: {}", pid, status),
            Ok(None) => {
                if let Err(e) = worker.start_kill() {
                    warn!("Failed to kill tunnel worker {}: {}", pid, e);
                    return;
                }
                match worker.wait().await {
                    Ok(_) => info!("Tunnel worker {} on port {} stopped", pid, self.port),
                    Err(e) => warn!("Failed to reap tunnel worker {}: {}", pid, e),
                }
            }
            Err(e) => warn!("Failed to query tunnel worker {}: {}", pid, e),
        }
    }
}

/// Launches [`AccessTunnel`] workers with ports from a shared allocator.
pub struct WorkerLauncher {
    command: WorkerCommand,
    ports: Arc<PortAllocator>,
}

impl WorkerLauncher {
    pub fn new(command: WorkerCommand, ports: Arc<PortAllocator>) -> Self {
        Self { command, ports }
    }
}

#[async_trait]
impl TunnelLauncher for WorkerLauncher {
    async fn construct(
        &self,
        target_port: u16,
        in_use: &[u16],
    ) -> Result<Box<dyn Tunnel>, TunnelError> {
        let tunnel =
            AccessTunnel::construct(&self.command, &self.ports, target_port, in_use).await?;
        Ok(Box::new(tunnel))
    }
}
