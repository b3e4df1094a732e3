use log::{error, info};
use std::future::Future;
use std::sync::Arc;

use crate::configuration::config::Config;
use crate::configuration::types::DirectoryConfig;
use crate::container_management::{ContainerEngine, ContainerRuntime, DockerCli};
use crate::directory::{DatabaseDirectory, IdentityStore, ImageCatalog, StaticDirectory};
use crate::error_handling::types::*;
use crate::network::PortAllocator;
use crate::session_management::{SecretGenerator, SessionServices, SessionSettings};
use crate::tunnel::{WorkerCommand, WorkerLauncher};
use crate::web_interface::WebServer;

/// Wires configuration, collaborators and the web front together.
pub struct Controller {
    config: Config,
    services: Arc<SessionServices>,
}

impl Controller {
    /// Builds a controller driving the configured Docker-compatible runtime.
    pub async fn new(config: Config) -> Result<Self, ControllerError> {
        let runtime = DockerCli::new(config.emulator.runtime_binary.as_str())
            .map_err(|e| ControllerError::InitializationFailed(e.to_string()))?;
        Self::with_runtime(config, Arc::new(runtime)).await
    }

    pub async fn with_runtime(
        config: Config,
        runtime: Arc<dyn ContainerRuntime>,
    ) -> Result<Self, ControllerError> {
        let engine = ContainerEngine::new(runtime);
        engine.ensure_available().await.map_err(|e| {
            error!(
                "Container runtime {} is not available",
                config.emulator.runtime_binary
            );
            e
        })?;

        let (identities, catalog) = Self::directory(&config.directory).await?;

        let ports = Arc::new(PortAllocator::new(config.ports));
        let worker = match &config.tunnel.program {
            Some(program) => WorkerCommand::new(program.as_str(), Vec::new()),
            None => WorkerCommand::current_exe()
                .map_err(|e| ControllerError::InitializationFailed(e.to_string()))?,
        };
        info!("Tunnel workers run {}", worker.program);

        let services = Arc::new(SessionServices {
            identities,
            catalog,
            engine,
            tunnels: Arc::new(WorkerLauncher::new(worker, ports.clone())),
            ports,
            secrets: SecretGenerator::new(),
            settings: SessionSettings::from_config(&config),
        });

        Ok(Self { config, services })
    }

    async fn directory(
        config: &DirectoryConfig,
    ) -> Result<(Arc<dyn IdentityStore>, Arc<dyn ImageCatalog>), ControllerError> {
        if let Some(url) = &config.database_url {
            info!("Reading users and images from the database");
            let directory = Arc::new(DatabaseDirectory::connect(url).await?);
            let identities: Arc<dyn IdentityStore> = directory.clone();
            let catalog: Arc<dyn ImageCatalog> = directory;
            return Ok((identities, catalog));
        }

        info!(
            "Using the static directory ({} users, {} images)",
            config.users.len(),
            config.images.len()
        );
        let directory = Arc::new(StaticDirectory::from_config(config));
        let identities: Arc<dyn IdentityStore> = directory.clone();
        let catalog: Arc<dyn ImageCatalog> = directory;
        Ok((identities, catalog))
    }

    pub fn services(&self) -> Arc<SessionServices> {
        self.services.clone()
    }

    /// Serves client connections until `shutdown` resolves, then tears every open session
    /// down before returning.
    pub async fn run(
        &self,
        shutdown: impl Future<Output = ()> + Send + 'static,
    ) -> Result<(), ControllerError> {
        let addr = self.config.socket_addr()?;
        WebServer::new(self.services.clone())
            .start(addr, shutdown)
            .await?;
        Ok(())
    }
}
