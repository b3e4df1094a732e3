use chrono::Utc;
use log::{debug, info, warn};
use std::sync::Arc;
use tokio::time::sleep;

use crate::container_management::runtime::{ContainerRuntime, RuntimeError};
use crate::container_management::types::{ContainerHandle, ContainerSpec};
use crate::error_handling::types::ContainerError;
use crate::network::types::RetryPolicy;

/// Launches, supervises and tears down emulator containers.
///
/// This is the only place where [`RuntimeError`] turns into [`ContainerError`]; callers
/// never see runtime-native errors.
#[derive(Clone)]
pub struct ContainerEngine {
    runtime: Arc<dyn ContainerRuntime>,
}

impl ContainerEngine {
    pub fn new(runtime: Arc<dyn ContainerRuntime>) -> Self {
        Self { runtime }
    }

    /// Fails with [`ContainerError::RuntimeNotAvailable`] when the runtime can't be reached.
    pub async fn ensure_available(&self) -> Result<(), ContainerError> {
        if self.runtime.is_available().await {
            Ok(())
        } else {
            Err(ContainerError::RuntimeNotAvailable)
        }
    }

    /// Starts the container described by `spec`, consuming it.
    pub async fn launch(&self, spec: ContainerSpec) -> Result<ContainerHandle, ContainerError> {
        info!("Launching container {} from {}", spec.name, spec.image);

        match self.runtime.create_and_start(&spec).await {
            Ok(id) => {
                info!("Container {} started ({})", spec.name, id);
                Ok(ContainerHandle {
                    name: spec.name,
                    id,
                    launched_at: Utc::now(),
                })
            }
            Err(e) => Err(Self::translate(&spec.name, e)),
        }
    }

    /// Forcefully terminates the container. Never fails: a container that is already gone
    /// is fine, anything else is logged.
    pub async fn kill(&self, handle: ContainerHandle) {
        debug!("Killing container {}", handle.name);
        match self.runtime.kill(&handle.name).await {
            Ok(()) => info!("Container {} killed", handle.name),
            Err(RuntimeError::NotFound(_)) => {
                debug!("Container {} already gone", handle.name)
            }
            Err(e) => warn!("Failed to kill container {}: {}", handle.name, e),
        }
    }

    /// Polls the runtime until it reports the container, once per `policy.interval`.
    pub async fn wait_until_visible(
        &self,
        name: &str,
        policy: RetryPolicy,
    ) -> Result<(), ContainerError> {
        for attempt in 1..=policy.attempts {
            match self.runtime.inspect(name).await {
                Ok(Some(status)) => {
                    info!(
                        "Container {} visible ({}) after {} polls",
                        name, status, attempt
                    );
                    return Ok(());
                }
                Ok(None) => debug!(
                    "Container {} not visible yet ({}/{})",
                    name, attempt, policy.attempts
                ),
                Err(e) => debug!("Inspect of {} failed ({}/{}): {}", name, attempt, policy.attempts, e),
            }
            if attempt < policy.attempts {
                sleep(policy.interval).await;
            }
        }

        warn!(
            "Container {} never became visible after {} polls",
            name, policy.attempts
        );
        Err(ContainerError::NotVisible {
            name: name.to_string(),
            attempts: policy.attempts,
        })
    }

    fn translate(name: &str, error: RuntimeError) -> ContainerError {
        match error {
            RuntimeError::Conflict(e) => {
                warn!("Container name {} is taken: {}", name, e);
                ContainerError::AlreadyExists(name.to_string())
            }
            RuntimeError::Unavailable(e) => {
                warn!("Container runtime unavailable: {}", e);
                ContainerError::RuntimeNotAvailable
            }
            RuntimeError::NotFound(e) | RuntimeError::Api(e) => {
                warn!("Launch of {} failed: {}", name, e);
                ContainerError::LaunchFailed(e)
            }
        }
    }
}
