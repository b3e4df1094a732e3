//! Container runtime client.
//!
//! [`ContainerRuntime`] is the seam between session orchestration and whatever actually runs
//! containers. [`DockerCli`] drives a Docker-compatible command line (`docker`, `podman`).
//! Errors stay runtime-native ([`RuntimeError`]) here; the engine translates them.

use super::types::ContainerSpec;
use async_trait::async_trait;
use log::debug;
use regex::RegexSet;
use std::fmt;
use std::process::Stdio;
use tokio::process::Command;

const CONFLICT: usize = 0;
const NOT_FOUND: usize = 1;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RuntimeError {
    /// A container with the requested name already exists
    Conflict(String),
    /// The named container does not exist or is not running
    NotFound(String),
    /// Any other failure reported by the runtime
    Api(String),
    /// The runtime could not be invoked at all
    Unavailable(String),
}

impl fmt::Display for RuntimeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RuntimeError::Conflict(e) => write!(f, "Name conflict: {}", e),
            RuntimeError::NotFound(e) => write!(f, "No such container: {}", e),
            RuntimeError::Api(e) => write!(f, "Runtime error: {}", e),
            RuntimeError::Unavailable(e) => write!(f, "Runtime unavailable: {}", e),
        }
    }
}

impl std::error::Error for RuntimeError {}

#[async_trait]
pub trait ContainerRuntime: Send + Sync {
    /// Creates and starts a detached, self-removing container. Returns the runtime id.
    async fn create_and_start(&self, spec: &ContainerSpec) -> Result<String, RuntimeError>;

    /// Forcefully terminates the named container.
    async fn kill(&self, name: &str) -> Result<(), RuntimeError>;

    /// Current status of the named container, `None` when the runtime doesn't know it.
    async fn inspect(&self, name: &str) -> Result<Option<String>, RuntimeError>;

    async fn is_available(&self) -> bool;
}

/// Runtime backed by a Docker-compatible CLI.
pub struct DockerCli {
    binary: String,
    stderr_patterns: RegexSet,
}

impl DockerCli {
    pub fn new(binary: impl Into<String>) -> Result<Self, RuntimeError> {
        let stderr_patterns = RegexSet::new([
            r"(?i)\bconflict\b|is already in use",
            r"(?i)no such (container|object)|no container with name|is not running",
        ])
        .map_err(|e| RuntimeError::Api(e.to_string()))?;

        Ok(Self {
            binary: binary.into(),
            stderr_patterns,
        })
    }

    pub fn binary(&self) -> &str {
        &self.binary
    }

    /// Command line for `create_and_start`, without the binary.
    pub fn run_args(spec: &ContainerSpec) -> Vec<String> {
        let mut args: Vec<String> = vec![
            "run".into(),
            "--detach".into(),
            "--rm".into(),
            "--name".into(),
            spec.name.clone(),
        ];

        if spec.privileged {
            args.push("--privileged".into());
        }
        if spec.host_network {
            args.push("--network".into());
            args.push("host".into());
        }
        for device in &spec.devices {
            args.push("-v".into());
            args.push(device.as_volume_arg());
        }
        for (key, value) in &spec.env {
            args.push("-e".into());
            args.push(format!("{}={}", key, value));
        }

        args.push(spec.image.clone());
        args
    }

    /// Maps a failed invocation's stderr to the matching error variant.
    pub fn classify(&self, stderr: &str) -> RuntimeError {
        let matches = self.stderr_patterns.matches(stderr);
        let message = stderr.trim().to_string();
        if matches.matched(CONFLICT) {
            RuntimeError::Conflict(message)
        } else if matches.matched(NOT_FOUND) {
            RuntimeError::NotFound(message)
        } else {
            RuntimeError::Api(message)
        }
    }

    async fn run(&self, args: &[String]) -> Result<String, RuntimeError> {
        debug!("Running {} {}", self.binary, args.join(" "));

        let output = Command::new(&self.binary)
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .output()
            .await
            .map_err(|e| RuntimeError::Unavailable(format!("{}: {}", self.binary, e)))?;

        if !output.status.success() {
            return Err(self.classify(&String::from_utf8_lossy(&output.stderr)));
        }

        Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
    }
}

#[async_trait]
impl ContainerRuntime for DockerCli {
    async fn create_and_start(&self, spec: &ContainerSpec) -> Result<String, RuntimeError> {
        self.run(&Self::run_args(spec)).await
    }

    async fn kill(&self, name: &str) -> Result<(), RuntimeError> {
        self.run(&["kill".to_string(), name.to_string()])
            .await
            .map(|_| ())
    }

    async fn inspect(&self, name: &str) -> Result<Option<String>, RuntimeError> {
        let args = [
            "inspect".to_string(),
            "--format".to_string(),
            "{{.State.Status}}".to_string(),
            name.to_string(),
        ];
        match self.run(&args).await {
            Ok(status) => Ok(Some(status)),
            Err(RuntimeError::NotFound(_)) => Ok(None),
            Err(e) => Err(e),
        }
    }

    async fn is_available(&self) -> bool {
        let available = Command::new(&self.binary)
            .arg("--version")
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .await
            .map(|status| status.success())
            .unwrap_or(false);

        debug!("{} availability check: {}", self.binary, available);
        available
    }
}
