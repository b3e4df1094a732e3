//! Container management subsystem.
//!
//! Emulator sessions run in detached, self-removing containers started through a
//! Docker-compatible runtime. The runtime client is injected as an
//! `Arc<dyn ContainerRuntime>`, which keeps the engine testable without a daemon.
//!
//! Re-exports:
//! - [`ContainerEngine`]: launch, kill and visibility polling.
//! - [`ContainerRuntime`], [`DockerCli`], [`RuntimeError`]: the runtime seam.
//! - [`ContainerSpec`], [`ContainerHandle`], [`DeviceMount`]: core types.
//!
//! Example (non-running):
//! ```ignore
//! use std::sync::Arc;
//! use vmgate::container_management::{ContainerEngine, ContainerSpec, DockerCli};
//!
//! let engine = ContainerEngine::new(Arc::new(DockerCli::new("docker")?));
//! let handle = engine.launch(ContainerSpec::new("cusdeb/qemu:6.0-amd64", "qemu-img1")).await?;
//! engine.kill(handle).await;
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

pub mod container_engine;
pub mod runtime;
pub mod types;

pub use container_engine::ContainerEngine;
pub use runtime::{ContainerRuntime, DockerCli, RuntimeError};
pub use types::{container_name, ContainerHandle, ContainerSpec, DeviceMount};
