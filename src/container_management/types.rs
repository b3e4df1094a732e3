//! Core types used by the container management subsystem.

use chrono::{DateTime, Utc};
use std::collections::BTreeMap;

/// Host path bind-mounted into the container.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceMount {
    pub host_path: String,
    pub container_path: String,
    pub read_write: bool,
}

impl DeviceMount {
    /// Mounts `path` at the same location inside the container, read-write.
    pub fn same_path(path: &str) -> Self {
        Self {
            host_path: path.to_string(),
            container_path: path.to_string(),
            read_write: true,
        }
    }

    /// `host:container:mode` form understood by the runtime CLI.
    pub fn as_volume_arg(&self) -> String {
        format!(
            "{}:{}:{}",
            self.host_path,
            self.container_path,
            if self.read_write { "rw" } else { "ro" }
        )
    }
}

/// Immutable description of one emulator container.
///
/// Deliberately not `Clone`: [`ContainerEngine::launch`](super::ContainerEngine::launch)
/// takes it by value, so a spec can only ever be launched once.
#[derive(Debug, PartialEq, Eq)]
pub struct ContainerSpec {
    pub image: String,
    pub name: String,
    pub privileged: bool,
    pub host_network: bool,
    pub devices: Vec<DeviceMount>,
    /// Ordered so the runtime command line is deterministic
    pub env: BTreeMap<String, String>,
}

impl ContainerSpec {
    pub fn new(image: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            image: image.into(),
            name: name.into(),
            privileged: false,
            host_network: false,
            devices: Vec::new(),
            env: BTreeMap::new(),
        }
    }

    pub fn privileged(mut self, privileged: bool) -> Self {
        self.privileged = privileged;
        self
    }

    pub fn host_network(mut self, host_network: bool) -> Self {
        self.host_network = host_network;
        self
    }

    pub fn device(mut self, mount: DeviceMount) -> Self {
        self.devices.push(mount);
        self
    }

    pub fn env(mut self, key: &str, value: impl ToString) -> Self {
        self.env.insert(key.to_string(), value.to_string());
        self
    }
}

/// Substitutes `{image_id}` in a container name template.
pub fn container_name(template: &str, image_id: &str) -> String {
    template.replace("{image_id}", image_id)
}

/// A container that was started by the runtime.
///
/// Not `Clone`: killing consumes the handle, so one container is killed at most once.
#[derive(Debug, PartialEq, Eq)]
pub struct ContainerHandle {
    pub name: String,
    /// Identifier printed by the runtime on start
    pub id: String,
    pub launched_at: DateTime<Utc>,
}
