use serde::Deserialize;

/// Inclusive range of host ports handed out to sessions.
#[derive(Debug, PartialEq, Clone, Copy, Deserialize)]
pub struct PortRange {
    pub start: u16,
    pub end: u16,
}

/// Everything the emulator container needs to know.
#[derive(Debug, PartialEq, Clone, Deserialize)]
#[serde(default)]
pub struct EmulatorConfig {
    /// Emulator image reference passed to the container runtime
    pub image: String,
    /// Container name template, `{image_id}` is substituted
    pub container_name_template: String,
    /// Base location the emulator downloads VM images from
    pub image_base_url: String,
    /// Container runtime binary (`docker` or a compatible CLI)
    pub runtime_binary: String,
    /// Length of the one-time remote-desktop credential
    pub credential_length: usize,
    /// Host devices bind-mounted read-write into the container
    pub devices: Vec<String>,
}

impl Default for EmulatorConfig {
    fn default() -> Self {
        Self {
            image: String::from("cusdeb/qemu:6.0-amd64"),
            container_name_template: String::from("qemu-{image_id}"),
            image_base_url: String::from("http://127.0.0.1:8008"),
            runtime_binary: String::from("docker"),
            credential_length: 8,
            devices: vec![String::from("/dev")],
        }
    }
}

/// Monitor control-channel timing and the credential rotation protocol.
#[derive(Debug, PartialEq, Clone, Deserialize)]
#[serde(default)]
pub struct ControlConfig {
    pub connect_attempts: u32,
    pub marker_attempts: u32,
    pub poll_interval_ms: u64,
    /// Sent verbatim before the credential, include the line terminator
    pub rotation_command: String,
    pub completion_marker: String,
}

impl Default for ControlConfig {
    fn default() -> Self {
        Self {
            connect_attempts: 30,
            marker_attempts: 10,
            poll_interval_ms: 1000,
            rotation_command: String::from("change vnc password\n"),
            completion_marker: String::from("(qemu)"),
        }
    }
}

#[derive(Debug, PartialEq, Clone, Deserialize)]
#[serde(default)]
pub struct VisibilityConfig {
    pub attempts: u32,
    pub interval_ms: u64,
}

impl Default for VisibilityConfig {
    fn default() -> Self {
        Self {
            attempts: 60,
            interval_ms: 1000,
        }
    }
}

/// Where entitlements and the image catalog come from.
///
/// With `database_url` set, both are read from the `users` and `images` tables of that
/// database. Otherwise the static `users` and `images` lists below are used.
#[derive(Debug, PartialEq, Clone, Deserialize)]
#[serde(default)]
pub struct DirectoryConfig {
    pub database_url: Option<String>,
    pub users: Vec<String>,
    pub images: Vec<String>,
    /// Download filename template for static images, `{image_id}` is substituted
    pub image_filename_template: String,
}

impl Default for DirectoryConfig {
    fn default() -> Self {
        Self {
            database_url: None,
            users: Vec::new(),
            images: Vec::new(),
            image_filename_template: String::from("{image_id}.img.gz"),
        }
    }
}

/// Tunnel worker launch settings.
#[derive(Debug, PartialEq, Clone, Default, Deserialize)]
#[serde(default)]
pub struct TunnelConfig {
    /// Worker executable, defaults to the running binary
    pub program: Option<String>,
}
