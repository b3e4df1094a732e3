use crate::container_management::types::ContainerHandle;
use crate::tunnel::Tunnel;
use chrono::{DateTime, Utc};
use std::fmt;
use uuid::Uuid;

/// Lifecycle of a session.
///
/// ```text
/// Idle → Validating → ImageChecked → Launching → AwaitingContainer → RotatingCredential → Running
///   any state → Failed | Destroyed
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Idle,
    Validating,
    ImageChecked,
    Launching,
    AwaitingContainer,
    RotatingCredential,
    Running,
    Failed,
    Destroyed,
}

impl SessionState {
    /// No further transition happens from here except to `Destroyed`.
    pub fn is_terminal(&self) -> bool {
        matches!(self, SessionState::Failed | SessionState::Destroyed)
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// One VM instance bound to one client connection.
pub struct Session {
    pub id: Uuid,
    pub caller_id: String,
    pub image_id: Option<String>,
    pub container_name: Option<String>,
    pub monitor_port: Option<u16>,
    pub display_port: Option<u16>,
    pub credential: Option<String>,
    pub state: SessionState,
    pub created_at: DateTime<Utc>,
    container: Option<ContainerHandle>,
    tunnel: Option<Box<dyn Tunnel>>,
}

impl Session {
    pub fn new(caller_id: &str) -> Self {
        Self {
            id: Uuid::new_v4(),
            caller_id: caller_id.to_string(),
            image_id: None,
            container_name: None,
            monitor_port: None,
            display_port: None,
            credential: None,
            state: SessionState::Idle,
            created_at: Utc::now(),
            container: None,
            tunnel: None,
        }
    }

    pub fn attach_container(&mut self, handle: ContainerHandle) {
        self.container = Some(handle);
    }

    pub fn attach_tunnel(&mut self, tunnel: Box<dyn Tunnel>) {
        self.tunnel = Some(tunnel);
    }

    /// Moves the container and tunnel out of the session. Each can only be taken once.
    pub fn take_resources(&mut self) -> (Option<ContainerHandle>, Option<Box<dyn Tunnel>>) {
        (self.container.take(), self.tunnel.take())
    }
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("id", &self.id)
            .field("caller_id", &self.caller_id)
            .field("image_id", &self.image_id)
            .field("container_name", &self.container_name)
            .field("monitor_port", &self.monitor_port)
            .field("display_port", &self.display_port)
            .field("state", &self.state)
            .field("created_at", &self.created_at)
            .finish_non_exhaustive()
    }
}
