//! Per-connection session orchestration.
//!
//! A [`SessionController`] is owned by exactly one client connection and drives its
//! [`Session`] through validation, container launch, visibility polling and credential
//! rotation. Rotation runs as a spawned task that owns the call's reply handle, so the
//! connection keeps serving (and can destroy the session) while the monitor is slow.
//!
//! Container and tunnel live inside the session and are moved out exactly once by
//! whichever of teardown paths gets there first, which keeps kills from being doubled.

use log::{debug, error, info, warn};
use std::sync::Arc;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use uuid::Uuid;

use crate::configuration::types::{ControlConfig, EmulatorConfig, VisibilityConfig};
use crate::configuration::Config;
use crate::container_management::types::{container_name, ContainerSpec, DeviceMount};
use crate::container_management::ContainerEngine;
use crate::directory::{IdentityStore, ImageCatalog, ImageRecord};
use crate::error_handling::types::ContainerError;
use crate::network::{ControlChannel, ControlCommand, PortAllocator, RetryPolicy};
use crate::session_management::call_context::{CallContext, Phase, SessionReady, StartError};
use crate::session_management::secret_generator::SecretGenerator;
use crate::session_management::session::{Session, SessionState};
use crate::tunnel::TunnelLauncher;
use std::time::Duration;

/// Session tunables taken from the configuration.
#[derive(Debug, Clone, Default)]
pub struct SessionSettings {
    pub emulator: EmulatorConfig,
    pub control: ControlConfig,
    pub visibility: VisibilityConfig,
}

impl SessionSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            emulator: config.emulator.clone(),
            control: config.control.clone(),
            visibility: config.visibility.clone(),
        }
    }

    pub fn control_policy(&self) -> RetryPolicy {
        RetryPolicy::new(
            self.control.connect_attempts,
            Duration::from_millis(self.control.poll_interval_ms),
        )
    }

    pub fn visibility_policy(&self) -> RetryPolicy {
        RetryPolicy::new(
            self.visibility.attempts,
            Duration::from_millis(self.visibility.interval_ms),
        )
    }

    /// Location the emulator downloads `filename` from.
    pub fn image_url(&self, filename: &str) -> String {
        format!(
            "{}/{}",
            self.emulator.image_base_url.trim_end_matches('/'),
            filename.trim_start_matches('/')
        )
    }

    /// Privileged, host-networked emulator container for one session.
    pub fn container_spec(
        &self,
        name: &str,
        image: &ImageRecord,
        monitor_port: u16,
        display_port: u16,
    ) -> ContainerSpec {
        let spec = ContainerSpec::new(&self.emulator.image, name)
            .privileged(true)
            .host_network(true)
            .env("IMAGE_URL", self.image_url(&image.filename))
            .env("MONITOR_PORT", monitor_port)
            .env("VNC_PORT", display_port)
            .env("VNC_PASSWORD", "on");

        self.emulator
            .devices
            .iter()
            .fold(spec, |spec, path| spec.device(DeviceMount::same_path(path)))
    }
}

/// Everything a session needs from the outside, shared by all connections.
pub struct SessionServices {
    pub identities: Arc<dyn IdentityStore>,
    pub catalog: Arc<dyn ImageCatalog>,
    pub engine: ContainerEngine,
    pub tunnels: Arc<dyn TunnelLauncher>,
    pub ports: Arc<PortAllocator>,
    pub secrets: SecretGenerator,
    pub settings: SessionSettings,
}

impl SessionServices {
    /// Takes the container and tunnel out of `session` and kills both.
    async fn release(&self, session: &Mutex<Session>) {
        let (container, tunnel) = session.lock().await.take_resources();

        if let Some(mut tunnel) = tunnel {
            tunnel.kill().await;
        }
        if let Some(handle) = container {
            self.engine.kill(handle).await;
        }
    }
}

struct Launched {
    session_id: Uuid,
    container_name: String,
    monitor_port: u16,
    display_port: u16,
    credential: String,
}

pub struct SessionController {
    services: Arc<SessionServices>,
    session: Arc<Mutex<Session>>,
    rotation: Option<JoinHandle<()>>,
}

impl SessionController {
    pub fn new(services: Arc<SessionServices>, caller_id: &str) -> Self {
        Self {
            services,
            session: Arc::new(Mutex::new(Session::new(caller_id))),
            rotation: None,
        }
    }

    pub async fn state(&self) -> SessionState {
        self.session.lock().await.state
    }

    pub async fn session_id(&self) -> Uuid {
        self.session.lock().await.id
    }

    /// Handles a `start` call. The reply goes through `context`: validation and launch
    /// failures are answered before this returns, the final outcome comes from the
    /// rotation task.
    pub async fn start(&mut self, image_id: &str, context: CallContext) {
        let caller_id = {
            let mut session = self.session.lock().await;
            if session.state != SessionState::Idle {
                debug!("Start refused in state {}", session.state);
                drop(session);
                context.finish(Err(StartError::AlreadyStarted)).await;
                return;
            }
            session.state = SessionState::Validating;
            session.image_id = Some(image_id.to_string());
            session.caller_id.clone()
        };
        context.progress(Phase::Validating).await;

        if !self.is_entitled(&caller_id).await {
            return self.fail(context, StartError::NotEntitled).await;
        }
        let Some(image) = self.find_image(image_id).await else {
            return self.fail(context, StartError::ImageNotFound).await;
        };
        self.set_state(SessionState::ImageChecked).await;

        context.progress(Phase::Launching).await;
        let launched = match self.launch(image_id, &image).await {
            Ok(launched) => launched,
            Err(error) => return self.fail(context, error).await,
        };

        self.set_state(SessionState::AwaitingContainer).await;
        context.progress(Phase::AwaitingContainer).await;
        let visibility = self.services.settings.visibility_policy();
        if let Err(e) = self
            .services
            .engine
            .wait_until_visible(&launched.container_name, visibility)
            .await
        {
            error!("Session {}: {}", launched.session_id, e);
            return self.abort(context, StartError::LaunchFailed).await;
        }

        let tunnel = match self
            .services
            .tunnels
            .construct(
                launched.display_port,
                &[launched.monitor_port, launched.display_port],
            )
            .await
        {
            Ok(tunnel) => tunnel,
            Err(e) => {
                error!("Session {}: {}", launched.session_id, e);
                return self.abort(context, StartError::LaunchFailed).await;
            }
        };
        let tunnel_port = tunnel.port();
        {
            let mut session = self.session.lock().await;
            session.attach_tunnel(tunnel);
            session.state = SessionState::RotatingCredential;
        }
        context.progress(Phase::RotatingCredential).await;

        info!(
            "Session {}: rotating credential on monitor port {}",
            launched.session_id, launched.monitor_port
        );
        self.rotation = Some(tokio::spawn(rotate_credential(
            self.services.clone(),
            self.session.clone(),
            launched,
            tunnel_port,
            context,
        )));
    }

    /// Tears the session down from any state. Idempotent and infallible.
    pub async fn destroy(&mut self) {
        {
            let mut session = self.session.lock().await;
            if session.state == SessionState::Destroyed {
                return;
            }
            info!("Destroying session {} in state {}", session.id, session.state);
            session.state = SessionState::Destroyed;
        }
        self.services.release(&self.session).await;
    }

    /// Waits for a pending credential rotation to deliver its reply.
    pub async fn settle(&mut self) {
        if let Some(rotation) = self.rotation.take() {
            if let Err(e) = rotation.await {
                error!("Credential rotation task failed: {}", e);
            }
        }
    }

    async fn is_entitled(&self, caller_id: &str) -> bool {
        match self.services.identities.lookup(caller_id).await {
            Ok(Some(identity)) if identity.active => true,
            Ok(Some(_)) => {
                info!("Caller {} is not active", caller_id);
                false
            }
            Ok(None) => {
                info!("Caller {} is unknown", caller_id);
                false
            }
            Err(e) => {
                error!("Identity lookup for {} failed: {}", caller_id, e);
                false
            }
        }
    }

    async fn find_image(&self, image_id: &str) -> Option<ImageRecord> {
        match self.services.catalog.lookup(image_id).await {
            Ok(image) => {
                if image.is_none() {
                    info!("Image {} is not in the catalog", image_id);
                }
                image
            }
            Err(e) => {
                error!("Image lookup for {} failed: {}", image_id, e);
                None
            }
        }
    }

    async fn launch(&self, image_id: &str, image: &ImageRecord) -> Result<Launched, StartError> {
        let services = &self.services;
        let name = container_name(&services.settings.emulator.container_name_template, image_id);

        let [monitor_port, display_port] = services.ports.next_ports::<2>(&[]).map_err(|e| {
            error!("Port allocation failed: {}", e);
            StartError::LaunchFailed
        })?;
        let credential = services
            .secrets
            .generate(services.settings.emulator.credential_length);

        let session_id = {
            let mut session = self.session.lock().await;
            session.state = SessionState::Launching;
            session.container_name = Some(name.clone());
            session.monitor_port = Some(monitor_port);
            session.display_port = Some(display_port);
            session.credential = Some(credential.clone());
            session.id
        };

        let spec = services
            .settings
            .container_spec(&name, image, monitor_port, display_port);
        let handle = match services.engine.launch(spec).await {
            Ok(handle) => handle,
            Err(ContainerError::AlreadyExists(_)) => return Err(StartError::ContainerConflict),
            Err(e) => {
                error!("Session {}: {}", session_id, e);
                return Err(StartError::LaunchFailed);
            }
        };
        self.session.lock().await.attach_container(handle);

        Ok(Launched {
            session_id,
            container_name: name,
            monitor_port,
            display_port,
            credential,
        })
    }

    async fn set_state(&self, state: SessionState) {
        self.session.lock().await.state = state;
    }

    async fn fail(&self, context: CallContext, error: StartError) {
        {
            let mut session = self.session.lock().await;
            if !session.state.is_terminal() {
                session.state = SessionState::Failed;
            }
        }
        context.finish(Err(error)).await;
    }

    async fn abort(&self, context: CallContext, error: StartError) {
        self.services.release(&self.session).await;
        self.fail(context, error).await;
    }
}

async fn rotate_credential(
    services: Arc<SessionServices>,
    session: Arc<Mutex<Session>>,
    launched: Launched,
    tunnel_port: u16,
    context: CallContext,
) {
    let settings = &services.settings;
    let command = ControlCommand::rotate_credential(
        &settings.control.rotation_command,
        &launched.credential,
        &settings.control.completion_marker,
    );
    let result = ControlChannel::with_connection(
        launched.monitor_port,
        &command,
        settings.control_policy(),
        settings.control.marker_attempts,
    )
    .await;

    let mut guard = session.lock().await;
    if guard.state == SessionState::Destroyed {
        drop(guard);
        info!(
            "Session {} was destroyed during credential rotation",
            launched.session_id
        );
        context.finish(Err(StartError::CredentialRotationFailed)).await;
        return;
    }

    match result {
        Ok(()) => {
            guard.state = SessionState::Running;
            drop(guard);
            info!(
                "Session {} running, tunnel on port {}",
                launched.session_id, tunnel_port
            );
            context
                .finish(Ok(Some(SessionReady {
                    session_id: launched.session_id,
                    tunnel_port,
                    credential: launched.credential,
                })))
                .await;
        }
        Err(e) => {
            guard.state = SessionState::Failed;
            drop(guard);
            error!(
                "Credential rotation for session {} failed: {}",
                launched.session_id, e
            );
            services.release(&session).await;
            if context.is_closed() {
                warn!("Session {} lost its connection", launched.session_id);
            }
            context
                .finish(Err(StartError::CredentialRotationFailed))
                .await;
        }
    }
}
