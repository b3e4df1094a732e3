use std::fmt;

#[derive(Debug)]
pub enum ConfigError {
    IoError(std::io::Error),
    TomlError(String),
    BadAddress(String),
    BadPortsRange(String),
    NotInRange(String),
    EmptyValue(String),
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::IoError(e) => write!(f, "IO error: {}", e),
            ConfigError::TomlError(e) => write!(f, "TOML parsing error: {}", e),
            ConfigError::BadAddress(e) => write!(f, "Address formatting error: {}", e),
            ConfigError::BadPortsRange(e) => write!(f, "Port range error: {}", e),
            ConfigError::NotInRange(e) => write!(f, "Value out of range: {}", e),
            ConfigError::EmptyValue(e) => write!(f, "Missing value: {}", e),
        }
    }
}

impl std::error::Error for ConfigError {}

impl From<std::io::Error> for ConfigError {
    fn from(err: std::io::Error) -> Self {
        ConfigError::IoError(err)
    }
}

#[derive(Debug)]
pub enum NetworkError {
    BindFail(std::io::Error),
    InvalidRange { min: u16, max: u16 },
    RangeExhausted { min: u16, max: u16 },
}

impl fmt::Display for NetworkError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NetworkError::BindFail(e) => write!(f, "Bind failed: {}", e),
            NetworkError::InvalidRange { min, max } => {
                write!(f, "Invalid port range {}-{}", min, max)
            }
            NetworkError::RangeExhausted { min, max } => {
                write!(f, "No free port left in range {}-{}", min, max)
            }
        }
    }
}

impl std::error::Error for NetworkError {}

/// Failures of the control channel to the emulator monitor.
#[derive(Debug)]
pub enum ChannelError {
    ConnectionTimeout { port: u16, attempts: u32 },
    WaitTimeout { marker: String, attempts: u32 },
    PeerClosed,
    Closed,
    IoError(std::io::Error),
}

impl fmt::Display for ChannelError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ChannelError::ConnectionTimeout { port, attempts } => write!(
                f,
                "Control port {} not reachable after {} attempts",
                port, attempts
            ),
            ChannelError::WaitTimeout { marker, attempts } => write!(
                f,
                "Marker {:?} not seen after {} polls",
                marker, attempts
            ),
            ChannelError::PeerClosed => write!(f, "Control channel closed by peer"),
            ChannelError::Closed => write!(f, "Control channel already closed"),
            ChannelError::IoError(e) => write!(f, "Control channel IO error: {}", e),
        }
    }
}

impl std::error::Error for ChannelError {}

impl From<std::io::Error> for ChannelError {
    fn from(err: std::io::Error) -> Self {
        ChannelError::IoError(err)
    }
}

#[derive(Debug)]
pub enum ContainerError {
    RuntimeNotAvailable,
    AlreadyExists(String),
    LaunchFailed(String),
    NotVisible { name: String, attempts: u32 },
}

impl fmt::Display for ContainerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ContainerError::RuntimeNotAvailable => write!(f, "Container runtime not available"),
            ContainerError::AlreadyExists(name) => {
                write!(f, "Container {} already exists", name)
            }
            ContainerError::LaunchFailed(e) => write!(f, "Container launch failed: {}", e),
            ContainerError::NotVisible { name, attempts } => write!(
                f,
                "Container {} not visible to the runtime after {} polls",
                name, attempts
            ),
        }
    }
}

impl std::error::Error for ContainerError {}

#[derive(Debug)]
pub enum TunnelError {
    PortUnavailable(NetworkError),
    SpawnFailed(std::io::Error),
    RelayFailed(String),
}

impl fmt::Display for TunnelError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TunnelError::PortUnavailable(e) => write!(f, "Tunnel port unavailable: {}", e),
            TunnelError::SpawnFailed(e) => write!(f, "Tunnel worker spawn failed: {}", e),
            TunnelError::RelayFailed(e) => write!(f, "Tunnel relay failed: {}", e),
        }
    }
}

impl std::error::Error for TunnelError {}

impl From<NetworkError> for TunnelError {
    fn from(err: NetworkError) -> Self {
        TunnelError::PortUnavailable(err)
    }
}

/// Failures of the identity store and image catalog backends.
#[derive(Debug)]
pub enum DirectoryError {
    ConnectionFailed(String),
    QueryFailed(String),
}

impl fmt::Display for DirectoryError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DirectoryError::ConnectionFailed(e) => write!(f, "Directory connection failed: {}", e),
            DirectoryError::QueryFailed(e) => write!(f, "Directory query failed: {}", e),
        }
    }
}

impl std::error::Error for DirectoryError {}

#[derive(Debug)]
pub enum WebError {
    BadAddress(String),
}

impl fmt::Display for WebError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WebError::BadAddress(e) => write!(f, "Cannot serve on address: {}", e),
        }
    }
}

impl std::error::Error for WebError {}

#[derive(Debug)]
pub enum ControllerError {
    ConfigurationError(ConfigError),
    ContainerError(ContainerError),
    DirectoryError(DirectoryError),
    WebError(WebError),
    InitializationFailed(String),
}

impl fmt::Display for ControllerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ControllerError::ConfigurationError(e) => write!(f, "Configuration error: {}", e),
            ControllerError::ContainerError(e) => write!(f, "Container error: {}", e),
            ControllerError::DirectoryError(e) => write!(f, "Directory error: {}", e),
            ControllerError::WebError(e) => write!(f, "Web error: {}", e),
            ControllerError::InitializationFailed(e) => write!(f, "Initialization failed: {}", e),
        }
    }
}

impl std::error::Error for ControllerError {}

impl From<ConfigError> for ControllerError {
    fn from(err: ConfigError) -> Self {
        ControllerError::ConfigurationError(err)
    }
}

impl From<ContainerError> for ControllerError {
    fn from(err: ContainerError) -> Self {
        ControllerError::ContainerError(err)
    }
}

impl From<DirectoryError> for ControllerError {
    fn from(err: DirectoryError) -> Self {
        ControllerError::DirectoryError(err)
    }
}

impl From<WebError> for ControllerError {
    fn from(err: WebError) -> Self {
        ControllerError::WebError(err)
    }
}
