use std::fmt;

#[derive(Debug)]
pub enum ConfigError {
    IoError(std::io::Error),
    TomlError(String),
    InvalidValue(String),
    UserNotResolved,
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::IoError(e) => write!(f, "IO error: {}", e),
            ConfigError::TomlError(e) => write!(f, "TOML parsing error: {}", e),
            ConfigError::InvalidValue(e) => write!(f, "Invalid setting: {}", e),
            ConfigError::UserNotResolved => write!(f, "Unable to resolve the current user name"),
        }
    }
}

impl std::error::Error for ConfigError {}

impl From<std::io::Error> for ConfigError {
    fn from(err: std::io::Error) -> Self {
        ConfigError::IoError(err)
    }
}

/// Errors surfaced by a container runtime backend.
///
/// `Plugin` is the network-plugin failure reported when a `network` or
/// `endpoint` object vanished under the runtime. It is never retried here.
#[derive(Debug)]
pub enum BackendError {
    Plugin(String),
    NotFound(String),
    Api { status: u16, message: String },
    Connection(String),
    Other(String),
}

impl fmt::Display for BackendError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BackendError::Plugin(e) => write!(f, "Network plugin error: {}", e),
            BackendError::NotFound(e) => write!(f, "Runtime object not found: {}", e),
            BackendError::Api { status, message } => {
                write!(f, "Runtime API error ({}): {}", status, message)
            }
            BackendError::Connection(e) => write!(f, "Runtime connection error: {}", e),
            BackendError::Other(e) => write!(f, "Runtime error: {}", e),
        }
    }
}

impl std::error::Error for BackendError {}

/// A failure attributed to a single device inside a fleet operation.
#[derive(Debug)]
pub struct MachineFailure {
    pub machine: String,
    pub error: ManagerError,
}

impl fmt::Display for MachineFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.machine, self.error)
    }
}

#[derive(Debug)]
pub enum ManagerError {
    Backend(BackendError),
    MachineNotFound(String),
    MachineBinary { binary: String },
    ImageNotFound(String),
    HandleNotSet(String),
    LinkNotFound(String),
    InvalidMetadata(String),
    Fleet(Vec<MachineFailure>),
}

impl ManagerError {
    /// True when the underlying runtime reported a network plugin failure.
    pub fn is_plugin_error(&self) -> bool {
        matches!(self, ManagerError::Backend(BackendError::Plugin(_)))
    }
}

impl fmt::Display for ManagerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ManagerError::Backend(e) => write!(f, "{}", e),
            ManagerError::MachineNotFound(e) => write!(f, "Devices not found: {}", e),
            ManagerError::MachineBinary { binary } => {
                write!(f, "Binary `{}` not found in device", binary)
            }
            ManagerError::ImageNotFound(e) => write!(f, "Image not found: {}", e),
            ManagerError::HandleNotSet(e) => write!(f, "Runtime object not deployed: {}", e),
            ManagerError::LinkNotFound(e) => write!(f, "Link not found in lab: {}", e),
            ManagerError::InvalidMetadata(e) => write!(f, "Invalid device metadata: {}", e),
            ManagerError::Fleet(failures) => {
                write!(f, "{} device operation(s) failed", failures.len())?;
                for failure in failures {
                    write!(f, "\n  - {}", failure)?;
                }
                Ok(())
            }
        }
    }
}

impl std::error::Error for ManagerError {}

impl From<BackendError> for ManagerError {
    fn from(err: BackendError) -> Self {
        ManagerError::Backend(err)
    }
}
