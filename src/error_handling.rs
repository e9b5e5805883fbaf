//! Error types shared by the configuration, backend and manager layers.

pub mod types;

pub use types::{BackendError, ConfigError, MachineFailure, ManagerError};
