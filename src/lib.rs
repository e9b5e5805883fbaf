pub mod configuration;
pub mod container_management;
pub mod error_handling;
pub mod model;

pub use configuration::Settings;
pub use container_management::LabManager;
pub use error_handling::{BackendError, ConfigError, ManagerError};
pub use model::{Lab, Link, Machine};
