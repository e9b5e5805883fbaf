use crate::error_handling::types::ConfigError;
use log::{debug, info};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Read-only settings snapshot consumed by the engine.
///
/// Every component that needs a setting receives this value at construction
/// time; nothing reads it through global state. Missing keys in a settings
/// file fall back to the defaults below.
///
/// # Fields Overview
///
/// - `image`: image used by devices that do not declare one
/// - `device_prefix` / `net_prefix`: first segment of container and network names
/// - `device_shell`: shell stored in the `shell` label and used for device commands
/// - `enable_ipv6`: applies the IPv6 sysctl subset to created containers
/// - `hosthome_mount`: bind the invoking user's home to `/hosthome`
/// - `shared_mount`: bind the lab `shared` directory to `/shared`
/// - `shared_cd`: shared mode, drops the user segment from resource names
/// - `remote_url`: talk to a remote runtime over HTTP instead of the local socket
/// - `network_plugin`: network driver used when creating links
/// - `max_workers`: upper bound of the fleet worker pool
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub image: String,
    pub device_prefix: String,
    pub net_prefix: String,
    pub device_shell: String,
    pub enable_ipv6: bool,
    pub hosthome_mount: bool,
    pub shared_mount: bool,
    pub shared_cd: bool,
    pub remote_url: Option<String>,
    pub network_plugin: String,
    pub max_workers: Option<usize>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            image: "kathara/base".to_string(),
            device_prefix: "kathara".to_string(),
            net_prefix: "kathara".to_string(),
            device_shell: "/bin/bash".to_string(),
            enable_ipv6: false,
            hosthome_mount: false,
            shared_mount: true,
            shared_cd: false,
            remote_url: None,
            network_plugin: "kathara/katharanp".to_string(),
            max_workers: None,
        }
    }
}

impl Settings {
    /// Loads settings from a TOML file and validates them.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        debug!("Reading settings from {}", path.display());
        let content = std::fs::read_to_string(path)?;
        let settings = Self::from_toml(&content)?;
        info!("Settings loaded from {}", path.display());
        Ok(settings)
    }

    /// Parses settings from a TOML document.
    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        let settings: Settings =
            toml::from_str(content).map_err(|e| ConfigError::TomlError(e.to_string()))?;
        settings.validate()?;
        Ok(settings)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.device_prefix.is_empty() {
            return Err(ConfigError::InvalidValue(
                "device_prefix must not be empty".to_string(),
            ));
        }
        if self.net_prefix.is_empty() {
            return Err(ConfigError::InvalidValue(
                "net_prefix must not be empty".to_string(),
            ));
        }
        if self.device_shell.is_empty() {
            return Err(ConfigError::InvalidValue(
                "device_shell must not be empty".to_string(),
            ));
        }
        if self.max_workers == Some(0) {
            return Err(ConfigError::InvalidValue(
                "max_workers must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }
}

/// Resolves the name of the user running the process from the environment.
pub fn resolve_current_user() -> Result<String, ConfigError> {
    ["USER", "USERNAME", "LOGNAME"]
        .iter()
        .filter_map(|key| std::env::var(key).ok())
        .find(|value| !value.trim().is_empty())
        .map(|value| value.trim().to_string())
        .ok_or(ConfigError::UserNotResolved)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;
    use std::io::Write;

    #[test]
    fn defaults_match_runtime_tool() {
        let settings = Settings::default();
        assert_eq!(settings.device_prefix, "kathara");
        assert_eq!(settings.net_prefix, "kathara");
        assert_eq!(settings.device_shell, "/bin/bash");
        assert!(!settings.enable_ipv6);
        assert!(!settings.shared_cd);
        assert!(settings.shared_mount);
        assert!(settings.remote_url.is_none());
    }

    #[test]
    fn partial_file_keeps_defaults() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "device_prefix = \"dev_prefix\"\nenable_ipv6 = true").unwrap();

        let settings = Settings::from_file(file.path()).unwrap();
        assert_eq!(settings.device_prefix, "dev_prefix");
        assert!(settings.enable_ipv6);
        assert_eq!(settings.net_prefix, "kathara");
        assert_eq!(settings.max_workers, None);
    }

    #[test]
    fn rejects_zero_workers() {
        let err = Settings::from_toml("max_workers = 0").unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue(_)));
    }

    #[test]
    fn rejects_malformed_toml() {
        let err = Settings::from_toml("device_prefix = ").unwrap_err();
        assert!(matches!(err, ConfigError::TomlError(_)));
    }

    #[test]
    fn missing_file_is_io_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = Settings::from_file(&dir.path().join("nope.toml")).unwrap_err();
        assert!(matches!(err, ConfigError::IoError(_)));
    }

    #[test]
    #[serial]
    fn resolves_user_from_environment() {
        let saved = std::env::var("USER").ok();
        std::env::set_var("USER", "kathara-user");
        assert_eq!(resolve_current_user().unwrap(), "kathara-user");
        match saved {
            Some(value) => std::env::set_var("USER", value),
            None => std::env::remove_var("USER"),
        }
    }
}
