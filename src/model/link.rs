use std::sync::RwLock;

use crate::container_management::types::NetworkHandle;
use crate::error_handling::types::ManagerError;

/// One emulated network segment, deployed as one runtime network.
#[derive(Debug)]
pub struct Link {
    name: String,
    lab_hash: String,
    api_object: RwLock<Option<NetworkHandle>>,
}

impl Link {
    pub fn new(lab_hash: &str, name: &str) -> Self {
        Self {
            name: name.to_string(),
            lab_hash: lab_hash.to_string(),
            api_object: RwLock::new(None),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn lab_hash(&self) -> &str {
        &self.lab_hash
    }

    pub fn api_object(&self) -> Option<NetworkHandle> {
        self.api_object
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    pub fn set_api_object(&self, handle: Option<NetworkHandle>) {
        *self.api_object.write().unwrap_or_else(|e| e.into_inner()) = handle;
    }

    pub fn require_api_object(&self) -> Result<NetworkHandle, ManagerError> {
        self.api_object()
            .ok_or_else(|| ManagerError::HandleNotSet(format!("link {}", self.name)))
    }
}
