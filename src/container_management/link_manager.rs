use log::{debug, info, warn};
use std::sync::Arc;

use super::backend::ContainerBackend;
use super::naming::{network_labels, network_name, LabelFilter};
use super::types::{NetworkHandle, NetworkSpec};
use crate::configuration::Settings;
use crate::error_handling::types::{BackendError, ManagerError};
use crate::model::{Lab, Link};

/// Creates and removes the runtime networks backing lab links.
pub struct LinkManager {
    backend: Arc<dyn ContainerBackend>,
    settings: Settings,
    user: String,
}

impl LinkManager {
    pub fn new(backend: Arc<dyn ContainerBackend>, settings: Settings, user: &str) -> Self {
        Self {
            backend,
            settings,
            user: user.to_string(),
        }
    }

    fn lookup_filter(&self, lab_hash: &str, link: &str) -> LabelFilter {
        if self.settings.shared_cd {
            LabelFilter::new(None, Some(link), None)
        } else {
            LabelFilter::new(Some(lab_hash), Some(link), Some(&self.user))
        }
    }

    /// Assigns a network to every link of `lab`, one link at a time.
    pub async fn deploy_links(&self, lab: &Lab) -> Result<(), ManagerError> {
        for link in lab.links() {
            self.create(link).await?;
        }
        Ok(())
    }

    /// Reuses the network already labeled for `link`, or creates it.
    pub async fn create(&self, link: &Link) -> Result<NetworkHandle, ManagerError> {
        let filter = self.lookup_filter(link.lab_hash(), link.name());
        if let Some(existing) = self.backend.list_networks(&filter).await?.into_iter().next() {
            debug!("Reusing network {} for link {}", existing.name, link.name());
            link.set_api_object(Some(existing.clone()));
            return Ok(existing);
        }

        let spec = NetworkSpec {
            name: network_name(&self.settings, &self.user, link.name(), link.lab_hash()),
            driver: self.settings.network_plugin.clone(),
            labels: network_labels(&self.user, link.name(), link.lab_hash()),
        };
        info!("Creating network {} for link {}", spec.name, link.name());
        let handle = self.backend.create_network(&spec).await?;
        link.set_api_object(Some(handle.clone()));
        Ok(handle)
    }

    /// Removes the networks of lab `lab_hash`.
    pub async fn undeploy(&self, lab_hash: &str) -> Result<(), ManagerError> {
        let filter = LabelFilter::new(Some(lab_hash), None, None);
        self.remove_matching(&filter).await
    }

    /// Removes every labeled network, optionally only those of `user`.
    pub async fn wipe(&self, user: Option<&str>) -> Result<(), ManagerError> {
        let filter = LabelFilter::new(None, None, user);
        self.remove_matching(&filter).await
    }

    async fn remove_matching(&self, filter: &LabelFilter) -> Result<(), ManagerError> {
        let networks = self.backend.list_networks(filter).await?;
        info!("Removing {} network(s)", networks.len());
        for network in networks {
            match self.backend.remove_network(&network.id).await {
                Ok(()) => {}
                Err(e) if is_network_in_use(&e) => {
                    warn!("Network {} is still in use, keeping it: {}", network.name, e)
                }
                Err(e) => return Err(e.into()),
            }
        }
        Ok(())
    }
}

/// True when the runtime refused to remove a network that still has
/// endpoints attached, e.g. devices of another lab sharing it.
pub fn is_network_in_use(err: &BackendError) -> bool {
    match err {
        BackendError::Api { status: 409, .. } => true,
        BackendError::Api { status: 403, message } => message.contains("active endpoints"),
        _ => false,
    }
}
