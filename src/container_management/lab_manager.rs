use log::info;
use std::collections::BTreeSet;
use std::sync::Arc;

use super::backend::ContainerBackend;
use super::docker_backend::DockerBackend;
use super::exec::ExecResult;
use super::images::{BackendImageChecker, ImageChecker};
use super::link_manager::LinkManager;
use super::machine_manager::MachineManager;
use super::stats::MachineStatsStream;
use super::types::ContainerHandle;
use crate::configuration::Settings;
use crate::error_handling::types::ManagerError;
use crate::model::Lab;

/// Entry point tying links and devices of a lab together.
pub struct LabManager {
    machines: MachineManager,
    links: LinkManager,
}

impl LabManager {
    pub fn new(
        backend: Arc<dyn ContainerBackend>,
        images: Arc<dyn ImageChecker>,
        settings: Settings,
        user: &str,
    ) -> Self {
        Self {
            links: LinkManager::new(Arc::clone(&backend), settings.clone(), user),
            machines: MachineManager::new(backend, images, settings, user),
        }
    }

    /// Builds a manager over the Docker daemon selected by `settings`.
    pub fn connect_docker(settings: Settings, user: &str) -> Result<Self, ManagerError> {
        let backend: Arc<dyn ContainerBackend> = Arc::new(DockerBackend::connect(&settings)?);
        let images = Arc::new(BackendImageChecker::new(Arc::clone(&backend)));
        Ok(Self::new(backend, images, settings, user))
    }

    pub fn machines(&self) -> &MachineManager {
        &self.machines
    }

    pub fn links(&self) -> &LinkManager {
        &self.links
    }

    /// Networks first, so that started devices can attach to them.
    pub async fn deploy_lab(&self, lab: &Lab) -> Result<(), ManagerError> {
        info!("Deploying lab {} ({})", lab.name(), lab.hash());
        self.links.deploy_links(lab).await?;
        self.machines.deploy_machines(lab).await
    }

    /// Removes devices of a lab; networks go too unless only some devices
    /// were selected.
    pub async fn undeploy_lab(
        &self,
        lab_hash: &str,
        selected_machines: Option<&BTreeSet<String>>,
    ) -> Result<(), ManagerError> {
        self.machines.undeploy(lab_hash, selected_machines).await?;
        if selected_machines.is_none() {
            self.links.undeploy(lab_hash).await?;
        }
        Ok(())
    }

    pub async fn wipe(&self, user: Option<&str>) -> Result<(), ManagerError> {
        self.machines.wipe(user).await?;
        self.links.wipe(user).await
    }

    pub async fn exec(
        &self,
        lab_hash: &str,
        machine_name: &str,
        command: Vec<String>,
        tty: bool,
    ) -> Result<ExecResult, ManagerError> {
        self.machines.exec(lab_hash, machine_name, command, tty).await
    }

    pub fn get_machines_stats(
        &self,
        lab_hash: Option<&str>,
        machine_name: Option<&str>,
        user: Option<&str>,
    ) -> MachineStatsStream {
        self.machines.get_machines_stats(lab_hash, machine_name, user)
    }

    pub async fn list_machines(
        &self,
        lab_hash: Option<&str>,
        user: Option<&str>,
    ) -> Result<Vec<ContainerHandle>, ManagerError> {
        self.machines
            .get_machines_api_objects_by_filters(lab_hash, None, user)
            .await
    }
}
