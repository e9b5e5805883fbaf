use log::{debug, info, warn};
use std::collections::BTreeMap;
use std::sync::Arc;

use super::backend::ContainerBackend;
use super::exec::ExecOptions;
use super::images::ImageChecker;
use super::naming::{container_name, machine_labels, LabelFilter};
use super::types::{ContainerHandle, ContainerSpec, NetworkHandle, VolumeBind};
use crate::configuration::Settings;
use crate::error_handling::types::ManagerError;
use crate::model::{Lab, Link, Machine};

/// Capabilities granted to unprivileged devices.
pub const DEVICE_CAPABILITIES: [&str; 5] = [
    "NET_ADMIN",
    "NET_RAW",
    "NET_BROADCAST",
    "NET_BIND_SERVICE",
    "SYS_ADMIN",
];

const IPV4_SYSCTLS: [(&str, i64); 5] = [
    ("net.ipv4.conf.all.rp_filter", 0),
    ("net.ipv4.conf.default.rp_filter", 0),
    ("net.ipv4.conf.lo.rp_filter", 0),
    ("net.ipv4.ip_forward", 1),
    ("net.ipv4.icmp_ratelimit", 0),
];

const IPV6_SYSCTLS: [(&str, i64); 4] = [
    ("net.ipv6.conf.all.forwarding", 1),
    ("net.ipv6.icmp.ratelimit", 0),
    ("net.ipv6.conf.default.disable_ipv6", 0),
    ("net.ipv6.conf.all.disable_ipv6", 0),
];

const HOSTHOME_BIND: &str = "/hosthome";
const SHARED_BIND: &str = "/shared";

/// Drives single devices through their runtime lifecycle.
///
/// The fleet, exec and stats operations live in sibling modules as further
/// `impl` blocks on this type, all sharing one backend client.
pub struct MachineManager {
    pub(super) backend: Arc<dyn ContainerBackend>,
    pub(super) images: Arc<dyn ImageChecker>,
    pub(super) settings: Settings,
    pub(super) user: String,
}

impl MachineManager {
    pub fn new(
        backend: Arc<dyn ContainerBackend>,
        images: Arc<dyn ImageChecker>,
        settings: Settings,
        user: &str,
    ) -> Self {
        Self {
            backend,
            images,
            settings,
            user: user.to_string(),
        }
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    pub fn user(&self) -> &str {
        &self.user
    }

    /// Builds the runtime creation request for `machine`.
    pub fn container_spec(&self, lab: &Lab, machine: &Machine) -> Result<ContainerSpec, ManagerError> {
        let privileged = lab.has_privileged_machines() || machine.is_privileged();
        let cap_add = if privileged {
            None
        } else {
            Some(DEVICE_CAPABILITIES.iter().map(|c| c.to_string()).collect())
        };

        let mut sysctls: BTreeMap<String, i64> = IPV4_SYSCTLS
            .iter()
            .map(|(k, v)| (k.to_string(), *v))
            .collect();
        if self.settings.enable_ipv6 {
            sysctls.extend(IPV6_SYSCTLS.iter().map(|(k, v)| (k.to_string(), *v)));
        }

        let mut volumes = BTreeMap::new();
        if self.settings.hosthome_mount {
            match std::env::var("HOME") {
                Ok(home) => {
                    volumes.insert(home, VolumeBind {
                        bind: HOSTHOME_BIND.to_string(),
                        mode: "rw".to_string(),
                    });
                }
                Err(_) => warn!("HOME is not set, skipping {} mount", HOSTHOME_BIND),
            }
        }
        if self.settings.shared_mount {
            if let Some(shared) = lab.shared_path() {
                volumes.insert(shared.to_string_lossy().into_owned(), VolumeBind {
                    bind: SHARED_BIND.to_string(),
                    mode: "rw".to_string(),
                });
            }
        }

        let ports: BTreeMap<String, u16> = machine
            .ports()?
            .into_iter()
            .map(|p| (format!("{}/{}", p.guest, p.protocol), p.host))
            .collect();

        let nano_cpus = machine.cpus()?.map(|cpus| (cpus * 1e9).round() as i64);

        Ok(ContainerSpec {
            image: machine
                .image()
                .unwrap_or_else(|| self.settings.image.clone()),
            name: container_name(&self.settings, &self.user, machine.name(), machine.lab_hash()),
            hostname: machine.name().to_string(),
            cap_add,
            privileged,
            network: None,
            network_mode: "none".to_string(),
            sysctls,
            environment: machine.envs(),
            mem_limit: machine.mem(),
            nano_cpus,
            ports: if ports.is_empty() { None } else { Some(ports) },
            tty: true,
            stdin_open: true,
            detach: true,
            volumes,
            labels: machine_labels(&self.settings, &self.user, machine.name(), machine.lab_hash()),
        })
    }

    /// Creates the container for `machine` without attaching any network.
    pub async fn create(&self, lab: &Lab, machine: &Machine) -> Result<(), ManagerError> {
        let spec = self.container_spec(lab, machine)?;
        info!("Creating device {} ({})", machine.name(), spec.name);
        let handle = self.backend.create_container(&spec).await?;
        debug!("Device {} created with id {}", machine.name(), handle.id);
        machine.set_api_object(Some(handle));
        Ok(())
    }

    /// Starts the device, attaches interfaces 1.. in order, then runs its
    /// startup commands.
    ///
    /// Interface 0 is never attached here.
    pub async fn start(&self, lab: &Lab, machine: &Machine) -> Result<(), ManagerError> {
        let handle = machine.require_api_object()?;
        info!("Starting device {}", machine.name());
        self.backend.start_container(&handle.id).await?;

        let mut interfaces: Vec<_> = machine.interfaces().iter().filter(|i| i.index >= 1).collect();
        interfaces.sort_by_key(|i| i.index);
        for interface in interfaces {
            let link = lab
                .link(&interface.link)
                .ok_or_else(|| ManagerError::LinkNotFound(interface.link.clone()))?;
            debug!(
                "Attaching interface {} of {} to {}",
                interface.index,
                machine.name(),
                link.name()
            );
            self.connect_to_link(machine, link).await?;
        }

        if machine.is_bridged() {
            debug!("Attaching {} to the bridge network", machine.name());
            self.connect_network_if_missing(machine, &NetworkHandle::bridge())
                .await?;
        }

        let commands = machine.exec_commands();
        if !commands.is_empty() {
            debug!("Running startup commands on {}", machine.name());
            let command = vec![
                self.settings.device_shell.clone(),
                "-c".to_string(),
                commands.join("; "),
            ];
            let options = ExecOptions {
                privileged: true,
                ..ExecOptions::default()
            };
            self.exec_run(&handle, command, options).await?;
        }
        Ok(())
    }

    /// Attaches `machine` to `link` unless it is already a member.
    pub async fn connect_to_link(&self, machine: &Machine, link: &Link) -> Result<(), ManagerError> {
        let network = link.require_api_object()?;
        self.connect_network_if_missing(machine, &network).await
    }

    /// Detaches `machine` from `link` if it is currently a member.
    pub async fn disconnect_from_link(&self, machine: &Machine, link: &Link) -> Result<(), ManagerError> {
        let network = link.require_api_object()?;
        let current = self.refresh(machine).await?;
        if !current.is_connected_to(&network.name) {
            debug!("{} is not attached to {}", machine.name(), network.name);
            return Ok(());
        }
        self.backend.disconnect_network(&network, &current.id).await?;
        Ok(())
    }

    async fn connect_network_if_missing(
        &self,
        machine: &Machine,
        network: &NetworkHandle,
    ) -> Result<(), ManagerError> {
        let current = self.refresh(machine).await?;
        if current.is_connected_to(&network.name) {
            debug!("{} is already attached to {}", machine.name(), network.name);
            return Ok(());
        }
        self.backend.connect_network(network, &current.id).await?;
        Ok(())
    }

    /// Re-reads the device state from the runtime and stores it on the machine.
    async fn refresh(&self, machine: &Machine) -> Result<ContainerHandle, ManagerError> {
        let handle = machine.require_api_object()?;
        let current = self.backend.inspect_container(&handle.id).await?;
        machine.set_api_object(Some(current.clone()));
        Ok(current)
    }

    /// Removes a device container, running its shutdown hook first when it
    /// is still running. Hook failures are logged and ignored.
    pub async fn delete_machine(&self, handle: &ContainerHandle) -> Result<(), ManagerError> {
        if handle.is_running() {
            let name = handle.machine_name();
            let shell = handle
                .label("shell")
                .unwrap_or(&self.settings.device_shell)
                .to_string();
            let hook = format!(
                "if [ -f \"/hostlab/{name}.shutdown\" ]; then (/bin/chmod u+x /hostlab/{name}.shutdown; /hostlab/{name}.shutdown &> /var/log/shutdown.log); fi",
                name = name
            );
            let options = ExecOptions {
                privileged: true,
                ..ExecOptions::default()
            };
            if let Err(e) = self
                .exec_run(handle, vec![shell, "-c".to_string(), hook], options)
                .await
            {
                warn!("Shutdown command failed on {}: {}", name, e);
            }
        }
        info!("Removing device container {}", handle.name);
        self.backend.remove_container(&handle.id, true).await?;
        Ok(())
    }

    /// Every container carrying the given labels, stopped ones included.
    pub async fn get_machines_api_objects_by_filters(
        &self,
        lab_hash: Option<&str>,
        machine_name: Option<&str>,
        user: Option<&str>,
    ) -> Result<Vec<ContainerHandle>, ManagerError> {
        let filter = LabelFilter::new(lab_hash, machine_name, user);
        debug!("Looking up devices with {:?}", filter.labels());
        Ok(self.backend.list_containers(&filter, true).await?)
    }
}
