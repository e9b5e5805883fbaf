//! Docker Engine backend built on `bollard`.

use async_trait::async_trait;
use bollard::container::{
    Config, CreateContainerOptions, InspectContainerOptions, ListContainersOptions, LogOutput,
    RemoveContainerOptions, StartContainerOptions, Stats, StatsOptions,
};
use bollard::errors::Error as DockerError;
use bollard::exec::{CreateExecOptions, StartExecOptions, StartExecResults};
use bollard::models::{
    ContainerInspectResponse, ContainerSummary, EndpointSettings, HostConfig, PortBinding,
};
use bollard::network::{
    ConnectNetworkOptions, CreateNetworkOptions, DisconnectNetworkOptions, ListNetworksOptions,
};
use bollard::{Docker, API_DEFAULT_VERSION};
use chrono::{DateTime, Utc};
use futures::StreamExt;
use log::{debug, info};
use std::collections::HashMap;

use super::backend::ContainerBackend;
use super::naming::LabelFilter;
use super::types::{
    ContainerHandle, ContainerSpec, ExecChunk, ExecInspect, ExecOutput, ExecSpec,
    ExecStartOptions, NetworkHandle, NetworkSpec, StatsSnapshot, StatsStream,
};
use crate::configuration::Settings;
use crate::error_handling::types::BackendError;

const REMOTE_TIMEOUT_SECS: u64 = 120;

#[derive(Clone)]
pub struct DockerBackend {
    docker: Docker,
}

impl DockerBackend {
    /// Connects to the local daemon, or to `remote_url` when configured.
    pub fn connect(settings: &Settings) -> Result<Self, BackendError> {
        let docker = match &settings.remote_url {
            Some(url) => {
                info!("Connecting to remote Docker daemon at {}", url);
                Docker::connect_with_http(url, REMOTE_TIMEOUT_SECS, API_DEFAULT_VERSION)
            }
            None => {
                debug!("Connecting to local Docker daemon");
                Docker::connect_with_local_defaults()
            }
        }
        .map_err(|e| BackendError::Connection(e.to_string()))?;
        Ok(Self { docker })
    }

    pub async fn ping(&self) -> Result<(), BackendError> {
        self.docker.ping().await.map_err(map_error)?;
        Ok(())
    }
}

/// Maps a daemon response to the backend taxonomy.
///
/// A missing `network` or `endpoint` is the plugin error; other 404s are
/// plain not-found errors.
pub fn classify_server_error(status: u16, message: String) -> BackendError {
    let lower = message.to_lowercase();
    let missing = lower.contains("not found")
        || lower.contains("does not exist")
        || lower.contains("no such");
    if missing && (lower.contains("network") || lower.contains("endpoint")) {
        return BackendError::Plugin(message);
    }
    if status == 404 {
        return BackendError::NotFound(message);
    }
    BackendError::Api { status, message }
}

fn map_error(err: DockerError) -> BackendError {
    match err {
        DockerError::DockerResponseServerError {
            status_code,
            message,
        } => classify_server_error(status_code, message),
        other => BackendError::Other(other.to_string()),
    }
}

/// Parses a memory limit such as `64m`, `1g`, `512k` or `1024` into bytes.
pub fn parse_memory_limit(value: &str) -> Result<i64, BackendError> {
    let invalid = || BackendError::Other(format!("invalid memory limit `{}`", value));
    let lower = value.trim().to_lowercase();
    let trimmed = lower.strip_suffix('b').unwrap_or(&lower);
    let (digits, multiplier) = match trimmed.chars().last() {
        Some('k') => (&trimmed[..trimmed.len() - 1], 1024_i64),
        Some('m') => (&trimmed[..trimmed.len() - 1], 1024 * 1024),
        Some('g') => (&trimmed[..trimmed.len() - 1], 1024 * 1024 * 1024),
        Some(c) if c.is_ascii_digit() => (trimmed, 1),
        _ => return Err(invalid()),
    };
    let amount: f64 = digits.trim().parse().map_err(|_| invalid())?;
    if amount < 0.0 {
        return Err(invalid());
    }
    Ok((amount * multiplier as f64) as i64)
}

/// Translates a [`ContainerSpec`] into daemon create options.
pub fn container_config(
    spec: &ContainerSpec,
) -> Result<(CreateContainerOptions<String>, Config<String>), BackendError> {
    let memory = spec.mem_limit.as_deref().map(parse_memory_limit).transpose()?;

    let port_bindings = spec.ports.as_ref().map(|ports| {
        ports
            .iter()
            .map(|(guest, host)| {
                (
                    guest.clone(),
                    Some(vec![PortBinding {
                        host_ip: None,
                        host_port: Some(host.to_string()),
                    }]),
                )
            })
            .collect::<HashMap<_, _>>()
    });
    let exposed_ports = spec.ports.as_ref().map(|ports| {
        ports
            .keys()
            .map(|guest| (guest.clone(), HashMap::new()))
            .collect::<HashMap<_, _>>()
    });

    let binds: Vec<String> = spec
        .volumes
        .iter()
        .map(|(host, volume)| format!("{}:{}:{}", host, volume.bind, volume.mode))
        .collect();

    let host_config = HostConfig {
        cap_add: spec.cap_add.clone(),
        privileged: Some(spec.privileged),
        network_mode: Some(spec.network_mode.clone()),
        sysctls: Some(
            spec.sysctls
                .iter()
                .map(|(k, v)| (k.clone(), v.to_string()))
                .collect(),
        ),
        memory,
        nano_cpus: spec.nano_cpus,
        port_bindings,
        binds: if binds.is_empty() { None } else { Some(binds) },
        ..Default::default()
    };

    let config = Config {
        image: Some(spec.image.clone()),
        hostname: Some(spec.hostname.clone()),
        tty: Some(spec.tty),
        open_stdin: Some(spec.stdin_open),
        env: Some(
            spec.environment
                .iter()
                .map(|(k, v)| format!("{}={}", k, v))
                .collect(),
        ),
        labels: Some(spec.labels.clone().into_iter().collect()),
        exposed_ports,
        host_config: Some(host_config),
        ..Default::default()
    };

    let options = CreateContainerOptions {
        name: spec.name.clone(),
        platform: None,
    };
    Ok((options, config))
}

fn trim_name(name: &str) -> String {
    name.trim_start_matches('/').to_string()
}

fn summary_to_handle(summary: ContainerSummary) -> ContainerHandle {
    ContainerHandle {
        id: summary.id.unwrap_or_default(),
        name: summary
            .names
            .and_then(|names| names.into_iter().next())
            .map(|n| trim_name(&n))
            .unwrap_or_default(),
        labels: summary.labels.unwrap_or_default(),
        status: summary.state.unwrap_or_default(),
        networks: summary
            .network_settings
            .and_then(|settings| settings.networks)
            .map(|networks| networks.into_keys().collect())
            .unwrap_or_default(),
        created: summary
            .created
            .and_then(|secs| DateTime::from_timestamp(secs, 0)),
    }
}

fn inspect_to_handle(response: ContainerInspectResponse) -> ContainerHandle {
    ContainerHandle {
        id: response.id.unwrap_or_default(),
        name: response.name.map(|n| trim_name(&n)).unwrap_or_default(),
        labels: response
            .config
            .and_then(|config| config.labels)
            .unwrap_or_default(),
        status: response
            .state
            .and_then(|state| state.status)
            .map(|status| status.to_string())
            .unwrap_or_default(),
        networks: response
            .network_settings
            .and_then(|settings| settings.networks)
            .map(|networks| networks.into_keys().collect())
            .unwrap_or_default(),
        created: response
            .created
            .and_then(|created| DateTime::parse_from_rfc3339(&created).ok())
            .map(|created| created.with_timezone(&Utc)),
    }
}

fn log_to_chunk(log: LogOutput, demux: bool) -> Option<ExecChunk> {
    match log {
        LogOutput::StdIn { .. } => None,
        LogOutput::StdErr { message } if demux => Some(ExecChunk::Demuxed {
            stdout: None,
            stderr: Some(message.to_vec()),
        }),
        LogOutput::StdOut { message } | LogOutput::Console { message } if demux => {
            Some(ExecChunk::Demuxed {
                stdout: Some(message.to_vec()),
                stderr: None,
            })
        }
        LogOutput::StdErr { message }
        | LogOutput::StdOut { message }
        | LogOutput::Console { message } => Some(ExecChunk::Combined(message.to_vec())),
    }
}

fn stats_to_snapshot(stats: Stats) -> StatsSnapshot {
    let (rx_bytes, tx_bytes) = stats
        .networks
        .map(|networks| {
            networks
                .values()
                .fold((0, 0), |(rx, tx), n| (rx + n.rx_bytes, tx + n.tx_bytes))
        })
        .unwrap_or((0, 0));
    StatsSnapshot {
        pids: stats.pids_stats.current,
        cpu_total: stats.cpu_stats.cpu_usage.total_usage,
        precpu_total: stats.precpu_stats.cpu_usage.total_usage,
        system_cpu: stats.cpu_stats.system_cpu_usage,
        presystem_cpu: stats.precpu_stats.system_cpu_usage,
        online_cpus: stats.cpu_stats.online_cpus,
        memory_usage: stats.memory_stats.usage,
        memory_limit: stats.memory_stats.limit,
        rx_bytes,
        tx_bytes,
    }
}

#[async_trait]
impl ContainerBackend for DockerBackend {
    async fn create_container(&self, spec: &ContainerSpec) -> Result<ContainerHandle, BackendError> {
        let (options, config) = container_config(spec)?;
        let response = self
            .docker
            .create_container(Some(options), config)
            .await
            .map_err(map_error)?;
        for warning in &response.warnings {
            debug!("Create warning for {}: {}", spec.name, warning);
        }
        self.inspect_container(&response.id).await
    }

    async fn start_container(&self, id: &str) -> Result<(), BackendError> {
        self.docker
            .start_container(id, None::<StartContainerOptions<String>>)
            .await
            .map_err(map_error)
    }

    async fn remove_container(&self, id: &str, force: bool) -> Result<(), BackendError> {
        self.docker
            .remove_container(
                id,
                Some(RemoveContainerOptions {
                    force,
                    ..Default::default()
                }),
            )
            .await
            .map_err(map_error)
    }

    async fn inspect_container(&self, id: &str) -> Result<ContainerHandle, BackendError> {
        self.docker
            .inspect_container(id, None::<InspectContainerOptions>)
            .await
            .map(inspect_to_handle)
            .map_err(map_error)
    }

    async fn list_containers(
        &self,
        filter: &LabelFilter,
        all: bool,
    ) -> Result<Vec<ContainerHandle>, BackendError> {
        let options = ListContainersOptions::<String> {
            all,
            filters: filter.to_filters(),
            ..Default::default()
        };
        let summaries = self
            .docker
            .list_containers(Some(options))
            .await
            .map_err(map_error)?;
        Ok(summaries.into_iter().map(summary_to_handle).collect())
    }

    async fn connect_network(
        &self,
        network: &NetworkHandle,
        container_id: &str,
    ) -> Result<(), BackendError> {
        self.docker
            .connect_network(
                &network.name,
                ConnectNetworkOptions {
                    container: container_id.to_string(),
                    endpoint_config: EndpointSettings::default(),
                },
            )
            .await
            .map_err(map_error)
    }

    async fn disconnect_network(
        &self,
        network: &NetworkHandle,
        container_id: &str,
    ) -> Result<(), BackendError> {
        self.docker
            .disconnect_network(
                &network.name,
                DisconnectNetworkOptions {
                    container: container_id.to_string(),
                    force: false,
                },
            )
            .await
            .map_err(map_error)
    }

    async fn create_network(&self, spec: &NetworkSpec) -> Result<NetworkHandle, BackendError> {
        let labels: HashMap<String, String> = spec.labels.clone().into_iter().collect();
        let options = CreateNetworkOptions {
            name: spec.name.clone(),
            driver: spec.driver.clone(),
            check_duplicate: true,
            labels: labels.clone(),
            ..Default::default()
        };
        self.docker
            .create_network(options)
            .await
            .map_err(map_error)?;
        // the daemon resolves networks by name as well as by id
        Ok(NetworkHandle {
            id: spec.name.clone(),
            name: spec.name.clone(),
            labels,
        })
    }

    async fn list_networks(&self, filter: &LabelFilter) -> Result<Vec<NetworkHandle>, BackendError> {
        let networks = self
            .docker
            .list_networks(Some(ListNetworksOptions {
                filters: filter.to_filters(),
            }))
            .await
            .map_err(map_error)?;
        Ok(networks
            .into_iter()
            .map(|network| {
                let name = network.name.unwrap_or_default();
                NetworkHandle {
                    id: network.id.unwrap_or_else(|| name.clone()),
                    name,
                    labels: network.labels.unwrap_or_default(),
                }
            })
            .collect())
    }

    async fn remove_network(&self, id: &str) -> Result<(), BackendError> {
        self.docker.remove_network(id).await.map_err(map_error)
    }

    async fn image_exists(&self, image: &str) -> Result<bool, BackendError> {
        match self.docker.inspect_image(image).await {
            Ok(_) => Ok(true),
            Err(DockerError::DockerResponseServerError {
                status_code: 404, ..
            }) => Ok(false),
            Err(e) => Err(map_error(e)),
        }
    }

    async fn exec_create(&self, container_id: &str, spec: &ExecSpec) -> Result<String, BackendError> {
        let options = CreateExecOptions {
            cmd: Some(spec.cmd.clone()),
            attach_stdin: Some(spec.stdin),
            attach_stdout: Some(spec.stdout),
            attach_stderr: Some(spec.stderr),
            tty: Some(spec.tty),
            privileged: Some(spec.privileged),
            user: if spec.user.is_empty() {
                None
            } else {
                Some(spec.user.clone())
            },
            env: spec.environment.clone(),
            working_dir: spec.workdir.clone(),
            ..Default::default()
        };
        let created = self
            .docker
            .create_exec(container_id, options)
            .await
            .map_err(map_error)?;
        Ok(created.id)
    }

    async fn exec_start(
        &self,
        exec_id: &str,
        options: &ExecStartOptions,
    ) -> Result<ExecOutput, BackendError> {
        let started = self
            .docker
            .start_exec(
                exec_id,
                Some(StartExecOptions {
                    detach: options.detach,
                    tty: options.tty,
                    ..Default::default()
                }),
            )
            .await
            .map_err(map_error)?;

        let mut output = match started {
            StartExecResults::Detached => return Ok(ExecOutput::Combined(Vec::new())),
            StartExecResults::Attached { output, .. } => output,
        };

        let demux = options.demux;
        if options.stream {
            let stream = output
                .filter_map(move |item| async move {
                    match item {
                        Ok(log) => log_to_chunk(log, demux).map(Ok),
                        Err(e) => Some(Err(map_error(e))),
                    }
                })
                .boxed();
            return Ok(ExecOutput::Stream(stream));
        }

        let mut combined = Vec::new();
        let mut stdout = Vec::new();
        let mut stderr = Vec::new();
        while let Some(item) = output.next().await {
            match item.map_err(map_error)? {
                LogOutput::StdErr { message } => {
                    stderr.extend_from_slice(&message);
                    combined.extend_from_slice(&message);
                }
                LogOutput::StdOut { message } | LogOutput::Console { message } => {
                    stdout.extend_from_slice(&message);
                    combined.extend_from_slice(&message);
                }
                LogOutput::StdIn { .. } => {}
            }
        }

        if demux {
            Ok(ExecOutput::Demuxed {
                stdout: Some(stdout).filter(|b| !b.is_empty()),
                stderr: Some(stderr).filter(|b| !b.is_empty()),
            })
        } else {
            Ok(ExecOutput::Combined(combined))
        }
    }

    async fn exec_inspect(&self, exec_id: &str) -> Result<ExecInspect, BackendError> {
        let inspected = self.docker.inspect_exec(exec_id).await.map_err(map_error)?;
        Ok(ExecInspect { exit_code: inspected.exit_code })
    }

    fn stats_stream(&self, container_id: &str) -> StatsStream {
        self.docker
            .stats(
                container_id,
                Some(StatsOptions {
                    stream: true,
                    one_shot: false,
                }),
            )
            .map(|item| item.map(stats_to_snapshot).map_err(map_error))
            .boxed()
    }
}
