//! In-memory backend recording every call, for unit tests.

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use futures::stream::{self, StreamExt};
use std::collections::{BTreeSet, HashMap};
use std::sync::{Arc, Mutex};

use super::backend::ContainerBackend;
use super::images::ImageChecker;
use super::naming::LabelFilter;
use super::types::{
    ContainerHandle, ContainerSpec, ExecChunk, ExecInspect, ExecOutput, ExecSpec,
    ExecStartOptions, NetworkHandle, NetworkSpec, StatsSnapshot, StatsStream,
};
use crate::error_handling::types::{BackendError, ManagerError};

#[derive(Debug, Clone, PartialEq)]
pub enum Call {
    CheckImages(Vec<String>),
    Create(ContainerSpec),
    Start(String),
    Remove { id: String, force: bool },
    Inspect(String),
    List { labels: Vec<String>, all: bool },
    Connect { network: String, container: String },
    Disconnect { network: String, container: String },
    CreateNetwork(NetworkSpec),
    ListNetworks(Vec<String>),
    RemoveNetwork(String),
    ImageExists(String),
    ExecCreate { container: String, spec: ExecSpec },
    ExecStart { exec_id: String, options: ExecStartOptions },
    ExecInspect(String),
    Stats(String),
}

/// Canned output returned by `exec_start`.
#[derive(Debug, Clone)]
pub enum ExecReply {
    Combined(Vec<u8>),
    Demuxed(Option<Vec<u8>>, Option<Vec<u8>>),
    Chunks(Vec<ExecChunk>),
}

#[derive(Default)]
struct Inner {
    calls: Mutex<Vec<Call>>,
    containers: Mutex<Vec<ContainerHandle>>,
    networks: Mutex<Vec<NetworkHandle>>,
    missing_images: Mutex<BTreeSet<String>>,
    start_error: Mutex<Option<String>>,
    connect_errors: Mutex<HashMap<String, String>>,
    remove_errors: Mutex<HashMap<String, String>>,
    network_remove_errors: Mutex<HashMap<String, (u16, String)>>,
    stats_errors: Mutex<HashMap<String, String>>,
    exec_reply: Mutex<Option<ExecReply>>,
    exit_code: Mutex<Option<Option<i64>>>,
    stats: Mutex<Vec<StatsSnapshot>>,
    sequence: Mutex<usize>,
}

#[derive(Clone, Default)]
pub struct RecordingBackend {
    inner: Arc<Inner>,
}

fn epoch() -> DateTime<Utc> {
    DateTime::from_timestamp(1_700_000_000, 0).unwrap()
}

impl RecordingBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn calls(&self) -> Vec<Call> {
        self.inner.calls.lock().unwrap().clone()
    }

    pub fn count<F: Fn(&Call) -> bool>(&self, predicate: F) -> usize {
        self.calls().iter().filter(|c| predicate(c)).count()
    }

    pub fn clear_calls(&self) {
        self.inner.calls.lock().unwrap().clear();
    }

    fn record(&self, call: Call) {
        self.inner.calls.lock().unwrap().push(call);
    }

    fn next_sequence(&self) -> usize {
        let mut sequence = self.inner.sequence.lock().unwrap();
        *sequence += 1;
        *sequence
    }

    /// Registers an existing container, as a previous deployment would have.
    pub fn seed_container(&self, handle: ContainerHandle) {
        self.inner.containers.lock().unwrap().push(handle);
    }

    pub fn seed_network(&self, handle: NetworkHandle) {
        self.inner.networks.lock().unwrap().push(handle);
    }

    pub fn container(&self, id: &str) -> Option<ContainerHandle> {
        self.inner
            .containers
            .lock()
            .unwrap()
            .iter()
            .find(|c| c.id == id)
            .cloned()
    }

    pub fn containers(&self) -> Vec<ContainerHandle> {
        self.inner.containers.lock().unwrap().clone()
    }

    pub fn networks(&self) -> Vec<NetworkHandle> {
        self.inner.networks.lock().unwrap().clone()
    }

    pub fn missing_image(&self, image: &str) {
        self.inner.missing_images.lock().unwrap().insert(image.to_string());
    }

    pub fn fail_start(&self, message: &str) {
        *self.inner.start_error.lock().unwrap() = Some(message.to_string());
    }

    pub fn fail_connect(&self, network: &str, message: &str) {
        self.inner
            .connect_errors
            .lock()
            .unwrap()
            .insert(network.to_string(), message.to_string());
    }

    pub fn fail_remove(&self, container_id: &str, message: &str) {
        self.inner
            .remove_errors
            .lock()
            .unwrap()
            .insert(container_id.to_string(), message.to_string());
    }

    pub fn fail_remove_network(&self, network_id: &str, status: u16, message: &str) {
        self.inner
            .network_remove_errors
            .lock()
            .unwrap()
            .insert(network_id.to_string(), (status, message.to_string()));
    }

    /// The stats stream of `container_id` fails on its first poll.
    pub fn fail_stats(&self, container_id: &str, message: &str) {
        self.inner
            .stats_errors
            .lock()
            .unwrap()
            .insert(container_id.to_string(), message.to_string());
    }

    pub fn set_exec_reply(&self, reply: ExecReply) {
        *self.inner.exec_reply.lock().unwrap() = Some(reply);
    }

    pub fn set_exit_code(&self, exit_code: Option<i64>) {
        *self.inner.exit_code.lock().unwrap() = Some(exit_code);
    }

    pub fn set_stats(&self, snapshots: Vec<StatsSnapshot>) {
        *self.inner.stats.lock().unwrap() = snapshots;
    }

    fn not_found(id: &str) -> BackendError {
        BackendError::NotFound(format!("No such container: {}", id))
    }
}

/// A container as listed by the runtime, labeled for `machine`.
pub fn labeled_container(id: &str, machine: &str, lab_hash: &str, user: &str, status: &str) -> ContainerHandle {
    let mut handle = ContainerHandle::new(id, &format!("kathara_{}_{}_{}", user, machine, lab_hash));
    handle.status = status.to_string();
    handle.created = Some(epoch());
    handle.labels = HashMap::from([
        ("app".to_string(), "kathara".to_string()),
        ("name".to_string(), machine.to_string()),
        ("lab_hash".to_string(), lab_hash.to_string()),
        ("user".to_string(), user.to_string()),
        ("shell".to_string(), "/bin/bash".to_string()),
    ]);
    handle
}

#[async_trait]
impl ContainerBackend for RecordingBackend {
    async fn create_container(&self, spec: &ContainerSpec) -> Result<ContainerHandle, BackendError> {
        self.record(Call::Create(spec.clone()));
        let sequence = self.next_sequence();
        let mut handle = ContainerHandle::new(&format!("container-{}", sequence), &spec.name);
        handle.labels = spec.labels.clone().into_iter().collect();
        handle.created = Some(epoch() + Duration::seconds(sequence as i64));
        self.inner.containers.lock().unwrap().push(handle.clone());
        Ok(handle)
    }

    async fn start_container(&self, id: &str) -> Result<(), BackendError> {
        self.record(Call::Start(id.to_string()));
        if let Some(message) = self.inner.start_error.lock().unwrap().clone() {
            return Err(BackendError::Plugin(message));
        }
        let mut containers = self.inner.containers.lock().unwrap();
        let container = containers
            .iter_mut()
            .find(|c| c.id == id)
            .ok_or_else(|| Self::not_found(id))?;
        container.status = "running".to_string();
        Ok(())
    }

    async fn remove_container(&self, id: &str, force: bool) -> Result<(), BackendError> {
        self.record(Call::Remove {
            id: id.to_string(),
            force,
        });
        if let Some(message) = self.inner.remove_errors.lock().unwrap().get(id) {
            return Err(BackendError::Api {
                status: 500,
                message: message.clone(),
            });
        }
        let mut containers = self.inner.containers.lock().unwrap();
        let before = containers.len();
        containers.retain(|c| c.id != id);
        if containers.len() == before {
            return Err(Self::not_found(id));
        }
        Ok(())
    }

    async fn inspect_container(&self, id: &str) -> Result<ContainerHandle, BackendError> {
        self.record(Call::Inspect(id.to_string()));
        self.container(id).ok_or_else(|| Self::not_found(id))
    }

    async fn list_containers(
        &self,
        filter: &LabelFilter,
        all: bool,
    ) -> Result<Vec<ContainerHandle>, BackendError> {
        self.record(Call::List {
            labels: filter.labels().to_vec(),
            all,
        });
        Ok(self
            .containers()
            .into_iter()
            .filter(|c| filter.matches(&c.labels))
            .filter(|c| all || c.is_running())
            .collect())
    }

    async fn connect_network(
        &self,
        network: &NetworkHandle,
        container_id: &str,
    ) -> Result<(), BackendError> {
        self.record(Call::Connect {
            network: network.name.clone(),
            container: container_id.to_string(),
        });
        if let Some(message) = self.inner.connect_errors.lock().unwrap().get(&network.name) {
            return Err(BackendError::Plugin(message.clone()));
        }
        let mut containers = self.inner.containers.lock().unwrap();
        let container = containers
            .iter_mut()
            .find(|c| c.id == container_id)
            .ok_or_else(|| Self::not_found(container_id))?;
        container.networks.push(network.name.clone());
        Ok(())
    }

    async fn disconnect_network(
        &self,
        network: &NetworkHandle,
        container_id: &str,
    ) -> Result<(), BackendError> {
        self.record(Call::Disconnect {
            network: network.name.clone(),
            container: container_id.to_string(),
        });
        let mut containers = self.inner.containers.lock().unwrap();
        let container = containers
            .iter_mut()
            .find(|c| c.id == container_id)
            .ok_or_else(|| Self::not_found(container_id))?;
        container.networks.retain(|n| n != &network.name);
        Ok(())
    }

    async fn create_network(&self, spec: &NetworkSpec) -> Result<NetworkHandle, BackendError> {
        self.record(Call::CreateNetwork(spec.clone()));
        let mut handle = NetworkHandle::new(&spec.name, &spec.name);
        handle.labels = spec.labels.clone().into_iter().collect();
        self.inner.networks.lock().unwrap().push(handle.clone());
        Ok(handle)
    }

    async fn list_networks(&self, filter: &LabelFilter) -> Result<Vec<NetworkHandle>, BackendError> {
        self.record(Call::ListNetworks(filter.labels().to_vec()));
        Ok(self
            .networks()
            .into_iter()
            .filter(|n| filter.matches(&n.labels))
            .collect())
    }

    async fn remove_network(&self, id: &str) -> Result<(), BackendError> {
        self.record(Call::RemoveNetwork(id.to_string()));
        if let Some((status, message)) = self.inner.network_remove_errors.lock().unwrap().get(id).cloned() {
            return Err(BackendError::Api { status, message });
        }
        self.inner.networks.lock().unwrap().retain(|n| n.id != id);
        Ok(())
    }

    async fn image_exists(&self, image: &str) -> Result<bool, BackendError> {
        self.record(Call::ImageExists(image.to_string()));
        Ok(!self.inner.missing_images.lock().unwrap().contains(image))
    }

    async fn exec_create(&self, container_id: &str, spec: &ExecSpec) -> Result<String, BackendError> {
        self.record(Call::ExecCreate {
            container: container_id.to_string(),
            spec: spec.clone(),
        });
        Ok(format!("exec-{}", self.next_sequence()))
    }

    async fn exec_start(
        &self,
        exec_id: &str,
        options: &ExecStartOptions,
    ) -> Result<ExecOutput, BackendError> {
        self.record(Call::ExecStart {
            exec_id: exec_id.to_string(),
            options: options.clone(),
        });
        let reply = self
            .inner
            .exec_reply
            .lock()
            .unwrap()
            .clone()
            .unwrap_or(ExecReply::Combined(Vec::new()));
        Ok(match reply {
            ExecReply::Combined(data) => ExecOutput::Combined(data),
            ExecReply::Demuxed(stdout, stderr) => ExecOutput::Demuxed { stdout, stderr },
            ExecReply::Chunks(chunks) => {
                ExecOutput::Stream(stream::iter(chunks.into_iter().map(Ok)).boxed())
            }
        })
    }

    async fn exec_inspect(&self, exec_id: &str) -> Result<ExecInspect, BackendError> {
        self.record(Call::ExecInspect(exec_id.to_string()));
        let exit_code = self.inner.exit_code.lock().unwrap().unwrap_or(Some(0));
        Ok(ExecInspect { exit_code })
    }

    fn stats_stream(&self, container_id: &str) -> StatsStream {
        self.record(Call::Stats(container_id.to_string()));
        if let Some(message) = self.inner.stats_errors.lock().unwrap().get(container_id).cloned() {
            return stream::iter([Err(BackendError::Connection(message))]).boxed();
        }
        let snapshots = self.inner.stats.lock().unwrap().clone();
        stream::iter(snapshots.into_iter().map(Ok)).boxed()
    }
}

#[async_trait]
impl ImageChecker for RecordingBackend {
    async fn check_from_list(&self, images: &BTreeSet<String>) -> Result<(), ManagerError> {
        self.record(Call::CheckImages(images.iter().cloned().collect()));
        let missing = self.inner.missing_images.lock().unwrap();
        match images.iter().find(|image| missing.contains(*image)) {
            Some(image) => Err(ManagerError::ImageNotFound(image.clone())),
            None => Ok(()),
        }
    }
}
