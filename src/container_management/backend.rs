//! Runtime capability set consumed by the managers.
//!
//! Implementations must be safe to share across concurrent fleet workers.
//! [`DockerBackend`](super::docker_backend::DockerBackend) is the production
//! implementation; tests use an in-memory recorder.

use async_trait::async_trait;

use super::naming::LabelFilter;
use super::types::{
    ContainerHandle, ContainerSpec, ExecInspect, ExecOutput, ExecSpec, ExecStartOptions,
    NetworkHandle, NetworkSpec, StatsStream,
};
use crate::error_handling::types::BackendError;

#[async_trait]
pub trait ContainerBackend: Send + Sync {
    /// Creates (without starting) a container and returns its inspected state.
    async fn create_container(&self, spec: &ContainerSpec) -> Result<ContainerHandle, BackendError>;

    async fn start_container(&self, id: &str) -> Result<(), BackendError>;

    async fn remove_container(&self, id: &str, force: bool) -> Result<(), BackendError>;

    async fn inspect_container(&self, id: &str) -> Result<ContainerHandle, BackendError>;

    /// Lists containers carrying every label of `filter`, stopped ones included when `all`.
    async fn list_containers(
        &self,
        filter: &LabelFilter,
        all: bool,
    ) -> Result<Vec<ContainerHandle>, BackendError>;

    async fn connect_network(
        &self,
        network: &NetworkHandle,
        container_id: &str,
    ) -> Result<(), BackendError>;

    async fn disconnect_network(
        &self,
        network: &NetworkHandle,
        container_id: &str,
    ) -> Result<(), BackendError>;

    async fn create_network(&self, spec: &NetworkSpec) -> Result<NetworkHandle, BackendError>;

    async fn list_networks(&self, filter: &LabelFilter) -> Result<Vec<NetworkHandle>, BackendError>;

    async fn remove_network(&self, id: &str) -> Result<(), BackendError>;

    async fn image_exists(&self, image: &str) -> Result<bool, BackendError>;

    /// Creates an exec session and returns its id.
    async fn exec_create(&self, container_id: &str, spec: &ExecSpec) -> Result<String, BackendError>;

    async fn exec_start(
        &self,
        exec_id: &str,
        options: &ExecStartOptions,
    ) -> Result<ExecOutput, BackendError>;

    async fn exec_inspect(&self, exec_id: &str) -> Result<ExecInspect, BackendError>;

    /// Live statistics of a container; ends when the container goes away.
    fn stats_stream(&self, container_id: &str) -> StatsStream;
}
