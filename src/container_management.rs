//! Container management subsystem.
//!
//! Maps a [`Lab`](crate::model::Lab) onto a Docker-compatible runtime. Every
//! runtime call goes through the [`ContainerBackend`] trait; discovery
//! relies only on the labels written at creation time, so a later process
//! finds the same devices by recomputing the lab hash.
//!
//! Re-exports:
//! - [`LabManager`]: deploy, undeploy and wipe whole labs.
//! - [`MachineManager`]: single-device lifecycle, fleet operations, exec and stats.
//! - [`LinkManager`]: runtime networks backing links.
//! - [`DockerBackend`]: the `bollard` backend.
//!
//! Example (non-running):
//! ```ignore
//! use kathara_engine::configuration::Settings;
//! use kathara_engine::container_management::LabManager;
//!
//! let manager = LabManager::connect_docker(Settings::default(), "alice")?;
//! manager.wipe(Some("alice")).await?;
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

pub mod backend;
pub mod docker_backend;
pub mod exec;
pub mod fleet;
pub mod images;
pub mod lab_manager;
pub mod link_manager;
pub mod machine_manager;
pub mod naming;
pub mod stats;
pub mod types;

#[cfg(test)]
mod test_support;

pub use backend::ContainerBackend;
pub use docker_backend::DockerBackend;
pub use exec::{classify_launch_failure, ExecOptions, ExecResult};
pub use images::{BackendImageChecker, ImageChecker};
pub use lab_manager::LabManager;
pub use link_manager::LinkManager;
pub use machine_manager::MachineManager;
pub use naming::LabelFilter;
pub use stats::{MachineStats, MachineStatsStream};
pub use types::{ContainerHandle, ExecChunk, ExecOutput, NetworkHandle};
