//! Core types exchanged with the container runtime backend.

use chrono::{DateTime, Utc};
use futures::stream::BoxStream;
use std::collections::{BTreeMap, HashMap};
use std::fmt;

use crate::error_handling::types::BackendError;

/// Snapshot of a runtime container, as returned by create, inspect or list.
///
/// The runtime owns the container; this is only a reference plus the fields
/// the engine reads (labels, state, network membership).
#[derive(Debug, Clone, PartialEq)]
pub struct ContainerHandle {
    pub id: String,
    pub name: String,
    pub labels: HashMap<String, String>,
    /// Runtime state, e.g. `created`, `running`, `exited`.
    pub status: String,
    /// Names of the networks the container is attached to.
    pub networks: Vec<String>,
    pub created: Option<DateTime<Utc>>,
}

impl ContainerHandle {
    pub fn new(id: &str, name: &str) -> Self {
        Self {
            id: id.to_string(),
            name: name.to_string(),
            labels: HashMap::new(),
            status: "created".to_string(),
            networks: Vec::new(),
            created: None,
        }
    }

    pub fn label(&self, key: &str) -> Option<&str> {
        self.labels.get(key).map(String::as_str)
    }

    pub fn is_running(&self) -> bool {
        self.status == "running"
    }

    pub fn is_connected_to(&self, network: &str) -> bool {
        self.networks.iter().any(|n| n == network)
    }

    /// Device name from the `name` label, falling back to the container name.
    pub fn machine_name(&self) -> &str {
        self.label("name").unwrap_or(&self.name)
    }
}

/// Reference to a runtime network backing a link.
#[derive(Debug, Clone, PartialEq)]
pub struct NetworkHandle {
    pub id: String,
    pub name: String,
    pub labels: HashMap<String, String>,
}

impl NetworkHandle {
    pub fn new(id: &str, name: &str) -> Self {
        Self {
            id: id.to_string(),
            name: name.to_string(),
            labels: HashMap::new(),
        }
    }

    /// The runtime's default bridge network, used by bridged devices.
    pub fn bridge() -> Self {
        Self::new("bridge", "bridge")
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VolumeBind {
    pub bind: String,
    pub mode: String,
}

/// Full container creation request.
///
/// `network` is always `None` and `network_mode` always `none`: interfaces
/// are attached after start.
#[derive(Debug, Clone, PartialEq)]
pub struct ContainerSpec {
    pub image: String,
    pub name: String,
    pub hostname: String,
    pub cap_add: Option<Vec<String>>,
    pub privileged: bool,
    pub network: Option<String>,
    pub network_mode: String,
    pub sysctls: BTreeMap<String, i64>,
    pub environment: BTreeMap<String, String>,
    /// Memory limit in runtime notation, e.g. `64m`.
    pub mem_limit: Option<String>,
    pub nano_cpus: Option<i64>,
    /// `"<guest>/<proto>"` to host port.
    pub ports: Option<BTreeMap<String, u16>>,
    pub tty: bool,
    pub stdin_open: bool,
    pub detach: bool,
    /// Host path to bind target.
    pub volumes: BTreeMap<String, VolumeBind>,
    pub labels: BTreeMap<String, String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct NetworkSpec {
    pub name: String,
    pub driver: String,
    pub labels: BTreeMap<String, String>,
}

/// Exec session creation request.
#[derive(Debug, Clone, PartialEq)]
pub struct ExecSpec {
    pub cmd: Vec<String>,
    pub stdout: bool,
    pub stderr: bool,
    pub stdin: bool,
    pub tty: bool,
    pub privileged: bool,
    pub user: String,
    pub environment: Option<Vec<String>>,
    pub workdir: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ExecStartOptions {
    pub detach: bool,
    pub tty: bool,
    pub stream: bool,
    pub socket: bool,
    pub demux: bool,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ExecInspect {
    /// `None` while the runtime does not know it yet (streamed sessions).
    pub exit_code: Option<i64>,
}

/// One element of a streamed exec output.
#[derive(Debug, Clone, PartialEq)]
pub enum ExecChunk {
    Combined(Vec<u8>),
    Demuxed {
        stdout: Option<Vec<u8>>,
        stderr: Option<Vec<u8>>,
    },
}

impl ExecChunk {
    pub fn segments(&self) -> Vec<&[u8]> {
        match self {
            ExecChunk::Combined(data) => vec![data.as_slice()],
            ExecChunk::Demuxed { stdout, stderr } => [stdout, stderr]
                .into_iter()
                .flatten()
                .map(Vec::as_slice)
                .collect(),
        }
    }
}

pub type ExecStream = BoxStream<'static, Result<ExecChunk, BackendError>>;

/// Output of an exec session, shaped by the `stream` and `demux` flags.
pub enum ExecOutput {
    /// stdout and stderr interleaved in a single blob.
    Combined(Vec<u8>),
    /// stdout and stderr collected separately.
    Demuxed {
        stdout: Option<Vec<u8>>,
        stderr: Option<Vec<u8>>,
    },
    /// Lazily produced chunks, finite, ending with the command.
    Stream(ExecStream),
}

impl ExecOutput {
    /// Byte segments of an already collected output. Streams yield nothing.
    pub fn collected_segments(&self) -> Vec<&[u8]> {
        match self {
            ExecOutput::Combined(data) => vec![data.as_slice()],
            ExecOutput::Demuxed { stdout, stderr } => [stdout, stderr]
                .into_iter()
                .flatten()
                .map(Vec::as_slice)
                .collect(),
            ExecOutput::Stream(_) => Vec::new(),
        }
    }
}

impl fmt::Debug for ExecOutput {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExecOutput::Combined(data) => f.debug_tuple("Combined").field(data).finish(),
            ExecOutput::Demuxed { stdout, stderr } => f
                .debug_struct("Demuxed")
                .field("stdout", stdout)
                .field("stderr", stderr)
                .finish(),
            ExecOutput::Stream(_) => f.write_str("Stream(..)"),
        }
    }
}

/// Raw counters of one runtime stats sample.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StatsSnapshot {
    pub pids: Option<u64>,
    pub cpu_total: u64,
    pub precpu_total: u64,
    pub system_cpu: Option<u64>,
    pub presystem_cpu: Option<u64>,
    pub online_cpus: Option<u64>,
    pub memory_usage: Option<u64>,
    pub memory_limit: Option<u64>,
    pub rx_bytes: u64,
    pub tx_bytes: u64,
}

pub type StatsStream = BoxStream<'static, Result<StatsSnapshot, BackendError>>;
