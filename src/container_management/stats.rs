use futures::future::join_all;
use futures::stream::{self, BoxStream, StreamExt};
use log::{debug, error};
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Arc;

use super::backend::ContainerBackend;
use super::machine_manager::MachineManager;
use super::naming::LabelFilter;
use super::types::{ContainerHandle, StatsSnapshot, StatsStream};
use crate::error_handling::types::{BackendError, MachineFailure, ManagerError};

/// Resource usage of one device at one sampling round.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MachineStats {
    pub name: String,
    pub container_name: String,
    pub lab_hash: String,
    pub user: String,
    pub status: String,
    pub pids: u64,
    /// Percentage of one CPU times the number of online CPUs.
    pub cpu_usage: f64,
    pub mem_usage: u64,
    pub mem_limit: u64,
    pub mem_percent: f64,
    pub net_rx: u64,
    pub net_tx: u64,
}

impl MachineStats {
    pub fn from_snapshot(handle: &ContainerHandle, snapshot: &StatsSnapshot) -> Self {
        let mem_usage = snapshot.memory_usage.unwrap_or(0);
        let mem_limit = snapshot.memory_limit.unwrap_or(0);
        let mem_percent = if mem_limit > 0 {
            mem_usage as f64 / mem_limit as f64 * 100.0
        } else {
            0.0
        };
        Self {
            name: handle.machine_name().to_string(),
            container_name: handle.name.clone(),
            lab_hash: handle.label("lab_hash").unwrap_or_default().to_string(),
            user: handle.label("user").unwrap_or_default().to_string(),
            status: handle.status.clone(),
            pids: snapshot.pids.unwrap_or(0),
            cpu_usage: cpu_percent(snapshot),
            mem_usage,
            mem_limit,
            mem_percent,
            net_rx: snapshot.rx_bytes,
            net_tx: snapshot.tx_bytes,
        }
    }
}

/// CPU usage between the previous and the current sample.
pub fn cpu_percent(snapshot: &StatsSnapshot) -> f64 {
    let cpu_delta = snapshot.cpu_total.saturating_sub(snapshot.precpu_total) as f64;
    let system_delta = match (snapshot.system_cpu, snapshot.presystem_cpu) {
        (Some(current), Some(previous)) if current > previous => (current - previous) as f64,
        (Some(current), None) if current > 0 => current as f64,
        _ => return 0.0,
    };
    let cpus = snapshot.online_cpus.unwrap_or(1).max(1) as f64;
    cpu_delta / system_delta * cpus * 100.0
}

/// One map per sampling round, keyed by container name.
pub type MachineStatsStream = BoxStream<'static, Result<BTreeMap<String, MachineStats>, ManagerError>>;

enum StatsState {
    Pending {
        backend: Arc<dyn ContainerBackend>,
        filter: LabelFilter,
    },
    Streaming {
        streams: Vec<(ContainerHandle, StatsStream)>,
    },
    // a round sampled alongside failures, yielded right after them
    Buffered {
        round: BTreeMap<String, MachineStats>,
        streams: Vec<(ContainerHandle, StatsStream)>,
    },
    Done,
}

type Round = (Result<BTreeMap<String, MachineStats>, ManagerError>, StatsState);

/// Samples every open stream once.
///
/// Devices whose stream fails are reported as a `Fleet` error and dropped.
/// On the first round, devices that end without any sample are failures too.
async fn next_round(streams: Vec<(ContainerHandle, StatsStream)>, first: bool) -> Option<Round> {
    let mut streams = streams;
    let items = join_all(streams.iter_mut().map(|(_, s)| s.next())).await;

    let mut round = BTreeMap::new();
    let mut failures = Vec::new();
    let mut alive = Vec::with_capacity(streams.len());
    for ((handle, stream), item) in streams.into_iter().zip(items) {
        match item {
            Some(Ok(snapshot)) => {
                round.insert(handle.name.clone(), MachineStats::from_snapshot(&handle, &snapshot));
                alive.push((handle, stream));
            }
            Some(Err(e)) => failures.push(MachineFailure {
                machine: handle.machine_name().to_string(),
                error: e.into(),
            }),
            None if first => failures.push(MachineFailure {
                machine: handle.machine_name().to_string(),
                error: BackendError::Other(format!("stats of {} ended before the first sample", handle.name))
                    .into(),
            }),
            None => debug!("Stats stream of {} ended", handle.name),
        }
    }

    if !failures.is_empty() {
        for failure in &failures {
            error!("Stats of device {} unavailable: {}", failure.machine, failure.error);
        }
        let next = if round.is_empty() {
            StatsState::Streaming { streams: alive }
        } else {
            StatsState::Buffered { round, streams: alive }
        };
        return Some((Err(ManagerError::Fleet(failures)), next));
    }
    if round.is_empty() {
        return None;
    }
    Some((Ok(round), StatsState::Streaming { streams: alive }))
}

impl MachineManager {
    /// Live resource usage of the matching devices.
    ///
    /// Nothing happens until the first poll, which performs the lookup. An
    /// empty lookup yields a single `MachineNotFound` error. Devices whose
    /// stats fail are reported as a `Fleet` error; the others keep streaming.
    pub fn get_machines_stats(
        &self,
        lab_hash: Option<&str>,
        machine_name: Option<&str>,
        user: Option<&str>,
    ) -> MachineStatsStream {
        let initial = StatsState::Pending {
            backend: Arc::clone(&self.backend),
            filter: LabelFilter::new(lab_hash, machine_name, user),
        };
        stream::unfold(initial, |state| async move {
            match state {
                StatsState::Pending { backend, filter } => {
                    let mut containers = match backend.list_containers(&filter, true).await {
                        Ok(containers) => containers,
                        Err(e) => return Some((Err(e.into()), StatsState::Done)),
                    };
                    if containers.is_empty() {
                        let err = ManagerError::MachineNotFound(format!(
                            "no device matches {}",
                            filter.labels().join(", ")
                        ));
                        return Some((Err(err), StatsState::Done));
                    }
                    containers.sort_by(|a, b| a.machine_name().cmp(b.machine_name()));
                    let streams = containers
                        .into_iter()
                        .map(|handle| {
                            let stats = backend.stats_stream(&handle.id);
                            (handle, stats)
                        })
                        .collect();
                    next_round(streams, true).await
                }
                StatsState::Streaming { streams } => next_round(streams, false).await,
                StatsState::Buffered { round, streams } => Some((Ok(round), StatsState::Streaming { streams })),
                StatsState::Done => None,
            }
        })
        .boxed()
    }
}
