//! Concurrent operations over every device of a lab or user.
//!
//! Each device is an independent task on a bounded pool. A failing task
//! never cancels its siblings; failures are collected per device and
//! returned together once the pool drains.

use futures::stream::{self, StreamExt};
use log::{error, info};
use std::collections::BTreeSet;
use std::num::NonZeroUsize;

use super::machine_manager::MachineManager;
use super::types::ContainerHandle;
use crate::error_handling::types::{MachineFailure, ManagerError};
use crate::model::{Lab, Machine};

/// Worker count for `tasks` independent jobs: the configured maximum or the
/// host parallelism, never above the job count and never below one.
pub fn pool_size(max_workers: Option<usize>, tasks: usize) -> usize {
    let limit = max_workers.unwrap_or_else(|| {
        std::thread::available_parallelism()
            .map(NonZeroUsize::get)
            .unwrap_or(1)
    });
    limit.min(tasks).max(1)
}

fn collect_failures(results: Vec<(String, Result<(), ManagerError>)>) -> Result<(), ManagerError> {
    let mut failures: Vec<MachineFailure> = results
        .into_iter()
        .filter_map(|(machine, result)| result.err().map(|error| MachineFailure { machine, error }))
        .collect();
    if failures.is_empty() {
        return Ok(());
    }
    failures.sort_by(|a, b| a.machine.cmp(&b.machine));
    for failure in &failures {
        error!("Device {} failed: {}", failure.machine, failure.error);
    }
    Err(ManagerError::Fleet(failures))
}

impl MachineManager {
    /// Checks every image once, then creates and starts all devices of `lab`.
    pub async fn deploy_machines(&self, lab: &Lab) -> Result<(), ManagerError> {
        let images = lab.images(&self.settings.image);
        self.images.check_from_list(&images).await?;

        let workers = pool_size(self.settings.max_workers, lab.machine_count());
        info!(
            "Deploying {} device(s) of lab {} with {} worker(s)",
            lab.machine_count(),
            lab.name(),
            workers
        );
        let results: Vec<_> = stream::iter(lab.machines())
            .map(|machine| async move {
                let result = self.deploy_and_start_machine(lab, machine).await;
                (machine.name().to_string(), result)
            })
            .buffer_unordered(workers)
            .collect()
            .await;
        collect_failures(results)
    }

    pub async fn deploy_and_start_machine(&self, lab: &Lab, machine: &Machine) -> Result<(), ManagerError> {
        self.create(lab, machine).await?;
        self.start(lab, machine).await
    }

    /// Deletes the devices of lab `lab_hash`, or only those named in
    /// `selected_machines` when given.
    pub async fn undeploy(
        &self,
        lab_hash: &str,
        selected_machines: Option<&BTreeSet<String>>,
    ) -> Result<(), ManagerError> {
        let containers = self
            .get_machines_api_objects_by_filters(Some(lab_hash), None, None)
            .await?;
        let targets: Vec<ContainerHandle> = containers
            .into_iter()
            .filter(|c| match selected_machines {
                Some(selected) => selected.contains(c.machine_name()),
                None => true,
            })
            .collect();
        info!("Undeploying {} device(s) of lab {}", targets.len(), lab_hash);
        self.delete_all(targets).await
    }

    /// Deletes every device, optionally only those of `user`.
    pub async fn wipe(&self, user: Option<&str>) -> Result<(), ManagerError> {
        let containers = self.get_machines_api_objects_by_filters(None, None, user).await?;
        info!("Wiping {} device(s)", containers.len());
        self.delete_all(containers).await
    }

    async fn delete_all(&self, containers: Vec<ContainerHandle>) -> Result<(), ManagerError> {
        if containers.is_empty() {
            return Ok(());
        }
        let workers = pool_size(self.settings.max_workers, containers.len());
        let results: Vec<_> = stream::iter(containers)
            .map(|handle| async move {
                let result = self.delete_machine(&handle).await;
                (handle.machine_name().to_string(), result)
            })
            .buffer_unordered(workers)
            .collect()
            .await;
        collect_failures(results)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pool_is_bounded_by_tasks() {
        assert_eq!(pool_size(Some(8), 3), 3);
        assert_eq!(pool_size(Some(2), 10), 2);
        assert_eq!(pool_size(Some(4), 0), 1);
        assert!(pool_size(None, 1000) >= 1);
        assert_eq!(pool_size(None, 1), 1);
    }

    #[test]
    fn failures_are_sorted_and_attributed() {
        let results = vec![
            ("pc2".to_string(), Err(ManagerError::ImageNotFound("x".to_string()))),
            ("pc1".to_string(), Ok(())),
            ("pc0".to_string(), Err(ManagerError::HandleNotSet("pc0".to_string()))),
        ];
        let Err(ManagerError::Fleet(failures)) = collect_failures(results) else {
            panic!("expected a fleet error");
        };
        let names: Vec<_> = failures.iter().map(|f| f.machine.as_str()).collect();
        assert_eq!(names, vec!["pc0", "pc2"]);
        assert!(collect_failures(vec![("pc1".to_string(), Ok(()))]).is_ok());
    }
}
