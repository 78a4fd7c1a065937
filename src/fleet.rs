//! Compute fleet start/stop control.
//!
//! Fleet capacity is independent of the cluster's own lifecycle state: a
//! cluster can be CREATE_COMPLETE with its fleet stopped. Start and stop are
//! capacity-only changes; they never re-validate the spec and never touch
//! the head node, network, or storage.

use std::fmt;
use std::sync::Arc;

use log::info;
use serde::Serialize;

use crate::errors::{Result, StratusError};
use crate::infra::PartitionCapacity;
use crate::lifecycle::{ClusterState, Orchestrator};

/// Desired capacity state of a cluster's compute fleet.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FleetState {
    Running,
    Stopped,
}

impl fmt::Display for FleetState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FleetState::Running => f.write_str("RUNNING"),
            FleetState::Stopped => f.write_str("STOPPED"),
        }
    }
}

pub struct FleetController {
    orchestrator: Arc<Orchestrator>,
}

impl FleetController {
    pub fn new(orchestrator: Arc<Orchestrator>) -> Self {
        Self { orchestrator }
    }

    /// Restore every partition to its configured target capacity.
    /// Idempotent: starting a running fleet is a no-op success.
    pub fn start(&self, name: &str) -> Result<FleetState> {
        self.set_state(name, FleetState::Running)
    }

    /// Set every partition's desired capacity to zero. The head node is
    /// never stopped. Idempotent.
    pub fn stop(&self, name: &str) -> Result<FleetState> {
        self.set_state(name, FleetState::Stopped)
    }

    fn set_state(&self, name: &str, desired: FleetState) -> Result<FleetState> {
        let cluster = self.orchestrator.require_cluster(name)?;

        match cluster.state {
            ClusterState::CreateComplete | ClusterState::UpdateComplete => {}
            state => {
                return Err(StratusError::InvalidState {
                    name: name.to_string(),
                    state: state.to_string(),
                    operation: match desired {
                        FleetState::Running => "start the fleet".to_string(),
                        FleetState::Stopped => "stop the fleet".to_string(),
                    },
                });
            }
        }

        if cluster.fleet_state == desired {
            info!("Fleet of cluster '{}' is already {}", name, desired);
            return Ok(desired);
        }

        let spec = cluster.spec.as_ref().ok_or_else(|| {
            StratusError::Internal(format!(
                "no recorded spec for cluster '{}'; cannot compute fleet targets",
                name
            ))
        })?;
        let targets: Vec<PartitionCapacity> = spec
            .spec()
            .fleets
            .iter()
            .map(|fleet| PartitionCapacity {
                partition: fleet.partition.clone(),
                desired: match desired {
                    FleetState::Running => fleet.target(),
                    FleetState::Stopped => 0,
                },
            })
            .collect();

        // Hold the exclusion token for the duration of the capacity call so
        // no lifecycle command can interleave with it.
        let guard = self.orchestrator.registry().try_acquire(name)?;
        let result = self
            .orchestrator
            .client()
            .set_fleet_capacity(name, &targets);
        drop(guard);

        match result {
            Ok(()) => {
                self.orchestrator.store().update(name, |c| {
                    c.fleet_state = desired;
                });
                info!("Fleet of cluster '{}' is now {}", name, desired);
                Ok(desired)
            }
            // Recorded desired state stays unchanged until the next status
            // query reconciles.
            Err(err) => Err(StratusError::CapacityChange {
                name: name.to_string(),
                detail: err.to_string(),
            }),
        }
    }
}
