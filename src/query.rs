//! Read-only status, list, and instances queries.

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use log::debug;
use serde::Serialize;

use crate::errors::{Result, StratusError};
use crate::fleet::FleetState;
use crate::infra::{InstanceSnapshot, NodeRole, CLUSTER_TAG, SCHEDULER_TAG};
use crate::lifecycle::{ClusterState, Orchestrator};
use crate::scheduler::SchedulerType;

/// Point-in-time view of one cluster.
#[derive(Debug, Clone, Serialize)]
pub struct ClusterStatus {
    pub name: String,
    pub region: String,
    pub state: ClusterState,
    pub scheduler: SchedulerType,
    pub fleet_state: FleetState,
    pub stack_id: Option<String>,
    pub updated_at: DateTime<Utc>,
}

/// One row of `list()`.
#[derive(Debug, Clone, Serialize)]
pub struct ClusterSummary {
    pub name: String,
    pub state: ClusterState,
    pub scheduler: Option<SchedulerType>,
    pub stack_id: String,
}

/// Instances of a cluster grouped by node role.
#[derive(Debug, Clone, Serialize)]
pub struct InstanceReport {
    pub head: Vec<InstanceSnapshot>,
    /// Compute instances keyed by fleet partition.
    pub partitions: BTreeMap<String, Vec<InstanceSnapshot>>,
}

pub struct QueryFacade {
    orchestrator: Arc<Orchestrator>,
}

impl QueryFacade {
    pub fn new(orchestrator: Arc<Orchestrator>) -> Self {
        Self { orchestrator }
    }

    /// Current cluster state. Performs a single describe refresh only when
    /// the cluster is in an in-progress state; otherwise the cached record
    /// is returned without a network call.
    pub fn status(&self, name: &str) -> Result<ClusterStatus> {
        let cluster = self.orchestrator.require_cluster(name)?;

        let cluster = if cluster.state.is_in_progress() {
            debug!("Refreshing in-progress cluster '{}' from the backend", name);
            match self.orchestrator.client().describe(name)? {
                Some(snapshot) => {
                    let state = ClusterState::from_stack_status(&snapshot.status)
                        .ok_or_else(|| StratusError::Backend {
                            detail: format!("unknown stack status '{}'", snapshot.status),
                        })?;
                    if state == ClusterState::Deleted {
                        self.orchestrator.store().remove(name);
                    } else {
                        self.orchestrator.store().update(name, |c| {
                            c.state = state;
                            c.stack_id = Some(snapshot.stack_id.clone());
                            if state == ClusterState::UpdateComplete {
                                if let Some(spec) = c.pending_spec.take() {
                                    c.spec = Some(spec);
                                }
                            }
                            if state == ClusterState::UpdateFailed {
                                c.pending_spec = None;
                            }
                        });
                    }
                    let mut refreshed = cluster;
                    refreshed.state = state;
                    refreshed.stack_id = Some(snapshot.stack_id);
                    refreshed
                }
                None if cluster.state == ClusterState::DeleteInProgress => {
                    self.orchestrator.store().remove(name);
                    let mut refreshed = cluster;
                    refreshed.state = ClusterState::Deleted;
                    refreshed
                }
                None => {
                    return Err(StratusError::Backend {
                        detail: format!("stack for cluster '{}' disappeared mid-operation", name),
                    });
                }
            }
        } else {
            cluster
        };

        Ok(ClusterStatus {
            name: cluster.name,
            region: cluster.region,
            state: cluster.state,
            scheduler: cluster.scheduler_type,
            fleet_state: cluster.fleet_state,
            stack_id: cluster.stack_id,
            updated_at: cluster.updated_at,
        })
    }

    /// Enumerate every cluster known to the backend's tagging scheme,
    /// including clusters created by other process invocations.
    pub fn list(&self) -> Result<Vec<ClusterSummary>> {
        let stacks = self.orchestrator.client().list_stacks(CLUSTER_TAG)?;
        let mut summaries = Vec::with_capacity(stacks.len());
        for stack in stacks {
            let name = stack
                .tags
                .get(CLUSTER_TAG)
                .cloned()
                .unwrap_or_else(|| stack.name.clone());
            let state = ClusterState::from_stack_status(&stack.status)
                .unwrap_or(ClusterState::CreateFailed);
            let scheduler = stack
                .tags
                .get(SCHEDULER_TAG)
                .and_then(|t| SchedulerType::parse(t));
            summaries.push(ClusterSummary {
                name,
                state,
                scheduler,
                stack_id: stack.stack_id,
            });
        }
        summaries.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(summaries)
    }

    /// Compute resources tagged to the cluster, grouped by node role. Also
    /// reconciles the cached fleet state from what is actually running.
    pub fn instances(&self, name: &str) -> Result<InstanceReport> {
        // Ensure the cluster exists before asking for its instances.
        self.orchestrator.require_cluster(name)?;
        let instances = self.orchestrator.client().list_instances(name)?;

        let mut head = Vec::new();
        let mut partitions: BTreeMap<String, Vec<InstanceSnapshot>> = BTreeMap::new();
        let mut compute_running = false;
        for instance in instances {
            match instance.node_role {
                NodeRole::Head => head.push(instance),
                NodeRole::Compute => {
                    if instance.state == "running" {
                        compute_running = true;
                    }
                    let partition = instance
                        .partition
                        .clone()
                        .unwrap_or_else(|| "unassigned".to_string());
                    partitions.entry(partition).or_default().push(instance);
                }
            }
        }

        let observed = if compute_running {
            FleetState::Running
        } else {
            FleetState::Stopped
        };
        self.orchestrator.store().update(name, |c| {
            c.fleet_state = observed;
        });

        Ok(InstanceReport { head, partitions })
    }

    /// Address of the head node, preferring the public one. Used by `ssh`.
    pub fn head_node_address(&self, name: &str) -> Result<String> {
        let report = self.instances(name)?;
        let head = report.head.first().ok_or_else(|| StratusError::Backend {
            detail: format!("cluster '{}' has no head node instance", name),
        })?;
        head.public_address
            .clone()
            .or_else(|| head.private_address.clone())
            .ok_or_else(|| StratusError::Backend {
                detail: format!(
                    "head node {} of cluster '{}' has no reachable address",
                    head.instance_id, name
                ),
            })
    }
}
