//! Declarative cluster specification model.
//!
//! A `ClusterSpec` is loaded from a YAML file, validated once by
//! [`crate::validation::SpecValidator`], and carried immutably as a
//! [`ValidatedSpec`] for the rest of the orchestration call.

use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::errors::{Result, StratusError};
use crate::scheduler::SchedulerType;

/// Declarative description of one cluster.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClusterSpec {
    /// Cluster name; also the stack name in the provisioning backend.
    pub name: String,

    /// Cloud region.
    pub region: String,

    /// Scheduler backend for the compute fleets.
    pub scheduler: SchedulerType,

    pub head_node: HeadNodeSpec,

    /// Compute fleets, one per scheduler partition.
    #[serde(default)]
    pub fleets: Vec<FleetSpec>,

    pub network: NetworkSpec,

    /// Shared storage mounted on every node.
    #[serde(default)]
    pub storage: Vec<StorageSpec>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HeadNodeSpec {
    pub instance_type: String,

    /// SSH key pair name for operator access.
    #[serde(default)]
    pub key_pair: Option<String>,
}

/// One compute fleet, bound to a scheduler partition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FleetSpec {
    /// Partition (queue) name.
    pub partition: String,

    pub instance_type: String,

    /// Minimum capacity kept provisioned.
    #[serde(default)]
    pub min_count: u32,

    /// Hard scaling ceiling.
    pub max_count: u32,

    /// Capacity a fleet start restores. Defaults to `max_count`.
    #[serde(default)]
    pub target_count: Option<u32>,
}

impl FleetSpec {
    /// Desired capacity when the fleet is running.
    pub fn target(&self) -> u32 {
        self.target_count.unwrap_or(self.max_count)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NetworkSpec {
    pub subnet_ids: Vec<String>,

    #[serde(default)]
    pub security_group_ids: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StorageSpec {
    /// Mount point on cluster nodes, e.g. `/shared`.
    pub mount_dir: String,

    /// Storage kind understood by the provisioning backend, e.g. `ebs`.
    pub storage_type: String,

    #[serde(default)]
    pub size_gb: Option<u32>,
}

impl ClusterSpec {
    /// Load a spec from a YAML file. Parse errors are reported verbatim;
    /// constraint checks happen later in the validator.
    pub fn from_file(path: &Path) -> Result<Self> {
        let text = fs::read_to_string(path).map_err(|e| {
            StratusError::Internal(format!("failed to read {}: {}", path.display(), e))
        })?;
        Self::from_yaml(&text)
    }

    pub fn from_yaml(text: &str) -> Result<Self> {
        serde_yaml::from_str(text)
            .map_err(|e| StratusError::Internal(format!("failed to parse cluster spec: {}", e)))
    }

    pub fn to_yaml(&self) -> String {
        serde_yaml::to_string(self).expect("cluster spec serializes")
    }
}

/// A spec that passed validation. Produced only by the validator; treated as
/// immutable from then on.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidatedSpec(ClusterSpec);

impl ValidatedSpec {
    /// Only the validator constructs these.
    pub(crate) fn new(spec: ClusterSpec) -> Self {
        Self(spec)
    }

    pub fn spec(&self) -> &ClusterSpec {
        &self.0
    }

    pub fn name(&self) -> &str {
        &self.0.name
    }

    pub fn scheduler(&self) -> SchedulerType {
        self.0.scheduler
    }

    pub fn to_yaml(&self) -> String {
        self.0.to_yaml()
    }
}
