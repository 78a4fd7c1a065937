//! Managed batch service backend.
//!
//! Capacity is expressed as min/max/desired vCPUs for a single compute
//! environment. There is no head-node scheduler daemon and no partitioning.

use crate::cluster_spec::FleetSpec;
use crate::errors::Violation;
use crate::infra::StackParameter;
use crate::scheduler::{CapacityModel, SchedulerBackend, SchedulerType};

/// Upper bound the managed service accepts for max vCPUs.
const MAX_VCPUS: u32 = 10_000;

pub struct BatchBackend;

impl SchedulerBackend for BatchBackend {
    fn scheduler_type(&self) -> SchedulerType {
        SchedulerType::Batch
    }

    fn capacity_model(&self) -> CapacityModel {
        CapacityModel::VcpuLimits
    }

    fn supports_partitioned_fleets(&self) -> bool {
        false
    }

    fn head_node_daemon(&self) -> Option<&'static str> {
        None
    }

    fn validate_fleet(&self, fleet: &FleetSpec) -> Vec<Violation> {
        let mut violations = Vec::new();
        let field = format!("fleets[{}]", fleet.partition);
        if fleet.max_count > MAX_VCPUS {
            violations.push(Violation::new(
                format!("{}.max_count", field),
                format!(
                    "batch compute environments allow at most {} vCPUs, got {}",
                    MAX_VCPUS, fleet.max_count
                ),
            ));
        }
        if !fleet
            .partition
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
            || fleet.partition.is_empty()
        {
            violations.push(Violation::new(
                format!("{}.partition", field),
                "batch environment names may only contain letters, digits, '-' and '_'",
            ));
        }
        violations
    }

    fn build_fleet_parameters(&self, fleet: &FleetSpec) -> Vec<StackParameter> {
        vec![
            StackParameter::new("batch.min_vcpus", fleet.min_count.to_string()),
            StackParameter::new("batch.max_vcpus", fleet.max_count.to_string()),
            StackParameter::new("batch.desired_vcpus", fleet.target().to_string()),
            StackParameter::new("batch.instance_type", fleet.instance_type.clone()),
        ]
    }
}
