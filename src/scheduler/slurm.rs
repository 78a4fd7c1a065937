//! Slurm grid scheduler backend.

use regex::Regex;

use crate::cluster_spec::FleetSpec;
use crate::errors::Violation;
use crate::infra::StackParameter;
use crate::scheduler::{CapacityModel, SchedulerBackend, SchedulerType};

pub struct SlurmBackend;

impl SchedulerBackend for SlurmBackend {
    fn scheduler_type(&self) -> SchedulerType {
        SchedulerType::Slurm
    }

    fn capacity_model(&self) -> CapacityModel {
        CapacityModel::NodesPerPartition
    }

    fn supports_partitioned_fleets(&self) -> bool {
        true
    }

    fn head_node_daemon(&self) -> Option<&'static str> {
        Some("slurmctld")
    }

    fn validate_fleet(&self, fleet: &FleetSpec) -> Vec<Violation> {
        let mut violations = Vec::new();
        let pattern = Regex::new(r"^[a-z][a-z0-9-]{0,29}$").expect("static regex");
        if !pattern.is_match(&fleet.partition) {
            violations.push(Violation::new(
                format!("fleets[{}].partition", fleet.partition),
                "slurm partition names must match [a-z][a-z0-9-]{0,29}",
            ));
        }
        violations
    }

    fn build_fleet_parameters(&self, fleet: &FleetSpec) -> Vec<StackParameter> {
        grid_fleet_parameters(fleet)
    }
}

/// Shared node-count parameter rendering for the grid scheduler variants.
pub(super) fn grid_fleet_parameters(fleet: &FleetSpec) -> Vec<StackParameter> {
    vec![
        StackParameter::new(
            format!("fleet.{}.min_nodes", fleet.partition),
            fleet.min_count.to_string(),
        ),
        StackParameter::new(
            format!("fleet.{}.max_nodes", fleet.partition),
            fleet.max_count.to_string(),
        ),
        StackParameter::new(
            format!("fleet.{}.desired_nodes", fleet.partition),
            fleet.target().to_string(),
        ),
        StackParameter::new(
            format!("fleet.{}.instance_type", fleet.partition),
            fleet.instance_type.clone(),
        ),
    ]
}
