//! Torque/PBS backend.

use regex::Regex;

use crate::cluster_spec::FleetSpec;
use crate::errors::Violation;
use crate::infra::StackParameter;
use crate::scheduler::slurm::grid_fleet_parameters;
use crate::scheduler::{CapacityModel, SchedulerBackend, SchedulerType};

pub struct TorqueBackend;

impl SchedulerBackend for TorqueBackend {
    fn scheduler_type(&self) -> SchedulerType {
        SchedulerType::Torque
    }

    fn capacity_model(&self) -> CapacityModel {
        CapacityModel::NodesPerPartition
    }

    fn supports_partitioned_fleets(&self) -> bool {
        true
    }

    fn head_node_daemon(&self) -> Option<&'static str> {
        Some("pbs_server")
    }

    fn validate_fleet(&self, fleet: &FleetSpec) -> Vec<Violation> {
        let mut violations = Vec::new();
        // Torque queue names are limited to 15 characters.
        let pattern = Regex::new(r"^[a-z][a-z0-9_-]{0,14}$").expect("static regex");
        if !pattern.is_match(&fleet.partition) {
            violations.push(Violation::new(
                format!("fleets[{}].partition", fleet.partition),
                "torque queue names must match [a-z][a-z0-9_-]{0,14}",
            ));
        }
        if fleet.min_count < 1 {
            violations.push(Violation::new(
                format!("fleets[{}].min_count", fleet.partition),
                "torque queues require at least one static node",
            ));
        }
        violations
    }

    fn build_fleet_parameters(&self, fleet: &FleetSpec) -> Vec<StackParameter> {
        grid_fleet_parameters(fleet)
    }
}
