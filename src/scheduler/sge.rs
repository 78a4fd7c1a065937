//! Sun Grid Engine backend.

use regex::Regex;

use crate::cluster_spec::FleetSpec;
use crate::errors::Violation;
use crate::infra::StackParameter;
use crate::scheduler::slurm::grid_fleet_parameters;
use crate::scheduler::{CapacityModel, SchedulerBackend, SchedulerType};

pub struct SgeBackend;

impl SchedulerBackend for SgeBackend {
    fn scheduler_type(&self) -> SchedulerType {
        SchedulerType::Sge
    }

    fn capacity_model(&self) -> CapacityModel {
        CapacityModel::NodesPerPartition
    }

    fn supports_partitioned_fleets(&self) -> bool {
        true
    }

    fn head_node_daemon(&self) -> Option<&'static str> {
        Some("sge_qmaster")
    }

    fn validate_fleet(&self, fleet: &FleetSpec) -> Vec<Violation> {
        let mut violations = Vec::new();
        // SGE queue names do not allow hyphens.
        let pattern = Regex::new(r"^[a-z][a-z0-9_]{0,29}$").expect("static regex");
        if !pattern.is_match(&fleet.partition) {
            violations.push(Violation::new(
                format!("fleets[{}].partition", fleet.partition),
                "sge queue names must match [a-z][a-z0-9_]{0,29} (no hyphens)",
            ));
        }
        violations
    }

    fn build_fleet_parameters(&self, fleet: &FleetSpec) -> Vec<StackParameter> {
        grid_fleet_parameters(fleet)
    }
}
