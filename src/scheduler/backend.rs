//! The `SchedulerBackend` capability trait.

use crate::cluster_spec::FleetSpec;
use crate::errors::Violation;
use crate::infra::StackParameter;
use crate::scheduler::SchedulerType;

/// How a backend expresses compute capacity.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CapacityModel {
    /// Min/max/desired vCPUs for the whole fleet (managed batch service).
    VcpuLimits,
    /// Node counts per named partition (grid schedulers).
    NodesPerPartition,
}

/// Capability interface implemented once per scheduler variant.
///
/// The validator consults `validate_fleet` before a spec is considered valid,
/// and the lifecycle state machine renders stack parameters through
/// `build_fleet_parameters`. Neither needs to change when a backend is added.
pub trait SchedulerBackend: Send + Sync {
    fn scheduler_type(&self) -> SchedulerType;

    fn capacity_model(&self) -> CapacityModel;

    /// Whether the backend supports more than one fleet partition.
    fn supports_partitioned_fleets(&self) -> bool;

    /// Scheduler daemon definition installed on the head node, if the
    /// backend needs one. The managed batch service runs no head-node agent.
    fn head_node_daemon(&self) -> Option<&'static str>;

    /// Backend-specific fleet constraints (partition name rules, minimum
    /// node counts). Returns every violation found.
    fn validate_fleet(&self, fleet: &FleetSpec) -> Vec<Violation>;

    /// Translate one fleet definition into stack parameters.
    fn build_fleet_parameters(&self, fleet: &FleetSpec) -> Vec<StackParameter>;
}
