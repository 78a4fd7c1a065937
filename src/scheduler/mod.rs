//! Scheduler backend abstraction.
//!
//! Each supported scheduler translates fleet capacity intents into
//! backend-specific stack parameters and contributes its own fleet
//! validation rules. Adding a scheduler means adding a variant here; the
//! lifecycle state machine never changes.

pub mod backend;
mod batch;
mod sge;
mod slurm;
mod torque;

use std::fmt;

use serde::{Deserialize, Serialize};

pub use backend::{CapacityModel, SchedulerBackend};
pub use batch::BatchBackend;
pub use sge::SgeBackend;
pub use slurm::SlurmBackend;
pub use torque::TorqueBackend;

/// Closed set of supported schedulers, selected in the cluster spec and
/// carried immutably with the cluster record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SchedulerType {
    /// Managed batch service; capacity expressed as vCPU limits.
    Batch,
    Slurm,
    Sge,
    Torque,
}

impl SchedulerType {
    pub fn as_str(&self) -> &'static str {
        match self {
            SchedulerType::Batch => "batch",
            SchedulerType::Slurm => "slurm",
            SchedulerType::Sge => "sge",
            SchedulerType::Torque => "torque",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "batch" => Some(SchedulerType::Batch),
            "slurm" => Some(SchedulerType::Slurm),
            "sge" => Some(SchedulerType::Sge),
            "torque" => Some(SchedulerType::Torque),
            _ => None,
        }
    }
}

impl fmt::Display for SchedulerType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Factory for scheduler backends.
pub fn create_backend(scheduler_type: SchedulerType) -> Box<dyn SchedulerBackend> {
    match scheduler_type {
        SchedulerType::Batch => Box::new(BatchBackend),
        SchedulerType::Slurm => Box::new(SlurmBackend),
        SchedulerType::Sge => Box::new(SgeBackend),
        SchedulerType::Torque => Box::new(TorqueBackend),
    }
}
