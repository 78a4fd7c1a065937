//! stratus: provision, operate, and tear down HPC clusters on a cloud
//! provisioning backend, abstracting over batch schedulers behind a uniform
//! cluster lifecycle.

pub mod cluster_spec;
pub mod commands;
pub mod config;
pub mod errors;
pub mod fleet;
pub mod image_builder;
pub mod infra;
pub mod lifecycle;
pub mod query;
pub mod scheduler;
pub mod tracker;
pub mod update_patch;
pub mod validation;

use std::sync::Arc;

// Re-exports for convenience
pub use cluster_spec::{ClusterSpec, FleetSpec, HeadNodeSpec, NetworkSpec, StorageSpec};
pub use config::{ClientConfig, StratusConfig, TrackerConfig};
pub use errors::{StratusError, Violation};
pub use fleet::{FleetController, FleetState};
pub use image_builder::{BuildOutcome, ImageBuildJob, ImageBuildOrchestrator, ImageBuildState};
pub use infra::{HttpProvisioningClient, InfrastructureClient, OperationKind, OperationStatus};
pub use lifecycle::{Cluster, ClusterState, OperationRegistry, Orchestrator, PendingOperation};
pub use query::{ClusterStatus, ClusterSummary, InstanceReport, QueryFacade};
pub use scheduler::{create_backend, SchedulerBackend, SchedulerType};
pub use tracker::StackOperationTracker;
pub use validation::SpecValidator;

/// Wired-up engine: orchestrator plus the controllers that share its client,
/// cluster cache, and exclusion token registry.
pub struct Engine {
    pub orchestrator: Arc<Orchestrator>,
    pub fleet: FleetController,
    pub query: QueryFacade,
    pub images: ImageBuildOrchestrator,
}

impl Engine {
    pub fn new(client: Arc<dyn InfrastructureClient>, config: &StratusConfig) -> Self {
        let orchestrator = Arc::new(Orchestrator::new(
            Arc::clone(&client),
            config.tracker.clone(),
            config.client.region.clone(),
        ));
        let fleet = FleetController::new(Arc::clone(&orchestrator));
        let query = QueryFacade::new(Arc::clone(&orchestrator));
        let images = ImageBuildOrchestrator::new(Arc::clone(&client), orchestrator.tracker());
        Self {
            orchestrator,
            fleet,
            query,
            images,
        }
    }

    /// Engine over the HTTP provisioning client described by the config.
    pub fn from_config(config: &StratusConfig) -> errors::Result<Self> {
        let client = Arc::new(HttpProvisioningClient::new(&config.client)?);
        Ok(Self::new(client, config))
    }
}
