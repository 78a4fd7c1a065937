//! Cluster lifecycle state machine.
//!
//! The orchestrator turns operator commands into infrastructure change
//! requests, enforces the single-in-flight-operation invariant through a
//! per-cluster exclusion token, and reconciles terminal operation results
//! into the fixed set of cluster states.

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::{Arc, Mutex};
use std::thread;

use chrono::{DateTime, Utc};
use log::{error, info, warn};
use serde::Serialize;

use crate::cluster_spec::{ClusterSpec, ValidatedSpec};
use crate::config::TrackerConfig;
use crate::errors::{Result, StratusError};
use crate::fleet::FleetState;
use crate::infra::{
    InfrastructureClient, OperationId, OperationKind, OperationStatus, StackParameter,
    StackTemplate, CLUSTER_TAG, SCHEDULER_TAG, SPEC_OUTPUT,
};
use crate::scheduler::{create_backend, SchedulerType};
use crate::tracker::StackOperationTracker;
use crate::update_patch::SpecPatch;
use crate::validation::SpecValidator;

/// Lifecycle state of a cluster. Fixed enumeration; reconciliation never
/// produces a state outside this set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ClusterState {
    Absent,
    CreateInProgress,
    CreateComplete,
    CreateFailed,
    UpdateInProgress,
    UpdateComplete,
    UpdateFailed,
    DeleteInProgress,
    Deleted,
}

impl ClusterState {
    pub fn as_str(&self) -> &'static str {
        match self {
            ClusterState::Absent => "ABSENT",
            ClusterState::CreateInProgress => "CREATE_IN_PROGRESS",
            ClusterState::CreateComplete => "CREATE_COMPLETE",
            ClusterState::CreateFailed => "CREATE_FAILED",
            ClusterState::UpdateInProgress => "UPDATE_IN_PROGRESS",
            ClusterState::UpdateComplete => "UPDATE_COMPLETE",
            ClusterState::UpdateFailed => "UPDATE_FAILED",
            ClusterState::DeleteInProgress => "DELETE_IN_PROGRESS",
            ClusterState::Deleted => "DELETED",
        }
    }

    /// Map a backend stack status string onto a cluster state.
    pub fn from_stack_status(status: &str) -> Option<ClusterState> {
        match status {
            "CREATE_IN_PROGRESS" => Some(ClusterState::CreateInProgress),
            "CREATE_COMPLETE" => Some(ClusterState::CreateComplete),
            "CREATE_FAILED" | "ROLLBACK_IN_PROGRESS" | "ROLLBACK_COMPLETE" => {
                Some(ClusterState::CreateFailed)
            }
            "UPDATE_IN_PROGRESS" => Some(ClusterState::UpdateInProgress),
            "UPDATE_COMPLETE" => Some(ClusterState::UpdateComplete),
            "UPDATE_FAILED" | "UPDATE_ROLLBACK_COMPLETE" | "UPDATE_ROLLBACK_IN_PROGRESS" => {
                Some(ClusterState::UpdateFailed)
            }
            "DELETE_IN_PROGRESS" | "DELETE_FAILED" => Some(ClusterState::DeleteInProgress),
            "DELETE_COMPLETE" => Some(ClusterState::Deleted),
            _ => None,
        }
    }

    pub fn is_in_progress(&self) -> bool {
        matches!(
            self,
            ClusterState::CreateInProgress
                | ClusterState::UpdateInProgress
                | ClusterState::DeleteInProgress
        )
    }
}

impl fmt::Display for ClusterState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Durable record of one named cluster.
#[derive(Debug, Clone)]
pub struct Cluster {
    pub name: String,
    pub region: String,
    pub state: ClusterState,
    pub stack_id: Option<String>,
    pub scheduler_type: SchedulerType,
    /// Last applied spec. `None` for clusters discovered from the backend
    /// whose stored spec could not be recovered.
    pub spec: Option<ValidatedSpec>,
    /// Target spec of an in-flight update; promoted to `spec` on success,
    /// discarded on rollback.
    pub pending_spec: Option<ValidatedSpec>,
    pub fleet_state: FleetState,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Shared in-memory cluster cache. The provisioning backend remains the
/// source of truth; this cache is advisory and reconciled on status queries.
#[derive(Clone, Default)]
pub struct ClusterStore {
    inner: Arc<Mutex<HashMap<String, Cluster>>>,
}

impl ClusterStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, name: &str) -> Option<Cluster> {
        self.inner.lock().expect("store poisoned").get(name).cloned()
    }

    pub fn insert(&self, cluster: Cluster) {
        self.inner
            .lock()
            .expect("store poisoned")
            .insert(cluster.name.clone(), cluster);
    }

    pub fn remove(&self, name: &str) -> Option<Cluster> {
        self.inner.lock().expect("store poisoned").remove(name)
    }

    /// Apply a mutation to a cached cluster, if present.
    pub fn update<F: FnOnce(&mut Cluster)>(&self, name: &str, f: F) {
        let mut guard = self.inner.lock().expect("store poisoned");
        if let Some(cluster) = guard.get_mut(name) {
            f(cluster);
            cluster.updated_at = Utc::now();
        }
    }

    pub fn names(&self) -> Vec<String> {
        self.inner
            .lock()
            .expect("store poisoned")
            .keys()
            .cloned()
            .collect()
    }
}

/// Per-cluster exclusion token set: the only mutable state shared between
/// independent cluster state machines. Test-and-set; acquisition fails
/// loudly instead of blocking.
#[derive(Debug, Default)]
pub struct OperationRegistry {
    active: Mutex<HashSet<String>>,
}

impl OperationRegistry {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn try_acquire(self: &Arc<Self>, name: &str) -> Result<OperationGuard> {
        let mut active = self.active.lock().expect("registry poisoned");
        if !active.insert(name.to_string()) {
            return Err(StratusError::OperationInProgress {
                name: name.to_string(),
            });
        }
        Ok(OperationGuard {
            registry: Arc::clone(self),
            name: name.to_string(),
        })
    }

    pub fn is_active(&self, name: &str) -> bool {
        self.active
            .lock()
            .expect("registry poisoned")
            .contains(name)
    }
}

/// RAII token; released on terminal resolution, on an inconclusive poll, or
/// when the submission fails before reaching the backend.
#[derive(Debug)]
pub struct OperationGuard {
    registry: Arc<OperationRegistry>,
    name: String,
}

impl Drop for OperationGuard {
    fn drop(&mut self) {
        self.registry
            .active
            .lock()
            .expect("registry poisoned")
            .remove(&self.name);
    }
}

/// An accepted lifecycle command whose infrastructure operation is in flight.
/// Holds the cluster's exclusion token until resolved or dropped.
#[derive(Debug)]
pub struct PendingOperation {
    pub cluster: String,
    pub operation: OperationId,
    _guard: OperationGuard,
}

/// Handle to a background waiter thread. Detaching abandons the waiter
/// without cancelling the underlying infrastructure operation; a later
/// status query resumes tracking from the backend.
pub struct OperationWaiter {
    handle: thread::JoinHandle<Result<ClusterState>>,
}

impl OperationWaiter {
    /// Block until the waiter resolves the operation.
    pub fn join(self) -> Result<ClusterState> {
        self.handle
            .join()
            .map_err(|_| StratusError::Internal("operation waiter panicked".to_string()))?
    }

    /// Abandon the waiter. The poller thread keeps running until its own
    /// terminal or inconclusive result so the exclusion token is released.
    pub fn detach(self) {
        drop(self.handle);
    }
}

/// The orchestration core.
pub struct Orchestrator {
    client: Arc<dyn InfrastructureClient>,
    tracker: Arc<StackOperationTracker>,
    store: ClusterStore,
    registry: Arc<OperationRegistry>,
    region: String,
}

impl Orchestrator {
    pub fn new(
        client: Arc<dyn InfrastructureClient>,
        tracker_config: TrackerConfig,
        region: impl Into<String>,
    ) -> Self {
        let tracker = Arc::new(StackOperationTracker::new(
            Arc::clone(&client),
            tracker_config,
        ));
        Self {
            client,
            tracker,
            store: ClusterStore::new(),
            registry: OperationRegistry::new(),
            region: region.into(),
        }
    }

    pub fn store(&self) -> ClusterStore {
        self.store.clone()
    }

    pub fn registry(&self) -> Arc<OperationRegistry> {
        Arc::clone(&self.registry)
    }

    pub fn client(&self) -> Arc<dyn InfrastructureClient> {
        Arc::clone(&self.client)
    }

    pub fn tracker(&self) -> Arc<StackOperationTracker> {
        Arc::clone(&self.tracker)
    }

    /// Submit creation of a new cluster. Requires the cluster to be absent
    /// both locally and in the backend namespace.
    pub fn submit_create(&self, spec: ClusterSpec) -> Result<PendingOperation> {
        let name = spec.name.clone();
        let guard = self.registry.try_acquire(&name)?;

        let validated = SpecValidator::validate(spec)?;

        if let Some(existing) = self.store.get(&name) {
            if !matches!(existing.state, ClusterState::Absent | ClusterState::Deleted) {
                return Err(StratusError::InvalidState {
                    name,
                    state: existing.state.to_string(),
                    operation: "create".to_string(),
                });
            }
        }

        // The backend namespace is authoritative for name uniqueness.
        if let Some(stack) = self.client.describe(&name)? {
            return Err(StratusError::Conflict {
                name,
                detail: format!("stack {} already exists in state {}", stack.stack_id, stack.status),
            });
        }

        let template = render_template(&validated);
        let operation = self
            .client
            .submit(OperationKind::Create, &template)
            .map_err(|e| remap_conflict(e, &name))?;

        let now = Utc::now();
        self.store.insert(Cluster {
            name: name.clone(),
            region: self.region.clone(),
            state: ClusterState::CreateInProgress,
            stack_id: None,
            scheduler_type: validated.scheduler(),
            spec: Some(validated),
            pending_spec: None,
            fleet_state: FleetState::Running,
            created_at: now,
            updated_at: now,
        });
        info!("Submitted CREATE for cluster '{}'", name);

        Ok(PendingOperation {
            cluster: name,
            operation,
            _guard: guard,
        })
    }

    /// Submit an update of an existing cluster against its last applied spec.
    pub fn submit_update(&self, spec: ClusterSpec) -> Result<PendingOperation> {
        let name = spec.name.clone();
        let guard = self.registry.try_acquire(&name)?;

        let cluster = self.require_cluster(&name)?;
        match cluster.state {
            ClusterState::CreateComplete
            | ClusterState::UpdateComplete
            | ClusterState::UpdateFailed => {}
            state => {
                return Err(StratusError::InvalidState {
                    name,
                    state: state.to_string(),
                    operation: "update".to_string(),
                });
            }
        }

        let validated = SpecValidator::validate(spec)?;
        let base = cluster.spec.as_ref().ok_or_else(|| {
            StratusError::Internal(format!(
                "no recorded spec for cluster '{}'; cannot compute update diff",
                name
            ))
        })?;

        let patch = SpecPatch::diff(base.spec(), validated.spec());
        if patch.is_empty() {
            return Err(StratusError::NoChanges { name });
        }
        patch.check(&name, cluster.fleet_state)?;

        let template = render_template(&validated);
        let operation = self.client.submit(OperationKind::Update, &template)?;

        self.store.update(&name, |c| {
            c.state = ClusterState::UpdateInProgress;
            c.pending_spec = Some(validated.clone());
        });
        info!("Submitted UPDATE for cluster '{}'", name);

        Ok(PendingOperation {
            cluster: name,
            operation,
            _guard: guard,
        })
    }

    /// Submit deletion. Allowed from any state except absent/deleted when no
    /// operation is in flight, including failed states needing cleanup.
    pub fn submit_delete(&self, name: &str) -> Result<PendingOperation> {
        let guard = self.registry.try_acquire(name)?;

        let cluster = self.require_cluster(name)?;
        if matches!(cluster.state, ClusterState::Deleted | ClusterState::Absent) {
            return Err(StratusError::InvalidState {
                name: name.to_string(),
                state: cluster.state.to_string(),
                operation: "delete".to_string(),
            });
        }

        let operation = self.client.delete(name)?;
        self.store.update(name, |c| {
            c.state = ClusterState::DeleteInProgress;
        });
        info!("Submitted DELETE for cluster '{}'", name);

        Ok(PendingOperation {
            cluster: name.to_string(),
            operation,
            _guard: guard,
        })
    }

    /// Block until the pending operation resolves, then reconcile.
    pub fn wait(&self, pending: PendingOperation) -> Result<ClusterState> {
        let status = self.tracker.wait(&pending.operation)?;
        let state = self.resolve(&pending.cluster, pending.operation.kind, &status);
        // Token released here, on terminal resolution.
        drop(pending);
        Ok(state)
    }

    /// Track the pending operation on a worker thread. The returned waiter
    /// can be joined for the result or detached; detaching never cancels the
    /// backend operation.
    pub fn watch(self: &Arc<Self>, pending: PendingOperation) -> OperationWaiter {
        let orchestrator = Arc::clone(self);
        let handle = thread::spawn(move || orchestrator.wait(pending));
        OperationWaiter { handle }
    }

    /// Deterministic mapping from (operation kind, terminal result) to the
    /// next cluster state.
    pub fn resolve(
        &self,
        name: &str,
        kind: OperationKind,
        status: &OperationStatus,
    ) -> ClusterState {
        let state = match (kind, status) {
            (OperationKind::Create, OperationStatus::Succeeded) => ClusterState::CreateComplete,
            // A rollback on create removes the resources at the backend; the
            // record is kept so the failure detail can be inspected.
            (OperationKind::Create, OperationStatus::Failed(detail))
            | (OperationKind::Create, OperationStatus::RolledBack(detail)) => {
                error!("CREATE of cluster '{}' failed: {}", name, detail);
                ClusterState::CreateFailed
            }
            (OperationKind::Update, OperationStatus::Succeeded) => ClusterState::UpdateComplete,
            // Rollback on update leaves the pre-update configuration running.
            (OperationKind::Update, OperationStatus::Failed(detail))
            | (OperationKind::Update, OperationStatus::RolledBack(detail)) => {
                error!("UPDATE of cluster '{}' rolled back: {}", name, detail);
                ClusterState::UpdateFailed
            }
            (OperationKind::Delete, OperationStatus::Succeeded) => ClusterState::Deleted,
            (OperationKind::Delete, OperationStatus::Failed(detail))
            | (OperationKind::Delete, OperationStatus::RolledBack(detail)) => {
                // No DELETE_FAILED state exists; the record stays deletable.
                error!("DELETE of cluster '{}' failed: {}", name, detail);
                ClusterState::DeleteInProgress
            }
            (_, OperationStatus::Pending) => {
                warn!("resolve called with non-terminal status for '{}'", name);
                return self
                    .store
                    .get(name)
                    .map(|c| c.state)
                    .unwrap_or(ClusterState::Absent);
            }
        };

        if state == ClusterState::Deleted {
            self.store.remove(name);
        } else {
            self.store.update(name, |c| {
                c.state = state;
                match state {
                    ClusterState::UpdateComplete => {
                        if let Some(spec) = c.pending_spec.take() {
                            c.spec = Some(spec);
                        }
                    }
                    ClusterState::UpdateFailed => {
                        c.pending_spec = None;
                    }
                    _ => {}
                }
            });
        }
        state
    }

    /// Look up a cluster locally, falling back to backend discovery.
    pub fn require_cluster(&self, name: &str) -> Result<Cluster> {
        if let Some(cluster) = self.store.get(name) {
            return Ok(cluster);
        }
        match self.discover(name)? {
            Some(cluster) => Ok(cluster),
            None => Err(StratusError::UnknownCluster {
                name: name.to_string(),
            }),
        }
    }

    /// Rebuild a cluster record from the backend (stack tags, status, and
    /// the spec document stored with the stack) and cache it.
    pub fn discover(&self, name: &str) -> Result<Option<Cluster>> {
        let Some(snapshot) = self.client.describe(name)? else {
            return Ok(None);
        };
        if !snapshot.tags.contains_key(CLUSTER_TAG) {
            // A foreign stack with the same name: a conflict, not a cluster.
            return Err(StratusError::Conflict {
                name: name.to_string(),
                detail: format!("stack {} exists but is not a stratus cluster", snapshot.stack_id),
            });
        }

        let scheduler_type = snapshot
            .tags
            .get(SCHEDULER_TAG)
            .and_then(|t| SchedulerType::parse(t))
            .unwrap_or(SchedulerType::Slurm);
        let state = ClusterState::from_stack_status(&snapshot.status).ok_or_else(|| {
            StratusError::Backend {
                detail: format!("unknown stack status '{}'", snapshot.status),
            }
        })?;

        let spec = snapshot
            .outputs
            .get(SPEC_OUTPUT)
            .and_then(|doc| ClusterSpec::from_yaml(doc).ok())
            .map(ValidatedSpec::new);
        if spec.is_none() {
            warn!("Could not recover the stored spec for cluster '{}'", name);
        }

        let now = Utc::now();
        let cluster = Cluster {
            name: name.to_string(),
            region: self.region.clone(),
            state,
            stack_id: Some(snapshot.stack_id),
            scheduler_type,
            spec,
            pending_spec: None,
            fleet_state: FleetState::Running,
            created_at: now,
            updated_at: now,
        };
        self.store.insert(cluster.clone());
        Ok(Some(cluster))
    }
}

/// Map a backend-level conflict onto the cluster name it concerns.
fn remap_conflict(err: StratusError, name: &str) -> StratusError {
    match err {
        StratusError::Conflict { detail, .. } => StratusError::Conflict {
            name: name.to_string(),
            detail,
        },
        other => other,
    }
}

/// Render the full change request for a validated spec: head node, network,
/// storage, scheduler daemon, and the backend-specific fleet parameters.
pub fn render_template(validated: &ValidatedSpec) -> StackTemplate {
    let spec = validated.spec();
    let backend = create_backend(spec.scheduler);

    let mut parameters = vec![StackParameter::new(
        "head_node.instance_type",
        spec.head_node.instance_type.clone(),
    )];
    if let Some(key_pair) = &spec.head_node.key_pair {
        parameters.push(StackParameter::new("head_node.key_pair", key_pair.clone()));
    }
    if let Some(daemon) = backend.head_node_daemon() {
        parameters.push(StackParameter::new("head_node.scheduler_daemon", daemon));
    }
    parameters.push(StackParameter::new(
        "network.subnet_ids",
        spec.network.subnet_ids.join(","),
    ));
    if !spec.network.security_group_ids.is_empty() {
        parameters.push(StackParameter::new(
            "network.security_group_ids",
            spec.network.security_group_ids.join(","),
        ));
    }
    for storage in &spec.storage {
        parameters.push(StackParameter::new(
            format!("storage.{}.type", storage.mount_dir),
            storage.storage_type.clone(),
        ));
        if let Some(size) = storage.size_gb {
            parameters.push(StackParameter::new(
                format!("storage.{}.size_gb", storage.mount_dir),
                size.to_string(),
            ));
        }
    }
    for fleet in &spec.fleets {
        parameters.extend(backend.build_fleet_parameters(fleet));
    }

    let mut tags = HashMap::new();
    tags.insert(CLUSTER_TAG.to_string(), spec.name.clone());
    tags.insert(SCHEDULER_TAG.to_string(), spec.scheduler.as_str().to_string());

    StackTemplate {
        stack_name: spec.name.clone(),
        parameters,
        tags,
        spec_document: validated.to_yaml(),
    }
}
