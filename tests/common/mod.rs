//! Shared test fixtures: a scripted in-memory provisioning client and
//! cluster spec builders.

// Each test binary uses its own subset of these helpers.
#![allow(dead_code)]

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};

use chrono::Utc;

use stratus::cluster_spec::{ClusterSpec, FleetSpec, HeadNodeSpec, NetworkSpec};
use stratus::errors::{Result, StratusError};
use stratus::infra::{
    InfrastructureClient, InstanceSnapshot, NodeRole, OperationId, OperationKind, OperationStatus,
    PartitionCapacity, StackSnapshot, StackTemplate, SPEC_OUTPUT,
};
use stratus::scheduler::SchedulerType;
use stratus::{Engine, StratusConfig, TrackerConfig};

#[derive(Clone)]
struct FakeStack {
    stack_id: String,
    status: String,
    tags: HashMap<String, String>,
    outputs: HashMap<String, String>,
}

struct ScriptedOp {
    stack: String,
    kind: OperationKind,
    remaining_pending: u32,
    terminal: OperationStatus,
    /// Spec document to store on update success.
    spec_document: Option<String>,
}

#[derive(Default)]
struct Inner {
    stacks: HashMap<String, FakeStack>,
    ops: HashMap<String, ScriptedOp>,
    next_op: u64,
    next_stack: u64,
    /// Terminal outcome for each successive submit/delete; defaults to
    /// Succeeded when the queue is empty.
    outcomes: VecDeque<OperationStatus>,
    /// Number of Pending responses each new operation returns before its
    /// terminal status.
    pending_polls: u32,
    /// Extra outputs applied to a stack when its create succeeds.
    promised_outputs: HashMap<String, Vec<(String, String)>>,
    instances: HashMap<String, Vec<InstanceSnapshot>>,
    capacity_calls: Vec<(String, Vec<PartitionCapacity>)>,
    capacity_failure: Option<String>,
    describe_failure: Option<String>,
    delete_calls: HashMap<String, u32>,
    describe_calls: u32,
    submit_calls: u32,
}

/// In-memory provisioning backend with scriptable operation outcomes.
#[derive(Default)]
pub struct FakeInfraClient {
    inner: Mutex<Inner>,
}

impl FakeInfraClient {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Queue the terminal outcome of the next submitted operation.
    pub fn enqueue_outcome(&self, status: OperationStatus) {
        self.inner.lock().unwrap().outcomes.push_back(status);
    }

    /// Make every new operation report Pending this many times first.
    pub fn set_pending_polls(&self, polls: u32) {
        self.inner.lock().unwrap().pending_polls = polls;
    }

    /// Add an output to a stack once its create succeeds.
    pub fn promise_output(&self, stack: &str, key: &str, value: &str) {
        self.inner
            .lock()
            .unwrap()
            .promised_outputs
            .entry(stack.to_string())
            .or_default()
            .push((key.to_string(), value.to_string()));
    }

    pub fn set_instances(&self, stack: &str, instances: Vec<InstanceSnapshot>) {
        self.inner
            .lock()
            .unwrap()
            .instances
            .insert(stack.to_string(), instances);
    }

    pub fn fail_capacity(&self, detail: &str) {
        self.inner.lock().unwrap().capacity_failure = Some(detail.to_string());
    }

    /// Make every describe call fail as if transient retries were exhausted.
    pub fn fail_describe(&self, detail: &str) {
        self.inner.lock().unwrap().describe_failure = Some(detail.to_string());
    }

    /// Seed a pre-existing stack, as if created by someone else.
    pub fn seed_stack(&self, name: &str, status: &str, tags: HashMap<String, String>) {
        let mut inner = self.inner.lock().unwrap();
        inner.next_stack += 1;
        let stack_id = format!("stack-{:04}", inner.next_stack);
        inner.stacks.insert(
            name.to_string(),
            FakeStack {
                stack_id,
                status: status.to_string(),
                tags,
                outputs: HashMap::new(),
            },
        );
    }

    pub fn submit_count(&self) -> u32 {
        self.inner.lock().unwrap().submit_calls
    }

    pub fn describe_count(&self) -> u32 {
        self.inner.lock().unwrap().describe_calls
    }

    pub fn delete_count(&self, stack: &str) -> u32 {
        *self
            .inner
            .lock()
            .unwrap()
            .delete_calls
            .get(stack)
            .unwrap_or(&0)
    }

    pub fn capacity_calls(&self) -> Vec<(String, Vec<PartitionCapacity>)> {
        self.inner.lock().unwrap().capacity_calls.clone()
    }

    pub fn stack_status(&self, name: &str) -> Option<String> {
        self.inner
            .lock()
            .unwrap()
            .stacks
            .get(name)
            .map(|s| s.status.clone())
    }

    fn new_operation(
        inner: &mut Inner,
        stack: &str,
        kind: OperationKind,
        spec_document: Option<String>,
    ) -> OperationId {
        inner.next_op += 1;
        let token = format!("op-{:04}", inner.next_op);
        let terminal = inner
            .outcomes
            .pop_front()
            .unwrap_or(OperationStatus::Succeeded);
        inner.ops.insert(
            token.clone(),
            ScriptedOp {
                stack: stack.to_string(),
                kind,
                remaining_pending: inner.pending_polls,
                terminal,
                spec_document,
            },
        );
        OperationId {
            stack_name: stack.to_string(),
            token,
            kind,
            submitted_at: Utc::now(),
        }
    }
}

impl InfrastructureClient for FakeInfraClient {
    fn submit(&self, kind: OperationKind, template: &StackTemplate) -> Result<OperationId> {
        let mut inner = self.inner.lock().unwrap();
        inner.submit_calls += 1;
        match kind {
            OperationKind::Create => {
                if inner.stacks.contains_key(&template.stack_name) {
                    return Err(StratusError::Conflict {
                        name: template.stack_name.clone(),
                        detail: "stack already exists".to_string(),
                    });
                }
                inner.next_stack += 1;
                let stack_id = format!("stack-{:04}", inner.next_stack);
                inner.stacks.insert(
                    template.stack_name.clone(),
                    FakeStack {
                        stack_id,
                        status: "CREATE_IN_PROGRESS".to_string(),
                        tags: template.tags.clone(),
                        outputs: HashMap::new(),
                    },
                );
                Ok(Self::new_operation(
                    &mut inner,
                    &template.stack_name,
                    kind,
                    Some(template.spec_document.clone()),
                ))
            }
            OperationKind::Update => {
                if !inner.stacks.contains_key(&template.stack_name) {
                    return Err(StratusError::Backend {
                        detail: format!("no such stack {}", template.stack_name),
                    });
                }
                if let Some(stack) = inner.stacks.get_mut(&template.stack_name) {
                    stack.status = "UPDATE_IN_PROGRESS".to_string();
                }
                Ok(Self::new_operation(
                    &mut inner,
                    &template.stack_name,
                    kind,
                    Some(template.spec_document.clone()),
                ))
            }
            OperationKind::Delete => Ok(Self::new_operation(
                &mut inner,
                &template.stack_name,
                kind,
                None,
            )),
        }
    }

    fn poll(&self, operation: &OperationId) -> Result<OperationStatus> {
        let mut inner = self.inner.lock().unwrap();
        let op = inner
            .ops
            .get_mut(&operation.token)
            .ok_or_else(|| StratusError::Backend {
                detail: format!("unknown operation {}", operation.token),
            })?;
        if op.remaining_pending > 0 {
            op.remaining_pending -= 1;
            return Ok(OperationStatus::Pending);
        }
        let terminal = op.terminal.clone();
        let stack_name = op.stack.clone();
        let kind = op.kind;
        let spec_document = op.spec_document.clone();

        match (kind, &terminal) {
            (OperationKind::Create, OperationStatus::Succeeded) => {
                let promised = inner
                    .promised_outputs
                    .get(&stack_name)
                    .cloned()
                    .unwrap_or_default();
                if let Some(stack) = inner.stacks.get_mut(&stack_name) {
                    stack.status = "CREATE_COMPLETE".to_string();
                    if let Some(doc) = spec_document {
                        stack.outputs.insert(SPEC_OUTPUT.to_string(), doc);
                    }
                    for (key, value) in promised {
                        stack.outputs.insert(key, value);
                    }
                }
            }
            (OperationKind::Create, _) => {
                if let Some(stack) = inner.stacks.get_mut(&stack_name) {
                    stack.status = "ROLLBACK_COMPLETE".to_string();
                }
            }
            (OperationKind::Update, OperationStatus::Succeeded) => {
                if let Some(stack) = inner.stacks.get_mut(&stack_name) {
                    stack.status = "UPDATE_COMPLETE".to_string();
                    if let Some(doc) = spec_document {
                        stack.outputs.insert(SPEC_OUTPUT.to_string(), doc);
                    }
                }
            }
            (OperationKind::Update, _) => {
                // Rollback: the pre-update configuration stays in place.
                if let Some(stack) = inner.stacks.get_mut(&stack_name) {
                    stack.status = "UPDATE_ROLLBACK_COMPLETE".to_string();
                }
            }
            (OperationKind::Delete, OperationStatus::Succeeded) => {
                inner.stacks.remove(&stack_name);
            }
            (OperationKind::Delete, _) => {
                if let Some(stack) = inner.stacks.get_mut(&stack_name) {
                    stack.status = "DELETE_FAILED".to_string();
                }
            }
        }
        Ok(terminal)
    }

    fn describe(&self, stack_name: &str) -> Result<Option<StackSnapshot>> {
        let mut inner = self.inner.lock().unwrap();
        inner.describe_calls += 1;
        if let Some(detail) = &inner.describe_failure {
            return Err(StratusError::Transport {
                detail: detail.clone(),
            });
        }
        Ok(inner.stacks.get(stack_name).map(|s| StackSnapshot {
            name: stack_name.to_string(),
            stack_id: s.stack_id.clone(),
            status: s.status.clone(),
            status_reason: None,
            tags: s.tags.clone(),
            outputs: s.outputs.clone(),
        }))
    }

    fn delete(&self, stack_name: &str) -> Result<OperationId> {
        let mut inner = self.inner.lock().unwrap();
        *inner
            .delete_calls
            .entry(stack_name.to_string())
            .or_insert(0) += 1;
        if let Some(stack) = inner.stacks.get_mut(stack_name) {
            stack.status = "DELETE_IN_PROGRESS".to_string();
        }
        Ok(Self::new_operation(
            &mut inner,
            stack_name,
            OperationKind::Delete,
            None,
        ))
    }

    fn list_stacks(&self, tag_key: &str) -> Result<Vec<StackSnapshot>> {
        let inner = self.inner.lock().unwrap();
        Ok(inner
            .stacks
            .iter()
            .filter(|(_, s)| s.tags.contains_key(tag_key))
            .map(|(name, s)| StackSnapshot {
                name: name.clone(),
                stack_id: s.stack_id.clone(),
                status: s.status.clone(),
                status_reason: None,
                tags: s.tags.clone(),
                outputs: s.outputs.clone(),
            })
            .collect())
    }

    fn list_instances(&self, stack_name: &str) -> Result<Vec<InstanceSnapshot>> {
        let inner = self.inner.lock().unwrap();
        Ok(inner
            .instances
            .get(stack_name)
            .cloned()
            .unwrap_or_default())
    }

    fn set_fleet_capacity(&self, stack_name: &str, targets: &[PartitionCapacity]) -> Result<()> {
        let mut inner = self.inner.lock().unwrap();
        if let Some(detail) = &inner.capacity_failure {
            return Err(StratusError::Backend {
                detail: detail.clone(),
            });
        }
        inner
            .capacity_calls
            .push((stack_name.to_string(), targets.to_vec()));
        Ok(())
    }
}

/// Tracker schedule that keeps tests fast.
pub fn fast_tracker() -> TrackerConfig {
    TrackerConfig {
        initial_interval_secs: 1,
        backoff_multiplier: 1.0,
        max_interval_secs: 1,
        max_total_wait_secs: 60,
    }
}

pub fn engine_with(client: Arc<FakeInfraClient>) -> Engine {
    engine_with_tracker(client, fast_tracker())
}

pub fn engine_with_tracker(client: Arc<FakeInfraClient>, tracker: TrackerConfig) -> Engine {
    let mut config = StratusConfig::default();
    config.tracker = tracker;
    Engine::new(client, &config)
}

/// One managed-batch fleet, min 0 / max 10.
pub fn batch_spec(name: &str) -> ClusterSpec {
    ClusterSpec {
        name: name.to_string(),
        region: "us-east-1".to_string(),
        scheduler: SchedulerType::Batch,
        head_node: HeadNodeSpec {
            instance_type: "c5.xlarge".to_string(),
            key_pair: Some("ops".to_string()),
        },
        fleets: vec![FleetSpec {
            partition: "default".to_string(),
            instance_type: "c5.4xlarge".to_string(),
            min_count: 0,
            max_count: 10,
            target_count: None,
        }],
        network: NetworkSpec {
            subnet_ids: vec!["subnet-0abc".to_string()],
            security_group_ids: vec![],
        },
        storage: vec![],
    }
}

/// Two slurm partitions with distinct scaling limits.
pub fn slurm_spec(name: &str) -> ClusterSpec {
    ClusterSpec {
        name: name.to_string(),
        region: "us-east-1".to_string(),
        scheduler: SchedulerType::Slurm,
        head_node: HeadNodeSpec {
            instance_type: "c5.xlarge".to_string(),
            key_pair: None,
        },
        fleets: vec![
            FleetSpec {
                partition: "compute".to_string(),
                instance_type: "c5.4xlarge".to_string(),
                min_count: 0,
                max_count: 8,
                target_count: Some(4),
            },
            FleetSpec {
                partition: "gpu".to_string(),
                instance_type: "p3.2xlarge".to_string(),
                min_count: 0,
                max_count: 2,
                target_count: None,
            },
        ],
        network: NetworkSpec {
            subnet_ids: vec!["subnet-0abc".to_string()],
            security_group_ids: vec!["sg-0def".to_string()],
        },
        storage: vec![],
    }
}

/// A head node plus `compute` fleet instances for a cluster.
pub fn default_instances(running_compute: usize) -> Vec<InstanceSnapshot> {
    let mut instances = vec![InstanceSnapshot {
        instance_id: "i-head0001".to_string(),
        node_role: NodeRole::Head,
        partition: None,
        state: "running".to_string(),
        instance_type: "c5.xlarge".to_string(),
        public_address: Some("198.51.100.10".to_string()),
        private_address: Some("10.0.0.10".to_string()),
    }];
    for n in 0..running_compute {
        instances.push(InstanceSnapshot {
            instance_id: format!("i-comp{:04}", n),
            node_role: NodeRole::Compute,
            partition: Some("compute".to_string()),
            state: "running".to_string(),
            instance_type: "c5.4xlarge".to_string(),
            public_address: None,
            private_address: Some(format!("10.0.1.{}", 10 + n)),
        });
    }
    instances
}
