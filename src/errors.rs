//! Error types surfaced by the orchestration engine.
//!
//! Every variant carries enough detail (offending field or resource plus the
//! backend-reported message) to render directly to an operator. Nothing here
//! is retried automatically; transient network errors are retried inside the
//! provisioning client boundary before they ever become a `Transport` error.

use std::fmt;

use thiserror::Error;

/// A single violated constraint found while validating a cluster spec.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
pub struct Violation {
    /// Dotted path of the offending field, e.g. `fleets[0].partition`.
    pub field: String,
    pub message: String,
}

impl Violation {
    pub fn new(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            message: message.into(),
        }
    }
}

impl fmt::Display for Violation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

/// One disallowed change in an update request, with the reason it was refused.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
pub struct DeniedChange {
    pub section: String,
    pub field: String,
    pub old_value: String,
    pub new_value: String,
    pub reason: String,
}

impl fmt::Display for DeniedChange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}.{}: {} -> {} ({})",
            self.section, self.field, self.old_value, self.new_value, self.reason
        )
    }
}

fn join_lines<T: fmt::Display>(items: &[T]) -> String {
    items
        .iter()
        .map(|i| format!("  - {}", i))
        .collect::<Vec<_>>()
        .join("\n")
}

/// Error taxonomy of the orchestration engine.
#[derive(Debug, Error)]
pub enum StratusError {
    /// The spec fails structural or backend-specific constraints. Carries
    /// every violation found, not just the first.
    #[error("invalid cluster specification:\n{}", join_lines(violations))]
    Validation { violations: Vec<Violation> },

    /// A stack with the same name already exists outside this engine's
    /// knowledge. Distinct from a state-machine conflict.
    #[error("cluster '{name}' conflicts with an existing stack: {detail}")]
    Conflict { name: String, detail: String },

    /// A command arrived while another operation is in flight for the same
    /// cluster. Commands are rejected, never queued.
    #[error("an operation is already in progress for cluster '{name}'; retry once it completes")]
    OperationInProgress { name: String },

    /// The update spec matches the configuration the cluster is already
    /// running; there is nothing to apply.
    #[error("cluster '{name}' already matches the requested specification; nothing to update")]
    NoChanges { name: String },

    /// The update contains changes that are forbidden after creation.
    #[error("update requests changes that cannot be applied:\n{}", join_lines(changes))]
    ImmutableField { changes: Vec<DeniedChange> },

    /// The cluster is in a state that does not permit the requested command.
    #[error("cluster '{name}' is in state {state}; cannot {operation}")]
    InvalidState {
        name: String,
        state: String,
        operation: String,
    },

    /// The cluster is not known locally and could not be discovered from the
    /// backend.
    #[error("cluster '{name}' does not exist")]
    UnknownCluster { name: String },

    /// Polling exhausted its cumulative wait without observing a terminal
    /// status. The underlying operation may still be running; re-query status
    /// later.
    #[error(
        "operation {operation} on '{name}' did not reach a terminal state within {waited_secs}s; \
         it may still be running, re-check with 'stratus status {name}'"
    )]
    Inconclusive {
        name: String,
        operation: String,
        waited_secs: u64,
    },

    /// A fleet start/stop failed at the backend. The recorded desired state
    /// is left unchanged until the next status query reconciles.
    #[error("fleet capacity change failed for cluster '{name}': {detail}")]
    CapacityChange { name: String, detail: String },

    /// Tearing down an image build stack failed. Not retried automatically;
    /// the stack must be deleted manually.
    #[error("failed to delete build stack '{stack}': {detail}; manual deletion is required")]
    Cleanup { stack: String, detail: String },

    /// The provisioning backend is unreachable after transient retries.
    #[error("provisioning backend unreachable: {detail}")]
    Transport { detail: String },

    /// The backend rejected the credentials. Never retried.
    #[error("provisioning backend rejected the request: {detail}")]
    Unauthorized { detail: String },

    /// The backend reported an error the engine cannot classify further.
    #[error("provisioning backend error: {detail}")]
    Backend { detail: String },

    #[error("{0}")]
    Internal(String),
}

impl StratusError {
    pub fn validation(violations: Vec<Violation>) -> Self {
        StratusError::Validation { violations }
    }

    /// Short machine-readable kind name, used for `--format json` output.
    pub fn kind(&self) -> &'static str {
        match self {
            StratusError::Validation { .. } => "validation",
            StratusError::Conflict { .. } => "conflict",
            StratusError::OperationInProgress { .. } => "operation_in_progress",
            StratusError::NoChanges { .. } => "no_changes",
            StratusError::ImmutableField { .. } => "immutable_field",
            StratusError::InvalidState { .. } => "invalid_state",
            StratusError::UnknownCluster { .. } => "unknown_cluster",
            StratusError::Inconclusive { .. } => "inconclusive",
            StratusError::CapacityChange { .. } => "capacity_change",
            StratusError::Cleanup { .. } => "cleanup",
            StratusError::Transport { .. } => "transport",
            StratusError::Unauthorized { .. } => "unauthorized",
            StratusError::Backend { .. } => "backend",
            StratusError::Internal(_) => "internal",
        }
    }
}

pub type Result<T> = std::result::Result<T, StratusError>;
