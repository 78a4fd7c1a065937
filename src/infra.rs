//! Provisioning backend boundary.
//!
//! [`InfrastructureClient`] is the only surface the engine uses to change or
//! observe infrastructure. The production implementation speaks the
//! provisioning service's REST API over blocking HTTP; transient network
//! errors are retried here with a bounded backoff, and nowhere else in the
//! engine. Authorization errors are surfaced unchanged and never retried.

use std::collections::HashMap;
use std::thread;
use std::time::Duration;

use chrono::{DateTime, Utc};
use log::{debug, warn};
use serde::{Deserialize, Serialize};

use crate::config::ClientConfig;
use crate::errors::{Result, StratusError};

/// Kind of infrastructure change request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum OperationKind {
    Create,
    Update,
    Delete,
}

impl std::fmt::Display for OperationKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            OperationKind::Create => f.write_str("CREATE"),
            OperationKind::Update => f.write_str("UPDATE"),
            OperationKind::Delete => f.write_str("DELETE"),
        }
    }
}

/// Status of one asynchronous operation as reported by the backend.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OperationStatus {
    Pending,
    Succeeded,
    Failed(String),
    RolledBack(String),
}

impl OperationStatus {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, OperationStatus::Pending)
    }

    pub fn detail(&self) -> Option<&str> {
        match self {
            OperationStatus::Failed(d) | OperationStatus::RolledBack(d) => Some(d),
            _ => None,
        }
    }
}

/// Handle to one asynchronous infrastructure change.
#[derive(Debug, Clone)]
pub struct OperationId {
    pub stack_name: String,
    pub token: String,
    pub kind: OperationKind,
    pub submitted_at: DateTime<Utc>,
}

/// One key/value stack parameter.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StackParameter {
    pub key: String,
    pub value: String,
}

impl StackParameter {
    pub fn new(key: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
        }
    }
}

/// Tag key identifying stacks managed by this engine.
pub const CLUSTER_TAG: &str = "stratus:cluster";
/// Tag key carrying the scheduler type.
pub const SCHEDULER_TAG: &str = "stratus:scheduler";
/// Stack output carrying the serialized cluster spec, so later process
/// invocations can reconstruct it from `describe`.
pub const SPEC_OUTPUT: &str = "cluster-spec";

/// Rendered change request handed to the backend.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StackTemplate {
    pub stack_name: String,
    pub parameters: Vec<StackParameter>,
    pub tags: HashMap<String, String>,
    /// Serialized cluster spec, stored with the stack and echoed back in
    /// `describe` outputs under [`SPEC_OUTPUT`].
    pub spec_document: String,
}

/// Snapshot of one stack as reported by `describe`.
#[derive(Debug, Clone)]
pub struct StackSnapshot {
    pub name: String,
    pub stack_id: String,
    /// Backend status string, e.g. `CREATE_IN_PROGRESS`, `UPDATE_COMPLETE`.
    pub status: String,
    pub status_reason: Option<String>,
    pub tags: HashMap<String, String>,
    pub outputs: HashMap<String, String>,
}

/// Role of a compute resource inside a cluster.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeRole {
    Head,
    Compute,
}

/// Snapshot of one instance tagged to a cluster.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InstanceSnapshot {
    pub instance_id: String,
    pub node_role: NodeRole,
    /// Partition name for compute nodes.
    pub partition: Option<String>,
    pub state: String,
    pub instance_type: String,
    pub public_address: Option<String>,
    pub private_address: Option<String>,
}

/// Desired capacity for one partition, used by capacity-only changes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PartitionCapacity {
    pub partition: String,
    pub desired: u32,
}

/// Interface to the provisioning backend.
pub trait InfrastructureClient: Send + Sync {
    /// Submit one infrastructure change request.
    fn submit(&self, kind: OperationKind, template: &StackTemplate) -> Result<OperationId>;

    /// Poll an operation for its current status.
    fn poll(&self, operation: &OperationId) -> Result<OperationStatus>;

    /// Describe one stack; `None` if it does not exist.
    fn describe(&self, stack_name: &str) -> Result<Option<StackSnapshot>>;

    /// Request deletion of a stack.
    fn delete(&self, stack_name: &str) -> Result<OperationId>;

    /// List all stacks carrying the given tag key, whoever created them.
    fn list_stacks(&self, tag_key: &str) -> Result<Vec<StackSnapshot>>;

    /// List compute resources tagged to a stack.
    fn list_instances(&self, stack_name: &str) -> Result<Vec<InstanceSnapshot>>;

    /// Capacity-only change: set desired capacity per partition without
    /// re-rendering the stack. Never touches head node, network or storage.
    fn set_fleet_capacity(&self, stack_name: &str, targets: &[PartitionCapacity]) -> Result<()>;
}

// ---------------------------------------------------------------------------
// HTTP implementation
// ---------------------------------------------------------------------------

/// Blocking HTTP client for the provisioning REST API.
///
/// Constructed explicitly from [`ClientConfig`]; there is no process-wide
/// session state.
pub struct HttpProvisioningClient {
    base_url: String,
    region: String,
    http: reqwest::blocking::Client,
    transient_retries: u32,
    transient_retry_delay: Duration,
}

#[derive(Debug, Deserialize)]
struct OperationResponse {
    operation_id: String,
}

#[derive(Debug, Deserialize)]
struct OperationStatusResponse {
    status: String,
    #[serde(default)]
    detail: Option<String>,
}

#[derive(Debug, Deserialize)]
struct StackResponse {
    name: String,
    stack_id: String,
    status: String,
    #[serde(default)]
    status_reason: Option<String>,
    #[serde(default)]
    tags: HashMap<String, String>,
    #[serde(default)]
    outputs: HashMap<String, String>,
}

#[derive(Debug, Deserialize)]
struct StackListResponse {
    stacks: Vec<StackResponse>,
}

#[derive(Debug, Deserialize)]
struct InstanceResponse {
    instance_id: String,
    node_role: NodeRole,
    #[serde(default)]
    partition: Option<String>,
    state: String,
    instance_type: String,
    #[serde(default)]
    public_address: Option<String>,
    #[serde(default)]
    private_address: Option<String>,
}

#[derive(Debug, Deserialize)]
struct InstanceListResponse {
    instances: Vec<InstanceResponse>,
}

#[derive(Debug, Serialize)]
struct SubmitRequest<'a> {
    kind: OperationKind,
    region: &'a str,
    #[serde(flatten)]
    template: &'a StackTemplate,
}

#[derive(Debug, Serialize)]
struct CapacityRequest<'a> {
    targets: &'a [PartitionCapacity],
}

impl From<StackResponse> for StackSnapshot {
    fn from(r: StackResponse) -> Self {
        StackSnapshot {
            name: r.name,
            stack_id: r.stack_id,
            status: r.status,
            status_reason: r.status_reason,
            tags: r.tags,
            outputs: r.outputs,
        }
    }
}

impl From<InstanceResponse> for InstanceSnapshot {
    fn from(r: InstanceResponse) -> Self {
        InstanceSnapshot {
            instance_id: r.instance_id,
            node_role: r.node_role,
            partition: r.partition,
            state: r.state,
            instance_type: r.instance_type,
            public_address: r.public_address,
            private_address: r.private_address,
        }
    }
}

impl HttpProvisioningClient {
    pub fn new(config: &ClientConfig) -> Result<Self> {
        let http = reqwest::blocking::Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .build()
            .map_err(|e| StratusError::Internal(format!("failed to build http client: {}", e)))?;
        Ok(Self {
            base_url: config.endpoint.trim_end_matches('/').to_string(),
            region: config.region.clone(),
            http,
            transient_retries: config.transient_retries.max(1),
            transient_retry_delay: Duration::from_secs(config.transient_retry_delay_secs),
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    /// Run a request closure with retries for transient network errors only.
    fn send_with_retries<T>(
        &self,
        what: &str,
        mut call: impl FnMut() -> std::result::Result<reqwest::blocking::Response, reqwest::Error>,
        mut parse: impl FnMut(reqwest::blocking::Response) -> Result<T>,
    ) -> Result<T> {
        let mut attempt = 0;
        loop {
            attempt += 1;
            match call() {
                Ok(response) => return self.check_status(what, response).and_then(&mut parse),
                Err(err) if (err.is_timeout() || err.is_connect()) => {
                    if attempt >= self.transient_retries {
                        return Err(StratusError::Transport {
                            detail: format!("{}: {} (after {} attempts)", what, err, attempt),
                        });
                    }
                    warn!(
                        "Transient error on {} (attempt {}/{}): {}",
                        what, attempt, self.transient_retries, err
                    );
                    thread::sleep(self.transient_retry_delay);
                }
                Err(err) => {
                    return Err(StratusError::Transport {
                        detail: format!("{}: {}", what, err),
                    });
                }
            }
        }
    }

    /// Map HTTP status classes onto the error taxonomy.
    fn check_status(
        &self,
        what: &str,
        response: reqwest::blocking::Response,
    ) -> Result<reqwest::blocking::Response> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let body = response.text().unwrap_or_default();
        match status.as_u16() {
            401 | 403 => Err(StratusError::Unauthorized {
                detail: format!("{}: {} {}", what, status, body),
            }),
            409 => Err(StratusError::Conflict {
                name: what.to_string(),
                detail: body,
            }),
            _ => Err(StratusError::Backend {
                detail: format!("{}: {} {}", what, status, body),
            }),
        }
    }

    fn parse_status(status: &str, detail: Option<String>) -> OperationStatus {
        match status {
            "PENDING" => OperationStatus::Pending,
            "SUCCEEDED" => OperationStatus::Succeeded,
            "ROLLED_BACK" => OperationStatus::RolledBack(detail.unwrap_or_default()),
            _ => OperationStatus::Failed(detail.unwrap_or_else(|| status.to_string())),
        }
    }
}

impl InfrastructureClient for HttpProvisioningClient {
    fn submit(&self, kind: OperationKind, template: &StackTemplate) -> Result<OperationId> {
        let url = self.url("/stacks");
        let request = SubmitRequest {
            kind,
            region: &self.region,
            template,
        };
        let what = format!("submit {} for stack {}", kind, template.stack_name);
        debug!("{} -> {}", what, url);
        let response: OperationResponse = self.send_with_retries(
            &what,
            || self.http.post(&url).json(&request).send(),
            |r| {
                r.json().map_err(|e| StratusError::Backend {
                    detail: format!("malformed submit response: {}", e),
                })
            },
        )?;
        Ok(OperationId {
            stack_name: template.stack_name.clone(),
            token: response.operation_id,
            kind,
            submitted_at: Utc::now(),
        })
    }

    fn poll(&self, operation: &OperationId) -> Result<OperationStatus> {
        let url = self.url(&format!("/operations/{}", operation.token));
        let what = format!("poll operation {}", operation.token);
        let response: OperationStatusResponse = self.send_with_retries(
            &what,
            || self.http.get(&url).send(),
            |r| {
                r.json().map_err(|e| StratusError::Backend {
                    detail: format!("malformed operation status: {}", e),
                })
            },
        )?;
        Ok(Self::parse_status(&response.status, response.detail))
    }

    fn describe(&self, stack_name: &str) -> Result<Option<StackSnapshot>> {
        let url = self.url(&format!("/stacks/{}", stack_name));
        let what = format!("describe stack {}", stack_name);
        let mut attempt = 0;
        loop {
            attempt += 1;
            match self.http.get(&url).send() {
                Ok(response) if response.status().as_u16() == 404 => return Ok(None),
                Ok(response) => {
                    let response = self.check_status(&what, response)?;
                    let stack: StackResponse =
                        response.json().map_err(|e| StratusError::Backend {
                            detail: format!("malformed stack response: {}", e),
                        })?;
                    return Ok(Some(stack.into()));
                }
                Err(err) if (err.is_timeout() || err.is_connect()) => {
                    if attempt >= self.transient_retries {
                        return Err(StratusError::Transport {
                            detail: format!("{}: {} (after {} attempts)", what, err, attempt),
                        });
                    }
                    warn!(
                        "Transient error on {} (attempt {}/{}): {}",
                        what, attempt, self.transient_retries, err
                    );
                    thread::sleep(self.transient_retry_delay);
                }
                Err(err) => {
                    return Err(StratusError::Transport {
                        detail: format!("{}: {}", what, err),
                    });
                }
            }
        }
    }

    fn delete(&self, stack_name: &str) -> Result<OperationId> {
        let url = self.url(&format!("/stacks/{}", stack_name));
        let what = format!("delete stack {}", stack_name);
        let response: OperationResponse = self.send_with_retries(
            &what,
            || self.http.delete(&url).send(),
            |r| {
                r.json().map_err(|e| StratusError::Backend {
                    detail: format!("malformed delete response: {}", e),
                })
            },
        )?;
        Ok(OperationId {
            stack_name: stack_name.to_string(),
            token: response.operation_id,
            kind: OperationKind::Delete,
            submitted_at: Utc::now(),
        })
    }

    fn list_stacks(&self, tag_key: &str) -> Result<Vec<StackSnapshot>> {
        let url = self.url("/stacks");
        let what = format!("list stacks tagged {}", tag_key);
        let response: StackListResponse = self.send_with_retries(
            &what,
            || self.http.get(&url).query(&[("tag", tag_key)]).send(),
            |r| {
                r.json().map_err(|e| StratusError::Backend {
                    detail: format!("malformed stack list: {}", e),
                })
            },
        )?;
        Ok(response.stacks.into_iter().map(Into::into).collect())
    }

    fn list_instances(&self, stack_name: &str) -> Result<Vec<InstanceSnapshot>> {
        let url = self.url(&format!("/stacks/{}/instances", stack_name));
        let what = format!("list instances of {}", stack_name);
        let response: InstanceListResponse = self.send_with_retries(
            &what,
            || self.http.get(&url).send(),
            |r| {
                r.json().map_err(|e| StratusError::Backend {
                    detail: format!("malformed instance list: {}", e),
                })
            },
        )?;
        Ok(response.instances.into_iter().map(Into::into).collect())
    }

    fn set_fleet_capacity(&self, stack_name: &str, targets: &[PartitionCapacity]) -> Result<()> {
        let url = self.url(&format!("/stacks/{}/capacity", stack_name));
        let what = format!("set capacity of {}", stack_name);
        let request = CapacityRequest { targets };
        self.send_with_retries(
            &what,
            || self.http.patch(&url).json(&request).send(),
            |_| Ok(()),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_operation_status() {
        assert_eq!(
            HttpProvisioningClient::parse_status("PENDING", None),
            OperationStatus::Pending
        );
        assert_eq!(
            HttpProvisioningClient::parse_status("SUCCEEDED", None),
            OperationStatus::Succeeded
        );
        assert_eq!(
            HttpProvisioningClient::parse_status("ROLLED_BACK", Some("boom".into())),
            OperationStatus::RolledBack("boom".into())
        );
        assert_eq!(
            HttpProvisioningClient::parse_status("FAILED", Some("bad".into())),
            OperationStatus::Failed("bad".into())
        );
    }

    #[test]
    fn test_terminal_statuses() {
        assert!(!OperationStatus::Pending.is_terminal());
        assert!(OperationStatus::Succeeded.is_terminal());
        assert!(OperationStatus::Failed(String::new()).is_terminal());
        assert!(OperationStatus::RolledBack(String::new()).is_terminal());
    }
}
