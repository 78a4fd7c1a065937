//! Diff between the last applied spec and an update target.
//!
//! Every changed field carries an update policy deciding whether the change
//! can be applied in place, needs the compute fleet stopped first, or is
//! forbidden after creation. The full change report is rendered to the
//! operator before an update is refused.

use std::fmt;

use crate::cluster_spec::ClusterSpec;
use crate::errors::{DeniedChange, Result, StratusError};
use crate::fleet::FleetState;

/// Policy ruling the update of one configuration field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum UpdatePolicy {
    /// Can be applied in place.
    Allowed,
    /// Can be applied only while the compute fleet is stopped.
    FleetStop,
    /// Cannot be changed after creation.
    Denied,
}

impl UpdatePolicy {
    fn reason(&self) -> &'static str {
        match self {
            UpdatePolicy::Allowed => "-",
            UpdatePolicy::FleetStop => "compute fleet must be stopped first",
            UpdatePolicy::Denied => "cannot be changed after cluster creation",
        }
    }

    fn action_needed(&self, cluster: &str) -> Option<String> {
        match self {
            UpdatePolicy::FleetStop => Some(format!(
                "stop the fleet first: stratus stop {}",
                cluster
            )),
            UpdatePolicy::Denied => {
                Some("restore the previous value for the unsupported changes".to_string())
            }
            UpdatePolicy::Allowed => None,
        }
    }
}

impl fmt::Display for UpdatePolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            UpdatePolicy::Allowed => f.write_str("SUCCEEDED"),
            UpdatePolicy::FleetStop => f.write_str("ACTION NEEDED"),
            UpdatePolicy::Denied => f.write_str("FAILED"),
        }
    }
}

/// One changed parameter.
#[derive(Debug, Clone)]
pub struct Change {
    pub section: String,
    pub field: String,
    pub old_value: String,
    pub new_value: String,
    pub policy: UpdatePolicy,
}

impl Change {
    fn new(
        section: impl Into<String>,
        field: impl Into<String>,
        old_value: impl fmt::Display,
        new_value: impl fmt::Display,
        policy: UpdatePolicy,
    ) -> Self {
        Self {
            section: section.into(),
            field: field.into(),
            old_value: old_value.to_string(),
            new_value: new_value.to_string(),
            policy,
        }
    }
}

/// Diff patch between two cluster specs.
#[derive(Debug, Default)]
pub struct SpecPatch {
    pub changes: Vec<Change>,
}

impl SpecPatch {
    /// Compute the change set needed to move `base` (the configuration the
    /// cluster is running) to `target`.
    pub fn diff(base: &ClusterSpec, target: &ClusterSpec) -> SpecPatch {
        let mut changes = Vec::new();

        let mut scalar = |section: &str, field: &str, old: &str, new: &str, policy| {
            if old != new {
                changes.push(Change::new(section, field, old, new, policy));
            }
        };

        scalar("cluster", "region", &base.region, &target.region, UpdatePolicy::Denied);
        scalar(
            "cluster",
            "scheduler",
            base.scheduler.as_str(),
            target.scheduler.as_str(),
            UpdatePolicy::Denied,
        );
        scalar(
            "head_node",
            "instance_type",
            &base.head_node.instance_type,
            &target.head_node.instance_type,
            UpdatePolicy::Denied,
        );
        scalar(
            "head_node",
            "key_pair",
            base.head_node.key_pair.as_deref().unwrap_or("-"),
            target.head_node.key_pair.as_deref().unwrap_or("-"),
            UpdatePolicy::Denied,
        );
        scalar(
            "network",
            "subnet_ids",
            &base.network.subnet_ids.join(","),
            &target.network.subnet_ids.join(","),
            UpdatePolicy::Denied,
        );
        scalar(
            "network",
            "security_group_ids",
            &base.network.security_group_ids.join(","),
            &target.network.security_group_ids.join(","),
            UpdatePolicy::Denied,
        );

        // Fleets are matched by partition name.
        for target_fleet in &target.fleets {
            let section = format!("fleets[{}]", target_fleet.partition);
            match base
                .fleets
                .iter()
                .find(|f| f.partition == target_fleet.partition)
            {
                Some(base_fleet) => {
                    if base_fleet.instance_type != target_fleet.instance_type {
                        changes.push(Change::new(
                            &section,
                            "instance_type",
                            &base_fleet.instance_type,
                            &target_fleet.instance_type,
                            UpdatePolicy::FleetStop,
                        ));
                    }
                    if base_fleet.min_count != target_fleet.min_count {
                        changes.push(Change::new(
                            &section,
                            "min_count",
                            base_fleet.min_count,
                            target_fleet.min_count,
                            UpdatePolicy::Allowed,
                        ));
                    }
                    if base_fleet.max_count != target_fleet.max_count {
                        changes.push(Change::new(
                            &section,
                            "max_count",
                            base_fleet.max_count,
                            target_fleet.max_count,
                            UpdatePolicy::Allowed,
                        ));
                    }
                    if base_fleet.target() != target_fleet.target() {
                        changes.push(Change::new(
                            &section,
                            "target_count",
                            base_fleet.target(),
                            target_fleet.target(),
                            UpdatePolicy::Allowed,
                        ));
                    }
                }
                None => {
                    changes.push(Change::new(
                        &section,
                        "partition",
                        "-",
                        &target_fleet.partition,
                        UpdatePolicy::FleetStop,
                    ));
                }
            }
        }
        for base_fleet in &base.fleets {
            if !target
                .fleets
                .iter()
                .any(|f| f.partition == base_fleet.partition)
            {
                changes.push(Change::new(
                    format!("fleets[{}]", base_fleet.partition),
                    "partition",
                    &base_fleet.partition,
                    "-",
                    UpdatePolicy::FleetStop,
                ));
            }
        }

        // Storage is matched by mount point; any shape change needs the
        // fleet stopped, resizing is applied in place.
        for target_storage in &target.storage {
            let section = format!("storage[{}]", target_storage.mount_dir);
            match base
                .storage
                .iter()
                .find(|s| s.mount_dir == target_storage.mount_dir)
            {
                Some(base_storage) => {
                    if base_storage.storage_type != target_storage.storage_type {
                        changes.push(Change::new(
                            &section,
                            "storage_type",
                            &base_storage.storage_type,
                            &target_storage.storage_type,
                            UpdatePolicy::Denied,
                        ));
                    }
                    if base_storage.size_gb != target_storage.size_gb {
                        changes.push(Change::new(
                            &section,
                            "size_gb",
                            base_storage.size_gb.map_or("-".to_string(), |s| s.to_string()),
                            target_storage
                                .size_gb
                                .map_or("-".to_string(), |s| s.to_string()),
                            UpdatePolicy::Allowed,
                        ));
                    }
                }
                None => {
                    changes.push(Change::new(
                        &section,
                        "mount_dir",
                        "-",
                        &target_storage.mount_dir,
                        UpdatePolicy::FleetStop,
                    ));
                }
            }
        }
        for base_storage in &base.storage {
            if !target
                .storage
                .iter()
                .any(|s| s.mount_dir == base_storage.mount_dir)
            {
                changes.push(Change::new(
                    format!("storage[{}]", base_storage.mount_dir),
                    "mount_dir",
                    &base_storage.mount_dir,
                    "-",
                    UpdatePolicy::FleetStop,
                ));
            }
        }

        SpecPatch { changes }
    }

    pub fn is_empty(&self) -> bool {
        self.changes.is_empty()
    }

    /// Check whether the patch can be applied given the current fleet state.
    /// Denied changes, and fleet-stop changes while the fleet is running, are
    /// collected into a single `ImmutableField` error.
    pub fn check(&self, cluster: &str, fleet_state: FleetState) -> Result<()> {
        let mut denied = Vec::new();
        for change in &self.changes {
            let refused = match change.policy {
                UpdatePolicy::Allowed => false,
                UpdatePolicy::Denied => true,
                UpdatePolicy::FleetStop => fleet_state == FleetState::Running,
            };
            if refused {
                let mut reason = change.policy.reason().to_string();
                if let Some(action) = change.policy.action_needed(cluster) {
                    reason = format!("{}; {}", reason, action);
                }
                denied.push(DeniedChange {
                    section: change.section.clone(),
                    field: change.field.clone(),
                    old_value: change.old_value.clone(),
                    new_value: change.new_value.clone(),
                    reason,
                });
            }
        }
        if denied.is_empty() {
            Ok(())
        } else {
            Err(StratusError::ImmutableField { changes: denied })
        }
    }

    /// Rows for the operator-facing change report: section, field, old, new,
    /// verdict, reason.
    pub fn report_rows(&self, fleet_state: FleetState) -> Vec<[String; 6]> {
        self.changes
            .iter()
            .map(|change| {
                let verdict = match change.policy {
                    UpdatePolicy::FleetStop if fleet_state == FleetState::Stopped => {
                        UpdatePolicy::Allowed
                    }
                    policy => policy,
                };
                [
                    change.section.clone(),
                    change.field.clone(),
                    change.old_value.clone(),
                    change.new_value.clone(),
                    verdict.to_string(),
                    verdict.reason().to_string(),
                ]
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cluster_spec::{FleetSpec, HeadNodeSpec, NetworkSpec};
    use crate::scheduler::SchedulerType;

    fn spec() -> ClusterSpec {
        ClusterSpec {
            name: "hpc1".to_string(),
            region: "us-east-1".to_string(),
            scheduler: SchedulerType::Slurm,
            head_node: HeadNodeSpec {
                instance_type: "c5.xlarge".to_string(),
                key_pair: None,
            },
            fleets: vec![FleetSpec {
                partition: "compute".to_string(),
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

    #[test]
    fn test_identical_specs_produce_empty_patch() {
        let patch = SpecPatch::diff(&spec(), &spec());
        assert!(patch.is_empty());
        assert!(patch.check("hpc1", FleetState::Running).is_ok());
    }

    #[test]
    fn test_network_relocation_is_denied() {
        let mut target = spec();
        target.network.subnet_ids = vec!["subnet-9zzz".to_string()];
        let patch = SpecPatch::diff(&spec(), &target);
        let err = patch.check("hpc1", FleetState::Stopped).unwrap_err();
        match err {
            StratusError::ImmutableField { changes } => {
                assert_eq!(changes.len(), 1);
                assert_eq!(changes[0].field, "subnet_ids");
            }
            other => panic!("expected ImmutableField, got {:?}", other),
        }
    }

    #[test]
    fn test_capacity_changes_are_allowed_in_place() {
        let mut target = spec();
        target.fleets[0].max_count = 20;
        target.fleets[0].min_count = 2;
        let patch = SpecPatch::diff(&spec(), &target);
        assert_eq!(patch.changes.len(), 3); // min, max, derived target
        assert!(patch.check("hpc1", FleetState::Running).is_ok());
    }

    #[test]
    fn test_fleet_instance_type_needs_stopped_fleet() {
        let mut target = spec();
        target.fleets[0].instance_type = "c6i.4xlarge".to_string();
        let patch = SpecPatch::diff(&spec(), &target);
        assert!(patch.check("hpc1", FleetState::Running).is_err());
        assert!(patch.check("hpc1", FleetState::Stopped).is_ok());
    }

    #[test]
    fn test_report_rows_cover_all_changes() {
        let mut target = spec();
        target.fleets[0].max_count = 20;
        target.network.subnet_ids = vec!["subnet-9zzz".to_string()];
        let patch = SpecPatch::diff(&spec(), &target);
        let rows = patch.report_rows(FleetState::Running);
        assert_eq!(rows.len(), patch.changes.len());
        assert!(rows.iter().any(|r| r[4] == "FAILED"));
        assert!(rows.iter().any(|r| r[4] == "SUCCEEDED"));
    }
}
