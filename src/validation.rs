//! Cluster spec validation.
//!
//! The validator collects every violated constraint before failing, so the
//! operator fixes the spec in one pass. Structural checks live here;
//! backend-specific fleet checks are delegated to the selected scheduler
//! variant.

use regex::Regex;

use crate::cluster_spec::{ClusterSpec, ValidatedSpec};
use crate::errors::{Result, StratusError, Violation};
use crate::scheduler::create_backend;

/// Cluster names double as stack names in the provisioning backend.
const NAME_PATTERN: &str = r"^[a-z][a-z0-9-]{0,59}$";

pub struct SpecValidator;

impl SpecValidator {
    /// Validate and normalize a spec. Returns the immutable [`ValidatedSpec`]
    /// or a [`StratusError::Validation`] listing every violation.
    pub fn validate(spec: ClusterSpec) -> Result<ValidatedSpec> {
        let mut violations = Vec::new();

        let name_re = Regex::new(NAME_PATTERN).expect("static regex");
        if !name_re.is_match(&spec.name) {
            violations.push(Violation::new(
                "name",
                format!("cluster names must match {}", NAME_PATTERN),
            ));
        }

        if spec.region.trim().is_empty() {
            violations.push(Violation::new("region", "region must not be empty"));
        }

        if spec.head_node.instance_type.trim().is_empty() {
            violations.push(Violation::new(
                "head_node.instance_type",
                "instance type must not be empty",
            ));
        }

        if spec.fleets.is_empty() {
            violations.push(Violation::new(
                "fleets",
                "at least one compute fleet is required",
            ));
        }

        if spec.network.subnet_ids.is_empty() {
            violations.push(Violation::new(
                "network.subnet_ids",
                "at least one subnet is required",
            ));
        }

        let mut seen = std::collections::HashSet::new();
        for (i, fleet) in spec.fleets.iter().enumerate() {
            if !seen.insert(fleet.partition.clone()) {
                violations.push(Violation::new(
                    format!("fleets[{}].partition", i),
                    format!("duplicate partition name '{}'", fleet.partition),
                ));
            }
            if fleet.max_count == 0 {
                violations.push(Violation::new(
                    format!("fleets[{}].max_count", i),
                    "max_count must be at least 1",
                ));
            }
            if fleet.min_count > fleet.max_count {
                violations.push(Violation::new(
                    format!("fleets[{}].min_count", i),
                    format!(
                        "min_count {} exceeds max_count {}",
                        fleet.min_count, fleet.max_count
                    ),
                ));
            }
            if let Some(target) = fleet.target_count {
                if target < fleet.min_count || target > fleet.max_count {
                    violations.push(Violation::new(
                        format!("fleets[{}].target_count", i),
                        format!(
                            "target_count {} is outside [{}, {}]",
                            target, fleet.min_count, fleet.max_count
                        ),
                    ));
                }
            }
            if fleet.instance_type.trim().is_empty() {
                violations.push(Violation::new(
                    format!("fleets[{}].instance_type", i),
                    "instance type must not be empty",
                ));
            }
        }

        for (i, storage) in spec.storage.iter().enumerate() {
            if !storage.mount_dir.starts_with('/') {
                violations.push(Violation::new(
                    format!("storage[{}].mount_dir", i),
                    "mount_dir must be an absolute path",
                ));
            }
        }

        // Backend-specific constraints. The validation extension point: new
        // backends add rules here without touching the state machine.
        let backend = create_backend(spec.scheduler);
        if !backend.supports_partitioned_fleets() && spec.fleets.len() > 1 {
            violations.push(Violation::new(
                "fleets",
                format!(
                    "scheduler '{}' does not support partitioned fleets ({} defined)",
                    spec.scheduler,
                    spec.fleets.len()
                ),
            ));
        }
        for fleet in &spec.fleets {
            violations.extend(backend.validate_fleet(fleet));
        }

        if violations.is_empty() {
            Ok(ValidatedSpec::new(spec))
        } else {
            Err(StratusError::validation(violations))
        }
    }
}
