//! Handlers for the cluster lifecycle and query commands.

use std::path::Path;
use std::process::Command;

use log::{info, warn};
use tabled::{settings::Style, Table, Tabled};

use crate::cluster_spec::ClusterSpec;
use crate::commands::{is_json, print_json};
use crate::errors::{Result, StratusError};
use crate::lifecycle::PendingOperation;
use crate::update_patch::SpecPatch;
use crate::Engine;

#[derive(Tabled)]
struct ClusterTableRow {
    #[tabled(rename = "Name")]
    name: String,
    #[tabled(rename = "State")]
    state: String,
    #[tabled(rename = "Scheduler")]
    scheduler: String,
    #[tabled(rename = "Stack ID")]
    stack_id: String,
}

#[derive(Tabled)]
struct InstanceTableRow {
    #[tabled(rename = "Role")]
    role: String,
    #[tabled(rename = "Instance ID")]
    instance_id: String,
    #[tabled(rename = "Type")]
    instance_type: String,
    #[tabled(rename = "State")]
    state: String,
    #[tabled(rename = "Address")]
    address: String,
}

#[derive(Tabled)]
struct ChangeTableRow {
    #[tabled(rename = "Section")]
    section: String,
    #[tabled(rename = "Field")]
    field: String,
    #[tabled(rename = "Old value")]
    old_value: String,
    #[tabled(rename = "New value")]
    new_value: String,
    #[tabled(rename = "Check")]
    check: String,
    #[tabled(rename = "Reason")]
    reason: String,
}

fn print_table<T: Tabled>(rows: Vec<T>) {
    println!("{}", Table::new(rows).with(Style::sharp()));
}

/// Either wait for the submitted operation or leave it running detached.
fn finish_submission(engine: &Engine, pending: PendingOperation, wait: bool) -> Result<()> {
    let name = pending.cluster.clone();
    if wait {
        let state = engine.orchestrator.wait(pending)?;
        println!("Cluster '{}' is now {}", name, state);
    } else {
        // Fire-and-forget: the backend keeps running the operation; a later
        // `status` call resumes tracking.
        drop(pending);
        println!(
            "Submitted; check progress with 'stratus status {}'",
            name
        );
    }
    Ok(())
}

pub fn handle_create(engine: &Engine, spec_path: &Path, wait: bool) -> Result<()> {
    let spec = ClusterSpec::from_file(spec_path)?;
    info!("Creating cluster '{}'", spec.name);
    let pending = engine.orchestrator.submit_create(spec)?;
    finish_submission(engine, pending, wait)
}

pub fn handle_update(engine: &Engine, spec_path: &Path, wait: bool, format: &str) -> Result<()> {
    let spec = ClusterSpec::from_file(spec_path)?;
    let name = spec.name.clone();

    // Show the operator the per-change report before submitting, the way the
    // update command renders its config patch.
    if let Some(cluster) = engine.orchestrator.discover(&name)? {
        if let Some(base) = &cluster.spec {
            let patch = SpecPatch::diff(base.spec(), &spec);
            if !patch.is_empty() && !is_json(format) {
                let rows: Vec<ChangeTableRow> = patch
                    .report_rows(cluster.fleet_state)
                    .into_iter()
                    .map(|[section, field, old_value, new_value, check, reason]| ChangeTableRow {
                        section,
                        field,
                        old_value,
                        new_value,
                        check,
                        reason,
                    })
                    .collect();
                print_table(rows);
            }
        }
    }

    let pending = engine.orchestrator.submit_update(spec)?;
    finish_submission(engine, pending, wait)
}

pub fn handle_delete(engine: &Engine, name: &str, wait: bool) -> Result<()> {
    let pending = engine.orchestrator.submit_delete(name)?;
    finish_submission(engine, pending, wait)
}

pub fn handle_start(engine: &Engine, name: &str) -> Result<()> {
    let state = engine.fleet.start(name)?;
    println!("Fleet of cluster '{}' is {}", name, state);
    Ok(())
}

pub fn handle_stop(engine: &Engine, name: &str) -> Result<()> {
    let state = engine.fleet.stop(name)?;
    println!("Fleet of cluster '{}' is {}", name, state);
    Ok(())
}

pub fn handle_status(engine: &Engine, name: &str, format: &str) -> Result<()> {
    let status = engine.query.status(name)?;
    if is_json(format) {
        print_json(&status);
    } else {
        println!("Cluster:   {}", status.name);
        println!("Region:    {}", status.region);
        println!("State:     {}", status.state);
        println!("Scheduler: {}", status.scheduler);
        println!("Fleet:     {}", status.fleet_state);
        if let Some(stack_id) = &status.stack_id {
            println!("Stack:     {}", stack_id);
        }
    }
    Ok(())
}

pub fn handle_list(engine: &Engine, format: &str) -> Result<()> {
    let clusters = engine.query.list()?;
    if is_json(format) {
        print_json(&clusters);
        return Ok(());
    }
    if clusters.is_empty() {
        println!("No clusters found");
        return Ok(());
    }
    let rows: Vec<ClusterTableRow> = clusters
        .into_iter()
        .map(|c| ClusterTableRow {
            name: c.name,
            state: c.state.to_string(),
            scheduler: c
                .scheduler
                .map(|s| s.to_string())
                .unwrap_or_else(|| "-".to_string()),
            stack_id: c.stack_id,
        })
        .collect();
    print_table(rows);
    Ok(())
}

pub fn handle_instances(engine: &Engine, name: &str, format: &str) -> Result<()> {
    let report = engine.query.instances(name)?;
    if is_json(format) {
        print_json(&report);
        return Ok(());
    }
    let mut rows = Vec::new();
    for instance in &report.head {
        rows.push(InstanceTableRow {
            role: "head".to_string(),
            instance_id: instance.instance_id.clone(),
            instance_type: instance.instance_type.clone(),
            state: instance.state.clone(),
            address: instance
                .public_address
                .clone()
                .or_else(|| instance.private_address.clone())
                .unwrap_or_else(|| "-".to_string()),
        });
    }
    for (partition, instances) in &report.partitions {
        for instance in instances {
            rows.push(InstanceTableRow {
                role: format!("fleet/{}", partition),
                instance_id: instance.instance_id.clone(),
                instance_type: instance.instance_type.clone(),
                state: instance.state.clone(),
                address: instance
                    .private_address
                    .clone()
                    .unwrap_or_else(|| "-".to_string()),
            });
        }
    }
    if rows.is_empty() {
        println!("No instances found for cluster '{}'", name);
    } else {
        print_table(rows);
    }
    Ok(())
}

/// Resolve the head node address and hand off to the system `ssh`.
pub fn handle_ssh(engine: &Engine, name: &str, user: Option<&str>, ssh_args: &[String]) -> Result<()> {
    let address = engine.query.head_node_address(name)?;
    let destination = match user {
        Some(user) => format!("{}@{}", user, address),
        None => address,
    };
    info!("Connecting to {}", destination);
    let status = Command::new("ssh")
        .arg(&destination)
        .args(ssh_args)
        .status()
        .map_err(|e| StratusError::Internal(format!("failed to run ssh: {}", e)))?;
    if !status.success() {
        warn!("ssh exited with {}", status);
    }
    Ok(())
}
