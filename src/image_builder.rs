//! Custom machine image builds.
//!
//! An image build runs on a transient build stack tracked with the same
//! polling mechanism as cluster lifecycle operations. Whatever the build
//! outcome, the build stack is torn down exactly once on the first terminal
//! transition observed; a failed build must not leave a provisioned builder
//! behind.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use log::{error, info, warn};
use serde::Serialize;

use crate::errors::{Result, StratusError};
use crate::infra::{
    InfrastructureClient, OperationKind, OperationStatus, StackParameter, StackTemplate,
};
use crate::tracker::StackOperationTracker;

/// Tag key identifying image build stacks.
pub const IMAGE_BUILD_TAG: &str = "stratus:image-build";

/// Stack output carrying the identifier of the produced image.
pub const IMAGE_ID_OUTPUT: &str = "image-id";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ImageBuildState {
    BuildInProgress,
    BuildComplete,
    BuildFailed,
}

impl std::fmt::Display for ImageBuildState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ImageBuildState::BuildInProgress => f.write_str("BUILD_IN_PROGRESS"),
            ImageBuildState::BuildComplete => f.write_str("BUILD_COMPLETE"),
            ImageBuildState::BuildFailed => f.write_str("BUILD_FAILED"),
        }
    }
}

/// Record of one image build. Retained after completion so the produced
/// image id can be looked up by name later.
#[derive(Debug, Clone, Serialize)]
pub struct ImageBuildJob {
    pub name: String,
    pub source_image: String,
    pub instance_type: String,
    pub build_stack: String,
    pub state: ImageBuildState,
    /// Identifier of the produced image, set on success.
    pub image_id: Option<String>,
    pub submitted_at: DateTime<Utc>,
}

/// Result of driving a build to completion: the final job record plus the
/// cleanup error, if tearing down the build stack failed.
#[derive(Debug)]
pub struct BuildOutcome {
    pub job: ImageBuildJob,
    pub cleanup_error: Option<StratusError>,
}

pub struct ImageBuildOrchestrator {
    client: Arc<dyn InfrastructureClient>,
    tracker: Arc<StackOperationTracker>,
    jobs: Mutex<HashMap<String, ImageBuildJob>>,
}

impl ImageBuildOrchestrator {
    pub fn new(client: Arc<dyn InfrastructureClient>, tracker: Arc<StackOperationTracker>) -> Self {
        Self {
            client,
            tracker,
            jobs: Mutex::new(HashMap::new()),
        }
    }

    /// Submit a build and drive it to a terminal state, then tear down the
    /// transient build stack.
    ///
    /// An inconclusive poll leaves the job BUILD_IN_PROGRESS with the stack
    /// intact; the build may still be running. Teardown happens only on the
    /// first terminal transition observed, and exactly once.
    pub fn build(
        &self,
        name: &str,
        source_image: &str,
        instance_type: &str,
    ) -> Result<BuildOutcome> {
        let build_stack = format!("imagebuild-{}", name);
        let template = StackTemplate {
            stack_name: build_stack.clone(),
            parameters: vec![
                StackParameter::new("image.source", source_image),
                StackParameter::new("image.build_instance_type", instance_type),
            ],
            tags: HashMap::from([(IMAGE_BUILD_TAG.to_string(), name.to_string())]),
            spec_document: String::new(),
        };

        let operation = self.client.submit(OperationKind::Create, &template)?;
        let job = ImageBuildJob {
            name: name.to_string(),
            source_image: source_image.to_string(),
            instance_type: instance_type.to_string(),
            build_stack: build_stack.clone(),
            state: ImageBuildState::BuildInProgress,
            image_id: None,
            submitted_at: Utc::now(),
        };
        self.jobs
            .lock()
            .expect("jobs poisoned")
            .insert(name.to_string(), job.clone());
        info!("Submitted image build '{}' on stack '{}'", name, build_stack);

        let status = self.tracker.wait(&operation)?;
        let mut job = job;
        match &status {
            OperationStatus::Succeeded => {
                job.state = ImageBuildState::BuildComplete;
                // Best effort: failing to read the outputs must not skip the
                // teardown below.
                match self.client.describe(&build_stack) {
                    Ok(snapshot) => {
                        job.image_id =
                            snapshot.and_then(|s| s.outputs.get(IMAGE_ID_OUTPUT).cloned());
                    }
                    Err(e) => {
                        warn!(
                            "Could not read outputs of build stack '{}': {}",
                            build_stack, e
                        );
                    }
                }
                info!(
                    "Image build '{}' complete: {}",
                    name,
                    job.image_id.as_deref().unwrap_or("<no image id reported>")
                );
            }
            OperationStatus::Failed(detail) | OperationStatus::RolledBack(detail) => {
                job.state = ImageBuildState::BuildFailed;
                error!("Image build '{}' failed: {}", name, detail);
            }
            OperationStatus::Pending => unreachable!("tracker returned a non-terminal status"),
        }
        self.jobs
            .lock()
            .expect("jobs poisoned")
            .insert(name.to_string(), job.clone());

        // Unconditional teardown on the first terminal transition. A cleanup
        // failure does not reopen the build state.
        let cleanup_error = self.teardown(&build_stack).err();
        Ok(BuildOutcome { job, cleanup_error })
    }

    fn teardown(&self, build_stack: &str) -> Result<()> {
        info!("Deleting build stack '{}'", build_stack);
        let operation = self
            .client
            .delete(build_stack)
            .map_err(|e| StratusError::Cleanup {
                stack: build_stack.to_string(),
                detail: e.to_string(),
            })?;
        match self.tracker.wait(&operation) {
            Ok(OperationStatus::Succeeded) => Ok(()),
            Ok(status) => Err(StratusError::Cleanup {
                stack: build_stack.to_string(),
                detail: format!("delete finished with {:?}", status),
            }),
            Err(e) => Err(StratusError::Cleanup {
                stack: build_stack.to_string(),
                detail: e.to_string(),
            }),
        }
    }

    /// Look up a retained build record by name.
    pub fn job(&self, name: &str) -> Option<ImageBuildJob> {
        self.jobs.lock().expect("jobs poisoned").get(name).cloned()
    }
}
