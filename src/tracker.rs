//! Asynchronous stack operation tracking.
//!
//! The tracker polls the provisioning backend for one operation on a bounded
//! exponential backoff schedule until a terminal status is observed or the
//! cumulative wait cap elapses. Exhausting the cap yields an inconclusive
//! error, never a guessed terminal result, and the tracker never resubmits
//! an operation on its own.

use std::sync::Arc;
use std::thread;
use std::time::Duration;

use log::{debug, info};

use crate::config::TrackerConfig;
use crate::errors::{Result, StratusError};
use crate::infra::{InfrastructureClient, OperationId, OperationStatus};

pub struct StackOperationTracker {
    client: Arc<dyn InfrastructureClient>,
    config: TrackerConfig,
}

impl StackOperationTracker {
    pub fn new(client: Arc<dyn InfrastructureClient>, config: TrackerConfig) -> Self {
        Self { client, config }
    }

    /// Block until the operation reaches a terminal status.
    ///
    /// Returns the terminal status, or [`StratusError::Inconclusive`] once
    /// the cumulative wait cap elapses with the operation still pending.
    pub fn wait(&self, operation: &OperationId) -> Result<OperationStatus> {
        let mut interval = Duration::from_secs(self.config.initial_interval_secs.max(1));
        let max_interval = Duration::from_secs(self.config.max_interval_secs.max(1));
        let max_total = Duration::from_secs(self.config.max_total_wait_secs);
        let mut waited = Duration::ZERO;
        let mut polls: u32 = 0;

        loop {
            polls += 1;
            let status = self.client.poll(operation)?;
            if status.is_terminal() {
                info!(
                    "Operation {} on '{}' finished after {} poll(s): {:?}",
                    operation.kind, operation.stack_name, polls, status
                );
                return Ok(status);
            }

            if waited >= max_total {
                return Err(StratusError::Inconclusive {
                    name: operation.stack_name.clone(),
                    operation: operation.kind.to_string(),
                    waited_secs: waited.as_secs(),
                });
            }

            let sleep = interval.min(max_total - waited);
            debug!(
                "Operation {} on '{}' still pending after {} poll(s); next poll in {}s",
                operation.kind,
                operation.stack_name,
                polls,
                sleep.as_secs()
            );
            thread::sleep(sleep);
            waited += sleep;
            interval = interval
                .mul_f64(self.config.backoff_multiplier.max(1.0))
                .min(max_interval);
        }
    }
}
