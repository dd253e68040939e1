//! Server state

use std::sync::Arc;

use crate::deploy::orchestrator::Orchestrator;
use crate::queue::{JobOptions, JobQueue};
use crate::telemetry::DeployMetrics;

/// Server state shared across handlers
pub struct ServerState {
    pub orchestrator: Arc<Orchestrator>,
    pub queue: Arc<dyn JobQueue>,
    pub metrics: Arc<DeployMetrics>,

    /// Used when a deployment request carries no job options
    pub job_options: JobOptions,
}

impl ServerState {
    pub fn new(orchestrator: Arc<Orchestrator>, job_options: JobOptions) -> Self {
        Self {
            queue: orchestrator.queue().clone(),
            metrics: orchestrator.metrics().clone(),
            orchestrator,
            job_options,
        }
    }
}
