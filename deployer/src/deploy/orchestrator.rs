//! Drives a deployment from `queued` to a terminal state.
//!
//! One attempt runs pre-flight validation, the provider call under the job's
//! retry policy, and the post-deploy checks, strictly in that order. The
//! record is written back on every exit path, including infrastructure
//! failures, so callers never observe a deployment stuck in `in_progress`
//! after `deploy_to_provider` returns.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use tracing::{debug, error, info, warn};

use crate::classify::classify;
use crate::deploy::fsm::{DeploymentEvent, DeploymentStatus};
use crate::errors::DeployerError;
use crate::http::client::ProviderClient;
use crate::http::error::ProviderError;
use crate::models::deployment::{Deployment, NewDeployment};
use crate::notify::{Notification, NotificationDispatcher};
use crate::queue::retry::{retry_with, RetryError, RetryPolicy};
use crate::queue::{DeployJob, JobContext, JobFailure, JobHandle, JobHandler, JobOptions, JobQueue};
use crate::site::SiteSource;
use crate::store::DeploymentStore;
use crate::telemetry::DeployMetrics;
use crate::validate::live::{LiveCheckError, LiveCheckReport, LiveValidator};
use crate::validate::preflight::PreflightValidator;

/// Everything the orchestrator talks to
pub struct Collaborators {
    pub store: Arc<dyn DeploymentStore>,
    pub sites: Arc<dyn SiteSource>,
    pub provider: Arc<dyn ProviderClient>,
    pub live: Arc<LiveValidator>,
    pub queue: Arc<dyn JobQueue>,
    pub notifier: NotificationDispatcher,
    pub metrics: Arc<DeployMetrics>,
}

pub struct Orchestrator {
    store: Arc<dyn DeploymentStore>,
    sites: Arc<dyn SiteSource>,
    provider: Arc<dyn ProviderClient>,
    preflight: PreflightValidator,
    live: Arc<LiveValidator>,
    queue: Arc<dyn JobQueue>,
    notifier: NotificationDispatcher,
    metrics: Arc<DeployMetrics>,
}

impl Orchestrator {
    pub fn new(collaborators: Collaborators, preflight: PreflightValidator) -> Self {
        Self {
            store: collaborators.store,
            sites: collaborators.sites,
            provider: collaborators.provider,
            preflight,
            live: collaborators.live,
            queue: collaborators.queue,
            notifier: collaborators.notifier,
            metrics: collaborators.metrics,
        }
    }

    pub fn queue(&self) -> &Arc<dyn JobQueue> {
        &self.queue
    }

    pub fn metrics(&self) -> &Arc<DeployMetrics> {
        &self.metrics
    }

    pub async fn find(&self, deployment_id: &str) -> Result<Option<Deployment>, DeployerError> {
        Ok(self.store.find(deployment_id).await?)
    }

    /// Create a `queued` deployment and enqueue its job
    pub async fn request_deployment(
        &self,
        fields: NewDeployment,
        provider: &str,
        options: JobOptions,
    ) -> Result<(Deployment, JobHandle), DeployerError> {
        let website_id = fields.website_id.clone();
        let deployment = self.store.create(fields).await.map_err(|e| {
            error!(operation = "create", website_id = %website_id, "Failed to create deployment: {}", e);
            e
        })?;

        let job = DeployJob {
            deployment_id: deployment.id.clone(),
            provider: provider.to_string(),
        };
        let handle = self.queue.enqueue(job, options).await.map_err(|e| {
            error!(
                operation = "enqueue",
                deployment_id = %deployment.id,
                "Failed to enqueue deployment: {}",
                e
            );
            e
        })?;

        self.metrics.record_requested();
        info!(
            deployment_id = %deployment.id,
            job_id = %handle.id,
            "Deployment {} of website {} queued for {}",
            deployment.version,
            deployment.website_id,
            provider
        );
        Ok((deployment, handle))
    }

    /// Post-deploy checks for a recorded deployment
    pub async fn validate_deployed_website(
        &self,
        deployment_id: &str,
    ) -> Result<LiveCheckReport, LiveCheckError> {
        self.live.validate_deployed_website(deployment_id).await
    }

    /// Run one deployment attempt to a terminal state and persist it.
    ///
    /// Validation and provider failures end in `failed` and return `Ok`.
    /// Infrastructure failures also end in `failed` ("Deployment aborted")
    /// but the error is returned as well. Terminal input is returned as is.
    pub async fn deploy_to_provider(
        &self,
        mut deployment: Deployment,
        provider: &str,
        policy: &RetryPolicy,
    ) -> Result<Deployment, DeployerError> {
        if deployment.is_terminal() {
            debug!(deployment_id = %deployment.id, "Deployment already {}", deployment.status);
            return Ok(deployment);
        }

        let outcome = self.drive(&mut deployment, provider, policy).await;

        if let Err(e) = &outcome {
            error!(deployment_id = %deployment.id, "Deployment aborted: {}", e);
            if deployment.status == DeploymentStatus::InProgress {
                let reason = format!("Deployment aborted: {}", e);
                if let Err(te) = deployment.apply(DeploymentEvent::Fail(reason), Utc::now()) {
                    error!(deployment_id = %deployment.id, "{}", te);
                }
            }
        }

        let saved = self.store.save(&deployment).await;
        match &saved {
            Ok(()) => self.finished(&deployment),
            Err(e) => error!(
                operation = "save",
                deployment_id = %deployment.id,
                "Failed to persist deployment: {}",
                e
            ),
        }

        outcome?;
        saved?;
        Ok(deployment)
    }

    async fn drive(
        &self,
        deployment: &mut Deployment,
        provider: &str,
        policy: &RetryPolicy,
    ) -> Result<(), DeployerError> {
        if deployment.status == DeploymentStatus::Queued {
            deployment
                .apply(DeploymentEvent::Start, Utc::now())
                .map_err(|e| DeployerError::DeployError(e.to_string()))?;
            self.metrics.record_started();
            self.store.save(deployment).await?;
        }
        info!(deployment_id = %deployment.id, "Deploying website {} to {}", deployment.website_id, provider);

        let files = self.sites.load_files(&deployment.website_id).await?;

        let validation = self.preflight.validate_deployment(&files);
        if !validation.valid {
            self.metrics.record_preflight_rejection();
            let reason = format!("Validation failed: {}", validation.summary());
            return self.fail(deployment, reason);
        }

        let client = &self.provider;
        let website_id = deployment.website_id.clone();
        let website_id = website_id.as_str();
        let files = &files;
        let result = retry_with(
            policy,
            |e: &ProviderError| classify(e).is_retryable,
            move |attempt| {
                debug!("Provider {} deploy attempt {}", provider, attempt);
                client.deploy(provider, website_id, files)
            },
        )
        .await;

        let ack = match result {
            Ok((ack, attempts)) => {
                self.metrics.record_provider_attempts(attempts);
                ack
            }
            Err(RetryError { error, attempts }) => {
                self.metrics.record_provider_attempts(attempts);
                let classified = classify(&error);
                warn!(
                    deployment_id = %deployment.id,
                    category = %classified.category,
                    "Provider deploy failed after {} attempt(s)",
                    attempts
                );
                let reason = format!(
                    "API Error [{}]: {} (after {} attempt(s))",
                    classified.category, classified.message, attempts
                );
                return self.fail(deployment, reason);
            }
        };

        // Kept even if the live checks fail
        deployment.provider_deployment_id = Some(ack.provider_deployment_id);
        deployment.url = Some(ack.url.clone());
        self.store.save(deployment).await?;

        let report = self.live.check_url(&ack.url).await;
        if !report.valid {
            self.metrics.record_live_check_failure();
            let reason = format!(
                "Deployed website validation failed: {}",
                report.failure_summary()
            );
            return self.fail(deployment, reason);
        }

        deployment
            .apply(DeploymentEvent::Succeed, Utc::now())
            .map_err(|e| DeployerError::DeployError(e.to_string()))
    }

    fn fail(&self, deployment: &mut Deployment, reason: String) -> Result<(), DeployerError> {
        warn!(deployment_id = %deployment.id, "{}", reason);
        deployment
            .apply(DeploymentEvent::Fail(reason), Utc::now())
            .map_err(|e| DeployerError::DeployError(e.to_string()))
    }

    fn finished(&self, deployment: &Deployment) {
        match deployment.status {
            DeploymentStatus::Success => {
                self.metrics.record_succeeded();
                info!(
                    deployment_id = %deployment.id,
                    build_time_ms = deployment.build_time_ms.unwrap_or(0),
                    "Deployment live at {}",
                    deployment.url.as_deref().unwrap_or("-")
                );
            }
            DeploymentStatus::Failed => self.metrics.record_failed(),
            DeploymentStatus::Queued | DeploymentStatus::InProgress => return,
        }

        if let Some(notification) = Notification::deployment_outcome(deployment) {
            self.notifier.dispatch(notification);
        }
    }
}

#[async_trait]
impl JobHandler for Orchestrator {
    async fn handle(&self, job: &DeployJob, ctx: &JobContext) -> Result<(), JobFailure> {
        let deployment = match self.store.find(&job.deployment_id).await {
            Ok(Some(deployment)) => deployment,
            Ok(None) => {
                return Err(JobFailure::permanent(format!(
                    "Deployment {} not found",
                    job.deployment_id
                )))
            }
            Err(e) => {
                error!(operation = "find", deployment_id = %job.deployment_id, "{}", e);
                return Err(JobFailure::retryable(e.to_string()));
            }
        };

        if deployment.is_terminal() {
            debug!(
                deployment_id = %deployment.id,
                job_id = %ctx.job_id,
                "Skipping redelivered job for {} deployment",
                deployment.status
            );
            return Ok(());
        }

        let policy = RetryPolicy::from(&ctx.options);
        match self.deploy_to_provider(deployment, &job.provider, &policy).await {
            Ok(_) => Ok(()),
            Err(e) => {
                // Only worth another attempt when the record could not be finalized
                let finalized = matches!(
                    self.store.find(&job.deployment_id).await,
                    Ok(Some(d)) if d.is_terminal()
                );
                if finalized {
                    Err(JobFailure::permanent(e.to_string()))
                } else {
                    Err(JobFailure::retryable(e.to_string()))
                }
            }
        }
    }
}
