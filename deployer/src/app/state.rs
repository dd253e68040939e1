//! Application state management

use std::sync::Arc;

use tokio::sync::mpsc;
use tracing::info;

use crate::app::options::AppOptions;
use crate::deploy::orchestrator::{Collaborators, Orchestrator};
use crate::errors::DeployerError;
use crate::http::client::HttpProviderClient;
use crate::http::fetch::HttpSiteFetcher;
use crate::notify::channel::{LogChannel, NotificationChannel, WebhookChannel};
use crate::notify::{Notification, NotificationDispatcher};
use crate::queue::{JobQueue, MemoryQueue};
use crate::site::DirectorySiteSource;
use crate::store::{DeploymentStore, FileDeploymentStore};
use crate::telemetry::DeployMetrics;
use crate::validate::live::LiveValidator;
use crate::validate::preflight::PreflightValidator;

/// Main application state
pub struct AppState {
    pub orchestrator: Arc<Orchestrator>,

    /// Concrete queue, kept for shutdown
    pub queue: Arc<MemoryQueue>,

    pub metrics: Arc<DeployMetrics>,

    /// Where the notifier worker delivers
    pub notification_channel: Arc<dyn NotificationChannel>,
}

impl AppState {
    /// Wire every collaborator. Also returns the receiving end of the
    /// notification channel, which the notifier worker owns.
    pub fn init(
        options: &AppOptions,
    ) -> Result<(Self, mpsc::Receiver<Notification>), DeployerError> {
        info!("Initializing application state...");

        let metrics = Arc::new(DeployMetrics::new());

        let store: Arc<dyn DeploymentStore> = Arc::new(FileDeploymentStore::new(
            options.layout.deployments_dir().path(),
        ));
        let sites = Arc::new(DirectorySiteSource::new(options.layout.sites_dir().path()));

        let provider = Arc::new(HttpProviderClient::new(options.providers.clone())?);
        info!("Configured providers: {:?}", provider.provider_names());

        let fetcher = Arc::new(HttpSiteFetcher::new(options.live_check_timeout)?);
        let live = Arc::new(LiveValidator::new(store.clone(), fetcher));

        let (notifier, notification_rx) =
            NotificationDispatcher::new(options.notifications.buffer, metrics.clone());
        let notification_channel: Arc<dyn NotificationChannel> =
            match &options.notifications.webhook_url {
                Some(url) => Arc::new(WebhookChannel::new(
                    url.clone(),
                    options.notifications.timeout,
                )?),
                None => Arc::new(LogChannel),
            };

        let queue = Arc::new(MemoryQueue::new(options.queue.clone()));
        let job_queue: Arc<dyn JobQueue> = queue.clone();

        let orchestrator = Arc::new(Orchestrator::new(
            Collaborators {
                store,
                sites,
                provider,
                live,
                queue: job_queue,
                notifier,
                metrics: metrics.clone(),
            },
            PreflightValidator::new(options.preflight.clone()),
        ));

        let state = Self {
            orchestrator,
            queue,
            metrics,
            notification_channel,
        };
        Ok((state, notification_rx))
    }
}
