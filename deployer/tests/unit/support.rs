//! Shared fixtures

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tokio::sync::mpsc;

use site_deployer::deploy::orchestrator::{Collaborators, Orchestrator};
use site_deployer::http::client::{ProviderClient, ProviderDeployment};
use site_deployer::http::error::ProviderError;
use site_deployer::http::fetch::{FetchedPage, SiteFetcher};
use site_deployer::models::deployment::{DeploymentFile, NewDeployment};
use site_deployer::notify::{Notification, NotificationDispatcher};
use site_deployer::queue::{Backoff, BackoffKind, JobOptions, JobQueue, MemoryQueue, MemoryQueueOptions, RetryPolicy};
use site_deployer::site::MemorySiteSource;
use site_deployer::models::deployment::Deployment;
use site_deployer::store::{DeploymentStore, MemoryDeploymentStore, StoreError};
use site_deployer::telemetry::DeployMetrics;
use site_deployer::validate::live::LiveValidator;
use site_deployer::validate::preflight::PreflightValidator;

pub const WEBSITE_ID: &str = "site-1";
pub const HTML: &str = "<html><body>Hello</body></html>";

pub fn valid_files() -> Vec<DeploymentFile> {
    vec![
        DeploymentFile::new("index.html", HTML),
        DeploymentFile::new("css/site.css", "body { color: red; }"),
    ]
}

pub fn new_deployment() -> NewDeployment {
    NewDeployment {
        website_id: WEBSITE_ID.to_string(),
        user_id: "user-1".to_string(),
        version: "v1".to_string(),
        commit_message: Some("first".to_string()),
    }
}

/// Small fixed backoff so retries stay fast
pub fn fast_options(attempts: u32) -> JobOptions {
    JobOptions {
        attempts,
        backoff: Backoff {
            kind: BackoffKind::Fixed,
            delay_ms: 10,
        },
        priority: None,
    }
}

pub fn fast_policy(attempts: u32) -> RetryPolicy {
    RetryPolicy::from(&fast_options(attempts))
}

pub fn acknowledged(id: &str, url: &str) -> Result<ProviderDeployment, ProviderError> {
    Ok(ProviderDeployment {
        provider_deployment_id: id.to_string(),
        url: url.to_string(),
    })
}

/// Replays scripted outcomes in order; the last one repeats
pub struct ScriptedProvider {
    outcomes: Mutex<VecDeque<Result<ProviderDeployment, ProviderError>>>,
    calls: AtomicU32,
}

impl ScriptedProvider {
    pub fn new(outcomes: Vec<Result<ProviderDeployment, ProviderError>>) -> Self {
        Self {
            outcomes: Mutex::new(outcomes.into()),
            calls: AtomicU32::new(0),
        }
    }

    pub fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ProviderClient for ScriptedProvider {
    async fn deploy(
        &self,
        _provider: &str,
        _website_id: &str,
        _files: &[DeploymentFile],
    ) -> Result<ProviderDeployment, ProviderError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let mut outcomes = self.outcomes.lock().unwrap();
        if outcomes.len() > 1 {
            outcomes.pop_front().unwrap()
        } else {
            outcomes.front().cloned().unwrap()
        }
    }
}

/// Serves the same page for every URL
pub struct StaticFetcher {
    pub status: u16,
    pub body: String,
}

impl StaticFetcher {
    pub fn healthy() -> Self {
        Self {
            status: 200,
            body: HTML.to_string(),
        }
    }
}

#[async_trait]
impl SiteFetcher for StaticFetcher {
    async fn fetch(&self, _url: &str) -> Result<FetchedPage, ProviderError> {
        Ok(FetchedPage {
            status: self.status,
            body: Ok(self.body.clone()),
        })
    }
}

/// Memory store whose `save` calls fail when `fails(n)` holds for the n-th (1-based) call
pub struct FlakyStore {
    inner: Arc<MemoryDeploymentStore>,
    saves: AtomicU32,
    fails: Box<dyn Fn(u32) -> bool + Send + Sync>,
}

impl FlakyStore {
    pub fn new(
        inner: Arc<MemoryDeploymentStore>,
        fails: impl Fn(u32) -> bool + Send + Sync + 'static,
    ) -> Self {
        Self {
            inner,
            saves: AtomicU32::new(0),
            fails: Box::new(fails),
        }
    }

    pub fn saves(&self) -> u32 {
        self.saves.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl DeploymentStore for FlakyStore {
    async fn find(&self, id: &str) -> Result<Option<Deployment>, StoreError> {
        self.inner.find(id).await
    }

    async fn save(&self, deployment: &Deployment) -> Result<(), StoreError> {
        let n = self.saves.fetch_add(1, Ordering::SeqCst) + 1;
        if (self.fails)(n) {
            return Err(StoreError::Unavailable(format!("save #{} blipped", n)));
        }
        self.inner.save(deployment).await
    }

    async fn create(&self, fields: NewDeployment) -> Result<Deployment, StoreError> {
        self.inner.create(fields).await
    }
}

pub struct Harness {
    pub orchestrator: Arc<Orchestrator>,
    pub store: Arc<MemoryDeploymentStore>,
    pub sites: Arc<MemorySiteSource>,
    pub queue: Arc<MemoryQueue>,
    pub metrics: Arc<DeployMetrics>,
    pub notifications: mpsc::Receiver<Notification>,
}

impl Harness {
    pub fn new(provider: Arc<dyn ProviderClient>, fetcher: Arc<dyn SiteFetcher>) -> Self {
        Self::with_store(provider, fetcher, |store| store as Arc<dyn DeploymentStore>)
    }

    /// The orchestrator sees `wrap(store)`; `Harness::store` stays the bare memory store
    pub fn with_store<F>(
        provider: Arc<dyn ProviderClient>,
        fetcher: Arc<dyn SiteFetcher>,
        wrap: F,
    ) -> Self
    where
        F: FnOnce(Arc<MemoryDeploymentStore>) -> Arc<dyn DeploymentStore>,
    {
        let store = Arc::new(MemoryDeploymentStore::new());
        let sites = Arc::new(MemorySiteSource::new());
        sites.put(WEBSITE_ID, valid_files());

        let metrics = Arc::new(DeployMetrics::new());
        let (notifier, notifications) = NotificationDispatcher::new(16, metrics.clone());
        let queue = Arc::new(MemoryQueue::new(MemoryQueueOptions {
            concurrency: 1,
            ..Default::default()
        }));

        let store_dyn = wrap(store.clone());
        let queue_dyn: Arc<dyn JobQueue> = queue.clone();
        let orchestrator = Arc::new(Orchestrator::new(
            Collaborators {
                store: store_dyn.clone(),
                sites: sites.clone(),
                provider,
                live: Arc::new(LiveValidator::new(store_dyn, fetcher)),
                queue: queue_dyn,
                notifier,
                metrics: metrics.clone(),
            },
            PreflightValidator::default(),
        ));

        Self {
            orchestrator,
            store,
            sites,
            queue,
            metrics,
            notifications,
        }
    }

    /// A fresh `queued` record
    pub async fn queued(&self) -> Deployment {
        self.store.create(new_deployment()).await.unwrap()
    }
}
