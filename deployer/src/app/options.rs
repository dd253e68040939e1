//! Application configuration options

use std::collections::HashMap;
use std::time::Duration;

use secrecy::SecretString;
use url::Url;

use crate::errors::DeployerError;
use crate::http::client::ProviderEndpoint;
use crate::queue::{Backoff, JobOptions, MemoryQueueOptions};
use crate::storage::layout::StorageLayout;
use crate::storage::settings::Settings;
use crate::validate::preflight::PreflightOptions;
use crate::workers::janitor;

/// Main application options
#[derive(Debug, Clone)]
pub struct AppOptions {
    pub lifecycle: LifecycleOptions,

    /// Storage layout paths
    pub layout: StorageLayout,

    /// Hosting provider endpoints by name
    pub providers: HashMap<String, ProviderEndpoint>,

    pub queue: MemoryQueueOptions,

    /// Options for jobs enqueued without their own
    pub job_options: JobOptions,

    pub preflight: PreflightOptions,

    /// Timeout for each post-deploy page fetch
    pub live_check_timeout: Duration,

    pub notifications: NotificationOptions,

    /// Enable local HTTP server
    pub enable_server: bool,

    pub server: ServerOptions,

    /// Retention worker options
    pub janitor: janitor::Options,
}

impl Default for AppOptions {
    fn default() -> Self {
        Self {
            lifecycle: LifecycleOptions::default(),
            layout: StorageLayout::default(),
            providers: HashMap::new(),
            queue: MemoryQueueOptions::default(),
            job_options: JobOptions::default(),
            preflight: PreflightOptions::default(),
            live_check_timeout: Duration::from_secs(15),
            notifications: NotificationOptions::default(),
            enable_server: true,
            server: ServerOptions::default(),
            janitor: janitor::Options::default(),
        }
    }
}

impl AppOptions {
    /// Typed runtime options from the settings file
    pub fn from_settings(settings: &Settings, layout: StorageLayout) -> Result<Self, DeployerError> {
        let mut providers = HashMap::new();
        for (name, provider) in &settings.providers {
            let base_url = Url::parse(&provider.base_url).map_err(|e| {
                DeployerError::ConfigError(format!(
                    "provider `{}` has an invalid base_url `{}`: {}",
                    name, provider.base_url, e
                ))
            })?;
            providers.insert(
                name.clone(),
                ProviderEndpoint {
                    base_url,
                    api_token: provider.api_token.clone().map(SecretString::from),
                    timeout: Duration::from_secs(provider.timeout_secs),
                },
            );
        }

        let webhook_url = match &settings.notifications.webhook_url {
            Some(raw) => Some(Url::parse(raw).map_err(|e| {
                DeployerError::ConfigError(format!("invalid webhook_url `{}`: {}", raw, e))
            })?),
            None => None,
        };

        if settings.queue.concurrency == 0 {
            return Err(DeployerError::ConfigError(
                "queue.concurrency must be at least 1".to_string(),
            ));
        }

        Ok(Self {
            lifecycle: LifecycleOptions::default(),
            layout,
            providers,
            queue: MemoryQueueOptions {
                concurrency: settings.queue.concurrency,
                ..Default::default()
            },
            job_options: JobOptions {
                attempts: settings.queue.attempts,
                backoff: Backoff {
                    kind: settings.queue.backoff_kind,
                    delay_ms: settings.queue.backoff_delay_ms,
                },
                priority: None,
            },
            preflight: PreflightOptions {
                entry_file: settings.validation.entry_file.clone(),
                max_file_size: settings.validation.max_file_size_bytes,
            },
            live_check_timeout: Duration::from_secs(settings.live_check.timeout_secs),
            notifications: NotificationOptions {
                webhook_url,
                buffer: settings.notifications.buffer.max(1),
                timeout: NotificationOptions::default().timeout,
            },
            enable_server: settings.server.enabled,
            server: ServerOptions {
                host: settings.server.host.clone(),
                port: settings.server.port,
            },
            janitor: janitor::Options {
                interval: Duration::from_secs(settings.retention.clean_interval_secs.max(1)),
                completed_retention: Duration::from_secs(settings.retention.completed_secs),
                failed_retention: Duration::from_secs(settings.retention.failed_secs),
            },
        })
    }
}

/// Lifecycle options for the deployer
#[derive(Debug, Clone)]
pub struct LifecycleOptions {
    /// Maximum delay for graceful shutdown
    pub max_shutdown_delay: Duration,
}

impl Default for LifecycleOptions {
    fn default() -> Self {
        Self {
            max_shutdown_delay: Duration::from_secs(30),
        }
    }
}

/// Notification delivery options
#[derive(Debug, Clone)]
pub struct NotificationOptions {
    /// Webhook receiving notifications; logged only when unset
    pub webhook_url: Option<Url>,

    /// Dispatcher channel capacity
    pub buffer: usize,

    /// Webhook request timeout
    pub timeout: Duration,
}

impl Default for NotificationOptions {
    fn default() -> Self {
        Self {
            webhook_url: None,
            buffer: 256,
            timeout: Duration::from_secs(10),
        }
    }
}

/// Local HTTP server options
#[derive(Debug, Clone)]
pub struct ServerOptions {
    /// Host to bind to
    pub host: String,

    /// Port to listen on
    pub port: u16,
}

impl Default for ServerOptions {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 8080,
        }
    }
}
