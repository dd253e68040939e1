//! Settings file management

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::logs::LogLevel;
use crate::queue::BackoffKind;
use crate::validate::preflight::DEFAULT_MAX_FILE_SIZE;

/// Deployer settings, read from `settings.json`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    #[serde(default)]
    pub log_level: LogLevel,

    /// Emit JSON log lines
    #[serde(default)]
    pub log_json: bool,

    /// Also write logs to the layout's log directory
    #[serde(default)]
    pub log_to_file: bool,

    /// Hosting providers by name
    #[serde(default)]
    pub providers: HashMap<String, ProviderSettings>,

    #[serde(default)]
    pub queue: QueueSettings,

    #[serde(default)]
    pub validation: ValidationSettings,

    #[serde(default)]
    pub live_check: LiveCheckSettings,

    #[serde(default)]
    pub notifications: NotificationSettings,

    #[serde(default)]
    pub server: ServerSettings,

    #[serde(default)]
    pub retention: RetentionSettings,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            log_level: LogLevel::Info,
            log_json: false,
            log_to_file: false,
            providers: HashMap::new(),
            queue: QueueSettings::default(),
            validation: ValidationSettings::default(),
            live_check: LiveCheckSettings::default(),
            notifications: NotificationSettings::default(),
            server: ServerSettings::default(),
            retention: RetentionSettings::default(),
        }
    }
}

fn default_true() -> bool {
    true
}

/// Hosting provider API settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderSettings {
    /// Base URL; the deploy endpoint is `<base_url>/deploy`
    pub base_url: String,

    /// Bearer token; wrapped in a secret as soon as it is read
    #[serde(default, skip_serializing)]
    pub api_token: Option<String>,

    #[serde(default = "default_provider_timeout")]
    pub timeout_secs: u64,
}

fn default_provider_timeout() -> u64 {
    60
}

/// Job queue settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueSettings {
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,

    #[serde(default = "default_attempts")]
    pub attempts: u32,

    #[serde(default = "default_backoff_kind")]
    pub backoff_kind: BackoffKind,

    #[serde(default = "default_backoff_delay")]
    pub backoff_delay_ms: u64,
}

fn default_concurrency() -> usize {
    2
}

fn default_attempts() -> u32 {
    3
}

fn default_backoff_kind() -> BackoffKind {
    BackoffKind::Exponential
}

fn default_backoff_delay() -> u64 {
    5000
}

impl Default for QueueSettings {
    fn default() -> Self {
        Self {
            concurrency: default_concurrency(),
            attempts: default_attempts(),
            backoff_kind: default_backoff_kind(),
            backoff_delay_ms: default_backoff_delay(),
        }
    }
}

/// Pre-flight validation settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValidationSettings {
    #[serde(default = "default_entry_file")]
    pub entry_file: String,

    #[serde(default = "default_max_file_size")]
    pub max_file_size_bytes: u64,
}

fn default_entry_file() -> String {
    "index.html".to_string()
}

fn default_max_file_size() -> u64 {
    DEFAULT_MAX_FILE_SIZE
}

impl Default for ValidationSettings {
    fn default() -> Self {
        Self {
            entry_file: default_entry_file(),
            max_file_size_bytes: default_max_file_size(),
        }
    }
}

/// Post-deploy check settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LiveCheckSettings {
    #[serde(default = "default_live_check_timeout")]
    pub timeout_secs: u64,
}

fn default_live_check_timeout() -> u64 {
    15
}

impl Default for LiveCheckSettings {
    fn default() -> Self {
        Self {
            timeout_secs: default_live_check_timeout(),
        }
    }
}

/// Notification delivery settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NotificationSettings {
    /// Webhook receiving notifications; logged only when unset
    #[serde(default)]
    pub webhook_url: Option<String>,

    #[serde(default = "default_notification_buffer")]
    pub buffer: usize,
}

fn default_notification_buffer() -> usize {
    256
}

impl Default for NotificationSettings {
    fn default() -> Self {
        Self {
            webhook_url: None,
            buffer: default_notification_buffer(),
        }
    }
}

/// Ops HTTP server settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerSettings {
    #[serde(default = "default_true")]
    pub enabled: bool,

    #[serde(default = "default_server_host")]
    pub host: String,

    #[serde(default = "default_server_port")]
    pub port: u16,
}

fn default_server_host() -> String {
    "127.0.0.1".to_string()
}

fn default_server_port() -> u16 {
    8080
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            host: default_server_host(),
            port: default_server_port(),
        }
    }
}

/// How long finished jobs are kept
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetentionSettings {
    #[serde(default = "default_completed_retention")]
    pub completed_secs: u64,

    #[serde(default = "default_failed_retention")]
    pub failed_secs: u64,

    #[serde(default = "default_clean_interval")]
    pub clean_interval_secs: u64,
}

fn default_completed_retention() -> u64 {
    24 * 3600
}

fn default_failed_retention() -> u64 {
    7 * 24 * 3600
}

fn default_clean_interval() -> u64 {
    600
}

impl Default for RetentionSettings {
    fn default() -> Self {
        Self {
            completed_secs: default_completed_retention(),
            failed_secs: default_failed_retention(),
            clean_interval_secs: default_clean_interval(),
        }
    }
}
