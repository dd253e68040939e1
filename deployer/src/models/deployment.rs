//! Deployment models

use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::deploy::fsm::{transition, DeploymentEvent, DeploymentStatus, TransitionError};

/// One attempt to publish a website's file set to a hosting provider
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Deployment {
    /// Unique deployment ID
    pub id: String,

    pub website_id: String,

    /// User who requested the deployment
    pub user_id: String,

    /// Free-form version label
    pub version: String,

    pub status: DeploymentStatus,

    #[serde(default)]
    pub commit_message: Option<String>,

    /// Set once the provider acknowledges the bundle
    #[serde(default)]
    pub provider_deployment_id: Option<String>,

    /// Public URL, set once known
    #[serde(default)]
    pub url: Option<String>,

    #[serde(default)]
    pub error_message: Option<String>,

    pub created_at: DateTime<Utc>,

    /// When a worker moved the deployment to `in_progress`
    #[serde(default)]
    pub started_at: Option<DateTime<Utc>>,

    #[serde(default)]
    pub completed_at: Option<DateTime<Utc>>,

    /// Milliseconds between submission and the terminal state
    #[serde(default)]
    pub build_time_ms: Option<u64>,
}

impl Deployment {
    /// Create a queued deployment
    pub fn new(fields: NewDeployment) -> Self {
        Self {
            id: crate::utils::generate_uuid(),
            website_id: fields.website_id,
            user_id: fields.user_id,
            version: fields.version,
            status: DeploymentStatus::Queued,
            commit_message: fields.commit_message,
            provider_deployment_id: None,
            url: None,
            error_message: None,
            created_at: Utc::now(),
            started_at: None,
            completed_at: None,
            build_time_ms: None,
        }
    }

    /// Apply a state machine event.
    ///
    /// `completed_at` and `build_time_ms` are stamped exactly when a terminal
    /// state is entered, so they are set iff the status is terminal.
    pub fn apply(&mut self, event: DeploymentEvent, now: DateTime<Utc>) -> Result<(), TransitionError> {
        let next = transition(self.status, &event)?;

        match event {
            DeploymentEvent::Start => {
                self.started_at = Some(now);
                self.error_message = None;
            }
            DeploymentEvent::Succeed => {
                self.error_message = None;
                self.finish(now);
            }
            DeploymentEvent::Fail(message) => {
                self.error_message = Some(message);
                self.finish(now);
            }
        }

        self.status = next;
        Ok(())
    }

    fn finish(&mut self, now: DateTime<Utc>) {
        let since = self.started_at.unwrap_or(self.created_at);
        let elapsed = (now - since).num_milliseconds().max(0) as u64;
        self.completed_at = Some(now);
        self.build_time_ms = Some(elapsed);
    }

    /// True once `success` or `failed`
    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }
}

/// Fields supplied by the API layer when requesting a deployment
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewDeployment {
    pub website_id: String,
    pub user_id: String,
    pub version: String,
    #[serde(default)]
    pub commit_message: Option<String>,
}

/// A candidate file, owned by the caller for one validation and submission cycle
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeploymentFile {
    /// Relative, `/`-separated path
    pub path: String,
    /// Raw bytes; text and binary assets alike
    pub content: Vec<u8>,
}

impl DeploymentFile {
    pub fn new(path: impl Into<String>, content: impl Into<Vec<u8>>) -> Self {
        Self {
            path: path.into(),
            content: content.into(),
        }
    }

    /// Size of the content in bytes
    pub fn size(&self) -> usize {
        self.content.len()
    }

    /// Content as text, when it is valid UTF-8
    pub fn text(&self) -> Option<&str> {
        std::str::from_utf8(&self.content).ok()
    }

    /// Lowercased extension of the path, if any
    pub fn extension(&self) -> Option<String> {
        let name = self.path.rsplit('/').next().unwrap_or(&self.path);
        name.rsplit_once('.')
            .map(|(_, ext)| ext.to_ascii_lowercase())
    }
}

impl From<DeploymentFile> for provider_api::DeployFile {
    fn from(file: DeploymentFile) -> Self {
        match String::from_utf8(file.content) {
            Ok(content) => provider_api::DeployFile {
                path: file.path,
                content,
                encoding: None,
            },
            Err(e) => provider_api::DeployFile {
                path: file.path,
                content: BASE64.encode(e.as_bytes()),
                encoding: Some(provider_api::FileEncoding::Base64),
            },
        }
    }
}
