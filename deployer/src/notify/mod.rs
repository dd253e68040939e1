//! Best-effort user notifications.
//!
//! Producers push into a bounded channel and never wait on delivery; the
//! notifier worker drains it. A full or closed channel drops the message.

pub mod channel;

use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::deploy::fsm::DeploymentStatus;
use crate::models::deployment::Deployment;
use crate::models::domain::Domain;
use crate::telemetry::DeployMetrics;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationKind {
    DeploymentSucceeded,
    DeploymentFailed,
    DomainVerified,
    DomainVerificationFailed,
}

impl NotificationKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            NotificationKind::DeploymentSucceeded => "deployment_succeeded",
            NotificationKind::DeploymentFailed => "deployment_failed",
            NotificationKind::DomainVerified => "domain_verified",
            NotificationKind::DomainVerificationFailed => "domain_verification_failed",
        }
    }
}

impl fmt::Display for NotificationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What the notification is about
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum NotificationSubject {
    Deployment(Box<Deployment>),
    Domain(Domain),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Notification {
    pub kind: NotificationKind,
    pub subject: NotificationSubject,
    pub website_id: String,
    pub user_id: String,
    pub created_at: DateTime<Utc>,
}

impl Notification {
    /// Outcome notification for a deployment in a terminal state
    pub fn deployment_outcome(deployment: &Deployment) -> Option<Self> {
        let kind = match deployment.status {
            DeploymentStatus::Success => NotificationKind::DeploymentSucceeded,
            DeploymentStatus::Failed => NotificationKind::DeploymentFailed,
            DeploymentStatus::Queued | DeploymentStatus::InProgress => return None,
        };
        Some(Self {
            kind,
            subject: NotificationSubject::Deployment(Box::new(deployment.clone())),
            website_id: deployment.website_id.clone(),
            user_id: deployment.user_id.clone(),
            created_at: Utc::now(),
        })
    }

    /// Outcome notification for a domain verification
    pub fn domain_verification(domain: &Domain, user_id: impl Into<String>) -> Self {
        let kind = if domain.verified {
            NotificationKind::DomainVerified
        } else {
            NotificationKind::DomainVerificationFailed
        };
        Self {
            kind,
            subject: NotificationSubject::Domain(domain.clone()),
            website_id: domain.website_id.clone(),
            user_id: user_id.into(),
            created_at: Utc::now(),
        }
    }

    /// One-line human-readable summary
    pub fn summary(&self) -> String {
        match &self.subject {
            NotificationSubject::Deployment(d) => match self.kind {
                NotificationKind::DeploymentSucceeded => format!(
                    "Deployment {} of website {} is live at {}",
                    d.version,
                    self.website_id,
                    d.url.as_deref().unwrap_or("(unknown url)")
                ),
                _ => format!(
                    "Deployment {} of website {} failed: {}",
                    d.version,
                    self.website_id,
                    d.error_message.as_deref().unwrap_or("unknown error")
                ),
            },
            NotificationSubject::Domain(domain) => match self.kind {
                NotificationKind::DomainVerified => format!("Domain {} is verified", domain.name),
                _ => format!("Domain {} could not be verified", domain.name),
            },
        }
    }
}

/// Sending half handed to producers
#[derive(Debug, Clone)]
pub struct NotificationDispatcher {
    tx: mpsc::Sender<Notification>,
    metrics: Arc<DeployMetrics>,
}

impl NotificationDispatcher {
    /// Create a dispatcher and the receiver the notifier worker drains
    pub fn new(
        buffer: usize,
        metrics: Arc<DeployMetrics>,
    ) -> (Self, mpsc::Receiver<Notification>) {
        let (tx, rx) = mpsc::channel(buffer.max(1));
        (Self { tx, metrics }, rx)
    }

    /// Queue `notification` for delivery. Never blocks and never fails.
    pub fn dispatch(&self, notification: Notification) {
        match self.tx.try_send(notification) {
            Ok(()) => debug!("Notification queued"),
            Err(mpsc::error::TrySendError::Full(n)) => {
                self.metrics.record_notification_dropped();
                warn!(kind = %n.kind, website_id = %n.website_id, "Notification buffer full, dropping");
            }
            Err(mpsc::error::TrySendError::Closed(n)) => {
                self.metrics.record_notification_dropped();
                warn!(kind = %n.kind, website_id = %n.website_id, "Notifier stopped, dropping");
            }
        }
    }
}
