//! Delivery channels for notifications

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use tracing::info;
use url::Url;

use crate::errors::DeployerError;
use crate::notify::Notification;

#[async_trait]
pub trait NotificationChannel: Send + Sync {
    async fn deliver(&self, notification: &Notification) -> Result<(), DeployerError>;
}

/// POSTs the notification as JSON
pub struct WebhookChannel {
    client: Client,
    url: Url,
}

impl WebhookChannel {
    pub fn new(url: Url, timeout: Duration) -> Result<Self, DeployerError> {
        let client = Client::builder()
            .timeout(timeout)
            .user_agent(crate::utils::user_agent())
            .build()?;
        Ok(Self { client, url })
    }
}

#[async_trait]
impl NotificationChannel for WebhookChannel {
    async fn deliver(&self, notification: &Notification) -> Result<(), DeployerError> {
        let response = self
            .client
            .post(self.url.clone())
            .json(notification)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(DeployerError::DeployError(format!(
                "webhook {} answered {}",
                self.url, status
            )));
        }
        Ok(())
    }
}

/// Writes notifications to the log
#[derive(Debug, Default)]
pub struct LogChannel;

#[async_trait]
impl NotificationChannel for LogChannel {
    async fn deliver(&self, notification: &Notification) -> Result<(), DeployerError> {
        info!(
            kind = %notification.kind,
            user_id = %notification.user_id,
            "{}",
            notification.summary()
        );
        Ok(())
    }
}
