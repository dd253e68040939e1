//! Fetching pages from deployed sites

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use tracing::debug;

use crate::errors::DeployerError;
use crate::http::error::ProviderError;

/// A fetched page. Any status is returned, not only 2xx.
///
/// Once the status line has arrived the page is returned even if reading the
/// body fails; `body` then carries the read error.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchedPage {
    pub status: u16,
    pub body: Result<String, String>,
}

#[async_trait]
pub trait SiteFetcher: Send + Sync {
    async fn fetch(&self, url: &str) -> Result<FetchedPage, ProviderError>;
}

/// `reqwest`-backed fetcher with a fixed per-request timeout
pub struct HttpSiteFetcher {
    client: Client,
}

impl HttpSiteFetcher {
    pub fn new(timeout: Duration) -> Result<Self, DeployerError> {
        let client = Client::builder()
            .timeout(timeout)
            .user_agent(crate::utils::user_agent())
            .build()?;
        Ok(Self { client })
    }
}

#[async_trait]
impl SiteFetcher for HttpSiteFetcher {
    async fn fetch(&self, url: &str) -> Result<FetchedPage, ProviderError> {
        debug!("GET {}", url);

        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| ProviderError::from_reqwest(&e))?;

        let status = response.status().as_u16();
        let body = response.text().await.map_err(|e| {
            debug!("Reading body of {} failed: {}", url, e);
            ProviderError::from_reqwest(&e).to_string()
        });

        Ok(FetchedPage { status, body })
    }
}
