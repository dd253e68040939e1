//! Hosting provider API client

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use provider_api::{DeployRequest, DeployResponse, ProviderErrorBody};
use reqwest::{header, Client};
use secrecy::{ExposeSecret, SecretString};
use tracing::{debug, error};
use url::Url;

use crate::errors::DeployerError;
use crate::http::error::ProviderError;
use crate::models::deployment::DeploymentFile;

/// Provider acknowledgement of a deploy
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProviderDeployment {
    pub provider_deployment_id: String,
    pub url: String,
}

/// Deploy endpoint of a hosting provider
#[async_trait]
pub trait ProviderClient: Send + Sync {
    /// Submit `files` for `website_id` to the named provider
    async fn deploy(
        &self,
        provider: &str,
        website_id: &str,
        files: &[DeploymentFile],
    ) -> Result<ProviderDeployment, ProviderError>;
}

/// Connection details for one provider
#[derive(Debug)]
pub struct ProviderEndpoint {
    pub base_url: Url,
    pub api_token: Option<SecretString>,
    pub timeout: Duration,
}

impl Clone for ProviderEndpoint {
    fn clone(&self) -> Self {
        Self {
            base_url: self.base_url.clone(),
            api_token: self
                .api_token
                .as_ref()
                .map(|t| SecretString::from(t.expose_secret().to_string())),
            timeout: self.timeout,
        }
    }
}

struct Provider {
    client: Client,
    deploy_url: String,
    api_token: Option<SecretString>,
}

/// HTTP client for provider deploy APIs
pub struct HttpProviderClient {
    providers: HashMap<String, Provider>,
}

impl HttpProviderClient {
    /// Create a client with one connection pool per provider
    pub fn new(endpoints: HashMap<String, ProviderEndpoint>) -> Result<Self, DeployerError> {
        let mut providers = HashMap::with_capacity(endpoints.len());

        for (name, endpoint) in endpoints {
            let client = Client::builder()
                .timeout(endpoint.timeout)
                .user_agent(crate::utils::user_agent())
                .build()?;

            let deploy_url = format!("{}/deploy", endpoint.base_url.as_str().trim_end_matches('/'));
            providers.insert(
                name,
                Provider {
                    client,
                    deploy_url,
                    api_token: endpoint.api_token,
                },
            );
        }

        Ok(Self { providers })
    }

    /// Names of the configured providers
    pub fn provider_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.providers.keys().cloned().collect();
        names.sort();
        names
    }
}

#[async_trait]
impl ProviderClient for HttpProviderClient {
    async fn deploy(
        &self,
        provider: &str,
        website_id: &str,
        files: &[DeploymentFile],
    ) -> Result<ProviderDeployment, ProviderError> {
        let target = self
            .providers
            .get(provider)
            .ok_or_else(|| ProviderError::UnknownProvider(provider.to_string()))?;

        debug!("POST {} ({} files)", target.deploy_url, files.len());

        let body = DeployRequest {
            files: files.iter().cloned().map(Into::into).collect(),
            website_id: website_id.to_string(),
        };

        let mut request = target.client.post(&target.deploy_url).json(&body);
        if let Some(token) = &target.api_token {
            request = request.header(
                header::AUTHORIZATION,
                format!("Bearer {}", token.expose_secret()),
            );
        }

        let response = request
            .send()
            .await
            .map_err(|e| ProviderError::from_reqwest(&e))?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            let message = serde_json::from_str::<ProviderErrorBody>(&text)
                .ok()
                .and_then(|b| b.text().map(str::to_string))
                .or_else(|| (!text.trim().is_empty()).then(|| text.trim().to_string()))
                .unwrap_or_else(|| status.canonical_reason().unwrap_or("no reason").to_string());
            error!("Provider {} deploy failed: {} - {}", provider, status, message);
            return Err(ProviderError::Status { status, message });
        }

        let body: DeployResponse = response
            .json()
            .await
            .map_err(|e| ProviderError::InvalidResponse(e.to_string()))?;

        Url::parse(&body.url).map_err(|e| {
            ProviderError::InvalidResponse(format!("url `{}` is not absolute: {}", body.url, e))
        })?;

        Ok(ProviderDeployment {
            provider_deployment_id: body.deployment_id,
            url: body.url,
        })
    }
}
