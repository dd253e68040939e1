//! Post-deploy checks against the live site

use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, warn};

use crate::http::fetch::SiteFetcher;
use crate::store::{DeploymentStore, StoreError};

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum LiveCheckError {
    #[error("Deployment not found")]
    NotFound(String),

    #[error("Deployment {0} has no URL yet")]
    NoUrl(String),

    #[error(transparent)]
    Store(#[from] StoreError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CheckName {
    /// The GET completed without a transport failure
    Accessibility,
    /// Status was exactly 200
    PageLoad,
    /// Body looks like an HTML document
    HtmlStructure,
}

impl CheckName {
    pub fn as_str(&self) -> &'static str {
        match self {
            CheckName::Accessibility => "accessibility",
            CheckName::PageLoad => "page_load",
            CheckName::HtmlStructure => "html_structure",
        }
    }
}

impl fmt::Display for CheckName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NamedCheck {
    pub name: CheckName,
    pub passed: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl NamedCheck {
    fn passed(name: CheckName) -> Self {
        Self {
            name,
            passed: true,
            error: None,
        }
    }

    fn failed(name: CheckName, error: impl Into<String>) -> Self {
        Self {
            name,
            passed: false,
            error: Some(error.into()),
        }
    }
}

/// Outcome of the post-deploy checks
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LiveCheckReport {
    pub valid: bool,
    pub checks: Vec<NamedCheck>,
}

impl LiveCheckReport {
    fn from_checks(checks: Vec<NamedCheck>) -> Self {
        Self {
            valid: checks.iter().all(|c| c.passed),
            checks,
        }
    }

    pub fn check(&self, name: CheckName) -> Option<&NamedCheck> {
        self.checks.iter().find(|c| c.name == name)
    }

    /// `<check>: <error>` for every failed check, joined by "; "
    pub fn failure_summary(&self) -> String {
        self.checks
            .iter()
            .filter(|c| !c.passed)
            .map(|c| format!("{}: {}", c.name, c.error.as_deref().unwrap_or("failed")))
            .collect::<Vec<_>>()
            .join("; ")
    }
}

/// Verifies a published deployment through its recorded URL
pub struct LiveValidator {
    store: Arc<dyn DeploymentStore>,
    fetcher: Arc<dyn SiteFetcher>,
}

impl LiveValidator {
    pub fn new(store: Arc<dyn DeploymentStore>, fetcher: Arc<dyn SiteFetcher>) -> Self {
        Self { store, fetcher }
    }

    pub async fn validate_deployed_website(
        &self,
        deployment_id: &str,
    ) -> Result<LiveCheckReport, LiveCheckError> {
        let deployment = self
            .store
            .find(deployment_id)
            .await?
            .ok_or_else(|| LiveCheckError::NotFound(deployment_id.to_string()))?;

        let url = deployment
            .url
            .ok_or_else(|| LiveCheckError::NoUrl(deployment_id.to_string()))?;

        Ok(self.check_url(&url).await)
    }

    /// Run every check against `url`.
    ///
    /// Without any HTTP response only `accessibility` is reported. Once a
    /// status arrived all three checks are reported, even if the body could
    /// not be read.
    pub async fn check_url(&self, url: &str) -> LiveCheckReport {
        let page = match self.fetcher.fetch(url).await {
            Ok(page) => page,
            Err(e) => {
                warn!("Live check of {} failed: {}", url, e);
                return LiveCheckReport::from_checks(vec![NamedCheck::failed(
                    CheckName::Accessibility,
                    format!("Failed to access {}: {}", url, e),
                )]);
            }
        };

        debug!("Live check of {} returned {}", url, page.status);

        let page_load = if page.status == 200 {
            NamedCheck::passed(CheckName::PageLoad)
        } else {
            NamedCheck::failed(
                CheckName::PageLoad,
                format!("Unexpected status code: {}", page.status),
            )
        };

        let html_structure = match &page.body {
            Ok(body) if looks_like_html(body) => NamedCheck::passed(CheckName::HtmlStructure),
            Ok(_) => NamedCheck::failed(CheckName::HtmlStructure, "Invalid HTML structure"),
            Err(e) => NamedCheck::failed(
                CheckName::HtmlStructure,
                format!("Failed to read response body: {}", e),
            ),
        };

        LiveCheckReport::from_checks(vec![
            NamedCheck::passed(CheckName::Accessibility),
            page_load,
            html_structure,
        ])
    }
}

/// An `<html>` element that is opened and closed
fn looks_like_html(body: &str) -> bool {
    let lower = body.to_ascii_lowercase();
    let opened = lower.match_indices("<html").any(|(i, _)| {
        matches!(
            lower.as_bytes().get(i + 5),
            Some(b'>') | Some(b' ') | Some(b'\t') | Some(b'\n') | Some(b'\r')
        )
    });
    opened && lower.contains("</html")
}
