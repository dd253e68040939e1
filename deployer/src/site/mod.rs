//! Candidate file sets for websites

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::RwLock;

use async_trait::async_trait;
use tracing::debug;

use crate::errors::DeployerError;
use crate::filesys::dir::Dir;
use crate::filesys::file::File;
use crate::models::deployment::DeploymentFile;
use crate::store::is_safe_id;

/// Where a website's current file set comes from
#[async_trait]
pub trait SiteSource: Send + Sync {
    async fn load_files(&self, website_id: &str) -> Result<Vec<DeploymentFile>, DeployerError>;
}

/// Reads `<root>/<website_id>/` recursively
#[derive(Debug, Clone)]
pub struct DirectorySiteSource {
    root: Dir,
}

impl DirectorySiteSource {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: Dir::new(root),
        }
    }
}

#[async_trait]
impl SiteSource for DirectorySiteSource {
    async fn load_files(&self, website_id: &str) -> Result<Vec<DeploymentFile>, DeployerError> {
        if !is_safe_id(website_id) {
            return Err(DeployerError::SiteError(format!(
                "invalid website id `{}`",
                website_id
            )));
        }

        let dir = self.root.subdir(website_id);
        if !dir.exists().await {
            debug!("No files for website {} at {}", website_id, dir.path().display());
            return Ok(Vec::new());
        }
        load_dir_files(dir.path()).await
    }
}

/// Load every file under `dir` with relative, `/`-separated paths
pub async fn load_dir_files(dir: &Path) -> Result<Vec<DeploymentFile>, DeployerError> {
    let mut files = Vec::new();
    for path in Dir::new(dir).walk_files().await? {
        let relative = path
            .strip_prefix(dir)
            .map_err(|e| DeployerError::SiteError(e.to_string()))?
            .components()
            .map(|c| c.as_os_str().to_string_lossy().into_owned())
            .collect::<Vec<_>>()
            .join("/");
        let content = File::new(&path).read_bytes().await?;
        files.push(DeploymentFile::new(relative, content));
    }
    Ok(files)
}

/// Fixed file sets keyed by website id
#[derive(Debug, Default)]
pub struct MemorySiteSource {
    sites: RwLock<HashMap<String, Vec<DeploymentFile>>>,
}

impl MemorySiteSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn put(&self, website_id: impl Into<String>, files: Vec<DeploymentFile>) {
        let mut sites = self.sites.write().unwrap_or_else(|e| e.into_inner());
        sites.insert(website_id.into(), files);
    }
}

#[async_trait]
impl SiteSource for MemorySiteSource {
    async fn load_files(&self, website_id: &str) -> Result<Vec<DeploymentFile>, DeployerError> {
        let sites = self.sites.read().unwrap_or_else(|e| e.into_inner());
        Ok(sites.get(website_id).cloned().unwrap_or_default())
    }
}
