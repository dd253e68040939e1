//! Deployment store backed by one JSON document per deployment

use std::path::PathBuf;

use async_trait::async_trait;
use tracing::debug;

use crate::errors::DeployerError;
use crate::filesys::dir::Dir;
use crate::filesys::file::File;
use crate::models::deployment::{Deployment, NewDeployment};
use crate::store::{is_safe_id, DeploymentStore, StoreError};

/// Stores `<dir>/<id>.json`, written atomically
#[derive(Debug, Clone)]
pub struct FileDeploymentStore {
    dir: Dir,
}

impl FileDeploymentStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: Dir::new(dir) }
    }

    pub fn dir(&self) -> &Dir {
        &self.dir
    }

    fn record_file(&self, id: &str) -> Result<File, StoreError> {
        if !is_safe_id(id) {
            return Err(StoreError::NotFound(id.to_string()));
        }
        Ok(self.dir.file(&format!("{}.json", id)))
    }

    async fn write(&self, deployment: &Deployment) -> Result<(), StoreError> {
        let file = self.record_file(&deployment.id)?;
        file.write_json(deployment)
            .await
            .map_err(|e| StoreError::Unavailable(e.to_string()))?;
        debug!("Wrote deployment record {}", file.path().display());
        Ok(())
    }
}

#[async_trait]
impl DeploymentStore for FileDeploymentStore {
    async fn find(&self, id: &str) -> Result<Option<Deployment>, StoreError> {
        if !is_safe_id(id) {
            return Ok(None);
        }
        let file = self.record_file(id)?;
        if !file.exists().await {
            return Ok(None);
        }

        match file.read_json::<Deployment>().await {
            Ok(deployment) => Ok(Some(deployment)),
            Err(DeployerError::JsonError(e)) => Err(StoreError::Corrupt {
                id: id.to_string(),
                reason: e.to_string(),
            }),
            Err(e) => Err(StoreError::Unavailable(e.to_string())),
        }
    }

    async fn save(&self, deployment: &Deployment) -> Result<(), StoreError> {
        if !self.record_file(&deployment.id)?.exists().await {
            return Err(StoreError::NotFound(deployment.id.clone()));
        }
        self.write(deployment).await
    }

    async fn create(&self, fields: NewDeployment) -> Result<Deployment, StoreError> {
        let deployment = Deployment::new(fields);
        self.write(&deployment).await?;
        Ok(deployment)
    }
}
