//! Deployment persistence

pub mod file;
pub mod memory;

use async_trait::async_trait;
use thiserror::Error;

use crate::models::deployment::{Deployment, NewDeployment};

pub use file::FileDeploymentStore;
pub use memory::MemoryDeploymentStore;

/// Persistence failure
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    #[error("Deployment {0} does not exist")]
    NotFound(String),

    #[error("Store unavailable: {0}")]
    Unavailable(String),

    #[error("Corrupt deployment record {id}: {reason}")]
    Corrupt { id: String, reason: String },
}

/// Deployment records, owned by the surrounding application
#[async_trait]
pub trait DeploymentStore: Send + Sync {
    async fn find(&self, id: &str) -> Result<Option<Deployment>, StoreError>;

    /// Overwrite the stored record with `deployment`
    async fn save(&self, deployment: &Deployment) -> Result<(), StoreError>;

    /// Create a `queued` deployment
    async fn create(&self, fields: NewDeployment) -> Result<Deployment, StoreError>;
}

/// Ids become file names, so only a conservative character set is accepted
pub(crate) fn is_safe_id(id: &str) -> bool {
    !id.is_empty()
        && id.len() <= 128
        && id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
}
