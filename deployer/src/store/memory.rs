//! In-memory deployment store

use std::collections::HashMap;
use std::sync::RwLock;

use async_trait::async_trait;

use crate::models::deployment::{Deployment, NewDeployment};
use crate::store::{DeploymentStore, StoreError};

#[derive(Debug, Default)]
pub struct MemoryDeploymentStore {
    records: RwLock<HashMap<String, Deployment>>,
}

impl MemoryDeploymentStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a record as-is
    pub fn insert(&self, deployment: Deployment) {
        let mut records = self.records.write().unwrap_or_else(|e| e.into_inner());
        records.insert(deployment.id.clone(), deployment);
    }

    pub fn len(&self) -> usize {
        self.records.read().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl DeploymentStore for MemoryDeploymentStore {
    async fn find(&self, id: &str) -> Result<Option<Deployment>, StoreError> {
        let records = self.records.read().unwrap_or_else(|e| e.into_inner());
        Ok(records.get(id).cloned())
    }

    async fn save(&self, deployment: &Deployment) -> Result<(), StoreError> {
        let mut records = self.records.write().unwrap_or_else(|e| e.into_inner());
        if !records.contains_key(&deployment.id) {
            return Err(StoreError::NotFound(deployment.id.clone()));
        }
        records.insert(deployment.id.clone(), deployment.clone());
        Ok(())
    }

    async fn create(&self, fields: NewDeployment) -> Result<Deployment, StoreError> {
        let deployment = Deployment::new(fields);
        self.insert(deployment.clone());
        Ok(deployment)
    }
}
