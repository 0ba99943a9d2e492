//! In-memory deployment store

use std::collections::HashMap;
use std::sync::RwLock;

use async_trait::async_trait;
use chrono::Utc;

use crate::errors::DeployerError;
use crate::models::{CreatedEntity, Deployment, DeploymentId, DeploymentLogEntry, DeploymentPatch};

use super::{not_found, DeploymentFilter, DeploymentStore, Page};

/// In-memory deployment store.
///
/// Data is lost when the process exits.
#[derive(Debug, Default)]
pub struct MemoryStore {
    deployments: RwLock<HashMap<DeploymentId, Deployment>>,
    logs: RwLock<HashMap<DeploymentId, Vec<DeploymentLogEntry>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

fn poisoned() -> DeployerError {
    DeployerError::StorageError("lock poisoned".to_string())
}

#[async_trait]
impl DeploymentStore for MemoryStore {
    async fn create(&self, deployment: &Deployment) -> Result<(), DeployerError> {
        let mut deployments = self.deployments.write().map_err(|_| poisoned())?;
        if deployments.contains_key(&deployment.id) {
            return Err(DeployerError::StorageError(format!(
                "deployment {} already exists",
                deployment.id
            )));
        }
        deployments.insert(deployment.id, deployment.clone());
        Ok(())
    }

    async fn update(
        &self,
        id: &DeploymentId,
        patch: DeploymentPatch,
    ) -> Result<Deployment, DeployerError> {
        let mut deployments = self.deployments.write().map_err(|_| poisoned())?;
        let deployment = deployments.get_mut(id).ok_or_else(|| not_found(id))?;
        deployment.apply(patch);
        Ok(deployment.clone())
    }

    async fn record_entity(
        &self,
        id: &DeploymentId,
        entity: CreatedEntity,
    ) -> Result<(), DeployerError> {
        let mut deployments = self.deployments.write().map_err(|_| poisoned())?;
        let deployment = deployments.get_mut(id).ok_or_else(|| not_found(id))?;
        deployment.created_entities.push(entity);
        deployment.updated_at = Utc::now();
        Ok(())
    }

    async fn append_log(
        &self,
        id: &DeploymentId,
        entry: DeploymentLogEntry,
    ) -> Result<(), DeployerError> {
        if !self.deployments.read().map_err(|_| poisoned())?.contains_key(id) {
            return Err(not_found(id));
        }
        let mut logs = self.logs.write().map_err(|_| poisoned())?;
        logs.entry(*id).or_default().push(entry);
        Ok(())
    }

    async fn get(&self, id: &DeploymentId) -> Result<Option<Deployment>, DeployerError> {
        let deployments = self.deployments.read().map_err(|_| poisoned())?;
        Ok(deployments.get(id).cloned())
    }

    async fn logs(&self, id: &DeploymentId) -> Result<Vec<DeploymentLogEntry>, DeployerError> {
        let logs = self.logs.read().map_err(|_| poisoned())?;
        Ok(logs.get(id).cloned().unwrap_or_default())
    }

    async fn list(&self, filter: &DeploymentFilter) -> Result<Page<Deployment>, DeployerError> {
        let deployments = self.deployments.read().map_err(|_| poisoned())?;
        Ok(filter.paginate(deployments.values().cloned()))
    }
}
