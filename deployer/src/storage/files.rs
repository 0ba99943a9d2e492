//! File-backed deployment store

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::Mutex;
use tracing::warn;

use crate::errors::DeployerError;
use crate::filesys::dir::Dir;
use crate::filesys::file::File;
use crate::models::{CreatedEntity, Deployment, DeploymentId, DeploymentLogEntry, DeploymentPatch};

use super::{not_found, DeploymentFilter, DeploymentStore, Page};

/// One `<id>.json` document per deployment, rewritten atomically, and one
/// `<id>.jsonl` step log per deployment, appended to.
///
/// Writers are serialised through a single async mutex, so read-modify-write
/// updates from concurrent deployments never interleave.
#[derive(Debug)]
pub struct FileStore {
    dir: Dir,
    write_lock: Mutex<()>,
}

impl FileStore {
    pub fn new(dir: Dir) -> Self {
        Self {
            dir,
            write_lock: Mutex::new(()),
        }
    }

    fn document(&self, id: &DeploymentId) -> File {
        self.dir.file(&format!("{id}.json"))
    }

    fn log_file(&self, id: &DeploymentId) -> File {
        self.dir.file(&format!("{id}.jsonl"))
    }

    async fn read(&self, id: &DeploymentId) -> Result<Option<Deployment>, DeployerError> {
        let file = self.document(id);
        if !file.exists().await {
            return Ok(None);
        }
        file.read_json().await.map(Some)
    }

    async fn modify<F>(&self, id: &DeploymentId, f: F) -> Result<Deployment, DeployerError>
    where
        F: FnOnce(&mut Deployment) + Send,
    {
        let _guard = self.write_lock.lock().await;
        let mut deployment = self.read(id).await?.ok_or_else(|| not_found(id))?;
        f(&mut deployment);
        self.document(id).write_json(&deployment).await?;
        Ok(deployment)
    }
}

#[async_trait]
impl DeploymentStore for FileStore {
    async fn create(&self, deployment: &Deployment) -> Result<(), DeployerError> {
        let _guard = self.write_lock.lock().await;
        let file = self.document(&deployment.id);
        if file.exists().await {
            return Err(DeployerError::StorageError(format!(
                "deployment {} already exists",
                deployment.id
            )));
        }
        file.write_json(deployment).await
    }

    async fn update(
        &self,
        id: &DeploymentId,
        patch: DeploymentPatch,
    ) -> Result<Deployment, DeployerError> {
        self.modify(id, |d| d.apply(patch)).await
    }

    async fn record_entity(
        &self,
        id: &DeploymentId,
        entity: CreatedEntity,
    ) -> Result<(), DeployerError> {
        self.modify(id, |d| {
            d.created_entities.push(entity);
            d.updated_at = Utc::now();
        })
        .await
        .map(|_| ())
    }

    async fn append_log(
        &self,
        id: &DeploymentId,
        entry: DeploymentLogEntry,
    ) -> Result<(), DeployerError> {
        let _guard = self.write_lock.lock().await;
        if !self.document(id).exists().await {
            return Err(not_found(id));
        }
        self.log_file(id).append_json_line(&entry).await
    }

    async fn get(&self, id: &DeploymentId) -> Result<Option<Deployment>, DeployerError> {
        self.read(id).await
    }

    async fn logs(&self, id: &DeploymentId) -> Result<Vec<DeploymentLogEntry>, DeployerError> {
        self.log_file(id).read_json_lines().await
    }

    async fn list(&self, filter: &DeploymentFilter) -> Result<Page<Deployment>, DeployerError> {
        let mut deployments = Vec::new();
        for path in self.dir.list_files_with_extension("json").await? {
            match File::new(&path).read_json::<Deployment>().await {
                Ok(deployment) => deployments.push(deployment),
                Err(e) => warn!(path = %path.display(), "Skipping unreadable deployment: {}", e),
            }
        }
        Ok(filter.paginate(deployments))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::authn::credential::fingerprint;
    use crate::models::configuration::ObjectType;
    use crate::models::{
        DeploymentConfiguration, DeploymentStatus, EntityType, LogStatus, Progress,
    };

    fn store(tmp: &tempfile::TempDir) -> FileStore {
        FileStore::new(Dir::new(tmp.path().join("deployments")))
    }

    fn deployment() -> Deployment {
        Deployment::new("acme", None, DeploymentConfiguration::default(), fingerprint("t"))
    }

    #[tokio::test]
    async fn deployment_survives_reopening() {
        let tmp = tempfile::tempdir().unwrap();
        let d = deployment();
        {
            let store = store(&tmp);
            store.create(&d).await.unwrap();
            store
                .record_entity(
                    &d.id,
                    CreatedEntity {
                        entity_type: EntityType::PropertyGroup,
                        object_type: ObjectType::Contacts,
                        remote_id: "billing".to_string(),
                        display_name: "Billing".to_string(),
                        existed: false,
                        recorded_at: Utc::now(),
                    },
                )
                .await
                .unwrap();
            store
                .update(
                    &d.id,
                    DeploymentPatch {
                        status: Some(DeploymentStatus::InProgress),
                        progress: Some(Progress::new(3)),
                        ..Default::default()
                    },
                )
                .await
                .unwrap();
            store
                .append_log(&d.id, DeploymentLogEntry::new("groups", LogStatus::Started, None))
                .await
                .unwrap();
        }

        let reopened = store(&tmp);
        let loaded = reopened.get(&d.id).await.unwrap().unwrap();
        assert_eq!(loaded.status, DeploymentStatus::InProgress);
        assert_eq!(loaded.progress.total_steps, 3);
        assert_eq!(loaded.created_entities.len(), 1);
        assert_eq!(reopened.logs(&d.id).await.unwrap().len(), 1);

        let page = reopened.list(&DeploymentFilter::new()).await.unwrap();
        assert_eq!(page.total, 1);
    }

    #[tokio::test]
    async fn status_is_stored_as_snake_case() {
        let tmp = tempfile::tempdir().unwrap();
        let store = store(&tmp);
        let d = deployment();
        store.create(&d).await.unwrap();
        store
            .update(&d.id, DeploymentPatch::status(DeploymentStatus::RolledBack))
            .await
            .unwrap();

        let raw = store.document(&d.id).read_string().await.unwrap();
        assert!(raw.contains("\"rolled_back\""));
    }

    #[tokio::test]
    async fn unknown_deployment() {
        let tmp = tempfile::tempdir().unwrap();
        let store = store(&tmp);
        let id = DeploymentId::generate();
        assert!(store.get(&id).await.unwrap().is_none());
        assert!(store
            .append_log(&id, DeploymentLogEntry::new("x", LogStatus::Failed, None))
            .await
            .is_err());
    }
}
