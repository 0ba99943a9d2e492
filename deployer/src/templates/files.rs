//! File-backed template store

use async_trait::async_trait;
use tokio::sync::Mutex;

use crate::errors::DeployerError;
use crate::filesys::dir::Dir;
use crate::filesys::file::File;

use super::{Template, TemplateStore};

/// One `<id>.json` file per template
#[derive(Debug)]
pub struct FileTemplateStore {
    dir: Dir,
    write_lock: Mutex<()>,
}

impl FileTemplateStore {
    pub fn new(dir: Dir) -> Self {
        Self {
            dir,
            write_lock: Mutex::new(()),
        }
    }

    fn file(&self, id: &str) -> Result<File, DeployerError> {
        let valid = !id.is_empty()
            && id
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');
        if !valid {
            return Err(DeployerError::TemplateError(format!(
                "invalid template id '{id}'"
            )));
        }
        Ok(self.dir.file(&format!("{id}.json")))
    }
}

#[async_trait]
impl TemplateStore for FileTemplateStore {
    async fn get(&self, id: &str) -> Result<Option<Template>, DeployerError> {
        let file = self.file(id)?;
        if !file.exists().await {
            return Ok(None);
        }
        file.read_json().await.map(Some)
    }

    async fn increment_usage(&self, id: &str) -> Result<(), DeployerError> {
        let _guard = self.write_lock.lock().await;
        let file = self.file(id)?;
        if !file.exists().await {
            return Err(DeployerError::NotFound(format!("template {id}")));
        }
        let mut template: Template = file.read_json().await?;
        template.usage_count += 1;
        file.write_json(&template).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::DeploymentConfiguration;

    #[tokio::test]
    async fn reads_and_counts_usage() {
        let tmp = tempfile::tempdir().unwrap();
        let dir = Dir::new(tmp.path());
        let store = FileTemplateStore::new(dir.clone());

        dir.file("starter.json")
            .write_json(&Template {
                id: "starter".to_string(),
                name: "Starter".to_string(),
                configuration: DeploymentConfiguration::default(),
                usage_count: 4,
            })
            .await
            .unwrap();

        store.increment_usage("starter").await.unwrap();
        let template = store.get("starter").await.unwrap().unwrap();
        assert_eq!(template.usage_count, 5);
        assert!(store.get("other").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn rejects_path_like_ids() {
        let tmp = tempfile::tempdir().unwrap();
        let store = FileTemplateStore::new(Dir::new(tmp.path()));
        assert!(store.get("../settings").await.is_err());
    }
}
