//! Configuration templates.
//!
//! Templates are owned by an outside system. The engine only reads a
//! template's configuration at admission and bumps its usage counter once a
//! deployment built from it completes.

mod files;

pub use files::FileTemplateStore;

use std::collections::HashMap;
use std::sync::RwLock;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::errors::DeployerError;
use crate::models::DeploymentConfiguration;

/// A stored, reusable configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Template {
    pub id: String,
    pub name: String,
    pub configuration: DeploymentConfiguration,
    #[serde(default)]
    pub usage_count: u64,
}

#[async_trait]
pub trait TemplateStore: Send + Sync {
    async fn get(&self, id: &str) -> Result<Option<Template>, DeployerError>;

    async fn increment_usage(&self, id: &str) -> Result<(), DeployerError>;
}

/// In-memory template store
#[derive(Debug, Default)]
pub struct MemoryTemplateStore {
    templates: RwLock<HashMap<String, Template>>,
}

impl MemoryTemplateStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add or replace a template
    pub fn insert(&self, template: Template) -> Result<(), DeployerError> {
        let mut templates = self.templates.write().map_err(|_| poisoned())?;
        templates.insert(template.id.clone(), template);
        Ok(())
    }
}

fn poisoned() -> DeployerError {
    DeployerError::TemplateError("lock poisoned".to_string())
}

#[async_trait]
impl TemplateStore for MemoryTemplateStore {
    async fn get(&self, id: &str) -> Result<Option<Template>, DeployerError> {
        let templates = self.templates.read().map_err(|_| poisoned())?;
        Ok(templates.get(id).cloned())
    }

    async fn increment_usage(&self, id: &str) -> Result<(), DeployerError> {
        let mut templates = self.templates.write().map_err(|_| poisoned())?;
        let template = templates
            .get_mut(id)
            .ok_or_else(|| DeployerError::NotFound(format!("template {id}")))?;
        template.usage_count += 1;
        Ok(())
    }
}
