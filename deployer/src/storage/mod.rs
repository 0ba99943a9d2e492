//! Deployment persistence.
//!
//! The engine only talks to [`DeploymentStore`]. [`MemoryStore`] backs tests
//! and dry runs, [`FileStore`] keeps one JSON document per deployment plus an
//! append-only JSON-lines step log.

mod files;
mod memory;

pub mod layout;
pub mod settings;

pub use files::FileStore;
pub use memory::MemoryStore;

use async_trait::async_trait;

use crate::errors::DeployerError;
use crate::models::{
    CreatedEntity, Deployment, DeploymentId, DeploymentLogEntry, DeploymentPatch,
    DeploymentStatus,
};

/// Page size used when a listing does not ask for one
pub const DEFAULT_PAGE_LIMIT: u32 = 50;

/// Largest page a listing can ask for
pub const MAX_PAGE_LIMIT: u32 = 200;

/// Filter criteria for listing deployments
#[derive(Debug, Clone, Default)]
pub struct DeploymentFilter {
    /// Exact client name
    pub client_name: Option<String>,
    pub status: Option<DeploymentStatus>,
    pub limit: Option<u32>,
    pub offset: Option<u32>,
}

impl DeploymentFilter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_client(mut self, client_name: impl Into<String>) -> Self {
        self.client_name = Some(client_name.into());
        self
    }

    pub fn with_status(mut self, status: DeploymentStatus) -> Self {
        self.status = Some(status);
        self
    }

    pub fn with_limit(mut self, limit: u32) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn with_offset(mut self, offset: u32) -> Self {
        self.offset = Some(offset);
        self
    }

    fn matches(&self, deployment: &Deployment) -> bool {
        if let Some(client_name) = &self.client_name {
            if &deployment.client_name != client_name {
                return false;
            }
        }
        if let Some(status) = self.status {
            if deployment.status != status {
                return false;
            }
        }
        true
    }

    /// Filter, order newest first and paginate
    pub(crate) fn paginate(&self, deployments: impl IntoIterator<Item = Deployment>) -> Page<Deployment> {
        let mut matching: Vec<Deployment> = deployments
            .into_iter()
            .filter(|d| self.matches(d))
            .collect();
        matching.sort_by(|a, b| b.created_at.cmp(&a.created_at));

        let limit = self.limit.unwrap_or(DEFAULT_PAGE_LIMIT).clamp(1, MAX_PAGE_LIMIT);
        let offset = self.offset.unwrap_or(0);
        let total = matching.len();
        let items = matching
            .into_iter()
            .skip(offset as usize)
            .take(limit as usize)
            .collect();

        Page {
            items,
            total,
            limit,
            offset,
        }
    }
}

/// A page of a listing
#[derive(Debug, Clone)]
pub struct Page<T> {
    pub items: Vec<T>,
    /// Number of matching items across all pages
    pub total: usize,
    pub limit: u32,
    pub offset: u32,
}

/// Durable record of deployments, keyed by deployment id
#[async_trait]
pub trait DeploymentStore: Send + Sync {
    /// Insert a new deployment, failing if the id already exists
    async fn create(&self, deployment: &Deployment) -> Result<(), DeployerError>;

    /// Apply a partial update and return the updated deployment
    async fn update(
        &self,
        id: &DeploymentId,
        patch: DeploymentPatch,
    ) -> Result<Deployment, DeployerError>;

    /// Append a created entity.
    ///
    /// Must be durable before it returns; the engine issues the next remote
    /// call only afterwards.
    async fn record_entity(
        &self,
        id: &DeploymentId,
        entity: CreatedEntity,
    ) -> Result<(), DeployerError>;

    /// Append a step log entry
    async fn append_log(
        &self,
        id: &DeploymentId,
        entry: DeploymentLogEntry,
    ) -> Result<(), DeployerError>;

    async fn get(&self, id: &DeploymentId) -> Result<Option<Deployment>, DeployerError>;

    /// Step log in insertion order
    async fn logs(&self, id: &DeploymentId) -> Result<Vec<DeploymentLogEntry>, DeployerError>;

    /// List deployments matching the filter, newest first
    async fn list(&self, filter: &DeploymentFilter) -> Result<Page<Deployment>, DeployerError>;
}

pub(crate) fn not_found(id: &DeploymentId) -> DeployerError {
    DeployerError::NotFound(format!("deployment {id}"))
}
