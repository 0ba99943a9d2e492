//! Startup recovery of interrupted deployments

use chrono::Utc;
use tracing::{info, warn};

use crate::errors::{DeployerError, ErrorKind};
use crate::models::{
    Deployment, DeploymentLogEntry, DeploymentPatch, DeploymentStatus, ErrorDetail, LogStatus,
};
use crate::storage::{DeploymentFilter, DeploymentStore, MAX_PAGE_LIMIT};

/// Message stored on deployments cut short by a restart
pub const INTERRUPTED_MESSAGE: &str = "interrupted by restart";

/// Recovery worker options
#[derive(Debug, Clone)]
pub struct Options {
    /// Deployments fetched per listing call
    pub page_size: u32,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            page_size: MAX_PAGE_LIMIT,
        }
    }
}

/// Mark deployments left `pending` or `in_progress` by a previous process as
/// failed, so that they can be rolled back manually. Returns how many were
/// marked.
pub async fn run(options: &Options, store: &dyn DeploymentStore) -> Result<usize, DeployerError> {
    info!("Recovery worker starting...");

    let mut interrupted = Vec::new();
    for status in [DeploymentStatus::Pending, DeploymentStatus::InProgress] {
        interrupted.extend(list_all(options, store, status).await?);
    }

    for deployment in &interrupted {
        warn!(
            deployment_id = %deployment.id,
            status = %deployment.status,
            entities = deployment.created_entities.len(),
            "marking interrupted deployment as failed"
        );
        let detail = ErrorDetail::new(ErrorKind::Internal, INTERRUPTED_MESSAGE)
            .in_phase(deployment.progress.current_step.clone().unwrap_or_default());
        let patch = DeploymentPatch {
            status: Some(DeploymentStatus::Failed),
            completed_at: Some(Utc::now()),
            ..Default::default()
        }
        .with_error(detail);
        store.update(&deployment.id, patch).await?;
        store
            .append_log(
                &deployment.id,
                DeploymentLogEntry::new(
                    "recovery",
                    LogStatus::Failed,
                    Some(INTERRUPTED_MESSAGE.to_string()),
                ),
            )
            .await?;
    }

    info!(recovered = interrupted.len(), "Recovery worker finished");
    Ok(interrupted.len())
}

async fn list_all(
    options: &Options,
    store: &dyn DeploymentStore,
    status: DeploymentStatus,
) -> Result<Vec<Deployment>, DeployerError> {
    // collect first, updating while paging would shift the pages
    let mut all = Vec::new();
    let mut offset = 0;
    loop {
        let filter = DeploymentFilter::new()
            .with_status(status)
            .with_limit(options.page_size)
            .with_offset(offset);
        let page = store.list(&filter).await?;
        let fetched = page.items.len();
        all.extend(page.items);
        offset += fetched as u32;
        if fetched == 0 || all.len() >= page.total {
            return Ok(all);
        }
    }
}
