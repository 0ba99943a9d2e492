//! Compensating rollback

use tracing::{info, warn};

use crate::authn::Credential;
use crate::errors::{DeployerError, ErrorKind, RemoteError};
use crate::models::{
    CreatedEntity, Deployment, DeploymentId, DeploymentLogEntry, DeploymentPatch,
    DeploymentStatus, EntityType, ErrorDetail, LogStatus, RollbackOutcome,
};
use crate::remote::CrmApi;
use crate::storage::{not_found, DeploymentStore};

use super::events::{EventHub, EventKind, ProgressEvent};
use super::fsm::{DeploymentEvent, DeploymentFsm};

const ROLLBACK_STEP: &str = "rollback";

/// Deletes everything a failed deployment created, most recent first
pub struct RollbackController<'a> {
    pub api: &'a dyn CrmApi,
    pub store: &'a dyn DeploymentStore,
    pub hub: &'a EventHub,
}

impl RollbackController<'_> {
    /// Roll back a failed deployment.
    ///
    /// Safe to repeat: a deployment that is already rolled back is returned
    /// unchanged, and entities that are gone remotely count as rolled back.
    pub async fn run(
        &self,
        id: &DeploymentId,
        credential: &Credential,
    ) -> Result<Deployment, DeployerError> {
        let deployment = self.store.get(id).await?.ok_or_else(|| not_found(id))?;

        if deployment.status == DeploymentStatus::RolledBack {
            info!(deployment_id = %id, "deployment already rolled back");
            return Ok(deployment);
        }

        let mut fsm = DeploymentFsm::from_status(deployment.status);
        if !fsm.can_roll_back() {
            return Err(DeployerError::InvalidTransition {
                from: deployment.status.to_string(),
                to: DeploymentStatus::RolledBack.to_string(),
            });
        }

        if credential.key() != &deployment.credential_fingerprint {
            return Err(DeployerError::CredentialInvalid(
                "credential does not match the one this deployment used".to_string(),
            ));
        }

        let entities = &deployment.created_entities;
        info!(
            deployment_id = %id,
            credential = %credential.key(),
            entities = entities.len(),
            "rolling back deployment"
        );
        self.store
            .append_log(
                id,
                DeploymentLogEntry::new(
                    ROLLBACK_STEP,
                    LogStatus::Started,
                    Some(format!("{} entities to delete", entities.len())),
                ),
            )
            .await?;
        self.hub.publish(ProgressEvent::new(
            *id,
            EventKind::RollbackStarted,
            &deployment.progress,
            None,
        ));

        let mut outcome = RollbackOutcome::default();
        for entity in entities.iter().rev() {
            outcome.attempted += 1;
            match self.delete(credential, entity).await {
                Ok(()) => outcome.succeeded += 1,
                Err(e) if e.is_not_found() => outcome.succeeded += 1,
                Err(e) => {
                    warn!(
                        deployment_id = %id,
                        entity_type = %entity.entity_type,
                        object_type = %entity.object_type,
                        remote_id = %entity.remote_id,
                        "rollback delete failed: {e}"
                    );
                    self.store
                        .append_log(
                            id,
                            DeploymentLogEntry::new(
                                format!("{ROLLBACK_STEP}:{}", entity.display_name),
                                LogStatus::Failed,
                                Some(e.to_string()),
                            ),
                        )
                        .await?;
                    outcome.failed.push(entity.clone());
                }
            }
        }

        let mut detail = deployment.error_detail.clone().unwrap_or_else(|| {
            ErrorDetail::new(ErrorKind::Internal, "rolled back on request")
        });
        detail.rollback = Some(outcome.clone());

        let status = fsm.process(DeploymentEvent::RolledBack)?;
        let patch = DeploymentPatch {
            status: Some(status),
            created_entities: Some(Vec::new()),
            ..Default::default()
        }
        .with_error(detail);
        let updated = self.store.update(id, patch).await?;

        let summary = format!(
            "{} of {} entities deleted",
            outcome.succeeded, outcome.attempted
        );
        self.store
            .append_log(
                id,
                DeploymentLogEntry::new(ROLLBACK_STEP, LogStatus::Completed, Some(summary.clone())),
            )
            .await?;
        self.hub.publish(ProgressEvent::new(
            *id,
            EventKind::RolledBack,
            &updated.progress,
            Some(summary),
        )
        .finished());
        info!(
            deployment_id = %id,
            attempted = outcome.attempted,
            succeeded = outcome.succeeded,
            "rollback finished"
        );

        Ok(updated)
    }

    async fn delete(
        &self,
        credential: &Credential,
        entity: &CreatedEntity,
    ) -> Result<(), RemoteError> {
        match entity.entity_type {
            EntityType::PropertyGroup => {
                self.api
                    .delete_property_group(credential, entity.object_type, &entity.remote_id)
                    .await
            }
            EntityType::Property => {
                self.api
                    .delete_property(credential, entity.object_type, &entity.remote_id)
                    .await
            }
            EntityType::Pipeline => {
                self.api
                    .delete_pipeline(credential, entity.object_type, &entity.remote_id)
                    .await
            }
        }
    }
}
