//! Deployment orchestration.
//!
//! A deployment runs as a detached task: admission happens synchronously and
//! hands back the stored record, the phases then run groups, properties,
//! pipelines and lifecycle stages in that order. Every remote entity is
//! recorded in the store before the next remote call goes out, so a failed
//! run can always be rolled back from the persisted record.

use std::collections::HashSet;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Instant;

use async_trait::async_trait;
use chrono::Utc;
use deploy_api::SubmitDeploymentRequest;
use tracing::{error, info, info_span, warn, Instrument};

use crate::authn::Credential;
use crate::errors::DeployerError;
use crate::models::configuration::{
    pipelines_by_object, properties_by_object, validate_configuration, ObjectType, PropertySpec,
};
use crate::models::{
    CreatedEntity, Deployment, DeploymentConfiguration, DeploymentId, DeploymentLogEntry,
    DeploymentPatch, EntityType, ErrorDetail, LogStatus, Progress,
};
use crate::remote::batch::{
    create_chunk, BatchCounter, BatchMode, BatchProgress, ItemOutcome, ItemSink,
};
use crate::remote::{Created, CrmApi};
use crate::storage::{not_found, DeploymentStore};
use crate::templates::TemplateStore;

use super::events::{EventHub, EventKind, ProgressEvent};
use super::fsm::{DeploymentEvent, DeploymentFsm};
use super::rollback::RollbackController;
use super::steps::{chunk_step, group_step, pipeline_step, total_steps, Phase};

/// Engine options
#[derive(Debug, Clone)]
pub struct EngineOptions {
    /// How property chunks are sent to the CRM
    pub batch_mode: BatchMode,

    /// Roll back automatically when a run fails after creating something
    pub auto_rollback: bool,
}

impl Default for EngineOptions {
    fn default() -> Self {
        Self {
            batch_mode: BatchMode::default(),
            auto_rollback: true,
        }
    }
}

/// A deployment request as received from an operator
#[derive(Debug, Clone, Default)]
pub struct SubmitRequest {
    pub client_name: String,
    pub access_token: String,
    pub template_id: Option<String>,
    pub configuration: Option<DeploymentConfiguration>,
}

impl From<SubmitDeploymentRequest> for SubmitRequest {
    fn from(req: SubmitDeploymentRequest) -> Self {
        Self {
            client_name: req.client_name,
            access_token: req.access_token,
            template_id: req.template_id,
            configuration: req.configuration,
        }
    }
}

/// Drives deployments against the CRM
#[derive(Clone)]
pub struct DeploymentEngine {
    api: Arc<dyn CrmApi>,
    store: Arc<dyn DeploymentStore>,
    templates: Arc<dyn TemplateStore>,
    hub: EventHub,
    options: EngineOptions,
    running: Arc<Mutex<HashSet<DeploymentId>>>,
}

impl DeploymentEngine {
    pub fn new(
        api: Arc<dyn CrmApi>,
        store: Arc<dyn DeploymentStore>,
        templates: Arc<dyn TemplateStore>,
        hub: EventHub,
        options: EngineOptions,
    ) -> Self {
        Self {
            api,
            store,
            templates,
            hub,
            options,
            running: Arc::new(Mutex::new(HashSet::new())),
        }
    }

    pub fn store(&self) -> &Arc<dyn DeploymentStore> {
        &self.store
    }

    pub fn hub(&self) -> &EventHub {
        &self.hub
    }

    /// Whether a run or rollback task is active for the deployment
    pub fn is_running(&self, id: &DeploymentId) -> bool {
        self.running
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .contains(id)
    }

    /// Admit a deployment and start it in the background.
    ///
    /// Returns as soon as the pending record is stored. The run itself is
    /// detached and outlives the caller and any observer.
    pub async fn submit(&self, request: SubmitRequest) -> Result<Deployment, DeployerError> {
        let (deployment, credential) = self.admit(request).await?;

        let engine = self.clone();
        let id = deployment.id;
        let span = info_span!(
            "deployment",
            deployment_id = %id,
            credential = %credential.key()
        );
        tokio::spawn(
            async move {
                if let Err(e) = engine.execute(id, credential).await {
                    error!("deployment run aborted: {e}");
                }
            }
            .instrument(span),
        );

        Ok(deployment)
    }

    /// Validate a request and persist the pending deployment.
    ///
    /// Nothing is sent to the CRM here; every error is an admission error.
    pub async fn admit(
        &self,
        request: SubmitRequest,
    ) -> Result<(Deployment, Credential), DeployerError> {
        let client_name = request.client_name.trim();
        if client_name.is_empty() {
            return Err(DeployerError::ConfigurationInvalid(
                "client name is required".to_string(),
            ));
        }
        let credential = Credential::new(request.access_token)?;

        let template_id = request.template_id.filter(|t| !t.trim().is_empty());
        let configuration = match (template_id.as_deref(), request.configuration) {
            (Some(_), Some(_)) => {
                return Err(DeployerError::ConfigurationInvalid(
                    "give either a template id or an inline configuration, not both".to_string(),
                ))
            }
            (None, None) => {
                return Err(DeployerError::ConfigurationInvalid(
                    "a template id or an inline configuration is required".to_string(),
                ))
            }
            (None, Some(configuration)) => configuration,
            (Some(template_id), None) => self
                .templates
                .get(template_id)
                .await?
                .ok_or_else(|| {
                    DeployerError::ConfigurationInvalid(format!(
                        "template '{template_id}' does not exist"
                    ))
                })?
                .configuration,
        };
        validate_configuration(&configuration)?;

        let total = total_steps(&configuration, self.options.batch_mode);
        let mut deployment = Deployment::new(
            client_name,
            template_id,
            configuration,
            credential.key().clone(),
        );
        deployment.progress = Progress::new(total);

        self.store.create(&deployment).await?;
        self.store
            .append_log(
                &deployment.id,
                DeploymentLogEntry::new(
                    "admission",
                    LogStatus::Completed,
                    Some(format!("{total} steps")),
                ),
            )
            .await?;
        info!(
            deployment_id = %deployment.id,
            credential = %credential.key(),
            client = %deployment.client_name,
            total_steps = total,
            "deployment admitted"
        );

        Ok((deployment, credential))
    }

    /// Run an admitted deployment to a terminal state
    pub async fn execute(
        &self,
        id: DeploymentId,
        credential: Credential,
    ) -> Result<Deployment, DeployerError> {
        let _running = RunningGuard::acquire(&self.running, id)?;
        let deployment = self.store.get(&id).await?.ok_or_else(|| not_found(&id))?;

        let mut run = Run {
            engine: self,
            id,
            fsm: DeploymentFsm::from_status(deployment.status),
            progress: deployment.progress.clone(),
            configuration: deployment.configuration,
            template_id: deployment.template_id,
            credential,
            started: Instant::now(),
            recorded: 0,
        };

        match run.phases().await {
            Ok(()) => run.complete().await,
            Err(failure) => run.fail(failure).await,
        }
    }

    /// Roll back a failed deployment on an operator's request
    pub async fn rollback(
        &self,
        id: DeploymentId,
        access_token: String,
    ) -> Result<Deployment, DeployerError> {
        let credential = Credential::new(access_token)?;
        let _running = RunningGuard::acquire(&self.running, id)?;
        self.controller().run(&id, &credential).await
    }

    fn controller(&self) -> RollbackController<'_> {
        RollbackController {
            api: self.api.as_ref(),
            store: self.store.as_ref(),
            hub: &self.hub,
        }
    }
}

/// Marks a deployment as owned by one task
struct RunningGuard {
    running: Arc<Mutex<HashSet<DeploymentId>>>,
    id: DeploymentId,
}

impl RunningGuard {
    fn acquire(
        running: &Arc<Mutex<HashSet<DeploymentId>>>,
        id: DeploymentId,
    ) -> Result<Self, DeployerError> {
        let inserted = running
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(id);
        if !inserted {
            return Err(DeployerError::InvalidTransition {
                from: "running".to_string(),
                to: "running".to_string(),
            });
        }
        Ok(Self {
            running: running.clone(),
            id,
        })
    }
}

impl Drop for RunningGuard {
    fn drop(&mut self) {
        self.running
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&self.id);
    }
}

/// Why a run stopped
#[derive(Debug)]
struct PhaseFailure {
    phase: Phase,
    error: DeployerError,
}

trait InPhase<T> {
    fn in_phase(self, phase: Phase) -> Result<T, PhaseFailure>;
}

impl<T, E: Into<DeployerError>> InPhase<T> for Result<T, E> {
    fn in_phase(self, phase: Phase) -> Result<T, PhaseFailure> {
        self.map_err(|e| PhaseFailure {
            phase,
            error: e.into(),
        })
    }
}

/// State of one deployment run
struct Run<'a> {
    engine: &'a DeploymentEngine,
    id: DeploymentId,
    fsm: DeploymentFsm,
    progress: Progress,
    configuration: DeploymentConfiguration,
    template_id: Option<String>,
    credential: Credential,
    started: Instant,
    recorded: usize,
}

impl Run<'_> {
    fn store(&self) -> &dyn DeploymentStore {
        self.engine.store.as_ref()
    }

    fn api(&self) -> &dyn CrmApi {
        self.engine.api.as_ref()
    }

    fn publish(&self, kind: EventKind, detail: Option<String>) {
        self.engine
            .hub
            .publish(ProgressEvent::new(self.id, kind, &self.progress, detail));
    }

    async fn log(
        &self,
        step: &str,
        status: LogStatus,
        detail: Option<String>,
    ) -> Result<(), DeployerError> {
        self.store()
            .append_log(&self.id, DeploymentLogEntry::new(step, status, detail))
            .await
    }

    async fn step_started(&mut self, step: String) -> Result<(), DeployerError> {
        self.log(&step, LogStatus::Started, None).await?;
        self.progress.current_step = Some(step.clone());
        self.publish(EventKind::StepStarted, Some(step));
        Ok(())
    }

    /// Count a finished step, persist and publish the new progress
    async fn step_done(&mut self, detail: Option<String>) -> Result<(), DeployerError> {
        let step = self.progress.current_step.clone().unwrap_or_default();
        self.log(&step, LogStatus::Completed, detail.clone()).await?;
        self.progress.advance();
        self.store()
            .update(&self.id, DeploymentPatch::progress(self.progress.clone()))
            .await?;
        self.publish(EventKind::Progress, detail);
        Ok(())
    }

    async fn record(
        &mut self,
        entity_type: EntityType,
        object_type: ObjectType,
        created: &Created,
    ) -> Result<(), DeployerError> {
        self.store()
            .record_entity(&self.id, entity(entity_type, object_type, created))
            .await?;
        self.recorded += 1;
        Ok(())
    }

    async fn phases(&mut self) -> Result<(), PhaseFailure> {
        self.check_connectivity().await?;

        let status = self.fsm.process(DeploymentEvent::Start).in_phase(Phase::Connectivity)?;
        let patch = DeploymentPatch {
            status: Some(status),
            progress: Some(self.progress.clone()),
            started_at: Some(Utc::now()),
            ..Default::default()
        };
        self.store().update(&self.id, patch).await.in_phase(Phase::Connectivity)?;
        self.publish(EventKind::Started, None);

        self.create_groups().await.in_phase(Phase::PropertyGroups)?;
        self.create_properties().await.in_phase(Phase::Properties)?;
        self.create_pipelines().await.in_phase(Phase::Pipelines)?;
        self.update_lifecycle_stages()
            .await
            .in_phase(Phase::LifecycleStages)?;
        Ok(())
    }

    async fn check_connectivity(&mut self) -> Result<(), PhaseFailure> {
        let step = Phase::Connectivity.as_str();
        self.log(step, LogStatus::Started, None)
            .await
            .in_phase(Phase::Connectivity)?;

        let account = self
            .api()
            .check_connectivity(&self.credential)
            .await
            .in_phase(Phase::Connectivity)?;

        info!(portal_id = account.portal_id, "credential verified");
        self.log(
            step,
            LogStatus::Completed,
            Some(format!("portal {}", account.portal_id)),
        )
        .await
        .in_phase(Phase::Connectivity)
    }

    async fn create_groups(&mut self) -> Result<(), DeployerError> {
        let groups = self.configuration.property_groups.clone();
        for group in &groups {
            self.step_started(group_step(&group.name)).await?;
            let created = self
                .api()
                .create_property_group(&self.credential, group)
                .await?;
            self.record(EntityType::PropertyGroup, group.object_type, &created)
                .await?;
            self.step_done(existed_detail(&created)).await?;
        }
        Ok(())
    }

    async fn create_properties(&mut self) -> Result<(), DeployerError> {
        let mode = self.engine.options.batch_mode;
        for (object_type, properties) in properties_by_object(&self.configuration) {
            let chunks = mode.chunk_count(properties.len());
            let mut counter = BatchCounter::new(properties.len());

            for (idx, chunk) in properties.chunks(mode.chunk_size()).enumerate() {
                self.step_started(chunk_step(object_type, idx, chunks)).await?;

                let mut sink = RecordingSink {
                    store: self.engine.store.as_ref(),
                    hub: &self.engine.hub,
                    id: self.id,
                    object_type,
                    progress: self.progress.clone(),
                    recorded: 0,
                };
                let result = create_chunk(
                    self.engine.api.as_ref(),
                    &self.credential,
                    object_type,
                    chunk,
                    mode,
                    &mut counter,
                    &mut sink,
                )
                .await;
                self.recorded += sink.recorded;

                let outcomes = result.map_err(|abort| abort.error)?;
                let rejected = outcomes
                    .iter()
                    .filter(|o| o.created().is_none())
                    .count();
                let detail = format!(
                    "{} created, {rejected} rejected",
                    outcomes.len() - rejected
                );
                self.step_done(Some(detail)).await?;
            }
        }
        Ok(())
    }

    async fn create_pipelines(&mut self) -> Result<(), DeployerError> {
        for (object_type, pipelines) in pipelines_by_object(&self.configuration) {
            for pipeline in &pipelines {
                self.step_started(pipeline_step(object_type, &pipeline.label))
                    .await?;
                let created = self
                    .api()
                    .create_pipeline(&self.credential, pipeline)
                    .await?;
                self.record(EntityType::Pipeline, object_type, &created)
                    .await?;
                self.step_done(existed_detail(&created)).await?;
            }
        }
        Ok(())
    }

    /// Failures here only produce a warning, the phase is not critical
    async fn update_lifecycle_stages(&mut self) -> Result<(), DeployerError> {
        if self.configuration.lifecycle_stages.is_empty() {
            return Ok(());
        }
        let phase = Phase::LifecycleStages;
        self.step_started(phase.to_string()).await?;

        let result = self
            .api()
            .update_lifecycle_stages(&self.credential, &self.configuration.lifecycle_stages)
            .await;
        match result {
            Ok(()) => self.step_done(None).await,
            Err(e) if phase.is_critical() => Err(e.into()),
            Err(e) => {
                warn!(phase = %phase, "lifecycle stages not updated: {e}");
                let step = phase.as_str();
                self.log(step, LogStatus::Failed, Some(e.to_string())).await?;
                self.publish(EventKind::Warning, Some(e.to_string()));
                self.progress.advance();
                self.store()
                    .update(&self.id, DeploymentPatch::progress(self.progress.clone()))
                    .await?;
                self.publish(EventKind::Progress, None);
                Ok(())
            }
        }
    }

    async fn complete(mut self) -> Result<Deployment, DeployerError> {
        let status = self.fsm.process(DeploymentEvent::Complete)?;
        self.progress.current_step = None;
        let patch = DeploymentPatch {
            status: Some(status),
            progress: Some(self.progress.clone()),
            error_detail: Some(None),
            completed_at: Some(Utc::now()),
            execution_time_millis: Some(self.elapsed_millis()),
            ..Default::default()
        };
        let deployment = self.store().update(&self.id, patch).await?;

        if let Some(template_id) = &self.template_id {
            if let Err(e) = self.engine.templates.increment_usage(template_id).await {
                warn!(template_id = %template_id, "template usage not counted: {e}");
            }
        }

        self.log("deployment", LogStatus::Completed, None).await?;
        self.engine.hub.publish(
            ProgressEvent::new(self.id, EventKind::Completed, &self.progress, None).finished(),
        );
        info!(
            entities = deployment.created_entities.len(),
            millis = deployment.execution_time_millis,
            "deployment completed"
        );
        Ok(deployment)
    }

    async fn fail(mut self, failure: PhaseFailure) -> Result<Deployment, DeployerError> {
        let PhaseFailure { phase, error } = failure;
        error!(phase = %phase, "deployment failed: {error}");

        let status = self.fsm.process(DeploymentEvent::Fail(error.to_string()))?;
        let detail = ErrorDetail::new(error.kind(), error.to_string()).in_phase(phase.as_str());
        let patch = DeploymentPatch {
            status: Some(status),
            progress: Some(self.progress.clone()),
            completed_at: Some(Utc::now()),
            execution_time_millis: Some(self.elapsed_millis()),
            ..Default::default()
        }
        .with_error(detail);
        let deployment = self.store().update(&self.id, patch).await?;

        let step = self
            .progress
            .current_step
            .clone()
            .unwrap_or_else(|| phase.to_string());
        self.log(&step, LogStatus::Failed, Some(error.to_string()))
            .await?;
        let rolls_back =
            self.engine.options.auto_rollback && !deployment.created_entities.is_empty();
        let event = ProgressEvent::new(
            self.id,
            EventKind::Failed,
            &self.progress,
            Some(error.to_string()),
        );
        self.engine
            .hub
            .publish(if rolls_back { event } else { event.finished() });

        if !rolls_back {
            return Ok(deployment);
        }
        self.engine
            .controller()
            .run(&self.id, &self.credential)
            .await
    }

    fn elapsed_millis(&self) -> u64 {
        u64::try_from(self.started.elapsed().as_millis()).unwrap_or(u64::MAX)
    }
}

/// Records created properties and publishes per-item progress
struct RecordingSink<'a> {
    store: &'a dyn DeploymentStore,
    hub: &'a EventHub,
    id: DeploymentId,
    object_type: ObjectType,
    progress: Progress,
    recorded: usize,
}

#[async_trait]
impl ItemSink for RecordingSink<'_> {
    async fn item_done(
        &mut self,
        property: &PropertySpec,
        outcome: &ItemOutcome,
        progress: BatchProgress,
    ) -> Result<(), DeployerError> {
        let items = format!(
            "{}: {}/{} properties ({}%)",
            self.object_type, progress.completed, progress.total, progress.percentage
        );

        match outcome {
            ItemOutcome::Created(created) | ItemOutcome::Existing(created) => {
                self.store
                    .record_entity(
                        &self.id,
                        entity(EntityType::Property, self.object_type, created),
                    )
                    .await?;
                self.recorded += 1;
            }
            ItemOutcome::Rejected { reason, kind, .. } => {
                let detail = format!("{kind}: {reason}");
                self.store
                    .append_log(
                        &self.id,
                        DeploymentLogEntry::new(
                            format!("property:{}", property.name),
                            LogStatus::Failed,
                            Some(detail.clone()),
                        ),
                    )
                    .await?;
                self.hub.publish(ProgressEvent::new(
                    self.id,
                    EventKind::ItemFailed,
                    &self.progress,
                    Some(format!("{}: {detail}", property.name)),
                ));
            }
        }

        self.hub.publish(ProgressEvent::new(
            self.id,
            EventKind::Progress,
            &self.progress,
            Some(items),
        ));
        Ok(())
    }
}

fn entity(entity_type: EntityType, object_type: ObjectType, created: &Created) -> CreatedEntity {
    CreatedEntity {
        entity_type,
        object_type,
        remote_id: created.remote_id.clone(),
        display_name: created.name.clone(),
        existed: created.existed,
        recorded_at: Utc::now(),
    }
}

fn existed_detail(created: &Created) -> Option<String> {
    created
        .existed
        .then(|| format!("'{}' already existed, adopted", created.name))
}
