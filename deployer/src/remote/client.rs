//! HTTP implementation of the CRM surface

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use crm_api::{AccountDetails, BatchError, BatchInput};
use tracing::{debug, info};

use crate::authn::Credential;
use crate::dispatch::Dispatcher;
use crate::errors::RemoteError;
use crate::http::HttpClient;
use crate::models::configuration::{
    LifecycleStageSpec, ObjectType, PipelineSpec, PropertyGroupSpec, PropertySpec,
};

use super::{
    group_input, lifecycle_update, pipeline_input, property_input, Created, CrmApi, ItemResult,
};

/// CRM client funnelling every request through the shared dispatcher
#[derive(Debug, Clone)]
pub struct CrmClient {
    http: HttpClient,
    dispatcher: Arc<Dispatcher>,
}

impl CrmClient {
    pub fn new(http: HttpClient, dispatcher: Arc<Dispatcher>) -> Self {
        Self { http, dispatcher }
    }

    pub fn dispatcher(&self) -> &Arc<Dispatcher> {
        &self.dispatcher
    }

    /// ID of the pipeline carrying `label`, used to adopt a conflicting pipeline
    async fn find_pipeline_by_label(
        &self,
        credential: &Credential,
        object_type: ObjectType,
        label: &str,
    ) -> Result<Option<String>, RemoteError> {
        let pipelines = self
            .dispatcher
            .submit(credential.key(), || {
                self.http.list_pipelines(credential, object_type)
            })
            .await?;

        Ok(pipelines
            .into_iter()
            .find(|p| !p.archived && p.label == label)
            .map(|p| p.id))
    }
}

/// Treat `NotFound` as `false`
fn exists<T>(result: Result<T, RemoteError>) -> Result<bool, RemoteError> {
    match result {
        Ok(_) => Ok(true),
        Err(e) if e.is_not_found() => Ok(false),
        Err(e) => Err(e),
    }
}

#[async_trait]
impl CrmApi for CrmClient {
    async fn check_connectivity(
        &self,
        credential: &Credential,
    ) -> Result<AccountDetails, RemoteError> {
        self.dispatcher
            .submit(credential.key(), || self.http.get_account_details(credential))
            .await
    }

    async fn create_property_group(
        &self,
        credential: &Credential,
        group: &PropertyGroupSpec,
    ) -> Result<Created, RemoteError> {
        let input = group_input(group);
        let result = self
            .dispatcher
            .submit(credential.key(), || {
                self.http
                    .create_property_group(credential, group.object_type, &input)
            })
            .await;

        match result {
            Ok(created) => Ok(Created::new(created.name, created.label)),
            Err(RemoteError::Conflict(_)) => {
                debug!(object_type = %group.object_type, "Property group '{}' already exists", group.name);
                Ok(Created::existing(&group.name, &group.label))
            }
            Err(e) => Err(e),
        }
    }

    async fn delete_property_group(
        &self,
        credential: &Credential,
        object_type: ObjectType,
        name: &str,
    ) -> Result<(), RemoteError> {
        self.dispatcher
            .submit(credential.key(), || {
                self.http.delete_property_group(credential, object_type, name)
            })
            .await
    }

    async fn create_property(
        &self,
        credential: &Credential,
        property: &PropertySpec,
    ) -> Result<Created, RemoteError> {
        let input = property_input(property);
        let result = self
            .dispatcher
            .submit(credential.key(), || {
                self.http
                    .create_property(credential, property.object_type, &input)
            })
            .await;

        match result {
            Ok(created) => Ok(Created::new(created.name, created.label)),
            Err(RemoteError::Conflict(_)) => {
                debug!(object_type = %property.object_type, "Property '{}' already exists", property.name);
                Ok(Created::existing(&property.name, &property.label))
            }
            Err(e) => Err(e),
        }
    }

    async fn create_properties_batch(
        &self,
        credential: &Credential,
        object_type: ObjectType,
        properties: &[PropertySpec],
    ) -> Result<Vec<ItemResult>, RemoteError> {
        if properties.is_empty() {
            return Ok(Vec::new());
        }

        let inputs = BatchInput {
            inputs: properties.iter().map(property_input).collect(),
        };
        let response = self
            .dispatcher
            .submit(credential.key(), || {
                self.http
                    .create_properties_batch(credential, object_type, &inputs)
            })
            .await?;

        let created: HashMap<String, String> = response
            .results
            .into_iter()
            .map(|p| (p.name, p.label))
            .collect();

        let mut errors: HashMap<String, &BatchError> = HashMap::new();
        for error in &response.errors {
            for name in error.input_names() {
                errors.insert(name, error);
            }
        }

        let results = properties
            .iter()
            .map(|property| {
                let name = property.name.clone();
                let result = match (created.get(&name), errors.get(&name)) {
                    (Some(label), _) => Ok(Created::new(&name, label)),
                    (None, Some(error)) if error.is_conflict() => {
                        Ok(Created::existing(&name, &property.label))
                    }
                    (None, Some(error)) => Err(RemoteError::Validation(error.message.clone())),
                    (None, None) => Err(RemoteError::Validation(
                        "no result returned for this input".to_string(),
                    )),
                };
                ItemResult { name, result }
            })
            .collect();

        Ok(results)
    }

    async fn property_exists(
        &self,
        credential: &Credential,
        object_type: ObjectType,
        name: &str,
    ) -> Result<bool, RemoteError> {
        exists(
            self.dispatcher
                .submit(credential.key(), || {
                    self.http.get_property(credential, object_type, name)
                })
                .await,
        )
    }

    async fn delete_property(
        &self,
        credential: &Credential,
        object_type: ObjectType,
        name: &str,
    ) -> Result<(), RemoteError> {
        self.dispatcher
            .submit(credential.key(), || {
                self.http.delete_property(credential, object_type, name)
            })
            .await
    }

    async fn create_pipeline(
        &self,
        credential: &Credential,
        pipeline: &PipelineSpec,
    ) -> Result<Created, RemoteError> {
        let input = pipeline_input(pipeline);
        let result = self
            .dispatcher
            .submit(credential.key(), || {
                self.http
                    .create_pipeline(credential, pipeline.object_type, &input)
            })
            .await;

        match result {
            Ok(created) => Ok(Created::new(created.id, created.label)),
            Err(RemoteError::Conflict(message)) => {
                match self
                    .find_pipeline_by_label(credential, pipeline.object_type, &pipeline.label)
                    .await?
                {
                    Some(id) => {
                        info!(object_type = %pipeline.object_type, "Adopting existing pipeline '{}' ({})", pipeline.label, id);
                        Ok(Created::existing(id, &pipeline.label))
                    }
                    None => Err(RemoteError::Validation(format!(
                        "pipeline '{}' conflicts but no pipeline with that label exists: {}",
                        pipeline.label, message
                    ))),
                }
            }
            Err(e) => Err(e),
        }
    }

    async fn delete_pipeline(
        &self,
        credential: &Credential,
        object_type: ObjectType,
        pipeline_id: &str,
    ) -> Result<(), RemoteError> {
        self.dispatcher
            .submit(credential.key(), || {
                self.http.delete_pipeline(credential, object_type, pipeline_id)
            })
            .await
    }

    async fn update_lifecycle_stages(
        &self,
        credential: &Credential,
        stages: &[LifecycleStageSpec],
    ) -> Result<(), RemoteError> {
        let update = lifecycle_update(stages);
        self.dispatcher
            .submit(credential.key(), || {
                self.http.update_lifecycle_stages(credential, &update)
            })
            .await
            .map(|_| ())
    }
}
