//! Typed surface of the remote CRM used by the deployment engine.
//!
//! [`CrmApi`] is the seam between orchestration and transport. [`CrmClient`]
//! implements it over HTTP through the shared dispatcher, [`FakeCrm`] keeps
//! everything in memory for tests and dry runs.

pub mod batch;
pub mod client;
pub mod fake;

pub use client::CrmClient;
pub use fake::FakeCrm;

use std::collections::BTreeMap;

use async_trait::async_trait;
use crm_api::{
    AccountDetails, OptionInput, PipelineInput, PropertyGroupInput, PropertyInput,
    PropertyOptionsUpdate, StageInput,
};

use crate::authn::Credential;
use crate::errors::RemoteError;
use crate::models::configuration::{
    LifecycleStageSpec, ObjectType, PipelineSpec, PropertyGroupSpec, PropertySpec,
};

/// A remote entity the caller can now rely on
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Created {
    /// Name for groups and properties, ID for pipelines
    pub remote_id: String,

    /// Human readable name
    pub name: String,

    /// The entity already existed and was adopted
    pub existed: bool,
}

impl Created {
    pub fn new(remote_id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            remote_id: remote_id.into(),
            name: name.into(),
            existed: false,
        }
    }

    pub fn existing(remote_id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            existed: true,
            ..Self::new(remote_id, name)
        }
    }
}

/// Result of one input of a batch request
#[derive(Debug, Clone, PartialEq)]
pub struct ItemResult {
    /// Internal name of the input
    pub name: String,
    pub result: Result<Created, RemoteError>,
}

/// Operations the engine performs against the CRM.
///
/// Conflicts on create are absorbed by implementations and reported as
/// [`Created::existing`]; they never surface as errors.
#[async_trait]
pub trait CrmApi: Send + Sync {
    /// Cheap authenticated read used to verify the credential
    async fn check_connectivity(&self, credential: &Credential)
        -> Result<AccountDetails, RemoteError>;

    async fn create_property_group(
        &self,
        credential: &Credential,
        group: &PropertyGroupSpec,
    ) -> Result<Created, RemoteError>;

    async fn delete_property_group(
        &self,
        credential: &Credential,
        object_type: ObjectType,
        name: &str,
    ) -> Result<(), RemoteError>;

    async fn create_property(
        &self,
        credential: &Credential,
        property: &PropertySpec,
    ) -> Result<Created, RemoteError>;

    /// Create several properties of one object type in a single request.
    ///
    /// A request-level failure is returned as `Err`; inputs the CRM refused
    /// individually are reported per item.
    async fn create_properties_batch(
        &self,
        credential: &Credential,
        object_type: ObjectType,
        properties: &[PropertySpec],
    ) -> Result<Vec<ItemResult>, RemoteError>;

    async fn property_exists(
        &self,
        credential: &Credential,
        object_type: ObjectType,
        name: &str,
    ) -> Result<bool, RemoteError>;

    async fn delete_property(
        &self,
        credential: &Credential,
        object_type: ObjectType,
        name: &str,
    ) -> Result<(), RemoteError>;

    async fn create_pipeline(
        &self,
        credential: &Credential,
        pipeline: &PipelineSpec,
    ) -> Result<Created, RemoteError>;

    async fn delete_pipeline(
        &self,
        credential: &Credential,
        object_type: ObjectType,
        pipeline_id: &str,
    ) -> Result<(), RemoteError>;

    /// Replace the option list of the contact lifecycle stage property
    async fn update_lifecycle_stages(
        &self,
        credential: &Credential,
        stages: &[LifecycleStageSpec],
    ) -> Result<(), RemoteError>;
}

// ============================== WIRE CONVERSION ================================ //

pub(crate) fn group_input(group: &PropertyGroupSpec) -> PropertyGroupInput {
    PropertyGroupInput {
        name: group.name.clone(),
        label: group.label.clone(),
        display_order: group.display_order,
    }
}

pub(crate) fn property_input(property: &PropertySpec) -> PropertyInput {
    PropertyInput {
        name: property.name.clone(),
        label: property.label.clone(),
        property_type: property.property_type.as_str().to_string(),
        field_type: property.field_type.as_str().to_string(),
        group_name: property.effective_group().to_string(),
        description: property.description.clone(),
        options: property
            .options
            .iter()
            .map(|o| OptionInput {
                label: o.label.clone(),
                value: o.value.clone(),
                display_order: o.display_order,
                hidden: o.hidden,
            })
            .collect(),
        form_field: property.form_field,
    }
}

/// Pipeline request with the stage metadata the CRM requires filled in.
///
/// Deal stages without a `probability` get one proportional to their
/// position; ticket stages without a `ticketState` are `OPEN` except the last,
/// which is `CLOSED`.
pub(crate) fn pipeline_input(pipeline: &PipelineSpec) -> PipelineInput {
    let count = pipeline.stages.len();
    let stages = pipeline
        .stages
        .iter()
        .enumerate()
        .map(|(idx, stage)| {
            let mut metadata: BTreeMap<String, String> = stage.metadata.clone();
            let is_last = idx + 1 == count;
            match pipeline.object_type {
                ObjectType::Deals => {
                    metadata.entry("probability".to_string()).or_insert_with(|| {
                        format!("{:.1}", (idx + 1) as f64 / count as f64)
                    });
                }
                ObjectType::Tickets => {
                    let state = if is_last { "CLOSED" } else { "OPEN" };
                    metadata
                        .entry("ticketState".to_string())
                        .or_insert_with(|| state.to_string());
                }
                _ => {}
            }
            StageInput {
                label: stage.label.clone(),
                display_order: stage.display_order,
                metadata,
            }
        })
        .collect();

    PipelineInput {
        label: pipeline.label.clone(),
        display_order: pipeline.display_order,
        stages,
    }
}

pub(crate) fn lifecycle_update(stages: &[LifecycleStageSpec]) -> PropertyOptionsUpdate {
    PropertyOptionsUpdate {
        options: stages
            .iter()
            .map(|s| OptionInput {
                label: s.label.clone(),
                value: s.value.clone(),
                display_order: s.display_order,
                hidden: false,
            })
            .collect(),
    }
}
