//! In-memory CRM.
//!
//! Behaves like the real CRM for everything the engine relies on: names are
//! unique per object type, creating an existing entity is a conflict that
//! gets adopted, deleting a missing entity is `NotFound`. Failures can be
//! scripted per operation and per item, and every call is counted.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use crm_api::AccountDetails;

use crate::authn::Credential;
use crate::errors::RemoteError;
use crate::models::configuration::{
    LifecycleStageSpec, ObjectType, PipelineSpec, PropertyGroupSpec, PropertySpec,
};

use super::{Created, CrmApi, ItemResult};

/// Operations of the fake, used for scripting failures and counting calls
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FakeOp {
    Connectivity,
    CreateGroup,
    DeleteGroup,
    CreateProperty,
    CreatePropertiesBatch,
    GetProperty,
    DeleteProperty,
    CreatePipeline,
    DeletePipeline,
    UpdateLifecycle,
}

impl FakeOp {
    pub fn is_delete(&self) -> bool {
        matches!(
            self,
            FakeOp::DeleteGroup | FakeOp::DeleteProperty | FakeOp::DeletePipeline
        )
    }
}

#[derive(Debug, Clone)]
struct FailureRule {
    op: FakeOp,
    /// Entity name or label the rule is limited to
    target: Option<String>,
    error: RemoteError,
}

#[derive(Debug, Default)]
struct FakeState {
    groups: BTreeMap<(ObjectType, String), String>,
    properties: BTreeMap<(ObjectType, String), String>,
    /// Pipeline id to (object type, label)
    pipelines: BTreeMap<String, (ObjectType, String)>,
    lifecycle_stages: Vec<String>,
    next_pipeline_id: u64,
    rules: Vec<FailureRule>,
    calls: HashMap<FakeOp, usize>,
    /// Delete calls in the order they arrived
    deletes: Vec<(FakeOp, String)>,
}

impl FakeState {
    fn call(&mut self, op: FakeOp, target: Option<&str>) -> Result<(), RemoteError> {
        *self.calls.entry(op).or_default() += 1;
        if let (true, Some(target)) = (op.is_delete(), target) {
            self.deletes.push((op, target.to_string()));
        }
        let rule = self.rules.iter().find(|r| {
            r.op == op
                && match (&r.target, target) {
                    (None, _) => true,
                    (Some(expected), Some(actual)) => expected == actual,
                    (Some(_), None) => false,
                }
        });
        match rule {
            Some(rule) => Err(rule.error.clone()),
            None => Ok(()),
        }
    }
}

/// In-memory CRM account
#[derive(Debug, Default)]
pub struct FakeCrm {
    state: Mutex<FakeState>,
}

impl FakeCrm {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, FakeState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Make every call of `op` fail with `error`
    pub fn fail(&self, op: FakeOp, error: RemoteError) {
        self.state().rules.push(FailureRule {
            op,
            target: None,
            error,
        });
    }

    /// Make calls of `op` concerning `target` fail with `error`
    pub fn fail_item(&self, op: FakeOp, target: &str, error: RemoteError) {
        self.state().rules.push(FailureRule {
            op,
            target: Some(target.to_string()),
            error,
        });
    }

    /// Remove every scripted failure
    pub fn clear_failures(&self) {
        self.state().rules.clear();
    }

    /// Seed a property that exists before any deployment runs
    pub fn seed_property(&self, object_type: ObjectType, name: &str) {
        self.state()
            .properties
            .insert((object_type, name.to_string()), name.to_string());
    }

    /// Number of calls made of `op`
    pub fn calls(&self, op: FakeOp) -> usize {
        self.state().calls.get(&op).copied().unwrap_or(0)
    }

    /// Number of delete calls of any kind
    pub fn delete_calls(&self) -> usize {
        self.state()
            .calls
            .iter()
            .filter(|(op, _)| op.is_delete())
            .map(|(_, n)| n)
            .sum()
    }

    /// Every delete call made so far, oldest first
    pub fn delete_log(&self) -> Vec<(FakeOp, String)> {
        self.state().deletes.clone()
    }

    /// Drop a property behind the engine's back, as another CRM user would
    pub fn remove_property(&self, object_type: ObjectType, name: &str) {
        self.state()
            .properties
            .remove(&(object_type, name.to_string()));
    }

    pub fn group_names(&self, object_type: ObjectType) -> Vec<String> {
        self.state()
            .groups
            .keys()
            .filter(|(o, _)| *o == object_type)
            .map(|(_, name)| name.clone())
            .collect()
    }

    pub fn property_names(&self, object_type: ObjectType) -> Vec<String> {
        self.state()
            .properties
            .keys()
            .filter(|(o, _)| *o == object_type)
            .map(|(_, name)| name.clone())
            .collect()
    }

    pub fn pipeline_labels(&self, object_type: ObjectType) -> Vec<String> {
        self.state()
            .pipelines
            .values()
            .filter(|(o, _)| *o == object_type)
            .map(|(_, label)| label.clone())
            .collect()
    }

    pub fn lifecycle_stages(&self) -> Vec<String> {
        self.state().lifecycle_stages.clone()
    }

    /// Groups, properties and pipelines currently present
    pub fn entity_count(&self) -> usize {
        let state = self.state();
        state.groups.len() + state.properties.len() + state.pipelines.len()
    }

    fn insert_property(state: &mut FakeState, property: &PropertySpec) -> Created {
        let key = (property.object_type, property.name.clone());
        if state.properties.contains_key(&key) {
            return Created::existing(&property.name, &property.label);
        }
        state.properties.insert(key, property.label.clone());
        Created::new(&property.name, &property.label)
    }
}

fn not_found(what: &str) -> RemoteError {
    RemoteError::NotFound(format!("{what} does not exist"))
}

#[async_trait]
impl CrmApi for FakeCrm {
    async fn check_connectivity(
        &self,
        _credential: &Credential,
    ) -> Result<AccountDetails, RemoteError> {
        self.state().call(FakeOp::Connectivity, None)?;
        Ok(AccountDetails {
            portal_id: 1,
            time_zone: Some("UTC".to_string()),
            company_currency: Some("USD".to_string()),
        })
    }

    async fn create_property_group(
        &self,
        _credential: &Credential,
        group: &PropertyGroupSpec,
    ) -> Result<Created, RemoteError> {
        let mut state = self.state();
        state.call(FakeOp::CreateGroup, Some(&group.name))?;
        let key = (group.object_type, group.name.clone());
        if state.groups.contains_key(&key) {
            return Ok(Created::existing(&group.name, &group.label));
        }
        state.groups.insert(key, group.label.clone());
        Ok(Created::new(&group.name, &group.label))
    }

    async fn delete_property_group(
        &self,
        _credential: &Credential,
        object_type: ObjectType,
        name: &str,
    ) -> Result<(), RemoteError> {
        let mut state = self.state();
        state.call(FakeOp::DeleteGroup, Some(name))?;
        state
            .groups
            .remove(&(object_type, name.to_string()))
            .map(|_| ())
            .ok_or_else(|| not_found(name))
    }

    async fn create_property(
        &self,
        _credential: &Credential,
        property: &PropertySpec,
    ) -> Result<Created, RemoteError> {
        let mut state = self.state();
        state.call(FakeOp::CreateProperty, Some(&property.name))?;
        Ok(Self::insert_property(&mut state, property))
    }

    async fn create_properties_batch(
        &self,
        _credential: &Credential,
        _object_type: ObjectType,
        properties: &[PropertySpec],
    ) -> Result<Vec<ItemResult>, RemoteError> {
        let mut state = self.state();
        state.call(FakeOp::CreatePropertiesBatch, None)?;

        let results = properties
            .iter()
            .map(|property| {
                let item_rule = state
                    .rules
                    .iter()
                    .find(|r| {
                        r.op == FakeOp::CreateProperty
                            && r.target.as_deref() == Some(property.name.as_str())
                    })
                    .map(|r| r.error.clone());
                let result = match item_rule {
                    Some(error) => Err(error),
                    None => Ok(Self::insert_property(&mut state, property)),
                };
                ItemResult {
                    name: property.name.clone(),
                    result,
                }
            })
            .collect();

        Ok(results)
    }

    async fn property_exists(
        &self,
        _credential: &Credential,
        object_type: ObjectType,
        name: &str,
    ) -> Result<bool, RemoteError> {
        let mut state = self.state();
        state.call(FakeOp::GetProperty, Some(name))?;
        Ok(state.properties.contains_key(&(object_type, name.to_string())))
    }

    async fn delete_property(
        &self,
        _credential: &Credential,
        object_type: ObjectType,
        name: &str,
    ) -> Result<(), RemoteError> {
        let mut state = self.state();
        state.call(FakeOp::DeleteProperty, Some(name))?;
        state
            .properties
            .remove(&(object_type, name.to_string()))
            .map(|_| ())
            .ok_or_else(|| not_found(name))
    }

    async fn create_pipeline(
        &self,
        _credential: &Credential,
        pipeline: &PipelineSpec,
    ) -> Result<Created, RemoteError> {
        let mut state = self.state();
        state.call(FakeOp::CreatePipeline, Some(&pipeline.label))?;

        let existing = state
            .pipelines
            .iter()
            .find(|(_, (o, label))| *o == pipeline.object_type && *label == pipeline.label)
            .map(|(id, _)| id.clone());
        if let Some(id) = existing {
            return Ok(Created::existing(id, &pipeline.label));
        }

        state.next_pipeline_id += 1;
        let id = format!("{}", 1000 + state.next_pipeline_id);
        state
            .pipelines
            .insert(id.clone(), (pipeline.object_type, pipeline.label.clone()));
        Ok(Created::new(id, &pipeline.label))
    }

    async fn delete_pipeline(
        &self,
        _credential: &Credential,
        _object_type: ObjectType,
        pipeline_id: &str,
    ) -> Result<(), RemoteError> {
        let mut state = self.state();
        state.call(FakeOp::DeletePipeline, Some(pipeline_id))?;
        state
            .pipelines
            .remove(pipeline_id)
            .map(|_| ())
            .ok_or_else(|| not_found(pipeline_id))
    }

    async fn update_lifecycle_stages(
        &self,
        _credential: &Credential,
        stages: &[LifecycleStageSpec],
    ) -> Result<(), RemoteError> {
        let mut state = self.state();
        state.call(FakeOp::UpdateLifecycle, None)?;
        state.lifecycle_stages = stages.iter().map(|s| s.value.clone()).collect();
        Ok(())
    }
}
