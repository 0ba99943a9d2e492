//! Declared CRM configuration and its validation

use std::collections::{BTreeMap, HashSet};

pub use deploy_api::{
    DeploymentConfiguration, FieldType, LifecycleStageSpec, ObjectType, PipelineSpec,
    PipelineStageSpec, PropertyGroupSpec, PropertyOption, PropertySpec, PropertyType,
};

use crate::errors::DeployerError;

/// Longest internal name the CRM accepts
const MAX_NAME_LEN: usize = 100;

/// Check a configuration before anything is sent to the CRM.
///
/// Only structural problems are reported here. Individual properties that the
/// CRM would refuse are reported by [`validate_property`] and skipped at
/// execution time instead.
pub fn validate_configuration(config: &DeploymentConfiguration) -> Result<(), DeployerError> {
    if config.is_empty() {
        return Err(invalid("configuration declares nothing to deploy"));
    }

    let mut groups = HashSet::new();
    for group in &config.property_groups {
        if group.name.trim().is_empty() || group.label.trim().is_empty() {
            return Err(invalid("property groups need a name and a label"));
        }
        if !groups.insert((group.object_type, group.name.as_str())) {
            return Err(invalid(format!(
                "property group '{}' is declared twice for {}",
                group.name, group.object_type
            )));
        }
    }

    let mut properties = HashSet::new();
    for property in &config.properties {
        if !properties.insert((property.object_type, property.name.as_str())) {
            return Err(invalid(format!(
                "property '{}' is declared twice for {}",
                property.name, property.object_type
            )));
        }

        let group = property.effective_group();
        if group != property.object_type.default_group()
            && !groups.contains(&(property.object_type, group))
        {
            return Err(invalid(format!(
                "property '{}' references undeclared group '{}'",
                property.name, group
            )));
        }
    }

    let mut pipelines = HashSet::new();
    for pipeline in &config.pipelines {
        if !pipeline.object_type.supports_pipelines() {
            return Err(invalid(format!(
                "pipelines are not supported for {}",
                pipeline.object_type
            )));
        }
        if pipeline.label.trim().is_empty() {
            return Err(invalid("pipelines need a label"));
        }
        if pipeline.stages.is_empty() {
            return Err(invalid(format!(
                "pipeline '{}' has no stages",
                pipeline.label
            )));
        }
        if !pipelines.insert((pipeline.object_type, pipeline.label.as_str())) {
            return Err(invalid(format!(
                "pipeline '{}' is declared twice for {}",
                pipeline.label, pipeline.object_type
            )));
        }
    }

    let mut stage_values = HashSet::new();
    for stage in &config.lifecycle_stages {
        if stage.value.trim().is_empty() || stage.label.trim().is_empty() {
            return Err(invalid("lifecycle stages need a label and a value"));
        }
        if !stage_values.insert(stage.value.as_str()) {
            return Err(invalid(format!(
                "lifecycle stage '{}' is declared twice",
                stage.value
            )));
        }
    }

    Ok(())
}

/// Check a single property the way the CRM would, returning the reason it
/// would be refused.
pub fn validate_property(property: &PropertySpec) -> Result<(), String> {
    let name = property.name.as_str();
    if name.is_empty() || name.len() > MAX_NAME_LEN {
        return Err(format!(
            "internal name must be 1 to {MAX_NAME_LEN} characters"
        ));
    }

    let mut chars = name.chars();
    let starts_with_letter = chars.next().is_some_and(|c| c.is_ascii_lowercase());
    let rest_valid = chars.all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_');
    if !starts_with_letter || !rest_valid {
        return Err(format!(
            "internal name '{name}' must be lowercase letters, digits and underscores, starting with a letter"
        ));
    }

    if property.label.trim().is_empty() {
        return Err("label is empty".to_string());
    }

    if !field_type_compatible(property.property_type, property.field_type) {
        return Err(format!(
            "field type '{}' cannot edit a '{}' property",
            property.field_type.as_str(),
            property.property_type.as_str()
        ));
    }

    if property.property_type == PropertyType::Enumeration && property.options.is_empty() {
        return Err("enumeration properties need at least one option".to_string());
    }

    Ok(())
}

fn field_type_compatible(property_type: PropertyType, field_type: FieldType) -> bool {
    use FieldType::*;
    match property_type {
        PropertyType::String => matches!(field_type, Text | Textarea | Phonenumber | Html),
        PropertyType::Number => matches!(field_type, Number),
        PropertyType::Date | PropertyType::Datetime => matches!(field_type, Date),
        PropertyType::Enumeration => {
            matches!(field_type, Select | Radio | Checkbox | Booleancheckbox)
        }
        PropertyType::Bool => matches!(field_type, Booleancheckbox),
    }
}

/// Properties grouped by object type, in declaration order within each type
pub fn properties_by_object(
    config: &DeploymentConfiguration,
) -> BTreeMap<ObjectType, Vec<PropertySpec>> {
    let mut grouped: BTreeMap<ObjectType, Vec<PropertySpec>> = BTreeMap::new();
    for property in &config.properties {
        grouped
            .entry(property.object_type)
            .or_default()
            .push(property.clone());
    }
    grouped
}

/// Pipelines grouped by object type, in declaration order within each type
pub fn pipelines_by_object(
    config: &DeploymentConfiguration,
) -> BTreeMap<ObjectType, Vec<PipelineSpec>> {
    let mut grouped: BTreeMap<ObjectType, Vec<PipelineSpec>> = BTreeMap::new();
    for pipeline in &config.pipelines {
        grouped
            .entry(pipeline.object_type)
            .or_default()
            .push(pipeline.clone());
    }
    grouped
}

fn invalid(message: impl Into<String>) -> DeployerError {
    DeployerError::ConfigurationInvalid(message.into())
}
