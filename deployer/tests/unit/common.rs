//! Shared fixtures

use std::sync::Arc;

use crmdeploy::deploy::{DeploymentEngine, EngineOptions, EventHub, SubmitRequest};
use crmdeploy::models::configuration::{
    DeploymentConfiguration, FieldType, ObjectType, PropertyGroupSpec, PropertySpec, PropertyType,
};
use crmdeploy::remote::FakeCrm;
use crmdeploy::storage::MemoryStore;
use crmdeploy::templates::MemoryTemplateStore;

pub const TOKEN: &str = "pat-na1-test-token";

pub fn engine(crm: Arc<FakeCrm>) -> DeploymentEngine {
    engine_with(crm, EngineOptions::default())
}

pub fn engine_with(crm: Arc<FakeCrm>, options: EngineOptions) -> DeploymentEngine {
    DeploymentEngine::new(
        crm,
        Arc::new(MemoryStore::new()),
        Arc::new(MemoryTemplateStore::new()),
        EventHub::new(),
        options,
    )
}

pub fn group(name: &str) -> PropertyGroupSpec {
    PropertyGroupSpec {
        object_type: ObjectType::Contacts,
        name: name.to_string(),
        label: name.to_uppercase(),
        display_order: 0,
    }
}

pub fn property(name: &str, group: Option<&str>) -> PropertySpec {
    PropertySpec {
        object_type: ObjectType::Contacts,
        name: name.to_string(),
        label: name.replace('_', " "),
        property_type: PropertyType::String,
        field_type: FieldType::Text,
        group_name: group.map(str::to_string),
        description: None,
        options: Vec::new(),
        form_field: true,
    }
}

/// `count` contact properties named `field_0`, `field_1`, ...
pub fn fields(count: usize) -> Vec<PropertySpec> {
    (0..count)
        .map(|i| property(&format!("field_{i}"), None))
        .collect()
}

pub fn request(configuration: DeploymentConfiguration) -> SubmitRequest {
    SubmitRequest {
        client_name: "Acme Corp".to_string(),
        access_token: TOKEN.to_string(),
        template_id: None,
        configuration: Some(configuration),
    }
}
