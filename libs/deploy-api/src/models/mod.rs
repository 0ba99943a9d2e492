//! API models

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

// ============================== CONFIGURATION ================================ //

/// CRM object type a configuration item belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ObjectType {
    #[serde(alias = "contact")]
    Contacts,
    #[serde(alias = "company")]
    Companies,
    #[serde(alias = "deal")]
    Deals,
    #[serde(alias = "ticket")]
    Tickets,
}

impl ObjectType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ObjectType::Contacts => "contacts",
            ObjectType::Companies => "companies",
            ObjectType::Deals => "deals",
            ObjectType::Tickets => "tickets",
        }
    }

    /// Built-in property group every account has for this object type
    pub fn default_group(&self) -> &'static str {
        match self {
            ObjectType::Contacts => "contactinformation",
            ObjectType::Companies => "companyinformation",
            ObjectType::Deals => "dealinformation",
            ObjectType::Tickets => "ticketinformation",
        }
    }

    /// Whether the CRM supports pipelines for this object type
    pub fn supports_pipelines(&self) -> bool {
        matches!(self, ObjectType::Deals | ObjectType::Tickets)
    }
}

impl fmt::Display for ObjectType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Data type of a property
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PropertyType {
    String,
    Number,
    Date,
    Datetime,
    Enumeration,
    Bool,
}

impl PropertyType {
    pub fn as_str(&self) -> &'static str {
        match self {
            PropertyType::String => "string",
            PropertyType::Number => "number",
            PropertyType::Date => "date",
            PropertyType::Datetime => "datetime",
            PropertyType::Enumeration => "enumeration",
            PropertyType::Bool => "bool",
        }
    }
}

/// Form field used to edit a property
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FieldType {
    Text,
    Textarea,
    Number,
    Date,
    Select,
    Radio,
    Checkbox,
    Booleancheckbox,
    Phonenumber,
    Html,
}

impl FieldType {
    pub fn as_str(&self) -> &'static str {
        match self {
            FieldType::Text => "text",
            FieldType::Textarea => "textarea",
            FieldType::Number => "number",
            FieldType::Date => "date",
            FieldType::Select => "select",
            FieldType::Radio => "radio",
            FieldType::Checkbox => "checkbox",
            FieldType::Booleancheckbox => "booleancheckbox",
            FieldType::Phonenumber => "phonenumber",
            FieldType::Html => "html",
        }
    }
}

/// Option of an enumeration property
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PropertyOption {
    pub label: String,
    pub value: String,
    #[serde(default)]
    pub display_order: i32,
    #[serde(default)]
    pub hidden: bool,
}

/// Declared property group
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PropertyGroupSpec {
    pub object_type: ObjectType,
    pub name: String,
    pub label: String,
    #[serde(default)]
    pub display_order: i32,
}

/// Declared custom property
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PropertySpec {
    pub object_type: ObjectType,
    pub name: String,
    pub label: String,
    pub property_type: PropertyType,
    pub field_type: FieldType,
    /// Group the property is placed in; defaults to the object's built-in group
    #[serde(default)]
    pub group_name: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub options: Vec<PropertyOption>,
    #[serde(default = "default_true")]
    pub form_field: bool,
}

impl PropertySpec {
    /// Group the property lands in on the remote side
    pub fn effective_group(&self) -> &str {
        self.group_name
            .as_deref()
            .filter(|g| !g.is_empty())
            .unwrap_or_else(|| self.object_type.default_group())
    }
}

fn default_true() -> bool {
    true
}

/// Declared pipeline stage
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineStageSpec {
    pub label: String,
    #[serde(default)]
    pub display_order: i32,
    /// `probability` for deal stages, `ticketState` for ticket stages
    #[serde(default)]
    pub metadata: BTreeMap<String, String>,
}

/// Declared sales or ticket pipeline
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineSpec {
    pub object_type: ObjectType,
    pub label: String,
    #[serde(default)]
    pub display_order: i32,
    pub stages: Vec<PipelineStageSpec>,
}

/// Declared lifecycle stage option
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LifecycleStageSpec {
    pub label: String,
    pub value: String,
    #[serde(default)]
    pub display_order: i32,
}

/// Everything one deployment pushes into a CRM account
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DeploymentConfiguration {
    #[serde(default)]
    pub property_groups: Vec<PropertyGroupSpec>,
    #[serde(default)]
    pub properties: Vec<PropertySpec>,
    #[serde(default)]
    pub pipelines: Vec<PipelineSpec>,
    #[serde(default)]
    pub lifecycle_stages: Vec<LifecycleStageSpec>,
}

impl DeploymentConfiguration {
    /// Whether nothing at all is declared
    pub fn is_empty(&self) -> bool {
        self.property_groups.is_empty()
            && self.properties.is_empty()
            && self.pipelines.is_empty()
            && self.lifecycle_stages.is_empty()
    }
}

// ================================= REQUESTS ==================================== //

/// Deployment submission
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubmitDeploymentRequest {
    pub client_name: String,
    /// Private app access token of the target CRM account (never persisted)
    pub access_token: String,
    #[serde(default)]
    pub template_id: Option<String>,
    #[serde(default)]
    pub configuration: Option<DeploymentConfiguration>,
}

/// Manual rollback of a failed deployment
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RollbackRequest {
    pub access_token: String,
}

/// Query parameters of the deployment listing
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ListDeploymentsQuery {
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub client_name: Option<String>,
    #[serde(default)]
    pub limit: Option<u32>,
    #[serde(default)]
    pub offset: Option<u32>,
}

// ================================ RESPONSES ==================================== //

/// Deployment accepted for execution
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubmitDeploymentResponse {
    pub deployment_id: Uuid,
    pub status: String,
    pub accepted_at: DateTime<Utc>,
}

/// A page of results
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ListResponse<T> {
    pub items: Vec<T>,
    pub total: usize,
    pub limit: u32,
    pub offset: u32,
}

/// Error response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
    pub message: String,
}

/// Health check response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub service: String,
    pub version: String,
}

/// Version response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VersionResponse {
    pub version: String,
    pub git_hash: String,
    pub build_time: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn object_type_accepts_singular_aliases() {
        let parsed: ObjectType = serde_json::from_str("\"contact\"").unwrap();
        assert_eq!(parsed, ObjectType::Contacts);
        assert_eq!(serde_json::to_string(&parsed).unwrap(), "\"contacts\"");
    }

    #[test]
    fn property_defaults_to_builtin_group() {
        let spec: PropertySpec = serde_json::from_value(serde_json::json!({
            "object_type": "deal",
            "name": "renewal_date",
            "label": "Renewal date",
            "property_type": "date",
            "field_type": "date"
        }))
        .unwrap();

        assert_eq!(spec.effective_group(), "dealinformation");
        assert!(spec.form_field);
        assert!(spec.options.is_empty());
    }

    #[test]
    fn empty_configuration() {
        let config: DeploymentConfiguration = serde_json::from_str("{}").unwrap();
        assert!(config.is_empty());
    }
}
