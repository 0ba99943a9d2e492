//! API models

use std::collections::{BTreeMap, HashMap};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Property group creation request
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PropertyGroupInput {
    pub name: String,
    pub label: String,
    #[serde(default)]
    pub display_order: i32,
}

/// Property group as returned by the CRM
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PropertyGroup {
    pub name: String,
    pub label: String,
    #[serde(default)]
    pub display_order: i32,
    #[serde(default)]
    pub archived: bool,
}

/// Enumeration option of a property
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OptionInput {
    pub label: String,
    pub value: String,
    #[serde(default)]
    pub display_order: i32,
    #[serde(default)]
    pub hidden: bool,
}

/// Property creation request
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PropertyInput {
    pub name: String,
    pub label: String,
    #[serde(rename = "type")]
    pub property_type: String,
    pub field_type: String,
    pub group_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub options: Vec<OptionInput>,
    #[serde(default)]
    pub form_field: bool,
}

/// Property as returned by the CRM
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Property {
    pub name: String,
    pub label: String,
    #[serde(rename = "type")]
    pub property_type: String,
    pub field_type: String,
    #[serde(default)]
    pub group_name: String,
    #[serde(default)]
    pub options: Vec<OptionInput>,
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
}

/// Batch request envelope
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchInput<T> {
    pub inputs: Vec<T>,
}

/// Batch response envelope
///
/// The CRM answers `201` when every input succeeded and `207` when some
/// inputs were rejected; rejected inputs are described in `errors`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchResponse<T> {
    #[serde(default)]
    pub status: String,
    #[serde(default = "Vec::new")]
    pub results: Vec<T>,
    #[serde(default)]
    pub errors: Vec<BatchError>,
}

/// A single rejected input of a batch request
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchError {
    #[serde(default)]
    pub status: String,
    #[serde(default)]
    pub category: String,
    #[serde(default)]
    pub message: String,
    /// Keys such as `name` or `propertyName` mapped to the offending inputs
    #[serde(default)]
    pub context: HashMap<String, Vec<String>>,
}

impl BatchError {
    /// Names of the inputs this error refers to
    pub fn input_names(&self) -> Vec<String> {
        ["name", "propertyName", "propertyNames"]
            .iter()
            .filter_map(|key| self.context.get(*key))
            .flatten()
            .cloned()
            .collect()
    }

    /// Whether the CRM rejected the input because it already exists
    pub fn is_conflict(&self) -> bool {
        self.category == "OBJECT_ALREADY_EXISTS" || self.status == "409"
    }
}

/// Pipeline stage creation request
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StageInput {
    pub label: String,
    pub display_order: i32,
    /// `probability` for deal stages, `ticketState` for ticket stages
    #[serde(default)]
    pub metadata: BTreeMap<String, String>,
}

/// Pipeline creation request
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PipelineInput {
    pub label: String,
    pub display_order: i32,
    pub stages: Vec<StageInput>,
}

/// Pipeline stage as returned by the CRM
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Stage {
    pub id: String,
    pub label: String,
    #[serde(default)]
    pub display_order: i32,
    #[serde(default)]
    pub metadata: BTreeMap<String, String>,
}

/// Pipeline as returned by the CRM
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Pipeline {
    pub id: String,
    pub label: String,
    #[serde(default)]
    pub display_order: i32,
    #[serde(default)]
    pub stages: Vec<Stage>,
    #[serde(default)]
    pub archived: bool,
}

/// Generic list envelope
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CollectionResponse<T> {
    #[serde(default = "Vec::new")]
    pub results: Vec<T>,
}

/// Replacement of the option list of an enumeration property
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PropertyOptionsUpdate {
    pub options: Vec<OptionInput>,
}

/// Account details used for the connectivity check
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AccountDetails {
    #[serde(default)]
    pub portal_id: u64,
    #[serde(default)]
    pub time_zone: Option<String>,
    #[serde(default)]
    pub company_currency: Option<String>,
}

/// Error body returned by the CRM
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorResponse {
    #[serde(default)]
    pub status: String,
    #[serde(default)]
    pub message: String,
    #[serde(default)]
    pub category: String,
    #[serde(default)]
    pub correlation_id: Option<String>,
}
