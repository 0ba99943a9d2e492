//! Deployment models

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::authn::CredentialKey;
use crate::errors::{DeployerError, ErrorKind};
use crate::models::configuration::{DeploymentConfiguration, ObjectType};
use crate::utils::percentage;

/// Unique deployment ID
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DeploymentId(Uuid);

impl DeploymentId {
    /// Generate a new random ID
    pub fn generate() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn as_uuid(&self) -> Uuid {
        self.0
    }
}

impl fmt::Display for DeploymentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for DeploymentId {
    type Err = DeployerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s)
            .map(Self)
            .map_err(|_| DeployerError::NotFound(format!("deployment {s}")))
    }
}

/// Deployment status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeploymentStatus {
    /// Accepted, nothing sent to the CRM yet
    Pending,

    /// Phases are executing
    InProgress,

    /// Every required phase succeeded
    Completed,

    /// Stopped by an unrecoverable error
    Failed,

    /// Everything the deployment created has been compensated
    RolledBack,
}

impl DeploymentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            DeploymentStatus::Pending => "pending",
            DeploymentStatus::InProgress => "in_progress",
            DeploymentStatus::Completed => "completed",
            DeploymentStatus::Failed => "failed",
            DeploymentStatus::RolledBack => "rolled_back",
        }
    }

    /// Whether the deployment has stopped executing
    pub fn is_finished(&self) -> bool {
        matches!(
            self,
            DeploymentStatus::Completed | DeploymentStatus::Failed | DeploymentStatus::RolledBack
        )
    }
}

impl fmt::Display for DeploymentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DeploymentStatus {
    type Err = DeployerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(DeploymentStatus::Pending),
            "in_progress" => Ok(DeploymentStatus::InProgress),
            "completed" => Ok(DeploymentStatus::Completed),
            "failed" => Ok(DeploymentStatus::Failed),
            "rolled_back" => Ok(DeploymentStatus::RolledBack),
            _ => Err(DeployerError::ConfigurationInvalid(format!(
                "unknown deployment status: {s}"
            ))),
        }
    }
}

/// Kind of remote entity a deployment created
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityType {
    PropertyGroup,
    Property,
    Pipeline,
}

impl fmt::Display for EntityType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            EntityType::PropertyGroup => "property_group",
            EntityType::Property => "property",
            EntityType::Pipeline => "pipeline",
        };
        f.write_str(name)
    }
}

/// A remote entity recorded for rollback
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CreatedEntity {
    pub entity_type: EntityType,
    pub object_type: ObjectType,

    /// Name for groups and properties, ID for pipelines
    pub remote_id: String,

    pub display_name: String,

    /// The CRM reported a conflict and the entity was adopted as-is
    #[serde(default)]
    pub existed: bool,

    pub recorded_at: DateTime<Utc>,
}

/// Step accounting of a deployment
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Progress {
    pub total_steps: usize,
    pub completed_steps: usize,
    #[serde(default)]
    pub current_step: Option<String>,
}

impl Progress {
    pub fn new(total_steps: usize) -> Self {
        Self {
            total_steps,
            completed_steps: 0,
            current_step: None,
        }
    }

    /// Advance by one step, never past the total
    pub fn advance(&mut self) {
        self.completed_steps = (self.completed_steps + 1).min(self.total_steps);
    }

    pub fn percentage(&self) -> u8 {
        percentage(self.completed_steps, self.total_steps)
    }
}

/// Status of a log entry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogStatus {
    Started,
    Completed,
    Failed,
}

/// Append-only audit record of a deployment step
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeploymentLogEntry {
    pub step: String,
    pub status: LogStatus,
    #[serde(default)]
    pub detail: Option<String>,
    pub timestamp: DateTime<Utc>,
}

impl DeploymentLogEntry {
    pub fn new(step: impl Into<String>, status: LogStatus, detail: Option<String>) -> Self {
        Self {
            step: step.into(),
            status,
            detail,
            timestamp: Utc::now(),
        }
    }
}

/// Counts of a compensating rollback
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RollbackOutcome {
    pub attempted: usize,
    pub succeeded: usize,
    /// Entities whose delete failed and may still exist remotely
    #[serde(default)]
    pub failed: Vec<CreatedEntity>,
}

/// Structured failure cause
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorDetail {
    pub kind: ErrorKind,
    pub message: String,
    #[serde(default)]
    pub phase: Option<String>,
    #[serde(default)]
    pub rollback: Option<RollbackOutcome>,
}

impl ErrorDetail {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            phase: None,
            rollback: None,
        }
    }

    pub fn in_phase(mut self, phase: impl Into<String>) -> Self {
        self.phase = Some(phase.into());
        self
    }
}

/// One deployment attempt
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Deployment {
    pub id: DeploymentId,
    pub client_name: String,

    /// Template the configuration was resolved from, if any
    #[serde(default)]
    pub template_id: Option<String>,

    /// Snapshot of what this deployment creates
    pub configuration: DeploymentConfiguration,

    pub credential_fingerprint: CredentialKey,
    pub status: DeploymentStatus,

    /// Everything created so far, in creation order
    #[serde(default)]
    pub created_entities: Vec<CreatedEntity>,

    #[serde(default)]
    pub progress: Progress,

    #[serde(default)]
    pub error_detail: Option<ErrorDetail>,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default)]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub completed_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub execution_time_millis: Option<u64>,
}

impl Deployment {
    /// Create a new deployment in the pending state
    pub fn new(
        client_name: impl Into<String>,
        template_id: Option<String>,
        configuration: DeploymentConfiguration,
        credential_fingerprint: CredentialKey,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: DeploymentId::generate(),
            client_name: client_name.into(),
            template_id,
            configuration,
            credential_fingerprint,
            status: DeploymentStatus::Pending,
            created_entities: Vec::new(),
            progress: Progress::default(),
            error_detail: None,
            created_at: now,
            updated_at: now,
            started_at: None,
            completed_at: None,
            execution_time_millis: None,
        }
    }

    /// Apply a partial update
    pub fn apply(&mut self, patch: DeploymentPatch) {
        if let Some(status) = patch.status {
            self.status = status;
        }
        if let Some(progress) = patch.progress {
            self.progress = progress;
        }
        if let Some(error_detail) = patch.error_detail {
            self.error_detail = error_detail;
        }
        if let Some(created_entities) = patch.created_entities {
            self.created_entities = created_entities;
        }
        if let Some(started_at) = patch.started_at {
            self.started_at = Some(started_at);
        }
        if let Some(completed_at) = patch.completed_at {
            self.completed_at = Some(completed_at);
        }
        if let Some(millis) = patch.execution_time_millis {
            self.execution_time_millis = Some(millis);
        }
        self.updated_at = Utc::now();
    }
}

/// Partial update of a stored deployment
#[derive(Debug, Clone, Default)]
pub struct DeploymentPatch {
    pub status: Option<DeploymentStatus>,
    pub progress: Option<Progress>,
    /// `Some(None)` clears the error detail
    pub error_detail: Option<Option<ErrorDetail>>,
    /// Replaces the entity list; used to clear it after a rollback
    pub created_entities: Option<Vec<CreatedEntity>>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub execution_time_millis: Option<u64>,
}

impl DeploymentPatch {
    pub fn status(status: DeploymentStatus) -> Self {
        Self {
            status: Some(status),
            ..Default::default()
        }
    }

    pub fn progress(progress: Progress) -> Self {
        Self {
            progress: Some(progress),
            ..Default::default()
        }
    }

    pub fn with_error(mut self, detail: ErrorDetail) -> Self {
        self.error_detail = Some(Some(detail));
        self
    }
}
