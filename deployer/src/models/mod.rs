//! Domain models

pub mod configuration;
pub mod deployment;

pub use configuration::DeploymentConfiguration;
pub use deployment::{
    CreatedEntity, Deployment, DeploymentId, DeploymentLogEntry, DeploymentPatch,
    DeploymentStatus, EntityType, ErrorDetail, LogStatus, Progress, RollbackOutcome,
};
