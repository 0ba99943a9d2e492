//! Phase order and step accounting

use std::fmt;

use crate::models::configuration::{pipelines_by_object, properties_by_object};
use crate::models::DeploymentConfiguration;
use crate::remote::batch::BatchMode;

/// Phases of a deployment, in execution order
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Connectivity,
    PropertyGroups,
    Properties,
    Pipelines,
    LifecycleStages,
}

impl Phase {
    pub fn as_str(&self) -> &'static str {
        match self {
            Phase::Connectivity => "connectivity",
            Phase::PropertyGroups => "property_groups",
            Phase::Properties => "properties",
            Phase::Pipelines => "pipelines",
            Phase::LifecycleStages => "lifecycle_stages",
        }
    }

    /// Whether a failure in this phase fails the deployment
    pub fn is_critical(&self) -> bool {
        !matches!(self, Phase::LifecycleStages)
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Number of steps a configuration takes: one per group, one per property
/// chunk of each object type, one per pipeline and one for lifecycle stages.
pub fn total_steps(config: &DeploymentConfiguration, mode: BatchMode) -> usize {
    let chunks: usize = properties_by_object(config)
        .values()
        .map(|properties| mode.chunk_count(properties.len()))
        .sum();
    let pipelines: usize = pipelines_by_object(config).values().map(Vec::len).sum();
    let lifecycle = usize::from(!config.lifecycle_stages.is_empty());

    config.property_groups.len() + chunks + pipelines + lifecycle
}

pub fn group_step(name: &str) -> String {
    format!("{}:{name}", Phase::PropertyGroups)
}

pub fn chunk_step(object_type: impl fmt::Display, chunk: usize, chunks: usize) -> String {
    format!("{}:{object_type}:{}/{chunks}", Phase::Properties, chunk + 1)
}

pub fn pipeline_step(object_type: impl fmt::Display, label: &str) -> String {
    format!("{}:{object_type}:{label}", Phase::Pipelines)
}
