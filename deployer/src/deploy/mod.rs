//! Deployment orchestration

pub mod engine;
pub mod events;
pub mod fsm;
pub mod rollback;
pub mod steps;

pub use engine::{DeploymentEngine, EngineOptions, SubmitRequest};
pub use events::{EventHub, EventKind, ProgressEvent};
