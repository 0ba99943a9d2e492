//! Finite State Machine for deployment status

use crate::errors::DeployerError;
use crate::models::DeploymentStatus;

/// Deployment event
#[derive(Debug, Clone)]
pub enum DeploymentEvent {
    /// Credential verified, phases begin
    Start,

    /// Every required phase succeeded
    Complete,

    /// Unrecoverable error
    Fail(String),

    /// Compensating deletes finished
    RolledBack,
}

impl DeploymentEvent {
    fn name(&self) -> &'static str {
        match self {
            DeploymentEvent::Start => "start",
            DeploymentEvent::Complete => "complete",
            DeploymentEvent::Fail(_) => "fail",
            DeploymentEvent::RolledBack => "rolled_back",
        }
    }
}

/// Deployment FSM
#[derive(Debug, Clone)]
pub struct DeploymentFsm {
    state: DeploymentStatus,
    error: Option<String>,
}

impl DeploymentFsm {
    /// Create a new FSM in pending state
    pub fn new() -> Self {
        Self::from_status(DeploymentStatus::Pending)
    }

    /// Resume from a persisted status
    pub fn from_status(state: DeploymentStatus) -> Self {
        Self { state, error: None }
    }

    /// Get current state
    pub fn state(&self) -> DeploymentStatus {
        self.state
    }

    /// Get error message if any
    pub fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }

    /// Process an event and transition state
    pub fn process(&mut self, event: DeploymentEvent) -> Result<DeploymentStatus, DeployerError> {
        let new_state = match (self.state, &event) {
            (DeploymentStatus::Pending, DeploymentEvent::Start) => DeploymentStatus::InProgress,

            (DeploymentStatus::InProgress, DeploymentEvent::Complete) => DeploymentStatus::Completed,

            // a failed credential check never reaches in_progress
            (DeploymentStatus::Pending | DeploymentStatus::InProgress, DeploymentEvent::Fail(err)) => {
                self.error = Some(err.clone());
                DeploymentStatus::Failed
            }

            (DeploymentStatus::Failed, DeploymentEvent::RolledBack) => DeploymentStatus::RolledBack,

            (state, event) => {
                return Err(DeployerError::InvalidTransition {
                    from: state.to_string(),
                    to: event.name().to_string(),
                });
            }
        };

        self.state = new_state;
        Ok(new_state)
    }

    /// Whether a rollback may be started from the current state
    pub fn can_roll_back(&self) -> bool {
        matches!(
            self.state,
            DeploymentStatus::Failed | DeploymentStatus::RolledBack
        )
    }
}

impl Default for DeploymentFsm {
    fn default() -> Self {
        Self::new()
    }
}
