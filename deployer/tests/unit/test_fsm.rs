//! FSM unit tests

use crmdeploy::deploy::fsm::{DeploymentEvent, DeploymentFsm};
use crmdeploy::errors::DeployerError;
use crmdeploy::models::DeploymentStatus;

#[test]
fn test_fsm_initial_state() {
    let fsm = DeploymentFsm::new();
    assert_eq!(fsm.state(), DeploymentStatus::Pending);
    assert!(fsm.error().is_none());
    assert!(!fsm.can_roll_back());
}

#[test]
fn test_fsm_success_flow() {
    let mut fsm = DeploymentFsm::new();

    fsm.process(DeploymentEvent::Start).unwrap();
    assert_eq!(fsm.state(), DeploymentStatus::InProgress);

    fsm.process(DeploymentEvent::Complete).unwrap();
    assert_eq!(fsm.state(), DeploymentStatus::Completed);
    assert!(!fsm.can_roll_back());
}

#[test]
fn test_fsm_failure_then_rollback() {
    let mut fsm = DeploymentFsm::new();

    fsm.process(DeploymentEvent::Start).unwrap();
    fsm.process(DeploymentEvent::Fail("pipeline rejected".to_string()))
        .unwrap();
    assert_eq!(fsm.state(), DeploymentStatus::Failed);
    assert_eq!(fsm.error(), Some("pipeline rejected"));
    assert!(fsm.can_roll_back());

    fsm.process(DeploymentEvent::RolledBack).unwrap();
    assert_eq!(fsm.state(), DeploymentStatus::RolledBack);
}

#[test]
fn test_fsm_credential_failure_skips_in_progress() {
    let mut fsm = DeploymentFsm::new();
    let status = fsm
        .process(DeploymentEvent::Fail("401".to_string()))
        .unwrap();
    assert_eq!(status, DeploymentStatus::Failed);
}

#[test]
fn test_fsm_terminal_states_reject_events() {
    let mut fsm = DeploymentFsm::from_status(DeploymentStatus::Completed);
    let err = fsm.process(DeploymentEvent::RolledBack).unwrap_err();
    assert!(matches!(err, DeployerError::InvalidTransition { .. }));
    assert_eq!(fsm.state(), DeploymentStatus::Completed);

    let mut fsm = DeploymentFsm::from_status(DeploymentStatus::RolledBack);
    assert!(fsm.process(DeploymentEvent::Start).is_err());
    assert!(fsm
        .process(DeploymentEvent::Fail("late".to_string()))
        .is_err());
}

#[test]
fn test_fsm_pending_cannot_complete() {
    let mut fsm = DeploymentFsm::new();
    assert!(fsm.process(DeploymentEvent::Complete).is_err());
    assert!(fsm.process(DeploymentEvent::RolledBack).is_err());
    assert_eq!(fsm.state(), DeploymentStatus::Pending);
}
