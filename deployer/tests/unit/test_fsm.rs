//! Deployment state machine tests

use chrono::{Duration, Utc};

use site_deployer::deploy::fsm::{transition, DeploymentEvent, DeploymentStatus};
use site_deployer::models::deployment::Deployment;

use crate::support::new_deployment;

#[test]
fn test_only_forward_transitions_are_legal() {
    use DeploymentStatus::*;

    let fail = DeploymentEvent::Fail("boom".to_string());
    assert_eq!(transition(Queued, &DeploymentEvent::Start), Ok(InProgress));
    assert_eq!(transition(InProgress, &DeploymentEvent::Succeed), Ok(Success));
    assert_eq!(transition(InProgress, &fail), Ok(Failed));

    assert!(transition(Queued, &DeploymentEvent::Succeed).is_err());
    assert!(transition(Queued, &fail).is_err());
    assert!(transition(InProgress, &DeploymentEvent::Start).is_err());
    for terminal in [Success, Failed] {
        assert!(transition(terminal, &DeploymentEvent::Start).is_err());
        assert!(transition(terminal, &DeploymentEvent::Succeed).is_err());
        assert!(transition(terminal, &fail).is_err());
    }
}

#[test]
fn test_completion_fields_track_terminal_status() {
    let mut deployment = Deployment::new(new_deployment());
    let start = Utc::now();

    assert_eq!(deployment.status, DeploymentStatus::Queued);
    assert!(deployment.completed_at.is_none());
    assert!(deployment.build_time_ms.is_none());

    deployment.apply(DeploymentEvent::Start, start).unwrap();
    assert_eq!(deployment.started_at, Some(start));
    assert!(deployment.completed_at.is_none());
    assert!(deployment.build_time_ms.is_none());

    let done = start + Duration::milliseconds(1500);
    deployment.apply(DeploymentEvent::Succeed, done).unwrap();
    assert_eq!(deployment.status, DeploymentStatus::Success);
    assert_eq!(deployment.completed_at, Some(done));
    assert_eq!(deployment.build_time_ms, Some(1500));
}

#[test]
fn test_failure_records_reason() {
    let mut deployment = Deployment::new(new_deployment());
    let now = Utc::now();
    deployment.apply(DeploymentEvent::Start, now).unwrap();
    deployment
        .apply(DeploymentEvent::Fail("Missing required file: index.html".to_string()), now)
        .unwrap();

    assert_eq!(deployment.status, DeploymentStatus::Failed);
    assert_eq!(
        deployment.error_message.as_deref(),
        Some("Missing required file: index.html")
    );
    assert_eq!(deployment.build_time_ms, Some(0));

    // Terminal records are left untouched
    let before = deployment.clone();
    assert!(deployment.apply(DeploymentEvent::Start, now).is_err());
    assert_eq!(deployment, before);
}

#[test]
fn test_status_strings_are_stable() {
    let json = serde_json::to_value(DeploymentStatus::InProgress).unwrap();
    assert_eq!(json, "in_progress");
    assert_eq!(DeploymentStatus::Success.to_string(), "success");
}
