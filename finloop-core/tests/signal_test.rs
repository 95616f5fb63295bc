//! Review signalling: deadlines, late signals and per-instance isolation

use finloop_core::models::workflow::{ApprovalStatus, SignalOutcome};
use finloop_core::workflow::approval_manager::{ApprovalDraft, ApprovalManager};
use finloop_core::workflow::signal::{SignalChannel, TIMEOUT_APPROVER};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

fn draft() -> ApprovalDraft {
    ApprovalDraft {
        operation_type: "kyc_verification".to_string(),
        ai_decision: json!({"verified": false}),
        ai_reasoning: "Document score below cut".to_string(),
        ai_confidence: 0.5,
        operation_value: 0.0,
        previous_violations: 0,
        unusual_pattern: false,
        urgency: None,
    }
}

#[tokio::test(start_paused = true)]
async fn test_wait_without_signal_times_out() {
    let (_tx, channel) = SignalChannel::open();

    let resolution = channel.wait(Duration::from_millis(100)).await;

    assert_eq!(resolution.outcome, SignalOutcome::TimedOut);
    assert_eq!(resolution.approver_id, TIMEOUT_APPROVER);
}

#[tokio::test(start_paused = true)]
async fn test_signal_before_deadline_approves() {
    let manager = Arc::new(ApprovalManager::new());
    let instance_id = Uuid::new_v4();
    let (_request, channel) =
        manager.request_approval(instance_id, draft(), Duration::from_millis(100));

    let sender = manager.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert!(sender.approve(instance_id, "analyst_1", None));
    });

    let resolution = channel.wait(Duration::from_millis(100)).await;
    assert_eq!(resolution.outcome, SignalOutcome::Approved);
    assert_eq!(resolution.approver_id, "analyst_1");
}

#[tokio::test(start_paused = true)]
async fn test_late_signal_does_not_change_resolution() {
    let manager = ApprovalManager::new();
    let instance_id = Uuid::new_v4();
    let (request, channel) =
        manager.request_approval(instance_id, draft(), Duration::from_millis(100));

    let resolution = channel.wait(Duration::from_millis(100)).await;
    let stored = manager.record_resolution(request.id, &resolution).unwrap();

    assert!(!manager.approve(instance_id, "analyst_1", Some("sorry, late".to_string())));
    assert!(!manager.reject(instance_id, "analyst_2", None));

    assert_eq!(stored.status, ApprovalStatus::TimedOut);
    assert_eq!(stored.reviewer.as_deref(), Some(TIMEOUT_APPROVER));
    assert!(manager.record_resolution(request.id, &resolution).is_none());
}

#[tokio::test]
async fn test_signals_are_routed_per_instance() {
    let manager = ApprovalManager::new();
    let first = Uuid::new_v4();
    let second = Uuid::new_v4();
    let (_r1, first_channel) = manager.request_approval(first, draft(), Duration::from_secs(60));
    let (_r2, second_channel) = manager.request_approval(second, draft(), Duration::from_secs(60));

    assert!(manager.reject(second, "analyst_2", None));
    assert!(manager.approve(first, "analyst_1", None));

    let first_resolution = first_channel.wait(Duration::from_secs(60)).await;
    let second_resolution = second_channel.wait(Duration::from_secs(60)).await;
    assert_eq!(first_resolution.outcome, SignalOutcome::Approved);
    assert_eq!(second_resolution.outcome, SignalOutcome::Rejected);
    assert_eq!(second_resolution.approver_id, "analyst_2");
}
