//! Approval request management and signal ingress

use crate::models::workflow::{
    ApprovalRequest, ApprovalStatus, Priority, Signal, SignalOutcome, SignalResolution,
};
use crate::workflow::signal::SignalChannel;
use chrono::Utc;
use dashmap::DashMap;
use serde_json::Value;
use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::oneshot;
use uuid::Uuid;

/// Confidence under which a request is tagged `low_ai_confidence`
const LOW_CONFIDENCE_FACTOR: f64 = 0.7;
/// Value over which a request is tagged `high_value`
const HIGH_VALUE_FACTOR: f64 = 5_000.0;

/// Everything needed to open an approval request
#[derive(Debug, Clone)]
pub struct ApprovalDraft {
    pub operation_type: String,
    pub ai_decision: Value,
    pub ai_reasoning: String,
    pub ai_confidence: f64,
    pub operation_value: f64,
    /// Prior compliance violations of the acting user
    pub previous_violations: u32,
    pub unusual_pattern: bool,
    /// Caller-supplied urgency, if any
    pub urgency: Option<Priority>,
}

impl ApprovalDraft {
    pub fn risk_factors(&self) -> BTreeSet<String> {
        let mut factors = BTreeSet::new();
        if self.ai_confidence < LOW_CONFIDENCE_FACTOR {
            factors.insert("low_ai_confidence".to_string());
        }
        if self.operation_value > HIGH_VALUE_FACTOR {
            factors.insert("high_value".to_string());
        }
        if self.previous_violations > 0 {
            factors.insert("previous_violations".to_string());
        }
        if self.unusual_pattern {
            factors.insert("unusual_activity_pattern".to_string());
        }
        factors
    }

    pub fn priority(&self) -> Priority {
        let value = self.operation_value;
        if self.urgency == Some(Priority::Critical) || value > 50_000.0 {
            Priority::Critical
        } else if self.operation_type == "account_closure" || value > 10_000.0 {
            Priority::High
        } else if value > 5_000.0 || self.urgency == Some(Priority::High) {
            Priority::Medium
        } else {
            Priority::Low
        }
    }
}

/// Owns approval requests and routes signals to suspended instances
#[derive(Default)]
pub struct ApprovalManager {
    /// Unresolved requests by id; resolved ones move onto their instance
    requests: Arc<DashMap<Uuid, ApprovalRequest>>,
    /// Signal senders of suspended instances, by instance id
    pending_channels: Arc<DashMap<Uuid, oneshot::Sender<Signal>>>,
}

impl ApprovalManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a pending request for a suspended instance and open its mailbox
    pub fn request_approval(
        &self,
        instance_id: Uuid,
        draft: ApprovalDraft,
        timeout: Duration,
    ) -> (ApprovalRequest, SignalChannel) {
        let created_at = Utc::now();
        let expires_at = chrono::Duration::from_std(timeout)
            .ok()
            .and_then(|ttl| created_at.checked_add_signed(ttl))
            .unwrap_or(chrono::DateTime::<Utc>::MAX_UTC);

        let request = ApprovalRequest {
            id: Uuid::new_v4(),
            instance_id,
            risk_factors: draft.risk_factors(),
            priority: draft.priority(),
            operation_type: draft.operation_type,
            ai_decision: draft.ai_decision,
            ai_reasoning: draft.ai_reasoning,
            ai_confidence: draft.ai_confidence,
            operation_value: draft.operation_value,
            created_at,
            expires_at,
            status: ApprovalStatus::PendingReview,
            reviewer: None,
            comment: None,
            reviewed_at: None,
        };

        let (tx, channel) = SignalChannel::open();
        if self.pending_channels.insert(instance_id, tx).is_some() {
            tracing::warn!(
                instance_id = %instance_id,
                "Replaced an unresolved signal channel for instance"
            );
        }
        self.requests.insert(request.id, request.clone());

        tracing::info!(
            approval_id = %request.id,
            instance_id = %instance_id,
            operation_type = %request.operation_type,
            priority = ?request.priority,
            "Approval request created"
        );

        (request, channel)
    }

    /// Deliver a signal to a suspended instance. Returns whether the instance accepted
    /// it; unknown or already-resolved instances report `false`.
    pub fn deliver(&self, instance_id: Uuid, signal: Signal) -> bool {
        let Some((_key, tx)) = self.pending_channels.remove(&instance_id) else {
            tracing::debug!(instance_id = %instance_id, "No pending review for signal");
            return false;
        };

        let approver = signal.approver_id.clone();
        match tx.send(signal) {
            Ok(()) => {
                tracing::info!(
                    instance_id = %instance_id,
                    approver = %approver,
                    "Signal delivered"
                );
                true
            }
            Err(_) => {
                tracing::debug!(
                    instance_id = %instance_id,
                    "Review already resolved, signal dropped"
                );
                false
            }
        }
    }

    pub fn approve(&self, instance_id: Uuid, approver_id: &str, comment: Option<String>) -> bool {
        self.deliver(instance_id, Signal::approve(approver_id, comment))
    }

    pub fn reject(&self, instance_id: Uuid, approver_id: &str, comment: Option<String>) -> bool {
        self.deliver(instance_id, Signal::reject(approver_id, comment))
    }

    /// Apply the terminal resolution to a request and hand it back to the caller.
    /// The request leaves the manager, so only the first resolution sticks and a
    /// repeated call returns `None`.
    pub fn record_resolution(
        &self,
        approval_id: Uuid,
        resolution: &SignalResolution,
    ) -> Option<ApprovalRequest> {
        let (_id, mut request) = self.requests.remove(&approval_id)?;

        request.status = match resolution.outcome {
            SignalOutcome::Approved => ApprovalStatus::Approved,
            SignalOutcome::Rejected => ApprovalStatus::Rejected,
            SignalOutcome::TimedOut => ApprovalStatus::TimedOut,
        };
        request.reviewer = Some(resolution.approver_id.clone());
        request.comment = resolution.comment.clone();
        request.reviewed_at = Some(resolution.resolved_at);

        // A timed-out instance still has its sender registered
        self.pending_channels.remove(&request.instance_id);
        Some(request)
    }

    /// Number of requests still awaiting a reviewer
    pub fn open_request_count(&self) -> usize {
        self.requests.len()
    }

    /// Drop the signal route of an instance without resolving it
    pub fn close(&self, instance_id: Uuid) {
        self.pending_channels.remove(&instance_id);
    }

    pub fn get_request(&self, approval_id: Uuid) -> Option<ApprovalRequest> {
        self.requests.get(&approval_id).map(|entry| entry.clone())
    }

    pub fn requests_for(&self, instance_id: Uuid) -> Vec<ApprovalRequest> {
        let mut requests: Vec<_> = self
            .requests
            .iter()
            .filter(|entry| entry.instance_id == instance_id)
            .map(|entry| entry.clone())
            .collect();
        requests.sort_by_key(|request| request.created_at);
        requests
    }

    /// Review queue: pending requests, most urgent first, then oldest first
    pub fn pending_requests(&self) -> Vec<ApprovalRequest> {
        let mut pending: Vec<_> = self
            .requests
            .iter()
            .filter(|entry| entry.is_pending())
            .map(|entry| entry.clone())
            .collect();
        pending.sort_by(|a, b| {
            b.priority
                .cmp(&a.priority)
                .then_with(|| a.created_at.cmp(&b.created_at))
        });
        pending
    }

    /// Whether an instance is currently waiting on a signal
    pub fn is_awaiting(&self, instance_id: Uuid) -> bool {
        self.pending_channels.contains_key(&instance_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn draft(value: f64, confidence: f64) -> ApprovalDraft {
        ApprovalDraft {
            operation_type: "large_withdrawal".to_string(),
            ai_decision: json!({"recommendation": "approve"}),
            ai_reasoning: "Customer has a long clean history".to_string(),
            ai_confidence: confidence,
            operation_value: value,
            previous_violations: 0,
            unusual_pattern: false,
            urgency: None,
        }
    }

    #[tokio::test]
    async fn test_approval_request_and_response() {
        let manager = ApprovalManager::new();
        let instance_id = Uuid::new_v4();

        let (request, channel) =
            manager.request_approval(instance_id, draft(1_000.0, 0.6), Duration::from_secs(60));
        assert!(manager.get_request(request.id).unwrap().is_pending());
        assert!(manager.is_awaiting(instance_id));

        assert!(manager.approve(instance_id, "operator1", Some("fine".to_string())));

        let resolution = channel.wait(Duration::from_secs(60)).await;
        assert_eq!(resolution.outcome, SignalOutcome::Approved);

        let stored = manager.record_resolution(request.id, &resolution).unwrap();
        assert_eq!(stored.status, ApprovalStatus::Approved);
        assert_eq!(stored.reviewer.as_deref(), Some("operator1"));
        assert!(manager.pending_requests().is_empty());

        // Resolved requests are handed off, not retained
        assert!(manager.get_request(request.id).is_none());
        assert_eq!(manager.open_request_count(), 0);
        assert!(manager.record_resolution(request.id, &resolution).is_none());
    }

    #[tokio::test]
    async fn test_second_signal_is_not_delivered() {
        let manager = ApprovalManager::new();
        let instance_id = Uuid::new_v4();
        let (_request, _channel) =
            manager.request_approval(instance_id, draft(1_000.0, 0.6), Duration::from_secs(60));

        assert!(manager.reject(instance_id, "operator2", None));
        assert!(!manager.approve(instance_id, "operator3", None));
        assert!(!manager.approve(Uuid::new_v4(), "operator3", None));
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_resolution_closes_route() {
        let manager = ApprovalManager::new();
        let instance_id = Uuid::new_v4();
        let (request, channel) =
            manager.request_approval(instance_id, draft(1_000.0, 0.6), Duration::from_millis(50));

        let resolution = channel.wait(Duration::from_millis(50)).await;
        let stored = manager.record_resolution(request.id, &resolution).unwrap();
        assert_eq!(stored.status, ApprovalStatus::TimedOut);
        assert_eq!(stored.reviewer.as_deref(), Some("timeout"));

        assert!(!manager.approve(instance_id, "late", None));
        assert!(manager.get_request(request.id).is_none());
        assert!(!manager.is_awaiting(instance_id));
    }

    #[test]
    fn test_risk_factors_and_priority() {
        let mut d = draft(60_000.0, 0.5);
        d.previous_violations = 2;
        d.unusual_pattern = true;
        let factors = d.risk_factors();
        assert_eq!(factors.len(), 4);
        assert!(factors.contains("low_ai_confidence"));
        assert_eq!(d.priority(), Priority::Critical);

        assert_eq!(draft(20_000.0, 0.9).priority(), Priority::High);
        assert_eq!(draft(6_000.0, 0.9).priority(), Priority::Medium);
        assert_eq!(draft(100.0, 0.9).priority(), Priority::Low);
        assert!(draft(100.0, 0.9).risk_factors().is_empty());

        let mut closure = draft(0.0, 0.9);
        closure.operation_type = "account_closure".to_string();
        assert_eq!(closure.priority(), Priority::High);

        let mut urgent = draft(0.0, 0.9);
        urgent.urgency = Some(Priority::High);
        assert_eq!(urgent.priority(), Priority::Medium);
    }

    #[test]
    fn test_queue_orders_by_priority() {
        let manager = ApprovalManager::new();
        let (_low, _c1) =
            manager.request_approval(Uuid::new_v4(), draft(100.0, 0.5), Duration::from_secs(60));
        let (critical, _c2) =
            manager.request_approval(Uuid::new_v4(), draft(90_000.0, 0.5), Duration::from_secs(60));

        let queue = manager.pending_requests();
        assert_eq!(queue.len(), 2);
        assert_eq!(queue[0].id, critical.id);
    }
}
