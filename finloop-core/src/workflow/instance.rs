//! Runtime state of one workflow instance

use crate::models::results::StepResult;
use crate::models::workflow::{
    ApprovalRequest, AuditEntry, HistoryEntry, InstanceStatus, ReviewDecision, WorkflowKind,
    WorkflowRequest,
};
use crate::services::business::UserProfile;
use crate::workflow::compensation::CompensationLedger;
use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::{Map, Value};
use uuid::Uuid;

/// One running workflow. Everything mutable about a run lives here and is owned by the
/// task executing it.
#[derive(Debug, Clone)]
pub struct WorkflowInstance {
    pub id: Uuid,
    pub conversation_id: String,
    pub user_id: String,
    pub kind: WorkflowKind,
    pub operation_type: String,
    /// Request parameters plus values written by steps
    pub context: Map<String, Value>,
    pub status: InstanceStatus,
    pub history: Vec<HistoryEntry>,
    pub audit_trail: Vec<AuditEntry>,
    pub ledger: CompensationLedger,
    /// Approval requests this instance opened, as last resolved
    pub approvals: Vec<ApprovalRequest>,
    pub review: Option<ReviewDecision>,
    pub results: Vec<StepResult>,
    /// Confidence of the decision submitted to the gate
    pub confidence: Option<f64>,
    /// Acting user, once validation looked it up
    pub user: Option<UserProfile>,
    pub started_at: DateTime<Utc>,
}

impl WorkflowInstance {
    pub fn new(id: Uuid, request: WorkflowRequest) -> Self {
        Self {
            id,
            conversation_id: request.conversation_id,
            user_id: request.user_id,
            kind: request.kind,
            operation_type: request.operation_type,
            context: request.parameters,
            status: InstanceStatus::Created,
            history: Vec::new(),
            audit_trail: Vec::new(),
            ledger: CompensationLedger::new(),
            approvals: Vec::new(),
            review: None,
            results: Vec::new(),
            confidence: None,
            user: None,
            started_at: Utc::now(),
        }
    }

    pub fn record_history(&mut self, action: impl Into<String>, success: bool) {
        self.history.push(HistoryEntry {
            action: action.into(),
            timestamp: Utc::now(),
            success,
        });
    }

    pub fn audit(
        &mut self,
        action: impl Into<String>,
        actor: impl Into<String>,
        detail: impl Into<String>,
    ) {
        self.audit_trail.push(AuditEntry {
            action: action.into(),
            timestamp: Utc::now(),
            actor: actor.into(),
            detail: detail.into(),
        });
    }

    /// Whether effectful steps may run. Instances without a review checkpoint so far
    /// are allowed.
    pub fn execution_allowed(&self) -> bool {
        self.review
            .as_ref()
            .map_or(true, |review| review.execution_allowed)
    }

    /// The user resolved during validation
    pub fn acting_user(&self) -> Result<&UserProfile> {
        self.user
            .as_ref()
            .context("Acting user was not resolved during validation")
    }

    pub fn param_str(&self, key: &str) -> Option<&str> {
        self.context.get(key).and_then(Value::as_str)
    }

    /// Numeric parameter; numeric strings are accepted too
    pub fn param_f64(&self, key: &str) -> Option<f64> {
        match self.context.get(key)? {
            Value::Number(n) => n.as_f64(),
            Value::String(s) => s.trim().parse().ok(),
            _ => None,
        }
    }

    pub fn param_bool(&self, key: &str) -> bool {
        match self.context.get(key) {
            Some(Value::Bool(b)) => *b,
            Some(Value::String(s)) => matches!(s.as_str(), "true" | "1" | "yes"),
            _ => false,
        }
    }

    pub fn param_strings(&self, key: &str) -> Vec<String> {
        match self.context.get(key) {
            Some(Value::Array(items)) => items
                .iter()
                .filter_map(Value::as_str)
                .map(str::to_string)
                .collect(),
            Some(Value::String(s)) if !s.is_empty() => {
                s.split(',').map(|item| item.trim().to_string()).collect()
            }
            _ => Vec::new(),
        }
    }

    /// Store a typed value in the context
    pub fn put<T: Serialize>(&mut self, key: &str, value: &T) -> Result<()> {
        let value = serde_json::to_value(value)
            .with_context(|| format!("Failed to serialize context value '{}'", key))?;
        self.context.insert(key.to_string(), value);
        Ok(())
    }

    /// Read back a typed value written by an earlier step
    pub fn take<T: DeserializeOwned>(&self, key: &str) -> Result<T> {
        let value = self
            .context
            .get(key)
            .with_context(|| format!("Context value '{}' missing", key))?;
        serde_json::from_value(value.clone())
            .with_context(|| format!("Context value '{}' has an unexpected shape", key))
    }

    pub fn elapsed_ms(&self) -> u64 {
        (Utc::now() - self.started_at).num_milliseconds().max(0) as u64
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::results::TradeOrder;
    use serde_json::json;

    fn instance() -> WorkflowInstance {
        let request = WorkflowRequest::new(WorkflowKind::Trading, "buy", "user_1")
            .with_parameter("size", "0.25")
            .with_parameter("force_human_review", true)
            .with_parameter("documents", json!(["passport", "utility_bill"]));
        WorkflowInstance::new(Uuid::new_v4(), request)
    }

    #[test]
    fn test_parameter_accessors() {
        let instance = instance();
        assert_eq!(instance.param_f64("size"), Some(0.25));
        assert!(instance.param_bool("force_human_review"));
        assert!(!instance.param_bool("absent"));
        assert_eq!(instance.param_strings("documents").len(), 2);
        assert_eq!(instance.status, InstanceStatus::Created);
        assert!(instance.execution_allowed());
    }

    #[test]
    fn test_typed_context_values() {
        let mut instance = instance();
        let order = TradeOrder {
            id: "order_1".to_string(),
            side: "buy".to_string(),
            symbol: "BTC/USD".to_string(),
            amount: 100.0,
        };
        instance.put("order", &order).unwrap();

        let restored: TradeOrder = instance.take("order").unwrap();
        assert_eq!(restored, order);
        assert!(instance.take::<TradeOrder>("missing").is_err());
        assert!(instance.acting_user().is_err());
    }
}
