//! Step abstraction driven by the sequencer

use crate::models::workflow::{Priority, RiskLevel};
use crate::workflow::approval_manager::ApprovalDraft;
use crate::workflow::instance::WorkflowInstance;
use anyhow::Result;
use async_trait::async_trait;
use serde_json::Value;

/// Decision submitted to the confidence gate by a step
#[derive(Debug, Clone)]
pub struct ReviewCheckpoint {
    /// Gate table key
    pub operation_type: String,
    pub confidence: f64,
    pub value: f64,
    pub risk_level: RiskLevel,
    pub force_review: bool,
    /// What the automation proposes
    pub ai_decision: Value,
    pub ai_reasoning: String,
    pub previous_violations: u32,
    pub unusual_pattern: bool,
    pub urgency: Option<Priority>,
}

impl ReviewCheckpoint {
    pub fn new(operation_type: impl Into<String>, confidence: f64) -> Self {
        Self {
            operation_type: operation_type.into(),
            confidence,
            value: 0.0,
            risk_level: RiskLevel::Low,
            force_review: false,
            ai_decision: Value::Null,
            ai_reasoning: String::new(),
            previous_violations: 0,
            unusual_pattern: false,
            urgency: None,
        }
    }

    pub fn with_value(mut self, value: f64) -> Self {
        self.value = value;
        self
    }

    pub fn with_risk_level(mut self, risk_level: RiskLevel) -> Self {
        self.risk_level = risk_level;
        self
    }

    pub fn force_review(mut self, force: bool) -> Self {
        self.force_review = force;
        self
    }

    pub fn with_decision(mut self, ai_decision: Value, ai_reasoning: impl Into<String>) -> Self {
        self.ai_decision = ai_decision;
        self.ai_reasoning = ai_reasoning.into();
        self
    }

    /// Pick up the reviewer hints shared by all workflows: `urgency`,
    /// `user_history.violations` and `unusual_pattern`
    pub fn with_hints_from(mut self, instance: &WorkflowInstance) -> Self {
        self.urgency = instance.param_str("urgency").and_then(|urgency| {
            match urgency.to_ascii_lowercase().as_str() {
                "critical" => Some(Priority::Critical),
                "high" => Some(Priority::High),
                "medium" => Some(Priority::Medium),
                "low" => Some(Priority::Low),
                _ => None,
            }
        });
        self.previous_violations = instance
            .context
            .get("user_history")
            .and_then(|history| history.get("violations"))
            .and_then(Value::as_u64)
            .unwrap_or(0) as u32;
        self.unusual_pattern = instance.param_bool("unusual_pattern");
        self
    }

    pub fn draft(&self) -> ApprovalDraft {
        ApprovalDraft {
            operation_type: self.operation_type.clone(),
            ai_decision: self.ai_decision.clone(),
            ai_reasoning: self.ai_reasoning.clone(),
            ai_confidence: self.confidence,
            operation_value: self.value,
            previous_violations: self.previous_violations,
            unusual_pattern: self.unusual_pattern,
            urgency: self.urgency,
        }
    }
}

/// What the sequencer does after a step returns
#[derive(Debug, Clone)]
pub enum StepOutcome {
    Continue,
    /// Consult the gate, possibly waiting for a human, then continue
    Suspend(ReviewCheckpoint),
}

/// One unit of work in a workflow plan
#[async_trait]
pub trait WorkflowStep: Send + Sync {
    /// Name recorded in the execution history
    fn name(&self) -> &str;

    async fn run(&self, instance: &mut WorkflowInstance) -> Result<StepOutcome>;
}

/// Plan made of boxed steps, run in order
pub type StepPlan = Vec<Box<dyn WorkflowStep>>;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::workflow::{WorkflowKind, WorkflowRequest};
    use serde_json::json;
    use uuid::Uuid;

    #[test]
    fn test_checkpoint_hints_from_parameters() {
        let request = WorkflowRequest::new(WorkflowKind::HumanReview, "large_withdrawal", "u1")
            .with_parameter("urgency", "critical")
            .with_parameter("user_history", json!({"violations": 3}))
            .with_parameter("unusual_pattern", true);
        let instance = WorkflowInstance::new(Uuid::new_v4(), request);

        let checkpoint = ReviewCheckpoint::new("large_withdrawal", 0.9)
            .with_value(100.0)
            .with_hints_from(&instance);
        let draft = checkpoint.draft();

        assert_eq!(draft.priority(), Priority::Critical);
        let factors = draft.risk_factors();
        assert!(factors.contains("previous_violations"));
        assert!(factors.contains("unusual_activity_pattern"));
        assert!(!factors.contains("low_ai_confidence"));
    }
}
