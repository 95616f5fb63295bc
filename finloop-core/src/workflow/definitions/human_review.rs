//! Generic human oversight of an automated decision

use super::{invalid_operation, review_of, WorkflowDefinition};
use crate::error::WorkflowError;
use crate::models::configuration::GateThresholds;
use crate::models::results::{HumanReviewOutput, ReviewFeedback, WorkflowOutput};
use crate::models::workflow::{
    DecisionMaker, FinalDecision, ReviewDecision, RiskLevel, WorkflowKind,
};
use crate::workflow::compensation::CompensationRegistry;
use crate::workflow::gate::ConfidenceGate;
use crate::workflow::instance::WorkflowInstance;
use crate::workflow::step::{ReviewCheckpoint, StepOutcome, StepPlan, WorkflowStep};
use anyhow::Result;
use async_trait::async_trait;
use serde_json::json;

const FEEDBACK_KEY: &str = "review_feedback";

/// Confidence assumed when the caller supplies none
pub const DEFAULT_AI_CONFIDENCE: f64 = 0.5;

fn ai_confidence(instance: &WorkflowInstance) -> f64 {
    instance
        .param_f64("confidence")
        .unwrap_or(DEFAULT_AI_CONFIDENCE)
}

fn operation_value(instance: &WorkflowInstance) -> f64 {
    instance.param_f64("value").unwrap_or(0.0)
}

/// Recommendation under review; an absent one means the operation as proposed
fn ai_recommends_approval(instance: &WorkflowInstance) -> bool {
    matches!(
        instance.param_str("recommendation").unwrap_or("approve"),
        "approve" | "proceed" | "allow"
    )
}

/// Agreement between the automation and the reviewer, for calibration
pub fn review_feedback(review: &ReviewDecision, ai_approved: bool) -> ReviewFeedback {
    let human_approved = review.final_decision == FinalDecision::Approved;
    let comment = review
        .comment
        .as_deref()
        .map(str::trim)
        .filter(|comment| !comment.is_empty());
    let disagreement = human_approved != ai_approved;

    let agreement = if !disagreement {
        1.0
    } else if comment.is_some() {
        0.5
    } else {
        0.0
    };

    let mut learning_points = Vec::new();
    let mut improvement_areas = Vec::new();

    if review.ai_overridden {
        learning_points.push(format!(
            "decision_override: {}",
            comment.unwrap_or("no reason given")
        ));
        improvement_areas.push("confidence_calibration".to_string());
    }
    if let (true, Some(comment)) = (disagreement, comment) {
        learning_points.push(format!("reviewer_adjustment: {}", comment));
        improvement_areas.push("risk_assessment".to_string());
    }
    if comment.is_some_and(|comment| comment.contains("policy")) {
        improvement_areas.push("policy_understanding".to_string());
    }

    ReviewFeedback {
        agreement,
        learning_points,
        improvement_areas,
    }
}

struct EvaluateConfidence {
    gate: ConfidenceGate,
}

#[async_trait]
impl WorkflowStep for EvaluateConfidence {
    fn name(&self) -> &str {
        "evaluate_confidence"
    }

    async fn run(&self, instance: &mut WorkflowInstance) -> Result<StepOutcome> {
        let confidence = ai_confidence(instance);
        let threshold = self.gate.confidence_threshold(&instance.operation_type);
        let evaluation = json!({
            "ai_confidence": confidence,
            "required_threshold": threshold,
            "meets_threshold": confidence >= threshold,
            "confidence_gap": (threshold - confidence).max(0.0),
        });
        instance.audit("confidence_evaluation", "system", evaluation.to_string());
        Ok(StepOutcome::Continue)
    }
}

struct CheckValueThreshold {
    gate: ConfidenceGate,
}

#[async_trait]
impl WorkflowStep for CheckValueThreshold {
    fn name(&self) -> &str {
        "check_value_threshold"
    }

    async fn run(&self, instance: &mut WorkflowInstance) -> Result<StepOutcome> {
        let value = operation_value(instance);
        let threshold = self.gate.value_threshold(&instance.operation_type);
        let check = json!({
            "operation_value": value,
            "threshold": threshold,
            "exceeds_threshold": value > threshold,
        });
        instance.audit("value_check", "system", check.to_string());
        Ok(StepOutcome::Continue)
    }
}

struct DetermineApproval;

#[async_trait]
impl WorkflowStep for DetermineApproval {
    fn name(&self) -> &str {
        "determine_approval"
    }

    async fn run(&self, instance: &mut WorkflowInstance) -> Result<StepOutcome> {
        let ai_decision = json!({
            "recommendation": instance.param_str("recommendation").unwrap_or("approve"),
            "confidence": ai_confidence(instance),
        });
        let reasoning = instance.param_str("reasoning").unwrap_or_default().to_string();

        let confidence = ai_confidence(instance);
        let checkpoint = ReviewCheckpoint::new(instance.operation_type.clone(), confidence)
            .with_value(operation_value(instance))
            .with_risk_level(RiskLevel::parse(
                instance.param_str("risk_level").unwrap_or("low"),
            ))
            .force_review(instance.param_bool("force_human_review"))
            .with_decision(ai_decision, reasoning)
            .with_hints_from(instance);

        Ok(StepOutcome::Suspend(checkpoint))
    }
}

struct ProcessDecision;

#[async_trait]
impl WorkflowStep for ProcessDecision {
    fn name(&self) -> &str {
        "process_decision"
    }

    async fn run(&self, instance: &mut WorkflowInstance) -> Result<StepOutcome> {
        let review = review_of(instance)?;
        let actor = review
            .approver_id
            .clone()
            .unwrap_or_else(|| "ai_system".to_string());
        let detail = json!({
            "final_decision": review.final_decision,
            "decision_maker": review.decision_maker,
            "ai_overridden": review.ai_overridden,
            "execution_allowed": review.execution_allowed,
        });
        instance.audit("decision_processed", actor, detail.to_string());
        Ok(StepOutcome::Continue)
    }
}

struct CollectFeedback;

#[async_trait]
impl WorkflowStep for CollectFeedback {
    fn name(&self) -> &str {
        "collect_feedback"
    }

    async fn run(&self, instance: &mut WorkflowInstance) -> Result<StepOutcome> {
        let review = review_of(instance)?;
        if review.decision_maker != DecisionMaker::Human {
            return Ok(StepOutcome::Continue);
        }

        let feedback = review_feedback(&review, ai_recommends_approval(instance));
        tracing::info!(
            conversation_id = %instance.conversation_id,
            agreement = feedback.agreement,
            improvement_areas = ?feedback.improvement_areas,
            "Reviewer feedback collected"
        );
        instance.put(FEEDBACK_KEY, &feedback)?;
        Ok(StepOutcome::Continue)
    }
}

pub struct HumanReviewWorkflow {
    gate: ConfidenceGate,
}

impl HumanReviewWorkflow {
    pub fn new(thresholds: &GateThresholds) -> Self {
        Self {
            gate: ConfidenceGate::new(thresholds.clone()),
        }
    }
}

#[async_trait]
impl WorkflowDefinition for HumanReviewWorkflow {
    fn kind(&self) -> WorkflowKind {
        WorkflowKind::HumanReview
    }

    fn agent_type(&self) -> &'static str {
        "human-in-the-loop"
    }

    /// Every operation named in the confidence table or the regulatory set
    fn operation_types(&self) -> Vec<String> {
        let thresholds = self.gate.thresholds();
        let mut operations: Vec<String> = thresholds
            .confidence
            .keys()
            .chain(thresholds.regulatory.iter())
            .cloned()
            .collect();
        operations.sort();
        operations.dedup();
        operations
    }

    fn gate_operations(&self) -> Vec<String> {
        self.operation_types()
    }

    fn plan(&self, operation_type: &str) -> Result<StepPlan, WorkflowError> {
        if !self.gate.thresholds().recognizes(operation_type) {
            return Err(invalid_operation(self.kind(), operation_type));
        }

        Ok(vec![
            Box::new(EvaluateConfidence {
                gate: self.gate.clone(),
            }),
            Box::new(CheckValueThreshold {
                gate: self.gate.clone(),
            }),
            Box::new(DetermineApproval),
            Box::new(ProcessDecision),
            Box::new(CollectFeedback),
        ])
    }

    async fn validate(&self, instance: &mut WorkflowInstance) -> Result<(), WorkflowError> {
        let mut errors = Vec::new();

        if let Some(confidence) = instance.param_f64("confidence") {
            if !(0.0..=1.0).contains(&confidence) {
                errors.push(format!("confidence must be within 0..=1 (got {})", confidence));
            }
        }
        let value = operation_value(instance);
        if !value.is_finite() || value < 0.0 {
            errors.push(format!("value must be a finite non-negative number (got {})", value));
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(WorkflowError::Validation {
                reason: "Invalid decision under review".to_string(),
                details: errors,
            })
        }
    }

    fn compensations(&self) -> CompensationRegistry {
        CompensationRegistry::new()
    }

    fn finish(&self, instance: &WorkflowInstance) -> Result<WorkflowOutput> {
        let feedback = if instance.context.contains_key(FEEDBACK_KEY) {
            Some(instance.take(FEEDBACK_KEY)?)
        } else {
            None
        };

        Ok(WorkflowOutput::HumanReview(HumanReviewOutput {
            operation_type: instance.operation_type.clone(),
            feedback,
            review: review_of(instance)?,
        }))
    }

    fn describe(&self, instance: &WorkflowInstance) -> String {
        format!("Human-in-the-loop decision: {}", instance.operation_type)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::workflow::{SignalOutcome, SignalResolution};
    use chrono::Utc;
    use uuid::Uuid;

    fn human(outcome: SignalOutcome, comment: Option<&str>, confidence: f64) -> ReviewDecision {
        let resolution = SignalResolution {
            outcome,
            approver_id: "analyst_1".to_string(),
            comment: comment.map(str::to_string),
            resolved_at: Utc::now(),
        };
        ReviewDecision::from_resolution(&resolution, confidence, Uuid::new_v4(), "test".into())
    }

    #[test]
    fn test_feedback_agreement() {
        let agreed = review_feedback(&human(SignalOutcome::Approved, None, 0.6), true);
        assert_eq!(agreed.agreement, 1.0);
        assert!(agreed.improvement_areas.is_empty());

        let overridden = review_feedback(
            &human(SignalOutcome::Rejected, Some("violates policy 7"), 0.9),
            true,
        );
        assert_eq!(overridden.agreement, 0.5);
        assert_eq!(
            overridden.improvement_areas,
            vec!["confidence_calibration", "risk_assessment", "policy_understanding"]
        );

        let silent = review_feedback(&human(SignalOutcome::Rejected, None, 0.5), true);
        assert_eq!(silent.agreement, 0.0);
        assert!(silent.learning_points.is_empty());
    }

    #[test]
    fn test_recognized_operations() {
        let workflow = HumanReviewWorkflow::new(&GateThresholds::default());
        let operations = workflow.operation_types();
        assert!(operations.contains(&"general_operation".to_string()));
        assert!(operations.contains(&"suspicious_activity".to_string()));
        assert!(workflow.plan("account_closure").is_ok());
        assert!(workflow.plan("teleport_funds").is_err());
    }
}
