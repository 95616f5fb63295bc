//! Ordered step execution with review checkpoints

use crate::error::WorkflowError;
use crate::models::workflow::{InstanceStatus, ReviewDecision};
use crate::workflow::approval_manager::ApprovalManager;
use crate::workflow::gate::ConfidenceGate;
use crate::workflow::instance::WorkflowInstance;
use crate::workflow::step::{ReviewCheckpoint, StepOutcome, WorkflowStep};
use std::sync::Arc;
use std::time::Duration;

/// Runs the steps of one instance strictly in order
pub struct StepSequencer {
    gate: ConfidenceGate,
    approvals: Arc<ApprovalManager>,
    approval_timeout: Duration,
}

impl StepSequencer {
    pub fn new(
        gate: ConfidenceGate,
        approvals: Arc<ApprovalManager>,
        approval_timeout: Duration,
    ) -> Self {
        Self {
            gate,
            approvals,
            approval_timeout,
        }
    }

    pub fn gate(&self) -> &ConfidenceGate {
        &self.gate
    }

    /// Run every step; the first failing step aborts the rest
    pub async fn run(
        &self,
        instance: &mut WorkflowInstance,
        steps: &[Box<dyn WorkflowStep>],
    ) -> Result<(), WorkflowError> {
        instance.status = InstanceStatus::Running;

        for step in steps {
            tracing::debug!(instance_id = %instance.id, step = step.name(), "Running step");

            match step.run(instance).await {
                Ok(StepOutcome::Continue) => {}
                Ok(StepOutcome::Suspend(checkpoint)) => {
                    self.review(instance, checkpoint).await;
                }
                Err(e) => {
                    instance.record_history(step.name(), false);
                    instance.status = InstanceStatus::Failed;
                    return Err(WorkflowError::step_failure(step.name(), &e));
                }
            }

            instance.record_history(step.name(), true);
        }

        instance.status = InstanceStatus::Succeeded;
        Ok(())
    }

    /// Consult the gate and, if it asks for a human, block until a signal or the deadline
    async fn review(&self, instance: &mut WorkflowInstance, checkpoint: ReviewCheckpoint) {
        let decision = self.gate.evaluate(
            &checkpoint.operation_type,
            checkpoint.confidence,
            checkpoint.value,
            checkpoint.risk_level,
            checkpoint.force_review,
        );
        instance.confidence = Some(checkpoint.confidence);

        let Some(reason) = decision.reason else {
            instance.audit(
                "auto_approved",
                "ai_system",
                format!(
                    "{} approved at confidence {:.2}",
                    checkpoint.operation_type, checkpoint.confidence
                ),
            );
            tracing::info!(
                instance_id = %instance.id,
                operation_type = %checkpoint.operation_type,
                confidence = checkpoint.confidence,
                "Decision auto-approved"
            );
            instance.review = Some(ReviewDecision::automatic(checkpoint.confidence));
            return;
        };

        let (request, channel) = self.approvals.request_approval(
            instance.id,
            checkpoint.draft(),
            self.approval_timeout,
        );
        instance.status = InstanceStatus::AwaitingSignal;
        instance.audit("human_review_requested", "system", reason.to_string());
        tracing::warn!(
            instance_id = %instance.id,
            conversation_id = %instance.conversation_id,
            approval_id = %request.id,
            operation_type = %checkpoint.operation_type,
            reason = %reason,
            "Human review required"
        );

        let resolution = channel.wait(self.approval_timeout).await;
        let request_id = request.id;
        let request = self
            .approvals
            .record_resolution(request_id, &resolution)
            .unwrap_or(request);
        instance.approvals.push(request);

        let review = ReviewDecision::from_resolution(
            &resolution,
            checkpoint.confidence,
            request_id,
            reason.to_string(),
        );
        instance.audit(
            review.resolution().as_str(),
            resolution.approver_id.clone(),
            resolution.comment.clone().unwrap_or_default(),
        );
        if review.execution_allowed {
            tracing::info!(
                instance_id = %instance.id,
                approver = %resolution.approver_id,
                "Review approved"
            );
        } else {
            tracing::warn!(
                instance_id = %instance.id,
                approver = %resolution.approver_id,
                outcome = ?resolution.outcome,
                "Review did not approve execution"
            );
        }

        instance.review = Some(review);
        instance.status = InstanceStatus::Running;
    }
}
