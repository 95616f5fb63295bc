//! Top-level driver of one workflow instance

use crate::error::WorkflowError;
use crate::models::workflow::{
    EnvelopeMetadata, InstanceStatus, ResultEnvelope, WorkflowRequest,
};
use crate::services::decision_store::{AuditRecorder, DecisionRecord};
use crate::workflow::definitions::WorkflowDefinition;
use crate::workflow::instance::WorkflowInstance;
use crate::workflow::sequencer::StepSequencer;
use chrono::Utc;
use serde_json::{json, Value};
use std::sync::Arc;
use uuid::Uuid;

/// Envelope of a finished run together with the instance that produced it
#[derive(Debug, Clone)]
pub struct CompletedRun {
    pub envelope: ResultEnvelope,
    pub instance: WorkflowInstance,
}

/// Runs one workflow definition from validation to envelope
pub struct WorkflowExecutor {
    definition: Arc<dyn WorkflowDefinition>,
    sequencer: Arc<StepSequencer>,
    audit: AuditRecorder,
    /// Confidence under which a recorded decision is flagged as needing approval
    review_floor: f64,
}

impl WorkflowExecutor {
    pub fn new(
        definition: Arc<dyn WorkflowDefinition>,
        sequencer: Arc<StepSequencer>,
        audit: AuditRecorder,
        review_floor: f64,
    ) -> Self {
        Self {
            definition,
            sequencer,
            audit,
            review_floor,
        }
    }

    /// Execute the request to completion. Every path ends in a well-formed envelope.
    pub async fn run(&self, instance_id: Uuid, request: WorkflowRequest) -> CompletedRun {
        let mut instance = WorkflowInstance::new(instance_id, request);
        let metadata = json!({
            "instance_id": instance.id,
            "workflow": instance.kind,
            "operation_type": instance.operation_type,
            "started_at": instance.started_at,
        });

        tracing::info!(
            instance_id = %instance.id,
            conversation_id = %instance.conversation_id,
            workflow = %instance.kind,
            operation_type = %instance.operation_type,
            "Workflow started"
        );
        self.audit
            .record_start(
                &instance.conversation_id,
                self.definition.agent_type(),
                &instance.user_id,
                metadata,
            )
            .await;

        let steps = match self.definition.plan(&instance.operation_type) {
            Ok(steps) => steps,
            Err(e) => return self.reject(instance, e).await,
        };

        if let Err(e) = self.definition.validate(&mut instance).await {
            return self.reject(instance, e).await;
        }

        if let Err(e) = self.sequencer.run(&mut instance, &steps).await {
            return self.fail(instance, e).await;
        }

        let output = match self.definition.finish(&instance) {
            Ok(output) => output,
            Err(e) => {
                instance.status = InstanceStatus::Failed;
                let error = WorkflowError::step_failure("finish", &e);
                return self.fail(instance, error).await;
            }
        };

        let confidence = instance.confidence.unwrap_or(0.0);
        let reasoning = serde_json::to_value(&output).unwrap_or(Value::Null);
        self.audit
            .record_decision(
                &instance.conversation_id,
                DecisionRecord {
                    description: self.definition.describe(&instance),
                    reasoning,
                    confidence,
                    requires_approval: confidence < self.review_floor,
                },
            )
            .await;
        self.audit.record_completion(&instance.conversation_id).await;

        tracing::info!(
            instance_id = %instance.id,
            conversation_id = %instance.conversation_id,
            duration_ms = instance.elapsed_ms(),
            "Workflow succeeded"
        );

        let metadata = EnvelopeMetadata {
            instance_id: instance.id,
            conversation_id: instance.conversation_id.clone(),
            user_id: instance.user_id.clone(),
            timestamp: Utc::now(),
            duration_ms: instance.elapsed_ms(),
        };
        CompletedRun {
            envelope: ResultEnvelope::success(output, metadata),
            instance,
        }
    }

    /// Refusal before any step ran; nothing to undo
    async fn reject(&self, mut instance: WorkflowInstance, error: WorkflowError) -> CompletedRun {
        tracing::warn!(
            instance_id = %instance.id,
            conversation_id = %instance.conversation_id,
            error = %error,
            "Workflow rejected before execution"
        );
        instance.status = InstanceStatus::Failed;
        self.audit
            .record_failure(&instance.conversation_id, &error.to_string())
            .await;

        CompletedRun {
            envelope: ResultEnvelope::failure(&error, instance.conversation_id.clone(), false),
            instance,
        }
    }

    /// Step failure: record it, then replay the ledger
    async fn fail(&self, mut instance: WorkflowInstance, error: WorkflowError) -> CompletedRun {
        tracing::error!(
            instance_id = %instance.id,
            conversation_id = %instance.conversation_id,
            error = %error,
            "Workflow failed"
        );
        self.audit
            .record_failure(&instance.conversation_id, &error.to_string())
            .await;

        let compensated = if error.triggers_rollback() {
            instance.status = InstanceStatus::Compensating;
            let registry = self.definition.compensations();
            let compensated = instance.ledger.rollback(&registry).await;
            instance.status = InstanceStatus::Compensated;

            if !compensated {
                tracing::warn!(
                    instance_id = %instance.id,
                    "Rollback finished with failed compensations"
                );
            }
            compensated
        } else {
            false
        };

        CompletedRun {
            envelope: ResultEnvelope::failure(
                &error,
                instance.conversation_id.clone(),
                compensated,
            ),
            instance,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::configuration::GateThresholds;
    use crate::models::workflow::WorkflowKind;
    use crate::services::decision_store::{ConversationEvent, InMemoryDecisionStore};
    use crate::services::simulated::SimulatedUserDirectory;
    use crate::workflow::approval_manager::ApprovalManager;
    use crate::workflow::definitions::HumanReviewWorkflow;
    use crate::workflow::gate::ConfidenceGate;
    use std::time::Duration;

    fn executor(store: Arc<InMemoryDecisionStore>) -> WorkflowExecutor {
        let thresholds = GateThresholds::default();
        let sequencer = StepSequencer::new(
            ConfidenceGate::new(thresholds.clone()),
            Arc::new(ApprovalManager::new()),
            Duration::from_secs(60),
        );
        WorkflowExecutor::new(
            Arc::new(HumanReviewWorkflow::new(&thresholds)),
            Arc::new(sequencer),
            AuditRecorder::new(store),
            0.7,
        )
    }

    #[tokio::test]
    async fn test_unknown_operation_is_rejected_without_rollback() {
        let store = Arc::new(InMemoryDecisionStore::new());
        let request = WorkflowRequest::new(WorkflowKind::HumanReview, "launch_rocket", "u1");
        let conversation_id = request.conversation_id.clone();

        let run = executor(store.clone()).run(Uuid::new_v4(), request).await;

        assert!(!run.envelope.success);
        assert_eq!(run.envelope.compensated, Some(false));
        assert_eq!(run.envelope.error_kind.as_deref(), Some("invalid_operation_type"));
        assert!(run.instance.history.is_empty());

        let events = store.events_for(&conversation_id);
        assert!(matches!(
            events.last(),
            Some(ConversationEvent::Ended { status, .. }) if status == "failed"
        ));
    }

    #[tokio::test]
    async fn test_success_records_decision_with_review_floor() {
        let store = Arc::new(InMemoryDecisionStore::new());
        let request = WorkflowRequest::new(WorkflowKind::HumanReview, "general_operation", "u1")
            .with_parameter("confidence", 0.9)
            .with_parameter("value", 100.0);
        let conversation_id = request.conversation_id.clone();

        let run = executor(store.clone()).run(Uuid::new_v4(), request).await;

        assert!(run.envelope.success);
        assert_eq!(run.instance.status, InstanceStatus::Succeeded);
        let decisions = store.decisions_for(&conversation_id);
        assert_eq!(decisions.len(), 1);
        assert_eq!(decisions[0].confidence, 0.9);
        assert!(!decisions[0].requires_approval);
    }

    #[tokio::test]
    async fn test_missing_user_fails_validation() {
        use crate::services::simulated::SimulatedTradingService;
        use crate::workflow::definitions::TradingWorkflow;

        let thresholds = GateThresholds::default();
        let executor = WorkflowExecutor::new(
            Arc::new(TradingWorkflow::new(
                Arc::new(SimulatedUserDirectory::new()),
                Arc::new(SimulatedTradingService::new()),
            )),
            Arc::new(StepSequencer::new(
                ConfidenceGate::new(thresholds),
                Arc::new(ApprovalManager::new()),
                Duration::from_secs(60),
            )),
            AuditRecorder::new(Arc::new(InMemoryDecisionStore::new())),
            0.7,
        );

        let run = executor
            .run(Uuid::new_v4(), WorkflowRequest::new(WorkflowKind::Trading, "buy", "ghost"))
            .await;

        assert!(!run.envelope.success);
        assert_eq!(run.envelope.error.as_deref(), Some("Validation failed: User not found: ghost"));
        assert_eq!(run.envelope.compensated, Some(false));
    }
}
