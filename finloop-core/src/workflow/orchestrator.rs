//! Workflow orchestration and lifecycle management

use crate::error::WorkflowError;
use crate::models::configuration::Configuration;
use crate::models::workflow::{ApprovalRequest, ResultEnvelope, WorkflowKind, WorkflowRequest};
use crate::services::business::Collaborators;
use crate::services::decision_store::{AuditRecorder, DecisionStore};
use crate::workflow::approval_manager::ApprovalManager;
use crate::workflow::definitions::{builtin, WorkflowDefinition};
use crate::workflow::executor::{CompletedRun, WorkflowExecutor};
use crate::workflow::gate::ConfidenceGate;
use crate::workflow::sequencer::StepSequencer;
use crate::workflow::validator::WorkflowValidator;
use anyhow::{anyhow, Result};
use dashmap::DashMap;
use std::sync::Arc;
use tokio::task::JoinHandle;
use uuid::Uuid;

/// Workflow orchestrator managing active workflow instances
pub struct WorkflowOrchestrator {
    /// Running instance handles
    active_workflows: Arc<DashMap<Uuid, JoinHandle<CompletedRun>>>,
    /// Workflow definitions registry
    workflow_definitions: Arc<DashMap<WorkflowKind, Arc<dyn WorkflowDefinition>>>,
    /// Step runner shared by every instance
    sequencer: Arc<StepSequencer>,
    /// Decision store front
    audit: AuditRecorder,
    /// Approval manager
    approval_manager: Arc<ApprovalManager>,
    config: Configuration,
}

impl WorkflowOrchestrator {
    /// Create an orchestrator with no registered workflows. Rejects invalid configuration.
    pub fn new(
        config: Configuration,
        store: Arc<dyn DecisionStore>,
    ) -> Result<Self, WorkflowError> {
        let validation = WorkflowValidator::validate_configuration(&config);
        if !validation.is_valid() {
            return Err(WorkflowError::Configuration(
                validation.error_messages().join("; "),
            ));
        }

        let approval_manager = Arc::new(ApprovalManager::new());
        let sequencer = StepSequencer::new(
            ConfidenceGate::new(config.thresholds.clone()),
            approval_manager.clone(),
            config.approval_timeout(),
        );

        Ok(Self {
            active_workflows: Arc::new(DashMap::new()),
            workflow_definitions: Arc::new(DashMap::new()),
            sequencer: Arc::new(sequencer),
            audit: AuditRecorder::new(store),
            approval_manager,
            config,
        })
    }

    /// Orchestrator with the five built-in workflows wired to `collaborators`
    pub fn with_builtin(
        config: Configuration,
        collaborators: &Collaborators,
        store: Arc<dyn DecisionStore>,
    ) -> Result<Self, WorkflowError> {
        let definitions = builtin(collaborators, &config.thresholds);

        let validation = WorkflowValidator::validate_definitions(&config, &definitions);
        for warning in &validation.warnings {
            tracing::warn!("{}", warning);
        }
        if !validation.is_valid() {
            return Err(WorkflowError::Configuration(
                validation.error_messages().join("; "),
            ));
        }

        let orchestrator = Self::new(config, store)?;
        for definition in definitions {
            orchestrator.register(definition);
        }
        Ok(orchestrator)
    }

    /// Get approval manager reference
    pub fn approval_manager(&self) -> Arc<ApprovalManager> {
        self.approval_manager.clone()
    }

    pub fn config(&self) -> &Configuration {
        &self.config
    }

    /// Register a workflow definition, replacing any previous one of the same kind
    pub fn register(&self, definition: Arc<dyn WorkflowDefinition>) {
        let kind = definition.kind();
        if self.workflow_definitions.insert(kind, definition).is_some() {
            tracing::warn!(workflow = %kind, "Replaced registered workflow definition");
        }
    }

    /// Start a workflow instance on its own task and return its id.
    ///
    /// The finished run stays registered until it is taken with `wait_for_run`,
    /// `wait_for_completion` or `collect_finished`.
    pub fn start(&self, request: WorkflowRequest) -> Result<Uuid, WorkflowError> {
        let definition = self
            .workflow_definitions
            .get(&request.kind)
            .map(|entry| entry.value().clone())
            .ok_or(WorkflowError::UnknownWorkflow(request.kind))?;

        let instance_id = Uuid::new_v4();
        let executor = WorkflowExecutor::new(
            definition,
            self.sequencer.clone(),
            self.audit.clone(),
            self.config.review_floor,
        );

        let kind = request.kind;
        let handle = tokio::spawn(async move {
            let run = executor.run(instance_id, request).await;
            tracing::info!(
                instance_id = %instance_id,
                success = run.envelope.success,
                status = ?run.instance.status,
                "Workflow instance finished"
            );
            run
        });

        self.active_workflows.insert(instance_id, handle);

        tracing::info!(
            workflow = %kind,
            instance_id = %instance_id,
            "Started workflow instance"
        );

        Ok(instance_id)
    }

    /// Approve the pending review of an instance. Returns whether the signal was accepted.
    pub fn approve(&self, instance_id: Uuid, approver_id: &str, comment: Option<String>) -> bool {
        self.approval_manager.approve(instance_id, approver_id, comment)
    }

    /// Reject the pending review of an instance. Returns whether the signal was accepted.
    pub fn reject(&self, instance_id: Uuid, approver_id: &str, comment: Option<String>) -> bool {
        self.approval_manager.reject(instance_id, approver_id, comment)
    }

    /// Review queue across all instances
    pub fn pending_approvals(&self) -> Vec<ApprovalRequest> {
        self.approval_manager.pending_requests()
    }

    /// Check if an instance is currently running
    pub fn is_running(&self, instance_id: Uuid) -> bool {
        self.active_workflows
            .get(&instance_id)
            .is_some_and(|handle| !handle.is_finished())
    }

    /// Get count of active workflows
    pub fn active_count(&self) -> usize {
        self.active_workflows
            .iter()
            .filter(|entry| !entry.value().is_finished())
            .count()
    }

    /// Wait for an instance and take its envelope and final state
    pub async fn wait_for_run(&self, instance_id: Uuid) -> Result<CompletedRun> {
        let (_key, handle) = self
            .active_workflows
            .remove(&instance_id)
            .ok_or_else(|| anyhow!("Instance {} not found or already collected", instance_id))?;

        handle
            .await
            .map_err(|e| anyhow!("Workflow instance {} task failed: {}", instance_id, e))
    }

    /// Wait for an instance to finish and return its envelope
    pub async fn wait_for_completion(&self, instance_id: Uuid) -> Result<ResultEnvelope> {
        Ok(self.wait_for_run(instance_id).await?.envelope)
    }

    /// Take every finished run out of the registry, for callers that started
    /// instances without waiting on them individually
    pub async fn collect_finished(&self) -> Vec<CompletedRun> {
        let finished: Vec<Uuid> = self
            .active_workflows
            .iter()
            .filter(|entry| entry.value().is_finished())
            .map(|entry| *entry.key())
            .collect();

        let mut runs = Vec::with_capacity(finished.len());
        for instance_id in finished {
            match self.wait_for_run(instance_id).await {
                Ok(run) => runs.push(run),
                Err(e) => tracing::warn!(
                    instance_id = %instance_id,
                    error = %e,
                    "Could not collect finished instance"
                ),
            }
        }
        runs
    }

    /// Start and wait in one call
    pub async fn run(&self, request: WorkflowRequest) -> Result<CompletedRun> {
        let instance_id = self.start(request)?;
        self.wait_for_run(instance_id).await
    }

    /// List all registered workflow kinds
    pub fn list_workflows(&self) -> Vec<WorkflowKind> {
        let mut kinds: Vec<_> = self
            .workflow_definitions
            .iter()
            .map(|entry| *entry.key())
            .collect();
        kinds.sort_by_key(|kind| kind.as_str());
        kinds
    }

    /// Get a workflow definition
    pub fn get_workflow_definition(
        &self,
        kind: WorkflowKind,
    ) -> Option<Arc<dyn WorkflowDefinition>> {
        self.workflow_definitions
            .get(&kind)
            .map(|entry| entry.value().clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::decision_store::InMemoryDecisionStore;

    fn orchestrator() -> WorkflowOrchestrator {
        WorkflowOrchestrator::with_builtin(
            Configuration::default(),
            &Collaborators::simulated(),
            Arc::new(InMemoryDecisionStore::new()),
        )
        .unwrap()
    }

    #[tokio::test]
    async fn test_orchestrator_start_workflow() {
        let orchestrator = orchestrator();
        let request =
            WorkflowRequest::new(WorkflowKind::HumanReview, "general_operation", "user_demo")
                .with_parameter("confidence", 0.95);

        let instance_id = orchestrator.start(request).unwrap();
        let envelope = orchestrator.wait_for_completion(instance_id).await.unwrap();
        assert!(envelope.success);

        // Collected runs are gone
        assert!(!orchestrator.is_running(instance_id));
        assert!(orchestrator.wait_for_completion(instance_id).await.is_err());
    }

    #[tokio::test]
    async fn test_unawaited_runs_are_collected() {
        let orchestrator = orchestrator();
        let mut ids = Vec::new();
        for _ in 0..3 {
            let request =
                WorkflowRequest::new(WorkflowKind::HumanReview, "general_operation", "user_demo")
                    .with_parameter("confidence", 0.95);
            ids.push(orchestrator.start(request).unwrap());
        }

        tokio::time::timeout(std::time::Duration::from_secs(5), async {
            while orchestrator.active_count() > 0 {
                tokio::time::sleep(std::time::Duration::from_millis(5)).await;
            }
        })
        .await
        .unwrap();

        let runs = orchestrator.collect_finished().await;
        assert_eq!(runs.len(), 3);
        assert!(runs.iter().all(|run| run.envelope.success));
        assert!(runs.iter().all(|run| ids.contains(&run.instance.id)));

        // Nothing left behind
        assert!(orchestrator.collect_finished().await.is_empty());
        assert!(orchestrator.wait_for_run(ids[0]).await.is_err());
        assert_eq!(orchestrator.approval_manager().open_request_count(), 0);
    }

    #[tokio::test]
    async fn test_orchestrator_list_workflows() {
        let orchestrator = orchestrator();
        let workflows = orchestrator.list_workflows();
        assert_eq!(workflows.len(), 5);
        assert!(workflows.contains(&WorkflowKind::Trading));
        assert!(orchestrator
            .get_workflow_definition(WorkflowKind::Compliance)
            .is_some());
    }

    #[test]
    fn test_unregistered_workflow_is_refused() {
        let orchestrator = WorkflowOrchestrator::new(
            Configuration::default(),
            Arc::new(InMemoryDecisionStore::new()),
        )
        .unwrap();

        let err = orchestrator
            .start(WorkflowRequest::new(WorkflowKind::Trading, "buy", "user_demo"))
            .unwrap_err();
        assert_eq!(err, WorkflowError::UnknownWorkflow(WorkflowKind::Trading));
    }

    #[test]
    fn test_invalid_configuration_is_rejected() {
        let config = Configuration {
            review_floor: 2.0,
            ..Configuration::default()
        };
        let result = WorkflowOrchestrator::new(config, Arc::new(InMemoryDecisionStore::new()));
        assert!(matches!(result, Err(WorkflowError::Configuration(_))));
    }
}
