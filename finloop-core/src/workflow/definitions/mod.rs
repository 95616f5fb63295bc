//! Built-in workflow definitions

pub mod compliance;
pub mod customer_service;
pub mod human_review;
pub mod risk;
pub mod trading;

pub use compliance::ComplianceWorkflow;
pub use customer_service::CustomerServiceWorkflow;
pub use human_review::HumanReviewWorkflow;
pub use risk::RiskAssessmentWorkflow;
pub use trading::TradingWorkflow;

use crate::error::WorkflowError;
use crate::models::configuration::GateThresholds;
use crate::models::results::WorkflowOutput;
use crate::models::workflow::{ReviewDecision, WorkflowKind};
use crate::services::business::{Collaborators, UserDirectory, UserProfile};
use crate::workflow::compensation::CompensationRegistry;
use crate::workflow::instance::WorkflowInstance;
use crate::workflow::step::StepPlan;
use anyhow::Context;
use async_trait::async_trait;
use std::sync::Arc;

/// A workflow variant: how to plan, validate, undo and report one kind of run
#[async_trait]
pub trait WorkflowDefinition: Send + Sync {
    fn kind(&self) -> WorkflowKind;

    /// Agent type recorded when the conversation starts
    fn agent_type(&self) -> &'static str;

    /// Operation-type tags accepted by [`WorkflowDefinition::plan`]
    fn operation_types(&self) -> Vec<String>;

    /// Gate table keys this workflow submits decisions under
    fn gate_operations(&self) -> Vec<String>;

    /// Select the ordered steps for an operation type
    fn plan(&self, operation_type: &str) -> Result<StepPlan, WorkflowError>;

    /// Check input and resolve the acting user before any step runs
    async fn validate(&self, instance: &mut WorkflowInstance) -> Result<(), WorkflowError>;

    /// Undo handlers for the compensation types this workflow registers
    fn compensations(&self) -> CompensationRegistry;

    /// Assemble the result of a successful run
    fn finish(&self, instance: &WorkflowInstance) -> anyhow::Result<WorkflowOutput>;

    /// One-line description of the decision, for the decision store
    fn describe(&self, instance: &WorkflowInstance) -> String;
}

/// The five built-in definitions wired to a collaborator set
pub fn builtin(
    collaborators: &Collaborators,
    thresholds: &GateThresholds,
) -> Vec<Arc<dyn WorkflowDefinition>> {
    vec![
        Arc::new(ComplianceWorkflow::new(
            collaborators.users.clone(),
            collaborators.compliance.clone(),
        )),
        Arc::new(RiskAssessmentWorkflow::new(
            collaborators.users.clone(),
            collaborators.risk.clone(),
        )),
        Arc::new(CustomerServiceWorkflow::new(
            collaborators.intents.clone(),
            thresholds,
        )),
        Arc::new(HumanReviewWorkflow::new(thresholds)),
        Arc::new(TradingWorkflow::new(
            collaborators.users.clone(),
            collaborators.trading.clone(),
        )),
    ]
}

pub(crate) fn invalid_operation(kind: WorkflowKind, operation_type: &str) -> WorkflowError {
    WorkflowError::InvalidOperationType {
        workflow: kind,
        operation_type: operation_type.to_string(),
    }
}

/// Look up the acting user and attach it to the instance
pub(crate) async fn resolve_user(
    users: &dyn UserDirectory,
    instance: &mut WorkflowInstance,
) -> Result<UserProfile, WorkflowError> {
    let user = users
        .find_user(&instance.user_id)
        .await
        .map_err(|e| WorkflowError::Validation {
            reason: "User lookup failed".to_string(),
            details: vec![format!("{:#}", e)],
        })?
        .ok_or_else(|| WorkflowError::validation(format!("User not found: {}", instance.user_id)))?;

    instance.user = Some(user.clone());
    Ok(user)
}

/// Review decision of a finished run
pub(crate) fn review_of(instance: &WorkflowInstance) -> anyhow::Result<ReviewDecision> {
    instance
        .review
        .clone()
        .context("Workflow finished without passing its review checkpoint")
}
