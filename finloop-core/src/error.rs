//! Workflow error taxonomy

use crate::models::workflow::WorkflowKind;
use thiserror::Error;

/// Errors raised while planning or running a workflow instance
#[derive(Debug, Clone, Error, PartialEq)]
pub enum WorkflowError {
    /// Input or user validation failed before any step ran
    #[error("Validation failed: {reason}")]
    Validation {
        reason: String,
        details: Vec<String>,
    },

    /// The operation-type tag does not select a branch of the workflow
    #[error("Unknown {workflow} operation type: {operation_type}")]
    InvalidOperationType {
        workflow: WorkflowKind,
        operation_type: String,
    },

    /// A business step raised; triggers compensation
    #[error("Step '{step}' failed: {message}")]
    StepFailure { step: String, message: String },

    /// No definition registered for the requested workflow kind
    #[error("Workflow '{0}' is not registered")]
    UnknownWorkflow(WorkflowKind),

    /// Configuration rejected at startup
    #[error("Invalid configuration: {0}")]
    Configuration(String),
}

impl WorkflowError {
    pub fn validation(reason: impl Into<String>) -> Self {
        Self::Validation {
            reason: reason.into(),
            details: Vec::new(),
        }
    }

    /// Wrap a collaborator error raised inside a step. The alternate formatter keeps the
    /// anyhow context chain in the message.
    pub fn step_failure(step: &str, err: &anyhow::Error) -> Self {
        Self::StepFailure {
            step: step.to_string(),
            message: format!("{:#}", err),
        }
    }

    /// Whether this error runs the compensation ledger
    pub fn triggers_rollback(&self) -> bool {
        matches!(self, Self::StepFailure { .. })
    }

    /// Short machine-readable error label used in failure envelopes
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Validation { .. } => "validation_failure",
            Self::InvalidOperationType { .. } => "invalid_operation_type",
            Self::StepFailure { .. } => "step_failure",
            Self::UnknownWorkflow(_) => "unknown_workflow",
            Self::Configuration(_) => "configuration",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_step_failure_keeps_context_chain() {
        let err = anyhow::anyhow!("connection refused").context("AML screening failed");
        let wrapped = WorkflowError::step_failure("aml_screening", &err);

        assert!(wrapped.triggers_rollback());
        let message = wrapped.to_string();
        assert!(message.contains("aml_screening"));
        assert!(message.contains("connection refused"));
    }

    #[test]
    fn test_only_step_failures_roll_back() {
        assert!(!WorkflowError::validation("User not found").triggers_rollback());
        assert!(!WorkflowError::InvalidOperationType {
            workflow: WorkflowKind::Compliance,
            operation_type: "bogus".to_string(),
        }
        .triggers_rollback());
    }
}
