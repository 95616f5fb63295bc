//! Workflow orchestration module

pub mod approval_manager;
pub mod compensation;
pub mod definitions;
pub mod executor;
pub mod gate;
pub mod instance;
pub mod orchestrator;
pub mod persistence;
pub mod sequencer;
pub mod signal;
pub mod step;
pub mod validator;

pub use approval_manager::{ApprovalDraft, ApprovalManager};
pub use compensation::{
    CompensationHandle, CompensationHandler, CompensationLedger, CompensationRegistry,
    LoggingCompensation,
};
pub use definitions::WorkflowDefinition;
pub use executor::{CompletedRun, WorkflowExecutor};
pub use gate::{ConfidenceGate, GateDecision, ReviewReason};
pub use instance::WorkflowInstance;
pub use orchestrator::WorkflowOrchestrator;
pub use persistence::JsonFileDecisionStore;
pub use sequencer::StepSequencer;
pub use signal::{SignalChannel, TimeoutGuard};
pub use step::{ReviewCheckpoint, StepOutcome, StepPlan, WorkflowStep};
pub use validator::{ValidationResult, WorkflowValidator};
