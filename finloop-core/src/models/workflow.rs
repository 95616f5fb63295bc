//! Workflow orchestration data models

use crate::models::results::WorkflowOutput;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeSet;
use std::fmt;
use uuid::Uuid;

/// The closed set of workflow variants the orchestrator can run
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum WorkflowKind {
    /// KYC, AML, monitoring and regulatory reporting checks
    Compliance,
    /// Credit, fraud and portfolio risk assessment
    RiskAssessment,
    /// Customer query intent handling
    CustomerService,
    /// Generic human oversight of an AI decision
    HumanReview,
    /// Trade execution saga
    Trading,
}

impl WorkflowKind {
    pub const ALL: [WorkflowKind; 5] = [
        WorkflowKind::Compliance,
        WorkflowKind::RiskAssessment,
        WorkflowKind::CustomerService,
        WorkflowKind::HumanReview,
        WorkflowKind::Trading,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            WorkflowKind::Compliance => "compliance",
            WorkflowKind::RiskAssessment => "risk_assessment",
            WorkflowKind::CustomerService => "customer_service",
            WorkflowKind::HumanReview => "human_review",
            WorkflowKind::Trading => "trading",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|kind| kind.as_str() == value)
    }
}

impl fmt::Display for WorkflowKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Lifecycle status of a workflow instance
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum InstanceStatus {
    /// Instance built, no step has run
    Created,
    /// Steps are executing
    Running,
    /// Suspended at a review checkpoint waiting for a human signal
    AwaitingSignal,
    /// All steps completed
    Succeeded,
    /// A step raised
    Failed,
    /// Replaying the compensation ledger
    Compensating,
    /// Rollback finished
    Compensated,
}

impl InstanceStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            InstanceStatus::Succeeded | InstanceStatus::Failed | InstanceStatus::Compensated
        )
    }
}

/// One entry of the instance execution history
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct HistoryEntry {
    /// Step or action name
    pub action: String,
    /// When the action finished
    pub timestamp: DateTime<Utc>,
    /// Whether it succeeded
    pub success: bool,
}

/// One entry of the decision audit trail
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AuditEntry {
    pub action: String,
    pub timestamp: DateTime<Utc>,
    /// `system`, `ai_system` or the approver id
    pub actor: String,
    pub detail: String,
}

/// Compensation action lifecycle
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum CompensationStatus {
    /// Registered, effect not yet confirmed
    Started,
    /// Effect succeeded and may need undoing
    Completed,
}

/// A compensatable effect recorded by a step
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CompensationAction {
    /// Handler key, e.g. `kyc_verification` or `funds_lock`
    #[serde(rename = "type")]
    pub action_type: String,
    /// Data the undo handler needs
    pub payload: Map<String, Value>,
    pub status: CompensationStatus,
    /// Effect result recorded on completion
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
}

/// Risk level tag supplied with an operation
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum RiskLevel {
    #[default]
    Low,
    Medium,
    High,
}

impl RiskLevel {
    /// Lenient parse; anything unrecognized is treated as low risk
    pub fn parse(value: &str) -> Self {
        match value.trim().to_ascii_lowercase().as_str() {
            "high" => RiskLevel::High,
            "medium" => RiskLevel::Medium,
            _ => RiskLevel::Low,
        }
    }
}

/// Urgency attached to an approval request
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    Low,
    Medium,
    High,
    Critical,
}

/// Approval request status
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ApprovalStatus {
    /// Waiting for a reviewer
    PendingReview,
    /// Reviewer approved
    Approved,
    /// Reviewer rejected
    Rejected,
    /// Deadline elapsed, treated as rejection
    TimedOut,
}

/// Record of one pending human-review decision
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApprovalRequest {
    /// Unique approval request identifier
    pub id: Uuid,
    /// Instance that is suspended on this request
    pub instance_id: Uuid,
    pub operation_type: String,
    /// What the automated logic proposed
    pub ai_decision: Value,
    pub ai_reasoning: String,
    pub ai_confidence: f64,
    pub operation_value: f64,
    pub risk_factors: BTreeSet<String>,
    pub priority: Priority,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub status: ApprovalStatus,
    /// Identity of the reviewer (or `timeout`)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reviewer: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub comment: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reviewed_at: Option<DateTime<Utc>>,
}

impl ApprovalRequest {
    pub fn is_pending(&self) -> bool {
        self.status == ApprovalStatus::PendingReview
    }
}

/// Human decision carried by a signal
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum SignalDecision {
    Approved,
    Rejected,
}

/// Terminal human decision delivered to a suspended instance
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Signal {
    pub approver_id: String,
    pub decision: SignalDecision,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub comment: Option<String>,
}

impl Signal {
    pub fn approve(approver_id: impl Into<String>, comment: Option<String>) -> Self {
        Self {
            approver_id: approver_id.into(),
            decision: SignalDecision::Approved,
            comment,
        }
    }

    pub fn reject(approver_id: impl Into<String>, comment: Option<String>) -> Self {
        Self {
            approver_id: approver_id.into(),
            decision: SignalDecision::Rejected,
            comment,
        }
    }
}

/// Outcome of waiting on a signal channel
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum SignalOutcome {
    Approved,
    Rejected,
    TimedOut,
}

/// Resolution of a suspended review, produced exactly once
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SignalResolution {
    pub outcome: SignalOutcome,
    pub approver_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub comment: Option<String>,
    pub resolved_at: DateTime<Utc>,
}

/// Final decision after a review checkpoint
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum FinalDecision {
    Approved,
    Rejected,
}

/// Who made the final decision
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum DecisionMaker {
    AiAutomatic,
    Human,
    Timeout,
}

/// Which of the mutually exclusive review resolutions happened
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReviewResolution {
    AutoApproved,
    HumanApproved,
    HumanRejected,
    TimedOut,
}

impl ReviewResolution {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReviewResolution::AutoApproved => "auto_approved",
            ReviewResolution::HumanApproved => "human_approved",
            ReviewResolution::HumanRejected => "human_rejected",
            ReviewResolution::TimedOut => "timed_out",
        }
    }
}

/// Result of a review checkpoint
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ReviewDecision {
    pub final_decision: FinalDecision,
    pub decision_maker: DecisionMaker,
    pub auto_approved: bool,
    pub ai_confidence: f64,
    pub execution_allowed: bool,
    /// Reviewer rejected a decision the automation was confident about
    pub ai_overridden: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub approver_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub comment: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub approval_request_id: Option<Uuid>,
    pub approval_reason: String,
}

impl ReviewDecision {
    /// Confidence above which a human rejection counts as overriding the automation
    pub const OVERRIDE_CONFIDENCE: f64 = 0.7;

    pub fn automatic(ai_confidence: f64) -> Self {
        Self {
            final_decision: FinalDecision::Approved,
            decision_maker: DecisionMaker::AiAutomatic,
            auto_approved: true,
            ai_confidence,
            execution_allowed: true,
            ai_overridden: false,
            approver_id: None,
            comment: None,
            approval_request_id: None,
            approval_reason: "High confidence and within thresholds".to_string(),
        }
    }

    /// Build from the terminal resolution of a human review. A timeout is a rejection
    /// made by the deadline rather than a person.
    pub fn from_resolution(
        resolution: &SignalResolution,
        ai_confidence: f64,
        approval_request_id: Uuid,
        approval_reason: String,
    ) -> Self {
        let approved = resolution.outcome == SignalOutcome::Approved;
        let decision_maker = match resolution.outcome {
            SignalOutcome::TimedOut => DecisionMaker::Timeout,
            _ => DecisionMaker::Human,
        };
        // Only a reviewer can override the AI; a timeout is not an override
        let ai_overridden = decision_maker == DecisionMaker::Human
            && !approved
            && ai_confidence > Self::OVERRIDE_CONFIDENCE;

        Self {
            final_decision: if approved {
                FinalDecision::Approved
            } else {
                FinalDecision::Rejected
            },
            decision_maker,
            auto_approved: false,
            ai_confidence,
            execution_allowed: approved,
            ai_overridden,
            approver_id: Some(resolution.approver_id.clone()),
            comment: resolution.comment.clone(),
            approval_request_id: Some(approval_request_id),
            approval_reason,
        }
    }

    pub fn resolution(&self) -> ReviewResolution {
        match (self.decision_maker, self.final_decision) {
            (DecisionMaker::AiAutomatic, _) => ReviewResolution::AutoApproved,
            (DecisionMaker::Timeout, _) => ReviewResolution::TimedOut,
            (DecisionMaker::Human, FinalDecision::Approved) => ReviewResolution::HumanApproved,
            (DecisionMaker::Human, FinalDecision::Rejected) => ReviewResolution::HumanRejected,
        }
    }
}

/// Request to start a workflow instance
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowRequest {
    pub kind: WorkflowKind,
    pub conversation_id: String,
    pub user_id: String,
    /// Branch selector, interpreted per workflow kind
    pub operation_type: String,
    #[serde(default)]
    pub parameters: Map<String, Value>,
}

impl WorkflowRequest {
    pub fn new(
        kind: WorkflowKind,
        operation_type: impl Into<String>,
        user_id: impl Into<String>,
    ) -> Self {
        Self {
            kind,
            conversation_id: format!("conv_{}", Uuid::new_v4().simple()),
            user_id: user_id.into(),
            operation_type: operation_type.into(),
            parameters: Map::new(),
        }
    }

    pub fn with_conversation_id(mut self, conversation_id: impl Into<String>) -> Self {
        self.conversation_id = conversation_id.into();
        self
    }

    pub fn with_parameter(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.parameters.insert(key.into(), value.into());
        self
    }

    pub fn with_parameters(mut self, parameters: Map<String, Value>) -> Self {
        self.parameters.extend(parameters);
        self
    }
}

/// Metadata attached to successful envelopes
#[derive(Debug, Clone, Serialize)]
pub struct EnvelopeMetadata {
    pub instance_id: Uuid,
    pub conversation_id: String,
    pub user_id: String,
    pub timestamp: DateTime<Utc>,
    pub duration_ms: u64,
}

/// Envelope returned for every workflow run, successful or not
#[derive(Debug, Clone, Serialize)]
pub struct ResultEnvelope {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<WorkflowOutput>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_kind: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub details: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub conversation_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub compensated: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metadata: Option<EnvelopeMetadata>,
}

impl ResultEnvelope {
    pub fn success(result: WorkflowOutput, metadata: EnvelopeMetadata) -> Self {
        Self {
            success: true,
            result: Some(result),
            error: None,
            error_kind: None,
            details: Vec::new(),
            conversation_id: None,
            compensated: None,
            metadata: Some(metadata),
        }
    }

    pub fn failure(
        error: &crate::error::WorkflowError,
        conversation_id: impl Into<String>,
        compensated: bool,
    ) -> Self {
        let details = match error {
            crate::error::WorkflowError::Validation { details, .. } => details.clone(),
            _ => Vec::new(),
        };

        Self {
            success: false,
            result: None,
            error: Some(error.to_string()),
            error_kind: Some(error.kind().to_string()),
            details,
            conversation_id: Some(conversation_id.into()),
            compensated: Some(compensated),
            metadata: None,
        }
    }

    /// Review decision of the result, if the workflow passed a review checkpoint
    pub fn review(&self) -> Option<&ReviewDecision> {
        self.result.as_ref().and_then(|output| output.review())
    }
}
