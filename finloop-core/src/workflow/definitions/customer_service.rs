//! Customer query handling: intent classification, tool dispatch, response

use super::{invalid_operation, review_of, WorkflowDefinition};
use crate::error::WorkflowError;
use crate::models::results::{
    CustomerServiceOutput, IntentClassification, StepResult, ToolInvocation, WorkflowOutput,
};
use crate::models::configuration::GateThresholds;
use crate::models::workflow::WorkflowKind;
use crate::services::business::IntentService;
use crate::workflow::compensation::CompensationRegistry;
use crate::workflow::gate::ConfidenceGate;
use crate::workflow::instance::WorkflowInstance;
use crate::workflow::step::{ReviewCheckpoint, StepOutcome, StepPlan, WorkflowStep};
use anyhow::{Context, Result};
use async_trait::async_trait;
use serde_json::json;
use std::sync::Arc;

pub const OPERATION_TYPE: &str = "customer_query";
pub const GATE_OPERATION: &str = "customer_intent";
pub const MAX_QUERY_LENGTH: usize = 5000;

const QUERY_KEY: &str = "query";
const PROCESSED_QUERY_KEY: &str = "processed_query";
const INTENT_KEY: &str = "intent";
const RESPONSE_KEY: &str = "response_text";

/// Tool serving an intent, if any
pub fn tool_for_intent(intent: &str) -> Option<&'static str> {
    match intent {
        "check_balance" => Some("account.balance"),
        "transfer_funds" => Some("payment.transfer"),
        "exchange_quote" => Some("exchange.quote"),
        "check_kyc_status" => Some("compliance.kyc_status"),
        _ => None,
    }
}

pub fn response_for_intent(intent: &str) -> &'static str {
    match intent {
        "check_balance" => "Here is your account balance information.",
        "transfer_funds" => "Your transfer has been processed successfully.",
        "exchange_quote" => "Here is your exchange quote.",
        "check_kyc_status" => "Your KYC verification status has been retrieved.",
        _ => "I apologize, but I could not understand your request.",
    }
}

const DECLINED_RESPONSE: &str =
    "Your request has been passed to a specialist, who will follow up with you.";

struct ProcessQuery;

#[async_trait]
impl WorkflowStep for ProcessQuery {
    fn name(&self) -> &str {
        "process_query"
    }

    async fn run(&self, instance: &mut WorkflowInstance) -> Result<StepOutcome> {
        let processed = instance
            .param_str(QUERY_KEY)
            .context("Query missing from context")?
            .trim()
            .to_lowercase();
        instance.put(PROCESSED_QUERY_KEY, &processed)?;
        Ok(StepOutcome::Continue)
    }
}

struct ClassifyIntent {
    intents: Arc<dyn IntentService>,
}

#[async_trait]
impl WorkflowStep for ClassifyIntent {
    fn name(&self) -> &str {
        "classify_intent"
    }

    async fn run(&self, instance: &mut WorkflowInstance) -> Result<StepOutcome> {
        let processed: String = instance.take(PROCESSED_QUERY_KEY)?;
        let intent = self
            .intents
            .classify(&processed)
            .await
            .context("Intent classification failed")?;

        instance.put(INTENT_KEY, &intent)?;
        instance.results.push(StepResult::Intent(intent));
        Ok(StepOutcome::Continue)
    }
}

struct ReviewIntent {
    gate: ConfidenceGate,
}

impl ReviewIntent {
    fn below_threshold(&self, confidence: f64) -> bool {
        confidence.is_nan() || confidence < self.gate.confidence_threshold(GATE_OPERATION)
    }
}

#[async_trait]
impl WorkflowStep for ReviewIntent {
    fn name(&self) -> &str {
        "review_intent"
    }

    async fn run(&self, instance: &mut WorkflowInstance) -> Result<StepOutcome> {
        let intent: IntentClassification = instance.take(INTENT_KEY)?;

        if self.below_threshold(intent.confidence) {
            tracing::warn!(
                conversation_id = %instance.conversation_id,
                intent = %intent.name,
                confidence = intent.confidence,
                "Low confidence intent requires human approval"
            );
        }

        let checkpoint = ReviewCheckpoint::new(GATE_OPERATION, intent.confidence)
            .with_value(instance.param_f64("amount").unwrap_or(0.0))
            .force_review(instance.param_bool("force_human_review"))
            .with_decision(
                json!({"intent": intent.name, "tool": tool_for_intent(&intent.name)}),
                format!("Classified customer intent: {}", intent.name),
            )
            .with_hints_from(instance);

        Ok(StepOutcome::Suspend(checkpoint))
    }
}

struct ExecuteTool {
    intents: Arc<dyn IntentService>,
}

#[async_trait]
impl WorkflowStep for ExecuteTool {
    fn name(&self) -> &str {
        "execute_tool"
    }

    async fn run(&self, instance: &mut WorkflowInstance) -> Result<StepOutcome> {
        if !instance.execution_allowed() {
            tracing::info!(instance_id = %instance.id, "Tool execution skipped after review");
            return Ok(StepOutcome::Continue);
        }

        let intent: IntentClassification = instance.take(INTENT_KEY)?;
        let Some(tool) = tool_for_intent(&intent.name) else {
            return Ok(StepOutcome::Continue);
        };

        let invocation = self
            .intents
            .invoke_tool(tool, &intent)
            .await
            .with_context(|| format!("Tool {} failed", tool))?;

        instance.record_history(tool, invocation.success);
        instance.results.push(StepResult::Tool(invocation));
        Ok(StepOutcome::Continue)
    }
}

struct GenerateResponse;

#[async_trait]
impl WorkflowStep for GenerateResponse {
    fn name(&self) -> &str {
        "generate_response"
    }

    async fn run(&self, instance: &mut WorkflowInstance) -> Result<StepOutcome> {
        let intent: IntentClassification = instance.take(INTENT_KEY)?;
        let text = if instance.execution_allowed() {
            response_for_intent(&intent.name)
        } else {
            DECLINED_RESPONSE
        };
        instance.put(RESPONSE_KEY, &text)?;
        Ok(StepOutcome::Continue)
    }
}

pub struct CustomerServiceWorkflow {
    intents: Arc<dyn IntentService>,
    gate: ConfidenceGate,
}

impl CustomerServiceWorkflow {
    pub fn new(intents: Arc<dyn IntentService>, thresholds: &GateThresholds) -> Self {
        Self {
            intents,
            gate: ConfidenceGate::new(thresholds.clone()),
        }
    }
}

#[async_trait]
impl WorkflowDefinition for CustomerServiceWorkflow {
    fn kind(&self) -> WorkflowKind {
        WorkflowKind::CustomerService
    }

    fn agent_type(&self) -> &'static str {
        "customer-service"
    }

    fn operation_types(&self) -> Vec<String> {
        vec![OPERATION_TYPE.to_string()]
    }

    fn gate_operations(&self) -> Vec<String> {
        vec![GATE_OPERATION.to_string()]
    }

    fn plan(&self, operation_type: &str) -> Result<StepPlan, WorkflowError> {
        if operation_type != OPERATION_TYPE {
            return Err(invalid_operation(self.kind(), operation_type));
        }

        Ok(vec![
            Box::new(ProcessQuery),
            Box::new(ClassifyIntent {
                intents: self.intents.clone(),
            }),
            Box::new(ReviewIntent {
                gate: self.gate.clone(),
            }),
            Box::new(ExecuteTool {
                intents: self.intents.clone(),
            }),
            Box::new(GenerateResponse),
        ])
    }

    async fn validate(&self, instance: &mut WorkflowInstance) -> Result<(), WorkflowError> {
        let query = instance.param_str(QUERY_KEY).unwrap_or_default();
        let mut errors = Vec::new();

        if query.trim().is_empty() {
            errors.push("Query cannot be empty".to_string());
        }
        if query.chars().count() > MAX_QUERY_LENGTH {
            errors.push("Query exceeds maximum length".to_string());
        }
        if let Some(amount) = instance.param_f64("amount") {
            if !amount.is_finite() || amount < 0.0 {
                errors.push(format!(
                    "amount must be a finite non-negative number (got {})",
                    amount
                ));
            }
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(WorkflowError::Validation {
                reason: "Invalid customer query".to_string(),
                details: errors,
            })
        }
    }

    fn compensations(&self) -> CompensationRegistry {
        // Tools are read-only or idempotent from the workflow's point of view
        CompensationRegistry::new()
    }

    fn finish(&self, instance: &WorkflowInstance) -> Result<WorkflowOutput> {
        let intent: IntentClassification = instance.take(INTENT_KEY)?;
        let tools_used = instance
            .results
            .iter()
            .filter_map(|result| match result {
                StepResult::Tool(ToolInvocation { tool, .. }) => Some(tool.clone()),
                _ => None,
            })
            .collect();

        Ok(WorkflowOutput::CustomerService(CustomerServiceOutput {
            intent: intent.name,
            confidence: intent.confidence,
            response_text: instance.take(RESPONSE_KEY)?,
            tools_used,
            review: review_of(instance)?,
        }))
    }

    fn describe(&self, instance: &WorkflowInstance) -> String {
        let intent = instance
            .context
            .get(INTENT_KEY)
            .and_then(|intent| intent.get("name"))
            .and_then(|name| name.as_str())
            .unwrap_or("unknown");
        format!("Customer query handled: {}", intent)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::workflow::WorkflowRequest;
    use crate::services::simulated::SimulatedIntentService;
    use uuid::Uuid;

    fn workflow() -> CustomerServiceWorkflow {
        CustomerServiceWorkflow::new(
            Arc::new(SimulatedIntentService),
            &GateThresholds::default(),
        )
    }

    fn instance(query: &str) -> WorkflowInstance {
        WorkflowInstance::new(
            Uuid::new_v4(),
            WorkflowRequest::new(WorkflowKind::CustomerService, OPERATION_TYPE, "u1")
                .with_parameter(QUERY_KEY, query),
        )
    }

    #[tokio::test]
    async fn test_query_validation() {
        let workflow = workflow();
        assert!(workflow.validate(&mut instance("balance please")).await.is_ok());

        let err = workflow.validate(&mut instance("   ")).await.unwrap_err();
        assert_eq!(err.kind(), "validation_failure");

        let long = "a".repeat(MAX_QUERY_LENGTH + 1);
        match workflow.validate(&mut instance(&long)).await {
            Err(WorkflowError::Validation { details, .. }) => {
                assert_eq!(details, vec!["Query exceeds maximum length".to_string()]);
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_non_finite_amount_is_rejected() {
        let workflow = workflow();
        let mut nan = WorkflowInstance::new(
            Uuid::new_v4(),
            WorkflowRequest::new(WorkflowKind::CustomerService, OPERATION_TYPE, "u1")
                .with_parameter(QUERY_KEY, "send money to bob")
                .with_parameter("amount", "NaN"),
        );

        match workflow.validate(&mut nan).await {
            Err(WorkflowError::Validation { details, .. }) => {
                assert!(details[0].starts_with("amount must be a finite"));
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_intent_warning_follows_configured_threshold() {
        let default_step = ReviewIntent {
            gate: ConfidenceGate::new(GateThresholds::default()),
        };
        assert!(!default_step.below_threshold(0.9));
        assert!(default_step.below_threshold(0.5));
        assert!(default_step.below_threshold(f64::NAN));

        let mut thresholds = GateThresholds::default();
        thresholds.confidence.insert(GATE_OPERATION.to_string(), 0.95);
        let strict_step = ReviewIntent {
            gate: ConfidenceGate::new(thresholds),
        };
        assert!(strict_step.below_threshold(0.9));
    }

    #[test]
    fn test_tool_mapping() {
        assert_eq!(tool_for_intent("transfer_funds"), Some("payment.transfer"));
        assert_eq!(tool_for_intent("unknown"), None);
        assert!(response_for_intent("unknown").starts_with("I apologize"));
        assert!(workflow().plan("complaint").is_err());
    }
}
