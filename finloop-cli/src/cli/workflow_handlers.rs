//! Workflow command handlers

use crate::cli::handlers::{load_config, read_user_input_sync};
use anyhow::{anyhow, Context, Result};
use finloop_core::models::configuration::Configuration;
use finloop_core::models::workflow::{
    ApprovalRequest, ResultEnvelope, WorkflowKind, WorkflowRequest,
};
use finloop_core::services::business::Collaborators;
use finloop_core::services::decision_store::{DecisionStore, InMemoryDecisionStore};
use finloop_core::services::logging::init_logging;
use finloop_core::workflow::persistence::JsonFileDecisionStore;
use finloop_core::workflow::{CompletedRun, WorkflowOrchestrator};
use serde_json::Value;
use std::io::{self, Write};
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

/// Reviewer-side options of the 'run' command
pub struct RunOptions {
    pub decision: Option<String>,
    pub approver: String,
    pub comment: Option<String>,
    pub config_file: Option<String>,
    pub json: bool,
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum ReviewAnswer {
    Approve,
    Reject,
}

fn parse_answer(input: &str) -> Option<ReviewAnswer> {
    match input.trim().to_lowercase().as_str() {
        "approve" | "approved" | "a" | "y" | "yes" => Some(ReviewAnswer::Approve),
        "reject" | "rejected" | "r" | "n" | "no" => Some(ReviewAnswer::Reject),
        _ => None,
    }
}

/// Split `key=value`; the value is kept typed when it parses as JSON
fn parse_parameter(raw: &str) -> Result<(String, Value)> {
    let (key, value) = raw
        .split_once('=')
        .ok_or_else(|| anyhow!("Parameter '{}' must be key=value", raw))?;
    let key = key.trim();
    if key.is_empty() {
        return Err(anyhow!("Parameter '{}' has an empty key", raw));
    }

    let value = serde_json::from_str(value.trim())
        .unwrap_or_else(|_| Value::String(value.to_string()));
    Ok((key.to_string(), value))
}

fn parse_kind(workflow: &str) -> Result<WorkflowKind> {
    WorkflowKind::parse(workflow).ok_or_else(|| {
        let known: Vec<_> = WorkflowKind::ALL.iter().map(|kind| kind.as_str()).collect();
        anyhow!(
            "Unknown workflow '{}'. Known workflows: {}",
            workflow,
            known.join(", ")
        )
    })
}

/// Create workflow orchestrator instance over the simulated collaborators
fn create_orchestrator(config: Configuration) -> Result<WorkflowOrchestrator> {
    let store: Arc<dyn DecisionStore> = match &config.audit_store_path {
        Some(path) => Arc::new(
            JsonFileDecisionStore::new(path).context("Failed to initialize decision store")?,
        ),
        None => Arc::new(InMemoryDecisionStore::new()),
    };

    WorkflowOrchestrator::with_builtin(config, &Collaborators::simulated(), store)
        .context("Failed to create workflow orchestrator")
}

fn print_approval_request(request: &ApprovalRequest) {
    println!("⏸️  Human review required");
    println!("   Approval ID: {}", request.id);
    println!("   Operation: {}", request.operation_type);
    println!("   AI confidence: {:.2}", request.ai_confidence);
    if request.operation_value > 0.0 {
        println!("   Value: {:.2}", request.operation_value);
    }
    println!("   Priority: {:?}", request.priority);
    if !request.risk_factors.is_empty() {
        let factors: Vec<_> = request.risk_factors.iter().map(String::as_str).collect();
        println!("   Risk factors: {}", factors.join(", "));
    }
    if !request.ai_reasoning.is_empty() {
        println!("   Reasoning: {}", request.ai_reasoning);
    }
    println!("   Expires: {}", request.expires_at.to_rfc3339());
}

/// Ask the operator on stdin until a valid answer is given
async fn prompt_answer() -> Result<ReviewAnswer> {
    loop {
        print!("Approve this decision? (approve/reject): ");
        io::stdout().flush()?;
        let input = tokio::task::spawn_blocking(read_user_input_sync)
            .await
            .context("Input task failed")??;

        if let Some(answer) = parse_answer(&input) {
            return Ok(answer);
        }
        println!("⚠️  Please answer 'approve' or 'reject'");
    }
}

/// Answer review checkpoints of one instance until it finishes
async fn supervise(
    orchestrator: &WorkflowOrchestrator,
    instance_id: Uuid,
    options: &RunOptions,
    preset: Option<ReviewAnswer>,
) -> Result<CompletedRun> {
    let approvals = orchestrator.approval_manager();

    while orchestrator.is_running(instance_id) {
        if !approvals.is_awaiting(instance_id) {
            tokio::time::sleep(Duration::from_millis(25)).await;
            continue;
        }

        let pending = approvals
            .requests_for(instance_id)
            .into_iter()
            .rev()
            .find(ApprovalRequest::is_pending);
        let Some(request) = pending else {
            tokio::time::sleep(Duration::from_millis(25)).await;
            continue;
        };

        if !options.json {
            print_approval_request(&request);
        }
        let answer = match preset {
            Some(answer) => answer,
            None => prompt_answer().await?,
        };

        let delivered = match answer {
            ReviewAnswer::Approve => {
                orchestrator.approve(instance_id, &options.approver, options.comment.clone())
            }
            ReviewAnswer::Reject => {
                orchestrator.reject(instance_id, &options.approver, options.comment.clone())
            }
        };
        if !delivered && !options.json {
            println!("⚠️  Review already resolved; signal not delivered");
        }
    }

    orchestrator.wait_for_run(instance_id).await
}

fn print_envelope(envelope: &ResultEnvelope, run: &CompletedRun) {
    if envelope.success {
        println!("✅ Workflow completed");
    } else {
        println!("❌ Workflow failed");
    }
    println!("   Instance: {}", run.instance.id);
    println!("   Conversation: {}", run.instance.conversation_id);
    println!("   Status: {:?}", run.instance.status);

    if let Some(review) = envelope.review() {
        println!(
            "   Decision: {:?} by {:?} (AI confidence {:.2})",
            review.final_decision, review.decision_maker, review.ai_confidence
        );
        println!("   Reason: {}", review.approval_reason);
    }
    if let Some(error) = &envelope.error {
        println!("   Error: {}", error);
        for detail in &envelope.details {
            println!("     - {}", detail);
        }
    }
    if let Some(compensated) = envelope.compensated {
        println!("   Compensated: {}", compensated);
    }

    let steps: Vec<_> = run
        .instance
        .history
        .iter()
        .map(|entry| {
            if entry.success {
                entry.action.clone()
            } else {
                format!("{} (failed)", entry.action)
            }
        })
        .collect();
    if !steps.is_empty() {
        println!("   Steps: {}", steps.join(" → "));
    }
}

/// Handle the 'run' command
pub async fn handle_run(
    workflow: String,
    operation: String,
    user: String,
    params: Vec<String>,
    options: RunOptions,
) -> Result<()> {
    let kind = parse_kind(&workflow)?;
    let preset = match options.decision.as_deref() {
        Some(raw) => Some(
            parse_answer(raw).ok_or_else(|| anyhow!("--decision must be approve or reject"))?,
        ),
        None => None,
    };

    let config = load_config(options.config_file.as_deref())?;
    init_logging(config.log_level).map_err(|e| anyhow!("Failed to initialize logging: {}", e))?;

    let mut request = WorkflowRequest::new(kind, operation, user);
    for raw in &params {
        let (key, value) = parse_parameter(raw)?;
        request = request.with_parameter(key, value);
    }

    let orchestrator = create_orchestrator(config)?;
    let instance_id = orchestrator.start(request)?;
    tracing::debug!(%instance_id, workflow = %kind, "Started workflow from CLI");
    let run = supervise(&orchestrator, instance_id, &options, preset).await?;

    if options.json {
        println!("{}", serde_json::to_string_pretty(&run.envelope)?);
    } else {
        print_envelope(&run.envelope, &run);
    }

    Ok(())
}

/// Handle the 'workflows' command
pub fn handle_workflow_list(json: bool) -> Result<()> {
    let orchestrator = create_orchestrator(Configuration::default())?;
    let mut workflows = Vec::new();

    for kind in orchestrator.list_workflows() {
        let Some(definition) = orchestrator.get_workflow_definition(kind) else {
            continue;
        };
        workflows.push((kind, definition.agent_type(), definition.operation_types()));
    }

    if json {
        let output: Vec<_> = workflows
            .iter()
            .map(|(kind, agent, operations)| {
                serde_json::json!({
                    "workflow": kind,
                    "agent_type": agent,
                    "operation_types": operations,
                })
            })
            .collect();
        println!("{}", serde_json::to_string_pretty(&output)?);
        return Ok(());
    }

    println!("📋 Registered workflows ({}):", workflows.len());
    for (kind, agent, operations) in &workflows {
        println!("   {} [{}]", kind, agent);
        println!("      operations: {}", operations.join(", "));
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parameters_keep_json_types() {
        assert_eq!(
            parse_parameter("confidence=0.4").unwrap(),
            ("confidence".to_string(), serde_json::json!(0.4))
        );
        assert_eq!(
            parse_parameter("force_human_review=true").unwrap().1,
            Value::Bool(true)
        );
        assert_eq!(
            parse_parameter("query=what is my balance").unwrap().1,
            Value::String("what is my balance".to_string())
        );
        assert!(parse_parameter("novalue").is_err());
        assert!(parse_parameter("=1").is_err());
    }

    #[test]
    fn test_review_answers() {
        assert_eq!(parse_answer(" Approve\n"), Some(ReviewAnswer::Approve));
        assert_eq!(parse_answer("n"), Some(ReviewAnswer::Reject));
        assert_eq!(parse_answer("maybe"), None);
        assert!(parse_kind("payroll").is_err());
        assert_eq!(parse_kind("trading").unwrap(), WorkflowKind::Trading);
    }
}
