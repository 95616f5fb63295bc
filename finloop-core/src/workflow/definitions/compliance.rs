//! Compliance checks: KYC, AML screening, transaction monitoring, regulatory reporting

use super::{invalid_operation, resolve_user, review_of, WorkflowDefinition};
use crate::error::WorkflowError;
use crate::models::results::{ComplianceOutput, ComplianceReport, StepResult, WorkflowOutput};
use crate::models::workflow::{CompensationAction, RiskLevel, WorkflowKind};
use crate::services::business::{ComplianceService, UserDirectory};
use crate::services::logging::{log_alert, log_compensation};
use crate::workflow::compensation::{
    payload, CompensationHandler, CompensationRegistry, LoggingCompensation,
};
use crate::workflow::instance::WorkflowInstance;
use crate::workflow::step::{ReviewCheckpoint, StepOutcome, StepPlan, WorkflowStep};
use anyhow::{Context, Result};
use async_trait::async_trait;
use serde_json::{json, Value};
use std::sync::Arc;
use uuid::Uuid;

const REPORT_KEY: &str = "compliance_report";

/// Branch of the compliance workflow
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ComplianceCheck {
    Kyc,
    Aml,
    TransactionMonitoring,
    RegulatoryReporting,
}

impl ComplianceCheck {
    pub const ALL: [ComplianceCheck; 4] = [
        ComplianceCheck::Kyc,
        ComplianceCheck::Aml,
        ComplianceCheck::TransactionMonitoring,
        ComplianceCheck::RegulatoryReporting,
    ];

    pub fn tag(&self) -> &'static str {
        match self {
            ComplianceCheck::Kyc => "kyc",
            ComplianceCheck::Aml => "aml",
            ComplianceCheck::TransactionMonitoring => "transaction_monitoring",
            ComplianceCheck::RegulatoryReporting => "regulatory_reporting",
        }
    }

    /// Gate table key the check's decision is submitted under
    pub fn gate_operation(&self) -> &'static str {
        match self {
            ComplianceCheck::Kyc => "kyc_verification",
            ComplianceCheck::Aml => "aml_screening",
            ComplianceCheck::TransactionMonitoring => "transaction_monitoring",
            ComplianceCheck::RegulatoryReporting => "regulatory_reporting",
        }
    }

    pub fn parse(tag: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|check| check.tag() == tag)
    }
}

/// Confidence the automation has in a compliance result
pub fn compliance_confidence(result: &StepResult) -> f64 {
    match result {
        StepResult::Kyc(kyc) => f64::from(kyc.score) / 100.0,
        StepResult::Aml(aml) => 1.0 - f64::from(aml.risk_score) / 100.0,
        StepResult::Monitoring(monitoring) if monitoring.alerts.is_empty() => 0.9,
        StepResult::Monitoring(_) => 0.3,
        StepResult::Reporting(report) if report.report_generated => 0.95,
        StepResult::Reporting(_) => 0.5,
        _ => 0.5,
    }
}

fn recommendations(check: ComplianceCheck, result: &StepResult) -> Vec<String> {
    let mut recommendations = Vec::new();

    match (check, result) {
        (ComplianceCheck::Kyc, StepResult::Kyc(kyc)) if !kyc.verified => {
            recommendations.push("Request additional documentation".to_string());
            recommendations.push("Perform enhanced due diligence".to_string());
        }
        (ComplianceCheck::Aml, StepResult::Aml(aml)) if aml.risk_score > 70 => {
            recommendations.push("Escalate to compliance officer".to_string());
            recommendations.push("File suspicious activity report".to_string());
        }
        _ => {}
    }

    if !result.alerts().is_empty() {
        recommendations.push("Review all alerts with compliance team".to_string());
    }

    recommendations
}

fn latest_result(instance: &WorkflowInstance) -> Result<&StepResult> {
    instance
        .results
        .last()
        .context("Compliance check produced no result")
}

struct RunCheck {
    check: ComplianceCheck,
    compliance: Arc<dyn ComplianceService>,
}

#[async_trait]
impl WorkflowStep for RunCheck {
    fn name(&self) -> &str {
        self.check.gate_operation()
    }

    async fn run(&self, instance: &mut WorkflowInstance) -> Result<StepOutcome> {
        let user = instance.acting_user()?.clone();

        let result = match self.check {
            ComplianceCheck::Kyc => {
                let level = instance.param_str("level").unwrap_or("basic").to_string();
                let documents = instance.param_strings("documents");
                let handle = instance.ledger.register(
                    "kyc_verification",
                    payload([("user_id", user.id.clone()), ("level", level.clone())]),
                );
                let kyc = self
                    .compliance
                    .verify_kyc(&user, &level, &documents)
                    .await
                    .context("KYC verification failed")?;
                instance
                    .ledger
                    .mark_completed(handle, Some(json!({"verified": kyc.verified})));
                StepResult::Kyc(kyc)
            }
            ComplianceCheck::Aml => {
                let transaction_id = instance.param_str("transaction_id").map(str::to_string);
                let counterparty = instance.param_str("counterparty").map(str::to_string);
                let amount = instance.param_f64("amount").unwrap_or(0.0);
                let handle = instance.ledger.register(
                    "aml_screening",
                    payload([
                        ("user_id", Value::from(user.id.clone())),
                        ("transaction_id", Value::from(transaction_id.clone())),
                    ]),
                );
                let aml = self
                    .compliance
                    .screen_aml(
                        &user,
                        transaction_id.as_deref(),
                        amount,
                        counterparty.as_deref(),
                    )
                    .await
                    .context("AML screening failed")?;
                instance
                    .ledger
                    .mark_completed(handle, Some(json!({"cleared": aml.cleared})));
                StepResult::Aml(aml)
            }
            ComplianceCheck::TransactionMonitoring => {
                let period = instance.param_str("period").unwrap_or("30d").to_string();
                let threshold = instance.param_f64("threshold").unwrap_or(10_000.0);
                let monitoring = self
                    .compliance
                    .monitor_transactions(&user, &period, threshold)
                    .await
                    .context("Transaction monitoring failed")?;
                StepResult::Monitoring(monitoring)
            }
            ComplianceCheck::RegulatoryReporting => {
                let report_type = instance.param_str("report_type").unwrap_or("CTR").to_string();
                let period = instance.param_str("period").unwrap_or("monthly").to_string();
                let handle = instance.ledger.register(
                    "regulatory_report",
                    payload([("user_id", user.id.clone()), ("report_type", report_type.clone())]),
                );
                let report = self
                    .compliance
                    .generate_regulatory_report(&user, &report_type, &period)
                    .await
                    .context("Regulatory report generation failed")?;
                instance.ledger.mark_completed(
                    handle,
                    Some(json!({"report_id": report.report_id, "submitted": report.submitted})),
                );
                StepResult::Reporting(report)
            }
        };

        instance.results.push(result);
        Ok(StepOutcome::Continue)
    }
}

struct ReviewCheck {
    check: ComplianceCheck,
}

#[async_trait]
impl WorkflowStep for ReviewCheck {
    fn name(&self) -> &str {
        "record_compliance_decision"
    }

    async fn run(&self, instance: &mut WorkflowInstance) -> Result<StepOutcome> {
        let result = latest_result(instance)?;
        let confidence = compliance_confidence(result);
        let risk_level = if result.alerts().is_empty() {
            RiskLevel::Low
        } else {
            RiskLevel::High
        };
        let ai_decision = json!({
            "compliance_type": self.check.tag(),
            "result": result,
        });

        let checkpoint = ReviewCheckpoint::new(self.check.gate_operation(), confidence)
            .with_value(instance.param_f64("amount").unwrap_or(0.0))
            .with_risk_level(risk_level)
            .force_review(instance.param_bool("force_human_review"))
            .with_decision(ai_decision, format!("Compliance check completed: {}", self.check.tag()))
            .with_hints_from(instance);

        Ok(StepOutcome::Suspend(checkpoint))
    }
}

struct GenerateReport {
    check: ComplianceCheck,
}

#[async_trait]
impl WorkflowStep for GenerateReport {
    fn name(&self) -> &str {
        "generate_compliance_report"
    }

    async fn run(&self, instance: &mut WorkflowInstance) -> Result<StepOutcome> {
        let result = latest_result(instance)?;
        if !result.requires_report() {
            return Ok(StepOutcome::Continue);
        }

        let report = ComplianceReport {
            id: format!("report_{}", Uuid::new_v4().simple()),
            compliance_type: self.check.tag().to_string(),
            conversation_id: instance.conversation_id.clone(),
            user_id: instance.user_id.clone(),
            recommendations: recommendations(self.check, result),
        };
        tracing::info!(
            report_id = %report.id,
            conversation_id = %report.conversation_id,
            compliance_type = %report.compliance_type,
            "Compliance report generated"
        );

        instance.put(REPORT_KEY, &report)?;
        Ok(StepOutcome::Continue)
    }
}

struct TriggerAlerts;

#[async_trait]
impl WorkflowStep for TriggerAlerts {
    fn name(&self) -> &str {
        "trigger_compliance_alerts"
    }

    async fn run(&self, instance: &mut WorkflowInstance) -> Result<StepOutcome> {
        let alerts = latest_result(instance)?.alerts().to_vec();
        for alert in &alerts {
            log_alert(&instance.conversation_id, "critical", alert);
        }
        Ok(StepOutcome::Continue)
    }
}

/// Cancels a generated regulatory report unless it was already submitted
struct CancelReport {
    compliance: Arc<dyn ComplianceService>,
}

#[async_trait]
impl CompensationHandler for CancelReport {
    async fn compensate(&self, action: &CompensationAction) -> Result<()> {
        log_compensation(&action.action_type, &action.payload);

        let result = action.result.as_ref();
        let submitted = result
            .and_then(|r| r.get("submitted"))
            .and_then(Value::as_bool)
            .unwrap_or(false);
        let Some(report_id) = result.and_then(|r| r.get("report_id")).and_then(Value::as_str)
        else {
            return Ok(());
        };

        if submitted {
            tracing::warn!(report_id, "Report already submitted, cannot cancel");
            return Ok(());
        }

        self.compliance
            .cancel_report(report_id)
            .await
            .with_context(|| format!("Failed to cancel report {}", report_id))
    }
}

pub struct ComplianceWorkflow {
    users: Arc<dyn UserDirectory>,
    compliance: Arc<dyn ComplianceService>,
}

impl ComplianceWorkflow {
    pub fn new(users: Arc<dyn UserDirectory>, compliance: Arc<dyn ComplianceService>) -> Self {
        Self { users, compliance }
    }
}

#[async_trait]
impl WorkflowDefinition for ComplianceWorkflow {
    fn kind(&self) -> WorkflowKind {
        WorkflowKind::Compliance
    }

    fn agent_type(&self) -> &'static str {
        "compliance-agent"
    }

    fn operation_types(&self) -> Vec<String> {
        ComplianceCheck::ALL
            .iter()
            .map(|check| check.tag().to_string())
            .collect()
    }

    fn gate_operations(&self) -> Vec<String> {
        ComplianceCheck::ALL
            .iter()
            .map(|check| check.gate_operation().to_string())
            .collect()
    }

    fn plan(&self, operation_type: &str) -> Result<StepPlan, WorkflowError> {
        let check = ComplianceCheck::parse(operation_type)
            .ok_or_else(|| invalid_operation(self.kind(), operation_type))?;

        Ok(vec![
            Box::new(RunCheck {
                check,
                compliance: self.compliance.clone(),
            }),
            Box::new(ReviewCheck { check }),
            Box::new(GenerateReport { check }),
            Box::new(TriggerAlerts),
        ])
    }

    async fn validate(&self, instance: &mut WorkflowInstance) -> Result<(), WorkflowError> {
        let user = resolve_user(self.users.as_ref(), instance).await?;

        if !user.can_run_compliance() {
            tracing::warn!(
                user_id = %user.id,
                role = %user.role,
                "User without compliance role initiated a compliance check"
            );
        }
        Ok(())
    }

    fn compensations(&self) -> CompensationRegistry {
        CompensationRegistry::new()
            .with_handler("kyc_verification", Arc::new(LoggingCompensation))
            .with_handler("aml_screening", Arc::new(LoggingCompensation))
            .with_handler(
                "regulatory_report",
                Arc::new(CancelReport {
                    compliance: self.compliance.clone(),
                }),
            )
    }

    fn finish(&self, instance: &WorkflowInstance) -> Result<WorkflowOutput> {
        let check = latest_result(instance)?.clone();
        let report = if instance.context.contains_key(REPORT_KEY) {
            Some(instance.take::<ComplianceReport>(REPORT_KEY)?)
        } else {
            None
        };

        Ok(WorkflowOutput::Compliance(ComplianceOutput {
            compliance_type: instance.operation_type.clone(),
            confidence: compliance_confidence(&check),
            alerts: check.alerts().to_vec(),
            check,
            report,
            review: review_of(instance)?,
        }))
    }

    fn describe(&self, instance: &WorkflowInstance) -> String {
        format!("Compliance check completed: {}", instance.operation_type)
    }
}
