//! Risk assessment saga: credit, fraud and portfolio risk with a composite score

use super::{invalid_operation, resolve_user, review_of, WorkflowDefinition};
use crate::error::WorkflowError;
use crate::models::results::{
    BehavioralAnalysis, FinancialSnapshot, RiskAlert, RiskAssessmentOutput, StepResult,
    WorkflowOutput,
};
use crate::models::workflow::{RiskLevel, WorkflowKind};
use crate::services::business::{LoanTerms, RiskService, UserDirectory};
use crate::services::logging::log_alert;
use crate::workflow::compensation::{payload, CompensationRegistry, LoggingCompensation};
use crate::workflow::instance::WorkflowInstance;
use crate::workflow::step::{ReviewCheckpoint, StepOutcome, StepPlan, WorkflowStep};
use anyhow::{Context, Result};
use async_trait::async_trait;
use serde_json::json;
use std::sync::Arc;

const FINANCIAL_DATA_KEY: &str = "financial_data";
const BEHAVIORAL_KEY: &str = "behavioral_analysis";
const RISK_SCORE_KEY: &str = "risk_score";
const ALERTS_KEY: &str = "risk_alerts";
const RECOMMENDATIONS_KEY: &str = "recommendations";

const CREDIT_WEIGHT: f64 = 0.3;
const FRAUD_WEIGHT: f64 = 0.3;
const PORTFOLIO_WEIGHT: f64 = 0.2;
const BEHAVIORAL_WEIGHT: f64 = 0.2;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AssessmentType {
    Credit,
    Fraud,
    Portfolio,
    Comprehensive,
}

impl AssessmentType {
    pub const ALL: [AssessmentType; 4] = [
        AssessmentType::Credit,
        AssessmentType::Fraud,
        AssessmentType::Portfolio,
        AssessmentType::Comprehensive,
    ];

    pub fn tag(&self) -> &'static str {
        match self {
            AssessmentType::Credit => "credit",
            AssessmentType::Fraud => "fraud",
            AssessmentType::Portfolio => "portfolio",
            AssessmentType::Comprehensive => "comprehensive",
        }
    }

    pub fn parse(tag: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|kind| kind.tag() == tag)
    }

    /// Gate table key the assessment is submitted under
    pub fn gate_operation(&self) -> &'static str {
        match self {
            AssessmentType::Credit => "loan_approval",
            _ => "risk_assessment",
        }
    }
}

/// Weighted mean of the component scores that are present, rounded to cents
pub fn composite_score(assessments: &[StepResult], behavioral: &BehavioralAnalysis) -> f64 {
    let mut weighted = behavioral.behavioral_score * BEHAVIORAL_WEIGHT;
    let mut total_weight = BEHAVIORAL_WEIGHT;

    for assessment in assessments {
        let (score, weight) = match assessment {
            StepResult::Credit(credit) => (credit.risk_score, CREDIT_WEIGHT),
            StepResult::Fraud(fraud) => (fraud.fraud_score, FRAUD_WEIGHT),
            StepResult::Portfolio(portfolio) => (portfolio.portfolio_score, PORTFOLIO_WEIGHT),
            _ => continue,
        };
        weighted += score * weight;
        total_weight += weight;
    }

    ((weighted / total_weight) * 100.0).round() / 100.0
}

pub fn risk_alerts(score: f64, assessments: &[StepResult]) -> Vec<RiskAlert> {
    let mut alerts = Vec::new();

    if score > 75.0 {
        alerts.push(RiskAlert {
            level: "critical".to_string(),
            message: "High overall risk detected".to_string(),
        });
    }

    for assessment in assessments {
        match assessment {
            StepResult::Credit(credit) if !credit.approved => alerts.push(RiskAlert {
                level: "warning".to_string(),
                message: format!("Credit application would be declined ({})", credit.risk_level),
            }),
            StepResult::Fraud(fraud) if fraud.block_transaction => alerts.push(RiskAlert {
                level: "critical".to_string(),
                message: "Transaction should be blocked due to fraud risk".to_string(),
            }),
            StepResult::Portfolio(portfolio) if portfolio.rebalance_needed => {
                alerts.push(RiskAlert {
                    level: "info".to_string(),
                    message: "Portfolio rebalancing recommended".to_string(),
                })
            }
            _ => {}
        }
    }

    alerts
}

pub fn mitigation_recommendations(score: f64, assessments: &[StepResult]) -> Vec<String> {
    let mut recommendations = Vec::new();

    if score > 60.0 {
        recommendations.push("Consider reducing exposure to high-risk activities".to_string());
        recommendations.push("Implement additional security measures".to_string());
    }

    for assessment in assessments {
        match assessment {
            StepResult::Credit(credit) if credit.dti_ratio > 0.4 => {
                recommendations.push("Work on reducing debt-to-income ratio".to_string());
                recommendations.push("Consider debt consolidation options".to_string());
            }
            StepResult::Fraud(fraud) if fraud.requires_2fa => {
                recommendations.push("Enable two-factor authentication".to_string());
                recommendations.push("Review and update security settings".to_string());
            }
            StepResult::Portfolio(portfolio) if portfolio.rebalance_needed => {
                recommendations.push("Rebalance portfolio to improve diversification".to_string());
                recommendations
                    .push("Consider reducing concentration in high-risk assets".to_string());
            }
            _ => {}
        }
    }

    recommendations
}

/// Confidence is high only when the score is clearly on one side
pub fn assessment_confidence(score: f64) -> f64 {
    if !(30.0..=70.0).contains(&score) {
        0.9
    } else {
        0.6
    }
}

fn loan_terms(instance: &WorkflowInstance) -> LoanTerms {
    LoanTerms {
        amount: instance.param_f64("loan_amount").unwrap_or(0.0),
        purpose: instance
            .param_str("loan_purpose")
            .unwrap_or("personal")
            .to_string(),
        term_months: instance.param_f64("loan_term").unwrap_or(12.0).max(0.0) as u32,
    }
}

struct LoadFinancialData {
    risk: Arc<dyn RiskService>,
}

#[async_trait]
impl WorkflowStep for LoadFinancialData {
    fn name(&self) -> &str {
        "load_financial_data"
    }

    async fn run(&self, instance: &mut WorkflowInstance) -> Result<StepOutcome> {
        let user = instance.acting_user()?.clone();
        let handle = instance
            .ledger
            .register("financial_load", payload([("user_id", user.id.clone())]));
        let data = self
            .risk
            .load_financial_data(&user)
            .await
            .context("Failed to load financial data")?;
        instance.ledger.mark_completed(handle, None);

        instance.put(FINANCIAL_DATA_KEY, &data)?;
        Ok(StepOutcome::Continue)
    }
}

struct Assess {
    assessment: AssessmentType,
    risk: Arc<dyn RiskService>,
}

impl Assess {
    async fn credit(
        &self,
        instance: &mut WorkflowInstance,
        data: &FinancialSnapshot,
    ) -> Result<()> {
        let user = instance.acting_user()?.clone();
        let terms = loan_terms(instance);
        let handle = instance.ledger.register(
            "credit_assessment",
            payload([
                ("user_id", json!(user.id)),
                ("loan_amount", json!(terms.amount)),
            ]),
        );
        let credit = self
            .risk
            .assess_credit(&user, data, &terms)
            .await
            .context("Credit assessment failed")?;
        instance
            .ledger
            .mark_completed(handle, Some(json!({"approved": credit.approved})));
        instance.results.push(StepResult::Credit(credit));
        Ok(())
    }

    async fn fraud(&self, instance: &mut WorkflowInstance, data: &FinancialSnapshot) -> Result<()> {
        let user = instance.acting_user()?.clone();
        let amount = instance.param_f64("amount").unwrap_or(0.0);
        let recipient = instance.param_str("recipient").map(str::to_string);
        let fraud = self
            .risk
            .assess_fraud(&user, data, amount, recipient.as_deref())
            .await
            .context("Fraud assessment failed")?;
        instance.results.push(StepResult::Fraud(fraud));
        Ok(())
    }

    async fn portfolio(
        &self,
        instance: &mut WorkflowInstance,
        data: &FinancialSnapshot,
    ) -> Result<()> {
        let user = instance.acting_user()?.clone();
        let portfolio = self
            .risk
            .assess_portfolio(&user, data)
            .await
            .context("Portfolio assessment failed")?;
        instance.results.push(StepResult::Portfolio(portfolio));
        Ok(())
    }
}

#[async_trait]
impl WorkflowStep for Assess {
    fn name(&self) -> &str {
        match self.assessment {
            AssessmentType::Credit => "credit_assessment",
            AssessmentType::Fraud => "fraud_assessment",
            AssessmentType::Portfolio => "portfolio_assessment",
            AssessmentType::Comprehensive => "comprehensive_assessment",
        }
    }

    async fn run(&self, instance: &mut WorkflowInstance) -> Result<StepOutcome> {
        let data: FinancialSnapshot = instance.take(FINANCIAL_DATA_KEY)?;

        match self.assessment {
            AssessmentType::Credit => self.credit(instance, &data).await?,
            AssessmentType::Fraud => self.fraud(instance, &data).await?,
            AssessmentType::Portfolio => self.portfolio(instance, &data).await?,
            AssessmentType::Comprehensive => {
                self.credit(instance, &data).await?;
                self.fraud(instance, &data).await?;
                self.portfolio(instance, &data).await?;
            }
        }
        Ok(StepOutcome::Continue)
    }
}

struct AnalyzeBehavior {
    risk: Arc<dyn RiskService>,
}

#[async_trait]
impl WorkflowStep for AnalyzeBehavior {
    fn name(&self) -> &str {
        "behavioral_analysis"
    }

    async fn run(&self, instance: &mut WorkflowInstance) -> Result<StepOutcome> {
        let user = instance.acting_user()?.clone();
        let behavioral = self
            .risk
            .analyze_behavior(&user)
            .await
            .context("Behavioral analysis failed")?;
        instance.put(BEHAVIORAL_KEY, &behavioral)?;
        Ok(StepOutcome::Continue)
    }
}

struct CompositeScore;

#[async_trait]
impl WorkflowStep for CompositeScore {
    fn name(&self) -> &str {
        "composite_risk_score"
    }

    async fn run(&self, instance: &mut WorkflowInstance) -> Result<StepOutcome> {
        let behavioral: BehavioralAnalysis = instance.take(BEHAVIORAL_KEY)?;
        let score = composite_score(&instance.results, &behavioral);
        instance.put(RISK_SCORE_KEY, &score)?;
        Ok(StepOutcome::Continue)
    }
}

struct RaiseAlerts;

#[async_trait]
impl WorkflowStep for RaiseAlerts {
    fn name(&self) -> &str {
        "risk_alerts"
    }

    async fn run(&self, instance: &mut WorkflowInstance) -> Result<StepOutcome> {
        let score: f64 = instance.take(RISK_SCORE_KEY)?;
        let alerts = risk_alerts(score, &instance.results);

        if !alerts.is_empty() {
            let handle = instance
                .ledger
                .register("risk_alert", payload([("count", alerts.len())]));
            for alert in &alerts {
                log_alert(&instance.conversation_id, &alert.level, &alert.message);
            }
            instance.ledger.mark_completed(handle, None);
        }

        instance.put(ALERTS_KEY, &alerts)?;
        Ok(StepOutcome::Continue)
    }
}

struct ReviewAssessment {
    assessment: AssessmentType,
}

#[async_trait]
impl WorkflowStep for ReviewAssessment {
    fn name(&self) -> &str {
        "record_risk_decision"
    }

    async fn run(&self, instance: &mut WorkflowInstance) -> Result<StepOutcome> {
        let score: f64 = instance.take(RISK_SCORE_KEY)?;
        let alerts: Vec<RiskAlert> = instance.take(ALERTS_KEY)?;

        let risk_level = if score > 75.0 {
            RiskLevel::High
        } else if score > 50.0 {
            RiskLevel::Medium
        } else {
            RiskLevel::Low
        };
        let value = instance
            .param_f64("loan_amount")
            .or_else(|| instance.param_f64("amount"))
            .unwrap_or(0.0);

        let checkpoint =
            ReviewCheckpoint::new(self.assessment.gate_operation(), assessment_confidence(score))
                .with_value(value)
                .with_risk_level(risk_level)
                .force_review(!alerts.is_empty() || instance.param_bool("force_human_review"))
                .with_decision(
                    json!({
                        "assessment_type": self.assessment.tag(),
                        "risk_score": score,
                        "alerts": alerts.len(),
                    }),
                    format!("Risk assessment completed: {}", self.assessment.tag()),
                )
                .with_hints_from(instance);

        Ok(StepOutcome::Suspend(checkpoint))
    }
}

struct Recommend;

#[async_trait]
impl WorkflowStep for Recommend {
    fn name(&self) -> &str {
        "mitigation_recommendations"
    }

    async fn run(&self, instance: &mut WorkflowInstance) -> Result<StepOutcome> {
        let score: f64 = instance.take(RISK_SCORE_KEY)?;
        let recommendations = mitigation_recommendations(score, &instance.results);
        instance.put(RECOMMENDATIONS_KEY, &recommendations)?;
        Ok(StepOutcome::Continue)
    }
}

pub struct RiskAssessmentWorkflow {
    users: Arc<dyn UserDirectory>,
    risk: Arc<dyn RiskService>,
}

impl RiskAssessmentWorkflow {
    pub fn new(users: Arc<dyn UserDirectory>, risk: Arc<dyn RiskService>) -> Self {
        Self { users, risk }
    }
}

#[async_trait]
impl WorkflowDefinition for RiskAssessmentWorkflow {
    fn kind(&self) -> WorkflowKind {
        WorkflowKind::RiskAssessment
    }

    fn agent_type(&self) -> &'static str {
        "risk-assessment"
    }

    fn operation_types(&self) -> Vec<String> {
        AssessmentType::ALL
            .iter()
            .map(|kind| kind.tag().to_string())
            .collect()
    }

    fn gate_operations(&self) -> Vec<String> {
        vec!["loan_approval".to_string(), "risk_assessment".to_string()]
    }

    fn plan(&self, operation_type: &str) -> Result<StepPlan, WorkflowError> {
        let assessment = AssessmentType::parse(operation_type)
            .ok_or_else(|| invalid_operation(self.kind(), operation_type))?;

        Ok(vec![
            Box::new(LoadFinancialData {
                risk: self.risk.clone(),
            }),
            Box::new(Assess {
                assessment,
                risk: self.risk.clone(),
            }),
            Box::new(AnalyzeBehavior {
                risk: self.risk.clone(),
            }),
            Box::new(CompositeScore),
            Box::new(RaiseAlerts),
            Box::new(ReviewAssessment { assessment }),
            Box::new(Recommend),
        ])
    }

    async fn validate(&self, instance: &mut WorkflowInstance) -> Result<(), WorkflowError> {
        resolve_user(self.users.as_ref(), instance).await?;
        Ok(())
    }

    fn compensations(&self) -> CompensationRegistry {
        CompensationRegistry::new()
            .with_handler("financial_load", Arc::new(LoggingCompensation))
            .with_handler("credit_assessment", Arc::new(LoggingCompensation))
            .with_handler("risk_alert", Arc::new(LoggingCompensation))
    }

    fn finish(&self, instance: &WorkflowInstance) -> Result<WorkflowOutput> {
        Ok(WorkflowOutput::RiskAssessment(RiskAssessmentOutput {
            assessment_type: instance.operation_type.clone(),
            risk_score: instance.take(RISK_SCORE_KEY)?,
            assessments: instance.results.clone(),
            behavioral: instance.take(BEHAVIORAL_KEY)?,
            alerts: instance.take(ALERTS_KEY)?,
            recommendations: instance.take(RECOMMENDATIONS_KEY)?,
            review: review_of(instance)?,
        }))
    }

    fn describe(&self, instance: &WorkflowInstance) -> String {
        format!("Risk assessment completed: {}", instance.operation_type)
    }
}
