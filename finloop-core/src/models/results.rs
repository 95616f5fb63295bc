//! Typed step results and workflow outputs

use crate::models::workflow::ReviewDecision;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// KYC verification result
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct KycResult {
    pub verified: bool,
    pub level: String,
    /// Verification score, 0-100
    pub score: u32,
    pub issues: Vec<String>,
    pub alerts: Vec<String>,
    pub requires_report: bool,
}

/// AML screening result
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AmlResult {
    pub cleared: bool,
    /// Risk score, 0-100
    pub risk_score: u32,
    pub flags: Vec<String>,
    pub sanctions_match: bool,
    pub requires_report: bool,
    pub alerts: Vec<String>,
}

/// Transaction monitoring result
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MonitoringResult {
    pub monitored: bool,
    pub period: String,
    pub suspicious_patterns: Vec<String>,
    pub unusual_activity: bool,
    pub requires_report: bool,
    pub alerts: Vec<String>,
}

/// Regulatory report generation result
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ReportingResult {
    pub report_generated: bool,
    pub report_type: String,
    pub report_id: String,
    pub submitted: bool,
    pub alerts: Vec<String>,
}

/// Financial data loaded before a risk assessment
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct FinancialSnapshot {
    pub total_assets: f64,
    pub total_debt: f64,
    pub monthly_income: f64,
    pub monthly_debt: f64,
}

/// Credit risk assessment
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CreditAssessment {
    pub credit_score: u32,
    pub dti_ratio: f64,
    pub affordability_ratio: f64,
    pub monthly_payment: f64,
    /// Risk score, 0-100
    pub risk_score: f64,
    pub risk_level: String,
    pub approved: bool,
    pub max_loan_amount: f64,
}

/// Fraud risk assessment
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FraudAssessment {
    pub fraud_score: f64,
    pub velocity_violation: bool,
    pub anomalies: Vec<String>,
    pub device_trusted: bool,
    pub location_verified: bool,
    pub risk_level: String,
    pub requires_2fa: bool,
    pub block_transaction: bool,
}

/// Portfolio risk assessment
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PortfolioAssessment {
    pub portfolio_score: f64,
    pub diversification_score: f64,
    pub highest_concentration: f64,
    pub value_at_risk: f64,
    pub stress_survival_rate: f64,
    pub risk_level: String,
    pub rebalance_needed: bool,
}

/// Behavioral pattern analysis
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct BehavioralAnalysis {
    pub anomalies: Vec<String>,
    pub behavioral_score: f64,
}

/// Classified customer intent
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct IntentClassification {
    pub name: String,
    pub confidence: f64,
    #[serde(default)]
    pub entities: BTreeMap<String, String>,
}

/// Tool invoked for an intent
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ToolInvocation {
    pub tool: String,
    pub success: bool,
    pub message: String,
}

/// Order placed by the trading saga
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TradeOrder {
    pub id: String,
    pub side: String,
    pub symbol: String,
    pub amount: f64,
}

/// Fill of an executed order
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TradeExecution {
    pub id: String,
    pub order_id: String,
    pub executed_price: f64,
    pub executed_amount: f64,
    pub fee: f64,
}

/// Result produced by a business step, one variant per collaborator call
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StepResult {
    Kyc(KycResult),
    Aml(AmlResult),
    Monitoring(MonitoringResult),
    Reporting(ReportingResult),
    Credit(CreditAssessment),
    Fraud(FraudAssessment),
    Portfolio(PortfolioAssessment),
    Intent(IntentClassification),
    Tool(ToolInvocation),
    Trade(TradeExecution),
}

impl StepResult {
    /// Alerts raised by compliance results
    pub fn alerts(&self) -> &[String] {
        match self {
            StepResult::Kyc(r) => &r.alerts,
            StepResult::Aml(r) => &r.alerts,
            StepResult::Monitoring(r) => &r.alerts,
            StepResult::Reporting(r) => &r.alerts,
            _ => &[],
        }
    }

    /// Whether a compliance result asks for a follow-up report
    pub fn requires_report(&self) -> bool {
        match self {
            StepResult::Kyc(r) => r.requires_report,
            StepResult::Aml(r) => r.requires_report,
            StepResult::Monitoring(r) => r.requires_report,
            _ => false,
        }
    }
}

/// Compliance report produced when a check asks for one
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ComplianceReport {
    pub id: String,
    pub compliance_type: String,
    pub conversation_id: String,
    pub user_id: String,
    pub recommendations: Vec<String>,
}

/// Risk alert raised by the risk assessment workflow
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RiskAlert {
    /// `critical`, `warning` or `info`
    pub level: String,
    pub message: String,
}

/// Reviewer feedback collected for calibrating the automation
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ReviewFeedback {
    /// 1.0 full agreement, 0.5 partial, 0.0 none
    pub agreement: f64,
    pub learning_points: Vec<String>,
    pub improvement_areas: Vec<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ComplianceOutput {
    pub compliance_type: String,
    pub check: StepResult,
    pub confidence: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub report: Option<ComplianceReport>,
    pub alerts: Vec<String>,
    #[serde(flatten)]
    pub review: ReviewDecision,
}

#[derive(Debug, Clone, Serialize)]
pub struct RiskAssessmentOutput {
    pub assessment_type: String,
    pub risk_score: f64,
    pub assessments: Vec<StepResult>,
    pub behavioral: BehavioralAnalysis,
    pub alerts: Vec<RiskAlert>,
    pub recommendations: Vec<String>,
    #[serde(flatten)]
    pub review: ReviewDecision,
}

#[derive(Debug, Clone, Serialize)]
pub struct CustomerServiceOutput {
    pub intent: String,
    pub confidence: f64,
    pub response_text: String,
    pub tools_used: Vec<String>,
    #[serde(flatten)]
    pub review: ReviewDecision,
}

#[derive(Debug, Clone, Serialize)]
pub struct HumanReviewOutput {
    pub operation_type: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub feedback: Option<ReviewFeedback>,
    #[serde(flatten)]
    pub review: ReviewDecision,
}

#[derive(Debug, Clone, Serialize)]
pub struct TradingOutput {
    pub side: String,
    pub symbol: String,
    pub amount: f64,
    pub executed: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub order_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub trade_id: Option<String>,
    pub risk_orders: Vec<String>,
    #[serde(flatten)]
    pub review: ReviewDecision,
}

/// Output of a successful workflow run
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "workflow", rename_all = "snake_case")]
pub enum WorkflowOutput {
    Compliance(ComplianceOutput),
    RiskAssessment(RiskAssessmentOutput),
    CustomerService(CustomerServiceOutput),
    HumanReview(HumanReviewOutput),
    Trading(TradingOutput),
}

impl WorkflowOutput {
    pub fn review(&self) -> Option<&ReviewDecision> {
        match self {
            WorkflowOutput::Compliance(o) => Some(&o.review),
            WorkflowOutput::RiskAssessment(o) => Some(&o.review),
            WorkflowOutput::CustomerService(o) => Some(&o.review),
            WorkflowOutput::HumanReview(o) => Some(&o.review),
            WorkflowOutput::Trading(o) => Some(&o.review),
        }
    }
}
