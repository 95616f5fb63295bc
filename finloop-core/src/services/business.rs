//! Business step services consumed by the workflow definitions
//!
//! These are black boxes to the orchestration core: each call is a bounded request that
//! either returns a typed result or an error. Retry policy, if any, belongs to the
//! implementation.

use crate::models::results::{
    AmlResult, BehavioralAnalysis, CreditAssessment, FinancialSnapshot, FraudAssessment,
    IntentClassification, KycResult, MonitoringResult, PortfolioAssessment, ReportingResult,
    ToolInvocation, TradeExecution, TradeOrder,
};
use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Acting user as seen by the workflows
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct UserProfile {
    pub id: String,
    pub role: String,
    /// Email/identity verified
    pub verified: bool,
    /// Primary account USD balance
    pub usd_balance: f64,
}

impl UserProfile {
    pub fn can_run_compliance(&self) -> bool {
        self.role == "admin" || self.role == "compliance_officer"
    }
}

/// Loan request terms for a credit assessment
#[derive(Debug, Clone, PartialEq)]
pub struct LoanTerms {
    pub amount: f64,
    pub purpose: String,
    pub term_months: u32,
}

#[async_trait]
pub trait UserDirectory: Send + Sync {
    async fn find_user(&self, user_id: &str) -> Result<Option<UserProfile>>;
}

#[async_trait]
pub trait ComplianceService: Send + Sync {
    async fn verify_kyc(
        &self,
        user: &UserProfile,
        level: &str,
        documents: &[String],
    ) -> Result<KycResult>;

    async fn screen_aml(
        &self,
        user: &UserProfile,
        transaction_id: Option<&str>,
        amount: f64,
        counterparty: Option<&str>,
    ) -> Result<AmlResult>;

    async fn monitor_transactions(
        &self,
        user: &UserProfile,
        period: &str,
        threshold: f64,
    ) -> Result<MonitoringResult>;

    async fn generate_regulatory_report(
        &self,
        user: &UserProfile,
        report_type: &str,
        period: &str,
    ) -> Result<ReportingResult>;

    /// Mark an unsubmitted report as cancelled
    async fn cancel_report(&self, report_id: &str) -> Result<()>;
}

#[async_trait]
pub trait RiskService: Send + Sync {
    async fn load_financial_data(&self, user: &UserProfile) -> Result<FinancialSnapshot>;

    async fn assess_credit(
        &self,
        user: &UserProfile,
        data: &FinancialSnapshot,
        terms: &LoanTerms,
    ) -> Result<CreditAssessment>;

    async fn assess_fraud(
        &self,
        user: &UserProfile,
        data: &FinancialSnapshot,
        amount: f64,
        recipient: Option<&str>,
    ) -> Result<FraudAssessment>;

    async fn assess_portfolio(
        &self,
        user: &UserProfile,
        data: &FinancialSnapshot,
    ) -> Result<PortfolioAssessment>;

    async fn analyze_behavior(&self, user: &UserProfile) -> Result<BehavioralAnalysis>;
}

#[async_trait]
pub trait IntentService: Send + Sync {
    async fn classify(&self, normalized_query: &str) -> Result<IntentClassification>;

    async fn invoke_tool(
        &self,
        tool: &str,
        intent: &IntentClassification,
    ) -> Result<ToolInvocation>;
}

#[async_trait]
pub trait TradingService: Send + Sync {
    /// Reserve funds for a trade; returns the lock id
    async fn lock_funds(&self, user: &UserProfile, amount: f64, symbol: &str) -> Result<String>;
    async fn unlock_funds(&self, lock_id: &str) -> Result<()>;

    async fn create_order(
        &self,
        user: &UserProfile,
        side: &str,
        symbol: &str,
        amount: f64,
    ) -> Result<TradeOrder>;
    async fn cancel_order(&self, order_id: &str) -> Result<()>;

    async fn execute_order(&self, order_id: &str) -> Result<TradeExecution>;
    /// Place the opposite order to neutralize an execution
    async fn reverse_execution(&self, execution_id: &str) -> Result<()>;

    async fn update_portfolio(&self, user_id: &str, execution: &TradeExecution) -> Result<()>;

    /// Create a stop-loss or take-profit order; returns its id
    async fn create_risk_order(&self, execution_id: &str, kind: &str, price: f64)
        -> Result<String>;
}

/// The collaborator set a workflow registry is built from
#[derive(Clone)]
pub struct Collaborators {
    pub users: Arc<dyn UserDirectory>,
    pub compliance: Arc<dyn ComplianceService>,
    pub risk: Arc<dyn RiskService>,
    pub intents: Arc<dyn IntentService>,
    pub trading: Arc<dyn TradingService>,
}
