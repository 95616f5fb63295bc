//! Deterministic in-process collaborators
//!
//! Stand-ins for the external business services, returning the demo values of the
//! production system so workflows run end to end without a backend.

use crate::models::results::{
    AmlResult, BehavioralAnalysis, CreditAssessment, FinancialSnapshot, FraudAssessment,
    IntentClassification, KycResult, MonitoringResult, PortfolioAssessment, ReportingResult,
    ToolInvocation, TradeExecution, TradeOrder,
};
use crate::services::business::{
    Collaborators, ComplianceService, IntentService, LoanTerms, RiskService, TradingService,
    UserDirectory, UserProfile,
};
use anyhow::{bail, Result};
use async_trait::async_trait;
use dashmap::DashMap;
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};
use uuid::Uuid;

fn short_id(prefix: &str) -> String {
    format!("{}_{}", prefix, &Uuid::new_v4().simple().to_string()[..12])
}

/// User directory backed by a concurrent map
#[derive(Default)]
pub struct SimulatedUserDirectory {
    users: DashMap<String, UserProfile>,
}

impl SimulatedUserDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Directory seeded with a verified admin `user_demo` holding 100 000 USD
    pub fn demo() -> Self {
        let directory = Self::new();
        directory.insert(UserProfile {
            id: "user_demo".to_string(),
            role: "admin".to_string(),
            verified: true,
            usd_balance: 100_000.0,
        });
        directory
    }

    pub fn insert(&self, user: UserProfile) {
        self.users.insert(user.id.clone(), user);
    }

    pub fn with_user(self, user: UserProfile) -> Self {
        self.insert(user);
        self
    }
}

#[async_trait]
impl UserDirectory for SimulatedUserDirectory {
    async fn find_user(&self, user_id: &str) -> Result<Option<UserProfile>> {
        Ok(self.users.get(user_id).map(|entry| entry.value().clone()))
    }
}

/// Compliance checks with fixed demo scores
#[derive(Debug, Clone)]
pub struct SimulatedComplianceService {
    kyc_score: u32,
    aml_risk_score: u32,
    monitoring_alerts: Vec<String>,
}

impl Default for SimulatedComplianceService {
    fn default() -> Self {
        Self {
            kyc_score: 85,
            aml_risk_score: 25,
            monitoring_alerts: Vec::new(),
        }
    }
}

impl SimulatedComplianceService {
    pub fn with_kyc_score(mut self, score: u32) -> Self {
        self.kyc_score = score.min(100);
        self
    }

    pub fn with_aml_risk_score(mut self, score: u32) -> Self {
        self.aml_risk_score = score.min(100);
        self
    }

    pub fn with_monitoring_alerts(mut self, alerts: Vec<String>) -> Self {
        self.monitoring_alerts = alerts;
        self
    }
}

#[async_trait]
impl ComplianceService for SimulatedComplianceService {
    async fn verify_kyc(
        &self,
        _user: &UserProfile,
        level: &str,
        documents: &[String],
    ) -> Result<KycResult> {
        let issues = if documents.is_empty() && self.kyc_score < 70 {
            vec!["No supporting documents supplied".to_string()]
        } else {
            Vec::new()
        };

        Ok(KycResult {
            verified: self.kyc_score >= 70,
            level: level.to_string(),
            score: self.kyc_score,
            issues,
            alerts: Vec::new(),
            requires_report: false,
        })
    }

    async fn screen_aml(
        &self,
        _user: &UserProfile,
        _transaction_id: Option<&str>,
        _amount: f64,
        _counterparty: Option<&str>,
    ) -> Result<AmlResult> {
        let flagged = self.aml_risk_score > 70;
        Ok(AmlResult {
            cleared: !flagged,
            risk_score: self.aml_risk_score,
            flags: if flagged {
                vec!["high_risk_score".to_string()]
            } else {
                Vec::new()
            },
            sanctions_match: false,
            requires_report: flagged,
            alerts: Vec::new(),
        })
    }

    async fn monitor_transactions(
        &self,
        _user: &UserProfile,
        period: &str,
        _threshold: f64,
    ) -> Result<MonitoringResult> {
        let suspicious = !self.monitoring_alerts.is_empty();
        Ok(MonitoringResult {
            monitored: true,
            period: period.to_string(),
            suspicious_patterns: Vec::new(),
            unusual_activity: suspicious,
            requires_report: suspicious,
            alerts: self.monitoring_alerts.clone(),
        })
    }

    async fn generate_regulatory_report(
        &self,
        _user: &UserProfile,
        report_type: &str,
        _period: &str,
    ) -> Result<ReportingResult> {
        Ok(ReportingResult {
            report_generated: true,
            report_type: report_type.to_string(),
            report_id: short_id("report"),
            submitted: false,
            alerts: Vec::new(),
        })
    }

    async fn cancel_report(&self, report_id: &str) -> Result<()> {
        tracing::info!(report_id = report_id, "Regulatory report cancelled");
        Ok(())
    }
}

/// Risk assessments using simplified scoring rules
#[derive(Debug, Clone)]
pub struct SimulatedRiskService {
    monthly_income: f64,
}

impl Default for SimulatedRiskService {
    fn default() -> Self {
        Self {
            monthly_income: 5_000.0,
        }
    }
}

impl SimulatedRiskService {
    pub fn with_monthly_income(mut self, income: f64) -> Self {
        self.monthly_income = income;
        self
    }

    fn credit_score(data: &FinancialSnapshot) -> u32 {
        let mut score: i64 = 650;
        if data.total_assets > 100_000.0 {
            score += 50;
        } else if data.total_assets > 50_000.0 {
            score += 25;
        }
        if data.total_debt > 50_000.0 {
            score -= 50;
        } else if data.total_debt > 25_000.0 {
            score -= 25;
        }
        score.clamp(300, 850) as u32
    }

    fn monthly_payment(amount: f64, term_months: u32) -> f64 {
        if term_months == 0 {
            return 0.0;
        }
        let rate = 0.05 / 12.0;
        (amount * rate) / (1.0 - (1.0 + rate).powi(-(term_months as i32)))
    }

    fn level(score: f64, labels: [&str; 3]) -> String {
        let label = if score < 30.0 {
            labels[0]
        } else if score < 60.0 {
            labels[1]
        } else {
            labels[2]
        };
        label.to_string()
    }
}

#[async_trait]
impl RiskService for SimulatedRiskService {
    async fn load_financial_data(&self, user: &UserProfile) -> Result<FinancialSnapshot> {
        Ok(FinancialSnapshot {
            total_assets: user.usd_balance,
            total_debt: 0.0,
            monthly_income: self.monthly_income,
            monthly_debt: 0.0,
        })
    }

    async fn assess_credit(
        &self,
        _user: &UserProfile,
        data: &FinancialSnapshot,
        terms: &LoanTerms,
    ) -> Result<CreditAssessment> {
        let credit_score = Self::credit_score(data);
        let income = data.monthly_income;
        let dti_ratio = if income > 0.0 {
            data.monthly_debt / income
        } else {
            1.0
        };
        let monthly_payment = Self::monthly_payment(terms.amount, terms.term_months);
        let affordability_ratio = if income > 0.0 {
            monthly_payment / income
        } else {
            1.0
        };

        let score_component = match credit_score {
            s if s >= 750 => 0.0,
            s if s >= 650 => 10.0,
            s if s >= 550 => 25.0,
            _ => 40.0,
        };
        let risk_score = score_component
            + (dti_ratio * 100.0).min(30.0)
            + (affordability_ratio * 100.0).min(30.0);

        let multiplier = match credit_score {
            s if s >= 750 => 5.0,
            s if s >= 650 => 4.0,
            s if s >= 550 => 3.0,
            _ => 2.0,
        };

        Ok(CreditAssessment {
            credit_score,
            dti_ratio,
            affordability_ratio,
            monthly_payment,
            risk_score,
            risk_level: Self::level(risk_score, ["low", "medium", "high"]),
            approved: risk_score < 60.0,
            max_loan_amount: income * multiplier * 12.0,
        })
    }

    async fn assess_fraud(
        &self,
        _user: &UserProfile,
        _data: &FinancialSnapshot,
        amount: f64,
        recipient: Option<&str>,
    ) -> Result<FraudAssessment> {
        let velocity_violation = amount > 10_000.0;
        let velocity_score: f64 = if velocity_violation { 80.0 } else { 20.0 };

        let mut anomalies = Vec::new();
        if amount > 50_000.0 {
            anomalies.push("Large transaction amount".to_string());
        }
        if recipient.is_some_and(|r| r.contains("offshore")) {
            anomalies.push("Offshore recipient".to_string());
        }
        let anomaly_score: f64 = if anomalies.is_empty() { 0.0 } else { 50.0 };

        let fraud_score: f64 = (velocity_score * 0.20 + anomaly_score * 0.25).min(100.0);

        Ok(FraudAssessment {
            fraud_score,
            velocity_violation,
            anomalies,
            device_trusted: true,
            location_verified: true,
            risk_level: Self::level(fraud_score, ["low", "medium", "high"]),
            requires_2fa: fraud_score > 30.0,
            block_transaction: fraud_score > 80.0,
        })
    }

    async fn assess_portfolio(
        &self,
        _user: &UserProfile,
        _data: &FinancialSnapshot,
    ) -> Result<PortfolioAssessment> {
        let diversification_score = 0.7;
        let highest_concentration = 0.3;
        let value_at_risk: f64 = 500.0;
        let stress_survival_rate = 0.85;

        let portfolio_score: f64 = ((1.0 - diversification_score) * 25.0
            + highest_concentration * 25.0
            + (value_at_risk / 1000.0_f64).min(1.0) * 25.0
            + (1.0 - stress_survival_rate) * 25.0)
            .min(100.0);

        Ok(PortfolioAssessment {
            portfolio_score,
            diversification_score,
            highest_concentration,
            value_at_risk,
            stress_survival_rate,
            risk_level: Self::level(portfolio_score, ["conservative", "moderate", "aggressive"]),
            rebalance_needed: portfolio_score > 70.0,
        })
    }

    async fn analyze_behavior(&self, _user: &UserProfile) -> Result<BehavioralAnalysis> {
        Ok(BehavioralAnalysis::default())
    }
}

/// Keyword intent classifier
#[derive(Debug, Clone, Default)]
pub struct SimulatedIntentService;

#[async_trait]
impl IntentService for SimulatedIntentService {
    async fn classify(&self, normalized_query: &str) -> Result<IntentClassification> {
        let (name, confidence) = if normalized_query.contains("balance") {
            ("check_balance", 0.9)
        } else if normalized_query.contains("transfer") {
            ("transfer_funds", 0.85)
        } else if normalized_query.contains("exchange") || normalized_query.contains("convert") {
            ("exchange_quote", 0.8)
        } else if normalized_query.contains("kyc") || normalized_query.contains("verification") {
            ("check_kyc_status", 0.85)
        } else {
            ("unknown", 0.5)
        };

        Ok(IntentClassification {
            name: name.to_string(),
            confidence,
            entities: BTreeMap::new(),
        })
    }

    async fn invoke_tool(
        &self,
        tool: &str,
        _intent: &IntentClassification,
    ) -> Result<ToolInvocation> {
        Ok(ToolInvocation {
            tool: tool.to_string(),
            success: true,
            message: "Tool execution simulated".to_string(),
        })
    }
}

/// Trading venue stand-in that journals every call
#[derive(Default)]
pub struct SimulatedTradingService {
    fail_on: Option<String>,
    journal: Mutex<Vec<String>>,
}

impl SimulatedTradingService {
    pub const MARKET_PRICE: f64 = 50_000.0;

    pub fn new() -> Self {
        Self::default()
    }

    /// Service whose named operation (e.g. `execute_order`) always fails
    pub fn failing_at(operation: &str) -> Self {
        Self {
            fail_on: Some(operation.to_string()),
            journal: Mutex::new(Vec::new()),
        }
    }

    /// Calls made so far, formatted as `operation:argument`
    pub fn journal(&self) -> Vec<String> {
        self.journal
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    fn record(&self, operation: &str, argument: &str) -> Result<()> {
        self.journal
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push(format!("{}:{}", operation, argument));
        if self.fail_on.as_deref() == Some(operation) {
            bail!("{} rejected by trading venue", operation);
        }
        Ok(())
    }
}

#[async_trait]
impl TradingService for SimulatedTradingService {
    async fn lock_funds(&self, user: &UserProfile, amount: f64, symbol: &str) -> Result<String> {
        if user.usd_balance < amount {
            bail!("Insufficient funds for trading");
        }
        let lock_id = short_id("lock");
        self.record("lock_funds", &lock_id)?;
        tracing::info!(
            user_id = %user.id,
            amount,
            lock_id = %lock_id,
            symbol,
            "Funds locked for trading"
        );
        Ok(lock_id)
    }

    async fn unlock_funds(&self, lock_id: &str) -> Result<()> {
        self.record("unlock_funds", lock_id)
    }

    async fn create_order(
        &self,
        _user: &UserProfile,
        side: &str,
        symbol: &str,
        amount: f64,
    ) -> Result<TradeOrder> {
        let order = TradeOrder {
            id: short_id("order"),
            side: side.to_string(),
            symbol: symbol.to_string(),
            amount,
        };
        self.record("create_order", &order.id)?;
        Ok(order)
    }

    async fn cancel_order(&self, order_id: &str) -> Result<()> {
        self.record("cancel_order", order_id)
    }

    async fn execute_order(&self, order_id: &str) -> Result<TradeExecution> {
        self.record("execute_order", order_id)?;
        let executed_amount = 0.02;
        Ok(TradeExecution {
            id: short_id("exec"),
            order_id: order_id.to_string(),
            executed_price: Self::MARKET_PRICE,
            executed_amount,
            fee: Self::MARKET_PRICE * executed_amount * 0.002,
        })
    }

    async fn reverse_execution(&self, execution_id: &str) -> Result<()> {
        tracing::warn!(execution_id, "Trade execution reversal initiated");
        self.record("reverse_execution", execution_id)
    }

    async fn update_portfolio(&self, user_id: &str, execution: &TradeExecution) -> Result<()> {
        self.record("update_portfolio", &format!("{}/{}", user_id, execution.id))
    }

    async fn create_risk_order(
        &self,
        execution_id: &str,
        kind: &str,
        price: f64,
    ) -> Result<String> {
        let order_id = short_id(kind);
        self.record("create_risk_order", &order_id)?;
        tracing::info!(order_id = %order_id, execution_id, kind, price, "Risk order created");
        Ok(order_id)
    }
}

impl Collaborators {
    /// Collaborator set made of the simulated services and the demo user directory
    pub fn simulated() -> Self {
        Self {
            users: Arc::new(SimulatedUserDirectory::demo()),
            compliance: Arc::new(SimulatedComplianceService::default()),
            risk: Arc::new(SimulatedRiskService::default()),
            intents: Arc::new(SimulatedIntentService),
            trading: Arc::new(SimulatedTradingService::new()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn user() -> UserProfile {
        UserProfile {
            id: "u1".to_string(),
            role: "user".to_string(),
            verified: true,
            usd_balance: 1_000.0,
        }
    }

    #[tokio::test]
    async fn test_credit_assessment_scores_affordability() {
        let service = SimulatedRiskService::default();
        let data = service.load_financial_data(&user()).await.unwrap();
        let terms = LoanTerms {
            amount: 10_000.0,
            purpose: "personal".to_string(),
            term_months: 12,
        };

        let credit = service.assess_credit(&user(), &data, &terms).await.unwrap();
        assert_eq!(credit.credit_score, 650);
        assert!(credit.monthly_payment > 850.0 && credit.monthly_payment < 860.0);
        // 10 (score) + 0 (dti) + ~17 (affordability)
        assert!(credit.approved);
        assert_eq!(credit.risk_level, "low");
    }

    #[tokio::test]
    async fn test_fraud_assessment_flags_large_offshore_transfer() {
        let service = SimulatedRiskService::default();
        let fraud = service
            .assess_fraud(&user(), &FinancialSnapshot::default(), 75_000.0, Some("offshore-bank"))
            .await
            .unwrap();

        assert!(fraud.velocity_violation);
        assert_eq!(fraud.anomalies.len(), 2);
        // 80 * 0.20 velocity + 50 * 0.25 anomalies
        assert!((fraud.fraud_score - 28.5).abs() < 1e-9);
        assert!(!fraud.requires_2fa);
        assert!(!fraud.block_transaction);
    }

    #[tokio::test]
    async fn test_trading_service_refuses_overdraft_and_injects_failures() {
        let service = SimulatedTradingService::new();
        let err = service.lock_funds(&user(), 5_000.0, "BTC/USD").await.unwrap_err();
        assert!(err.to_string().contains("Insufficient funds"));

        let failing = SimulatedTradingService::failing_at("execute_order");
        let order = failing
            .create_order(&user(), "buy", "BTC/USD", 100.0)
            .await
            .unwrap();
        assert!(failing.execute_order(&order.id).await.is_err());
        assert_eq!(failing.journal().len(), 2);
    }

    #[tokio::test]
    async fn test_intent_keywords() {
        let service = SimulatedIntentService;
        let intent = service.classify("what is my balance").await.unwrap();
        assert_eq!(intent.name, "check_balance");
        let intent = service.classify("hello there").await.unwrap();
        assert_eq!(intent.name, "unknown");
        assert_eq!(intent.confidence, 0.5);
    }
}
