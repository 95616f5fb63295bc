//! Trade execution saga with per-effect compensations

use super::{invalid_operation, resolve_user, review_of, WorkflowDefinition};
use crate::error::WorkflowError;
use crate::models::results::{StepResult, TradeExecution, TradeOrder, TradingOutput, WorkflowOutput};
use crate::models::workflow::{CompensationAction, RiskLevel, WorkflowKind};
use crate::services::business::{TradingService, UserDirectory};
use crate::services::logging::log_compensation;
use crate::workflow::compensation::{payload, CompensationHandler, CompensationRegistry};
use crate::workflow::instance::WorkflowInstance;
use crate::workflow::step::{ReviewCheckpoint, StepOutcome, StepPlan, WorkflowStep};
use anyhow::{Context, Result};
use async_trait::async_trait;
use serde_json::{json, Value};
use std::sync::Arc;

pub const GATE_OPERATION: &str = "trading_execution";
pub const DEFAULT_SYMBOL: &str = "BTC/USD";
pub const DEFAULT_POSITION_SIZE: f64 = 0.1;
/// Confidence assumed for a strategy that does not carry one
pub const DEFAULT_STRATEGY_CONFIDENCE: f64 = 0.85;

const AMOUNT_KEY: &str = "trade_amount";
const LOCK_KEY: &str = "lock_id";
const ORDER_KEY: &str = "order";
const EXECUTION_KEY: &str = "execution";
const RISK_ORDERS_KEY: &str = "risk_orders";

fn symbol(instance: &WorkflowInstance) -> String {
    instance
        .param_str("symbol")
        .unwrap_or(DEFAULT_SYMBOL)
        .to_string()
}

struct SizeTrade;

#[async_trait]
impl WorkflowStep for SizeTrade {
    fn name(&self) -> &str {
        "size_trade"
    }

    async fn run(&self, instance: &mut WorkflowInstance) -> Result<StepOutcome> {
        let balance = instance.acting_user()?.usd_balance;
        let size = instance.param_f64("size").unwrap_or(DEFAULT_POSITION_SIZE);
        let amount = balance * size;
        instance.put(AMOUNT_KEY, &amount)?;
        Ok(StepOutcome::Continue)
    }
}

struct ReviewTrade;

#[async_trait]
impl WorkflowStep for ReviewTrade {
    fn name(&self) -> &str {
        "review_trade"
    }

    async fn run(&self, instance: &mut WorkflowInstance) -> Result<StepOutcome> {
        let amount: f64 = instance.take(AMOUNT_KEY)?;
        let confidence = instance
            .param_f64("confidence")
            .unwrap_or(DEFAULT_STRATEGY_CONFIDENCE);

        let checkpoint = ReviewCheckpoint::new(GATE_OPERATION, confidence)
            .with_value(amount)
            .with_risk_level(RiskLevel::parse(
                instance.param_str("risk_level").unwrap_or("low"),
            ))
            .force_review(instance.param_bool("force_human_review"))
            .with_decision(
                json!({
                    "action": instance.operation_type,
                    "symbol": symbol(instance),
                    "amount": amount,
                }),
                format!("{} {} for {:.2} USD", instance.operation_type, symbol(instance), amount),
            )
            .with_hints_from(instance);

        Ok(StepOutcome::Suspend(checkpoint))
    }
}

struct LockFunds {
    trading: Arc<dyn TradingService>,
}

#[async_trait]
impl WorkflowStep for LockFunds {
    fn name(&self) -> &str {
        "lock_funds"
    }

    async fn run(&self, instance: &mut WorkflowInstance) -> Result<StepOutcome> {
        if !instance.execution_allowed() {
            return Ok(StepOutcome::Continue);
        }

        let user = instance.acting_user()?.clone();
        let amount: f64 = instance.take(AMOUNT_KEY)?;
        let handle = instance
            .ledger
            .register("funds_lock", payload([("amount", amount)]));
        let lock_id = self
            .trading
            .lock_funds(&user, amount, &symbol(instance))
            .await
            .context("Failed to lock funds")?;

        // Undo needs the id, which only exists once the lock succeeded
        instance.ledger.mark_completed(handle, Some(json!({"lock_id": lock_id})));
        instance.put(LOCK_KEY, &lock_id)?;
        Ok(StepOutcome::Continue)
    }
}

struct CreateOrder {
    trading: Arc<dyn TradingService>,
}

#[async_trait]
impl WorkflowStep for CreateOrder {
    fn name(&self) -> &str {
        "create_order"
    }

    async fn run(&self, instance: &mut WorkflowInstance) -> Result<StepOutcome> {
        if !instance.execution_allowed() {
            return Ok(StepOutcome::Continue);
        }

        let user = instance.acting_user()?.clone();
        let amount: f64 = instance.take(AMOUNT_KEY)?;
        let side = instance.operation_type.clone();
        let handle = instance
            .ledger
            .register("order", payload([("side", side.clone())]));
        let order = self
            .trading
            .create_order(&user, &side, &symbol(instance), amount)
            .await
            .context("Failed to create order")?;

        instance
            .ledger
            .mark_completed(handle, Some(json!({"order_id": order.id})));
        instance.put(ORDER_KEY, &order)?;
        Ok(StepOutcome::Continue)
    }
}

struct ExecuteOrder {
    trading: Arc<dyn TradingService>,
}

#[async_trait]
impl WorkflowStep for ExecuteOrder {
    fn name(&self) -> &str {
        "execute_order"
    }

    async fn run(&self, instance: &mut WorkflowInstance) -> Result<StepOutcome> {
        if !instance.execution_allowed() {
            return Ok(StepOutcome::Continue);
        }

        let order: TradeOrder = instance.take(ORDER_KEY)?;
        let handle = instance
            .ledger
            .register("order_execution", payload([("order_id", order.id.clone())]));
        let execution = self
            .trading
            .execute_order(&order.id)
            .await
            .context("Failed to execute order")?;

        instance
            .ledger
            .mark_completed(handle, Some(json!({"execution_id": execution.id})));
        instance.put(EXECUTION_KEY, &execution)?;
        instance.results.push(StepResult::Trade(execution));
        Ok(StepOutcome::Continue)
    }
}

struct UpdatePortfolio {
    trading: Arc<dyn TradingService>,
}

#[async_trait]
impl WorkflowStep for UpdatePortfolio {
    fn name(&self) -> &str {
        "update_portfolio"
    }

    async fn run(&self, instance: &mut WorkflowInstance) -> Result<StepOutcome> {
        if !instance.execution_allowed() {
            return Ok(StepOutcome::Continue);
        }

        let execution: TradeExecution = instance.take(EXECUTION_KEY)?;
        self.trading
            .update_portfolio(&instance.user_id, &execution)
            .await
            .context("Failed to update portfolio")?;
        Ok(StepOutcome::Continue)
    }
}

struct SetRiskManagement {
    trading: Arc<dyn TradingService>,
}

#[async_trait]
impl WorkflowStep for SetRiskManagement {
    fn name(&self) -> &str {
        "set_risk_management"
    }

    async fn run(&self, instance: &mut WorkflowInstance) -> Result<StepOutcome> {
        if !instance.execution_allowed() {
            return Ok(StepOutcome::Continue);
        }

        let execution: TradeExecution = instance.take(EXECUTION_KEY)?;
        let mut risk_orders = Vec::new();

        for kind in ["stop_loss", "take_profit"] {
            let Some(price) = instance.param_f64(kind) else {
                continue;
            };
            let order_id = self
                .trading
                .create_risk_order(&execution.id, kind, price)
                .await
                .with_context(|| format!("Failed to create {} order", kind))?;
            risk_orders.push(order_id);
        }

        instance.put(RISK_ORDERS_KEY, &risk_orders)?;
        Ok(StepOutcome::Continue)
    }
}

/// Undo handlers reading the ids recorded on completion
enum TradeUndo {
    Unlock,
    Cancel,
    Reverse,
}

struct TradeCompensation {
    undo: TradeUndo,
    trading: Arc<dyn TradingService>,
}

#[async_trait]
impl CompensationHandler for TradeCompensation {
    async fn compensate(&self, action: &CompensationAction) -> Result<()> {
        log_compensation(&action.action_type, &action.payload);

        let result = action
            .result
            .as_ref()
            .context("Completed trade effect has no recorded result")?;
        let id = |key: &str| -> Result<String> {
            result
                .get(key)
                .and_then(Value::as_str)
                .map(str::to_string)
                .with_context(|| format!("Compensation result missing '{}'", key))
        };

        match self.undo {
            TradeUndo::Unlock => self.trading.unlock_funds(&id("lock_id")?).await,
            TradeUndo::Cancel => self.trading.cancel_order(&id("order_id")?).await,
            TradeUndo::Reverse => self.trading.reverse_execution(&id("execution_id")?).await,
        }
    }
}

pub struct TradingWorkflow {
    users: Arc<dyn UserDirectory>,
    trading: Arc<dyn TradingService>,
}

impl TradingWorkflow {
    pub fn new(users: Arc<dyn UserDirectory>, trading: Arc<dyn TradingService>) -> Self {
        Self { users, trading }
    }

    fn handler(&self, undo: TradeUndo) -> Arc<dyn CompensationHandler> {
        Arc::new(TradeCompensation {
            undo,
            trading: self.trading.clone(),
        })
    }
}

#[async_trait]
impl WorkflowDefinition for TradingWorkflow {
    fn kind(&self) -> WorkflowKind {
        WorkflowKind::Trading
    }

    fn agent_type(&self) -> &'static str {
        "trading-agent"
    }

    fn operation_types(&self) -> Vec<String> {
        vec!["buy".to_string(), "sell".to_string()]
    }

    fn gate_operations(&self) -> Vec<String> {
        vec![GATE_OPERATION.to_string()]
    }

    fn plan(&self, operation_type: &str) -> Result<StepPlan, WorkflowError> {
        if !matches!(operation_type, "buy" | "sell") {
            return Err(invalid_operation(self.kind(), operation_type));
        }

        Ok(vec![
            Box::new(SizeTrade),
            Box::new(ReviewTrade),
            Box::new(LockFunds {
                trading: self.trading.clone(),
            }),
            Box::new(CreateOrder {
                trading: self.trading.clone(),
            }),
            Box::new(ExecuteOrder {
                trading: self.trading.clone(),
            }),
            Box::new(UpdatePortfolio {
                trading: self.trading.clone(),
            }),
            Box::new(SetRiskManagement {
                trading: self.trading.clone(),
            }),
        ])
    }

    async fn validate(&self, instance: &mut WorkflowInstance) -> Result<(), WorkflowError> {
        let user = resolve_user(self.users.as_ref(), instance).await?;
        if !user.verified {
            return Err(WorkflowError::validation("User email is not verified"));
        }

        if let Some(confidence) = instance.param_f64("confidence") {
            if !(0.0..=1.0).contains(&confidence) {
                return Err(WorkflowError::Validation {
                    reason: "Invalid strategy confidence".to_string(),
                    details: vec![format!(
                        "confidence must be within 0..=1 (got {})",
                        confidence
                    )],
                });
            }
        }
        if let Some(size) = instance.param_f64("size") {
            if !(size > 0.0 && size <= 1.0) {
                return Err(WorkflowError::Validation {
                    reason: "Invalid position size".to_string(),
                    details: vec![format!("size must be within (0, 1] (got {})", size)],
                });
            }
        }
        Ok(())
    }

    fn compensations(&self) -> CompensationRegistry {
        CompensationRegistry::new()
            .with_handler("funds_lock", self.handler(TradeUndo::Unlock))
            .with_handler("order", self.handler(TradeUndo::Cancel))
            .with_handler("order_execution", self.handler(TradeUndo::Reverse))
    }

    fn finish(&self, instance: &WorkflowInstance) -> Result<WorkflowOutput> {
        let review = review_of(instance)?;
        let executed = instance.context.contains_key(EXECUTION_KEY);
        let order_id = instance
            .context
            .get(ORDER_KEY)
            .and_then(|order| order.get("id"))
            .and_then(Value::as_str)
            .map(str::to_string);
        let trade_id = instance
            .context
            .get(EXECUTION_KEY)
            .and_then(|execution| execution.get("id"))
            .and_then(Value::as_str)
            .map(str::to_string);
        let risk_orders: Vec<String> = if instance.context.contains_key(RISK_ORDERS_KEY) {
            instance.take(RISK_ORDERS_KEY)?
        } else {
            Vec::new()
        };

        Ok(WorkflowOutput::Trading(TradingOutput {
            side: instance.operation_type.clone(),
            symbol: symbol(instance),
            amount: instance.take(AMOUNT_KEY)?,
            executed,
            order_id,
            trade_id,
            risk_orders,
            review,
        }))
    }

    fn describe(&self, instance: &WorkflowInstance) -> String {
        format!("Trading execution: {} {}", instance.operation_type, symbol(instance))
    }
}
