//! Compensation ledger and undo handlers

use crate::models::workflow::{CompensationAction, CompensationStatus};
use crate::services::logging::log_compensation;
use anyhow::Result;
use async_trait::async_trait;
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::sync::Arc;

/// Undo for one kind of compensatable effect
#[async_trait]
pub trait CompensationHandler: Send + Sync {
    async fn compensate(&self, action: &CompensationAction) -> Result<()>;
}

/// Handler that only logs the undo. Used for effects the core has no way to reverse
/// beyond recording that they should be.
pub struct LoggingCompensation;

#[async_trait]
impl CompensationHandler for LoggingCompensation {
    async fn compensate(&self, action: &CompensationAction) -> Result<()> {
        log_compensation(&action.action_type, &action.payload);
        Ok(())
    }
}

/// Undo handlers keyed by compensation type
#[derive(Clone, Default)]
pub struct CompensationRegistry {
    handlers: HashMap<String, Arc<dyn CompensationHandler>>,
}

impl CompensationRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(
        &mut self,
        action_type: impl Into<String>,
        handler: Arc<dyn CompensationHandler>,
    ) {
        self.handlers.insert(action_type.into(), handler);
    }

    pub fn with_handler(
        mut self,
        action_type: impl Into<String>,
        handler: Arc<dyn CompensationHandler>,
    ) -> Self {
        self.register(action_type, handler);
        self
    }

    pub fn get(&self, action_type: &str) -> Option<&Arc<dyn CompensationHandler>> {
        self.handlers.get(action_type)
    }

    pub fn contains(&self, action_type: &str) -> bool {
        self.handlers.contains_key(action_type)
    }
}

/// Position of an action in its ledger
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CompensationHandle(usize);

/// Ordered, append-only list of compensatable actions owned by one instance
#[derive(Debug, Clone, Default)]
pub struct CompensationLedger {
    actions: Vec<CompensationAction>,
}

impl CompensationLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record an effect about to happen. Call before the effect so a crash between the
    /// two leaves a `started` entry rather than nothing.
    pub fn register(
        &mut self,
        action_type: impl Into<String>,
        payload: Map<String, Value>,
    ) -> CompensationHandle {
        self.actions.push(CompensationAction {
            action_type: action_type.into(),
            payload,
            status: CompensationStatus::Started,
            result: None,
        });
        CompensationHandle(self.actions.len() - 1)
    }

    /// Mark the effect as done so rollback will undo it
    pub fn mark_completed(&mut self, handle: CompensationHandle, result: Option<Value>) {
        if let Some(action) = self.actions.get_mut(handle.0) {
            action.status = CompensationStatus::Completed;
            action.result = result;
        }
    }

    pub fn len(&self) -> usize {
        self.actions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.actions.is_empty()
    }

    pub fn actions(&self) -> &[CompensationAction] {
        &self.actions
    }

    /// Drain the ledger in reverse registration order, undoing completed entries.
    ///
    /// Never fails. Each undo is isolated; returns `false` if any handler errored.
    pub async fn rollback(&mut self, registry: &CompensationRegistry) -> bool {
        let mut all_succeeded = true;

        while let Some(action) = self.actions.pop() {
            if action.status != CompensationStatus::Completed {
                tracing::debug!(
                    action_type = %action.action_type,
                    "Skipping compensation for effect that never completed"
                );
                continue;
            }

            let Some(handler) = registry.get(&action.action_type) else {
                tracing::warn!(
                    action_type = %action.action_type,
                    "No compensation handler registered, skipping"
                );
                continue;
            };

            match handler.compensate(&action).await {
                Ok(()) => {
                    tracing::info!(action_type = %action.action_type, "Compensation applied");
                }
                Err(e) => {
                    all_succeeded = false;
                    tracing::error!(
                        action_type = %action.action_type,
                        error = %format!("{:#}", e),
                        "Compensation failed"
                    );
                }
            }
        }

        all_succeeded
    }
}

/// Build a payload map from key/value pairs
pub fn payload<I, K, V>(entries: I) -> Map<String, Value>
where
    I: IntoIterator<Item = (K, V)>,
    K: Into<String>,
    V: Into<Value>,
{
    entries
        .into_iter()
        .map(|(k, v)| (k.into(), v.into()))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[derive(Default)]
    struct Recorder {
        undone: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl CompensationHandler for Recorder {
        async fn compensate(&self, action: &CompensationAction) -> Result<()> {
            let name = action
                .payload
                .get("name")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string();
            self.undone.lock().unwrap().push(name);
            Ok(())
        }
    }

    struct Failing;

    #[async_trait]
    impl CompensationHandler for Failing {
        async fn compensate(&self, _action: &CompensationAction) -> Result<()> {
            anyhow::bail!("downstream unavailable")
        }
    }

    #[tokio::test]
    async fn test_only_completed_entries_are_undone() {
        let recorder = Arc::new(Recorder::default());
        let registry = CompensationRegistry::new().with_handler("effect", recorder.clone());

        let mut ledger = CompensationLedger::new();
        let a = ledger.register("effect", payload([("name", "A")]));
        let _b = ledger.register("effect", payload([("name", "B")]));
        ledger.mark_completed(a, None);

        assert!(ledger.rollback(&registry).await);
        assert_eq!(*recorder.undone.lock().unwrap(), vec!["A".to_string()]);
        assert!(ledger.is_empty());
    }

    #[tokio::test]
    async fn test_rollback_runs_in_reverse_order() {
        let recorder = Arc::new(Recorder::default());
        let registry = CompensationRegistry::new().with_handler("effect", recorder.clone());

        let mut ledger = CompensationLedger::new();
        for name in ["first", "second", "third"] {
            let handle = ledger.register("effect", payload([("name", name)]));
            ledger.mark_completed(handle, Some(Value::Bool(true)));
        }

        assert!(ledger.rollback(&registry).await);
        assert_eq!(
            *recorder.undone.lock().unwrap(),
            vec!["third", "second", "first"]
        );
    }

    #[tokio::test]
    async fn test_failing_handler_does_not_stop_rollback() {
        let recorder = Arc::new(Recorder::default());
        let registry = CompensationRegistry::new()
            .with_handler("effect", recorder.clone())
            .with_handler("flaky", Arc::new(Failing));

        let mut ledger = CompensationLedger::new();
        let a = ledger.register("effect", payload([("name", "A")]));
        ledger.mark_completed(a, None);
        let b = ledger.register("flaky", Map::new());
        ledger.mark_completed(b, None);
        let c = ledger.register("unhandled", Map::new());
        ledger.mark_completed(c, None);

        assert!(!ledger.rollback(&registry).await);
        assert_eq!(*recorder.undone.lock().unwrap(), vec!["A".to_string()]);
    }

    #[tokio::test]
    async fn test_missing_handler_is_skipped() {
        let mut ledger = CompensationLedger::new();
        let handle = ledger.register("financial_load", Map::new());
        ledger.mark_completed(handle, None);

        assert!(ledger.rollback(&CompensationRegistry::new()).await);
    }
}
