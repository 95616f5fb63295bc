//! Compensation ledger replay through the public API

use anyhow::{bail, Result};
use async_trait::async_trait;
use finloop_core::models::workflow::CompensationAction;
use finloop_core::workflow::compensation::{
    payload, CompensationHandler, CompensationLedger, CompensationRegistry,
};
use serde_json::json;
use std::sync::{Arc, Mutex};

#[derive(Default)]
struct UndoLog {
    entries: Mutex<Vec<String>>,
}

impl UndoLog {
    fn entries(&self) -> Vec<String> {
        self.entries.lock().unwrap().clone()
    }
}

struct Undo {
    log: Arc<UndoLog>,
    fail: bool,
}

#[async_trait]
impl CompensationHandler for Undo {
    async fn compensate(&self, action: &CompensationAction) -> Result<()> {
        let name = action.payload["name"].as_str().unwrap_or_default().to_string();
        self.log.entries.lock().unwrap().push(name.clone());
        if self.fail {
            bail!("undo of {} refused", name);
        }
        Ok(())
    }
}

fn registry(log: &Arc<UndoLog>, failing: &[&str]) -> CompensationRegistry {
    let mut registry = CompensationRegistry::new();
    for action_type in ["reserve", "charge", "notify"] {
        registry.register(
            action_type,
            Arc::new(Undo {
                log: log.clone(),
                fail: failing.contains(&action_type),
            }),
        );
    }
    registry
}

#[tokio::test]
async fn test_only_completed_actions_are_undone() {
    let log = Arc::new(UndoLog::default());
    let mut ledger = CompensationLedger::new();

    let a = ledger.register("reserve", payload([("name", "A")]));
    let _b = ledger.register("charge", payload([("name", "B")]));
    ledger.mark_completed(a, Some(json!({"reservation": 1})));

    assert!(ledger.rollback(&registry(&log, &[])).await);
    assert_eq!(log.entries(), vec!["A"]);
    assert!(ledger.is_empty());
}

#[tokio::test]
async fn test_rollback_is_reverse_and_survives_failures() {
    let log = Arc::new(UndoLog::default());
    let mut ledger = CompensationLedger::new();

    for (action_type, name) in [("reserve", "A"), ("charge", "B"), ("notify", "C")] {
        let handle = ledger.register(action_type, payload([("name", name)]));
        ledger.mark_completed(handle, None);
    }

    let all_undone = ledger.rollback(&registry(&log, &["charge"])).await;

    assert!(!all_undone);
    assert_eq!(log.entries(), vec!["C", "B", "A"]);
}

#[tokio::test]
async fn test_unknown_action_types_are_skipped() {
    let log = Arc::new(UndoLog::default());
    let mut ledger = CompensationLedger::new();

    let first = ledger.register("reserve", payload([("name", "A")]));
    ledger.mark_completed(first, None);
    let orphan = ledger.register("email", payload([("name", "E")]));
    ledger.mark_completed(orphan, None);

    assert!(ledger.rollback(&registry(&log, &[])).await);
    assert_eq!(log.entries(), vec!["A"]);
}
