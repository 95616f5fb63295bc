//! Orchestrated runs persisted to the JSON decision store

use finloop_core::models::configuration::Configuration;
use finloop_core::models::workflow::{WorkflowKind, WorkflowRequest};
use finloop_core::services::business::Collaborators;
use finloop_core::services::decision_store::ConversationEvent;
use finloop_core::workflow::orchestrator::WorkflowOrchestrator;
use finloop_core::workflow::persistence::JsonFileDecisionStore;
use std::sync::Arc;
use tempfile::tempdir;

#[tokio::test]
async fn test_runs_are_appended_to_the_json_store() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("decisions.json");
    let store = Arc::new(JsonFileDecisionStore::new(&path).unwrap());
    let orchestrator = WorkflowOrchestrator::with_builtin(
        Configuration::default(),
        &Collaborators::simulated(),
        store.clone(),
    )
    .unwrap();

    let ok = WorkflowRequest::new(WorkflowKind::HumanReview, "general_operation", "user_demo")
        .with_parameter("confidence", 0.8);
    let failing = WorkflowRequest::new(WorkflowKind::Trading, "buy", "nobody");
    let ok_conversation = ok.conversation_id.clone();
    let failing_conversation = failing.conversation_id.clone();

    assert!(orchestrator.run(ok).await.unwrap().envelope.success);
    assert!(!orchestrator.run(failing).await.unwrap().envelope.success);

    let reopened = JsonFileDecisionStore::new(&path).unwrap();
    assert_eq!(reopened.events_for(&ok_conversation).len(), 3);

    let failed = reopened.events_for(&failing_conversation);
    assert_eq!(failed.len(), 2);
    assert!(matches!(
        &failed[1],
        ConversationEvent::Ended { status, error: Some(error), .. }
            if status == "failed" && error.contains("User not found: nobody")
    ));
    assert!(reopened.open_conversations().is_empty());
}

#[test]
fn test_store_path_is_read_from_configuration() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("finloop").join("config.toml");

    let config = Configuration {
        audit_store_path: Some(dir.path().join("decisions.json")),
        ..Configuration::default()
    };
    config.save_to_file(&path).unwrap();

    let loaded = Configuration::load_from_file(&path).unwrap();
    assert_eq!(loaded.audit_store_path, config.audit_store_path);
    let store = JsonFileDecisionStore::new(loaded.audit_store_path.unwrap()).unwrap();
    assert!(store.open_conversations().is_empty());
}
