//! Decision store collaborator and the audit recorder that wraps it

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::{Arc, Mutex};

/// Decision appended to a conversation
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DecisionRecord {
    pub description: String,
    pub reasoning: Value,
    pub confidence: f64,
    pub requires_approval: bool,
}

/// Event appended to the decision store
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum ConversationEvent {
    Started {
        conversation_id: String,
        agent_type: String,
        user_id: String,
        metadata: Value,
        at: DateTime<Utc>,
    },
    Decision {
        conversation_id: String,
        #[serde(flatten)]
        record: DecisionRecord,
        at: DateTime<Utc>,
    },
    Ended {
        conversation_id: String,
        status: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        error: Option<String>,
        at: DateTime<Utc>,
    },
}

impl ConversationEvent {
    pub fn conversation_id(&self) -> &str {
        match self {
            ConversationEvent::Started {
                conversation_id, ..
            }
            | ConversationEvent::Decision {
                conversation_id, ..
            }
            | ConversationEvent::Ended {
                conversation_id, ..
            } => conversation_id,
        }
    }
}

/// Event-sourced conversation/decision history. Appends are keyed by conversation id
/// and durable once they return.
#[async_trait]
pub trait DecisionStore: Send + Sync {
    async fn start_conversation(
        &self,
        conversation_id: &str,
        agent_type: &str,
        user_id: &str,
        metadata: Value,
    ) -> anyhow::Result<()>;

    async fn make_decision(
        &self,
        conversation_id: &str,
        record: DecisionRecord,
    ) -> anyhow::Result<()>;

    async fn end_conversation(
        &self,
        conversation_id: &str,
        status: &str,
        error: Option<&str>,
    ) -> anyhow::Result<()>;
}

/// Decision store kept in process memory
#[derive(Default)]
pub struct InMemoryDecisionStore {
    events: Mutex<Vec<ConversationEvent>>,
}

impl InMemoryDecisionStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Events recorded for one conversation, in append order
    pub fn events_for(&self, conversation_id: &str) -> Vec<ConversationEvent> {
        self.lock()
            .iter()
            .filter(|event| event.conversation_id() == conversation_id)
            .cloned()
            .collect()
    }

    pub fn decisions_for(&self, conversation_id: &str) -> Vec<DecisionRecord> {
        self.events_for(conversation_id)
            .into_iter()
            .filter_map(|event| match event {
                ConversationEvent::Decision { record, .. } => Some(record),
                _ => None,
            })
            .collect()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Vec<ConversationEvent>> {
        // A poisoned lock still holds a consistent append-only log
        self.events.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn append(&self, event: ConversationEvent) {
        self.lock().push(event);
    }
}

#[async_trait]
impl DecisionStore for InMemoryDecisionStore {
    async fn start_conversation(
        &self,
        conversation_id: &str,
        agent_type: &str,
        user_id: &str,
        metadata: Value,
    ) -> anyhow::Result<()> {
        self.append(ConversationEvent::Started {
            conversation_id: conversation_id.to_string(),
            agent_type: agent_type.to_string(),
            user_id: user_id.to_string(),
            metadata,
            at: Utc::now(),
        });
        Ok(())
    }

    async fn make_decision(
        &self,
        conversation_id: &str,
        record: DecisionRecord,
    ) -> anyhow::Result<()> {
        self.append(ConversationEvent::Decision {
            conversation_id: conversation_id.to_string(),
            record,
            at: Utc::now(),
        });
        Ok(())
    }

    async fn end_conversation(
        &self,
        conversation_id: &str,
        status: &str,
        error: Option<&str>,
    ) -> anyhow::Result<()> {
        self.append(ConversationEvent::Ended {
            conversation_id: conversation_id.to_string(),
            status: status.to_string(),
            error: error.map(str::to_string),
            at: Utc::now(),
        });
        Ok(())
    }
}

/// Fire-and-forget front of the decision store. Store errors are logged and never fail
/// the workflow that produced the record.
#[derive(Clone)]
pub struct AuditRecorder {
    store: Arc<dyn DecisionStore>,
}

impl AuditRecorder {
    pub fn new(store: Arc<dyn DecisionStore>) -> Self {
        Self { store }
    }

    pub async fn record_start(
        &self,
        conversation_id: &str,
        agent_type: &str,
        user_id: &str,
        metadata: Value,
    ) {
        if let Err(e) = self
            .store
            .start_conversation(conversation_id, agent_type, user_id, metadata)
            .await
        {
            tracing::error!(
                conversation_id = conversation_id,
                error = %format!("{:#}", e),
                "Failed to record conversation start"
            );
        }
    }

    pub async fn record_decision(&self, conversation_id: &str, record: DecisionRecord) {
        if let Err(e) = self.store.make_decision(conversation_id, record).await {
            tracing::error!(
                conversation_id = conversation_id,
                error = %format!("{:#}", e),
                "Failed to record decision"
            );
        }
    }

    pub async fn record_completion(&self, conversation_id: &str) {
        if let Err(e) = self
            .store
            .end_conversation(conversation_id, "completed", None)
            .await
        {
            tracing::error!(
                conversation_id = conversation_id,
                error = %format!("{:#}", e),
                "Failed to record conversation end"
            );
        }
    }

    pub async fn record_failure(&self, conversation_id: &str, error: &str) {
        if let Err(e) = self
            .store
            .end_conversation(conversation_id, "failed", Some(error))
            .await
        {
            tracing::error!(
                conversation_id = conversation_id,
                error = %format!("{:#}", e),
                "Failed to record workflow failure"
            );
        }
    }
}
