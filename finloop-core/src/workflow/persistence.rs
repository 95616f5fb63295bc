//! Decision store persisted as a JSON document

use crate::services::decision_store::{ConversationEvent, DecisionRecord, DecisionStore};
use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::Utc;
use fs2::FileExt;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeSet;
use std::fs::{File, OpenOptions};
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

/// Root JSON document
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct JsonStore {
    /// Conversation events in append order
    pub events: Vec<ConversationEvent>,
}

/// Decision store writing the whole event log to one file after every append
pub struct JsonFileDecisionStore {
    /// Path to JSON store file
    store_path: PathBuf,
    /// In-memory copy of the document
    store: Mutex<JsonStore>,
}

impl JsonFileDecisionStore {
    /// Open the store, loading existing events if the file is present
    pub fn new<P: AsRef<Path>>(store_path: P) -> Result<Self> {
        let store_path = store_path.as_ref().to_path_buf();

        if let Some(parent) = store_path.parent() {
            std::fs::create_dir_all(parent).context("Failed to create decision store directory")?;
        }

        let store = if store_path.exists() {
            Self::load_store(&store_path)?
        } else {
            JsonStore::default()
        };

        Ok(Self {
            store_path,
            store: Mutex::new(store),
        })
    }

    pub fn path(&self) -> &Path {
        &self.store_path
    }

    /// Load JSON store from file under a shared lock
    fn load_store(path: &Path) -> Result<JsonStore> {
        let file = File::open(path).context("Failed to open decision store file")?;

        file.lock_shared()
            .context("Failed to acquire read lock on decision store")?;

        let mut contents = String::new();
        let mut reader = std::io::BufReader::new(file);
        reader
            .read_to_string(&mut contents)
            .context("Failed to read decision store")?;

        // Lock released with the file
        drop(reader);

        if contents.trim().is_empty() {
            return Ok(JsonStore::default());
        }

        serde_json::from_str(&contents).context("Failed to parse decision store JSON")
    }

    fn lock(&self) -> MutexGuard<'_, JsonStore> {
        self.store.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Write the document under an exclusive lock
    fn save_store(&self, store: &JsonStore) -> Result<()> {
        let file = OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .open(&self.store_path)
            .context("Failed to open decision store file for writing")?;

        file.lock_exclusive()
            .context("Failed to acquire write lock on decision store")?;

        let json =
            serde_json::to_string_pretty(store).context("Failed to serialize decision store")?;

        let mut writer = std::io::BufWriter::new(file);
        writer
            .write_all(json.as_bytes())
            .context("Failed to write decision store")?;
        writer
            .flush()
            .context("Failed to flush decision store to disk")?;

        Ok(())
    }

    fn append(&self, event: ConversationEvent) -> Result<()> {
        let mut store = self.lock();
        store.events.push(event);
        self.save_store(&store)
    }

    /// Events recorded for one conversation, in append order
    pub fn events_for(&self, conversation_id: &str) -> Vec<ConversationEvent> {
        self.lock()
            .events
            .iter()
            .filter(|event| event.conversation_id() == conversation_id)
            .cloned()
            .collect()
    }

    /// Conversations started but never ended. A process that stopped while an instance
    /// awaited review leaves its conversation here.
    pub fn open_conversations(&self) -> Vec<String> {
        let store = self.lock();
        let mut open = BTreeSet::new();

        for event in &store.events {
            match event {
                ConversationEvent::Started {
                    conversation_id, ..
                } => {
                    open.insert(conversation_id.clone());
                }
                ConversationEvent::Ended {
                    conversation_id, ..
                } => {
                    open.remove(conversation_id);
                }
                ConversationEvent::Decision { .. } => {}
            }
        }

        open.into_iter().collect()
    }
}

#[async_trait]
impl DecisionStore for JsonFileDecisionStore {
    async fn start_conversation(
        &self,
        conversation_id: &str,
        agent_type: &str,
        user_id: &str,
        metadata: Value,
    ) -> Result<()> {
        self.append(ConversationEvent::Started {
            conversation_id: conversation_id.to_string(),
            agent_type: agent_type.to_string(),
            user_id: user_id.to_string(),
            metadata,
            at: Utc::now(),
        })
    }

    async fn make_decision(&self, conversation_id: &str, record: DecisionRecord) -> Result<()> {
        self.append(ConversationEvent::Decision {
            conversation_id: conversation_id.to_string(),
            record,
            at: Utc::now(),
        })
    }

    async fn end_conversation(
        &self,
        conversation_id: &str,
        status: &str,
        error: Option<&str>,
    ) -> Result<()> {
        self.append(ConversationEvent::Ended {
            conversation_id: conversation_id.to_string(),
            status: status.to_string(),
            error: error.map(str::to_string),
            at: Utc::now(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::tempdir;

    #[tokio::test]
    async fn test_events_survive_reopen() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("audit").join("decisions.json");

        {
            let store = JsonFileDecisionStore::new(&path).unwrap();
            store
                .start_conversation("conv_1", "trading-agent", "user_demo", json!({}))
                .await
                .unwrap();
            store
                .make_decision(
                    "conv_1",
                    DecisionRecord {
                        description: "Trading execution: buy BTC/USD".to_string(),
                        reasoning: json!({"executed": true}),
                        confidence: 0.85,
                        requires_approval: false,
                    },
                )
                .await
                .unwrap();
            store
                .start_conversation("conv_2", "compliance-agent", "user_demo", json!({}))
                .await
                .unwrap();
            store.end_conversation("conv_1", "completed", None).await.unwrap();
        }

        let reopened = JsonFileDecisionStore::new(&path).unwrap();
        let events = reopened.events_for("conv_1");
        assert_eq!(events.len(), 3);
        assert!(matches!(
            &events[1],
            ConversationEvent::Decision { record, .. } if record.confidence == 0.85
        ));
        assert_eq!(reopened.open_conversations(), vec!["conv_2".to_string()]);
    }

    #[test]
    fn test_empty_file_loads_as_empty_store() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("decisions.json");
        std::fs::write(&path, "").unwrap();

        let store = JsonFileDecisionStore::new(&path).unwrap();
        assert!(store.open_conversations().is_empty());
    }
}
