use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs::{File, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, RwLock};
use tracing::{debug, warn};
use uuid::Uuid;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("storage io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("storage serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// A message to be written. Id and timestamp are assigned by the store.
#[derive(Debug, Clone)]
pub struct NewMessage {
    pub project_id: String,
    pub user_id: Option<String>,
    pub role: String,
    pub content: String,
    pub model: Option<String>,
}

impl NewMessage {
    pub fn new(
        project_id: impl Into<String>,
        role: impl Into<String>,
        content: impl Into<String>,
    ) -> Self {
        Self {
            project_id: project_id.into(),
            user_id: None,
            role: role.into(),
            content: content.into(),
            model: None,
        }
    }

    pub fn with_user(mut self, user_id: Option<String>) -> Self {
        self.user_id = user_id;
        self
    }

    pub fn with_model(mut self, model: Option<String>) -> Self {
        self.model = model;
        self
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StoredMessage {
    pub id: Uuid,
    pub project_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
    pub role: String,
    pub content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl StoredMessage {
    fn from_new(message: NewMessage) -> Self {
        Self {
            id: Uuid::new_v4(),
            project_id: message.project_id,
            user_id: message.user_id,
            role: message.role,
            content: message.content,
            model: message.model,
            created_at: Utc::now(),
        }
    }
}

#[async_trait]
pub trait MessageStore: Send + Sync {
    async fn create(&self, message: NewMessage) -> Result<StoredMessage, StoreError>;

    /// Messages for a project in insertion order.
    async fn list_for_project(&self, project_id: &str) -> Result<Vec<StoredMessage>, StoreError>;
}

/// Append-only JSONL store, one message per line.
pub struct JsonlMessageStore {
    path: PathBuf,
    file: Mutex<File>,
}

impl JsonlMessageStore {
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let file = OpenOptions::new().create(true).append(true).open(&path)?;
        debug!(path = %path.display(), "opened message store");
        Ok(Self {
            path,
            file: Mutex::new(file),
        })
    }
}

#[async_trait]
impl MessageStore for JsonlMessageStore {
    async fn create(&self, message: NewMessage) -> Result<StoredMessage, StoreError> {
        let stored = StoredMessage::from_new(message);
        let line = serde_json::to_string(&stored)?;
        {
            let mut file = self.file.lock().unwrap_or_else(|e| e.into_inner());
            writeln!(file, "{}", line)?;
            file.flush()?;
        }
        Ok(stored)
    }

    async fn list_for_project(&self, project_id: &str) -> Result<Vec<StoredMessage>, StoreError> {
        // Hold the lock so a concurrent append cannot tear a line mid-read.
        let _guard = self.file.lock().unwrap_or_else(|e| e.into_inner());
        let file = File::open(&self.path)?;
        let reader = BufReader::new(file);

        let mut messages = Vec::new();
        for line in reader.lines() {
            let line = line?;
            if line.trim().is_empty() {
                continue;
            }
            match serde_json::from_str::<StoredMessage>(&line) {
                Ok(message) => {
                    if message.project_id == project_id {
                        messages.push(message);
                    }
                }
                Err(e) => {
                    warn!(error = %e, "skipping unreadable message line");
                }
            }
        }
        Ok(messages)
    }
}

/// In-memory store, used in tests and when no storage path is configured.
#[derive(Default)]
pub struct MemoryMessageStore {
    messages: RwLock<Vec<StoredMessage>>,
}

impl MemoryMessageStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl MessageStore for MemoryMessageStore {
    async fn create(&self, message: NewMessage) -> Result<StoredMessage, StoreError> {
        let stored = StoredMessage::from_new(message);
        self.messages
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .push(stored.clone());
        Ok(stored)
    }

    async fn list_for_project(&self, project_id: &str) -> Result<Vec<StoredMessage>, StoreError> {
        Ok(self
            .messages
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .iter()
            .filter(|m| m.project_id == project_id)
            .cloned()
            .collect())
    }
}
