//! Document Storage Abstraction
//!
//! Information Hiding:
//! - Backend details (HashMap, SQLite tables) hidden behind two traits
//! - `ConversationStore` owns conversation documents and their append-only logs
//! - `RecordStore` holds the small JSON records behind the settings endpoints

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

pub mod memory;
pub mod sqlite;

pub use memory::{InMemoryConversationStore, InMemoryRecordStore};
pub use sqlite::SqliteStore;

/// Title given to a conversation created without one.
pub const DEFAULT_TITLE: &str = "Untitled";

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("corrupt document '{id}': {reason}")]
    Corrupt { id: String, reason: String },
    #[error("store lock poisoned")]
    Poisoned,
    #[error("storage task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::User => "user",
            Role::Assistant => "assistant",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Role {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "user" => Ok(Role::User),
            "assistant" => Ok(Role::Assistant),
            other => Err(format!("unknown role '{}'", other)),
        }
    }
}

/// One entry of a conversation log. Never modified after it is stored.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub minio_key: Option<String>,
    pub timestamp: DateTime<Utc>,
}

impl Message {
    pub fn user(content: impl Into<String>) -> Self {
        Self::new(Role::User, content.into(), None)
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self::new(Role::Assistant, content.into(), None)
    }

    /// User message recording an uploaded image stored under `blob_key`.
    pub fn image_upload(filename: &str, blob_key: impl Into<String>) -> Self {
        Self::new(
            Role::User,
            format!("Uploaded image: {}", filename),
            Some(blob_key.into()),
        )
    }

    fn new(role: Role, content: String, minio_key: Option<String>) -> Self {
        Self {
            role,
            content,
            minio_key,
            timestamp: Utc::now(),
        }
    }
}

/// Persisted conversation document: `{ chat_id, title, messages }`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Conversation {
    pub chat_id: String,
    pub title: String,
    pub messages: Vec<Message>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConversationSummary {
    pub chat_id: String,
    pub title: String,
    pub last_message_at: Option<DateTime<Utc>>,
}

/// Append-only conversation log keyed by chat id.
#[async_trait]
pub trait ConversationStore: Send + Sync {
    /// Append `message` to the conversation, creating it with `title`
    /// (or [`DEFAULT_TITLE`]) when it does not exist yet. An existing
    /// conversation keeps its title. Returns `true` when the conversation was created.
    async fn append(
        &self,
        chat_id: &str,
        message: Message,
        title: Option<&str>,
    ) -> Result<bool, StoreError>;

    async fn get(&self, chat_id: &str) -> Result<Option<Conversation>, StoreError>;

    /// Every conversation, most recently active first. Conversations
    /// without messages sort last.
    async fn list(&self) -> Result<Vec<ConversationSummary>, StoreError>;

    /// Remove a whole conversation. Returns `false` if it did not exist.
    async fn delete(&self, chat_id: &str) -> Result<bool, StoreError>;

    async fn exists(&self, chat_id: &str) -> Result<bool, StoreError> {
        Ok(self.get(chat_id).await?.is_some())
    }
}

/// Collections of JSON records kept next to the conversations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Collection {
    Profile,
    Settings,
    GlobalSettings,
    AppConfig,
    LlmServiceToggles,
}

impl Collection {
    pub fn as_str(&self) -> &'static str {
        match self {
            Collection::Profile => "profile",
            Collection::Settings => "settings",
            Collection::GlobalSettings => "global_settings",
            Collection::AppConfig => "app_config",
            Collection::LlmServiceToggles => "llm_service_toggles",
        }
    }
}

/// Key/value JSON records grouped by collection.
#[async_trait]
pub trait RecordStore: Send + Sync {
    async fn get_record(&self, collection: Collection, key: &str)
        -> Result<Option<Value>, StoreError>;

    async fn put_record(
        &self,
        collection: Collection,
        key: &str,
        value: Value,
    ) -> Result<(), StoreError>;

    /// Returns `false` if there was nothing to delete.
    async fn delete_record(&self, collection: Collection, key: &str) -> Result<bool, StoreError>;

    /// All records in the collection ordered by key.
    async fn list_records(&self, collection: Collection) -> Result<Vec<(String, Value)>, StoreError>;
}

/// Read a record and decode it into `T`.
pub async fn load_record<T: DeserializeOwned>(
    store: &dyn RecordStore,
    collection: Collection,
    key: &str,
) -> Result<Option<T>, StoreError> {
    match store.get_record(collection, key).await? {
        Some(value) => Ok(Some(serde_json::from_value(value)?)),
        None => Ok(None),
    }
}

pub async fn save_record<T: Serialize>(
    store: &dyn RecordStore,
    collection: Collection,
    key: &str,
    record: &T,
) -> Result<(), StoreError> {
    let value = serde_json::to_value(record)?;
    store.put_record(collection, key, value).await
}

/// Keep per-conversation timestamps non-decreasing even if the clock steps back.
pub(crate) fn clamp_timestamp(
    previous: Option<DateTime<Utc>>,
    timestamp: DateTime<Utc>,
) -> DateTime<Utc> {
    match previous {
        Some(prev) if prev > timestamp => prev,
        _ => timestamp,
    }
}

pub(crate) fn sort_by_recency(summaries: &mut [ConversationSummary]) {
    summaries.sort_by(|a, b| match (&a.last_message_at, &b.last_message_at) {
        (Some(x), Some(y)) => y.cmp(x).then_with(|| a.chat_id.cmp(&b.chat_id)),
        (Some(_), None) => std::cmp::Ordering::Less,
        (None, Some(_)) => std::cmp::Ordering::Greater,
        (None, None) => a.chat_id.cmp(&b.chat_id),
    });
}
