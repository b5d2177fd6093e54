//! In-Memory Document Storage
//!
//! Information Hiding:
//! - HashMap storage structure hidden from users
//! - Thread-safe access via RwLock hidden behind async interface
//! - Suitable for testing and ephemeral runs

use super::{
    clamp_timestamp, sort_by_recency, Collection, Conversation, ConversationStore,
    ConversationSummary, Message, RecordStore, StoreError, DEFAULT_TITLE,
};
use async_trait::async_trait;
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use tokio::sync::RwLock;

/// In-memory conversation storage. Data is lost when the process terminates.
pub struct InMemoryConversationStore {
    conversations: Arc<RwLock<HashMap<String, Conversation>>>,
}

impl InMemoryConversationStore {
    pub fn new() -> Self {
        Self {
            conversations: Arc::new(RwLock::new(HashMap::new())),
        }
    }
}

impl Default for InMemoryConversationStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ConversationStore for InMemoryConversationStore {
    async fn append(
        &self,
        chat_id: &str,
        mut message: Message,
        title: Option<&str>,
    ) -> Result<bool, StoreError> {
        let mut conversations = self.conversations.write().await;

        if let Some(conversation) = conversations.get_mut(chat_id) {
            let previous = conversation.messages.last().map(|m| m.timestamp);
            message.timestamp = clamp_timestamp(previous, message.timestamp);
            conversation.messages.push(message);
            tracing::debug!(
                "[InMemoryStore] Appended message #{} to conversation '{}'",
                conversation.messages.len(),
                chat_id
            );
            return Ok(false);
        }

        let title = title.unwrap_or(DEFAULT_TITLE).to_string();
        tracing::debug!(
            "[InMemoryStore] Created conversation '{}' titled '{}'",
            chat_id,
            title
        );
        conversations.insert(
            chat_id.to_string(),
            Conversation {
                chat_id: chat_id.to_string(),
                title,
                messages: vec![message],
            },
        );
        Ok(true)
    }

    async fn get(&self, chat_id: &str) -> Result<Option<Conversation>, StoreError> {
        let conversations = self.conversations.read().await;
        Ok(conversations.get(chat_id).cloned())
    }

    async fn list(&self) -> Result<Vec<ConversationSummary>, StoreError> {
        let conversations = self.conversations.read().await;
        let mut summaries: Vec<ConversationSummary> = conversations
            .values()
            .map(|c| ConversationSummary {
                chat_id: c.chat_id.clone(),
                title: c.title.clone(),
                last_message_at: c.messages.last().map(|m| m.timestamp),
            })
            .collect();
        sort_by_recency(&mut summaries);
        tracing::debug!("[InMemoryStore] Listed {} conversations", summaries.len());
        Ok(summaries)
    }

    async fn delete(&self, chat_id: &str) -> Result<bool, StoreError> {
        let mut conversations = self.conversations.write().await;
        let removed = conversations.remove(chat_id).is_some();
        tracing::debug!(
            "[InMemoryStore] Delete conversation '{}' (removed: {})",
            chat_id,
            removed
        );
        Ok(removed)
    }

    async fn exists(&self, chat_id: &str) -> Result<bool, StoreError> {
        let conversations = self.conversations.read().await;
        Ok(conversations.contains_key(chat_id))
    }
}

/// In-memory record storage, one ordered map per collection.
pub struct InMemoryRecordStore {
    records: RwLock<HashMap<Collection, BTreeMap<String, Value>>>,
}

impl InMemoryRecordStore {
    pub fn new() -> Self {
        Self {
            records: RwLock::new(HashMap::new()),
        }
    }
}

impl Default for InMemoryRecordStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl RecordStore for InMemoryRecordStore {
    async fn get_record(
        &self,
        collection: Collection,
        key: &str,
    ) -> Result<Option<Value>, StoreError> {
        let records = self.records.read().await;
        Ok(records
            .get(&collection)
            .and_then(|entries| entries.get(key))
            .cloned())
    }

    async fn put_record(
        &self,
        collection: Collection,
        key: &str,
        value: Value,
    ) -> Result<(), StoreError> {
        let mut records = self.records.write().await;
        records
            .entry(collection)
            .or_default()
            .insert(key.to_string(), value);
        Ok(())
    }

    async fn delete_record(&self, collection: Collection, key: &str) -> Result<bool, StoreError> {
        let mut records = self.records.write().await;
        Ok(records
            .get_mut(&collection)
            .map_or(false, |entries| entries.remove(key).is_some()))
    }

    async fn list_records(
        &self,
        collection: Collection,
    ) -> Result<Vec<(String, Value)>, StoreError> {
        let records = self.records.read().await;
        Ok(records
            .get(&collection)
            .map(|entries| {
                entries
                    .iter()
                    .map(|(k, v)| (k.clone(), v.clone()))
                    .collect()
            })
            .unwrap_or_default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::Role;
    use serde_json::json;

    #[tokio::test]
    async fn test_append_creates_then_pushes() {
        let store = InMemoryConversationStore::new();

        let created = store
            .append("chat-1", Message::user("Hello"), Some("Greeting chat"))
            .await
            .unwrap();
        assert!(created);

        let conversation = store.get("chat-1").await.unwrap().unwrap();
        assert_eq!(conversation.title, "Greeting chat");
        assert_eq!(conversation.messages.len(), 1);

        let created = store
            .append("chat-1", Message::assistant("Hi there"), Some("Other title"))
            .await
            .unwrap();
        assert!(!created);

        let conversation = store.get("chat-1").await.unwrap().unwrap();
        assert_eq!(conversation.title, "Greeting chat");
        assert_eq!(conversation.messages.len(), 2);
        assert_eq!(conversation.messages[0].role, Role::User);
        assert_eq!(conversation.messages[1].content, "Hi there");
    }

    #[tokio::test]
    async fn test_append_without_title_uses_default() {
        let store = InMemoryConversationStore::new();
        store.append("chat-2", Message::user("x"), None).await.unwrap();
        let conversation = store.get("chat-2").await.unwrap().unwrap();
        assert_eq!(conversation.title, DEFAULT_TITLE);
    }

    #[tokio::test]
    async fn test_delete_unknown_reports_not_found() {
        let store = InMemoryConversationStore::new();
        assert!(!store.delete("missing").await.unwrap());

        store.append("chat-3", Message::user("x"), None).await.unwrap();
        assert!(store.delete("chat-3").await.unwrap());
        assert!(!store.exists("chat-3").await.unwrap());
    }

    #[tokio::test]
    async fn test_list_orders_by_last_message() {
        let store = InMemoryConversationStore::new();
        store.append("first", Message::user("a"), None).await.unwrap();
        tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        store.append("second", Message::user("b"), None).await.unwrap();
        tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        store.append("first", Message::assistant("c"), None).await.unwrap();

        let listed = store.list().await.unwrap();
        assert_eq!(listed.len(), 2);
        assert_eq!(listed[0].chat_id, "first");
        assert_eq!(listed[1].chat_id, "second");
    }

    #[tokio::test]
    async fn test_records_round_trip() {
        let store = InMemoryRecordStore::new();
        store
            .put_record(Collection::GlobalSettings, "motd", json!("hello"))
            .await
            .unwrap();
        store
            .put_record(Collection::GlobalSettings, "limit", json!(3))
            .await
            .unwrap();

        let listed = store.list_records(Collection::GlobalSettings).await.unwrap();
        assert_eq!(listed[0].0, "limit");
        assert_eq!(listed[1].1, json!("hello"));

        assert!(store
            .delete_record(Collection::GlobalSettings, "motd")
            .await
            .unwrap());
        assert!(!store
            .delete_record(Collection::Profile, "motd")
            .await
            .unwrap());
    }
}
