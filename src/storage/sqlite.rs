//! SQLite Document Storage
//!
//! Information Hiding:
//! - Table layout and timestamp encoding hidden from users
//! - Blocking rusqlite calls run on the blocking pool behind the async traits
//! - Each append is a single transaction, so concurrent appends to one chat never lose a message

use super::{
    clamp_timestamp, Collection, Conversation, ConversationStore, ConversationSummary, Message,
    RecordStore, Role, StoreError, DEFAULT_TITLE,
};
use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use serde_json::Value;
use std::path::Path;
use std::sync::{Arc, Mutex};

const SCHEMA: &str = "
    PRAGMA foreign_keys = ON;

    CREATE TABLE IF NOT EXISTS conversations (
        chat_id TEXT PRIMARY KEY,
        title TEXT NOT NULL
    );

    CREATE TABLE IF NOT EXISTS messages (
        seq INTEGER PRIMARY KEY AUTOINCREMENT,
        chat_id TEXT NOT NULL REFERENCES conversations(chat_id) ON DELETE CASCADE,
        role TEXT NOT NULL CHECK (role IN ('user', 'assistant')),
        content TEXT NOT NULL,
        minio_key TEXT,
        timestamp TEXT NOT NULL
    );

    CREATE INDEX IF NOT EXISTS idx_messages_chat ON messages(chat_id, seq);

    CREATE TABLE IF NOT EXISTS records (
        collection TEXT NOT NULL,
        key TEXT NOT NULL,
        value TEXT NOT NULL,
        PRIMARY KEY (collection, key)
    );
";

/// SQLite-backed conversation and record storage sharing one connection.
#[derive(Clone)]
pub struct SqliteStore {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteStore {
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let conn = Connection::open(path.as_ref())?;
        conn.execute_batch("PRAGMA journal_mode = WAL;")?;
        tracing::info!("[SqliteStore] Opened database at {:?}", path.as_ref());
        Self::with_connection(conn)
    }

    pub fn open_in_memory() -> Result<Self, StoreError> {
        Self::with_connection(Connection::open_in_memory()?)
    }

    fn with_connection(conn: Connection) -> Result<Self, StoreError> {
        conn.execute_batch(SCHEMA)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    async fn run<T, F>(&self, f: F) -> Result<T, StoreError>
    where
        T: Send + 'static,
        F: FnOnce(&mut Connection) -> Result<T, StoreError> + Send + 'static,
    {
        let conn = Arc::clone(&self.conn);
        tokio::task::spawn_blocking(move || {
            let mut guard = conn.lock().map_err(|_| StoreError::Poisoned)?;
            f(&mut guard)
        })
        .await?
    }
}

fn encode_timestamp(ts: &DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn decode_timestamp(chat_id: &str, raw: &str) -> Result<DateTime<Utc>, StoreError> {
    DateTime::parse_from_rfc3339(raw)
        .map(|ts| ts.with_timezone(&Utc))
        .map_err(|e| StoreError::Corrupt {
            id: chat_id.to_string(),
            reason: format!("bad timestamp '{}': {}", raw, e),
        })
}

#[async_trait]
impl ConversationStore for SqliteStore {
    async fn append(
        &self,
        chat_id: &str,
        message: Message,
        title: Option<&str>,
    ) -> Result<bool, StoreError> {
        let chat_id = chat_id.to_string();
        let title = title.unwrap_or(DEFAULT_TITLE).to_string();

        self.run(move |conn| {
            let tx = conn.transaction()?;

            let created = tx.execute(
                "INSERT OR IGNORE INTO conversations (chat_id, title) VALUES (?1, ?2)",
                params![chat_id, title],
            )? == 1;

            let previous: Option<String> = tx
                .query_row(
                    "SELECT timestamp FROM messages WHERE chat_id = ?1 ORDER BY seq DESC LIMIT 1",
                    params![chat_id],
                    |row| row.get(0),
                )
                .optional()?;
            let previous = previous
                .map(|raw| decode_timestamp(&chat_id, &raw))
                .transpose()?;
            let timestamp = clamp_timestamp(previous, message.timestamp);

            tx.execute(
                "INSERT INTO messages (chat_id, role, content, minio_key, timestamp)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                params![
                    chat_id,
                    message.role.as_str(),
                    message.content,
                    message.minio_key,
                    encode_timestamp(&timestamp)
                ],
            )?;
            tx.commit()?;

            tracing::debug!(
                "[SqliteStore] Appended {} message to '{}' (created: {})",
                message.role,
                chat_id,
                created
            );
            Ok(created)
        })
        .await
    }

    async fn get(&self, chat_id: &str) -> Result<Option<Conversation>, StoreError> {
        let chat_id = chat_id.to_string();

        self.run(move |conn| {
            let title: Option<String> = conn
                .query_row(
                    "SELECT title FROM conversations WHERE chat_id = ?1",
                    params![chat_id],
                    |row| row.get(0),
                )
                .optional()?;
            let Some(title) = title else {
                return Ok(None);
            };

            let mut stmt = conn.prepare(
                "SELECT role, content, minio_key, timestamp FROM messages
                 WHERE chat_id = ?1 ORDER BY seq ASC",
            )?;
            let rows = stmt.query_map(params![chat_id], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, Option<String>>(2)?,
                    row.get::<_, String>(3)?,
                ))
            })?;

            let mut messages = Vec::new();
            for row in rows {
                let (role, content, minio_key, timestamp) = row?;
                let role: Role = role.parse().map_err(|reason| StoreError::Corrupt {
                    id: chat_id.clone(),
                    reason,
                })?;
                messages.push(Message {
                    role,
                    content,
                    minio_key,
                    timestamp: decode_timestamp(&chat_id, &timestamp)?,
                });
            }

            Ok(Some(Conversation {
                chat_id,
                title,
                messages,
            }))
        })
        .await
    }

    async fn list(&self) -> Result<Vec<ConversationSummary>, StoreError> {
        self.run(|conn| {
            let mut stmt = conn.prepare(
                "SELECT c.chat_id, c.title, MAX(m.timestamp) AS last_at
                 FROM conversations c LEFT JOIN messages m ON m.chat_id = c.chat_id
                 GROUP BY c.chat_id, c.title
                 ORDER BY last_at IS NULL, last_at DESC, c.chat_id ASC",
            )?;
            let rows = stmt.query_map([], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, Option<String>>(2)?,
                ))
            })?;

            let mut summaries = Vec::new();
            for row in rows {
                let (chat_id, title, last_at) = row?;
                let last_message_at = last_at
                    .map(|raw| decode_timestamp(&chat_id, &raw))
                    .transpose()?;
                summaries.push(ConversationSummary {
                    chat_id,
                    title,
                    last_message_at,
                });
            }
            tracing::debug!("[SqliteStore] Listed {} conversations", summaries.len());
            Ok(summaries)
        })
        .await
    }

    async fn delete(&self, chat_id: &str) -> Result<bool, StoreError> {
        let chat_id = chat_id.to_string();

        self.run(move |conn| {
            let tx = conn.transaction()?;
            tx.execute("DELETE FROM messages WHERE chat_id = ?1", params![chat_id])?;
            let removed = tx.execute(
                "DELETE FROM conversations WHERE chat_id = ?1",
                params![chat_id],
            )? > 0;
            tx.commit()?;
            tracing::debug!(
                "[SqliteStore] Delete conversation '{}' (removed: {})",
                chat_id,
                removed
            );
            Ok(removed)
        })
        .await
    }

    async fn exists(&self, chat_id: &str) -> Result<bool, StoreError> {
        let chat_id = chat_id.to_string();

        self.run(move |conn| {
            let found = conn
                .query_row(
                    "SELECT 1 FROM conversations WHERE chat_id = ?1",
                    params![chat_id],
                    |_| Ok(()),
                )
                .optional()?;
            Ok(found.is_some())
        })
        .await
    }
}

#[async_trait]
impl RecordStore for SqliteStore {
    async fn get_record(
        &self,
        collection: Collection,
        key: &str,
    ) -> Result<Option<Value>, StoreError> {
        let key = key.to_string();

        self.run(move |conn| {
            let raw: Option<String> = conn
                .query_row(
                    "SELECT value FROM records WHERE collection = ?1 AND key = ?2",
                    params![collection.as_str(), key],
                    |row| row.get(0),
                )
                .optional()?;
            Ok(raw.map(|raw| serde_json::from_str(&raw)).transpose()?)
        })
        .await
    }

    async fn put_record(
        &self,
        collection: Collection,
        key: &str,
        value: Value,
    ) -> Result<(), StoreError> {
        let key = key.to_string();
        let raw = serde_json::to_string(&value)?;

        self.run(move |conn| {
            conn.execute(
                "INSERT INTO records (collection, key, value) VALUES (?1, ?2, ?3)
                 ON CONFLICT(collection, key) DO UPDATE SET value = excluded.value",
                params![collection.as_str(), key, raw],
            )?;
            Ok(())
        })
        .await
    }

    async fn delete_record(&self, collection: Collection, key: &str) -> Result<bool, StoreError> {
        let key = key.to_string();

        self.run(move |conn| {
            let removed = conn.execute(
                "DELETE FROM records WHERE collection = ?1 AND key = ?2",
                params![collection.as_str(), key],
            )?;
            Ok(removed > 0)
        })
        .await
    }

    async fn list_records(
        &self,
        collection: Collection,
    ) -> Result<Vec<(String, Value)>, StoreError> {
        self.run(move |conn| {
            let mut stmt = conn.prepare(
                "SELECT key, value FROM records WHERE collection = ?1 ORDER BY key ASC",
            )?;
            let rows = stmt.query_map(params![collection.as_str()], |row| {
                Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
            })?;

            let mut records: Vec<(String, Value)> = Vec::new();
            for row in rows {
                let (key, raw) = row?;
                records.push((key, serde_json::from_str(&raw)?));
            }
            Ok(records)
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_append_creates_then_pushes() {
        let store = SqliteStore::open_in_memory().unwrap();

        assert!(store
            .append("chat-1", Message::user("Hello"), Some("Hello chat"))
            .await
            .unwrap());
        assert!(!store
            .append("chat-1", Message::assistant("Hi!"), Some("Ignored"))
            .await
            .unwrap());

        let conversation = store.get("chat-1").await.unwrap().unwrap();
        assert_eq!(conversation.title, "Hello chat");
        assert_eq!(conversation.messages.len(), 2);
        assert_eq!(conversation.messages[0].content, "Hello");
        assert_eq!(conversation.messages[1].role, Role::Assistant);
        assert!(conversation.messages[0].timestamp <= conversation.messages[1].timestamp);
    }

    #[tokio::test]
    async fn test_image_message_keeps_blob_key() {
        let store = SqliteStore::open_in_memory().unwrap();
        store
            .append(
                "chat-2",
                Message::image_upload("cat.png", "images/chat-2/cat.png"),
                None,
            )
            .await
            .unwrap();

        let conversation = store.get("chat-2").await.unwrap().unwrap();
        assert_eq!(conversation.title, DEFAULT_TITLE);
        assert_eq!(
            conversation.messages[0].minio_key.as_deref(),
            Some("images/chat-2/cat.png")
        );
    }

    #[tokio::test]
    async fn test_get_and_delete_unknown() {
        let store = SqliteStore::open_in_memory().unwrap();
        assert!(store.get("nope").await.unwrap().is_none());
        assert!(!store.delete("nope").await.unwrap());
        assert!(!store.exists("nope").await.unwrap());
    }

    #[tokio::test]
    async fn test_delete_removes_messages() {
        let store = SqliteStore::open_in_memory().unwrap();
        store.append("gone", Message::user("x"), None).await.unwrap();
        assert!(store.delete("gone").await.unwrap());
        assert!(store.get("gone").await.unwrap().is_none());

        // Recreating the id starts a fresh log.
        store.append("gone", Message::user("y"), None).await.unwrap();
        assert_eq!(store.get("gone").await.unwrap().unwrap().messages.len(), 1);
    }

    #[tokio::test]
    async fn test_list_orders_by_recency() {
        let store = SqliteStore::open_in_memory().unwrap();
        store.append("a", Message::user("1"), None).await.unwrap();
        tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        store.append("b", Message::user("2"), None).await.unwrap();

        let listed = store.list().await.unwrap();
        assert_eq!(listed.len(), 2);
        assert_eq!(listed[0].chat_id, "b");
        assert!(listed[0].last_message_at.is_some());
    }

    #[tokio::test]
    async fn test_concurrent_appends_lose_nothing() {
        let store = SqliteStore::open_in_memory().unwrap();
        let mut handles = Vec::new();
        for i in 0..8 {
            let store = store.clone();
            handles.push(tokio::spawn(async move {
                store
                    .append("shared", Message::user(format!("m{}", i)), None)
                    .await
            }));
        }
        for handle in handles {
            handle.await.unwrap().unwrap();
        }
        let conversation = store.get("shared").await.unwrap().unwrap();
        assert_eq!(conversation.messages.len(), 8);
    }

    #[tokio::test]
    async fn test_records_and_persistence_across_instances() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("chat.db");

        {
            let store = SqliteStore::open(&path).unwrap();
            store
                .put_record(Collection::Settings, "default", json!({"theme": "dark"}))
                .await
                .unwrap();
            store
                .append("persist", Message::user("kept"), None)
                .await
                .unwrap();
        }

        {
            let store = SqliteStore::open(&path).unwrap();
            let value = store
                .get_record(Collection::Settings, "default")
                .await
                .unwrap()
                .unwrap();
            assert_eq!(value["theme"], "dark");
            assert_eq!(
                store.get("persist").await.unwrap().unwrap().messages[0].content,
                "kept"
            );
            assert!(store
                .delete_record(Collection::Settings, "default")
                .await
                .unwrap());
            assert!(store
                .list_records(Collection::Settings)
                .await
                .unwrap()
                .is_empty());
        }
    }
}
