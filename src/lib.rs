//! Chatrelay - streaming chat backend for local language models
//!
//! Relays text and image prompts to an Ollama runtime, streams the reply
//! back as server-sent events in sentence-sized chunks, and keeps the
//! conversation log and uploaded images in sync.

pub mod blob;
pub mod cli;
pub mod config;
pub mod core;
pub mod server;
pub mod service;
pub mod storage;
pub mod stream;
pub mod utils;

pub use config::Settings;
pub use service::ChatService;

use blob::BlobManager;
use config::ObjectStorageConfig;
use crate::core::{ModelRuntime, OllamaClient};
use service::{Backends, OBJECT_STORAGE_KEY};
use std::sync::Arc;
use storage::{
    load_record, Collection, ConversationStore, InMemoryConversationStore, InMemoryRecordStore,
    RecordStore, SqliteStore,
};

/// Wire up stores, object storage and model clients from configuration.
pub async fn build_service(settings: &Settings) -> anyhow::Result<ChatService> {
    let (conversations, records) = open_stores(settings)?;
    let blobs = connect_blobs(settings, records.as_ref()).await?;

    let text_client = OllamaClient::text(&settings.llm)?;
    let vision_client = OllamaClient::vision(&settings.llm)?;
    tracing::info!(
        "Chatrelay initialized (text model: {}, image model: {})",
        text_client.model(),
        vision_client.model()
    );

    let text_model: Arc<dyn ModelRuntime> = Arc::new(text_client);
    let vision_model: Arc<dyn ModelRuntime> = Arc::new(vision_client);

    Ok(ChatService::new(
        Backends {
            conversations,
            records,
            blobs: Arc::new(blobs),
            text_model,
            vision_model,
        },
        settings,
    ))
}

fn open_stores(
    settings: &Settings,
) -> anyhow::Result<(Arc<dyn ConversationStore>, Arc<dyn RecordStore>)> {
    if settings.storage.is_in_memory() {
        tracing::info!("Using in-memory document store");
        return Ok((
            Arc::new(InMemoryConversationStore::new()),
            Arc::new(InMemoryRecordStore::new()),
        ));
    }

    let store = SqliteStore::open(&settings.storage.database_path)?;
    tracing::info!(
        "Using SQLite document store at {}",
        settings.storage.database_path
    );
    Ok((Arc::new(store.clone()), Arc::new(store)))
}

/// A location saved through `PUT /object-storage` wins over the config file.
async fn connect_blobs(settings: &Settings, records: &dyn RecordStore) -> anyhow::Result<BlobManager> {
    let stored: Option<ObjectStorageConfig> =
        load_record(records, Collection::AppConfig, OBJECT_STORAGE_KEY).await?;
    let config = stored.unwrap_or_else(|| settings.object_storage.clone());
    Ok(BlobManager::from_config(&config).await?)
}
