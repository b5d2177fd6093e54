//! Request Orchestrator
//!
//! Information Hiding:
//! - Sequences title generation, conversation writes, blob uploads and the
//!   streamed reply for each request
//! - HTTP handlers and the CLI only see `ChatService` and `ReplyStream`
//!
//! Ordering per request: the user message is stored before the model is
//! called; the assistant message is stored after the stream ends.

pub mod preferences;
pub mod relay;
pub mod upload;

pub use preferences::{LlmServiceToggles, Profile, UserSettings, OBJECT_STORAGE_KEY};
pub use relay::ReplyStream;

use crate::blob::{BlobError, BlobManager};
use crate::config::{LLMConfig, ObjectStorageConfig, Settings, StreamConfig};
use crate::core::{ModelRequest, ModelRuntime, TitleGenerator};
use crate::storage::{
    Conversation, ConversationStore, ConversationSummary, Message, RecordStore, StoreError,
};
use relay::{spawn_reply, RelayJob};
use std::sync::Arc;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ServiceError {
    #[error("{0} model service is disabled")]
    Disabled(&'static str),
    #[error("No file part")]
    MissingFile,
    #[error("Invalid file")]
    InvalidFile,
    #[error("Invalid chat id '{0}'")]
    InvalidChatId(String),
    #[error("Missing required fields: {}", .0.join(", "))]
    MissingFields(Vec<&'static str>),
    #[error("'{0}' not found")]
    NotFound(String),
    #[error("'{0}' already exists")]
    AlreadyExists(String),
    #[error("storage failure: {0}")]
    Store(#[from] StoreError),
    #[error("object storage failure: {0}")]
    Blob(#[from] BlobError),
}

/// Result of deleting a conversation and its blobs.
#[derive(Debug)]
pub enum DeleteOutcome {
    Deleted { blobs_removed: usize },
    NotFound,
    /// The document is gone but its blobs could not be removed.
    BlobCleanupFailed(BlobError),
}

/// An image received from the client.
#[derive(Debug, Clone)]
pub struct ImageUpload {
    pub filename: String,
    pub bytes: Vec<u8>,
    /// Prompt sent with the image; the configured default when absent.
    pub prompt: Option<String>,
}

/// External systems the service talks to.
pub struct Backends {
    pub conversations: Arc<dyn ConversationStore>,
    pub records: Arc<dyn RecordStore>,
    pub blobs: Arc<BlobManager>,
    pub text_model: Arc<dyn ModelRuntime>,
    pub vision_model: Arc<dyn ModelRuntime>,
}

pub struct ChatService {
    conversations: Arc<dyn ConversationStore>,
    records: Arc<dyn RecordStore>,
    blobs: Arc<BlobManager>,
    text_model: Arc<dyn ModelRuntime>,
    vision_model: Arc<dyn ModelRuntime>,
    titles: TitleGenerator,
    llm: LLMConfig,
    stream: StreamConfig,
    startup_object_storage: ObjectStorageConfig,
}

impl ChatService {
    pub fn new(backends: Backends, settings: &Settings) -> Self {
        Self {
            titles: TitleGenerator::new(Arc::clone(&backends.text_model)),
            conversations: backends.conversations,
            records: backends.records,
            blobs: backends.blobs,
            text_model: backends.text_model,
            vision_model: backends.vision_model,
            llm: settings.llm.clone(),
            stream: settings.stream.clone(),
            startup_object_storage: settings.object_storage.clone(),
        }
    }

    pub fn blobs(&self) -> &BlobManager {
        &self.blobs
    }

    /// Record a text message and stream the model's reply.
    pub async fn send_text(
        &self,
        chat_id: Option<String>,
        message: String,
    ) -> Result<ReplyStream, ServiceError> {
        if !self.toggles().await?.text {
            return Err(ServiceError::Disabled("text"));
        }

        let chat_id = resolve_chat_id(chat_id)?;
        let title = if self.conversations.exists(&chat_id).await? {
            None
        } else {
            Some(self.titles.text_title(&message).await)
        };

        self.conversations
            .append(&chat_id, Message::user(message.clone()), title.as_deref())
            .await
            .map_err(|e| {
                tracing::error!(
                    "[ChatService] Failed to store user message for '{}' ({} chars): {}",
                    chat_id,
                    message.len(),
                    e
                );
                e
            })?;

        let system = self.system_prompt().await;
        tracing::info!("[ChatService] Streaming text reply for '{}'", chat_id);

        Ok(self.reply(
            Arc::clone(&self.text_model),
            chat_id,
            ModelRequest::new(message).with_system(system),
        ))
    }

    /// Store an uploaded image, record it, and stream the vision model's analysis.
    pub async fn send_image(
        &self,
        chat_id: Option<String>,
        upload: ImageUpload,
    ) -> Result<ReplyStream, ServiceError> {
        if !self.toggles().await?.image {
            return Err(ServiceError::Disabled("image"));
        }

        let filename = upload::sanitize_filename(&upload.filename)
            .filter(|name| upload::is_allowed_image(name))
            .ok_or_else(|| {
                tracing::warn!(
                    "[ChatService] Rejected upload with filename {:?}",
                    upload.filename
                );
                ServiceError::InvalidFile
            })?;

        let chat_id = resolve_chat_id(chat_id)?;
        let is_new = !self.conversations.exists(&chat_id).await?;

        let key = self
            .blobs
            .upload(&chat_id, &filename, upload.bytes.clone())
            .await
            .map_err(|e| {
                tracing::error!(
                    "[ChatService] Upload of '{}' for '{}' ({} bytes) failed: {}",
                    filename,
                    chat_id,
                    upload.bytes.len(),
                    e
                );
                e
            })?;

        let title = if is_new {
            Some(self.titles.image_title(&filename).await)
        } else {
            None
        };

        if let Err(e) = self
            .conversations
            .append(
                &chat_id,
                Message::image_upload(&filename, key.clone()),
                title.as_deref(),
            )
            .await
        {
            tracing::error!(
                "[ChatService] Failed to record upload '{}' for '{}': {}",
                key,
                chat_id,
                e
            );
            if let Err(cleanup) = self.blobs.remove(&key).await {
                tracing::warn!(
                    "[ChatService] Could not remove unrecorded blob '{}': {}",
                    key,
                    cleanup
                );
            }
            return Err(e.into());
        }

        let prompt = upload
            .prompt
            .filter(|p| !p.trim().is_empty())
            .unwrap_or_else(|| self.llm.image_prompt.clone());
        tracing::info!(
            "[ChatService] Streaming image analysis of '{}' for '{}'",
            key,
            chat_id
        );

        Ok(self.reply(
            Arc::clone(&self.vision_model),
            chat_id,
            ModelRequest::new(prompt).with_image(upload.bytes),
        ))
    }

    pub async fn conversation(&self, chat_id: &str) -> Result<Conversation, ServiceError> {
        self.conversations
            .get(chat_id)
            .await?
            .ok_or_else(|| ServiceError::NotFound(chat_id.to_string()))
    }

    pub async fn conversations(&self) -> Result<Vec<ConversationSummary>, ServiceError> {
        Ok(self.conversations.list().await?)
    }

    /// Delete the conversation document, then every blob under its prefix.
    pub async fn delete_conversation(&self, chat_id: &str) -> Result<DeleteOutcome, ServiceError> {
        validate_chat_id(chat_id)?;
        if !self.conversations.delete(chat_id).await? {
            return Ok(DeleteOutcome::NotFound);
        }

        match self.blobs.delete_all(chat_id).await {
            Ok(blobs_removed) => {
                tracing::info!(
                    "[ChatService] Deleted conversation '{}' and {} blobs",
                    chat_id,
                    blobs_removed
                );
                Ok(DeleteOutcome::Deleted { blobs_removed })
            }
            Err(e) => {
                tracing::error!(
                    "[ChatService] Conversation '{}' deleted but blob cleanup failed: {}",
                    chat_id,
                    e
                );
                Ok(DeleteOutcome::BlobCleanupFailed(e))
            }
        }
    }

    fn reply(
        &self,
        runtime: Arc<dyn ModelRuntime>,
        chat_id: String,
        request: ModelRequest,
    ) -> ReplyStream {
        spawn_reply(RelayJob {
            runtime,
            conversations: Arc::clone(&self.conversations),
            chat_id,
            request,
            max_buffer_chars: self.stream.max_buffer_chars,
            channel_capacity: self.stream.channel_capacity,
        })
    }

    async fn system_prompt(&self) -> String {
        match self.user_settings().await {
            Ok(settings) => settings
                .system_prompt
                .filter(|p| !p.trim().is_empty())
                .unwrap_or_else(|| self.llm.system_prompt.clone()),
            Err(e) => {
                tracing::warn!("[ChatService] Could not read user settings: {}", e);
                self.llm.system_prompt.clone()
            }
        }
    }
}

fn resolve_chat_id(chat_id: Option<String>) -> Result<String, ServiceError> {
    match chat_id.map(|id| id.trim().to_string()) {
        Some(id) if !id.is_empty() => {
            validate_chat_id(&id)?;
            Ok(id)
        }
        _ => Ok(uuid::Uuid::new_v4().to_string()),
    }
}

/// A chat id names one blob prefix, so it must not nest under another.
fn validate_chat_id(chat_id: &str) -> Result<(), ServiceError> {
    let nested = chat_id.contains(['/', '\\']) || chat_id == "." || chat_id == "..";
    if nested || chat_id.chars().any(char::is_control) {
        tracing::warn!("[ChatService] Rejected chat id {:?}", chat_id);
        return Err(ServiceError::InvalidChatId(chat_id.to_string()));
    }
    Ok(())
}
