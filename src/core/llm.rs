use anyhow::Result;
use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use futures::StreamExt;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio::sync::mpsc;

use crate::config::LLMConfig;

/// One prompt for the model: optional system instruction, user text and
/// an optional image attachment (vision models only).
#[derive(Debug, Clone, Default)]
pub struct ModelRequest {
    pub system: Option<String>,
    pub user: String,
    pub image: Option<Vec<u8>>,
}

impl ModelRequest {
    pub fn new(user: impl Into<String>) -> Self {
        Self {
            user: user.into(),
            ..Self::default()
        }
    }

    pub fn with_system(mut self, system: impl Into<String>) -> Self {
        self.system = Some(system.into());
        self
    }

    pub fn with_image(mut self, image: Vec<u8>) -> Self {
        self.image = Some(image);
        self
    }
}

/// Language-model capability used by the chat pipeline.
#[async_trait]
pub trait ModelRuntime: Send + Sync {
    /// One-shot completion.
    async fn complete(&self, request: ModelRequest) -> Result<String>;

    /// Streamed completion; each delta is sent on `tx` as it arrives.
    /// Returns once the model signals the end of the reply.
    async fn stream_complete(&self, request: ModelRequest, tx: mpsc::Sender<String>)
        -> Result<()>;
}

#[derive(Debug, Serialize)]
struct ChatRequest {
    model: String,
    messages: Vec<ChatMessage>,
    stream: bool,
    options: ChatOptions,
}

#[derive(Debug, Serialize)]
struct ChatMessage {
    role: &'static str,
    content: String,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    images: Vec<String>,
}

#[derive(Debug, Serialize)]
struct ChatOptions {
    temperature: f32,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    #[serde(default)]
    message: Option<ResponseMessage>,
    #[serde(default)]
    done: bool,
    #[serde(default)]
    error: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ResponseMessage {
    #[serde(default)]
    content: String,
}

const BASE_DELAY_MS: u64 = 250;
const MAX_DELAY_MS: u64 = 30_000;

/// Client for the Ollama `/api/chat` endpoint.
pub struct OllamaClient {
    client: Client,
    endpoint: String,
    model: String,
    temperature: f32,
    max_retries: u32,
}

impl OllamaClient {
    pub fn new(
        base_url: &str,
        model: impl Into<String>,
        timeout: Duration,
        temperature: f32,
        max_retries: u32,
    ) -> Result<Self> {
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            endpoint: format!("{}/api/chat", base_url.trim_end_matches('/')),
            model: model.into(),
            temperature,
            max_retries: max_retries.max(1),
        })
    }

    /// Client for the text chat model.
    pub fn text(config: &LLMConfig) -> Result<Self> {
        Self::new(
            &config.base_url,
            config.text_model.clone(),
            Duration::from_secs(config.text_timeout_secs),
            config.temperature,
            config.max_retries,
        )
    }

    /// Client for the image-capable model.
    pub fn vision(config: &LLMConfig) -> Result<Self> {
        Self::new(
            &config.base_url,
            config.image_model.clone(),
            Duration::from_secs(config.image_timeout_secs),
            config.temperature,
            config.max_retries,
        )
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    fn build_request(&self, request: ModelRequest, stream: bool) -> ChatRequest {
        let mut messages = Vec::with_capacity(2);
        if let Some(system) = request.system {
            messages.push(ChatMessage {
                role: "system",
                content: system,
                images: Vec::new(),
            });
        }
        messages.push(ChatMessage {
            role: "user",
            content: request.user,
            images: request
                .image
                .map(|bytes| vec![BASE64.encode(bytes)])
                .unwrap_or_default(),
        });

        ChatRequest {
            model: self.model.clone(),
            messages,
            stream,
            options: ChatOptions {
                temperature: self.temperature,
            },
        }
    }
}

/// Parse one NDJSON line; `Ok(None)` for blank lines.
fn parse_line(line: &[u8]) -> Result<Option<ChatResponse>> {
    let line = String::from_utf8_lossy(line);
    let line = line.trim();
    if line.is_empty() {
        return Ok(None);
    }
    let chunk: ChatResponse = serde_json::from_str(line)
        .map_err(|e| anyhow::anyhow!("Malformed stream line '{}': {}", line, e))?;
    if let Some(error) = chunk.error {
        return Err(anyhow::anyhow!("Model error: {}", error));
    }
    Ok(Some(chunk))
}

/// Exponential backoff before retry `attempt` (1-based), capped.
fn retry_delay_ms(attempt: u32) -> u64 {
    2_u64
        .checked_pow(attempt.saturating_sub(1))
        .and_then(|factor| factor.checked_mul(BASE_DELAY_MS))
        .map_or(MAX_DELAY_MS, |delay| delay.min(MAX_DELAY_MS))
}

#[async_trait]
impl ModelRuntime for OllamaClient {
    async fn complete(&self, request: ModelRequest) -> Result<String> {
        let request = self.build_request(request, false);

        let mut last_error = None;

        for attempt in 0..self.max_retries {
            if attempt > 0 {
                let delay = retry_delay_ms(attempt);
                tracing::warn!(
                    "[OllamaClient] Retrying {} (attempt {}/{}) after {}ms delay",
                    self.model,
                    attempt + 1,
                    self.max_retries,
                    delay
                );
                tokio::time::sleep(Duration::from_millis(delay)).await;
            }

            let response = match self.client.post(&self.endpoint).json(&request).send().await {
                Ok(resp) => resp,
                Err(e) => {
                    tracing::warn!("[OllamaClient] HTTP request failed: {}", e);
                    last_error = Some(anyhow::anyhow!("HTTP request failed: {}", e));
                    continue;
                }
            };

            let status = response.status();
            if !status.is_success() {
                let error_text = response
                    .text()
                    .await
                    .unwrap_or_else(|_| "Unknown error".to_string());
                tracing::warn!(
                    "[OllamaClient] API returned error status {}: {}",
                    status,
                    error_text
                );
                last_error = Some(anyhow::anyhow!("API error {}: {}", status, error_text));
                continue;
            }

            let chat_response = match response.json::<ChatResponse>().await {
                Ok(cr) => cr,
                Err(e) => {
                    tracing::warn!("[OllamaClient] Failed to decode response body: {}", e);
                    last_error = Some(anyhow::anyhow!("Response decode error: {}", e));
                    continue;
                }
            };

            if let Some(error) = chat_response.error {
                return Err(anyhow::anyhow!("Model error: {}", error));
            }

            return Ok(chat_response
                .message
                .map(|m| m.content)
                .unwrap_or_default());
        }

        Err(last_error.unwrap_or_else(|| anyhow::anyhow!("All retry attempts failed")))
    }

    async fn stream_complete(
        &self,
        request: ModelRequest,
        tx: mpsc::Sender<String>,
    ) -> Result<()> {
        let request = self.build_request(request, true);

        let response = self.client.post(&self.endpoint).json(&request).send().await?;

        let status = response.status();
        if !status.is_success() {
            let error_text = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".to_string());
            return Err(anyhow::anyhow!("API error {}: {}", status, error_text));
        }

        let mut stream = response.bytes_stream();
        // Lines can be split across network chunks; keep the partial tail.
        let mut pending: Vec<u8> = Vec::new();

        while let Some(chunk) = stream.next().await {
            pending.extend_from_slice(&chunk?);

            while let Some(pos) = pending.iter().position(|b| *b == b'\n') {
                let line: Vec<u8> = pending.drain(..=pos).collect();
                if let Some(chunk) = parse_line(&line)? {
                    if let Some(message) = chunk.message {
                        if !message.content.is_empty() {
                            tx.send(message.content).await?;
                        }
                    }
                    if chunk.done {
                        return Ok(());
                    }
                }
            }
        }

        if let Some(chunk) = parse_line(&pending)? {
            if let Some(message) = chunk.message {
                if !message.content.is_empty() {
                    tx.send(message.content).await?;
                }
            }
        }

        Ok(())
    }
}
