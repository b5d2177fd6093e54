use anyhow::Result;
use config::{Config, ConfigError, Environment, File};
use serde::{Deserialize, Serialize};
use std::env;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Settings {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub llm: LLMConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub object_storage: ObjectStorageConfig,
    #[serde(default)]
    pub stream: StreamConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub bind: String,
    pub max_upload_bytes: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: "127.0.0.1:5001".to_string(),
            max_upload_bytes: 16 * 1024 * 1024,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LLMConfig {
    pub base_url: String,
    pub text_model: String,
    pub image_model: String,
    pub text_timeout_secs: u64,
    pub image_timeout_secs: u64,
    pub temperature: f32,
    pub max_retries: u32,
    /// System prompt for text chat unless the user settings override it
    pub system_prompt: String,
    /// Prompt sent alongside an uploaded image when the client gives none
    pub image_prompt: String,
}

impl Default for LLMConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:11434".to_string(),
            text_model: "qwen2.5:7b".to_string(),
            image_model: "llama3.2-vision".to_string(),
            text_timeout_secs: 60,
            image_timeout_secs: 120,
            temperature: 0.7,
            max_retries: 3,
            system_prompt: "You are a Senior Software Engineer.".to_string(),
            image_prompt: "What is this image?".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// SQLite file path, or `:memory:` for the in-process backend
    pub database_path: String,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            database_path: "chatrelay.db".to_string(),
        }
    }
}

impl StorageConfig {
    pub fn is_in_memory(&self) -> bool {
        self.database_path == ":memory:"
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ObjectBackend {
    Filesystem,
    Memory,
}

/// Object storage location. Also the payload of `PUT /object-storage`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObjectStorageConfig {
    #[serde(default = "default_backend")]
    pub backend: ObjectBackend,
    #[serde(default)]
    pub root: Option<String>,
    #[serde(default)]
    pub bucket: String,
}

fn default_backend() -> ObjectBackend {
    ObjectBackend::Filesystem
}

impl Default for ObjectStorageConfig {
    fn default() -> Self {
        Self {
            backend: ObjectBackend::Filesystem,
            root: Some("./object-store".to_string()),
            bucket: "chat-images".to_string(),
        }
    }
}

impl ObjectStorageConfig {
    /// Names of required fields that are missing or blank.
    pub fn missing_fields(&self) -> Vec<&'static str> {
        let mut missing = Vec::new();
        if self.bucket.trim().is_empty() {
            missing.push("bucket");
        }
        if self.backend == ObjectBackend::Filesystem
            && self.root.as_deref().map_or(true, |r| r.trim().is_empty())
        {
            missing.push("root");
        }
        missing
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StreamConfig {
    /// Buffer length that forces a flush regardless of delta shape
    pub max_buffer_chars: usize,
    /// Capacity of the outbound frame channel; 1 keeps producer and client in lockstep
    pub channel_capacity: usize,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            max_buffer_chars: 200,
            channel_capacity: 1,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

impl Settings {
    pub fn new() -> Result<Self, ConfigError> {
        let config_env = env::var("CONFIG_ENV").unwrap_or_else(|_| "default".to_string());

        let config = Config::builder()
            .add_source(File::with_name(&format!("config/{}", config_env)).required(false))
            .add_source(Environment::with_prefix("APP").separator("__"))
            .build()?;

        config.try_deserialize()
    }

    /// Settings suitable for tests and ephemeral runs: everything in memory.
    pub fn in_memory() -> Self {
        Self {
            storage: StorageConfig {
                database_path: ":memory:".to_string(),
            },
            object_storage: ObjectStorageConfig {
                backend: ObjectBackend::Memory,
                root: None,
                bucket: "chat-images".to_string(),
            },
            ..Self::default()
        }
    }
}
