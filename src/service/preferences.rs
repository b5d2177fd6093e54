//! Settings records
//!
//! Typed views over the record collections: profile, user settings,
//! model toggles, object-storage location and free-form global settings.

use super::{ChatService, ServiceError};
use crate::config::ObjectStorageConfig;
use crate::storage::{load_record, save_record, Collection};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Every singleton record lives under this key.
const RECORD_KEY: &str = "default";
/// Key of the object-storage location record in `app_config`.
pub const OBJECT_STORAGE_KEY: &str = "object_storage";

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Profile {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub email: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bio: Option<String>,
}

impl Profile {
    pub fn missing_fields(&self) -> Vec<&'static str> {
        let mut missing = Vec::new();
        if self.name.trim().is_empty() {
            missing.push("name");
        }
        if self.email.trim().is_empty() {
            missing.push("email");
        }
        missing
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct UserSettings {
    pub theme: String,
    pub language: String,
    /// Replaces the configured system prompt for text chats when set.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub system_prompt: Option<String>,
}

impl Default for UserSettings {
    fn default() -> Self {
        Self {
            theme: "light".to_string(),
            language: "en".to_string(),
            system_prompt: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LlmServiceToggles {
    pub text: bool,
    pub image: bool,
}

impl Default for LlmServiceToggles {
    fn default() -> Self {
        Self {
            text: true,
            image: true,
        }
    }
}

impl ChatService {
    /// Stored profile; `None` until one has been saved.
    pub async fn profile(&self) -> Result<Option<Profile>, ServiceError> {
        Ok(load_record(self.records.as_ref(), Collection::Profile, RECORD_KEY).await?)
    }

    pub async fn update_profile(&self, profile: Profile) -> Result<Profile, ServiceError> {
        let missing = profile.missing_fields();
        if !missing.is_empty() {
            return Err(ServiceError::MissingFields(missing));
        }
        save_record(self.records.as_ref(), Collection::Profile, RECORD_KEY, &profile).await?;
        tracing::info!("[Preferences] Profile updated");
        Ok(profile)
    }

    pub async fn user_settings(&self) -> Result<UserSettings, ServiceError> {
        Ok(
            load_record(self.records.as_ref(), Collection::Settings, RECORD_KEY)
                .await?
                .unwrap_or_default(),
        )
    }

    pub async fn update_user_settings(
        &self,
        settings: UserSettings,
    ) -> Result<UserSettings, ServiceError> {
        save_record(self.records.as_ref(), Collection::Settings, RECORD_KEY, &settings).await?;
        tracing::info!(
            "[Preferences] User settings updated (custom prompt: {})",
            settings.system_prompt.is_some()
        );
        Ok(settings)
    }

    pub async fn toggles(&self) -> Result<LlmServiceToggles, ServiceError> {
        Ok(
            load_record(
                self.records.as_ref(),
                Collection::LlmServiceToggles,
                RECORD_KEY,
            )
            .await?
            .unwrap_or_default(),
        )
    }

    pub async fn update_toggles(
        &self,
        toggles: LlmServiceToggles,
    ) -> Result<LlmServiceToggles, ServiceError> {
        save_record(
            self.records.as_ref(),
            Collection::LlmServiceToggles,
            RECORD_KEY,
            &toggles,
        )
        .await?;
        tracing::info!(
            "[Preferences] Model services: text={} image={}",
            toggles.text,
            toggles.image
        );
        Ok(toggles)
    }

    /// Active object-storage location: the persisted record, else the startup config.
    pub async fn object_storage(&self) -> Result<ObjectStorageConfig, ServiceError> {
        let stored: Option<ObjectStorageConfig> =
            load_record(self.records.as_ref(), Collection::AppConfig, OBJECT_STORAGE_KEY).await?;
        Ok(stored.unwrap_or_else(|| self.startup_object_storage.clone()))
    }

    /// Validate, connect, then persist. Nothing is persisted when the new
    /// target cannot be prepared, and the old handle stays active.
    pub async fn update_object_storage(
        &self,
        config: ObjectStorageConfig,
    ) -> Result<ObjectStorageConfig, ServiceError> {
        let missing = config.missing_fields();
        if !missing.is_empty() {
            return Err(ServiceError::MissingFields(missing));
        }

        self.blobs.reconfigure(&config).await.map_err(|e| {
            tracing::error!(
                "[Preferences] Object storage {:?} bucket '{}' unusable: {}",
                config.backend,
                config.bucket,
                e
            );
            e
        })?;
        save_record(
            self.records.as_ref(),
            Collection::AppConfig,
            OBJECT_STORAGE_KEY,
            &config,
        )
        .await?;
        Ok(config)
    }

    pub async fn global_settings(&self) -> Result<Vec<(String, Value)>, ServiceError> {
        Ok(self.records.list_records(Collection::GlobalSettings).await?)
    }

    pub async fn global_setting(&self, key: &str) -> Result<Value, ServiceError> {
        self.records
            .get_record(Collection::GlobalSettings, key)
            .await?
            .ok_or_else(|| ServiceError::NotFound(key.to_string()))
    }

    pub async fn create_global_setting(&self, key: &str, value: Value) -> Result<(), ServiceError> {
        if key.trim().is_empty() {
            return Err(ServiceError::MissingFields(vec!["key"]));
        }
        if self
            .records
            .get_record(Collection::GlobalSettings, key)
            .await?
            .is_some()
        {
            return Err(ServiceError::AlreadyExists(key.to_string()));
        }
        self.records
            .put_record(Collection::GlobalSettings, key, value)
            .await?;
        tracing::info!("[Preferences] Created global setting '{}'", key);
        Ok(())
    }

    pub async fn update_global_setting(&self, key: &str, value: Value) -> Result<(), ServiceError> {
        self.global_setting(key).await?;
        self.records
            .put_record(Collection::GlobalSettings, key, value)
            .await?;
        tracing::info!("[Preferences] Updated global setting '{}'", key);
        Ok(())
    }

    pub async fn delete_global_setting(&self, key: &str) -> Result<(), ServiceError> {
        if !self
            .records
            .delete_record(Collection::GlobalSettings, key)
            .await?
        {
            return Err(ServiceError::NotFound(key.to_string()));
        }
        tracing::info!("[Preferences] Deleted global setting '{}'", key);
        Ok(())
    }
}
