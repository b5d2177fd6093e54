//! Route handlers
//!
//! Information Hiding:
//! - Request decoding (form, JSON, multipart) stays here
//! - Everything past decoding is delegated to `ChatService`

use super::error::ApiError;
use super::AppState;
use crate::config::ObjectStorageConfig;
use crate::service::{
    DeleteOutcome, ImageUpload, LlmServiceToggles, Profile, ReplyStream, ServiceError,
    UserSettings,
};
use axum::body::{Body, Bytes};
use axum::extract::{Multipart, Path, Query, State};
use axum::http::{header, HeaderMap, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use futures::StreamExt;
use serde::Deserialize;
use serde_json::{json, Map, Value};
use std::convert::Infallible;
use tokio_stream::wrappers::ReceiverStream;

pub const CHAT_ID_HEADER: &str = "x-chat-id";

#[derive(Debug, Default, Deserialize)]
pub struct ChatForm {
    #[serde(default)]
    pub message: String,
    #[serde(default)]
    pub chat_id: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct HistoryQuery {
    pub chat_id: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct NewGlobalSetting {
    pub key: String,
    #[serde(default)]
    pub value: Value,
}

pub async fn health() -> Json<Value> {
    Json(json!({ "status": "ok" }))
}

pub async fn chat(
    State(service): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Response, ApiError> {
    let form = decode_chat_form(&headers, &body);
    let reply = service.send_text(form.chat_id, form.message).await?;
    Ok(event_stream(reply))
}

/// JSON when the client says so, form-encoded otherwise. Anything that
/// fails to decode is treated as an empty message.
fn decode_chat_form(headers: &HeaderMap, body: &[u8]) -> ChatForm {
    let is_json = headers
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .map_or(false, |v| v.starts_with("application/json"));

    let decoded = if is_json {
        serde_json::from_slice::<ChatForm>(body).map_err(|e| e.to_string())
    } else {
        serde_urlencoded::from_bytes::<ChatForm>(body).map_err(|e| e.to_string())
    };

    decoded.unwrap_or_else(|e| {
        tracing::warn!(
            "[Server] Undecodable /chat body ({} bytes, json: {}): {}",
            body.len(),
            is_json,
            e
        );
        ChatForm::default()
    })
}

pub async fn image(
    State(service): State<AppState>,
    mut multipart: Multipart,
) -> Result<Response, ApiError> {
    let mut file: Option<(String, Vec<u8>)> = None;
    let mut chat_id = None;
    let mut prompt = None;

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| ApiError::BadRequest(e.body_text()))?
    {
        let name = field.name().unwrap_or_default().to_string();
        match name.as_str() {
            "file" => {
                let filename = field.file_name().unwrap_or_default().to_string();
                let bytes = field
                    .bytes()
                    .await
                    .map_err(|e| ApiError::BadRequest(e.body_text()))?;
                file = Some((filename, bytes.to_vec()));
            }
            "chat_id" => {
                chat_id = Some(
                    field
                        .text()
                        .await
                        .map_err(|e| ApiError::BadRequest(e.body_text()))?,
                );
            }
            "message" => {
                prompt = Some(
                    field
                        .text()
                        .await
                        .map_err(|e| ApiError::BadRequest(e.body_text()))?,
                );
            }
            _ => {}
        }
    }

    let (filename, bytes) = file.ok_or(ServiceError::MissingFile)?;
    if filename.trim().is_empty() {
        return Err(ServiceError::InvalidFile.into());
    }

    let reply = service
        .send_image(
            chat_id,
            ImageUpload {
                filename,
                bytes,
                prompt,
            },
        )
        .await?;
    Ok(event_stream(reply))
}

fn event_stream(reply: ReplyStream) -> Response {
    let chat_id = HeaderValue::from_str(&reply.chat_id).ok();
    let frames = ReceiverStream::new(reply.frames)
        .map(|frame| Ok::<_, Infallible>(frame.into_bytes()));

    let mut response = Response::new(Body::from_stream(frames));
    let headers = response.headers_mut();
    headers.insert(
        header::CONTENT_TYPE,
        HeaderValue::from_static("text/event-stream"),
    );
    headers.insert(header::CACHE_CONTROL, HeaderValue::from_static("no-cache"));
    if let Some(chat_id) = chat_id {
        headers.insert(CHAT_ID_HEADER, chat_id);
    }
    response
}

pub async fn history(
    State(service): State<AppState>,
    Query(query): Query<HistoryQuery>,
) -> Result<Response, ApiError> {
    match query.chat_id.filter(|id| !id.is_empty()) {
        Some(chat_id) => Ok(Json(service.conversation(&chat_id).await?).into_response()),
        None => Ok(Json(service.conversations().await?).into_response()),
    }
}

pub async fn delete_history(
    State(service): State<AppState>,
    Path(chat_id): Path<String>,
) -> Result<Json<Value>, ApiError> {
    match service.delete_conversation(&chat_id).await? {
        DeleteOutcome::Deleted { blobs_removed } => Ok(Json(json!({
            "message": format!("Chat {} deleted", chat_id),
            "blobs_removed": blobs_removed,
        }))),
        DeleteOutcome::NotFound => Err(ApiError::NotFound(format!("Chat {} not found", chat_id))),
        DeleteOutcome::BlobCleanupFailed(e) => Err(ApiError::OrphanedBlobs(format!(
            "Chat {} deleted but its images could not be removed: {}",
            chat_id, e
        ))),
    }
}

pub async fn get_profile(State(service): State<AppState>) -> Result<Json<Profile>, ApiError> {
    Ok(Json(service.profile().await?.unwrap_or_default()))
}

pub async fn put_profile(
    State(service): State<AppState>,
    Json(profile): Json<Profile>,
) -> Result<Json<Profile>, ApiError> {
    Ok(Json(service.update_profile(profile).await?))
}

pub async fn get_settings(State(service): State<AppState>) -> Result<Json<UserSettings>, ApiError> {
    Ok(Json(service.user_settings().await?))
}

pub async fn put_settings(
    State(service): State<AppState>,
    Json(settings): Json<UserSettings>,
) -> Result<Json<UserSettings>, ApiError> {
    Ok(Json(service.update_user_settings(settings).await?))
}

pub async fn get_llm_services(
    State(service): State<AppState>,
) -> Result<Json<LlmServiceToggles>, ApiError> {
    Ok(Json(service.toggles().await?))
}

pub async fn put_llm_services(
    State(service): State<AppState>,
    Json(toggles): Json<LlmServiceToggles>,
) -> Result<Json<LlmServiceToggles>, ApiError> {
    Ok(Json(service.update_toggles(toggles).await?))
}

pub async fn get_object_storage(
    State(service): State<AppState>,
) -> Result<Json<ObjectStorageConfig>, ApiError> {
    Ok(Json(service.object_storage().await?))
}

pub async fn put_object_storage(
    State(service): State<AppState>,
    Json(config): Json<ObjectStorageConfig>,
) -> Result<Json<ObjectStorageConfig>, ApiError> {
    Ok(Json(service.update_object_storage(config).await?))
}

pub async fn list_global_settings(
    State(service): State<AppState>,
) -> Result<Json<Map<String, Value>>, ApiError> {
    let entries = service.global_settings().await?;
    Ok(Json(entries.into_iter().collect()))
}

pub async fn create_global_setting(
    State(service): State<AppState>,
    Json(setting): Json<NewGlobalSetting>,
) -> Result<(StatusCode, Json<Value>), ApiError> {
    service
        .create_global_setting(&setting.key, setting.value.clone())
        .await?;
    Ok((
        StatusCode::CREATED,
        Json(json!({ "key": setting.key, "value": setting.value })),
    ))
}

pub async fn get_global_setting(
    State(service): State<AppState>,
    Path(key): Path<String>,
) -> Result<Json<Value>, ApiError> {
    let value = service.global_setting(&key).await?;
    Ok(Json(json!({ "key": key, "value": value })))
}

pub async fn put_global_setting(
    State(service): State<AppState>,
    Path(key): Path<String>,
    Json(value): Json<Value>,
) -> Result<Json<Value>, ApiError> {
    service.update_global_setting(&key, value.clone()).await?;
    Ok(Json(json!({ "key": key, "value": value })))
}

pub async fn delete_global_setting(
    State(service): State<AppState>,
    Path(key): Path<String>,
) -> Result<Json<Value>, ApiError> {
    service.delete_global_setting(&key).await?;
    Ok(Json(json!({ "message": format!("Setting {} deleted", key) })))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn headers(content_type: &'static str) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(header::CONTENT_TYPE, HeaderValue::from_static(content_type));
        headers
    }

    #[test]
    fn test_decode_form_body() {
        let form = decode_chat_form(
            &headers("application/x-www-form-urlencoded"),
            b"message=Hello+there%21&chat_id=abc",
        );
        assert_eq!(form.message, "Hello there!");
        assert_eq!(form.chat_id.as_deref(), Some("abc"));
    }

    #[test]
    fn test_decode_json_body() {
        let form = decode_chat_form(
            &headers("application/json; charset=utf-8"),
            br#"{"message":"hi"}"#,
        );
        assert_eq!(form.message, "hi");
        assert!(form.chat_id.is_none());
    }

    #[test]
    fn test_malformed_body_becomes_empty_message() {
        let form = decode_chat_form(&headers("application/json"), b"{not json");
        assert_eq!(form.message, "");
        assert!(form.chat_id.is_none());
    }
}
