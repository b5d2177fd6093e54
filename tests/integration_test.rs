//! End-to-end tests for the HTTP surface
//!
//! The router is driven in-process with scripted models and in-memory stores,
//! so no Ollama instance or database is needed.

use async_trait::async_trait;
use axum::body::Body;
use axum::http::{header, Request, StatusCode};
use axum::Router;
use chatrelay::blob::{BlobError, BlobManager, MemoryObjectStore, ObjectStore};
use chatrelay::core::{ModelRequest, ModelRuntime};
use chatrelay::server::{self, handlers::CHAT_ID_HEADER};
use chatrelay::service::{Backends, ChatService};
use chatrelay::storage::{InMemoryConversationStore, InMemoryRecordStore, Role};
use chatrelay::stream::sse::parse_events;
use chatrelay::Settings;
use serde_json::{json, Value};
use std::sync::Arc;
use tokio::sync::mpsc;
use tower::ServiceExt;

const BUCKET: &str = "chat-images";
const BOUNDARY: &str = "chatrelay-test-boundary";

struct ScriptedModel {
    title: &'static str,
}

#[async_trait]
impl ModelRuntime for ScriptedModel {
    async fn complete(&self, _request: ModelRequest) -> anyhow::Result<String> {
        Ok(self.title.to_string())
    }

    async fn stream_complete(
        &self,
        request: ModelRequest,
        tx: mpsc::Sender<String>,
    ) -> anyhow::Result<()> {
        let reply = if request.image.is_some() {
            vec!["A", " small", " cat."]
        } else {
            vec!["Hello", " there."]
        };
        for delta in reply {
            tx.send(delta.to_string()).await?;
        }
        Ok(())
    }
}

/// Stores and lists normally but cannot delete.
struct UndeletableStore {
    inner: Arc<MemoryObjectStore>,
}

#[async_trait]
impl ObjectStore for UndeletableStore {
    async fn create_bucket(&self, bucket: &str) -> Result<(), BlobError> {
        self.inner.create_bucket(bucket).await
    }

    async fn put_object(&self, bucket: &str, key: &str, bytes: Vec<u8>) -> Result<(), BlobError> {
        self.inner.put_object(bucket, key, bytes).await
    }

    async fn get_object(&self, bucket: &str, key: &str) -> Result<Option<Vec<u8>>, BlobError> {
        self.inner.get_object(bucket, key).await
    }

    async fn list_objects(&self, bucket: &str, prefix: &str) -> Result<Vec<String>, BlobError> {
        self.inner.list_objects(bucket, prefix).await
    }

    async fn delete_objects(&self, _bucket: &str, _keys: &[String]) -> Result<(), BlobError> {
        Err(BlobError::Io(std::io::Error::new(
            std::io::ErrorKind::PermissionDenied,
            "delete refused",
        )))
    }
}

struct TestApp {
    router: Router,
    objects: Arc<MemoryObjectStore>,
}

impl TestApp {
    async fn new(title: &'static str) -> Self {
        let objects = Arc::new(MemoryObjectStore::new());
        Self::with_store(title, objects.clone(), objects).await
    }

    /// `objects` is the backing memory store that `store` reads and writes.
    async fn with_store(
        title: &'static str,
        store: Arc<dyn ObjectStore>,
        objects: Arc<MemoryObjectStore>,
    ) -> Self {
        store.create_bucket(BUCKET).await.unwrap();
        let model = Arc::new(ScriptedModel { title });

        let service = ChatService::new(
            Backends {
                conversations: Arc::new(InMemoryConversationStore::new()),
                records: Arc::new(InMemoryRecordStore::new()),
                blobs: Arc::new(BlobManager::new(store, BUCKET)),
                text_model: model.clone(),
                vision_model: model,
            },
            &Settings::in_memory(),
        );

        Self {
            router: server::router(Arc::new(service), 1024 * 1024),
            objects,
        }
    }

    async fn send(&self, request: Request<Body>) -> (StatusCode, Option<String>, String) {
        let response = self.router.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let chat_id = response
            .headers()
            .get(CHAT_ID_HEADER)
            .map(|v| v.to_str().unwrap().to_string());
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        (status, chat_id, String::from_utf8(bytes.to_vec()).unwrap())
    }

    async fn get_json(&self, uri: &str) -> (StatusCode, Value) {
        let request = Request::get(uri).body(Body::empty()).unwrap();
        let (status, _, body) = self.send(request).await;
        (status, serde_json::from_str(&body).unwrap())
    }

    async fn blob_keys(&self, chat_id: &str) -> Vec<String> {
        self.objects
            .list_objects(BUCKET, &format!("images/{}/", chat_id))
            .await
            .unwrap()
    }
}

fn chat_request(body: &str) -> Request<Body> {
    Request::post("/chat")
        .header(header::CONTENT_TYPE, "application/x-www-form-urlencoded")
        .body(Body::from(body.to_string()))
        .unwrap()
}

fn image_request(chat_id: &str, filename: &str, bytes: &[u8]) -> Request<Body> {
    let mut body = Vec::new();
    body.extend_from_slice(
        format!(
            "--{b}\r\nContent-Disposition: form-data; name=\"chat_id\"\r\n\r\n{id}\r\n\
             --{b}\r\nContent-Disposition: form-data; name=\"file\"; filename=\"{f}\"\r\n\
             Content-Type: application/octet-stream\r\n\r\n",
            b = BOUNDARY,
            id = chat_id,
            f = filename
        )
        .as_bytes(),
    );
    body.extend_from_slice(bytes);
    body.extend_from_slice(format!("\r\n--{}--\r\n", BOUNDARY).as_bytes());

    Request::post("/image")
        .header(
            header::CONTENT_TYPE,
            format!("multipart/form-data; boundary={}", BOUNDARY),
        )
        .body(Body::from(body))
        .unwrap()
}

#[tokio::test]
async fn test_health() {
    let app = TestApp::new("Unused").await;
    let (status, body) = app.get_json("/health").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "ok");
}

#[tokio::test]
async fn test_chat_creates_conversation_and_streams_reply() {
    let app = TestApp::new("Greeting Chat").await;

    let (status, chat_id, body) = app.send(chat_request("message=Hello+there%21")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(parse_events(&body), vec!["Hello there.", "[DONE]"]);
    assert!(body.ends_with("data: [DONE]\n\n"));

    let chat_id = chat_id.expect("new chat id returned in header");
    let (status, conversation) = app.get_json(&format!("/history?chat_id={}", chat_id)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(conversation["title"], "Greeting Chat");

    let messages = conversation["messages"].as_array().unwrap();
    assert_eq!(messages.len(), 2);
    assert_eq!(messages[0]["role"], "user");
    assert_eq!(messages[0]["content"], "Hello there!");
    assert_eq!(messages[1]["role"], "assistant");
    assert_eq!(messages[1]["content"], "Hello there.");
    assert!(messages[0].get("minio_key").is_none());
}

#[tokio::test]
async fn test_history_lists_and_reports_missing() {
    let app = TestApp::new("Greeting Chat").await;
    app.send(chat_request("message=hi&chat_id=listed")).await;

    let (status, list) = app.get_json("/history").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(list[0]["chat_id"], "listed");

    let (status, body) = app.get_json("/history?chat_id=nope").await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert!(body["error"].is_string());
}

#[tokio::test]
async fn test_image_upload_stores_blob_and_reply() {
    let app = TestApp::new("Some image").await;

    let (status, chat_id, body) = app.send(image_request("pics", "cat.png", b"\x89PNG")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(chat_id.as_deref(), Some("pics"));
    assert_eq!(parse_events(&body), vec!["A small cat.", "[DONE]"]);

    assert_eq!(app.blob_keys("pics").await, vec!["images/pics/cat.png"]);

    let (_, conversation) = app.get_json("/history?chat_id=pics").await;
    assert_eq!(conversation["title"], "catpic");
    let messages = conversation["messages"].as_array().unwrap();
    assert_eq!(messages[0]["content"], "Uploaded image: cat.png");
    assert_eq!(messages[0]["minio_key"], "images/pics/cat.png");
    assert_eq!(messages[1]["content"], "A small cat.");
}

#[tokio::test]
async fn test_invalid_upload_is_rejected_without_side_effects() {
    let app = TestApp::new("Unused").await;

    let (status, _, body) = app.send(image_request("txt", "notes.txt", b"plain")).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    let body: Value = serde_json::from_str(&body).unwrap();
    assert_eq!(body["error"], "Invalid file");

    assert!(app.blob_keys("txt").await.is_empty());
    let (status, _) = app.get_json("/history?chat_id=txt").await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_upload_without_file_part() {
    let app = TestApp::new("Unused").await;
    let body = format!(
        "--{b}\r\nContent-Disposition: form-data; name=\"chat_id\"\r\n\r\nx\r\n--{b}--\r\n",
        b = BOUNDARY
    );
    let request = Request::post("/image")
        .header(
            header::CONTENT_TYPE,
            format!("multipart/form-data; boundary={}", BOUNDARY),
        )
        .body(Body::from(body))
        .unwrap();

    let (status, _, body) = app.send(request).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body.contains("No file part"));
}

#[tokio::test]
async fn test_delete_removes_conversation_and_blobs() {
    let app = TestApp::new("Some image").await;
    app.send(image_request("gone", "a.png", b"1")).await;
    app.send(image_request("gone", "b.jpg", b"2")).await;
    app.send(image_request("kept", "c.gif", b"3")).await;
    assert_eq!(app.blob_keys("gone").await.len(), 2);

    let request = Request::delete("/history/gone").body(Body::empty()).unwrap();
    let (status, _, body) = app.send(request).await;
    assert_eq!(status, StatusCode::OK);
    let body: Value = serde_json::from_str(&body).unwrap();
    assert_eq!(body["blobs_removed"], 2);

    assert!(app.blob_keys("gone").await.is_empty());
    assert_eq!(app.blob_keys("kept").await.len(), 1);
    let (status, _) = app.get_json("/history?chat_id=gone").await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let request = Request::delete("/history/gone").body(Body::empty()).unwrap();
    let (status, _, _) = app.send(request).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_failed_blob_cleanup_still_deletes_chat() {
    let objects = Arc::new(MemoryObjectStore::new());
    let store = Arc::new(UndeletableStore {
        inner: objects.clone(),
    });
    let app = TestApp::with_store("Some image", store, objects).await;
    app.send(image_request("stuck", "a.png", b"1")).await;
    assert_eq!(app.blob_keys("stuck").await.len(), 1);

    let request = Request::delete("/history/stuck").body(Body::empty()).unwrap();
    let (status, _, body) = app.send(request).await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    let body: Value = serde_json::from_str(&body).unwrap();
    assert_eq!(body["chat_deleted"], true);
    assert!(body["error"].as_str().unwrap().contains("delete refused"));

    let (status, _) = app.get_json("/history?chat_id=stuck").await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(app.blob_keys("stuck").await, vec!["images/stuck/a.png"]);
}

#[tokio::test]
async fn test_nested_chat_id_cannot_share_a_prefix() {
    let app = TestApp::new("Some image").await;
    app.send(image_request("a", "cat.png", b"1")).await;

    let (status, _, body) = app.send(image_request("a/b", "dog.png", b"2")).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body.contains("Invalid chat id"));
    let (status, _, _) = app.send(chat_request("message=hi&chat_id=a%2Fb")).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    assert_eq!(app.blob_keys("a").await, vec!["images/a/cat.png"]);
    let request = Request::delete("/history/a").body(Body::empty()).unwrap();
    let (status, _, body) = app.send(request).await;
    assert_eq!(status, StatusCode::OK);
    let body: Value = serde_json::from_str(&body).unwrap();
    assert_eq!(body["blobs_removed"], 1);
}

#[tokio::test]
async fn test_concurrent_messages_on_new_chat_are_both_kept() {
    let app = TestApp::new("Race Chat").await;

    let (first, second) = tokio::join!(
        app.send(chat_request("message=first&chat_id=shared")),
        app.send(chat_request("message=second&chat_id=shared")),
    );
    assert_eq!(first.0, StatusCode::OK);
    assert_eq!(second.0, StatusCode::OK);

    let (_, conversation) = app.get_json("/history?chat_id=shared").await;
    let messages = conversation["messages"].as_array().unwrap();
    assert_eq!(messages.len(), 4);

    let user_messages: Vec<&str> = messages
        .iter()
        .filter(|m| m["role"] == Role::User.as_str())
        .map(|m| m["content"].as_str().unwrap())
        .collect();
    assert_eq!(user_messages.len(), 2);
    assert!(user_messages.contains(&"first"));
    assert!(user_messages.contains(&"second"));
}

#[tokio::test]
async fn test_disabled_image_service_answers_503() {
    let app = TestApp::new("Unused").await;
    let request = Request::put("/llm-services")
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(json!({"text": true, "image": false}).to_string()))
        .unwrap();
    let (status, _, _) = app.send(request).await;
    assert_eq!(status, StatusCode::OK);

    let (status, _, _) = app.send(image_request("off", "a.png", b"1")).await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    assert!(app.blob_keys("off").await.is_empty());
}

#[tokio::test]
async fn test_profile_validation_and_global_settings() {
    let app = TestApp::new("Unused").await;

    let request = Request::put("/profile")
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(json!({"name": "Ada"}).to_string()))
        .unwrap();
    let (status, _, body) = app.send(request).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body.contains("email"));

    let request = Request::post("/admin/global_settings")
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(json!({"key": "motd", "value": "hi"}).to_string()))
        .unwrap();
    let (status, _, _) = app.send(request).await;
    assert_eq!(status, StatusCode::CREATED);

    let (status, listed) = app.get_json("/admin/global_settings").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(listed, json!({"motd": "hi"}));

    let request = Request::delete("/admin/global_settings/missing")
        .body(Body::empty())
        .unwrap();
    let (status, _, _) = app.send(request).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}
