//! HTTP Surface
//!
//! Information Hiding:
//! - Route table and middleware stack
//! - Shared state is one `Arc<ChatService>`; handlers never touch stores directly

pub mod error;
pub mod handlers;

pub use error::ApiError;

use crate::config::ServerConfig;
use crate::service::ChatService;
use anyhow::{Context, Result};
use axum::extract::DefaultBodyLimit;
use axum::routing::{get, post};
use axum::Router;
use std::sync::Arc;
use tower_http::trace::TraceLayer;

pub type AppState = Arc<ChatService>;

pub fn router(service: AppState, max_upload_bytes: usize) -> Router {
    Router::new()
        .route("/health", get(handlers::health))
        .route("/chat", post(handlers::chat))
        .route("/image", post(handlers::image))
        .route("/history", get(handlers::history))
        .route("/history/{chat_id}", axum::routing::delete(handlers::delete_history))
        .route(
            "/profile",
            get(handlers::get_profile).put(handlers::put_profile),
        )
        .route(
            "/settings",
            get(handlers::get_settings).put(handlers::put_settings),
        )
        .route(
            "/llm-services",
            get(handlers::get_llm_services).put(handlers::put_llm_services),
        )
        .route(
            "/object-storage",
            get(handlers::get_object_storage).put(handlers::put_object_storage),
        )
        .route(
            "/admin/global_settings",
            get(handlers::list_global_settings).post(handlers::create_global_setting),
        )
        .route(
            "/admin/global_settings/{key}",
            get(handlers::get_global_setting)
                .put(handlers::put_global_setting)
                .delete(handlers::delete_global_setting),
        )
        .layer(DefaultBodyLimit::max(max_upload_bytes))
        .layer(TraceLayer::new_for_http())
        .with_state(service)
}

/// Bind and serve until Ctrl-C.
pub async fn serve(service: AppState, config: &ServerConfig) -> Result<()> {
    let listener = tokio::net::TcpListener::bind(&config.bind)
        .await
        .with_context(|| format!("failed to bind {}", config.bind))?;
    tracing::info!("[Server] Listening on {}", config.bind);

    axum::serve(listener, router(service, config.max_upload_bytes))
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("server terminated")?;

    tracing::info!("[Server] Shut down");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::warn!("[Server] Could not listen for Ctrl-C: {}", e);
        std::future::pending::<()>().await;
    }
}
