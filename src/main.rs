mod agent;
mod config;
mod db;
mod errors;
mod models;
mod routes;
mod search;
mod service;

use std::sync::Arc;

use axum::{routing::get, routing::post, Router};
use sqlx::postgres::PgPoolOptions;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::info;

use crate::agent::CompletionClient;
use crate::config::AppConfig;
use crate::db::PgChatStore;
use crate::routes::api_routes::{
    health_handler, list_conversations_handler, list_messages_handler, stream_message_handler,
};
use crate::search::{PromptAugmenter, WebSearchClient};
use crate::service::chat_service::{ChatService, ChatSettings};
use crate::service::observer::TracingObserver;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env if present (development convenience)
    dotenvy::dotenv().ok();

    // Initialise tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "chat_stream=debug,tower_http=debug".into()),
        )
        .init();

    let config = AppConfig::from_env()?;

    // ── Database ──────────────────────────────────────────────────────────────
    let pool = PgPoolOptions::new()
        .max_connections(10)
        .connect(&config.database_url)
        .await?;

    sqlx::migrate!("./migrations").run(&pool).await?;

    info!("Database connection established and migrations applied");

    // ── Dependency wiring ─────────────────────────────────────────────────────
    let store = Arc::new(PgChatStore::new(pool));
    let augmenter = PromptAugmenter::new(WebSearchClient::new(&config.search));
    let completions = Arc::new(CompletionClient::new(&config.completion)?);
    let chat_service = ChatService::new(
        store,
        augmenter,
        completions,
        Arc::new(TracingObserver),
        ChatSettings {
            model: config.completion.model.clone(),
            system_prompt: config.completion.system_prompt.clone(),
            persist_thinking: config.persist_thinking,
        },
    );

    // ── Router ────────────────────────────────────────────────────────────────
    let app = Router::new()
        .route("/health", get(health_handler))
        .route("/api/messages/stream", post(stream_message_handler))
        .route("/api/conversations", get(list_conversations_handler))
        .route("/api/conversations/{id}/messages", get(list_messages_handler))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(chat_service);

    // ── Listen ────────────────────────────────────────────────────────────────
    let addr = format!("0.0.0.0:{}", config.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    info!("Listening on http://{addr}/ (model {})", config.completion.model);

    axum::serve(listener, app).await?;
    Ok(())
}
