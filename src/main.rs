mod config;
mod extract;
mod gemini;
mod models;
mod pipeline;
mod prompts;
mod routes;

use axum::{extract::DefaultBodyLimit, routing::{get, post}, Router};
use routes::{analysis, convert, create_session, download, get_session, list_options, preview, AppState};
use std::net::SocketAddr;
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tracing_subscriber::{fmt, EnvFilter};

use crate::{config::Config, gemini::GeminiFactory};

pub fn app(state: AppState, max_upload_bytes: usize) -> Router {
    Router::new()
        .route("/api/options", get(list_options))
        .route("/api/sessions", post(create_session))
        .route("/api/sessions/:id", get(get_session))
        .route("/api/sessions/:id/convert", post(convert))
        .route("/api/sessions/:id/preview", get(preview))
        .route("/api/sessions/:id/download", get(download))
        .route("/api/sessions/:id/analysis", get(analysis))
        .layer(DefaultBodyLimit::max(max_upload_bytes))
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any)
        )
        .with_state(state)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = Config::from_env();

    // Init tracing
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    fmt().with_env_filter(filter).init();

    match &config.api_key {
        Some(_) => tracing::info!("Using server-side Gemini API key (model {})", config.gemini.model),
        None => tracing::warn!("GEMINI_API_KEY not set; requests must supply an api_key field"),
    }

    let state = AppState {
        store: Arc::default(),
        models: Arc::new(GeminiFactory::new(config.gemini.clone())),
        api_key: config.api_key.clone(),
    };

    let addr = SocketAddr::from(([0, 0, 0, 0], config.port));
    tracing::info!(%addr, "Starting server");
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app(state, config.max_upload_bytes))
        .with_graceful_shutdown(shutdown_signal())
        .await?;
    Ok(())
}

async fn shutdown_signal() {
    if tokio::signal::ctrl_c().await.is_ok() {
        tracing::info!("Shutting down");
    }
}
