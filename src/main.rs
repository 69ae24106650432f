//! RealVision Chat Playground API
//!
//! Headless chat playground over the Gemini API: per-panel conversations with
//! an optional staged "thinking" phase whose steps are revealed word by word
//! before the final answer streams in, plus a side-by-side compare mode.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::Router;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod config;
mod conversation;
mod core;
mod providers;
mod routes;

use config::Config;
use crate::core::ChatEngine;
use providers::{GeminiClient, InferenceClient};

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    pub config: Config,
    pub chat_engine: Arc<ChatEngine>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "realvision_playground=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = Config::from_env()?;
    let addr: SocketAddr = format!("{}:{}", config.host, config.port).parse()?;

    let client: Arc<dyn InferenceClient> = Arc::new(GeminiClient::new(
        config.gemini_api_key.clone(),
        config.gemini_base_url.clone(),
    ));
    let chat_engine = Arc::new(ChatEngine::new(client).await?);

    let state = AppState {
        config,
        chat_engine,
    };

    let app = Router::new()
        .merge(routes::router())
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state);

    tracing::info!("Chat Playground API running at http://{}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
