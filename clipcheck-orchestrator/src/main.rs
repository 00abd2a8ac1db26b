use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use clipcheck_llm::LlmClient;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

pub mod api;
pub mod config;
pub mod repository;
pub mod service;
pub mod tools;

use config::Config;
use service::JobStore;
use tools::transcribe::ApiSegmentTranscriber;
use tools::{ChunkedTranscriber, OpenAiAnalysis, YtDlp};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "clipcheck_orchestrator=info,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = Config::parse();
    config.validate()?;

    tracing::info!("Starting Clipcheck Orchestrator...");

    let api_key = config.api_key();
    if api_key.is_none() {
        tracing::warn!("OPENAI_API_KEY is not set; analyze requests will be rejected");
    }
    let client = LlmClient::new(&config.openai_base_url, api_key);

    let segments = Arc::new(ApiSegmentTranscriber::new(
        client.clone(),
        &config.transcribe_model,
    ));
    let transcriber = ChunkedTranscriber::new(
        segments,
        config.transcribe_chunk_seconds,
        config.transcribe_max_workers,
    );
    let analysis = Arc::new(OpenAiAnalysis::new(
        client.clone(),
        transcriber,
        &config.factcheck_model,
        &config.factcheck_reasoning_effort,
        config.translation_model(),
    ));
    let media = Arc::new(YtDlp::new(config.cookies_file()));

    tracing::info!("Opening job store in {}", config.data_dir.display());
    let store = JobStore::open(&config.data_dir, media, analysis, config.store_settings())
        .context("Failed to open the job store")?;

    // Build router with all API endpoints
    let app = api::create_router(api::AppState {
        store,
        api_key_configured: client.has_api_key(),
    });

    tracing::info!("Listening on {}", config.bind_addr);

    let listener = tokio::net::TcpListener::bind(&config.bind_addr)
        .await
        .with_context(|| format!("Failed to bind to {}", config.bind_addr))?;

    axum::serve(listener, app)
        .await
        .context("Failed to start server")?;

    Ok(())
}
