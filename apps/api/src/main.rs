mod chat;
mod config;
mod documents;
mod errors;
mod interview;
mod llm_client;
mod routes;
mod speech;
mod state;

use anyhow::{Context, Result};
use std::net::SocketAddr;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::config::Config;
use crate::llm_client::LlmClient;
use crate::routes::build_router;
use crate::speech::SpeechServices;
use crate::state::AppState;

#[tokio::main]
async fn main() -> Result<()> {
    // Load configuration first (fails on missing required env vars)
    let config = Config::from_env()?;

    // Initialize structured logging
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| {
            EnvFilter::new(format!("{}={}", env!("CARGO_CRATE_NAME"), &config.rust_log))
        }))
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting Career Buddy API v{}", env!("CARGO_PKG_VERSION"));

    // Initialize LLM client
    let llm = LlmClient::from_config(&config).context("Failed to build LLM client")?;
    info!("LLM client initialized (deployment: {})", llm.deployment());

    // Initialize speech backends; missing settings disable features instead of failing
    let http = reqwest::Client::builder()
        .user_agent(concat!("career-buddy-api/", env!("CARGO_PKG_VERSION")))
        .build()
        .context("Failed to build speech HTTP client")?;
    let speech = SpeechServices::from_settings(http, &config.speech);
    let missing = config.speech.missing();
    if !missing.is_empty() {
        warn!(
            "Speech partially configured, missing {}: text-to-speech {}, avatar {}",
            missing.join(", "),
            if speech.tts_available() { "on" } else { "off" },
            if speech.avatar_available() { "on" } else { "off" },
        );
    }
    info!(
        tts = speech.tts_available(),
        avatar = speech.avatar_available(),
        endpoint = %config.speech.endpoint,
        "Speech services initialized"
    );

    // Build app state
    let state = AppState::new(llm, speech);

    // Build router
    let app = build_router(state)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive());

    let addr: SocketAddr = format!("0.0.0.0:{}", config.port).parse()?;
    info!("Listening on {addr}");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
