//! # Whisper Studio Server
//!
//! Local speech recognition over HTTP: upload audio, get text back from a
//! Whisper model running in-process, optionally cleaned up by an
//! OpenAI-compatible LLM.
//!
//! ## Application Architecture:
//! - **config**: Application configuration (`config.toml` + environment variables)
//! - **state**: Shared application state and request metrics
//! - **transcription**: Model tiers, downloads, lifecycle and the Whisper engine
//! - **audio**: Upload decoding to 16 kHz mono PCM
//! - **llm**: Saved LLM endpoints and the chat-completion client
//! - **health**: Health and metrics endpoints
//! - **middleware**: Request logging and metrics collection
//! - **handlers**: HTTP request handlers
//! - **error**: Error types and their HTTP responses

mod audio;
mod config;
mod device;
mod error;
mod handlers;
mod health;
mod llm;
mod middleware;
mod state;
mod transcription;

#[cfg(test)]
mod testing;

use actix_cors::Cors;
use actix_web::{middleware::Logger, web, App, HttpServer};
use anyhow::{Context, Result};
use crate::audio::AudioDecoder;
use crate::config::AppConfig;
use crate::device::DevicePreference;
use crate::llm::{LlmClient, LlmConfigRegistry};
use crate::state::AppState;
use crate::transcription::download::{HubFetcher, ModelStore};
use crate::transcription::whisper::WhisperLoader;
use crate::transcription::ModelManager;
use std::sync::Arc;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Startup sequence:
/// 1. Load and validate configuration (a missing `config.toml` is fatal)
/// 2. Open the LLM config registry
/// 3. Build the model manager and start loading the configured tier in the
///    background, so the port is open while weights download
/// 4. Serve until SIGINT/SIGTERM, then stop gracefully
#[actix_web::main]
async fn main() -> Result<()> {
    dotenv::dotenv().ok();

    init_tracing()?;

    let config = AppConfig::load()?;
    config.validate()?;

    info!("Starting whisper-studio-server v{}", env!("CARGO_PKG_VERSION"));
    info!(
        host = %config.server.host,
        port = config.server.port,
        model = %config.model.name,
        cache_dir = %config.model.cache_dir.display(),
        "Configuration loaded"
    );

    let startup_model = config.startup_model()?;
    let device: DevicePreference = config
        .model
        .device
        .parse()
        .map_err(|e: String| anyhow::anyhow!(e))?;

    let llm_configs = LlmConfigRegistry::open(&config.llm.configs_file)
        .with_context(|| format!("Failed to open {}", config.llm.configs_file.display()))?;

    let loader = WhisperLoader::new(
        device,
        config.language_hint(),
        AudioDecoder::new(config.audio.ffmpeg_path.clone()),
    );
    let models = Arc::new(ModelManager::new(
        ModelStore::new(&config.model.cache_dir),
        Arc::new(HubFetcher::from_env(config.model.hub_endpoint.clone())),
        Arc::new(loader),
    ));
    let llm = Arc::new(LlmClient::new(
        config.llm.prompt_file.clone(),
        config.llm.request_timeout(),
        config.llm.test_timeout(),
    ));

    let bind_addr = config.bind_address();
    let auto_download = config.model.auto_download;
    let app_state = AppState::new(config, Arc::clone(&models), Arc::new(llm_configs), llm);

    models.bootstrap(startup_model, auto_download);

    info!("Starting HTTP server on {}", bind_addr);

    let server = HttpServer::new(move || {
        let cors = Cors::default()
            .allow_any_origin()
            .allow_any_method()
            .allow_any_header()
            .max_age(3600);

        App::new()
            .app_data(web::Data::new(app_state.clone()))
            .wrap(cors)
            .wrap(Logger::default())
            .wrap(middleware::MetricsMiddleware)
            .wrap(middleware::RequestLogging)
            .configure(handlers::configure_routes)
    })
    .bind(&bind_addr)
    .with_context(|| format!("Failed to bind {}", bind_addr))?
    .disable_signals()
    .run();

    let server_handle = server.handle();
    let server_task = tokio::spawn(server);

    tokio::select! {
        result = server_task => {
            match result {
                Ok(Err(e)) => error!("Server error: {}", e),
                Err(e) => error!("Server task error: {}", e),
                Ok(Ok(())) => {}
            }
        }
        _ = wait_for_shutdown() => {
            info!("Shutdown signal received, stopping server...");
            server_handle.stop(true).await;
        }
    }

    info!("Server stopped gracefully");
    Ok(())
}

/// `RUST_LOG` overrides the default `whisper_studio_server=debug,actix_web=info`.
fn init_tracing() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "whisper_studio_server=debug,actix_web=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    Ok(())
}

/// Resolves on SIGINT (Ctrl+C) or, on Unix, SIGTERM.
async fn wait_for_shutdown() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                warn!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received SIGINT"),
        _ = terminate => info!("Received SIGTERM"),
    }
}
