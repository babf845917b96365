//! # Live Translate Backend - Main Application Entry Point
//!
//! Actix-web server that streams microphone audio from WebSocket clients to a
//! speech recognizer and sends back live transcripts and translations.
//!
//! ## Key Rust Concepts Used:
//! - **async/await**: The entire application is asynchronous
//! - **trait objects**: Engines are `Arc<dyn SpeechEngine>` / `Arc<dyn Translator>`
//! - **Result<T, E>**: Startup errors propagate to `main` with `?`
//!
//! ## Application Architecture:
//! - **config**: Application configuration (config.toml + environment variables)
//! - **state**: Shared application state and metrics
//! - **language**: Language code conversions between engines
//! - **audio**: PCM format and the push stream feeding the recognizer
//! - **recognition**: Speech engine abstraction and the Azure Speech client
//! - **translation**: Translator abstraction and the Azure Translator client
//! - **session**: Per-connection sessions, event routing and the registry
//! - **websocket**: The live WebSocket transport
//! - **health / handlers / middleware**: Operational HTTP surface
//! - **error**: Error types and HTTP error responses

mod audio;
mod config;
mod error;
mod handlers;
mod health;
mod language;
mod middleware;
mod recognition;
mod session;
mod state;
mod translation;
mod websocket;

use actix_cors::Cors;
use actix_web::{web, App, HttpServer};
use anyhow::Result;
use config::AppConfig;
use recognition::{AzureSpeechEngine, SpeechEngine};
use session::SessionRegistry;
use state::AppState;
use std::sync::Arc;
use tracing::{error, info, warn};
use tracing_actix_web::TracingLogger;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use translation::{AzureTranslator, Translator};

/// The main application entry point.
///
/// ## What this function does:
/// 1. **Loads configuration** from files and environment variables
/// 2. **Sets up logging**
/// 3. **Builds the engines** and the session registry shared by all connections
/// 4. **Configures the HTTP server** with middleware and routes
/// 5. **Handles graceful shutdown** on SIGINT/SIGTERM
#[actix_web::main]
async fn main() -> Result<()> {
    // It's fine if there's no .env file
    dotenv::dotenv().ok();

    init_tracing()?;

    let config = AppConfig::load()?;
    config.validate()?;

    info!("Starting live-translate-backend v{}", env!("CARGO_PKG_VERSION"));
    info!("Configuration loaded: {}:{}", config.server.host, config.server.port);

    let speech_engine: Arc<dyn SpeechEngine> = Arc::new(AzureSpeechEngine::new(&config.speech));
    let translator: Arc<dyn Translator> = Arc::new(AzureTranslator::new(&config.translator)?);

    if !speech_engine.is_configured() {
        warn!("Speech key/region not set; start_stream will answer missing_speech_env");
    }
    if !translator.is_configured() {
        warn!("Translator endpoint/key not set; finals will not be translated");
    }

    let app_state = AppState::new(config.clone());
    let registry = web::Data::new(SessionRegistry::new(speech_engine, translator, app_state.clone()));
    let bind_addr = format!("{}:{}", config.server.host, config.server.port);

    info!("Starting HTTP server on {}", bind_addr);

    let server = HttpServer::new(move || {
        let cors = Cors::default()
            .allow_any_origin()
            .allow_any_method()
            .allow_any_header()
            .max_age(3600);

        App::new()
            .app_data(web::Data::new(app_state.clone()))
            .app_data(registry.clone())
            // Middleware executes in reverse order for responses
            .wrap(cors)
            .wrap(TracingLogger::default())
            .wrap(middleware::MetricsMiddleware)
            .route("/ws/live", web::get().to(websocket::live_websocket))
            .route("/azure-live", web::get().to(websocket::live_websocket))
            .service(
                web::scope("/api/v1")
                    .route("/health", web::get().to(health::health_check))
                    .route("/metrics", web::get().to(health::detailed_metrics))
                    .route("/config", web::get().to(handlers::get_config))
                    .route("/config", web::put().to(handlers::update_config)),
            )
            .route("/health", web::get().to(health::health_check))
    })
    // Signals are handled below so shutdown goes through server_handle
    .disable_signals()
    .bind(&bind_addr)?
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
        result = wait_for_shutdown() => {
            result?;
            info!("Shutdown signal received, stopping server...");
            server_handle.stop(true).await;
        }
    }

    info!("Server stopped gracefully");
    Ok(())
}

/// Initialize the tracing (logging) system.
///
/// ## Environment Variables:
/// - `RUST_LOG`: Controls what gets logged (e.g. "debug", "live_translate_backend=trace")
/// - If not set, defaults to "live_translate_backend=debug,actix_web=info"
fn init_tracing() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "live_translate_backend=debug,actix_web=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .try_init()?;

    Ok(())
}

/// Resolves on the first SIGTERM or SIGINT.
///
/// Errors only if the signal handlers cannot be installed.
async fn wait_for_shutdown() -> Result<()> {
    use tokio::signal::unix::{signal, SignalKind};

    let mut sigterm = signal(SignalKind::terminate())?;
    let mut sigint = signal(SignalKind::interrupt())?;

    tokio::select! {
        _ = sigterm.recv() => info!("Received SIGTERM"),
        _ = sigint.recv() => info!("Received SIGINT"),
    }

    Ok(())
}
