//! Voice Agent Server Entry Point

use std::net::SocketAddr;
use std::sync::Arc;

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use voice_agent_config::load_settings;
use voice_agent_pipeline::{HttpSttConfig, HttpSttModel, TranscriptionWorker, WorkerConfig};
use voice_agent_server::{create_router, init_metrics, AppState};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let env = std::env::var("VOICE_AGENT_ENV").ok();
    let settings = match load_settings(env.as_deref()) {
        Ok(settings) => settings,
        Err(err) => {
            // Tracing isn't initialized yet; a config error is fatal
            // startup (§7 "Config error: ... Fatal at session
            // construction"), so this is the only place stderr is used
            // directly.
            eprintln!("failed to load configuration: {err}");
            return Err(Box::new(err));
        }
    };

    init_tracing(&settings);
    let metrics_handle = init_metrics();

    let stt_config = HttpSttConfig {
        url: std::env::var("VOICE_AGENT_STT_URL").unwrap_or_else(|_| HttpSttConfig::default().url),
        timeout_ms: HttpSttConfig::default().timeout_ms,
    };
    let model = Box::new(HttpSttModel::new(stt_config));
    let worker_config = WorkerConfig {
        language: settings.transcription.language.clone(),
        translate_to_english: settings.transcription.translate_to_english,
        temperature: settings.transcription.temperature,
        max_tokens: settings.transcription.max_tokens,
    };
    let worker = Arc::new(TranscriptionWorker::start(model, settings.transcription.queue_capacity, worker_config));

    let bind_address = settings.bind_address.clone();
    let port = settings.port;

    let state = AppState::new(settings, worker, metrics_handle);
    state.spawn_expiry_sweep();

    let app = create_router(state);

    let addr: SocketAddr = format!("{bind_address}:{port}").parse()?;
    tracing::info!(%addr, "starting voice-agent-server");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).with_graceful_shutdown(shutdown_signal()).await?;

    Ok(())
}

/// Plain `tracing-subscriber` setup (§10.1): env-filter driven level
/// control, JSON formatting in production/staging, compact human
/// output otherwise.
fn init_tracing(settings: &voice_agent_config::Settings) {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    if settings.environment.is_production() {
        let fmt_layer = tracing_subscriber::fmt::layer().json();
        tracing_subscriber::registry().with(env_filter).with(fmt_layer).init();
    } else {
        let fmt_layer = tracing_subscriber::fmt::layer().pretty();
        tracing_subscriber::registry().with(env_filter).with(fmt_layer).init();
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c().await.expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            tracing::info!("received Ctrl+C, starting graceful shutdown");
        }
        _ = terminate => {
            tracing::info!("received SIGTERM, starting graceful shutdown");
        }
    }
}
