//! The thin HTTP/WebSocket router (§10.6): a health check, a Prometheus
//! scrape endpoint, and the `/ws/:session_id` upgrade. There is no REST
//! session API and no persisted state — a session lives exactly as
//! long as its WebSocket connection (§6 "Persisted state: none in the
//! core").

use axum::http::StatusCode;
use axum::routing::get;
use axum::Router;
use tower_http::compression::CompressionLayer;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::metrics::metrics_handler;
use crate::state::AppState;
use crate::websocket::ws_handler;

pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/ws/:session_id", get(ws_handler))
        .route("/healthz", get(health_check))
        .route("/metrics", get(metrics_handler))
        .layer(CompressionLayer::new())
        .layer(TraceLayer::new_for_http())
        .layer(cors_layer())
        .with_state(state)
}

/// Permissive by default: this crate is the speech-pipeline core, not
/// the outer product surface that would own a real origin allowlist.
fn cors_layer() -> CorsLayer {
    CorsLayer::new().allow_origin(Any).allow_methods(Any).allow_headers(Any)
}

async fn health_check(axum::extract::State(state): axum::extract::State<AppState>) -> (StatusCode, String) {
    (StatusCode::OK, format!("{{\"status\":\"ok\",\"sessions\":{}}}", state.session_count()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metrics::init_metrics;
    use std::sync::Arc;
    use voice_agent_pipeline::{HttpSttConfig, HttpSttModel, TranscriptionWorker, WorkerConfig};

    fn test_state() -> AppState {
        let model = Box::new(HttpSttModel::new(HttpSttConfig::default()));
        let worker = Arc::new(TranscriptionWorker::start(model, 16, WorkerConfig {
            language: "auto".to_string(),
            translate_to_english: false,
            temperature: 0.0,
            max_tokens: 256,
        }));
        AppState::new(voice_agent_config::Settings::default(), worker, init_metrics())
    }

    #[tokio::test]
    async fn health_check_reports_zero_sessions_initially() {
        let state = test_state();
        let (status, body) = health_check(axum::extract::State(state)).await;
        assert_eq!(status, StatusCode::OK);
        assert!(body.contains("\"sessions\":0"));
    }
}
