//! Voice Agent Server
//!
//! The wire-transport boundary over the per-session pipeline (§6):
//! WebSocket upgrade, session registry, and JSON/binary dispatch. Kept
//! deliberately thin — the engineering lives in `voice-agent-pipeline`.

pub mod http;
pub mod message;
pub mod metrics;
pub mod session;
pub mod state;
pub mod websocket;

pub use http::create_router;
pub use metrics::init_metrics;
pub use session::Session;
pub use state::AppState;
pub use websocket::WebSocketHandler;

use thiserror::Error;

/// Server errors.
#[derive(Error, Debug)]
pub enum ServerError {
    #[error("session not found: {0}")]
    SessionNotFound(String),

    #[error(transparent)]
    Pipeline(#[from] voice_agent_pipeline::PipelineError),

    #[error(transparent)]
    Core(#[from] voice_agent_core::Error),

    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("internal error: {0}")]
    Internal(String),
}

impl From<ServerError> for axum::http::StatusCode {
    fn from(err: ServerError) -> Self {
        match err {
            ServerError::SessionNotFound(_) => axum::http::StatusCode::NOT_FOUND,
            ServerError::Pipeline(_) => axum::http::StatusCode::INTERNAL_SERVER_ERROR,
            ServerError::Core(_) => axum::http::StatusCode::INTERNAL_SERVER_ERROR,
            ServerError::InvalidRequest(_) => axum::http::StatusCode::BAD_REQUEST,
            ServerError::Internal(_) => axum::http::StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}
