//! Shared error taxonomy (§7). Component-internal failures are mostly
//! converted to results or counters at the point they occur; this enum
//! covers the subset that is meaningful to propagate across crate
//! boundaries (config validation, transcription init, protocol errors).

use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("transcription model initialization failed: {0}")]
    TranscriptionInit(String),

    #[error("protocol error: {0}")]
    Protocol(String),

    #[error("audio ingestion error: {0}")]
    AudioIngestion(String),
}
