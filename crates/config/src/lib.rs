//! Configuration management for the voice agent speech pipeline
//!
//! Supports loading configuration from:
//! - TOML files, layered by runtime environment
//! - Environment variables (`VOICE_AGENT_` prefix)
//! - Built-in defaults for everything not overridden

pub mod constants;
pub mod settings;

pub use settings::{
    load_settings, AudioBufferSettings, CoordinatorSettings, RuntimeEnvironment, Settings,
    TranscriptionSettings, VadMode, VadSettings,
};

use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Configuration file not found: {0}")]
    FileNotFound(String),

    #[error("Failed to parse configuration: {0}")]
    ParseError(String),

    #[error("Missing required field: {0}")]
    MissingField(String),

    #[error("Invalid value for {field}: {message}")]
    InvalidValue { field: String, message: String },

    #[error("Environment error: {0}")]
    Environment(String),
}

impl From<config::ConfigError> for ConfigError {
    fn from(err: config::ConfigError) -> Self {
        ConfigError::ParseError(err.to_string())
    }
}
