//! Main settings module
//!
//! Settings are assembled in three layers, lowest priority first:
//! built-in defaults, `config/{default,<env>}.toml` if present, then
//! `VOICE_AGENT__*` environment variables. See [`load_settings`].

use config::{Config, Environment, File};
use serde::{Deserialize, Serialize};

use crate::constants::{audio, coordinator, transcription, vad};
use crate::ConfigError;

/// Runtime environment, selects JSON vs. human-readable log formatting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum RuntimeEnvironment {
    #[default]
    Development,
    Staging,
    Production,
}

impl RuntimeEnvironment {
    pub fn is_production(&self) -> bool {
        matches!(self, Self::Production)
    }

    pub fn is_strict(&self) -> bool {
        matches!(self, Self::Production | Self::Staging)
    }
}

/// VAD operating mode (§4.D "Mode selection").
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum VadMode {
    /// ML session only; falls back to a zero probability on inference
    /// failure rather than switching engines mid-session.
    Ml,
    /// Energy-only, no model load required.
    Energy,
    /// ML primary, energy fallback when the ML session reports failure
    /// (§4.D "Hybrid fallback").
    #[default]
    Hybrid,
}

/// Top-level application settings.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Settings {
    #[serde(default)]
    pub environment: RuntimeEnvironment,

    #[serde(default)]
    pub vad: VadSettings,

    #[serde(default)]
    pub coordinator: CoordinatorSettings,

    #[serde(default)]
    pub transcription: TranscriptionSettings,

    #[serde(default)]
    pub audio_buffer: AudioBufferSettings,

    #[serde(default = "default_bind_address")]
    pub bind_address: String,

    #[serde(default = "default_port")]
    pub port: u16,
}

fn default_bind_address() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    8080
}

/// VAD configuration (§6 "Configuration: VAD").
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct VadSettings {
    #[serde(default = "default_speech_threshold")]
    pub speech_threshold: f32,
    #[serde(default = "default_silence_threshold")]
    pub silence_threshold: f32,
    #[serde(default = "default_min_speech_duration_ms")]
    pub min_speech_duration_ms: u64,
    #[serde(default = "default_min_silence_duration_ms")]
    pub min_silence_duration_ms: u64,
    #[serde(default = "default_max_utterance_duration_ms")]
    pub max_utterance_duration_ms: u64,
    #[serde(default = "default_window_size_ms")]
    pub window_size_ms: u64,
    #[serde(default = "default_sample_rate")]
    pub sample_rate: u32,
    #[serde(default)]
    pub mode: VadMode,
}

fn default_speech_threshold() -> f32 {
    vad::SPEECH_THRESHOLD
}
fn default_silence_threshold() -> f32 {
    vad::SILENCE_THRESHOLD
}
fn default_min_speech_duration_ms() -> u64 {
    vad::MIN_SPEECH_DURATION_MS
}
fn default_min_silence_duration_ms() -> u64 {
    vad::MIN_SILENCE_DURATION_MS
}
fn default_max_utterance_duration_ms() -> u64 {
    vad::MAX_UTTERANCE_DURATION_MS
}
fn default_window_size_ms() -> u64 {
    vad::WINDOW_SIZE_MS
}
fn default_sample_rate() -> u32 {
    vad::SAMPLE_RATE_HZ
}

impl Default for VadSettings {
    fn default() -> Self {
        Self {
            speech_threshold: default_speech_threshold(),
            silence_threshold: default_silence_threshold(),
            min_speech_duration_ms: default_min_speech_duration_ms(),
            min_silence_duration_ms: default_min_silence_duration_ms(),
            max_utterance_duration_ms: default_max_utterance_duration_ms(),
            window_size_ms: default_window_size_ms(),
            sample_rate: default_sample_rate(),
            mode: VadMode::default(),
        }
    }
}

/// Streaming coordinator configuration (§6 "Configuration: Streaming
/// coordinator").
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct CoordinatorSettings {
    #[serde(default = "default_min_update_interval_ms")]
    pub min_update_interval_ms: u64,
    #[serde(default = "default_min_text_length")]
    pub min_text_length: usize,
    #[serde(default = "default_similarity_threshold")]
    pub similarity_threshold: f32,
    #[serde(default = "default_incremental_updates_enabled")]
    pub incremental_updates_enabled: bool,
    #[serde(default = "default_max_updates_per_second")]
    pub max_updates_per_second: u32,
    #[serde(default = "default_min_new_samples_for_update")]
    pub min_new_samples_for_update: usize,
    #[serde(default = "default_normalize_trim")]
    pub normalize_trim: bool,
    #[serde(default = "default_normalize_strip_punctuation")]
    pub normalize_strip_punctuation: bool,
    #[serde(default = "default_normalize_lowercase")]
    pub normalize_lowercase: bool,
}

fn default_normalize_trim() -> bool {
    true
}
fn default_normalize_strip_punctuation() -> bool {
    false
}
fn default_normalize_lowercase() -> bool {
    true
}

fn default_min_update_interval_ms() -> u64 {
    coordinator::MIN_UPDATE_INTERVAL_MS
}
fn default_min_text_length() -> usize {
    coordinator::MIN_TEXT_LENGTH
}
fn default_similarity_threshold() -> f32 {
    coordinator::SIMILARITY_THRESHOLD
}
fn default_incremental_updates_enabled() -> bool {
    coordinator::INCREMENTAL_UPDATES_ENABLED
}
fn default_max_updates_per_second() -> u32 {
    coordinator::MAX_UPDATES_PER_SECOND
}
fn default_min_new_samples_for_update() -> usize {
    coordinator::MIN_NEW_SAMPLES_FOR_UPDATE
}

impl Default for CoordinatorSettings {
    fn default() -> Self {
        Self {
            min_update_interval_ms: default_min_update_interval_ms(),
            min_text_length: default_min_text_length(),
            similarity_threshold: default_similarity_threshold(),
            incremental_updates_enabled: default_incremental_updates_enabled(),
            max_updates_per_second: default_max_updates_per_second(),
            min_new_samples_for_update: default_min_new_samples_for_update(),
            normalize_trim: default_normalize_trim(),
            normalize_strip_punctuation: default_normalize_strip_punctuation(),
            normalize_lowercase: default_normalize_lowercase(),
        }
    }
}

/// Transcription worker configuration (§6 "Configuration: Transcription").
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TranscriptionSettings {
    #[serde(default)]
    pub model_path: Option<String>,
    #[serde(default = "default_language")]
    pub language: String,
    #[serde(default = "default_translate_to_english")]
    pub translate_to_english: bool,
    #[serde(default = "default_temperature")]
    pub temperature: f32,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,
}

fn default_language() -> String {
    transcription::LANGUAGE.to_string()
}
fn default_translate_to_english() -> bool {
    transcription::TRANSLATE_TO_ENGLISH
}
fn default_temperature() -> f32 {
    transcription::TEMPERATURE
}
fn default_max_tokens() -> u32 {
    transcription::MAX_TOKENS
}
fn default_queue_capacity() -> usize {
    transcription::QUEUE_CAPACITY
}

impl Default for TranscriptionSettings {
    fn default() -> Self {
        Self {
            model_path: None,
            language: default_language(),
            translate_to_english: default_translate_to_english(),
            temperature: default_temperature(),
            max_tokens: default_max_tokens(),
            queue_capacity: default_queue_capacity(),
        }
    }
}

/// Per-session audio buffer sizing (§4.A "Capacity").
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct AudioBufferSettings {
    #[serde(default = "default_capacity_seconds")]
    pub capacity_seconds: f64,
}

fn default_capacity_seconds() -> f64 {
    audio::DEFAULT_CAPACITY_SECONDS
}

impl Default for AudioBufferSettings {
    fn default() -> Self {
        Self {
            capacity_seconds: default_capacity_seconds(),
        }
    }
}

impl AudioBufferSettings {
    /// Buffer capacity in samples at the configured VAD sample rate.
    pub fn capacity_samples(&self, sample_rate: u32) -> usize {
        (self.capacity_seconds * sample_rate as f64) as usize
    }
}

impl Settings {
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.vad.validate()?;
        self.coordinator.validate()?;
        self.transcription.validate()?;
        if self.port == 0 {
            return Err(ConfigError::InvalidValue {
                field: "port".to_string(),
                message: "must be nonzero".to_string(),
            });
        }
        Ok(())
    }
}

impl VadSettings {
    pub fn validate(&self) -> Result<(), ConfigError> {
        // §7 "Configuration error": speech_threshold must exceed
        // silence_threshold or the hysteresis gap collapses.
        if !(self.speech_threshold > self.silence_threshold) {
            return Err(ConfigError::InvalidValue {
                field: "vad.speech_threshold".to_string(),
                message: "must be greater than vad.silence_threshold".to_string(),
            });
        }
        if !(0.0..=1.0).contains(&self.speech_threshold) {
            return Err(ConfigError::InvalidValue {
                field: "vad.speech_threshold".to_string(),
                message: "must be in [0, 1]".to_string(),
            });
        }
        if !(0.0..=1.0).contains(&self.silence_threshold) {
            return Err(ConfigError::InvalidValue {
                field: "vad.silence_threshold".to_string(),
                message: "must be in [0, 1]".to_string(),
            });
        }
        if self.max_utterance_duration_ms == 0 {
            return Err(ConfigError::InvalidValue {
                field: "vad.max_utterance_duration_ms".to_string(),
                message: "must be nonzero".to_string(),
            });
        }
        if self.window_size_ms == 0 {
            return Err(ConfigError::InvalidValue {
                field: "vad.window_size_ms".to_string(),
                message: "must be nonzero".to_string(),
            });
        }
        if self.sample_rate == 0 {
            return Err(ConfigError::InvalidValue {
                field: "vad.sample_rate".to_string(),
                message: "must be nonzero".to_string(),
            });
        }
        Ok(())
    }
}

impl CoordinatorSettings {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(0.0..=1.0).contains(&self.similarity_threshold) {
            return Err(ConfigError::InvalidValue {
                field: "coordinator.similarity_threshold".to_string(),
                message: "must be in [0, 1]".to_string(),
            });
        }
        if self.max_updates_per_second == 0 {
            return Err(ConfigError::InvalidValue {
                field: "coordinator.max_updates_per_second".to_string(),
                message: "must be nonzero".to_string(),
            });
        }
        Ok(())
    }
}

impl TranscriptionSettings {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(0.0..=1.0).contains(&self.temperature) {
            return Err(ConfigError::InvalidValue {
                field: "transcription.temperature".to_string(),
                message: "must be in [0, 1]".to_string(),
            });
        }
        if self.max_tokens == 0 {
            return Err(ConfigError::InvalidValue {
                field: "transcription.max_tokens".to_string(),
                message: "must be nonzero".to_string(),
            });
        }
        if self.queue_capacity == 0 {
            return Err(ConfigError::InvalidValue {
                field: "transcription.queue_capacity".to_string(),
                message: "must be nonzero".to_string(),
            });
        }
        Ok(())
    }
}

/// Load settings from files and environment.
///
/// Priority (highest to lowest):
/// 1. Environment variables (`VOICE_AGENT__` prefix)
/// 2. `config/{env}.toml` (if `env` is specified)
/// 3. `config/default.toml`
pub fn load_settings(env: Option<&str>) -> Result<Settings, ConfigError> {
    let mut builder = Config::builder();

    builder = builder.add_source(File::with_name("config/default").required(false));

    if let Some(env_name) = env {
        builder =
            builder.add_source(File::with_name(&format!("config/{}", env_name)).required(false));
    }

    builder = builder.add_source(
        Environment::with_prefix("VOICE_AGENT")
            .separator("__")
            .try_parsing(true),
    );

    let config = builder.build()?;
    let settings: Settings = config.try_deserialize()?;

    settings.validate()?;

    Ok(settings)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_settings_are_valid() {
        let settings = Settings::default();
        assert!(settings.validate().is_ok());
    }

    #[test]
    fn rejects_inverted_vad_thresholds() {
        let mut settings = Settings::default();
        settings.vad.speech_threshold = 0.2;
        settings.vad.silence_threshold = 0.3;
        assert!(settings.validate().is_err());
    }

    #[test]
    fn rejects_out_of_range_similarity_threshold() {
        let mut settings = Settings::default();
        settings.coordinator.similarity_threshold = 1.5;
        assert!(settings.validate().is_err());
    }

    #[test]
    fn rejects_zero_max_tokens() {
        let mut settings = Settings::default();
        settings.transcription.max_tokens = 0;
        assert!(settings.validate().is_err());
    }

    #[test]
    fn audio_buffer_capacity_samples_scales_with_sample_rate() {
        let buf = AudioBufferSettings {
            capacity_seconds: 2.0,
        };
        assert_eq!(buf.capacity_samples(16_000), 32_000);
    }

    #[test]
    fn load_settings_falls_back_to_defaults_without_files_or_env() {
        let settings = load_settings(None).expect("defaults must load");
        assert_eq!(settings.vad.sample_rate, vad::SAMPLE_RATE_HZ);
    }
}
