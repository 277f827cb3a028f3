//! Centralized constants for the speech pipeline.
//!
//! This module is the single source of truth for the default values
//! named in §6 "Configuration". Business logic should read defaults
//! from here rather than repeating literals, matching the pattern
//! already used for the PCM conversion constants in `voice-agent-core`.

/// Audio processing defaults
pub mod audio {
    /// Only sample rate accepted over the wire in v1 (§6 "Binary frames").
    pub const SAMPLE_RATE_HZ: u32 = 16_000;

    /// Mirrors `voice_agent_core::audio::PCM16_NORMALIZE`.
    pub const PCM16_NORMALIZE: f32 = 32_768.0;

    /// Mirrors `voice_agent_core::audio::PCM16_SCALE`.
    pub const PCM16_SCALE: f32 = 32_767.0;

    /// Default audio buffer capacity (§6 "Audio buffer: capacity_seconds").
    pub const DEFAULT_CAPACITY_SECONDS: f64 = 30.0;
}

/// VAD defaults (§6 "Configuration: VAD").
pub mod vad {
    pub const SPEECH_THRESHOLD: f32 = 0.5;
    pub const SILENCE_THRESHOLD: f32 = 0.3;
    pub const MIN_SPEECH_DURATION_MS: u64 = 100;
    pub const MIN_SILENCE_DURATION_MS: u64 = 500;
    pub const MAX_UTTERANCE_DURATION_MS: u64 = 30_000;
    pub const WINDOW_SIZE_MS: u64 = 64;
    pub const SAMPLE_RATE_HZ: u32 = 16_000;

    /// Jitter tolerance `ε` absorbed by the state machine's dwell-time
    /// checks (§4.E).
    pub const JITTER_TOLERANCE_MS: u64 = 20;

    /// ONNX-style model window size in samples at 16 kHz (§4.C).
    pub const ML_WINDOW_SAMPLES: usize = 512;

    /// Energy VAD adaptive threshold history length (§4.B, `H`).
    pub const ENERGY_HISTORY_LEN: usize = 50;

    /// Energy VAD adaptation rate (1 - α).
    pub const ENERGY_ADAPTATION_RATE: f32 = 0.1;
}

/// Streaming coordinator defaults (§6 "Configuration: Streaming coordinator").
pub mod coordinator {
    pub const MIN_UPDATE_INTERVAL_MS: u64 = 250;
    pub const MIN_TEXT_LENGTH: usize = 2;
    pub const SIMILARITY_THRESHOLD: f32 = 0.9;
    pub const INCREMENTAL_UPDATES_ENABLED: bool = true;
    pub const MAX_UPDATES_PER_SECOND: u32 = 4;
    /// Minimum new audio (samples at 16kHz) before an incremental request
    /// is considered (roughly 300ms).
    pub const MIN_NEW_SAMPLES_FOR_UPDATE: usize = 4_800;
}

/// Transcription worker defaults (§6 "Configuration: Transcription").
pub mod transcription {
    pub const LANGUAGE: &str = "auto";
    pub const TRANSLATE_TO_ENGLISH: bool = false;
    pub const TEMPERATURE: f32 = 0.0;
    pub const MAX_TOKENS: u32 = 256;
    /// Bounded FIFO queue length (§4.F, §5 "Resource bounds").
    pub const QUEUE_CAPACITY: usize = 64;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn vad_thresholds_have_hysteresis_gap() {
        assert!(vad::SPEECH_THRESHOLD > vad::SILENCE_THRESHOLD);
    }

    #[test]
    fn coordinator_similarity_threshold_in_range() {
        assert!(coordinator::SIMILARITY_THRESHOLD >= 0.0 && coordinator::SIMILARITY_THRESHOLD <= 1.0);
    }
}
