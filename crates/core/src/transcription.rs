//! Transcription request/result and per-utterance streaming state
//! (§3 "Transcription request", "Transcription result", "Streaming
//! state").

use std::time::Instant;

/// Invoked by the transcription worker thread once per produced result.
/// Must not block indefinitely (§4.F "Callback invariants") and must
/// tolerate late delivery for an already-cancelled utterance.
pub type TranscriptionCallback = Box<dyn Fn(u64, TranscriptionResult) + Send + 'static>;

/// One unit of work for the transcription worker. Destroyed after the
/// worker dispatches its result(s).
pub struct TranscriptionRequest {
    pub utterance_id: u64,
    pub audio: Vec<f32>,
    pub is_live: bool,
    /// Language hint ("auto" or a BCP-47-ish tag), snapshotted at enqueue
    /// time so an in-flight request observes a stable configuration
    /// (§4.F "Configuration").
    pub language: String,
    pub translate_to_english: bool,
    pub temperature: f32,
    pub max_tokens: u32,
    pub callback: TranscriptionCallback,
}

impl std::fmt::Debug for TranscriptionRequest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TranscriptionRequest")
            .field("utterance_id", &self.utterance_id)
            .field("audio_samples", &self.audio.len())
            .field("is_live", &self.is_live)
            .field("language", &self.language)
            .finish()
    }
}

/// One transcription output. For a given `utterance_id` the sequence
/// the worker produces is a lazy, finite, non-restartable sequence
/// ending with exactly one `is_partial = false` result.
#[derive(Debug, Clone)]
pub struct TranscriptionResult {
    pub text: String,
    pub confidence: f32,
    pub is_partial: bool,
    pub start_ms: u64,
    pub end_ms: u64,
    pub detected_language: Option<String>,
    pub language_confidence: Option<f32>,
}

impl TranscriptionResult {
    pub fn cancelled(start_ms: u64, end_ms: u64) -> Self {
        Self {
            text: String::new(),
            confidence: 0.0,
            is_partial: false,
            start_ms,
            end_ms,
            detected_language: None,
            language_confidence: None,
        }
    }
}

/// Per-live-utterance state held by the streaming coordinator (§4.G).
#[derive(Debug, Clone)]
pub struct StreamingState {
    pub utterance_id: u64,
    pub current_text: String,
    pub last_sent_text: String,
    pub last_update_time: Instant,
    pub update_count: u64,
    pub updates_in_last_second: Vec<Instant>,
    pub is_active: bool,
    pub is_finalized: bool,
    pub last_new_audio_at: Instant,
}

impl StreamingState {
    pub fn new(utterance_id: u64) -> Self {
        let now = Instant::now();
        Self {
            utterance_id,
            current_text: String::new(),
            last_sent_text: String::new(),
            last_update_time: now,
            update_count: 0,
            updates_in_last_second: Vec::new(),
            is_active: true,
            is_finalized: false,
            last_new_audio_at: now,
        }
    }
}
