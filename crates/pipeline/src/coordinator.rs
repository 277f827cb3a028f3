//! Incremental streaming transcription coordinator (§4.G "Streaming
//! Coordinator"), grounded in `StreamingTranscriber` this spec distills
//! from.

use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};

use voice_agent_config::CoordinatorSettings;
use voice_agent_core::{StreamingState, TranscriptionRequest, TranscriptionResult, NO_UTTERANCE};

use crate::error::Result;
use crate::worker::TranscriptionWorker;

/// Outbound update, mapped 1:1 to the `transcription_update` wire
/// message (§6).
#[derive(Debug, Clone)]
pub struct TranscriptionUpdate {
    pub utterance_id: u64,
    pub text: String,
    pub confidence: f32,
    pub is_partial: bool,
    pub start_ms: u64,
    pub end_ms: u64,
    pub detected_language: Option<String>,
    pub language_confidence: Option<f32>,
    pub language_changed: bool,
}

pub type UpdateCallback = Box<dyn Fn(TranscriptionUpdate) + Send + Sync>;

struct CoordinatorEntry {
    state: StreamingState,
    audio: Vec<f32>,
    last_submit_time: Instant,
    new_samples_since_submit: usize,
    last_detected_language: Option<String>,
    /// Language snapshotted for this utterance at `start()`, preferred
    /// over the worker's process-wide default so a later `configure`
    /// from another session can't bleed into an in-flight utterance
    /// (§5 "shared by all sessions").
    language_override: Option<String>,
}

/// Per-process (or per-session, depending on deployment) coordinator
/// owning one `StreamingState` per live utterance.
pub struct StreamingCoordinator {
    worker: Arc<TranscriptionWorker>,
    config: CoordinatorSettings,
    states: Mutex<HashMap<u64, CoordinatorEntry>>,
    on_update: UpdateCallback,
}

impl StreamingCoordinator {
    pub fn new(worker: Arc<TranscriptionWorker>, config: CoordinatorSettings, on_update: UpdateCallback) -> Self {
        Self {
            worker,
            config,
            states: Mutex::new(HashMap::new()),
            on_update,
        }
    }

    /// Creates state and submits an initial request. `initial_audio`
    /// may be empty (§4.G "start"). `language_override`, if set, is
    /// snapshotted for the lifetime of this utterance and takes
    /// precedence over the worker's process-wide default on every
    /// request submitted for it.
    pub fn start(
        self: &Arc<Self>,
        utterance_id: u64,
        initial_audio: Vec<f32>,
        is_live: bool,
        language_override: Option<String>,
    ) -> Result<()> {
        if utterance_id == NO_UTTERANCE {
            return Ok(());
        }
        let now = Instant::now();
        let mut states = self.states.lock();
        states.insert(
            utterance_id,
            CoordinatorEntry {
                state: StreamingState::new(utterance_id),
                audio: initial_audio.clone(),
                last_submit_time: now,
                new_samples_since_submit: 0,
                last_detected_language: None,
                language_override,
            },
        );
        drop(states);

        self.submit_request(utterance_id, initial_audio, is_live)
    }

    /// Appends new audio and, if rate limiting and accumulation
    /// thresholds permit, submits an incremental request (§4.G
    /// "add_audio").
    pub fn add_audio(self: &Arc<Self>, utterance_id: u64, more_samples: &[f32]) -> Result<()> {
        if !self.config.incremental_updates_enabled {
            return Ok(());
        }
        let now = Instant::now();
        let (audio_snapshot, should_submit) = {
            let mut states = self.states.lock();
            let Some(entry) = states.get_mut(&utterance_id) else {
                return Ok(());
            };
            if !entry.state.is_active {
                return Ok(());
            }
            entry.audio.extend_from_slice(more_samples);
            entry.new_samples_since_submit += more_samples.len();
            entry.state.last_new_audio_at = now;

            let interval_ok = now.duration_since(entry.last_submit_time)
                >= Duration::from_millis(self.config.min_update_interval_ms);
            let enough_audio = entry.new_samples_since_submit >= self.config.min_new_samples_for_update;

            if interval_ok && enough_audio {
                entry.last_submit_time = now;
                entry.new_samples_since_submit = 0;
                (entry.audio.clone(), true)
            } else {
                (Vec::new(), false)
            }
        };

        if should_submit {
            self.submit_request(utterance_id, audio_snapshot, true)?;
        }
        Ok(())
    }

    /// Marks the utterance finalized and submits the one final request
    /// (§4.G "finalize").
    pub fn finalize(self: &Arc<Self>, utterance_id: u64) -> Result<()> {
        let audio_snapshot = {
            let mut states = self.states.lock();
            let Some(entry) = states.get_mut(&utterance_id) else {
                return Ok(());
            };
            entry.audio.clone()
        };
        self.submit_request(utterance_id, audio_snapshot, false)
    }

    /// Marks the utterance inactive; any later callback for it is
    /// dropped (§4.G "cancel").
    pub fn cancel(&self, utterance_id: u64) {
        let mut states = self.states.lock();
        if let Some(entry) = states.get_mut(&utterance_id) {
            entry.state.is_active = false;
        }
    }

    /// Worker callback entry point; applies the §4.G update policy.
    pub fn on_result(&self, utterance_id: u64, result: TranscriptionResult) {
        let mut states = self.states.lock();
        let Some(entry) = states.get_mut(&utterance_id) else {
            return;
        };

        if !entry.state.is_active {
            states.remove(&utterance_id);
            return;
        }

        if !result.is_partial {
            let normalized = normalize_text(&result.text, &self.config);
            let language_changed = detect_language_change(entry, &result);
            entry.state.current_text = normalized.clone();
            entry.state.last_sent_text = normalized;
            entry.state.is_finalized = true;
            entry.state.is_active = false;
            entry.state.update_count += 1;
            self.emit(utterance_id, &result, false, language_changed);
            states.remove(&utterance_id);
            return;
        }

        let normalized = normalize_text(&result.text, &self.config);
        let now = Instant::now();

        let similarity = text_similarity(&normalized, &entry.state.last_sent_text);
        if similarity >= self.config.similarity_threshold {
            return;
        }

        if now.duration_since(entry.state.last_update_time)
            < Duration::from_millis(self.config.min_update_interval_ms)
        {
            return;
        }

        entry
            .state
            .updates_in_last_second
            .retain(|t| now.duration_since(*t) < Duration::from_secs(1));
        if entry.state.updates_in_last_second.len() as u32 >= self.config.max_updates_per_second {
            return;
        }

        if normalized.len() < self.config.min_text_length {
            return;
        }

        let language_changed = detect_language_change(entry, &result);
        entry.state.current_text = normalized.clone();
        entry.state.last_sent_text = normalized;
        entry.state.last_update_time = now;
        entry.state.update_count += 1;
        entry.state.updates_in_last_second.push(now);
        self.emit(utterance_id, &result, true, language_changed);
    }

    pub fn is_transcribing(&self, utterance_id: u64) -> bool {
        self.states.lock().contains_key(&utterance_id)
    }

    pub fn active_count(&self) -> usize {
        self.states.lock().len()
    }

    /// The callback only holds a `Weak` handle back to the coordinator
    /// (§9 "Cyclic ownership"): the worker thread outlives any one
    /// utterance, so if the coordinator (and therefore the owning
    /// session) has already been torn down by the time a stale result
    /// arrives, the upgrade fails and the result is silently dropped
    /// rather than keeping the coordinator alive past its owner.
    fn submit_request(self: &Arc<Self>, utterance_id: u64, audio: Vec<f32>, is_live: bool) -> Result<()> {
        let cfg = self.worker.current_config();
        let language_override = self
            .states
            .lock()
            .get(&utterance_id)
            .and_then(|entry| entry.language_override.clone());
        let weak_self: Weak<StreamingCoordinator> = Arc::downgrade(self);
        let request = TranscriptionRequest {
            utterance_id,
            audio,
            is_live,
            language: language_override.unwrap_or(cfg.language),
            translate_to_english: cfg.translate_to_english,
            temperature: cfg.temperature,
            max_tokens: cfg.max_tokens,
            callback: Box::new(move |id, result| {
                if let Some(coordinator) = weak_self.upgrade() {
                    coordinator.on_result(id, result);
                }
            }),
        };
        self.worker.submit(request)
    }

    fn emit(&self, utterance_id: u64, result: &TranscriptionResult, is_partial: bool, language_changed: bool) {
        (self.on_update)(TranscriptionUpdate {
            utterance_id,
            text: result.text.clone(),
            confidence: result.confidence,
            is_partial,
            start_ms: result.start_ms,
            end_ms: result.end_ms,
            detected_language: result.detected_language.clone(),
            language_confidence: result.language_confidence,
            language_changed,
        });
    }
}

fn detect_language_change(entry: &mut CoordinatorEntry, result: &TranscriptionResult) -> bool {
    let changed = match (&entry.last_detected_language, &result.detected_language) {
        (Some(prev), Some(curr)) => prev != curr,
        (None, Some(_)) => false,
        _ => false,
    };
    if result.detected_language.is_some() {
        entry.last_detected_language = result.detected_language.clone();
    }
    changed
}

fn normalize_text(text: &str, config: &CoordinatorSettings) -> String {
    let mut normalized = text.to_string();
    if config.normalize_trim {
        normalized = normalized.trim().to_string();
    }
    if config.normalize_strip_punctuation {
        normalized = normalized
            .chars()
            .filter(|c| !c.is_ascii_punctuation())
            .collect();
    }
    if config.normalize_lowercase {
        normalized = normalized.to_lowercase();
    }
    normalized
}

/// Normalized edit-based similarity: `1 - levenshtein(a, b) / max(len(a),
/// len(b), 1)` (§4.G "Text similarity").
pub fn text_similarity(a: &str, b: &str) -> f32 {
    let distance = levenshtein(a, b);
    let max_len = a.chars().count().max(b.chars().count()).max(1);
    1.0 - (distance as f32 / max_len as f32)
}

fn levenshtein(a: &str, b: &str) -> usize {
    let a: Vec<char> = a.chars().collect();
    let b: Vec<char> = b.chars().collect();
    let (n, m) = (a.len(), b.len());

    if n == 0 {
        return m;
    }
    if m == 0 {
        return n;
    }

    let mut prev: Vec<usize> = (0..=m).collect();
    let mut curr = vec![0usize; m + 1];

    for i in 1..=n {
        curr[0] = i;
        for j in 1..=m {
            let cost = if a[i - 1] == b[j - 1] { 0 } else { 1 };
            curr[j] = (prev[j] + 1).min(curr[j - 1] + 1).min(prev[j - 1] + cost);
        }
        std::mem::swap(&mut prev, &mut curr);
    }

    prev[m]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identical_strings_are_fully_similar() {
        assert_eq!(text_similarity("hello", "hello"), 1.0);
    }

    #[test]
    fn empty_strings_are_fully_similar() {
        assert_eq!(text_similarity("", ""), 1.0);
    }

    #[test]
    fn completely_different_strings_score_zero() {
        assert_eq!(text_similarity("abc", "xyz"), 0.0);
    }

    #[test]
    fn near_duplicate_partials_score_high_similarity() {
        let sim = text_similarity("hello there", "hello there ");
        assert!(sim > 0.9, "similarity was {sim}");
    }

    #[test]
    fn normalize_trims_and_lowercases_by_default() {
        let config = CoordinatorSettings::default();
        assert_eq!(normalize_text("  Hello World  ", &config), "hello world");
    }
}
