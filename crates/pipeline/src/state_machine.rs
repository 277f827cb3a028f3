//! The four-state utterance segmentation state machine (§4.E "VAD State
//! Machine"), grounded in the `VoiceActivityDetector` transition table
//! this spec distills from.

use parking_lot::Mutex;
use std::time::{Duration, Instant};

use voice_agent_core::{Utterance, VadEvent, VadState, NO_UTTERANCE};

/// Invoked on every accepted state transition.
pub type VadCallback = Box<dyn Fn(VadEvent) + Send>;
/// Invoked once an utterance's buffered audio is finalized (delivered
/// atomically, then the accumulator is cleared).
pub type UtteranceCallback = Box<dyn Fn(Utterance) + Send>;
/// Invoked once, when an utterance id is assigned, to snapshot
/// `source_language`/`target_language`/`voice_id` for that utterance
/// (§3 "Utterance: ... snapshot at start").
pub type LanguageSnapshotFn = Box<dyn Fn() -> (Option<String>, Option<String>, Option<String>) + Send>;

#[derive(Debug, Clone, Copy)]
pub struct VadStateMachineConfig {
    pub speech_threshold: f32,
    pub silence_threshold: f32,
    pub min_speech_duration_ms: u64,
    pub min_silence_duration_ms: u64,
    pub max_utterance_duration_ms: u64,
    /// ε: jitter tolerance absorbed by the dwell-time checks (§4.E).
    pub jitter_tolerance_ms: u64,
}

impl VadStateMachineConfig {
    pub fn min_speech_dwell(&self) -> Duration {
        Duration::from_millis(self.min_speech_duration_ms.saturating_sub(self.jitter_tolerance_ms))
    }

    pub fn min_silence_dwell(&self) -> Duration {
        Duration::from_millis(self.min_silence_duration_ms.saturating_sub(self.jitter_tolerance_ms))
    }

    pub fn max_utterance_duration(&self) -> Duration {
        Duration::from_millis(self.max_utterance_duration_ms)
    }
}

struct Inner {
    state: VadState,
    state_entered_at: Instant,
    utterance_start: Option<Instant>,
    utterance_id: u64,
    next_utterance_id: u64,
    accumulated_audio: Vec<f32>,
    /// Snapshotted once, at the moment `utterance_id` is assigned.
    language_snapshot: (Option<String>, Option<String>, Option<String>),
}

/// Owns the segmentation state for one session. Not `Sync` friendly by
/// design — one state machine per session, driven from the ingress
/// thread that owns that session (§5 "Ordering").
pub struct VadStateMachine {
    config: VadStateMachineConfig,
    inner: Mutex<Inner>,
    vad_callback: Mutex<Option<VadCallback>>,
    utterance_callback: Mutex<Option<UtteranceCallback>>,
    language_snapshot_fn: Mutex<Option<LanguageSnapshotFn>>,
}

impl VadStateMachine {
    pub fn new(config: VadStateMachineConfig) -> Self {
        Self {
            config,
            inner: Mutex::new(Inner {
                state: VadState::Idle,
                state_entered_at: Instant::now(),
                utterance_start: None,
                utterance_id: NO_UTTERANCE,
                next_utterance_id: 1,
                accumulated_audio: Vec::new(),
                language_snapshot: (None, None, None),
            }),
            vad_callback: Mutex::new(None),
            utterance_callback: Mutex::new(None),
            language_snapshot_fn: Mutex::new(None),
        }
    }

    pub fn set_vad_callback(&self, callback: VadCallback) {
        *self.vad_callback.lock() = Some(callback);
    }

    pub fn set_utterance_callback(&self, callback: UtteranceCallback) {
        *self.utterance_callback.lock() = Some(callback);
    }

    /// Registers the closure invoked once per utterance, at id
    /// assignment, to snapshot `source_lang`/`target_lang`/`voice_id`
    /// (§3 "Utterance").
    pub fn set_language_snapshot(&self, snapshot: LanguageSnapshotFn) {
        *self.language_snapshot_fn.lock() = Some(snapshot);
    }

    pub fn state(&self) -> VadState {
        self.inner.lock().state
    }

    pub fn current_utterance_id(&self) -> u64 {
        self.inner.lock().utterance_id
    }

    /// Copies the accumulated audio from `from` onward, without
    /// disturbing the accumulator. Lets a caller forward buffering-state
    /// audio (including the SpeechDetected lead-in, since `is_buffering`
    /// covers it too) incrementally without racing `finalize_locked`'s
    /// own drain (§4.H "ingest_binary").
    pub fn accumulated_tail(&self, from: usize) -> Vec<f32> {
        let inner = self.inner.lock();
        if from >= inner.accumulated_audio.len() {
            Vec::new()
        } else {
            inner.accumulated_audio[from..].to_vec()
        }
    }

    /// Feeds one window's probability and audio chunk through the state
    /// machine. Returns the emitted transition, if any.
    pub fn process(&self, probability: f32, chunk: &[f32]) -> Option<VadEvent> {
        let now = Instant::now();
        let mut inner = self.inner.lock();

        let previous = inner.state;
        let time_in_state = now.duration_since(inner.state_entered_at);
        let time_since_start = inner
            .utterance_start
            .map(|start| now.duration_since(start))
            .unwrap_or(Duration::ZERO);

        let next = self.next_state(previous, probability, time_in_state, time_since_start);

        if next != previous {
            inner.state = next;
            inner.state_entered_at = now;

            match (previous, next) {
                (VadState::Idle, VadState::SpeechDetected) => {
                    // Begin buffering; utterance id assigned on confirm.
                }
                (VadState::SpeechDetected, VadState::Speaking) => {
                    if inner.utterance_id == NO_UTTERANCE {
                        inner.utterance_id = inner.next_utterance_id;
                        inner.next_utterance_id += 1;
                        inner.language_snapshot = self
                            .language_snapshot_fn
                            .lock()
                            .as_ref()
                            .map(|f| f())
                            .unwrap_or_default();
                    }
                    inner.utterance_start = Some(now);
                }
                (VadState::SpeechDetected, VadState::Idle) => {
                    // Dropped before confirmation: discard silently.
                    inner.accumulated_audio.clear();
                    inner.utterance_start = None;
                }
                (VadState::PauseDetected, VadState::Speaking) => {
                    // Same utterance id continues.
                }
                (VadState::Speaking, VadState::PauseDetected) => {}
                (VadState::Speaking, VadState::Idle) | (VadState::PauseDetected, VadState::Idle) => {
                    self.finalize_locked(&mut inner);
                }
                _ => {}
            }
        }

        if next.is_buffering() {
            inner.accumulated_audio.extend_from_slice(chunk);
        }

        if next == previous {
            return None;
        }

        let event = VadEvent {
            previous,
            current: next,
            confidence: probability,
            utterance_id: inner.utterance_id,
            timestamp: now,
        };

        drop(inner);
        if let Some(cb) = self.vad_callback.lock().as_ref() {
            cb(event);
        }

        Some(event)
    }

    fn next_state(
        &self,
        current: VadState,
        probability: f32,
        time_in_state: Duration,
        time_since_start: Duration,
    ) -> VadState {
        let t_sp = self.config.speech_threshold;
        let t_si = self.config.silence_threshold;

        match current {
            VadState::Idle => {
                if probability > t_sp {
                    VadState::SpeechDetected
                } else {
                    VadState::Idle
                }
            }
            VadState::SpeechDetected => {
                if probability > t_sp && time_in_state >= self.config.min_speech_dwell() {
                    VadState::Speaking
                } else if probability < t_si {
                    VadState::Idle
                } else {
                    VadState::SpeechDetected
                }
            }
            VadState::Speaking => {
                if probability < t_si {
                    VadState::PauseDetected
                } else if time_since_start > self.config.max_utterance_duration() {
                    VadState::Idle
                } else {
                    VadState::Speaking
                }
            }
            VadState::PauseDetected => {
                if probability > t_sp {
                    VadState::Speaking
                } else if time_in_state >= self.config.min_silence_dwell() {
                    VadState::Idle
                } else if time_since_start > self.config.max_utterance_duration() {
                    VadState::Idle
                } else {
                    VadState::PauseDetected
                }
            }
        }
    }

    fn finalize_locked(&self, inner: &mut Inner) {
        let utterance_id = inner.utterance_id;
        let audio = std::mem::take(&mut inner.accumulated_audio);
        let started_at = inner.utterance_start.take().unwrap_or_else(Instant::now);
        let (source_language, target_language, voice_id) =
            std::mem::take(&mut inner.language_snapshot);
        inner.utterance_id = NO_UTTERANCE;

        if utterance_id != NO_UTTERANCE {
            if let Some(cb) = self.utterance_callback.lock().as_ref() {
                let mut utterance = Utterance::new(utterance_id, source_language, target_language, voice_id);
                utterance.started_at = started_at;
                utterance.append_audio(&audio);
                cb(utterance);
            }
        }
    }

    /// Force-ends the current utterance; restricted to `Speaking` and
    /// `PauseDetected` (§4.E "Force-end").
    pub fn force_end(&self) {
        let mut inner = self.inner.lock();
        if !matches!(inner.state, VadState::Speaking | VadState::PauseDetected) {
            return;
        }
        let previous = inner.state;
        inner.state = VadState::Idle;
        inner.state_entered_at = Instant::now();
        let utterance_id = inner.utterance_id;
        self.finalize_locked(&mut inner);

        let event = VadEvent {
            previous,
            current: VadState::Idle,
            confidence: 0.0,
            utterance_id,
            timestamp: Instant::now(),
        };
        drop(inner);
        if let Some(cb) = self.vad_callback.lock().as_ref() {
            cb(event);
        }
    }

    /// Resets to `Idle`, finalizing any active utterance first (§4.E
    /// "Reset").
    pub fn reset(&self) {
        let mut inner = self.inner.lock();
        let was_buffering = inner.state.is_buffering();
        inner.state = VadState::Idle;
        inner.state_entered_at = Instant::now();
        if was_buffering {
            self.finalize_locked(&mut inner);
        } else {
            inner.accumulated_audio.clear();
            inner.utterance_start = None;
            inner.utterance_id = NO_UTTERANCE;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex as StdMutex};
    use std::thread::sleep;

    fn test_config() -> VadStateMachineConfig {
        VadStateMachineConfig {
            speech_threshold: 0.5,
            silence_threshold: 0.3,
            min_speech_duration_ms: 20,
            min_silence_duration_ms: 20,
            max_utterance_duration_ms: 500,
            jitter_tolerance_ms: 0,
        }
    }

    #[test]
    fn idle_stays_idle_below_speech_threshold() {
        let sm = VadStateMachine::new(test_config());
        let event = sm.process(0.1, &[0.0; 10]);
        assert!(event.is_none());
        assert_eq!(sm.state(), VadState::Idle);
    }

    #[test]
    fn idle_to_speech_detected_on_high_probability() {
        let sm = VadStateMachine::new(test_config());
        let event = sm.process(0.9, &[0.0; 10]).unwrap();
        assert_eq!(event.previous, VadState::Idle);
        assert_eq!(event.current, VadState::SpeechDetected);
        assert_eq!(sm.state(), VadState::SpeechDetected);
    }

    #[test]
    fn sub_threshold_blip_drops_back_to_idle_without_utterance() {
        let sm = VadStateMachine::new(test_config());
        let finalized = Arc::new(StdMutex::new(Vec::new()));
        let finalized_clone = finalized.clone();
        sm.set_utterance_callback(Box::new(move |utterance| {
            finalized_clone.lock().unwrap().push(utterance);
        }));

        sm.process(0.9, &[1.0]);
        assert_eq!(sm.state(), VadState::SpeechDetected);
        sm.process(0.1, &[1.0]);
        assert_eq!(sm.state(), VadState::Idle);
        assert!(finalized.lock().unwrap().is_empty());
    }

    #[test]
    fn confirmed_speech_assigns_utterance_id_after_min_dwell() {
        let sm = VadStateMachine::new(test_config());
        sm.process(0.9, &[1.0]);
        sleep(Duration::from_millis(25));
        let event = sm.process(0.9, &[1.0]).unwrap();
        assert_eq!(event.current, VadState::Speaking);
        assert_ne!(sm.current_utterance_id(), NO_UTTERANCE);
    }

    #[test]
    fn accumulated_tail_includes_the_speech_detected_lead_in() {
        let sm = VadStateMachine::new(test_config());
        sm.process(0.9, &[1.0]); // SpeechDetected: buffered, unconfirmed
        sleep(Duration::from_millis(25));
        let event = sm.process(0.9, &[2.0]).unwrap(); // confirms -> Speaking
        assert_eq!(event.current, VadState::Speaking);

        // Nothing forwarded yet: the tail from 0 covers the lead-in
        // sample buffered before confirmation plus the confirming one.
        assert_eq!(sm.accumulated_tail(0), vec![1.0, 2.0]);
        // Only the newest sample is left once the lead-in has already
        // been forwarded.
        assert_eq!(sm.accumulated_tail(1), vec![2.0]);
        assert!(sm.accumulated_tail(2).is_empty());
    }

    #[test]
    fn finalizes_and_delivers_audio_on_silence_after_pause() {
        let sm = VadStateMachine::new(test_config());
        let finalized = Arc::new(StdMutex::new(Vec::new()));
        let finalized_clone = finalized.clone();
        sm.set_utterance_callback(Box::new(move |utterance| {
            finalized_clone.lock().unwrap().push(utterance);
        }));

        sm.process(0.9, &[1.0]);
        sleep(Duration::from_millis(25));
        sm.process(0.9, &[2.0]);
        assert_eq!(sm.state(), VadState::Speaking);

        sm.process(0.1, &[3.0]);
        assert_eq!(sm.state(), VadState::PauseDetected);

        sleep(Duration::from_millis(25));
        sm.process(0.1, &[4.0]);
        assert_eq!(sm.state(), VadState::Idle);

        let done = finalized.lock().unwrap();
        assert_eq!(done.len(), 1);
        assert_eq!(done[0].accumulated_audio, vec![1.0, 2.0]);
    }

    #[test]
    fn finalized_utterance_carries_the_language_snapshot() {
        let sm = VadStateMachine::new(test_config());
        sm.set_language_snapshot(Box::new(|| {
            (Some("en".to_string()), Some("fr".to_string()), Some("voice-1".to_string()))
        }));
        let finalized = Arc::new(StdMutex::new(Vec::new()));
        let finalized_clone = finalized.clone();
        sm.set_utterance_callback(Box::new(move |utterance| {
            finalized_clone.lock().unwrap().push(utterance);
        }));

        sm.process(0.9, &[1.0]);
        sleep(Duration::from_millis(25));
        sm.process(0.9, &[2.0]);
        sm.process(0.1, &[3.0]);
        assert_eq!(sm.state(), VadState::PauseDetected);
        sleep(Duration::from_millis(25));
        sm.process(0.1, &[4.0]);
        assert_eq!(sm.state(), VadState::Idle);

        let done = finalized.lock().unwrap();
        assert_eq!(done[0].source_language.as_deref(), Some("en"));
        assert_eq!(done[0].target_language.as_deref(), Some("fr"));
        assert_eq!(done[0].voice_id.as_deref(), Some("voice-1"));
    }

    #[test]
    fn resumes_same_utterance_across_brief_pause() {
        let sm = VadStateMachine::new(test_config());
        sm.process(0.9, &[1.0]);
        sleep(Duration::from_millis(25));
        sm.process(0.9, &[2.0]);
        let id_before = sm.current_utterance_id();

        sm.process(0.1, &[3.0]);
        assert_eq!(sm.state(), VadState::PauseDetected);
        sm.process(0.9, &[4.0]);
        assert_eq!(sm.state(), VadState::Speaking);
        assert_eq!(sm.current_utterance_id(), id_before);
    }

    #[test]
    fn max_duration_force_finalizes() {
        let sm = VadStateMachine::new(test_config());
        sm.process(0.9, &[1.0]);
        sleep(Duration::from_millis(25));
        sm.process(0.9, &[2.0]);
        assert_eq!(sm.state(), VadState::Speaking);

        sleep(Duration::from_millis(520));
        let event = sm.process(0.9, &[3.0]).unwrap();
        assert_eq!(event.current, VadState::Idle);
    }

    #[test]
    fn force_end_only_applies_to_speaking_or_pause() {
        let sm = VadStateMachine::new(test_config());
        sm.force_end();
        assert_eq!(sm.state(), VadState::Idle);

        sm.process(0.9, &[1.0]);
        sleep(Duration::from_millis(25));
        sm.process(0.9, &[2.0]);
        assert_eq!(sm.state(), VadState::Speaking);
        sm.force_end();
        assert_eq!(sm.state(), VadState::Idle);
        assert_eq!(sm.current_utterance_id(), NO_UTTERANCE);
    }
}
