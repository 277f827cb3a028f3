//! Per-connection session (§4.H "Session"): owns the Audio Buffer, VAD
//! Engine, VAD State Machine, and this session's handle to the shared
//! Transcription Worker, wiring VAD transitions to client-facing status
//! messages and utterance completion to the Streaming Coordinator.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tokio::sync::broadcast;

use voice_agent_config::Settings;
use voice_agent_core::{Utterance, VadState, NO_UTTERANCE, PCM16_NORMALIZE};
use voice_agent_pipeline::{
    EnergyVadConfig, MlVadConfig, PipelineError, StreamingCoordinator, TranscriptionWorker, VadEngine,
    VadMode, VadStateMachine, VadStateMachineConfig,
};

use crate::message::{ClientStatus, ConfigUpdate, InboundMessage, ServerMessage};
use crate::ServerError;

/// Frames larger than this are truncated rather than rejected (§7
/// "oversized frame - truncated, accounted in statistics"). 10 seconds
/// at 16kHz is already far beyond one realistic wire chunk.
const MAX_FRAME_SAMPLES: usize = 16_000 * 10;
/// Outbound channel depth; the session is the sole publisher and the
/// websocket writer task the sole (normal-case) subscriber.
const OUTBOUND_CHANNEL_CAPACITY: usize = 256;
/// Jitter tolerance absorbed by the state machine's dwell-time checks
/// (§4.E's ε). Not exposed as a configuration knob (§6's configuration
/// surface doesn't list it).
const VAD_JITTER_TOLERANCE_MS: u64 = voice_agent_config::constants::vad::JITTER_TOLERANCE_MS;

/// What the caller (the websocket read loop) should do after an inbound
/// message has been processed.
#[derive(Debug, PartialEq, Eq)]
pub enum IngestOutcome {
    Continue,
    Close,
}

#[derive(Debug, Default, Clone)]
struct SessionConfig {
    source_lang: Option<String>,
    target_lang: Option<String>,
    voice: Option<String>,
    language_detection_enabled: bool,
    auto_language_switching: bool,
    language_detection_threshold: f32,
}

/// State shared between `Session` itself and the closures registered
/// with the VAD state machine and the coordinator, so those closures
/// don't need to borrow back into `Session`.
struct Shared {
    session_id: String,
    outbound: broadcast::Sender<ServerMessage>,
    max_utterance_duration_ms: u64,
    /// Samples already handed to the coordinator for the active
    /// utterance, so the finalize handler only flushes the remainder
    /// the state machine accumulated since the last `add_audio` (§4.H
    /// "after flushing the accumulated audio with add_audio").
    forwarded_samples: Mutex<HashMap<u64, usize>>,
    /// Owned here (rather than on `Session`) so the language-snapshot
    /// closure registered with the state machine can read it without
    /// borrowing back into `Session`.
    config: Mutex<SessionConfig>,
}

impl Shared {
    fn emit(&self, message: ServerMessage) {
        // No subscribers (socket already closed) is a normal race, not
        // an error worth logging.
        let _ = self.outbound.send(message);
    }
}

pub struct Session {
    pub id: String,
    audio: Mutex<voice_agent_core::AudioBuffer>,
    vad_engine: VadEngine,
    state_machine: Arc<VadStateMachine>,
    coordinator: Arc<StreamingCoordinator>,
    worker: Arc<TranscriptionWorker>,
    shared: Arc<Shared>,
    oversized_frames: AtomicU64,
    last_activity: Mutex<Instant>,
}

impl Session {
    pub fn new(
        id: String,
        settings: &Settings,
        worker: Arc<TranscriptionWorker>,
    ) -> Result<(Arc<Self>, broadcast::Receiver<ServerMessage>), ServerError> {
        let (outbound_tx, outbound_rx) = broadcast::channel(OUTBOUND_CHANNEL_CAPACITY);

        let shared = Arc::new(Shared {
            session_id: id.clone(),
            outbound: outbound_tx.clone(),
            max_utterance_duration_ms: settings.vad.max_utterance_duration_ms,
            forwarded_samples: Mutex::new(HashMap::new()),
            config: Mutex::new(SessionConfig::default()),
        });

        // Per-utterance "last detected language" tracking, so the
        // update callback can compute old/new for `language_change`
        // (the coordinator only reports whether it changed, not what
        // it changed from).
        let last_language: Arc<Mutex<HashMap<u64, String>>> = Arc::new(Mutex::new(HashMap::new()));

        let coordinator = {
            let last_language = last_language.clone();
            let outbound_tx = outbound_tx.clone();
            let on_update = Box::new(move |update: voice_agent_pipeline::TranscriptionUpdate| {
                if update.language_changed {
                    if let Some(new_lang) = &update.detected_language {
                        let old_lang = last_language
                            .lock()
                            .insert(update.utterance_id, new_lang.clone())
                            .unwrap_or_default();
                        let _ = outbound_tx.send(ServerMessage::LanguageChange {
                            old_language: old_lang,
                            new_language: new_lang.clone(),
                            confidence: update.language_confidence.unwrap_or(0.0),
                            utterance_id: Some(update.utterance_id),
                        });
                    }
                } else if let Some(new_lang) = &update.detected_language {
                    last_language.lock().entry(update.utterance_id).or_insert_with(|| new_lang.clone());
                }

                let _ = outbound_tx.send(ServerMessage::TranscriptionUpdate {
                    utterance_id: update.utterance_id,
                    text: update.text,
                    confidence: update.confidence,
                    is_partial: update.is_partial,
                    start_ms: update.start_ms,
                    end_ms: update.end_ms,
                    detected_language: update.detected_language,
                    language_confidence: update.language_confidence,
                    language_changed: update.language_changed,
                });
            });
            Arc::new(StreamingCoordinator::new(worker.clone(), settings.coordinator, on_update))
        };

        let vad_engine = VadEngine::new(
            VadMode::from(settings.vad.mode),
            None::<&str>,
            MlVadConfig::default(),
            EnergyVadConfig::default(),
            settings.vad.sample_rate,
        )
        .map_err(ServerError::Pipeline)?;

        let state_machine = Arc::new(VadStateMachine::new(VadStateMachineConfig {
            speech_threshold: settings.vad.speech_threshold,
            silence_threshold: settings.vad.silence_threshold,
            min_speech_duration_ms: settings.vad.min_speech_duration_ms,
            min_silence_duration_ms: settings.vad.min_silence_duration_ms,
            max_utterance_duration_ms: settings.vad.max_utterance_duration_ms,
            jitter_tolerance_ms: VAD_JITTER_TOLERANCE_MS,
        }));

        Self::wire_state_machine(&state_machine, shared.clone(), coordinator.clone(), last_language);

        let capacity = settings.audio_buffer.capacity_samples(settings.vad.sample_rate);
        let session = Arc::new(Self {
            id,
            audio: Mutex::new(voice_agent_core::AudioBuffer::new(capacity)),
            vad_engine,
            state_machine,
            coordinator,
            worker,
            shared,
            oversized_frames: AtomicU64::new(0),
            last_activity: Mutex::new(Instant::now()),
        });

        Ok((session, outbound_rx))
    }

    /// Registers the VAD callbacks that translate state-machine events
    /// into client messages and coordinator calls (§4.H "On VAD event",
    /// "On utterance-complete").
    fn wire_state_machine(
        state_machine: &Arc<VadStateMachine>,
        shared: Arc<Shared>,
        coordinator: Arc<StreamingCoordinator>,
        last_language: Arc<Mutex<HashMap<u64, String>>>,
    ) {
        let snapshot_shared = shared.clone();
        state_machine.set_language_snapshot(Box::new(move || {
            let config = snapshot_shared.config.lock();
            (config.source_lang.clone(), config.target_lang.clone(), config.voice.clone())
        }));

        let vad_shared = shared.clone();
        let vad_coordinator = coordinator.clone();
        state_machine.set_vad_callback(Box::new(move |event| {
            let client_state = match event.current {
                VadState::Idle => ClientStatus::Idle,
                VadState::SpeechDetected | VadState::Speaking => ClientStatus::Listening,
                VadState::PauseDetected => ClientStatus::Thinking,
            };
            let utterance_id = if event.utterance_id == NO_UTTERANCE {
                None
            } else {
                Some(event.utterance_id)
            };
            vad_shared.emit(ServerMessage::StatusUpdate { state: client_state, utterance_id });

            // Speech onset confirmed: SpeechDetected -> Speaking is
            // when the state machine assigns the utterance id.
            if event.previous == VadState::SpeechDetected && event.current == VadState::Speaking {
                crate::metrics::record_utterance_started();
                let language_override = vad_shared.config.lock().source_lang.clone();
                if let Err(err) = vad_coordinator.start(event.utterance_id, Vec::new(), true, language_override) {
                    tracing::warn!(session_id = %vad_shared.session_id, error = %err, "failed to start streaming coordinator");
                }
                vad_shared.emit(ServerMessage::AudioStart {
                    utterance_id: event.utterance_id,
                    duration_ms: vad_shared.max_utterance_duration_ms,
                });
            }
        }));

        let utterance_shared = shared;
        let utterance_coordinator = coordinator;
        state_machine.set_utterance_callback(Box::new(move |utterance: Utterance| {
            let utterance_id = utterance.id;
            let already_forwarded = utterance_shared
                .forwarded_samples
                .lock()
                .remove(&utterance_id)
                .unwrap_or(0);

            if already_forwarded < utterance.accumulated_audio.len() {
                let tail = &utterance.accumulated_audio[already_forwarded..];
                if let Err(err) = utterance_coordinator.add_audio(utterance_id, tail) {
                    tracing::warn!(session_id = %utterance_shared.session_id, error = %err, "failed to flush trailing utterance audio");
                }
            }

            if let Err(err) = utterance_coordinator.finalize(utterance_id) {
                tracing::warn!(session_id = %utterance_shared.session_id, error = %err, "failed to finalize utterance");
                // §7 "queue-full on a final is a hard error surfaced to
                // the client" - unlike the newest-incremental-drop
                // backpressure in `add_audio`, a failed final can't be
                // silently swallowed, since it's the one the client
                // trusts to arrive.
                let code = match &err {
                    PipelineError::QueueFull => "QUEUE_FULL",
                    PipelineError::WorkerStopped => "WORKER_STOPPED",
                    _ => "FINALIZE_ERROR",
                };
                utterance_shared.emit(ServerMessage::Error {
                    message: err.to_string(),
                    code: Some(code.to_string()),
                    utterance_id: Some(utterance_id),
                });
            }
            last_language.lock().remove(&utterance_id);
        }));
    }

    pub fn idle_for(&self) -> Duration {
        self.last_activity.lock().elapsed()
    }

    fn touch(&self) {
        *self.last_activity.lock() = Instant::now();
    }

    /// Idempotent configuration update (§4.H "configure"). Snapshotted
    /// values take effect at the next utterance start: the language
    /// snapshot taken when an utterance id is assigned is carried on
    /// that `Utterance` and threaded through the coordinator per
    /// request, so a `configure` call from one session can't bleed
    /// into another session's in-flight utterance even though the
    /// transcription worker itself is process-wide (§5 "shared by all
    /// sessions"). `worker.set_language` still sets the worker's
    /// process-wide default for requests with no per-utterance
    /// override.
    pub fn configure(&self, update: ConfigUpdate) {
        let mut config = self.shared.config.lock();
        if let Some(v) = update.source_lang {
            self.worker.set_language(v.clone());
            config.source_lang = Some(v);
        }
        if let Some(v) = update.target_lang {
            config.target_lang = Some(v);
        }
        if let Some(v) = update.voice {
            config.voice = Some(v);
        }
        if let Some(v) = update.language_detection_enabled {
            config.language_detection_enabled = v;
        }
        if let Some(v) = update.auto_language_switching {
            config.auto_language_switching = v;
        }
        if let Some(v) = update.language_detection_threshold {
            config.language_detection_threshold = v;
        }
    }

    /// Converts PCM16 bytes to float samples, appends to the Audio
    /// Buffer, and forwards the chunk through the VAD Engine and State
    /// Machine, plus to the Streaming Coordinator while speaking
    /// (§4.H "ingest_binary").
    pub fn ingest_binary(&self, bytes: &[u8]) {
        if bytes.is_empty() || bytes.len() % 2 != 0 {
            tracing::debug!(session_id = %self.id, len = bytes.len(), "dropping malformed audio frame");
            return;
        }

        let mut samples: Vec<f32> = bytes
            .chunks_exact(2)
            .map(|c| i16::from_le_bytes([c[0], c[1]]) as f32 / PCM16_NORMALIZE)
            .collect();

        if samples.len() > MAX_FRAME_SAMPLES {
            self.oversized_frames.fetch_add(1, Ordering::Relaxed);
            samples.truncate(MAX_FRAME_SAMPLES);
        }

        self.touch();
        self.audio.lock().append(&samples);

        match self.vad_engine.process(&samples) {
            Ok(probability) => {
                self.state_machine.process(probability.or_zero(), &samples);
            }
            Err(err) => {
                tracing::warn!(session_id = %self.id, error = %err, "vad processing failed for this window");
            }
        }

        if self.state_machine.state() == VadState::Speaking {
            let utterance_id = self.state_machine.current_utterance_id();
            if utterance_id != NO_UTTERANCE {
                let mut forwarded = self.shared.forwarded_samples.lock();
                let already_forwarded = forwarded.get(&utterance_id).copied().unwrap_or(0);
                // The accumulator includes the SpeechDetected lead-in
                // buffered before the utterance id was confirmed, so the
                // first Speaking chunk's tail covers that onset audio
                // too, not just this call's `samples`.
                let tail = self.state_machine.accumulated_tail(already_forwarded);
                if !tail.is_empty() && self.coordinator.add_audio(utterance_id, &tail).is_ok() {
                    forwarded.insert(utterance_id, already_forwarded + tail.len());
                }
            }
        }
    }

    /// Dispatches a parsed protocol message (§4.H "ingest_json", §6).
    pub fn ingest_json(&self, text: &str) -> IngestOutcome {
        self.touch();
        let Some(message) = InboundMessage::parse(text) else {
            tracing::debug!(session_id = %self.id, "dropping malformed json message");
            return IngestOutcome::Continue;
        };

        match message {
            InboundMessage::Config(update) => {
                self.configure(update);
                IngestOutcome::Continue
            }
            InboundMessage::Ping => {
                self.shared.emit(ServerMessage::Pong);
                IngestOutcome::Continue
            }
            InboundMessage::EndSession => IngestOutcome::Close,
            InboundMessage::Unknown(msg_type) => {
                self.shared.emit(ServerMessage::Error {
                    message: format!("unrecognized message type: {msg_type}"),
                    code: Some("UNKNOWN_MESSAGE_TYPE".to_string()),
                    utterance_id: None,
                });
                IngestOutcome::Continue
            }
        }
    }

    /// Cancels any pending utterance, drops buffers, and disconnects
    /// (§4.H "Shutdown").
    pub fn shutdown(&self) {
        let utterance_id = self.state_machine.current_utterance_id();
        if utterance_id != NO_UTTERANCE {
            self.coordinator.cancel(utterance_id);
        }
        self.state_machine.reset();
        self.audio.lock().clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use voice_agent_pipeline::{HttpSttConfig, HttpSttModel};

    fn test_settings() -> Settings {
        let mut settings = Settings::default();
        settings.vad.mode = voice_agent_config::VadMode::Energy;
        settings
    }

    fn test_worker() -> Arc<TranscriptionWorker> {
        let model = Box::new(HttpSttModel::new(HttpSttConfig::default()));
        Arc::new(TranscriptionWorker::start(model, 16, Default::default()))
    }

    #[test]
    fn malformed_frames_are_dropped_without_touching_the_buffer() {
        let settings = test_settings();
        let (session, _rx) = Session::new("s1".to_string(), &settings, test_worker()).unwrap();
        session.ingest_binary(&[0x01]); // odd length
        session.ingest_binary(&[]); // empty
        assert_eq!(session.audio.lock().total_samples(), 0);
    }

    #[test]
    fn silence_never_reaches_speaking_state() {
        let settings = test_settings();
        let (session, _rx) = Session::new("s2".to_string(), &settings, test_worker()).unwrap();
        let silence = vec![0u8; 640]; // 320 samples of zeroed PCM16
        for _ in 0..20 {
            session.ingest_binary(&silence);
        }
        assert_eq!(session.state_machine.state(), VadState::Idle);
    }

    #[test]
    fn end_session_message_requests_close() {
        let settings = test_settings();
        let (session, _rx) = Session::new("s3".to_string(), &settings, test_worker()).unwrap();
        let outcome = session.ingest_json(r#"{"type":"end_session"}"#);
        assert_eq!(outcome, IngestOutcome::Close);
    }

    #[test]
    fn ping_elicits_pong_without_closing() {
        let settings = test_settings();
        let (session, mut rx) = Session::new("s4".to_string(), &settings, test_worker()).unwrap();
        let outcome = session.ingest_json(r#"{"type":"ping"}"#);
        assert_eq!(outcome, IngestOutcome::Continue);
        let received = rx.try_recv().unwrap();
        assert!(matches!(received, ServerMessage::Pong));
    }
}
