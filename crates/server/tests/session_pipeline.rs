//! Full-pipeline integration test driving a `Session` the way the
//! websocket transport does: raw PCM16 binary frames in, `ServerMessage`
//! frames out over the broadcast channel. Unit tests closer to each
//! component already cover the state machine and coordinator in
//! isolation (`state_machine.rs`, `coordinator.rs` in the pipeline
//! crate); this exercises the wiring between them through the public
//! `Session` surface.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::broadcast;
use tokio::time::timeout;

use voice_agent_config::Settings;
use voice_agent_pipeline::{HttpSttConfig, HttpSttModel, TranscriptionWorker};
use voice_agent_server::message::{ClientStatus, ServerMessage};
use voice_agent_server::Session;

fn energy_mode_settings() -> Settings {
    let mut settings = Settings::default();
    settings.vad.mode = voice_agent_config::VadMode::Energy;
    settings.vad.min_speech_duration_ms = 20;
    settings.vad.min_silence_duration_ms = 20;
    settings
}

/// Worker pointed at a port nothing listens on, with a short timeout, so
/// the sidecar call fails fast and deterministically (mirrors
/// `stt_backend::tests::unreachable_sidecar_reports_a_final_with_zero_confidence`).
fn unreachable_sidecar_worker() -> Arc<TranscriptionWorker> {
    let model = Box::new(HttpSttModel::new(HttpSttConfig {
        url: "http://127.0.0.1:1/transcribe".to_string(),
        timeout_ms: 200,
    }));
    Arc::new(TranscriptionWorker::start(model, 16, Default::default()))
}

fn loud_frame(n_samples: usize) -> Vec<u8> {
    (0..n_samples)
        .map(|i| (i as f32 * 0.08 * std::f32::consts::TAU).sin() * 0.6 * i16::MAX as f32)
        .flat_map(|s| (s as i16).to_le_bytes())
        .collect()
}

fn silence_frame(n_samples: usize) -> Vec<u8> {
    vec![0u8; n_samples * 2]
}

async fn recv_within(rx: &mut broadcast::Receiver<ServerMessage>, ms: u64) -> Option<ServerMessage> {
    timeout(Duration::from_millis(ms), rx.recv()).await.ok()?.ok()
}

/// A short utterance (speech, then enough silence to close it) produces
/// the status/audio-start/final-transcript sequence a client depends on.
#[tokio::test]
async fn single_utterance_produces_full_message_sequence() {
    let settings = energy_mode_settings();
    let (session, mut rx) =
        Session::new("integration-1".to_string(), &settings, unreachable_sidecar_worker()).unwrap();

    // Drive enough loud frames to cross the speech-confirmation dwell.
    for _ in 0..5 {
        session.ingest_binary(&loud_frame(320));
        tokio::time::sleep(Duration::from_millis(10)).await;
    }

    // Then enough silence to cross the silence-confirmation dwell and
    // close the utterance out.
    for _ in 0..5 {
        session.ingest_binary(&silence_frame(320));
        tokio::time::sleep(Duration::from_millis(10)).await;
    }

    let mut saw_listening = false;
    let mut saw_audio_start = false;
    let mut saw_final_update = false;
    let mut utterance_id = None;

    // Collect everything the session emitted; the final transcript
    // arrives last, after a real (fast-failing) HTTP round trip.
    while let Some(message) = recv_within(&mut rx, 500).await {
        match message {
            ServerMessage::StatusUpdate { state: ClientStatus::Listening, utterance_id: Some(id) } => {
                saw_listening = true;
                utterance_id = Some(id);
            }
            ServerMessage::AudioStart { utterance_id: id, .. } => {
                saw_audio_start = true;
                assert_eq!(Some(id), utterance_id);
            }
            ServerMessage::TranscriptionUpdate { utterance_id: id, is_partial: false, .. } => {
                saw_final_update = true;
                assert_eq!(Some(id), utterance_id);
                break;
            }
            _ => {}
        }
    }

    assert!(saw_listening, "expected a listening status update once speech was confirmed");
    assert!(saw_audio_start, "expected an audio_start once the utterance id was assigned");
    assert!(saw_final_update, "expected a final transcription_update after the sidecar call failed");
}

/// Silence alone never confirms an utterance, so no audio_start or
/// transcript should ever be observed.
#[tokio::test]
async fn silence_only_never_starts_an_utterance() {
    let settings = energy_mode_settings();
    let (session, mut rx) =
        Session::new("integration-2".to_string(), &settings, unreachable_sidecar_worker()).unwrap();

    for _ in 0..20 {
        session.ingest_binary(&silence_frame(320));
    }

    while let Some(message) = recv_within(&mut rx, 50).await {
        assert!(
            !matches!(message, ServerMessage::AudioStart { .. } | ServerMessage::TranscriptionUpdate { .. }),
            "unexpected message from silence-only audio: {message:?}"
        );
    }
}

/// `end_session` while an utterance is active tears the session down
/// without deadlocking or panicking, even with a pending finalize.
#[tokio::test]
async fn end_session_during_active_utterance_shuts_down_cleanly() {
    let settings = energy_mode_settings();
    let (session, _rx) =
        Session::new("integration-3".to_string(), &settings, unreachable_sidecar_worker()).unwrap();

    for _ in 0..5 {
        session.ingest_binary(&loud_frame(320));
        tokio::time::sleep(Duration::from_millis(10)).await;
    }

    let outcome = session.ingest_json(r#"{"type":"end_session"}"#);
    assert_eq!(outcome, voice_agent_server::session::IngestOutcome::Close);
    session.shutdown();
}
