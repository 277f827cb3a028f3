//! The §6 wire protocol: JSON text messages exchanged over the
//! WebSocket transport. Binary frames (raw PCM16) are handled directly
//! in `websocket.rs` and never pass through here.

use serde::Deserialize;
use serde_json::{json, Value};

/// One inbound `{"type": ..., "data": ...}` message, parsed from a text
/// frame. Unrecognized `type` and unparseable JSON are both handled by
/// the caller (§6 "Messages with unknown type are rejected").
#[derive(Debug)]
pub enum InboundMessage {
    Config(ConfigUpdate),
    EndSession,
    Ping,
    Unknown(String),
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConfigUpdate {
    pub source_lang: Option<String>,
    pub target_lang: Option<String>,
    pub voice: Option<String>,
    pub language_detection_enabled: Option<bool>,
    pub auto_language_switching: Option<bool>,
    pub language_detection_threshold: Option<f32>,
}

#[derive(Debug, Deserialize)]
struct Envelope {
    #[serde(rename = "type")]
    msg_type: String,
    #[serde(default)]
    data: Value,
}

impl InboundMessage {
    /// Parses one text frame. `Ok(None)` means the JSON itself was
    /// malformed — logged and dropped by the caller, not surfaced as a
    /// protocol error (§6 "malformed JSON is logged and dropped").
    pub fn parse(text: &str) -> Option<Self> {
        let envelope: Envelope = serde_json::from_str(text).ok()?;
        Some(match envelope.msg_type.as_str() {
            "config" => {
                let update = serde_json::from_value(envelope.data).unwrap_or_default();
                InboundMessage::Config(update)
            }
            "end_session" => InboundMessage::EndSession,
            "ping" => InboundMessage::Ping,
            other => InboundMessage::Unknown(other.to_string()),
        })
    }
}

/// The coarse client-facing activity state (§4.H "On VAD event").
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClientStatus {
    Idle,
    Listening,
    Thinking,
    #[allow(dead_code)] // reserved: playback status, out of scope for this core
    Speaking,
}

impl ClientStatus {
    fn as_str(&self) -> &'static str {
        match self {
            ClientStatus::Idle => "idle",
            ClientStatus::Listening => "listening",
            ClientStatus::Thinking => "thinking",
            ClientStatus::Speaking => "speaking",
        }
    }
}

/// One outbound message. `to_json` produces the exact `{"type", "data"}`
/// shape of §6's table.
#[derive(Debug, Clone)]
pub enum ServerMessage {
    TranscriptionUpdate {
        utterance_id: u64,
        text: String,
        confidence: f32,
        is_partial: bool,
        start_ms: u64,
        end_ms: u64,
        detected_language: Option<String>,
        language_confidence: Option<f32>,
        language_changed: bool,
    },
    StatusUpdate {
        state: ClientStatus,
        utterance_id: Option<u64>,
    },
    AudioStart {
        utterance_id: u64,
        duration_ms: u64,
    },
    Error {
        message: String,
        code: Option<String>,
        utterance_id: Option<u64>,
    },
    Pong,
    LanguageChange {
        old_language: String,
        new_language: String,
        confidence: f32,
        utterance_id: Option<u64>,
    },
}

impl ServerMessage {
    pub fn to_json(&self) -> Value {
        match self {
            ServerMessage::TranscriptionUpdate {
                utterance_id,
                text,
                confidence,
                is_partial,
                start_ms,
                end_ms,
                detected_language,
                language_confidence,
                language_changed,
            } => json!({
                "type": "transcription_update",
                "data": {
                    "text": text,
                    "utteranceId": utterance_id,
                    "confidence": confidence,
                    "isPartial": is_partial,
                    "startTimeMs": start_ms,
                    "endTimeMs": end_ms,
                    "detectedLanguage": detected_language,
                    "languageConfidence": language_confidence,
                    "languageChanged": language_changed,
                }
            }),
            ServerMessage::StatusUpdate { state, utterance_id } => json!({
                "type": "status_update",
                "data": {
                    "state": state.as_str(),
                    "utteranceId": utterance_id,
                }
            }),
            ServerMessage::AudioStart { utterance_id, duration_ms } => json!({
                "type": "audio_start",
                "data": {
                    "utteranceId": utterance_id,
                    "duration": duration_ms,
                }
            }),
            ServerMessage::Error { message, code, utterance_id } => json!({
                "type": "error",
                "data": {
                    "message": message,
                    "code": code,
                    "utteranceId": utterance_id,
                }
            }),
            ServerMessage::Pong => json!({ "type": "pong" }),
            ServerMessage::LanguageChange { old_language, new_language, confidence, utterance_id } => json!({
                "type": "language_change",
                "data": {
                    "oldLanguage": old_language,
                    "newLanguage": new_language,
                    "confidence": confidence,
                    "utteranceId": utterance_id,
                }
            }),
        }
    }

    pub fn into_text(self) -> String {
        self.to_json().to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_config_message() {
        let msg = InboundMessage::parse(r#"{"type":"config","data":{"sourceLang":"en"}}"#).unwrap();
        match msg {
            InboundMessage::Config(cfg) => assert_eq!(cfg.source_lang.as_deref(), Some("en")),
            other => panic!("unexpected variant: {other:?}"),
        }
    }

    #[test]
    fn unknown_type_is_preserved_for_the_caller_to_reject() {
        let msg = InboundMessage::parse(r#"{"type":"frobnicate"}"#).unwrap();
        assert!(matches!(msg, InboundMessage::Unknown(t) if t == "frobnicate"));
    }

    #[test]
    fn malformed_json_yields_none() {
        assert!(InboundMessage::parse("not json").is_none());
    }

    #[test]
    fn pong_has_no_data_field() {
        let json = ServerMessage::Pong.to_json();
        assert!(json.get("data").is_none());
        assert_eq!(json["type"], "pong");
    }
}
