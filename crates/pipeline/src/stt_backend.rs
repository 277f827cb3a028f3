//! HTTP-backed speech-to-text model (§4.F "the underlying ML model").
//!
//! The worker's `TranscriptionModel` trait is deliberately thin: the
//! acoustic model itself is a replaceable collaborator. This
//! implementation calls a sidecar STT service over HTTP, keeping the
//! heavy model in its own process — this crate only owns the
//! queueing/dedup/rate-limiting engineering around it.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use voice_agent_core::TranscriptionRequest;

use crate::worker::TranscriptionModel;
use voice_agent_core::TranscriptionResult;

#[derive(Debug, Clone)]
pub struct HttpSttConfig {
    /// Base URL of the sidecar STT service.
    pub url: String,
    pub timeout_ms: u64,
}

impl Default for HttpSttConfig {
    fn default() -> Self {
        Self {
            url: "http://127.0.0.1:8090/transcribe".to_string(),
            timeout_ms: 10_000,
        }
    }
}

#[derive(Serialize)]
struct SttRequestBody<'a> {
    audio: &'a [f32],
    sample_rate: u32,
    language: &'a str,
    translate_to_english: bool,
    temperature: f32,
    max_tokens: u32,
}

#[derive(Deserialize)]
struct SttResponseBody {
    text: String,
    confidence: f32,
    #[serde(default)]
    detected_language: Option<String>,
    #[serde(default)]
    language_confidence: Option<f32>,
}

/// Blocking HTTP client, invoked from the worker's dedicated thread
/// (§4.F "not thread-safe... called serially" — a single client, a
/// single in-flight call at a time).
pub struct HttpSttModel {
    client: reqwest::blocking::Client,
    config: HttpSttConfig,
}

impl HttpSttModel {
    pub fn new(config: HttpSttConfig) -> Self {
        let client = reqwest::blocking::Client::builder()
            .timeout(Duration::from_millis(config.timeout_ms))
            .build()
            .expect("reqwest client build is infallible for this configuration");
        Self { client, config }
    }

    fn call(&self, request: &TranscriptionRequest) -> Result<SttResponseBody, String> {
        let body = SttRequestBody {
            audio: &request.audio,
            sample_rate: 16_000,
            language: &request.language,
            translate_to_english: request.translate_to_english,
            temperature: request.temperature,
            max_tokens: request.max_tokens,
        };

        let response = self
            .client
            .post(&self.config.url)
            .json(&body)
            .send()
            .map_err(|e| e.to_string())?;

        if !response.status().is_success() {
            return Err(format!("sidecar returned status {}", response.status()));
        }

        response.json::<SttResponseBody>().map_err(|e| e.to_string())
    }
}

impl TranscriptionModel for HttpSttModel {
    /// For `is_live` requests this backend is non-streaming itself: it
    /// makes one call per request and reports the single response as a
    /// partial (live) or final (non-live) result, matching §4.F
    /// "zero or more partials followed by exactly one final" with the
    /// degenerate zero-partials case.
    fn transcribe(&mut self, request: &TranscriptionRequest) -> Vec<TranscriptionResult> {
        if request.audio.is_empty() {
            return vec![TranscriptionResult {
                text: String::new(),
                confidence: 0.0,
                is_partial: request.is_live,
                start_ms: 0,
                end_ms: 0,
                detected_language: None,
                language_confidence: None,
            }];
        }

        let end_ms = (request.audio.len() as u64 * 1000) / 16_000;

        match self.call(request) {
            Ok(resp) => vec![TranscriptionResult {
                text: resp.text,
                confidence: resp.confidence,
                is_partial: request.is_live,
                start_ms: 0,
                end_ms,
                detected_language: resp.detected_language,
                language_confidence: resp.language_confidence,
            }],
            Err(err) => {
                tracing::warn!(utterance_id = request.utterance_id, error = %err, "stt sidecar call failed");
                vec![TranscriptionResult {
                    text: String::new(),
                    confidence: 0.0,
                    is_partial: false,
                    start_ms: 0,
                    end_ms,
                    detected_language: None,
                    language_confidence: None,
                }]
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_audio_short_circuits_without_a_network_call() {
        let mut model = HttpSttModel::new(HttpSttConfig::default());
        let request = TranscriptionRequest {
            utterance_id: 1,
            audio: vec![],
            is_live: true,
            language: "auto".to_string(),
            translate_to_english: false,
            temperature: 0.0,
            max_tokens: 256,
            callback: Box::new(|_, _| {}),
        };
        let results = model.transcribe(&request);
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].text, "");
        assert!(results[0].is_partial);
    }

    #[test]
    fn unreachable_sidecar_reports_a_final_with_zero_confidence() {
        let mut model = HttpSttModel::new(HttpSttConfig {
            url: "http://127.0.0.1:1/transcribe".to_string(),
            timeout_ms: 200,
        });
        let request = TranscriptionRequest {
            utterance_id: 1,
            audio: vec![0.0; 1600],
            is_live: false,
            language: "auto".to_string(),
            translate_to_english: false,
            temperature: 0.0,
            max_tokens: 256,
            callback: Box::new(|_, _| {}),
        };
        let results = model.transcribe(&request);
        assert_eq!(results.len(), 1);
        assert!(!results[0].is_partial);
        assert_eq!(results[0].confidence, 0.0);
    }
}
