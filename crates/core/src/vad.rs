//! VAD state and utterance types shared between the pipeline and server
//! crates (§3, §4.E).

use serde::{Deserialize, Serialize};
use std::time::Instant;

/// Utterance id 0 is reserved for "no utterance active".
pub const NO_UTTERANCE: u64 = 0;

/// The four-state utterance segmentation state machine (§4.E). No other
/// terminal state exists; session shutdown forces `Idle` via reset.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum VadState {
    #[default]
    Idle,
    SpeechDetected,
    Speaking,
    PauseDetected,
}

impl VadState {
    /// Whether the state machine is actively buffering utterance audio
    /// in this state (§4.E "Utterance audio buffering").
    pub fn is_buffering(&self) -> bool {
        matches!(self, VadState::SpeechDetected | VadState::Speaking | VadState::PauseDetected)
    }
}

/// Speech probability in [0, 1]. `FAILURE` is the sentinel the ML VAD
/// session returns on inference failure (§3 "VAD probability").
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct VadProbability(f32);

impl VadProbability {
    pub const FAILURE: f32 = -1.0;

    /// Clamps `value` into [0, 1], unless it is exactly the failure
    /// sentinel, which passes through unchanged.
    pub fn new(value: f32) -> Self {
        if value == Self::FAILURE {
            return Self(Self::FAILURE);
        }
        Self(value.clamp(0.0, 1.0))
    }

    pub fn failure() -> Self {
        Self(Self::FAILURE)
    }

    pub fn is_failure(&self) -> bool {
        self.0 == Self::FAILURE
    }

    pub fn value(&self) -> f32 {
        self.0
    }

    /// The non-negative probability, substituting 0.0 for a failure
    /// sentinel (the ML-only engine contract: "if it fails, still
    /// return 0").
    pub fn or_zero(&self) -> f32 {
        if self.is_failure() {
            0.0
        } else {
            self.0
        }
    }
}

/// A VAD transition event, emitted on every accepted state change
/// (§4.E "Event emission").
#[derive(Debug, Clone, Copy)]
pub struct VadEvent {
    pub previous: VadState,
    pub current: VadState,
    pub confidence: f32,
    pub utterance_id: u64,
    pub timestamp: Instant,
}

/// A bounded span of detected speech, identified by a monotonic id
/// (§3 "Utterance", §GLOSSARY).
#[derive(Debug, Clone)]
pub struct Utterance {
    pub id: u64,
    pub started_at: Instant,
    pub accumulated_audio: Vec<f32>,
    pub source_language: Option<String>,
    pub target_language: Option<String>,
    pub voice_id: Option<String>,
}

impl Utterance {
    pub fn new(
        id: u64,
        source_language: Option<String>,
        target_language: Option<String>,
        voice_id: Option<String>,
    ) -> Self {
        Self {
            id,
            started_at: Instant::now(),
            accumulated_audio: Vec::new(),
            source_language,
            target_language,
            voice_id,
        }
    }

    pub fn append_audio(&mut self, samples: &[f32]) {
        self.accumulated_audio.extend_from_slice(samples);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn probability_clamps_into_range() {
        assert_eq!(VadProbability::new(1.5).value(), 1.0);
        assert_eq!(VadProbability::new(-0.5).value(), 0.0);
        assert_eq!(VadProbability::new(0.42).value(), 0.42);
    }

    #[test]
    fn failure_sentinel_passes_through() {
        let p = VadProbability::new(VadProbability::FAILURE);
        assert!(p.is_failure());
        assert_eq!(p.or_zero(), 0.0);
    }

    #[test]
    fn buffering_states() {
        assert!(!VadState::Idle.is_buffering());
        assert!(VadState::SpeechDetected.is_buffering());
        assert!(VadState::Speaking.is_buffering());
        assert!(VadState::PauseDetected.is_buffering());
    }
}
