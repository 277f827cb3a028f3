//! Core types for the voice agent speech pipeline
//!
//! This crate provides the types shared by `voice-agent-config`,
//! `voice-agent-pipeline` and `voice-agent-server`:
//! - Audio frame and bounded audio buffer types
//! - The error taxonomy shared by the pipeline and server crates
//! - Utterance, transcription request/result, and streaming-state types

pub mod audio;
pub mod error;
pub mod transcription;
pub mod vad;

pub use audio::{
    AudioBuffer, AudioEncoding, AudioFormat, AudioFrame, Channels, SampleRate, PCM16_NORMALIZE,
    PCM16_SCALE,
};
pub use error::{Error, Result};
pub use transcription::{StreamingState, TranscriptionRequest, TranscriptionResult};
pub use vad::{Utterance, VadEvent, VadProbability, VadState, NO_UTTERANCE};
