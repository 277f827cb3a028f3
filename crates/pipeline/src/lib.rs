//! Per-session audio pipeline: VAD, the VAD state machine, the
//! transcription worker and the streaming coordinator (§4).
//!
//! Library crate — never installs a `tracing` subscriber, only emits
//! through it.

pub mod coordinator;
pub mod energy_vad;
pub mod error;
pub mod ml_vad;
pub mod stt_backend;
pub mod state_machine;
pub mod vad_engine;
pub mod worker;

pub use coordinator::{StreamingCoordinator, TranscriptionUpdate};
pub use energy_vad::{EnergyVad, EnergyVadConfig};
pub use error::{PipelineError, Result};
pub use ml_vad::{MlVadConfig, MlVadSession};
pub use state_machine::{VadCallback, VadStateMachine, VadStateMachineConfig};
pub use stt_backend::{HttpSttConfig, HttpSttModel};
pub use vad_engine::{VadEngine, VadEngineStats, VadMode};
pub use worker::{TranscriptionModel, TranscriptionWorker, WorkerConfig};
