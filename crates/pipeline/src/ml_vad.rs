//! ML-backed VAD session wrapping a pre-trained speech/non-speech model
//! (§4.C "ML VAD Session").
//!
//! Constructed once per session; the ONNX session itself is not
//! thread-safe so all inference goes through a single lock, matching
//! how the Silero VAD model is normally wrapped.

use parking_lot::Mutex;
use std::path::Path;

use voice_agent_core::{AudioFrame, Channels, SampleRate, VadProbability};

use crate::error::{PipelineError, Result};

#[cfg(feature = "onnx")]
use ort::{session::builder::GraphOptimizationLevel, session::Session, value::Tensor};

/// Required input window size and target sample rate for the model.
#[derive(Debug, Clone, Copy)]
pub struct MlVadConfig {
    /// Window size in samples the model expects (512 at 16kHz, §3).
    pub window_samples: usize,
    /// Sample rate the model was trained at.
    pub model_sample_rate: u32,
}

impl Default for MlVadConfig {
    fn default() -> Self {
        Self {
            window_samples: 512,
            model_sample_rate: 16_000,
        }
    }
}

struct MlVadState {
    #[cfg(feature = "onnx")]
    h_state: ndarray::Array2<f32>,
    #[cfg(feature = "onnx")]
    c_state: ndarray::Array2<f32>,
}

pub struct MlVadSession {
    #[cfg(feature = "onnx")]
    session: Mutex<Session>,
    #[cfg(not(feature = "onnx"))]
    _state: Mutex<MlVadState>,
    #[cfg(feature = "onnx")]
    state: Mutex<MlVadState>,
    config: MlVadConfig,
}

impl MlVadSession {
    #[cfg(feature = "onnx")]
    pub fn new(model_path: impl AsRef<Path>, config: MlVadConfig) -> Result<Self> {
        let session = Session::builder()
            .map_err(|e| PipelineError::Model(e.to_string()))?
            .with_optimization_level(GraphOptimizationLevel::Level3)
            .map_err(|e| PipelineError::Model(e.to_string()))?
            .with_intra_threads(1)
            .map_err(|e| PipelineError::Model(e.to_string()))?
            .commit_from_file(model_path)
            .map_err(|e| PipelineError::Model(e.to_string()))?;

        Ok(Self {
            session: Mutex::new(session),
            state: Mutex::new(MlVadState {
                h_state: ndarray::Array2::zeros((2, 64)),
                c_state: ndarray::Array2::zeros((2, 64)),
            }),
            config,
        })
    }

    /// Without the `onnx` feature there is no model to load; every
    /// window is reported as an inference failure so the hybrid engine
    /// falls back to the energy path (§4.D "Hybrid").
    #[cfg(not(feature = "onnx"))]
    pub fn new(_model_path: impl AsRef<Path>, config: MlVadConfig) -> Result<Self> {
        Ok(Self {
            _state: Mutex::new(MlVadState {}),
            config,
        })
    }

    pub fn config(&self) -> MlVadConfig {
        self.config
    }

    /// Prepares `raw` (at `input_sample_rate`) into a fixed-size window
    /// at the model's rate: clamp/pad to `window_samples`, resampling
    /// first if the rates differ (§4.C "Inputs prepared by...").
    pub fn prepare_window(&self, raw: &[f32], input_sample_rate: u32) -> Vec<f32> {
        let resampled = if input_sample_rate != self.config.model_sample_rate {
            let frame = AudioFrame::new(
                raw.to_vec(),
                SampleRate::from_u32(input_sample_rate),
                Channels::Mono,
                0,
            );
            frame
                .resample(SampleRate::from_u32(self.config.model_sample_rate))
                .samples
                .to_vec()
        } else {
            raw.to_vec()
        };

        let mut window = resampled;
        window.resize(self.config.window_samples, 0.0);
        window.truncate(self.config.window_samples);
        window
    }

    /// Runs inference on an already-prepared window of exactly
    /// `window_samples` samples. Returns the failure sentinel on any
    /// model error (§3 "VAD probability").
    #[cfg(feature = "onnx")]
    pub fn process(&self, window: &[f32]) -> VadProbability {
        match self.infer(window) {
            Ok(prob) => VadProbability::new(prob),
            Err(_) => VadProbability::failure(),
        }
    }

    #[cfg(not(feature = "onnx"))]
    pub fn process(&self, _window: &[f32]) -> VadProbability {
        VadProbability::failure()
    }

    #[cfg(feature = "onnx")]
    fn infer(&self, window: &[f32]) -> Result<f32> {
        let input = ndarray::Array2::from_shape_vec((1, window.len()), window.to_vec())
            .map_err(|e| PipelineError::Vad(e.to_string()))?;
        let sr = ndarray::arr1(&[self.config.model_sample_rate as i64]);

        let mut state = self.state.lock();

        let input_tensor =
            Tensor::from_array(input).map_err(|e| PipelineError::Model(e.to_string()))?;
        let sr_tensor =
            Tensor::from_array(sr).map_err(|e| PipelineError::Model(e.to_string()))?;
        let h_tensor = Tensor::from_array(state.h_state.clone())
            .map_err(|e| PipelineError::Model(e.to_string()))?;
        let c_tensor = Tensor::from_array(state.c_state.clone())
            .map_err(|e| PipelineError::Model(e.to_string()))?;

        let mut session = self.session.lock();
        let outputs = session
            .run(ort::inputs![
                "input" => input_tensor,
                "sr" => sr_tensor,
                "h" => h_tensor,
                "c" => c_tensor,
            ])
            .map_err(|e| PipelineError::Model(e.to_string()))?;

        let (_, speech_data) = outputs
            .get("output")
            .ok_or_else(|| PipelineError::Model("missing output tensor".to_string()))?
            .try_extract_tensor::<f32>()
            .map_err(|e| PipelineError::Model(e.to_string()))?;
        let speech_prob = speech_data.first().copied().unwrap_or(0.0);

        if let Some(hn) = outputs.get("hn") {
            let (shape, data) = hn
                .try_extract_tensor::<f32>()
                .map_err(|e| PipelineError::Model(e.to_string()))?;
            let dims: Vec<usize> = shape.iter().map(|&d| d as usize).collect();
            if dims.len() == 2 && data.len() == dims[0] * dims[1] {
                let new_h = ndarray::ArrayView2::from_shape((dims[0], dims[1]), data)
                    .map_err(|e| PipelineError::Model(e.to_string()))?;
                state.h_state.assign(&new_h);
            }
        }
        if let Some(cn) = outputs.get("cn") {
            let (shape, data) = cn
                .try_extract_tensor::<f32>()
                .map_err(|e| PipelineError::Model(e.to_string()))?;
            let dims: Vec<usize> = shape.iter().map(|&d| d as usize).collect();
            if dims.len() == 2 && data.len() == dims[0] * dims[1] {
                let new_c = ndarray::ArrayView2::from_shape((dims[0], dims[1]), data)
                    .map_err(|e| PipelineError::Model(e.to_string()))?;
                state.c_state.assign(&new_c);
            }
        }

        Ok(speech_prob)
    }

    /// Reinitializes hidden state; called when the session's sample
    /// rate configuration changes (§4.D "Configuration changes").
    pub fn reset(&self) {
        #[cfg(feature = "onnx")]
        {
            let mut state = self.state.lock();
            state.h_state.fill(0.0);
            state.c_state.fill(0.0);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn prepare_window_pads_short_input() {
        let session = MlVadSession::new("unused", MlVadConfig::default()).unwrap();
        let raw = vec![0.1f32; 100];
        let window = session.prepare_window(&raw, 16_000);
        assert_eq!(window.len(), 512);
    }

    #[test]
    fn prepare_window_truncates_long_input() {
        let session = MlVadSession::new("unused", MlVadConfig::default()).unwrap();
        let raw = vec![0.1f32; 2000];
        let window = session.prepare_window(&raw, 16_000);
        assert_eq!(window.len(), 512);
    }

    #[cfg(not(feature = "onnx"))]
    #[test]
    fn without_onnx_feature_every_window_is_a_failure() {
        let session = MlVadSession::new("unused", MlVadConfig::default()).unwrap();
        let prob = session.process(&vec![0.5f32; 512]);
        assert!(prob.is_failure());
    }
}
