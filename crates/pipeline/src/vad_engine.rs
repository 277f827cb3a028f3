//! VAD mode selector over the energy and ML detectors (§4.D "VAD Engine").

use parking_lot::Mutex;
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

use voice_agent_core::VadProbability;

use crate::energy_vad::{EnergyVad, EnergyVadConfig};
use crate::error::Result;
use crate::ml_vad::{MlVadConfig, MlVadSession};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VadMode {
    Ml,
    Energy,
    Hybrid,
}

impl From<voice_agent_config::VadMode> for VadMode {
    fn from(mode: voice_agent_config::VadMode) -> Self {
        match mode {
            voice_agent_config::VadMode::Ml => VadMode::Ml,
            voice_agent_config::VadMode::Energy => VadMode::Energy,
            voice_agent_config::VadMode::Hybrid => VadMode::Hybrid,
        }
    }
}

/// Thread-safe running statistics (§4.D "Statistics").
#[derive(Debug, Default)]
pub struct VadEngineStats {
    pub total_chunks: AtomicU64,
    pub ml_success_count: AtomicU64,
    pub energy_fallback_count: AtomicU64,
    /// EMA of per-chunk processing time, in microseconds, fixed-point
    /// scaled by 1000 so it fits an AtomicU64.
    ema_processing_us_x1000: AtomicU64,
    /// EMA of the emitted probability, scaled by 1_000_000.
    ema_probability_x1e6: AtomicU64,
}

const EMA_ALPHA: f64 = 0.1;

impl VadEngineStats {
    fn record(&self, elapsed_us: f64, probability: f32) {
        self.total_chunks.fetch_add(1, Ordering::Relaxed);
        update_ema(&self.ema_processing_us_x1000, elapsed_us * 1000.0);
        update_ema(&self.ema_probability_x1e6, probability as f64 * 1_000_000.0);
    }

    pub fn ema_processing_us(&self) -> f64 {
        self.ema_processing_us_x1000.load(Ordering::Relaxed) as f64 / 1000.0
    }

    pub fn ema_probability(&self) -> f64 {
        self.ema_probability_x1e6.load(Ordering::Relaxed) as f64 / 1_000_000.0
    }
}

fn update_ema(cell: &AtomicU64, sample: f64) {
    let prev = cell.load(Ordering::Relaxed) as f64;
    let next = if prev == 0.0 {
        sample
    } else {
        EMA_ALPHA * sample + (1.0 - EMA_ALPHA) * prev
    };
    cell.store(next.max(0.0) as u64, Ordering::Relaxed);
}

/// Mode-selecting VAD engine wrapping the ML session and/or energy VAD.
pub struct VadEngine {
    mode: Mutex<VadMode>,
    ml: Option<MlVadSession>,
    energy: EnergyVad,
    sample_rate: Mutex<u32>,
    stats: VadEngineStats,
}

impl VadEngine {
    pub fn new(
        mode: VadMode,
        model_path: Option<impl AsRef<Path>>,
        ml_config: MlVadConfig,
        energy_config: EnergyVadConfig,
        sample_rate: u32,
    ) -> Result<Self> {
        let ml = match (&mode, model_path) {
            (VadMode::Energy, _) => None,
            (_, Some(path)) => Some(MlVadSession::new(path, ml_config)?),
            (_, None) => Some(MlVadSession::new("", ml_config)?),
        };

        Ok(Self {
            mode: Mutex::new(mode),
            ml,
            energy: EnergyVad::new(energy_config),
            sample_rate: Mutex::new(sample_rate),
            stats: VadEngineStats::default(),
        })
    }

    /// Processes one window and always returns a usable probability
    /// (§4.D "process(window) -> probability always valid").
    pub fn process(&self, window: &[f32]) -> Result<VadProbability> {
        let start = Instant::now();
        let mode = *self.mode.lock();

        let probability = match mode {
            VadMode::Ml => {
                let ml = self.ml.as_ref().expect("ml session required for VadMode::Ml");
                let prepared = ml.prepare_window(window, *self.sample_rate.lock());
                let prob = ml.process(&prepared);
                if prob.is_failure() {
                    VadProbability::new(0.0)
                } else {
                    self.stats.ml_success_count.fetch_add(1, Ordering::Relaxed);
                    prob
                }
            }
            VadMode::Energy => {
                let score = self.energy.process(window)?;
                VadProbability::new(score)
            }
            VadMode::Hybrid => {
                let ml = self.ml.as_ref().expect("ml session required for VadMode::Hybrid");
                let prepared = ml.prepare_window(window, *self.sample_rate.lock());
                let prob = ml.process(&prepared);
                if prob.is_failure() {
                    self.stats.energy_fallback_count.fetch_add(1, Ordering::Relaxed);
                    let score = self.energy.process(window)?;
                    VadProbability::new(score)
                } else {
                    self.stats.ml_success_count.fetch_add(1, Ordering::Relaxed);
                    prob
                }
            }
        };

        let elapsed_us = start.elapsed().as_secs_f64() * 1_000_000.0;
        self.stats.record(elapsed_us, probability.or_zero());

        Ok(probability)
    }

    pub fn mode(&self) -> VadMode {
        *self.mode.lock()
    }

    pub fn stats(&self) -> &VadEngineStats {
        &self.stats
    }

    /// Reinitializes the ML session's internal state when the session's
    /// sample rate configuration changes (§4.D "Configuration changes").
    pub fn reconfigure_sample_rate(&self, sample_rate: u32) {
        *self.sample_rate.lock() = sample_rate;
        if let Some(ml) = &self.ml {
            ml.reset();
        }
        self.energy.reset();
    }

    pub fn reset(&self) {
        if let Some(ml) = &self.ml {
            ml.reset();
        }
        self.energy.reset();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn silence(n: usize) -> Vec<f32> {
        vec![0.0; n]
    }

    #[test]
    fn energy_mode_never_touches_ml_session() {
        let engine = VadEngine::new(
            VadMode::Energy,
            None::<&str>,
            MlVadConfig::default(),
            EnergyVadConfig::default(),
            16_000,
        )
        .unwrap();
        let prob = engine.process(&silence(512)).unwrap();
        assert!(!prob.is_failure());
        assert_eq!(engine.stats().ml_success_count.load(Ordering::Relaxed), 0);
    }

    #[cfg(not(feature = "onnx"))]
    #[test]
    fn hybrid_mode_falls_back_to_energy_without_onnx_feature() {
        let engine = VadEngine::new(
            VadMode::Hybrid,
            None::<&str>,
            MlVadConfig::default(),
            EnergyVadConfig::default(),
            16_000,
        )
        .unwrap();
        let prob = engine.process(&silence(512)).unwrap();
        assert!(!prob.is_failure());
        assert_eq!(engine.stats().energy_fallback_count.load(Ordering::Relaxed), 1);
    }

    #[cfg(not(feature = "onnx"))]
    #[test]
    fn ml_only_mode_returns_zero_on_failure_and_counts_it() {
        let engine = VadEngine::new(
            VadMode::Ml,
            None::<&str>,
            MlVadConfig::default(),
            EnergyVadConfig::default(),
            16_000,
        )
        .unwrap();
        let prob = engine.process(&silence(512)).unwrap();
        assert_eq!(prob.value(), 0.0);
        assert_eq!(engine.stats().ml_success_count.load(Ordering::Relaxed), 0);
    }

    #[test]
    fn stats_accumulate_across_calls() {
        let engine = VadEngine::new(
            VadMode::Energy,
            None::<&str>,
            MlVadConfig::default(),
            EnergyVadConfig::default(),
            16_000,
        )
        .unwrap();
        for _ in 0..5 {
            engine.process(&silence(512)).unwrap();
        }
        assert_eq!(engine.stats().total_chunks.load(Ordering::Relaxed), 5);
    }
}
