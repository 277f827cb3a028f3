//! Energy-based voice activity detector (§4.B "Energy VAD").
//!
//! Used standalone in `VadMode::Energy` and as the hybrid fallback in
//! `VadMode::Hybrid` when the ML session reports failure.

use parking_lot::Mutex;
use std::collections::VecDeque;

use crate::error::Result;

const HISTORY_LEN: usize = 50;
const MIN_HISTORY_FOR_ADAPTATION: usize = 10;

#[derive(Debug, Clone, Copy)]
pub struct EnergyVadConfig {
    /// Starting / fallback threshold before enough history accumulates.
    pub floor: f32,
    /// `1 - adaptation_rate` is the EMA weight kept from the previous
    /// threshold (§4.B "Adaptive threshold").
    pub adaptation_rate: f32,
    /// Blend in the zero-crossing-rate-derived spectral score.
    pub use_spectral: bool,
}

impl Default for EnergyVadConfig {
    fn default() -> Self {
        Self {
            floor: 0.02,
            adaptation_rate: 0.1,
            use_spectral: true,
        }
    }
}

struct EnergyVadState {
    history: VecDeque<f32>,
    threshold: f32,
}

/// Energy + zero-crossing-rate based VAD, requiring no model.
pub struct EnergyVad {
    config: EnergyVadConfig,
    state: Mutex<EnergyVadState>,
}

impl EnergyVad {
    pub fn new(config: EnergyVadConfig) -> Self {
        Self {
            state: Mutex::new(EnergyVadState {
                history: VecDeque::with_capacity(HISTORY_LEN),
                threshold: config.floor,
            }),
            config,
        }
    }

    /// Processes one window and returns a probability in [0, 1].
    pub fn process(&self, window: &[f32]) -> Result<f32> {
        if window.is_empty() {
            return Ok(0.0);
        }

        let energy = rms_energy(window);
        let mut state = self.state.lock();

        state.history.push_back(energy);
        if state.history.len() > HISTORY_LEN {
            state.history.pop_front();
        }

        if state.history.len() >= MIN_HISTORY_FOR_ADAPTATION {
            let p25 = percentile25(&state.history);
            let alpha = 1.0 - self.config.adaptation_rate;
            state.threshold = alpha * state.threshold + (1.0 - alpha) * (2.0 * p25);
        } else {
            state.threshold = self.config.floor;
        }

        let energy_score = (energy / state.threshold.max(f32::EPSILON)).clamp(0.0, 1.0);

        let score = if self.config.use_spectral {
            let spectral = zero_crossing_score(window);
            0.7 * energy_score + 0.3 * spectral.clamp(0.0, 1.0)
        } else {
            energy_score
        };

        Ok(score.clamp(0.0, 1.0))
    }

    /// Clears history and resets the threshold to the configured floor
    /// (§4.B "Reset").
    pub fn reset(&self) {
        let mut state = self.state.lock();
        state.history.clear();
        state.threshold = self.config.floor;
    }
}

fn rms_energy(samples: &[f32]) -> f32 {
    let sum_sq: f32 = samples.iter().map(|s| s * s).sum();
    (sum_sq / samples.len() as f32).sqrt()
}

/// Zero-crossing rate mapped into a rough [0, 1] "voiced-ness" score.
/// Speech typically sits in a mid zero-crossing band; pure silence and
/// high-frequency noise both sit at the extremes.
fn zero_crossing_score(samples: &[f32]) -> f32 {
    if samples.len() < 2 {
        return 0.0;
    }
    let crossings = samples
        .windows(2)
        .filter(|w| (w[0] >= 0.0) != (w[1] >= 0.0))
        .count();
    let zcr = crossings as f32 / (samples.len() - 1) as f32;

    // Speech typically falls in the 0.02-0.35 zcr band at 16kHz; score
    // peaks there and falls off toward either extreme.
    let target = 0.15;
    let spread = 0.2;
    (1.0 - ((zcr - target).abs() / spread)).clamp(0.0, 1.0)
}

fn percentile25(history: &VecDeque<f32>) -> f32 {
    let mut sorted: Vec<f32> = history.iter().copied().collect();
    sorted.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
    let idx = ((sorted.len() - 1) as f32 * 0.25).floor() as usize;
    sorted[idx]
}

#[cfg(test)]
mod tests {
    use super::*;

    fn silence(n: usize) -> Vec<f32> {
        vec![0.0; n]
    }

    fn tone(n: usize, freq_ratio: f32, amplitude: f32) -> Vec<f32> {
        (0..n)
            .map(|i| amplitude * (2.0 * std::f32::consts::PI * freq_ratio * i as f32).sin())
            .collect()
    }

    #[test]
    fn silence_scores_low() {
        let vad = EnergyVad::new(EnergyVadConfig::default());
        let score = vad.process(&silence(512)).unwrap();
        assert!(score < 0.3, "silence scored {score}");
    }

    #[test]
    fn loud_tone_scores_higher_than_silence() {
        let vad = EnergyVad::new(EnergyVadConfig::default());
        // warm up the adaptive threshold on quiet background first
        for _ in 0..15 {
            vad.process(&tone(512, 0.01, 0.01)).unwrap();
        }
        let loud = vad.process(&tone(512, 0.08, 0.6)).unwrap();
        let quiet = vad.process(&tone(512, 0.01, 0.01)).unwrap();
        assert!(loud > quiet);
    }

    #[test]
    fn reset_clears_adaptive_threshold() {
        let vad = EnergyVad::new(EnergyVadConfig::default());
        for _ in 0..20 {
            vad.process(&tone(512, 0.08, 0.6)).unwrap();
        }
        vad.reset();
        let state = vad.state.lock();
        assert_eq!(state.threshold, vad.config.floor);
        assert!(state.history.is_empty());
    }

    #[test]
    fn empty_window_scores_zero() {
        let vad = EnergyVad::new(EnergyVadConfig::default());
        assert_eq!(vad.process(&[]).unwrap(), 0.0);
    }
}
