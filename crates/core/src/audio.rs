//! Audio sample types: frames, the format descriptor, and the bounded
//! per-session audio buffer.

use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Supported audio sample rates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum SampleRate {
    /// 8kHz - telephony
    Hz8000,
    /// 16kHz - standard speech recognition, the only rate v1 accepts over the wire
    #[default]
    Hz16000,
    /// 22.05kHz
    Hz22050,
    /// 44.1kHz - CD quality
    Hz44100,
    /// 48kHz
    Hz48000,
}

impl SampleRate {
    pub fn as_u32(&self) -> u32 {
        match self {
            SampleRate::Hz8000 => 8000,
            SampleRate::Hz16000 => 16000,
            SampleRate::Hz22050 => 22050,
            SampleRate::Hz44100 => 44100,
            SampleRate::Hz48000 => 48000,
        }
    }

    /// Maps a raw sample rate to the closest supported variant, falling
    /// back to `Hz16000` for anything unrecognized rather than panicking.
    pub fn from_u32(hz: u32) -> Self {
        match hz {
            8000 => SampleRate::Hz8000,
            16000 => SampleRate::Hz16000,
            22050 => SampleRate::Hz22050,
            44100 => SampleRate::Hz44100,
            48000 => SampleRate::Hz48000,
            _ => SampleRate::Hz16000,
        }
    }

    pub fn frame_size_20ms(&self) -> usize {
        (self.as_u32() as usize * 20) / 1000
    }

    pub fn frame_size_10ms(&self) -> usize {
        (self.as_u32() as usize * 10) / 1000
    }

    pub fn samples_per_ms(&self) -> usize {
        self.as_u32() as usize / 1000
    }
}

/// Audio encoding formats. The wire protocol only ever uses `Pcm16`; the
/// other variants exist because `AudioFrame` is also used internally once
/// samples have been converted to float.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum AudioEncoding {
    /// 16-bit signed PCM, little-endian
    Pcm16,
    /// 32-bit float, internal representation
    #[default]
    PcmF32,
}

/// Audio channel configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum Channels {
    #[default]
    Mono,
    Stereo,
}

impl Channels {
    pub fn count(&self) -> usize {
        match self {
            Channels::Mono => 1,
            Channels::Stereo => 2,
        }
    }
}

/// Audio format descriptor for a session. Set on the first binary frame
/// received and immutable afterward for the session's lifetime — the core
/// does not support a sample rate change mid-session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AudioFormat {
    pub sample_rate: SampleRate,
    pub channels: Channels,
    pub bits_per_sample: u8,
    pub chunk_size_samples: usize,
}

impl Default for AudioFormat {
    fn default() -> Self {
        Self {
            sample_rate: SampleRate::Hz16000,
            channels: Channels::Mono,
            bits_per_sample: 16,
            chunk_size_samples: 0,
        }
    }
}

/// A frame of audio samples with metadata, normalized to f32 in [-1.0, 1.0].
#[derive(Clone)]
pub struct AudioFrame {
    pub samples: Arc<[f32]>,
    pub sample_rate: SampleRate,
    pub channels: Channels,
    pub sequence: u64,
    pub timestamp: Instant,
    pub duration: Duration,
    pub vad_probability: Option<f32>,
    pub is_speech: bool,
    pub energy_db: f32,
}

impl std::fmt::Debug for AudioFrame {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AudioFrame")
            .field("samples_len", &self.samples.len())
            .field("sample_rate", &self.sample_rate)
            .field("channels", &self.channels)
            .field("sequence", &self.sequence)
            .field("duration", &self.duration)
            .field("vad_probability", &self.vad_probability)
            .field("is_speech", &self.is_speech)
            .field("energy_db", &self.energy_db)
            .finish()
    }
}

/// Exact PCM16 <-> f32 scale. Division is by 32768 per the wire spec;
/// encoding uses 32767 so the round trip of the smallest negative sample
/// stays in range.
pub const PCM16_NORMALIZE: f32 = 32768.0;
pub const PCM16_SCALE: f32 = 32767.0;

impl AudioFrame {
    pub fn new(samples: Vec<f32>, sample_rate: SampleRate, channels: Channels, sequence: u64) -> Self {
        let duration = Duration::from_secs_f64(
            samples.len() as f64 / (sample_rate.as_u32() as f64 * channels.count() as f64),
        );
        let energy_db = Self::calculate_energy_db(&samples);

        Self {
            samples: samples.into(),
            sample_rate,
            channels,
            sequence,
            timestamp: Instant::now(),
            duration,
            vad_probability: None,
            is_speech: false,
            energy_db,
        }
    }

    pub fn with_timestamp(
        samples: Vec<f32>,
        sample_rate: SampleRate,
        channels: Channels,
        sequence: u64,
        timestamp: Instant,
    ) -> Self {
        let mut frame = Self::new(samples, sample_rate, channels, sequence);
        frame.timestamp = timestamp;
        frame
    }

    fn calculate_energy_db(samples: &[f32]) -> f32 {
        if samples.is_empty() {
            return -96.0;
        }
        let sum_squares: f32 = samples.iter().map(|s| s * s).sum();
        let rms = (sum_squares / samples.len() as f32).sqrt();
        if rms > 0.0 {
            20.0 * rms.log10()
        } else {
            -96.0
        }
    }

    /// Decode signed 16-bit little-endian PCM. Trailing odd byte is
    /// dropped by `chunks_exact` — callers enforce "odd byte count is
    /// dropped silently" at the ingestion boundary instead.
    pub fn from_pcm16(bytes: &[u8], sample_rate: SampleRate, channels: Channels, sequence: u64) -> Self {
        let samples: Vec<f32> = bytes
            .chunks_exact(2)
            .map(|chunk| {
                let sample = i16::from_le_bytes([chunk[0], chunk[1]]);
                sample as f32 / PCM16_NORMALIZE
            })
            .collect();

        Self::new(samples, sample_rate, channels, sequence)
    }

    pub fn to_pcm16(&self) -> Vec<u8> {
        self.samples
            .iter()
            .flat_map(|&sample| {
                let clamped = sample.clamp(-1.0, 1.0);
                let pcm16 = (clamped * PCM16_SCALE) as i16;
                pcm16.to_le_bytes()
            })
            .collect()
    }

    /// High-quality resampling via Rubato's FFT-based resampler, with a
    /// linear-interpolation fallback for very short frames (where the
    /// sinc resampler's minimum chunk requirements can't be met) or if
    /// Rubato itself errors.
    pub fn resample(&self, target_rate: SampleRate) -> Self {
        use rubato::{FftFixedIn, Resampler};

        if self.sample_rate == target_rate {
            return self.clone();
        }

        let from_rate = self.sample_rate.as_u32() as usize;
        let to_rate = target_rate.as_u32() as usize;
        let samples_f64: Vec<f64> = self.samples.iter().map(|&s| s as f64).collect();

        if self.samples.len() < 64 {
            return self.resample_linear(target_rate);
        }

        let chunk_size = self.samples.len().min(1024);

        match FftFixedIn::<f64>::new(from_rate, to_rate, chunk_size, 2, 1) {
            Ok(mut resampler) => {
                let input_frames = vec![samples_f64];
                match resampler.process(&input_frames, None) {
                    Ok(output_frames) => {
                        let resampled: Vec<f32> = output_frames[0].iter().map(|&s| s as f32).collect();
                        Self::new(resampled, target_rate, self.channels, self.sequence)
                    }
                    Err(e) => {
                        tracing::warn!(error = %e, "rubato resample failed, using linear fallback");
                        self.resample_linear(target_rate)
                    }
                }
            }
            Err(e) => {
                tracing::warn!(error = %e, "rubato init failed, using linear fallback");
                self.resample_linear(target_rate)
            }
        }
    }

    fn resample_linear(&self, target_rate: SampleRate) -> Self {
        let ratio = target_rate.as_u32() as f64 / self.sample_rate.as_u32() as f64;
        let new_len = (self.samples.len() as f64 * ratio) as usize;

        let mut resampled = Vec::with_capacity(new_len);
        for i in 0..new_len {
            let src_idx = i as f64 / ratio;
            let idx_floor = src_idx.floor() as usize;
            let idx_ceil = (idx_floor + 1).min(self.samples.len().saturating_sub(1));
            let frac = src_idx - idx_floor as f64;

            let sample =
                self.samples[idx_floor] * (1.0 - frac as f32) + self.samples[idx_ceil] * frac as f32;
            resampled.push(sample);
        }

        Self::new(resampled, target_rate, self.channels, self.sequence)
    }

    pub fn to_mono(&self) -> Self {
        if self.channels == Channels::Mono {
            return self.clone();
        }
        let mono_samples: Vec<f32> = self
            .samples
            .chunks_exact(2)
            .map(|chunk| (chunk[0] + chunk[1]) / 2.0)
            .collect();
        Self::new(mono_samples, self.sample_rate, Channels::Mono, self.sequence)
    }

    pub fn duration_ms(&self) -> u64 {
        self.duration.as_millis() as u64
    }

    pub fn is_likely_silence(&self, threshold_db: f32) -> bool {
        self.energy_db < threshold_db
    }
}

/// Bounded, append-only audio buffer. Implements the operations in
/// §4.A: `append`, `latest`, `drain_window`, `total_samples` /
/// `overflow_count`, `clear`.
///
/// `drain_window` maintains its own read cursor over the logical,
/// ever-appended sample stream so repeated calls hand back successive,
/// non-overlapping windows; `latest` is independent of that cursor and
/// always reads from the current tail.
#[derive(Debug)]
pub struct AudioBuffer {
    samples: VecDeque<f32>,
    capacity: usize,
    /// Absolute index (into the logical, ever-appended stream) of `samples[0]`.
    base_absolute: u64,
    /// Total samples ever appended (monotonic, survives `clear()`).
    total_samples: u64,
    /// Count of samples dropped due to overflow (monotonic, survives `clear()`).
    overflow_count: u64,
    /// Absolute index up to which `drain_window` has consumed.
    drain_cursor: u64,
}

impl AudioBuffer {
    /// `capacity` is expressed directly in samples (mono 16kHz samples for
    /// this wire protocol); callers derive it from `capacity_seconds *
    /// sample_rate`.
    pub fn new(capacity: usize) -> Self {
        Self {
            samples: VecDeque::with_capacity(capacity),
            capacity,
            base_absolute: 0,
            total_samples: 0,
            overflow_count: 0,
            drain_cursor: 0,
        }
    }

    /// Append samples at the tail. Drops the oldest samples on overflow
    /// and counts them.
    pub fn append(&mut self, chunk: &[f32]) {
        self.samples.extend(chunk.iter().copied());
        self.total_samples += chunk.len() as u64;

        if self.samples.len() > self.capacity {
            let excess = self.samples.len() - self.capacity;
            for _ in 0..excess {
                self.samples.pop_front();
            }
            self.base_absolute += excess as u64;
            self.overflow_count += excess as u64;
            // A drain cursor that fell behind the dropped region jumps
            // forward with it rather than re-reading stale data.
            if self.drain_cursor < self.base_absolute {
                self.drain_cursor = self.base_absolute;
            }
        }
    }

    /// Up to `n` most-recent samples, in order. Never blocks, never
    /// advances the drain cursor.
    pub fn latest(&self, n: usize) -> Vec<f32> {
        let take = n.min(self.samples.len());
        self.samples.iter().skip(self.samples.len() - take).copied().collect()
    }

    /// The next unconsumed `w`-sized window, if one is available.
    pub fn drain_window(&mut self, w: usize) -> Option<Vec<f32>> {
        if w == 0 {
            return None;
        }
        let available_end = self.base_absolute + self.samples.len() as u64;
        if self.drain_cursor + w as u64 > available_end {
            return None;
        }
        let start = (self.drain_cursor - self.base_absolute) as usize;
        let window: Vec<f32> = self.samples.iter().skip(start).take(w).copied().collect();
        self.drain_cursor += w as u64;
        Some(window)
    }

    pub fn total_samples(&self) -> u64 {
        self.total_samples
    }

    pub fn overflow_count(&self) -> u64 {
        self.overflow_count
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// Discards buffered contents. `total_samples`/`overflow_count`
    /// persist — they are reset only by `reset()`.
    pub fn clear(&mut self) {
        self.base_absolute += self.samples.len() as u64;
        self.samples.clear();
        if self.drain_cursor < self.base_absolute {
            self.drain_cursor = self.base_absolute;
        }
    }

    /// Full reset, including the statistics `clear()` preserves.
    pub fn reset(&mut self) {
        self.samples.clear();
        self.base_absolute = 0;
        self.total_samples = 0;
        self.overflow_count = 0;
        self.drain_cursor = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sample_rate_conversions() {
        assert_eq!(SampleRate::Hz16000.as_u32(), 16000);
        assert_eq!(SampleRate::Hz16000.frame_size_10ms(), 160);
        assert_eq!(SampleRate::Hz16000.frame_size_20ms(), 320);
    }

    #[test]
    fn test_audio_frame_from_pcm16() {
        let pcm16: Vec<u8> = vec![0x00, 0x40, 0x00, 0xC0];
        let frame = AudioFrame::from_pcm16(&pcm16, SampleRate::Hz16000, Channels::Mono, 0);

        assert_eq!(frame.samples.len(), 2);
        assert!(frame.samples[0] > 0.0);
        assert!(frame.samples[1] < 0.0);
    }

    #[test]
    fn test_pcm16_round_trip() {
        let original: Vec<i16> = vec![0, 1, -1, 32767, -32768, 12345, -12345];
        let bytes: Vec<u8> = original.iter().flat_map(|s| s.to_le_bytes()).collect();

        let frame = AudioFrame::from_pcm16(&bytes, SampleRate::Hz16000, Channels::Mono, 0);
        let re_encoded = frame.to_pcm16();

        let decoded: Vec<i16> = re_encoded
            .chunks_exact(2)
            .map(|c| i16::from_le_bytes([c[0], c[1]]))
            .collect();

        // -32768 cannot round-trip exactly through the 32767 encode scale;
        // every other value in the i16 range does.
        for (orig, got) in original.iter().zip(decoded.iter()) {
            if *orig == i16::MIN {
                assert!((*got as i32 - *orig as i32).abs() <= 1);
            } else {
                assert_eq!(orig, got);
            }
        }
    }

    #[test]
    fn test_audio_frame_resample() {
        let samples = vec![0.0f32; 160];
        let frame = AudioFrame::new(samples, SampleRate::Hz16000, Channels::Mono, 0);

        let resampled = frame.resample(SampleRate::Hz8000);
        assert_eq!(resampled.samples.len(), 80);
    }

    #[test]
    fn test_energy_calculation() {
        let silent = AudioFrame::new(vec![0.0; 160], SampleRate::Hz16000, Channels::Mono, 0);
        assert!(silent.energy_db < -90.0);

        let loud = AudioFrame::new(vec![0.5; 160], SampleRate::Hz16000, Channels::Mono, 0);
        assert!(loud.energy_db > -10.0);
    }

    #[test]
    fn test_append_and_latest() {
        let mut buf = AudioBuffer::new(100);
        buf.append(&[1.0, 2.0, 3.0]);
        buf.append(&[4.0, 5.0]);

        assert_eq!(buf.latest(2), vec![4.0, 5.0]);
        assert_eq!(buf.latest(100), vec![1.0, 2.0, 3.0, 4.0, 5.0]);
        assert_eq!(buf.total_samples(), 5);
        assert_eq!(buf.overflow_count(), 0);
    }

    #[test]
    fn test_overflow_drops_oldest() {
        let mut buf = AudioBuffer::new(3);
        buf.append(&[1.0, 2.0, 3.0]);
        buf.append(&[4.0, 5.0]);

        assert_eq!(buf.len(), 3);
        assert_eq!(buf.latest(3), vec![3.0, 4.0, 5.0]);
        assert_eq!(buf.total_samples(), 5);
        assert_eq!(buf.overflow_count(), 2);
    }

    #[test]
    fn test_drain_window_sequential() {
        let mut buf = AudioBuffer::new(100);
        buf.append(&[1.0, 2.0, 3.0, 4.0, 5.0]);

        assert_eq!(buf.drain_window(2), Some(vec![1.0, 2.0]));
        assert_eq!(buf.drain_window(2), Some(vec![3.0, 4.0]));
        assert_eq!(buf.drain_window(2), None); // only one sample left
        buf.append(&[6.0]);
        assert_eq!(buf.drain_window(2), Some(vec![5.0, 6.0]));
    }

    #[test]
    fn test_clear_preserves_statistics() {
        let mut buf = AudioBuffer::new(10);
        buf.append(&[1.0, 2.0, 3.0]);
        buf.clear();

        assert_eq!(buf.len(), 0);
        assert_eq!(buf.total_samples(), 3);

        buf.append(&[4.0]);
        assert_eq!(buf.latest(10), vec![4.0]);
    }

    #[test]
    fn test_reset_clears_statistics() {
        let mut buf = AudioBuffer::new(3);
        buf.append(&[1.0, 2.0, 3.0, 4.0]);
        buf.reset();

        assert_eq!(buf.total_samples(), 0);
        assert_eq!(buf.overflow_count(), 0);
        assert_eq!(buf.len(), 0);
    }
}
