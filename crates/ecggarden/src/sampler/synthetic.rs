//! Deterministic ECG-shaped waveform for development and demos.

use async_trait::async_trait;
use tokio::time::Instant;

use super::Sampler;
use crate::error::{AcquireError, ReadError};
use crate::sample::Sample;

/// Resting level of the trace, mid-scale on a 3.3 V reference.
const BASELINE_VOLTS: f64 = 1.65;

/// One wave of the PQRST complex: position within the beat (0..1),
/// width (fraction of the beat) and amplitude in volts.
const COMPLEX: [(f64, f64, f64); 5] = [
    (0.20, 0.025, 0.15),  // P
    (0.35, 0.008, -0.10), // Q
    (0.375, 0.010, 1.20), // R
    (0.40, 0.008, -0.25), // S
    (0.60, 0.040, 0.30),  // T
];

pub struct SyntheticSampler {
    heart_rate_bpm: f64,
    sample_rate_hz: u32,
    reference_volts: f64,
    opened_at: Option<Instant>,
}

impl SyntheticSampler {
    pub fn new(heart_rate_bpm: f64, sample_rate_hz: u32, reference_volts: f64) -> Self {
        let heart_rate_bpm = if heart_rate_bpm > 0.0 { heart_rate_bpm } else { 72.0 };
        Self {
            heart_rate_bpm,
            sample_rate_hz: sample_rate_hz.max(1),
            reference_volts,
            opened_at: None,
        }
    }

    pub fn sample_rate_hz(&self) -> u32 {
        self.sample_rate_hz
    }

    /// Trace value `t` seconds into the session.
    pub fn value_at(&self, t: f64) -> f64 {
        let period = 60.0 / self.heart_rate_bpm;
        let phase = t.rem_euclid(period) / period;

        let volts = COMPLEX
            .iter()
            .fold(BASELINE_VOLTS, |acc, &(center, width, amplitude)| {
                let d = phase - center;
                acc + amplitude * (-(d * d) / (2.0 * width * width)).exp()
            });

        volts.clamp(0.0, self.reference_volts)
    }
}

#[async_trait]
impl Sampler for SyntheticSampler {
    async fn open(&mut self) -> Result<(), AcquireError> {
        self.opened_at = Some(Instant::now());
        Ok(())
    }

    async fn read_sample(&mut self) -> Result<Sample, ReadError> {
        let opened_at = self.opened_at.ok_or(ReadError::NotOpen)?;
        let t = opened_at.elapsed().as_secs_f64();
        Ok(Sample::new(t, self.value_at(t)))
    }

    fn close(&mut self) {
        self.opened_at = None;
    }
}
