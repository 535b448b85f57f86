//! A capture window as mono 16-bit PCM, one frame per sample.

use std::io::Cursor;

use chrono::{DateTime, Utc};

use super::Renderer;
use crate::error::RenderError;
use crate::key::SessionKey;
use crate::sample::Sample;

#[derive(Debug, Clone)]
pub struct WavRenderer {
    sample_rate_hz: u32,
    reference_volts: f64,
}

impl WavRenderer {
    pub fn new(sample_rate_hz: u32, reference_volts: f64) -> Self {
        Self {
            sample_rate_hz: sample_rate_hz.max(1),
            reference_volts,
        }
    }

    /// Map `0..=reference_volts` linearly onto the full i16 range.
    fn to_pcm(&self, volts: f64) -> i16 {
        let unit = (volts / self.reference_volts).clamp(0.0, 1.0);
        ((unit * 2.0 - 1.0) * i16::MAX as f64).round() as i16
    }
}

impl Renderer for WavRenderer {
    fn render(
        &self,
        window: &[Sample],
        _key: &SessionKey,
        _at: DateTime<Utc>,
    ) -> Result<Vec<u8>, RenderError> {
        if window.is_empty() {
            return Err(RenderError::EmptyWindow);
        }

        let spec = hound::WavSpec {
            channels: 1,
            sample_rate: self.sample_rate_hz,
            bits_per_sample: 16,
            sample_format: hound::SampleFormat::Int,
        };

        let mut cursor = Cursor::new(Vec::new());
        let mut writer = hound::WavWriter::new(&mut cursor, spec)?;
        for sample in window {
            writer.write_sample(self.to_pcm(sample.value))?;
        }
        writer.finalize()?;

        Ok(cursor.into_inner())
    }

    fn mime_type(&self) -> &'static str {
        "audio/wav"
    }
}
