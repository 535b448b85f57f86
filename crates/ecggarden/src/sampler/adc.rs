//! SPI ADC sampler (MCP3001-style 10-bit converter on a spidev node).
//!
//! Each reading is a half-duplex two-byte transfer. The converter clocks out
//! a null bit, ten data bits MSB first, then trailing bits we discard.

use std::fs::{File, OpenOptions};
use std::io::Read;
use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::time::Instant;

use super::Sampler;
use crate::error::{AcquireError, ReadError};
use crate::sample::Sample;

const FRAME_LEN: usize = 2;
const FULL_SCALE: f64 = 1024.0;

/// Extract the 10-bit reading from a raw frame.
pub fn decode_frame(frame: [u8; FRAME_LEN]) -> u16 {
    ((((frame[0] & 0x1F) as u16) << 8) | (frame[1] & 0xFE) as u16) >> 3
}

pub fn raw_to_volts(raw: u16, reference_volts: f64) -> f64 {
    raw as f64 * reference_volts / FULL_SCALE
}

pub struct AdcSampler {
    device: PathBuf,
    reference_volts: f64,
    file: Option<Arc<File>>,
    opened_at: Option<Instant>,
}

impl AdcSampler {
    pub fn new(device: impl Into<PathBuf>, reference_volts: f64) -> Self {
        Self {
            device: device.into(),
            reference_volts,
            file: None,
            opened_at: None,
        }
    }
}

#[async_trait]
impl Sampler for AdcSampler {
    async fn open(&mut self) -> Result<(), AcquireError> {
        let device = self.device.clone();
        let file = tokio::task::spawn_blocking(move || {
            OpenOptions::new().read(true).write(true).open(&device)
        })
        .await
        .map_err(|e| AcquireError::Unavailable(e.to_string()))?
        .map_err(|source| AcquireError::Device {
            device: self.device.clone(),
            source,
        })?;

        tracing::debug!(device = %self.device.display(), "ADC opened");
        self.file = Some(Arc::new(file));
        self.opened_at = Some(Instant::now());
        Ok(())
    }

    async fn read_sample(&mut self) -> Result<Sample, ReadError> {
        let file = self.file.clone().ok_or(ReadError::NotOpen)?;
        let opened_at = self.opened_at.ok_or(ReadError::NotOpen)?;

        let frame = tokio::task::spawn_blocking(move || -> Result<[u8; FRAME_LEN], ReadError> {
            let mut frame = [0u8; FRAME_LEN];
            let got = (&*file).read(&mut frame)?;
            if got != FRAME_LEN {
                return Err(ReadError::ShortRead {
                    expected: FRAME_LEN,
                    got,
                });
            }
            Ok(frame)
        })
        .await
        .map_err(|e| ReadError::Other(e.to_string()))??;

        let volts = raw_to_volts(decode_frame(frame), self.reference_volts);
        Ok(Sample::new(opened_at.elapsed().as_secs_f64(), volts))
    }

    fn close(&mut self) {
        if self.file.take().is_some() {
            tracing::debug!(device = %self.device.display(), "ADC closed");
        }
        self.opened_at = None;
    }
}
