//! Sample sources.
//!
//! A [`Sampler`] is opened once per session, read at the capture rate and
//! closed on every exit path. [`SamplerGuard`] makes the last part hold even
//! when the worker's future is dropped mid-read.

mod adc;
mod synthetic;

pub use adc::{decode_frame, raw_to_volts, AdcSampler};
pub use synthetic::SyntheticSampler;

use std::sync::Arc;

use async_trait::async_trait;
use ecgconf::{SamplerKind, SamplerSettings};

use crate::error::{AcquireError, ReadError};
use crate::key::SessionKey;
use crate::sample::Sample;

#[async_trait]
pub trait Sampler: Send {
    /// Acquire the device. Failure is fatal to the session.
    async fn open(&mut self) -> Result<(), AcquireError>;

    /// One reading, stamped relative to `open`. Failure skips the tick.
    async fn read_sample(&mut self) -> Result<Sample, ReadError>;

    /// Release the device. Must tolerate being called more than once, or
    /// without a prior successful `open`.
    fn close(&mut self);
}

/// Builds a fresh sampler for each session the supervisor launches.
pub trait SamplerFactory: Send + Sync {
    fn create(&self, key: &SessionKey) -> Box<dyn Sampler>;
}

impl<F> SamplerFactory for F
where
    F: Fn(&SessionKey) -> Box<dyn Sampler> + Send + Sync,
{
    fn create(&self, key: &SessionKey) -> Box<dyn Sampler> {
        self(key)
    }
}

/// Factory for the sampler `settings` select.
pub fn factory_from_settings(
    settings: &SamplerSettings,
    sample_rate_hz: u32,
) -> Arc<dyn SamplerFactory> {
    let settings = settings.clone();
    match settings.kind {
        SamplerKind::Synthetic => Arc::new(move |_key: &SessionKey| -> Box<dyn Sampler> {
            Box::new(SyntheticSampler::new(
                settings.heart_rate_bpm,
                sample_rate_hz,
                settings.reference_volts,
            ))
        }),
        SamplerKind::Adc => Arc::new(move |_key: &SessionKey| -> Box<dyn Sampler> {
            Box::new(AdcSampler::new(
                settings.device.clone(),
                settings.reference_volts,
            ))
        }),
    }
}

/// Owns a sampler and closes it on drop unless already closed.
pub struct SamplerGuard {
    sampler: Box<dyn Sampler>,
    closed: bool,
}

impl SamplerGuard {
    pub fn new(sampler: Box<dyn Sampler>) -> Self {
        Self {
            sampler,
            closed: false,
        }
    }

    pub async fn open(&mut self) -> Result<(), AcquireError> {
        self.closed = false;
        self.sampler.open().await
    }

    pub async fn read(&mut self) -> Result<Sample, ReadError> {
        if self.closed {
            return Err(ReadError::NotOpen);
        }
        self.sampler.read_sample().await
    }

    pub fn close(&mut self) {
        if !self.closed {
            self.closed = true;
            self.sampler.close();
        }
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }
}

impl Drop for SamplerGuard {
    fn drop(&mut self) {
        if !self.closed {
            tracing::debug!("Sampler released on drop");
        }
        self.close();
    }
}
