//! Capture configuration - sampling cadence, flush policy, stop escalation
//! and the sample source.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Artifact encoding produced at each flush.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ArtifactFormat {
    /// Line plot rendered as SVG.
    #[default]
    Svg,
    /// Mono 16-bit PCM WAV of the window.
    Wav,
}

impl std::str::FromStr for ArtifactFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "svg" => Ok(Self::Svg),
            "wav" => Ok(Self::Wav),
            other => Err(format!("unknown artifact format: {other}")),
        }
    }
}

/// Per-session capture loop settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CaptureSettings {
    /// Default: 100
    #[serde(default = "CaptureSettings::default_sample_rate_hz")]
    pub sample_rate_hz: u32,

    /// Time between artifact flushes.
    /// Default: 5000
    #[serde(default = "CaptureSettings::default_flush_interval_ms")]
    pub flush_interval_ms: u64,

    /// Samples kept in the ring buffer; older samples are evicted.
    /// Default: 500
    #[serde(default = "CaptureSettings::default_buffer_capacity")]
    pub buffer_capacity: usize,

    /// Default: svg
    #[serde(default)]
    pub artifact_format: ArtifactFormat,
}

impl CaptureSettings {
    fn default_sample_rate_hz() -> u32 {
        100
    }

    fn default_flush_interval_ms() -> u64 {
        5_000
    }

    fn default_buffer_capacity() -> usize {
        500
    }

    pub fn flush_interval(&self) -> Duration {
        Duration::from_millis(self.flush_interval_ms)
    }
}

impl Default for CaptureSettings {
    fn default() -> Self {
        Self {
            sample_rate_hz: Self::default_sample_rate_hz(),
            flush_interval_ms: Self::default_flush_interval_ms(),
            buffer_capacity: Self::default_buffer_capacity(),
            artifact_format: ArtifactFormat::default(),
        }
    }
}

/// Escalation thresholds applied when a session is stopped.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StopSettings {
    /// Wait after cooperative cancellation.
    /// Default: 5000
    #[serde(default = "StopSettings::default_graceful_timeout_ms")]
    pub graceful_timeout_ms: u64,

    /// Wait after the forceful termination request.
    /// Default: 2000
    #[serde(default = "StopSettings::default_terminate_timeout_ms")]
    pub terminate_timeout_ms: u64,

    /// Bound on waiting for an unconditional kill to be confirmed.
    /// Unset means wait until the worker is gone.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kill_confirm_timeout_ms: Option<u64>,
}

impl StopSettings {
    fn default_graceful_timeout_ms() -> u64 {
        5_000
    }

    fn default_terminate_timeout_ms() -> u64 {
        2_000
    }
}

impl Default for StopSettings {
    fn default() -> Self {
        Self {
            graceful_timeout_ms: Self::default_graceful_timeout_ms(),
            terminate_timeout_ms: Self::default_terminate_timeout_ms(),
            kill_confirm_timeout_ms: None,
        }
    }
}

/// Which sample source each session opens.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum SamplerKind {
    /// Generated ECG-like waveform, no hardware needed.
    #[default]
    Synthetic,
    /// SPI ADC character device.
    Adc,
}

impl std::str::FromStr for SamplerKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "synthetic" => Ok(Self::Synthetic),
            "adc" => Ok(Self::Adc),
            other => Err(format!("unknown sampler kind: {other}")),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SamplerSettings {
    #[serde(default)]
    pub kind: SamplerKind,

    /// SPI device node read by the ADC sampler.
    /// Default: /dev/spidev0.0
    #[serde(default = "SamplerSettings::default_device")]
    pub device: PathBuf,

    /// ADC reference voltage; also the top of the plot's y axis.
    /// Default: 3.3
    #[serde(default = "SamplerSettings::default_reference_volts")]
    pub reference_volts: f64,

    /// Heart rate of the synthetic waveform.
    /// Default: 72
    #[serde(default = "SamplerSettings::default_heart_rate_bpm")]
    pub heart_rate_bpm: f64,
}

impl SamplerSettings {
    fn default_device() -> PathBuf {
        PathBuf::from("/dev/spidev0.0")
    }

    fn default_reference_volts() -> f64 {
        3.3
    }

    fn default_heart_rate_bpm() -> f64 {
        72.0
    }
}

impl Default for SamplerSettings {
    fn default() -> Self {
        Self {
            kind: SamplerKind::default(),
            device: Self::default_device(),
            reference_volts: Self::default_reference_volts(),
            heart_rate_bpm: Self::default_heart_rate_bpm(),
        }
    }
}
