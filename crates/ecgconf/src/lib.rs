//! Layered configuration loading for ecggarden.
//!
//! # Usage
//!
//! ```rust,no_run
//! use ecgconf::EcgConfig;
//!
//! let config = EcgConfig::load().expect("Failed to load config");
//! println!("state dir: {}", config.paths.state_dir.display());
//! println!("sampling at {} Hz", config.capture.sample_rate_hz);
//! ```
//!
//! # Config File Locations
//!
//! Files are loaded in order (later wins):
//! 1. `/etc/ecggarden/config.toml` (system)
//! 2. `~/.config/ecggarden/config.toml` (user)
//! 3. `./ecggarden.toml` (local override), or the path given on the CLI,
//!    which must exist
//! 4. Environment variables (`ECGGARDEN_*`)
//!
//! Files merge table by table, so a local override can set a single key.
//!
//! # Example Config
//!
//! ```toml
//! [paths]
//! state_dir = "~/.local/share/ecggarden"
//!
//! [bind]
//! host = "0.0.0.0"
//! http_port = 5000
//!
//! [capture]
//! sample_rate_hz = 100
//! flush_interval_ms = 5000
//! buffer_capacity = 500
//! artifact_format = "svg"
//!
//! [stop]
//! graceful_timeout_ms = 5000
//! terminate_timeout_ms = 2000
//!
//! [sampler]
//! kind = "adc"
//! device = "/dev/spidev0.0"
//! reference_volts = 3.3
//! ```

pub mod capture;
pub mod infra;
pub mod loader;

pub use capture::{ArtifactFormat, CaptureSettings, SamplerKind, SamplerSettings, StopSettings};
pub use infra::{BindConfig, PathsConfig, TelemetryConfig};
pub use loader::{config_files, ConfigSources};

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Configuration loading errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {source}")]
    FileRead {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Failed to parse config file {path}: {message}")]
    Parse { path: PathBuf, message: String },

    #[error("Invalid configuration: {0}")]
    Invalid(String),

    #[error("Failed to render configuration: {0}")]
    Render(String),
}

/// Complete ecggarden configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct EcgConfig {
    #[serde(default)]
    pub paths: PathsConfig,

    #[serde(default)]
    pub bind: BindConfig,

    #[serde(default)]
    pub telemetry: TelemetryConfig,

    #[serde(default)]
    pub capture: CaptureSettings,

    #[serde(default)]
    pub stop: StopSettings,

    #[serde(default)]
    pub sampler: SamplerSettings,
}

impl EcgConfig {
    /// Load configuration from all standard sources.
    pub fn load() -> Result<Self, ConfigError> {
        let (config, _sources) = Self::load_with_sources_from(None)?;
        Ok(config)
    }

    /// Load configuration, letting `config_path` replace `./ecggarden.toml`.
    pub fn load_from(config_path: Option<&Path>) -> Result<Self, ConfigError> {
        let (config, _sources) = Self::load_with_sources_from(config_path)?;
        Ok(config)
    }

    /// Load configuration and report which files and env vars contributed.
    pub fn load_with_sources_from(
        config_path: Option<&Path>,
    ) -> Result<(Self, ConfigSources), ConfigError> {
        let files = loader::config_files(config_path);
        let mut sources = ConfigSources::default();

        let mut merged = toml::Table::new();
        for path in files {
            let table = loader::load_table(&path)?;
            loader::merge_tables(&mut merged, table);
            sources.files.push(path);
        }

        let mut config = loader::from_table(merged, Path::new("<merged>"))?;
        loader::apply_env_overrides(&mut config, &mut sources);
        config.validate()?;

        Ok((config, sources))
    }

    /// Parse a single TOML document on top of the compiled defaults.
    pub fn from_toml_str(contents: &str) -> Result<Self, ConfigError> {
        let path = Path::new("<string>");
        let table = loader::parse_table(contents, path)?;
        let config = loader::from_table(table, path)?;
        config.validate()?;
        Ok(config)
    }

    /// Reject values the capture loop cannot run with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.capture.sample_rate_hz == 0 {
            return Err(ConfigError::Invalid(
                "capture.sample_rate_hz must be greater than zero".to_string(),
            ));
        }
        if self.capture.buffer_capacity == 0 {
            return Err(ConfigError::Invalid(
                "capture.buffer_capacity must be greater than zero".to_string(),
            ));
        }
        if self.capture.flush_interval_ms == 0 {
            return Err(ConfigError::Invalid(
                "capture.flush_interval_ms must be greater than zero".to_string(),
            ));
        }
        let volts = self.sampler.reference_volts;
        if volts.is_nan() || volts <= 0.0 {
            return Err(ConfigError::Invalid(
                "sampler.reference_volts must be positive".to_string(),
            ));
        }
        Ok(())
    }

    /// Serialize the effective config to a TOML string.
    pub fn to_toml(&self) -> Result<String, ConfigError> {
        let body =
            toml::to_string_pretty(self).map_err(|e| ConfigError::Render(e.to_string()))?;
        Ok(format!("# ecggarden configuration\n\n{body}"))
    }
}
