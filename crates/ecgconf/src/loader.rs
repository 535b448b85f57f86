//! Config file discovery, table merging, and environment variable overlay.

use crate::{ConfigError, EcgConfig};
use std::env;
use std::path::{Path, PathBuf};

/// Information about where config values came from.
#[derive(Debug, Clone, Default)]
pub struct ConfigSources {
    /// Config files that were loaded (in order)
    pub files: Vec<PathBuf>,
    /// Environment variables that overrode config values
    pub env_overrides: Vec<String>,
}

const SYSTEM_CONFIG: &str = "/etc/ecggarden/config.toml";
const USER_CONFIG: &str = "ecggarden/config.toml";
const LOCAL_CONFIG: &str = "ecggarden.toml";

/// Config files to load, lowest precedence first.
///
/// System and user files are optional and skipped when absent. An explicit
/// `cli_path` takes the local file's slot and is returned even if missing,
/// so loading it reports [`ConfigError::FileRead`].
pub fn config_files(cli_path: Option<&Path>) -> Vec<PathBuf> {
    let user = directories::BaseDirs::new().map(|dirs| dirs.config_dir().join(USER_CONFIG));
    let mut files: Vec<PathBuf> = [Some(PathBuf::from(SYSTEM_CONFIG)), user]
        .into_iter()
        .flatten()
        .filter(|path| path.exists())
        .collect();

    match cli_path {
        Some(path) => files.push(path.to_path_buf()),
        None => {
            let local = PathBuf::from(LOCAL_CONFIG);
            if local.exists() {
                files.push(local);
            }
        }
    }

    files
}

/// Read a TOML file into a raw table.
pub fn load_table(path: &Path) -> Result<toml::Table, ConfigError> {
    let contents = std::fs::read_to_string(path).map_err(|e| ConfigError::FileRead {
        path: path.to_path_buf(),
        source: e,
    })?;

    parse_table(&contents, path)
}

pub(crate) fn parse_table(contents: &str, path: &Path) -> Result<toml::Table, ConfigError> {
    contents
        .parse::<toml::Table>()
        .map_err(|e| ConfigError::Parse {
            path: path.to_path_buf(),
            message: e.to_string(),
        })
}

/// Deep-merge `overlay` into `base`. Nested tables merge key by key,
/// any other value in `overlay` replaces the one in `base`.
pub fn merge_tables(base: &mut toml::Table, overlay: toml::Table) {
    for (key, value) in overlay {
        match (base.get_mut(&key), value) {
            (Some(toml::Value::Table(existing)), toml::Value::Table(incoming)) => {
                merge_tables(existing, incoming);
            }
            (_, value) => {
                base.insert(key, value);
            }
        }
    }
}

/// Deserialize a merged table; missing keys fall back to compiled defaults.
pub(crate) fn from_table(table: toml::Table, path: &Path) -> Result<EcgConfig, ConfigError> {
    let mut config: EcgConfig =
        toml::Value::Table(table)
            .try_into()
            .map_err(|e: toml::de::Error| ConfigError::Parse {
                path: path.to_path_buf(),
                message: e.to_string(),
            })?;

    let state_dir = config.paths.state_dir.to_string_lossy().into_owned();
    config.paths.state_dir = expand_path(&state_dir);
    let device = config.sampler.device.to_string_lossy().into_owned();
    config.sampler.device = expand_path(&device);

    Ok(config)
}

/// Apply environment variable overrides to config.
pub fn apply_env_overrides(config: &mut EcgConfig, sources: &mut ConfigSources) {
    if let Ok(v) = env::var("ECGGARDEN_STATE_DIR") {
        config.paths.state_dir = expand_path(&v);
        sources.env_overrides.push("ECGGARDEN_STATE_DIR".to_string());
    }

    if let Ok(v) = env::var("ECGGARDEN_HOST") {
        config.bind.host = v;
        sources.env_overrides.push("ECGGARDEN_HOST".to_string());
    }
    if let Ok(v) = env::var("ECGGARDEN_HTTP_PORT") {
        if let Ok(port) = v.parse() {
            config.bind.http_port = port;
            sources.env_overrides.push("ECGGARDEN_HTTP_PORT".to_string());
        }
    }

    if let Ok(v) = env::var("ECGGARDEN_LOG_LEVEL") {
        config.telemetry.log_level = v;
        sources.env_overrides.push("ECGGARDEN_LOG_LEVEL".to_string());
    }
    // Also support RUST_LOG
    if let Ok(v) = env::var("RUST_LOG") {
        config.telemetry.log_level = v;
        sources.env_overrides.push("RUST_LOG".to_string());
    }

    if let Ok(v) = env::var("ECGGARDEN_SAMPLE_RATE_HZ") {
        if let Ok(rate) = v.parse() {
            config.capture.sample_rate_hz = rate;
            sources.env_overrides.push("ECGGARDEN_SAMPLE_RATE_HZ".to_string());
        }
    }
    if let Ok(v) = env::var("ECGGARDEN_FLUSH_INTERVAL_MS") {
        if let Ok(ms) = v.parse() {
            config.capture.flush_interval_ms = ms;
            sources.env_overrides.push("ECGGARDEN_FLUSH_INTERVAL_MS".to_string());
        }
    }
    if let Ok(v) = env::var("ECGGARDEN_BUFFER_CAPACITY") {
        if let Ok(capacity) = v.parse() {
            config.capture.buffer_capacity = capacity;
            sources.env_overrides.push("ECGGARDEN_BUFFER_CAPACITY".to_string());
        }
    }

    if let Ok(v) = env::var("ECGGARDEN_SAMPLER") {
        if let Ok(kind) = v.parse() {
            config.sampler.kind = kind;
            sources.env_overrides.push("ECGGARDEN_SAMPLER".to_string());
        }
    }
    if let Ok(v) = env::var("ECGGARDEN_SAMPLER_DEVICE") {
        config.sampler.device = expand_path(&v);
        sources.env_overrides.push("ECGGARDEN_SAMPLER_DEVICE".to_string());
    }
}

/// Expand `~/` and a leading `$VAR` in a path.
pub fn expand_path(path: &str) -> PathBuf {
    if let Some(stripped) = path.strip_prefix("~/") {
        if let Some(home) = directories::BaseDirs::new().map(|d| d.home_dir().to_path_buf()) {
            return home.join(stripped);
        }
        return PathBuf::from(path);
    }

    if let Some(stripped) = path.strip_prefix('$') {
        let (var_name, rest) = match stripped.find('/') {
            Some(slash_pos) => (&stripped[..slash_pos], Some(&stripped[slash_pos + 1..])),
            None => (stripped, None),
        };
        return match (env::var(var_name), rest) {
            (Ok(value), Some(rest)) => PathBuf::from(value).join(rest),
            (Ok(value), None) => PathBuf::from(value),
            (Err(_), _) => PathBuf::from(path),
        };
    }

    PathBuf::from(path)
}
