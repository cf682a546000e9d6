//! Engine configuration loaded from `RANGEKEEPER_*` environment variables.
//!
//! [`EngineConfig::load`] reads a `.env` file if present (via `dotenvy`,
//! silently ignored if missing) and then layers environment variables over
//! the defaults. Invalid values are rejected outright rather than clamped,
//! so a typo in an env var surfaces immediately instead of silently
//! degrading the engine's behavior.

use std::time::Duration;

use rangekeeper_types::{FileQuantity, NumericWidth};

const ENV_PREFIX: &str = "RANGEKEEPER_";

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("{var} must be one of {allowed}, found {found:?}")]
    InvalidChoice { var: &'static str, allowed: &'static str, found: String },

    #[error("{var} must be a positive integer, found {found:?}")]
    InvalidInteger { var: &'static str, found: String },

    #[error("{var} must not be empty")]
    Empty { var: &'static str },
}

/// Engine-wide configuration. Mirrors the constructor parameters of the
/// original implementation's storage base class, plus the knobs needed to
/// choose between the text and binary layout engines.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Directory where `state.json`, `implementation.json`, and the
    /// dataset slot directories live.
    pub resource_dir: String,
    /// `User-Agent` header sent with every upstream request.
    pub user_agent: String,
    /// Number of files a binary dataset splits the prefix space into.
    /// Ignored by the text engine, which always uses one file per prefix.
    pub file_quantity: FileQuantity,
    /// Byte width used to store an occasion count in the binary format.
    pub numeric_width: NumericWidth,
    /// Number of concurrent refresh workers.
    pub worker_count: usize,
    /// Poll interval used while waiting for in-flight reads to drain
    /// before a dataset flip, and while waiting out a `TRANSITION`.
    pub state_wait_time: Duration,
}

impl EngineConfig {
    pub const DEFAULT_WORKER_COUNT: usize = 64;
    pub const DEFAULT_USER_AGENT: &'static str = "rangekeeper/0.1";
    pub const DEFAULT_STATE_WAIT_TIME_MILLIS: u64 = 500;

    /// Load configuration from the process environment, optionally
    /// preceded by a `.env` file in the current directory.
    pub fn load() -> Result<Self, ConfigError> {
        match dotenvy::dotenv() {
            Ok(path) => tracing::debug!(path = %path.display(), "loaded .env file"),
            Err(error) => tracing::debug!(error = %error, "no .env file loaded"),
        }
        Self::from_env().inspect_err(|error| tracing::warn!(error = %error, "invalid engine configuration"))
    }

    fn from_env() -> Result<Self, ConfigError> {
        let resource_dir = env_var_or("RESOURCE_DIR", "./rangekeeper-data")?;
        let user_agent = env_var_or("USER_AGENT", Self::DEFAULT_USER_AGENT)?;

        let file_quantity = match std::env::var(env_name("FILE_QUANTITY")) {
            Ok(raw) => {
                let value: u32 = raw.parse().map_err(|_| ConfigError::InvalidInteger {
                    var: "RANGEKEEPER_FILE_QUANTITY",
                    found: raw.clone(),
                })?;
                FileQuantity::from_value(value).ok_or_else(|| ConfigError::InvalidChoice {
                    var: "RANGEKEEPER_FILE_QUANTITY",
                    allowed: "1, 16, 256, 4096, 65536, 1048576",
                    found: raw,
                })?
            }
            Err(_) => FileQuantity::default(),
        };

        let numeric_width = match std::env::var(env_name("NUMERIC_WIDTH")) {
            Ok(raw) => {
                let value: usize = raw.parse().map_err(|_| ConfigError::InvalidInteger {
                    var: "RANGEKEEPER_NUMERIC_WIDTH",
                    found: raw.clone(),
                })?;
                NumericWidth::from_value(value).ok_or_else(|| ConfigError::InvalidChoice {
                    var: "RANGEKEEPER_NUMERIC_WIDTH",
                    allowed: "1, 2, 4",
                    found: raw,
                })?
            }
            Err(_) => NumericWidth::default(),
        };

        let worker_count = match std::env::var(env_name("WORKER_COUNT")) {
            Ok(raw) => {
                let value: usize = raw.parse().map_err(|_| ConfigError::InvalidInteger {
                    var: "RANGEKEEPER_WORKER_COUNT",
                    found: raw.clone(),
                })?;
                if value == 0 || value > 1024 {
                    return Err(ConfigError::InvalidInteger { var: "RANGEKEEPER_WORKER_COUNT", found: raw });
                }
                value
            }
            Err(_) => Self::DEFAULT_WORKER_COUNT,
        };

        let state_wait_millis = match std::env::var(env_name("STATE_WAIT_MILLIS")) {
            Ok(raw) => raw.parse().map_err(|_| ConfigError::InvalidInteger {
                var: "RANGEKEEPER_STATE_WAIT_MILLIS",
                found: raw,
            })?,
            Err(_) => Self::DEFAULT_STATE_WAIT_TIME_MILLIS,
        };

        Ok(Self {
            resource_dir,
            user_agent,
            file_quantity,
            numeric_width,
            worker_count,
            state_wait_time: Duration::from_millis(state_wait_millis),
        })
    }
}

fn env_name(suffix: &str) -> String {
    format!("{ENV_PREFIX}{suffix}")
}

fn env_var_or(suffix: &'static str, default: &str) -> Result<String, ConfigError> {
    match std::env::var(env_name(suffix)) {
        Ok(value) if value.is_empty() => {
            Err(ConfigError::Empty { var: Box::leak(format!("{ENV_PREFIX}{suffix}").into_boxed_str()) })
        }
        Ok(value) => Ok(value),
        Err(_) => Ok(default.to_string()),
    }
}
