use std::path::Path;

use serde::{Deserialize, Serialize};

pub const USER_AGENT_KEY: &str = "HATOM_USER_AGENT";
pub const TIMEOUT_KEY: &str = "HATOM_TIMEOUT_SECS";
pub const MAX_RETRIES_KEY: &str = "HATOM_MAX_RETRIES";
pub const MAX_BODY_BYTES_KEY: &str = "HATOM_MAX_BODY_BYTES";

const DEFAULT_TIMEOUT_SECS: u64 = 30;
const DEFAULT_MAX_RETRIES: usize = 2;
const DEFAULT_MAX_BODY_BYTES: usize = 5 * 1024 * 1024;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct FetchConfig {
    pub user_agent: String,
    pub timeout_secs: u64,
    pub max_retries: usize,
    pub max_body_bytes: usize,
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("invalid value for {key}: {value:?}")]
    Invalid { key: &'static str, value: String },
    #[error("failed to load env file: {0}")]
    EnvFile(#[from] dotenvy::Error),
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            user_agent: default_user_agent(),
            timeout_secs: DEFAULT_TIMEOUT_SECS,
            max_retries: DEFAULT_MAX_RETRIES,
            max_body_bytes: DEFAULT_MAX_BODY_BYTES,
        }
    }
}

impl FetchConfig {
    /// Reads `.env.local` when present, then the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        match dotenvy::from_filename(".env.local") {
            Ok(path) => tracing::debug!(path = %path.display(), "loaded env file"),
            Err(error) if error.not_found() => {}
            Err(error) => return Err(error.into()),
        }
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Reads settings from an env file without touching the process
    /// environment.
    pub fn from_env_file(path: &Path) -> Result<Self, ConfigError> {
        let values: Vec<(String, String)> =
            dotenvy::from_path_iter(path)?.collect::<Result<_, _>>()?;
        Self::from_lookup(|key| {
            values
                .iter()
                .find(|(name, _)| name == key)
                .map(|(_, value)| value.clone())
        })
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();
        let value = |key: &str| {
            lookup(key)
                .map(|raw| raw.trim().to_string())
                .filter(|raw| !raw.is_empty())
        };

        Ok(Self {
            user_agent: value(USER_AGENT_KEY).unwrap_or(defaults.user_agent),
            timeout_secs: parse_number(TIMEOUT_KEY, value(TIMEOUT_KEY))?
                .unwrap_or(defaults.timeout_secs),
            max_retries: parse_number(MAX_RETRIES_KEY, value(MAX_RETRIES_KEY))?
                .unwrap_or(defaults.max_retries),
            max_body_bytes: parse_number(MAX_BODY_BYTES_KEY, value(MAX_BODY_BYTES_KEY))?
                .unwrap_or(defaults.max_body_bytes),
        })
    }
}

fn parse_number<T: std::str::FromStr>(
    key: &'static str,
    raw: Option<String>,
) -> Result<Option<T>, ConfigError> {
    raw.map(|value| {
        value
            .parse::<T>()
            .map_err(|_| ConfigError::Invalid { key, value })
    })
    .transpose()
}

fn default_user_agent() -> String {
    format!("{}/{}", env!("CARGO_PKG_NAME"), env!("CARGO_PKG_VERSION"))
}
