use std::fmt::Display;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use anyhow::{Context, Result};
use tracing::debug;

pub const DEFAULT_API_URL: &str = "http://localhost:5000/api";
pub const DEFAULT_STORE_PATH: &str = "risk-client.db";
pub const DEFAULT_TIMEOUT_SECS: u64 = 15;

#[derive(Debug, Clone, PartialEq)]
pub struct Config {
    pub api_url: String,
    pub store_path: PathBuf,
    pub request_timeout: Duration,
}

impl Config {
    /// Reads `RISK_API_URL`, `RISK_STORE_PATH` and `RISK_REQUEST_TIMEOUT_SECS`.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let api_url: String = try_load(&lookup, "RISK_API_URL", DEFAULT_API_URL)?;
        let store_path: PathBuf = try_load(&lookup, "RISK_STORE_PATH", DEFAULT_STORE_PATH)?;
        let timeout_secs: u64 = try_load(
            &lookup,
            "RISK_REQUEST_TIMEOUT_SECS",
            &DEFAULT_TIMEOUT_SECS.to_string(),
        )?;
        if timeout_secs == 0 {
            anyhow::bail!("RISK_REQUEST_TIMEOUT_SECS must be at least 1");
        }

        Ok(Self {
            api_url: api_url.trim_end_matches('/').to_string(),
            store_path,
            request_timeout: Duration::from_secs(timeout_secs),
        })
    }

    /// Command-line flags win over the environment.
    pub fn with_overrides(mut self, api_url: Option<String>, store_path: Option<PathBuf>) -> Self {
        if let Some(api_url) = api_url {
            self.api_url = api_url.trim_end_matches('/').to_string();
        }
        if let Some(store_path) = store_path {
            self.store_path = store_path;
        }
        self
    }
}

fn try_load<T>(lookup: &impl Fn(&str) -> Option<String>, key: &str, default: &str) -> Result<T>
where
    T: FromStr,
    T::Err: Display,
{
    let raw = lookup(key)
        .filter(|value| !value.trim().is_empty())
        .unwrap_or_else(|| {
            debug!("{key} not set, using default: {default}");
            default.to_string()
        });
    raw.trim()
        .parse()
        .map_err(|err| anyhow::anyhow!("{err}"))
        .with_context(|| format!("invalid {key} value {raw:?}"))
}
