//! Typed configuration from environment variables, with an optional TOML file.
//!
//! Loads once at startup and fails fast on malformed values. The API token is
//! wrapped in `secrecy::SecretString` so it never lands in logs.

pub mod secrets;

use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::{Error, Result};
use crate::model::RetryPolicy;
use secrecy::SecretString;
use serde::Deserialize;

const DEFAULT_API_PREFIX: &str = "/api";
const DEFAULT_DATABASE_PATH: &str = "deferq.db";
const DEFAULT_MIN_INTERVAL_SECS: u64 = 5 * 60;

#[derive(Debug)]
pub struct Config {
    /// Delivery endpoint base, without trailing slash. Only needed by
    /// commands that talk to the network.
    pub api_base_url: Option<String>,
    pub api_prefix: String,
    pub api_token: Option<SecretString>,
    pub database_path: PathBuf,
    /// Minimum spacing between background runs.
    pub min_interval: Duration,
    pub max_attempts: Option<u32>,
    /// Value of the `consent` field sent with every upload.
    pub consent: bool,
    pub otel_endpoint: Option<String>,
    pub log_level: String,
}

/// On-disk form. Every field is optional; environment variables win.
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct FileConfig {
    api_base_url: Option<String>,
    api_prefix: Option<String>,
    api_token: Option<String>,
    database_path: Option<PathBuf>,
    min_interval_secs: Option<u64>,
    max_attempts: Option<u32>,
    consent: Option<bool>,
    otel_endpoint: Option<String>,
    log_level: Option<String>,
}

impl Config {
    /// Load configuration from environment variables.
    ///
    /// In local dev, call `dotenvy::dotenv().ok()` before this.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Load a TOML file, then apply environment overrides.
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            Error::Config(format!("cannot read config file {}: {e}", path.display()))
        })?;
        let file = parse_file(&content)?;
        build(file, |name| std::env::var(name).ok())
    }

    /// Parse a TOML document on its own, ignoring the environment.
    pub fn from_toml_str(content: &str) -> Result<Self> {
        build(parse_file(content)?, |_| None)
    }

    /// Build from an arbitrary variable source.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        build(FileConfig::default(), lookup)
    }

    /// Endpoint that receives uploads.
    pub fn predict_url(&self) -> Result<String> {
        Ok(format!("{}{}/predict", self.base_url()?, self.api_prefix))
    }

    /// Endpoint used for liveness checks.
    pub fn health_url(&self) -> Result<String> {
        Ok(format!("{}{}/health", self.base_url()?, self.api_prefix))
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        match self.max_attempts {
            Some(n) => RetryPolicy::bounded(n),
            None => RetryPolicy::unbounded(),
        }
    }

    fn base_url(&self) -> Result<&str> {
        self.api_base_url
            .as_deref()
            .ok_or_else(|| Error::Config("DEFERQ_API_BASE_URL is not set".to_string()))
    }
}

fn parse_file(content: &str) -> Result<FileConfig> {
    toml::from_str(content).map_err(|e| Error::Config(format!("bad config file: {e}")))
}

fn build(file: FileConfig, lookup: impl Fn(&str) -> Option<String>) -> Result<Config> {
    let var = |name: &str| lookup(name).filter(|v| !v.trim().is_empty());

    let api_base_url = var("DEFERQ_API_BASE_URL")
        .or(file.api_base_url)
        .map(|url| url.trim_end_matches('/').to_string());

    let api_prefix = var("DEFERQ_API_PREFIX")
        .or(file.api_prefix)
        .unwrap_or_else(|| DEFAULT_API_PREFIX.to_string());

    let min_interval_secs = match var("DEFERQ_MIN_INTERVAL_SECS") {
        Some(raw) => parse_var("DEFERQ_MIN_INTERVAL_SECS", &raw)?,
        None => file.min_interval_secs.unwrap_or(DEFAULT_MIN_INTERVAL_SECS),
    };
    if min_interval_secs == 0 {
        return Err(Error::Config(
            "DEFERQ_MIN_INTERVAL_SECS must be at least 1".to_string(),
        ));
    }

    let max_attempts = match var("DEFERQ_MAX_ATTEMPTS") {
        Some(raw) => Some(parse_var("DEFERQ_MAX_ATTEMPTS", &raw)?),
        None => file.max_attempts,
    };

    let consent = match var("DEFERQ_CONSENT") {
        Some(raw) => parse_bool("DEFERQ_CONSENT", &raw)?,
        None => file.consent.unwrap_or(true),
    };

    Ok(Config {
        api_base_url,
        api_prefix: normalize_prefix(&api_prefix),
        api_token: var("DEFERQ_API_TOKEN")
            .or(file.api_token)
            .map(SecretString::from),
        database_path: var("DEFERQ_DATABASE_PATH")
            .map(PathBuf::from)
            .or(file.database_path)
            .unwrap_or_else(|| PathBuf::from(DEFAULT_DATABASE_PATH)),
        min_interval: Duration::from_secs(min_interval_secs),
        max_attempts,
        consent,
        otel_endpoint: var("OTEL_ENDPOINT").or(file.otel_endpoint),
        log_level: var("LOG_LEVEL")
            .or(file.log_level)
            .unwrap_or_else(|| "info".to_string()),
    })
}

/// "/api/" and "api" both become "/api"; "" and "/" become "".
fn normalize_prefix(prefix: &str) -> String {
    let trimmed = prefix.trim().trim_matches('/');
    if trimmed.is_empty() {
        String::new()
    } else {
        format!("/{trimmed}")
    }
}

fn parse_var<T: std::str::FromStr>(name: &str, raw: &str) -> Result<T>
where
    T::Err: std::fmt::Display,
{
    raw.trim()
        .parse()
        .map_err(|e| Error::Config(format!("{name}={raw:?} is invalid: {e}")))
}

fn parse_bool(name: &str, raw: &str) -> Result<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(Error::Config(format!("{name}={raw:?} is not a boolean"))),
    }
}
