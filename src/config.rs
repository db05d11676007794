use std::collections::BTreeSet;
use std::fs;
use std::path::PathBuf;
use std::time::Duration;

use camino::Utf8PathBuf;
use directories::BaseDirs;
use serde::{Deserialize, Serialize};

use crate::domain::RecordFormat;
use crate::error::HarvestError;

pub const DEFAULT_BASE_URL: &str = "https://pubchem.ncbi.nlm.nih.gov/rest/pug";
pub const DEFAULT_CONCURRENCY: usize = 10;
pub const DEFAULT_RATE_INTERVAL: Duration = Duration::from_millis(200);
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(60);
const CONFIG_FILE_NAME: &str = "pug-harvest.json";

/// On-disk configuration. Every key is optional; missing keys fall back to defaults.
#[derive(Debug, Default, Deserialize, Serialize)]
pub struct ConfigFile {
    #[serde(default)]
    pub destination: Option<String>,
    #[serde(default)]
    pub format: Option<String>,
    #[serde(default)]
    pub concurrency: Option<usize>,
    #[serde(default)]
    pub rate_interval_ms: Option<u64>,
    #[serde(default)]
    pub max_attempts: Option<u32>,
    #[serde(default)]
    pub base_delay_ms: Option<u64>,
    #[serde(default)]
    pub max_delay_ms: Option<u64>,
    #[serde(default)]
    pub retry_statuses: Option<Vec<u16>>,
    #[serde(default)]
    pub base_url: Option<String>,
    #[serde(default)]
    pub timeout_secs: Option<u64>,
}

/// Bounded exponential backoff for transient HTTP failures.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts including the first one.
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
    pub retry_statuses: BTreeSet<u16>,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 20,
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(12),
            retry_statuses: default_retry_statuses(),
        }
    }
}

impl RetryPolicy {
    /// Delay to wait after the `attempt`-th failed attempt (1-based):
    /// `min(max_delay, base_delay * 2^(attempt - 1))`.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1);
        let factor = 1u32.checked_shl(exponent).unwrap_or(u32::MAX);
        self.base_delay.saturating_mul(factor).min(self.max_delay)
    }

    pub fn is_retryable_status(&self, status: u16) -> bool {
        self.retry_statuses.contains(&status)
    }
}

pub fn default_retry_statuses() -> BTreeSet<u16> {
    [429, 500, 502, 503, 504].into_iter().collect()
}

#[derive(Debug, Clone)]
pub struct PipelineConfig {
    pub destination: Utf8PathBuf,
    pub format: RecordFormat,
    pub concurrency: usize,
    pub rate_interval: Duration,
    pub retry: RetryPolicy,
    pub base_url: String,
    pub timeout: Duration,
}

impl PipelineConfig {
    pub fn new(destination: Utf8PathBuf, format: RecordFormat) -> Self {
        Self {
            destination,
            format,
            concurrency: DEFAULT_CONCURRENCY,
            rate_interval: DEFAULT_RATE_INTERVAL,
            retry: RetryPolicy::default(),
            base_url: DEFAULT_BASE_URL.to_string(),
            timeout: DEFAULT_TIMEOUT,
        }
    }

    pub fn validate(&self) -> Result<(), HarvestError> {
        if self.concurrency == 0 {
            return Err(HarvestError::InvalidConfig(
                "concurrency must be at least 1".to_string(),
            ));
        }
        if self.retry.max_attempts == 0 {
            return Err(HarvestError::InvalidConfig(
                "max_attempts must be at least 1".to_string(),
            ));
        }
        if self.retry.base_delay > self.retry.max_delay {
            return Err(HarvestError::InvalidConfig(format!(
                "base delay {:?} exceeds max delay {:?}",
                self.retry.base_delay, self.retry.max_delay
            )));
        }
        if self.base_url.trim().is_empty() {
            return Err(HarvestError::InvalidConfig("base_url is empty".to_string()));
        }
        Ok(())
    }
}

/// Values given on the command line; they win over the config file.
#[derive(Debug, Clone, Default)]
pub struct ConfigOverrides {
    pub destination: Option<Utf8PathBuf>,
    pub format: Option<RecordFormat>,
    pub concurrency: Option<usize>,
    pub rate_interval: Option<Duration>,
    pub max_attempts: Option<u32>,
    pub base_delay: Option<Duration>,
    pub max_delay: Option<Duration>,
    pub base_url: Option<String>,
}

pub struct ConfigLoader;

impl ConfigLoader {
    /// Loads the config file. An explicit path must exist; otherwise the
    /// working directory and the user config directory are tried in turn.
    pub fn resolve(path: Option<&str>) -> Result<ConfigFile, HarvestError> {
        let config_path = match path {
            Some(path) => Some(PathBuf::from(path)),
            None => Self::discover(),
        };
        let Some(config_path) = config_path else {
            return Ok(ConfigFile::default());
        };

        let content = fs::read_to_string(&config_path)
            .map_err(|_| HarvestError::ConfigRead(config_path.clone()))?;
        serde_json::from_str(&content).map_err(|err| HarvestError::ConfigParse(err.to_string()))
    }

    pub fn resolve_config(
        file: ConfigFile,
        overrides: ConfigOverrides,
    ) -> Result<PipelineConfig, HarvestError> {
        let destination = overrides
            .destination
            .or_else(|| file.destination.map(Utf8PathBuf::from))
            .ok_or_else(|| {
                HarvestError::InvalidConfig("a destination directory is required".to_string())
            })?;
        let format = match (overrides.format, file.format) {
            (Some(format), _) => format,
            (None, Some(value)) => value.parse()?,
            (None, None) => RecordFormat::Sdf,
        };

        let mut config = PipelineConfig::new(destination, format);
        if let Some(value) = overrides.concurrency.or(file.concurrency) {
            config.concurrency = value;
        }
        if let Some(value) = overrides
            .rate_interval
            .or(file.rate_interval_ms.map(Duration::from_millis))
        {
            config.rate_interval = value;
        }
        if let Some(value) = overrides.max_attempts.or(file.max_attempts) {
            config.retry.max_attempts = value;
        }
        if let Some(value) = overrides
            .base_delay
            .or(file.base_delay_ms.map(Duration::from_millis))
        {
            config.retry.base_delay = value;
        }
        if let Some(value) = overrides
            .max_delay
            .or(file.max_delay_ms.map(Duration::from_millis))
        {
            config.retry.max_delay = value;
        }
        if let Some(statuses) = file.retry_statuses {
            config.retry.retry_statuses = statuses.into_iter().collect();
        }
        if let Some(value) = overrides.base_url.or(file.base_url) {
            config.base_url = value.trim_end_matches('/').to_string();
        }
        if let Some(value) = file.timeout_secs {
            config.timeout = Duration::from_secs(value);
        }

        config.validate()?;
        Ok(config)
    }

    fn discover() -> Option<PathBuf> {
        let local = PathBuf::from(CONFIG_FILE_NAME);
        if local.exists() {
            return Some(local);
        }
        BaseDirs::new()
            .map(|dirs| {
                dirs.home_dir()
                    .join(".config")
                    .join("pug-harvest")
                    .join("config.json")
            })
            .filter(|path| path.exists())
    }
}
