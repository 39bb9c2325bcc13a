//! Pipeline configuration (TOML) and the provider registry.
//!
//! Credentials never live in the config file. The caller resolves them (from
//! the environment, a secret store, ...) and passes a [`Credentials`] value in.

use crate::data::alpha_vantage::{AlphaVantageProvider, AlphaVantageSettings, OutputSize};
use crate::data::circuit_breaker::CircuitBreaker;
use crate::data::csv_import::{CsvImportProvider, CsvImportSettings};
use crate::data::pipeline::Pipeline;
use crate::data::provider::ProviderAdapter;
use crate::data::resolver::{Resolver, RetryPolicy};
use crate::data::store::PartitionedStore;
use crate::data::yahoo::{YahooProvider, YahooSettings};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("read config {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("parse config TOML: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("serialize config: {0}")]
    Serialize(#[from] toml::ser::Error),

    #[error("unknown provider '{0}' (expected one of: yahoo, alpha_vantage, csv)")]
    UnknownProvider(String),

    #[error("provider '{0}' listed more than once")]
    DuplicateProvider(String),

    #[error("no providers configured")]
    NoProviders,

    #[error("batch.jobs must be at least 1")]
    ZeroJobs,

    #[error("build HTTP client for {provider}: {message}")]
    HttpClient { provider: String, message: String },
}

/// Known provider adapters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ProviderKind {
    Yahoo,
    AlphaVantage,
    Csv,
}

impl ProviderKind {
    pub fn from_name(name: &str) -> Result<Self, ConfigError> {
        match name {
            "yahoo" => Ok(ProviderKind::Yahoo),
            "alpha_vantage" => Ok(ProviderKind::AlphaVantage),
            "csv" => Ok(ProviderKind::Csv),
            other => Err(ConfigError::UnknownProvider(other.to_string())),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineConfig {
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,
    pub symbols: Vec<String>,
    #[serde(default)]
    pub providers: ProvidersConfig,
    #[serde(default)]
    pub retry: RetryConfig,
    #[serde(default)]
    pub batch: BatchConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProvidersConfig {
    pub priority: Vec<String>,
    pub yahoo: YahooConfig,
    pub alpha_vantage: AlphaVantageConfig,
    pub csv: CsvConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct YahooConfig {
    pub start_date: NaiveDate,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub end_date: Option<NaiveDate>,
    pub timeout_secs: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AlphaVantageConfig {
    pub output_size: OutputSize,
    pub timeout_secs: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CsvConfig {
    pub dir: PathBuf,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    pub max_retries: u32,
    pub base_delay_ms: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BatchConfig {
    pub jobs: usize,
}

fn default_data_dir() -> PathBuf {
    PathBuf::from("data")
}

impl Default for ProvidersConfig {
    fn default() -> Self {
        Self {
            priority: vec!["yahoo".into(), "alpha_vantage".into(), "csv".into()],
            yahoo: YahooConfig::default(),
            alpha_vantage: AlphaVantageConfig::default(),
            csv: CsvConfig::default(),
        }
    }
}

impl Default for YahooConfig {
    fn default() -> Self {
        let defaults = YahooSettings::default();
        Self {
            start_date: defaults.start_date,
            end_date: None,
            timeout_secs: defaults.timeout.as_secs(),
        }
    }
}

impl Default for AlphaVantageConfig {
    fn default() -> Self {
        let defaults = AlphaVantageSettings::default();
        Self {
            output_size: defaults.output_size,
            timeout_secs: defaults.timeout.as_secs(),
        }
    }
}

impl Default for CsvConfig {
    fn default() -> Self {
        Self {
            dir: CsvImportSettings::default().dir,
        }
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        let defaults = RetryPolicy::default();
        Self {
            max_retries: defaults.max_retries,
            base_delay_ms: defaults.base_delay.as_millis() as u64,
        }
    }
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self { jobs: 1 }
    }
}

impl RetryConfig {
    pub fn policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_retries: self.max_retries,
            base_delay: Duration::from_millis(self.base_delay_ms),
        }
    }
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
            symbols: ["SPY", "QQQ", "AAPL", "MSFT"].map(String::from).to_vec(),
            providers: ProvidersConfig::default(),
            retry: RetryConfig::default(),
            batch: BatchConfig::default(),
        }
    }
}

impl PipelineConfig {
    /// Load a config from a TOML file.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml(&content)
    }

    /// Parse and check a config.
    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(content)?;
        config.provider_kinds()?;
        if config.batch.jobs == 0 {
            return Err(ConfigError::ZeroJobs);
        }
        Ok(config)
    }

    pub fn to_toml(&self) -> Result<String, ConfigError> {
        Ok(toml::to_string_pretty(self)?)
    }

    /// Provider kinds in priority order.
    pub fn provider_kinds(&self) -> Result<Vec<ProviderKind>, ConfigError> {
        if self.providers.priority.is_empty() {
            return Err(ConfigError::NoProviders);
        }
        let mut seen = HashSet::new();
        self.providers
            .priority
            .iter()
            .map(|name| {
                let kind = ProviderKind::from_name(name)?;
                if !seen.insert(kind) {
                    return Err(ConfigError::DuplicateProvider(name.clone()));
                }
                Ok(kind)
            })
            .collect()
    }
}

/// Secrets resolved by the caller.
#[derive(Clone, Default)]
pub struct Credentials {
    pub alpha_vantage_api_key: Option<String>,
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field(
                "alpha_vantage_api_key",
                &self.alpha_vantage_api_key.as_ref().map(|_| "<redacted>"),
            )
            .finish()
    }
}

/// Build adapters in configured priority order, each with its own circuit breaker.
pub fn build_adapters(
    config: &PipelineConfig,
    credentials: &Credentials,
) -> Result<Vec<Arc<dyn ProviderAdapter>>, ConfigError> {
    let client_err = |provider: &str| {
        let provider = provider.to_string();
        move |e: reqwest::Error| ConfigError::HttpClient {
            provider,
            message: e.to_string(),
        }
    };

    config
        .provider_kinds()?
        .into_iter()
        .map(|kind| -> Result<Arc<dyn ProviderAdapter>, ConfigError> {
            let breaker = Arc::new(CircuitBreaker::default_provider());
            let adapter: Arc<dyn ProviderAdapter> = match kind {
                ProviderKind::Yahoo => {
                    let c = &config.providers.yahoo;
                    let settings = YahooSettings {
                        start_date: c.start_date,
                        end_date: c.end_date,
                        timeout: Duration::from_secs(c.timeout_secs),
                        ..YahooSettings::default()
                    };
                    Arc::new(YahooProvider::new(settings, breaker).map_err(client_err("yahoo"))?)
                }
                ProviderKind::AlphaVantage => {
                    let c = &config.providers.alpha_vantage;
                    let settings = AlphaVantageSettings {
                        api_key: credentials.alpha_vantage_api_key.clone(),
                        output_size: c.output_size,
                        timeout: Duration::from_secs(c.timeout_secs),
                        ..AlphaVantageSettings::default()
                    };
                    Arc::new(
                        AlphaVantageProvider::new(settings, breaker)
                            .map_err(client_err("alpha_vantage"))?,
                    )
                }
                ProviderKind::Csv => Arc::new(CsvImportProvider::new(CsvImportSettings {
                    dir: config.providers.csv.dir.clone(),
                    ..CsvImportSettings::default()
                })),
            };
            Ok(adapter)
        })
        .collect()
}

/// Wire adapters, retry policy and store into a pipeline.
pub fn build_pipeline(
    config: &PipelineConfig,
    credentials: &Credentials,
) -> Result<Pipeline, ConfigError> {
    let resolver = Resolver::new(build_adapters(config, credentials)?).with_retry(config.retry.policy());
    Ok(Pipeline::new(resolver, PartitionedStore::new(&config.data_dir)))
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"
data_dir = "lake"
symbols = ["AAPL", "MSFT"]

[providers]
priority = ["alpha_vantage", "csv"]

[providers.alpha_vantage]
output_size = "full"

[retry]
max_retries = 2
base_delay_ms = 250

[batch]
jobs = 4
"#;

    #[test]
    fn parses_sample_with_defaults_filled_in() {
        let config = PipelineConfig::from_toml(SAMPLE).unwrap();
        assert_eq!(config.data_dir, PathBuf::from("lake"));
        assert_eq!(config.symbols, ["AAPL", "MSFT"]);
        assert_eq!(config.providers.alpha_vantage.output_size, OutputSize::Full);
        assert_eq!(config.providers.alpha_vantage.timeout_secs, 30);
        assert_eq!(config.providers.csv.dir, PathBuf::from("imports"));
        assert_eq!(config.retry.policy().base_delay, Duration::from_millis(250));
        assert_eq!(config.batch.jobs, 4);
        assert_eq!(
            config.provider_kinds().unwrap(),
            [ProviderKind::AlphaVantage, ProviderKind::Csv]
        );
    }

    #[test]
    fn minimal_config_uses_defaults() {
        let config = PipelineConfig::from_toml(r#"symbols = ["SPY"]"#).unwrap();
        assert_eq!(config.data_dir, PathBuf::from("data"));
        assert_eq!(config.providers.priority, ["yahoo", "alpha_vantage", "csv"]);
        assert_eq!(config.retry.max_retries, 0);
        assert_eq!(
            config.providers.yahoo.start_date,
            NaiveDate::from_ymd_opt(2015, 1, 1).unwrap()
        );
    }

    #[test]
    fn rejects_unknown_and_duplicate_providers() {
        let unknown = r#"
symbols = ["SPY"]
[providers]
priority = ["yahoo", "bloomberg"]
"#;
        assert!(matches!(
            PipelineConfig::from_toml(unknown),
            Err(ConfigError::UnknownProvider(p)) if p == "bloomberg"
        ));

        let dup = r#"
symbols = ["SPY"]
[providers]
priority = ["csv", "csv"]
"#;
        assert!(matches!(
            PipelineConfig::from_toml(dup),
            Err(ConfigError::DuplicateProvider(_))
        ));
    }

    #[test]
    fn rejects_zero_jobs() {
        let toml = "symbols = []\n[batch]\njobs = 0\n";
        assert!(matches!(PipelineConfig::from_toml(toml), Err(ConfigError::ZeroJobs)));
    }

    #[test]
    fn default_config_survives_toml() {
        let config = PipelineConfig::default();
        let text = config.to_toml().unwrap();
        assert_eq!(PipelineConfig::from_toml(&text).unwrap(), config);
    }

    #[test]
    fn adapters_follow_configured_order() {
        let config = PipelineConfig::from_toml(SAMPLE).unwrap();
        let adapters = build_adapters(&config, &Credentials::default()).unwrap();
        let names: Vec<&str> = adapters.iter().map(|a| a.name()).collect();
        assert_eq!(names, ["alpha_vantage", "csv"]);
    }

    #[test]
    fn credentials_debug_is_redacted() {
        let creds = Credentials {
            alpha_vantage_api_key: Some("SECRET123".into()),
        };
        assert!(!format!("{creds:?}").contains("SECRET123"));
    }
}
