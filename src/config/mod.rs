//! Environment-driven configuration.
//!
//! Loaded with figment from raw environment variables (after `.env` is read
//! by dotenvy), so `DATABASE_URL` maps to `database_url` and so on.

use crate::data::models::DataKind;
use crate::refresh::StalenessPolicy;
use anyhow::Context;
use figment::{Figment, providers::Env};
use fundu::{DurationParser, TimeUnit};
use serde::{Deserialize, Deserializer};
use std::time::Duration;

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    #[serde(default = "default_log_level")]
    pub log_level: String,
    #[serde(default = "default_port")]
    pub port: u16,
    pub database_url: String,
    /// Grace period for services and running jobs on shutdown.
    #[serde(
        default = "default_shutdown_timeout",
        deserialize_with = "deserialize_duration"
    )]
    pub shutdown_timeout: Duration,

    #[serde(default = "default_xivapi_base_url")]
    pub xivapi_base_url: String,
    #[serde(default = "default_universalis_base_url")]
    pub universalis_base_url: String,
    /// Client-side pacing per upstream service.
    #[serde(default = "default_requests_per_second")]
    pub upstream_requests_per_second: u32,
    #[serde(default = "default_max_retries")]
    pub upstream_max_retries: u32,

    #[serde(default = "default_max_concurrent_jobs")]
    pub max_concurrent_jobs: usize,
    /// How long a complete job's result is kept if nobody claims it.
    #[serde(
        default = "default_job_retention",
        deserialize_with = "deserialize_duration"
    )]
    pub job_retention: Duration,

    #[serde(default, deserialize_with = "deserialize_optional_duration")]
    pub metadata_ttl: Option<Duration>,
    #[serde(default, deserialize_with = "deserialize_optional_duration")]
    pub current_price_ttl: Option<Duration>,
    #[serde(default, deserialize_with = "deserialize_optional_duration")]
    pub historical_price_ttl: Option<Duration>,
}

impl Config {
    pub fn load() -> anyhow::Result<Self> {
        Self::from_figment(Figment::new().merge(Env::raw()))
    }

    pub fn from_figment(figment: Figment) -> anyhow::Result<Self> {
        figment.extract().context("Failed to load config")
    }

    /// TTLs are fixed for the life of the process.
    pub fn staleness_policy(&self) -> StalenessPolicy {
        let defaults = StalenessPolicy::default();
        StalenessPolicy::new(
            self.metadata_ttl
                .unwrap_or(defaults.ttl(DataKind::ItemMetadata)),
            self.current_price_ttl
                .unwrap_or(defaults.ttl(DataKind::CurrentPrice)),
            self.historical_price_ttl
                .unwrap_or(defaults.ttl(DataKind::HistoricalPrice)),
        )
    }
}

fn default_log_level() -> String {
    "info".to_owned()
}

fn default_port() -> u16 {
    1414
}

fn default_shutdown_timeout() -> Duration {
    Duration::from_secs(8)
}

fn default_xivapi_base_url() -> String {
    "https://beta.xivapi.com/api/1/".to_owned()
}

fn default_universalis_base_url() -> String {
    "https://universalis.app/api/v2/".to_owned()
}

fn default_requests_per_second() -> u32 {
    8
}

fn default_max_retries() -> u32 {
    10
}

fn default_max_concurrent_jobs() -> usize {
    8
}

fn default_job_retention() -> Duration {
    Duration::from_secs(60 * 60)
}

/// Parse "500ms", "30s", "5m", "1h", "30d"; bare numbers are seconds.
pub fn parse_duration(raw: &str) -> Result<Duration, String> {
    let raw = raw.trim();
    if let Ok(seconds) = raw.parse::<u64>() {
        return Ok(Duration::from_secs(seconds));
    }
    let parser = DurationParser::with_time_units(&[
        TimeUnit::MilliSecond,
        TimeUnit::Second,
        TimeUnit::Minute,
        TimeUnit::Hour,
        TimeUnit::Day,
    ]);
    let parsed = parser
        .parse(raw)
        .map_err(|e| format!("invalid duration '{raw}': {e}"))?;
    Duration::try_from(parsed).map_err(|e| format!("invalid duration '{raw}': {e}"))
}

#[derive(Deserialize)]
#[serde(untagged)]
enum RawDuration {
    Seconds(u64),
    Text(String),
}

impl RawDuration {
    fn into_duration(self) -> Result<Duration, String> {
        match self {
            RawDuration::Seconds(seconds) => Ok(Duration::from_secs(seconds)),
            RawDuration::Text(text) => parse_duration(&text),
        }
    }
}

fn deserialize_duration<'de, D>(deserializer: D) -> Result<Duration, D::Error>
where
    D: Deserializer<'de>,
{
    RawDuration::deserialize(deserializer)?
        .into_duration()
        .map_err(serde::de::Error::custom)
}

fn deserialize_optional_duration<'de, D>(deserializer: D) -> Result<Option<Duration>, D::Error>
where
    D: Deserializer<'de>,
{
    Option::<RawDuration>::deserialize(deserializer)?
        .map(RawDuration::into_duration)
        .transpose()
        .map_err(serde::de::Error::custom)
}

#[cfg(test)]
mod tests {
    use super::*;
    use figment::providers::{Format, Toml};

    #[test]
    fn parses_suffixed_and_bare_durations() {
        assert_eq!(parse_duration("30s"), Ok(Duration::from_secs(30)));
        assert_eq!(parse_duration("1h"), Ok(Duration::from_secs(3600)));
        assert_eq!(parse_duration("30d"), Ok(Duration::from_secs(30 * 86_400)));
        assert_eq!(parse_duration("250ms"), Ok(Duration::from_millis(250)));
        assert_eq!(parse_duration("8"), Ok(Duration::from_secs(8)));
        assert!(parse_duration("soon").is_err());
    }

    #[test]
    fn defaults_fill_missing_fields() {
        let config = Config::from_figment(Figment::new().merge(Toml::string(
            r#"database_url = "postgres://localhost/marketstats""#,
        )))
        .unwrap();
        assert_eq!(config.port, 1414);
        assert_eq!(config.shutdown_timeout, Duration::from_secs(8));
        assert_eq!(config.job_retention, Duration::from_secs(3600));
        assert_eq!(config.max_concurrent_jobs, 8);
        assert_eq!(config.staleness_policy(), StalenessPolicy::default());
    }

    #[test]
    fn ttl_overrides_accept_strings_and_integers() {
        let config = Config::from_figment(Figment::new().merge(Toml::string(
            r#"
            database_url = "postgres://localhost/marketstats"
            current_price_ttl = "15m"
            historical_price_ttl = 7200
            shutdown_timeout = "2s"
            "#,
        )))
        .unwrap();
        let policy = config.staleness_policy();
        assert_eq!(policy.ttl(DataKind::CurrentPrice), Duration::from_secs(900));
        assert_eq!(policy.ttl(DataKind::HistoricalPrice), Duration::from_secs(7200));
        assert_eq!(
            policy.ttl(DataKind::ItemMetadata),
            StalenessPolicy::default().ttl(DataKind::ItemMetadata)
        );
        assert_eq!(config.shutdown_timeout, Duration::from_secs(2));
    }

    #[test]
    fn missing_database_url_is_an_error() {
        assert!(Config::from_figment(Figment::new()).is_err());
    }
}
