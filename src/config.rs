use std::str::FromStr;
use std::time::Duration;

use anyhow::{Context, Result};

use crate::source::SourceKind;

#[derive(Debug, Clone)]
pub struct Config {
    pub database_url: String,
    pub bind_address: String,
    pub rates_source: SourceKind,
    pub rates_url: String,
    pub rates_api_key: Option<String>,
    pub refresh_interval: Duration,
    pub cache_ttl: Duration,
    pub http_timeout: Duration,
    pub db_max_connections: u32,
}

impl Config {
    /// Reads the process environment, after loading `.env` if there is one.
    pub fn from_env() -> Result<Self> {
        dotenvy::dotenv().ok();
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let var = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let database_url = var("DATABASE_URL").context("DATABASE_URL must be set")?;
        let rates_source: SourceKind = parse_or(&var, "RATES_SOURCE", SourceKind::OpenExchangeRates)?;
        let rates_url = var("RATES_URL").unwrap_or_else(|| rates_source.default_url().to_string());

        Ok(Self {
            database_url,
            bind_address: var("BIND_ADDRESS").unwrap_or_else(|| "127.0.0.1:8080".to_string()),
            rates_source,
            rates_url,
            rates_api_key: var("RATES_API_KEY"),
            refresh_interval: seconds(&var, "REFRESH_INTERVAL_SECS", 3600)?,
            cache_ttl: seconds(&var, "CACHE_TTL_SECS", 3600)?,
            http_timeout: seconds(&var, "HTTP_TIMEOUT_SECS", 30)?,
            db_max_connections: parse_or(&var, "DB_MAX_CONNECTIONS", 5)?,
        })
    }
}

fn parse_or<T>(var: &impl Fn(&str) -> Option<String>, key: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match var(key) {
        Some(raw) => raw
            .trim()
            .parse()
            .map_err(|e| anyhow::anyhow!("Invalid {} '{}': {}", key, raw, e)),
        None => Ok(default),
    }
}

fn seconds(var: &impl Fn(&str) -> Option<String>, key: &str, default: u64) -> Result<Duration> {
    let secs: u64 = parse_or(var, key, default)?;
    if secs == 0 {
        anyhow::bail!("{} must be greater than zero", key);
    }
    Ok(Duration::from_secs(secs))
}
