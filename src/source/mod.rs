use std::collections::HashMap;
use std::str::FromStr;

use async_trait::async_trait;
use reqwest::Client;
use rust_decimal::Decimal;

use crate::error::{RateError, RateResult};

pub mod cbr;
pub mod open_exchange_rates;
mod val_curs;

pub use cbr::CbrSource;
pub use open_exchange_rates::OpenExchangeRatesSource;

/// Full code → rate mapping returned by one fetch. Codes are exactly as the
/// upstream reported them; validation happens when the snapshot is saved.
pub type Snapshot = HashMap<String, Decimal>;

#[async_trait]
pub trait RateSource: Send + Sync {
    fn name(&self) -> &str;

    /// One outbound call. No retries; the scheduler owns retry cadence.
    async fn fetch_snapshot(&self) -> RateResult<Snapshot>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceKind {
    OpenExchangeRates,
    Cbr,
}

impl SourceKind {
    pub fn default_url(&self) -> &'static str {
        match self {
            SourceKind::OpenExchangeRates => "https://openexchangerates.org/api/latest.json",
            SourceKind::Cbr => "https://cbr.ru/scripts/XML_daily.asp",
        }
    }
}

impl FromStr for SourceKind {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "openexchangerates" | "oxr" => Ok(SourceKind::OpenExchangeRates),
            "cbr" => Ok(SourceKind::Cbr),
            other => anyhow::bail!("Unknown rates source '{}'", other),
        }
    }
}

async fn load_body(client: &Client, url: &str) -> RateResult<String> {
    let resp = client.get(url).send().await.map_err(RateError::upstream)?;
    if !resp.status().is_success() {
        return Err(RateError::upstream(format!(
            "pricing source answered {}",
            resp.status()
        )));
    }

    resp.text().await.map_err(RateError::upstream)
}
