use std::collections::HashMap;

use async_trait::async_trait;
use reqwest::Client;
use rust_decimal::Decimal;
use serde::Deserialize;

use super::{RateSource, Snapshot, load_body};
use crate::error::{RateError, RateResult};

#[derive(Debug, Deserialize)]
struct RatesResponse {
    rates: Option<HashMap<String, Decimal>>,
}

/// JSON `latest` endpoint: `{"base": "USD", "rates": {"EUR": 0.9, ...}}`.
pub struct OpenExchangeRatesSource {
    client: Client,
    url: String,
    app_id: Option<String>,
}

impl OpenExchangeRatesSource {
    pub fn new(client: Client, url: impl Into<String>, app_id: Option<String>) -> Self {
        Self {
            client,
            url: url.into(),
            app_id,
        }
    }

    fn request_url(&self) -> String {
        match &self.app_id {
            Some(app_id) => {
                let sep = if self.url.contains('?') { '&' } else { '?' };
                format!("{}{}app_id={}", self.url, sep, app_id)
            }
            None => self.url.clone(),
        }
    }
}

pub fn parse_rates(body: &str) -> RateResult<Snapshot> {
    let response: RatesResponse = serde_json::from_str(body)
        .map_err(|e| RateError::upstream(format!("invalid response body: {}", e)))?;

    response
        .rates
        .ok_or_else(|| RateError::upstream("response has no 'rates' field"))
}

#[async_trait]
impl RateSource for OpenExchangeRatesSource {
    fn name(&self) -> &str {
        "openexchangerates"
    }

    async fn fetch_snapshot(&self) -> RateResult<Snapshot> {
        let body = load_body(&self.client, &self.request_url()).await?;
        parse_rates(&body)
    }
}
