use std::str::FromStr;

use async_trait::async_trait;
use chrono::{NaiveDate, Utc};
use log::{debug, warn};
use reqwest::Client;
use rust_decimal::Decimal;

use super::val_curs::ValCurs;
use super::{RateSource, Snapshot, load_body};
use crate::error::{RateError, RateResult};

const BASE_CODE: &str = "RUB";

/// Central Bank of Russia daily XML feed. CBR quotes roubles per unit, so
/// each quote is inverted to units per rouble and RUB itself is reported as 1.
/// A zero quote has no inverse and is passed on as 0, which the service
/// rejects like any other non-positive rate.
pub struct CbrSource {
    client: Client,
    url: String,
}

impl CbrSource {
    pub fn new(client: Client, url: impl Into<String>) -> Self {
        Self {
            client,
            url: url.into(),
        }
    }

    fn get_url(&self, date: NaiveDate) -> String {
        format!("{}?date_req={}", self.url, date.format("%d/%m/%Y"))
    }
}

pub fn parse_val_curs(xml: &str) -> RateResult<Snapshot> {
    let val_curs: ValCurs = quick_xml::de::from_str(xml)
        .map_err(|e| RateError::upstream(format!("invalid CBR document: {}", e)))?;

    if val_curs.valute.is_empty() {
        return Err(RateError::upstream("CBR document has no Valute entries"));
    }
    debug!(
        "CBR document dated {} with {} quotes",
        val_curs.date.as_deref().unwrap_or("unknown"),
        val_curs.valute.len()
    );

    get_curs_map(&val_curs)
}

fn get_curs_map(val_curs: &ValCurs) -> RateResult<Snapshot> {
    let mut map = Snapshot::new();

    for valute in &val_curs.valute {
        let normalized_string = normalize_decimal_string(&valute.vunit_rate);
        let roubles_per_unit = Decimal::from_str(&normalized_string).map_err(|e| {
            RateError::upstream(format!(
                "bad VunitRate '{}' for {}: {}",
                valute.vunit_rate, valute.char_code, e
            ))
        })?;
        let units_per_rouble = match Decimal::ONE.checked_div(roubles_per_unit) {
            Some(inverted) => inverted,
            None => {
                warn!("zero VunitRate for {}", valute.char_code);
                Decimal::ZERO
            }
        };

        map.insert(valute.char_code.clone(), units_per_rouble.normalize());
    }

    map.insert(BASE_CODE.to_string(), Decimal::ONE);

    Ok(map)
}

fn normalize_decimal_string(s: &str) -> String {
    s.trim().replace(',', ".")
}

#[async_trait]
impl RateSource for CbrSource {
    fn name(&self) -> &str {
        "cbr"
    }

    async fn fetch_snapshot(&self) -> RateResult<Snapshot> {
        let url = self.get_url(Utc::now().date_naive());
        let text = load_body(&self.client, &url).await?;
        parse_val_curs(&text)
    }
}
