//! In-memory [`RateStore`] for tests.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use tokio::sync::RwLock;
use uuid::Uuid;

use super::{RateStore, currency_not_found};
use crate::currency_code::CurrencyCode;
use crate::error::{RateError, RateResult};
use crate::exchange_rate::{Currency, ExchangeRate, SaveReport};

#[derive(Default)]
struct Tables {
    currencies: HashMap<CurrencyCode, Currency>,
    rates: Vec<ExchangeRate>,
}

#[derive(Default)]
pub struct MemoryRateStore {
    tables: RwLock<Tables>,
    fail_writes: AtomicBool,
    reads: AtomicUsize,
}

impl MemoryRateStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes every subsequent write fail with `PersistenceFailed`.
    pub fn set_fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    /// Number of read calls that reached the store.
    pub fn reads(&self) -> usize {
        self.reads.load(Ordering::SeqCst)
    }

    pub async fn currency(&self, code: &str) -> Option<Currency> {
        let code: CurrencyCode = code.parse().ok()?;
        self.tables.read().await.currencies.get(&code).cloned()
    }

    fn check_writable(&self) -> RateResult<()> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(RateError::persistence("store is read-only"));
        }
        Ok(())
    }
}

fn newest_first(rates: &mut [ExchangeRate]) {
    rates.sort_by(|a, b| {
        b.observed_at
            .cmp(&a.observed_at)
            .then_with(|| b.id.cmp(&a.id))
    });
}

#[async_trait]
impl RateStore for MemoryRateStore {
    async fn save_batch(
        &self,
        entries: &[(CurrencyCode, Decimal)],
        now: DateTime<Utc>,
    ) -> RateResult<SaveReport> {
        self.check_writable()?;

        let mut tables = self.tables.write().await;
        let mut report = SaveReport::default();

        for (code, value) in entries {
            if !tables.currencies.contains_key(code) {
                tables.currencies.insert(
                    code.clone(),
                    Currency {
                        id: Uuid::now_v7(),
                        code: code.clone(),
                        is_active: true,
                    },
                );
                report.created.push(code.clone());
            }

            tables.rates.push(ExchangeRate {
                id: Uuid::now_v7(),
                currency: code.clone(),
                rate: *value,
                observed_at: now,
            });
            report.saved.push(code.clone());
        }

        Ok(report)
    }

    async fn assign(
        &self,
        code: &CurrencyCode,
        value: Decimal,
        now: DateTime<Utc>,
    ) -> RateResult<ExchangeRate> {
        self.check_writable()?;

        let mut tables = self.tables.write().await;
        match tables.currencies.get(code) {
            Some(currency) if currency.is_active => {}
            _ => return Err(currency_not_found()),
        }

        let rate = ExchangeRate {
            id: Uuid::now_v7(),
            currency: code.clone(),
            rate: value,
            observed_at: now,
        };
        tables.rates.push(rate.clone());

        Ok(rate)
    }

    async fn get_latest(&self, code: &CurrencyCode) -> RateResult<Option<ExchangeRate>> {
        self.reads.fetch_add(1, Ordering::SeqCst);

        let tables = self.tables.read().await;
        if !tables.currencies.get(code).is_some_and(|c| c.is_active) {
            return Ok(None);
        }

        let mut rates: Vec<ExchangeRate> = tables
            .rates
            .iter()
            .filter(|r| &r.currency == code)
            .cloned()
            .collect();
        newest_first(&mut rates);

        Ok(rates.into_iter().next())
    }

    async fn get_range(
        &self,
        code: &CurrencyCode,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> RateResult<Vec<ExchangeRate>> {
        self.reads.fetch_add(1, Ordering::SeqCst);

        let tables = self.tables.read().await;
        let mut rates: Vec<ExchangeRate> = tables
            .rates
            .iter()
            .filter(|r| &r.currency == code && r.observed_at >= from && r.observed_at <= to)
            .cloned()
            .collect();
        newest_first(&mut rates);

        Ok(rates)
    }

    async fn deactivate(&self, code: &CurrencyCode) -> RateResult<()> {
        self.check_writable()?;

        let mut tables = self.tables.write().await;
        match tables.currencies.get_mut(code) {
            Some(currency) if currency.is_active => {
                currency.is_active = false;
                Ok(())
            }
            _ => Err(currency_not_found()),
        }
    }
}

#[cfg(test)]
mod tests {
    use chrono::{Duration, TimeZone};
    use rust_decimal_macros::dec;

    use super::*;

    fn code(s: &str) -> CurrencyCode {
        s.parse().unwrap()
    }

    fn at(hour: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 5, 12, hour, 0, 0).unwrap()
    }

    #[tokio::test]
    async fn save_batch_registers_unknown_codes_once() {
        let store = MemoryRateStore::new();

        let first = store
            .save_batch(&[(code("USD"), dec!(1)), (code("EUR"), dec!(0.9))], at(1))
            .await
            .unwrap();
        let second = store
            .save_batch(&[(code("EUR"), dec!(0.91))], at(2))
            .await
            .unwrap();

        assert_eq!(first.created.len(), 2);
        assert!(second.created.is_empty());
        assert_eq!(second.saved, vec![code("EUR")]);

        let latest = store.get_latest(&code("EUR")).await.unwrap().unwrap();
        assert_eq!(latest.rate, dec!(0.91));
    }

    #[tokio::test]
    async fn assign_requires_registered_active_currency() {
        let store = MemoryRateStore::new();

        let err = store.assign(&code("EUR"), dec!(1.1), at(1)).await.unwrap_err();
        assert!(matches!(err, RateError::NotFound(_)));

        store.save_batch(&[(code("EUR"), dec!(0.9))], at(1)).await.unwrap();
        store.assign(&code("EUR"), dec!(1.1), at(2)).await.unwrap();
        store.deactivate(&code("EUR")).await.unwrap();

        let err = store.assign(&code("EUR"), dec!(1.2), at(3)).await.unwrap_err();
        assert!(matches!(err, RateError::NotFound(_)));
    }

    #[tokio::test]
    async fn range_is_inclusive_newest_first_and_survives_deactivation() {
        let store = MemoryRateStore::new();
        for hour in 1..=4 {
            store
                .save_batch(&[(code("EUR"), Decimal::from(hour))], at(hour))
                .await
                .unwrap();
        }
        store.deactivate(&code("EUR")).await.unwrap();

        let rates = store.get_range(&code("EUR"), at(2), at(3)).await.unwrap();
        let values: Vec<Decimal> = rates.iter().map(|r| r.rate).collect();
        assert_eq!(values, vec![dec!(3), dec!(2)]);

        assert!(store.get_latest(&code("EUR")).await.unwrap().is_none());
        let empty = store
            .get_range(&code("EUR"), at(4) + Duration::hours(1), at(10))
            .await
            .unwrap();
        assert!(empty.is_empty());
    }

    #[tokio::test]
    async fn deactivate_twice_is_not_found() {
        let store = MemoryRateStore::new();
        store.save_batch(&[(code("GBP"), dec!(0.8))], at(1)).await.unwrap();

        store.deactivate(&code("GBP")).await.unwrap();
        let err = store.deactivate(&code("GBP")).await.unwrap_err();
        assert!(matches!(err, RateError::NotFound(_)));
        assert!(!store.currency("GBP").await.unwrap().is_active);
    }
}
