use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, TimeZone, Utc};
use log::{debug, info, warn};
use rust_decimal::Decimal;
use tokio_util::sync::CancellationToken;

use crate::cache::{CacheKey, CachedValue, DEFAULT_TTL, RateCache};
use crate::conversion;
use crate::currency_code::CurrencyCode;
use crate::error::{RateError, RateResult};
use crate::exchange_rate::{ConversionResult, ExchangeRate, SaveReport};
use crate::source::{RateSource, Snapshot};
use crate::store::RateStore;

/// Runs `fut` unless `cancel` fires first.
async fn cancellable<T>(
    cancel: &CancellationToken,
    fut: impl Future<Output = RateResult<T>>,
) -> RateResult<T> {
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(RateError::Cancelled),
        res = fut => res,
    }
}

fn history_start() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2000, 1, 1, 0, 0, 0)
        .single()
        .unwrap_or(DateTime::<Utc>::MIN_UTC)
}

/// Entry point for everything that reads or writes rates.
///
/// Reads go through the cache. Every write invalidates `rate:{CODE}` for the
/// codes it touched once the store call finishes, whatever its outcome, and
/// again when the caller gives up early, so a write that commits after its
/// request was cancelled never leaves the previous value cached.
pub struct RateService {
    store: Arc<dyn RateStore>,
    source: Arc<dyn RateSource>,
    cache: Arc<RateCache>,
    cache_ttl: Duration,
}

impl RateService {
    pub fn new(store: Arc<dyn RateStore>, source: Arc<dyn RateSource>, cache: Arc<RateCache>) -> Self {
        Self {
            store,
            source,
            cache,
            cache_ttl: DEFAULT_TTL,
        }
    }

    pub fn with_cache_ttl(mut self, ttl: Duration) -> Self {
        self.cache_ttl = ttl;
        self
    }

    pub fn cache(&self) -> &RateCache {
        &self.cache
    }

    /// Runs a store write in its own task so it is never dropped halfway.
    /// `keys` are invalidated when the write finishes and, if `cancel` fires
    /// first, also before returning [`RateError::Cancelled`].
    async fn write<T, F, Fut>(&self, keys: Vec<String>, cancel: &CancellationToken, op: F) -> RateResult<T>
    where
        F: FnOnce(Arc<dyn RateStore>) -> Fut,
        Fut: Future<Output = RateResult<T>> + Send + 'static,
        T: Send + 'static,
    {
        let pending = op(self.store.clone());
        let cache = self.cache.clone();
        let task_keys = keys.clone();
        let mut task = tokio::spawn(async move {
            let res = pending.await;
            for key in &task_keys {
                cache.invalidate(key);
            }
            res
        });

        tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                for key in &keys {
                    self.cache.invalidate(key);
                }
                debug!("write cancelled, {} keys invalidated", keys.len());
                Err(RateError::Cancelled)
            }
            res = &mut task => match res {
                Ok(res) => res,
                Err(e) => Err(RateError::persistence(format!("write task failed: {}", e))),
            },
        }
    }

    pub async fn assign_currency(
        &self,
        code: &str,
        value: Decimal,
        cancel: &CancellationToken,
    ) -> RateResult<ExchangeRate> {
        let code: CurrencyCode = code.parse()?;
        if value <= Decimal::ZERO {
            return Err(RateError::validation("Value must be a positive number."));
        }

        let keys = vec![CacheKey::rate(&code)];
        let target = code.clone();
        let rate = self
            .write(keys, cancel, move |store| async move {
                store.assign(&target, value, Utc::now()).await
            })
            .await?;
        info!("Assigned {} = {}", code, value);

        Ok(rate)
    }

    /// Current rate of an active currency.
    pub async fn get_currency(&self, code: &str, cancel: &CancellationToken) -> RateResult<ExchangeRate> {
        let code: CurrencyCode = code.parse()?;
        self.current_rate(&code, cancel)
            .await?
            .ok_or_else(|| RateError::not_found("Currency not found."))
    }

    async fn current_rate(
        &self,
        code: &CurrencyCode,
        cancel: &CancellationToken,
    ) -> RateResult<Option<ExchangeRate>> {
        let key = CacheKey::rate(code);
        let lookup = self.cache.lookup(&key);
        if let Some(CachedValue::Rate(rate)) = lookup.value {
            return Ok(Some(rate));
        }

        let rate = cancellable(cancel, self.store.get_latest(code)).await?;
        if let Some(rate) = &rate {
            self.cache
                .fill(&key, CachedValue::Rate(rate.clone()), self.cache_ttl, lookup.generation);
        }

        Ok(rate)
    }

    pub async fn calculate(
        &self,
        from: &str,
        to: &str,
        amount: Decimal,
        cancel: &CancellationToken,
    ) -> RateResult<ConversionResult> {
        let (from, to) = conversion::validate_request(from, to, amount)?;

        let rate_from = self
            .current_rate(&from, cancel)
            .await?
            .ok_or_else(|| RateError::not_found("Source currency not found."))?;
        let rate_to = self
            .current_rate(&to, cancel)
            .await?
            .ok_or_else(|| RateError::not_found("Target currency not found."))?;

        conversion::convert(from, to, amount, rate_from.rate, rate_to.rate)
    }

    /// Observations in `[from, to]`, newest first. Deactivated currencies
    /// keep their history.
    pub async fn get_historical(
        &self,
        code: &str,
        from: Option<DateTime<Utc>>,
        to: Option<DateTime<Utc>>,
        cancel: &CancellationToken,
    ) -> RateResult<Vec<ExchangeRate>> {
        let code: CurrencyCode = code.parse()?;
        let now = Utc::now();
        let from = from.unwrap_or_else(history_start);
        let to = to.unwrap_or(now);
        if from > to {
            return Err(RateError::validation("'from' must not be after 'to'."));
        }

        let key = CacheKey::history(&code, from, to);
        let lookup = self.cache.lookup(&key);
        let rates = match lookup.value {
            Some(CachedValue::History(rates)) => rates,
            _ => {
                let rates = cancellable(cancel, self.store.get_range(&code, from, to)).await?;
                // Windows reaching into the present can still grow.
                if to < now {
                    self.cache.fill(
                        &key,
                        CachedValue::History(rates.clone()),
                        self.cache_ttl,
                        lookup.generation,
                    );
                }
                rates
            }
        };

        if rates.is_empty() {
            return Err(RateError::not_found(
                "No historical rates found for the specified currency and date range.",
            ));
        }

        Ok(rates)
    }

    pub async fn delete_currency(&self, code: &str, cancel: &CancellationToken) -> RateResult<()> {
        let code: CurrencyCode = code.parse()?;

        let keys = vec![CacheKey::rate(&code)];
        let target = code.clone();
        self.write(keys, cancel, move |store| async move { store.deactivate(&target).await })
            .await?;
        info!("Deactivated {}", code);

        Ok(())
    }

    pub async fn fetch_snapshot(&self, cancel: &CancellationToken) -> RateResult<Snapshot> {
        let snapshot = cancellable(cancel, self.source.fetch_snapshot()).await?;
        debug!("{} returned {} rates", self.source.name(), snapshot.len());

        Ok(snapshot)
    }

    /// Writes one snapshot as a batch. Entries with malformed codes or
    /// non-positive values are reported, not written. A snapshot of which
    /// nothing could be saved is a [`RateError::PersistenceFailed`].
    pub async fn save_snapshot(
        &self,
        snapshot: Snapshot,
        cancel: &CancellationToken,
    ) -> RateResult<SaveReport> {
        let mut rejected = SaveReport::default();
        let mut entries = Vec::with_capacity(snapshot.len());

        for (raw, value) in snapshot {
            match raw.parse::<CurrencyCode>() {
                Ok(_) if value <= Decimal::ZERO => {
                    rejected.fail(raw, format!("non-positive rate {}", value))
                }
                Ok(code) => entries.push((code, value)),
                Err(e) => rejected.fail(raw, e.to_string()),
            }
        }
        entries.sort_by(|a, b| a.0.cmp(&b.0));

        let mut report = if entries.is_empty() {
            SaveReport::default()
        } else {
            let keys: Vec<String> = entries.iter().map(|(code, _)| CacheKey::rate(code)).collect();
            self.write(keys, cancel, move |store| async move {
                store.save_batch(&entries, Utc::now()).await
            })
            .await?
        };

        report.failed.extend(rejected.failed);
        if !report.is_complete() {
            for failure in &report.failed {
                warn!("Rate for '{}' not saved: {}", failure.code, failure.reason);
            }
        }
        if report.saved.is_empty() {
            if let Some(first) = report.failed.first() {
                return Err(RateError::persistence(format!(
                    "none of {} rates saved, first failure '{}': {}",
                    report.failed.len(),
                    first.code,
                    first.reason
                )));
            }
        }
        if !report.created.is_empty() {
            info!("Registered {} new currencies", report.created.len());
        }

        Ok(report)
    }

    pub async fn fetch_and_save_rates(&self, cancel: &CancellationToken) -> RateResult<SaveReport> {
        let snapshot = self.fetch_snapshot(cancel).await?;
        self.save_snapshot(snapshot, cancel).await
    }
}
