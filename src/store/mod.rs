use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;

use crate::currency_code::CurrencyCode;
use crate::error::RateResult;
use crate::exchange_rate::{ExchangeRate, SaveReport};

#[cfg(test)]
pub mod memory;
pub mod postgres;

pub use postgres::PgRateStore;

/// Durable, append-only history of rate observations.
///
/// Implementations serialize their own conflicting writes. Only active
/// currencies take part in "current" lookups and assignments; range queries
/// see every observation regardless of the active flag.
#[async_trait]
pub trait RateStore: Send + Sync {
    /// Registers unknown codes as active currencies and appends one
    /// observation per entry at `now`. Entries that can't be written land in
    /// the report; a batch where nothing could be written is an error.
    async fn save_batch(
        &self,
        entries: &[(CurrencyCode, Decimal)],
        now: DateTime<Utc>,
    ) -> RateResult<SaveReport>;

    /// Appends an observation for an existing active currency.
    async fn assign(
        &self,
        code: &CurrencyCode,
        value: Decimal,
        now: DateTime<Utc>,
    ) -> RateResult<ExchangeRate>;

    async fn get_latest(&self, code: &CurrencyCode) -> RateResult<Option<ExchangeRate>>;

    /// Observations with `from <= observed_at <= to`, newest first.
    async fn get_range(
        &self,
        code: &CurrencyCode,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> RateResult<Vec<ExchangeRate>>;

    async fn deactivate(&self, code: &CurrencyCode) -> RateResult<()>;
}

pub(crate) fn currency_not_found() -> crate::error::RateError {
    crate::error::RateError::not_found("Currency not found.")
}
