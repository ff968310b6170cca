use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sqlx::postgres::{PgPool, PgPoolOptions};
use uuid::Uuid;

use super::{RateStore, currency_not_found};
use crate::currency_code::CurrencyCode;
use crate::error::{RateError, RateResult};
use crate::exchange_rate::{ExchangeRate, SaveReport};

#[derive(Debug, sqlx::FromRow)]
struct RateRow {
    id: Uuid,
    code: String,
    value: Decimal,
    observed_at: DateTime<Utc>,
}

impl TryFrom<RateRow> for ExchangeRate {
    type Error = RateError;

    fn try_from(row: RateRow) -> Result<Self, Self::Error> {
        let currency = row
            .code
            .parse()
            .map_err(|_| RateError::persistence(format!("stored code '{}' is malformed", row.code)))?;

        Ok(ExchangeRate {
            id: row.id,
            currency,
            rate: row.value,
            observed_at: row.observed_at,
        })
    }
}

#[derive(Clone)]
pub struct PgRateStore {
    pool: PgPool,
}

impl PgRateStore {
    pub async fn connect(database_url: &str, max_connections: u32) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .acquire_timeout(Duration::from_secs(10))
            .connect(database_url)
            .await
            .context("Failed to connect to the rates database")?;

        Ok(Self::from_pool(pool))
    }

    pub fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn migrate(&self) -> Result<()> {
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .context("Failed to run database migrations")?;

        Ok(())
    }

    /// Returns whether the currency row was created by this call.
    async fn save_entry(
        &self,
        code: &CurrencyCode,
        value: Decimal,
        now: DateTime<Utc>,
    ) -> RateResult<bool> {
        let created = sqlx::query(
            "INSERT INTO currencies (id, code, is_active) VALUES ($1, $2, TRUE)
             ON CONFLICT (code) DO NOTHING",
        )
        .bind(Uuid::now_v7())
        .bind(code.as_str())
        .execute(&self.pool)
        .await?
        .rows_affected()
            == 1;

        let inserted = sqlx::query(
            "INSERT INTO currency_rates (id, currency_id, value, observed_at)
             SELECT $1, id, $3, $4 FROM currencies WHERE code = $2",
        )
        .bind(Uuid::now_v7())
        .bind(code.as_str())
        .bind(value)
        .bind(now)
        .execute(&self.pool)
        .await?
        .rows_affected();

        if inserted == 0 {
            return Err(currency_not_found());
        }

        Ok(created)
    }
}

#[async_trait]
impl RateStore for PgRateStore {
    async fn save_batch(
        &self,
        entries: &[(CurrencyCode, Decimal)],
        now: DateTime<Utc>,
    ) -> RateResult<SaveReport> {
        let mut report = SaveReport::default();

        for (code, value) in entries {
            match self.save_entry(code, *value, now).await {
                Ok(created) => {
                    if created {
                        report.created.push(code.clone());
                    }
                    report.saved.push(code.clone());
                }
                Err(e) => report.fail(code.as_str(), e.to_string()),
            }
        }

        if report.saved.is_empty() {
            if let Some(first) = report.failed.first() {
                return Err(RateError::persistence(format!(
                    "no entries written, first failure for {}: {}",
                    first.code, first.reason
                )));
            }
        }

        Ok(report)
    }

    async fn assign(
        &self,
        code: &CurrencyCode,
        value: Decimal,
        now: DateTime<Utc>,
    ) -> RateResult<ExchangeRate> {
        let row: Option<RateRow> = sqlx::query_as(
            "INSERT INTO currency_rates (id, currency_id, value, observed_at)
             SELECT $1, c.id, $3, $4 FROM currencies c WHERE c.code = $2 AND c.is_active
             RETURNING id, $2 AS code, value, observed_at",
        )
        .bind(Uuid::now_v7())
        .bind(code.as_str())
        .bind(value)
        .bind(now)
        .fetch_optional(&self.pool)
        .await?;

        row.ok_or_else(currency_not_found)?.try_into()
    }

    async fn get_latest(&self, code: &CurrencyCode) -> RateResult<Option<ExchangeRate>> {
        let row: Option<RateRow> = sqlx::query_as(
            "SELECT r.id, c.code, r.value, r.observed_at
             FROM currency_rates r
             JOIN currencies c ON c.id = r.currency_id
             WHERE c.code = $1 AND c.is_active
             ORDER BY r.observed_at DESC, r.id DESC
             LIMIT 1",
        )
        .bind(code.as_str())
        .fetch_optional(&self.pool)
        .await?;

        row.map(ExchangeRate::try_from).transpose()
    }

    async fn get_range(
        &self,
        code: &CurrencyCode,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> RateResult<Vec<ExchangeRate>> {
        let rows: Vec<RateRow> = sqlx::query_as(
            "SELECT r.id, c.code, r.value, r.observed_at
             FROM currency_rates r
             JOIN currencies c ON c.id = r.currency_id
             WHERE c.code = $1 AND r.observed_at >= $2 AND r.observed_at <= $3
             ORDER BY r.observed_at DESC, r.id DESC",
        )
        .bind(code.as_str())
        .bind(from)
        .bind(to)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(ExchangeRate::try_from).collect()
    }

    async fn deactivate(&self, code: &CurrencyCode) -> RateResult<()> {
        let affected = sqlx::query(
            "UPDATE currencies SET is_active = FALSE WHERE code = $1 AND is_active",
        )
        .bind(code.as_str())
        .execute(&self.pool)
        .await?
        .rows_affected();

        if affected == 0 {
            return Err(currency_not_found());
        }

        Ok(())
    }
}
