use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::Serialize;
use uuid::Uuid;

use crate::currency_code::CurrencyCode;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Currency {
    pub id: Uuid,
    pub code: CurrencyCode,
    pub is_active: bool,
}

/// One observed rate. Rows are appended, never updated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ExchangeRate {
    pub id: Uuid,
    pub currency: CurrencyCode,
    pub rate: Decimal,
    pub observed_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ConversionResult {
    pub from: CurrencyCode,
    pub to: CurrencyCode,
    pub amount: Decimal,
    pub result: Decimal,
}

/// Snapshot entry that could not be written during a batch save.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SaveFailure {
    pub code: String,
    pub reason: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SaveReport {
    pub saved: Vec<CurrencyCode>,
    pub created: Vec<CurrencyCode>,
    pub failed: Vec<SaveFailure>,
}

impl SaveReport {
    pub fn is_complete(&self) -> bool {
        self.failed.is_empty()
    }

    pub fn fail(&mut self, code: impl Into<String>, reason: impl Into<String>) {
        self.failed.push(SaveFailure {
            code: code.into(),
            reason: reason.into(),
        });
    }
}
