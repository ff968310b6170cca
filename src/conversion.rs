use rust_decimal::Decimal;

use crate::currency_code::CurrencyCode;
use crate::error::{RateError, RateResult};
use crate::exchange_rate::ConversionResult;

/// Checked before any rate lookup happens.
pub fn validate_request(from: &str, to: &str, amount: Decimal) -> RateResult<(CurrencyCode, CurrencyCode)> {
    let from = from.parse()?;
    let to = to.parse()?;
    validate_amount(amount)?;

    Ok((from, to))
}

pub fn validate_amount(amount: Decimal) -> RateResult<()> {
    if amount <= Decimal::ZERO {
        return Err(RateError::validation("Amount must be a positive number."));
    }
    Ok(())
}

/// Cross-converts `amount` of `from` into `to`, where both rates are
/// expressed in units per the same base currency.
pub fn convert(
    from: CurrencyCode,
    to: CurrencyCode,
    amount: Decimal,
    rate_from: Decimal,
    rate_to: Decimal,
) -> RateResult<ConversionResult> {
    validate_amount(amount)?;
    if rate_from <= Decimal::ZERO || rate_to <= Decimal::ZERO {
        return Err(RateError::validation("Rates must be positive."));
    }

    let result = amount
        .checked_div(rate_from)
        .and_then(|base| base.checked_mul(rate_to))
        .ok_or_else(|| RateError::validation("Amount is out of range for conversion."))?;

    Ok(ConversionResult {
        from,
        to,
        amount,
        result,
    })
}
