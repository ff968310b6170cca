use thiserror::Error;

/// Failures returned by the rate service and its collaborators.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum RateError {
    /// Malformed currency code, non-positive amount or value, bad date range.
    #[error("{0}")]
    Validation(String),

    /// Currency never registered, deactivated, or without matching rates.
    #[error("{0}")]
    NotFound(String),

    /// Pricing source unreachable or returned something we can't use.
    #[error("Failed to fetch rates: {0}")]
    UpstreamFetchFailed(String),

    #[error("Failed to persist rates: {0}")]
    PersistenceFailed(String),

    /// The caller's cancellation token fired before the call completed.
    #[error("Operation cancelled")]
    Cancelled,
}

impl RateError {
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    pub fn not_found(msg: impl Into<String>) -> Self {
        Self::NotFound(msg.into())
    }

    pub fn upstream(err: impl std::fmt::Display) -> Self {
        Self::UpstreamFetchFailed(err.to_string())
    }

    pub fn persistence(err: impl std::fmt::Display) -> Self {
        Self::PersistenceFailed(err.to_string())
    }
}

impl From<sqlx::Error> for RateError {
    fn from(err: sqlx::Error) -> Self {
        Self::persistence(err)
    }
}

pub type RateResult<T> = Result<T, RateError>;
