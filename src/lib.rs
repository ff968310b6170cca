pub mod api;
pub mod cache;
pub mod config;
pub mod conversion;
pub mod currency_code;
pub mod error;
pub mod exchange_rate;
pub mod scheduler;
pub mod service;
pub mod source;
pub mod store;

#[cfg(test)]
mod testing;

pub use error::{RateError, RateResult};
pub use service::RateService;
