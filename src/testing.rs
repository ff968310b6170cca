//! Test doubles shared by the unit tests.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use tokio::sync::Notify;

use crate::currency_code::CurrencyCode;
use crate::error::{RateError, RateResult};
use crate::exchange_rate::{ExchangeRate, SaveReport};
use crate::source::{RateSource, Snapshot};
use crate::store::RateStore;
use crate::store::memory::MemoryRateStore;

pub fn snapshot(rates: &[(&str, Decimal)]) -> Snapshot {
    rates
        .iter()
        .map(|(code, value)| (code.to_string(), *value))
        .collect()
}

enum Step {
    Reply(RateResult<Snapshot>),
    Panic,
}

/// Replays queued responses in order; an empty queue answers with an
/// upstream failure.
#[derive(Default)]
pub struct ScriptedSource {
    steps: Mutex<VecDeque<Step>>,
    calls: AtomicUsize,
    called: Notify,
}

impl ScriptedSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&self, reply: RateResult<Snapshot>) {
        self.steps.lock().unwrap().push_back(Step::Reply(reply));
    }

    pub fn push_panic(&self) {
        self.steps.lock().unwrap().push_back(Step::Panic);
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Waits until at least `n` fetches have been made.
    pub async fn wait_for_calls(&self, n: usize) {
        while self.calls() < n {
            self.called.notified().await;
        }
    }
}

#[async_trait]
impl RateSource for ScriptedSource {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn fetch_snapshot(&self) -> RateResult<Snapshot> {
        let step = self.steps.lock().unwrap().pop_front();
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.called.notify_one();

        match step {
            Some(Step::Reply(reply)) => reply,
            Some(Step::Panic) => panic!("scripted source panicked"),
            None => Err(RateError::upstream("no scripted response")),
        }
    }
}

/// Commits every write to the wrapped store at once, then holds the call
/// open for `delay` before answering.
pub struct SlowCommitStore {
    inner: Arc<MemoryRateStore>,
    delay: Duration,
}

impl SlowCommitStore {
    pub fn new(inner: Arc<MemoryRateStore>, delay: Duration) -> Self {
        Self { inner, delay }
    }
}

#[async_trait]
impl RateStore for SlowCommitStore {
    async fn save_batch(
        &self,
        entries: &[(CurrencyCode, Decimal)],
        now: DateTime<Utc>,
    ) -> RateResult<SaveReport> {
        let res = self.inner.save_batch(entries, now).await;
        tokio::time::sleep(self.delay).await;
        res
    }

    async fn assign(
        &self,
        code: &CurrencyCode,
        value: Decimal,
        now: DateTime<Utc>,
    ) -> RateResult<ExchangeRate> {
        let res = self.inner.assign(code, value, now).await;
        tokio::time::sleep(self.delay).await;
        res
    }

    async fn get_latest(&self, code: &CurrencyCode) -> RateResult<Option<ExchangeRate>> {
        self.inner.get_latest(code).await
    }

    async fn get_range(
        &self,
        code: &CurrencyCode,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> RateResult<Vec<ExchangeRate>> {
        self.inner.get_range(code, from, to).await
    }

    async fn deactivate(&self, code: &CurrencyCode) -> RateResult<()> {
        let res = self.inner.deactivate(code).await;
        tokio::time::sleep(self.delay).await;
        res
    }
}
