use std::fmt::{Display, Formatter};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use anyhow::anyhow;
use log::{debug, info, warn};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::error::{RateError, RateResult};
use crate::service::RateService;
use crate::source::Snapshot;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchedulerState {
    Idle,
    Fetching,
    Saving,
    Sleeping,
    Stopping,
}

impl Display for SchedulerState {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            SchedulerState::Idle => "idle",
            SchedulerState::Fetching => "fetching",
            SchedulerState::Saving => "saving",
            SchedulerState::Sleeping => "sleeping",
            SchedulerState::Stopping => "stopping",
        };
        f.write_str(name)
    }
}

enum Step<T> {
    Done(T),
    Failed(anyhow::Error),
    Cancelled,
}

/// Background loop that refreshes rates from the pricing source.
///
/// Fetch and save failures, including panics, are logged and the loop goes
/// back to sleep. Only cancellation ends it.
pub struct RefreshScheduler {
    service: Arc<RateService>,
    interval: Duration,
}

impl RefreshScheduler {
    pub fn new(service: Arc<RateService>, interval: Duration) -> Self {
        Self { service, interval }
    }

    pub fn spawn(self, cancel: CancellationToken) -> JoinHandle<()> {
        tokio::spawn(self.run(cancel))
    }

    pub async fn run(self, cancel: CancellationToken) {
        info!("Refresh scheduler started, interval {:?}", self.interval);

        let mut state = SchedulerState::Idle;
        let mut pending: Option<Snapshot> = None;
        let mut cycle: u64 = 0;

        while state != SchedulerState::Stopping {
            let next = match state {
                SchedulerState::Idle => {
                    if cancel.is_cancelled() {
                        SchedulerState::Stopping
                    } else {
                        cycle += 1;
                        SchedulerState::Fetching
                    }
                }
                SchedulerState::Fetching => {
                    let step = self
                        .isolated(&cancel, |service, token| async move {
                            service.fetch_snapshot(&token).await
                        })
                        .await;
                    match step {
                        Step::Done(snapshot) => {
                            pending = Some(snapshot);
                            SchedulerState::Saving
                        }
                        Step::Failed(e) => {
                            warn!("Currency rate fetch failed (cycle {}): {:#}", cycle, e);
                            SchedulerState::Sleeping
                        }
                        Step::Cancelled => SchedulerState::Stopping,
                    }
                }
                SchedulerState::Saving => {
                    let snapshot = pending.take().unwrap_or_default();
                    let step = self
                        .isolated(&cancel, move |service, token| async move {
                            service.save_snapshot(snapshot, &token).await
                        })
                        .await;
                    match step {
                        Step::Done(report) => {
                            info!(
                                "Rates have been fetched and saved (cycle {}): {} saved, {} failed",
                                cycle,
                                report.saved.len(),
                                report.failed.len()
                            );
                            SchedulerState::Sleeping
                        }
                        Step::Failed(e) => {
                            warn!("Saving fetched rates failed (cycle {}): {:#}", cycle, e);
                            SchedulerState::Sleeping
                        }
                        Step::Cancelled => SchedulerState::Stopping,
                    }
                }
                SchedulerState::Sleeping => {
                    tokio::select! {
                        _ = cancel.cancelled() => SchedulerState::Stopping,
                        _ = tokio::time::sleep(self.interval) => SchedulerState::Idle,
                    }
                }
                SchedulerState::Stopping => SchedulerState::Stopping,
            };

            debug!("Refresh scheduler {} -> {}", state, next);
            state = next;
        }

        info!("Refresh scheduler stopped after {} cycles", cycle);
    }

    /// Runs one step on its own task so a panic inside it can't take the
    /// loop down, and abandons it as soon as `cancel` fires.
    async fn isolated<T, F, Fut>(&self, cancel: &CancellationToken, step: F) -> Step<T>
    where
        F: FnOnce(Arc<RateService>, CancellationToken) -> Fut,
        Fut: Future<Output = RateResult<T>> + Send + 'static,
        T: Send + 'static,
    {
        let token = cancel.child_token();
        let mut task = tokio::spawn(step(self.service.clone(), token.clone()));

        tokio::select! {
            _ = cancel.cancelled() => {
                token.cancel();
                task.abort();
                Step::Cancelled
            }
            joined = &mut task => match joined {
                Ok(Ok(value)) => Step::Done(value),
                Ok(Err(RateError::Cancelled)) => Step::Cancelled,
                Ok(Err(e)) => Step::Failed(e.into()),
                Err(e) if e.is_panic() => Step::Failed(anyhow!("refresh step panicked")),
                Err(e) => Step::Failed(anyhow!("refresh step aborted: {}", e)),
            },
        }
    }
}
