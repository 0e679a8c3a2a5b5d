use crate::error::FetchError;
use chrono::{DateTime, Utc};
use futures::future::BoxFuture;
use futures::FutureExt;
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::{CancellationToken, DropGuard};

const MIN_INTERVAL: Duration = Duration::from_millis(1);

type FetchFn = Box<dyn Fn() -> BoxFuture<'static, Result<(), FetchError>> + Send + Sync>;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RefreshState {
    pub is_refreshing: bool,
    pub last_updated: Option<DateTime<Utc>>,
    pub last_error: Option<FetchError>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RefreshOutcome {
    Refreshed,
    Skipped,
    Failed(FetchError),
}

/// Runs one fetch operation on a fixed period, never more than one at a time.
///
/// The periodic trigger lives in a background task owned through a
/// cancellation drop guard: dropping the scheduler stops the ticker, while a
/// fetch that is already running is left to finish.
pub struct RefreshScheduler {
    inner: Arc<Inner>,
    ticker: Mutex<Option<DropGuard>>,
}

struct Inner {
    name: String,
    fetch: FetchFn,
    in_flight: AtomicBool,
    state: watch::Sender<RefreshState>,
}

struct InFlight<'a> {
    inner: &'a Inner,
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.inner
            .state
            .send_modify(|state| state.is_refreshing = false);
        self.inner.in_flight.store(false, Ordering::Release);
    }
}

impl RefreshScheduler {
    pub fn new<F, Fut>(name: impl Into<String>, fetch: F) -> Self
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), FetchError>> + Send + 'static,
    {
        let (state, _rx) = watch::channel(RefreshState::default());
        Self {
            inner: Arc::new(Inner {
                name: name.into(),
                fetch: Box::new(move || fetch().boxed()),
                in_flight: AtomicBool::new(false),
                state,
            }),
            ticker: Mutex::new(None),
        }
    }

    pub fn name(&self) -> &str {
        &self.inner.name
    }

    /// Begins ticking every `interval`, first tick one full interval from now.
    /// Returns `false` when the scheduler was already running.
    pub fn start(&self, interval: Duration) -> bool {
        let mut ticker = self.ticker.lock().unwrap_or_else(PoisonError::into_inner);
        if ticker.is_some() {
            tracing::info!(scheduler = %self.inner.name, "auto refresh already running");
            return false;
        }

        let period = interval.max(MIN_INTERVAL);
        let cancel = CancellationToken::new();
        let token = cancel.clone();
        let inner = self.inner.clone();
        tokio::spawn(async move {
            let mut timer = tokio::time::interval_at(Instant::now() + period, period);
            timer.set_missed_tick_behavior(MissedTickBehavior::Skip);
            loop {
                tokio::select! {
                    _ = token.cancelled() => break,
                    _ = timer.tick() => {
                        let inner = inner.clone();
                        tokio::spawn(async move {
                            inner.refresh().await;
                        });
                    }
                }
            }
        });

        tracing::info!(
            scheduler = %self.inner.name,
            interval_ms = period.as_millis() as u64,
            "auto refresh started"
        );
        *ticker = Some(cancel.drop_guard());
        true
    }

    /// Cancels future ticks. An in-flight fetch is not interrupted.
    pub fn stop(&self) -> bool {
        let guard = self
            .ticker
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        match guard {
            Some(guard) => {
                drop(guard);
                tracing::info!(scheduler = %self.inner.name, "auto refresh stopped");
                true
            }
            None => false,
        }
    }

    pub fn is_running(&self) -> bool {
        self.ticker
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .is_some()
    }

    pub async fn refresh_now(&self) -> RefreshOutcome {
        self.inner.refresh().await
    }

    pub fn state(&self) -> RefreshState {
        self.inner.state.borrow().clone()
    }

    pub fn is_refreshing(&self) -> bool {
        self.inner.state.borrow().is_refreshing
    }

    pub fn last_updated(&self) -> Option<DateTime<Utc>> {
        self.inner.state.borrow().last_updated
    }

    pub fn last_error(&self) -> Option<FetchError> {
        self.inner.state.borrow().last_error.clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<RefreshState> {
        self.inner.state.subscribe()
    }
}

impl Inner {
    async fn refresh(&self) -> RefreshOutcome {
        if self
            .in_flight
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            tracing::debug!(scheduler = %self.name, "refresh already in flight; skipping");
            return RefreshOutcome::Skipped;
        }
        let _in_flight = InFlight { inner: self };
        self.state.send_modify(|state| state.is_refreshing = true);

        match (self.fetch)().await {
            Ok(()) => {
                let now = Utc::now();
                self.state.send_modify(|state| {
                    state.last_updated = Some(now);
                    state.last_error = None;
                });
                tracing::info!(scheduler = %self.name, updated_at = %now, "refresh complete");
                RefreshOutcome::Refreshed
            }
            Err(err) => {
                tracing::warn!(
                    scheduler = %self.name,
                    kind = err.kind(),
                    error = %err,
                    "refresh failed"
                );
                self.state
                    .send_modify(|state| state.last_error = Some(err.clone()));
                RefreshOutcome::Failed(err)
            }
        }
    }
}
