//! Periodic background refresh.
//!
//! The scheduler owns one long-lived task that refreshes the cache every
//! poll interval until its cancellation token fires. Read-triggered
//! refreshes go through the same [`Refresher`], so a tick that lands while
//! a read-triggered query is in flight attaches to it.

mod refresher;

pub use refresher::{
    DEFAULT_FETCH_TIMEOUT,
    RefreshError,
    RefreshHandle,
    RefreshRequest,
    RefreshResult,
    Refresher,
};

use parking_lot::Mutex;
use std::{
    sync::Arc,
    time::Duration,
};
use tokio::{
    task::JoinHandle,
    time::{
        Instant,
        MissedTickBehavior,
        interval_at,
    },
};
use tokio_util::sync::CancellationToken;
use tracing::{
    debug,
    info,
};

/// Cadence of unconditional refreshes.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(30);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchedulerState {
    Stopped,
    Running,
}

#[derive(Debug, thiserror::Error)]
pub enum SchedulerError {
    #[error("refresh scheduler is already running")]
    AlreadyRunning,
}

/// Moves the scheduler back to [`SchedulerState::Stopped`] when the task
/// ends, including when it is aborted or panics.
struct StopOnDrop(Arc<Mutex<SchedulerState>>);

impl Drop for StopOnDrop {
    fn drop(&mut self) {
        *self.0.lock() = SchedulerState::Stopped;
    }
}

/// Drives periodic refreshes of one resource.
#[derive(Debug)]
pub struct RefreshScheduler {
    refresher: Arc<Refresher>,
    poll_interval: Duration,
    state: Arc<Mutex<SchedulerState>>,
}

impl RefreshScheduler {
    pub fn new(refresher: Arc<Refresher>, poll_interval: Duration) -> Self {
        Self {
            refresher,
            poll_interval,
            state: Arc::new(Mutex::new(SchedulerState::Stopped)),
        }
    }

    pub fn state(&self) -> SchedulerState {
        *self.state.lock()
    }

    /// Starts the periodic loop on a new task.
    ///
    /// The first tick fires one poll interval after start. Cancelling `cancel`
    /// stops the loop and moves the scheduler back to
    /// [`SchedulerState::Stopped`]; a refresh already in flight is neither
    /// awaited nor cancelled and may still write the cache afterwards.
    ///
    /// # Panics
    ///
    /// Panics if called outside a Tokio runtime.
    pub fn start(&self, cancel: CancellationToken) -> Result<JoinHandle<()>, SchedulerError> {
        {
            let mut state = self.state.lock();
            if *state == SchedulerState::Running {
                return Err(SchedulerError::AlreadyRunning);
            }
            *state = SchedulerState::Running;
        }

        let refresher = self.refresher.clone();
        let stop_on_drop = StopOnDrop(self.state.clone());
        let poll_interval = self.poll_interval;

        info!(
            resource_id = %refresher.resource_id(),
            poll_interval = ?poll_interval,
            "Starting instance state refresh scheduler"
        );

        Ok(tokio::spawn(async move {
            let _stop_on_drop = stop_on_drop;
            let mut ticker = interval_at(Instant::now() + poll_interval, poll_interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    () = cancel.cancelled() => break,
                    _ = ticker.tick() => {
                        let refresh = refresher.refresh();
                        tokio::select! {
                            () = cancel.cancelled() => break,
                            result = refresh => {
                                if let Err(err) = result {
                                    debug!(error = %err, "Scheduled refresh did not update the cache");
                                }
                            }
                        }
                    }
                }
            }

            info!("Instance state refresh scheduler stopped");
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        cache::StateCache,
        fetcher::{
            FetchError,
            StateFetcher,
        },
        state::{
            LifecycleState,
            ResourceId,
        },
    };
    use async_trait::async_trait;
    use std::sync::atomic::{
        AtomicUsize,
        Ordering,
    };

    /// Answers `state-<n>` for the n-th call after `delay`.
    struct CountingFetcher {
        delay: Duration,
        calls: AtomicUsize,
    }

    impl CountingFetcher {
        fn new(delay: Duration) -> Arc<Self> {
            Arc::new(Self {
                delay,
                calls: AtomicUsize::new(0),
            })
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl StateFetcher for CountingFetcher {
        async fn fetch_state(&self, _: &ResourceId) -> Result<LifecycleState, FetchError> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
            tokio::time::sleep(self.delay).await;
            Ok(LifecycleState::new(format!("state-{call}")))
        }
    }

    fn scheduler(fetcher: Arc<CountingFetcher>) -> (RefreshScheduler, Arc<StateCache>) {
        let cache = Arc::new(StateCache::default());
        let refresher = Arc::new(Refresher::new(
            ResourceId::new("i-123"),
            fetcher,
            cache.clone(),
        ));
        (RefreshScheduler::new(refresher, DEFAULT_POLL_INTERVAL), cache)
    }

    #[tokio::test(start_paused = true)]
    async fn refreshes_on_every_tick() {
        let fetcher = CountingFetcher::new(Duration::from_millis(10));
        let (scheduler, cache) = scheduler(fetcher.clone());
        let cancel = CancellationToken::new();

        let handle = scheduler.start(cancel.clone()).unwrap();
        assert_eq!(scheduler.state(), SchedulerState::Running);

        tokio::time::sleep(Duration::from_secs(29)).await;
        assert_eq!(fetcher.calls(), 0);
        assert!(cache.read().value().is_empty());

        tokio::time::sleep(Duration::from_secs(2)).await;
        assert_eq!(fetcher.calls(), 1);
        assert_eq!(cache.read().value().as_str(), "state-1");

        tokio::time::sleep(Duration::from_secs(30)).await;
        assert_eq!(fetcher.calls(), 2);
        assert_eq!(cache.read().value().as_str(), "state-2");

        cancel.cancel();
        handle.await.unwrap();
        assert_eq!(scheduler.state(), SchedulerState::Stopped);
    }

    #[tokio::test(start_paused = true)]
    async fn rejects_second_start_while_running() {
        let (scheduler, _) = scheduler(CountingFetcher::new(Duration::ZERO));
        let cancel = CancellationToken::new();

        let handle = scheduler.start(cancel.clone()).unwrap();
        assert!(matches!(
            scheduler.start(cancel.clone()),
            Err(SchedulerError::AlreadyRunning)
        ));

        cancel.cancel();
        handle.await.unwrap();

        let restarted = CancellationToken::new();
        let handle = scheduler.start(restarted.clone()).unwrap();
        assert_eq!(scheduler.state(), SchedulerState::Running);
        restarted.cancel();
        handle.await.unwrap();
        assert_eq!(scheduler.state(), SchedulerState::Stopped);
    }

    #[tokio::test(start_paused = true)]
    async fn aborted_task_allows_restart() {
        let (scheduler, _) = scheduler(CountingFetcher::new(Duration::ZERO));
        let cancel = CancellationToken::new();

        let handle = scheduler.start(cancel.clone()).unwrap();
        handle.abort();
        assert!(handle.await.unwrap_err().is_cancelled());
        assert_eq!(scheduler.state(), SchedulerState::Stopped);

        let handle = scheduler.start(cancel.clone()).unwrap();
        assert_eq!(scheduler.state(), SchedulerState::Running);
        cancel.cancel();
        handle.await.unwrap();
        assert_eq!(scheduler.state(), SchedulerState::Stopped);
    }

    #[tokio::test(start_paused = true)]
    async fn in_flight_refresh_completes_after_stop() {
        let fetcher = CountingFetcher::new(Duration::from_secs(2));
        let (scheduler, cache) = scheduler(fetcher.clone());
        let cancel = CancellationToken::new();

        let handle = scheduler.start(cancel.clone()).unwrap();
        tokio::time::sleep(Duration::from_millis(30_500)).await;
        assert_eq!(fetcher.calls(), 1);
        assert!(cache.read().value().is_empty());

        cancel.cancel();
        handle.await.unwrap();
        assert_eq!(scheduler.state(), SchedulerState::Stopped);

        tokio::time::sleep(Duration::from_secs(2)).await;
        assert_eq!(cache.read().value().as_str(), "state-1");
        assert_eq!(fetcher.calls(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn tick_joins_read_triggered_refresh() {
        let fetcher = CountingFetcher::new(Duration::from_secs(5));
        let cache = Arc::new(StateCache::default());
        let refresher = Arc::new(Refresher::new(
            ResourceId::new("i-123"),
            fetcher.clone(),
            cache.clone(),
        ));
        let scheduler = RefreshScheduler::new(refresher.clone(), Duration::from_secs(30));
        let cancel = CancellationToken::new();
        let handle = scheduler.start(cancel.clone()).unwrap();

        tokio::time::sleep(Duration::from_secs(28)).await;
        assert_eq!(refresher.request_refresh(), RefreshRequest::Started);

        tokio::time::sleep(Duration::from_secs(4)).await;
        assert_eq!(fetcher.calls(), 1);

        tokio::time::sleep(Duration::from_secs(2)).await;
        assert_eq!(cache.read().value().as_str(), "state-1");
        assert_eq!(fetcher.calls(), 1);

        cancel.cancel();
        handle.await.unwrap();
    }
}
