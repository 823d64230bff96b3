//! Single-flight Fetch→Write path shared by periodic and read-triggered
//! refreshes.
//!
//! At most one provider query is in flight at any time. Callers arriving
//! while one runs attach to it instead of issuing their own. The query runs
//! on its own task, so it completes (and writes the cache) even if every
//! caller stops waiting for it.

use crate::{
    cache::StateCache,
    fetcher::{
        FetchError,
        StateFetcher,
    },
    metrics,
    state::{
        LifecycleState,
        ResourceId,
    },
};
use futures::{
    FutureExt,
    future::{
        self,
        BoxFuture,
        Shared,
    },
};
use parking_lot::Mutex;
use std::{
    sync::Arc,
    time::Duration,
};
use tokio::time::Instant;
use tracing::{
    debug,
    info,
    instrument,
    warn,
};

/// Upper bound on a single provider query.
pub const DEFAULT_FETCH_TIMEOUT: Duration = Duration::from_secs(10);

/// Why a refresh did not update the cache.
#[derive(Debug, Clone, thiserror::Error)]
pub enum RefreshError {
    #[error("no resource id configured")]
    ConfigurationMissing,
    #[error(transparent)]
    Fetch(#[from] FetchError),
    #[error("refresh result superseded by a newer refresh")]
    Superseded,
    #[error("refresh task aborted before completing")]
    Aborted,
}

pub type RefreshResult = Result<LifecycleState, RefreshError>;

/// Handle to a refresh that may be shared by several waiters.
pub type RefreshHandle = Shared<BoxFuture<'static, RefreshResult>>;

/// What a non-blocking refresh request ended up doing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefreshRequest {
    /// A new provider query was started.
    Started,
    /// A query was already in flight; the request attached to it.
    Joined,
    /// The previous refresh started less than the cooldown ago.
    Throttled,
    /// No resource id is configured, nothing was queried.
    Unconfigured,
}

struct InFlight {
    id: u64,
    handle: RefreshHandle,
}

#[derive(Default)]
struct Slot {
    in_flight: Option<InFlight>,
    last_started: Option<Instant>,
    next_id: u64,
}

/// Runs refreshes of one resource into one cache.
pub struct Refresher {
    resource_id: ResourceId,
    fetcher: Arc<dyn StateFetcher>,
    cache: Arc<StateCache>,
    fetch_timeout: Duration,
    cooldown: Duration,
    slot: Mutex<Slot>,
}

impl std::fmt::Debug for Refresher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Refresher")
            .field("resource_id", &self.resource_id)
            .field("fetch_timeout", &self.fetch_timeout)
            .field("cooldown", &self.cooldown)
            .field("in_flight", &self.is_in_flight())
            .finish_non_exhaustive()
    }
}

impl Refresher {
    /// Creates a refresher with no read-triggered cooldown: every stale read
    /// that finds nothing in flight starts a query.
    pub fn new(
        resource_id: ResourceId,
        fetcher: Arc<dyn StateFetcher>,
        cache: Arc<StateCache>,
    ) -> Self {
        metrics::record_configured(resource_id.is_configured());

        Self {
            resource_id,
            fetcher,
            cache,
            fetch_timeout: DEFAULT_FETCH_TIMEOUT,
            cooldown: Duration::ZERO,
            slot: Mutex::new(Slot::default()),
        }
    }

    #[must_use]
    pub fn with_fetch_timeout(mut self, fetch_timeout: Duration) -> Self {
        self.fetch_timeout = fetch_timeout;
        self
    }

    /// Minimum time between the starts of two read-triggered refreshes.
    #[must_use]
    pub fn with_cooldown(mut self, cooldown: Duration) -> Self {
        self.cooldown = cooldown;
        self
    }

    pub fn resource_id(&self) -> &ResourceId {
        &self.resource_id
    }

    pub fn cache(&self) -> &Arc<StateCache> {
        &self.cache
    }

    pub fn is_in_flight(&self) -> bool {
        self.slot.lock().in_flight.is_some()
    }

    /// Returns a handle to the in-flight refresh, starting one if none runs.
    ///
    /// Ignores the cooldown. Dropping the handle does not cancel the query.
    ///
    /// # Panics
    ///
    /// Panics if called outside a Tokio runtime.
    pub fn refresh(self: &Arc<Self>) -> RefreshHandle {
        let mut slot = self.slot.lock();
        if let Some(in_flight) = &slot.in_flight {
            metrics::record_coalesced();
            return in_flight.handle.clone();
        }

        if !self.resource_id.is_configured() {
            self.report_unconfigured();
            return future::ready(Err(RefreshError::ConfigurationMissing))
                .boxed()
                .shared();
        }

        self.start(&mut slot)
    }

    /// Asks for a refresh without waiting for it.
    ///
    /// Used by stale reads. Attaches to an in-flight refresh if there is one.
    /// With a non-zero cooldown, drops the request if the last refresh
    /// started less than the cooldown ago.
    ///
    /// # Panics
    ///
    /// Panics if called outside a Tokio runtime.
    pub fn request_refresh(self: &Arc<Self>) -> RefreshRequest {
        let mut slot = self.slot.lock();
        if slot.in_flight.is_some() {
            metrics::record_coalesced();
            return RefreshRequest::Joined;
        }

        let now = Instant::now();
        if slot
            .last_started
            .is_some_and(|started| now.saturating_duration_since(started) < self.cooldown)
        {
            metrics::record_throttled();
            return RefreshRequest::Throttled;
        }

        if !self.resource_id.is_configured() {
            slot.last_started = Some(now);
            self.report_unconfigured();
            return RefreshRequest::Unconfigured;
        }

        drop(self.start(&mut slot));
        RefreshRequest::Started
    }

    fn start(self: &Arc<Self>, slot: &mut Slot) -> RefreshHandle {
        let id = slot.next_id;
        slot.next_id += 1;
        slot.last_started = Some(Instant::now());

        let this = Arc::clone(self);
        let task = tokio::spawn(async move {
            let result = this.fetch_and_store().await;
            this.finish(id);
            result
        });

        let handle = async move {
            task.await.unwrap_or_else(|err| {
                warn!(error = ?err, "Refresh task failed to complete");
                Err(RefreshError::Aborted)
            })
        }
        .boxed()
        .shared();

        slot.in_flight = Some(InFlight {
            id,
            handle: handle.clone(),
        });
        debug!(resource_id = %self.resource_id, refresh_id = id, "Started instance state refresh");
        handle
    }

    fn finish(&self, id: u64) {
        let mut slot = self.slot.lock();
        if slot.in_flight.as_ref().is_some_and(|in_flight| in_flight.id == id) {
            slot.in_flight = None;
        }
    }

    fn report_unconfigured(&self) {
        warn!("No instance id configured, skipping state refresh");
        metrics::record_refresh("unconfigured");
    }

    #[instrument(level = "debug", skip(self), fields(resource_id = %self.resource_id))]
    async fn fetch_and_store(&self) -> RefreshResult {
        let ticket = self.cache.begin_refresh();
        let started_at = Instant::now();

        let fetched = match tokio::time::timeout(
            self.fetch_timeout,
            self.fetcher.fetch_state(&self.resource_id),
        )
        .await
        {
            Ok(result) => result,
            Err(_elapsed) => Err(FetchError::Timeout(self.fetch_timeout)),
        };
        metrics::record_fetch(started_at.elapsed(), fetched.as_ref().err());

        let state = match fetched {
            Ok(state) => state,
            Err(err) => {
                warn!(
                    error = %err,
                    resource_id = %self.resource_id,
                    "Failed to get instance state"
                );
                metrics::record_refresh("failure");
                return Err(err.into());
            }
        };

        if !self.cache.write_ticketed(ticket, state.clone()) {
            metrics::record_refresh("superseded");
            return Err(RefreshError::Superseded);
        }

        info!(resource_id = %self.resource_id, state = %state, "Instance state updated");
        metrics::record_refresh("success");
        Ok(state)
    }
}
