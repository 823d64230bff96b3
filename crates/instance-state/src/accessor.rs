//! Read path used by the surrounding service.

use crate::{
    cache::{
        StateCache,
        StateSnapshot,
    },
    metrics,
    scheduler::{
        RefreshRequest,
        Refresher,
    },
    state::LifecycleState,
};
use std::sync::Arc;
use tracing::trace;

/// Cheap, non-blocking view of the tracked resource's state.
///
/// Reads never wait on the provider. A read that finds the value stale
/// asks the [`Refresher`] for a refresh and returns what the cache holds
/// right now, so the first read after an idle period sees the old value.
#[derive(Debug, Clone)]
pub struct StateAccessor {
    cache: Arc<StateCache>,
    refresher: Arc<Refresher>,
}

impl StateAccessor {
    pub fn new(refresher: Arc<Refresher>) -> Self {
        Self {
            cache: refresher.cache().clone(),
            refresher,
        }
    }

    /// Current lifecycle state, possibly stale or empty. Never fails.
    ///
    /// # Panics
    ///
    /// Panics if called outside a Tokio runtime.
    pub fn get_state(&self) -> LifecycleState {
        self.snapshot().into_value()
    }

    /// Like [`Self::get_state`], keeping the age and update metadata.
    ///
    /// # Panics
    ///
    /// Panics if called outside a Tokio runtime.
    pub fn snapshot(&self) -> StateSnapshot {
        let snapshot = self.cache.read();
        metrics::record_cache_age(snapshot.age());

        if snapshot.is_stale() {
            let request = self.refresher.request_refresh();
            if request != RefreshRequest::Throttled {
                trace!(?request, age = ?snapshot.age(), "Stale read requested a refresh");
            }
        }

        snapshot
    }
}
