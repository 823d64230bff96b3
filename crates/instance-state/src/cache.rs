//! Last-known lifecycle state with its age.
//!
//! The cache never talks to the provider. It only answers "what do we know
//! and how old is it", and accepts the results of completed refreshes.
//! Writes are ticketed so that a refresh issued earlier can never overwrite
//! the result of one issued later, whatever order they complete in.

use crate::state::LifecycleState;
use chrono::{
    DateTime,
    Utc,
};
use parking_lot::RwLock;
use serde::{
    Serialize,
    Serializer,
};
use std::{
    sync::atomic::{
        AtomicU64,
        Ordering,
    },
    time::Duration,
};
use tokio::time::Instant;
use tracing::debug;

/// Age below which a cached value is served without asking for a refresh.
pub const DEFAULT_FRESHNESS_WINDOW: Duration = Duration::from_secs(5);

/// Ordering token handed out when a refresh is issued.
///
/// Tickets are strictly increasing in issue order. A write carrying a ticket
/// older than the one that produced the current entry is rejected.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct RefreshTicket(u64);

impl RefreshTicket {
    pub fn get(self) -> u64 {
        self.0
    }
}

#[derive(Debug, Default)]
struct CachedEntry {
    value: LifecycleState,
    /// Monotonic timestamp of the last applied write. `None` until the first.
    updated_at: Option<Instant>,
    /// Wall-clock time of the same write, for display only.
    updated_at_utc: Option<DateTime<Utc>>,
    /// Ticket of the write that produced this entry, 0 when never written.
    generation: u64,
}

/// Shared cache of one resource's lifecycle state.
#[derive(Debug)]
pub struct StateCache {
    entry: RwLock<CachedEntry>,
    next_ticket: AtomicU64,
    freshness_window: Duration,
}

impl Default for StateCache {
    fn default() -> Self {
        Self::new(DEFAULT_FRESHNESS_WINDOW)
    }
}

impl StateCache {
    /// Creates an empty cache. Every read is stale until the first write.
    pub fn new(freshness_window: Duration) -> Self {
        Self {
            entry: RwLock::new(CachedEntry::default()),
            next_ticket: AtomicU64::new(0),
            freshness_window,
        }
    }

    pub fn freshness_window(&self) -> Duration {
        self.freshness_window
    }

    /// Returns the cached value and its age without blocking on the network.
    pub fn read(&self) -> StateSnapshot {
        let now = Instant::now();
        let entry = self.entry.read();
        let age = entry
            .updated_at
            .map(|updated_at| now.saturating_duration_since(updated_at));
        let stale = age.is_none_or(|age| age >= self.freshness_window);

        StateSnapshot {
            value: entry.value.clone(),
            age,
            updated_at: entry.updated_at_utc,
            generation: entry.generation,
            stale,
        }
    }

    /// Reserves the next ticket. Call this when a refresh is issued, before
    /// the provider is queried.
    pub fn begin_refresh(&self) -> RefreshTicket {
        RefreshTicket(self.next_ticket.fetch_add(1, Ordering::SeqCst) + 1)
    }

    /// Unconditionally replaces the cached value and stamps it with `now`.
    pub fn write(&self, value: LifecycleState) {
        let ticket = self.begin_refresh();
        self.write_ticketed(ticket, value);
    }

    /// Applies `value` if `ticket` is newer than the ticket of the current
    /// entry. Returns whether the write was applied.
    pub fn write_ticketed(&self, ticket: RefreshTicket, value: LifecycleState) -> bool {
        let now = Instant::now();
        let mut entry = self.entry.write();

        if ticket.0 <= entry.generation {
            debug!(
                ticket = ticket.0,
                generation = entry.generation,
                "Dropping refresh result superseded by a newer one"
            );
            return false;
        }

        entry.value = value;
        entry.updated_at = Some(entry.updated_at.map_or(now, |previous| previous.max(now)));
        entry.updated_at_utc = Some(Utc::now());
        entry.generation = ticket.0;
        true
    }
}

/// Result of a cache read.
#[derive(Debug, Clone, Serialize)]
pub struct StateSnapshot {
    #[serde(rename = "state")]
    value: LifecycleState,
    #[serde(rename = "age_ms", serialize_with = "serialize_age_ms")]
    age: Option<Duration>,
    updated_at: Option<DateTime<Utc>>,
    generation: u64,
    stale: bool,
}

impl StateSnapshot {
    pub fn value(&self) -> &LifecycleState {
        &self.value
    }

    pub fn into_value(self) -> LifecycleState {
        self.value
    }

    /// Time since the last successful refresh, `None` if there never was one.
    pub fn age(&self) -> Option<Duration> {
        self.age
    }

    pub fn updated_at(&self) -> Option<DateTime<Utc>> {
        self.updated_at
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Whether the age reached the freshness window (or the cache is empty).
    pub fn is_stale(&self) -> bool {
        self.stale
    }
}

#[allow(clippy::ref_option)]
fn serialize_age_ms<S: Serializer>(age: &Option<Duration>, serializer: S) -> Result<S::Ok, S::Error> {
    match age {
        Some(age) => serializer.serialize_some(&u64::try_from(age.as_millis()).unwrap_or(u64::MAX)),
        None => serializer.serialize_none(),
    }
}
