//! # `instance-state`
//!
//! Tracks the lifecycle state of one remote resource (for example "is the
//! backing compute instance running") and serves it as a cheap read with
//! bounded staleness.
//!
//! - [`StateCache`] holds the last known value and its age.
//! - [`StateFetcher`] queries the provider; [`HttpStateFetcher`] is the
//!   JSON-RPC gateway client.
//! - [`Refresher`] runs single-flight Fetch→Write refreshes.
//! - [`RefreshScheduler`] refreshes every poll interval until cancelled.
//! - [`StateAccessor`] is the read path; stale reads trigger a refresh
//!   without waiting for it.
//!
//! ```no_run
//! use instance_state::{
//!     HttpStateFetcher, RefreshScheduler, Refresher, ResourceId, StateAccessor, StateCache,
//!     DEFAULT_FRESHNESS_WINDOW, DEFAULT_POLL_INTERVAL,
//! };
//! use std::sync::Arc;
//! use tokio_util::sync::CancellationToken;
//!
//! #[tokio::main]
//! async fn main() {
//!     let cache = Arc::new(StateCache::new(DEFAULT_FRESHNESS_WINDOW));
//!     let fetcher = Arc::new(HttpStateFetcher::new("http://localhost:9545", "us-east-1").unwrap());
//!     let refresher = Arc::new(Refresher::new(ResourceId::new("i-123"), fetcher, cache));
//!
//!     let cancel = CancellationToken::new();
//!     let scheduler = RefreshScheduler::new(refresher.clone(), DEFAULT_POLL_INTERVAL);
//!     let _loop = scheduler.start(cancel.clone()).unwrap();
//!
//!     let accessor = StateAccessor::new(refresher);
//!     println!("Server State: {}", accessor.get_state());
//! }
//! ```

#![allow(clippy::missing_errors_doc)]
#![allow(clippy::must_use_candidate)]

mod accessor;
mod cache;
mod fetcher;
mod metrics;
mod scheduler;
mod state;

pub use accessor::StateAccessor;
pub use cache::{
    DEFAULT_FRESHNESS_WINDOW,
    RefreshTicket,
    StateCache,
    StateSnapshot,
};
pub use fetcher::{
    FetchError,
    HttpStateFetcher,
    StateFetcher,
};
pub use scheduler::{
    DEFAULT_FETCH_TIMEOUT,
    DEFAULT_POLL_INTERVAL,
    RefreshError,
    RefreshHandle,
    RefreshRequest,
    RefreshResult,
    RefreshScheduler,
    Refresher,
    SchedulerError,
    SchedulerState,
};
pub use state::{
    LifecycleState,
    ResourceId,
};
