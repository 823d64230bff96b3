//! Prometheus metrics for the refresh path.
//!
//! ## Metrics recorded
//!
//! - `instance_state_refresh_total{status}`: completed refreshes, labelled
//!   `success`, `failure`, `superseded` or `unconfigured`
//! - `instance_state_fetch_failures_total{reason}`: failed provider queries
//!   by [`FetchError::kind`](crate::FetchError::kind)
//! - `instance_state_fetch_duration_seconds`: provider query latency
//! - `instance_state_refresh_coalesced_total`: refresh requests that attached
//!   to one already in flight
//! - `instance_state_refresh_throttled_total`: read-triggered requests dropped
//!   by the cooldown
//! - `instance_state_cache_age_seconds`: age of the value served by the last read
//! - `instance_state_configured`: 1 when a resource id is configured, else 0

use crate::fetcher::FetchError;
use metrics::{
    counter,
    gauge,
    histogram,
};
use std::time::Duration;

pub(crate) fn record_refresh(status: &'static str) {
    counter!("instance_state_refresh_total", "status" => status).increment(1);
}

pub(crate) fn record_fetch(duration: Duration, error: Option<&FetchError>) {
    histogram!("instance_state_fetch_duration_seconds").record(duration);
    if let Some(error) = error {
        counter!("instance_state_fetch_failures_total", "reason" => error.kind()).increment(1);
    }
}

pub(crate) fn record_coalesced() {
    counter!("instance_state_refresh_coalesced_total").increment(1);
}

pub(crate) fn record_throttled() {
    counter!("instance_state_refresh_throttled_total").increment(1);
}

pub(crate) fn record_cache_age(age: Option<Duration>) {
    let seconds = age.map_or(f64::INFINITY, |age| age.as_secs_f64());
    gauge!("instance_state_cache_age_seconds").set(seconds);
}

pub(crate) fn record_configured(configured: bool) {
    gauge!("instance_state_configured").set(if configured { 1.0 } else { 0.0 });
}
