use std::{
    net::SocketAddr,
    sync::Arc,
    time::Duration,
};

use anyhow::Context;
use clap::Parser;
use instance_state::{
    HttpStateFetcher,
    RefreshScheduler,
    Refresher,
    ResourceId,
    StateAccessor,
    StateCache,
};

use crate::server::InstanceStateServer;

#[derive(Parser, Debug, Clone)]
#[command(author, version, about, long_about = None)]
pub struct Config {
    /// Identifier of the tracked instance. Empty runs unconfigured: the state
    /// stays empty and the provider is never queried.
    #[arg(long, env = "INSTANCE_STATE_INSTANCE_ID", default_value = "")]
    pub instance_id: String,
    /// Region passed to the provider with every query
    #[arg(long, env = "INSTANCE_STATE_REGION", default_value = "us-east-1")]
    pub region: String,
    /// JSON-RPC endpoint of the provider gateway
    #[arg(long, env = "INSTANCE_STATE_PROVIDER_URL")]
    pub provider_url: String,
    /// Value of the `Authorization` header sent to the provider gateway
    #[arg(long, env = "INSTANCE_STATE_PROVIDER_AUTH")]
    pub provider_auth: Option<String>,
    /// Status server address
    #[arg(long, env = "INSTANCE_STATE_LISTEN_ADDR", default_value = "0.0.0.0:8080")]
    pub listen_addr: SocketAddr,
    /// Seconds between unconditional refreshes
    #[arg(
        long,
        env = "INSTANCE_STATE_POLL_INTERVAL",
        default_value = "30",
        value_parser = clap::value_parser!(u64).range(1..)
    )]
    pub poll_interval: u64,
    /// Milliseconds a cached value is served without triggering a refresh
    #[arg(long, env = "INSTANCE_STATE_FRESHNESS_WINDOW_MS", default_value = "5000")]
    pub freshness_window_ms: u64,
    /// Seconds before a provider query is abandoned
    #[arg(
        long,
        env = "INSTANCE_STATE_FETCH_TIMEOUT",
        default_value = "10",
        value_parser = clap::value_parser!(u64).range(1..)
    )]
    pub fetch_timeout: u64,
    /// Milliseconds between two read-triggered refreshes. Zero lets every
    /// stale read start a query when none is in flight.
    #[arg(long, env = "INSTANCE_STATE_REFRESH_COOLDOWN_MS", default_value = "0")]
    pub refresh_cooldown_ms: u64,
}

impl Config {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval)
    }

    pub fn freshness_window(&self) -> Duration {
        Duration::from_millis(self.freshness_window_ms)
    }

    pub fn fetch_timeout(&self) -> Duration {
        Duration::from_secs(self.fetch_timeout)
    }

    pub fn refresh_cooldown(&self) -> Duration {
        Duration::from_millis(self.refresh_cooldown_ms)
    }

    /// Wire the cache, refresher, scheduler and status listener together.
    pub async fn build(self) -> anyhow::Result<InstanceStateServer> {
        let resource_id = ResourceId::new(self.instance_id.as_str());
        if resource_id.is_configured() {
            tracing::info!(resource_id = %resource_id, region = %self.region, "Tracking instance state");
        } else {
            tracing::warn!("No instance id configured, state will stay empty");
        }

        let fetcher = match &self.provider_auth {
            Some(auth) => HttpStateFetcher::new_with_auth(&self.provider_url, &self.region, auth),
            None => HttpStateFetcher::new(&self.provider_url, &self.region),
        }
        .context("failed to build provider client")?;

        let cache = Arc::new(StateCache::new(self.freshness_window()));
        let refresher = Arc::new(
            Refresher::new(resource_id, Arc::new(fetcher), cache)
                .with_fetch_timeout(self.fetch_timeout())
                .with_cooldown(self.refresh_cooldown()),
        );
        let scheduler = RefreshScheduler::new(refresher.clone(), self.poll_interval());
        let accessor = StateAccessor::new(refresher);

        let listener = crate::api::bind(self.listen_addr).await?;
        tracing::info!(listen_addr = ?self.listen_addr, "Listening on address");

        Ok(InstanceStateServer {
            listener,
            scheduler,
            accessor,
        })
    }
}
