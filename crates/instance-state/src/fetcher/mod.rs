//! Queries the provider for a resource's current lifecycle state.

mod http;

pub use http::HttpStateFetcher;

use crate::state::{
    LifecycleState,
    ResourceId,
};
use async_trait::async_trait;
use std::time::Duration;

/// Why a single provider query did not yield a usable state.
///
/// Callers treat every variant the same way: the cache is left untouched.
/// The variants exist for logs and metrics only.
#[derive(Debug, Clone, thiserror::Error)]
pub enum FetchError {
    #[error("provider request failed: {0}")]
    Transport(String),
    #[error("provider error code {code}: {message}")]
    Provider { code: i32, message: String },
    #[error("resource {0} not found")]
    NotFound(ResourceId),
    #[error("invalid provider response: {0}")]
    InvalidResponse(String),
    #[error("provider did not answer within {0:?}")]
    Timeout(Duration),
}

impl FetchError {
    /// Label used for the `reason` metric dimension.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Transport(_) => "transport",
            Self::Provider { .. } => "provider",
            Self::NotFound(_) => "not_found",
            Self::InvalidResponse(_) => "invalid_response",
            Self::Timeout(_) => "timeout",
        }
    }
}

impl From<reqwest::Error> for FetchError {
    fn from(err: reqwest::Error) -> Self {
        Self::Transport(err.to_string())
    }
}

/// One request/response query against the provider.
///
/// Implementations hold no state about previous answers and never touch
/// the cache.
#[async_trait]
pub trait StateFetcher: Send + Sync {
    async fn fetch_state(&self, resource_id: &ResourceId) -> Result<LifecycleState, FetchError>;
}
