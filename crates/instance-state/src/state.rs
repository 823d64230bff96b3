//! Identifier and value types shared by the fetcher, cache and accessor.

use serde::{
    Deserialize,
    Serialize,
};
use std::fmt;

/// Opaque name of the remote resource whose state is tracked.
///
/// Configured once at startup. An empty identifier means the resource was
/// never configured, in which case no provider query is ever issued.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ResourceId(String);

impl ResourceId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into().trim().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_configured(&self) -> bool {
        !self.0.is_empty()
    }
}

impl From<&str> for ResourceId {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

impl From<String> for ResourceId {
    fn from(id: String) -> Self {
        Self::new(id)
    }
}

impl fmt::Display for ResourceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Lifecycle state as reported by the provider, e.g. `running` or `stopped`.
///
/// Values are defined by the provider and are not enumerated here. The
/// default is the empty state, served until the first successful fetch.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct LifecycleState(String);

impl LifecycleState {
    pub fn new(state: impl Into<String>) -> Self {
        Self(state.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl From<&str> for LifecycleState {
    fn from(state: &str) -> Self {
        Self::new(state)
    }
}

impl From<String> for LifecycleState {
    fn from(state: String) -> Self {
        Self::new(state)
    }
}

impl fmt::Display for LifecycleState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}
