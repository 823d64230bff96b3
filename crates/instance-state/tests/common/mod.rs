use async_trait::async_trait;
use instance_state::{
    FetchError,
    LifecycleState,
    ResourceId,
    StateFetcher,
};
use parking_lot::Mutex;
use std::{
    sync::{
        Arc,
        atomic::{
            AtomicUsize,
            Ordering,
        },
    },
    time::Duration,
};

/// Provider stand-in that answers with a configurable delay and outcome.
pub struct StubFetcher {
    delay: Duration,
    outcome: Mutex<Result<LifecycleState, FetchError>>,
    calls: AtomicUsize,
    seen: Mutex<Vec<ResourceId>>,
}

impl StubFetcher {
    pub fn answering(state: &str, delay: Duration) -> Arc<Self> {
        Arc::new(Self {
            delay,
            outcome: Mutex::new(Ok(LifecycleState::from(state))),
            calls: AtomicUsize::new(0),
            seen: Mutex::new(Vec::new()),
        })
    }

    pub fn answer(&self, state: &str) {
        *self.outcome.lock() = Ok(LifecycleState::from(state));
    }

    pub fn fail(&self) {
        *self.outcome.lock() = Err(FetchError::Transport("provider unavailable".to_string()));
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn seen(&self) -> Vec<ResourceId> {
        self.seen.lock().clone()
    }
}

#[async_trait]
impl StateFetcher for StubFetcher {
    async fn fetch_state(&self, resource_id: &ResourceId) -> Result<LifecycleState, FetchError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.seen.lock().push(resource_id.clone());
        tokio::time::sleep(self.delay).await;
        self.outcome.lock().clone()
    }
}
