use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use legal_rag::config::AppConfig;
use legal_rag::rag::Orchestrator;

#[derive(Clone)]
pub struct AppState {
    pub orchestrator: Arc<Orchestrator>,
    pub config: AppConfig,
    requests_served: Arc<AtomicU64>,
    shutdown: CancellationToken,
}

impl AppState {
    pub fn new(orchestrator: Arc<Orchestrator>, config: AppConfig) -> Self {
        Self {
            orchestrator,
            config,
            requests_served: Arc::new(AtomicU64::new(0)),
            shutdown: CancellationToken::new(),
        }
    }

    pub fn mark_request_served(&self) {
        self.requests_served.fetch_add(1, Ordering::Relaxed);
    }

    pub fn requests_served(&self) -> u64 {
        self.requests_served.load(Ordering::Relaxed)
    }

    /// Per-request cancellation token, cancelled automatically if the
    /// process-wide shutdown token fires.
    pub fn cancellation_child(&self) -> CancellationToken {
        self.shutdown.child_token()
    }
}
