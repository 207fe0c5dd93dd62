//! State shared across request handlers.

use std::sync::Arc;
use std::time::Instant;

use entitle_sync::{Orchestrator, TriggerPolicy};

/// Application state shared across all handlers.
#[derive(Clone)]
pub struct AppState {
    pub orchestrator: Arc<Orchestrator>,
    /// Policy applied to inbound trigger events.
    pub trigger: TriggerPolicy,
    /// Service startup time for uptime calculation
    pub startup_time: Arc<Instant>,
}

impl AppState {
    pub fn new(orchestrator: Arc<Orchestrator>, trigger: TriggerPolicy) -> Self {
        Self {
            orchestrator,
            trigger,
            startup_time: Arc::new(Instant::now()),
        }
    }

    /// Seconds since the service started.
    pub fn uptime_seconds(&self) -> u64 {
        self.startup_time.elapsed().as_secs()
    }
}
