use std::sync::Arc;

use crate::engine::{DispatchEngine, EngineConfig};
use crate::notify::BroadcastNotifier;
use crate::observability::metrics::Metrics;
use crate::store::StateStore;

pub struct AppState {
    pub engine: Arc<DispatchEngine>,
    pub events: BroadcastNotifier,
    pub metrics: Metrics,
}

impl AppState {
    pub fn new(engine_config: EngineConfig, event_buffer_size: usize) -> Self {
        let events = BroadcastNotifier::new(event_buffer_size);
        let metrics = Metrics::new();
        let engine = DispatchEngine::new(
            Arc::new(StateStore::new()),
            Arc::new(events.clone()),
            metrics.clone(),
            engine_config,
        );

        Self {
            engine: Arc::new(engine),
            events,
            metrics,
        }
    }
}
