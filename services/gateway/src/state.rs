use portfolio_engine::hub::BroadcastHub;
use std::sync::Arc;

#[derive(Clone)]
pub struct AppState {
    pub hub: Arc<BroadcastHub>,
}

impl AppState {
    pub fn new(hub: Arc<BroadcastHub>) -> Self {
        Self { hub }
    }
}
