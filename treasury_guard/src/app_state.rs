use std::sync::Arc;

use crate::metrics::GuardMetrics;

/// Shared with the ops HTTP handlers.
#[derive(Clone)]
pub struct AppState {
    pub metrics: Arc<GuardMetrics>,
}
