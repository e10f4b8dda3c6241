use farm_core::control::FarmControlApi;
use std::sync::Arc;

/// Shared application state for every route. Cloned per-request by axum;
/// cheap because the API facade only holds an `Arc<dyn FrameStore>`.
#[derive(Clone)]
pub struct AppState {
    pub api: Arc<FarmControlApi>,
}
