pub mod auth;
pub mod handlers;
pub mod server;

use std::sync::Arc;

use pkg_metrics::MetricsRegistry;
use pkg_state::client::StateStore;
use pkg_state::recorder::Recorder;

/// Shared application state injected into all Axum handlers.
#[derive(Clone)]
pub struct AppState {
    pub store: StateStore,
    pub metrics: Arc<MetricsRegistry>,
    pub recorder: Recorder,
    pub join_token: String,
    pub controller_token: String,
}
