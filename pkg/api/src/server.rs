use axum::{
    Router, middleware,
    routing::{get, post, put},
};
use chrono::Utc;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tracing::info;

use crate::AppState;
use crate::auth::auth_middleware;
use crate::handlers::{
    admission, globalquotas, metrics as metrics_handler, namespaces, resourcequotas, watch as watch_handler,
};
use pkg_controllers::globalquota::GlobalQuotaController;
use pkg_metrics::MetricsRegistry;
use pkg_state::client::StateStore;
use pkg_state::recorder::Recorder;
use pkg_types::namespace::{Namespace, NamespacePhase};

/// Server configuration passed from the binary's CLI.
pub struct ServerConfig {
    pub addr: SocketAddr,
    pub data_dir: String,
    pub join_token: String,
    pub controller_token: String,
    pub resync_interval: Duration,
    pub fanout_limit: usize,
}

pub async fn start_server(config: ServerConfig) -> anyhow::Result<()> {
    // Initialize core subsystems
    let store = StateStore::new(&config.data_dir).await?;
    let metrics = Arc::new(MetricsRegistry::new());
    let recorder = Recorder::new(store.clone());

    let state = AppState {
        store: store.clone(),
        metrics: metrics.clone(),
        recorder,
        join_token: config.join_token,
        controller_token: config.controller_token,
    };

    // Seed default namespaces
    seed_default_namespaces(&store).await?;

    // Start the GlobalQuotaController background task; the shutdown signal
    // reaches it through the watch channel once the server drains.
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let controller = GlobalQuotaController::new(
        store.clone(),
        metrics,
        shutdown_rx,
        config.resync_interval,
        config.fanout_limit,
    );
    controller.start();

    // Protected API routes
    let api_routes = Router::new()
        // Global quotas (cluster-scoped)
        .route(
            "/api/v1/globalquotas",
            post(globalquotas::create_global_quota).get(globalquotas::list_global_quotas),
        )
        .route(
            "/api/v1/globalquotas/{name}",
            get(globalquotas::get_global_quota).delete(globalquotas::delete_global_quota),
        )
        // Namespaces
        .route(
            "/api/v1/namespaces",
            post(namespaces::create_namespace).get(namespaces::list_namespaces),
        )
        .route(
            "/api/v1/namespaces/{name}",
            put(namespaces::update_namespace).delete(namespaces::delete_namespace),
        )
        // Resource quotas, spec and status paths both admission-chained
        .route(
            "/api/v1/namespaces/{ns}/resourcequotas",
            post(resourcequotas::create_resource_quota).get(resourcequotas::list_resource_quotas),
        )
        .route(
            "/api/v1/namespaces/{ns}/resourcequotas/{name}",
            get(resourcequotas::get_resource_quota)
                .put(resourcequotas::update_resource_quota)
                .delete(resourcequotas::delete_resource_quota),
        )
        .route(
            "/api/v1/namespaces/{ns}/resourcequotas/{name}/status",
            put(resourcequotas::update_resource_quota_status),
        )
        // Watch stream
        .route("/api/v1/watch", get(watch_handler::watch_events))
        // Admission webhook endpoints
        .route("/admission/mutate", post(admission::mutate))
        .route("/admission/validate", post(admission::validate))
        .route_layer(middleware::from_fn_with_state(
            state.clone(),
            auth_middleware,
        ));

    // Public routes + merged
    let app = Router::new()
        .route("/metrics", get(metrics_handler::render_metrics))
        .merge(api_routes)
        .with_state(state);

    info!("Starting API server on {}", config.addr);
    let listener = TcpListener::bind(config.addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            let _ = tokio::signal::ctrl_c().await;
            info!("Shutdown signal received");
            let _ = shutdown_tx.send(true);
        })
        .await?;

    Ok(())
}

/// Seed default and system namespaces on startup.
async fn seed_default_namespaces(store: &StateStore) -> anyhow::Result<()> {
    let namespaces = ["default", "quotad-system"];
    for name in &namespaces {
        let key = format!("{}{}", pkg_constants::paths::NAMESPACES_PREFIX, name);
        if store.get(&key).await?.is_none() {
            let ns = Namespace {
                name: name.to_string(),
                labels: std::collections::HashMap::new(),
                phase: NamespacePhase::Active,
                deletion_timestamp: None,
                created_at: Utc::now(),
            };
            let data = serde_json::to_vec(&ns)?;
            store.put(&key, &data).await?;
            info!("Seeded namespace: {}", name);
        }
    }
    Ok(())
}
