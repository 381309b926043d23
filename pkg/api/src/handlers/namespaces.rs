use axum::{
    Json,
    extract::{Path as AxumPath, State},
    http::StatusCode,
    response::IntoResponse,
};
use chrono::Utc;
use tracing::{info, warn};

use pkg_constants::paths::{NAMESPACES_PREFIX, RESOURCE_QUOTAS_PREFIX};
use pkg_types::namespace::{Namespace, NamespacePhase};

use crate::AppState;

pub async fn create_namespace(
    State(state): State<AppState>,
    Json(mut ns): Json<Namespace>,
) -> impl IntoResponse {
    ns.phase = NamespacePhase::Active;
    ns.deletion_timestamp = None;
    ns.created_at = Utc::now();
    let key = format!("{}{}", NAMESPACES_PREFIX, ns.name);
    match serde_json::to_vec(&ns) {
        Ok(data) => {
            if let Err(e) = state.store.put(&key, &data).await {
                warn!("Failed to create namespace: {}", e);
                return (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "Failed to create namespace",
                )
                    .into_response();
            }
            info!("Created namespace: {}", ns.name);
            (StatusCode::CREATED, Json(ns)).into_response()
        }
        Err(_) => (StatusCode::INTERNAL_SERVER_ERROR, "Serialization failed").into_response(),
    }
}

pub async fn list_namespaces(State(state): State<AppState>) -> impl IntoResponse {
    let entries = state
        .store
        .list_prefix(NAMESPACES_PREFIX)
        .await
        .unwrap_or_default();
    let namespaces: Vec<Namespace> = entries
        .into_iter()
        .filter_map(|(_, v)| serde_json::from_slice(&v).ok())
        .collect();
    (StatusCode::OK, Json(namespaces)).into_response()
}

/// Replace a namespace's labels. Label changes are what move namespaces in
/// and out of global-quota scope, so this triggers reconciliation through
/// the watch stream.
pub async fn update_namespace(
    State(state): State<AppState>,
    AxumPath(name): AxumPath<String>,
    Json(updated): Json<Namespace>,
) -> impl IntoResponse {
    let key = format!("{}{}", NAMESPACES_PREFIX, name);
    let mut ns: Namespace = match state.store.get(&key).await {
        Ok(Some(data)) => match serde_json::from_slice(&data) {
            Ok(n) => n,
            Err(_) => return StatusCode::INTERNAL_SERVER_ERROR.into_response(),
        },
        Ok(None) => return StatusCode::NOT_FOUND.into_response(),
        Err(_) => return StatusCode::INTERNAL_SERVER_ERROR.into_response(),
    };

    ns.labels = updated.labels;
    match serde_json::to_vec(&ns) {
        Ok(data) => {
            if let Err(e) = state.store.put(&key, &data).await {
                warn!("Failed to update namespace: {}", e);
                return StatusCode::INTERNAL_SERVER_ERROR.into_response();
            }
            (StatusCode::OK, Json(ns)).into_response()
        }
        Err(_) => StatusCode::INTERNAL_SERVER_ERROR.into_response(),
    }
}

/// Delete a namespace. The namespace is first marked Terminating (so
/// reconciles in flight stop considering it), its contained ResourceQuotas
/// are cascaded away, then the object is removed.
pub async fn delete_namespace(
    State(state): State<AppState>,
    AxumPath(name): AxumPath<String>,
) -> impl IntoResponse {
    let key = format!("{}{}", NAMESPACES_PREFIX, name);
    let mut ns: Namespace = match state.store.get(&key).await {
        Ok(Some(data)) => match serde_json::from_slice(&data) {
            Ok(n) => n,
            Err(_) => return StatusCode::INTERNAL_SERVER_ERROR.into_response(),
        },
        Ok(None) => return StatusCode::NOT_FOUND.into_response(),
        Err(_) => return StatusCode::INTERNAL_SERVER_ERROR.into_response(),
    };

    ns.phase = NamespacePhase::Terminating;
    ns.deletion_timestamp = Some(Utc::now());
    if let Ok(data) = serde_json::to_vec(&ns) {
        let _ = state.store.put(&key, &data).await;
    }

    // Cascade: contained quota objects go with the namespace.
    let quota_prefix = format!("{}{}/", RESOURCE_QUOTAS_PREFIX, name);
    if let Ok(entries) = state.store.list_prefix(&quota_prefix).await {
        for (quota_key, _) in entries {
            if let Err(e) = state.store.delete(&quota_key).await {
                warn!("Failed to cascade-delete {}: {}", quota_key, e);
            }
        }
    }

    match state.store.delete(&key).await {
        Ok(_) => {
            info!("Deleted namespace {}", name);
            StatusCode::NO_CONTENT.into_response()
        }
        Err(_) => StatusCode::INTERNAL_SERVER_ERROR.into_response(),
    }
}
