use axum::{
    Json,
    extract::{Path as AxumPath, State},
    http::StatusCode,
    response::IntoResponse,
};
use chrono::Utc;
use tracing::{info, warn};

use pkg_constants::labels::GLOBAL_QUOTA_FINALIZER;
use pkg_constants::paths::GLOBAL_QUOTAS_PREFIX;
use pkg_types::globalquota::GlobalResourceQuota;
use pkg_types::validate::validate_global_quota;

use crate::AppState;

pub async fn create_global_quota(
    State(state): State<AppState>,
    Json(mut grq): Json<GlobalResourceQuota>,
) -> impl IntoResponse {
    if let Err(e) = validate_global_quota(&grq) {
        return (StatusCode::BAD_REQUEST, e.to_string()).into_response();
    }

    let key = format!("{}{}", GLOBAL_QUOTAS_PREFIX, grq.name);
    match state.store.get(&key).await {
        Ok(Some(_)) => {
            return (StatusCode::CONFLICT, "GlobalResourceQuota already exists").into_response();
        }
        Ok(None) => {}
        Err(_) => return StatusCode::INTERNAL_SERVER_ERROR.into_response(),
    }

    grq.resource_version = 1;
    grq.finalizers = vec![GLOBAL_QUOTA_FINALIZER.to_string()];
    grq.deletion_timestamp = None;
    grq.status = Default::default();
    grq.status.active = grq.spec.active;
    grq.created_at = Utc::now();

    match serde_json::to_vec(&grq) {
        Ok(data) => {
            if let Err(e) = state.store.put(&key, &data).await {
                warn!("Failed to create GlobalResourceQuota: {}", e);
                return (StatusCode::INTERNAL_SERVER_ERROR, "Failed").into_response();
            }
            info!("Created GlobalResourceQuota {}", grq.name);
            (StatusCode::CREATED, Json(grq)).into_response()
        }
        Err(_) => (StatusCode::INTERNAL_SERVER_ERROR, "Serialization failed").into_response(),
    }
}

pub async fn list_global_quotas(State(state): State<AppState>) -> impl IntoResponse {
    let entries = state
        .store
        .list_prefix(GLOBAL_QUOTAS_PREFIX)
        .await
        .unwrap_or_default();
    let quotas: Vec<GlobalResourceQuota> = entries
        .into_iter()
        .filter_map(|(_, v)| serde_json::from_slice(&v).ok())
        .collect();
    (StatusCode::OK, Json(quotas)).into_response()
}

pub async fn get_global_quota(
    State(state): State<AppState>,
    AxumPath(name): AxumPath<String>,
) -> impl IntoResponse {
    let key = format!("{}{}", GLOBAL_QUOTAS_PREFIX, name);
    match state.store.get(&key).await {
        Ok(Some(data)) => {
            if let Ok(grq) = serde_json::from_slice::<GlobalResourceQuota>(&data) {
                return (StatusCode::OK, Json(grq)).into_response();
            }
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
        Ok(None) => StatusCode::NOT_FOUND.into_response(),
        Err(_) => StatusCode::INTERNAL_SERVER_ERROR.into_response(),
    }
}

/// Deletion is asynchronous: the object is stamped with a deletion
/// timestamp and the controller finishes the teardown once every managed
/// ResourceQuota is garbage-collected (finalizer discipline).
pub async fn delete_global_quota(
    State(state): State<AppState>,
    AxumPath(name): AxumPath<String>,
) -> impl IntoResponse {
    let key = format!("{}{}", GLOBAL_QUOTAS_PREFIX, name);
    let mut grq: GlobalResourceQuota = match state.store.get(&key).await {
        Ok(Some(data)) => match serde_json::from_slice(&data) {
            Ok(g) => g,
            Err(_) => return StatusCode::INTERNAL_SERVER_ERROR.into_response(),
        },
        Ok(None) => return StatusCode::NOT_FOUND.into_response(),
        Err(_) => return StatusCode::INTERNAL_SERVER_ERROR.into_response(),
    };

    if grq.deletion_timestamp.is_none() {
        grq.deletion_timestamp = Some(Utc::now());
        grq.resource_version += 1;
        match serde_json::to_vec(&grq) {
            Ok(data) => {
                if let Err(e) = state.store.put(&key, &data).await {
                    warn!("Failed to mark GlobalResourceQuota for deletion: {}", e);
                    return StatusCode::INTERNAL_SERVER_ERROR.into_response();
                }
            }
            Err(_) => return StatusCode::INTERNAL_SERVER_ERROR.into_response(),
        }
        info!("Marked GlobalResourceQuota {} for deletion", name);
    }
    StatusCode::ACCEPTED.into_response()
}
