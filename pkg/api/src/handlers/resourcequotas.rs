use axum::{
    Extension, Json,
    extract::{Path as AxumPath, State},
    http::StatusCode,
    response::IntoResponse,
};
use chrono::Utc;
use tracing::{info, warn};

use pkg_admission::{AdmissionResponse, Operation, UserInfo, deletion, spec, status, validation};
use pkg_constants::paths::RESOURCE_QUOTAS_PREFIX;
use pkg_types::event::{EventKind, reason};
use pkg_types::quota::{ResourceQuota, ResourceQuotaStatus};

use crate::AppState;

fn quota_key(ns: &str, name: &str) -> String {
    format!("{}{}/{}", RESOURCE_QUOTAS_PREFIX, ns, name)
}

async fn load_quota(state: &AppState, ns: &str, name: &str) -> Result<ResourceQuota, StatusCode> {
    match state.store.get(&quota_key(ns, name)).await {
        Ok(Some(data)) => {
            serde_json::from_slice(&data).map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)
        }
        Ok(None) => Err(StatusCode::NOT_FOUND),
        Err(_) => Err(StatusCode::INTERNAL_SERVER_ERROR),
    }
}

fn denial(response: &AdmissionResponse) -> axum::response::Response {
    (
        StatusCode::FORBIDDEN,
        response.reason.clone().unwrap_or_default(),
    )
        .into_response()
}

pub async fn create_resource_quota(
    State(state): State<AppState>,
    AxumPath(ns): AxumPath<String>,
    Json(mut quota): Json<ResourceQuota>,
) -> impl IntoResponse {
    quota.namespace = ns.clone();
    quota.resource_version = 1;
    quota.created_at = Utc::now();

    let key = quota_key(&ns, &quota.name);
    match serde_json::to_vec(&quota) {
        Ok(data) => {
            if let Err(e) = state.store.put(&key, &data).await {
                warn!("Failed to create ResourceQuota: {}", e);
                return (StatusCode::INTERNAL_SERVER_ERROR, "Failed").into_response();
            }
            info!("Created ResourceQuota {}/{}", ns, quota.name);
            (StatusCode::CREATED, Json(quota)).into_response()
        }
        Err(_) => (StatusCode::INTERNAL_SERVER_ERROR, "Serialization failed").into_response(),
    }
}

pub async fn list_resource_quotas(
    State(state): State<AppState>,
    AxumPath(ns): AxumPath<String>,
) -> impl IntoResponse {
    let prefix = format!("{}{}/", RESOURCE_QUOTAS_PREFIX, ns);
    let entries = state.store.list_prefix(&prefix).await.unwrap_or_default();
    let quotas: Vec<ResourceQuota> = entries
        .into_iter()
        .filter_map(|(_, v)| serde_json::from_slice(&v).ok())
        .collect();
    (StatusCode::OK, Json(quotas)).into_response()
}

pub async fn get_resource_quota(
    State(state): State<AppState>,
    AxumPath((ns, name)): AxumPath<(String, String)>,
) -> impl IntoResponse {
    match load_quota(&state, &ns, &name).await {
        Ok(quota) => (StatusCode::OK, Json(quota)).into_response(),
        Err(code) => code.into_response(),
    }
}

/// Spec path: an operator (or the controller) requests a new per-namespace
/// cap. The admission chain clamps the increase to the remaining global
/// headroom before the object is persisted.
pub async fn update_resource_quota(
    State(state): State<AppState>,
    AxumPath((ns, name)): AxumPath<(String, String)>,
    Extension(user): Extension<UserInfo>,
    Json(mut updated): Json<ResourceQuota>,
) -> impl IntoResponse {
    let old = match load_quota(&state, &ns, &name).await {
        Ok(q) => q,
        Err(code) => return code.into_response(),
    };

    updated.name = name.clone();
    updated.namespace = ns.clone();

    let verdict = validation::validate(Operation::Update, &user, &old);
    if !verdict.allowed {
        return denial(&verdict);
    }

    let mutated = match spec::mutate_spec(&state.store, &old, &updated).await {
        Ok(response) => response.object.unwrap_or(updated),
        Err(e) => {
            warn!("spec mutation failed for {}/{}: {}", ns, name, e);
            return (StatusCode::INTERNAL_SERVER_ERROR, "Admission failed").into_response();
        }
    };

    let mut saved = mutated;
    // The spec path never touches observed consumption, and labels and
    // ownership are immutable through this endpoint (a quota cannot be
    // adopted into or released from a global quota by editing it).
    saved.status.used = old.status.used.clone();
    saved.labels = old.labels.clone();
    saved.owner_ref = old.owner_ref.clone();
    saved.created_at = old.created_at;
    saved.resource_version = old.resource_version + 1;

    match serde_json::to_vec(&saved) {
        Ok(data) => {
            if let Err(e) = state.store.put(&quota_key(&ns, &name), &data).await {
                warn!("Failed to update ResourceQuota: {}", e);
                return StatusCode::INTERNAL_SERVER_ERROR.into_response();
            }
            (StatusCode::OK, Json(saved)).into_response()
        }
        Err(_) => StatusCode::INTERNAL_SERVER_ERROR.into_response(),
    }
}

/// Status path: the orchestrator's usage tracker publishes fresh
/// `status.used`. The admission chain folds the delta into the global
/// counter and rewrites the namespace-visible hard cap.
pub async fn update_resource_quota_status(
    State(state): State<AppState>,
    AxumPath((ns, name)): AxumPath<(String, String)>,
    Extension(user): Extension<UserInfo>,
    Json(new_status): Json<ResourceQuotaStatus>,
) -> impl IntoResponse {
    let old = match load_quota(&state, &ns, &name).await {
        Ok(q) => q,
        Err(code) => return code.into_response(),
    };

    let verdict = validation::validate(Operation::Update, &user, &old);
    if !verdict.allowed {
        return denial(&verdict);
    }

    let mut updated = old.clone();
    updated.status = new_status;

    let mutated = match status::mutate_status(&state.store, &state.recorder, &old, &updated).await {
        Ok(response) => response.object.unwrap_or(updated),
        Err(e) => {
            warn!("status mutation failed for {}/{}: {}", ns, name, e);
            return (StatusCode::INTERNAL_SERVER_ERROR, "Admission failed").into_response();
        }
    };

    let mut saved = mutated;
    saved.resource_version = old.resource_version + 1;

    match serde_json::to_vec(&saved) {
        Ok(data) => {
            if let Err(e) = state.store.put(&quota_key(&ns, &name), &data).await {
                warn!("Failed to update ResourceQuota status: {}", e);
                return StatusCode::INTERNAL_SERVER_ERROR.into_response();
            }
            (StatusCode::OK, Json(saved)).into_response()
        }
        Err(_) => StatusCode::INTERNAL_SERVER_ERROR.into_response(),
    }
}

pub async fn delete_resource_quota(
    State(state): State<AppState>,
    AxumPath((ns, name)): AxumPath<(String, String)>,
    Extension(user): Extension<UserInfo>,
) -> impl IntoResponse {
    let old = match load_quota(&state, &ns, &name).await {
        Ok(q) => q,
        Err(code) => return code.into_response(),
    };

    let verdict = validation::validate(Operation::Delete, &user, &old);
    if !verdict.allowed {
        state
            .recorder
            .record(
                EventKind::Warning,
                reason::DELETION_DENIED,
                format!("deletion of managed ResourceQuota {} denied", name),
                name.clone(),
                Some(ns.clone()),
            )
            .await;
        return denial(&verdict);
    }

    if let Err(e) = deletion::handle_delete(&state.store, &old).await {
        warn!("deletion admission failed for {}/{}: {}", ns, name, e);
        return (StatusCode::INTERNAL_SERVER_ERROR, "Admission failed").into_response();
    }

    match state.store.delete(&quota_key(&ns, &name)).await {
        Ok(_) => {
            info!("Deleted ResourceQuota {}/{}", ns, name);
            StatusCode::NO_CONTENT.into_response()
        }
        Err(_) => StatusCode::INTERNAL_SERVER_ERROR.into_response(),
    }
}
