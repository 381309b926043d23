use axum::{Json, extract::State, http::StatusCode, response::IntoResponse};
use serde::Deserialize;
use tracing::warn;

use pkg_admission::{AdmissionResponse, Operation, UserInfo, deletion, spec, status, validation};
use pkg_types::quota::ResourceQuota;

use crate::AppState;

/// Webhook-shaped admission request: the verb, the authenticated caller,
/// and the new/old object pair the verb applies to.
#[derive(Debug, Deserialize)]
pub struct AdmissionReview {
    pub operation: Operation,
    pub user: UserInfo,
    #[serde(default)]
    pub object: Option<ResourceQuota>,
    #[serde(default)]
    pub old_object: Option<ResourceQuota>,
}

/// POST /admission/mutate — the mutation chain for ResourceQuota
/// create/update/delete. Fail-closed: malformed requests are denied.
pub async fn mutate(
    State(state): State<AppState>,
    Json(review): Json<AdmissionReview>,
) -> impl IntoResponse {
    let response = match review.operation {
        Operation::Create => AdmissionResponse::allow_unchanged(),
        Operation::Update => {
            let (Some(object), Some(old_object)) = (&review.object, &review.old_object) else {
                return (StatusCode::UNPROCESSABLE_ENTITY, "missing object pair").into_response();
            };
            let result = if object.spec.hard != old_object.spec.hard {
                spec::mutate_spec(&state.store, old_object, object).await
            } else {
                status::mutate_status(&state.store, &state.recorder, old_object, object).await
            };
            match result {
                Ok(response) => response,
                Err(e) => {
                    warn!("admission mutation failed: {}", e);
                    return (StatusCode::INTERNAL_SERVER_ERROR, "admission failed")
                        .into_response();
                }
            }
        }
        Operation::Delete => {
            let Some(old_object) = &review.old_object else {
                return (StatusCode::UNPROCESSABLE_ENTITY, "missing old object").into_response();
            };
            match deletion::handle_delete(&state.store, old_object).await {
                Ok(response) => response,
                Err(e) => {
                    warn!("admission deletion failed: {}", e);
                    return (StatusCode::INTERNAL_SERVER_ERROR, "admission failed")
                        .into_response();
                }
            }
        }
    };
    (StatusCode::OK, Json(response)).into_response()
}

/// POST /admission/validate — denies direct user mutation of managed
/// ResourceQuotas.
pub async fn validate(
    State(_state): State<AppState>,
    Json(review): Json<AdmissionReview>,
) -> impl IntoResponse {
    let subject = review.object.as_ref().or(review.old_object.as_ref());
    let Some(quota) = subject else {
        return (StatusCode::UNPROCESSABLE_ENTITY, "missing object").into_response();
    };
    let response = validation::validate(review.operation, &review.user, quota);
    (StatusCode::OK, Json(response)).into_response()
}
