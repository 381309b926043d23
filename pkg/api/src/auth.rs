use axum::{
    extract::{Request, State},
    http::{StatusCode, header},
    middleware::Next,
    response::Response,
};
use tracing::warn;

use pkg_admission::UserInfo;
use pkg_constants::labels::CONTROLLER_IDENTITY;

use crate::AppState;

/// Middleware: authenticates the request using a Bearer token and maps it
/// to an identity. The operator token maps to `admin`; the controller
/// token maps to the controller service identity, which is what lets the
/// reconciler's own writes pass admission validation. In a real system
/// this would look up ServiceAccount tokens in the registry.
pub async fn auth_middleware(
    State(state): State<AppState>,
    mut req: Request,
    next: Next,
) -> Result<Response, StatusCode> {
    let auth_header = req.headers().get(header::AUTHORIZATION);

    let token = match auth_header {
        Some(value) => {
            let value_str = value.to_str().map_err(|_| StatusCode::UNAUTHORIZED)?;
            if !value_str.starts_with("Bearer ") {
                return Err(StatusCode::UNAUTHORIZED);
            }
            value_str.trim_start_matches("Bearer ").to_string()
        }
        None => return Err(StatusCode::UNAUTHORIZED),
    };

    let user = if token == state.controller_token {
        UserInfo::new(CONTROLLER_IDENTITY)
    } else if token == state.join_token {
        UserInfo::new("admin")
    } else {
        warn!("Invalid Bearer token provided");
        return Err(StatusCode::UNAUTHORIZED);
    };

    req.extensions_mut().insert(user);
    Ok(next.run(req).await)
}
