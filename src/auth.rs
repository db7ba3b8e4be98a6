//! Authentication middleware for protecting routes

use axum::{
    body::Body,
    extract::State,
    http::{Request, StatusCode, header},
    middleware::Next,
    response::{IntoResponse, Response},
};
use tracing::{debug, warn};

use crate::server::AppState;

/// User everything is attributed to when authentication is disabled
pub const LOCAL_USER: &str = "local";

/// The authenticated caller, inserted as a request extension
#[derive(Debug, Clone)]
pub struct AuthUser {
    pub sub: String,
}

/// Middleware that requires authentication for protected routes.
///
/// With authentication disabled (the default for single-user setups), every
/// request runs as the local user. Otherwise a self-issued API token is
/// required: `Authorization: Bearer gt_...`.
pub async fn require_auth(
    State(state): State<AppState>,
    mut request: Request<Body>,
    next: Next,
) -> Response {
    if !state.auth_enabled {
        request.extensions_mut().insert(AuthUser {
            sub: LOCAL_USER.to_string(),
        });
        return next.run(request).await;
    }

    if let Some(auth_header) = request.headers().get(header::AUTHORIZATION)
        && let Ok(auth_value) = auth_header.to_str()
        && let Some(token) = auth_value.strip_prefix("Bearer ")
        && token.starts_with("gt_")
    {
        match state.db.validate_token(token) {
            Ok(Some(user_sub)) => {
                debug!(user_sub = %user_sub, "Authenticated via API token");
                request.extensions_mut().insert(AuthUser { sub: user_sub });
                return next.run(request).await;
            }
            Ok(None) => {
                warn!("API token validation failed: invalid or expired");
            }
            Err(e) => {
                warn!(error = %e, "API token validation error");
            }
        }
    }

    (
        StatusCode::UNAUTHORIZED,
        axum::Json(serde_json::json!({
            "error": "Authentication required",
        })),
    )
        .into_response()
}
