//! Self-issued API token endpoints. Tokens are scoped to the caller.

use axum::{
    Extension, Json,
    extract::{Path, State},
    http::StatusCode,
};
use serde::Deserialize;
use serde_json::{Value, json};
use tracing::{error, info};

use super::api::{AppState, ListResponse, error_json};
use crate::auth::AuthUser;

fn default_expiry_days() -> u32 {
    30
}

#[derive(Deserialize)]
pub struct CreateTokenRequest {
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default = "default_expiry_days")]
    pub expires_days: u32,
}

pub async fn list_tokens(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
) -> (StatusCode, Json<Value>) {
    match state.db.list_tokens(&user.sub) {
        Ok(tokens) => (StatusCode::OK, Json(json!(ListResponse::new(tokens)))),
        Err(e) => {
            error!(error = %e, "Failed to list tokens");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                error_json("Failed to list tokens"),
            )
        }
    }
}

/// Create a token. The plaintext is returned once and never stored.
pub async fn create_token(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
    Json(request): Json<CreateTokenRequest>,
) -> (StatusCode, Json<Value>) {
    if request.name.trim().is_empty() {
        return (StatusCode::BAD_REQUEST, error_json("Token name is required"));
    }

    match state.db.create_token(
        &user.sub,
        &request.name,
        request.description.as_deref().unwrap_or(""),
        request.expires_days,
    ) {
        Ok((plaintext, token)) => {
            info!(token_id = token.id, name = %token.name, "API token created");
            (
                StatusCode::CREATED,
                Json(json!({
                    "token": plaintext,
                    "info": token,
                })),
            )
        }
        Err(e) => {
            let msg = e.to_string();
            if msg.contains("already exists") {
                (StatusCode::CONFLICT, error_json(msg))
            } else if msg.contains("expiry") {
                (StatusCode::BAD_REQUEST, error_json(msg))
            } else {
                error!(error = %e, "Failed to create token");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    error_json("Failed to create token"),
                )
            }
        }
    }
}

pub async fn delete_token(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
    Path(id): Path<i64>,
) -> (StatusCode, Json<Value>) {
    match state.db.delete_token(&user.sub, id) {
        Ok(true) => {
            info!(token_id = id, "API token deleted");
            (StatusCode::OK, Json(json!({ "deleted": id })))
        }
        Ok(false) => (
            StatusCode::NOT_FOUND,
            error_json(format!("Token {} not found", id)),
        ),
        Err(e) => {
            error!(error = %e, token_id = id, "Failed to delete token");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                error_json("Failed to delete token"),
            )
        }
    }
}
