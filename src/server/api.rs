use axum::{
    Json,
    extract::{ConnectInfo, State},
    http::StatusCode,
};
use serde::Serialize;
use serde_json::{Value, json};
use std::net::SocketAddr;
use std::sync::Arc;
use tracing::debug;

use crate::auth::{AuthUser, LOCAL_USER};
use crate::storage::Database;

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub db: Arc<Database>,
    pub auth_enabled: bool,
}

#[derive(Serialize)]
pub struct ListResponse<T> {
    pub total: usize,
    pub items: Vec<T>,
}

impl<T> ListResponse<T> {
    pub fn new(items: Vec<T>) -> Self {
        Self {
            total: items.len(),
            items,
        }
    }
}

pub fn error_json(message: impl Into<String>) -> Json<Value> {
    Json(json!({ "error": message.into() }))
}

/// Write access requires ownership. With auth disabled every request
/// runs as the local user, which owns everything it creates.
pub fn can_edit(user: &AuthUser, owner: &str) -> bool {
    user.sub == owner || user.sub == LOCAL_USER
}

pub fn forbidden() -> (StatusCode, Json<Value>) {
    (
        StatusCode::FORBIDDEN,
        error_json("You do not have permission to modify this resource"),
    )
}

// Health check endpoint
pub async fn healthz(
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    State(state): State<AppState>,
) -> (StatusCode, Json<Value>) {
    debug!(client = %addr, "Health check");

    let element_count = state.db.get_total_element_count().unwrap_or(0);
    let statement_count = state.db.get_total_statement_count().unwrap_or(0);

    (
        StatusCode::OK,
        Json(json!({
            "status": "healthy",
            "elements": element_count,
            "statements": statement_count,
        })),
    )
}

pub async fn get_version() -> (StatusCode, Json<Value>) {
    (
        StatusCode::OK,
        Json(json!({
            "name": env!("CARGO_PKG_NAME"),
            "version": env!("CARGO_PKG_VERSION"),
        })),
    )
}
