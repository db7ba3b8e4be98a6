//! Catalog store endpoints

use axum::{
    Json,
    extract::{Path, State},
    http::StatusCode,
};
use serde::Deserialize;
use serde_json::{Value, json};
use tracing::{error, info};

use super::api::{AppState, ListResponse, error_json};
use crate::catalog::Catalog;

#[derive(Deserialize)]
pub struct CatalogUpload {
    pub catalog: Value,
    #[serde(default)]
    pub baselines: Option<Value>,
}

pub async fn list_catalogs(State(state): State<AppState>) -> (StatusCode, Json<Value>) {
    match state.db.list_catalogs() {
        Ok(catalogs) => (StatusCode::OK, Json(json!(ListResponse::new(catalogs)))),
        Err(e) => {
            error!(error = %e, "Failed to list catalogs");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                error_json("Failed to list catalogs"),
            )
        }
    }
}

pub async fn get_catalog(
    State(state): State<AppState>,
    Path(catalog_key): Path<String>,
) -> (StatusCode, Json<Value>) {
    match state.db.get_catalog(&catalog_key) {
        Ok(Some(catalog)) => (StatusCode::OK, Json(catalog)),
        Ok(None) => (
            StatusCode::NOT_FOUND,
            error_json(format!("Catalog '{}' not found", catalog_key)),
        ),
        Err(e) => {
            error!(error = %e, catalog_key = %catalog_key, "Failed to load catalog");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                error_json("Failed to load catalog"),
            )
        }
    }
}

/// Store or replace a catalog. The document is parsed up front so a
/// malformed upload never reaches the store.
pub async fn put_catalog(
    State(state): State<AppState>,
    Path(catalog_key): Path<String>,
    Json(upload): Json<CatalogUpload>,
) -> (StatusCode, Json<Value>) {
    let parsed = match Catalog::from_json(&catalog_key, &upload.catalog) {
        Ok(parsed) => parsed,
        Err(e) => {
            return (
                StatusCode::BAD_REQUEST,
                error_json(format!("Invalid catalog: {}", e)),
            );
        }
    };

    match state
        .db
        .upsert_catalog(&catalog_key, &upload.catalog, upload.baselines.as_ref())
    {
        Ok(()) => {
            info!(
                catalog_key = %catalog_key,
                controls = parsed.controls.len(),
                "Catalog stored"
            );
            (
                StatusCode::OK,
                Json(json!({
                    "catalog_key": catalog_key,
                    "title": parsed.title,
                    "controls": parsed.controls.len(),
                })),
            )
        }
        Err(e) => {
            error!(error = %e, catalog_key = %catalog_key, "Failed to store catalog");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                error_json("Failed to store catalog"),
            )
        }
    }
}

pub async fn delete_catalog(
    State(state): State<AppState>,
    Path(catalog_key): Path<String>,
) -> (StatusCode, Json<Value>) {
    match state.db.delete_catalog(&catalog_key) {
        Ok(true) => {
            info!(catalog_key = %catalog_key, "Catalog deleted");
            (
                StatusCode::OK,
                Json(json!({ "deleted": catalog_key })),
            )
        }
        Ok(false) => (
            StatusCode::NOT_FOUND,
            error_json(format!("Catalog '{}' not found", catalog_key)),
        ),
        Err(e) => {
            error!(error = %e, catalog_key = %catalog_key, "Failed to delete catalog");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                error_json("Failed to delete catalog"),
            )
        }
    }
}

/// Flattened control list for a catalog, with prose assembled and
/// parameter placeholders substituted.
pub async fn list_catalog_controls(
    State(state): State<AppState>,
    Path(catalog_key): Path<String>,
) -> (StatusCode, Json<Value>) {
    let raw = match state.db.get_catalog(&catalog_key) {
        Ok(Some(raw)) => raw,
        Ok(None) => {
            return (
                StatusCode::NOT_FOUND,
                error_json(format!("Catalog '{}' not found", catalog_key)),
            );
        }
        Err(e) => {
            error!(error = %e, catalog_key = %catalog_key, "Failed to load catalog");
            return (
                StatusCode::INTERNAL_SERVER_ERROR,
                error_json("Failed to load catalog"),
            );
        }
    };

    match Catalog::from_json(&catalog_key, &raw) {
        Ok(parsed) => (
            StatusCode::OK,
            Json(json!(ListResponse::new(parsed.controls))),
        ),
        Err(e) => {
            error!(error = %e, catalog_key = %catalog_key, "Stored catalog failed to parse");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                error_json("Stored catalog failed to parse"),
            )
        }
    }
}

/// Look up a single control by id. The id is normalized first, so
/// "AC-2 (3)" and "ac-2.3" find the same control.
pub async fn get_catalog_control(
    State(state): State<AppState>,
    Path((catalog_key, control_id)): Path<(String, String)>,
) -> (StatusCode, Json<Value>) {
    let raw = match state.db.get_catalog(&catalog_key) {
        Ok(Some(raw)) => raw,
        Ok(None) => {
            return (
                StatusCode::NOT_FOUND,
                error_json(format!("Catalog '{}' not found", catalog_key)),
            );
        }
        Err(e) => {
            error!(error = %e, catalog_key = %catalog_key, "Failed to load catalog");
            return (
                StatusCode::INTERNAL_SERVER_ERROR,
                error_json("Failed to load catalog"),
            );
        }
    };

    let parsed = match Catalog::from_json(&catalog_key, &raw) {
        Ok(parsed) => parsed,
        Err(e) => {
            error!(error = %e, catalog_key = %catalog_key, "Stored catalog failed to parse");
            return (
                StatusCode::INTERNAL_SERVER_ERROR,
                error_json("Stored catalog failed to parse"),
            );
        }
    };

    match parsed.get_control(&control_id) {
        Some(control) => (StatusCode::OK, Json(json!(control))),
        None => (
            StatusCode::NOT_FOUND,
            error_json(format!(
                "Control '{}' not found in catalog '{}'",
                control_id, catalog_key
            )),
        ),
    }
}

/// Control families (groups), in catalog order
pub async fn list_catalog_groups(
    State(state): State<AppState>,
    Path(catalog_key): Path<String>,
) -> (StatusCode, Json<Value>) {
    let raw = match state.db.get_catalog(&catalog_key) {
        Ok(Some(raw)) => raw,
        Ok(None) => {
            return (
                StatusCode::NOT_FOUND,
                error_json(format!("Catalog '{}' not found", catalog_key)),
            );
        }
        Err(e) => {
            error!(error = %e, catalog_key = %catalog_key, "Failed to load catalog");
            return (
                StatusCode::INTERNAL_SERVER_ERROR,
                error_json("Failed to load catalog"),
            );
        }
    };

    match Catalog::from_json(&catalog_key, &raw) {
        Ok(parsed) => {
            let mut groups: Vec<Value> = Vec::new();
            for control in &parsed.controls {
                let seen = groups
                    .iter()
                    .any(|g| g.get("id").and_then(Value::as_str) == Some(&control.family_id));
                if !seen {
                    groups.push(json!({
                        "id": control.family_id,
                        "title": control.family_title,
                    }));
                }
            }
            (StatusCode::OK, Json(json!(ListResponse::new(groups))))
        }
        Err(e) => {
            error!(error = %e, catalog_key = %catalog_key, "Stored catalog failed to parse");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                error_json("Stored catalog failed to parse"),
            )
        }
    }
}

pub async fn list_baselines(
    State(state): State<AppState>,
    Path(catalog_key): Path<String>,
) -> (StatusCode, Json<Value>) {
    match state.db.get_baselines(&catalog_key) {
        Ok(Some(baselines)) => (StatusCode::OK, Json(baselines)),
        Ok(None) => (
            StatusCode::NOT_FOUND,
            error_json(format!("No baselines for catalog '{}'", catalog_key)),
        ),
        Err(e) => {
            error!(error = %e, catalog_key = %catalog_key, "Failed to load baselines");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                error_json("Failed to load baselines"),
            )
        }
    }
}

/// Resolve a named baseline to its normalized control-id set.
pub async fn get_baseline_controls(
    State(state): State<AppState>,
    Path((catalog_key, baseline)): Path<(String, String)>,
) -> (StatusCode, Json<Value>) {
    match state.db.get_baseline_controls(&catalog_key, &baseline) {
        Ok(Some(controls)) => (
            StatusCode::OK,
            Json(json!({
                "catalog_key": catalog_key,
                "baseline": baseline,
                "controls": controls,
            })),
        ),
        Ok(None) => (
            StatusCode::NOT_FOUND,
            error_json(format!(
                "Baseline '{}' not found in catalog '{}'",
                baseline, catalog_key
            )),
        ),
        Err(e) => {
            error!(error = %e, catalog_key = %catalog_key, "Failed to resolve baseline");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                error_json("Failed to resolve baseline"),
            )
        }
    }
}
