//! POA&M endpoints, including the CSV export

use axum::{
    Extension, Json,
    extract::{Path, State},
    http::{StatusCode, header},
    response::{IntoResponse, Response},
};
use serde::Deserialize;
use serde_json::{Value, json};
use tracing::{error, info};

use super::api::{AppState, ListResponse, can_edit, error_json, forbidden};
use super::systems::load_system;
use crate::auth::AuthUser;
use crate::export;
use crate::storage::{PoamDetails, PoamMeta};

#[derive(Deserialize)]
pub struct PoamRequest {
    #[serde(default)]
    pub body: Option<String>,
    #[serde(default)]
    pub status: Option<String>,
    #[serde(flatten)]
    pub details: PoamDetails,
}

fn load_poam(state: &AppState, id: i64) -> Result<PoamMeta, (StatusCode, Json<Value>)> {
    match state.db.get_poam(id) {
        Ok(Some(poam)) => Ok(poam),
        Ok(None) => Err((
            StatusCode::NOT_FOUND,
            error_json(format!("POA&M {} not found", id)),
        )),
        Err(e) => {
            error!(error = %e, poam_id = id, "Failed to load POA&M");
            Err((
                StatusCode::INTERNAL_SERVER_ERROR,
                error_json("Failed to load POA&M"),
            ))
        }
    }
}

/// Owner of the system the POA&M belongs to, resolved through its statement.
fn poam_owner(state: &AppState, poam: &PoamMeta) -> Option<String> {
    let statement = state.db.get_statement(poam.statement_id).ok().flatten()?;
    let element_id = statement.consumer_element_id?;
    state
        .db
        .get_element(element_id)
        .ok()
        .flatten()
        .map(|e| e.owner)
}

pub async fn list_poams(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> (StatusCode, Json<Value>) {
    if let Err(resp) = load_system(&state, id) {
        return resp;
    }
    match state.db.list_poams(id) {
        Ok(poams) => (StatusCode::OK, Json(json!(ListResponse::new(poams)))),
        Err(e) => {
            error!(error = %e, system_id = id, "Failed to list POA&Ms");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                error_json("Failed to list POA&Ms"),
            )
        }
    }
}

pub async fn create_poam(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
    Path(id): Path<i64>,
    Json(request): Json<PoamRequest>,
) -> (StatusCode, Json<Value>) {
    let system = match load_system(&state, id) {
        Ok(system) => system,
        Err(resp) => return resp,
    };
    if !can_edit(&user, &system.owner) {
        return forbidden();
    }

    let Some(body) = request.body.as_deref().filter(|b| !b.trim().is_empty()) else {
        return (
            StatusCode::BAD_REQUEST,
            error_json("A weakness description is required"),
        );
    };

    match state
        .db
        .create_poam(id, body, request.status.as_deref(), &request.details)
    {
        Ok(poam) => {
            info!(system_id = id, poam_id = poam.poam_id, "POA&M created");
            (StatusCode::CREATED, Json(json!(poam)))
        }
        Err(e) => {
            error!(error = %e, system_id = id, "Failed to create POA&M");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                error_json("Failed to create POA&M"),
            )
        }
    }
}

pub async fn get_poam(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> (StatusCode, Json<Value>) {
    match load_poam(&state, id) {
        Ok(poam) => (StatusCode::OK, Json(json!(poam))),
        Err(resp) => resp,
    }
}

pub async fn update_poam(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
    Path(id): Path<i64>,
    Json(request): Json<PoamRequest>,
) -> (StatusCode, Json<Value>) {
    let poam = match load_poam(&state, id) {
        Ok(poam) => poam,
        Err(resp) => return resp,
    };
    if let Some(owner) = poam_owner(&state, &poam)
        && !can_edit(&user, &owner)
    {
        return forbidden();
    }

    match state.db.update_poam(
        id,
        request.body.as_deref(),
        request.status.as_deref(),
        &request.details,
    ) {
        Ok(_) => match load_poam(&state, id) {
            Ok(updated) => (StatusCode::OK, Json(json!(updated))),
            Err(resp) => resp,
        },
        Err(e) => {
            error!(error = %e, poam_id = id, "Failed to update POA&M");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                error_json("Failed to update POA&M"),
            )
        }
    }
}

pub async fn delete_poam(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
    Path(id): Path<i64>,
) -> (StatusCode, Json<Value>) {
    let poam = match load_poam(&state, id) {
        Ok(poam) => poam,
        Err(resp) => return resp,
    };
    if let Some(owner) = poam_owner(&state, &poam)
        && !can_edit(&user, &owner)
    {
        return forbidden();
    }

    match state.db.delete_poam(id) {
        Ok(_) => (StatusCode::OK, Json(json!({ "deleted": id }))),
        Err(e) => {
            error!(error = %e, poam_id = id, "Failed to delete POA&M");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                error_json("Failed to delete POA&M"),
            )
        }
    }
}

/// Download the system's POA&Ms as a CSV spreadsheet.
pub async fn export_csv(State(state): State<AppState>, Path(id): Path<i64>) -> Response {
    let system = match load_system(&state, id) {
        Ok(system) => system,
        Err(resp) => return resp.into_response(),
    };

    let poams = match state.db.list_poams(id) {
        Ok(poams) => poams,
        Err(e) => {
            error!(error = %e, system_id = id, "Failed to load POA&Ms");
            return (
                StatusCode::INTERNAL_SERVER_ERROR,
                error_json("Failed to load POA&Ms"),
            )
                .into_response();
        }
    };

    let csv = export::poams_to_csv(&poams);
    let filename = export::poam_export_filename(&system.name, system.id);
    info!(system_id = id, rows = poams.len(), filename = %filename, "POA&M export");

    (
        StatusCode::OK,
        [
            (header::CONTENT_TYPE, "text/csv; charset=utf-8".to_string()),
            (
                header::CONTENT_DISPOSITION,
                format!("attachment; filename=\"{}\"", filename),
            ),
        ],
        csv,
    )
        .into_response()
}
