//! Deployment and assessment-result endpoints

use axum::{
    Extension, Json,
    extract::{Path, State},
    http::StatusCode,
};
use serde::Deserialize;
use serde_json::{Value, json};
use tracing::{error, info};

use super::api::{AppState, ListResponse, can_edit, error_json, forbidden};
use super::systems::load_system;
use crate::auth::AuthUser;
use crate::storage::DeploymentMeta;

#[derive(Deserialize)]
pub struct DeploymentRequest {
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub inventory_items: Option<Value>,
}

#[derive(Deserialize)]
pub struct AssessmentRequest {
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub deployment_id: Option<i64>,
    pub results: Value,
}

fn load_deployment(
    state: &AppState,
    id: i64,
) -> Result<DeploymentMeta, (StatusCode, Json<Value>)> {
    match state.db.get_deployment(id) {
        Ok(Some(deployment)) => Ok(deployment),
        Ok(None) => Err((
            StatusCode::NOT_FOUND,
            error_json(format!("Deployment {} not found", id)),
        )),
        Err(e) => {
            error!(error = %e, deployment_id = id, "Failed to load deployment");
            Err((
                StatusCode::INTERNAL_SERVER_ERROR,
                error_json("Failed to load deployment"),
            ))
        }
    }
}

fn system_owner(state: &AppState, system_id: i64) -> Option<String> {
    state
        .db
        .get_system(system_id)
        .ok()
        .flatten()
        .map(|s| s.owner)
}

pub async fn list_deployments(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> (StatusCode, Json<Value>) {
    if let Err(resp) = load_system(&state, id) {
        return resp;
    }
    match state.db.list_deployments(id) {
        Ok(deployments) => (StatusCode::OK, Json(json!(ListResponse::new(deployments)))),
        Err(e) => {
            error!(error = %e, system_id = id, "Failed to list deployments");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                error_json("Failed to list deployments"),
            )
        }
    }
}

pub async fn create_deployment(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
    Path(id): Path<i64>,
    Json(request): Json<DeploymentRequest>,
) -> (StatusCode, Json<Value>) {
    let system = match load_system(&state, id) {
        Ok(system) => system,
        Err(resp) => return resp,
    };
    if !can_edit(&user, &system.owner) {
        return forbidden();
    }

    match state.db.create_deployment(
        id,
        &request.name,
        request.description.as_deref().unwrap_or(""),
        request.inventory_items.as_ref(),
    ) {
        Ok(deployment) => {
            info!(
                system_id = id,
                deployment_id = deployment.id,
                name = %deployment.name,
                "Deployment created"
            );
            (StatusCode::CREATED, Json(json!(deployment)))
        }
        Err(e) => {
            error!(error = %e, system_id = id, "Failed to create deployment");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                error_json("Failed to create deployment"),
            )
        }
    }
}

pub async fn get_deployment(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> (StatusCode, Json<Value>) {
    match load_deployment(&state, id) {
        Ok(deployment) => (StatusCode::OK, Json(json!(deployment))),
        Err(resp) => resp,
    }
}

pub async fn update_deployment(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
    Path(id): Path<i64>,
    Json(request): Json<DeploymentRequest>,
) -> (StatusCode, Json<Value>) {
    let deployment = match load_deployment(&state, id) {
        Ok(deployment) => deployment,
        Err(resp) => return resp,
    };
    if let Some(owner) = system_owner(&state, deployment.system_id)
        && !can_edit(&user, &owner)
    {
        return forbidden();
    }

    match state.db.update_deployment(
        id,
        &request.name,
        request.description.as_deref().unwrap_or(""),
        request.inventory_items.as_ref(),
    ) {
        Ok(_) => match load_deployment(&state, id) {
            Ok(updated) => (StatusCode::OK, Json(json!(updated))),
            Err(resp) => resp,
        },
        Err(e) => {
            error!(error = %e, deployment_id = id, "Failed to update deployment");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                error_json("Failed to update deployment"),
            )
        }
    }
}

pub async fn delete_deployment(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
    Path(id): Path<i64>,
) -> (StatusCode, Json<Value>) {
    let deployment = match load_deployment(&state, id) {
        Ok(deployment) => deployment,
        Err(resp) => return resp,
    };
    if let Some(owner) = system_owner(&state, deployment.system_id)
        && !can_edit(&user, &owner)
    {
        return forbidden();
    }

    match state.db.delete_deployment(id) {
        Ok(_) => (StatusCode::OK, Json(json!({ "deleted": id }))),
        Err(e) => {
            error!(error = %e, deployment_id = id, "Failed to delete deployment");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                error_json("Failed to delete deployment"),
            )
        }
    }
}

pub async fn list_assessments(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> (StatusCode, Json<Value>) {
    if let Err(resp) = load_system(&state, id) {
        return resp;
    }
    match state.db.list_assessments(id) {
        Ok(assessments) => (StatusCode::OK, Json(json!(ListResponse::new(assessments)))),
        Err(e) => {
            error!(error = %e, system_id = id, "Failed to list assessments");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                error_json("Failed to list assessments"),
            )
        }
    }
}

/// Record an assessment result, typically posted by a scanner pipeline
/// authenticating with an API token.
pub async fn create_assessment(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
    Path(id): Path<i64>,
    Json(request): Json<AssessmentRequest>,
) -> (StatusCode, Json<Value>) {
    let system = match load_system(&state, id) {
        Ok(system) => system,
        Err(resp) => return resp,
    };
    if !can_edit(&user, &system.owner) {
        return forbidden();
    }

    match state.db.create_assessment(
        id,
        request.deployment_id,
        &request.name,
        request.description.as_deref(),
        &request.results,
    ) {
        Ok(assessment) => {
            info!(
                system_id = id,
                assessment_id = assessment.id,
                name = %assessment.name,
                "Assessment recorded"
            );
            (StatusCode::CREATED, Json(json!(assessment)))
        }
        Err(e) => {
            let msg = e.to_string();
            if msg.contains("not found") || msg.contains("belongs to a different system") {
                (StatusCode::BAD_REQUEST, error_json(msg))
            } else {
                error!(error = %e, system_id = id, "Failed to record assessment");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    error_json("Failed to record assessment"),
                )
            }
        }
    }
}
