//! Component library endpoints: elements, their prototype statements,
//! OSCAL/OpenControl exports, and component-definition imports.

use axum::{
    Extension, Json,
    extract::{Path, Query, State},
    http::{StatusCode, header},
    response::{IntoResponse, Response},
};
use serde::Deserialize;
use serde_json::{Value, json};
use tracing::{error, info, warn};

use super::api::{AppState, ListResponse, can_edit, error_json, forbidden};
use crate::auth::AuthUser;
use crate::catalog::Catalog;
use crate::oscal::{self, DEFAULT_CATALOG_KEY};
use crate::storage::{ElementInput, ElementMeta, StatementInput, StatementType};

#[derive(Deserialize)]
pub struct ListComponentsQuery {
    #[serde(default)]
    pub element_type: Option<String>,
}

#[derive(Deserialize)]
pub struct CopyRequest {
    pub name: String,
}

#[derive(Deserialize)]
pub struct ImportRequest {
    pub name: String,
    pub data: Value,
}

/// Look up an element or produce the response for a missing/failed lookup.
fn load_element(state: &AppState, id: i64) -> Result<ElementMeta, (StatusCode, Json<Value>)> {
    match state.db.get_element(id) {
        Ok(Some(element)) => Ok(element),
        Ok(None) => Err((
            StatusCode::NOT_FOUND,
            error_json(format!("Element {} not found", id)),
        )),
        Err(e) => {
            error!(error = %e, element_id = id, "Failed to load element");
            Err((
                StatusCode::INTERNAL_SERVER_ERROR,
                error_json("Failed to load element"),
            ))
        }
    }
}

pub async fn list_components(
    State(state): State<AppState>,
    Query(query): Query<ListComponentsQuery>,
) -> (StatusCode, Json<Value>) {
    match state.db.list_elements(query.element_type.as_deref()) {
        Ok(elements) => (StatusCode::OK, Json(json!(ListResponse::new(elements)))),
        Err(e) => {
            error!(error = %e, "Failed to list elements");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                error_json("Failed to list elements"),
            )
        }
    }
}

pub async fn create_component(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
    Json(input): Json<ElementInput>,
) -> (StatusCode, Json<Value>) {
    if input.name.trim().is_empty() {
        return (StatusCode::BAD_REQUEST, error_json("Element name is required"));
    }

    match state.db.create_element(&input, &user.sub, None) {
        Ok(element) => {
            info!(element_id = element.id, name = %element.name, "Element created");
            (StatusCode::CREATED, Json(json!(element)))
        }
        Err(e) if e.to_string().contains("already exists") => {
            (StatusCode::CONFLICT, error_json(e.to_string()))
        }
        Err(e) => {
            error!(error = %e, "Failed to create element");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                error_json("Failed to create element"),
            )
        }
    }
}

pub async fn get_component(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> (StatusCode, Json<Value>) {
    match load_element(&state, id) {
        Ok(element) => (StatusCode::OK, Json(json!(element))),
        Err(resp) => resp,
    }
}

pub async fn update_component(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
    Path(id): Path<i64>,
    Json(input): Json<ElementInput>,
) -> (StatusCode, Json<Value>) {
    let element = match load_element(&state, id) {
        Ok(element) => element,
        Err(resp) => return resp,
    };
    if !can_edit(&user, &element.owner) {
        return forbidden();
    }

    match state.db.update_element(id, &input) {
        Ok(_) => match load_element(&state, id) {
            Ok(updated) => (StatusCode::OK, Json(json!(updated))),
            Err(resp) => resp,
        },
        Err(e) => {
            error!(error = %e, element_id = id, "Failed to update element");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                error_json("Failed to update element"),
            )
        }
    }
}

pub async fn delete_component(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
    Path(id): Path<i64>,
) -> (StatusCode, Json<Value>) {
    let element = match load_element(&state, id) {
        Ok(element) => element,
        Err(resp) => return resp,
    };
    if !can_edit(&user, &element.owner) {
        return forbidden();
    }

    match state.db.delete_element(id) {
        Ok(_) => {
            info!(element_id = id, name = %element.name, "Element deleted");
            (StatusCode::OK, Json(json!({ "deleted": id })))
        }
        Err(e) => {
            error!(error = %e, element_id = id, "Failed to delete element");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                error_json("Failed to delete element"),
            )
        }
    }
}

/// Deep-copy a component and its prototype statements under a new name.
pub async fn copy_component(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
    Path(id): Path<i64>,
    Json(request): Json<CopyRequest>,
) -> (StatusCode, Json<Value>) {
    match state.db.copy_element(id, &request.name, &user.sub) {
        Ok(copy) => {
            info!(
                source_id = id,
                copy_id = copy.id,
                name = %copy.name,
                "Element copied"
            );
            (StatusCode::CREATED, Json(json!(copy)))
        }
        Err(e) => {
            let msg = e.to_string();
            let status = if msg.contains("not found") {
                StatusCode::NOT_FOUND
            } else if msg.contains("already exists") || msg.contains("not permitted") {
                StatusCode::CONFLICT
            } else {
                error!(error = %e, element_id = id, "Failed to copy element");
                StatusCode::INTERNAL_SERVER_ERROR
            };
            (status, error_json(msg))
        }
    }
}

/// Systems that consume at least one statement produced by this component.
pub async fn consuming_systems(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> (StatusCode, Json<Value>) {
    if let Err(resp) = load_element(&state, id) {
        return resp;
    }
    match state.db.consuming_systems(id) {
        Ok(systems) => (StatusCode::OK, Json(json!(ListResponse::new(systems)))),
        Err(e) => {
            error!(error = %e, element_id = id, "Failed to list consuming systems");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                error_json("Failed to list consuming systems"),
            )
        }
    }
}

pub async fn list_component_statements(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> (StatusCode, Json<Value>) {
    if let Err(resp) = load_element(&state, id) {
        return resp;
    }
    match state
        .db
        .list_statements_for_producer(id, Some(StatementType::ControlImplementationPrototype))
    {
        Ok(statements) => (StatusCode::OK, Json(json!(ListResponse::new(statements)))),
        Err(e) => {
            error!(error = %e, element_id = id, "Failed to list statements");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                error_json("Failed to list statements"),
            )
        }
    }
}

pub async fn create_prototype_statement(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
    Path(id): Path<i64>,
    Json(input): Json<StatementInput>,
) -> (StatusCode, Json<Value>) {
    let element = match load_element(&state, id) {
        Ok(element) => element,
        Err(resp) => return resp,
    };
    if !can_edit(&user, &element.owner) {
        return forbidden();
    }

    match state.db.create_prototype_statement(id, &input) {
        Ok(statement) => {
            info!(
                element_id = id,
                statement_id = statement.id,
                sid = statement.sid.as_deref().unwrap_or(""),
                "Prototype statement created"
            );
            (StatusCode::CREATED, Json(json!(statement)))
        }
        Err(e) => {
            error!(error = %e, element_id = id, "Failed to create statement");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                error_json("Failed to create statement"),
            )
        }
    }
}

/// Export a component as an OSCAL component-definition document.
pub async fn export_oscal(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> (StatusCode, Json<Value>) {
    let element = match load_element(&state, id) {
        Ok(element) => element,
        Err(resp) => return resp,
    };
    match state
        .db
        .list_statements_for_producer(id, Some(StatementType::ControlImplementationPrototype))
    {
        Ok(statements) => (
            StatusCode::OK,
            Json(oscal::component_definition(&element, &statements)),
        ),
        Err(e) => {
            error!(error = %e, element_id = id, "Failed to export component definition");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                error_json("Failed to export component definition"),
            )
        }
    }
}

/// Export a component as an OpenControl component YAML document.
pub async fn export_opencontrol(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Response {
    let element = match load_element(&state, id) {
        Ok(element) => element,
        Err(resp) => return resp.into_response(),
    };
    let statements = match state
        .db
        .list_statements_for_producer(id, Some(StatementType::ControlImplementationPrototype))
    {
        Ok(statements) => statements,
        Err(e) => {
            error!(error = %e, element_id = id, "Failed to load statements");
            return (
                StatusCode::INTERNAL_SERVER_ERROR,
                error_json("Failed to load statements"),
            )
                .into_response();
        }
    };

    // Control titles come from the statements' catalog when it is cached
    let catalog_key = statements
        .iter()
        .find_map(|s| s.source.clone().or_else(|| s.sid_class.clone()))
        .unwrap_or_else(|| DEFAULT_CATALOG_KEY.to_string());
    let catalog = state
        .db
        .get_catalog(&catalog_key)
        .ok()
        .flatten()
        .and_then(|raw| Catalog::from_json(&catalog_key, &raw).ok());

    match oscal::opencontrol_component(&element, &statements, catalog.as_ref()) {
        Ok(yaml) => (
            StatusCode::OK,
            [(header::CONTENT_TYPE, "text/yaml; charset=utf-8")],
            yaml,
        )
            .into_response(),
        Err(e) => {
            error!(error = %e, element_id = id, "Failed to export OpenControl component");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                error_json("Failed to export OpenControl component"),
            )
                .into_response()
        }
    }
}

/// Import components from an OSCAL component-definition document.
pub async fn import_components(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
    Json(request): Json<ImportRequest>,
) -> (StatusCode, Json<Value>) {
    let raw = request.data.to_string();
    match oscal::import_components(&state.db, &request.name, &raw, &user.sub) {
        Ok(record) => {
            info!(
                import_record_id = record.id,
                elements = record.element_count,
                statements = record.statement_count,
                "Component import finished"
            );
            (StatusCode::CREATED, Json(json!(record)))
        }
        Err(e) => {
            warn!(error = %e, name = %request.name, "Component import rejected");
            (StatusCode::BAD_REQUEST, error_json(e.to_string()))
        }
    }
}

pub async fn list_import_records(State(state): State<AppState>) -> (StatusCode, Json<Value>) {
    match state.db.list_import_records() {
        Ok(records) => (StatusCode::OK, Json(json!(ListResponse::new(records)))),
        Err(e) => {
            error!(error = %e, "Failed to list import records");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                error_json("Failed to list import records"),
            )
        }
    }
}

/// Undo an import: delete the record plus every element and statement it created.
pub async fn rollback_import(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> (StatusCode, Json<Value>) {
    match state.db.rollback_import(id) {
        Ok(Some((elements, statements))) => {
            info!(
                import_record_id = id,
                elements, statements, "Import rolled back"
            );
            (
                StatusCode::OK,
                Json(json!({
                    "deleted_elements": elements,
                    "deleted_statements": statements,
                })),
            )
        }
        Ok(None) => (
            StatusCode::NOT_FOUND,
            error_json(format!("Import record {} not found", id)),
        ),
        Err(e) => {
            error!(error = %e, import_record_id = id, "Failed to roll back import");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                error_json("Failed to roll back import"),
            )
        }
    }
}
