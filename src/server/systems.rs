//! System endpoints: the system record itself, its control selection,
//! control-implementation statements, security levels, rollups, and the
//! system-security-plan export.

use axum::{
    Extension, Json,
    extract::{Path, State},
    http::StatusCode,
};
use serde::Deserialize;
use serde_json::{Value, json};
use tracing::{error, info};

use super::api::{AppState, ListResponse, can_edit, error_json, forbidden};
use crate::auth::AuthUser;
use crate::oscal::{self, DEFAULT_CATALOG_KEY};
use crate::storage::{ControlStatus, StatementInput, StatementType, SystemMeta};

#[derive(Deserialize)]
pub struct SystemRequest {
    pub name: String,
    #[serde(default)]
    pub fisma_id: Option<String>,
}

#[derive(Deserialize)]
pub struct AddControlRequest {
    pub oscal_ctl_id: String,
    #[serde(default)]
    pub oscal_catalog_key: Option<String>,
}

#[derive(Deserialize)]
pub struct ControlStatusRequest {
    pub status: ControlStatus,
}

#[derive(Deserialize)]
pub struct AssignBaselineRequest {
    #[serde(default)]
    pub catalog_key: Option<String>,
    pub baseline: String,
}

/// Creating a statement on a system either instantiates a component's
/// prototype or writes a new statement directly.
#[derive(Deserialize)]
pub struct CreateStatementRequest {
    #[serde(default)]
    pub prototype_id: Option<i64>,
    #[serde(default)]
    pub producer_element_id: Option<i64>,
    #[serde(default)]
    pub statement: Option<StatementInput>,
}

#[derive(Deserialize)]
pub struct SecurityRequest {
    #[serde(default)]
    pub sensitivity_level: Option<String>,
    #[serde(default)]
    pub impact_level: Option<Value>,
}

pub(super) fn load_system(
    state: &AppState,
    id: i64,
) -> Result<SystemMeta, (StatusCode, Json<Value>)> {
    match state.db.get_system(id) {
        Ok(Some(system)) => Ok(system),
        Ok(None) => Err((
            StatusCode::NOT_FOUND,
            error_json(format!("System {} not found", id)),
        )),
        Err(e) => {
            error!(error = %e, system_id = id, "Failed to load system");
            Err((
                StatusCode::INTERNAL_SERVER_ERROR,
                error_json("Failed to load system"),
            ))
        }
    }
}

pub async fn list_systems(State(state): State<AppState>) -> (StatusCode, Json<Value>) {
    match state.db.list_systems() {
        Ok(systems) => (StatusCode::OK, Json(json!(ListResponse::new(systems)))),
        Err(e) => {
            error!(error = %e, "Failed to list systems");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                error_json("Failed to list systems"),
            )
        }
    }
}

pub async fn create_system(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
    Json(request): Json<SystemRequest>,
) -> (StatusCode, Json<Value>) {
    if request.name.trim().is_empty() {
        return (StatusCode::BAD_REQUEST, error_json("System name is required"));
    }

    match state
        .db
        .create_system(&request.name, request.fisma_id.as_deref(), &user.sub)
    {
        Ok(system) => {
            info!(system_id = system.id, name = %system.name, "System created");
            (StatusCode::CREATED, Json(json!(system)))
        }
        Err(e) if e.to_string().contains("already exists") => {
            (StatusCode::CONFLICT, error_json(e.to_string()))
        }
        Err(e) => {
            error!(error = %e, "Failed to create system");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                error_json("Failed to create system"),
            )
        }
    }
}

pub async fn get_system(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> (StatusCode, Json<Value>) {
    match load_system(&state, id) {
        Ok(system) => (StatusCode::OK, Json(json!(system))),
        Err(resp) => resp,
    }
}

pub async fn update_system(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
    Path(id): Path<i64>,
    Json(request): Json<SystemRequest>,
) -> (StatusCode, Json<Value>) {
    let system = match load_system(&state, id) {
        Ok(system) => system,
        Err(resp) => return resp,
    };
    if !can_edit(&user, &system.owner) {
        return forbidden();
    }

    match state
        .db
        .update_system(id, &request.name, request.fisma_id.as_deref())
    {
        Ok(_) => match load_system(&state, id) {
            Ok(updated) => (StatusCode::OK, Json(json!(updated))),
            Err(resp) => resp,
        },
        Err(e) => {
            error!(error = %e, system_id = id, "Failed to update system");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                error_json("Failed to update system"),
            )
        }
    }
}

pub async fn delete_system(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
    Path(id): Path<i64>,
) -> (StatusCode, Json<Value>) {
    let system = match load_system(&state, id) {
        Ok(system) => system,
        Err(resp) => return resp,
    };
    if !can_edit(&user, &system.owner) {
        return forbidden();
    }

    match state.db.delete_system(id) {
        Ok(_) => {
            info!(system_id = id, name = %system.name, "System deleted");
            (StatusCode::OK, Json(json!({ "deleted": id })))
        }
        Err(e) => {
            error!(error = %e, system_id = id, "Failed to delete system");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                error_json("Failed to delete system"),
            )
        }
    }
}

// Control selection

pub async fn list_controls(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> (StatusCode, Json<Value>) {
    let system = match load_system(&state, id) {
        Ok(system) => system,
        Err(resp) => return resp,
    };
    match state.db.list_controls(system.root_element_id) {
        Ok(controls) => (StatusCode::OK, Json(json!(ListResponse::new(controls)))),
        Err(e) => {
            error!(error = %e, system_id = id, "Failed to list controls");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                error_json("Failed to list controls"),
            )
        }
    }
}

pub async fn add_control(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
    Path(id): Path<i64>,
    Json(request): Json<AddControlRequest>,
) -> (StatusCode, Json<Value>) {
    let system = match load_system(&state, id) {
        Ok(system) => system,
        Err(resp) => return resp,
    };
    if !can_edit(&user, &system.owner) {
        return forbidden();
    }

    let catalog_key = request
        .oscal_catalog_key
        .as_deref()
        .unwrap_or(DEFAULT_CATALOG_KEY);
    match state
        .db
        .add_control(system.root_element_id, &request.oscal_ctl_id, catalog_key)
    {
        Ok(control) => {
            info!(
                system_id = id,
                control = %control.oscal_ctl_id,
                catalog_key = %control.oscal_catalog_key,
                "Control added"
            );
            (StatusCode::CREATED, Json(json!(control)))
        }
        Err(e) => {
            error!(error = %e, system_id = id, "Failed to add control");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                error_json("Failed to add control"),
            )
        }
    }
}

pub async fn set_control_status(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
    Path((id, catalog_key, control_id)): Path<(i64, String, String)>,
    Json(request): Json<ControlStatusRequest>,
) -> (StatusCode, Json<Value>) {
    let system = match load_system(&state, id) {
        Ok(system) => system,
        Err(resp) => return resp,
    };
    if !can_edit(&user, &system.owner) {
        return forbidden();
    }

    match state.db.set_control_status(
        system.root_element_id,
        &control_id,
        &catalog_key,
        request.status,
    ) {
        Ok(true) => {
            info!(
                system_id = id,
                control = %control_id,
                status = request.status.label(),
                "Control status updated"
            );
            (
                StatusCode::OK,
                Json(json!({
                    "oscal_ctl_id": control_id,
                    "oscal_catalog_key": catalog_key,
                    "status": request.status,
                })),
            )
        }
        Ok(false) => (
            StatusCode::NOT_FOUND,
            error_json(format!("Control '{}' is not selected", control_id)),
        ),
        Err(e) => {
            error!(error = %e, system_id = id, "Failed to update control status");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                error_json("Failed to update control status"),
            )
        }
    }
}

/// Remove a control from the selection. Implementation statements written
/// against that control are removed with it.
pub async fn remove_control(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
    Path((id, catalog_key, control_id)): Path<(i64, String, String)>,
) -> (StatusCode, Json<Value>) {
    let system = match load_system(&state, id) {
        Ok(system) => system,
        Err(resp) => return resp,
    };
    if !can_edit(&user, &system.owner) {
        return forbidden();
    }

    match state
        .db
        .remove_control(system.root_element_id, &control_id, &catalog_key)
    {
        Ok(true) => {
            info!(system_id = id, control = %control_id, "Control removed");
            (StatusCode::OK, Json(json!({ "removed": control_id })))
        }
        Ok(false) => (
            StatusCode::NOT_FOUND,
            error_json(format!("Control '{}' is not selected", control_id)),
        ),
        Err(e) => {
            error!(error = %e, system_id = id, "Failed to remove control");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                error_json("Failed to remove control"),
            )
        }
    }
}

/// Replace the control selection with a named baseline from a catalog.
/// Controls already selected keep their status and statements.
pub async fn assign_baseline(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
    Path(id): Path<i64>,
    Json(request): Json<AssignBaselineRequest>,
) -> (StatusCode, Json<Value>) {
    let system = match load_system(&state, id) {
        Ok(system) => system,
        Err(resp) => return resp,
    };
    if !can_edit(&user, &system.owner) {
        return forbidden();
    }

    let catalog_key = request.catalog_key.as_deref().unwrap_or(DEFAULT_CATALOG_KEY);
    match state
        .db
        .assign_baseline(system.root_element_id, catalog_key, &request.baseline)
    {
        Ok(diff) => {
            info!(
                system_id = id,
                baseline = %request.baseline,
                added = diff.add.len(),
                removed = diff.remove.len(),
                "Baseline assigned"
            );
            (StatusCode::OK, Json(json!(diff)))
        }
        Err(e) => {
            let msg = e.to_string();
            if msg.contains("not found") {
                (StatusCode::NOT_FOUND, error_json(msg))
            } else {
                error!(error = %e, system_id = id, "Failed to assign baseline");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    error_json("Failed to assign baseline"),
                )
            }
        }
    }
}

// Statements

pub async fn list_statements(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> (StatusCode, Json<Value>) {
    let system = match load_system(&state, id) {
        Ok(system) => system,
        Err(resp) => return resp,
    };
    match state.db.list_statements_for_consumer(
        system.root_element_id,
        Some(StatementType::ControlImplementation),
        None,
    ) {
        Ok(statements) => (StatusCode::OK, Json(json!(ListResponse::new(statements)))),
        Err(e) => {
            error!(error = %e, system_id = id, "Failed to list statements");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                error_json("Failed to list statements"),
            )
        }
    }
}

pub async fn create_statement(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
    Path(id): Path<i64>,
    Json(request): Json<CreateStatementRequest>,
) -> (StatusCode, Json<Value>) {
    let system = match load_system(&state, id) {
        Ok(system) => system,
        Err(resp) => return resp,
    };
    if !can_edit(&user, &system.owner) {
        return forbidden();
    }

    let result = match (request.prototype_id, request.producer_element_id) {
        (Some(prototype_id), _) => state
            .db
            .instantiate_prototype(prototype_id, system.root_element_id),
        (None, Some(producer_id)) => match request.statement {
            Some(input) => state
                .db
                .create_statement(producer_id, system.root_element_id, &input),
            None => {
                return (
                    StatusCode::BAD_REQUEST,
                    error_json("A statement body is required"),
                );
            }
        },
        (None, None) => {
            return (
                StatusCode::BAD_REQUEST,
                error_json("Either prototype_id or producer_element_id is required"),
            );
        }
    };

    match result {
        Ok(statement) => {
            info!(
                system_id = id,
                statement_id = statement.id,
                sid = statement.sid.as_deref().unwrap_or(""),
                "Statement created"
            );
            (StatusCode::CREATED, Json(json!(statement)))
        }
        Err(e) => {
            let msg = e.to_string();
            if msg.contains("not found") || msg.contains("not a prototype") {
                (StatusCode::BAD_REQUEST, error_json(msg))
            } else {
                error!(error = %e, system_id = id, "Failed to create statement");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    error_json("Failed to create statement"),
                )
            }
        }
    }
}

/// Check whether the caller may modify a statement, via the owner of its
/// producer element (or consumer element for orphaned statements).
fn statement_owner(state: &AppState, statement: &crate::storage::StatementMeta) -> Option<String> {
    let element_id = statement
        .producer_element_id
        .or(statement.consumer_element_id)?;
    state
        .db
        .get_element(element_id)
        .ok()
        .flatten()
        .map(|e| e.owner)
}

pub async fn get_statement(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> (StatusCode, Json<Value>) {
    let statement = match state.db.get_statement(id) {
        Ok(Some(statement)) => statement,
        Ok(None) => {
            return (
                StatusCode::NOT_FOUND,
                error_json(format!("Statement {} not found", id)),
            );
        }
        Err(e) => {
            error!(error = %e, statement_id = id, "Failed to load statement");
            return (
                StatusCode::INTERNAL_SERVER_ERROR,
                error_json("Failed to load statement"),
            );
        }
    };

    let sync = state.db.prototype_sync(&statement).ok();
    let change_log = state
        .db
        .get_statement_change_log(id)
        .unwrap_or_else(|_| json!([]));

    let mut body = json!(statement);
    if let Some(map) = body.as_object_mut() {
        map.insert("prototype_synched".to_string(), json!(sync));
        map.insert("change_log".to_string(), change_log);
    }
    (StatusCode::OK, Json(body))
}

pub async fn update_statement(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
    Path(id): Path<i64>,
    Json(input): Json<StatementInput>,
) -> (StatusCode, Json<Value>) {
    let statement = match state.db.get_statement(id) {
        Ok(Some(statement)) => statement,
        Ok(None) => {
            return (
                StatusCode::NOT_FOUND,
                error_json(format!("Statement {} not found", id)),
            );
        }
        Err(e) => {
            error!(error = %e, statement_id = id, "Failed to load statement");
            return (
                StatusCode::INTERNAL_SERVER_ERROR,
                error_json("Failed to load statement"),
            );
        }
    };
    if let Some(owner) = statement_owner(&state, &statement)
        && !can_edit(&user, &owner)
    {
        return forbidden();
    }

    match state.db.update_statement(id, &input) {
        Ok(_) => match state.db.get_statement(id) {
            Ok(Some(updated)) => (StatusCode::OK, Json(json!(updated))),
            Ok(None) => (
                StatusCode::NOT_FOUND,
                error_json(format!("Statement {} not found", id)),
            ),
            Err(e) => {
                error!(error = %e, statement_id = id, "Failed to reload statement");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    error_json("Failed to reload statement"),
                )
            }
        },
        Err(e) => {
            error!(error = %e, statement_id = id, "Failed to update statement");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                error_json("Failed to update statement"),
            )
        }
    }
}

pub async fn delete_statement(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
    Path(id): Path<i64>,
) -> (StatusCode, Json<Value>) {
    let statement = match state.db.get_statement(id) {
        Ok(Some(statement)) => statement,
        Ok(None) => {
            return (
                StatusCode::NOT_FOUND,
                error_json(format!("Statement {} not found", id)),
            );
        }
        Err(e) => {
            error!(error = %e, statement_id = id, "Failed to load statement");
            return (
                StatusCode::INTERNAL_SERVER_ERROR,
                error_json("Failed to load statement"),
            );
        }
    };
    if let Some(owner) = statement_owner(&state, &statement)
        && !can_edit(&user, &owner)
    {
        return forbidden();
    }

    match state.db.delete_statement(id) {
        Ok(_) => (StatusCode::OK, Json(json!({ "deleted": id }))),
        Err(e) => {
            error!(error = %e, statement_id = id, "Failed to delete statement");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                error_json("Failed to delete statement"),
            )
        }
    }
}

/// Copy a statement's content back onto its producer's prototype, or create
/// the prototype if the statement never had one.
pub async fn promote_statement(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
    Path(id): Path<i64>,
) -> (StatusCode, Json<Value>) {
    let statement = match state.db.get_statement(id) {
        Ok(Some(statement)) => statement,
        Ok(None) => {
            return (
                StatusCode::NOT_FOUND,
                error_json(format!("Statement {} not found", id)),
            );
        }
        Err(e) => {
            error!(error = %e, statement_id = id, "Failed to load statement");
            return (
                StatusCode::INTERNAL_SERVER_ERROR,
                error_json("Failed to load statement"),
            );
        }
    };
    if let Some(owner) = statement_owner(&state, &statement)
        && !can_edit(&user, &owner)
    {
        return forbidden();
    }

    match state.db.promote_statement_to_prototype(id) {
        Ok(prototype) => {
            info!(
                statement_id = id,
                prototype_id = prototype.id,
                "Statement promoted to prototype"
            );
            (StatusCode::OK, Json(json!(prototype)))
        }
        Err(e) => {
            error!(error = %e, statement_id = id, "Failed to promote statement");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                error_json("Failed to promote statement"),
            )
        }
    }
}

// Security levels

pub async fn get_security(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> (StatusCode, Json<Value>) {
    if let Err(resp) = load_system(&state, id) {
        return resp;
    }

    let sensitivity = state.db.get_security_sensitivity_level(id).ok().flatten();
    let impact = state.db.get_security_impact_level(id).ok().flatten();
    (
        StatusCode::OK,
        Json(json!({
            "sensitivity_level": sensitivity,
            "impact_level": impact,
        })),
    )
}

pub async fn set_security(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
    Path(id): Path<i64>,
    Json(request): Json<SecurityRequest>,
) -> (StatusCode, Json<Value>) {
    let system = match load_system(&state, id) {
        Ok(system) => system,
        Err(resp) => return resp,
    };
    if !can_edit(&user, &system.owner) {
        return forbidden();
    }

    if let Some(level) = request.sensitivity_level.as_deref()
        && let Err(e) = state.db.set_security_sensitivity_level(id, level)
    {
        error!(error = %e, system_id = id, "Failed to set sensitivity level");
        return (
            StatusCode::INTERNAL_SERVER_ERROR,
            error_json("Failed to set sensitivity level"),
        );
    }
    if let Some(impact) = request.impact_level.as_ref()
        && let Err(e) = state.db.set_security_impact_level(id, impact)
    {
        error!(error = %e, system_id = id, "Failed to set impact level");
        return (
            StatusCode::INTERNAL_SERVER_ERROR,
            error_json("Failed to set impact level"),
        );
    }

    let sensitivity = state.db.get_security_sensitivity_level(id).ok().flatten();
    let impact = state.db.get_security_impact_level(id).ok().flatten();
    (
        StatusCode::OK,
        Json(json!({
            "sensitivity_level": sensitivity,
            "impact_level": impact,
        })),
    )
}

// Rollups and export

/// Dashboard rollup: control workflow counts, per-control component counts,
/// and POA&M status counts.
pub async fn get_summary(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> (StatusCode, Json<Value>) {
    let system = match load_system(&state, id) {
        Ok(system) => system,
        Err(resp) => return resp,
    };

    let root = system.root_element_id;
    let result = state.db.control_status_counts(root).and_then(|status| {
        let components = state.db.control_component_counts(root)?;
        let poams = state.db.poam_status_counts(id)?;
        let selected = state.db.list_controls(root)?.len();
        Ok(json!({
            "system_id": id,
            "name": system.name,
            "controls_selected": selected,
            "control_status_counts": status,
            "control_component_counts": components,
            "poam_status_counts": poams,
        }))
    });

    match result {
        Ok(summary) => (StatusCode::OK, Json(summary)),
        Err(e) => {
            error!(error = %e, system_id = id, "Failed to build system summary");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                error_json("Failed to build system summary"),
            )
        }
    }
}

/// Export the system as an OSCAL system-security-plan.
pub async fn export_ssp(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> (StatusCode, Json<Value>) {
    let system = match load_system(&state, id) {
        Ok(system) => system,
        Err(resp) => return resp,
    };

    let root = match state.db.get_element(system.root_element_id) {
        Ok(Some(root)) => root,
        Ok(None) | Err(_) => {
            error!(system_id = id, "System root element missing");
            return (
                StatusCode::INTERNAL_SERVER_ERROR,
                error_json("System root element missing"),
            );
        }
    };

    let statements = match state.db.list_statements_for_consumer(
        system.root_element_id,
        Some(StatementType::ControlImplementation),
        None,
    ) {
        Ok(statements) => statements,
        Err(e) => {
            error!(error = %e, system_id = id, "Failed to load statements");
            return (
                StatusCode::INTERNAL_SERVER_ERROR,
                error_json("Failed to load statements"),
            );
        }
    };

    // Producer components behind the statements, minus the root element
    let mut producer_ids: Vec<i64> = statements
        .iter()
        .filter_map(|s| s.producer_element_id)
        .filter(|pid| *pid != system.root_element_id)
        .collect();
    producer_ids.sort_unstable();
    producer_ids.dedup();
    let mut components = Vec::with_capacity(producer_ids.len());
    for pid in producer_ids {
        if let Ok(Some(element)) = state.db.get_element(pid) {
            components.push(element);
        }
    }

    let sensitivity = state.db.get_security_sensitivity_level(id).ok().flatten();
    let impact = state.db.get_security_impact_level(id).ok().flatten();

    let ssp = oscal::system_security_plan(
        &system,
        &root,
        &components,
        &statements,
        sensitivity.as_deref(),
        impact.as_ref(),
    );
    (StatusCode::OK, Json(ssp))
}
