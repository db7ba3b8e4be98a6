pub mod api;
pub mod assessments;
pub mod catalogs;
pub mod components;
pub mod poams;
pub mod systems;
pub mod tokens;

use anyhow::Result;
use axum::{
    Router, middleware,
    http::{Method, header},
    routing::{delete, get, post, put},
};
use std::net::SocketAddr;
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tracing::info;

use crate::config::Config;
use crate::health::HealthServer;
use crate::storage::Database;
pub use api::AppState;

pub async fn run(
    config: Config,
    health_server: HealthServer,
    mut shutdown: tokio::sync::watch::Receiver<bool>,
) -> Result<()> {
    info!(
        port = config.server_port,
        storage_path = %config.storage_path,
        auth_enabled = config.auth_enabled,
        "Starting server mode"
    );

    // Initialize database
    let db = Arc::new(Database::new(&config.get_db_path())?);

    let state = AppState {
        db,
        auth_enabled: config.auth_enabled,
    };

    let app = build_router(state.clone());

    let addr = SocketAddr::from(([0, 0, 0, 0], config.server_port));
    let listener = tokio::net::TcpListener::bind(addr).await?;

    info!(addr = %addr, "Server listening");

    // Mark as ready
    health_server.set_ready(true);

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
        .with_graceful_shutdown(async move {
            let _ = shutdown.changed().await;
            info!("Server shutting down");
        })
        .await?;

    Ok(())
}

/// Build the full router. Everything under /api/v1 except the version
/// endpoint goes through the auth middleware.
pub fn build_router(state: AppState) -> Router {
    // Configure CORS
    let cors = CorsLayer::new()
        .allow_methods([Method::GET, Method::POST, Method::PUT, Method::DELETE])
        .allow_origin(Any)
        .allow_headers([header::CONTENT_TYPE, header::AUTHORIZATION]);

    let protected = Router::new()
        // Catalogs
        .route("/api/v1/catalogs", get(catalogs::list_catalogs))
        .route(
            "/api/v1/catalogs/{catalog_key}",
            get(catalogs::get_catalog)
                .put(catalogs::put_catalog)
                .delete(catalogs::delete_catalog),
        )
        .route(
            "/api/v1/catalogs/{catalog_key}/controls",
            get(catalogs::list_catalog_controls),
        )
        .route(
            "/api/v1/catalogs/{catalog_key}/controls/{control_id}",
            get(catalogs::get_catalog_control),
        )
        .route(
            "/api/v1/catalogs/{catalog_key}/groups",
            get(catalogs::list_catalog_groups),
        )
        .route(
            "/api/v1/catalogs/{catalog_key}/baselines",
            get(catalogs::list_baselines),
        )
        .route(
            "/api/v1/catalogs/{catalog_key}/baselines/{baseline}",
            get(catalogs::get_baseline_controls),
        )
        // Component library
        .route(
            "/api/v1/components",
            get(components::list_components).post(components::create_component),
        )
        .route(
            "/api/v1/components/import",
            post(components::import_components),
        )
        .route(
            "/api/v1/components/{id}",
            get(components::get_component)
                .put(components::update_component)
                .delete(components::delete_component),
        )
        .route("/api/v1/components/{id}/copy", post(components::copy_component))
        .route(
            "/api/v1/components/{id}/systems",
            get(components::consuming_systems),
        )
        .route(
            "/api/v1/components/{id}/statements",
            get(components::list_component_statements).post(components::create_prototype_statement),
        )
        .route("/api/v1/components/{id}/oscal", get(components::export_oscal))
        .route(
            "/api/v1/components/{id}/opencontrol",
            get(components::export_opencontrol),
        )
        // Import records
        .route("/api/v1/imports", get(components::list_import_records))
        .route("/api/v1/imports/{id}", delete(components::rollback_import))
        // Systems
        .route(
            "/api/v1/systems",
            get(systems::list_systems).post(systems::create_system),
        )
        .route(
            "/api/v1/systems/{id}",
            get(systems::get_system)
                .put(systems::update_system)
                .delete(systems::delete_system),
        )
        .route(
            "/api/v1/systems/{id}/controls",
            get(systems::list_controls).post(systems::add_control),
        )
        .route(
            "/api/v1/systems/{id}/controls/{catalog_key}/{control_id}",
            put(systems::set_control_status).delete(systems::remove_control),
        )
        .route("/api/v1/systems/{id}/baseline", post(systems::assign_baseline))
        .route(
            "/api/v1/systems/{id}/statements",
            get(systems::list_statements).post(systems::create_statement),
        )
        .route(
            "/api/v1/systems/{id}/security",
            get(systems::get_security).put(systems::set_security),
        )
        .route("/api/v1/systems/{id}/summary", get(systems::get_summary))
        .route("/api/v1/systems/{id}/ssp", get(systems::export_ssp))
        // Statements
        .route(
            "/api/v1/statements/{id}",
            get(systems::get_statement)
                .put(systems::update_statement)
                .delete(systems::delete_statement),
        )
        .route(
            "/api/v1/statements/{id}/promote",
            post(systems::promote_statement),
        )
        // POA&Ms
        .route(
            "/api/v1/systems/{id}/poams",
            get(poams::list_poams).post(poams::create_poam),
        )
        .route("/api/v1/systems/{id}/poams/export/csv", get(poams::export_csv))
        .route(
            "/api/v1/poams/{id}",
            get(poams::get_poam).put(poams::update_poam).delete(poams::delete_poam),
        )
        // Deployments and assessments
        .route(
            "/api/v1/systems/{id}/deployments",
            get(assessments::list_deployments).post(assessments::create_deployment),
        )
        .route(
            "/api/v1/deployments/{id}",
            get(assessments::get_deployment)
                .put(assessments::update_deployment)
                .delete(assessments::delete_deployment),
        )
        .route(
            "/api/v1/systems/{id}/assessments",
            get(assessments::list_assessments).post(assessments::create_assessment),
        )
        // API tokens
        .route(
            "/api/v1/tokens",
            get(tokens::list_tokens).post(tokens::create_token),
        )
        .route("/api/v1/tokens/{id}", delete(tokens::delete_token))
        .layer(middleware::from_fn_with_state(
            state.clone(),
            crate::auth::require_auth,
        ));

    Router::new()
        .route("/healthz", get(api::healthz))
        .route("/api/v1/version", get(api::get_version))
        .merge(protected)
        .layer(cors)
        .with_state(state)
}
