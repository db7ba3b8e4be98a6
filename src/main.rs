use anyhow::{Context, Result};
use tracing::{error, info};

use grc_tracker::config::{Command, Config};
use grc_tracker::health::HealthServer;
use grc_tracker::storage::Database;
use grc_tracker::{catalog, logging, oscal, server};

#[tokio::main]
async fn main() -> Result<()> {
    let config = Config::from_args();

    // Handle version subcommand
    if let Some(Command::Version) = &config.command {
        println!("grc-tracker {}", env!("CARGO_PKG_VERSION"));
        return Ok(());
    }

    // Initialize logging
    logging::init(&config.log_format, &config.log_level);

    info!(
        version = env!("CARGO_PKG_VERSION"),
        storage_path = %config.storage_path,
        "grc-tracker starting"
    );

    // Validate configuration
    if let Err(e) = config.validate() {
        error!(error = %e, "Configuration validation failed");
        std::process::exit(1);
    }

    // Offline subcommands run against the database directly, without the server
    match &config.command {
        Some(Command::LoadCatalog {
            catalog_key,
            catalog_file,
            baselines_file,
        }) => {
            return load_catalog(
                &config,
                catalog_key,
                catalog_file,
                baselines_file.as_deref(),
            );
        }
        Some(Command::ImportComponents { file, import_name }) => {
            return import_components(&config, file, import_name.as_deref());
        }
        _ => {}
    }

    // Start health check server
    let health_port = config.health_port;
    let health_server = HealthServer::new();
    let health_server_clone = health_server.clone();

    let (health_ready_tx, health_ready_rx) = tokio::sync::oneshot::channel();
    tokio::spawn(async move {
        if let Err(e) = health_server_clone
            .serve(health_port, health_ready_tx)
            .await
        {
            error!(error = %e, "Health check server failed");
        }
    });

    // Wait for health server to be ready
    health_ready_rx.await.ok();
    info!(port = health_port, "Health check server started");

    // Create shutdown channel
    let (shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);

    let result = tokio::select! {
        result = server::run(config, health_server, shutdown_rx) => result,
        _ = tokio::signal::ctrl_c() => {
            info!("Received shutdown signal");
            let _ = shutdown_tx.send(true);
            Ok(())
        }
    };

    if let Err(e) = result {
        error!(error = %e, "Application error");
        std::process::exit(1);
    }

    info!("Shutdown complete");
    Ok(())
}

/// Parse and store an OSCAL catalog (and optional baselines) from disk.
fn load_catalog(
    config: &Config,
    catalog_key: &str,
    catalog_file: &str,
    baselines_file: Option<&str>,
) -> Result<()> {
    let db = Database::new(&config.get_db_path())?;

    let raw = std::fs::read_to_string(catalog_file)
        .with_context(|| format!("Failed to read catalog file {}", catalog_file))?;
    let catalog_json: serde_json::Value =
        serde_json::from_str(&raw).context("Catalog file is not valid JSON")?;
    let parsed = catalog::Catalog::from_json(catalog_key, &catalog_json)?;

    let baselines = match baselines_file {
        Some(path) => {
            let raw = std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read baselines file {}", path))?;
            Some(serde_json::from_str(&raw).context("Baselines file is not valid JSON")?)
        }
        None => None,
    };

    db.upsert_catalog(catalog_key, &catalog_json, baselines.as_ref())?;
    info!(
        catalog_key,
        title = %parsed.title,
        controls = parsed.controls.len(),
        "Catalog loaded"
    );
    Ok(())
}

/// Import components from an OSCAL component-definition file on disk.
fn import_components(config: &Config, file: &str, import_name: Option<&str>) -> Result<()> {
    let db = Database::new(&config.get_db_path())?;

    let raw = std::fs::read_to_string(file)
        .with_context(|| format!("Failed to read component-definition file {}", file))?;
    let name = import_name.unwrap_or(file);

    let record = oscal::import_components(&db, name, &raw, grc_tracker::auth::LOCAL_USER)?;
    info!(
        import_record_id = record.id,
        elements = record.element_count,
        statements = record.statement_count,
        "Components imported"
    );
    Ok(())
}
