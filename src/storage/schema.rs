//! Database schema initialization and migrations

use anyhow::{Context, Result};
use rusqlite::Connection;
use tracing::{debug, info};

/// Initialize the database schema
pub fn init_schema(conn: &Connection) -> Result<()> {
    debug!("Initializing database schema");

    // Check if elements table exists (to determine if this is a fresh DB)
    let table_exists: bool = conn
        .query_row(
            "SELECT COUNT(*) > 0 FROM sqlite_master WHERE type='table' AND name='elements'",
            [],
            |row| row.get(0),
        )
        .unwrap_or(false);

    if table_exists {
        debug!("Elements table already exists, checking schema");
    } else {
        info!("Creating new database schema");
    }

    conn.execute_batch(
        r#"
        -- Import records group elements and statements created by one import
        CREATE TABLE IF NOT EXISTS import_records (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            name TEXT NOT NULL DEFAULT '',
            uuid TEXT NOT NULL,
            created_at TEXT NOT NULL
        );

        -- Elements: components and systems
        CREATE TABLE IF NOT EXISTS elements (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            name TEXT NOT NULL UNIQUE,
            full_name TEXT,
            description TEXT NOT NULL DEFAULT 'Description needed',
            element_type TEXT,
            component_type TEXT NOT NULL DEFAULT 'software',
            component_state TEXT NOT NULL DEFAULT 'operational',
            oscal_version TEXT NOT NULL DEFAULT '1.0.0',
            uuid TEXT NOT NULL,
            owner TEXT NOT NULL DEFAULT 'local',
            import_record_id INTEGER REFERENCES import_records(id) ON DELETE SET NULL,
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL
        );

        -- Systems wrap one root element
        CREATE TABLE IF NOT EXISTS systems (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            root_element_id INTEGER NOT NULL REFERENCES elements(id) ON DELETE CASCADE,
            fisma_id TEXT,
            owner TEXT NOT NULL DEFAULT 'local',
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL
        );

        -- Statements: control-implementation narratives and special records
        CREATE TABLE IF NOT EXISTS statements (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            sid TEXT,
            sid_class TEXT,
            source TEXT,
            pid TEXT,
            body TEXT NOT NULL DEFAULT '',
            statement_type TEXT NOT NULL,
            status TEXT,
            remarks TEXT,
            version TEXT,
            uuid TEXT NOT NULL,
            producer_element_id INTEGER REFERENCES elements(id) ON DELETE CASCADE,
            consumer_element_id INTEGER REFERENCES elements(id) ON DELETE CASCADE,
            prototype_id INTEGER REFERENCES statements(id) ON DELETE SET NULL,
            import_record_id INTEGER REFERENCES import_records(id) ON DELETE SET NULL,
            change_log TEXT,
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL
        );

        -- Selected controls per element
        CREATE TABLE IF NOT EXISTS element_controls (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            element_id INTEGER NOT NULL REFERENCES elements(id) ON DELETE CASCADE,
            oscal_ctl_id TEXT NOT NULL,
            oscal_catalog_key TEXT NOT NULL,
            status INTEGER NOT NULL DEFAULT 2,
            uuid TEXT NOT NULL,
            smts_updated_at TEXT,
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL,
            UNIQUE(element_id, oscal_ctl_id, oscal_catalog_key)
        );

        -- Cached control catalogs and their baselines
        CREATE TABLE IF NOT EXISTS catalogs (
            catalog_key TEXT PRIMARY KEY,
            catalog_json TEXT NOT NULL,
            baselines_json TEXT,
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL
        );

        -- POA&M details; the weakness description lives in the statement body
        CREATE TABLE IF NOT EXISTS poams (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            statement_id INTEGER NOT NULL UNIQUE REFERENCES statements(id) ON DELETE CASCADE,
            poam_id INTEGER NOT NULL DEFAULT 0,
            controls TEXT,
            weakness_name TEXT,
            weakness_detection_source TEXT,
            weakness_source_identifier TEXT,
            remediation_plan TEXT,
            scheduled_completion_date TEXT,
            milestones TEXT,
            milestone_changes TEXT,
            risk_rating_original TEXT,
            risk_rating_adjusted TEXT,
            poam_group TEXT
        );

        -- Deployments of a system
        CREATE TABLE IF NOT EXISTS deployments (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            system_id INTEGER NOT NULL REFERENCES systems(id) ON DELETE CASCADE,
            name TEXT NOT NULL,
            description TEXT NOT NULL DEFAULT '',
            uuid TEXT NOT NULL,
            inventory_items TEXT,
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL
        );

        -- Assessment results, optionally tied to a deployment
        CREATE TABLE IF NOT EXISTS assessments (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            system_id INTEGER NOT NULL REFERENCES systems(id) ON DELETE CASCADE,
            deployment_id INTEGER REFERENCES deployments(id) ON DELETE SET NULL,
            name TEXT NOT NULL,
            description TEXT,
            uuid TEXT NOT NULL,
            assessment_results TEXT,
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL
        );

        -- Self-issued API tokens
        CREATE TABLE IF NOT EXISTS api_tokens (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            user_sub TEXT NOT NULL,
            name TEXT NOT NULL,
            description TEXT NOT NULL DEFAULT '',
            token_hash TEXT NOT NULL UNIQUE,
            token_prefix TEXT NOT NULL,
            created_at TEXT NOT NULL,
            expires_at TEXT NOT NULL,
            last_used_at TEXT,
            UNIQUE(user_sub, name)
        );

        -- Indexes for common queries
        CREATE INDEX IF NOT EXISTS idx_statements_producer ON statements(producer_element_id);
        CREATE INDEX IF NOT EXISTS idx_statements_consumer ON statements(consumer_element_id);
        CREATE INDEX IF NOT EXISTS idx_statements_type ON statements(statement_type);
        CREATE INDEX IF NOT EXISTS idx_statements_sid ON statements(sid);
        CREATE INDEX IF NOT EXISTS idx_statements_status ON statements(status);
        CREATE INDEX IF NOT EXISTS idx_element_controls_element ON element_controls(element_id);
        CREATE INDEX IF NOT EXISTS idx_elements_import ON elements(import_record_id);
        CREATE INDEX IF NOT EXISTS idx_poams_statement ON poams(statement_id);
        CREATE INDEX IF NOT EXISTS idx_deployments_system ON deployments(system_id);
        CREATE INDEX IF NOT EXISTS idx_assessments_system ON assessments(system_id);
        "#,
    )
    .context("Failed to initialize database schema")?;

    // Enforce foreign keys for cascading deletes
    conn.execute_batch("PRAGMA foreign_keys = ON;")
        .context("Failed to enable foreign keys")?;

    // Run migrations
    run_migrations(conn)?;

    // Log schema details
    let table_count: i64 = conn
        .query_row(
            "SELECT COUNT(*) FROM sqlite_master WHERE type='table' AND name NOT LIKE 'sqlite_%'",
            [],
            |row| row.get(0),
        )
        .unwrap_or(0);

    debug!(tables = table_count, "Database schema initialized");

    Ok(())
}

/// Run database migrations for existing databases
fn run_migrations(conn: &Connection) -> Result<()> {
    // Migration: Add version column to statements if it doesn't exist
    if !column_exists(conn, "statements", "version")? {
        info!("Migrating database: adding statements.version column");
        conn.execute("ALTER TABLE statements ADD COLUMN version TEXT", [])
            .context("Failed to add version column")?;
    }

    // Migration: Add change_log column to statements if it doesn't exist
    if !column_exists(conn, "statements", "change_log")? {
        info!("Migrating database: adding statements.change_log column");
        conn.execute("ALTER TABLE statements ADD COLUMN change_log TEXT", [])
            .context("Failed to add change_log column")?;
    }

    // Migration: Add smts_updated_at column to element_controls if it doesn't exist
    if !column_exists(conn, "element_controls", "smts_updated_at")? {
        info!("Migrating database: adding element_controls.smts_updated_at column");
        conn.execute(
            "ALTER TABLE element_controls ADD COLUMN smts_updated_at TEXT",
            [],
        )
        .context("Failed to add smts_updated_at column")?;
    }

    Ok(())
}

/// Check if a column exists in a table
fn column_exists(conn: &Connection, table: &str, column_name: &str) -> Result<bool> {
    let exists: bool = conn
        .query_row(
            "SELECT COUNT(*) > 0 FROM pragma_table_info(?1) WHERE name=?2",
            [table, column_name],
            |row| row.get(0),
        )
        .unwrap_or(false);
    Ok(exists)
}
