//! Database connection and lifecycle management

use anyhow::{Context, Result};
use rusqlite::Connection;
use std::path::Path;
use std::sync::{Arc, Mutex};
use tracing::{debug, error, info};

use super::schema::init_schema;

/// SQLite database wrapper shared across handlers
pub struct Database {
    pub(super) conn: Arc<Mutex<Connection>>,
    db_path: String,
}

impl Database {
    /// Create a new database connection
    pub fn new(db_path: &str) -> Result<Self> {
        info!(path = %db_path, "Initializing database");

        // Check if database file already exists
        let db_exists = Path::new(db_path).exists();
        if db_exists {
            let metadata = std::fs::metadata(db_path).ok();
            let size = metadata
                .map(|m| Self::format_bytes(m.len()))
                .unwrap_or_else(|| "unknown".to_string());
            info!(path = %db_path, size = %size, "Found existing database file");
        } else {
            info!(path = %db_path, "Creating new database file");
        }

        // Create parent directory if it doesn't exist
        if let Some(parent) = Path::new(db_path).parent()
            && !parent.as_os_str().is_empty()
            && !parent.exists()
        {
            info!(directory = %parent.display(), "Creating database directory");
            std::fs::create_dir_all(parent).context("Failed to create database directory")?;
        }

        // Open database connection
        debug!(path = %db_path, "Opening SQLite connection");
        let conn = Connection::open(db_path)
            .map_err(|e| {
                error!(path = %db_path, error = %e, "Failed to open SQLite database");
                e
            })
            .context("Failed to open SQLite database")?;

        // Get SQLite version
        let sqlite_version: String = conn
            .query_row("SELECT sqlite_version()", [], |row| row.get(0))
            .unwrap_or_else(|_| "unknown".to_string());
        debug!(sqlite_version = %sqlite_version, "SQLite version");

        // Initialize schema
        init_schema(&conn)?;

        let db = Self {
            conn: Arc::new(Mutex::new(conn)),
            db_path: db_path.to_string(),
        };

        // Log final database status
        let (size_bytes, size_human) = db.get_db_size();
        let element_count = db.get_total_element_count().unwrap_or(0);
        let statement_count = db.get_total_statement_count().unwrap_or(0);

        info!(
            path = %db_path,
            size = %size_human,
            size_bytes = size_bytes,
            elements = element_count,
            statements = statement_count,
            sqlite_version = %sqlite_version,
            "Database initialized successfully"
        );

        Ok(db)
    }

    /// Get total element count
    pub fn get_total_element_count(&self) -> Result<i64> {
        let conn = self.conn.lock().unwrap();
        let count: i64 = conn
            .query_row("SELECT COUNT(*) FROM elements", [], |row| row.get(0))
            .unwrap_or(0);
        Ok(count)
    }

    /// Get total statement count
    pub fn get_total_statement_count(&self) -> Result<i64> {
        let conn = self.conn.lock().unwrap();
        let count: i64 = conn
            .query_row("SELECT COUNT(*) FROM statements", [], |row| row.get(0))
            .unwrap_or(0);
        Ok(count)
    }

    /// Get database file size
    pub fn get_db_size(&self) -> (u64, String) {
        match std::fs::metadata(&self.db_path) {
            Ok(metadata) => {
                let size = metadata.len();
                let human = Self::format_bytes(size);
                (size, human)
            }
            Err(_) => (0, "0 B".to_string()),
        }
    }

    /// Format bytes into human-readable string
    pub(super) fn format_bytes(bytes: u64) -> String {
        const KB: u64 = 1024;
        const MB: u64 = KB * 1024;
        const GB: u64 = MB * 1024;

        if bytes >= GB {
            format!("{:.2} GB", bytes as f64 / GB as f64)
        } else if bytes >= MB {
            format!("{:.2} MB", bytes as f64 / MB as f64)
        } else if bytes >= KB {
            format!("{:.2} KB", bytes as f64 / KB as f64)
        } else {
            format!("{} B", bytes)
        }
    }

    /// Current time as an RFC 3339 string, used for all row timestamps
    pub(super) fn now() -> String {
        chrono::Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Secs, true)
    }
}

impl Clone for Database {
    fn clone(&self) -> Self {
        Self {
            conn: self.conn.clone(),
            db_path: self.db_path.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_bytes_bytes() {
        assert_eq!(Database::format_bytes(0), "0 B");
        assert_eq!(Database::format_bytes(512), "512 B");
        assert_eq!(Database::format_bytes(1023), "1023 B");
    }

    #[test]
    fn test_format_bytes_kilobytes() {
        assert_eq!(Database::format_bytes(1024), "1.00 KB");
        assert_eq!(Database::format_bytes(1536), "1.50 KB");
        assert_eq!(Database::format_bytes(10240), "10.00 KB");
    }

    #[test]
    fn test_format_bytes_megabytes() {
        assert_eq!(Database::format_bytes(1024 * 1024), "1.00 MB");
        assert_eq!(Database::format_bytes(1024 * 1024 * 5), "5.00 MB");
        assert_eq!(Database::format_bytes(1024 * 1024 + 512 * 1024), "1.50 MB");
    }

    #[test]
    fn test_database_in_memory() {
        let db = Database::new(":memory:").expect("Failed to create in-memory database");
        assert_eq!(db.get_total_element_count().unwrap(), 0);
        assert_eq!(db.get_total_statement_count().unwrap(), 0);
    }

    #[test]
    fn test_database_on_disk_creates_parent_dir() {
        let dir = tempfile::tempdir().expect("Failed to create temp dir");
        let path = dir.path().join("nested").join("grc.db");
        let db = Database::new(path.to_str().unwrap()).expect("Failed to create database");
        assert_eq!(db.get_total_element_count().unwrap(), 0);
        assert!(path.exists());
    }

    #[test]
    fn test_now_is_rfc3339() {
        let ts = Database::now();
        assert!(chrono::DateTime::parse_from_rfc3339(&ts).is_ok());
    }
}
