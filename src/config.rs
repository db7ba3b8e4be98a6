use clap::{Parser, Subcommand};

// ============================================
// Environment variable name constants
// These are shared between config parsing and API exposure
// ============================================
pub mod env {
    pub const LOG_FORMAT: &str = "LOG_FORMAT";
    pub const LOG_LEVEL: &str = "LOG_LEVEL";
    pub const HEALTH_PORT: &str = "HEALTH_PORT";
    pub const SERVER_PORT: &str = "SERVER_PORT";
    pub const STORAGE_PATH: &str = "STORAGE_PATH";
    pub const AUTH_ENABLED: &str = "AUTH_ENABLED";
}

#[derive(Subcommand, Debug, Clone)]
pub enum Command {
    /// Show version information
    Version,
    /// Load an OSCAL catalog JSON file (and optional baselines) into the database
    LoadCatalog {
        /// Catalog key, e.g. NIST_SP-800-53_rev5
        #[arg(long)]
        catalog_key: String,
        /// Path to the OSCAL catalog JSON file
        #[arg(long)]
        catalog_file: String,
        /// Path to a baselines JSON file keyed by baseline name
        #[arg(long)]
        baselines_file: Option<String>,
    },
    /// Import components from an OSCAL component-definition JSON file
    ImportComponents {
        /// Path to the component-definition JSON file
        #[arg(long)]
        file: String,
        /// Name recorded on the import record (defaults to the file name)
        #[arg(long)]
        import_name: Option<String>,
    },
}

#[derive(Parser, Debug, Clone)]
#[command(
    name = "grc-tracker",
    version,
    about = "Compliance control tracking server with OSCAL and OpenControl export",
    long_about = "Tracks security control selection and implementation narratives for \
systems and components, plans of action and milestones, and assessment results, and \
exports OSCAL JSON and OpenControl YAML artifacts for audits and system security plans."
)]
pub struct Config {
    #[command(subcommand)]
    pub command: Option<Command>,

    /// Log format: json or pretty
    #[arg(long, env = env::LOG_FORMAT, default_value = "json")]
    pub log_format: String,

    /// Log level: trace, debug, info, warn, error
    #[arg(long, env = env::LOG_LEVEL, default_value = "info")]
    pub log_level: String,

    /// Health check server port
    #[arg(long, env = env::HEALTH_PORT, default_value = "8080")]
    pub health_port: u16,

    /// API server port
    #[arg(long, env = env::SERVER_PORT, default_value = "3000")]
    pub server_port: u16,

    /// Storage path for the SQLite database
    #[arg(long, env = env::STORAGE_PATH, default_value = "/data")]
    pub storage_path: String,

    /// Require bearer-token authentication on mutating endpoints
    #[arg(long, env = env::AUTH_ENABLED, default_value = "false")]
    pub auth_enabled: bool,
}

impl Config {
    pub fn from_args() -> Self {
        Config::parse()
    }

    /// Validate configuration before start
    pub fn validate(&self) -> Result<(), String> {
        if self.storage_path.is_empty() {
            return Err("STORAGE_PATH must not be empty".to_string());
        }
        match self.log_format.to_lowercase().as_str() {
            "json" | "pretty" => Ok(()),
            other => Err(format!(
                "Unknown log format '{other}' (expected json or pretty)"
            )),
        }
    }

    /// Get SQLite database path
    pub fn get_db_path(&self) -> String {
        format!("{}/grc.db", self.storage_path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn default_config() -> Config {
        Config {
            command: None,
            log_format: "json".to_string(),
            log_level: "info".to_string(),
            health_port: 8080,
            server_port: 3000,
            storage_path: "/data".to_string(),
            auth_enabled: false,
        }
    }

    #[test]
    fn test_validate_defaults() {
        let config = default_config();
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate_empty_storage_path() {
        let mut config = default_config();
        config.storage_path = String::new();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_bad_log_format() {
        let mut config = default_config();
        config.log_format = "xml".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_get_db_path() {
        let config = default_config();
        assert_eq!(config.get_db_path(), "/data/grc.db");
    }

    #[test]
    fn test_get_db_path_custom() {
        let mut config = default_config();
        config.storage_path = "/tmp/custom".to_string();
        assert_eq!(config.get_db_path(), "/tmp/custom/grc.db");
    }
}
