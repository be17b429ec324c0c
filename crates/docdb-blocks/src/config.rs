//! Configuration types for docdb-blocks
//!
//! A blocks file names block instances and gives each a type and a typed
//! config section:
//!
//! ```yaml
//! version: "1.0"
//! settings:
//!   log_level: info
//! blocks:
//!   purge-users:
//!     block: docdb-delete
//!     config:
//!       database:
//!         host: ${DOCDB_HOST:-localhost}
//!       table: users
//! ```

use docdb::{ConnectionConfig, TableRef};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::LazyLock;
use validator::Validate;

use crate::connection::ConnectionMode;
use crate::registry::BlockRegistry;
use crate::types::SensitiveString;

/// Pre-compiled regex for environment variable expansion
/// Pattern: ${VAR} or ${VAR:-default}
static ENV_VAR_REGEX: LazyLock<regex::Regex> = LazyLock::new(|| {
    regex::Regex::new(r"\$\{([a-zA-Z_][a-zA-Z0-9_]*)(?::-([^}]*))?\}")
        .expect("env var regex pattern is invalid - this is a bug")
});

/// Database connection section shared by all blocks
#[derive(Debug, Clone, Serialize, Deserialize, Validate, JsonSchema)]
pub struct DatabaseConfig {
    /// Server host
    #[serde(default = "default_host")]
    #[validate(length(min = 1))]
    pub host: String,

    /// Driver port
    #[serde(default = "default_port")]
    #[validate(range(min = 1))]
    pub port: u16,

    /// Database name
    #[serde(default = "default_database")]
    #[validate(length(min = 1))]
    pub database: String,

    /// Connect timeout in milliseconds
    #[serde(default = "default_connect_timeout_ms")]
    #[validate(range(min = 1))]
    pub connect_timeout_ms: u64,

    /// User name
    #[serde(default)]
    pub user: Option<String>,

    /// Password
    #[serde(default)]
    pub password: Option<SensitiveString>,

    /// Connection acquisition mode; each block picks its own default
    #[serde(default)]
    pub connection_mode: Option<ConnectionMode>,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            database: default_database(),
            connect_timeout_ms: default_connect_timeout_ms(),
            user: None,
            password: None,
            connection_mode: None,
        }
    }
}

fn default_host() -> String {
    "localhost".to_string()
}

fn default_port() -> u16 {
    docdb::connection::DEFAULT_PORT
}

fn default_database() -> String {
    docdb::connection::DEFAULT_DATABASE.to_string()
}

fn default_connect_timeout_ms() -> u64 {
    20_000
}

impl DatabaseConfig {
    /// Build the driver-level connection config
    pub fn to_connection_config(&self) -> ConnectionConfig {
        let mut config = ConnectionConfig::new(&self.host, &self.database)
            .with_port(self.port)
            .with_connect_timeout(self.connect_timeout_ms);
        config.user = self.user.clone();
        config.password = self
            .password
            .as_ref()
            .map(|p| p.expose_secret().to_string());
        config
    }

    /// Reference a table in the configured database
    pub fn table(&self, table: &str) -> TableRef {
        TableRef::new(self.database.clone(), table)
    }
}

/// Root of a blocks file
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct BlocksConfig {
    /// Configuration version
    #[serde(default = "default_version")]
    pub version: String,

    /// Global settings
    #[serde(default)]
    pub settings: Settings,

    /// Block instances by name
    #[serde(default)]
    pub blocks: BTreeMap<String, BlockEntry>,
}

fn default_version() -> String {
    "1.0".to_string()
}

/// Global settings
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Settings {
    /// Log level used when RUST_LOG is unset
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

/// One configured block instance
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct BlockEntry {
    /// Block type (e.g. docdb-delete)
    pub block: String,

    /// Whether the block is enabled
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Block-specific configuration
    #[serde(default)]
    pub config: serde_yaml::Value,
}

fn default_true() -> bool {
    true
}

impl BlocksConfig {
    /// Load configuration from a YAML file
    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| anyhow::anyhow!("Failed to read config file: {}", e))?;
        Self::from_yaml_str(&content)
    }

    /// Parse configuration from YAML text, expanding environment variables
    pub fn from_yaml_str(content: &str) -> anyhow::Result<Self> {
        let expanded = Self::expand_env_vars(content);
        serde_yaml::from_str(&expanded).map_err(|e| anyhow::anyhow!("Failed to parse config: {}", e))
    }

    /// Expand environment variables in the format ${VAR} or ${VAR:-default}
    fn expand_env_vars(content: &str) -> String {
        ENV_VAR_REGEX
            .replace_all(content, |caps: &regex::Captures| {
                let var_name = &caps[1];
                let default = caps.get(2).map(|m| m.as_str());

                std::env::var(var_name).unwrap_or_else(|_| default.unwrap_or("").to_string())
            })
            .to_string()
    }

    /// Validate every block section against its registered type
    pub fn validate(&self, registry: &BlockRegistry) -> anyhow::Result<()> {
        for (name, entry) in &self.blocks {
            if !registry.contains(&entry.block) {
                anyhow::bail!(
                    "Block '{}': unknown block type '{}' (available: {})",
                    name,
                    entry.block,
                    registry.block_types().join(", ")
                );
            }
            registry
                .validate(&entry.block, &entry.config)
                .map_err(|e| anyhow::anyhow!("Block '{}': {}", name, e))?;
        }
        Ok(())
    }

    /// Get enabled blocks
    pub fn enabled_blocks(&self) -> impl Iterator<Item = (&String, &BlockEntry)> {
        self.blocks.iter().filter(|(_, b)| b.enabled)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_env_var_expansion() {
        std::env::set_var("DOCDB_BLOCKS_TEST_HOST", "db.internal");
        let expanded = BlocksConfig::expand_env_vars("host: ${DOCDB_BLOCKS_TEST_HOST}");
        assert_eq!(expanded, "host: db.internal");
    }

    #[test]
    fn test_env_var_with_default() {
        std::env::remove_var("DOCDB_BLOCKS_MISSING_VAR");
        let expanded = BlocksConfig::expand_env_vars("port: ${DOCDB_BLOCKS_MISSING_VAR:-28016}");
        assert_eq!(expanded, "port: 28016");
    }

    #[test]
    fn test_database_defaults() {
        let config: DatabaseConfig = serde_yaml::from_str("{}").unwrap();
        assert_eq!(config.host, "localhost");
        assert_eq!(config.port, 28015);
        assert_eq!(config.database, "test");
        assert_eq!(config.connect_timeout_ms, 20_000);
        assert!(config.connection_mode.is_none());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_to_connection_config() {
        let yaml = r#"
host: db.example.com
port: 28016
database: crm
user: admin
password: hunter2
connection_mode: shared
"#;
        let config: DatabaseConfig = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(config.connection_mode, Some(ConnectionMode::Shared));
        assert!(!format!("{:?}", config).contains("hunter2"));

        let conn = config.to_connection_config();
        assert_eq!(conn.address(), "db.example.com:28016");
        assert_eq!(conn.database, "crm");
        assert_eq!(conn.password.as_deref(), Some("hunter2"));
        assert_eq!(config.table("users").to_string(), "crm.users");
    }

    #[test]
    fn test_empty_host_rejected() {
        let config: DatabaseConfig = serde_yaml::from_str("host: ''").unwrap();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_parse_blocks_file() {
        let yaml = r#"
blocks:
  purge:
    block: docdb-delete
    config:
      table: users
  sync:
    block: docdb-update
    enabled: false
"#;
        let config = BlocksConfig::from_yaml_str(yaml).unwrap();
        assert_eq!(config.version, "1.0");
        assert_eq!(config.settings.log_level, "info");
        assert_eq!(config.blocks.len(), 2);
        assert!(config.blocks["sync"].config.is_null());

        let enabled: Vec<_> = config.enabled_blocks().map(|(n, _)| n.as_str()).collect();
        assert_eq!(enabled, vec!["purge"]);
    }
}
