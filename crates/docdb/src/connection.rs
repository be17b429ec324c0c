//! Connection traits for docdb
//!
//! Core abstractions for database connectivity:
//! - `Connection`: table metadata lookup and write query execution
//! - `ConnectionFactory`: opens connections from a `ConnectionConfig`

use async_trait::async_trait;
use std::time::Duration;

use crate::error::Result;
use crate::query::{TableRef, WriteQuery};
use crate::types::{MutationResult, TableConfig};

/// Default driver port
pub const DEFAULT_PORT: u16 = 28015;

/// Default database name
pub const DEFAULT_DATABASE: &str = "test";

/// A connection to a document database
#[async_trait]
pub trait Connection: Send + Sync {
    /// Look up table metadata (primary key, owning database)
    async fn table_config(&self, table: &TableRef) -> Result<TableConfig>;

    /// Execute a delete or update, returning its outcome
    async fn run(&self, query: &WriteQuery) -> Result<MutationResult>;

    /// Check if connection is valid/alive
    async fn is_valid(&self) -> bool;

    /// Close the connection
    async fn close(&self) -> Result<()>;
}

/// Configuration for creating connections
#[derive(Clone)]
pub struct ConnectionConfig {
    /// Server host
    pub host: String,
    /// Driver port
    pub port: u16,
    /// Default database for the connection
    pub database: String,
    /// Connection timeout in milliseconds
    pub connect_timeout_ms: u64,
    /// User name (server default when unset)
    pub user: Option<String>,
    /// Password
    pub password: Option<String>,
}

impl std::fmt::Debug for ConnectionConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // Never print the password, even in debug logs.
        f.debug_struct("ConnectionConfig")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("database", &self.database)
            .field("connect_timeout_ms", &self.connect_timeout_ms)
            .field("user", &self.user)
            .field("password", &self.password.as_ref().map(|_| "***"))
            .finish()
    }
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            host: "localhost".into(),
            port: DEFAULT_PORT,
            database: DEFAULT_DATABASE.into(),
            connect_timeout_ms: 20_000,
            user: None,
            password: None,
        }
    }
}

impl ConnectionConfig {
    /// Create configuration for a host and database
    pub fn new(host: impl Into<String>, database: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            database: database.into(),
            ..Default::default()
        }
    }

    /// Set port
    pub fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    /// Set connection timeout
    pub fn with_connect_timeout(mut self, ms: u64) -> Self {
        self.connect_timeout_ms = ms;
        self
    }

    /// Set credentials
    pub fn with_credentials(mut self, user: impl Into<String>, password: impl Into<String>) -> Self {
        self.user = Some(user.into());
        self.password = Some(password.into());
        self
    }

    /// `host:port` address
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Connection timeout as a duration
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    /// Reference a table in the configured database
    pub fn table(&self, table: impl Into<String>) -> TableRef {
        TableRef::new(self.database.clone(), table)
    }
}

/// Factory for creating connections
#[async_trait]
pub trait ConnectionFactory: Send + Sync {
    /// Open a new connection
    async fn connect(&self, config: &ConnectionConfig) -> Result<Box<dyn Connection>>;

    /// Backend name, for logs
    fn backend(&self) -> &'static str;
}
