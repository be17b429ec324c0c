//! Update block
//!
//! For each signal, selects documents whose match keys equal the signal's
//! values and merges the rest of the signal into them. One result signal is
//! notified per update; once the batch is done the original signals are
//! forwarded unchanged.
//!
//! # Example
//!
//! ```yaml
//! blocks:
//!   sync-users:
//!     block: docdb-update
//!     config:
//!       table: users
//!       filters:
//!         - key: email
//! ```
//!
//! The table's primary key is never written, even when the signal carries
//! it. The field stripped is whatever the table reports as its primary key,
//! not a literal `id`: on a table keyed by `email`, an incoming `id` is
//! written like any other field while `email` is dropped from the payload
//! (it can still be used as a match key).
//!
//! By default the primary key is looked up once when the block is configured
//! (`table_resolution: cache`); if the table can be recreated with a
//! different key while the block runs, use `refresh`.

use async_trait::async_trait;
use docdb::{Connection, Document, Filter, MutationResult};
use metrics::counter;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, error, info, warn};
use validator::Validate;

use crate::block::{Block, BlockContext, SignalNotifier};
use crate::config::DatabaseConfig;
use crate::connection::{ConnectionManager, ConnectionMode};
use crate::error::{BlockError, BlockResult};
use crate::metadata::{MetadataPolicy, TableResolver};
use crate::registry::{parse_config, BlockFactory, BlockSpec};
use crate::signal::Signal;

/// Block type identifier
pub const BLOCK_TYPE: &str = "docdb-update";

/// A signal field whose value must match the stored document
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Validate, JsonSchema)]
pub struct MatchKey {
    /// Field name
    #[validate(length(min = 1))]
    pub key: String,
}

impl MatchKey {
    /// Create a match key
    pub fn new(key: impl Into<String>) -> Self {
        Self { key: key.into() }
    }
}

/// Update block configuration
#[derive(Debug, Clone, Serialize, Deserialize, Validate, JsonSchema)]
pub struct UpdateBlockConfig {
    /// Database connection
    #[serde(default)]
    #[validate(nested)]
    pub database: DatabaseConfig,

    /// Table to update
    #[serde(default = "default_table")]
    #[validate(length(min = 1))]
    pub table: String,

    /// Fields used to select the documents to update, in order
    #[serde(default)]
    #[validate(length(min = 1), nested)]
    pub filters: Vec<MatchKey>,

    /// Table metadata resolution policy
    #[serde(default = "default_table_resolution")]
    pub table_resolution: MetadataPolicy,
}

fn default_table() -> String {
    "test".to_string()
}

fn default_table_resolution() -> MetadataPolicy {
    MetadataPolicy::Cache
}

impl Default for UpdateBlockConfig {
    fn default() -> Self {
        Self {
            database: DatabaseConfig::default(),
            table: default_table(),
            filters: Vec::new(),
            table_resolution: default_table_resolution(),
        }
    }
}

impl UpdateBlockConfig {
    /// Validate the configuration
    pub fn check(&self) -> BlockResult<()> {
        self.validate()?;
        Ok(())
    }

    /// Connection mode, defaulting to one shared connection
    pub fn connection_mode(&self) -> ConnectionMode {
        self.database.connection_mode.unwrap_or(ConnectionMode::Shared)
    }
}

/// Updates documents matching each signal's key fields
pub struct UpdateBlock {
    name: String,
    match_keys: Vec<String>,
    connections: ConnectionManager,
    resolver: TableResolver,
    notifier: Arc<dyn SignalNotifier>,
}

impl std::fmt::Debug for UpdateBlock {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UpdateBlock")
            .field("name", &self.name)
            .field("table", self.resolver.table())
            .field("match_keys", &self.match_keys)
            .finish_non_exhaustive()
    }
}

impl UpdateBlock {
    /// Configure an update block
    ///
    /// With the default [`MetadataPolicy::Cache`] the table is resolved here
    /// and reused for every update.
    pub async fn configure(config: UpdateBlockConfig, ctx: BlockContext) -> BlockResult<Self> {
        config.check()?;

        let mode = config.connection_mode();
        let connections = ConnectionManager::new(
            ctx.factory.clone(),
            config.database.to_connection_config(),
            mode,
        );
        let resolver = TableResolver::new(
            config.database.table(&config.table),
            config.table_resolution,
        );

        if config.table_resolution == MetadataPolicy::Cache {
            let lease = connections.acquire().await?;
            let resolved = resolver.resolve(lease.connection()).await;
            lease.release().await;
            resolved?;
        }

        let match_keys: Vec<String> = config.filters.into_iter().map(|f| f.key).collect();
        info!(
            block = %ctx.name,
            table = %resolver.table(),
            connection_mode = ?mode,
            table_resolution = ?config.table_resolution,
            match_keys = ?match_keys,
            "Configured update block"
        );

        Ok(Self {
            name: ctx.name,
            match_keys,
            connections,
            resolver,
            notifier: ctx.notifier,
        })
    }

    /// Build the selection filter from the configured match keys
    ///
    /// Returns the first configured key missing from the data.
    fn build_filter(&self, data: &Document) -> Result<Filter, String> {
        let mut filter = Filter::new();
        for key in &self.match_keys {
            match data.get(key) {
                Some(value) => filter.insert(key.clone(), value.clone()),
                None => return Err(key.clone()),
            }
        }
        Ok(filter)
    }

    async fn update_table(&self, signal: &Signal) -> BlockResult<()> {
        let data = signal.to_dict();
        let filter = match self.build_filter(&data) {
            Ok(filter) => filter,
            Err(key) => {
                counter!("docdb_blocks.update.skipped").increment(1);
                warn!(
                    block = %self.name,
                    key = %key,
                    "Filter key was not found in the incoming signal, skipping update"
                );
                return Ok(());
            }
        };
        debug!(block = %self.name, filter = ?filter.as_document(), "Updating using filters");

        let lease = self.connections.acquire().await?;
        let outcome = self.run_update(lease.connection(), filter, data).await;
        lease.release().await;
        let result = outcome?;

        debug!(block = %self.name, result = ?result, "Sent update request");
        if result.errors > 0 {
            counter!("docdb_blocks.update.errors").increment(result.errors);
            error!(
                block = %self.name,
                errors = result.errors,
                first_error = result.first_error.as_deref().unwrap_or("unknown"),
                "Error updating table"
            );
        } else if result.counts_total() == 0 {
            counter!("docdb_blocks.update.no_match").increment(1);
            debug!(block = %self.name, "No documents matched the update filters");
        }
        counter!("docdb_blocks.documents.updated").increment(result.replaced);

        self.notifier
            .notify_signals(vec![Signal::from(result.to_document())])
            .await;
        Ok(())
    }

    async fn run_update(
        &self,
        conn: &dyn Connection,
        filter: Filter,
        mut payload: Document,
    ) -> BlockResult<MutationResult> {
        let primary_key = self.resolver.resolve(conn).await?.primary_key;
        payload.shift_remove(&primary_key);

        let query = self.resolver.table().filter(filter).update(payload);
        conn.run(&query).await.map_err(BlockError::from)
    }
}

#[async_trait]
impl Block for UpdateBlock {
    fn block_type(&self) -> &'static str {
        BLOCK_TYPE
    }

    fn name(&self) -> &str {
        &self.name
    }

    async fn process_signals(&self, signals: Vec<Signal>) -> BlockResult<()> {
        for signal in &signals {
            debug!(block = %self.name, signal = %signal, "Update is processing signal");
            self.update_table(signal).await?;
        }

        self.notifier.notify_signals(signals).await;
        Ok(())
    }

    async fn stop(&self) -> BlockResult<()> {
        self.connections.close().await
    }
}

/// Factory for [`UpdateBlock`]
pub struct UpdateBlockFactory;

#[async_trait]
impl BlockFactory for UpdateBlockFactory {
    fn spec(&self) -> BlockSpec {
        BlockSpec::new(
            BLOCK_TYPE,
            "Update documents matching each signal's key fields",
            schemars::schema_for!(UpdateBlockConfig),
        )
    }

    fn validate(&self, config: &serde_yaml::Value) -> BlockResult<()> {
        parse_config::<UpdateBlockConfig>(config)?.check()
    }

    async fn create(
        &self,
        config: &serde_yaml::Value,
        ctx: BlockContext,
    ) -> BlockResult<Box<dyn Block>> {
        let config = parse_config::<UpdateBlockConfig>(config)?;
        Ok(Box::new(UpdateBlock::configure(config, ctx).await?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_defaults() {
        let config: UpdateBlockConfig = serde_yaml::from_str("filters: [{key: email}]").unwrap();
        assert_eq!(config.table, "test");
        assert_eq!(config.filters, vec![MatchKey::new("email")]);
        assert_eq!(config.table_resolution, MetadataPolicy::Cache);
        assert_eq!(config.connection_mode(), ConnectionMode::Shared);
        assert!(config.check().is_ok());
    }

    #[test]
    fn test_config_requires_match_keys() {
        let config = UpdateBlockConfig::default();
        assert!(matches!(config.check(), Err(BlockError::Config(_))));

        let config = UpdateBlockConfig {
            filters: vec![MatchKey::new("")],
            ..Default::default()
        };
        assert!(config.check().is_err());
    }

    #[test]
    fn test_refresh_resolution_parses() {
        let yaml = r#"
filters:
  - key: email
  - key: tenant
table_resolution: refresh
database:
  connection_mode: per_record
"#;
        let config: UpdateBlockConfig = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(config.table_resolution, MetadataPolicy::Refresh);
        assert_eq!(config.connection_mode(), ConnectionMode::PerRecord);
        assert_eq!(config.filters.len(), 2);
    }
}
