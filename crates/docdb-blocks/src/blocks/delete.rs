//! Delete block
//!
//! Deletes the documents selected by each incoming signal and emits one
//! enriched output signal per input, in input order, once the whole batch is
//! done.
//!
//! # Example
//!
//! ```yaml
//! blocks:
//!   purge-users:
//!     block: docdb-delete
//!     config:
//!       database:
//!         host: localhost
//!         database: crm
//!       table: users
//!       filter:
//!         id: "{{ $user_id }}"
//!       retry:
//!         max_retries: 5
//! ```
//!
//! When the evaluated filter has exactly the table's primary key as its only
//! field, the delete is issued as a point lookup; anything else is a filter
//! scan. Each record runs inside the retry policy, metadata lookup included.
//! That is only safe because deleting a document that is already gone
//! reports zero deletions instead of failing.

use async_trait::async_trait;
use docdb::{Connection, Filter, MutationResult};
use metrics::counter;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info, trace};
use validator::Validate;

use crate::block::{Block, BlockContext, SignalNotifier};
use crate::config::DatabaseConfig;
use crate::connection::{ConnectionManager, ConnectionMode};
use crate::enrich::EnrichConfig;
use crate::error::{BlockError, BlockResult};
use crate::filter::{parse_filter_expression, FilterExpression};
use crate::metadata::{MetadataPolicy, TableResolver};
use crate::registry::{parse_config, BlockFactory, BlockSpec};
use crate::retry::{execute_with_retry, RetryConfig};
use crate::signal::Signal;

/// Block type identifier
pub const BLOCK_TYPE: &str = "docdb-delete";

/// Delete block configuration
#[derive(Debug, Clone, Serialize, Deserialize, Validate, JsonSchema)]
pub struct DeleteBlockConfig {
    /// Database connection
    #[serde(default)]
    #[validate(nested)]
    pub database: DatabaseConfig,

    /// Table to delete from
    #[serde(default = "default_table")]
    #[validate(length(min = 1))]
    pub table: String,

    /// Filter template; the whole signal is used when unset
    #[serde(default)]
    pub filter: Option<Value>,

    /// How results are merged into output signals
    #[serde(default)]
    #[validate(nested)]
    pub enrich: EnrichConfig,

    /// Retry policy for each record
    #[serde(default)]
    #[validate(nested)]
    pub retry: RetryConfig,

    /// Primary key lookup policy
    #[serde(default = "default_primary_key_policy")]
    pub primary_key: MetadataPolicy,
}

fn default_table() -> String {
    "test".to_string()
}

fn default_primary_key_policy() -> MetadataPolicy {
    MetadataPolicy::Refresh
}

impl Default for DeleteBlockConfig {
    fn default() -> Self {
        Self {
            database: DatabaseConfig::default(),
            table: default_table(),
            filter: None,
            enrich: EnrichConfig::default(),
            retry: RetryConfig::default(),
            primary_key: default_primary_key_policy(),
        }
    }
}

impl DeleteBlockConfig {
    /// Validate fields and the filter template
    pub fn check(&self) -> BlockResult<()> {
        self.validate()?;
        if matches!(&self.filter, Some(Value::Object(fields)) if fields.is_empty()) {
            return Err(BlockError::config(
                "filter must not be empty; it would delete every document",
            ));
        }
        parse_filter_expression(self.filter.as_ref())?;
        Ok(())
    }

    /// Connection mode, defaulting to a connection per record
    pub fn connection_mode(&self) -> ConnectionMode {
        self.database
            .connection_mode
            .unwrap_or(ConnectionMode::PerRecord)
    }
}

/// Deletes documents matching each signal
pub struct DeleteBlock {
    name: String,
    filter: Box<dyn FilterExpression>,
    enrich: EnrichConfig,
    retry: RetryConfig,
    connections: ConnectionManager,
    resolver: TableResolver,
    notifier: Arc<dyn SignalNotifier>,
    lock: Mutex<()>,
}

impl std::fmt::Debug for DeleteBlock {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeleteBlock")
            .field("name", &self.name)
            .field("table", self.resolver.table())
            .field("filter", &self.filter)
            .finish_non_exhaustive()
    }
}

impl DeleteBlock {
    /// Configure a delete block
    ///
    /// With [`MetadataPolicy::Cache`] the primary key is looked up here, so
    /// an unreachable database fails configuration.
    pub async fn configure(config: DeleteBlockConfig, ctx: BlockContext) -> BlockResult<Self> {
        config.check()?;

        let filter = parse_filter_expression(config.filter.as_ref())?;
        let mode = config.connection_mode();
        let connections = ConnectionManager::new(
            ctx.factory.clone(),
            config.database.to_connection_config(),
            mode,
        );
        let resolver = TableResolver::new(config.database.table(&config.table), config.primary_key);

        if config.primary_key == MetadataPolicy::Cache {
            let lease = connections.acquire().await?;
            let resolved = resolver.resolve(lease.connection()).await;
            lease.release().await;
            resolved?;
        }

        info!(
            block = %ctx.name,
            table = %resolver.table(),
            connection_mode = ?mode,
            primary_key = ?config.primary_key,
            max_retries = config.retry.max_retries,
            "Configured delete block"
        );

        Ok(Self {
            name: ctx.name,
            filter,
            enrich: config.enrich,
            retry: config.retry,
            connections,
            resolver,
            notifier: ctx.notifier,
            lock: Mutex::new(()),
        })
    }

    /// Delete the documents selected by one signal
    async fn delete(&self, signal: &Signal) -> BlockResult<MutationResult> {
        let lease = self.connections.acquire().await?;
        let outcome = self.delete_with(lease.connection(), signal).await;
        lease.release().await;
        let (filter, results) = outcome?;

        debug!(
            block = %self.name,
            filter = ?filter.as_document(),
            deleted = results.deleted,
            "Deleting using filter returned results"
        );
        if results.deleted == 0 {
            counter!("docdb_blocks.delete.no_match").increment(1);
            debug!(block = %self.name, signal = %signal, "Unable to delete document for signal");
        } else {
            counter!("docdb_blocks.documents.deleted").increment(results.deleted);
        }
        Ok(results)
    }

    async fn delete_with(
        &self,
        conn: &dyn Connection,
        signal: &Signal,
    ) -> BlockResult<(Filter, MutationResult)> {
        let primary_key = self.resolver.resolve(conn).await?.primary_key;

        let filter = self.filter.evaluate(signal)?;
        if filter.is_empty() {
            return Err(BlockError::expression(
                "filter evaluated to an empty object; refusing to delete every document",
            ));
        }

        let table = self.resolver.table();
        let selection = match filter.get(&primary_key) {
            Some(key) if filter.is_primary_key_only(&primary_key) => table.get(key.clone()),
            _ => table.filter(filter.clone()),
        };
        let query = selection.delete().return_changes(true);
        trace!(block = %self.name, query = %query, "Running delete");

        let results = conn.run(&query).await?;
        Ok((filter, results))
    }
}

#[async_trait]
impl Block for DeleteBlock {
    fn block_type(&self) -> &'static str {
        BLOCK_TYPE
    }

    fn name(&self) -> &str {
        &self.name
    }

    async fn process_signals(&self, signals: Vec<Signal>) -> BlockResult<()> {
        let _guard = self.lock.lock().await;

        let mut notify_list = Vec::with_capacity(signals.len());
        for signal in &signals {
            debug!(block = %self.name, signal = %signal, "Delete is processing signal");

            let results = execute_with_retry(&self.retry, || self.delete(signal)).await?;
            notify_list.push(self.enrich.output_signal(results.to_document(), signal));
        }

        self.notifier.notify_signals(notify_list).await;
        Ok(())
    }

    async fn stop(&self) -> BlockResult<()> {
        self.connections.close().await
    }
}

/// Factory for [`DeleteBlock`]
pub struct DeleteBlockFactory;

#[async_trait]
impl BlockFactory for DeleteBlockFactory {
    fn spec(&self) -> BlockSpec {
        BlockSpec::new(
            BLOCK_TYPE,
            "Delete documents selected by each signal",
            schemars::schema_for!(DeleteBlockConfig),
        )
    }

    fn validate(&self, config: &serde_yaml::Value) -> BlockResult<()> {
        parse_config::<DeleteBlockConfig>(config)?.check()
    }

    async fn create(
        &self,
        config: &serde_yaml::Value,
        ctx: BlockContext,
    ) -> BlockResult<Box<dyn Block>> {
        let config = parse_config::<DeleteBlockConfig>(config)?;
        Ok(Box::new(DeleteBlock::configure(config, ctx).await?))
    }
}
