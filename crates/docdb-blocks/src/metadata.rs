//! Table metadata resolution
//!
//! Blocks need the target table's primary key. Whether it is looked up on
//! every call or once and reused is an explicit [`MetadataPolicy`]. A cached
//! value goes stale if the table is recreated with a different primary key
//! while the block is running; [`TableResolver::invalidate`] drops it.

use docdb::{Connection, TableConfig, TableRef};
use parking_lot::RwLock;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use tracing::trace;

use crate::error::BlockResult;

/// When table metadata is fetched
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum MetadataPolicy {
    /// Query the table config on every call
    Refresh,
    /// Query once and reuse the result
    Cache,
}

/// Resolves and optionally caches a table's config
#[derive(Debug)]
pub struct TableResolver {
    table: TableRef,
    policy: MetadataPolicy,
    cached: RwLock<Option<TableConfig>>,
}

impl TableResolver {
    /// Create a resolver for a table
    pub fn new(table: TableRef, policy: MetadataPolicy) -> Self {
        Self {
            table,
            policy,
            cached: RwLock::new(None),
        }
    }

    /// Target table
    pub fn table(&self) -> &TableRef {
        &self.table
    }

    /// Resolution policy
    pub fn policy(&self) -> MetadataPolicy {
        self.policy
    }

    /// Table config, from cache when the policy allows
    pub async fn resolve(&self, conn: &dyn Connection) -> BlockResult<TableConfig> {
        if self.policy == MetadataPolicy::Cache {
            let cached = self.cached.read().clone();
            if let Some(config) = cached {
                return Ok(config);
            }
        }

        let config = conn.table_config(&self.table).await?;
        trace!(table = %self.table, primary_key = %config.primary_key, "Resolved table config");

        if self.policy == MetadataPolicy::Cache {
            *self.cached.write() = Some(config.clone());
        }
        Ok(config)
    }

    /// Currently cached config
    pub fn cached(&self) -> Option<TableConfig> {
        self.cached.read().clone()
    }

    /// Drop the cached config so the next call queries again
    pub fn invalidate(&self) {
        *self.cached.write() = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use docdb::memory::MemoryDatabase;
    use docdb::{ConnectionConfig, ConnectionFactory};

    fn users() -> TableRef {
        TableRef::new("test", "users")
    }

    #[tokio::test]
    async fn test_refresh_queries_every_time() {
        let db = MemoryDatabase::new();
        db.create_table(&users(), "id");
        let conn = db.factory().connect(&ConnectionConfig::default()).await.unwrap();
        let resolver = TableResolver::new(users(), MetadataPolicy::Refresh);

        resolver.resolve(conn.as_ref()).await.unwrap();
        resolver.resolve(conn.as_ref()).await.unwrap();

        assert_eq!(db.table_config_lookups(), 2);
        assert!(resolver.cached().is_none());
    }

    #[tokio::test]
    async fn test_cache_queries_once_and_can_go_stale() {
        let db = MemoryDatabase::new();
        db.create_table(&users(), "id");
        let conn = db.factory().connect(&ConnectionConfig::default()).await.unwrap();
        let resolver = TableResolver::new(users(), MetadataPolicy::Cache);

        assert_eq!(resolver.resolve(conn.as_ref()).await.unwrap().primary_key, "id");
        db.create_table(&users(), "email");
        assert_eq!(resolver.resolve(conn.as_ref()).await.unwrap().primary_key, "id");
        assert_eq!(db.table_config_lookups(), 1);

        resolver.invalidate();
        assert_eq!(resolver.resolve(conn.as_ref()).await.unwrap().primary_key, "email");
    }
}
