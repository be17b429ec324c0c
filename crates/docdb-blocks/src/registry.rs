//! Block registry for runtime lookup
//!
//! Block types are looked up by name (`docdb-delete`, `docdb-update`) and
//! configured from raw YAML, so a host only needs a [`BlockRegistry`] and a
//! config file to build its blocks.
//!
//! ```rust
//! use docdb_blocks::BlockRegistry;
//!
//! let registry = BlockRegistry::with_builtin();
//! assert_eq!(registry.block_types(), vec!["docdb-delete", "docdb-update"]);
//! ```

use async_trait::async_trait;
use schemars::schema::RootSchema;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;

use crate::block::{Block, BlockContext};
use crate::blocks::{DeleteBlockFactory, UpdateBlockFactory};
use crate::error::{BlockError, BlockResult};

/// Description of a block type
#[derive(Debug, Clone, Serialize)]
pub struct BlockSpec {
    /// Block type identifier
    pub block_type: String,
    /// Crate version providing the block
    pub version: String,
    /// Short description
    pub description: String,
    /// JSON schema of the block's config section
    pub config_schema: serde_json::Value,
}

impl BlockSpec {
    /// Create a spec from a generated config schema
    pub fn new(block_type: &str, description: &str, schema: RootSchema) -> Self {
        Self {
            block_type: block_type.to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
            description: description.to_string(),
            config_schema: serde_json::to_value(schema).unwrap_or_default(),
        }
    }
}

/// Factory trait for creating block instances
#[async_trait]
pub trait BlockFactory: Send + Sync {
    /// Get the block specification
    fn spec(&self) -> BlockSpec;

    /// Parse and validate a raw config section without connecting
    fn validate(&self, config: &serde_yaml::Value) -> BlockResult<()>;

    /// Configure a block from a raw config section
    async fn create(
        &self,
        config: &serde_yaml::Value,
        ctx: BlockContext,
    ) -> BlockResult<Box<dyn Block>>;
}

/// Registry of available block types
pub struct BlockRegistry {
    factories: HashMap<String, Arc<dyn BlockFactory>>,
}

impl BlockRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self {
            factories: HashMap::new(),
        }
    }

    /// Create a registry with the built-in blocks
    pub fn with_builtin() -> Self {
        let mut registry = Self::new();
        registry.register(crate::blocks::delete::BLOCK_TYPE, Arc::new(DeleteBlockFactory));
        registry.register(crate::blocks::update::BLOCK_TYPE, Arc::new(UpdateBlockFactory));
        registry
    }

    /// Register a block factory
    pub fn register(&mut self, block_type: &str, factory: Arc<dyn BlockFactory>) {
        self.factories.insert(block_type.to_string(), factory);
    }

    /// Get a block factory by type
    pub fn get(&self, block_type: &str) -> Option<&Arc<dyn BlockFactory>> {
        self.factories.get(block_type)
    }

    /// Check if a block type is registered
    pub fn contains(&self, block_type: &str) -> bool {
        self.factories.contains_key(block_type)
    }

    /// Registered block types, sorted
    pub fn block_types(&self) -> Vec<&str> {
        let mut types: Vec<&str> = self.factories.keys().map(String::as_str).collect();
        types.sort_unstable();
        types
    }

    /// Specs of all registered blocks, sorted by type
    pub fn list(&self) -> Vec<BlockSpec> {
        let mut specs: Vec<BlockSpec> = self.factories.values().map(|f| f.spec()).collect();
        specs.sort_by(|a, b| a.block_type.cmp(&b.block_type));
        specs
    }

    /// Validate a raw config section for a block type
    pub fn validate(&self, block_type: &str, config: &serde_yaml::Value) -> BlockResult<()> {
        self.factory(block_type)?.validate(config)
    }

    /// Configure a block of the given type
    pub async fn create(
        &self,
        block_type: &str,
        config: &serde_yaml::Value,
        ctx: BlockContext,
    ) -> BlockResult<Box<dyn Block>> {
        self.factory(block_type)?.create(config, ctx).await
    }

    /// Number of registered block types
    pub fn len(&self) -> usize {
        self.factories.len()
    }

    /// Check if registry is empty
    pub fn is_empty(&self) -> bool {
        self.factories.is_empty()
    }

    fn factory(&self, block_type: &str) -> BlockResult<&Arc<dyn BlockFactory>> {
        self.factories
            .get(block_type)
            .ok_or_else(|| BlockError::config(format!("unknown block type '{}'", block_type)))
    }
}

impl Default for BlockRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// Deserialize a raw config section; a missing section means all defaults
pub(crate) fn parse_config<T: DeserializeOwned>(config: &serde_yaml::Value) -> BlockResult<T> {
    let value = if config.is_null() {
        serde_yaml::Value::Mapping(serde_yaml::Mapping::new())
    } else {
        config.clone()
    };
    serde_yaml::from_value(value).map_err(|e| BlockError::config(format!("invalid config: {}", e)))
}
