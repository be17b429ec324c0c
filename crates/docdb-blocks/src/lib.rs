//! docdb-blocks - Delete and update blocks for signal pipelines
//!
//! Two blocks translate a stream of signals into document database writes:
//!
//! - **`docdb-delete`** deletes the documents selected by a filter evaluated
//!   per signal, using a primary key point lookup when the filter is exactly
//!   the primary key, and emits one enriched result signal per input.
//! - **`docdb-update`** selects documents by a fixed list of match keys and
//!   merges the remaining signal fields into them (primary key excluded),
//!   emitting a result signal per update and then the original batch.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────┐ signals ┌──────────────────────────────┐ query ┌──────────┐
//! │ pipeline │────────▶│ Block (delete | update)      │──────▶│  docdb   │
//! │          │◀────────│  filter · retry · enrich     │◀──────│ backend  │
//! └──────────┘ notify  └──────────────────────────────┘result └──────────┘
//! ```
//!
//! # Library Usage
//!
//! ```rust
//! use docdb::memory::MemoryDatabase;
//! use docdb_blocks::prelude::*;
//! use docdb_blocks::testing::CollectingNotifier;
//! use std::sync::Arc;
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() {
//! let db = MemoryDatabase::new();
//! let users = docdb::TableRef::new("test", "users");
//! db.create_table(&users, "id");
//! db.insert(&users, serde_json::json!({"id": "a1", "name": "x"})).unwrap();
//!
//! let notifier = Arc::new(CollectingNotifier::new());
//! let ctx = BlockContext::new("purge", notifier.clone(), Arc::new(db.factory()));
//! let config = DeleteBlockConfig {
//!     table: "users".into(),
//!     filter: Some(serde_json::json!({"id": "{{ $id }}"})),
//!     ..Default::default()
//! };
//! let block = DeleteBlock::configure(config, ctx).await.unwrap();
//!
//! block.process_signals(vec![docdb_blocks::signal!({"id": "a1"})]).await.unwrap();
//! assert!(db.is_empty(&users));
//! assert_eq!(notifier.signals()[0].get("deleted"), Some(&serde_json::json!(1)));
//! # }
//! ```
//!
//! # CLI Usage
//!
//! ```bash
//! # Validate a blocks file
//! docdb-blocks validate -c blocks.yaml
//!
//! # Print a block's config schema
//! docdb-blocks schema docdb-delete
//!
//! # List block types
//! docdb-blocks blocks
//! ```

#![warn(missing_docs)]
#![deny(unsafe_code)]

pub mod block;
pub mod blocks;
pub mod config;
pub mod connection;
pub mod enrich;
pub mod error;
pub mod filter;
pub mod metadata;
pub mod registry;
pub mod retry;
pub mod signal;
pub mod testing;
pub mod types;

pub use block::{Block, BlockContext, ChannelNotifier, SignalNotifier};
pub use blocks::{
    DeleteBlock, DeleteBlockConfig, DeleteBlockFactory, MatchKey, UpdateBlock, UpdateBlockConfig,
    UpdateBlockFactory,
};
pub use config::{BlockEntry, BlocksConfig, DatabaseConfig, Settings};
pub use connection::{ConnectionManager, ConnectionMode, Lease};
pub use enrich::EnrichConfig;
pub use error::{BlockError, BlockResult};
pub use filter::{parse_filter_expression, FilterExpression, TemplateFilter, WholeSignal};
pub use metadata::{MetadataPolicy, TableResolver};
pub use registry::{BlockFactory, BlockRegistry, BlockSpec};
pub use retry::{execute_with_retry, Backoff, RetryConfig};
pub use signal::Signal;
pub use types::SensitiveString;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::block::{Block, BlockContext, SignalNotifier};
    pub use crate::blocks::{DeleteBlock, DeleteBlockConfig, MatchKey, UpdateBlock, UpdateBlockConfig};
    pub use crate::connection::ConnectionMode;
    pub use crate::enrich::EnrichConfig;
    pub use crate::error::{BlockError, BlockResult};
    pub use crate::metadata::MetadataPolicy;
    pub use crate::registry::BlockRegistry;
    pub use crate::signal::Signal;
}

#[doc(hidden)]
pub mod __private {
    pub use serde_json;
}

/// Build a [`Signal`] from JSON object syntax
///
/// Panics if the value is not an object.
///
/// ```rust
/// let signal = docdb_blocks::signal!({"id": "a1", "name": "x"});
/// assert_eq!(signal.len(), 2);
/// ```
#[macro_export]
macro_rules! signal {
    ($($json:tt)+) => {
        $crate::Signal::from_value($crate::__private::serde_json::json!($($json)+))
            .expect("signal! requires a JSON object")
    };
}
