//! # docdb
//!
//! Document database connectivity for signal pipeline blocks.
//!
//! This crate defines what a block needs from a document database and
//! nothing more: opening connections, looking up table metadata, and running
//! delete/update queries built with a small typed query builder. Network
//! backends plug in by implementing [`ConnectionFactory`]; an in-memory
//! backend ships with the crate.
//!
//! ## Quick Start
//!
//! ```rust
//! use docdb::prelude::*;
//! use docdb::memory::MemoryDatabase;
//! use serde_json::json;
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() {
//! let db = MemoryDatabase::new();
//! let users = TableRef::new("test", "users");
//! db.create_table(&users, "id");
//! db.insert(&users, json!({"id": "a1", "name": "x"})).unwrap();
//!
//! let conn = db.factory().connect(&ConnectionConfig::default()).await.unwrap();
//! let pk = conn.table_config(&users).await.unwrap().primary_key;
//! let result = conn
//!     .run(&users.get(json!("a1")).delete().return_changes(true))
//!     .await
//!     .unwrap();
//! assert_eq!(pk, "id");
//! assert_eq!(result.deleted, 1);
//! # }
//! ```
//!
//! ## Feature Flags
//!
//! - `memory` (default) - in-memory backend for tests and dry runs

#![warn(missing_docs)]
#![warn(clippy::all)]
#![deny(unsafe_code)]

pub mod connection;
pub mod error;
pub mod query;
pub mod types;

#[cfg(feature = "memory")]
pub mod memory;

pub use connection::{Connection, ConnectionConfig, ConnectionFactory};
pub use error::{Error, ErrorCategory, Result};
pub use query::{Selection, Selector, TableRef, WriteOperation, WriteQuery};
pub use types::{Change, Document, Filter, MutationResult, TableConfig, DEFAULT_PRIMARY_KEY};

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::connection::{Connection, ConnectionConfig, ConnectionFactory};
    pub use crate::error::{Error, ErrorCategory, Result};
    pub use crate::query::{Selection, Selector, TableRef, WriteOperation, WriteQuery};
    pub use crate::types::{Change, Document, Filter, MutationResult, TableConfig};
}
