//! Typed query builder
//!
//! Queries read the same way they do in the native drivers:
//!
//! ```rust
//! use docdb::{Filter, TableRef};
//! use serde_json::json;
//!
//! let users = TableRef::new("app", "users");
//!
//! // point delete by primary key
//! let by_key = users.get(json!("a1")).delete().return_changes(true);
//! assert!(by_key.is_point_lookup());
//!
//! // predicate update
//! let payload = json!({"name": "y"}).as_object().cloned().unwrap();
//! let by_filter = users
//!     .filter(Filter::new().with("email", "a@b.com"))
//!     .update(payload);
//! assert!(!by_filter.is_point_lookup());
//! ```

use serde_json::Value;
use std::fmt;

use crate::types::{Document, Filter};

/// Reference to a table inside a named database
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TableRef {
    /// Database name
    pub database: String,
    /// Table name
    pub table: String,
}

impl TableRef {
    /// Create a table reference
    pub fn new(database: impl Into<String>, table: impl Into<String>) -> Self {
        Self {
            database: database.into(),
            table: table.into(),
        }
    }

    /// Select a single document by primary key
    pub fn get(&self, key: Value) -> Selection {
        Selection {
            table: self.clone(),
            selector: Selector::Key(key),
        }
    }

    /// Select every document matching a filter
    pub fn filter(&self, filter: Filter) -> Selection {
        Selection {
            table: self.clone(),
            selector: Selector::Filter(filter),
        }
    }
}

impl fmt::Display for TableRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.database, self.table)
    }
}

/// How documents are selected
#[derive(Debug, Clone, PartialEq)]
pub enum Selector {
    /// Primary key point lookup
    Key(Value),
    /// Predicate scan
    Filter(Filter),
}

/// A table selection awaiting a write operation
#[derive(Debug, Clone, PartialEq)]
pub struct Selection {
    table: TableRef,
    selector: Selector,
}

impl Selection {
    /// Delete the selected documents
    pub fn delete(self) -> WriteQuery {
        WriteQuery {
            table: self.table,
            selector: self.selector,
            operation: WriteOperation::Delete,
            return_changes: false,
        }
    }

    /// Merge `payload` into the selected documents
    pub fn update(self, payload: Document) -> WriteQuery {
        WriteQuery {
            table: self.table,
            selector: self.selector,
            operation: WriteOperation::Update(payload),
            return_changes: false,
        }
    }
}

/// Write operation applied to a selection
#[derive(Debug, Clone, PartialEq)]
pub enum WriteOperation {
    /// Remove the documents
    Delete,
    /// Merge the given fields into the documents
    Update(Document),
}

/// A complete write query, ready to run on a connection
#[derive(Debug, Clone, PartialEq)]
pub struct WriteQuery {
    /// Target table
    pub table: TableRef,
    /// Document selection
    pub selector: Selector,
    /// Operation to apply
    pub operation: WriteOperation,
    /// Include before/after values in the result
    pub return_changes: bool,
}

impl WriteQuery {
    /// Request the change list in the result
    pub fn return_changes(mut self, enabled: bool) -> Self {
        self.return_changes = enabled;
        self
    }

    /// Whether this query selects by primary key
    pub fn is_point_lookup(&self) -> bool {
        matches!(self.selector, Selector::Key(_))
    }

    /// Whether this query deletes
    pub fn is_delete(&self) -> bool {
        matches!(self.operation, WriteOperation::Delete)
    }
}

impl fmt::Display for WriteQuery {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.table)?;
        match &self.selector {
            Selector::Key(key) => write!(f, ".get({})", key)?,
            Selector::Filter(filter) => write!(
                f,
                ".filter({})",
                Value::Object(filter.as_document().clone())
            )?,
        }
        match &self.operation {
            WriteOperation::Delete => write!(f, ".delete()")?,
            WriteOperation::Update(payload) => {
                write!(f, ".update({})", Value::Object(payload.clone()))?
            }
        }
        if self.return_changes {
            write!(f, "[return_changes]")?;
        }
        Ok(())
    }
}
