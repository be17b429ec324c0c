//! In-memory backend
//!
//! A process-local document store implementing [`ConnectionFactory`] and
//! [`Connection`] with the same result semantics as a networked server:
//! point deletes of missing keys are `skipped`, updates that leave a
//! document identical are `unchanged`, and primary keys cannot be changed.
//!
//! It also records what happened so tests can assert on it: every executed
//! write query, the number of table-config lookups, and connection
//! open/close counts. Failures can be injected for connects and queries.
//!
//! ```rust
//! use docdb::memory::MemoryDatabase;
//! use docdb::TableRef;
//! use serde_json::json;
//!
//! let db = MemoryDatabase::new();
//! let users = TableRef::new("test", "users");
//! db.create_table(&users, "id");
//! db.insert(&users, json!({"id": "a1", "name": "x"})).unwrap();
//! assert_eq!(db.len(&users), 1);
//! ```

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::Value;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::trace;

use crate::connection::{Connection, ConnectionConfig, ConnectionFactory};
use crate::error::{Error, Result};
use crate::query::{Selector, TableRef, WriteOperation, WriteQuery};
use crate::types::{Change, Document, MutationResult, TableConfig};

#[derive(Debug)]
struct MemoryTable {
    primary_key: String,
    // keyed by the JSON encoding of the primary key value
    docs: BTreeMap<String, Document>,
}

#[derive(Debug, Default)]
struct State {
    databases: HashSet<String>,
    tables: HashMap<TableRef, MemoryTable>,
    executed: Vec<WriteQuery>,
    config_lookups: u64,
    connections_opened: u64,
    connections_closed: u64,
    fail_connects: u32,
    fail_queries: u32,
    query_delay: Option<Duration>,
}

impl State {
    fn table(&self, table: &TableRef) -> Result<&MemoryTable> {
        if !self.databases.contains(&table.database) {
            return Err(Error::DatabaseNotFound {
                database: table.database.clone(),
            });
        }
        self.tables.get(table).ok_or_else(|| Error::TableNotFound {
            table: table.to_string(),
        })
    }

    fn table_mut(&mut self, table: &TableRef) -> Result<&mut MemoryTable> {
        if !self.databases.contains(&table.database) {
            return Err(Error::DatabaseNotFound {
                database: table.database.clone(),
            });
        }
        self.tables.get_mut(table).ok_or_else(|| Error::TableNotFound {
            table: table.to_string(),
        })
    }

    fn take_query_failure(&mut self) -> Result<()> {
        if self.fail_queries > 0 {
            self.fail_queries -= 1;
            return Err(Error::connection("connection reset by peer (injected)"));
        }
        Ok(())
    }
}

/// Shared in-memory database; clones share the same data
#[derive(Debug, Clone, Default)]
pub struct MemoryDatabase {
    state: Arc<Mutex<State>>,
}

impl MemoryDatabase {
    /// Create an empty database server
    pub fn new() -> Self {
        Self::default()
    }

    /// Connection factory bound to this database
    pub fn factory(&self) -> MemoryConnectionFactory {
        MemoryConnectionFactory { db: self.clone() }
    }

    /// Create (or recreate, dropping its documents) a table
    pub fn create_table(&self, table: &TableRef, primary_key: impl Into<String>) {
        let mut state = self.state.lock();
        state.databases.insert(table.database.clone());
        state.tables.insert(
            table.clone(),
            MemoryTable {
                primary_key: primary_key.into(),
                docs: BTreeMap::new(),
            },
        );
    }

    /// Insert or replace a document
    pub fn insert(&self, table: &TableRef, doc: Value) -> Result<()> {
        let Value::Object(doc) = doc else {
            return Err(Error::query("expected an object to insert"));
        };
        let mut state = self.state.lock();
        let table = state.table_mut(table)?;
        let key = doc.get(&table.primary_key).ok_or_else(|| {
            Error::query(format!(
                "document is missing primary key `{}`",
                table.primary_key
            ))
        })?;
        table.docs.insert(key_of(key), doc);
        Ok(())
    }

    /// Fetch a document by primary key
    pub fn get(&self, table: &TableRef, key: &Value) -> Option<Document> {
        let state = self.state.lock();
        state.tables.get(table)?.docs.get(&key_of(key)).cloned()
    }

    /// All documents of a table, ordered by primary key
    pub fn documents(&self, table: &TableRef) -> Vec<Document> {
        let state = self.state.lock();
        state
            .tables
            .get(table)
            .map(|t| t.docs.values().cloned().collect())
            .unwrap_or_default()
    }

    /// Number of documents in a table
    pub fn len(&self, table: &TableRef) -> usize {
        let state = self.state.lock();
        state.tables.get(table).map_or(0, |t| t.docs.len())
    }

    /// Whether a table holds no documents
    pub fn is_empty(&self, table: &TableRef) -> bool {
        self.len(table) == 0
    }

    /// Every write query that reached the server, in order
    pub fn executed_queries(&self) -> Vec<WriteQuery> {
        self.state.lock().executed.clone()
    }

    /// Number of table-config lookups served
    pub fn table_config_lookups(&self) -> u64 {
        self.state.lock().config_lookups
    }

    /// Connections opened so far
    pub fn connections_opened(&self) -> u64 {
        self.state.lock().connections_opened
    }

    /// Connections closed so far
    pub fn connections_closed(&self) -> u64 {
        self.state.lock().connections_closed
    }

    /// Make the next `n` connection attempts fail with a connection error
    pub fn fail_next_connects(&self, n: u32) {
        self.state.lock().fail_connects = n;
    }

    /// Make the next `n` queries (lookups or writes) fail with a connection error
    pub fn fail_next_queries(&self, n: u32) {
        self.state.lock().fail_queries = n;
    }

    /// Make every write wait `delay` before it touches the data
    pub fn set_query_delay(&self, delay: Duration) {
        self.state.lock().query_delay = Some(delay);
    }
}

/// Factory producing connections to a [`MemoryDatabase`]
#[derive(Debug, Clone)]
pub struct MemoryConnectionFactory {
    db: MemoryDatabase,
}

impl MemoryConnectionFactory {
    /// Create a factory for the given database
    pub fn new(db: MemoryDatabase) -> Self {
        Self { db }
    }
}

#[async_trait]
impl ConnectionFactory for MemoryConnectionFactory {
    async fn connect(&self, config: &ConnectionConfig) -> Result<Box<dyn Connection>> {
        let mut state = self.db.state.lock();
        if state.fail_connects > 0 {
            state.fail_connects -= 1;
            return Err(Error::connection(format!(
                "could not connect to {} (injected)",
                config.address()
            )));
        }
        state.connections_opened += 1;
        trace!(address = %config.address(), "Opened in-memory connection");

        Ok(Box::new(MemoryConnection {
            db: self.db.clone(),
            open: AtomicBool::new(true),
        }))
    }

    fn backend(&self) -> &'static str {
        "memory"
    }
}

/// Connection to a [`MemoryDatabase`]
#[derive(Debug)]
pub struct MemoryConnection {
    db: MemoryDatabase,
    open: AtomicBool,
}

impl MemoryConnection {
    fn ensure_open(&self) -> Result<()> {
        if self.open.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(Error::connection("connection is closed"))
        }
    }
}

#[async_trait]
impl Connection for MemoryConnection {
    async fn table_config(&self, table: &TableRef) -> Result<TableConfig> {
        self.ensure_open()?;
        let mut state = self.db.state.lock();
        state.take_query_failure()?;
        state.config_lookups += 1;

        let primary_key = state.table(table)?.primary_key.clone();
        Ok(TableConfig::new(
            table.database.clone(),
            table.table.clone(),
            primary_key,
        ))
    }

    async fn run(&self, query: &WriteQuery) -> Result<MutationResult> {
        self.ensure_open()?;
        let delay = self.db.state.lock().query_delay;
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        let mut state = self.db.state.lock();
        state.take_query_failure()?;
        state.executed.push(query.clone());
        trace!(query = %query, "Executing in-memory query");

        let table = state.table_mut(&query.table)?;
        let keys = select_keys(table, &query.selector);

        let mut result = MutationResult::new();
        if query.return_changes {
            result.changes = Some(Vec::new());
        }
        if keys.is_empty() && matches!(query.selector, Selector::Key(_)) {
            result.skipped = 1;
            return Ok(result);
        }

        match &query.operation {
            WriteOperation::Delete => {
                for key in keys {
                    if let Some(old) = table.docs.remove(&key) {
                        result.deleted += 1;
                        if query.return_changes {
                            result.push_change(Change {
                                old_val: Some(Value::Object(old)),
                                new_val: None,
                            });
                        }
                    }
                }
            }
            WriteOperation::Update(payload) => {
                let primary_key = table.primary_key.clone();
                for key in keys {
                    let Some(doc) = table.docs.get_mut(&key) else {
                        continue;
                    };
                    if let Some(new_key) = payload.get(&primary_key) {
                        if doc.get(&primary_key) != Some(new_key) {
                            result.add_error(format!(
                                "Primary key `{}` cannot be changed (`{}` -> `{}`)",
                                primary_key,
                                doc.get(&primary_key).unwrap_or(&Value::Null),
                                new_key
                            ));
                            continue;
                        }
                    }

                    let mut merged = doc.clone();
                    merge_into(&mut merged, payload);
                    if merged == *doc {
                        result.unchanged += 1;
                        continue;
                    }
                    if query.return_changes {
                        result.push_change(Change {
                            old_val: Some(Value::Object(doc.clone())),
                            new_val: Some(Value::Object(merged.clone())),
                        });
                    }
                    *doc = merged;
                    result.replaced += 1;
                }
            }
        }

        Ok(result)
    }

    async fn is_valid(&self) -> bool {
        self.open.load(Ordering::SeqCst)
    }

    async fn close(&self) -> Result<()> {
        if self.open.swap(false, Ordering::SeqCst) {
            self.db.state.lock().connections_closed += 1;
        }
        Ok(())
    }
}

fn key_of(value: &Value) -> String {
    value.to_string()
}

fn select_keys(table: &MemoryTable, selector: &Selector) -> Vec<String> {
    match selector {
        Selector::Key(key) => {
            let key = key_of(key);
            if table.docs.contains_key(&key) {
                vec![key]
            } else {
                Vec::new()
            }
        }
        Selector::Filter(filter) => table
            .docs
            .iter()
            .filter(|(_, doc)| filter.matches(doc))
            .map(|(key, _)| key.clone())
            .collect(),
    }
}

/// Deep merge: nested objects merge field by field, anything else replaces
fn merge_into(target: &mut Document, patch: &Document) {
    for (field, value) in patch {
        if let (Some(Value::Object(existing)), Value::Object(nested)) = (target.get_mut(field), value)
        {
            merge_into(existing, nested);
            continue;
        }
        target.insert(field.clone(), value.clone());
    }
}
