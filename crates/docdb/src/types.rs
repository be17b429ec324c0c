//! Value types shared by connections and queries

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A document: ordered field name to value mapping
pub type Document = serde_json::Map<String, Value>;

/// Default primary key name for tables created without one
pub const DEFAULT_PRIMARY_KEY: &str = "id";

/// Table metadata as reported by the server
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableConfig {
    /// Database the table lives in
    pub db: String,
    /// Table name
    pub name: String,
    /// Primary key field name
    pub primary_key: String,
}

impl TableConfig {
    /// Create table metadata
    pub fn new(
        db: impl Into<String>,
        name: impl Into<String>,
        primary_key: impl Into<String>,
    ) -> Self {
        Self {
            db: db.into(),
            name: name.into(),
            primary_key: primary_key.into(),
        }
    }
}

/// Selection predicate: field name to expected value
///
/// Matching is a subset match. Every field in the filter must be present in
/// the document with an equal value; nested objects match recursively, so
/// `{"address": {"city": "Oslo"}}` matches any document whose address has
/// that city.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Filter(Document);

impl Filter {
    /// Create an empty filter
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a field constraint (builder-style)
    pub fn with(mut self, field: impl Into<String>, value: impl Into<Value>) -> Self {
        self.0.insert(field.into(), value.into());
        self
    }

    /// Add a field constraint
    pub fn insert(&mut self, field: impl Into<String>, value: Value) {
        self.0.insert(field.into(), value);
    }

    /// Expected value for a field
    pub fn get(&self, field: &str) -> Option<&Value> {
        self.0.get(field)
    }

    /// Constrained field names, in insertion order
    pub fn keys(&self) -> impl Iterator<Item = &String> {
        self.0.keys()
    }

    /// Number of constrained fields
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Whether the filter has no constraints (matches everything)
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// True when the filter constrains exactly the primary key and nothing else
    pub fn is_primary_key_only(&self, primary_key: &str) -> bool {
        self.0.len() == 1 && self.0.contains_key(primary_key)
    }

    /// Check whether a document satisfies the filter
    pub fn matches(&self, doc: &Document) -> bool {
        self.0
            .iter()
            .all(|(field, expected)| doc.get(field).is_some_and(|v| value_matches(v, expected)))
    }

    /// Borrow the underlying mapping
    pub fn as_document(&self) -> &Document {
        &self.0
    }

    /// Consume into the underlying mapping
    pub fn into_document(self) -> Document {
        self.0
    }
}

impl From<Document> for Filter {
    fn from(doc: Document) -> Self {
        Self(doc)
    }
}

fn value_matches(actual: &Value, expected: &Value) -> bool {
    match (actual, expected) {
        (Value::Object(actual), Value::Object(expected)) => expected
            .iter()
            .all(|(k, e)| actual.get(k).is_some_and(|a| value_matches(a, e))),
        _ => actual == expected,
    }
}

/// One entry of a change list returned with `return_changes`
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Change {
    /// Document before the write (null for inserts)
    pub old_val: Option<Value>,
    /// Document after the write (null for deletes)
    pub new_val: Option<Value>,
}

/// Outcome of a delete or update
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MutationResult {
    /// Documents deleted
    #[serde(default)]
    pub deleted: u64,
    /// Documents that could not be written
    #[serde(default)]
    pub errors: u64,
    /// Documents inserted
    #[serde(default)]
    pub inserted: u64,
    /// Documents replaced or updated
    #[serde(default)]
    pub replaced: u64,
    /// Selections that resolved to no document (e.g. `get` of a missing key)
    #[serde(default)]
    pub skipped: u64,
    /// Documents matched but left identical
    #[serde(default)]
    pub unchanged: u64,
    /// First error message, when `errors > 0`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub first_error: Option<String>,
    /// Change list, present only when changes were requested
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub changes: Option<Vec<Change>>,
}

impl MutationResult {
    /// Create an empty result
    pub fn new() -> Self {
        Self::default()
    }

    /// Sum of every count field
    ///
    /// Zero means the selection matched nothing.
    pub fn counts_total(&self) -> u64 {
        self.deleted + self.errors + self.inserted + self.replaced + self.skipped + self.unchanged
    }

    /// Record an error; only the first message is kept
    pub fn add_error(&mut self, message: impl Into<String>) {
        self.errors += 1;
        if self.first_error.is_none() {
            self.first_error = Some(message.into());
        }
    }

    /// Append a change, creating the list on first use
    pub fn push_change(&mut self, change: Change) {
        self.changes.get_or_insert_with(Vec::new).push(change);
    }

    /// Render as a document (the shape forwarded downstream)
    pub fn to_document(&self) -> Document {
        match serde_json::to_value(self) {
            Ok(Value::Object(doc)) => doc,
            _ => Document::new(),
        }
    }
}
