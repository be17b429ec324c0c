//! Signal type: the unit of data flowing through a pipeline

use docdb::Document;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

use crate::error::{BlockError, BlockResult};

/// One record in a pipeline: an ordered field name to value mapping
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Signal(Document);

impl Signal {
    /// Create an empty signal
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a signal from a JSON value, which must be an object
    pub fn from_value(value: Value) -> BlockResult<Self> {
        match value {
            Value::Object(fields) => Ok(Self(fields)),
            other => Err(BlockError::Expression(format!(
                "signal must be an object, got {}",
                other
            ))),
        }
    }

    /// Copy of the fields as a plain mapping
    pub fn to_dict(&self) -> Document {
        self.0.clone()
    }

    /// Consume into the plain mapping
    pub fn into_dict(self) -> Document {
        self.0
    }

    /// Borrow the fields
    pub fn fields(&self) -> &Document {
        &self.0
    }

    /// Field value
    pub fn get(&self, field: &str) -> Option<&Value> {
        self.0.get(field)
    }

    /// Whether a field is present
    pub fn contains(&self, field: &str) -> bool {
        self.0.contains_key(field)
    }

    /// Set a field, returning the previous value
    pub fn insert(&mut self, field: impl Into<String>, value: Value) -> Option<Value> {
        self.0.insert(field.into(), value)
    }

    /// Set a field (builder-style)
    pub fn with(mut self, field: impl Into<String>, value: impl Into<Value>) -> Self {
        self.0.insert(field.into(), value.into());
        self
    }

    /// Number of fields
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Whether the signal has no fields
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// The signal as a JSON object value
    pub fn to_value(&self) -> Value {
        Value::Object(self.0.clone())
    }
}

impl From<Document> for Signal {
    fn from(fields: Document) -> Self {
        Self(fields)
    }
}

impl From<Signal> for Document {
    fn from(signal: Signal) -> Self {
        signal.0
    }
}

impl fmt::Display for Signal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", Value::Object(self.0.clone()))
    }
}
