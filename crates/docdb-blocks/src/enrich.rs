//! Output signal enrichment
//!
//! Decides how a query result and the signal that caused it are combined
//! into the signal sent downstream.

use docdb::Document;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use validator::Validate;

use crate::signal::Signal;

/// How results are merged into outgoing signals
#[derive(Debug, Clone, Default, Serialize, Deserialize, Validate, JsonSchema)]
pub struct EnrichConfig {
    /// Emit only the result, dropping the incoming signal's fields
    #[serde(default)]
    pub exclude_existing: bool,

    /// Nest the result under this field instead of merging it at the top level
    #[serde(default)]
    pub enrich_field: String,
}

impl EnrichConfig {
    /// Combine a result with the signal that produced it
    ///
    /// With `exclude_existing` the result alone is emitted. Otherwise the
    /// incoming signal is copied and the result is either merged into it
    /// (result fields win on conflict) or stored under `enrich_field`.
    pub fn output_signal(&self, result: Document, incoming: &Signal) -> Signal {
        if self.exclude_existing {
            return Signal::from(result);
        }

        let mut out = incoming.clone();
        if self.enrich_field.is_empty() {
            for (field, value) in result {
                out.insert(field, value);
            }
        } else {
            out.insert(self.enrich_field.clone(), Value::Object(result));
        }
        out
    }
}
