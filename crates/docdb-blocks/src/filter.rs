//! Filter expressions
//!
//! A filter expression turns an incoming signal into the [`Filter`] used to
//! select documents. Two implementations exist:
//!
//! - [`WholeSignal`]: every field of the signal becomes a constraint. This is
//!   the default and corresponds to the template `{{ $.to_dict() }}`.
//! - [`TemplateFilter`]: a JSON template whose string values may contain
//!   placeholders. A value that is exactly one placeholder is replaced by the
//!   referenced signal value with its type intact; placeholders inside longer
//!   strings are interpolated as text.
//!
//! ```yaml
//! filter:
//!   id: "{{ $user_id }}"          # typed substitution
//!   region: "eu-{{ $zone }}"      # interpolation
//!   owner: "{{ $account.owner }}" # nested field
//! ```

use docdb::Filter;
use regex::{Captures, Regex};
use serde_json::Value;
use std::fmt;
use std::sync::LazyLock;

use crate::error::{BlockError, BlockResult};
use crate::signal::Signal;

/// `{{ $ }}`, `{{ $.to_dict() }}`, `{{ $field }}`, `{{ $a.b }}`
static PLACEHOLDER: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"\{\{\s*\$(?:\.to_dict\(\)|\.?([A-Za-z_][A-Za-z0-9_]*(?:\.[A-Za-z_][A-Za-z0-9_]*)*))?\s*\}\}",
    )
    .expect("placeholder regex pattern is invalid - this is a bug")
});

/// Evaluates a signal into a document filter
pub trait FilterExpression: Send + Sync + fmt::Debug {
    /// Build the filter for one signal
    fn evaluate(&self, signal: &Signal) -> BlockResult<Filter>;
}

/// Uses the whole signal as the filter
#[derive(Debug, Clone, Copy, Default)]
pub struct WholeSignal;

impl FilterExpression for WholeSignal {
    fn evaluate(&self, signal: &Signal) -> BlockResult<Filter> {
        Ok(Filter::from(signal.to_dict()))
    }
}

/// Filter rendered from a JSON template
#[derive(Debug, Clone)]
pub struct TemplateFilter {
    template: Value,
}

impl TemplateFilter {
    /// Parse a template, rejecting malformed placeholders
    pub fn new(template: Value) -> BlockResult<Self> {
        check_placeholders(&template)?;
        Ok(Self { template })
    }
}

impl FilterExpression for TemplateFilter {
    fn evaluate(&self, signal: &Signal) -> BlockResult<Filter> {
        match render(&self.template, signal)? {
            Value::Object(fields) => Ok(Filter::from(fields)),
            other => Err(BlockError::expression(format!(
                "filter must evaluate to an object, got {}",
                other
            ))),
        }
    }
}

/// Build the expression for a configured filter value
///
/// `None` and the whole-signal template select [`WholeSignal`]; objects and
/// single-placeholder strings become a [`TemplateFilter`].
pub fn parse_filter_expression(config: Option<&Value>) -> BlockResult<Box<dyn FilterExpression>> {
    match config {
        None | Some(Value::Null) => Ok(Box::new(WholeSignal)),
        Some(Value::String(s)) if is_whole_signal(s) => Ok(Box::new(WholeSignal)),
        Some(v @ Value::Object(_)) | Some(v @ Value::String(_)) => {
            Ok(Box::new(TemplateFilter::new(v.clone())?))
        }
        Some(other) => Err(BlockError::config(format!(
            "filter must be an object or a template string, got {}",
            other
        ))),
    }
}

fn is_whole_signal(s: &str) -> bool {
    PLACEHOLDER
        .captures(s.trim())
        .is_some_and(|caps| caps[0].len() == s.trim().len() && caps.get(1).is_none())
}

fn check_placeholders(value: &Value) -> BlockResult<()> {
    match value {
        Value::String(s) => {
            let stripped = PLACEHOLDER.replace_all(s, "");
            if stripped.contains("{{") || stripped.contains("}}") {
                return Err(BlockError::config(format!(
                    "malformed placeholder in filter template: {}",
                    s
                )));
            }
            Ok(())
        }
        Value::Object(fields) => fields.values().try_for_each(check_placeholders),
        Value::Array(items) => items.iter().try_for_each(check_placeholders),
        _ => Ok(()),
    }
}

fn render(value: &Value, signal: &Signal) -> BlockResult<Value> {
    match value {
        Value::String(s) => render_string(s, signal),
        Value::Object(fields) => {
            let mut out = serde_json::Map::with_capacity(fields.len());
            for (k, v) in fields {
                out.insert(k.clone(), render(v, signal)?);
            }
            Ok(Value::Object(out))
        }
        Value::Array(items) => items
            .iter()
            .map(|v| render(v, signal))
            .collect::<BlockResult<Vec<_>>>()
            .map(Value::Array),
        other => Ok(other.clone()),
    }
}

fn render_string(s: &str, signal: &Signal) -> BlockResult<Value> {
    // exactly one placeholder: keep the value's type
    if let Some(caps) = PLACEHOLDER.captures(s) {
        if caps[0].len() == s.len() {
            return lookup(&caps, signal);
        }
    }

    let mut out = String::with_capacity(s.len());
    let mut last = 0;
    for caps in PLACEHOLDER.captures_iter(s) {
        let Some(whole) = caps.get(0) else {
            continue;
        };
        out.push_str(&s[last..whole.start()]);
        match lookup(&caps, signal)? {
            Value::String(text) => out.push_str(&text),
            other => out.push_str(&other.to_string()),
        }
        last = whole.end();
    }
    out.push_str(&s[last..]);
    Ok(Value::String(out))
}

fn lookup(caps: &Captures<'_>, signal: &Signal) -> BlockResult<Value> {
    let Some(path) = caps.get(1) else {
        return Ok(signal.to_value());
    };

    let mut segments = path.as_str().split('.');
    let first = segments.next().unwrap_or_default();
    let mut current = signal
        .get(first)
        .ok_or_else(|| BlockError::expression(format!("field `{}` not found in signal", first)))?;

    for segment in segments {
        current = current.get(segment).ok_or_else(|| {
            BlockError::expression(format!(
                "field `{}` not found in signal",
                path.as_str()
            ))
        })?;
    }
    Ok(current.clone())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::signal;
    use serde_json::json;

    #[test]
    fn test_whole_signal_default() {
        let expr = parse_filter_expression(None).unwrap();
        let filter = expr.evaluate(&signal!({"id": "a1", "name": "x"})).unwrap();

        assert_eq!(filter.len(), 2);
        assert_eq!(filter.get("name"), Some(&json!("x")));
    }

    #[test]
    fn test_whole_signal_template_strings() {
        for template in ["{{ $.to_dict() }}", "{{$}}", "  {{ $ }} "] {
            let expr = parse_filter_expression(Some(&json!(template))).unwrap();
            let filter = expr.evaluate(&signal!({"id": "a1"})).unwrap();
            assert!(filter.is_primary_key_only("id"), "template {template}");
        }
    }

    #[test]
    fn test_typed_substitution() {
        let expr = parse_filter_expression(Some(&json!({"id": "{{ $user_id }}"}))).unwrap();
        let filter = expr
            .evaluate(&signal!({"user_id": 42, "name": "x"}))
            .unwrap();

        assert_eq!(filter.get("id"), Some(&json!(42)));
        assert!(filter.is_primary_key_only("id"));
    }

    #[test]
    fn test_interpolation_and_nested_fields() {
        let template = json!({
            "region": "eu-{{ $zone }}-{{ $rack }}",
            "owner": "{{ $account.owner }}",
            "active": true
        });
        let expr = parse_filter_expression(Some(&template)).unwrap();
        let filter = expr
            .evaluate(&signal!({"zone": "west", "rack": 7, "account": {"owner": "ops"}}))
            .unwrap();

        assert_eq!(filter.get("region"), Some(&json!("eu-west-7")));
        assert_eq!(filter.get("owner"), Some(&json!("ops")));
        assert_eq!(filter.get("active"), Some(&json!(true)));
    }

    #[test]
    fn test_placeholder_string_yielding_object() {
        let expr = parse_filter_expression(Some(&json!("{{ $match }}"))).unwrap();
        let filter = expr
            .evaluate(&signal!({"match": {"email": "a@b.com"}, "other": 1}))
            .unwrap();
        assert_eq!(filter.len(), 1);
        assert_eq!(filter.get("email"), Some(&json!("a@b.com")));

        let err = expr.evaluate(&signal!({"match": "scalar"})).unwrap_err();
        assert!(matches!(err, BlockError::Expression(_)));
    }

    #[test]
    fn test_missing_field_is_expression_error() {
        let expr = parse_filter_expression(Some(&json!({"id": "{{ $id }}"}))).unwrap();
        let err = expr.evaluate(&signal!({"name": "x"})).unwrap_err();

        assert!(matches!(err, BlockError::Expression(_)));
        assert!(!err.is_retryable());
    }

    #[test]
    fn test_malformed_templates_rejected() {
        assert!(parse_filter_expression(Some(&json!({"id": "{{ id }}"}))).is_err());
        assert!(parse_filter_expression(Some(&json!({"id": "{{ $id"}))).is_err());
        assert!(parse_filter_expression(Some(&json!(12))).is_err());
    }
}
