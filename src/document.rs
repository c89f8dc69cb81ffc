//! Canonical input documents.
//!
//! Configuration text arrives as YAML (which includes JSON). It is parsed
//! into a loosely-typed tree and rewritten so that every mapping key is a
//! string. The result is a [`Document`], a thin wrapper over
//! [`serde_json::Value`] which is the tagged union the rule evaluator reads.

use serde_json::{Map, Number, Value};
use serde_yaml::Value as YamlValue;

/// Source text could not be parsed as a configuration document.
#[derive(Debug, thiserror::Error)]
pub enum FormatError {
    /// The YAML/JSON parser rejected the input.
    #[error("invalid YAML: {0}")]
    Parse(#[from] serde_yaml::Error),
}

/// A normalized configuration document.
///
/// Mappings always have string keys; sequences keep their order. Documents
/// are built fresh per request and never shared mutably.
#[derive(Debug, Clone, PartialEq)]
pub struct Document(Value);

impl Document {
    /// Wrap a value that is already structurally normalized.
    ///
    /// JSON values qualify by construction, so admission objects and HTTP
    /// payloads skip the text parse.
    pub fn from_value(value: Value) -> Self {
        Self(value)
    }

    /// Borrow the underlying tree.
    pub fn as_value(&self) -> &Value {
        &self.0
    }

    /// Consume the document, returning the underlying tree.
    pub fn into_value(self) -> Value {
        self.0
    }

    /// Serialize the document as compact JSON text.
    pub fn to_json(&self) -> String {
        self.0.to_string()
    }
}

/// Parse source text and rewrite it into a canonical [`Document`].
///
/// `<<` merge keys are resolved before canonicalization, with keys written
/// in the mapping itself taking precedence over merged ones. Normalizing the serialized form of a normalized document yields the
/// same document.
///
/// # Errors
///
/// Returns [`FormatError`] if the text is not a single YAML document.
pub fn normalize(text: &str) -> Result<Document, FormatError> {
    let mut parsed: YamlValue = serde_yaml::from_str(text)?;
    parsed.apply_merge()?;
    Ok(Document(canonicalize(parsed)))
}

fn canonicalize(value: YamlValue) -> Value {
    match value {
        YamlValue::Null => Value::Null,
        YamlValue::Bool(b) => Value::Bool(b),
        YamlValue::Number(n) => canonical_number(&n),
        YamlValue::String(s) => Value::String(s),
        YamlValue::Sequence(items) => Value::Array(items.into_iter().map(canonicalize).collect()),
        YamlValue::Mapping(entries) => {
            let mut map = Map::new();
            for (key, value) in entries {
                map.insert(key_string(key), canonicalize(value));
            }
            Value::Object(map)
        }
        YamlValue::Tagged(tagged) => canonicalize(tagged.value),
    }
}

fn canonical_number(n: &serde_yaml::Number) -> Value {
    if let Some(i) = n.as_i64() {
        return Value::Number(Number::from(i));
    }
    if let Some(u) = n.as_u64() {
        return Value::Number(Number::from(u));
    }
    // .nan and .inf have no JSON form; keep their YAML spelling.
    n.as_f64()
        .and_then(Number::from_f64)
        .map_or_else(|| Value::String(n.to_string()), Value::Number)
}

fn key_string(key: YamlValue) -> String {
    match key {
        YamlValue::String(s) => s,
        YamlValue::Null => "null".to_owned(),
        YamlValue::Bool(b) => b.to_string(),
        YamlValue::Number(n) => n.to_string(),
        YamlValue::Tagged(tagged) => key_string(tagged.value),
        complex @ (YamlValue::Sequence(_) | YamlValue::Mapping(_)) => {
            canonicalize(complex).to_string()
        }
    }
}
