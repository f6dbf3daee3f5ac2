//! Event records
//!
//! Records arrive schema-less. They are modelled as an explicit tagged union so
//! that flattening into dotted leaf names is a plain recursive walk.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::error::{Result, TypedefError};

/// Separator joining a key chain into a dotted field name.
pub const CHAIN_SEPARATOR: &str = ".";

/// A leaf value
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Scalar {
    Null,
    Boolean(bool),
    Integer(i64),
    Float(f64),
    Text(String),
}

/// A possibly nested record value
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Scalar(Scalar),
    Map(BTreeMap<String, Value>),
    Sequence(Vec<Value>),
}

/// Top level of an event: field name to value
pub type Record = BTreeMap<String, Value>;

/// One flattened leaf: the key chain leading to a scalar
#[derive(Debug, Clone, PartialEq)]
pub struct Leaf<'a> {
    pub chain: Vec<String>,
    pub value: &'a Scalar,
}

impl Leaf<'_> {
    /// Dotted field name of this leaf
    pub fn name(&self) -> String {
        self.chain.join(CHAIN_SEPARATOR)
    }
}

impl Value {
    /// Whether this value is a map or a sequence
    pub fn is_container(&self) -> bool {
        !matches!(self, Value::Scalar(_))
    }

    /// Depth-first list of every scalar reachable from this value.
    ///
    /// Map entries contribute their key, sequence elements their index. A bare
    /// scalar yields a single leaf with an empty chain.
    pub fn leaves(&self) -> Vec<Leaf<'_>> {
        let mut out = Vec::new();
        collect_leaves(self, &mut Vec::new(), &mut out);
        out
    }
}

fn collect_leaves<'a>(value: &'a Value, chain: &mut Vec<String>, out: &mut Vec<Leaf<'a>>) {
    match value {
        Value::Scalar(scalar) => out.push(Leaf {
            chain: chain.clone(),
            value: scalar,
        }),
        Value::Map(entries) => {
            for (key, child) in entries {
                chain.push(key.clone());
                collect_leaves(child, chain, out);
                chain.pop();
            }
        }
        Value::Sequence(items) => {
            for (index, child) in items.iter().enumerate() {
                chain.push(index.to_string());
                collect_leaves(child, chain, out);
                chain.pop();
            }
        }
    }
}

/// Flatten a whole record into dotted leaf names.
pub fn record_leaves(record: &Record) -> Vec<Leaf<'_>> {
    let mut out = Vec::new();
    let mut chain = Vec::new();
    for (key, value) in record {
        chain.push(key.clone());
        collect_leaves(value, &mut chain, &mut out);
        chain.pop();
    }
    out
}

impl From<serde_json::Value> for Value {
    fn from(json: serde_json::Value) -> Self {
        match json {
            serde_json::Value::Null => Value::Scalar(Scalar::Null),
            serde_json::Value::Bool(b) => Value::Scalar(Scalar::Boolean(b)),
            serde_json::Value::Number(n) => {
                // u64 values beyond i64 range fall back to a float
                let scalar = match n.as_i64() {
                    Some(i) => Scalar::Integer(i),
                    None => Scalar::Float(n.as_f64().unwrap_or(f64::NAN)),
                };
                Value::Scalar(scalar)
            }
            serde_json::Value::String(s) => Value::Scalar(Scalar::Text(s)),
            serde_json::Value::Array(items) => {
                Value::Sequence(items.into_iter().map(Value::from).collect())
            }
            serde_json::Value::Object(map) => {
                Value::Map(map.into_iter().map(|(k, v)| (k, Value::from(v))).collect())
            }
        }
    }
}

/// Convert a JSON object into a record.
pub fn record_from_json(json: serde_json::Value) -> Result<Record> {
    match Value::from(json) {
        Value::Map(entries) => Ok(entries),
        _ => Err(TypedefError::InvalidArgument(
            "event record must be a JSON object".to_string(),
        )),
    }
}

/// Parse one JSON text into a record.
pub fn parse_record(text: &str) -> Result<Record> {
    let json: serde_json::Value = serde_json::from_str(text)?;
    record_from_json(json)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn names(record: &Record) -> Vec<String> {
        record_leaves(record).iter().map(Leaf::name).collect()
    }

    #[test]
    fn test_flat_record_leaves() {
        let record = record_from_json(json!({"b": 1, "a": "x"})).unwrap();
        assert_eq!(names(&record), vec!["a", "b"]);
    }

    #[test]
    fn test_nested_leaves_use_dotted_chains() {
        let record = record_from_json(json!({
            "user": {"name": "n", "tags": ["t1", {"k": true}]},
            "n": 1
        }))
        .unwrap();
        assert_eq!(
            names(&record),
            vec!["n", "user.name", "user.tags.0", "user.tags.1.k"]
        );
    }

    #[test]
    fn test_empty_containers_have_no_leaves() {
        let record = record_from_json(json!({"m": {}, "s": []})).unwrap();
        assert!(record_leaves(&record).is_empty());
    }

    #[test]
    fn test_scalar_root_has_empty_chain() {
        let value = Value::from(json!(3));
        let leaves = value.leaves();
        assert_eq!(leaves.len(), 1);
        assert!(leaves[0].chain.is_empty());
        assert_eq!(leaves[0].value, &Scalar::Integer(3));
    }

    #[test]
    fn test_non_object_is_rejected() {
        assert!(record_from_json(json!([1, 2])).is_err());
        assert!(parse_record("not json").is_err());
    }
}
