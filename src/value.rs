//! A small dynamically-typed value used to carry operation arguments.
//!
//! The source library forwards calls to backends by attribute name with
//! arbitrary positional/keyword arguments (§4.1). Rust has no dynamic
//! attribute dispatch, so operations are invoked by name (`&str`) against a
//! typed argument vector instead (see the Design Notes in SPEC_FULL.md §6.2
//! and spec.md §9).

use std::collections::BTreeMap;

/// Keyword arguments, ordered for deterministic grouping decisions (§4.4).
pub type KwArgs = BTreeMap<String, Value>;

/// A routing/operation argument.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
    Bytes(Vec<u8>),
    List(Vec<Value>),
}

impl Value {
    /// Stringify for use as a hashing/partitioning key (§4.2 `PartitionRouter`).
    pub fn as_key_bytes(&self) -> Vec<u8> {
        match self {
            Value::Null => b"".to_vec(),
            Value::Bool(b) => b.to_string().into_bytes(),
            Value::Int(i) => i.to_string().into_bytes(),
            Value::Float(f) => f.to_string().into_bytes(),
            Value::Str(s) => s.clone().into_bytes(),
            Value::Bytes(b) => b.clone(),
            Value::List(items) => items
                .iter()
                .map(|v| String::from_utf8_lossy(&v.as_key_bytes()).into_owned())
                .collect::<Vec<_>>()
                .join(",")
                .into_bytes(),
        }
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::Str(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::Str(s)
    }
}

impl From<i64> for Value {
    fn from(i: i64) -> Self {
        Value::Int(i)
    }
}

impl From<i32> for Value {
    fn from(i: i32) -> Self {
        Value::Int(i as i64)
    }
}

impl From<f64> for Value {
    fn from(f: f64) -> Self {
        Value::Float(f)
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl From<Vec<u8>> for Value {
    fn from(b: Vec<u8>) -> Self {
        Value::Bytes(b)
    }
}

/// Extract the routing key the way `nydus.db.routers.keyvalue.get_key` does:
/// the `"key"` kwarg if present, else the first positional argument.
pub fn get_key<'a>(args: &'a [Value], kwargs: &'a KwArgs) -> Option<&'a Value> {
    kwargs.get("key").or_else(|| args.first())
}
