//! The document model: scalars, sequences and string-keyed mappings.
//!
//! A [`Node`] is a closed sum over the four shapes the engine ever has to
//! dispatch on. `Ref` is not a valid *input* shape — it only appears once the
//! engine has externalized a nested mapping into its own relation and
//! replaced it in place.

use crate::error::{Error, Result};
use crate::relation::Reference;
use serde_json::Value;
use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::hash::{Hash, Hasher};

/// An atomic document value.
///
/// `Bytes` never arises from JSON input; it exists so BLOB cells read back
/// from a database stay lossless.
#[derive(Debug, Clone)]
pub enum Scalar {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
    Bytes(Vec<u8>),
}

impl Scalar {
    fn rank(&self) -> u8 {
        match self {
            Scalar::Null => 0,
            Scalar::Bool(_) => 1,
            Scalar::Int(_) => 2,
            Scalar::Float(_) => 3,
            Scalar::Text(_) => 4,
            Scalar::Bytes(_) => 5,
        }
    }
}

// Floats are compared and hashed by bit pattern so scalars have a total
// order and can key rows in ordered sets.
impl PartialEq for Scalar {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Scalar {}

impl Ord for Scalar {
    fn cmp(&self, other: &Self) -> Ordering {
        match (self, other) {
            (Scalar::Null, Scalar::Null) => Ordering::Equal,
            (Scalar::Bool(a), Scalar::Bool(b)) => a.cmp(b),
            (Scalar::Int(a), Scalar::Int(b)) => a.cmp(b),
            (Scalar::Float(a), Scalar::Float(b)) => a.total_cmp(b),
            (Scalar::Text(a), Scalar::Text(b)) => a.cmp(b),
            (Scalar::Bytes(a), Scalar::Bytes(b)) => a.cmp(b),
            (a, b) => a.rank().cmp(&b.rank()),
        }
    }
}

impl PartialOrd for Scalar {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Hash for Scalar {
    fn hash<H: Hasher>(&self, state: &mut H) {
        state.write_u8(self.rank());
        match self {
            Scalar::Null => {}
            Scalar::Bool(b) => b.hash(state),
            Scalar::Int(n) => n.hash(state),
            Scalar::Float(f) => f.to_bits().hash(state),
            Scalar::Text(s) => s.hash(state),
            Scalar::Bytes(b) => b.hash(state),
        }
    }
}

impl std::fmt::Display for Scalar {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Scalar::Null => write!(f, "null"),
            Scalar::Bool(b) => write!(f, "{b}"),
            Scalar::Int(n) => write!(f, "{n}"),
            Scalar::Float(x) => write!(f, "{x:?}"),
            Scalar::Text(s) => write!(f, "{s}"),
            Scalar::Bytes(b) => {
                for byte in b {
                    write!(f, "{byte:02x}")?;
                }
                Ok(())
            }
        }
    }
}

/// A string-keyed mapping with deterministic (sorted) key iteration.
pub type Mapping = BTreeMap<String, Node>;

/// One node of a document tree.
#[derive(Debug, Clone, PartialEq)]
pub enum Node {
    Scalar(Scalar),
    Seq(Vec<Node>),
    Map(Mapping),
    /// Produced by the engine when a nested mapping has been externalized
    /// into its own relation. Never a valid caller input.
    Ref(Reference),
}

impl Node {
    pub fn null() -> Self {
        Node::Scalar(Scalar::Null)
    }

    pub fn as_scalar(&self) -> Option<&Scalar> {
        match self {
            Node::Scalar(s) => Some(s),
            _ => None,
        }
    }
}

impl From<Scalar> for Node {
    fn from(s: Scalar) -> Self {
        Node::Scalar(s)
    }
}

/// Convert a JSON value into a document node.
///
/// Numbers that fit neither `i64` nor `f64` losslessly are rejected as
/// structural errors rather than silently truncated.
pub fn node_from_json(value: Value) -> Result<Node> {
    match value {
        Value::Null => Ok(Node::Scalar(Scalar::Null)),
        Value::Bool(b) => Ok(Node::Scalar(Scalar::Bool(b))),
        Value::Number(n) => {
            if let Some(i) = n.as_i64() {
                Ok(Node::Scalar(Scalar::Int(i)))
            } else if n.is_u64() {
                // Out of i64 range; refusing beats silently rounding to f64.
                Err(Error::Structural(format!("integer out of range: {n}")))
            } else if let Some(f) = n.as_f64() {
                Ok(Node::Scalar(Scalar::Float(f)))
            } else {
                Err(Error::Structural(format!("unrepresentable number: {n}")))
            }
        }
        Value::String(s) => Ok(Node::Scalar(Scalar::Text(s))),
        Value::Array(items) => Ok(Node::Seq(
            items.into_iter().map(node_from_json).collect::<Result<_>>()?,
        )),
        Value::Object(fields) => {
            let mut map = Mapping::new();
            for (k, v) in fields {
                map.insert(k, node_from_json(v)?);
            }
            Ok(Node::Map(map))
        }
    }
}

/// Convert a JSON object into a [`Mapping`], the shape the engine consumes.
pub fn document_from_json(value: Value) -> Result<Mapping> {
    match node_from_json(value)? {
        Node::Map(map) => Ok(map),
        _ => Err(Error::NotAMapping),
    }
}

/// Render a node back to JSON, for CLI output. Bytes become lowercase hex.
pub fn node_to_json(node: &Node) -> Value {
    match node {
        Node::Scalar(s) => scalar_to_json(s),
        Node::Seq(items) => Value::Array(items.iter().map(node_to_json).collect()),
        Node::Map(map) => Value::Object(
            map.iter()
                .map(|(k, v)| (k.clone(), node_to_json(v)))
                .collect(),
        ),
        Node::Ref(r) => serde_json::json!({ "relation": r.relation, "id": scalar_to_json(&r.id) }),
    }
}

pub(crate) fn scalar_to_json(s: &Scalar) -> Value {
    match s {
        Scalar::Null => Value::Null,
        Scalar::Bool(b) => Value::Bool(*b),
        Scalar::Int(n) => Value::Number((*n).into()),
        Scalar::Float(f) => serde_json::Number::from_f64(*f)
            .map(Value::Number)
            .unwrap_or(Value::Null),
        Scalar::Text(s) => Value::String(s.clone()),
        Scalar::Bytes(b) => Value::String(Scalar::Bytes(b.clone()).to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_json_conversion_roundtrip_shapes() {
        let doc = document_from_json(json!({
            "s": "text",
            "n": 3,
            "f": 1.5,
            "b": true,
            "z": null,
            "seq": [1, 2],
            "map": {"inner": 1}
        }))
        .unwrap();

        assert_eq!(doc.get("s"), Some(&Node::Scalar(Scalar::Text("text".into()))));
        assert_eq!(doc.get("n"), Some(&Node::Scalar(Scalar::Int(3))));
        assert!(matches!(doc.get("seq"), Some(Node::Seq(items)) if items.len() == 2));
        assert!(matches!(doc.get("map"), Some(Node::Map(_))));
    }

    #[test]
    fn test_non_mapping_root_rejected() {
        assert!(matches!(
            document_from_json(json!([1, 2, 3])),
            Err(Error::NotAMapping)
        ));
        assert!(matches!(document_from_json(json!(42)), Err(Error::NotAMapping)));
    }

    #[test]
    fn test_out_of_range_integer_rejected() {
        let big = serde_json::Number::from(u64::MAX);
        assert!(matches!(
            node_from_json(Value::Number(big)),
            Err(Error::Structural(_))
        ));
    }

    #[test]
    fn test_scalar_total_order() {
        let mut values = vec![
            Scalar::Text("b".into()),
            Scalar::Int(2),
            Scalar::Null,
            Scalar::Float(1.5),
            Scalar::Bool(true),
        ];
        values.sort();
        assert_eq!(values[0], Scalar::Null);
        assert_eq!(values[4], Scalar::Text("b".into()));
    }

    #[test]
    fn test_float_equality_by_bits() {
        assert_eq!(Scalar::Float(1.5), Scalar::Float(1.5));
        assert_ne!(Scalar::Float(0.0), Scalar::Float(-0.0));
    }
}
