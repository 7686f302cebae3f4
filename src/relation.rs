//! The relational model produced by the engine and consumed by the codec.
//!
//! A [`Row`] is one tuple of (field, value) pairs, kept sorted by field name
//! so equality, hashing and set membership are stable. A [`Reference`] is the
//! pointer value that replaces a nested mapping once it has been flattened
//! into its own relation.

use crate::value::{scalar_to_json, Scalar};
use serde::ser::{Serialize, SerializeMap, Serializer};
use std::collections::BTreeSet;

/// A resolved pointer to a row in another relation.
///
/// Equality is structural: same relation name, same id.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Reference {
    pub relation: String,
    pub id: Scalar,
}

impl Reference {
    pub fn new(relation: impl Into<String>, id: Scalar) -> Self {
        Reference {
            relation: relation.into(),
            id,
        }
    }
}

/// A value a row cell can hold: a scalar or a cross-relation reference.
///
/// Nested mappings and sequences never reach a finished row; the engine
/// replaces them with references before the row is built.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum FieldValue {
    Scalar(Scalar),
    Ref(Reference),
}

impl FieldValue {
    pub fn is_ref(&self) -> bool {
        matches!(self, FieldValue::Ref(_))
    }
}

/// One row of a relation: (field, value) pairs sorted by field name.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Row {
    fields: Vec<(String, FieldValue)>,
}

impl Row {
    /// Build a row from unordered pairs; fields are sorted by name.
    pub fn from_pairs(mut fields: Vec<(String, FieldValue)>) -> Self {
        fields.sort_by(|a, b| a.0.cmp(&b.0));
        Row { fields }
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    pub fn get(&self, field: &str) -> Option<&FieldValue> {
        self.fields
            .iter()
            .find(|(name, _)| name == field)
            .map(|(_, value)| value)
    }

    /// The value of the given id field, if the row carries one.
    pub fn id(&self, id_field: &str) -> Option<&Scalar> {
        match self.get(id_field)? {
            FieldValue::Scalar(s) => Some(s),
            FieldValue::Ref(_) => None,
        }
    }

    /// Field names, in sorted order.
    pub fn field_names(&self) -> impl Iterator<Item = &str> {
        self.fields.iter().map(|(name, _)| name.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &FieldValue)> {
        self.fields.iter().map(|(name, value)| (name.as_str(), value))
    }

    /// True if any cell holds a cross-relation reference.
    pub fn has_refs(&self) -> bool {
        self.fields.iter().any(|(_, value)| value.is_ref())
    }
}

/// The flat emission sequence: (relation name, row) pairs in traversal order.
pub type Emitted = Vec<(String, Row)>;

/// Grouped relations: sorted by relation name, rows deduplicated.
pub type Grouped = Vec<(String, BTreeSet<Row>)>;

// Rows serialize as plain JSON objects so CLI output reads like table data,
// not like a Rust enum dump. References become {"relation": ..., "id": ...}.
impl Serialize for FieldValue {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            FieldValue::Scalar(s) => scalar_to_json(s).serialize(serializer),
            FieldValue::Ref(r) => {
                let mut map = serializer.serialize_map(Some(2))?;
                map.serialize_entry("relation", &r.relation)?;
                map.serialize_entry("id", &scalar_to_json(&r.id))?;
                map.end()
            }
        }
    }
}

impl Serialize for Row {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.fields.len()))?;
        for (name, value) in &self.fields {
            map.serialize_entry(name, value)?;
        }
        map.end()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row(pairs: &[(&str, FieldValue)]) -> Row {
        Row::from_pairs(
            pairs
                .iter()
                .map(|(k, v)| (k.to_string(), v.clone()))
                .collect(),
        )
    }

    #[test]
    fn test_rows_sort_fields_by_name() {
        let r = row(&[
            ("id", FieldValue::Scalar(Scalar::Int(0))),
            ("a", FieldValue::Scalar(Scalar::Int(1))),
        ]);
        let names: Vec<_> = r.field_names().collect();
        assert_eq!(names, vec!["a", "id"]);
    }

    #[test]
    fn test_row_equality_ignores_insertion_order() {
        let a = row(&[
            ("a", FieldValue::Scalar(Scalar::Int(1))),
            ("id", FieldValue::Scalar(Scalar::Int(0))),
        ]);
        let b = row(&[
            ("id", FieldValue::Scalar(Scalar::Int(0))),
            ("a", FieldValue::Scalar(Scalar::Int(1))),
        ]);
        assert_eq!(a, b);

        let mut set = BTreeSet::new();
        set.insert(a);
        set.insert(b);
        assert_eq!(set.len(), 1);
    }

    #[test]
    fn test_reference_structural_equality() {
        let a = Reference::new("A", Scalar::Int(0));
        let b = Reference::new("A", Scalar::Int(0));
        let c = Reference::new("B", Scalar::Int(0));
        assert_eq!(a, b);
        assert_ne!(a, c);
    }

    #[test]
    fn test_row_serializes_as_flat_object() {
        let r = row(&[
            ("id", FieldValue::Scalar(Scalar::Int(1))),
            ("parent", FieldValue::Ref(Reference::new("data", Scalar::Int(7)))),
        ]);
        let json = serde_json::to_value(&r).unwrap();
        assert_eq!(
            json,
            serde_json::json!({"id": 1, "parent": {"relation": "data", "id": 7}})
        );
    }

    #[test]
    fn test_row_id_lookup() {
        let r = row(&[
            ("id", FieldValue::Scalar(Scalar::Int(9))),
            ("a", FieldValue::Scalar(Scalar::Text("x".into()))),
        ]);
        assert_eq!(r.id("id"), Some(&Scalar::Int(9)));
        assert_eq!(r.id("missing"), None);
    }
}
