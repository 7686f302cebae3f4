//! The flattening engine: decompose a nested document into flat relations.
//!
//! One call to [`Shredder::shred`] walks a single document and emits
//! `(relation, row)` pairs. Nested mappings are externalized into their own
//! relations and replaced by [`Reference`] values in the parent row;
//! list-valued fields fan out into one-to-many child relations that point
//! back at the parent. [`Shredder::shred_grouped`] groups the emission by
//! relation name with deduplicated row sets, which is the shape the SQL
//! codec consumes.
//!
//! The engine owns its input: generated ids are written into its own copy of
//! the document, never into caller-held data. Owned trees also cannot be
//! cyclic, so termination needs no precondition.

use crate::error::{Error, Result};
use crate::ident;
use crate::relation::{Emitted, FieldValue, Grouped, Reference, Row};
use crate::value::{Mapping, Node, Scalar};
use std::collections::{BTreeMap, BTreeSet, HashSet};

/// Configuration for the shredding process.
#[derive(Debug, Clone)]
pub struct ShredConfig {
    /// Field treated as a row's identifier (reused when present, generated
    /// and annotated otherwise).
    pub id_field: String,

    /// Separator joining key names into derived relation names.
    pub separator: String,

    /// Prefix applied when a single-field mapping's derived relation name
    /// would collide with its own field name.
    pub single_field_prefix: String,
}

impl Default for ShredConfig {
    fn default() -> Self {
        ShredConfig {
            id_field: String::from("id"),
            separator: String::from("_"),
            single_field_prefix: String::from("rel_"),
        }
    }
}

/// The document shredder. Stateless per call; cheap to reuse.
pub struct Shredder {
    config: ShredConfig,
}

type Seen = HashSet<(String, Scalar)>;

fn reject_refs(node: &Node) -> Result<()> {
    match node {
        Node::Scalar(_) => Ok(()),
        Node::Ref(_) => Err(Error::Structural(
            "reference values cannot appear in input documents".into(),
        )),
        Node::Seq(items) => items.iter().try_for_each(reject_refs),
        Node::Map(map) => map.values().try_for_each(reject_refs),
    }
}

impl Shredder {
    pub fn new(config: ShredConfig) -> Self {
        Shredder { config }
    }

    pub fn config(&self) -> &ShredConfig {
        &self.config
    }

    /// Flatten a document into its raw emission sequence.
    ///
    /// Emission order is traversal order (children before their parent);
    /// callers that need determinism across the whole output use
    /// [`Shredder::shred_grouped`], which re-sorts.
    ///
    /// Reference nodes are an engine-produced shape; a document that already
    /// contains one is rejected as structural.
    pub fn shred(&self, document: Mapping, name: Option<&str>) -> Result<Emitted> {
        for value in document.values() {
            reject_refs(value)?;
        }
        let mut out = Vec::new();
        let mut seen = Seen::new();
        self.shred_mapping(document, name.map(str::to_string), &mut seen, &mut out)?;
        Ok(out)
    }

    /// Flatten a document and group the emission by relation name.
    ///
    /// Relations come back sorted by name; rows within a relation are a
    /// deduplicated ordered set. Calling this twice on equal documents
    /// yields identical output.
    pub fn shred_grouped(&self, document: Mapping, name: Option<&str>) -> Result<Grouped> {
        let mut grouped: BTreeMap<String, BTreeSet<Row>> = BTreeMap::new();
        for (relation, row) in self.shred(document, name)? {
            grouped.entry(relation).or_default().insert(row);
        }
        Ok(grouped.into_iter().collect())
    }

    /// Relation name derived from a mapping's sorted field keys.
    fn relation_name(&self, map: &Mapping) -> String {
        let keys: Vec<&str> = map.keys().map(String::as_str).collect();
        if keys.len() == 1 {
            format!("{}{}", self.config.single_field_prefix, keys[0])
        } else {
            keys.join(&self.config.separator)
        }
    }

    /// Child relation name for a field, disambiguated against the parent.
    fn child_name(&self, parent: &str, key: &str) -> String {
        if key == parent {
            format!("{parent}{}{key}", self.config.separator)
        } else {
            key.to_string()
        }
    }

    fn shred_mapping(
        &self,
        mut map: Mapping,
        name: Option<String>,
        seen: &mut Seen,
        out: &mut Vec<(String, Row)>,
    ) -> Result<()> {
        if map.is_empty() {
            return Ok(());
        }

        // The relation name covers every key, list-valued ones included.
        let relation = name.unwrap_or_else(|| self.relation_name(&map));

        // Split off list-valued fields; everything else (scalars, references,
        // nested mappings) stays behind and feeds the parent id.
        let list_keys: Vec<String> = map
            .iter()
            .filter(|(_, value)| matches!(value, Node::Seq(_)))
            .map(|(key, _)| key.clone())
            .collect();
        let mut list_fields: Vec<(String, Vec<Node>)> = Vec::new();
        for key in list_keys {
            if let Some(Node::Seq(items)) = map.remove(&key) {
                list_fields.push((key, items));
            }
        }

        // Reuse a declared id or generate one from the remaining fields and
        // annotate it, so the emitted row and every child reference agree.
        let pid = match map.get(&self.config.id_field) {
            Some(Node::Scalar(s)) => s.clone(),
            Some(_) => {
                return Err(Error::Structural(format!(
                    "field `{}` must be a scalar to serve as an identifier",
                    self.config.id_field
                )))
            }
            None => {
                let generated = Scalar::Int(ident::mapping_id(&map));
                map.insert(
                    self.config.id_field.clone(),
                    Node::Scalar(generated.clone()),
                );
                generated
            }
        };

        for (key, items) in list_fields {
            let child = self.child_name(&relation, &key);
            // The field key may shadow the parent relation name; park the
            // back-pointer under a distinct field in that case.
            let parent_field = if key == relation {
                format!("{relation}{}{}", self.config.separator, self.config.id_field)
            } else {
                relation.clone()
            };
            for item in items {
                match item {
                    Node::Scalar(scalar) => {
                        // One synthetic row per scalar element, no recursion.
                        let row = Row::from_pairs(vec![
                            (
                                self.config.id_field.clone(),
                                FieldValue::Scalar(Scalar::Int(ident::field_id(&key, &scalar))),
                            ),
                            (
                                parent_field.clone(),
                                FieldValue::Ref(Reference::new(relation.clone(), pid.clone())),
                            ),
                            (key.clone(), FieldValue::Scalar(scalar)),
                        ]);
                        out.push((child.clone(), row));
                    }
                    element @ (Node::Map(_) | Node::Seq(_)) => {
                        // Wrap the element with a back-pointer and recurse
                        // under a fresh seen set: one-to-many fan-out must
                        // not be suppressed against the parent descent.
                        let mut synthetic = Mapping::new();
                        synthetic.insert(key.clone(), element);
                        synthetic.insert(
                            parent_field.clone(),
                            Node::Ref(Reference::new(relation.clone(), pid.clone())),
                        );
                        let mut fresh = Seen::new();
                        self.shred_mapping(synthetic, Some(child.clone()), &mut fresh, out)?;
                    }
                    Node::Ref(_) => {
                        return Err(Error::Structural(
                            "reference values cannot appear as sequence elements".into(),
                        ))
                    }
                }
            }
        }

        // Externalize nested mappings, replacing each with a Reference.
        // These recurse under the caller's seen set so identical
        // substructures reached via different parents emit once.
        let map_keys: Vec<String> = map
            .iter()
            .filter(|(_, value)| matches!(value, Node::Map(_)))
            .map(|(key, _)| key.clone())
            .collect();
        for key in map_keys {
            let Some(Node::Map(mut child_map)) = map.remove(&key) else {
                continue;
            };
            let child = self.child_name(&relation, &key);
            // Owned input cannot already contain references, so a declared
            // id is always reusable here.
            let cid = match child_map.get(&self.config.id_field) {
                Some(Node::Scalar(s)) => s.clone(),
                Some(_) => {
                    return Err(Error::Structural(format!(
                        "field `{}` must be a scalar to serve as an identifier",
                        self.config.id_field
                    )))
                }
                None => {
                    let generated = Scalar::Int(ident::mapping_id(&child_map));
                    child_map.insert(
                        self.config.id_field.clone(),
                        Node::Scalar(generated.clone()),
                    );
                    generated
                }
            };
            map.insert(
                key,
                Node::Ref(Reference::new(child.clone(), cid)),
            );
            self.shred_mapping(child_map, Some(child), seen, out)?;
        }

        // Only scalars, the id and references remain: build the parent row.
        let mut fields = Vec::with_capacity(map.len());
        for (key, node) in map {
            let value = match node {
                Node::Scalar(s) => FieldValue::Scalar(s),
                Node::Ref(r) => FieldValue::Ref(r),
                Node::Seq(_) | Node::Map(_) => {
                    return Err(Error::Structural(format!(
                        "field `{key}` still holds a nested value after traversal"
                    )))
                }
            };
            fields.push((key, value));
        }
        let row = Row::from_pairs(fields);

        if seen.insert((relation.clone(), pid)) {
            out.push((relation, row));
        }
        Ok(())
    }
}

impl Default for Shredder {
    fn default() -> Self {
        Shredder::new(ShredConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::document_from_json;
    use serde_json::json;

    fn shred_grouped(doc: serde_json::Value, name: Option<&str>) -> Grouped {
        let document = document_from_json(doc).unwrap();
        Shredder::default().shred_grouped(document, name).unwrap()
    }

    fn scalar(row: &Row, field: &str) -> Scalar {
        match row.get(field).unwrap() {
            FieldValue::Scalar(s) => s.clone(),
            other => panic!("expected scalar in `{field}`, got {other:?}"),
        }
    }

    fn reference(row: &Row, field: &str) -> Reference {
        match row.get(field).unwrap() {
            FieldValue::Ref(r) => r.clone(),
            other => panic!("expected reference in `{field}`, got {other:?}"),
        }
    }

    #[test]
    fn test_flat_mapping_with_declared_id() {
        let groups = shred_grouped(json!({"a": 1, "id": 0}), Some("A"));

        assert_eq!(groups.len(), 1);
        assert_eq!(groups[0].0, "A");
        let rows: Vec<_> = groups[0].1.iter().collect();
        assert_eq!(rows.len(), 1);
        assert_eq!(scalar(rows[0], "a"), Scalar::Int(1));
        assert_eq!(scalar(rows[0], "id"), Scalar::Int(0));
    }

    #[test]
    fn test_nested_mapping_becomes_reference() {
        let groups = shred_grouped(json!({"A": {"id": 0, "a": 1}, "id": 1}), Some("data"));

        assert_eq!(groups.len(), 2);
        assert_eq!(groups[0].0, "A");
        assert_eq!(groups[1].0, "data");

        let a_row = groups[0].1.iter().next().unwrap();
        assert_eq!(scalar(a_row, "a"), Scalar::Int(1));
        assert_eq!(scalar(a_row, "id"), Scalar::Int(0));

        let data_row = groups[1].1.iter().next().unwrap();
        assert_eq!(scalar(data_row, "id"), Scalar::Int(1));
        assert_eq!(
            reference(data_row, "A"),
            Reference::new("A", Scalar::Int(0))
        );
    }

    #[test]
    fn test_scalar_list_fans_out() {
        let groups = shred_grouped(json!({"a": 1, "b": "b", "c": [1, 2, 3]}), None);

        // Relation name covers every key, list-valued ones included.
        assert_eq!(groups.len(), 2);
        assert_eq!(groups[0].0, "a_b_c");
        assert_eq!(groups[1].0, "c");

        let parent = groups[0].1.iter().next().unwrap();
        let parent_id = scalar(parent, "id");
        assert_eq!(scalar(parent, "a"), Scalar::Int(1));

        let rows: Vec<_> = groups[1].1.iter().collect();
        assert_eq!(rows.len(), 3);
        for row in &rows {
            assert_eq!(
                reference(row, "a_b_c"),
                Reference::new("a_b_c", parent_id.clone())
            );
            assert!(row.id("id").is_some());
        }
    }

    #[test]
    fn test_generated_id_is_annotated_and_referenced_consistently() {
        let groups = shred_grouped(json!({"x": {"a": 1}, "id": 7}), Some("top"));

        let x_row = groups
            .iter()
            .find(|(name, _)| name == "x")
            .map(|(_, rows)| rows.iter().next().unwrap())
            .unwrap();
        let top_row = groups
            .iter()
            .find(|(name, _)| name == "top")
            .map(|(_, rows)| rows.iter().next().unwrap())
            .unwrap();

        // The reference in the parent names exactly the id written into the
        // child row.
        assert_eq!(
            reference(top_row, "x").id,
            scalar(x_row, "id")
        );
    }

    #[test]
    fn test_single_field_mapping_gets_prefixed_name() {
        let groups = shred_grouped(json!({"c": [1, 2]}), None);

        let names: Vec<_> = groups.iter().map(|(name, _)| name.as_str()).collect();
        assert_eq!(names, vec!["c", "rel_c"]);
    }

    #[test]
    fn test_child_name_disambiguated_against_parent() {
        let groups = shred_grouped(json!({"c": [1, 2]}), Some("c"));

        let names: Vec<_> = groups.iter().map(|(name, _)| name.as_str()).collect();
        assert_eq!(names, vec!["c", "c_c"]);

        // The back-pointer moves aside when the field shadows the parent.
        let link = groups[1].1.iter().next().unwrap();
        assert_eq!(reference(link, "c_id").relation, "c");
        assert!(link.id("id").is_some());
        assert!(link.get("c").is_some());
    }

    #[test]
    fn test_list_of_mappings_fans_out_with_back_pointers() {
        let groups = shred_grouped(
            json!({"id": 5, "posts": [{"t": "a"}, {"t": "b"}]}),
            None,
        );

        let link_rows = groups
            .iter()
            .find(|(name, _)| name == "posts")
            .map(|(_, rows)| rows.len())
            .unwrap();
        let element_rows = groups
            .iter()
            .find(|(name, _)| name == "posts_posts")
            .map(|(_, rows)| rows.len())
            .unwrap();
        assert_eq!(link_rows, 2);
        assert_eq!(element_rows, 2);

        for (_, rows) in groups.iter().filter(|(name, _)| name == "posts") {
            for row in rows {
                assert_eq!(
                    reference(row, "id_posts"),
                    Reference::new("id_posts", Scalar::Int(5))
                );
            }
        }
    }

    #[test]
    fn test_identical_substructures_emit_once_per_descent() {
        let document = document_from_json(json!({
            "p": {"x": {"a": 1}},
            "q": {"x": {"a": 1}},
            "id": 0
        }))
        .unwrap();
        let emitted = Shredder::default().shred(document, Some("top")).unwrap();

        // Both parents point at the same (relation, id); the row itself is
        // emitted exactly once within the descent.
        let x_rows = emitted.iter().filter(|(name, _)| name == "x").count();
        assert_eq!(x_rows, 1);
    }

    #[test]
    fn test_list_duplicates_are_not_suppressed_in_raw_emission() {
        let document = document_from_json(json!({
            "id": 1,
            "posts": [{"t": "a"}, {"t": "a"}]
        }))
        .unwrap();
        let emitted = Shredder::default().shred(document, None).unwrap();

        // Fresh seen set per element: raw emission repeats, grouping dedups.
        let links = emitted.iter().filter(|(name, _)| name == "posts").count();
        assert_eq!(links, 2);

        let document = document_from_json(json!({
            "id": 1,
            "posts": [{"t": "a"}, {"t": "a"}]
        }))
        .unwrap();
        let grouped = Shredder::default().shred_grouped(document, None).unwrap();
        let links = grouped
            .iter()
            .find(|(name, _)| name == "posts")
            .map(|(_, rows)| rows.len())
            .unwrap();
        assert_eq!(links, 1);
    }

    #[test]
    fn test_grouping_is_deterministic() {
        let doc = json!({
            "id": 1,
            "name": "alice",
            "tags": ["x", "y"],
            "address": {"city": "nowhere", "zip": "00000"}
        });
        let first = shred_grouped(doc.clone(), None);
        let second = shred_grouped(doc, None);
        assert_eq!(first, second);
    }

    #[test]
    fn test_referential_closure() {
        let groups = shred_grouped(
            json!({
                "id": 1,
                "name": "alice",
                "tags": ["x", "y"],
                "address": {"city": "nowhere", "zip": "00000"}
            }),
            Some("users"),
        );

        for (_, rows) in &groups {
            for row in rows {
                for (_, value) in row.iter() {
                    if let FieldValue::Ref(r) = value {
                        let targets: Vec<_> = groups
                            .iter()
                            .filter(|(name, _)| *name == r.relation)
                            .flat_map(|(_, rows)| rows.iter())
                            .filter(|target| target.id("id") == Some(&r.id))
                            .collect();
                        assert_eq!(
                            targets.len(),
                            1,
                            "reference to {}:{:?} must resolve to exactly one row",
                            r.relation,
                            r.id
                        );
                    }
                }
            }
        }
    }

    #[test]
    fn test_no_conflicting_duplicate_emission() {
        let document = document_from_json(json!({
            "id": 1,
            "a": {"id": 2, "v": "x"},
            "b": {"id": 2, "v": "x"}
        }))
        .unwrap();
        let emitted = Shredder::default().shred(document, Some("top")).unwrap();

        let mut seen: std::collections::HashMap<(String, Scalar), Row> =
            std::collections::HashMap::new();
        for (relation, row) in emitted {
            let id = row.id("id").unwrap().clone();
            if let Some(earlier) = seen.get(&(relation.clone(), id.clone())) {
                assert_eq!(earlier, &row);
            }
            seen.insert((relation, id), row);
        }
    }

    #[test]
    fn test_empty_mapping_produces_nothing() {
        let document = document_from_json(json!({})).unwrap();
        let emitted = Shredder::default().shred(document, None).unwrap();
        assert!(emitted.is_empty());
    }

    #[test]
    fn test_empty_list_produces_no_child_rows() {
        let groups = shred_grouped(json!({"a": 1, "c": []}), None);
        assert_eq!(groups.len(), 1);
        assert_eq!(groups[0].0, "a_c");
    }

    #[test]
    fn test_non_scalar_id_is_rejected() {
        let document = document_from_json(json!({"id": {"nested": true}, "a": 1})).unwrap();
        let result = Shredder::default().shred(document, None);
        assert!(matches!(result, Err(Error::Structural(_))));
    }

    #[test]
    fn test_reference_input_is_rejected() {
        let mut document = Mapping::new();
        document.insert(String::from("id"), Node::Scalar(Scalar::Int(1)));
        document.insert(
            String::from("p"),
            Node::Map(Mapping::from([(
                String::from("link"),
                Node::Ref(Reference::new("other", Scalar::Int(2))),
            )])),
        );
        let result = Shredder::default().shred(document, None);
        assert!(matches!(result, Err(Error::Structural(_))));
    }

    #[test]
    fn test_nested_list_elements_recurse() {
        let groups = shred_grouped(json!({"id": 1, "grid": [[1, 2], [3]]}), Some("g"));

        // Each inner list becomes its own synthetic descent.
        assert!(groups.iter().any(|(name, _)| name == "grid"));
        let total_rows: usize = groups.iter().map(|(_, rows)| rows.len()).sum();
        assert!(total_rows > 3);
    }
}
