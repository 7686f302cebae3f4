//! Content-derived row identifiers.
//!
//! Ids are BLAKE3 digests of a canonical encoding of a mapping's sorted
//! (field, value) pairs, truncated to 63 bits so they bind as SQL INTEGER
//! values. The same sorted field set always produces the same id; distinct
//! field sets colliding on the truncated digest is tolerated as a documented
//! non-guarantee — callers that need global uniqueness supply their own id
//! field.

use crate::relation::Reference;
use crate::value::{Mapping, Node, Scalar};

fn update_scalar(hasher: &mut blake3::Hasher, scalar: &Scalar) {
    match scalar {
        Scalar::Null => {
            hasher.update(b"z");
        }
        Scalar::Bool(b) => {
            hasher.update(b"b");
            hasher.update(&[u8::from(*b)]);
        }
        Scalar::Int(n) => {
            hasher.update(b"i");
            hasher.update(&n.to_le_bytes());
        }
        Scalar::Float(f) => {
            hasher.update(b"f");
            hasher.update(&f.to_bits().to_le_bytes());
        }
        Scalar::Text(s) => {
            hasher.update(b"t");
            hasher.update(&(s.len() as u64).to_le_bytes());
            hasher.update(s.as_bytes());
        }
        Scalar::Bytes(b) => {
            hasher.update(b"y");
            hasher.update(&(b.len() as u64).to_le_bytes());
            hasher.update(b);
        }
    }
}

fn update_ref(hasher: &mut blake3::Hasher, reference: &Reference) {
    hasher.update(b"R");
    hasher.update(&(reference.relation.len() as u64).to_le_bytes());
    hasher.update(reference.relation.as_bytes());
    update_scalar(hasher, &reference.id);
}

// A Reference contributes its (relation, id) pair, not a nested structure.
fn update_node(hasher: &mut blake3::Hasher, node: &Node) {
    match node {
        Node::Scalar(s) => update_scalar(hasher, s),
        Node::Ref(r) => update_ref(hasher, r),
        Node::Seq(items) => {
            hasher.update(b"L");
            hasher.update(&(items.len() as u64).to_le_bytes());
            for item in items {
                update_node(hasher, item);
            }
        }
        Node::Map(map) => {
            hasher.update(b"M");
            hasher.update(&(map.len() as u64).to_le_bytes());
            for (key, value) in map {
                hasher.update(&(key.len() as u64).to_le_bytes());
                hasher.update(key.as_bytes());
                update_node(hasher, value);
            }
        }
    }
}

fn finish(hasher: blake3::Hasher) -> i64 {
    let digest = hasher.finalize();
    let mut first = [0u8; 8];
    first.copy_from_slice(&digest.as_bytes()[..8]);
    (u64::from_le_bytes(first) & (i64::MAX as u64)) as i64
}

/// Id for a mapping, derived from its sorted (field, value) pairs.
pub fn mapping_id(fields: &Mapping) -> i64 {
    let mut hasher = blake3::Hasher::new();
    for (key, value) in fields {
        hasher.update(&(key.len() as u64).to_le_bytes());
        hasher.update(key.as_bytes());
        update_node(&mut hasher, value);
    }
    finish(hasher)
}

/// Id for a synthetic list-element row, derived from the field name and the
/// element value.
pub fn field_id(field: &str, value: &Scalar) -> i64 {
    let mut hasher = blake3::Hasher::new();
    hasher.update(&(field.len() as u64).to_le_bytes());
    hasher.update(field.as_bytes());
    update_scalar(&mut hasher, value);
    finish(hasher)
}
