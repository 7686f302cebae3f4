//! # Shredder - Nested Document Normalization Toolkit
//!
//! A library for shredding nested documents (scalars, sequences, string-keyed
//! mappings) into flat relational form, and a SQLite codec that turns the
//! result into schema-definition and upsert statements with foreign-key
//! wiring.
//!
//! ## Modules
//!
//! - **shred**: Flatten nested documents into named relations of uniform rows
//! - **sql**: Emit CREATE TABLE / INSERT OR REPLACE statements, dump to text,
//!   and load flat tables back
//!
//! ## Quick Start
//!
//! ### Shredding
//!
//! ```rust
//! use shredder::{document_from_json, Shredder};
//! use serde_json::json;
//!
//! # fn main() -> shredder::Result<()> {
//! let document = document_from_json(json!({
//!     "id": 1,
//!     "name": "alice",
//!     "posts": [
//!         {"id": 10, "title": "first"},
//!         {"id": 11, "title": "second"}
//!     ]
//! }))?;
//!
//! let relations = Shredder::default().shred_grouped(document, Some("users"))?;
//!
//! // relations: one ("users", rows) entry, plus the externalized posts
//! // relations whose rows point back at users via references.
//! assert!(relations.iter().any(|(name, _)| name == "users"));
//! # Ok(())
//! # }
//! ```
//!
//! ### SQL emission
//!
//! ```rust
//! use shredder::{document_from_json, sql};
//! use serde_json::json;
//!
//! # fn main() -> shredder::Result<()> {
//! let document = document_from_json(json!({"a": 1, "b": "b", "c": [1, 2, 3]}))?;
//! let text = sql::dump_document_to_text(document, None, &sql::SqlOptions::default())?;
//!
//! assert!(text.starts_with("BEGIN TRANSACTION;"));
//! assert!(text.contains("CREATE TABLE IF NOT EXISTS 'a_b_c'"));
//! # Ok(())
//! # }
//! ```
//!
//! Load and dump are deliberately not inverses: loading reads flat tables
//! back as row lists without reconstructing nesting.

pub mod error;
pub mod ident;
pub mod relation;
pub mod shred;
pub mod sql;
pub mod value;

// Re-export commonly used types for convenience
pub use error::{Error, Result};
pub use relation::{Emitted, FieldValue, Grouped, Reference, Row};
pub use shred::{ShredConfig, Shredder};
pub use value::{document_from_json, node_from_json, node_to_json, Mapping, Node, Scalar};

/// Main entry point: shred a JSON document into grouped relations.
pub fn shred_json(value: serde_json::Value, name: Option<&str>) -> Result<Grouped> {
    let document = document_from_json(value)?;
    Shredder::default().shred_grouped(document, name)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_basic_shredding() {
        let relations = shred_json(
            json!({
                "id": 1,
                "name": "alice",
                "posts": [
                    {"id": 10, "title": "first"},
                    {"id": 11, "title": "second"}
                ]
            }),
            Some("users"),
        )
        .unwrap();

        // Root relation plus the fan-out relations for posts.
        assert!(relations.len() >= 2);
        assert!(relations.iter().any(|(name, _)| name == "users"));
    }

    #[test]
    fn test_non_mapping_input_is_rejected() {
        assert!(matches!(
            shred_json(json!([1, 2, 3]), None),
            Err(Error::NotAMapping)
        ));
    }
}
