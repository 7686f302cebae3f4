//! The relational codec: SQLite schema/DML emission and minimal load.
//!
//! The dump path consumes grouped relations from the shredding engine,
//! partitions them into independent tables and tables carrying
//! reference-valued columns, and emits `CREATE TABLE IF NOT EXISTS` plus
//! `INSERT OR REPLACE` statements — independent tables first so foreign keys
//! always point at something that exists. Each table's DDL and inserts
//! commit as one transaction; the dump as a whole is *not* atomic, a failure
//! partway through leaves earlier tables committed.
//!
//! The load path only introspects an existing database back into a
//! table-name → row-list mapping. It does not follow foreign keys and does
//! not rebuild nesting: load and dump are deliberately not inverses.
//!
//! Foreign-key ordering is single-level. Chains deeper than
//! independent-then-dependent are not reordered.

use crate::error::{Error, Result};
use crate::relation::{FieldValue, Grouped, Row};
use crate::shred::Shredder;
use crate::value::{Mapping, Node, Scalar};
use rusqlite::{params_from_iter, Connection, LoadExtensionGuard, OpenFlags, TransactionBehavior};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use tracing::error;

/// Transaction isolation applied to each per-table commit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum IsolationLevel {
    /// Autocommit: every statement commits on its own.
    None,
    #[default]
    Deferred,
    Immediate,
    Exclusive,
}

impl IsolationLevel {
    fn behavior(self) -> Option<TransactionBehavior> {
        match self {
            IsolationLevel::None => Option::None,
            IsolationLevel::Deferred => Some(TransactionBehavior::Deferred),
            IsolationLevel::Immediate => Some(TransactionBehavior::Immediate),
            IsolationLevel::Exclusive => Some(TransactionBehavior::Exclusive),
        }
    }
}

impl FromStr for IsolationLevel {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "none" => Ok(IsolationLevel::None),
            "deferred" | "default" => Ok(IsolationLevel::Deferred),
            "immediate" => Ok(IsolationLevel::Immediate),
            "exclusive" => Ok(IsolationLevel::Exclusive),
            other => Err(Error::Structural(format!(
                "unknown isolation level `{other}`"
            ))),
        }
    }
}

/// Connection options, applied once before any statement executes.
#[derive(Debug, Clone, Default)]
pub struct SqlOptions {
    pub isolation: IsolationLevel,
    /// Loadable SQLite extension paths.
    pub extensions: Vec<PathBuf>,
}

/// Open a database file read-only (URI mode, the `Parser.ropen` shape).
pub fn open_read_only(path: impl AsRef<Path>) -> Result<Connection> {
    let flags = OpenFlags::SQLITE_OPEN_READ_ONLY
        | OpenFlags::SQLITE_OPEN_URI
        | OpenFlags::SQLITE_OPEN_NO_MUTEX;
    Ok(Connection::open_with_flags(path, flags)?)
}

/// Open (or create) a database file for writing.
pub fn open_read_write(path: impl AsRef<Path>) -> Result<Connection> {
    Ok(Connection::open(path)?)
}

/// Fail fast if the connection cannot run a trivial statement.
fn ensure_open(conn: &Connection) -> Result<()> {
    conn.query_row("SELECT 1", [], |row| row.get::<_, i64>(0))
        .map_err(|err| Error::Connection(err.to_string()))?;
    Ok(())
}

fn apply_options(conn: &Connection, options: &SqlOptions) -> Result<()> {
    if !options.extensions.is_empty() {
        // SAFETY: extension loading is only reachable when the caller has
        // explicitly listed library paths to load.
        unsafe {
            let _guard = LoadExtensionGuard::new(conn)?;
            for path in &options.extensions {
                conn.load_extension(path, Option::None)?;
            }
        }
    }
    Ok(())
}

fn quoted(name: &str) -> String {
    // Single-quoted so reserved words stay usable as table/column names.
    format!("'{}'", name.replace('\'', "''"))
}

// Constraint column lists and expressions read a single-quoted name as a
// string literal, so names in those positions quote with double quotes.
fn ident_quoted(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

fn sqlite_type(value: &FieldValue) -> &'static str {
    match value {
        FieldValue::Scalar(Scalar::Text(_)) => "TEXT",
        FieldValue::Scalar(Scalar::Int(_) | Scalar::Bool(_)) => "INTEGER",
        FieldValue::Ref(_) => "INTEGER",
        FieldValue::Scalar(Scalar::Float(_)) => "REAL",
        FieldValue::Scalar(Scalar::Null | Scalar::Bytes(_)) => "BLOB",
    }
}

fn bind_value(value: &FieldValue) -> rusqlite::types::Value {
    let scalar = match value {
        FieldValue::Scalar(s) => s,
        // References bind as their id.
        FieldValue::Ref(r) => &r.id,
    };
    match scalar {
        Scalar::Null => rusqlite::types::Value::Null,
        Scalar::Bool(b) => rusqlite::types::Value::Integer(i64::from(*b)),
        Scalar::Int(n) => rusqlite::types::Value::Integer(*n),
        Scalar::Float(f) => rusqlite::types::Value::Real(*f),
        Scalar::Text(s) => rusqlite::types::Value::Text(s.clone()),
        Scalar::Bytes(b) => rusqlite::types::Value::Blob(b.clone()),
    }
}

fn literal(value: &FieldValue) -> String {
    let scalar = match value {
        FieldValue::Scalar(s) => s,
        FieldValue::Ref(r) => &r.id,
    };
    match scalar {
        Scalar::Null => String::from("NULL"),
        Scalar::Bool(b) => String::from(if *b { "1" } else { "0" }),
        Scalar::Int(n) => n.to_string(),
        Scalar::Float(f) => format!("{f:?}"),
        Scalar::Text(s) => format!("'{}'", s.replace('\'', "''")),
        Scalar::Bytes(b) => {
            let hex: String = b.iter().map(|byte| format!("{byte:02x}")).collect();
            format!("X'{hex}'")
        }
    }
}

/// One upsert: full positional form when the row matches the table's column
/// list, column-qualified otherwise (ragged rows leave absent columns at the
/// engine's default). Rows carrying a null cell can never conflict on the
/// table's UNIQUE constraint (NULLs compare distinct there), so they take a
/// third form guarded by a full-row `IS` match instead.
struct Insert {
    columns: Option<Vec<String>>,
    values: Vec<FieldValue>,
}

impl Insert {
    fn has_null(&self) -> bool {
        self.values
            .iter()
            .any(|v| matches!(v, FieldValue::Scalar(Scalar::Null)))
    }

    fn to_sql(&self, table: &str) -> String {
        let placeholders = vec!["?"; self.values.len()].join(", ");
        match &self.columns {
            Option::None => {
                format!("INSERT OR REPLACE INTO {} VALUES ({placeholders})", quoted(table))
            }
            Some(columns) if self.has_null() => {
                let cols: Vec<String> = columns.iter().map(|c| quoted(c)).collect();
                let select: Vec<String> =
                    (1..=self.values.len()).map(|i| format!("?{i}")).collect();
                let guard: Vec<String> = columns
                    .iter()
                    .zip(1..)
                    .map(|(c, i)| format!("{} IS ?{i}", ident_quoted(c)))
                    .collect();
                format!(
                    "INSERT OR REPLACE INTO {} ({}) SELECT {} WHERE NOT EXISTS \
                     (SELECT 1 FROM {} WHERE {})",
                    quoted(table),
                    cols.join(", "),
                    select.join(", "),
                    quoted(table),
                    guard.join(" AND ")
                )
            }
            Some(columns) => {
                let cols: Vec<String> = columns.iter().map(|c| quoted(c)).collect();
                format!(
                    "INSERT OR REPLACE INTO {} ({}) VALUES ({placeholders})",
                    quoted(table),
                    cols.join(", ")
                )
            }
        }
    }

    fn to_text(&self, table: &str) -> String {
        let values: Vec<String> = self.values.iter().map(literal).collect();
        match &self.columns {
            Option::None => {
                format!("INSERT OR REPLACE INTO {} VALUES ({})", quoted(table), values.join(", "))
            }
            Some(columns) if self.has_null() => {
                let cols: Vec<String> = columns.iter().map(|c| quoted(c)).collect();
                let guard: Vec<String> = columns
                    .iter()
                    .zip(&values)
                    .map(|(c, v)| format!("{} IS {v}", ident_quoted(c)))
                    .collect();
                format!(
                    "INSERT OR REPLACE INTO {} ({}) SELECT {} WHERE NOT EXISTS \
                     (SELECT 1 FROM {} WHERE {})",
                    quoted(table),
                    cols.join(", "),
                    values.join(", "),
                    quoted(table),
                    guard.join(" AND ")
                )
            }
            Some(columns) => {
                let cols: Vec<String> = columns.iter().map(|c| quoted(c)).collect();
                format!(
                    "INSERT OR REPLACE INTO {} ({}) VALUES ({})",
                    quoted(table),
                    cols.join(", "),
                    values.join(", ")
                )
            }
        }
    }
}

/// The statement batch for one table: its DDL plus every upsert.
struct TableBatch {
    table: String,
    create: String,
    inserts: Vec<Insert>,
}

/// Build the statement plan: independent tables first (in relation-name
/// order), then tables whose rows carry references, with one FOREIGN KEY
/// clause per reference-valued column.
fn plan(relations: &Grouped) -> Vec<TableBatch> {
    let mut independent = Vec::new();
    let mut dependent = Vec::new();

    for (name, rows) in relations {
        if rows.is_empty() {
            continue;
        }
        let has_refs = rows.iter().any(Row::has_refs);
        let batch = plan_table(name, rows, has_refs);
        if has_refs {
            dependent.push(batch);
        } else {
            independent.push(batch);
        }
    }

    independent.extend(dependent);
    independent
}

fn plan_table(name: &str, rows: &std::collections::BTreeSet<Row>, foreign_keys: bool) -> TableBatch {
    // Column list and types come from the relation's first row.
    let first = rows.iter().next().map(|r| r.clone());
    let first = match first {
        Some(row) => row,
        Option::None => Row::from_pairs(Vec::new()),
    };
    let columns: Vec<String> = first.field_names().map(str::to_string).collect();

    let col_defs: Vec<String> = first
        .iter()
        .map(|(col, value)| format!("{} {}", quoted(col), sqlite_type(value)))
        .collect();
    let mut body = col_defs.join(",\n");

    // Upserts are keyed by full row match; without this constraint
    // INSERT OR REPLACE would never see a conflict.
    let unique_cols: Vec<String> = columns.iter().map(|c| ident_quoted(c)).collect();
    body.push_str(&format!(",\nUNIQUE({})", unique_cols.join(", ")));

    if foreign_keys {
        let clauses: Vec<String> = first
            .iter()
            .filter_map(|(col, value)| match value {
                FieldValue::Ref(r) => Some(format!(
                    "FOREIGN KEY({}) REFERENCES {}(\"id\")",
                    ident_quoted(col),
                    ident_quoted(&r.relation)
                )),
                FieldValue::Scalar(_) => Option::None,
            })
            .collect();
        if !clauses.is_empty() {
            body.push_str(", ");
            body.push_str(&clauses.join(",\n"));
        }
    }

    let create = format!("CREATE TABLE IF NOT EXISTS {} ({body})", quoted(name));

    let inserts = rows
        .iter()
        .map(|row| {
            let names: Vec<&str> = row.field_names().collect();
            let matches_table = names.len() == columns.len()
                && names.iter().zip(&columns).all(|(a, b)| *a == b.as_str());
            // The null-guarded form needs column names, so null-bearing rows
            // always take the column-qualified shape.
            let has_null = row
                .iter()
                .any(|(_, value)| matches!(value, FieldValue::Scalar(Scalar::Null)));
            Insert {
                columns: if matches_table && !has_null {
                    Option::None
                } else {
                    Some(names.iter().map(|s| s.to_string()).collect())
                },
                values: row.iter().map(|(_, value)| value.clone()).collect(),
            }
        })
        .collect();

    TableBatch {
        table: name.to_string(),
        create,
        inserts,
    }
}

/// Execute a statement, logging it with its parameters on failure before
/// propagating the error.
fn try_exec(conn: &Connection, sql: &str, params: &[rusqlite::types::Value]) -> Result<usize> {
    conn.execute(sql, params_from_iter(params.iter().cloned()))
        .map_err(|err| {
            error!(sql, params = ?params, %err, "statement failed");
            Error::Sql(err)
        })
}

fn run_batch(conn: &mut Connection, batch: &TableBatch, isolation: IsolationLevel) -> Result<()> {
    match isolation.behavior() {
        Some(behavior) => {
            let tx = conn.transaction_with_behavior(behavior)?;
            try_exec(&tx, &batch.create, &[])?;
            for insert in &batch.inserts {
                let params: Vec<_> = insert.values.iter().map(bind_value).collect();
                try_exec(&tx, &insert.to_sql(&batch.table), &params)?;
            }
            tx.commit()?;
        }
        Option::None => {
            try_exec(conn, &batch.create, &[])?;
            for insert in &batch.inserts {
                let params: Vec<_> = insert.values.iter().map(bind_value).collect();
                try_exec(conn, &insert.to_sql(&batch.table), &params)?;
            }
        }
    }
    Ok(())
}

/// Dump grouped relations into a database.
///
/// Tables commit one at a time; there is no rollback of tables already
/// committed when a later one fails.
pub fn dump(relations: &Grouped, conn: &mut Connection, options: &SqlOptions) -> Result<()> {
    ensure_open(conn)?;
    apply_options(conn, options)?;
    for batch in plan(relations) {
        run_batch(conn, &batch, options.isolation)?;
    }
    Ok(())
}

/// Shred a document with the default configuration and dump it.
pub fn dump_document(
    document: Mapping,
    name: Option<&str>,
    conn: &mut Connection,
    options: &SqlOptions,
) -> Result<()> {
    let relations = Shredder::default().shred_grouped(document, name)?;
    dump(&relations, conn, options)
}

/// Dump grouped relations against an ephemeral in-memory database and return
/// the statement log as SQL text.
pub fn dump_to_text(relations: &Grouped, options: &SqlOptions) -> Result<String> {
    let batches = plan(relations);

    // Run the same plan for real so the returned text is known-executable.
    let mut conn = Connection::open_in_memory()?;
    apply_options(&conn, options)?;
    for batch in &batches {
        run_batch(&mut conn, batch, options.isolation)?;
    }

    let mut text = String::from("BEGIN TRANSACTION;\n");
    for batch in &batches {
        text.push_str(&batch.create);
        text.push_str(";\n");
        for insert in &batch.inserts {
            text.push_str(&insert.to_text(&batch.table));
            text.push_str(";\n");
        }
    }
    text.push_str("COMMIT;\n");
    Ok(text)
}

/// Shred a document with the default configuration and render its SQL text.
pub fn dump_document_to_text(
    document: Mapping,
    name: Option<&str>,
    options: &SqlOptions,
) -> Result<String> {
    let relations = Shredder::default().shred_grouped(document, name)?;
    dump_to_text(&relations, options)
}

/// Tables loaded back from a database: name → rows in select order.
pub type LoadedTables = BTreeMap<String, Vec<Mapping>>;

fn scalar_from_sql(value: rusqlite::types::Value) -> Scalar {
    match value {
        rusqlite::types::Value::Null => Scalar::Null,
        rusqlite::types::Value::Integer(n) => Scalar::Int(n),
        rusqlite::types::Value::Real(f) => Scalar::Float(f),
        rusqlite::types::Value::Text(s) => Scalar::Text(s),
        rusqlite::types::Value::Blob(b) => Scalar::Bytes(b),
    }
}

/// Read every table of an existing database into a table → row-list mapping.
///
/// Column names come from `PRAGMA table_info`; each row zips names to values
/// in order, with missing values as null. Foreign keys are not followed and
/// nesting is not reconstructed — this is not the inverse of [`dump`].
pub fn load(conn: &Connection, options: &SqlOptions) -> Result<LoadedTables> {
    ensure_open(conn)?;
    apply_options(conn, options)?;

    let mut tables = Vec::new();
    {
        let mut stmt = conn
            .prepare("SELECT name FROM sqlite_master WHERE type='table' ORDER BY name")
            .map_err(Error::Sql)?;
        let mut rows = stmt.query([]).map_err(Error::Sql)?;
        while let Some(row) = rows.next().map_err(Error::Sql)? {
            tables.push(row.get::<_, String>(0).map_err(Error::Sql)?);
        }
    }

    let mut loaded = LoadedTables::new();
    for table in tables {
        let mut columns = Vec::new();
        {
            let pragma = format!("PRAGMA table_info({})", quoted(&table));
            let mut stmt = conn.prepare(&pragma).map_err(Error::Sql)?;
            let mut rows = stmt.query([]).map_err(Error::Sql)?;
            while let Some(row) = rows.next().map_err(Error::Sql)? {
                columns.push(row.get::<_, String>(1).map_err(Error::Sql)?);
            }
        }

        let mut table_rows = Vec::new();
        let select = format!("SELECT * FROM {}", quoted(&table));
        let mut stmt = conn.prepare(&select).map_err(Error::Sql)?;
        let mut rows = stmt.query([]).map_err(Error::Sql)?;
        while let Some(row) = rows.next().map_err(Error::Sql)? {
            let mut container = Mapping::new();
            for (i, column) in columns.iter().enumerate() {
                let value = row
                    .get::<_, rusqlite::types::Value>(i)
                    .unwrap_or(rusqlite::types::Value::Null);
                container.insert(column.clone(), Node::Scalar(scalar_from_sql(value)));
            }
            table_rows.push(container);
        }
        loaded.insert(table, table_rows);
    }

    Ok(loaded)
}

/// This codec does not load from SQL statement text.
///
/// Always returns [`Error::Unsupported`], so callers can distinguish "not
/// implemented for this backend" from "failed while running".
pub fn load_from_text(_statements: &str) -> Result<LoadedTables> {
    Err(Error::Unsupported)
}
