//! shred-load: read a SQLite database back as table → row-list JSON
//!
//! Usage:
//!   shred-load dump.db
//!   shred-load --pretty dump.db
//!
//! Loading does not follow foreign keys and does not rebuild nesting; the
//! output is the flat table contents, nothing more.

#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

use anyhow::{Context, Result};
use clap::Parser;
use serde_json::Value;
use shredder::sql::{self, IsolationLevel, SqlOptions};
use shredder::value::{node_to_json, Node};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "shred-load")]
#[command(about = "Read a SQLite database back as table -> row-list JSON", long_about = None)]
struct Args {
    /// SQLite database file to read
    #[arg(value_name = "FILE")]
    database: PathBuf,

    /// Pretty-print the output
    #[arg(long)]
    pretty: bool,

    /// Transaction isolation: none, deferred, immediate or exclusive
    #[arg(long, default_value = "deferred")]
    isolation: IsolationLevel,

    /// SQLite extension paths to load before any statement executes
    #[arg(long = "extension")]
    extensions: Vec<PathBuf>,
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();
    let options = SqlOptions {
        isolation: args.isolation,
        extensions: args.extensions,
    };

    let conn = sql::open_read_only(&args.database)
        .with_context(|| format!("Failed to open database: {}", args.database.display()))?;
    let tables = sql::load(&conn, &options)?;

    let mut output = serde_json::Map::new();
    for (table, rows) in tables {
        let rows: Vec<Value> = rows
            .into_iter()
            .map(|row| node_to_json(&Node::Map(row)))
            .collect();
        output.insert(table, Value::Array(rows));
    }

    let rendered = if args.pretty {
        serde_json::to_string_pretty(&Value::Object(output))?
    } else {
        serde_json::to_string(&Value::Object(output))?
    };
    println!("{rendered}");

    Ok(())
}
