//! shred-dump: flatten nested JSON into relational tables
//!
//! Usage:
//!   # Print the SQL dump to stdout
//!   shred-dump data.json
//!
//!   # Read from stdin, write into a SQLite database
//!   echo '{"id": 1, "posts": [{"id": 10}]}' | shred-dump -o out.db
//!
//!   # One document per line, streamed row output instead of SQL
//!   shred-dump --ndjson events.jsonl --rows

// Use MiMalloc allocator for better performance
#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

use anyhow::{Context, Result};
use clap::Parser;
use serde_json::Value;
use shredder::sql::{self, IsolationLevel, SqlOptions};
use shredder::{document_from_json, Shredder};
use std::io::{Read, Write};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "shred-dump")]
#[command(about = "Flatten nested JSON into relational tables", long_about = None)]
struct Args {
    /// Input file (use stdin if omitted)
    #[arg(value_name = "FILE")]
    input: Option<String>,

    /// Process newline-delimited JSON (one document per line)
    #[arg(long)]
    ndjson: bool,

    /// Relation name for the top-level document (derived from its keys if
    /// omitted)
    #[arg(long, short = 'n')]
    name: Option<String>,

    /// SQLite database file to dump into.
    /// If omitted, the SQL text dump is written to stdout
    #[arg(long, short = 'o')]
    output: Option<PathBuf>,

    /// Emit (relation, row) JSON lines to stdout instead of SQL
    #[arg(long, conflicts_with = "output")]
    rows: bool,

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
        extensions: args.extensions.clone(),
    };

    let documents = read_documents(args.input.as_deref(), args.ndjson)?;
    let name = args.name.as_deref();

    if args.rows {
        let mut stdout = std::io::stdout();
        for value in documents {
            let document = document_from_json(value)?;
            let emitted = Shredder::default().shred(document, name)?;
            for (relation, row) in emitted {
                let line = serde_json::json!({ "_relation": relation, "row": row });
                writeln!(stdout, "{line}").context("Failed to write row")?;
            }
        }
        return Ok(());
    }

    if let Some(path) = &args.output {
        let mut conn = sql::open_read_write(path)
            .with_context(|| format!("Failed to open database: {}", path.display()))?;
        for value in documents {
            let document = document_from_json(value)?;
            sql::dump_document(document, name, &mut conn, &options)?;
        }
    } else {
        let mut stdout = std::io::stdout();
        for value in documents {
            let document = document_from_json(value)?;
            let text = sql::dump_document_to_text(document, name, &options)?;
            stdout
                .write_all(text.as_bytes())
                .context("Failed to write SQL text")?;
        }
    }

    Ok(())
}

/// Read input documents, trying SIMD-accelerated parsing for whole-buffer
/// input with a serde_json fallback for NDJSON or malformed buffers.
fn read_documents(input: Option<&str>, ndjson: bool) -> Result<Vec<Value>> {
    let mut content = Vec::new();
    match input {
        Some(path) => {
            std::fs::File::open(path)
                .with_context(|| format!("Failed to open input: {path}"))?
                .read_to_end(&mut content)?;
        }
        None => {
            std::io::stdin().read_to_end(&mut content)?;
        }
    }

    if ndjson {
        let text = String::from_utf8_lossy(&content);
        let mut documents = Vec::new();
        for line in text.lines() {
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            documents.push(serde_json::from_str(line).context("Failed to parse JSON line")?);
        }
        return Ok(documents);
    }

    // simd-json parses in place, so keep the original buffer for fallback.
    let mut simd_buf = content.clone();
    match simd_json::serde::from_slice::<Value>(&mut simd_buf) {
        Ok(value) => Ok(vec![value]),
        Err(_) => {
            // Fallback to serde_json for buffers simd-json rejects
            let value: Value =
                serde_json::from_slice(&content).context("Failed to parse JSON")?;
            Ok(vec![value])
        }
    }
}
