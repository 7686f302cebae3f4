use thiserror::Error;

/// Errors produced by the shredding engine and the SQL codec.
#[derive(Debug, Error)]
pub enum Error {
    /// The top-level document handed to the engine was not a mapping.
    #[error("document root must be a mapping")]
    NotAMapping,

    /// A node shape or value the engine cannot process.
    #[error("structural error: {0}")]
    Structural(String),

    /// The given resource is not a usable, open database connection.
    #[error("not a usable database connection: {0}")]
    Connection(String),

    /// A statement failed while executing against the storage engine.
    ///
    /// The offending statement and its parameters are logged before this is
    /// propagated; earlier tables already committed stay committed.
    #[error("sql execution failed: {0}")]
    Sql(#[from] rusqlite::Error),

    /// Fixed error for operations this codec does not implement, so callers
    /// can tell "not supported here" apart from "failed while running".
    #[error("loading from SQL text is not supported by this codec")]
    Unsupported,
}

pub type Result<T> = std::result::Result<T, Error>;
