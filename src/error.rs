//! Crate-wide error types.
//!
//! Library modules return [`Error`] through the [`Result`] alias, while the
//! CLI/main layer uses `anyhow` for convenient error propagation.
//!
//! # Design
//!
//! The variants split into two groups:
//!
//! - Per-candidate failures ([`Error::IdentityConflict`], [`Error::Format`])
//!   that the batch pipeline counts and moves past.
//! - Run-level failures ([`Error::MissingPrerequisite`], [`Error::Database`],
//!   [`Error::Config`]) that abort the whole run.
//!
//! [`Error::StoreConflict`] sits in between: the reconciliation engine
//! recovers from it by re-reading the store, so callers only see it when the
//! retry budget runs out.
//!
//! # Example
//!
//! ```ignore
//! use media_reconciler::error::{Error, Result};
//!
//! fn check(path: &Path) -> Result<()> {
//!     let meta = std::fs::metadata(path)?; // IO errors auto-convert
//!     Ok(())
//! }
//! ```

use std::path::PathBuf;

/// Crate-wide result type.
pub type Result<T> = std::result::Result<T, Error>;

/// Top-level error.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// File I/O error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Database error
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// The same platform id was asked to describe two different contents.
    #[error(
        "Identity conflict for id {id}: stored hash {stored_hash} but candidate hashes to {candidate_hash}"
    )]
    IdentityConflict {
        id: i64,
        stored_hash: String,
        candidate_hash: String,
    },

    /// File does not decode as its declared media kind
    #[error("Invalid format for {path}: {message}")]
    Format { path: PathBuf, message: String },

    /// A concurrent write violated a uniqueness constraint
    #[error("Store conflict on {constraint}")]
    StoreConflict { constraint: String },

    /// Required configuration absent before the run starts
    #[error("Missing prerequisite: {0}")]
    MissingPrerequisite(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// The hash worker pool has shut down
    #[error("Hash workers unavailable")]
    WorkerUnavailable,

    /// Generic error with context
    #[error("{context}: {source}")]
    WithContext {
        context: String,
        #[source]
        source: Box<Error>,
    },
}

impl Error {
    /// Create a format error.
    pub fn format(path: impl Into<PathBuf>, message: impl Into<String>) -> Self {
        Self::Format {
            path: path.into(),
            message: message.into(),
        }
    }

    /// Create a missing prerequisite error.
    pub fn missing(what: impl Into<String>) -> Self {
        Self::MissingPrerequisite(what.into())
    }

    /// Create a config error.
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config(message.into())
    }

    /// Add context to an error.
    pub fn context(self, ctx: impl Into<String>) -> Self {
        Self::WithContext {
            context: ctx.into(),
            source: Box::new(self),
        }
    }

    /// Innermost error, looking through any [`Error::WithContext`] layers.
    pub fn root(&self) -> &Error {
        match self {
            Self::WithContext { source, .. } => source.root(),
            other => other,
        }
    }

    pub fn is_store_conflict(&self) -> bool {
        matches!(self.root(), Self::StoreConflict { .. })
    }

    pub fn is_identity_conflict(&self) -> bool {
        matches!(self.root(), Self::IdentityConflict { .. })
    }

    pub fn is_format(&self) -> bool {
        matches!(self.root(), Self::Format { .. })
    }
}

/// Map a write error, turning UNIQUE violations into [`Error::StoreConflict`].
pub(crate) fn classify_write_error(err: sqlx::Error) -> Error {
    if let sqlx::Error::Database(db_err) = &err
        && db_err.is_unique_violation()
    {
        return Error::StoreConflict {
            constraint: db_err.message().to_string(),
        };
    }
    Error::Database(err)
}

/// Extension trait for adding context to Results.
pub trait ResultExt<T> {
    /// Add context to an error result.
    fn with_context(self, ctx: impl Into<String>) -> Result<T>;
}

impl<T> ResultExt<T> for Result<T> {
    fn with_context(self, ctx: impl Into<String>) -> Result<T> {
        self.map_err(|e| e.context(ctx))
    }
}

impl<T> ResultExt<T> for std::result::Result<T, std::io::Error> {
    fn with_context(self, ctx: impl Into<String>) -> Result<T> {
        self.map_err(|e| Error::Io(e).context(ctx))
    }
}

impl<T> ResultExt<T> for std::result::Result<T, sqlx::Error> {
    fn with_context(self, ctx: impl Into<String>) -> Result<T> {
        self.map_err(|e| Error::Database(e).context(ctx))
    }
}
