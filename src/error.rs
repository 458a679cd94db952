//! Error types for the Quill library.
//!
//! All fallible operations return [`Result`], whose error type is the
//! [`QuillError`] enum. Variants map to the error kinds a caller can act on:
//! `Locked` is retryable, `TimeLimit` leaves partial results valid, `Corrupt`
//! is fatal for the affected segment.

use std::io;

use anyhow;
use thiserror::Error;

/// The main error type for Quill operations.
#[derive(Error, Debug)]
pub enum QuillError {
    /// I/O errors (file operations, fsync, etc.)
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// A requested term, document or field is absent.
    #[error("Not found: {0}")]
    NotFound(String),

    /// The index write lock is held by another writer.
    #[error("Index is locked: {0}")]
    Locked(String),

    /// A mutation was attempted on a read-only index.
    #[error("Index is read-only: {0}")]
    ReadOnly(String),

    /// A checksum, length or ordering invariant was violated on read.
    #[error("Corrupt index data: {0}")]
    Corrupt(String),

    /// A document or index does not match the expected schema.
    #[error("Schema mismatch: {0}")]
    SchemaMismatch(String),

    /// The search time budget was exceeded; partial results remain valid.
    #[error("Time limit exceeded: {0}")]
    TimeLimit(String),

    /// A document value is inconsistent with its field kind.
    #[error("Indexing error: {0}")]
    Indexing(String),

    /// Analysis-related errors (tokenization, filtering, etc.)
    #[error("Analysis error: {0}")]
    Analysis(String),

    /// Query-related errors (invalid patterns, empty clauses, etc.)
    #[error("Query error: {0}")]
    Query(String),

    /// Storage-related errors
    #[error("Storage error: {0}")]
    Storage(String),

    /// JSON serialization/deserialization errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Generic anyhow error
    #[error("Error: {0}")]
    Anyhow(#[from] anyhow::Error),
}

/// Result type alias for operations that may fail with QuillError.
pub type Result<T> = std::result::Result<T, QuillError>;

impl QuillError {
    /// Create a new not-found error.
    pub fn not_found<S: Into<String>>(msg: S) -> Self {
        QuillError::NotFound(msg.into())
    }

    /// Create a new locked error.
    pub fn locked<S: Into<String>>(msg: S) -> Self {
        QuillError::Locked(msg.into())
    }

    /// Create a new read-only error.
    pub fn read_only<S: Into<String>>(msg: S) -> Self {
        QuillError::ReadOnly(msg.into())
    }

    /// Create a new corruption error.
    pub fn corrupt<S: Into<String>>(msg: S) -> Self {
        QuillError::Corrupt(msg.into())
    }

    /// Create a new schema mismatch error.
    pub fn schema<S: Into<String>>(msg: S) -> Self {
        QuillError::SchemaMismatch(msg.into())
    }

    /// Create a new time limit error.
    pub fn time_limit<S: Into<String>>(msg: S) -> Self {
        QuillError::TimeLimit(msg.into())
    }

    /// Create a new indexing error.
    pub fn indexing<S: Into<String>>(msg: S) -> Self {
        QuillError::Indexing(msg.into())
    }

    /// Create a new analysis error.
    pub fn analysis<S: Into<String>>(msg: S) -> Self {
        QuillError::Analysis(msg.into())
    }

    /// Create a new query error.
    pub fn query<S: Into<String>>(msg: S) -> Self {
        QuillError::Query(msg.into())
    }

    /// Create a new storage error.
    pub fn storage<S: Into<String>>(msg: S) -> Self {
        QuillError::Storage(msg.into())
    }
}
