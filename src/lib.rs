//! # Quill
//!
//! A fast, featureful full-text search library for Rust, inspired by Whoosh.
//!
//! ## Features
//!
//! - Pure Rust implementation
//! - Immutable on-disk segments with atomic commits
//! - Compact block-encoded posting lists with skip support
//! - BM25 ranked retrieval with top-K pruning
//! - Boolean, phrase, range, prefix and wildcard queries
//! - Pluggable storage backends (file system, memory)
//!
//! ## Quick start
//!
//! ```
//! use quill::document::Document;
//! use quill::index::Index;
//! use quill::query::Query;
//! use quill::schema::{Schema, TextOptions};
//! use quill::search::SearchRequest;
//! use quill::storage::{MemoryStorage, MemoryStorageConfig};
//! use std::sync::Arc;
//!
//! # fn main() -> quill::error::Result<()> {
//! let mut schema = Schema::new();
//! schema.add_field("body", TextOptions::new().stored(true).positions(true).into())?;
//!
//! let storage = Arc::new(MemoryStorage::new(MemoryStorageConfig::default()));
//! let index = Index::create(storage, schema, Default::default())?;
//!
//! let mut writer = index.writer(Default::default())?;
//! writer.add_document(Document::new().with_text("body", "the quick brown fox"))?;
//! writer.commit()?;
//!
//! let reader = index.reader()?;
//! let searcher = reader.searcher();
//! let hits = searcher.search(&Query::term("body", "quick"), &SearchRequest::with_limit(10))?;
//! assert_eq!(hits.total_hits, 1);
//! # Ok(())
//! # }
//! ```

pub mod analysis;
pub mod document;
pub mod error;
pub mod index;
pub mod query;
pub mod schema;
pub mod search;
pub mod storage;
pub mod util;

// Version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
