//! Read-only views over segments and over the whole index.
//!
//! A [`SegmentReader`] binds to one segment's files at open time and is
//! snapshot-consistent: concurrent deletion-bit updates performed through
//! other handles are invisible until reopen. An [`IndexReader`] pins the
//! latest TOC generation and composes the segment readers in a stable
//! (generation, id) order.

use std::sync::Arc;

use crate::document::Document;
use crate::error::{QuillError, Result};
use crate::index::dictionary::{TermDictionary, TermInfo, TermKey};
use crate::index::doc_store::{DeletionBitset, FieldLengthColumn, LengthsReader, StoredReader};
use crate::index::postings::{PostingsCursor, PostingsRef};
use crate::index::segment::{EXT_DELETES, EXT_LENGTHS, EXT_POSTINGS, EXT_STORED, EXT_TERMS, SegmentMeta};
use crate::index::toc::Toc;
use crate::schema::Schema;
use crate::storage::{Storage, StorageInput};

/// A read-only view over one segment.
pub struct SegmentReader {
    meta: SegmentMeta,
    dictionary: TermDictionary,
    postings_input: Box<dyn StorageInput>,
    stored: StoredReader,
    lengths: LengthsReader,
    deletes: Option<DeletionBitset>,
}

impl std::fmt::Debug for SegmentReader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SegmentReader")
            .field("id", &self.meta.id)
            .field("doc_count_all", &self.meta.doc_count_all)
            .field("deleted", &self.meta.deleted)
            .finish()
    }
}

impl SegmentReader {
    /// Open a segment, verifying its header against its TOC entry.
    pub fn open(storage: &dyn Storage, meta: SegmentMeta) -> Result<Self> {
        let dictionary = TermDictionary::open(storage.open_input(&meta.file(EXT_TERMS))?)?;

        // The segment keeps the fingerprint of the schema it was written
        // under; later compatible extensions change the index schema but
        // not this value.
        let header = dictionary.header();
        if header.schema_fingerprint != meta.schema_fingerprint {
            return Err(QuillError::schema(format!(
                "segment {} header claims schema {}, TOC records {}",
                meta.id, header.schema_fingerprint, meta.schema_fingerprint
            )));
        }
        if header.doc_count_all != meta.doc_count_all {
            return Err(QuillError::corrupt(format!(
                "segment {} doc count {} disagrees with TOC {}",
                meta.id, header.doc_count_all, meta.doc_count_all
            )));
        }

        let postings_input = storage.open_input(&meta.file(EXT_POSTINGS))?;
        let stored = StoredReader::open(storage.open_input(&meta.file(EXT_STORED))?)?;
        let lengths = if storage.file_exists(&meta.file(EXT_LENGTHS)) {
            LengthsReader::open(storage.open_input(&meta.file(EXT_LENGTHS))?)?
        } else {
            LengthsReader::empty()
        };
        let deletes = if storage.file_exists(&meta.file(EXT_DELETES)) {
            Some(DeletionBitset::open(
                storage.open_input(&meta.file(EXT_DELETES))?,
            )?)
        } else {
            None
        };

        Ok(SegmentReader {
            meta,
            dictionary,
            postings_input,
            stored,
            lengths,
            deletes,
        })
    }

    /// Segment metadata as recorded in the TOC.
    pub fn meta(&self) -> &SegmentMeta {
        &self.meta
    }

    /// Number of live documents.
    pub fn doc_count(&self) -> u32 {
        self.meta.doc_count_all - self.deleted_count()
    }

    /// Number of documents including deleted ones.
    pub fn doc_count_all(&self) -> u32 {
        self.meta.doc_count_all
    }

    /// Number of deleted documents visible to this reader.
    pub fn deleted_count(&self) -> u32 {
        self.deletes.as_ref().map(|d| d.deleted_count()).unwrap_or(0)
    }

    /// Whether any documents are deleted.
    pub fn has_deletions(&self) -> bool {
        self.deleted_count() > 0
    }

    /// Whether a document is deleted.
    pub fn is_deleted(&self, doc_id: u32) -> bool {
        self.deletes
            .as_ref()
            .map(|d| d.is_deleted(doc_id))
            .unwrap_or(false)
    }

    /// The term dictionary.
    pub fn dictionary(&self) -> &TermDictionary {
        &self.dictionary
    }

    /// Dictionary metadata for a term, if present.
    pub fn term_info(&self, key: &TermKey) -> Option<&TermInfo> {
        self.dictionary.get(key)
    }

    /// A positioned cursor over a term's postings, or `None` for an absent
    /// term.
    pub fn postings(&self, key: &TermKey, with_positions: bool) -> Result<Option<PostingsCursor>> {
        let Some(info) = self.dictionary.get(key) else {
            return Ok(None);
        };
        let cursor = self.cursor_for(info, with_positions)?;
        Ok(Some(cursor))
    }

    /// Build a cursor for a dictionary entry already in hand.
    pub fn cursor_for(&self, info: &TermInfo, with_positions: bool) -> Result<PostingsCursor> {
        match &info.postings {
            PostingsRef::Inline(posting) => {
                Ok(PostingsCursor::inline(posting.clone(), with_positions))
            }
            PostingsRef::Blocks(pointers) => PostingsCursor::blocks(
                pointers.clone(),
                self.postings_input.clone_input()?,
                with_positions,
            ),
        }
    }

    /// Doc ids (including deleted) whose postings contain the term.
    pub fn matching_docs(&self, key: &TermKey) -> Result<Vec<u32>> {
        let mut docs = Vec::new();
        if let Some(mut cursor) = self.postings(key, false)? {
            while cursor.is_active() {
                docs.push(cursor.doc_id());
                cursor.advance()?;
            }
        }
        Ok(docs)
    }

    /// Live document frequency: `df` minus deleted matches, computed on
    /// demand by walking the postings.
    pub fn live_doc_frequency(&self, key: &TermKey) -> Result<u32> {
        if !self.has_deletions() {
            return Ok(self.term_info(key).map(|info| info.df).unwrap_or(0));
        }
        let mut df = 0;
        for doc in self.matching_docs(key)? {
            if !self.is_deleted(doc) {
                df += 1;
            }
        }
        Ok(df)
    }

    /// Stored fields of a document.
    pub fn stored_fields(&self, doc_id: u32) -> Result<Document> {
        self.stored.get(doc_id)
    }

    /// Decoded length of a (doc, field) pair, with caller default.
    pub fn doc_field_length(&self, doc_id: u32, field: &str, default: u32) -> u32 {
        self.lengths.doc_field_length(doc_id, field, default)
    }

    /// The dense length column of a field, for scorers.
    pub fn length_column(&self, field: &str) -> Option<&FieldLengthColumn> {
        self.lengths.column(field)
    }

    /// Average raw field length over this segment.
    pub fn avg_field_length(&self, field: &str) -> Option<f32> {
        self.lengths.avg_field_length(field)
    }

    /// Sum of raw field lengths over this segment.
    pub fn total_field_length(&self, field: &str) -> u64 {
        self.lengths.total_field_length(field)
    }
}

/// A reader over the whole index, pinned to one TOC generation.
pub struct IndexReader {
    storage: Arc<dyn Storage>,
    toc: Toc,
    segments: Vec<SegmentReader>,
    /// Global doc-id base of each segment, parallel to `segments`.
    bases: Vec<u64>,
}

impl std::fmt::Debug for IndexReader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IndexReader")
            .field("generation", &self.toc.generation)
            .field("segments", &self.segments.len())
            .finish()
    }
}

impl IndexReader {
    /// Open a reader pinned to the latest committed generation.
    pub fn open(storage: Arc<dyn Storage>) -> Result<Self> {
        let toc = Toc::load_latest(storage.as_ref())?
            .ok_or_else(|| QuillError::not_found("no TOC in storage".to_string()))?;

        // Stable traversal order: generation, then id
        let mut metas = toc.segments.clone();
        metas.sort_by(|a, b| (a.generation, &a.id).cmp(&(b.generation, &b.id)));

        let mut segments = Vec::with_capacity(metas.len());
        let mut bases = Vec::with_capacity(metas.len());
        let mut base = 0u64;
        for meta in metas {
            let doc_span = meta.doc_count_all as u64;
            segments.push(SegmentReader::open(storage.as_ref(), meta)?);
            bases.push(base);
            base += doc_span;
        }

        Ok(IndexReader {
            storage,
            toc,
            segments,
            bases,
        })
    }

    /// The generation this reader is pinned to.
    pub fn generation(&self) -> u64 {
        self.toc.generation
    }

    /// The schema at the pinned generation.
    pub fn schema(&self) -> &Schema {
        &self.toc.schema
    }

    /// The storage backing this reader.
    pub fn storage(&self) -> &Arc<dyn Storage> {
        &self.storage
    }

    /// Segments in traversal order, with their global doc-id bases.
    pub fn segments(&self) -> impl Iterator<Item = (&SegmentReader, u64)> {
        self.segments.iter().zip(self.bases.iter().copied())
    }

    /// Number of live documents across segments.
    pub fn doc_count(&self) -> u64 {
        self.segments.iter().map(|s| s.doc_count() as u64).sum()
    }

    /// Number of documents across segments, including deleted ones.
    pub fn doc_count_all(&self) -> u64 {
        self.segments.iter().map(|s| s.doc_count_all() as u64).sum()
    }

    /// Index-wide document and collection frequency of a term.
    pub fn term_stats(&self, key: &TermKey) -> (u64, u64) {
        let mut df = 0u64;
        let mut cf = 0u64;
        for segment in &self.segments {
            if let Some(info) = segment.term_info(key) {
                df += info.df as u64;
                cf += info.cf;
            }
        }
        (df, cf)
    }

    /// Index-wide average raw length of a field.
    pub fn avg_field_length(&self, field: &str) -> f32 {
        let mut total = 0u64;
        let mut docs = 0u64;
        for segment in &self.segments {
            if segment.length_column(field).is_some() {
                total += segment.total_field_length(field);
                docs += segment.doc_count_all() as u64;
            }
        }
        if docs == 0 {
            0.0
        } else {
            total as f32 / docs as f32
        }
    }

    /// Resolve a global doc id to its segment and local id.
    pub fn resolve(&self, doc_id: u64) -> Result<(&SegmentReader, u32)> {
        let index = match self.bases.binary_search(&doc_id) {
            Ok(i) => i,
            Err(0) => return Err(QuillError::not_found(format!("doc {doc_id}"))),
            Err(i) => i - 1,
        };
        let segment = &self.segments[index];
        let local = doc_id - self.bases[index];
        if local >= segment.doc_count_all() as u64 {
            return Err(QuillError::not_found(format!("doc {doc_id}")));
        }
        Ok((segment, local as u32))
    }

    /// Stored fields of a document addressed by global doc id.
    pub fn stored_fields(&self, doc_id: u64) -> Result<Document> {
        let (segment, local) = self.resolve(doc_id)?;
        segment.stored_fields(local)
    }

    /// Whether a globally addressed document is deleted.
    pub fn is_deleted(&self, doc_id: u64) -> bool {
        match self.resolve(doc_id) {
            Ok((segment, local)) => segment.is_deleted(local),
            Err(_) => false,
        }
    }

    /// Create a searcher over this reader with default settings.
    pub fn searcher(&self) -> crate::search::Searcher<'_> {
        crate::search::Searcher::new(self)
    }
}
