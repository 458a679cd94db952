//! Index writing: in-memory accumulation, run spilling, segment building
//! and the commit protocol.
//!
//! Documents accumulate in a per-writer posting map. When the configured
//! memory budget is exceeded the map is sorted and spilled as a run; on
//! flush the runs and the in-memory tail are k-way merged in term order and
//! block-encoded into a new segment. Commits hold the index write lock,
//! fsync every new file and publish by TOC rename; a failed flush deletes
//! its half-written files and leaves the TOC untouched.

use std::sync::Arc;

use ahash::AHashMap;

use crate::analysis::AnalyzerSet;
use crate::document::{Document, FieldValue};
use crate::error::{QuillError, Result};
use crate::index::dictionary::{SegmentHeader, TermDictionary, TermInfo, TermKey};
use crate::index::doc_store::{DeletionBitset, LengthsWriter, StoredWriter};
use crate::index::merge::{self, MergePolicy};
use crate::index::postings::{Posting, PostingList, PostingsRef, quality_kernel, write_postings};
use crate::index::reader::SegmentReader;
use crate::index::segment::{
    EXT_DELETES, EXT_LENGTHS, EXT_POSTINGS, EXT_STORED, EXT_TERMS, SEGMENT_EXTENSIONS, SegmentMeta,
    segment_file,
};
use crate::index::toc::Toc;
use crate::schema::{FieldKind, NumericKind, Schema};
use crate::storage::structured::{
    StructReader, StructWriter, encode_f64_ordered, encode_i64_ordered,
};
use crate::storage::{Storage, StorageLock, StorageOutput};
use crate::util::fieldlen::length_to_byte;

/// Configuration for index writers.
#[derive(Debug, Clone)]
pub struct WriterConfig {
    /// Memory budget for the posting accumulator before a spill, in MB.
    pub ram_limit_mb: usize,

    /// Advisory parallelism for merges. One means sequential.
    pub procs: usize,

    /// Size ratio between merge tiers.
    pub merge_tier_factor: f64,

    /// Number of same-tier segments that triggers a merge.
    pub merge_min_segments: usize,

    /// Apply the merge policy automatically after each commit.
    pub auto_merge: bool,

    /// Analyzers available to schema fields.
    pub analyzers: AnalyzerSet,
}

impl Default for WriterConfig {
    fn default() -> Self {
        WriterConfig {
            ram_limit_mb: 16,
            procs: 1,
            merge_tier_factor: 10.0,
            merge_min_segments: 4,
            auto_merge: true,
            analyzers: AnalyzerSet::defaults(),
        }
    }
}

/// Rough per-entry cost estimates for the accumulator memory budget.
const KEY_OVERHEAD: usize = 48;
const POSTING_OVERHEAD: usize = 24;
const POSITION_OVERHEAD: usize = 4;

/// In-memory posting accumulator keyed by (field, term).
#[derive(Debug, Default)]
struct PostingAccumulator {
    terms: AHashMap<TermKey, PostingList>,
    mem_estimate: usize,
}

impl PostingAccumulator {
    fn add_token(&mut self, key: TermKey, doc_id: u32, position: Option<u32>) {
        let key_len = key.field.len() + key.term.len();
        let list = self.terms.entry(key).or_insert_with(|| {
            self.mem_estimate += key_len + KEY_OVERHEAD;
            PostingList::new()
        });

        match list.postings.last_mut() {
            Some(last) if last.doc_id == doc_id => {
                last.tf += 1;
                list.total_tf += 1;
                if let Some(pos) = position {
                    last.positions.push(pos);
                    self.mem_estimate += POSITION_OVERHEAD;
                }
            }
            _ => {
                let mut posting = Posting::new(doc_id, 1);
                if let Some(pos) = position {
                    posting.positions.push(pos);
                    self.mem_estimate += POSITION_OVERHEAD;
                }
                list.push(posting);
                self.mem_estimate += POSTING_OVERHEAD;
            }
        }
    }

    fn docs_for(&self, key: &TermKey) -> Option<&[Posting]> {
        self.terms.get(key).map(|list| list.postings.as_slice())
    }

    fn drain_sorted(&mut self) -> Vec<(TermKey, PostingList)> {
        let mut entries: Vec<_> = std::mem::take(&mut self.terms).into_iter().collect();
        entries.sort_by(|a, b| a.0.cmp(&b.0));
        self.mem_estimate = 0;
        entries
    }

    fn is_empty(&self) -> bool {
        self.terms.is_empty()
    }
}

/// A source of (term, postings) entries in term order, for the k-way merge.
trait PostingSource {
    fn peek(&self) -> Option<&TermKey>;
    fn next_entry(&mut self) -> Result<Option<(TermKey, Vec<Posting>)>>;
}

/// Reads back one spilled run file.
struct RunReader {
    reader: StructReader<Box<dyn crate::storage::StorageInput>>,
    remaining: u64,
    current: Option<(TermKey, Vec<Posting>)>,
}

impl RunReader {
    fn open(storage: &dyn Storage, name: &str) -> Result<Self> {
        let input = storage.open_input(name)?;
        let mut reader = StructReader::new(input)?;
        let remaining = reader.read_varint()?;
        let mut run = RunReader {
            reader,
            remaining,
            current: None,
        };
        run.load_next()?;
        Ok(run)
    }

    fn load_next(&mut self) -> Result<()> {
        if self.remaining == 0 {
            self.current = None;
            return Ok(());
        }
        self.remaining -= 1;

        let field = self.reader.read_string()?;
        let term = self.reader.read_bytes()?;
        let posting_count = self.reader.read_varint()? as usize;
        let mut postings = Vec::with_capacity(posting_count);
        for _ in 0..posting_count {
            let doc_id = self.reader.read_varint()? as u32;
            let tf = self.reader.read_varint()? as u32;
            let pos_count = self.reader.read_varint()? as usize;
            let mut positions = Vec::with_capacity(pos_count);
            let mut pos = 0u32;
            for i in 0..pos_count {
                let delta = self.reader.read_varint()? as u32;
                pos = if i == 0 { delta } else { pos + delta };
                positions.push(pos);
            }
            postings.push(Posting {
                doc_id,
                tf,
                positions,
            });
        }
        self.current = Some((TermKey { field, term }, postings));
        Ok(())
    }
}

impl PostingSource for RunReader {
    fn peek(&self) -> Option<&TermKey> {
        self.current.as_ref().map(|(key, _)| key)
    }

    fn next_entry(&mut self) -> Result<Option<(TermKey, Vec<Posting>)>> {
        let entry = self.current.take();
        if entry.is_some() {
            self.load_next()?;
        }
        Ok(entry)
    }
}

/// The in-memory accumulator tail as a merge source.
struct MemSource {
    entries: std::vec::IntoIter<(TermKey, PostingList)>,
    current: Option<(TermKey, Vec<Posting>)>,
}

impl MemSource {
    fn new(entries: Vec<(TermKey, PostingList)>) -> Self {
        let mut source = MemSource {
            entries: entries.into_iter(),
            current: None,
        };
        source.load_next();
        source
    }

    fn load_next(&mut self) {
        self.current = self
            .entries
            .next()
            .map(|(key, list)| (key, list.postings));
    }
}

impl PostingSource for MemSource {
    fn peek(&self) -> Option<&TermKey> {
        self.current.as_ref().map(|(key, _)| key)
    }

    fn next_entry(&mut self) -> Result<Option<(TermKey, Vec<Posting>)>> {
        let entry = self.current.take();
        if entry.is_some() {
            self.load_next();
        }
        Ok(entry)
    }
}

/// Pull the next term in order from the sources, concatenating postings.
///
/// Sources are consulted in creation order; doc ids across sources are
/// disjoint and increasing, so concatenation preserves posting order.
fn merge_next(sources: &mut [Box<dyn PostingSource>]) -> Result<Option<(TermKey, Vec<Posting>)>> {
    let min_key = sources
        .iter()
        .filter_map(|source| source.peek())
        .min()
        .cloned();
    let Some(min_key) = min_key else {
        return Ok(None);
    };

    let mut postings = Vec::new();
    for source in sources.iter_mut() {
        if source.peek() == Some(&min_key) {
            let (_, mut chunk) = source.next_entry()?.expect("peeked entry");
            debug_assert!(
                postings
                    .last()
                    .map(|last: &Posting| chunk.first().map(|c| last.doc_id < c.doc_id).unwrap_or(true))
                    .unwrap_or(true),
                "run doc ranges overlap"
            );
            postings.append(&mut chunk);
        }
    }
    Ok(Some((min_key, postings)))
}

/// Streams a new segment's postings file and dictionary entries.
///
/// Shared between flush and merge: callers feed terms in order, then call
/// [`SegmentBuilder::finish`] with the per-document artifacts.
pub(crate) struct SegmentBuilder {
    segment_id: String,
    generation: u64,
    schema_fingerprint: String,
    postings_writer: StructWriter<Box<dyn StorageOutput>>,
    entries: Vec<(TermKey, TermInfo)>,
}

impl SegmentBuilder {
    pub(crate) fn new(
        storage: &dyn Storage,
        segment_id: &str,
        generation: u64,
        schema_fingerprint: String,
    ) -> Result<Self> {
        let output = storage.create_output(&segment_file(segment_id, EXT_POSTINGS))?;
        Ok(SegmentBuilder {
            segment_id: segment_id.to_string(),
            generation,
            schema_fingerprint,
            postings_writer: StructWriter::new(output),
            entries: Vec::new(),
        })
    }

    /// Add one term's postings. Terms must arrive in dictionary order and
    /// postings must be non-empty.
    pub(crate) fn add_term(
        &mut self,
        key: TermKey,
        postings: &[Posting],
        has_positions: bool,
        length_of: &dyn Fn(u32) -> u8,
    ) -> Result<()> {
        let df = postings.len() as u32;
        let cf = postings.iter().map(|p| p.tf as u64).sum();

        let info = if postings.len() == 1 {
            // Single posting: store inline in the dictionary
            let posting = postings[0].clone();
            let min_len = length_of(posting.doc_id);
            let max_tf = posting.tf;
            TermInfo {
                df,
                cf,
                max_tf,
                min_len,
                max_quality: quality_kernel(max_tf, min_len),
                postings: PostingsRef::Inline(posting),
            }
        } else {
            let pointers =
                write_postings(&mut self.postings_writer, postings, has_positions, length_of)?;
            let max_tf = pointers.iter().map(|p| p.max_tf).max().unwrap_or(0);
            let min_len = pointers.iter().map(|p| p.min_len).min().unwrap_or(0);
            let max_quality = pointers.iter().map(|p| p.quality).fold(0.0f32, f32::max);
            TermInfo {
                df,
                cf,
                max_tf,
                min_len,
                max_quality,
                postings: PostingsRef::Blocks(pointers),
            }
        };

        self.entries.push((key, info));
        Ok(())
    }

    /// Close the postings file and write the remaining segment files.
    pub(crate) fn finish(
        self,
        storage: &dyn Storage,
        doc_count_all: u32,
        lengths: LengthsWriter,
        stored: StoredWriter,
    ) -> Result<()> {
        self.postings_writer.close()?;

        let dictionary = TermDictionary::from_sorted(
            SegmentHeader {
                generation: self.generation,
                doc_count_all,
                schema_fingerprint: self.schema_fingerprint,
            },
            self.entries,
        )?;
        dictionary.write(storage.create_output(&segment_file(&self.segment_id, EXT_TERMS))?)?;

        lengths.write(storage, &segment_file(&self.segment_id, EXT_LENGTHS))?;
        stored.write(storage, &segment_file(&self.segment_id, EXT_STORED))?;
        Ok(())
    }
}

/// Remove every file of a half-written segment, best effort.
pub(crate) fn delete_segment_files(storage: &dyn Storage, segment_id: &str) {
    for ext in SEGMENT_EXTENSIONS {
        let name = segment_file(segment_id, ext);
        if storage.file_exists(&name) {
            let _ = storage.delete_file(&name);
        }
    }
}

/// Accumulates documents for the next segment.
struct SegmentWriter {
    schema: Schema,
    analyzers: AnalyzerSet,
    storage: Arc<dyn Storage>,
    ram_limit_bytes: usize,

    acc: PostingAccumulator,
    /// Stored-field subset per buffered doc.
    stored: Vec<Document>,
    /// Raw per-doc lengths per scorable field.
    lengths: AHashMap<String, Vec<u32>>,
    /// Buffered docs marked deleted before flush.
    deleted: Vec<bool>,
    /// (term, first doc id NOT covered) — applied to spilled runs at flush.
    delete_watermarks: AHashMap<TermKey, u32>,
    /// Names of spilled run files.
    runs: Vec<String>,
    next_doc: u32,
}

impl SegmentWriter {
    fn new(schema: Schema, analyzers: AnalyzerSet, storage: Arc<dyn Storage>, ram_limit_mb: usize) -> Self {
        SegmentWriter {
            schema,
            analyzers,
            storage,
            ram_limit_bytes: ram_limit_mb * 1024 * 1024,
            acc: PostingAccumulator::default(),
            stored: Vec::new(),
            lengths: AHashMap::new(),
            deleted: Vec::new(),
            delete_watermarks: AHashMap::new(),
            runs: Vec::new(),
            next_doc: 0,
        }
    }

    fn buffered_docs(&self) -> u32 {
        self.next_doc
    }

    fn is_empty(&self) -> bool {
        self.next_doc == 0
    }

    /// Index one document, returning its buffered doc id.
    fn add_document(&mut self, doc: &Document) -> Result<u32> {
        let doc_id = self.next_doc;

        // Validate all fields before touching writer state, so a bad
        // document leaves the buffer unchanged.
        for (name, value) in doc.fields() {
            let kind = self.schema.get(name).ok_or_else(|| {
                QuillError::schema(format!("field '{name}' is not in the schema"))
            })?;
            validate_value(name, kind, value)?;
        }

        let mut stored_doc = Document::new();
        for (name, value) in doc.fields() {
            let kind = self.schema.get(name).expect("validated above").clone();

            if kind.is_stored() {
                stored_doc.set(name.clone(), value.clone());
            }

            if kind.is_indexed() {
                let token_count = self.index_value(doc_id, name, kind.clone(), value)?;
                if kind.is_scorable() {
                    let column = self.lengths.entry(name.clone()).or_default();
                    column.resize(doc_id as usize, 0);
                    column.push(token_count);
                }
            }
        }

        self.stored.push(stored_doc);
        self.deleted.push(false);
        self.next_doc += 1;

        if self.acc.mem_estimate > self.ram_limit_bytes {
            self.spill_run()?;
        }
        Ok(doc_id)
    }

    /// Produce term bytes and feed the accumulator for one field value.
    /// Returns the token count.
    fn index_value(
        &mut self,
        doc_id: u32,
        field: &str,
        kind: FieldKind,
        value: &FieldValue,
    ) -> Result<u32> {
        match &kind {
            FieldKind::Text(options) => {
                let text = value.as_str().expect("validated");
                let analyzer = self.analyzers.get(kind.analyzer_name())?;
                let tokens = analyzer.analyze(field, text)?;
                let count = tokens.len() as u32;
                for token in tokens {
                    let position = options.positions.then_some(token.position);
                    self.acc
                        .add_token(TermKey::new(field, token.term), doc_id, position);
                }
                Ok(count)
            }
            FieldKind::Id(_) => {
                let text = value.as_str().expect("validated");
                if text.is_empty() {
                    return Ok(0);
                }
                self.acc
                    .add_token(TermKey::new(field, text.as_bytes().to_vec()), doc_id, None);
                Ok(1)
            }
            FieldKind::Numeric(options) => {
                let term: Vec<u8> = match options.kind {
                    NumericKind::I64 => {
                        encode_i64_ordered(value.as_i64().expect("validated")).to_vec()
                    }
                    NumericKind::F64 => {
                        encode_f64_ordered(value.as_f64().expect("validated")).to_vec()
                    }
                };
                self.acc.add_token(TermKey::new(field, term), doc_id, None);
                Ok(1)
            }
            FieldKind::Stored => Ok(0),
        }
    }

    /// Mark buffered documents containing `key` as deleted.
    ///
    /// Only documents added before this call are affected; the watermark
    /// records the cutoff for docs already spilled to runs.
    fn delete_by_term(&mut self, key: TermKey) {
        if let Some(postings) = self.acc.docs_for(&key) {
            for posting in postings {
                self.deleted[posting.doc_id as usize] = true;
            }
        }
        // A later delete of the same term supersedes the earlier watermark
        self.delete_watermarks.insert(key, self.next_doc);
    }

    /// Sort the accumulator and write it out as a run file.
    fn spill_run(&mut self) -> Result<()> {
        if self.acc.is_empty() {
            return Ok(());
        }
        let entries = self.acc.drain_sorted();

        let (name, output) = self.storage.create_temp_output("run_")?;
        let mut writer = StructWriter::new(output);
        writer.write_varint(entries.len() as u64)?;
        for (key, list) in &entries {
            writer.write_string(&key.field)?;
            writer.write_bytes(&key.term)?;
            writer.write_varint(list.postings.len() as u64)?;
            for posting in &list.postings {
                writer.write_varint(posting.doc_id as u64)?;
                writer.write_varint(posting.tf as u64)?;
                writer.write_varint(posting.positions.len() as u64)?;
                let mut prev = 0u32;
                for (i, &pos) in posting.positions.iter().enumerate() {
                    let delta = if i == 0 { pos } else { pos - prev };
                    writer.write_varint(delta as u64)?;
                    prev = pos;
                }
            }
        }
        writer.close_no_sync()?;
        self.runs.push(name);
        Ok(())
    }

    /// Apply recorded delete watermarks to docs that live only in runs.
    fn apply_watermarks_to_runs(&mut self) -> Result<()> {
        if self.delete_watermarks.is_empty() || self.runs.is_empty() {
            return Ok(());
        }
        for name in &self.runs {
            let mut run = RunReader::open(self.storage.as_ref(), name)?;
            while let Some((key, postings)) = run.next_entry()? {
                if let Some(&watermark) = self.delete_watermarks.get(&key) {
                    for posting in &postings {
                        if posting.doc_id < watermark {
                            self.deleted[posting.doc_id as usize] = true;
                        }
                    }
                }
            }
        }
        Ok(())
    }

    /// Merge runs and the in-memory tail into segment files.
    ///
    /// Returns the live doc count, or `None` when no live documents remain
    /// (in which case no files are written).
    fn flush(&mut self, segment_id: &str, generation: u64) -> Result<Option<u32>> {
        self.apply_watermarks_to_runs()?;

        // Dense renumbering over live docs
        let mut renumber: Vec<Option<u32>> = Vec::with_capacity(self.next_doc as usize);
        let mut live_count = 0u32;
        for old_doc in 0..self.next_doc {
            if self.deleted[old_doc as usize] {
                renumber.push(None);
            } else {
                renumber.push(Some(live_count));
                live_count += 1;
            }
        }
        if live_count == 0 {
            self.discard_runs();
            return Ok(None);
        }

        // Renumbered length columns, encoded
        let mut length_bytes: AHashMap<String, Vec<u8>> = AHashMap::new();
        let mut lengths_writer = LengthsWriter::new();
        for field in self.schema.scorable_fields() {
            let raw = match self.lengths.get(field) {
                Some(raw) => raw,
                None => continue,
            };
            let mut bytes = Vec::with_capacity(live_count as usize);
            let mut total = 0u64;
            for old_doc in 0..self.next_doc as usize {
                if renumber[old_doc].is_none() {
                    continue;
                }
                let len = raw.get(old_doc).copied().unwrap_or(0);
                bytes.push(length_to_byte(len));
                total += len as u64;
            }
            lengths_writer.add_field(field, bytes.clone(), total);
            length_bytes.insert(field.to_string(), bytes);
        }

        // Renumbered stored records
        let mut stored_writer = StoredWriter::new();
        for (old_doc, doc) in self.stored.iter().enumerate() {
            if renumber[old_doc].is_some() {
                stored_writer.push(doc.clone());
            }
        }

        let mut builder = SegmentBuilder::new(
            self.storage.as_ref(),
            segment_id,
            generation,
            self.schema.fingerprint(),
        )?;

        let mut sources: Vec<Box<dyn PostingSource>> = Vec::with_capacity(self.runs.len() + 1);
        for name in &self.runs {
            sources.push(Box::new(RunReader::open(self.storage.as_ref(), name)?));
        }
        sources.push(Box::new(MemSource::new(self.acc.drain_sorted())));

        while let Some((key, postings)) = merge_next(&mut sources)? {
            let remapped: Vec<Posting> = postings
                .into_iter()
                .filter_map(|mut posting| {
                    renumber[posting.doc_id as usize].map(|new_doc| {
                        posting.doc_id = new_doc;
                        posting
                    })
                })
                .collect();
            if remapped.is_empty() {
                continue;
            }

            let kind = self.schema.get(&key.field);
            let has_positions = kind.map(|k| k.has_positions()).unwrap_or(false);
            let column = length_bytes.get(&key.field);
            let length_of = |doc: u32| -> u8 {
                column
                    .and_then(|bytes| bytes.get(doc as usize).copied())
                    .unwrap_or(0)
            };
            builder.add_term(key, &remapped, has_positions, &length_of)?;
        }

        builder.finish(
            self.storage.as_ref(),
            live_count,
            lengths_writer,
            stored_writer,
        )?;
        self.discard_runs();
        Ok(Some(live_count))
    }

    fn discard_runs(&mut self) {
        for name in self.runs.drain(..) {
            let _ = self.storage.delete_file(&name);
        }
    }

    /// Throw away all buffered state.
    fn reset(&mut self) {
        self.discard_runs();
        self.acc = PostingAccumulator::default();
        self.stored.clear();
        self.lengths.clear();
        self.deleted.clear();
        self.delete_watermarks.clear();
        self.next_doc = 0;
    }
}

/// Check that a value is representable under a field kind.
fn validate_value(name: &str, kind: &FieldKind, value: &FieldValue) -> Result<()> {
    let ok = match kind {
        FieldKind::Text(_) | FieldKind::Id(_) => matches!(value, FieldValue::String(_)),
        FieldKind::Numeric(options) => match options.kind {
            NumericKind::I64 => matches!(value, FieldValue::I64(_)),
            NumericKind::F64 => matches!(value, FieldValue::F64(_)),
        },
        FieldKind::Stored => true,
    };
    if ok {
        Ok(())
    } else {
        Err(QuillError::indexing(format!(
            "value {value:?} does not fit field '{name}' of kind {kind:?}"
        )))
    }
}

/// The single writer of an index.
///
/// Holds the index write lock from creation until close, so at most one
/// writer exists per index. Buffered documents become a new segment at
/// [`commit`](IndexWriter::commit).
pub struct IndexWriter {
    storage: Arc<dyn Storage>,
    config: WriterConfig,
    lock: Option<Box<dyn StorageLock>>,
    toc: Toc,
    segment_writer: SegmentWriter,
    /// Delete terms to apply to already-committed segments.
    pending_deletes: Vec<TermKey>,
    closed: bool,
}

impl std::fmt::Debug for IndexWriter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IndexWriter")
            .field("generation", &self.toc.generation)
            .field("buffered_docs", &self.segment_writer.buffered_docs())
            .finish()
    }
}

impl IndexWriter {
    pub(crate) fn new(
        storage: Arc<dyn Storage>,
        config: WriterConfig,
        lock: Box<dyn StorageLock>,
    ) -> Result<Self> {
        let toc = Toc::load_latest(storage.as_ref())?
            .ok_or_else(|| QuillError::not_found("no TOC in storage".to_string()))?;
        let segment_writer = SegmentWriter::new(
            toc.schema.clone(),
            config.analyzers.clone(),
            Arc::clone(&storage),
            config.ram_limit_mb,
        );
        Ok(IndexWriter {
            storage,
            config,
            lock: Some(lock),
            toc,
            segment_writer,
            pending_deletes: Vec::new(),
            closed: false,
        })
    }

    /// The schema this writer indexes under.
    pub fn schema(&self) -> &Schema {
        &self.toc.schema
    }

    /// Replace the schema with a compatible extension of the current one.
    ///
    /// Takes effect from the next commit; existing segments keep their
    /// fingerprint-checked schema semantics because extension preserves
    /// every existing field.
    pub fn extend_schema(&mut self, schema: Schema) -> Result<()> {
        self.ensure_open()?;
        if !schema.is_compatible_extension_of(&self.toc.schema) {
            return Err(QuillError::schema(
                "new schema does not preserve existing fields".to_string(),
            ));
        }
        self.toc.schema = schema.clone();
        self.toc.schema_fingerprint = schema.fingerprint();
        self.segment_writer.schema = schema;
        Ok(())
    }

    /// Number of documents buffered since the last commit.
    pub fn pending_docs(&self) -> u64 {
        self.segment_writer.buffered_docs() as u64
    }

    /// Buffer one document for the next commit.
    pub fn add_document(&mut self, doc: Document) -> Result<()> {
        self.ensure_open()?;
        self.segment_writer.add_document(&doc)?;
        Ok(())
    }

    /// Delete all documents whose `field` contains the exact term bytes.
    ///
    /// Applies to committed segments (as tombstones, at the next commit)
    /// and to documents buffered before this call.
    pub fn delete_by_term(&mut self, field: &str, term: &[u8]) -> Result<()> {
        self.ensure_open()?;
        let kind = self
            .toc
            .schema
            .get(field)
            .ok_or_else(|| QuillError::schema(format!("field '{field}' is not in the schema")))?;
        if !kind.is_indexed() {
            return Err(QuillError::query(format!(
                "cannot delete by unindexed field '{field}'"
            )));
        }
        let key = TermKey::new(field, term.to_vec());
        self.segment_writer.delete_by_term(key.clone());
        self.pending_deletes.push(key);
        Ok(())
    }

    /// Delete all documents whose `field` contains `value`.
    pub fn delete_documents(&mut self, field: &str, value: &str) -> Result<()> {
        self.delete_by_term(field, value.as_bytes())
    }

    /// Delete prior documents matching any unique field of `doc`, then add
    /// `doc`.
    pub fn update_document(&mut self, doc: Document) -> Result<()> {
        self.ensure_open()?;
        let unique_fields = self.toc.schema.unique_fields();
        if unique_fields.is_empty() {
            return Err(QuillError::indexing(
                "update_document requires a unique field in the schema".to_string(),
            ));
        }

        let mut deletes = Vec::new();
        for field in unique_fields {
            if let Some(value) = doc.get(field) {
                let text = value.as_str().ok_or_else(|| {
                    QuillError::indexing(format!("unique field '{field}' must be a string"))
                })?;
                deletes.push((field.to_string(), text.as_bytes().to_vec()));
            }
        }
        if deletes.is_empty() {
            return Err(QuillError::indexing(
                "update_document requires a value for a unique field".to_string(),
            ));
        }

        for (field, term) in deletes {
            self.delete_by_term(&field, &term)?;
        }
        self.add_document(doc)
    }

    /// Commit buffered documents and deletions, publishing a new generation.
    ///
    /// Returns the committed generation. A commit with nothing to do
    /// returns the current generation without touching storage.
    pub fn commit(&mut self) -> Result<u64> {
        self.ensure_open()?;
        if self.segment_writer.is_empty() && self.pending_deletes.is_empty() {
            return Ok(self.toc.generation);
        }

        let next_generation = self.toc.generation + 1;
        let mut new_toc = self.toc.clone();
        new_toc.generation = next_generation;

        // 1. Flush buffered docs into a new segment
        let mut new_segment = None;
        if !self.segment_writer.is_empty() {
            let segment_id = new_toc.next_segment_id();
            match self.segment_writer.flush(&segment_id, next_generation) {
                Ok(Some(live_count)) => {
                    new_segment = Some(SegmentMeta {
                        id: segment_id,
                        generation: next_generation,
                        doc_count_all: live_count,
                        deleted: 0,
                        schema_fingerprint: new_toc.schema.fingerprint(),
                    });
                }
                Ok(None) => {}
                Err(e) => {
                    // Roll back: remove half-written files, keep the TOC
                    delete_segment_files(self.storage.as_ref(), &segment_id);
                    return Err(e);
                }
            }
        }

        // 2. Apply tombstones to committed segments
        let deletes = std::mem::take(&mut self.pending_deletes);
        if !deletes.is_empty() {
            for meta in &mut new_toc.segments {
                let deleted = apply_deletes(self.storage.as_ref(), meta, &deletes)?;
                meta.deleted = deleted;
            }
        }

        if let Some(meta) = new_segment {
            new_toc.segments.push(meta);
        }

        // 3. Publish and clean up
        new_toc.write(self.storage.as_ref())?;
        new_toc.clean_orphans(self.storage.as_ref());

        self.toc = new_toc;
        self.segment_writer.reset();

        if self.config.auto_merge {
            self.maybe_merge()?;
        }
        Ok(self.toc.generation)
    }

    /// Apply the merge policy to the current segment set.
    pub fn maybe_merge(&mut self) -> Result<()> {
        self.ensure_open()?;
        let policy = MergePolicy {
            tier_factor: self.config.merge_tier_factor,
            min_segments: self.config.merge_min_segments,
        };
        let groups = policy.select_merges(&self.toc.segments);
        if groups.is_empty() {
            return Ok(());
        }
        self.run_merges(groups)
    }

    /// Merge all segments into one.
    ///
    /// Also commits any buffered documents first. Running optimize on an
    /// already-optimized index is a no-op, leaving the files untouched.
    pub fn optimize(&mut self) -> Result<()> {
        self.ensure_open()?;
        self.commit()?;

        let needs_work = self.toc.segments.len() > 1
            || self.toc.segments.iter().any(|meta| meta.deleted > 0);
        if !needs_work {
            // Still remove leftovers a crashed writer may have abandoned
            self.toc.clean_orphans(self.storage.as_ref());
            return Ok(());
        }
        let group: Vec<SegmentMeta> = self.toc.segments.clone();
        self.run_merges(vec![group])
    }

    fn run_merges(&mut self, groups: Vec<Vec<SegmentMeta>>) -> Result<()> {
        let mut new_toc = self.toc.clone();
        new_toc.generation += 1;

        let mut planned = Vec::with_capacity(groups.len());
        for group in groups {
            let target_id = new_toc.next_segment_id();
            planned.push((group, target_id));
        }

        let merged = merge::execute_merges(
            self.storage.as_ref(),
            &new_toc.schema,
            &planned,
            new_toc.generation,
            self.config.procs,
        )?;

        let merged_sources: Vec<&str> = planned
            .iter()
            .flat_map(|(group, _)| group.iter().map(|meta| meta.id.as_str()))
            .collect();
        new_toc
            .segments
            .retain(|meta| !merged_sources.contains(&meta.id.as_str()));
        new_toc.segments.extend(merged);

        new_toc.write(self.storage.as_ref())?;
        // Source segments are unlinked only after the TOC rename
        new_toc.clean_orphans(self.storage.as_ref());
        self.toc = new_toc;
        Ok(())
    }

    /// Discard all buffered documents and pending deletions.
    pub fn rollback(&mut self) -> Result<()> {
        self.ensure_open()?;
        self.segment_writer.reset();
        self.pending_deletes.clear();
        Ok(())
    }

    /// Release the write lock. Buffered, uncommitted documents are lost.
    pub fn close(&mut self) -> Result<()> {
        if self.closed {
            return Ok(());
        }
        self.segment_writer.reset();
        if let Some(mut lock) = self.lock.take() {
            lock.release()?;
        }
        self.closed = true;
        Ok(())
    }

    fn ensure_open(&self) -> Result<()> {
        if self.closed {
            Err(QuillError::read_only("writer is closed".to_string()))
        } else {
            Ok(())
        }
    }
}

impl Drop for IndexWriter {
    fn drop(&mut self) {
        let _ = self.close();
    }
}

/// A writer that batches documents over a size and time window.
///
/// Wraps an [`IndexWriter`] and commits transparently whenever the buffered
/// doc count reaches `limit` or `period` has elapsed since the last commit.
/// Opening a reader also commits first, so readers always observe the
/// buffered documents; uncommitted writes are never visible (readers only
/// see published generations).
pub struct BufferedWriter {
    writer: IndexWriter,
    limit: usize,
    period: std::time::Duration,
    last_commit: std::time::Instant,
}

impl std::fmt::Debug for BufferedWriter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BufferedWriter")
            .field("limit", &self.limit)
            .field("period", &self.period)
            .field("writer", &self.writer)
            .finish()
    }
}

impl BufferedWriter {
    /// Wrap a writer, committing every `limit` docs or every `period`.
    pub fn new(writer: IndexWriter, limit: usize, period: std::time::Duration) -> Self {
        BufferedWriter {
            writer,
            limit: limit.max(1),
            period,
            last_commit: std::time::Instant::now(),
        }
    }

    fn maybe_commit(&mut self) -> Result<()> {
        if self.writer.pending_docs() >= self.limit as u64
            || self.last_commit.elapsed() >= self.period
        {
            self.commit()?;
        }
        Ok(())
    }

    /// Buffer a document, committing if the window is full.
    pub fn add_document(&mut self, doc: Document) -> Result<()> {
        self.writer.add_document(doc)?;
        self.maybe_commit()
    }

    /// Update by unique fields, committing if the window is full.
    pub fn update_document(&mut self, doc: Document) -> Result<()> {
        self.writer.update_document(doc)?;
        self.maybe_commit()
    }

    /// Delete all documents whose `field` contains `value`.
    pub fn delete_documents(&mut self, field: &str, value: &str) -> Result<()> {
        self.writer.delete_documents(field, value)
    }

    /// Commit everything buffered and reset the window.
    pub fn commit(&mut self) -> Result<u64> {
        let generation = self.writer.commit()?;
        self.last_commit = std::time::Instant::now();
        Ok(generation)
    }

    /// A reader over the buffered state: commits first, then opens a
    /// reader pinned to the resulting generation.
    pub fn reader(&mut self) -> Result<crate::index::reader::IndexReader> {
        self.commit()?;
        crate::index::reader::IndexReader::open(Arc::clone(&self.writer.storage))
    }

    /// Finish: commit what remains and release the underlying writer.
    pub fn close(mut self) -> Result<()> {
        self.commit()?;
        self.writer.close()
    }

    /// Access the wrapped writer.
    pub fn inner(&mut self) -> &mut IndexWriter {
        &mut self.writer
    }
}

/// Mark docs matching the delete terms in one committed segment.
///
/// Rewrites the `.del` file when anything changed; returns the segment's
/// deleted count afterwards.
fn apply_deletes(storage: &dyn Storage, meta: &SegmentMeta, deletes: &[TermKey]) -> Result<u32> {
    let reader = SegmentReader::open(storage, meta.clone())?;

    let mut bitset = if storage.file_exists(&meta.file(EXT_DELETES)) {
        DeletionBitset::open(storage.open_input(&meta.file(EXT_DELETES))?)?
    } else {
        DeletionBitset::new(meta.doc_count_all)
    };

    let mut changed = false;
    for key in deletes {
        for doc in reader.matching_docs(key)? {
            changed |= bitset.delete(doc);
        }
    }

    if changed {
        bitset.write(storage, &meta.file(EXT_DELETES))?;
    }
    Ok(bitset.deleted_count())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::memory::{MemoryStorage, MemoryStorageConfig};
    use crate::schema::{IdOptions, TextOptions};

    fn text_schema() -> Schema {
        let mut schema = Schema::new();
        schema
            .add_field(
                "body",
                TextOptions::new().stored(true).positions(true).into(),
            )
            .unwrap();
        schema
            .add_field("id", IdOptions::new().stored(true).unique(true).into())
            .unwrap();
        schema
    }

    fn new_segment_writer(ram_limit_mb: usize) -> SegmentWriter {
        SegmentWriter::new(
            text_schema(),
            AnalyzerSet::defaults(),
            Arc::new(MemoryStorage::new(MemoryStorageConfig::default())),
            ram_limit_mb,
        )
    }

    #[test]
    fn test_accumulator_groups_terms() {
        let mut writer = new_segment_writer(16);
        writer
            .add_document(&Document::new().with_text("body", "hello world hello"))
            .unwrap();
        writer
            .add_document(&Document::new().with_text("body", "world"))
            .unwrap();

        let hello = writer
            .acc
            .docs_for(&TermKey::new("body", b"hello".to_vec()))
            .unwrap();
        assert_eq!(hello.len(), 1);
        assert_eq!(hello[0].tf, 2);
        assert_eq!(hello[0].positions, vec![0, 2]);

        let world = writer
            .acc
            .docs_for(&TermKey::new("body", b"world".to_vec()))
            .unwrap();
        assert_eq!(world.len(), 2);
        assert_eq!(world[1].doc_id, 1);
    }

    #[test]
    fn test_unknown_field_rejected() {
        let mut writer = new_segment_writer(16);
        let result = writer.add_document(&Document::new().with_text("nope", "x"));
        assert!(matches!(result, Err(QuillError::SchemaMismatch(_))));
        // Nothing was buffered
        assert!(writer.is_empty());
    }

    #[test]
    fn test_bad_value_kind_rejected() {
        let mut writer = new_segment_writer(16);
        let result = writer.add_document(&Document::new().with_i64("body", 3));
        assert!(matches!(result, Err(QuillError::Indexing(_))));
        assert!(writer.is_empty());
    }

    #[test]
    fn test_delete_marks_only_earlier_docs() {
        let mut writer = new_segment_writer(16);
        writer
            .add_document(&Document::new().with_text("id", "A").with_text("body", "x"))
            .unwrap();
        writer.delete_by_term(TermKey::new("id", b"A".to_vec()));
        writer
            .add_document(&Document::new().with_text("id", "A").with_text("body", "y"))
            .unwrap();

        assert!(writer.deleted[0]);
        assert!(!writer.deleted[1]);
    }

    #[test]
    fn test_spill_and_flush_round_trip() {
        // Tiny budget so every document spills a run
        let mut writer = new_segment_writer(0);
        for (i, text) in ["alpha beta", "beta gamma", "gamma alpha"].iter().enumerate() {
            writer
                .add_document(
                    &Document::new()
                        .with_text("body", *text)
                        .with_text("id", format!("doc{i}")),
                )
                .unwrap();
        }
        assert!(!writer.runs.is_empty());

        let storage = Arc::clone(&writer.storage);
        let live = writer.flush("seg_00000001", 2).unwrap();
        assert_eq!(live, Some(3));

        let dictionary =
            TermDictionary::open(storage.open_input("seg_00000001.trm").unwrap()).unwrap();
        let info = dictionary
            .get(&TermKey::new("body", b"beta".to_vec()))
            .unwrap();
        assert_eq!(info.df, 2);

        let info = dictionary
            .get(&TermKey::new("body", b"alpha".to_vec()))
            .unwrap();
        assert_eq!(info.df, 2);

        // Run files are gone after flush
        assert!(writer.runs.is_empty());
    }

    #[test]
    fn test_flush_with_all_docs_deleted_writes_nothing() {
        let mut writer = new_segment_writer(16);
        writer
            .add_document(&Document::new().with_text("id", "A").with_text("body", "x"))
            .unwrap();
        writer.delete_by_term(TermKey::new("id", b"A".to_vec()));

        let storage = Arc::clone(&writer.storage);
        assert_eq!(writer.flush("seg_00000001", 2).unwrap(), None);
        assert!(!storage.file_exists("seg_00000001.trm"));
    }

    #[test]
    fn test_watermark_applies_to_spilled_docs() {
        let mut writer = new_segment_writer(0);
        writer
            .add_document(&Document::new().with_text("id", "A").with_text("body", "old"))
            .unwrap();
        // Doc 0 has been spilled; the delete must still reach it
        assert!(!writer.runs.is_empty());
        writer.delete_by_term(TermKey::new("id", b"A".to_vec()));
        writer
            .add_document(&Document::new().with_text("id", "A").with_text("body", "new"))
            .unwrap();

        let storage = Arc::clone(&writer.storage);
        let live = writer.flush("seg_00000001", 2).unwrap();
        assert_eq!(live, Some(1));

        let dictionary =
            TermDictionary::open(storage.open_input("seg_00000001.trm").unwrap()).unwrap();
        // Only the new doc survives, renumbered to 0
        assert!(dictionary.get(&TermKey::new("body", b"old".to_vec())).is_none());
        let info = dictionary
            .get(&TermKey::new("body", b"new".to_vec()))
            .unwrap();
        assert_eq!(info.df, 1);
    }
}
