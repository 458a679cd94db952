//! Per-document segment artifacts: stored values, field lengths and the
//! deletion bitset.
//!
//! The three artifacts share local doc ids but are otherwise orthogonal.
//! Stored values and lengths are immutable once the segment is written;
//! the deletion bitset is the one segment file rewritten in place, always
//! under the index write lock.

use std::sync::Arc;

use ahash::AHashMap;

use crate::document::Document;
use crate::error::{QuillError, Result};
use crate::storage::structured::{CHECKSUM_LEN, StructReader, StructWriter};
use crate::storage::{Storage, StorageInput};
use crate::util::fieldlen::byte_to_length;

const STORED_MAGIC: u32 = 0x51_53_54_56; // "QSTV"
const LENGTHS_MAGIC: u32 = 0x51_46_4C_4E; // "QFLN"
const DELETES_MAGIC: u32 = 0x51_44_45_4C; // "QDEL"
const FORMAT_VERSION: u32 = 1;

/// Writes the stored-values file: one length-prefixed record per doc,
/// followed by an offset table so records are randomly addressable.
pub struct StoredWriter {
    offsets: Vec<u64>,
    buffer: Vec<Document>,
}

impl StoredWriter {
    /// Create an empty stored-values writer.
    pub fn new() -> Self {
        StoredWriter {
            offsets: Vec::new(),
            buffer: Vec::new(),
        }
    }

    /// Append the stored record for the next doc id.
    pub fn push(&mut self, doc: Document) {
        self.buffer.push(doc);
    }

    /// Number of records buffered.
    pub fn len(&self) -> usize {
        self.buffer.len()
    }

    /// Whether no records are buffered.
    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }

    /// Write all records to `name` in the given storage.
    pub fn write(mut self, storage: &dyn Storage, name: &str) -> Result<()> {
        let output = storage.create_output(name)?;
        let mut writer = StructWriter::new(output);

        writer.write_u32(STORED_MAGIC)?;
        writer.write_u32(FORMAT_VERSION)?;

        let docs = std::mem::take(&mut self.buffer);
        for doc in &docs {
            self.offsets.push(writer.position());
            doc.encode(&mut writer)?;
        }

        let table_pos = writer.position();
        for &offset in &self.offsets {
            writer.write_u64(offset)?;
        }
        writer.write_u32(self.offsets.len() as u32)?;
        writer.write_u64(table_pos)?;
        writer.close()
    }
}

impl Default for StoredWriter {
    fn default() -> Self {
        Self::new()
    }
}

/// Random-access reader over the stored-values file.
pub struct StoredReader {
    input: Box<dyn StorageInput>,
    offsets: Vec<u64>,
}

impl std::fmt::Debug for StoredReader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StoredReader")
            .field("doc_count", &self.offsets.len())
            .finish()
    }
}

impl StoredReader {
    /// Open the stored-values file, loading the offset table into memory.
    pub fn open(input: Box<dyn StorageInput>) -> Result<Self> {
        let mut reader = StructReader::new(input.clone_input()?)?;

        let magic = reader.read_u32()?;
        if magic != STORED_MAGIC {
            return Err(QuillError::corrupt("bad stored-values magic"));
        }
        let version = reader.read_u32()?;
        if version != FORMAT_VERSION {
            return Err(QuillError::corrupt(format!(
                "unsupported stored-values version {version}"
            )));
        }

        // Fixed trailer: ... offsets | count u32 | table_pos u64 | crc u32
        let size = reader.file_size();
        if size < CHECKSUM_LEN + 12 {
            return Err(QuillError::corrupt("stored-values file truncated"));
        }
        reader.seek_to(size - CHECKSUM_LEN - 12)?;
        let count = reader.read_u32()? as usize;
        let table_pos = reader.read_u64()?;

        reader.seek_to(table_pos)?;
        let mut offsets = Vec::with_capacity(count);
        for _ in 0..count {
            offsets.push(reader.read_u64()?);
        }

        Ok(StoredReader { input, offsets })
    }

    /// Number of documents.
    pub fn doc_count(&self) -> u32 {
        self.offsets.len() as u32
    }

    /// Fetch the stored record for a doc id.
    pub fn get(&self, doc_id: u32) -> Result<Document> {
        let offset = *self
            .offsets
            .get(doc_id as usize)
            .ok_or_else(|| QuillError::not_found(format!("doc {doc_id}")))?;
        let mut reader = StructReader::new(self.input.clone_input()?)?;
        reader.seek_to(offset)?;
        Document::decode(&mut reader)
    }
}

/// Per-field dense length columns, one byte per doc.
#[derive(Debug, Clone)]
pub struct FieldLengthColumn {
    /// Encoded length byte per doc id.
    pub bytes: Arc<Vec<u8>>,
    /// Sum of raw (decoded) lengths, for average-length statistics.
    pub total: u64,
}

/// Writes the field-lengths file.
pub struct LengthsWriter {
    fields: Vec<(String, Vec<u8>, u64)>,
}

impl LengthsWriter {
    /// Create an empty lengths writer.
    pub fn new() -> Self {
        LengthsWriter { fields: Vec::new() }
    }

    /// Add one field's dense column. `bytes[doc]` is the encoded length;
    /// `total` is the sum of raw lengths.
    pub fn add_field(&mut self, name: &str, bytes: Vec<u8>, total: u64) {
        self.fields.push((name.to_string(), bytes, total));
    }

    /// Write all columns to `name` in the given storage.
    pub fn write(self, storage: &dyn Storage, name: &str) -> Result<()> {
        let output = storage.create_output(name)?;
        let mut writer = StructWriter::new(output);

        writer.write_u32(LENGTHS_MAGIC)?;
        writer.write_u32(FORMAT_VERSION)?;
        writer.write_varint(self.fields.len() as u64)?;
        for (field, bytes, total) in &self.fields {
            writer.write_string(field)?;
            writer.write_varint(*total)?;
            writer.write_bytes(bytes)?;
        }
        writer.close()
    }
}

impl Default for LengthsWriter {
    fn default() -> Self {
        Self::new()
    }
}

/// Reader over the field-lengths file; columns live in memory.
#[derive(Debug)]
pub struct LengthsReader {
    columns: AHashMap<String, FieldLengthColumn>,
}

impl LengthsReader {
    /// Open and load the field-lengths file.
    pub fn open(input: Box<dyn StorageInput>) -> Result<Self> {
        let mut reader = StructReader::new(input)?;
        reader.verify_checksum()?;

        let magic = reader.read_u32()?;
        if magic != LENGTHS_MAGIC {
            return Err(QuillError::corrupt("bad field-lengths magic"));
        }
        let version = reader.read_u32()?;
        if version != FORMAT_VERSION {
            return Err(QuillError::corrupt(format!(
                "unsupported field-lengths version {version}"
            )));
        }

        let field_count = reader.read_varint()? as usize;
        let mut columns = AHashMap::with_capacity(field_count);
        for _ in 0..field_count {
            let field = reader.read_string()?;
            let total = reader.read_varint()?;
            let bytes = reader.read_bytes()?;
            columns.insert(
                field,
                FieldLengthColumn {
                    bytes: Arc::new(bytes),
                    total,
                },
            );
        }

        Ok(LengthsReader { columns })
    }

    /// An empty reader for segments without scorable fields.
    pub fn empty() -> Self {
        LengthsReader {
            columns: AHashMap::new(),
        }
    }

    /// The dense column for a field, if present.
    pub fn column(&self, field: &str) -> Option<&FieldLengthColumn> {
        self.columns.get(field)
    }

    /// Decoded length of a (doc, field) pair; `default` when missing.
    pub fn doc_field_length(&self, doc_id: u32, field: &str, default: u32) -> u32 {
        self.columns
            .get(field)
            .and_then(|column| column.bytes.get(doc_id as usize))
            .map(|&byte| byte_to_length(byte))
            .unwrap_or(default)
    }

    /// Average raw length of a field over the column's docs.
    pub fn avg_field_length(&self, field: &str) -> Option<f32> {
        self.columns.get(field).map(|column| {
            if column.bytes.is_empty() {
                0.0
            } else {
                column.total as f32 / column.bytes.len() as f32
            }
        })
    }

    /// Sum of raw lengths for a field.
    pub fn total_field_length(&self, field: &str) -> u64 {
        self.columns.get(field).map(|c| c.total).unwrap_or(0)
    }
}

/// One bit per local doc; set means deleted.
///
/// Absent on disk until the first deletion. Bits use little-endian order
/// within bytes.
#[derive(Debug, Clone, PartialEq)]
pub struct DeletionBitset {
    bits: Vec<u8>,
    doc_count: u32,
    deleted: u32,
}

impl DeletionBitset {
    /// Create an empty bitset for a segment of `doc_count` docs.
    pub fn new(doc_count: u32) -> Self {
        DeletionBitset {
            bits: vec![0; (doc_count as usize).div_ceil(8)],
            doc_count,
            deleted: 0,
        }
    }

    /// Mark a doc deleted. Returns true if it was newly deleted.
    pub fn delete(&mut self, doc_id: u32) -> bool {
        assert!(doc_id < self.doc_count, "doc id out of range");
        let byte = (doc_id / 8) as usize;
        let mask = 1u8 << (doc_id % 8);
        if self.bits[byte] & mask == 0 {
            self.bits[byte] |= mask;
            self.deleted += 1;
            true
        } else {
            false
        }
    }

    /// Whether a doc is deleted.
    pub fn is_deleted(&self, doc_id: u32) -> bool {
        if doc_id >= self.doc_count {
            return false;
        }
        let byte = (doc_id / 8) as usize;
        let mask = 1u8 << (doc_id % 8);
        self.bits[byte] & mask != 0
    }

    /// Number of deleted docs.
    pub fn deleted_count(&self) -> u32 {
        self.deleted
    }

    /// Whether no docs are deleted.
    pub fn is_empty(&self) -> bool {
        self.deleted == 0
    }

    /// Total docs covered by the bitset.
    pub fn doc_count(&self) -> u32 {
        self.doc_count
    }

    /// Write the bitset, replacing any previous file.
    pub fn write(&self, storage: &dyn Storage, name: &str) -> Result<()> {
        let output = storage.create_output(name)?;
        let mut writer = StructWriter::new(output);
        writer.write_u32(DELETES_MAGIC)?;
        writer.write_u32(FORMAT_VERSION)?;
        writer.write_varint(self.doc_count as u64)?;
        writer.write_varint(self.deleted as u64)?;
        writer.write_bytes(&self.bits)?;
        writer.close()
    }

    /// Read a bitset from storage.
    pub fn open(input: Box<dyn StorageInput>) -> Result<Self> {
        let mut reader = StructReader::new(input)?;
        reader.verify_checksum()?;

        let magic = reader.read_u32()?;
        if magic != DELETES_MAGIC {
            return Err(QuillError::corrupt("bad deletion bitset magic"));
        }
        let version = reader.read_u32()?;
        if version != FORMAT_VERSION {
            return Err(QuillError::corrupt(format!(
                "unsupported deletion bitset version {version}"
            )));
        }

        let doc_count = reader.read_varint()? as u32;
        let deleted = reader.read_varint()? as u32;
        let bits = reader.read_bytes()?;
        if bits.len() != (doc_count as usize).div_ceil(8) {
            return Err(QuillError::corrupt("deletion bitset length mismatch"));
        }

        Ok(DeletionBitset {
            bits,
            doc_count,
            deleted,
        })
    }
}
