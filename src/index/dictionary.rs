//! The term dictionary: an ordered map from term to posting metadata.
//!
//! Terms are `(field, bytes)` pairs ordered by field name, then bytes.
//! Entries carry document and collection frequencies, the block pointer
//! list into the postings file and per-term quality aggregates. Terms with
//! a single posting are stored inline, saving a posting-file round trip.
//!
//! The on-disk form is a sorted entry file loaded into a sorted vector at
//! open; lookups binary-search it and range scans walk contiguous entries.
//! Callers rely only on the lookup and iterator contract.

use crate::error::{QuillError, Result};
use crate::index::postings::{BlockPointer, Posting, PostingsRef};
use crate::storage::structured::{StructReader, StructWriter};
use crate::storage::{StorageInput, StorageOutput};

const TERMS_MAGIC: u32 = 0x51_54_52_4D; // "QTRM"
const TERMS_VERSION: u32 = 1;

const KIND_INLINE: u8 = 0;
const KIND_BLOCKS: u8 = 1;

/// A term: a field name plus opaque term bytes.
///
/// The derived ordering (field, then bytes) is the dictionary order.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TermKey {
    /// Field the term belongs to.
    pub field: String,
    /// Term bytes; the core never interprets them beyond comparison.
    pub term: Vec<u8>,
}

impl TermKey {
    /// Create a term key.
    pub fn new<F: Into<String>, T: Into<Vec<u8>>>(field: F, term: T) -> Self {
        TermKey {
            field: field.into(),
            term: term.into(),
        }
    }
}

/// Dictionary metadata for one term.
#[derive(Debug, Clone, PartialEq)]
pub struct TermInfo {
    /// Document frequency: number of documents containing the term at write
    /// time. Never decremented by later deletions.
    pub df: u32,
    /// Collection frequency: sum of term frequencies.
    pub cf: u64,
    /// Maximum term frequency across all blocks.
    pub max_tf: u32,
    /// Minimum encoded field length across all blocks.
    pub min_len: u8,
    /// Maximum per-block quality kernel.
    pub max_quality: f32,
    /// Where the postings live.
    pub postings: PostingsRef,
}

/// Segment header recorded at the front of the dictionary file.
#[derive(Debug, Clone, PartialEq)]
pub struct SegmentHeader {
    /// Generation of the commit that created the segment.
    pub generation: u64,
    /// Total documents in the segment, including deleted.
    pub doc_count_all: u32,
    /// Fingerprint of the schema the segment was written under.
    pub schema_fingerprint: String,
}

/// A sorted term dictionary for one segment.
#[derive(Debug)]
pub struct TermDictionary {
    header: SegmentHeader,
    entries: Vec<(TermKey, TermInfo)>,
}

impl TermDictionary {
    /// Build a dictionary from entries that are already sorted by key.
    pub fn from_sorted(header: SegmentHeader, entries: Vec<(TermKey, TermInfo)>) -> Result<Self> {
        for pair in entries.windows(2) {
            if pair[0].0 >= pair[1].0 {
                return Err(QuillError::corrupt("dictionary entries out of order"));
            }
        }
        Ok(TermDictionary { header, entries })
    }

    /// The segment header.
    pub fn header(&self) -> &SegmentHeader {
        &self.header
    }

    /// Number of terms.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the dictionary is empty.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Whether the dictionary contains a term.
    pub fn contains(&self, key: &TermKey) -> bool {
        self.get(key).is_some()
    }

    /// Look up a term.
    pub fn get(&self, key: &TermKey) -> Option<&TermInfo> {
        self.entries
            .binary_search_by(|(k, _)| k.cmp(key))
            .ok()
            .map(|i| &self.entries[i].1)
    }

    /// Iterate over all terms in order.
    pub fn iter(&self) -> impl Iterator<Item = &(TermKey, TermInfo)> {
        self.entries.iter()
    }

    /// Iterate starting at the first term >= `key`.
    pub fn iter_from(&self, key: &TermKey) -> impl Iterator<Item = &(TermKey, TermInfo)> {
        let start = self
            .entries
            .binary_search_by(|(k, _)| k.cmp(key))
            .unwrap_or_else(|i| i);
        self.entries[start..].iter()
    }

    /// Iterate over all terms of one field.
    pub fn iter_field<'a>(
        &'a self,
        field: &'a str,
    ) -> impl Iterator<Item = &'a (TermKey, TermInfo)> + 'a {
        self.iter_from(&TermKey::new(field, Vec::new()))
            .take_while(move |(key, _)| key.field == field)
    }

    /// Iterate over the terms of a field starting with `prefix`.
    pub fn iter_prefix<'a>(
        &'a self,
        field: &'a str,
        prefix: &'a [u8],
    ) -> impl Iterator<Item = &'a (TermKey, TermInfo)> + 'a {
        self.iter_from(&TermKey::new(field, prefix.to_vec()))
            .take_while(move |(key, _)| key.field == field && key.term.starts_with(prefix))
    }

    /// Iterate over the terms of a field within a byte range.
    ///
    /// `None` bounds are open ends; inclusivity follows the flags.
    pub fn iter_range<'a>(
        &'a self,
        field: &'a str,
        lower: Option<&'a [u8]>,
        upper: Option<&'a [u8]>,
        include_lower: bool,
        include_upper: bool,
    ) -> impl Iterator<Item = &'a (TermKey, TermInfo)> + 'a {
        let start_key = TermKey::new(field, lower.unwrap_or_default().to_vec());
        self.iter_from(&start_key)
            .skip_while(move |(key, _)| {
                !include_lower && lower.is_some_and(|lo| key.term.as_slice() == lo)
            })
            .take_while(move |(key, _)| {
                if key.field != field {
                    return false;
                }
                match upper {
                    Some(hi) if include_upper => key.term.as_slice() <= hi,
                    Some(hi) => key.term.as_slice() < hi,
                    None => true,
                }
            })
    }

    /// Write the dictionary to its on-disk form.
    pub fn write<W: StorageOutput>(&self, output: W) -> Result<()> {
        let mut writer = StructWriter::new(output);

        writer.write_u32(TERMS_MAGIC)?;
        writer.write_u32(TERMS_VERSION)?;
        writer.write_varint(self.header.generation)?;
        writer.write_varint(self.header.doc_count_all as u64)?;
        writer.write_string(&self.header.schema_fingerprint)?;
        writer.write_varint(self.entries.len() as u64)?;

        for (key, info) in &self.entries {
            writer.write_string(&key.field)?;
            writer.write_bytes(&key.term)?;
            writer.write_varint(info.df as u64)?;
            writer.write_varint(info.cf)?;
            writer.write_varint(info.max_tf as u64)?;
            writer.write_u8(info.min_len)?;
            writer.write_f32(info.max_quality)?;

            match &info.postings {
                PostingsRef::Inline(posting) => {
                    writer.write_u8(KIND_INLINE)?;
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
                PostingsRef::Blocks(pointers) => {
                    writer.write_u8(KIND_BLOCKS)?;
                    writer.write_varint(pointers.len() as u64)?;
                    let mut prev_offset = 0u64;
                    let mut prev_last = 0u32;
                    for pointer in pointers {
                        writer.write_varint(pointer.offset - prev_offset)?;
                        writer.write_varint(pointer.first_doc as u64)?;
                        writer.write_varint((pointer.last_doc - prev_last) as u64)?;
                        writer.write_varint(pointer.max_tf as u64)?;
                        writer.write_u8(pointer.min_len)?;
                        writer.write_f32(pointer.quality)?;
                        prev_offset = pointer.offset;
                        prev_last = pointer.last_doc;
                    }
                }
            }
        }

        writer.close()
    }

    /// Read a dictionary from its on-disk form, verifying the checksum.
    pub fn open<R: StorageInput>(input: R) -> Result<Self> {
        let mut reader = StructReader::new(input)?;
        reader.verify_checksum()?;

        let magic = reader.read_u32()?;
        if magic != TERMS_MAGIC {
            return Err(QuillError::corrupt("bad term dictionary magic"));
        }
        let version = reader.read_u32()?;
        if version != TERMS_VERSION {
            return Err(QuillError::corrupt(format!(
                "unsupported term dictionary version {version}"
            )));
        }

        let generation = reader.read_varint()?;
        let doc_count_all = reader.read_varint()? as u32;
        let schema_fingerprint = reader.read_string()?;
        let entry_count = reader.read_varint()? as usize;

        let mut entries = Vec::with_capacity(entry_count);
        for _ in 0..entry_count {
            let field = reader.read_string()?;
            let term = reader.read_bytes()?;
            let df = reader.read_varint()? as u32;
            let cf = reader.read_varint()?;
            let max_tf = reader.read_varint()? as u32;
            let min_len = reader.read_u8()?;
            let max_quality = reader.read_f32()?;

            let postings = match reader.read_u8()? {
                KIND_INLINE => {
                    let doc_id = reader.read_varint()? as u32;
                    let tf = reader.read_varint()? as u32;
                    let pos_count = reader.read_varint()? as usize;
                    let mut positions = Vec::with_capacity(pos_count);
                    let mut pos = 0u32;
                    for i in 0..pos_count {
                        let delta = reader.read_varint()? as u32;
                        pos = if i == 0 { delta } else { pos + delta };
                        positions.push(pos);
                    }
                    PostingsRef::Inline(Posting {
                        doc_id,
                        tf,
                        positions,
                    })
                }
                KIND_BLOCKS => {
                    let block_count = reader.read_varint()? as usize;
                    let mut pointers = Vec::with_capacity(block_count);
                    let mut prev_offset = 0u64;
                    let mut prev_last = 0u32;
                    for _ in 0..block_count {
                        let offset = prev_offset + reader.read_varint()?;
                        let first_doc = reader.read_varint()? as u32;
                        let last_doc = prev_last + reader.read_varint()? as u32;
                        let max_tf = reader.read_varint()? as u32;
                        let min_len = reader.read_u8()?;
                        let quality = reader.read_f32()?;
                        pointers.push(BlockPointer {
                            offset,
                            first_doc,
                            last_doc,
                            max_tf,
                            min_len,
                            quality,
                        });
                        prev_offset = offset;
                        prev_last = last_doc;
                    }
                    PostingsRef::Blocks(pointers)
                }
                other => {
                    return Err(QuillError::corrupt(format!(
                        "unknown postings kind {other}"
                    )));
                }
            };

            entries.push((
                TermKey { field, term },
                TermInfo {
                    df,
                    cf,
                    max_tf,
                    min_len,
                    max_quality,
                    postings,
                },
            ));
        }

        Self::from_sorted(
            SegmentHeader {
                generation,
                doc_count_all,
                schema_fingerprint,
            },
            entries,
        )
    }
}
