//! Posting lists and the on-disk posting block codec.
//!
//! Postings for a term are written as a sequence of blocks of up to
//! [`BLOCK_LIMIT`] postings. Each block is self-sufficient: it can be decoded
//! knowing only its offset, so random access via the dictionary's pointer
//! list never touches neighbouring blocks. Block headers carry aggregates
//! (max term frequency, min/max field length, a quality kernel) that let
//! matchers skip whole blocks that cannot contribute to the top-K.

use crate::error::{QuillError, Result};
use crate::storage::StorageInput;
use crate::storage::structured::{StructReader, StructWriter};
use crate::storage::StorageOutput;
use crate::util::fieldlen::byte_to_length;

/// Maximum number of postings per block; the final block may be short.
pub const BLOCK_LIMIT: usize = 128;

/// One posting accumulated in memory: a (term, doc) occurrence record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Posting {
    /// Local document id.
    pub doc_id: u32,
    /// Term frequency in the document, >= 1.
    pub tf: u32,
    /// Byte positions of the term within the document, strictly increasing.
    /// Empty when the field does not carry positions.
    pub positions: Vec<u32>,
}

impl Posting {
    /// Create a posting without positions.
    pub fn new(doc_id: u32, tf: u32) -> Self {
        Posting {
            doc_id,
            tf,
            positions: Vec::new(),
        }
    }

    /// Create a posting from its positions; tf is the position count.
    pub fn with_positions(doc_id: u32, positions: Vec<u32>) -> Self {
        Posting {
            doc_id,
            tf: positions.len() as u32,
            positions,
        }
    }
}

/// The in-memory posting list for one term, sorted by doc id.
#[derive(Debug, Clone, Default)]
pub struct PostingList {
    /// Postings sorted by doc id ascending.
    pub postings: Vec<Posting>,
    /// Sum of term frequencies (collection frequency contribution).
    pub total_tf: u64,
}

impl PostingList {
    /// Create an empty posting list.
    pub fn new() -> Self {
        PostingList::default()
    }

    /// Append a posting; doc ids must arrive in increasing order.
    pub fn push(&mut self, posting: Posting) {
        debug_assert!(
            self.postings
                .last()
                .map(|p| p.doc_id < posting.doc_id)
                .unwrap_or(true)
        );
        self.total_tf += posting.tf as u64;
        self.postings.push(posting);
    }

    /// Number of documents in the list.
    pub fn doc_frequency(&self) -> u32 {
        self.postings.len() as u32
    }
}

/// Pointer to one encoded block, cached in the term dictionary.
#[derive(Debug, Clone, PartialEq)]
pub struct BlockPointer {
    /// Byte offset of the block within the postings file.
    pub offset: u64,
    /// First doc id in the block.
    pub first_doc: u32,
    /// Last doc id in the block; drives block-level skipping.
    pub last_doc: u32,
    /// Maximum term frequency in the block.
    pub max_tf: u32,
    /// Minimum encoded field length in the block.
    pub min_len: u8,
    /// Scorer-independent quality kernel: max_tf over the smallest
    /// decoded length in the block. An upper bound ingredient; scorers
    /// turn it into a score bound via their own monotonic formula.
    pub quality: f32,
}

/// A decoded posting block.
#[derive(Debug, Clone)]
pub struct PostingBlock {
    /// Doc ids, strictly increasing.
    pub docs: Vec<u32>,
    /// Term frequencies, parallel to `docs`.
    pub tfs: Vec<u32>,
    /// Positions per posting, parallel to `docs`; empty vectors when the
    /// field carries no positions.
    pub positions: Vec<Vec<u32>>,
}

/// Compute the quality kernel for block aggregates.
pub fn quality_kernel(max_tf: u32, min_len: u8) -> f32 {
    max_tf as f32 / byte_to_length(min_len).max(1) as f32
}

/// Encode one term's postings as blocks, returning the pointer list.
///
/// `length_of` maps a doc id to its encoded field length byte; fields that
/// record no lengths pass a constant.
pub fn write_postings<W: StorageOutput>(
    writer: &mut StructWriter<W>,
    postings: &[Posting],
    has_positions: bool,
    length_of: &dyn Fn(u32) -> u8,
) -> Result<Vec<BlockPointer>> {
    let mut pointers = Vec::with_capacity(postings.len().div_ceil(BLOCK_LIMIT));

    for chunk in postings.chunks(BLOCK_LIMIT) {
        let offset = writer.position();

        let first_doc = chunk[0].doc_id;
        let last_doc = chunk[chunk.len() - 1].doc_id;
        let max_tf = chunk.iter().map(|p| p.tf).max().unwrap_or(0);
        let mut min_len = u8::MAX;
        let mut max_len = 0u8;
        for posting in chunk {
            let len = length_of(posting.doc_id);
            min_len = min_len.min(len);
            max_len = max_len.max(len);
        }
        let quality = quality_kernel(max_tf, min_len);

        writer.write_varint(chunk.len() as u64)?;
        writer.write_varint(first_doc as u64)?;
        writer.write_varint((last_doc - first_doc) as u64)?;
        writer.write_varint(max_tf as u64)?;
        writer.write_u8(min_len)?;
        writer.write_u8(max_len)?;
        writer.write_f32(quality)?;

        let mut prev_doc = first_doc;
        for (i, posting) in chunk.iter().enumerate() {
            let delta = if i == 0 { 0 } else { posting.doc_id - prev_doc };
            writer.write_varint(delta as u64)?;
            prev_doc = posting.doc_id;
        }
        for posting in chunk {
            writer.write_varint(posting.tf as u64)?;
        }
        if has_positions {
            for posting in chunk {
                writer.write_varint(posting.positions.len() as u64)?;
                let mut prev_pos = 0u32;
                for (i, &pos) in posting.positions.iter().enumerate() {
                    let delta = if i == 0 { pos } else { pos - prev_pos };
                    writer.write_varint(delta as u64)?;
                    prev_pos = pos;
                }
            }
        }

        pointers.push(BlockPointer {
            offset,
            first_doc,
            last_doc,
            max_tf,
            min_len,
            quality,
        });
    }

    Ok(pointers)
}

/// Decode the block at the reader's current position.
///
/// Validates the monotonicity invariants and fails with `Corrupt` when they
/// do not hold.
pub fn read_block<R: StorageInput>(
    reader: &mut StructReader<R>,
    has_positions: bool,
) -> Result<PostingBlock> {
    let count = reader.read_varint()? as usize;
    if count == 0 || count > BLOCK_LIMIT {
        return Err(QuillError::corrupt(format!(
            "posting block count {count} out of range"
        )));
    }
    let first_doc = reader.read_varint()? as u32;
    let _last_doc_span = reader.read_varint()?;
    let _max_tf = reader.read_varint()?;
    let _min_len = reader.read_u8()?;
    let _max_len = reader.read_u8()?;
    let _quality = reader.read_f32()?;

    let mut docs = Vec::with_capacity(count);
    let mut doc = first_doc;
    for i in 0..count {
        let delta = reader.read_varint()? as u32;
        if i > 0 {
            if delta == 0 {
                return Err(QuillError::corrupt("doc ids not strictly increasing"));
            }
            doc += delta;
        }
        docs.push(doc);
    }

    let mut tfs = Vec::with_capacity(count);
    for _ in 0..count {
        let tf = reader.read_varint()? as u32;
        if tf == 0 {
            return Err(QuillError::corrupt("posting with zero term frequency"));
        }
        tfs.push(tf);
    }

    let mut positions = Vec::with_capacity(count);
    if has_positions {
        for _ in 0..count {
            let pos_count = reader.read_varint()? as usize;
            let mut posting_positions = Vec::with_capacity(pos_count);
            let mut pos = 0u32;
            for i in 0..pos_count {
                let delta = reader.read_varint()? as u32;
                if i > 0 && delta == 0 {
                    return Err(QuillError::corrupt("positions not strictly increasing"));
                }
                pos = if i == 0 { delta } else { pos + delta };
                posting_positions.push(pos);
            }
            positions.push(posting_positions);
        }
    } else {
        positions.resize(count, Vec::new());
    }

    Ok(PostingBlock {
        docs,
        tfs,
        positions,
    })
}

/// How a term's postings are reachable from its dictionary entry.
#[derive(Debug, Clone, PartialEq)]
pub enum PostingsRef {
    /// Single posting stored inline in the dictionary.
    Inline(Posting),
    /// Pointer list into the postings file.
    Blocks(Vec<BlockPointer>),
}

/// A positioned cursor over one term's postings.
///
/// Walks blocks lazily: a block is decoded only when the cursor enters it,
/// and block-level skips consult the pointer list without decoding.
pub struct PostingsCursor {
    source: CursorSource,
    has_positions: bool,
    /// Index of the current block in the pointer list.
    block_index: usize,
    /// Decoded current block, if entered.
    block: Option<PostingBlock>,
    /// Index within the current block.
    slot: usize,
    active: bool,
}

enum CursorSource {
    Inline(Posting),
    Blocks {
        pointers: Vec<BlockPointer>,
        input: Box<dyn StorageInput>,
    },
}

impl std::fmt::Debug for PostingsCursor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PostingsCursor")
            .field("block_index", &self.block_index)
            .field("slot", &self.slot)
            .field("active", &self.active)
            .finish()
    }
}

impl PostingsCursor {
    /// Cursor over an inline single posting.
    pub fn inline(posting: Posting, has_positions: bool) -> Self {
        PostingsCursor {
            source: CursorSource::Inline(posting),
            has_positions,
            block_index: 0,
            block: None,
            slot: 0,
            active: true,
        }
    }

    /// Cursor over a block pointer list backed by the postings file.
    pub fn blocks(
        pointers: Vec<BlockPointer>,
        input: Box<dyn StorageInput>,
        has_positions: bool,
    ) -> Result<Self> {
        let mut cursor = PostingsCursor {
            source: CursorSource::Blocks { pointers, input },
            has_positions,
            block_index: 0,
            block: None,
            slot: 0,
            active: true,
        };
        cursor.active = cursor.enter_block(0)?;
        Ok(cursor)
    }

    fn enter_block(&mut self, index: usize) -> Result<bool> {
        match &mut self.source {
            CursorSource::Inline(_) => Ok(index == 0),
            CursorSource::Blocks { pointers, input } => {
                if index >= pointers.len() {
                    self.block = None;
                    return Ok(false);
                }
                let mut reader = StructReader::new(input.slice(
                    pointers[index].offset,
                    input.size()? - pointers[index].offset,
                )?)?;
                let block = read_block(&mut reader, self.has_positions)?;
                self.block_index = index;
                self.block = Some(block);
                self.slot = 0;
                Ok(true)
            }
        }
    }

    /// Whether the cursor is positioned on a posting.
    pub fn is_active(&self) -> bool {
        self.active
    }

    /// Current doc id. Only meaningful while active.
    pub fn doc_id(&self) -> u32 {
        match &self.source {
            CursorSource::Inline(posting) => posting.doc_id,
            CursorSource::Blocks { .. } => self.block.as_ref().map(|b| b.docs[self.slot]).unwrap_or(u32::MAX),
        }
    }

    /// Current term frequency.
    pub fn tf(&self) -> u32 {
        match &self.source {
            CursorSource::Inline(posting) => posting.tf,
            CursorSource::Blocks { .. } => self.block.as_ref().map(|b| b.tfs[self.slot]).unwrap_or(0),
        }
    }

    /// Positions of the current posting.
    pub fn positions(&self) -> &[u32] {
        match &self.source {
            CursorSource::Inline(posting) => &posting.positions,
            CursorSource::Blocks { .. } => self
                .block
                .as_ref()
                .map(|b| b.positions[self.slot].as_slice())
                .unwrap_or(&[]),
        }
    }

    /// Advance to the next posting.
    pub fn advance(&mut self) -> Result<bool> {
        if !self.active {
            return Ok(false);
        }
        match &self.source {
            CursorSource::Inline(_) => {
                self.active = false;
                Ok(false)
            }
            CursorSource::Blocks { .. } => {
                let in_block = self.block.as_ref().map(|b| b.docs.len()).unwrap_or(0);
                if self.slot + 1 < in_block {
                    self.slot += 1;
                    Ok(true)
                } else {
                    self.active = self.enter_block(self.block_index + 1)?;
                    Ok(self.active)
                }
            }
        }
    }

    /// Advance until `doc_id() >= target` or the cursor goes inactive.
    pub fn skip_to(&mut self, target: u32) -> Result<bool> {
        if !self.active {
            return Ok(false);
        }
        match &self.source {
            CursorSource::Inline(posting) => {
                if posting.doc_id < target {
                    self.active = false;
                }
                Ok(self.active)
            }
            CursorSource::Blocks { pointers, .. } => {
                // Jump whole blocks using the pointer list
                if pointers[self.block_index].last_doc < target {
                    let mut index = self.block_index + 1;
                    while index < pointers.len() && pointers[index].last_doc < target {
                        index += 1;
                    }
                    self.active = self.enter_block(index)?;
                    if !self.active {
                        return Ok(false);
                    }
                }
                // Scan within the block
                while self.doc_id() < target {
                    if !self.advance()? {
                        return Ok(false);
                    }
                }
                Ok(true)
            }
        }
    }

    /// Skip entire blocks for which `keep` returns false, positioning at the
    /// start of the first kept block at or after the current one. Returns
    /// false if no block is kept.
    ///
    /// Used for quality-based pruning: `keep` receives the block pointer so
    /// the caller can apply a scorer-specific bound.
    pub fn skip_blocks(&mut self, keep: &dyn Fn(&BlockPointer) -> bool) -> Result<bool> {
        if !self.active {
            return Ok(false);
        }
        match &self.source {
            CursorSource::Inline(_) => Ok(true),
            CursorSource::Blocks { pointers, .. } => {
                if keep(&pointers[self.block_index]) {
                    return Ok(true);
                }
                let mut index = self.block_index + 1;
                while index < pointers.len() && !keep(&pointers[index]) {
                    index += 1;
                }
                self.active = self.enter_block(index)?;
                Ok(self.active)
            }
        }
    }

    /// Exhaust the cursor unconditionally.
    pub fn deactivate(&mut self) {
        self.active = false;
        self.block = None;
    }

    /// The pointer of the block the cursor is currently in, if block-backed.
    pub fn current_block(&self) -> Option<&BlockPointer> {
        match &self.source {
            CursorSource::Inline(_) => None,
            CursorSource::Blocks { pointers, .. } => pointers.get(self.block_index),
        }
    }

    /// Total number of postings reachable from this cursor's pointer list.
    pub fn cost(&self) -> u64 {
        match &self.source {
            CursorSource::Inline(_) => 1,
            // Upper bound: all blocks full except possibly the last
            CursorSource::Blocks { pointers, .. } => (pointers.len() as u64) * BLOCK_LIMIT as u64,
        }
    }

    /// Independent positioned clone for branch-and-bound matching.
    pub fn copy_cursor(&self) -> Result<PostingsCursor> {
        let source = match &self.source {
            CursorSource::Inline(posting) => CursorSource::Inline(posting.clone()),
            CursorSource::Blocks { pointers, input } => CursorSource::Blocks {
                pointers: pointers.clone(),
                input: input.clone_input()?,
            },
        };
        Ok(PostingsCursor {
            source,
            has_positions: self.has_positions,
            block_index: self.block_index,
            block: self.block.clone(),
            slot: self.slot,
            active: self.active,
        })
    }
}
