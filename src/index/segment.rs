//! Segment naming and metadata.
//!
//! A segment is an immutable bundle of files sharing one id: term dictionary
//! (`.trm`), posting blocks (`.pst`), per-field lengths (`.fln`), stored
//! values (`.stv`) and an optional deletion bitset (`.del`), the only file
//! ever rewritten in place.

use serde::{Deserialize, Serialize};

/// Term dictionary file extension.
pub const EXT_TERMS: &str = "trm";
/// Posting blocks file extension.
pub const EXT_POSTINGS: &str = "pst";
/// Per-field length arrays file extension.
pub const EXT_LENGTHS: &str = "fln";
/// Stored field values file extension.
pub const EXT_STORED: &str = "stv";
/// Deletion bitset file extension.
pub const EXT_DELETES: &str = "del";

/// All extensions a segment may own, in creation order.
pub const SEGMENT_EXTENSIONS: [&str; 5] =
    [EXT_TERMS, EXT_POSTINGS, EXT_LENGTHS, EXT_STORED, EXT_DELETES];

/// Build the file name for one artifact of a segment.
pub fn segment_file(segment_id: &str, ext: &str) -> String {
    format!("{segment_id}.{ext}")
}

/// Build a segment id from its allocation counter.
pub fn segment_id(counter: u64) -> String {
    format!("seg_{counter:08x}")
}

/// Whether a file name belongs to the given segment id.
pub fn belongs_to_segment(file_name: &str, segment_id: &str) -> bool {
    match file_name.rsplit_once('.') {
        Some((stem, ext)) => stem == segment_id && SEGMENT_EXTENSIONS.contains(&ext),
        None => false,
    }
}

/// Metadata for one live segment, as recorded in the TOC.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SegmentMeta {
    /// Segment id; also the stem of its file names.
    pub id: String,

    /// Generation of the commit that created this segment.
    pub generation: u64,

    /// Total number of documents, including deleted ones.
    pub doc_count_all: u32,

    /// Number of documents marked deleted.
    pub deleted: u32,

    /// Fingerprint of the schema the segment was written under. May lag
    /// the index schema after a compatible extension; the segment header
    /// must match this value exactly.
    pub schema_fingerprint: String,
}

impl SegmentMeta {
    /// Number of live (non-deleted) documents.
    pub fn doc_count(&self) -> u32 {
        self.doc_count_all - self.deleted
    }

    /// File name for one artifact of this segment.
    pub fn file(&self, ext: &str) -> String {
        segment_file(&self.id, ext)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_segment_file_names() {
        assert_eq!(segment_id(1), "seg_00000001");
        assert_eq!(segment_file("seg_00000001", EXT_TERMS), "seg_00000001.trm");
    }

    #[test]
    fn test_belongs_to_segment() {
        assert!(belongs_to_segment("seg_0000000a.pst", "seg_0000000a"));
        assert!(belongs_to_segment("seg_0000000a.del", "seg_0000000a"));
        assert!(!belongs_to_segment("seg_0000000a.pst", "seg_0000000b"));
        assert!(!belongs_to_segment("seg_0000000a.xyz", "seg_0000000a"));
        assert!(!belongs_to_segment("TOC.3", "seg_0000000a"));
    }

    #[test]
    fn test_live_doc_count() {
        let meta = SegmentMeta {
            id: segment_id(2),
            generation: 1,
            doc_count_all: 10,
            deleted: 3,
            schema_fingerprint: "cafebabe".to_string(),
        };
        assert_eq!(meta.doc_count(), 7);
    }
}
