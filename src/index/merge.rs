//! Merge policy and segment merging.
//!
//! Segments are grouped into logarithmic size tiers by live doc count; when
//! enough segments accumulate in one tier they are merged into a single
//! segment, dropping deleted documents in the process. `optimize` is the
//! degenerate case of merging every segment into one.

use rayon::prelude::*;

use crate::error::Result;
use crate::index::doc_store::{LengthsWriter, StoredWriter};
use crate::index::postings::Posting;
use crate::index::reader::SegmentReader;
use crate::index::segment::SegmentMeta;
use crate::index::writer::SegmentBuilder;
use crate::schema::Schema;
use crate::storage::Storage;
use crate::util::fieldlen::byte_to_length;

/// Tiered merge policy.
///
/// A segment's tier is the logarithm (base `tier_factor`) of its live doc
/// count; a tier holding at least `min_segments` segments is merged whole.
#[derive(Debug, Clone)]
pub struct MergePolicy {
    /// Size ratio between adjacent tiers.
    pub tier_factor: f64,

    /// Segment count in one tier that triggers a merge.
    pub min_segments: usize,
}

impl Default for MergePolicy {
    fn default() -> Self {
        MergePolicy {
            tier_factor: 10.0,
            min_segments: 4,
        }
    }
}

impl MergePolicy {
    /// Tier of a segment with `doc_count` live docs.
    pub fn tier(&self, doc_count: u32) -> u32 {
        if doc_count <= 1 {
            return 0;
        }
        (doc_count as f64).log(self.tier_factor).floor() as u32
    }

    /// Select groups of segments to merge, largest tiers first.
    pub fn select_merges(&self, segments: &[SegmentMeta]) -> Vec<Vec<SegmentMeta>> {
        let mut tiers: Vec<(u32, Vec<SegmentMeta>)> = Vec::new();
        for meta in segments {
            let tier = self.tier(meta.doc_count());
            match tiers.iter_mut().find(|(t, _)| *t == tier) {
                Some((_, group)) => group.push(meta.clone()),
                None => tiers.push((tier, vec![meta.clone()])),
            }
        }

        tiers.sort_by(|a, b| b.0.cmp(&a.0));
        tiers
            .into_iter()
            .filter(|(_, group)| group.len() >= self.min_segments)
            .map(|(_, group)| group)
            .collect()
    }
}

/// Execute planned merges, sequentially or with rayon when `procs` > 1.
///
/// Each plan entry pairs the source segments with the id of the segment to
/// build. Returns the metadata of the merged segments.
pub(crate) fn execute_merges(
    storage: &dyn Storage,
    schema: &Schema,
    planned: &[(Vec<SegmentMeta>, String)],
    generation: u64,
    procs: usize,
) -> Result<Vec<SegmentMeta>> {
    let run = |(group, target_id): &(Vec<SegmentMeta>, String)| -> Result<SegmentMeta> {
        merge_segments(storage, schema, group, target_id, generation)
    };

    if procs > 1 && planned.len() > 1 {
        planned.par_iter().map(run).collect()
    } else {
        planned.iter().map(run).collect()
    }
}

/// Merge source segments into one new segment, dropping deleted docs.
pub fn merge_segments(
    storage: &dyn Storage,
    schema: &Schema,
    sources: &[SegmentMeta],
    target_id: &str,
    generation: u64,
) -> Result<SegmentMeta> {
    let readers: Vec<SegmentReader> = sources
        .iter()
        .map(|meta| SegmentReader::open(storage, meta.clone()))
        .collect::<Result<_>>()?;

    // Renumber live docs densely across sources, in source order
    let mut renumber: Vec<Vec<Option<u32>>> = Vec::with_capacity(readers.len());
    let mut live_count = 0u32;
    for reader in &readers {
        let mut map = Vec::with_capacity(reader.doc_count_all() as usize);
        for doc in 0..reader.doc_count_all() {
            if reader.is_deleted(doc) {
                map.push(None);
            } else {
                map.push(Some(live_count));
                live_count += 1;
            }
        }
        renumber.push(map);
    }

    // Merged length columns; totals are recomputed from the lossy bytes
    let mut lengths_writer = LengthsWriter::new();
    let mut merged_lengths: Vec<(String, Vec<u8>)> = Vec::new();
    for field in schema.scorable_fields() {
        let mut bytes = Vec::with_capacity(live_count as usize);
        let mut total = 0u64;
        let mut any = false;
        for (reader, map) in readers.iter().zip(&renumber) {
            let column = reader.length_column(field);
            any |= column.is_some();
            for doc in 0..reader.doc_count_all() {
                if map[doc as usize].is_none() {
                    continue;
                }
                let byte = column
                    .and_then(|c| c.bytes.get(doc as usize).copied())
                    .unwrap_or(0);
                bytes.push(byte);
                total += byte_to_length(byte) as u64;
            }
        }
        if any {
            lengths_writer.add_field(field, bytes.clone(), total);
            merged_lengths.push((field.to_string(), bytes));
        }
    }

    // Merged stored records
    let mut stored_writer = StoredWriter::new();
    for (reader, map) in readers.iter().zip(&renumber) {
        for doc in 0..reader.doc_count_all() {
            if map[doc as usize].is_some() {
                stored_writer.push(reader.stored_fields(doc)?);
            }
        }
    }

    // K-way dictionary merge: all per-segment dictionaries are sorted, so a
    // peekable-min walk yields terms in order
    let mut builder = SegmentBuilder::new(storage, target_id, generation, schema.fingerprint())?;
    let mut iters: Vec<_> = readers
        .iter()
        .map(|reader| reader.dictionary().iter().peekable())
        .collect();

    loop {
        let min_key = iters
            .iter_mut()
            .filter_map(|iter| iter.peek().map(|(key, _)| key))
            .min()
            .cloned();
        let Some(min_key) = min_key else {
            break;
        };

        let has_positions = schema
            .get(&min_key.field)
            .map(|kind| kind.has_positions())
            .unwrap_or(false);

        let mut postings: Vec<Posting> = Vec::new();
        for (source_index, iter) in iters.iter_mut().enumerate() {
            let matches = iter
                .peek()
                .map(|(key, _)| *key == min_key)
                .unwrap_or(false);
            if !matches {
                continue;
            }
            let (_, info) = iter.next().expect("peeked entry");
            let mut cursor = readers[source_index].cursor_for(info, has_positions)?;
            while cursor.is_active() {
                if let Some(new_doc) = renumber[source_index][cursor.doc_id() as usize] {
                    postings.push(Posting {
                        doc_id: new_doc,
                        tf: cursor.tf(),
                        positions: cursor.positions().to_vec(),
                    });
                }
                cursor.advance()?;
            }
        }

        if postings.is_empty() {
            continue;
        }

        let column = merged_lengths
            .iter()
            .find(|(field, _)| *field == min_key.field)
            .map(|(_, bytes)| bytes);
        let length_of = |doc: u32| -> u8 {
            column
                .and_then(|bytes| bytes.get(doc as usize).copied())
                .unwrap_or(0)
        };
        builder.add_term(min_key, &postings, has_positions, &length_of)?;
    }

    builder.finish(storage, live_count, lengths_writer, stored_writer)?;

    Ok(SegmentMeta {
        id: target_id.to_string(),
        generation,
        doc_count_all: live_count,
        deleted: 0,
        schema_fingerprint: schema.fingerprint(),
    })
}
