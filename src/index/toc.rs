//! Table of contents: the commit point of an index.
//!
//! `TOC.<generation>` is a small JSON file listing the live segments, the
//! schema and the segment-id allocation counter. Readers discover the latest
//! generation by listing the directory; writers publish a new generation by
//! writing `TOC.<gen>.tmp`, fsyncing it and renaming it into place. The
//! rename is the linearization point of a commit.

use std::io::{Read, Write};

use serde::{Deserialize, Serialize};

use crate::error::{QuillError, Result};
use crate::index::segment::{SegmentMeta, belongs_to_segment, segment_id};
use crate::schema::Schema;
use crate::storage::Storage;

const TOC_PREFIX: &str = "TOC.";

/// The table of contents of one committed generation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Toc {
    /// Generation number of this commit.
    pub generation: u64,

    /// Allocation counter for segment ids.
    pub segment_counter: u64,

    /// Schema at this generation.
    pub schema: Schema,

    /// Fingerprint of `schema`, verified against segment headers on open.
    pub schema_fingerprint: String,

    /// Live segments, in creation order.
    pub segments: Vec<SegmentMeta>,
}

impl Toc {
    /// The TOC of a freshly created index: generation 1, no segments.
    pub fn empty(schema: Schema) -> Self {
        let schema_fingerprint = schema.fingerprint();
        Toc {
            generation: 1,
            segment_counter: 0,
            schema,
            schema_fingerprint,
            segments: Vec::new(),
        }
    }

    /// File name of the TOC for a generation.
    pub fn file_name(generation: u64) -> String {
        format!("{TOC_PREFIX}{generation}")
    }

    /// Allocate the next segment id, advancing the counter.
    pub fn next_segment_id(&mut self) -> String {
        self.segment_counter += 1;
        segment_id(self.segment_counter)
    }

    /// Find the highest committed generation in storage, if any.
    ///
    /// Temporary files (`TOC.<gen>.tmp`) left by a crashed commit are
    /// ignored: only a completed rename makes a generation current.
    pub fn latest_generation(storage: &dyn Storage) -> Result<Option<u64>> {
        let mut latest = None;
        for name in storage.list_files()? {
            if let Some(gen) = parse_toc_name(&name) {
                latest = latest.max(Some(gen));
            }
        }
        Ok(latest)
    }

    /// Load the TOC for a specific generation.
    pub fn load(storage: &dyn Storage, generation: u64) -> Result<Toc> {
        let mut input = storage.open_input(&Self::file_name(generation))?;
        let mut bytes = Vec::new();
        input.read_to_end(&mut bytes)?;
        let toc: Toc =
            serde_json::from_slice(&bytes).map_err(|e| QuillError::corrupt(format!(
                "unreadable TOC.{generation}: {e}"
            )))?;
        if toc.generation != generation {
            return Err(QuillError::corrupt(format!(
                "TOC.{generation} claims generation {}",
                toc.generation
            )));
        }
        Ok(toc)
    }

    /// Load the latest committed TOC, if any.
    pub fn load_latest(storage: &dyn Storage) -> Result<Option<Toc>> {
        match Self::latest_generation(storage)? {
            Some(generation) => Ok(Some(Self::load(storage, generation)?)),
            None => Ok(None),
        }
    }

    /// Publish this TOC: write to a temporary name, fsync, atomic rename.
    pub fn write(&self, storage: &dyn Storage) -> Result<()> {
        let final_name = Self::file_name(self.generation);
        let tmp_name = format!("{final_name}.tmp");

        let mut output = storage.create_output(&tmp_name)?;
        let bytes = serde_json::to_vec_pretty(self)?;
        output.write_all(&bytes)?;
        output.flush_and_sync()?;
        output.close()?;

        storage.rename_file(&tmp_name, &final_name)
    }

    /// Best-effort deletion of files no generation needs anymore:
    /// older TOCs, leftover `.tmp` files and segment files this TOC does
    /// not reference.
    pub fn clean_orphans(&self, storage: &dyn Storage) {
        let live: Vec<&str> = self.segments.iter().map(|meta| meta.id.as_str()).collect();

        let Ok(names) = storage.list_files() else {
            return;
        };
        for name in names {
            let stale_toc = parse_toc_name(&name).is_some_and(|gen| gen < self.generation);
            let stale_tmp = name.ends_with(".tmp");
            let stale_segment = name.contains('.')
                && !name.starts_with(TOC_PREFIX)
                && !stale_tmp
                && live.iter().all(|id| !belongs_to_segment(&name, id))
                && is_segment_file(&name);

            if stale_toc || stale_tmp || stale_segment {
                let _ = storage.delete_file(&name);
            }
        }
    }
}

fn parse_toc_name(name: &str) -> Option<u64> {
    name.strip_prefix(TOC_PREFIX)
        .and_then(|rest| rest.parse::<u64>().ok())
}

fn is_segment_file(name: &str) -> bool {
    match name.rsplit_once('.') {
        Some((stem, ext)) => {
            stem.starts_with("seg_")
                && crate::index::segment::SEGMENT_EXTENSIONS.contains(&ext)
        }
        None => false,
    }
}
