//! Index lifecycle: creation, opening, readers and writers.
//!
//! An index is a directory of immutable segments plus a table of contents
//! (`TOC.<generation>`) naming the live segment set. Readers pin the latest
//! generation at open time; a single writer, serialized by an advisory lock,
//! publishes new generations by atomic rename.

use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::error::{QuillError, Result};
use crate::schema::Schema;
use crate::storage::{FileStorage, FileStorageConfig, Storage, StorageLock};

pub mod dictionary;
pub mod doc_store;
pub mod merge;
pub mod postings;
pub mod reader;
pub mod segment;
pub mod toc;
pub mod writer;

pub use dictionary::{TermDictionary, TermInfo, TermKey};
pub use merge::MergePolicy;
pub use reader::{IndexReader, SegmentReader};
pub use toc::Toc;
pub use writer::{BufferedWriter, IndexWriter, WriterConfig};

/// Name of the advisory lock file serializing writers.
pub const WRITE_LOCK: &str = "write.lock";

/// Options recognized when opening an index.
#[derive(Debug, Clone)]
pub struct OpenOptions {
    /// Refuse writer creation when set.
    pub readonly: bool,

    /// How long to wait for the write lock before failing with `Locked`.
    /// Zero means a single non-blocking attempt.
    pub lock_timeout_ms: u64,

    /// Use memory-mapped reads. Only honored by the directory-opening
    /// convenience constructors; a caller-supplied storage keeps its own
    /// configuration.
    pub mmap: bool,
}

impl Default for OpenOptions {
    fn default() -> Self {
        OpenOptions {
            readonly: false,
            lock_timeout_ms: 5000,
            mmap: false,
        }
    }
}

/// Handle to an index in some storage.
///
/// The handle itself is cheap: it holds the storage and open options.
/// Readers and writers are created on demand and hold their own state.
#[derive(Debug, Clone)]
pub struct Index {
    storage: Arc<dyn Storage>,
    options: OpenOptions,
}

impl Index {
    /// Create a new empty index in the given storage.
    ///
    /// Fails if the storage already contains an index.
    pub fn create(
        storage: Arc<dyn Storage>,
        schema: Schema,
        options: OpenOptions,
    ) -> Result<Self> {
        if Toc::latest_generation(storage.as_ref())?.is_some() {
            return Err(QuillError::storage(
                "storage already contains an index".to_string(),
            ));
        }
        let toc = Toc::empty(schema);
        toc.write(storage.as_ref())?;
        Ok(Index { storage, options })
    }

    /// Open an existing index in the given storage.
    pub fn open(storage: Arc<dyn Storage>, options: OpenOptions) -> Result<Self> {
        if Toc::latest_generation(storage.as_ref())?.is_none() {
            return Err(QuillError::not_found("no TOC in storage".to_string()));
        }
        Ok(Index { storage, options })
    }

    /// Create a new index in a file-system directory.
    pub fn create_dir<P: AsRef<std::path::Path>>(
        path: P,
        schema: Schema,
        options: OpenOptions,
    ) -> Result<Self> {
        let mut config = FileStorageConfig::new(path.as_ref());
        config.use_mmap = options.mmap;
        let storage = Arc::new(FileStorage::new(path.as_ref(), config)?);
        Self::create(storage, schema, options)
    }

    /// Open an existing index in a file-system directory.
    pub fn open_dir<P: AsRef<std::path::Path>>(path: P, options: OpenOptions) -> Result<Self> {
        let mut config = FileStorageConfig::new(path.as_ref());
        config.use_mmap = options.mmap;
        let storage = Arc::new(FileStorage::new(path.as_ref(), config)?);
        Self::open(storage, options)
    }

    /// The storage backing this index.
    pub fn storage(&self) -> &Arc<dyn Storage> {
        &self.storage
    }

    /// The schema recorded in the latest committed generation.
    pub fn schema(&self) -> Result<Schema> {
        let toc = Toc::load_latest(self.storage.as_ref())?
            .ok_or_else(|| QuillError::not_found("no TOC in storage".to_string()))?;
        Ok(toc.schema)
    }

    /// Open a reader pinned to the latest committed generation.
    pub fn reader(&self) -> Result<IndexReader> {
        IndexReader::open(Arc::clone(&self.storage))
    }

    /// Create a writer, acquiring the index write lock.
    ///
    /// At most one writer may exist per index; a second call fails with
    /// [`QuillError::Locked`] once the lock timeout elapses.
    pub fn writer(&self, config: WriterConfig) -> Result<IndexWriter> {
        if self.options.readonly {
            return Err(QuillError::read_only(
                "index opened with readonly: true".to_string(),
            ));
        }
        let lock = acquire_write_lock(self.storage.as_ref(), self.options.lock_timeout_ms)?;
        IndexWriter::new(Arc::clone(&self.storage), config, lock)
    }
}

/// Acquire the index write lock, retrying until the timeout elapses.
fn acquire_write_lock(storage: &dyn Storage, timeout_ms: u64) -> Result<Box<dyn StorageLock>> {
    let deadline = Instant::now() + Duration::from_millis(timeout_ms);
    loop {
        if let Some(lock) = storage.try_acquire_lock(WRITE_LOCK)? {
            return Ok(lock);
        }
        if Instant::now() >= deadline {
            return Err(QuillError::locked(WRITE_LOCK.to_string()));
        }
        std::thread::sleep(Duration::from_millis(20));
    }
}
