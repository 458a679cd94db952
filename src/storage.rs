//! Storage abstraction layer for Quill.
//!
//! This module provides a pluggable storage system similar to Whoosh's
//! storage architecture. An index talks to named files through the
//! [`Storage`] trait; the two shipped backends are a file-system store and an
//! in-memory store used by most tests.
//!
//! The atomic-rename operation on a storage is the sole commit primitive the
//! index relies on: a table of contents is written under a temporary name,
//! fsynced and then renamed into place.

use std::io::{Read, Seek, Write};

use crate::error::{QuillError, Result};

pub mod file;
pub mod memory;
pub mod structured;

pub use file::{FileStorage, FileStorageConfig};
pub use memory::{MemoryStorage, MemoryStorageConfig};

/// File metadata information.
#[derive(Debug, Clone)]
pub struct FileMetadata {
    /// File size in bytes.
    pub size: u64,

    /// Last modified time (seconds since epoch).
    pub modified: u64,

    /// Whether the file is read-only.
    pub readonly: bool,
}

/// A trait for storage backends that can store and retrieve named files.
///
/// File names carry segment ids; renames provide the commit primitive.
pub trait Storage: Send + Sync + std::fmt::Debug {
    /// Open a file for reading.
    fn open_input(&self, name: &str) -> Result<Box<dyn StorageInput>>;

    /// Create a file for writing, truncating any existing file.
    fn create_output(&self, name: &str) -> Result<Box<dyn StorageOutput>>;

    /// Check if a file exists.
    fn file_exists(&self, name: &str) -> bool;

    /// Delete a file.
    fn delete_file(&self, name: &str) -> Result<()>;

    /// List all files in the storage.
    fn list_files(&self) -> Result<Vec<String>>;

    /// Get the size of a file in bytes.
    fn file_size(&self, name: &str) -> Result<u64>;

    /// Get file metadata.
    fn metadata(&self, name: &str) -> Result<FileMetadata>;

    /// Atomically rename a file.
    ///
    /// Used for atomic file replacement: write to a temporary name, then
    /// rename to the final name so readers never observe partial data.
    fn rename_file(&self, old_name: &str, new_name: &str) -> Result<()>;

    /// Create a temporary file with a unique name based on the given prefix.
    ///
    /// Returns the generated name together with a writer for it.
    fn create_temp_output(&self, prefix: &str) -> Result<(String, Box<dyn StorageOutput>)>;

    /// Acquire an advisory lock, blocking is not supported; callers retry.
    ///
    /// Returns [`QuillError::Locked`] when the lock is already held.
    fn acquire_lock(&self, name: &str) -> Result<Box<dyn StorageLock>>;

    /// Try to acquire an advisory lock, returning `None` if unavailable.
    fn try_acquire_lock(&self, name: &str) -> Result<Option<Box<dyn StorageLock>>>;

    /// Sync all pending writes to durable storage.
    fn sync(&self) -> Result<()>;
}

/// A trait for reading data from storage.
///
/// Inputs support absolute seeks and bounded slices. A slice shares the
/// underlying file but confines all reads to `[offset, offset + len)`,
/// which lets many logical files live in one physical container.
pub trait StorageInput: Read + Seek + Send + std::fmt::Debug {
    /// Get the size of the input stream.
    fn size(&self) -> Result<u64>;

    /// Clone this input stream with an independent position.
    fn clone_input(&self) -> Result<Box<dyn StorageInput>>;

    /// Create a bounded sub-reader over `[offset, offset + len)`.
    fn slice(&self, offset: u64, len: u64) -> Result<Box<dyn StorageInput>>;

    /// Close the input stream.
    fn close(&mut self) -> Result<()>;
}

/// A trait for writing data to storage.
pub trait StorageOutput: Write + Seek + Send + std::fmt::Debug {
    /// Flush buffered data and sync it to durable storage.
    fn flush_and_sync(&mut self) -> Result<()>;

    /// Get the current position in the output stream.
    fn position(&self) -> Result<u64>;

    /// Close the output stream.
    fn close(&mut self) -> Result<()>;
}

impl StorageOutput for Box<dyn StorageOutput> {
    fn flush_and_sync(&mut self) -> Result<()> {
        self.as_mut().flush_and_sync()
    }

    fn position(&self) -> Result<u64> {
        self.as_ref().position()
    }

    fn close(&mut self) -> Result<()> {
        self.as_mut().close()
    }
}

impl StorageInput for Box<dyn StorageInput> {
    fn size(&self) -> Result<u64> {
        self.as_ref().size()
    }

    fn clone_input(&self) -> Result<Box<dyn StorageInput>> {
        self.as_ref().clone_input()
    }

    fn slice(&self, offset: u64, len: u64) -> Result<Box<dyn StorageInput>> {
        self.as_ref().slice(offset, len)
    }

    fn close(&mut self) -> Result<()> {
        self.as_mut().close()
    }
}

/// An advisory lock on a resource in storage.
///
/// Dropping the lock releases it; `release` can be called explicitly to
/// observe errors.
pub trait StorageLock: Send + std::fmt::Debug {
    /// Get the name of the lock.
    fn name(&self) -> &str;

    /// Release the lock.
    fn release(&mut self) -> Result<()>;

    /// Check if the lock is still valid.
    fn is_valid(&self) -> bool;
}

/// Configuration for storage backends.
#[derive(Debug, Clone)]
pub enum StorageConfig {
    /// File-based storage configuration (includes path)
    File(FileStorageConfig),

    /// Memory-based storage configuration
    Memory(MemoryStorageConfig),
}

impl Default for StorageConfig {
    fn default() -> Self {
        StorageConfig::Memory(MemoryStorageConfig::default())
    }
}

/// A factory for creating storage instances.
pub struct StorageFactory;

impl StorageFactory {
    /// Create a new storage instance with the given configuration.
    pub fn create(config: StorageConfig) -> Result<Box<dyn Storage>> {
        match config {
            StorageConfig::Memory(mem_config) => {
                let storage = memory::MemoryStorage::new(mem_config);
                Ok(Box::new(storage))
            }
            StorageConfig::File(file_config) => {
                let path = file_config.path.clone();
                let storage = file::FileStorage::new(&path, file_config)?;
                Ok(Box::new(storage))
            }
        }
    }
}

/// Error helper for missing files, shared by the backends.
pub(crate) fn file_not_found(name: &str) -> QuillError {
    QuillError::not_found(format!("file '{name}'"))
}
