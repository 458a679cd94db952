//! In-memory storage backend, primarily for tests and temporary indexes.

use std::io::{self, Read, Seek, SeekFrom, Write};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use ahash::AHashMap;
use parking_lot::Mutex;

use crate::error::{QuillError, Result};
use crate::storage::{
    FileMetadata, Storage, StorageInput, StorageLock, StorageOutput, file_not_found,
};

/// Configuration specific to memory-based storage.
#[derive(Debug, Clone)]
pub struct MemoryStorageConfig {
    /// Initial capacity hint for the file map.
    pub initial_capacity: usize,
}

impl Default for MemoryStorageConfig {
    fn default() -> Self {
        MemoryStorageConfig {
            initial_capacity: 16,
        }
    }
}

#[derive(Debug, Default)]
struct MemoryFiles {
    files: AHashMap<String, Arc<Vec<u8>>>,
    locks: AHashMap<String, ()>,
}

/// An in-memory storage backend.
///
/// Files are byte buffers behind a shared map. Finished files are immutable
/// (`Arc<Vec<u8>>`), so readers are cheap clones that never observe partial
/// writes: an output buffers locally and installs its bytes on close.
#[derive(Debug, Clone)]
pub struct MemoryStorage {
    inner: Arc<Mutex<MemoryFiles>>,
    temp_counter: Arc<AtomicU64>,
}

impl MemoryStorage {
    /// Create a new in-memory storage.
    pub fn new(config: MemoryStorageConfig) -> Self {
        MemoryStorage {
            inner: Arc::new(Mutex::new(MemoryFiles {
                files: AHashMap::with_capacity(config.initial_capacity),
                locks: AHashMap::new(),
            })),
            temp_counter: Arc::new(AtomicU64::new(0)),
        }
    }
}

impl Storage for MemoryStorage {
    fn open_input(&self, name: &str) -> Result<Box<dyn StorageInput>> {
        let inner = self.inner.lock();
        let data = inner
            .files
            .get(name)
            .cloned()
            .ok_or_else(|| file_not_found(name))?;
        Ok(Box::new(MemoryInput {
            data,
            start: 0,
            len_limit: None,
            position: 0,
        }))
    }

    fn create_output(&self, name: &str) -> Result<Box<dyn StorageOutput>> {
        Ok(Box::new(MemoryOutput {
            name: name.to_string(),
            buffer: Vec::new(),
            position: 0,
            storage: Arc::clone(&self.inner),
            closed: false,
        }))
    }

    fn file_exists(&self, name: &str) -> bool {
        self.inner.lock().files.contains_key(name)
    }

    fn delete_file(&self, name: &str) -> Result<()> {
        self.inner
            .lock()
            .files
            .remove(name)
            .map(|_| ())
            .ok_or_else(|| file_not_found(name))
    }

    fn list_files(&self) -> Result<Vec<String>> {
        let mut names: Vec<String> = self.inner.lock().files.keys().cloned().collect();
        names.sort();
        Ok(names)
    }

    fn file_size(&self, name: &str) -> Result<u64> {
        let inner = self.inner.lock();
        inner
            .files
            .get(name)
            .map(|data| data.len() as u64)
            .ok_or_else(|| file_not_found(name))
    }

    fn metadata(&self, name: &str) -> Result<FileMetadata> {
        Ok(FileMetadata {
            size: self.file_size(name)?,
            modified: 0,
            readonly: false,
        })
    }

    fn rename_file(&self, old_name: &str, new_name: &str) -> Result<()> {
        let mut inner = self.inner.lock();
        let data = inner
            .files
            .remove(old_name)
            .ok_or_else(|| file_not_found(old_name))?;
        inner.files.insert(new_name.to_string(), data);
        Ok(())
    }

    fn create_temp_output(&self, prefix: &str) -> Result<(String, Box<dyn StorageOutput>)> {
        let n = self.temp_counter.fetch_add(1, Ordering::Relaxed);
        let name = format!("{prefix}{n:08x}.tmp");
        let output = self.create_output(&name)?;
        Ok((name, output))
    }

    fn acquire_lock(&self, name: &str) -> Result<Box<dyn StorageLock>> {
        match self.try_acquire_lock(name)? {
            Some(lock) => Ok(lock),
            None => Err(QuillError::locked(name.to_string())),
        }
    }

    fn try_acquire_lock(&self, name: &str) -> Result<Option<Box<dyn StorageLock>>> {
        let mut inner = self.inner.lock();
        if inner.locks.contains_key(name) {
            return Ok(None);
        }
        inner.locks.insert(name.to_string(), ());
        Ok(Some(Box::new(MemoryLock {
            name: name.to_string(),
            storage: Arc::clone(&self.inner),
            held: true,
        })))
    }

    fn sync(&self) -> Result<()> {
        Ok(())
    }
}

/// A reader over an immutable in-memory file, optionally bounded to a slice.
#[derive(Debug)]
struct MemoryInput {
    data: Arc<Vec<u8>>,
    start: u64,
    len_limit: Option<u64>,
    position: u64,
}

impl MemoryInput {
    fn len(&self) -> u64 {
        match self.len_limit {
            Some(limit) => limit,
            None => self.data.len() as u64 - self.start,
        }
    }
}

impl Read for MemoryInput {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let len = self.len();
        if self.position >= len {
            return Ok(0);
        }
        let absolute = (self.start + self.position) as usize;
        let available = (len - self.position) as usize;
        let to_read = buf.len().min(available);
        buf[..to_read].copy_from_slice(&self.data[absolute..absolute + to_read]);
        self.position += to_read as u64;
        Ok(to_read)
    }
}

impl Seek for MemoryInput {
    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
        let len = self.len() as i64;
        let target = match pos {
            SeekFrom::Start(offset) => offset as i64,
            SeekFrom::End(offset) => len + offset,
            SeekFrom::Current(offset) => self.position as i64 + offset,
        };
        if target < 0 {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "seek before start",
            ));
        }
        self.position = target as u64;
        Ok(self.position)
    }
}

impl StorageInput for MemoryInput {
    fn size(&self) -> Result<u64> {
        Ok(self.len())
    }

    fn clone_input(&self) -> Result<Box<dyn StorageInput>> {
        Ok(Box::new(MemoryInput {
            data: Arc::clone(&self.data),
            start: self.start,
            len_limit: self.len_limit,
            position: 0,
        }))
    }

    fn slice(&self, offset: u64, len: u64) -> Result<Box<dyn StorageInput>> {
        if offset + len > self.len() {
            return Err(QuillError::storage(format!(
                "slice [{offset}, {}) out of bounds for input of size {}",
                offset + len,
                self.len()
            )));
        }
        Ok(Box::new(MemoryInput {
            data: Arc::clone(&self.data),
            start: self.start + offset,
            len_limit: Some(len),
            position: 0,
        }))
    }

    fn close(&mut self) -> Result<()> {
        Ok(())
    }
}

/// A writer that buffers locally and publishes the file on close.
#[derive(Debug)]
struct MemoryOutput {
    name: String,
    buffer: Vec<u8>,
    position: u64,
    storage: Arc<Mutex<MemoryFiles>>,
    closed: bool,
}

impl MemoryOutput {
    fn publish(&mut self) {
        let mut inner = self.storage.lock();
        inner
            .files
            .insert(self.name.clone(), Arc::new(self.buffer.clone()));
    }
}

impl Write for MemoryOutput {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let pos = self.position as usize;
        if pos + buf.len() > self.buffer.len() {
            self.buffer.resize(pos + buf.len(), 0);
        }
        self.buffer[pos..pos + buf.len()].copy_from_slice(buf);
        self.position += buf.len() as u64;
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl Seek for MemoryOutput {
    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
        let target = match pos {
            SeekFrom::Start(offset) => offset as i64,
            SeekFrom::End(offset) => self.buffer.len() as i64 + offset,
            SeekFrom::Current(offset) => self.position as i64 + offset,
        };
        if target < 0 {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "seek before start",
            ));
        }
        self.position = target as u64;
        Ok(self.position)
    }
}

impl StorageOutput for MemoryOutput {
    fn flush_and_sync(&mut self) -> Result<()> {
        self.publish();
        Ok(())
    }

    fn position(&self) -> Result<u64> {
        Ok(self.position)
    }

    fn close(&mut self) -> Result<()> {
        if !self.closed {
            self.publish();
            self.closed = true;
        }
        Ok(())
    }
}

impl Drop for MemoryOutput {
    fn drop(&mut self) {
        if !self.closed {
            self.publish();
        }
    }
}

/// An advisory lock backed by an entry in the shared lock table.
#[derive(Debug)]
struct MemoryLock {
    name: String,
    storage: Arc<Mutex<MemoryFiles>>,
    held: bool,
}

impl StorageLock for MemoryLock {
    fn name(&self) -> &str {
        &self.name
    }

    fn release(&mut self) -> Result<()> {
        if self.held {
            self.storage.lock().locks.remove(&self.name);
            self.held = false;
        }
        Ok(())
    }

    fn is_valid(&self) -> bool {
        self.held
    }
}

impl Drop for MemoryLock {
    fn drop(&mut self) {
        let _ = self.release();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn new_storage() -> MemoryStorage {
        MemoryStorage::new(MemoryStorageConfig::default())
    }

    #[test]
    fn test_write_and_read_back() {
        let storage = new_storage();

        let mut output = storage.create_output("test.bin").unwrap();
        output.write_all(b"hello quill").unwrap();
        output.close().unwrap();

        let mut input = storage.open_input("test.bin").unwrap();
        let mut buffer = Vec::new();
        input.read_to_end(&mut buffer).unwrap();
        assert_eq!(buffer, b"hello quill");
    }

    #[test]
    fn test_missing_file() {
        let storage = new_storage();
        assert!(storage.open_input("nope.bin").is_err());
        assert!(storage.delete_file("nope.bin").is_err());
    }

    #[test]
    fn test_rename_is_atomic_replacement() {
        let storage = new_storage();

        let mut output = storage.create_output("a.tmp").unwrap();
        output.write_all(b"payload").unwrap();
        output.close().unwrap();

        storage.rename_file("a.tmp", "a.bin").unwrap();
        assert!(!storage.file_exists("a.tmp"));
        assert!(storage.file_exists("a.bin"));
        assert_eq!(storage.file_size("a.bin").unwrap(), 7);
    }

    #[test]
    fn test_slice_bounds_reads() {
        let storage = new_storage();

        let mut output = storage.create_output("data.bin").unwrap();
        output.write_all(b"0123456789").unwrap();
        output.close().unwrap();

        let input = storage.open_input("data.bin").unwrap();
        let mut slice = input.slice(2, 4).unwrap();
        assert_eq!(slice.size().unwrap(), 4);

        let mut buffer = Vec::new();
        slice.read_to_end(&mut buffer).unwrap();
        assert_eq!(buffer, b"2345");

        // Out-of-bounds slice is rejected
        assert!(input.slice(8, 4).is_err());
    }

    #[test]
    fn test_readers_see_snapshot() {
        let storage = new_storage();

        let mut output = storage.create_output("v.bin").unwrap();
        output.write_all(b"one").unwrap();
        output.close().unwrap();

        let mut reader = storage.open_input("v.bin").unwrap();

        // Overwrite after the reader is opened
        let mut output = storage.create_output("v.bin").unwrap();
        output.write_all(b"two").unwrap();
        output.close().unwrap();

        let mut buffer = Vec::new();
        reader.read_to_end(&mut buffer).unwrap();
        assert_eq!(buffer, b"one");
    }

    #[test]
    fn test_locks_are_exclusive() {
        let storage = new_storage();

        let lock = storage.acquire_lock("write.lock").unwrap();
        assert!(lock.is_valid());
        assert!(storage.try_acquire_lock("write.lock").unwrap().is_none());
        assert!(matches!(
            storage.acquire_lock("write.lock"),
            Err(QuillError::Locked(_))
        ));

        drop(lock);
        assert!(storage.try_acquire_lock("write.lock").unwrap().is_some());
    }

    #[test]
    fn test_temp_output_names_are_unique() {
        let storage = new_storage();
        let (name_a, mut out_a) = storage.create_temp_output("spill_").unwrap();
        let (name_b, mut out_b) = storage.create_temp_output("spill_").unwrap();
        assert_ne!(name_a, name_b);
        out_a.close().unwrap();
        out_b.close().unwrap();
    }
}
