//! File-system storage backend.
//!
//! Files live flat in a root directory. Atomic rename and fsync come straight
//! from the platform; advisory locks are exclusive-create lock files, so they
//! work across processes on any file system.

use std::fs::{self, File, OpenOptions};
use std::io::{self, BufWriter, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::UNIX_EPOCH;

use memmap2::Mmap;

use crate::error::{QuillError, Result};
use crate::storage::{
    FileMetadata, Storage, StorageInput, StorageLock, StorageOutput, file_not_found,
};

/// Configuration specific to file-based storage.
#[derive(Debug, Clone)]
pub struct FileStorageConfig {
    /// Path to the storage directory.
    pub path: PathBuf,

    /// Whether to use memory-mapped files for reading.
    pub use_mmap: bool,

    /// Buffer size for write operations (bytes).
    pub buffer_size: usize,

    /// Whether to fsync on every flush rather than only on close.
    pub sync_writes: bool,
}

impl FileStorageConfig {
    /// Create a new configuration with the given path and default settings.
    pub fn new<P: AsRef<Path>>(path: P) -> Self {
        FileStorageConfig {
            path: path.as_ref().to_path_buf(),
            use_mmap: false,
            buffer_size: 65536,
            sync_writes: false,
        }
    }
}

/// Disk-backed storage rooted at a directory.
#[derive(Debug)]
pub struct FileStorage {
    root: PathBuf,
    config: FileStorageConfig,
    temp_counter: Arc<AtomicU64>,
}

impl FileStorage {
    /// Create a new file storage, creating the root directory if needed.
    pub fn new<P: AsRef<Path>>(path: P, config: FileStorageConfig) -> Result<Self> {
        let root = path.as_ref().to_path_buf();
        fs::create_dir_all(&root)?;
        Ok(FileStorage {
            root,
            config,
            temp_counter: Arc::new(AtomicU64::new(0)),
        })
    }

    fn resolve(&self, name: &str) -> PathBuf {
        self.root.join(name)
    }

    /// Fsync the root directory so renames and deletes are durable.
    fn sync_dir(&self) -> Result<()> {
        let dir = File::open(&self.root)?;
        dir.sync_all()?;
        Ok(())
    }
}

impl Storage for FileStorage {
    fn open_input(&self, name: &str) -> Result<Box<dyn StorageInput>> {
        let path = self.resolve(name);
        let file = File::open(&path).map_err(|e| match e.kind() {
            io::ErrorKind::NotFound => file_not_found(name),
            _ => QuillError::Io(e),
        })?;
        let len = file.metadata()?.len();

        if self.config.use_mmap && len > 0 {
            // SAFETY: the segment files mapped here are immutable once
            // published; the index never writes to a file in place.
            let mmap = unsafe { Mmap::map(&file)? };
            Ok(Box::new(MmapInput {
                data: Arc::new(mmap),
                start: 0,
                len,
                position: 0,
            }))
        } else {
            Ok(Box::new(FileInput {
                file,
                start: 0,
                len,
                position: 0,
            }))
        }
    }

    fn create_output(&self, name: &str) -> Result<Box<dyn StorageOutput>> {
        let path = self.resolve(name);
        let file = OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .open(&path)?;
        Ok(Box::new(FileOutput {
            writer: BufWriter::with_capacity(self.config.buffer_size, file),
            position: 0,
            sync_writes: self.config.sync_writes,
            closed: false,
        }))
    }

    fn file_exists(&self, name: &str) -> bool {
        self.resolve(name).is_file()
    }

    fn delete_file(&self, name: &str) -> Result<()> {
        fs::remove_file(self.resolve(name)).map_err(|e| match e.kind() {
            io::ErrorKind::NotFound => file_not_found(name),
            _ => QuillError::Io(e),
        })
    }

    fn list_files(&self) -> Result<Vec<String>> {
        let mut names = Vec::new();
        for entry in fs::read_dir(&self.root)? {
            let entry = entry?;
            if entry.file_type()?.is_file() {
                if let Some(name) = entry.file_name().to_str() {
                    names.push(name.to_string());
                }
            }
        }
        names.sort();
        Ok(names)
    }

    fn file_size(&self, name: &str) -> Result<u64> {
        let meta = fs::metadata(self.resolve(name)).map_err(|e| match e.kind() {
            io::ErrorKind::NotFound => file_not_found(name),
            _ => QuillError::Io(e),
        })?;
        Ok(meta.len())
    }

    fn metadata(&self, name: &str) -> Result<FileMetadata> {
        let meta = fs::metadata(self.resolve(name)).map_err(|e| match e.kind() {
            io::ErrorKind::NotFound => file_not_found(name),
            _ => QuillError::Io(e),
        })?;
        let modified = meta
            .modified()
            .ok()
            .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
            .map(|d| d.as_secs())
            .unwrap_or(0);
        Ok(FileMetadata {
            size: meta.len(),
            modified,
            readonly: meta.permissions().readonly(),
        })
    }

    fn rename_file(&self, old_name: &str, new_name: &str) -> Result<()> {
        fs::rename(self.resolve(old_name), self.resolve(new_name))?;
        self.sync_dir()
    }

    fn create_temp_output(&self, prefix: &str) -> Result<(String, Box<dyn StorageOutput>)> {
        // Process id plus a counter keeps names unique across writers that
        // share a directory.
        let pid = std::process::id();
        loop {
            let n = self.temp_counter.fetch_add(1, Ordering::Relaxed);
            let name = format!("{prefix}{pid:x}_{n:08x}.tmp");
            if !self.file_exists(&name) {
                let output = self.create_output(&name)?;
                return Ok((name, output));
            }
        }
    }

    fn acquire_lock(&self, name: &str) -> Result<Box<dyn StorageLock>> {
        match self.try_acquire_lock(name)? {
            Some(lock) => Ok(lock),
            None => Err(QuillError::locked(name.to_string())),
        }
    }

    fn try_acquire_lock(&self, name: &str) -> Result<Option<Box<dyn StorageLock>>> {
        let path = self.resolve(name);
        match OpenOptions::new().write(true).create_new(true).open(&path) {
            Ok(_) => Ok(Some(Box::new(FileLock {
                name: name.to_string(),
                path,
                held: true,
            }))),
            Err(e) if e.kind() == io::ErrorKind::AlreadyExists => Ok(None),
            Err(e) => Err(QuillError::Io(e)),
        }
    }

    fn sync(&self) -> Result<()> {
        self.sync_dir()
    }
}

/// Buffered reader over a region of a file.
#[derive(Debug)]
struct FileInput {
    file: File,
    start: u64,
    len: u64,
    position: u64,
}

impl Read for FileInput {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if self.position >= self.len {
            return Ok(0);
        }
        let available = (self.len - self.position) as usize;
        let to_read = buf.len().min(available);
        self.file
            .seek(SeekFrom::Start(self.start + self.position))?;
        let read = self.file.read(&mut buf[..to_read])?;
        self.position += read as u64;
        Ok(read)
    }
}

impl Seek for FileInput {
    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
        let target = match pos {
            SeekFrom::Start(offset) => offset as i64,
            SeekFrom::End(offset) => self.len as i64 + offset,
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

impl StorageInput for FileInput {
    fn size(&self) -> Result<u64> {
        Ok(self.len)
    }

    fn clone_input(&self) -> Result<Box<dyn StorageInput>> {
        Ok(Box::new(FileInput {
            file: self.file.try_clone()?,
            start: self.start,
            len: self.len,
            position: 0,
        }))
    }

    fn slice(&self, offset: u64, len: u64) -> Result<Box<dyn StorageInput>> {
        if offset + len > self.len {
            return Err(QuillError::storage(format!(
                "slice [{offset}, {}) out of bounds for input of size {}",
                offset + len,
                self.len
            )));
        }
        Ok(Box::new(FileInput {
            file: self.file.try_clone()?,
            start: self.start + offset,
            len,
            position: 0,
        }))
    }

    fn close(&mut self) -> Result<()> {
        Ok(())
    }
}

/// Zero-copy reader over a memory-mapped region of a file.
#[derive(Debug)]
struct MmapInput {
    data: Arc<Mmap>,
    start: u64,
    len: u64,
    position: u64,
}

impl Read for MmapInput {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if self.position >= self.len {
            return Ok(0);
        }
        let absolute = (self.start + self.position) as usize;
        let available = (self.len - self.position) as usize;
        let to_read = buf.len().min(available);
        buf[..to_read].copy_from_slice(&self.data[absolute..absolute + to_read]);
        self.position += to_read as u64;
        Ok(to_read)
    }
}

impl Seek for MmapInput {
    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
        let target = match pos {
            SeekFrom::Start(offset) => offset as i64,
            SeekFrom::End(offset) => self.len as i64 + offset,
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

impl StorageInput for MmapInput {
    fn size(&self) -> Result<u64> {
        Ok(self.len)
    }

    fn clone_input(&self) -> Result<Box<dyn StorageInput>> {
        Ok(Box::new(MmapInput {
            data: Arc::clone(&self.data),
            start: self.start,
            len: self.len,
            position: 0,
        }))
    }

    fn slice(&self, offset: u64, len: u64) -> Result<Box<dyn StorageInput>> {
        if offset + len > self.len {
            return Err(QuillError::storage(format!(
                "slice [{offset}, {}) out of bounds for input of size {}",
                offset + len,
                self.len
            )));
        }
        Ok(Box::new(MmapInput {
            data: Arc::clone(&self.data),
            start: self.start + offset,
            len,
            position: 0,
        }))
    }

    fn close(&mut self) -> Result<()> {
        Ok(())
    }
}

/// Buffered writer over a file with explicit sync.
#[derive(Debug)]
struct FileOutput {
    writer: BufWriter<File>,
    position: u64,
    sync_writes: bool,
    closed: bool,
}

impl Write for FileOutput {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let written = self.writer.write(buf)?;
        self.position += written as u64;
        Ok(written)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.writer.flush()?;
        if self.sync_writes {
            self.writer.get_ref().sync_all()?;
        }
        Ok(())
    }
}

impl Seek for FileOutput {
    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
        self.position = self.writer.seek(pos)?;
        Ok(self.position)
    }
}

impl StorageOutput for FileOutput {
    fn flush_and_sync(&mut self) -> Result<()> {
        self.writer.flush()?;
        self.writer.get_ref().sync_all()?;
        Ok(())
    }

    fn position(&self) -> Result<u64> {
        Ok(self.position)
    }

    fn close(&mut self) -> Result<()> {
        if !self.closed {
            self.flush_and_sync()?;
            self.closed = true;
        }
        Ok(())
    }
}

/// An advisory lock held as an exclusive-create file.
#[derive(Debug)]
struct FileLock {
    name: String,
    path: PathBuf,
    held: bool,
}

impl StorageLock for FileLock {
    fn name(&self) -> &str {
        &self.name
    }

    fn release(&mut self) -> Result<()> {
        if self.held {
            fs::remove_file(&self.path)?;
            self.held = false;
        }
        Ok(())
    }

    fn is_valid(&self) -> bool {
        self.held
    }
}

impl Drop for FileLock {
    fn drop(&mut self) {
        let _ = self.release();
    }
}
