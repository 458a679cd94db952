//! Structured file I/O for binary data serialization.
//!
//! This module provides binary serialization for the index file formats,
//! similar to Whoosh's structfile layer. Writers keep a running crc32 and
//! append it on close; readers can verify the trailing checksum against the
//! body.
//!
//! The ordered numeric encodings ([`encode_i64_ordered`],
//! [`encode_f64_ordered`]) produce big-endian byte strings whose
//! lexicographic order equals numeric order, which range scans over numeric
//! terms rely on.

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};

use crate::error::{QuillError, Result};
use crate::storage::{StorageInput, StorageOutput};
use crate::util::varint::{zigzag_decode, zigzag_encode};

/// Size in bytes of the trailing checksum written by [`StructWriter::close`].
pub const CHECKSUM_LEN: u64 = 4;

/// Encode an i64 so lexicographic byte order equals numeric order.
///
/// Flips the sign bit and writes big-endian.
pub fn encode_i64_ordered(value: i64) -> [u8; 8] {
    ((value as u64) ^ 0x8000_0000_0000_0000).to_be_bytes()
}

/// Decode an i64 from its order-preserving encoding.
pub fn decode_i64_ordered(bytes: [u8; 8]) -> i64 {
    (u64::from_be_bytes(bytes) ^ 0x8000_0000_0000_0000) as i64
}

/// Encode an f64 so lexicographic byte order equals numeric order.
///
/// Positive values get the sign bit flipped; negative values get all bits
/// flipped. Written big-endian.
pub fn encode_f64_ordered(value: f64) -> [u8; 8] {
    let bits = value.to_bits();
    let mapped = if bits & 0x8000_0000_0000_0000 != 0 {
        !bits
    } else {
        bits | 0x8000_0000_0000_0000
    };
    mapped.to_be_bytes()
}

/// Decode an f64 from its order-preserving encoding.
pub fn decode_f64_ordered(bytes: [u8; 8]) -> f64 {
    let mapped = u64::from_be_bytes(bytes);
    let bits = if mapped & 0x8000_0000_0000_0000 != 0 {
        mapped & !0x8000_0000_0000_0000
    } else {
        !mapped
    };
    f64::from_bits(bits)
}

/// A structured file writer for binary data.
pub struct StructWriter<W: StorageOutput> {
    writer: W,
    hasher: crc32fast::Hasher,
    position: u64,
}

impl<W: StorageOutput> StructWriter<W> {
    /// Create a new structured file writer.
    pub fn new(writer: W) -> Self {
        StructWriter {
            writer,
            hasher: crc32fast::Hasher::new(),
            position: 0,
        }
    }

    /// Write a u8 value.
    pub fn write_u8(&mut self, value: u8) -> Result<()> {
        self.writer.write_u8(value)?;
        self.update_checksum(&[value]);
        self.position += 1;
        Ok(())
    }

    /// Write a u32 value (little-endian).
    pub fn write_u32(&mut self, value: u32) -> Result<()> {
        self.writer.write_u32::<LittleEndian>(value)?;
        self.update_checksum(&value.to_le_bytes());
        self.position += 4;
        Ok(())
    }

    /// Write a u64 value (little-endian).
    pub fn write_u64(&mut self, value: u64) -> Result<()> {
        self.writer.write_u64::<LittleEndian>(value)?;
        self.update_checksum(&value.to_le_bytes());
        self.position += 8;
        Ok(())
    }

    /// Write a variable-length integer.
    pub fn write_varint(&mut self, value: u64) -> Result<()> {
        let encoded = crate::util::varint::encode_u64(value);
        self.writer.write_all(&encoded)?;
        self.update_checksum(&encoded);
        self.position += encoded.len() as u64;
        Ok(())
    }

    /// Write a signed variable-length integer using zig-zag encoding.
    pub fn write_varint_signed(&mut self, value: i64) -> Result<()> {
        self.write_varint(zigzag_encode(value))
    }

    /// Write a f32 value (little-endian).
    pub fn write_f32(&mut self, value: f32) -> Result<()> {
        self.writer.write_f32::<LittleEndian>(value)?;
        self.update_checksum(&value.to_le_bytes());
        self.position += 4;
        Ok(())
    }

    /// Write a f64 in the order-preserving big-endian encoding.
    pub fn write_f64_ordered(&mut self, value: f64) -> Result<()> {
        let bytes = encode_f64_ordered(value);
        self.writer.write_all(&bytes)?;
        self.update_checksum(&bytes);
        self.position += 8;
        Ok(())
    }

    /// Write a string with varint length prefix.
    pub fn write_string(&mut self, value: &str) -> Result<()> {
        self.write_bytes(value.as_bytes())
    }

    /// Write raw bytes with varint length prefix.
    pub fn write_bytes(&mut self, value: &[u8]) -> Result<()> {
        self.write_varint(value.len() as u64)?;
        self.writer.write_all(value)?;
        self.update_checksum(value);
        self.position += value.len() as u64;
        Ok(())
    }

    /// Write raw bytes without length prefix.
    pub fn write_raw(&mut self, value: &[u8]) -> Result<()> {
        self.writer.write_all(value)?;
        self.update_checksum(value);
        self.position += value.len() as u64;
        Ok(())
    }

    /// Get current file position.
    pub fn position(&self) -> u64 {
        self.position
    }

    fn update_checksum(&mut self, data: &[u8]) {
        self.hasher.update(data);
    }

    /// Write the trailing checksum, then flush and sync the underlying file.
    pub fn close(mut self) -> Result<()> {
        let checksum = self.hasher.finalize();
        self.writer.write_u32::<LittleEndian>(checksum)?;
        self.writer.flush_and_sync()?;
        self.writer.close()?;
        Ok(())
    }

    /// Close without syncing, for temp files that do not need durability.
    pub fn close_no_sync(mut self) -> Result<()> {
        let checksum = self.hasher.finalize();
        self.writer.write_u32::<LittleEndian>(checksum)?;
        self.writer.flush()?;
        Ok(())
    }
}

/// A structured file reader for binary data.
pub struct StructReader<R: StorageInput> {
    reader: R,
    position: u64,
    file_size: u64,
}

impl<R: StorageInput> StructReader<R> {
    /// Create a new structured file reader.
    pub fn new(reader: R) -> Result<Self> {
        let file_size = reader.size()?;
        Ok(StructReader {
            reader,
            position: 0,
            file_size,
        })
    }

    /// Verify the trailing checksum against the file body.
    ///
    /// Reads the whole body; intended for open-time validation of small
    /// metadata files. Leaves the read position at the start of the body.
    pub fn verify_checksum(&mut self) -> Result<()> {
        use std::io::{Seek, SeekFrom};

        if self.file_size < CHECKSUM_LEN {
            return Err(QuillError::corrupt("file too short for checksum"));
        }
        let body_len = self.file_size - CHECKSUM_LEN;

        self.reader.seek(SeekFrom::Start(0))?;
        let mut body = vec![0u8; body_len as usize];
        self.reader.read_exact(&mut body)?;
        let expected = self.reader.read_u32::<LittleEndian>()?;
        let actual = crc32fast::hash(&body);
        if expected != actual {
            return Err(QuillError::corrupt(format!(
                "checksum mismatch: stored {expected:08x}, computed {actual:08x}"
            )));
        }

        self.reader.seek(SeekFrom::Start(0))?;
        self.position = 0;
        Ok(())
    }

    /// Read a u8 value.
    pub fn read_u8(&mut self) -> Result<u8> {
        let value = self.reader.read_u8()?;
        self.position += 1;
        Ok(value)
    }

    /// Read a u32 value (little-endian).
    pub fn read_u32(&mut self) -> Result<u32> {
        let value = self.reader.read_u32::<LittleEndian>()?;
        self.position += 4;
        Ok(value)
    }

    /// Read a u64 value (little-endian).
    pub fn read_u64(&mut self) -> Result<u64> {
        let value = self.reader.read_u64::<LittleEndian>()?;
        self.position += 8;
        Ok(value)
    }

    /// Read a variable-length integer.
    pub fn read_varint(&mut self) -> Result<u64> {
        let mut result = 0u64;
        let mut shift = 0;
        loop {
            let byte = self.reader.read_u8()?;
            self.position += 1;

            if shift >= 64 {
                return Err(QuillError::corrupt("VarInt overflow"));
            }

            result |= ((byte & 0x7F) as u64) << shift;

            if byte & 0x80 == 0 {
                return Ok(result);
            }

            shift += 7;
        }
    }

    /// Read a signed variable-length integer using zig-zag encoding.
    pub fn read_varint_signed(&mut self) -> Result<i64> {
        Ok(zigzag_decode(self.read_varint()?))
    }

    /// Read a f32 value (little-endian).
    pub fn read_f32(&mut self) -> Result<f32> {
        let value = self.reader.read_f32::<LittleEndian>()?;
        self.position += 4;
        Ok(value)
    }

    /// Read an order-preserving encoded f64.
    pub fn read_f64_ordered(&mut self) -> Result<f64> {
        let mut bytes = [0u8; 8];
        self.reader.read_exact(&mut bytes)?;
        self.position += 8;
        Ok(decode_f64_ordered(bytes))
    }

    /// Read a string with varint length prefix.
    pub fn read_string(&mut self) -> Result<String> {
        let bytes = self.read_bytes()?;
        String::from_utf8(bytes).map_err(|e| QuillError::corrupt(format!("invalid UTF-8: {e}")))
    }

    /// Read bytes with varint length prefix.
    pub fn read_bytes(&mut self) -> Result<Vec<u8>> {
        let length = self.read_varint()? as usize;
        if self.position + length as u64 > self.file_size {
            return Err(QuillError::corrupt(format!(
                "length prefix {length} exceeds remaining file size"
            )));
        }
        let mut bytes = vec![0u8; length];
        self.reader.read_exact(&mut bytes)?;
        self.position += length as u64;
        Ok(bytes)
    }

    /// Read an exact number of raw bytes.
    pub fn read_raw(&mut self, length: usize) -> Result<Vec<u8>> {
        let mut bytes = vec![0u8; length];
        self.reader.read_exact(&mut bytes)?;
        self.position += length as u64;
        Ok(bytes)
    }

    /// Seek to an absolute position.
    pub fn seek_to(&mut self, offset: u64) -> Result<()> {
        use std::io::{Seek, SeekFrom};
        self.reader.seek(SeekFrom::Start(offset))?;
        self.position = offset;
        Ok(())
    }

    /// Get current file position.
    pub fn position(&self) -> u64 {
        self.position
    }

    /// Get the total file size.
    pub fn file_size(&self) -> u64 {
        self.file_size
    }
}
