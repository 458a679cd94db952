//! Documents and dynamically typed field values.
//!
//! A [`Document`] is a mapping from field name to [`FieldValue`]. Values are
//! a tagged union so stored payloads can hold nested structure without the
//! schema having to know about it; the binary encoding round-trips exactly.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::error::{QuillError, Result};
use crate::storage::structured::{StructReader, StructWriter};
use crate::storage::{StorageInput, StorageOutput};

/// A dynamically typed field value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum FieldValue {
    /// Absent / explicit null.
    Null,
    /// Boolean.
    Bool(bool),
    /// 64-bit signed integer.
    I64(i64),
    /// 64-bit float.
    F64(f64),
    /// Raw bytes.
    Bytes(Vec<u8>),
    /// UTF-8 string.
    String(String),
    /// Ordered list of values.
    List(Vec<FieldValue>),
    /// String-keyed mapping of values.
    Map(BTreeMap<String, FieldValue>),
}

// Value tags in the stored-field encoding. Never renumber.
const TAG_NULL: u8 = 0;
const TAG_BOOL: u8 = 1;
const TAG_I64: u8 = 2;
const TAG_F64: u8 = 3;
const TAG_BYTES: u8 = 4;
const TAG_STRING: u8 = 5;
const TAG_LIST: u8 = 6;
const TAG_MAP: u8 = 7;

impl FieldValue {
    /// Get the string content, if this value is a string.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            FieldValue::String(s) => Some(s),
            _ => None,
        }
    }

    /// Get the integer content, if this value is an i64.
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            FieldValue::I64(v) => Some(*v),
            _ => None,
        }
    }

    /// Get the float content, if this value is an f64.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            FieldValue::F64(v) => Some(*v),
            _ => None,
        }
    }

    /// Encode this value to a structured writer.
    pub fn encode<W: StorageOutput>(&self, writer: &mut StructWriter<W>) -> Result<()> {
        match self {
            FieldValue::Null => writer.write_u8(TAG_NULL),
            FieldValue::Bool(v) => {
                writer.write_u8(TAG_BOOL)?;
                writer.write_u8(*v as u8)
            }
            FieldValue::I64(v) => {
                writer.write_u8(TAG_I64)?;
                writer.write_varint_signed(*v)
            }
            FieldValue::F64(v) => {
                writer.write_u8(TAG_F64)?;
                writer.write_f64_ordered(*v)
            }
            FieldValue::Bytes(v) => {
                writer.write_u8(TAG_BYTES)?;
                writer.write_bytes(v)
            }
            FieldValue::String(v) => {
                writer.write_u8(TAG_STRING)?;
                writer.write_string(v)
            }
            FieldValue::List(values) => {
                writer.write_u8(TAG_LIST)?;
                writer.write_varint(values.len() as u64)?;
                for value in values {
                    value.encode(writer)?;
                }
                Ok(())
            }
            FieldValue::Map(map) => {
                writer.write_u8(TAG_MAP)?;
                writer.write_varint(map.len() as u64)?;
                for (key, value) in map {
                    writer.write_string(key)?;
                    value.encode(writer)?;
                }
                Ok(())
            }
        }
    }

    /// Decode a value from a structured reader.
    pub fn decode<R: StorageInput>(reader: &mut StructReader<R>) -> Result<Self> {
        let tag = reader.read_u8()?;
        match tag {
            TAG_NULL => Ok(FieldValue::Null),
            TAG_BOOL => Ok(FieldValue::Bool(reader.read_u8()? != 0)),
            TAG_I64 => Ok(FieldValue::I64(reader.read_varint_signed()?)),
            TAG_F64 => Ok(FieldValue::F64(reader.read_f64_ordered()?)),
            TAG_BYTES => Ok(FieldValue::Bytes(reader.read_bytes()?)),
            TAG_STRING => Ok(FieldValue::String(reader.read_string()?)),
            TAG_LIST => {
                let count = reader.read_varint()? as usize;
                let mut values = Vec::with_capacity(count.min(1024));
                for _ in 0..count {
                    values.push(FieldValue::decode(reader)?);
                }
                Ok(FieldValue::List(values))
            }
            TAG_MAP => {
                let count = reader.read_varint()? as usize;
                let mut map = BTreeMap::new();
                for _ in 0..count {
                    let key = reader.read_string()?;
                    map.insert(key, FieldValue::decode(reader)?);
                }
                Ok(FieldValue::Map(map))
            }
            other => Err(QuillError::corrupt(format!(
                "unknown field value tag {other}"
            ))),
        }
    }
}

/// A logical unit of indexing: a mapping from field name to value.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Document {
    fields: BTreeMap<String, FieldValue>,
}

impl Document {
    /// Create a new empty document.
    pub fn new() -> Self {
        Document {
            fields: BTreeMap::new(),
        }
    }

    /// Set a field value, replacing any existing value.
    pub fn set<S: Into<String>>(&mut self, name: S, value: FieldValue) {
        self.fields.insert(name.into(), value);
    }

    /// Builder-style text field.
    pub fn with_text<S: Into<String>, T: Into<String>>(mut self, name: S, text: T) -> Self {
        self.set(name, FieldValue::String(text.into()));
        self
    }

    /// Builder-style integer field.
    pub fn with_i64<S: Into<String>>(mut self, name: S, value: i64) -> Self {
        self.set(name, FieldValue::I64(value));
        self
    }

    /// Builder-style float field.
    pub fn with_f64<S: Into<String>>(mut self, name: S, value: f64) -> Self {
        self.set(name, FieldValue::F64(value));
        self
    }

    /// Builder-style arbitrary value field.
    pub fn with_value<S: Into<String>>(mut self, name: S, value: FieldValue) -> Self {
        self.set(name, value);
        self
    }

    /// Get a field value by name.
    pub fn get(&self, name: &str) -> Option<&FieldValue> {
        self.fields.get(name)
    }

    /// Iterate over (name, value) pairs in field-name order.
    pub fn fields(&self) -> impl Iterator<Item = (&String, &FieldValue)> {
        self.fields.iter()
    }

    /// Number of fields.
    pub fn len(&self) -> usize {
        self.fields.len()
    }

    /// Whether the document has no fields.
    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// Encode this document as a stored-field record.
    pub fn encode<W: StorageOutput>(&self, writer: &mut StructWriter<W>) -> Result<()> {
        writer.write_varint(self.fields.len() as u64)?;
        for (name, value) in &self.fields {
            writer.write_string(name)?;
            value.encode(writer)?;
        }
        Ok(())
    }

    /// Decode a stored-field record.
    pub fn decode<R: StorageInput>(reader: &mut StructReader<R>) -> Result<Self> {
        let count = reader.read_varint()? as usize;
        let mut fields = BTreeMap::new();
        for _ in 0..count {
            let name = reader.read_string()?;
            fields.insert(name, FieldValue::decode(reader)?);
        }
        Ok(Document { fields })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::memory::{MemoryStorage, MemoryStorageConfig};
    use crate::storage::Storage;

    fn round_trip(doc: &Document) -> Document {
        let storage = MemoryStorage::new(MemoryStorageConfig::default());
        {
            let output = storage.create_output("doc.bin").unwrap();
            let mut writer = StructWriter::new(output);
            doc.encode(&mut writer).unwrap();
            writer.close().unwrap();
        }
        let input = storage.open_input("doc.bin").unwrap();
        let mut reader = StructReader::new(input).unwrap();
        Document::decode(&mut reader).unwrap()
    }

    #[test]
    fn test_builder_and_access() {
        let doc = Document::new()
            .with_text("title", "hello")
            .with_i64("year", 2009)
            .with_f64("rating", 4.5);

        assert_eq!(doc.get("title").unwrap().as_str(), Some("hello"));
        assert_eq!(doc.get("year").unwrap().as_i64(), Some(2009));
        assert_eq!(doc.get("rating").unwrap().as_f64(), Some(4.5));
        assert_eq!(doc.len(), 3);
    }

    #[test]
    fn test_flat_round_trip() {
        let doc = Document::new()
            .with_text("title", "a quick brown fox")
            .with_i64("year", -40)
            .with_value("raw", FieldValue::Bytes(vec![0, 1, 255]));

        assert_eq!(round_trip(&doc), doc);
    }

    #[test]
    fn test_nested_round_trip() {
        let mut meta = BTreeMap::new();
        meta.insert("lang".to_string(), FieldValue::String("en".to_string()));
        meta.insert(
            "tags".to_string(),
            FieldValue::List(vec![
                FieldValue::String("fast".to_string()),
                FieldValue::I64(7),
                FieldValue::Null,
            ]),
        );

        let doc = Document::new()
            .with_value("meta", FieldValue::Map(meta))
            .with_value("flag", FieldValue::Bool(true));

        assert_eq!(round_trip(&doc), doc);
    }

    #[test]
    fn test_unknown_tag_is_corrupt() {
        let storage = MemoryStorage::new(MemoryStorageConfig::default());
        {
            let output = storage.create_output("bad.bin").unwrap();
            let mut writer = StructWriter::new(output);
            writer.write_varint(1).unwrap();
            writer.write_string("field").unwrap();
            writer.write_u8(99).unwrap(); // bogus value tag
            writer.close().unwrap();
        }
        let input = storage.open_input("bad.bin").unwrap();
        let mut reader = StructReader::new(input).unwrap();
        assert!(matches!(
            Document::decode(&mut reader),
            Err(QuillError::Corrupt(_))
        ));
    }
}
