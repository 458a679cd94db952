//! Schema management for document structure definition.
//!
//! A schema is an ordered mapping from field name to field kind. Each kind
//! declares how values of the field are indexed, stored and scored. The
//! schema is immutable for the life of a segment; between commits it may be
//! extended with new fields as long as existing fields keep identical
//! semantics.

use serde::{Deserialize, Serialize};

use crate::error::{QuillError, Result};

/// Options for a full-text field.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TextOptions {
    /// Whether the raw value is retrievable from search results.
    pub stored: bool,
    /// Whether token positions are recorded (required for phrase queries).
    pub positions: bool,
    /// Whether character offsets are recorded alongside positions.
    pub offsets: bool,
    /// Whether per-token boosts are recorded.
    pub boosts: bool,
    /// Whether a per-document field length is recorded for scoring.
    pub scorable: bool,
    /// Name of the analyzer to run at index time; `None` uses the standard
    /// analyzer.
    pub analyzer: Option<String>,
}

impl TextOptions {
    /// Create text options with default settings: indexed, scorable, not
    /// stored, no positions.
    pub fn new() -> Self {
        TextOptions {
            stored: false,
            positions: false,
            offsets: false,
            boosts: false,
            scorable: true,
            analyzer: None,
        }
    }

    /// Set whether this field is stored.
    pub fn stored(mut self, stored: bool) -> Self {
        self.stored = stored;
        self
    }

    /// Set whether token positions are recorded.
    pub fn positions(mut self, positions: bool) -> Self {
        self.positions = positions;
        self
    }

    /// Set whether character offsets are recorded.
    pub fn offsets(mut self, offsets: bool) -> Self {
        self.offsets = offsets;
        self
    }

    /// Set whether per-token boosts are recorded.
    pub fn boosts(mut self, boosts: bool) -> Self {
        self.boosts = boosts;
        self
    }

    /// Set whether a field length is recorded for scoring.
    pub fn scorable(mut self, scorable: bool) -> Self {
        self.scorable = scorable;
        self
    }

    /// Set the analyzer for this field.
    pub fn analyzer<S: Into<String>>(mut self, name: S) -> Self {
        self.analyzer = Some(name.into());
        self
    }
}

impl Default for TextOptions {
    fn default() -> Self {
        Self::new()
    }
}

impl From<TextOptions> for FieldKind {
    fn from(options: TextOptions) -> Self {
        FieldKind::Text(options)
    }
}

/// Options for an exact-match identifier field.
///
/// The whole value indexes as a single token. A unique id field acts as a
/// primary key for [`update_document`](crate::index::IndexWriter::update_document).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IdOptions {
    /// Whether the raw value is retrievable from search results.
    pub stored: bool,
    /// Whether the field identifies a document for update/delete.
    pub unique: bool,
}

impl IdOptions {
    /// Create id options with default settings: indexed, not stored, not
    /// unique.
    pub fn new() -> Self {
        IdOptions {
            stored: false,
            unique: false,
        }
    }

    /// Set whether this field is stored.
    pub fn stored(mut self, stored: bool) -> Self {
        self.stored = stored;
        self
    }

    /// Set whether this field is a unique key.
    pub fn unique(mut self, unique: bool) -> Self {
        self.unique = unique;
        self
    }
}

impl Default for IdOptions {
    fn default() -> Self {
        Self::new()
    }
}

impl From<IdOptions> for FieldKind {
    fn from(options: IdOptions) -> Self {
        FieldKind::Id(options)
    }
}

/// The numeric representation of a numeric field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum NumericKind {
    /// 64-bit signed integer.
    I64,
    /// 64-bit float.
    F64,
}

/// Options for a numeric field.
///
/// Values index as a single order-preserving encoded term, so range queries
/// over numeric fields reduce to lexicographic term range scans.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NumericOptions {
    /// Whether the raw value is retrievable from search results.
    pub stored: bool,
    /// The numeric representation.
    pub kind: NumericKind,
}

impl NumericOptions {
    /// Create i64 numeric options.
    pub fn i64() -> Self {
        NumericOptions {
            stored: false,
            kind: NumericKind::I64,
        }
    }

    /// Create f64 numeric options.
    pub fn f64() -> Self {
        NumericOptions {
            stored: false,
            kind: NumericKind::F64,
        }
    }

    /// Set whether this field is stored.
    pub fn stored(mut self, stored: bool) -> Self {
        self.stored = stored;
        self
    }
}

impl From<NumericOptions> for FieldKind {
    fn from(options: NumericOptions) -> Self {
        FieldKind::Numeric(options)
    }
}

/// The kind of a schema field.
///
/// New field behaviors are new variants here rather than a type hierarchy;
/// the accessor methods below are the capability surface the rest of the
/// crate relies on.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum FieldKind {
    /// Analyzed full-text field.
    Text(TextOptions),
    /// Exact-match identifier field.
    Id(IdOptions),
    /// Numeric field with order-preserving encoded terms.
    Numeric(NumericOptions),
    /// Stored-only field; contributes no postings.
    Stored,
}

impl FieldKind {
    /// Whether values of this field contribute postings.
    pub fn is_indexed(&self) -> bool {
        !matches!(self, FieldKind::Stored)
    }

    /// Whether the raw value is retrievable per document.
    pub fn is_stored(&self) -> bool {
        match self {
            FieldKind::Text(options) => options.stored,
            FieldKind::Id(options) => options.stored,
            FieldKind::Numeric(options) => options.stored,
            FieldKind::Stored => true,
        }
    }

    /// Whether a per-document field length is recorded for scoring.
    pub fn is_scorable(&self) -> bool {
        match self {
            FieldKind::Text(options) => options.scorable,
            _ => false,
        }
    }

    /// Whether token positions are recorded.
    pub fn has_positions(&self) -> bool {
        match self {
            FieldKind::Text(options) => options.positions,
            _ => false,
        }
    }

    /// Whether the field identifies a document for update/delete.
    pub fn is_unique(&self) -> bool {
        match self {
            FieldKind::Id(options) => options.unique,
            _ => false,
        }
    }

    /// Name of the analyzer to run for this field at index time.
    pub fn analyzer_name(&self) -> &str {
        match self {
            FieldKind::Text(options) => options.analyzer.as_deref().unwrap_or("standard"),
            _ => "keyword",
        }
    }
}

/// A named field in a schema.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldEntry {
    /// Field name.
    pub name: String,
    /// Field kind.
    pub kind: FieldKind,
}

/// A schema defines the structure of documents in an index.
///
/// Similar to Whoosh's Schema: an ordered set of named, typed fields.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Schema {
    fields: Vec<FieldEntry>,
}

impl Schema {
    /// Create a new empty schema.
    pub fn new() -> Self {
        Schema { fields: Vec::new() }
    }

    /// Add a field to the schema.
    pub fn add_field<S: Into<String>>(&mut self, name: S, kind: FieldKind) -> Result<()> {
        let name = name.into();

        if name.is_empty() {
            return Err(QuillError::schema("field name cannot be empty"));
        }
        if self.get(&name).is_some() {
            return Err(QuillError::schema(format!(
                "field '{name}' already exists"
            )));
        }

        self.fields.push(FieldEntry { name, kind });
        Ok(())
    }

    /// Get the kind of a field by name.
    pub fn get(&self, name: &str) -> Option<&FieldKind> {
        self.fields
            .iter()
            .find(|entry| entry.name == name)
            .map(|entry| &entry.kind)
    }

    /// Whether the schema contains a field with the given name.
    pub fn has_field(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    /// Iterate over the fields in declaration order.
    pub fn fields(&self) -> impl Iterator<Item = &FieldEntry> {
        self.fields.iter()
    }

    /// Names of all unique fields, in declaration order.
    pub fn unique_fields(&self) -> Vec<&str> {
        self.fields
            .iter()
            .filter(|entry| entry.kind.is_unique())
            .map(|entry| entry.name.as_str())
            .collect()
    }

    /// Names of all scorable fields, in declaration order.
    pub fn scorable_fields(&self) -> Vec<&str> {
        self.fields
            .iter()
            .filter(|entry| entry.kind.is_scorable())
            .map(|entry| entry.name.as_str())
            .collect()
    }

    /// Number of fields.
    pub fn len(&self) -> usize {
        self.fields.len()
    }

    /// Whether the schema has no fields.
    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// Stable fingerprint of the schema structure.
    ///
    /// Fingerprints differ whenever any field name, order or kind differs;
    /// they are recorded in segment headers and verified on open.
    pub fn fingerprint(&self) -> String {
        let json = serde_json::to_vec(&self.fields).unwrap_or_default();
        format!("{:08x}", crc32fast::hash(&json))
    }

    /// Check that this schema is a compatible extension of `older`.
    ///
    /// Every field of `older` must be present here with an identical kind;
    /// new fields may be appended.
    pub fn is_compatible_extension_of(&self, older: &Schema) -> bool {
        older
            .fields
            .iter()
            .all(|entry| self.get(&entry.name) == Some(&entry.kind))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_schema() -> Schema {
        let mut schema = Schema::new();
        schema
            .add_field(
                "body",
                TextOptions::new().stored(true).positions(true).into(),
            )
            .unwrap();
        schema
            .add_field("id", IdOptions::new().stored(true).unique(true).into())
            .unwrap();
        schema
            .add_field("count", NumericOptions::i64().into())
            .unwrap();
        schema.add_field("blob", FieldKind::Stored).unwrap();
        schema
    }

    #[test]
    fn test_field_kind_capabilities() {
        let schema = sample_schema();

        let body = schema.get("body").unwrap();
        assert!(body.is_indexed());
        assert!(body.is_stored());
        assert!(body.is_scorable());
        assert!(body.has_positions());
        assert!(!body.is_unique());
        assert_eq!(body.analyzer_name(), "standard");

        let id = schema.get("id").unwrap();
        assert!(id.is_indexed());
        assert!(id.is_unique());
        assert!(!id.is_scorable());
        assert_eq!(id.analyzer_name(), "keyword");

        let blob = schema.get("blob").unwrap();
        assert!(!blob.is_indexed());
        assert!(blob.is_stored());
    }

    #[test]
    fn test_duplicate_field_rejected() {
        let mut schema = sample_schema();
        let result = schema.add_field("body", TextOptions::new().into());
        assert!(matches!(result, Err(QuillError::SchemaMismatch(_))));
    }

    #[test]
    fn test_unique_and_scorable_listing() {
        let schema = sample_schema();
        assert_eq!(schema.unique_fields(), vec!["id"]);
        assert_eq!(schema.scorable_fields(), vec!["body"]);
    }

    #[test]
    fn test_fingerprint_changes_with_structure() {
        let schema = sample_schema();
        let fp = schema.fingerprint();

        let mut extended = schema.clone();
        extended
            .add_field("extra", TextOptions::new().into())
            .unwrap();
        assert_ne!(fp, extended.fingerprint());

        // Fingerprint is stable across clones
        assert_eq!(fp, schema.clone().fingerprint());
    }

    #[test]
    fn test_compatible_extension() {
        let schema = sample_schema();

        let mut extended = schema.clone();
        extended
            .add_field("extra", TextOptions::new().into())
            .unwrap();
        assert!(extended.is_compatible_extension_of(&schema));
        assert!(!schema.is_compatible_extension_of(&extended));

        // Changing a field kind breaks compatibility
        let mut changed = Schema::new();
        changed
            .add_field("body", TextOptions::new().into())
            .unwrap();
        assert!(!changed.is_compatible_extension_of(&schema));
    }

    #[test]
    fn test_schema_json_round_trip() {
        let schema = sample_schema();
        let json = serde_json::to_string(&schema).unwrap();
        let restored: Schema = serde_json::from_str(&json).unwrap();
        assert_eq!(schema, restored);
        assert_eq!(schema.fingerprint(), restored.fingerprint());
    }
}
