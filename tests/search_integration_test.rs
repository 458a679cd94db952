//! End-to-end integration tests: stored fields, collector wrappers,
//! file-backed storage and the merge policy.

use std::sync::Arc;
use std::time::Duration;

use ahash::AHashSet;
use quill::document::{Document, FieldValue};
use quill::error::Result;
use quill::index::writer::WriterConfig;
use quill::index::Index;
use quill::query::Query;
use quill::schema::{IdOptions, NumericOptions, Schema, TextOptions};
use quill::search::{SearchRequest, SortOrder};
use quill::storage::{MemoryStorage, MemoryStorageConfig};

fn full_schema() -> Schema {
    let mut schema = Schema::new();
    schema
        .add_field("id", IdOptions::new().stored(true).unique(true).into())
        .unwrap();
    schema
        .add_field("title", TextOptions::new().stored(true).positions(true).into())
        .unwrap();
    schema
        .add_field("year", NumericOptions::i64().stored(true).into())
        .unwrap();
    schema
}

fn new_index() -> Index {
    let storage = Arc::new(MemoryStorage::new(MemoryStorageConfig::default()));
    Index::create(storage, full_schema(), Default::default()).unwrap()
}

fn add_books(index: &Index) -> Result<()> {
    let mut writer = index.writer(Default::default())?;
    let books = [
        ("b1", "the left hand of darkness", 1969),
        ("b2", "the dispossessed", 1974),
        ("b3", "the word for world is forest", 1972),
        ("b4", "the lathe of heaven", 1971),
    ];
    for (id, title, year) in books {
        writer.add_document(
            Document::new()
                .with_text("id", id)
                .with_text("title", title)
                .with_i64("year", year),
        )?;
    }
    writer.commit()?;
    Ok(())
}

#[test]
fn test_stored_fields_round_trip() -> Result<()> {
    let index = new_index();
    add_books(&index)?;

    let reader = index.reader()?;
    let searcher = reader.searcher();
    let top = searcher.search(
        &Query::term("title", "dispossessed"),
        &SearchRequest::with_limit(10),
    )?;
    assert_eq!(top.hits.len(), 1);

    let doc = searcher.doc(top.hits[0].doc_id)?;
    assert_eq!(doc.get("id").unwrap().as_str(), Some("b2"));
    assert_eq!(
        doc.get("title").unwrap().as_str(),
        Some("the dispossessed")
    );
    assert_eq!(doc.get("year").unwrap().as_i64(), Some(1974));
    Ok(())
}

#[test]
fn test_nested_stored_values_round_trip() -> Result<()> {
    let mut schema = Schema::new();
    schema.add_field("t", TextOptions::new().into())?;
    schema.add_field("payload", quill::schema::FieldKind::Stored)?;

    let storage = Arc::new(MemoryStorage::new(MemoryStorageConfig::default()));
    let index = Index::create(storage, schema, Default::default())?;

    let mut payload = std::collections::BTreeMap::new();
    payload.insert("tags".to_string(), FieldValue::List(vec![
        FieldValue::String("scifi".to_string()),
        FieldValue::I64(42),
    ]));
    payload.insert("checked".to_string(), FieldValue::Bool(true));

    let mut writer = index.writer(Default::default())?;
    writer.add_document(
        Document::new()
            .with_text("t", "anchor")
            .with_value("payload", FieldValue::Map(payload.clone())),
    )?;
    writer.commit()?;
    drop(writer);

    let reader = index.reader()?;
    let stored = reader.stored_fields(0)?;
    assert_eq!(stored.get("payload"), Some(&FieldValue::Map(payload)));
    Ok(())
}

#[test]
fn test_filter_and_mask_sets() -> Result<()> {
    let index = new_index();
    add_books(&index)?;

    let reader = index.reader()?;
    let searcher = reader.searcher();
    let query = Query::term("title", "the");

    let everything = searcher.search(&query, &SearchRequest::with_limit(10))?;
    assert_eq!(everything.hits.len(), 4);

    let filter: AHashSet<u64> = [1u64, 3].into_iter().collect();
    let filtered = searcher.search(
        &query,
        &SearchRequest::with_limit(10).filter(filter),
    )?;
    let mut ids: Vec<u64> = filtered.hits.iter().map(|h| h.doc_id).collect();
    ids.sort();
    assert_eq!(ids, vec![1, 3]);

    let mask: AHashSet<u64> = [1u64, 3].into_iter().collect();
    let masked = searcher.search(&query, &SearchRequest::with_limit(10).mask(mask))?;
    let mut ids: Vec<u64> = masked.hits.iter().map(|h| h.doc_id).collect();
    ids.sort();
    assert_eq!(ids, vec![0, 2]);
    Ok(())
}

#[test]
fn test_generous_time_limit_returns_everything() -> Result<()> {
    let index = new_index();
    add_books(&index)?;

    let reader = index.reader()?;
    let searcher = reader.searcher();
    let top = searcher.search(
        &Query::term("title", "the"),
        &SearchRequest::with_limit(10).time_limit(Duration::from_secs(60)),
    )?;
    assert!(!top.timed_out);
    assert_eq!(top.hits.len(), 4);
    Ok(())
}

#[test]
fn test_sort_by_stored_field() -> Result<()> {
    let index = new_index();
    add_books(&index)?;

    let reader = index.reader()?;
    let searcher = reader.searcher();

    let top = searcher.search(
        &Query::term("title", "the"),
        &SearchRequest::with_limit(3).sort_by("year", SortOrder::Ascending),
    )?;
    let years: Vec<i64> = top
        .hits
        .iter()
        .map(|hit| searcher.doc(hit.doc_id).unwrap().get("year").unwrap().as_i64().unwrap())
        .collect();
    assert_eq!(years, vec![1969, 1971, 1972]);

    let top = searcher.search(
        &Query::term("title", "the"),
        &SearchRequest::with_limit(3).sort_by("year", SortOrder::Descending),
    )?;
    let years: Vec<i64> = top
        .hits
        .iter()
        .map(|hit| searcher.doc(hit.doc_id).unwrap().get("year").unwrap().as_i64().unwrap())
        .collect();
    assert_eq!(years, vec![1974, 1972, 1971]);
    Ok(())
}

#[test]
fn test_merge_policy_collapses_small_segments() -> Result<()> {
    let index = new_index();

    let config = WriterConfig {
        merge_min_segments: 3,
        ..Default::default()
    };
    let mut writer = index.writer(config)?;
    for round in 0..3 {
        writer.add_document(
            Document::new()
                .with_text("id", format!("doc{round}"))
                .with_text("title", format!("title {round}"))
                .with_i64("year", 2000 + round),
        )?;
        writer.commit()?;
    }
    drop(writer);

    // Three same-tier segments crossed the threshold and merged into one
    let reader = index.reader()?;
    assert_eq!(reader.segments().count(), 1);
    assert_eq!(reader.doc_count(), 3);

    let searcher = reader.searcher();
    let top = searcher.search(&Query::term("title", "title"), &SearchRequest::with_limit(10))?;
    assert_eq!(top.hits.len(), 3);
    Ok(())
}

#[test]
fn test_file_storage_end_to_end() -> Result<()> {
    use quill::index::OpenOptions;

    let dir = tempfile::TempDir::new().unwrap();
    let index = Index::create_dir(dir.path(), full_schema(), Default::default())?;
    add_books(&index)?;

    // Reopen from disk with mmap enabled
    let options = OpenOptions {
        mmap: true,
        ..Default::default()
    };
    let reopened = Index::open_dir(dir.path(), options)?;
    let reader = reopened.reader()?;
    assert_eq!(reader.doc_count(), 4);

    let searcher = reader.searcher();
    let top = searcher.search(
        &Query::phrase("title", vec!["left", "hand"]),
        &SearchRequest::with_limit(10),
    )?;
    assert_eq!(top.hits.len(), 1);
    assert_eq!(
        searcher.doc(top.hits[0].doc_id)?.get("id").unwrap().as_str(),
        Some("b1")
    );
    Ok(())
}

#[test]
fn test_schema_extension_between_commits() -> Result<()> {
    let index = new_index();
    add_books(&index)?;

    // Opening a writer and extending the schema with a new field
    let mut extended = full_schema();
    extended.add_field("subtitle", TextOptions::new().stored(true).into())?;

    let mut writer = index.writer(Default::default())?;
    writer.extend_schema(extended)?;
    writer.add_document(
        Document::new()
            .with_text("id", "b5")
            .with_text("title", "always coming home")
            .with_text("subtitle", "an ethnography of the future")
            .with_i64("year", 1985),
    )?;
    writer.commit()?;
    drop(writer);

    let reader = index.reader()?;
    assert_eq!(reader.doc_count(), 5);

    let searcher = reader.searcher();
    let top = searcher.search(
        &Query::term("subtitle", "ethnography"),
        &SearchRequest::with_limit(10),
    )?;
    assert_eq!(top.hits.len(), 1);

    // Dropping an existing field is not a compatible extension
    let mut writer = index.writer(Default::default())?;
    let incompatible = Schema::new();
    assert!(writer.extend_schema(incompatible).is_err());
    Ok(())
}

#[test]
fn test_buffered_writer_commits_by_size_window() -> Result<()> {
    use quill::index::BufferedWriter;

    let index = new_index();
    let writer = index.writer(Default::default())?;
    let mut buffered = BufferedWriter::new(writer, 3, Duration::from_secs(3600));

    for n in 0..7 {
        buffered.add_document(
            Document::new()
                .with_text("id", format!("n{n}"))
                .with_text("title", "buffered doc")
                .with_i64("year", n),
        )?;
    }

    // 6 docs auto-committed in two batches; the 7th is still buffered and
    // becomes visible through the buffered reader, which commits first
    let reader = index.reader()?;
    assert_eq!(reader.doc_count(), 6);

    let reader = buffered.reader()?;
    assert_eq!(reader.doc_count(), 7);

    buffered.close()?;
    assert_eq!(index.reader()?.doc_count(), 7);
    Ok(())
}

#[test]
fn test_spill_heavy_indexing_round_trip() -> Result<()> {
    let index = new_index();

    // Zero budget: every document spills a run, exercising the external
    // merge path
    let config = WriterConfig {
        ram_limit_mb: 0,
        ..Default::default()
    };
    let mut writer = index.writer(config)?;
    for n in 0..50 {
        writer.add_document(
            Document::new()
                .with_text("id", format!("s{n}"))
                .with_text("title", format!("spill doc number {n} shared"))
                .with_i64("year", n),
        )?;
    }
    writer.commit()?;
    drop(writer);

    let reader = index.reader()?;
    assert_eq!(reader.doc_count(), 50);

    let searcher = reader.searcher();
    let top = searcher.search(&Query::term("title", "shared"), &SearchRequest::with_limit(100))?;
    assert_eq!(top.hits.len(), 50);

    let top = searcher.search(&Query::term("title", "7"), &SearchRequest::with_limit(10))?;
    assert_eq!(top.hits.len(), 1);
    Ok(())
}
