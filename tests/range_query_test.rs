//! Integration tests for range queries over id and numeric fields.

use std::sync::Arc;

use quill::document::Document;
use quill::error::Result;
use quill::index::Index;
use quill::query::Query;
use quill::schema::{IdOptions, NumericOptions, Schema, TextOptions};
use quill::search::SearchRequest;
use quill::storage::{MemoryStorage, MemoryStorageConfig};

fn doc_ids(index: &Index, query: &Query) -> Vec<u64> {
    let reader = index.reader().unwrap();
    let searcher = reader.searcher();
    let top = searcher
        .search(query, &SearchRequest::with_limit(100))
        .unwrap();
    let mut ids: Vec<u64> = top.hits.iter().map(|hit| hit.doc_id).collect();
    ids.sort();
    ids
}

fn date_index() -> Result<Index> {
    let mut schema = Schema::new();
    schema.add_field("date", IdOptions::new().stored(true).into())?;

    let storage = Arc::new(MemoryStorage::new(MemoryStorageConfig::default()));
    let index = Index::create(storage, schema, Default::default())?;

    let mut writer = index.writer(Default::default())?;
    for date in ["20050101", "20090715", "20091231"] {
        writer.add_document(Document::new().with_text("date", date))?;
    }
    writer.commit()?;
    Ok(index)
}

#[test]
fn test_inclusive_date_range() -> Result<()> {
    let index = date_index()?;

    let query = Query::range("date", Some("20050101"), Some("20090715"), true, true);
    assert_eq!(doc_ids(&index, &query), vec![0, 1]);
    Ok(())
}

#[test]
fn test_exclusive_bounds() -> Result<()> {
    let index = date_index()?;

    // Excluding the lower endpoint drops doc 0
    let query = Query::range("date", Some("20050101"), Some("20090715"), false, true);
    assert_eq!(doc_ids(&index, &query), vec![1]);

    // Excluding the upper endpoint drops doc 1
    let query = Query::range("date", Some("20050101"), Some("20090715"), true, false);
    assert_eq!(doc_ids(&index, &query), vec![0]);
    Ok(())
}

#[test]
fn test_open_ended_ranges() -> Result<()> {
    let index = date_index()?;

    let query = Query::range("date", Some("20090101"), None::<&str>, true, true);
    assert_eq!(doc_ids(&index, &query), vec![1, 2]);

    let query = Query::range("date", None::<&str>, Some("20090101"), true, true);
    assert_eq!(doc_ids(&index, &query), vec![0]);

    let query = Query::range("date", None::<&str>, None::<&str>, true, true);
    assert_eq!(doc_ids(&index, &query), vec![0, 1, 2]);
    Ok(())
}

#[test]
fn test_numeric_i64_range_with_negative_values() -> Result<()> {
    let mut schema = Schema::new();
    schema.add_field("n", NumericOptions::i64().stored(true).into())?;

    let storage = Arc::new(MemoryStorage::new(MemoryStorageConfig::default()));
    let index = Index::create(storage, schema, Default::default())?;

    let mut writer = index.writer(Default::default())?;
    for value in [-100i64, -5, 0, 17, 4096] {
        writer.add_document(Document::new().with_i64("n", value))?;
    }
    writer.commit()?;
    drop(writer);

    // Order-preserving encoding makes byte ranges numeric ranges
    let query = Query::range_i64("n", -10, 100);
    assert_eq!(doc_ids(&index, &query), vec![1, 2, 3]);

    let query = Query::range_i64("n", -1000, -1);
    assert_eq!(doc_ids(&index, &query), vec![0, 1]);

    let query = Query::term_i64("n", 17);
    assert_eq!(doc_ids(&index, &query), vec![3]);
    Ok(())
}

#[test]
fn test_range_on_text_terms() -> Result<()> {
    let mut schema = Schema::new();
    schema.add_field("t", TextOptions::new().into())?;

    let storage = Arc::new(MemoryStorage::new(MemoryStorageConfig::default()));
    let index = Index::create(storage, schema, Default::default())?;

    let mut writer = index.writer(Default::default())?;
    for word in ["apple", "banana", "cherry", "damson"] {
        writer.add_document(Document::new().with_text("t", word))?;
    }
    writer.commit()?;
    drop(writer);

    let query = Query::range("t", Some("banana"), Some("damson"), true, false);
    assert_eq!(doc_ids(&index, &query), vec![1, 2]);
    Ok(())
}
