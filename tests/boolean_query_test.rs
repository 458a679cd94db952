//! Integration tests for boolean query evaluation.

use std::sync::Arc;

use quill::document::Document;
use quill::error::Result;
use quill::index::Index;
use quill::query::Query;
use quill::schema::{Schema, TextOptions};
use quill::search::SearchRequest;
use quill::storage::{MemoryStorage, MemoryStorageConfig};

fn index_with_docs(texts: &[&str]) -> Result<Index> {
    let mut schema = Schema::new();
    schema.add_field("t", TextOptions::new().stored(true).into())?;

    let storage = Arc::new(MemoryStorage::new(MemoryStorageConfig::default()));
    let index = Index::create(storage, schema, Default::default())?;

    let mut writer = index.writer(Default::default())?;
    for text in texts {
        writer.add_document(Document::new().with_text("t", *text))?;
    }
    writer.commit()?;
    Ok(index)
}

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

#[test]
fn test_and_not_with_disjunction() -> Result<()> {
    let index = index_with_docs(&["alpha beta", "alpha gamma", "alpha"])?;

    // alpha AND NOT (beta OR gamma)
    let query = Query::and_not(
        Query::term("t", "alpha"),
        Query::or(vec![Query::term("t", "beta"), Query::term("t", "gamma")]),
    );
    assert_eq!(doc_ids(&index, &query), vec![2]);
    Ok(())
}

#[test]
fn test_conjunction() -> Result<()> {
    let index = index_with_docs(&["alpha beta", "alpha gamma", "alpha", "beta gamma"])?;

    let query = Query::and(vec![Query::term("t", "alpha"), Query::term("t", "beta")]);
    assert_eq!(doc_ids(&index, &query), vec![0]);

    let query = Query::and(vec![Query::term("t", "beta"), Query::term("t", "gamma")]);
    assert_eq!(doc_ids(&index, &query), vec![3]);
    Ok(())
}

#[test]
fn test_disjunction() -> Result<()> {
    let index = index_with_docs(&["alpha beta", "alpha gamma", "alpha", "beta gamma"])?;

    let query = Query::or(vec![Query::term("t", "beta"), Query::term("t", "gamma")]);
    assert_eq!(doc_ids(&index, &query), vec![0, 1, 3]);
    Ok(())
}

#[test]
fn test_missing_term_matches_nothing() -> Result<()> {
    let index = index_with_docs(&["alpha beta"])?;

    assert!(doc_ids(&index, &Query::term("t", "zeta")).is_empty());

    let query = Query::and(vec![Query::term("t", "alpha"), Query::term("t", "zeta")]);
    assert!(doc_ids(&index, &query).is_empty());
    Ok(())
}

#[test]
fn test_every_matches_all_docs() -> Result<()> {
    let index = index_with_docs(&["alpha", "beta", "gamma"])?;
    assert_eq!(doc_ids(&index, &Query::every()), vec![0, 1, 2]);
    Ok(())
}

#[test]
fn test_boolean_across_segments() -> Result<()> {
    let mut schema = Schema::new();
    schema.add_field("t", TextOptions::new().stored(true).into())?;

    let storage = Arc::new(MemoryStorage::new(MemoryStorageConfig::default()));
    let index = Index::create(storage, schema, Default::default())?;

    // Three commits, three segments
    let mut writer = index.writer(Default::default())?;
    writer.add_document(Document::new().with_text("t", "alpha beta"))?;
    writer.commit()?;
    writer.add_document(Document::new().with_text("t", "alpha gamma"))?;
    writer.commit()?;
    writer.add_document(Document::new().with_text("t", "alpha"))?;
    writer.commit()?;
    drop(writer);

    let query = Query::and_not(
        Query::term("t", "alpha"),
        Query::or(vec![Query::term("t", "beta"), Query::term("t", "gamma")]),
    );
    assert_eq!(doc_ids(&index, &query), vec![2]);
    Ok(())
}

#[test]
fn test_boost_changes_ranking() -> Result<()> {
    let index = index_with_docs(&["alpha", "beta"])?;

    let reader = index.reader()?;
    let searcher = reader.searcher();

    let query = Query::or(vec![
        Query::term("t", "alpha"),
        Query::term("t", "beta").boost(10.0),
    ]);
    let top = searcher.search(&query, &SearchRequest::with_limit(2))?;
    assert_eq!(top.hits.len(), 2);
    assert_eq!(top.hits[0].doc_id, 1);
    assert!(top.hits[0].score > top.hits[1].score);
    Ok(())
}

#[test]
fn test_constant_score() -> Result<()> {
    let index = index_with_docs(&["alpha alpha alpha", "alpha"])?;

    let reader = index.reader()?;
    let searcher = reader.searcher();

    let query = Query::term("t", "alpha").constant_score(0.5);
    let top = searcher.search(&query, &SearchRequest::with_limit(10))?;
    assert_eq!(top.hits.len(), 2);
    for hit in &top.hits {
        assert_eq!(hit.score, 0.5);
    }
    Ok(())
}
