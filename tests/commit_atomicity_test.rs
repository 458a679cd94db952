//! Integration tests for the commit protocol: atomic TOC publication,
//! crash recovery and orphan cleanup.

use std::io::Write;
use std::sync::Arc;

use quill::document::Document;
use quill::error::Result;
use quill::index::{Index, Toc};
use quill::query::Query;
use quill::schema::{Schema, TextOptions};
use quill::search::SearchRequest;
use quill::storage::{MemoryStorage, MemoryStorageConfig, Storage};

fn text_schema() -> Schema {
    let mut schema = Schema::new();
    schema
        .add_field("t", TextOptions::new().stored(true).into())
        .unwrap();
    schema
}

#[test]
fn test_commit_bumps_generation() -> Result<()> {
    let storage = Arc::new(MemoryStorage::new(MemoryStorageConfig::default()));
    let index = Index::create(Arc::clone(&storage) as Arc<dyn Storage>, text_schema(), Default::default())?;

    let mut writer = index.writer(Default::default())?;
    writer.add_document(Document::new().with_text("t", "one"))?;
    let generation = writer.commit()?;
    assert_eq!(generation, 2);

    writer.add_document(Document::new().with_text("t", "two"))?;
    assert_eq!(writer.commit()?, 3);
    drop(writer);

    assert_eq!(index.reader()?.generation(), 3);
    Ok(())
}

#[test]
fn test_empty_commit_is_a_no_op() -> Result<()> {
    let storage = Arc::new(MemoryStorage::new(MemoryStorageConfig::default()));
    let index = Index::create(Arc::clone(&storage) as Arc<dyn Storage>, text_schema(), Default::default())?;

    let mut writer = index.writer(Default::default())?;
    assert_eq!(writer.commit()?, 1);
    assert_eq!(writer.commit()?, 1);

    let files_before = storage.list_files()?;
    writer.commit()?;
    assert_eq!(storage.list_files()?, files_before);
    Ok(())
}

#[test]
fn test_crash_before_toc_rename_is_invisible() -> Result<()> {
    let storage = Arc::new(MemoryStorage::new(MemoryStorageConfig::default()));
    let index = Index::create(Arc::clone(&storage) as Arc<dyn Storage>, text_schema(), Default::default())?;

    let mut writer = index.writer(Default::default())?;
    writer.add_document(Document::new().with_text("t", "committed"))?;
    writer.commit()?;
    drop(writer);

    // Simulate a writer that crashed after fsyncing segment files and the
    // temporary TOC, but before the rename
    for name in [
        "seg_000000ff.trm",
        "seg_000000ff.pst",
        "seg_000000ff.stv",
        "TOC.3.tmp",
    ] {
        let mut output = storage.create_output(name)?;
        output.write_all(b"half-written")?;
        output.close()?;
    }

    // Reopen observes the prior generation
    let reader = index.reader()?;
    assert_eq!(reader.generation(), 2);
    assert_eq!(reader.doc_count(), 1);

    let searcher = reader.searcher();
    let top = searcher.search(&Query::term("t", "committed"), &SearchRequest::with_limit(10))?;
    assert_eq!(top.hits.len(), 1);
    Ok(())
}

#[test]
fn test_optimize_cleans_crash_orphans() -> Result<()> {
    let storage = Arc::new(MemoryStorage::new(MemoryStorageConfig::default()));
    let index = Index::create(Arc::clone(&storage) as Arc<dyn Storage>, text_schema(), Default::default())?;

    let mut writer = index.writer(Default::default())?;
    writer.add_document(Document::new().with_text("t", "committed"))?;
    writer.commit()?;
    drop(writer);

    for name in ["seg_000000ff.trm", "seg_000000ff.pst", "TOC.3.tmp"] {
        let mut output = storage.create_output(name)?;
        output.write_all(b"half-written")?;
        output.close()?;
    }

    let mut writer = index.writer(Default::default())?;
    writer.optimize()?;
    drop(writer);

    let files = storage.list_files()?;
    assert!(!files.contains(&"seg_000000ff.trm".to_string()));
    assert!(!files.contains(&"seg_000000ff.pst".to_string()));
    assert!(!files.iter().any(|name| name.ends_with(".tmp")));

    // The index still works
    let reader = index.reader()?;
    assert_eq!(reader.doc_count(), 1);
    Ok(())
}

#[test]
fn test_only_latest_generation_is_current() -> Result<()> {
    let storage = Arc::new(MemoryStorage::new(MemoryStorageConfig::default()));
    let index = Index::create(Arc::clone(&storage) as Arc<dyn Storage>, text_schema(), Default::default())?;

    let mut writer = index.writer(Default::default())?;
    for round in 0..3 {
        writer.add_document(Document::new().with_text("t", format!("round {round}")))?;
        writer.commit()?;
    }
    drop(writer);

    // Older TOC generations are cleaned up after each commit, so exactly
    // one TOC file remains and it is the max generation
    let tocs: Vec<String> = storage
        .list_files()?
        .into_iter()
        .filter(|name| name.starts_with("TOC."))
        .collect();
    assert_eq!(tocs.len(), 1);
    assert_eq!(Toc::latest_generation(storage.as_ref())?, Some(4));
    Ok(())
}

#[test]
fn test_aborted_flush_leaves_toc_untouched() -> Result<()> {
    let storage = Arc::new(MemoryStorage::new(MemoryStorageConfig::default()));
    let index = Index::create(Arc::clone(&storage) as Arc<dyn Storage>, text_schema(), Default::default())?;

    let mut writer = index.writer(Default::default())?;
    writer.add_document(Document::new().with_text("t", "good"))?;
    writer.commit()?;

    // A document with an unknown field fails upfront and buffers nothing
    let result = writer.add_document(Document::new().with_text("missing", "x"));
    assert!(result.is_err());
    assert_eq!(writer.pending_docs(), 0);

    // Rollback discards buffered docs without a commit
    writer.add_document(Document::new().with_text("t", "discarded"))?;
    writer.rollback()?;
    writer.commit()?;
    drop(writer);

    let reader = index.reader()?;
    assert_eq!(reader.doc_count(), 1);
    Ok(())
}
