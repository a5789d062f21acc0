use std::collections::HashMap;

use docchat_core::{Document, StoreError, VectorStore};
use docchat_retrieval::{FlatIndex, IndexEntry, INDEX_FILE_NAME};
use serde_json::json;
use tempfile::tempdir;

fn entry(id: &str, embedding: Vec<f32>, source: &str) -> IndexEntry {
    let mut metadata = HashMap::new();
    metadata.insert("source".to_string(), json!(source));
    IndexEntry {
        id: id.to_string(),
        embedding,
        text: format!("text of {id}"),
        metadata,
    }
}

fn doc(id: &str, content: &str, embedding: Vec<f32>) -> Document {
    Document {
        id: id.to_string(),
        content: content.to_string(),
        metadata: HashMap::new(),
        embedding: Some(embedding),
    }
}

#[tokio::test]
async fn flat_index_ranks_by_cosine_similarity() {
    let index = FlatIndex::build(vec![
        entry("a", vec![1.0, 0.0, 0.0], "a.pdf"),
        entry("b", vec![0.0, 1.0, 0.0], "b.pdf"),
        entry("c", vec![0.7, 0.7, 0.0], "c.pdf"),
    ])
    .unwrap();

    let results = index.query(&[1.0, 0.0, 0.0], 2).await.unwrap();

    assert_eq!(results.len(), 2);
    assert_eq!(results[0].document.id, "a");
    assert_eq!(results[1].document.id, "c");
    assert!(results[0].score >= results[1].score);
    assert_eq!(results[0].document.content, "text of a");
    assert!(results[0].document.embedding.is_none());
}

#[tokio::test]
async fn flat_index_returns_at_most_k_in_non_increasing_order() {
    let entries: Vec<IndexEntry> = (0..20)
        .map(|idx| {
            let angle = idx as f32 * 0.15;
            entry(&format!("e{idx}"), vec![angle.cos(), angle.sin()], "s.pdf")
        })
        .collect();
    let index = FlatIndex::build(entries).unwrap();

    for k in [0, 1, 5, 20, 50] {
        let results = index.query(&[0.3, 0.9], k).await.unwrap();
        assert_eq!(results.len(), k.min(20));
        assert!(results.windows(2).all(|pair| pair[0].score >= pair[1].score));
    }
}

#[tokio::test]
async fn flat_index_ties_keep_insertion_order() {
    let index = FlatIndex::build(vec![
        entry("first", vec![1.0, 0.0], "s.pdf"),
        entry("second", vec![2.0, 0.0], "s.pdf"),
        entry("third", vec![3.0, 0.0], "s.pdf"),
    ])
    .unwrap();

    let ids: Vec<String> = index
        .query(&[1.0, 0.0], 3)
        .await
        .unwrap()
        .into_iter()
        .map(|result| result.document.id)
        .collect();

    assert_eq!(ids, vec!["first", "second", "third"]);
}

#[tokio::test]
async fn flat_index_nan_scores_rank_last() {
    let index = FlatIndex::build(vec![
        entry("nan", vec![f32::NAN, 0.0, 0.0], "s.pdf"),
        entry("b", vec![0.0, 1.0, 0.0], "s.pdf"),
    ])
    .unwrap();

    let results = index.query(&[1.0, 0.0, 0.0], 5).await.unwrap();

    assert_eq!(results.len(), 2);
    assert_eq!(results[0].document.id, "b");
    assert_eq!(results[1].document.id, "nan");
}

#[tokio::test]
async fn flat_index_empty_index_returns_nothing() {
    let index = FlatIndex::new();

    assert!(index.query(&[1.0, 2.0], 2).await.unwrap().is_empty());
    assert!(index.is_empty().await);
    assert_eq!(index.dimension().await, None);
}

#[tokio::test]
async fn flat_index_rejects_mismatched_dimensions() {
    let error = FlatIndex::build(vec![
        entry("a", vec![1.0, 0.0], "s.pdf"),
        entry("b", vec![1.0, 0.0, 0.0], "s.pdf"),
    ])
    .unwrap_err();
    assert!(matches!(error, StoreError::DimensionMismatch { expected: 2, got: 3 }));

    let index = FlatIndex::build(vec![entry("a", vec![1.0, 0.0], "s.pdf")]).unwrap();
    let error = index.query(&[1.0, 0.0, 0.0], 1).await.unwrap_err();
    assert!(format!("{error}").contains("dimension mismatch"));

    let error = index
        .add(vec![doc("b", "b", vec![1.0, 0.0, 0.0])])
        .await
        .unwrap_err();
    assert!(matches!(error, StoreError::DimensionMismatch { expected: 2, got: 3 }));
    assert_eq!(index.len().await, 1);
}

#[tokio::test]
async fn flat_index_vector_store_add_upserts_by_id() {
    let index = FlatIndex::new();
    index
        .add(vec![doc("a", "first", vec![1.0, 0.0, 0.0])])
        .await
        .unwrap();
    index
        .add(vec![doc("a", "second", vec![1.0, 0.0, 0.0])])
        .await
        .unwrap();

    let results = index.search(&[1.0, 0.0, 0.0], 5).await.unwrap();
    assert_eq!(results.len(), 1);
    assert_eq!(results[0].document.content, "second");

    index.delete(&["a".to_string()]).await.unwrap();
    assert!(index.is_empty().await);
}

#[tokio::test]
async fn flat_index_add_requires_embedding_and_id() {
    let index = FlatIndex::new();

    let mut missing = doc("a", "a", vec![1.0]);
    missing.embedding = None;
    let error = index.add(vec![missing]).await.unwrap_err();
    assert!(matches!(error, StoreError::MissingEmbedding { id } if id == "a"));

    let error = index.add(vec![doc("  ", "a", vec![1.0])]).await.unwrap_err();
    assert!(matches!(error, StoreError::InvalidId(_)));
}

#[tokio::test]
async fn flat_index_save_then_load_answers_identically() {
    let dir = tempdir().unwrap();
    let index = FlatIndex::build(vec![
        entry("a", vec![1.0, 0.0, 0.0], "a.pdf"),
        entry("b", vec![0.0, 1.0, 0.0], "b.pdf"),
        entry("c", vec![0.5, 0.5, 0.1], "c.pdf"),
    ])
    .unwrap();

    index.save(dir.path()).await.unwrap();
    index.save(dir.path()).await.unwrap();
    assert!(dir.path().join(INDEX_FILE_NAME).exists());
    assert!(!dir.path().join(format!("{INDEX_FILE_NAME}.tmp")).exists());

    let loaded = FlatIndex::load(dir.path()).await.unwrap();
    assert_eq!(loaded.entries().await, index.entries().await);
    for query in [[1.0, 0.0, 0.0], [0.2, 0.9, 0.0], [0.4, 0.4, 0.4]] {
        assert_eq!(
            loaded.query(&query, 2).await.unwrap(),
            index.query(&query, 2).await.unwrap()
        );
    }
}

#[tokio::test]
async fn flat_index_load_reports_missing_and_corrupt_indexes() {
    let dir = tempdir().unwrap();

    let error = FlatIndex::load(dir.path()).await.unwrap_err();
    assert!(matches!(error, StoreError::IndexNotFound { path } if path == dir.path().join(INDEX_FILE_NAME)));

    std::fs::write(dir.path().join(INDEX_FILE_NAME), "{ not json").unwrap();
    let error = FlatIndex::load(dir.path()).await.unwrap_err();
    assert!(matches!(error, StoreError::Corrupt { .. }));

    std::fs::write(
        dir.path().join(INDEX_FILE_NAME),
        r#"{"version":99,"metric":"cosine","dimension":2,"entries":[]}"#,
    )
    .unwrap();
    let error = FlatIndex::load(dir.path()).await.unwrap_err();
    assert!(format!("{error}").contains("unsupported format version 99"));
}

#[tokio::test]
async fn flat_index_replace_source_swaps_only_that_source() {
    let index = FlatIndex::build(vec![
        entry("a:0", vec![1.0, 0.0], "a.txt"),
        entry("a:1", vec![0.9, 0.1], "a.txt"),
        entry("b:0", vec![0.0, 1.0], "b.txt"),
    ])
    .unwrap();

    let replaced = index
        .replace_source("a.txt", vec![entry("a:0", vec![0.5, 0.5], "a.txt")])
        .await
        .unwrap();

    assert_eq!(replaced, 2);
    let ids: Vec<String> = index.entries().await.into_iter().map(|e| e.id).collect();
    assert_eq!(ids, vec!["b:0", "a:0"]);

    assert_eq!(index.delete_by_source("b.txt").await, 1);
    assert_eq!(index.len().await, 1);
}

#[tokio::test]
async fn flat_index_replace_with_is_seen_by_all_clones() {
    let live = FlatIndex::build(vec![entry("old", vec![1.0, 0.0], "old.pdf")]).unwrap();
    let reader = live.clone();

    let fresh = FlatIndex::build(vec![
        entry("new-1", vec![1.0, 0.0], "new.pdf"),
        entry("new-2", vec![0.0, 1.0], "new.pdf"),
    ])
    .unwrap();
    live.replace_with(fresh).await;

    let results = reader.query(&[1.0, 0.0], 1).await.unwrap();
    assert_eq!(reader.len().await, 2);
    assert_eq!(results[0].document.id, "new-1");
}
