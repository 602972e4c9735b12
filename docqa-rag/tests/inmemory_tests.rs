//! Property and behavior tests for the in-memory index.

use std::collections::HashSet;

use docqa_rag::{Delete, IndexRecord, IndexService, InMemoryIndex, Query, RagError, Upsert};
use proptest::prelude::*;

const VERSION: &str = "test-model-v1";

/// Generate a non-zero L2-normalized vector of the given dimension.
fn arb_normalized_vector(dim: usize) -> impl Strategy<Value = Vec<f32>> {
    proptest::collection::vec(-1.0f32..1.0f32, dim).prop_filter_map("non-zero vector", |mut v| {
        let norm: f32 = v.iter().map(|x| x * x).sum::<f32>().sqrt();
        if norm < 1e-6 {
            return None;
        }
        for val in &mut v {
            *val /= norm;
        }
        Some(v)
    })
}

fn arb_record(dim: usize) -> impl Strategy<Value = IndexRecord> {
    ("[a-z]{3,8}", 0usize..3, "[a-z]{2,6}( [a-z]{2,6}){0,5}", arb_normalized_vector(dim)).prop_map(
        |(id, doc, text, vector)| IndexRecord {
            chunk_id: format!("doc{doc}_{id}"),
            document_id: format!("doc{doc}.txt"),
            page: 1,
            sequence: 0,
            text,
            vector,
            embedding_model_version: VERSION.into(),
        },
    )
}

fn record(chunk_id: &str, document_id: &str, text: &str, vector: Vec<f32>) -> IndexRecord {
    IndexRecord {
        chunk_id: chunk_id.into(),
        document_id: document_id.into(),
        page: 1,
        sequence: 0,
        text: text.into(),
        vector,
        embedding_model_version: VERSION.into(),
    }
}

/// **Property 1: Vector search ordering**
/// *For any* set of records and query vector, a vector query SHALL return
/// at most `top_k` distinct chunks ordered by descending score.
mod prop_vector_search_ordering {
    use super::*;

    const DIM: usize = 16;

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(64))]

        #[test]
        fn results_ordered_descending_unique_and_bounded(
            records in proptest::collection::vec(arb_record(DIM), 1..30),
            query in arb_normalized_vector(DIM),
            top_k in 1usize..40,
        ) {
            let rt = tokio::runtime::Runtime::new().unwrap();
            let (result, stored) = rt.block_on(async {
                let index = InMemoryIndex::new();
                index.ensure_index(DIM).await.unwrap();
                index.upsert(&records).await.unwrap();
                let stored = index.len().await;
                (index.vector_query(&query, top_k).await.unwrap(), stored)
            });

            let distinct: HashSet<&str> = records.iter().map(|r| r.chunk_id.as_str()).collect();
            prop_assert_eq!(stored, distinct.len());
            prop_assert!(result.len() <= top_k.min(stored));

            let ids: HashSet<&str> = result.iter().map(|m| m.record.chunk_id.as_str()).collect();
            prop_assert_eq!(ids.len(), result.len());

            for window in result.matches.windows(2) {
                prop_assert!(
                    window[0].score >= window[1].score,
                    "results not in descending order: {} < {}",
                    window[0].score,
                    window[1].score,
                );
            }
        }
    }
}

/// **Property 2: Keyword matches share a term with the query**
/// *For any* set of records, every keyword hit SHALL contain at least one
/// query term, and deleting a document SHALL remove it from every result.
mod prop_keyword_and_delete {
    use super::*;

    const DIM: usize = 8;

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(64))]

        #[test]
        fn keyword_hits_contain_a_query_term(
            records in proptest::collection::vec(arb_record(DIM), 1..30),
            query in "[a-z]{2,6}( [a-z]{2,6}){0,2}",
        ) {
            let rt = tokio::runtime::Runtime::new().unwrap();
            let (before, after) = rt.block_on(async {
                let index = InMemoryIndex::new();
                index.upsert(&records).await.unwrap();
                let before = index.keyword_query(&query, 50).await.unwrap();
                index.delete_by_document("doc0.txt").await.unwrap();
                let after = index.keyword_query(&query, 50).await.unwrap();
                (before, after)
            });

            let terms: Vec<&str> = query.split(' ').collect();
            for hit in before.iter() {
                let words: Vec<&str> = hit.record.text.split(' ').collect();
                prop_assert!(terms.iter().any(|t| words.contains(t)));
            }
            prop_assert!(after.iter().all(|m| m.record.document_id != "doc0.txt"));
        }
    }
}

#[tokio::test]
async fn rejects_wrong_dimensions_without_writing() {
    let index = InMemoryIndex::new();
    index.ensure_index(2).await.unwrap();

    let batch = vec![record("a_0", "a.txt", "fine", vec![1.0, 0.0]), record("a_1", "a.txt", "bad", vec![1.0])];
    let err = index.upsert(&batch).await.unwrap_err();

    assert!(matches!(err, RagError::SchemaError(_)));
    assert!(index.is_empty().await);
}

#[tokio::test]
async fn rejects_mixed_model_versions() {
    let index = InMemoryIndex::new();
    index.upsert(&[record("a_0", "a.txt", "first", vec![1.0, 0.0])]).await.unwrap();

    let mut other = record("b_0", "b.txt", "second", vec![0.0, 1.0]);
    other.embedding_model_version = "other-model".into();
    let err = index.upsert(&[other]).await.unwrap_err();

    assert!(matches!(err, RagError::SchemaError(_)));
    assert_eq!(index.len().await, 1);
}

#[tokio::test]
async fn ensure_index_rejects_dimension_change() {
    let index = InMemoryIndex::new();
    index.ensure_index(384).await.unwrap();
    index.ensure_index(384).await.unwrap();

    let err = index.ensure_index(768).await.unwrap_err();
    assert!(matches!(err, RagError::SchemaError(_)));
    assert!(matches!(index.ensure_index(0).await, Err(RagError::ConfigError(_))));
}

#[tokio::test]
async fn replace_document_swaps_all_records() {
    let index = InMemoryIndex::new();
    index
        .upsert(&[
            record("a_0", "a.txt", "old one", vec![1.0, 0.0]),
            record("a_1", "a.txt", "old two", vec![0.0, 1.0]),
            record("b_0", "b.txt", "other", vec![0.7, 0.7]),
        ])
        .await
        .unwrap();

    index.replace_document("a.txt", &[record("a_0", "a.txt", "new", vec![1.0, 0.0])]).await.unwrap();

    let stats = index.stats().await.unwrap();
    assert_eq!(stats.record_count, 2);
    assert_eq!(stats.distinct_document_count, 2);
    assert!(index.get("a_1").await.is_none());
    assert_eq!(index.get("a_0").await.unwrap().text, "new");
    assert!(index.keyword_query("old", 10).await.unwrap().is_empty());
}

#[tokio::test]
async fn failed_replace_keeps_previous_records() {
    let index = InMemoryIndex::new();
    index.upsert(&[record("a_0", "a.txt", "kept", vec![1.0, 0.0])]).await.unwrap();

    let stray = record("b_0", "b.txt", "wrong document", vec![1.0, 0.0]);
    assert!(index.replace_document("a.txt", &[stray]).await.is_err());
    let short = record("a_0", "a.txt", "wrong shape", vec![1.0]);
    assert!(index.replace_document("a.txt", &[short]).await.is_err());

    assert_eq!(index.get("a_0").await.unwrap().text, "kept");
}

#[tokio::test]
async fn emptied_index_accepts_a_new_model_version() {
    let index = InMemoryIndex::new();
    index.upsert(&[record("a_0", "a.txt", "first", vec![1.0, 0.0])]).await.unwrap();
    assert_eq!(index.delete_by_document("a.txt").await.unwrap(), 1);
    assert_eq!(index.delete_by_document("a.txt").await.unwrap(), 0);

    let mut next = record("a_0", "a.txt", "again", vec![1.0, 0.0]);
    next.embedding_model_version = "other-model".into();
    index.upsert(&[next]).await.unwrap();

    let stats = index.stats().await.unwrap();
    assert_eq!(stats.embedding_model_version.as_deref(), Some("other-model"));
}

#[tokio::test]
async fn heavy_churn_keeps_search_consistent() {
    let index = InMemoryIndex::new();
    for round in 0..5 {
        let records: Vec<IndexRecord> = (0..40)
            .map(|i| {
                let angle = (i as f32 + round as f32) * 0.1;
                record(&format!("d_{i}"), "d.txt", &format!("round{round} item{i}"), vec![angle.cos(), angle.sin()])
            })
            .collect();
        index.replace_document("d.txt", &records).await.unwrap();
    }

    assert_eq!(index.len().await, 40);
    let hits = index.vector_query(&[1.0, 0.0], 5).await.unwrap();
    assert_eq!(hits.len(), 5);
    assert!(hits.iter().all(|m| m.record.text.starts_with("round4")));
}

#[tokio::test]
async fn chunk_id_of_another_document_is_rejected() {
    let index = InMemoryIndex::new();
    index.upsert(&[record("notes_0", "notes.pdf", "zebras", vec![1.0, 0.0])]).await.unwrap();

    let err = index.upsert(&[record("notes_0", "notes.md", "giraffes", vec![0.0, 1.0])]).await.unwrap_err();

    assert!(matches!(err, RagError::SchemaError(_)));
    assert_eq!(index.get("notes_0").await.unwrap().text, "zebras");
    assert_eq!(index.stats().await.unwrap().distinct_document_count, 1);
}
