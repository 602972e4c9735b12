//! Query-time search over the index: vector, keyword, or both.

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use tracing::{debug, error, info};

use crate::config::RagConfig;
use crate::document::{QueryResult, ScoredRecord};
use crate::embedding::EmbeddingProvider;
use crate::error::{RagError, Result};
use crate::index::IndexService;

/// How a query is matched against the index.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SearchMode {
    /// Cosine similarity between the query embedding and chunk vectors.
    Vector,
    /// BM25 relevance of the query terms.
    Keyword,
    /// Both rankings, normalized and combined.
    #[default]
    Hybrid,
}

impl SearchMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            SearchMode::Vector => "vector",
            SearchMode::Keyword => "keyword",
            SearchMode::Hybrid => "hybrid",
        }
    }
}

impl fmt::Display for SearchMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SearchMode {
    type Err = RagError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "vector" => Ok(SearchMode::Vector),
            "keyword" => Ok(SearchMode::Keyword),
            "hybrid" => Ok(SearchMode::Hybrid),
            other => Err(RagError::QueryError(format!(
                "unknown search mode '{other}' (expected vector, keyword or hybrid)"
            ))),
        }
    }
}

/// Executes searches against an [`IndexService`].
///
/// Every search runs under one deadline. When it expires the in-flight
/// embedding and index calls are dropped and [`RagError::TimeoutError`] is
/// returned; failures are never reported as empty results.
pub struct Retriever {
    embedder: Arc<dyn EmbeddingProvider>,
    index: Arc<dyn IndexService>,
    vector_weight: f32,
    keyword_weight: f32,
    timeout: Duration,
}

impl Retriever {
    pub fn new(
        config: &RagConfig,
        embedder: Arc<dyn EmbeddingProvider>,
        index: Arc<dyn IndexService>,
    ) -> Self {
        Self {
            embedder,
            index,
            vector_weight: config.vector_weight,
            keyword_weight: config.keyword_weight,
            timeout: config.query_timeout(),
        }
    }

    /// Search the index for `query`.
    ///
    /// # Errors
    ///
    /// * [`RagError::QueryError`] for a blank query or `top_k == 0`
    /// * [`RagError::SchemaError`] if the index was built with another
    ///   embedding model (vector and hybrid modes)
    /// * [`RagError::TimeoutError`] if the deadline expires
    /// * embedding and index errors as reported by the collaborators
    pub async fn search(&self, query: &str, mode: SearchMode, top_k: usize) -> Result<QueryResult> {
        if query.trim().is_empty() {
            return Err(RagError::QueryError("query must not be empty".into()));
        }
        if top_k == 0 {
            return Err(RagError::QueryError("top_k must be greater than zero".into()));
        }

        let started = Instant::now();
        let result = tokio::time::timeout(self.timeout, self.run(query, mode, top_k))
            .await
            .map_err(|_| RagError::TimeoutError {
                operation: format!("{mode} search"),
                elapsed: self.timeout,
            })
            .and_then(|inner| inner);

        match &result {
            Ok(found) => info!(
                %mode,
                top_k,
                result_count = found.len(),
                elapsed_ms = started.elapsed().as_millis() as u64,
                "search completed"
            ),
            Err(e) => error!(%mode, top_k, error = %e, "search failed"),
        }
        result
    }

    async fn run(&self, query: &str, mode: SearchMode, top_k: usize) -> Result<QueryResult> {
        match mode {
            SearchMode::Vector => self.vector_search(query, top_k).await,
            SearchMode::Keyword => self.index.keyword_query(query, top_k).await,
            SearchMode::Hybrid => {
                let (vector, keyword) = tokio::try_join!(
                    self.vector_search(query, top_k),
                    self.index.keyword_query(query, top_k)
                )?;
                debug!(vector = vector.len(), keyword = keyword.len(), "merging hybrid rankings");
                Ok(merge_hybrid(vector, keyword, self.vector_weight, self.keyword_weight, top_k))
            }
        }
    }

    async fn vector_search(&self, query: &str, top_k: usize) -> Result<QueryResult> {
        let stats = self.index.stats().await?;
        if let Some(indexed) = stats.embedding_model_version.as_deref() {
            let current = self.embedder.model_version();
            if indexed != current {
                return Err(RagError::SchemaError(format!(
                    "index was built with '{indexed}', query embedder is '{current}'; re-index first"
                )));
            }
        }
        let vector = self.embedder.embed(query).await?;
        self.index.vector_query(&vector, top_k).await
    }
}

/// Min-max normalize `scores` into `[0, 1]`. A ranking whose scores are all
/// equal normalizes to 1.0.
fn normalize(scores: &[f32]) -> Vec<f32> {
    let min = scores.iter().copied().fold(f32::INFINITY, f32::min);
    let max = scores.iter().copied().fold(f32::NEG_INFINITY, f32::max);
    let range = max - min;
    if !range.is_finite() || range <= f32::EPSILON {
        return vec![1.0; scores.len()];
    }
    scores.iter().map(|s| (s - min) / range).collect()
}

/// Combine a vector ranking and a keyword ranking into one.
///
/// Each ranking is normalized on its own, then a chunk scores
/// `vector_weight * v + keyword_weight * k`, where a ranking that does not
/// contain the chunk contributes 0. The result is unique by `chunk_id`,
/// sorted by descending combined score (ties keep first appearance,
/// vector ranking first) and cut to `top_k`.
pub fn merge_hybrid(
    vector: QueryResult,
    keyword: QueryResult,
    vector_weight: f32,
    keyword_weight: f32,
    top_k: usize,
) -> QueryResult {
    let mut merged: Vec<ScoredRecord> = Vec::new();
    let mut positions: HashMap<String, usize> = HashMap::new();

    for (ranking, weight) in [(vector, vector_weight), (keyword, keyword_weight)] {
        let raw: Vec<f32> = ranking.matches.iter().map(|m| m.score).collect();
        let normalized = normalize(&raw);

        // Within one ranking a duplicated chunk keeps its best score.
        let mut seen: HashMap<String, f32> = HashMap::new();
        for (scored, norm) in ranking.matches.into_iter().zip(normalized) {
            let contribution = weight * norm;
            let chunk_id = scored.record.chunk_id.clone();
            let previous = seen.get(&chunk_id).copied();
            if previous.is_some_and(|p| p >= contribution) {
                continue;
            }
            seen.insert(chunk_id.clone(), contribution);

            match positions.get(&chunk_id) {
                Some(&at) => merged[at].score += contribution - previous.unwrap_or(0.0),
                None => {
                    positions.insert(chunk_id, merged.len());
                    merged.push(ScoredRecord { record: scored.record, score: contribution });
                }
            }
        }
    }

    merged.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));
    merged.truncate(top_k);
    QueryResult::new(merged)
}
