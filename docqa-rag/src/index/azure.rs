//! Azure AI Search index service over the REST API.
//!
//! This module is only available when the `azure` feature is enabled.

use std::collections::HashMap;
use std::sync::OnceLock;
use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{Value, json};
use tracing::{debug, error, info};

use crate::document::{IndexRecord, IndexStats, QueryResult, ScoredRecord};
use crate::error::{RagError, Result};
use crate::index::{Delete, IndexService, Query, Upsert};

const API_VERSION: &str = "2023-11-01";
const BACKEND: &str = "azure-search";

/// Documents per indexing request.
const UPLOAD_BATCH_SIZE: usize = 100;

/// Keys fetched per page when deleting a document's records.
const DELETE_PAGE_SIZE: usize = 1000;

const SELECT_FIELDS: &str = "chunk_id,document_id,page,sequence,text,vector,embedding_model_version";

/// An [`IndexService`] backed by an Azure AI Search index.
///
/// Records map one-to-one onto index documents keyed by `chunk_id`; the
/// vector field uses an HNSW profile with cosine similarity. The vector
/// dimensionality is read from the index definition once and cached.
pub struct AzureSearchIndex {
    client: reqwest::Client,
    endpoint: String,
    api_key: String,
    index_name: String,
    dimensions: OnceLock<usize>,
}

impl AzureSearchIndex {
    /// Create a client for `index_name` on the service at `endpoint`
    /// (e.g. `https://my-search.search.windows.net`).
    ///
    /// # Errors
    ///
    /// Returns [`RagError::ConfigError`] if any argument is empty or the
    /// HTTP client cannot be built.
    pub fn new(
        endpoint: impl Into<String>,
        api_key: impl Into<String>,
        index_name: impl Into<String>,
    ) -> Result<Self> {
        let endpoint = endpoint.into().trim_end_matches('/').to_string();
        let api_key = api_key.into();
        let index_name = index_name.into();
        if endpoint.is_empty() || api_key.is_empty() || index_name.is_empty() {
            return Err(RagError::ConfigError(
                "Azure Search endpoint, API key and index name are required".into(),
            ));
        }

        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .map_err(|e| RagError::ConfigError(format!("failed to build HTTP client: {e}")))?;

        Ok(Self { client, endpoint, api_key, index_name, dimensions: OnceLock::new() })
    }

    fn url(&self, path: &str) -> String {
        format!("{}/indexes/{}{path}?api-version={API_VERSION}", self.endpoint, self.index_name)
    }

    async fn send(&self, request: reqwest::RequestBuilder) -> Result<reqwest::Response> {
        let response = request.header("api-key", &self.api_key).send().await.map_err(|e| {
            error!(backend = BACKEND, error = %e, "request failed");
            RagError::IndexError {
                backend: BACKEND.into(),
                message: format!("request failed: {e}"),
                transient: true,
            }
        })?;

        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let body = response.text().await.unwrap_or_default();
        error!(backend = BACKEND, %status, "API error");
        Err(RagError::IndexError {
            backend: BACKEND.into(),
            message: format!("API returned {status}: {body}"),
            transient: status.as_u16() == 429 || status.is_server_error(),
        })
    }

    async fn post_json<T: for<'de> Deserialize<'de>>(&self, path: &str, body: &Value) -> Result<T> {
        let response = self.send(self.client.post(self.url(path)).json(body)).await?;
        response
            .json()
            .await
            .map_err(|e| RagError::index(BACKEND, format!("failed to parse response: {e}")))
    }

    async fn search(&self, body: Value) -> Result<SearchResponse> {
        self.post_json("/docs/search", &body).await
    }

    async fn index_actions(&self, actions: Vec<Value>) -> Result<()> {
        for batch in actions.chunks(UPLOAD_BATCH_SIZE) {
            let response: IndexResponse =
                self.post_json("/docs/index", &json!({ "value": batch })).await?;
            let failed: Vec<String> = response
                .value
                .into_iter()
                .filter(|r| !r.status)
                .map(|r| format!("{}: {}", r.key, r.error_message.unwrap_or_default()))
                .collect();
            if !failed.is_empty() {
                return Err(RagError::index(
                    BACKEND,
                    format!("{} documents rejected: {}", failed.len(), failed.join("; ")),
                ));
            }
            debug!(backend = BACKEND, count = batch.len(), "indexed batch");
        }
        Ok(())
    }

    /// Vector dimensionality of the existing index, `None` if it does not exist.
    async fn vector_dimensions(&self) -> Result<Option<usize>> {
        if let Some(dimensions) = self.dimensions.get() {
            return Ok(Some(*dimensions));
        }
        let found = self.definition().await?.and_then(|d| d.vector_dimensions());
        if let Some(dimensions) = found {
            let _ = self.dimensions.set(dimensions);
        }
        Ok(found)
    }

    /// Distinct embedding model versions currently stored.
    async fn model_versions(&self) -> Result<Vec<String>> {
        let body = json!({
            "search": "*",
            "top": 0,
            "facets": ["embedding_model_version,count:10"],
        });
        Ok(facet_strings(&self.search(body).await?, "embedding_model_version"))
    }

    /// Fetch the index definition, or `None` if it does not exist.
    async fn definition(&self) -> Result<Option<IndexDefinition>> {
        let request = self.client.get(self.url("")).header("api-key", &self.api_key);
        let response = request.send().await.map_err(|e| RagError::IndexError {
            backend: BACKEND.into(),
            message: format!("request failed: {e}"),
            transient: true,
        })?;
        if response.status() == reqwest::StatusCode::NOT_FOUND {
            return Ok(None);
        }
        if !response.status().is_success() {
            let status = response.status();
            return Err(RagError::IndexError {
                backend: BACKEND.into(),
                message: format!("API returned {status} reading index definition"),
                transient: status.as_u16() == 429 || status.is_server_error(),
            });
        }
        let definition = response
            .json()
            .await
            .map_err(|e| RagError::index(BACKEND, format!("failed to parse index definition: {e}")))?;
        Ok(Some(definition))
    }
}

/// Quote a string literal for an OData filter.
fn odata_literal(value: &str) -> String {
    format!("'{}'", value.replace('\'', "''"))
}

fn index_schema(name: &str, dimensions: usize) -> Value {
    json!({
        "name": name,
        "fields": [
            { "name": "chunk_id", "type": "Edm.String", "key": true, "filterable": true },
            { "name": "document_id", "type": "Edm.String", "filterable": true, "facetable": true },
            { "name": "page", "type": "Edm.Int32", "filterable": true },
            { "name": "sequence", "type": "Edm.Int32", "filterable": true, "sortable": true },
            { "name": "text", "type": "Edm.String", "searchable": true },
            {
                "name": "vector",
                "type": "Collection(Edm.Single)",
                "searchable": true,
                "dimensions": dimensions,
                "vectorSearchProfile": "vector-profile"
            },
            {
                "name": "embedding_model_version",
                "type": "Edm.String",
                "filterable": true,
                "facetable": true
            }
        ],
        "vectorSearch": {
            "algorithms": [
                { "name": "hnsw-config", "kind": "hnsw", "hnswParameters": { "metric": "cosine" } }
            ],
            "profiles": [{ "name": "vector-profile", "algorithm": "hnsw-config" }]
        }
    })
}

/// String values of one facet, in service order.
fn facet_strings(response: &SearchResponse, facet: &str) -> Vec<String> {
    response
        .facets
        .get(facet)
        .into_iter()
        .flatten()
        .filter_map(|f| f.value.as_str().map(str::to_string))
        .collect()
}

/// Check a batch against the stored dimensionality and model versions.
///
/// An index already holding more than one model version accepts no writes
/// until it is rebuilt.
fn check_records(records: &[IndexRecord], dimensions: Option<usize>, versions: &[String]) -> Result<()> {
    let Some(first) = records.first() else {
        return Ok(());
    };
    if versions.len() > 1 {
        return Err(RagError::SchemaError(format!(
            "index holds mixed embedding model versions ({}); re-index first",
            versions.join(", ")
        )));
    }
    let version = versions.first().unwrap_or(&first.embedding_model_version);
    let dimensions = dimensions.unwrap_or(first.vector.len());
    match records
        .iter()
        .find(|r| r.vector.len() != dimensions || &r.embedding_model_version != version)
    {
        Some(bad) => Err(RagError::SchemaError(format!(
            "record '{}' ({} dimensions, '{}') does not match index ({dimensions} dimensions, '{version}')",
            bad.chunk_id,
            bad.vector.len(),
            bad.embedding_model_version
        ))),
        None => Ok(()),
    }
}

fn upload_action(record: &IndexRecord) -> Value {
    json!({
        "@search.action": "mergeOrUpload",
        "chunk_id": record.chunk_id,
        "document_id": record.document_id,
        "page": record.page,
        "sequence": record.sequence,
        "text": record.text,
        "vector": record.vector,
        "embedding_model_version": record.embedding_model_version,
    })
}

#[derive(Deserialize)]
struct IndexDefinition {
    fields: Vec<FieldDefinition>,
}

impl IndexDefinition {
    fn vector_dimensions(&self) -> Option<usize> {
        self.fields.iter().find(|f| f.name == "vector").and_then(|f| f.dimensions)
    }
}

#[derive(Deserialize)]
struct FieldDefinition {
    name: String,
    dimensions: Option<usize>,
}

#[derive(Deserialize)]
struct IndexResponse {
    value: Vec<IndexResult>,
}

#[derive(Deserialize)]
struct IndexResult {
    key: String,
    status: bool,
    #[serde(rename = "errorMessage")]
    error_message: Option<String>,
}

#[derive(Deserialize)]
struct SearchResponse {
    #[serde(rename = "@odata.count")]
    count: Option<usize>,
    #[serde(rename = "@search.facets", default)]
    facets: HashMap<String, Vec<FacetValue>>,
    #[serde(default)]
    value: Vec<SearchHit>,
}

#[derive(Deserialize)]
struct FacetValue {
    value: Value,
}

#[derive(Deserialize)]
struct SearchHit {
    #[serde(rename = "@search.score")]
    score: f32,
    #[serde(flatten)]
    record: IndexRecord,
}

#[derive(Deserialize)]
struct KeyHit {
    chunk_id: String,
}

#[derive(Deserialize)]
struct KeyResponse {
    value: Vec<KeyHit>,
}

fn into_result(response: SearchResponse) -> QueryResult {
    // The service may return the same key twice across vector and text legs.
    let mut seen = std::collections::HashSet::new();
    let matches = response
        .value
        .into_iter()
        .filter(|hit| seen.insert(hit.record.chunk_id.clone()))
        .map(|hit| ScoredRecord { record: hit.record, score: hit.score })
        .collect();
    QueryResult::new(matches)
}

#[async_trait]
impl Upsert for AzureSearchIndex {
    async fn upsert(&self, records: &[IndexRecord]) -> Result<()> {
        if records.is_empty() {
            return Ok(());
        }
        let dimensions = self.vector_dimensions().await?;
        let versions = self.model_versions().await?;
        check_records(records, dimensions, &versions)?;

        self.index_actions(records.iter().map(upload_action).collect()).await
    }
}

#[async_trait]
impl Query for AzureSearchIndex {
    async fn vector_query(&self, vector: &[f32], top_k: usize) -> Result<QueryResult> {
        let body = json!({
            "select": SELECT_FIELDS,
            "top": top_k,
            "vectorQueries": [{ "kind": "vector", "vector": vector, "k": top_k, "fields": "vector" }],
        });
        Ok(into_result(self.search(body).await?))
    }

    async fn keyword_query(&self, text: &str, top_k: usize) -> Result<QueryResult> {
        let body = json!({
            "search": text,
            "searchFields": "text",
            "searchMode": "any",
            "select": SELECT_FIELDS,
            "top": top_k,
        });
        Ok(into_result(self.search(body).await?))
    }
}

#[async_trait]
impl Delete for AzureSearchIndex {
    async fn delete_by_document(&self, document_id: &str) -> Result<usize> {
        let filter = format!("document_id eq {}", odata_literal(document_id));
        let mut removed = 0;
        loop {
            let body = json!({
                "search": "*",
                "filter": filter,
                "select": "chunk_id",
                "top": DELETE_PAGE_SIZE,
            });
            let page: KeyResponse = self.post_json("/docs/search", &body).await?;
            if page.value.is_empty() {
                break;
            }
            let count = page.value.len();
            let actions = page
                .value
                .into_iter()
                .map(|hit| json!({ "@search.action": "delete", "chunk_id": hit.chunk_id }))
                .collect();
            self.index_actions(actions).await?;
            removed += count;
            if count < DELETE_PAGE_SIZE {
                break;
            }
        }
        debug!(backend = BACKEND, document_id, removed, "deleted document records");
        Ok(removed)
    }
}

#[async_trait]
impl IndexService for AzureSearchIndex {
    fn name(&self) -> &str {
        BACKEND
    }

    async fn ensure_index(&self, dimensions: usize) -> Result<()> {
        if dimensions == 0 {
            return Err(RagError::ConfigError("index dimensions must be greater than 0".into()));
        }
        if let Some(definition) = self.definition().await? {
            return match definition.vector_dimensions() {
                Some(existing) if existing != dimensions => Err(RagError::SchemaError(format!(
                    "index '{}' exists with {existing} dimensions, requested {dimensions}",
                    self.index_name
                ))),
                Some(existing) => {
                    let _ = self.dimensions.set(existing);
                    Ok(())
                }
                None => Ok(()),
            };
        }

        let schema = index_schema(&self.index_name, dimensions);
        self.send(self.client.put(self.url("")).json(&schema)).await?;
        let _ = self.dimensions.set(dimensions);
        info!(backend = BACKEND, index = %self.index_name, dimensions, "created index");
        Ok(())
    }

    async fn stats(&self) -> Result<IndexStats> {
        let body = json!({
            "search": "*",
            "count": true,
            "top": 0,
            "facets": ["document_id,count:100000", "embedding_model_version,count:10"],
        });
        let response = self.search(body).await?;
        let facet_len = |name: &str| response.facets.get(name).map_or(0, Vec::len);

        // A single facet value means the whole index shares one model.
        let versions = facet_strings(&response, "embedding_model_version");
        let embedding_model_version = match versions.as_slice() {
            [only] => Some(only.clone()),
            _ => None,
        };
        let dimensions = self.vector_dimensions().await?;

        Ok(IndexStats {
            record_count: response.count.unwrap_or(0),
            distinct_document_count: facet_len("document_id"),
            dimensions,
            embedding_model_version,
        })
    }
}
