use crate::error::SearchError;
use crate::models::{Chunk, Metadata, MetadataFilter};
use crate::traits::VectorStore;
use async_trait::async_trait;
use reqwest::Client;
use serde_json::{json, Value};
use std::time::Duration;

const HTTP_TIMEOUT: Duration = Duration::from_secs(30);

/// HTTP adapter for a qdrant collection. Chunk ids are UUID-formatted
/// content hashes, so they are used directly as point ids. Requests
/// carry a deadline so a stalled backend fails the call instead of
/// hanging ingest or queries.
pub struct QdrantStore {
    endpoint: String,
    collection: String,
    client: Client,
    vector_size: usize,
}

impl QdrantStore {
    pub fn new(
        endpoint: impl Into<String>,
        collection: impl Into<String>,
        vector_size: usize,
    ) -> Result<Self, SearchError> {
        Ok(Self {
            endpoint: endpoint.into(),
            collection: collection.into(),
            client: Client::builder().timeout(HTTP_TIMEOUT).build()?,
            vector_size,
        })
    }

    /// Creates the collection if it does not exist yet.
    pub async fn ensure_collection(&self) -> Result<(), SearchError> {
        let response = self
            .client
            .get(format!("{}/collections/{}", self.endpoint, self.collection))
            .send()
            .await?;

        if response.status().is_success() {
            return Ok(());
        }

        let response = self
            .client
            .put(format!("{}/collections/{}", self.endpoint, self.collection))
            .json(&json!({
                "vectors": {
                    "size": self.vector_size,
                    "distance": "Cosine",
                }
            }))
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(SearchError::BackendResponse {
                backend: "qdrant".to_string(),
                details: response.status().to_string(),
            });
        }

        Ok(())
    }
}

#[async_trait]
impl VectorStore for QdrantStore {
    async fn upsert(&self, chunks: &[Chunk]) -> Result<(), SearchError> {
        let points = chunks
            .iter()
            .map(|chunk| {
                let embedding = chunk.embedding.as_ref().ok_or_else(|| {
                    SearchError::BackendResponse {
                        backend: "qdrant".to_string(),
                        details: format!("chunk {} has no embedding to persist", chunk.id),
                    }
                })?;

                if embedding.len() != self.vector_size {
                    return Err(SearchError::DimensionMismatch {
                        expected: self.vector_size,
                        actual: embedding.len(),
                    });
                }

                Ok(json!({
                    "id": chunk.id,
                    "vector": embedding,
                    "payload": {
                        "document_id": chunk.document_id,
                        "chunk_index": chunk.chunk_index,
                        "text": chunk.text,
                        "metadata": chunk.metadata,
                    },
                }))
            })
            .collect::<Result<Vec<_>, SearchError>>()?;

        if points.is_empty() {
            return Ok(());
        }

        let response = self
            .client
            .put(format!(
                "{}/collections/{}/points?wait=true",
                self.endpoint, self.collection
            ))
            .json(&json!({ "points": points }))
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(SearchError::BackendResponse {
                backend: "qdrant".to_string(),
                details: response.status().to_string(),
            });
        }

        Ok(())
    }

    async fn query_nearest(
        &self,
        vector: &[f32],
        k: usize,
        filter: Option<&MetadataFilter>,
    ) -> Result<Vec<(String, f64)>, SearchError> {
        if vector.len() != self.vector_size {
            return Err(SearchError::DimensionMismatch {
                expected: self.vector_size,
                actual: vector.len(),
            });
        }

        let mut body = json!({
            "vector": vector,
            "limit": k,
            "with_payload": false,
        });

        if let Some(predicates) = filter.filter(|f| !f.is_empty()).map(build_filter) {
            body["filter"] = predicates;
        }

        let response = self
            .client
            .post(format!(
                "{}/collections/{}/points/search",
                self.endpoint, self.collection
            ))
            .json(&body)
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(SearchError::BackendResponse {
                backend: "qdrant".to_string(),
                details: response.status().to_string(),
            });
        }

        let parsed: Value = response.json().await?;
        let hits = parsed
            .pointer("/result")
            .and_then(Value::as_array)
            .cloned()
            .unwrap_or_default();

        let mut result = Vec::new();
        for hit in hits {
            let chunk_id = hit
                .pointer("/id")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string();
            let score = hit.pointer("/score").and_then(Value::as_f64).unwrap_or(0.0);
            result.push((chunk_id, score));
        }

        Ok(result)
    }

    async fn get(&self, chunk_id: &str) -> Result<Option<Chunk>, SearchError> {
        let response = self
            .client
            .get(format!(
                "{}/collections/{}/points/{}",
                self.endpoint, self.collection, chunk_id
            ))
            .send()
            .await?;

        if response.status().as_u16() == 404 {
            return Ok(None);
        }
        if !response.status().is_success() {
            return Err(SearchError::BackendResponse {
                backend: "qdrant".to_string(),
                details: response.status().to_string(),
            });
        }

        let parsed: Value = response.json().await?;
        let payload = match parsed.pointer("/result/payload") {
            Some(payload) if !payload.is_null() => payload.clone(),
            _ => return Ok(None),
        };

        Ok(Some(chunk_from_payload(chunk_id, &payload)))
    }

    async fn is_empty(&self) -> Result<bool, SearchError> {
        let response = self
            .client
            .post(format!(
                "{}/collections/{}/points/count",
                self.endpoint, self.collection
            ))
            .json(&json!({ "exact": false }))
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(SearchError::BackendResponse {
                backend: "qdrant".to_string(),
                details: response.status().to_string(),
            });
        }

        let parsed: Value = response.json().await?;
        let count = parsed
            .pointer("/result/count")
            .and_then(Value::as_u64)
            .unwrap_or(0);
        Ok(count == 0)
    }
}

fn build_filter(filter: &MetadataFilter) -> Value {
    let must: Vec<Value> = filter
        .equals
        .iter()
        .map(|(key, value)| {
            json!({
                "key": format!("metadata.{key}"),
                "match": { "value": value },
            })
        })
        .collect();

    json!({ "must": must })
}

fn chunk_from_payload(chunk_id: &str, payload: &Value) -> Chunk {
    let metadata: Metadata = payload
        .pointer("/metadata")
        .and_then(|value| serde_json::from_value(value.clone()).ok())
        .unwrap_or_default();

    Chunk {
        id: chunk_id.to_string(),
        document_id: payload
            .pointer("/document_id")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string(),
        text: payload
            .pointer("/text")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string(),
        chunk_index: payload
            .pointer("/chunk_index")
            .and_then(Value::as_u64)
            .unwrap_or(0) as usize,
        embedding: None,
        metadata,
    }
}
