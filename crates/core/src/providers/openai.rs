use crate::embeddings::EmbeddingProvider;
use crate::error::SearchError;
use async_trait::async_trait;
use reqwest::Client;
use serde_json::{json, Value};
use std::time::Duration;
use url::Url;

const HTTP_TIMEOUT: Duration = Duration::from_secs(30);

/// Embedding backend speaking the OpenAI `/v1/embeddings` schema,
/// which Mistral's embeddings endpoint also implements. The model's
/// declared dimension is enforced on every returned vector.
pub struct OpenAiCompatEmbeddings {
    client: Client,
    endpoint: Url,
    api_key: String,
    model: String,
    dimensions: usize,
}

impl OpenAiCompatEmbeddings {
    pub fn new(
        base_url: &str,
        api_key: impl Into<String>,
        model: impl Into<String>,
        dimensions: usize,
    ) -> Result<Self, SearchError> {
        let base = Url::parse(base_url)?;
        let endpoint = base.join("v1/embeddings")?;

        Ok(Self {
            client: Client::builder().timeout(HTTP_TIMEOUT).build()?,
            endpoint,
            api_key: api_key.into(),
            model: model.into(),
            dimensions,
        })
    }
}

#[async_trait]
impl EmbeddingProvider for OpenAiCompatEmbeddings {
    fn dimensions(&self) -> usize {
        self.dimensions
    }

    fn model_id(&self) -> &str {
        &self.model
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, SearchError> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }

        let response = self
            .client
            .post(self.endpoint.clone())
            .bearer_auth(&self.api_key)
            .json(&json!({
                "model": self.model,
                "input": texts,
            }))
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(SearchError::EmbeddingProvider(format!(
                "embeddings endpoint returned {}",
                response.status()
            )));
        }

        let parsed: Value = response.json().await?;
        let data = parsed
            .pointer("/data")
            .and_then(Value::as_array)
            .ok_or_else(|| SearchError::BackendResponse {
                backend: "embeddings".to_string(),
                details: "response is missing the data array".to_string(),
            })?;

        if data.len() != texts.len() {
            return Err(SearchError::BackendResponse {
                backend: "embeddings".to_string(),
                details: format!("{} embeddings for {} inputs", data.len(), texts.len()),
            });
        }

        // Responses carry an index field; order by it rather than
        // trusting array order.
        let mut vectors: Vec<Vec<f32>> = vec![Vec::new(); texts.len()];
        for item in data {
            let position = item
                .pointer("/index")
                .and_then(Value::as_u64)
                .ok_or_else(|| SearchError::BackendResponse {
                    backend: "embeddings".to_string(),
                    details: "embedding item is missing its index".to_string(),
                })? as usize;

            let embedding = item
                .pointer("/embedding")
                .and_then(Value::as_array)
                .ok_or_else(|| SearchError::BackendResponse {
                    backend: "embeddings".to_string(),
                    details: "embedding item is missing its vector".to_string(),
                })?;

            let vector: Vec<f32> = embedding
                .iter()
                .filter_map(Value::as_f64)
                .map(|value| value as f32)
                .collect();

            if vector.len() != self.dimensions {
                return Err(SearchError::DimensionMismatch {
                    expected: self.dimensions,
                    actual: vector.len(),
                });
            }
            if position >= vectors.len() {
                return Err(SearchError::BackendResponse {
                    backend: "embeddings".to_string(),
                    details: format!("embedding index {position} out of range"),
                });
            }

            vectors[position] = vector;
        }

        Ok(vectors)
    }
}
