use crate::error::SearchError;
use crate::traits::RerankProvider;
use async_trait::async_trait;
use reqwest::Client;
use serde_json::{json, Value};
use std::time::Duration;
use url::Url;

const HTTP_TIMEOUT: Duration = Duration::from_secs(30);

/// Rerank backend speaking the Cohere `/rerank` schema: passages go
/// out, `(index, relevance_score)` pairs come back.
pub struct CohereRerank {
    client: Client,
    endpoint: Url,
    api_key: String,
    model: String,
}

impl CohereRerank {
    pub fn new(
        base_url: &str,
        api_key: impl Into<String>,
        model: impl Into<String>,
    ) -> Result<Self, SearchError> {
        let base = Url::parse(base_url)?;
        let endpoint = base.join("v1/rerank")?;

        Ok(Self {
            client: Client::builder().timeout(HTTP_TIMEOUT).build()?,
            endpoint,
            api_key: api_key.into(),
            model: model.into(),
        })
    }
}

#[async_trait]
impl RerankProvider for CohereRerank {
    async fn score(&self, query: &str, passages: &[String]) -> Result<Vec<f32>, SearchError> {
        if passages.is_empty() {
            return Ok(Vec::new());
        }

        let response = self
            .client
            .post(self.endpoint.clone())
            .bearer_auth(&self.api_key)
            .json(&json!({
                "model": self.model,
                "query": query,
                "documents": passages,
                "top_n": passages.len(),
            }))
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(SearchError::RerankProvider(format!(
                "rerank endpoint returned {}",
                response.status()
            )));
        }

        let parsed: Value = response.json().await?;
        let results = parsed
            .pointer("/results")
            .and_then(Value::as_array)
            .ok_or_else(|| SearchError::BackendResponse {
                backend: "rerank".to_string(),
                details: "response is missing the results array".to_string(),
            })?;

        // Realign sparse (index, score) pairs to the input order;
        // passages the provider omitted keep a zero score.
        let mut scores = vec![0.0f32; passages.len()];
        for result in results {
            let position = result
                .pointer("/index")
                .and_then(Value::as_u64)
                .ok_or_else(|| SearchError::BackendResponse {
                    backend: "rerank".to_string(),
                    details: "result item is missing its index".to_string(),
                })? as usize;
            let relevance = result
                .pointer("/relevance_score")
                .and_then(Value::as_f64)
                .unwrap_or(0.0);

            if position < scores.len() {
                scores[position] = relevance as f32;
            }
        }

        Ok(scores)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn endpoint_is_joined_onto_the_base_url() {
        let provider =
            CohereRerank::new("https://api.cohere.com/", "key", "rerank-v3.5").expect("valid url");
        assert_eq!(provider.endpoint.as_str(), "https://api.cohere.com/v1/rerank");
    }

    #[tokio::test]
    async fn empty_passages_short_circuit_without_a_request() {
        let provider =
            CohereRerank::new("https://api.cohere.com/", "key", "rerank-v3.5").expect("valid url");
        let scores = provider.score("query", &[]).await.expect("score");
        assert!(scores.is_empty());
    }
}
