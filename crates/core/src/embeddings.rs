use crate::error::EmbedError;
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::time::Duration;
use tracing::debug;

pub const DEFAULT_EMBEDDING_MODEL: &str = "nomic-embed-text";
pub const DEFAULT_EMBEDDING_DIMENSIONS: usize = 768;
pub const DEFAULT_EMBEDDING_ENDPOINT: &str = "http://127.0.0.1:11434";
pub const DEFAULT_EMBEDDING_TIMEOUT: Duration = Duration::from_secs(30);

#[async_trait]
pub trait Embedder: Send + Sync {
    fn dimensions(&self) -> usize;

    async fn embed(&self, text: &str) -> Result<Vec<f32>, EmbedError>;
}

#[derive(Debug, Serialize)]
struct EmbeddingRequest<'a> {
    model: &'a str,
    prompt: &'a str,
}

#[derive(Debug, Deserialize)]
struct EmbeddingResponse {
    #[serde(default)]
    embedding: Option<Value>,
}

/// Client for a local Ollama server's `/api/embeddings` endpoint. One request
/// per call, no caching.
#[derive(Debug, Clone)]
pub struct OllamaEmbedder {
    client: Client,
    endpoint: String,
    model: String,
    dimensions: usize,
}

impl OllamaEmbedder {
    pub fn new(
        endpoint: impl Into<String>,
        model: impl Into<String>,
        dimensions: usize,
        timeout: Duration,
    ) -> Result<Self, EmbedError> {
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            endpoint: endpoint.into().trim_end_matches('/').to_string(),
            model: model.into(),
            dimensions,
        })
    }

    pub fn model(&self) -> &str {
        &self.model
    }
}

#[async_trait]
impl Embedder for OllamaEmbedder {
    fn dimensions(&self) -> usize {
        self.dimensions
    }

    async fn embed(&self, text: &str) -> Result<Vec<f32>, EmbedError> {
        let response = self
            .client
            .post(format!("{}/api/embeddings", self.endpoint))
            .json(&EmbeddingRequest {
                model: &self.model,
                prompt: text,
            })
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(EmbedError::Service(format!(
                "{} returned {status}: {}",
                self.endpoint,
                body.trim()
            )));
        }

        let body = response.bytes().await?;
        let vector = parse_embedding(&body, self.dimensions)?;
        debug!(model = %self.model, dimensions = vector.len(), "embedding received");
        Ok(vector)
    }
}

pub(crate) fn parse_embedding(body: &[u8], dimensions: usize) -> Result<Vec<f32>, EmbedError> {
    let payload: EmbeddingResponse = serde_json::from_slice(body)
        .map_err(|error| EmbedError::Format(format!("response is not valid json: {error}")))?;

    let values = match payload.embedding {
        Some(Value::Array(values)) => values,
        Some(other) => {
            return Err(EmbedError::Format(format!(
                "embedding field is not an array: {other}"
            )))
        }
        None => return Err(EmbedError::Format("embedding field missing".to_string())),
    };

    let vector = values
        .iter()
        .map(|value| value.as_f64().map(|number| number as f32))
        .collect::<Option<Vec<_>>>()
        .ok_or_else(|| EmbedError::Format("embedding contains non-numeric values".to_string()))?;

    if vector.len() != dimensions {
        return Err(EmbedError::Format(format!(
            "embedding has {} dimensions, expected {dimensions}",
            vector.len()
        )));
    }

    Ok(vector)
}
