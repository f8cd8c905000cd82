use crate::error::StoreError;
use crate::models::{CollectionSpec, Record, SimilarityMetric};
use crate::traits::CollectionWriter;
use async_trait::async_trait;
use reqwest::{Client, RequestBuilder, StatusCode};
use serde_json::{json, Value};
use std::time::Duration;
use tracing::{debug, info};
use uuid::Uuid;

const BACKEND: &str = "qdrant";

pub struct QdrantStore {
    endpoint: String,
    client: Client,
    api_key: Option<String>,
}

impl QdrantStore {
    pub fn new(
        endpoint: impl Into<String>,
        api_key: Option<String>,
        timeout: Duration,
    ) -> Result<Self, StoreError> {
        Ok(Self {
            endpoint: endpoint.into().trim_end_matches('/').to_string(),
            client: Client::builder().timeout(timeout).build()?,
            api_key,
        })
    }

    fn authorize(&self, request: RequestBuilder) -> RequestBuilder {
        match &self.api_key {
            Some(key) => request.header("api-key", key),
            None => request,
        }
    }

    fn collection_url(&self, collection: &str) -> String {
        format!("{}/collections/{}", self.endpoint, collection)
    }
}

fn distance(metric: SimilarityMetric) -> &'static str {
    match metric {
        SimilarityMetric::Cosine => "Cosine",
        SimilarityMetric::DotProduct => "Dot",
        SimilarityMetric::Euclidean => "Euclid",
    }
}

fn point(record: &Record) -> Value {
    json!({
        "id": Uuid::new_v4().to_string(),
        "vector": record.vector,
        "payload": {
            "text": record.text,
            "source": record.source,
            "chunk_index": record.chunk_index,
        },
    })
}

async fn backend_error(response: reqwest::Response) -> StoreError {
    let status = response.status();
    let body = response.text().await.unwrap_or_default();
    StoreError::Backend {
        backend: BACKEND.to_string(),
        details: format!("{status}: {}", body.trim()),
    }
}

#[async_trait]
impl CollectionWriter for QdrantStore {
    fn backend(&self) -> &'static str {
        BACKEND
    }

    async fn recreate(&self, spec: &CollectionSpec) -> Result<(), StoreError> {
        let response = self
            .authorize(self.client.delete(self.collection_url(&spec.name)))
            .send()
            .await?;

        match response.status() {
            StatusCode::NOT_FOUND => debug!(collection = %spec.name, "no existing collection to drop"),
            status if status.is_success() => info!(collection = %spec.name, "dropped collection"),
            _ => return Err(backend_error(response).await),
        }

        let response = self
            .authorize(self.client.put(self.collection_url(&spec.name)))
            .json(&json!({
                "vectors": {
                    "size": spec.dimensions,
                    "distance": distance(spec.metric),
                }
            }))
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(backend_error(response).await);
        }

        info!(
            collection = %spec.name,
            dimensions = spec.dimensions,
            metric = %spec.metric,
            "created collection"
        );
        Ok(())
    }

    async fn insert(&self, collection: &str, record: &Record) -> Result<(), StoreError> {
        let response = self
            .authorize(
                self.client
                    .put(format!("{}/points?wait=true", self.collection_url(collection))),
            )
            .json(&json!({ "points": [point(record)] }))
            .send()
            .await?;

        if response.status() == StatusCode::NOT_FOUND {
            return Err(StoreError::MissingCollection(collection.to_string()));
        }
        if !response.status().is_success() {
            return Err(backend_error(response).await);
        }

        Ok(())
    }

    async fn count(&self, collection: &str) -> Result<usize, StoreError> {
        let response = self
            .authorize(
                self.client
                    .post(format!("{}/points/count", self.collection_url(collection))),
            )
            .json(&json!({ "exact": true }))
            .send()
            .await?;

        if response.status() == StatusCode::NOT_FOUND {
            return Err(StoreError::MissingCollection(collection.to_string()));
        }
        if !response.status().is_success() {
            return Err(backend_error(response).await);
        }

        let parsed: Value = response.json().await?;
        parsed
            .pointer("/result/count")
            .and_then(Value::as_u64)
            .map(|count| count as usize)
            .ok_or_else(|| StoreError::Backend {
                backend: BACKEND.to_string(),
                details: "count response has no result.count".to_string(),
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn metrics_map_to_qdrant_distances() {
        assert_eq!(distance(SimilarityMetric::Cosine), "Cosine");
        assert_eq!(distance(SimilarityMetric::DotProduct), "Dot");
        assert_eq!(distance(SimilarityMetric::Euclidean), "Euclid");
    }

    #[test]
    fn points_carry_text_payload_and_unique_ids() {
        let record = Record {
            vector: vec![1.0, 0.0],
            text: "hello".to_string(),
            source: "a.txt".to_string(),
            chunk_index: 7,
        };
        let first = point(&record);
        let second = point(&record);

        assert_eq!(first.pointer("/payload/text"), Some(&json!("hello")));
        assert_eq!(first.pointer("/payload/chunk_index"), Some(&json!(7)));
        assert_eq!(first.pointer("/vector"), Some(&json!([1.0, 0.0])));
        assert_ne!(first.pointer("/id"), second.pointer("/id"));
    }

    #[test]
    fn collection_urls_drop_trailing_slash() -> Result<(), StoreError> {
        let store = QdrantStore::new("http://localhost:6333/", None, Duration::from_secs(1))?;
        assert_eq!(
            store.collection_url("docs"),
            "http://localhost:6333/collections/docs"
        );
        Ok(())
    }
}
