use crate::error::StoreError;
use crate::models::{CollectionSpec, Record};
use crate::traits::CollectionWriter;
use async_trait::async_trait;
use reqwest::Client;
use serde_json::{json, Value};
use std::time::Duration;
use tracing::{debug, info};
use url::Url;

const BACKEND: &str = "astra";
const MISSING_COLLECTION_CODES: [&str; 2] = ["COLLECTION_NOT_EXIST", "COLLECTION_NOT_FOUND"];

/// Writer for an Astra DB keyspace over the JSON Data API.
pub struct AstraStore {
    client: Client,
    keyspace_url: Url,
    token: String,
}

impl AstraStore {
    pub fn new(
        endpoint: &str,
        namespace: &str,
        token: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self, StoreError> {
        let base = Url::parse(&format!("{}/", endpoint.trim_end_matches('/')))?;
        let keyspace_url = base.join(&format!("api/json/v1/{namespace}/"))?;

        Ok(Self {
            client: Client::builder().timeout(timeout).build()?,
            keyspace_url,
            token: token.into(),
        })
    }

    async fn command(&self, collection: Option<&str>, body: Value) -> Result<Value, StoreError> {
        let url = match collection {
            Some(name) => self.keyspace_url.join(name)?,
            None => self.keyspace_url.clone(),
        };

        let response = self
            .client
            .post(url)
            .header("Token", &self.token)
            .json(&body)
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(backend_error(response).await);
        }

        let parsed: Value = response.json().await?;
        Ok(parsed)
    }
}

async fn backend_error(response: reqwest::Response) -> StoreError {
    let status = response.status();
    let body = response.text().await.unwrap_or_default();
    http_failure(status, &body)
}

fn http_failure(status: reqwest::StatusCode, body: &str) -> StoreError {
    StoreError::Backend {
        backend: BACKEND.to_string(),
        details: format!("{status}: {}", body.trim()),
    }
}

fn create_collection_command(spec: &CollectionSpec) -> Value {
    json!({
        "createCollection": {
            "name": spec.name,
            "options": {
                "vector": {
                    "dimension": spec.dimensions,
                    "metric": spec.metric.as_str(),
                }
            }
        }
    })
}

fn insert_command(record: &Record) -> Value {
    json!({
        "insertOne": {
            "document": {
                "$vector": record.vector,
                "text": record.text,
                "source": record.source,
                "chunk_index": record.chunk_index,
            }
        }
    })
}

fn response_errors(response: &Value) -> Vec<(String, String)> {
    response
        .pointer("/errors")
        .and_then(Value::as_array)
        .map(|errors| {
            errors
                .iter()
                .map(|error| {
                    let code = error
                        .pointer("/errorCode")
                        .and_then(Value::as_str)
                        .unwrap_or_default()
                        .to_string();
                    let message = error
                        .pointer("/message")
                        .and_then(Value::as_str)
                        .unwrap_or_default()
                        .to_string();
                    (code, message)
                })
                .collect()
        })
        .unwrap_or_default()
}

fn check_response(response: Value) -> Result<Value, StoreError> {
    let errors = response_errors(&response);
    if errors.is_empty() {
        return Ok(response);
    }

    Err(StoreError::Backend {
        backend: BACKEND.to_string(),
        details: errors
            .iter()
            .map(|(code, message)| format!("{code}: {message}"))
            .collect::<Vec<_>>()
            .join("; "),
    })
}

fn only_missing_collection(response: &Value) -> bool {
    let errors = response_errors(response);
    !errors.is_empty()
        && errors
            .iter()
            .all(|(code, _)| MISSING_COLLECTION_CODES.contains(&code.as_str()))
}

#[async_trait]
impl CollectionWriter for AstraStore {
    fn backend(&self) -> &'static str {
        BACKEND
    }

    async fn recreate(&self, spec: &CollectionSpec) -> Result<(), StoreError> {
        let dropped = self
            .command(None, json!({ "deleteCollection": { "name": spec.name } }))
            .await?;
        if only_missing_collection(&dropped) {
            debug!(collection = %spec.name, "no existing collection to drop");
        } else {
            check_response(dropped)?;
            info!(collection = %spec.name, "dropped collection");
        }

        let created = self
            .command(None, create_collection_command(spec))
            .await
            .and_then(check_response)?;
        let status = created.pointer("/status").cloned().unwrap_or_default();
        info!(
            collection = %spec.name,
            dimensions = spec.dimensions,
            metric = %spec.metric,
            status = %status,
            "created collection"
        );
        Ok(())
    }

    async fn insert(&self, collection: &str, record: &Record) -> Result<(), StoreError> {
        let response = self
            .command(Some(collection), insert_command(record))
            .await
            .and_then(check_response)?;
        let inserted = response
            .pointer("/status/insertedIds")
            .cloned()
            .unwrap_or_default();
        debug!(collection, inserted = %inserted, "inserted record");
        Ok(())
    }

    async fn count(&self, collection: &str) -> Result<usize, StoreError> {
        let response = self
            .command(Some(collection), json!({ "countDocuments": {} }))
            .await?;
        if only_missing_collection(&response) {
            return Err(StoreError::MissingCollection(collection.to_string()));
        }

        check_response(response)?
            .pointer("/status/count")
            .and_then(Value::as_u64)
            .map(|count| count as usize)
            .ok_or_else(|| StoreError::Backend {
                backend: BACKEND.to_string(),
                details: "countDocuments response has no status.count".to_string(),
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::SimilarityMetric;

    #[test]
    fn keyspace_url_is_built_from_endpoint() -> Result<(), StoreError> {
        let store = AstraStore::new(
            "https://db-id-us-east1.apps.astra.datastax.com/",
            "default_keyspace",
            "token",
            Duration::from_secs(5),
        )?;
        assert_eq!(
            store.keyspace_url.as_str(),
            "https://db-id-us-east1.apps.astra.datastax.com/api/json/v1/default_keyspace/"
        );
        assert_eq!(
            store.keyspace_url.join("tstcustserv")?.as_str(),
            "https://db-id-us-east1.apps.astra.datastax.com/api/json/v1/default_keyspace/tstcustserv"
        );
        Ok(())
    }

    #[test]
    fn create_command_carries_vector_options() {
        let spec = CollectionSpec::new("tstcustserv", 768, SimilarityMetric::Cosine);
        let command = create_collection_command(&spec);
        assert_eq!(
            command.pointer("/createCollection/name"),
            Some(&json!("tstcustserv"))
        );
        assert_eq!(
            command.pointer("/createCollection/options/vector/dimension"),
            Some(&json!(768))
        );
        assert_eq!(
            command.pointer("/createCollection/options/vector/metric"),
            Some(&json!("cosine"))
        );
    }

    #[test]
    fn insert_command_stores_vector_and_text() {
        let record = Record {
            vector: vec![0.5, 0.25],
            text: "chunk body".to_string(),
            source: "faq.txt".to_string(),
            chunk_index: 3,
        };
        let command = insert_command(&record);
        assert_eq!(
            command.pointer("/insertOne/document/$vector"),
            Some(&json!([0.5, 0.25]))
        );
        assert_eq!(
            command.pointer("/insertOne/document/text"),
            Some(&json!("chunk body"))
        );
        assert_eq!(
            command.pointer("/insertOne/document/chunk_index"),
            Some(&json!(3))
        );
    }

    #[test]
    fn http_failures_keep_the_response_body() {
        match http_failure(
            reqwest::StatusCode::UNAUTHORIZED,
            "  {\"errors\":[{\"message\":\"invalid token\"}]}\n",
        ) {
            StoreError::Backend { backend, details } => {
                assert_eq!(backend, "astra");
                assert!(details.starts_with("401 Unauthorized"));
                assert!(details.contains("invalid token"));
            }
            other => panic!("expected backend error, got {other:?}"),
        }
    }

    #[test]
    fn error_payloads_are_classified() {
        let missing = json!({"errors": [{"errorCode": "COLLECTION_NOT_EXIST", "message": "no such"}]});
        assert!(only_missing_collection(&missing));

        let denied = json!({"errors": [{"errorCode": "UNAUTHENTICATED_REQUEST", "message": "bad token"}]});
        assert!(!only_missing_collection(&denied));
        match check_response(denied) {
            Err(StoreError::Backend { details, .. }) => {
                assert!(details.contains("UNAUTHENTICATED_REQUEST"))
            }
            other => panic!("expected backend error, got {other:?}"),
        }

        let ok = json!({"status": {"ok": 1}});
        assert!(!only_missing_collection(&ok));
        assert!(check_response(ok).is_ok());
    }
}
