use crate::models::EmbeddingPoint;
use crate::traits::{Distance, VectorIndex};
use crate::SearchError;
use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde_json::{json, Value};
use tracing::info;

pub const DEFAULT_COLLECTION: &str = "documents_text";

pub struct QdrantStore {
    endpoint: String,
    collection: String,
    client: Client,
}

impl QdrantStore {
    pub fn new(endpoint: impl Into<String>, collection: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into().trim_end_matches('/').to_string(),
            collection: collection.into(),
            client: Client::new(),
        }
    }

    fn collection_url(&self) -> String {
        format!("{}/collections/{}", self.endpoint, self.collection)
    }

    fn backend_error(details: impl Into<String>) -> SearchError {
        SearchError::BackendResponse {
            backend: "qdrant".to_string(),
            details: details.into(),
        }
    }
}

/// Checks an existing collection's description against the expected vector shape.
fn verify_collection_shape(
    description: &Value,
    dimensions: usize,
    distance: Distance,
) -> Result<(), String> {
    let vectors = description
        .pointer("/result/config/params/vectors")
        .ok_or_else(|| "collection description has no vector params".to_string())?;

    let size = vectors.pointer("/size").and_then(Value::as_u64);
    let metric = vectors.pointer("/distance").and_then(Value::as_str);

    match (size, metric) {
        (Some(size), Some(metric))
            if size as usize == dimensions && metric.eq_ignore_ascii_case(distance.as_str()) =>
        {
            Ok(())
        }
        (Some(size), Some(metric)) => Err(format!(
            "collection has {size}-dim {metric} vectors, expected {dimensions}-dim {}",
            distance.as_str()
        )),
        _ => Err("collection uses named or unsupported vector params".to_string()),
    }
}

fn points_body(points: &[EmbeddingPoint]) -> Value {
    json!({ "points": points })
}

#[async_trait]
impl VectorIndex for QdrantStore {
    async fn ensure_collection(
        &self,
        dimensions: usize,
        distance: Distance,
    ) -> Result<(), SearchError> {
        let response = self.client.get(self.collection_url()).send().await?;

        if response.status().is_success() {
            let description: Value = response.json().await?;
            return verify_collection_shape(&description, dimensions, distance)
                .map_err(Self::backend_error);
        }

        if response.status() != StatusCode::NOT_FOUND {
            return Err(Self::backend_error(response.status().to_string()));
        }

        let response = self
            .client
            .put(self.collection_url())
            .json(&json!({
                "vectors": {
                    "size": dimensions,
                    "distance": distance.as_str(),
                }
            }))
            .send()
            .await?;

        // A concurrent worker may have created it between the check and the create.
        if response.status() == StatusCode::CONFLICT {
            return Ok(());
        }

        if !response.status().is_success() {
            return Err(SearchError::Request(format!(
                "qdrant collection setup failed with {}",
                response.status()
            )));
        }

        info!(
            collection = %self.collection,
            dimensions,
            distance = distance.as_str(),
            "created vector collection"
        );
        Ok(())
    }

    async fn upsert_points(&self, points: &[EmbeddingPoint]) -> Result<(), SearchError> {
        if points.is_empty() {
            return Ok(());
        }

        let response = self
            .client
            .put(format!("{}/points?wait=true", self.collection_url()))
            .json(&points_body(points))
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(Self::backend_error(response.status().to_string()));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{PointPayload, TEXT_CHUNK_KIND};
    use chrono::{TimeZone, Utc};
    use uuid::Uuid;

    fn description(size: u64, distance: &str) -> Value {
        json!({
            "result": {
                "status": "green",
                "config": {
                    "params": {
                        "vectors": { "size": size, "distance": distance }
                    }
                }
            }
        })
    }

    #[test]
    fn matching_collection_shape_is_accepted() {
        assert!(
            verify_collection_shape(&description(1024, "Cosine"), 1024, Distance::Cosine).is_ok()
        );
    }

    #[test]
    fn mismatched_collection_shape_is_rejected() {
        let error = verify_collection_shape(&description(384, "Cosine"), 1024, Distance::Cosine)
            .expect_err("dimension differs");
        assert!(error.contains("384"));
        assert!(
            verify_collection_shape(&description(1024, "Dot"), 1024, Distance::Cosine).is_err()
        );
        assert!(verify_collection_shape(&json!({"result": {}}), 1024, Distance::Cosine).is_err());
    }

    #[test]
    fn points_serialize_with_text_chunk_payload() {
        let id = Uuid::nil();
        let created_at = Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap();
        let body = points_body(&[EmbeddingPoint {
            id,
            vector: vec![0.5, 0.5],
            payload: PointPayload {
                document_id: "doc-1".to_string(),
                chunk_index: 3,
                text: "chunk".to_string(),
                page_number: Some(2),
                size: 5,
                kind: TEXT_CHUNK_KIND.to_string(),
                created_at,
            },
        }]);

        let point = &body["points"][0];
        assert_eq!(point["id"], id.to_string());
        assert_eq!(point["payload"]["type"], "text_chunk");
        assert_eq!(point["payload"]["chunk_index"], 3);
        assert_eq!(point["payload"]["page_number"], 2);
        assert_eq!(point["payload"]["created_at"], "2024-05-01T12:00:00Z");
    }

    #[test]
    fn endpoint_trailing_slash_is_trimmed() {
        let store = QdrantStore::new("http://localhost:6333/", DEFAULT_COLLECTION);
        assert_eq!(
            store.collection_url(),
            "http://localhost:6333/collections/documents_text"
        );
    }
}
