//! Vector store access.
//!
//! The plane talks to the vector store over its REST surface; the store
//! itself (index, persistence) is an external collaborator. A trait seam
//! keeps retrieval code testable against an in-memory implementation.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::embeddings::similarity::cosine_similarity;
use crate::error::{Error, Result};
use crate::resilience::{CircuitBreaker, RetryPolicy};

const SERVICE: &str = "qdrant";

/// A stored point: id + vector + payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PointRecord {
    pub id: String,
    pub vector: Vec<f32>,
    pub payload: Value,
}

/// A similarity-search hit.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchHit {
    pub id: String,
    pub score: f32,
    pub payload: Value,
    /// Collection the hit came from; filled in by multi-collection search.
    #[serde(default)]
    pub collection: String,
}

/// Vector store operations used by the plane.
#[async_trait]
pub trait VectorStore: Send + Sync {
    /// Liveness of the store itself.
    async fn healthz(&self) -> Result<bool>;

    /// Names of existing collections.
    async fn list_collections(&self) -> Result<Vec<String>>;

    /// Point count of one collection.
    async fn collection_size(&self, collection: &str) -> Result<u64>;

    /// Similarity search within one collection.
    async fn search(
        &self,
        collection: &str,
        vector: &[f32],
        limit: usize,
        score_threshold: Option<f32>,
    ) -> Result<Vec<SearchHit>>;

    /// Insert or replace points.
    async fn upsert(&self, collection: &str, points: Vec<PointRecord>) -> Result<()>;

    /// Fetch a point by id.
    async fn retrieve(&self, collection: &str, id: &str) -> Result<Option<PointRecord>>;

    /// Replace the payload of an existing point.
    async fn set_payload(&self, collection: &str, id: &str, payload: Value) -> Result<()>;

    /// Page through a collection without a query vector.
    async fn scroll(&self, collection: &str, limit: usize) -> Result<Vec<PointRecord>>;
}

/// REST client for the external vector store.
pub struct HttpVectorStore {
    base_url: String,
    client: reqwest::Client,
    breaker: Arc<CircuitBreaker>,
    retry: RetryPolicy,
}

impl HttpVectorStore {
    /// Create a client against the vector store.
    ///
    /// # Errors
    ///
    /// Returns a configuration error if the HTTP client cannot be built.
    pub fn new(
        base_url: impl Into<String>,
        breaker: Arc<CircuitBreaker>,
        retry: RetryPolicy,
    ) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(15))
            .build()
            .map_err(|e| Error::Configuration(format!("vector store client: {e}")))?;
        Ok(Self {
            base_url: base_url.into(),
            client,
            breaker,
            retry,
        })
    }

    async fn request_json(
        &self,
        method: reqwest::Method,
        path: &str,
        body: Option<Value>,
    ) -> Result<Value> {
        let url = format!("{}{path}", self.base_url);
        let mut request = self.client.request(method, &url);
        if let Some(body) = body {
            request = request.json(&body);
        }
        let response = request.send().await?;
        if !response.status().is_success() {
            return Err(Error::Storage(format!(
                "vector store {path} returned {}",
                response.status()
            )));
        }
        Ok(response.json().await?)
    }

    async fn protected(
        &self,
        method: reqwest::Method,
        path: &str,
        body: Option<Value>,
    ) -> Result<Value> {
        self.retry
            .execute(|| {
                let method = method.clone();
                let body = body.clone();
                self.breaker
                    .call(move || self.request_json(method, path, body))
            })
            .await
    }
}

#[async_trait]
impl VectorStore for HttpVectorStore {
    async fn healthz(&self) -> Result<bool> {
        let url = format!("{}/healthz", self.base_url);
        // Unprotected on purpose: health checks observe the store directly.
        let response = self
            .client
            .get(&url)
            .timeout(Duration::from_secs(2))
            .send()
            .await?;
        Ok(response.status().is_success())
    }

    async fn list_collections(&self) -> Result<Vec<String>> {
        let body = self
            .protected(reqwest::Method::GET, "/collections", None)
            .await?;
        Ok(body["result"]["collections"]
            .as_array()
            .map(|collections| {
                collections
                    .iter()
                    .filter_map(|c| c["name"].as_str().map(str::to_string))
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn collection_size(&self, collection: &str) -> Result<u64> {
        let body = self
            .protected(
                reqwest::Method::GET,
                &format!("/collections/{collection}"),
                None,
            )
            .await?;
        Ok(body["result"]["points_count"].as_u64().unwrap_or(0))
    }

    async fn search(
        &self,
        collection: &str,
        vector: &[f32],
        limit: usize,
        score_threshold: Option<f32>,
    ) -> Result<Vec<SearchHit>> {
        let mut request = json!({
            "vector": vector,
            "limit": limit,
            "with_payload": true,
        });
        if let Some(threshold) = score_threshold {
            request["score_threshold"] = json!(threshold);
        }
        let body = self
            .protected(
                reqwest::Method::POST,
                &format!("/collections/{collection}/points/search"),
                Some(request),
            )
            .await?;
        Ok(body["result"]
            .as_array()
            .map(|hits| {
                hits.iter()
                    .filter_map(|hit| {
                        Some(SearchHit {
                            id: point_id_to_string(&hit["id"])?,
                            score: hit["score"].as_f64().unwrap_or(0.0) as f32,
                            payload: hit["payload"].clone(),
                            collection: collection.to_string(),
                        })
                    })
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn upsert(&self, collection: &str, points: Vec<PointRecord>) -> Result<()> {
        let body = json!({
            "points": points
                .iter()
                .map(|p| json!({"id": p.id, "vector": p.vector, "payload": p.payload}))
                .collect::<Vec<_>>(),
        });
        self.protected(
            reqwest::Method::PUT,
            &format!("/collections/{collection}/points"),
            Some(body),
        )
        .await?;
        Ok(())
    }

    async fn retrieve(&self, collection: &str, id: &str) -> Result<Option<PointRecord>> {
        let result = self
            .protected(
                reqwest::Method::GET,
                &format!("/collections/{collection}/points/{id}"),
                None,
            )
            .await;
        match result {
            Ok(body) => {
                let point = &body["result"];
                if point.is_null() {
                    return Ok(None);
                }
                Ok(Some(PointRecord {
                    id: point_id_to_string(&point["id"]).unwrap_or_else(|| id.to_string()),
                    vector: point["vector"]
                        .as_array()
                        .map(|values| {
                            values
                                .iter()
                                .filter_map(Value::as_f64)
                                .map(|v| v as f32)
                                .collect()
                        })
                        .unwrap_or_default(),
                    payload: point["payload"].clone(),
                }))
            }
            Err(Error::Storage(message)) if message.contains("404") => Ok(None),
            Err(err) => Err(err),
        }
    }

    async fn set_payload(&self, collection: &str, id: &str, payload: Value) -> Result<()> {
        let body = json!({
            "payload": payload,
            "points": [id],
        });
        self.protected(
            reqwest::Method::POST,
            &format!("/collections/{collection}/points/payload"),
            Some(body),
        )
        .await?;
        Ok(())
    }

    async fn scroll(&self, collection: &str, limit: usize) -> Result<Vec<PointRecord>> {
        let body = self
            .protected(
                reqwest::Method::POST,
                &format!("/collections/{collection}/points/scroll"),
                Some(json!({"limit": limit, "with_payload": true, "with_vector": false})),
            )
            .await?;
        Ok(body["result"]["points"]
            .as_array()
            .map(|points| {
                points
                    .iter()
                    .filter_map(|point| {
                        Some(PointRecord {
                            id: point_id_to_string(&point["id"])?,
                            vector: Vec::new(),
                            payload: point["payload"].clone(),
                        })
                    })
                    .collect()
            })
            .unwrap_or_default())
    }
}

/// Point ids arrive as strings or integers depending on how they were stored.
fn point_id_to_string(id: &Value) -> Option<String> {
    match id {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

/// In-memory vector store for tests and degraded operation.
///
/// Scores with the same cosine metric the external store uses, so pipeline
/// behavior is observable without the service.
#[derive(Debug, Default)]
pub struct InMemoryVectorStore {
    collections: RwLock<HashMap<String, Vec<PointRecord>>>,
}

impl InMemoryVectorStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Pre-create empty collections.
    pub fn create_collections(&self, names: &[&str]) {
        let mut collections = self.collections.write();
        for name in names {
            collections.entry((*name).to_string()).or_default();
        }
    }
}

#[async_trait]
impl VectorStore for InMemoryVectorStore {
    async fn healthz(&self) -> Result<bool> {
        Ok(true)
    }

    async fn list_collections(&self) -> Result<Vec<String>> {
        Ok(self.collections.read().keys().cloned().collect())
    }

    async fn collection_size(&self, collection: &str) -> Result<u64> {
        Ok(self
            .collections
            .read()
            .get(collection)
            .map_or(0, |points| points.len() as u64))
    }

    async fn search(
        &self,
        collection: &str,
        vector: &[f32],
        limit: usize,
        score_threshold: Option<f32>,
    ) -> Result<Vec<SearchHit>> {
        let collections = self.collections.read();
        let Some(points) = collections.get(collection) else {
            return Err(Error::NotFound(format!("collection {collection}")));
        };
        let mut hits: Vec<SearchHit> = points
            .iter()
            .map(|point| SearchHit {
                id: point.id.clone(),
                score: cosine_similarity(vector, &point.vector),
                payload: point.payload.clone(),
                collection: collection.to_string(),
            })
            .filter(|hit| score_threshold.is_none_or(|t| hit.score >= t))
            .collect();
        hits.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));
        hits.truncate(limit);
        Ok(hits)
    }

    async fn upsert(&self, collection: &str, points: Vec<PointRecord>) -> Result<()> {
        let mut collections = self.collections.write();
        let stored = collections.entry(collection.to_string()).or_default();
        for point in points {
            if let Some(existing) = stored.iter_mut().find(|p| p.id == point.id) {
                *existing = point;
            } else {
                stored.push(point);
            }
        }
        Ok(())
    }

    async fn retrieve(&self, collection: &str, id: &str) -> Result<Option<PointRecord>> {
        Ok(self
            .collections
            .read()
            .get(collection)
            .and_then(|points| points.iter().find(|p| p.id == id).cloned()))
    }

    async fn set_payload(&self, collection: &str, id: &str, payload: Value) -> Result<()> {
        let mut collections = self.collections.write();
        let points = collections
            .get_mut(collection)
            .ok_or_else(|| Error::NotFound(format!("collection {collection}")))?;
        let point = points
            .iter_mut()
            .find(|p| p.id == id)
            .ok_or_else(|| Error::NotFound(format!("point {id}")))?;
        point.payload = payload;
        Ok(())
    }

    async fn scroll(&self, collection: &str, limit: usize) -> Result<Vec<PointRecord>> {
        Ok(self
            .collections
            .read()
            .get(collection)
            .map(|points| points.iter().take(limit).cloned().collect())
            .unwrap_or_default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_in_memory_search_ranks_by_cosine() {
        let store = InMemoryVectorStore::new();
        store
            .upsert(
                "error-solutions",
                vec![
                    PointRecord {
                        id: "a".to_string(),
                        vector: vec![1.0, 0.0],
                        payload: json!({"solution": "close match"}),
                    },
                    PointRecord {
                        id: "b".to_string(),
                        vector: vec![0.0, 1.0],
                        payload: json!({"solution": "orthogonal"}),
                    },
                ],
            )
            .await
            .expect("upsert");

        let hits = store
            .search("error-solutions", &[1.0, 0.1], 10, Some(0.5))
            .await
            .expect("search");
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].id, "a");
        assert_eq!(hits[0].collection, "error-solutions");
    }

    #[tokio::test]
    async fn test_in_memory_upsert_replaces_by_id() {
        let store = InMemoryVectorStore::new();
        let point = |payload: Value| PointRecord {
            id: "x".to_string(),
            vector: vec![1.0],
            payload,
        };
        store
            .upsert("best-practices", vec![point(json!({"v": 1}))])
            .await
            .expect("upsert");
        store
            .upsert("best-practices", vec![point(json!({"v": 2}))])
            .await
            .expect("upsert");

        assert_eq!(store.collection_size("best-practices").await.expect("size"), 1);
        let record = store
            .retrieve("best-practices", "x")
            .await
            .expect("retrieve")
            .expect("present");
        assert_eq!(record.payload["v"], 2);
    }

    #[tokio::test]
    async fn test_in_memory_set_payload() {
        let store = InMemoryVectorStore::new();
        store
            .upsert(
                "skills-patterns",
                vec![PointRecord {
                    id: "p1".to_string(),
                    vector: vec![1.0],
                    payload: json!({"value_score": 0.5}),
                }],
            )
            .await
            .expect("upsert");
        store
            .set_payload("skills-patterns", "p1", json!({"value_score": 0.9}))
            .await
            .expect("set_payload");
        let record = store
            .retrieve("skills-patterns", "p1")
            .await
            .expect("retrieve")
            .expect("present");
        assert_eq!(record.payload["value_score"], 0.9);
    }
}
