//! Vector store adapter
//!
//! Points are keyed by card id, so upserting the same card twice replaces
//! the earlier point. Dimensionality is fixed when the store is created.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::collections::HashMap;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::RwLock;
use uuid::Uuid;

const USER_AGENT: &str = concat!("RecallForge/", env!("CARGO_PKG_VERSION"));
const REQUEST_TIMEOUT_SECS: u64 = 30;

/// Vector store errors
#[derive(Debug, Error)]
pub enum VectorStoreError {
    #[error("Vector index unavailable: {0}")]
    IndexUnavailable(String),

    #[error("Vector dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },
}

/// Payload stored alongside each card vector
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VectorPayload {
    pub front: String,
    pub back: String,
    pub deck_id: Uuid,
}

/// Similarity index keyed by card id
#[async_trait]
pub trait VectorStore: Send + Sync {
    /// Fixed vector length accepted by this store
    fn dimension(&self) -> usize;

    /// Insert or replace the point for `card_id`, returning its reference
    async fn upsert(
        &self,
        card_id: Uuid,
        vector: &[f32],
        payload: VectorPayload,
    ) -> Result<String, VectorStoreError>;

    /// Remove the points of the given cards; unknown ids are ignored
    async fn delete(&self, card_ids: &[Uuid]) -> Result<(), VectorStoreError>;
}

fn check_dimension(expected: usize, actual: usize) -> Result<(), VectorStoreError> {
    if expected != actual {
        return Err(VectorStoreError::DimensionMismatch { expected, actual });
    }
    Ok(())
}

/// Qdrant collection accessed over its REST API
pub struct QdrantStore {
    http_client: reqwest::Client,
    base_url: String,
    collection: String,
    dimension: usize,
}

impl QdrantStore {
    /// Connect and make sure the collection exists with the right size
    ///
    /// Creates the collection (cosine distance) when missing. An existing
    /// collection with a different vector size is a `DimensionMismatch`.
    pub async fn connect(
        base_url: &str,
        collection: &str,
        dimension: usize,
    ) -> Result<Self, VectorStoreError> {
        let http_client = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS))
            .build()
            .map_err(|e| VectorStoreError::IndexUnavailable(e.to_string()))?;

        let store = Self {
            http_client,
            base_url: base_url.trim_end_matches('/').to_string(),
            collection: collection.to_string(),
            dimension,
        };
        store.ensure_collection().await?;
        Ok(store)
    }

    fn collection_url(&self) -> String {
        format!("{}/collections/{}", self.base_url, self.collection)
    }

    async fn ensure_collection(&self) -> Result<(), VectorStoreError> {
        let response = self
            .http_client
            .get(self.collection_url())
            .send()
            .await
            .map_err(unavailable)?;

        match response.status() {
            status if status.is_success() => {
                let body: Value = response.json().await.map_err(unavailable)?;
                match existing_vector_size(&body) {
                    Some(size) => {
                        check_dimension(self.dimension, size)?;
                        tracing::info!(
                            collection = %self.collection,
                            dimension = size,
                            "Using existing Qdrant collection"
                        );
                        Ok(())
                    }
                    None => Err(VectorStoreError::IndexUnavailable(format!(
                        "collection {} has no single unnamed vector config",
                        self.collection
                    ))),
                }
            }
            reqwest::StatusCode::NOT_FOUND => self.create_collection().await,
            status => {
                let text = response.text().await.unwrap_or_default();
                Err(VectorStoreError::IndexUnavailable(format!(
                    "GET collection {}: HTTP {}: {}",
                    self.collection,
                    status.as_u16(),
                    text
                )))
            }
        }
    }

    async fn create_collection(&self) -> Result<(), VectorStoreError> {
        let body = json!({
            "vectors": { "size": self.dimension, "distance": "Cosine" }
        });

        let response = self
            .http_client
            .put(self.collection_url())
            .json(&body)
            .send()
            .await
            .map_err(unavailable)?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let text = response.text().await.unwrap_or_default();
            return Err(VectorStoreError::IndexUnavailable(format!(
                "create collection {}: HTTP {}: {}",
                self.collection, status, text
            )));
        }

        tracing::info!(
            collection = %self.collection,
            dimension = self.dimension,
            "Created Qdrant collection"
        );
        Ok(())
    }
}

fn existing_vector_size(body: &Value) -> Option<usize> {
    body.pointer("/result/config/params/vectors/size")
        .and_then(Value::as_u64)
        .map(|size| size as usize)
}

fn unavailable(err: reqwest::Error) -> VectorStoreError {
    VectorStoreError::IndexUnavailable(err.to_string())
}

#[async_trait]
impl VectorStore for QdrantStore {
    fn dimension(&self) -> usize {
        self.dimension
    }

    async fn upsert(
        &self,
        card_id: Uuid,
        vector: &[f32],
        payload: VectorPayload,
    ) -> Result<String, VectorStoreError> {
        check_dimension(self.dimension, vector.len())?;

        let point_id = card_id.to_string();
        let body = json!({
            "points": [{
                "id": point_id,
                "vector": vector,
                "payload": payload,
            }]
        });

        let response = self
            .http_client
            .put(format!("{}/points", self.collection_url()))
            .query(&[("wait", "true")])
            .json(&body)
            .send()
            .await
            .map_err(unavailable)?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let text = response.text().await.unwrap_or_default();
            return Err(VectorStoreError::IndexUnavailable(format!(
                "upsert point {}: HTTP {}: {}",
                point_id, status, text
            )));
        }

        Ok(point_id)
    }

    async fn delete(&self, card_ids: &[Uuid]) -> Result<(), VectorStoreError> {
        if card_ids.is_empty() {
            return Ok(());
        }

        let points: Vec<String> = card_ids.iter().map(Uuid::to_string).collect();
        let response = self
            .http_client
            .post(format!("{}/points/delete", self.collection_url()))
            .query(&[("wait", "true")])
            .json(&json!({ "points": points }))
            .send()
            .await
            .map_err(unavailable)?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let text = response.text().await.unwrap_or_default();
            return Err(VectorStoreError::IndexUnavailable(format!(
                "delete {} points: HTTP {}: {}",
                points.len(),
                status,
                text
            )));
        }
        Ok(())
    }
}

/// Stored point of the in-memory index
#[derive(Debug, Clone, PartialEq)]
pub struct StoredPoint {
    pub vector: Vec<f32>,
    pub payload: VectorPayload,
}

/// Process-local index, used when no Qdrant URL is configured
pub struct InMemoryVectorStore {
    dimension: usize,
    points: RwLock<HashMap<Uuid, StoredPoint>>,
}

impl InMemoryVectorStore {
    pub fn new(dimension: usize) -> Self {
        Self {
            dimension,
            points: RwLock::new(HashMap::new()),
        }
    }

    pub async fn get(&self, card_id: Uuid) -> Option<StoredPoint> {
        self.points.read().await.get(&card_id).cloned()
    }

    pub async fn len(&self) -> usize {
        self.points.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.points.read().await.is_empty()
    }
}

#[async_trait]
impl VectorStore for InMemoryVectorStore {
    fn dimension(&self) -> usize {
        self.dimension
    }

    async fn upsert(
        &self,
        card_id: Uuid,
        vector: &[f32],
        payload: VectorPayload,
    ) -> Result<String, VectorStoreError> {
        check_dimension(self.dimension, vector.len())?;

        self.points.write().await.insert(
            card_id,
            StoredPoint {
                vector: vector.to_vec(),
                payload,
            },
        );
        Ok(card_id.to_string())
    }

    async fn delete(&self, card_ids: &[Uuid]) -> Result<(), VectorStoreError> {
        let mut points = self.points.write().await;
        for id in card_ids {
            points.remove(id);
        }
        Ok(())
    }
}
