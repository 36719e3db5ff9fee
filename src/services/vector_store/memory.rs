//! In-process vector store.
//!
//! Brute-force similarity over per-collection maps, each behind its own lock.
//! With a snapshot path the whole store is loaded at construction and written
//! back on [`VectorStore::flush`], which is how the CLI keeps state between runs.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tracing::debug;

use super::{CollectionInfo, VectorStore, rank_hits};
use crate::error::VectorStoreError;
use crate::models::{Chunk, DistanceMetric, VectorHit, validate_collection_name};
use crate::services::embedding::cosine_similarity;

#[derive(Debug, Clone, Serialize, Deserialize)]
struct Entry {
    seq: u64,
    chunk: Chunk,
    vector: Vec<f32>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct Collection {
    dimension: usize,
    next_seq: u64,
    entries: HashMap<String, Entry>,
}

impl Collection {
    fn check_dimension(&self, name: &str, actual: usize) -> Result<(), VectorStoreError> {
        if actual != self.dimension {
            return Err(VectorStoreError::DimensionMismatch {
                collection: name.to_string(),
                expected: self.dimension,
                actual,
            });
        }
        Ok(())
    }
}

pub struct MemoryStore {
    metric: DistanceMetric,
    collections: RwLock<HashMap<String, Arc<RwLock<Collection>>>>,
    snapshot: Option<PathBuf>,
}

impl MemoryStore {
    #[must_use]
    pub fn new(metric: DistanceMetric) -> Self {
        Self {
            metric,
            collections: RwLock::new(HashMap::new()),
            snapshot: None,
        }
    }

    /// Load from `path` if it exists; `flush` writes back to it.
    pub fn with_snapshot(path: PathBuf, metric: DistanceMetric) -> Result<Self, VectorStoreError> {
        let collections: HashMap<String, Collection> = if path.exists() {
            let content = std::fs::read_to_string(&path)
                .map_err(|e| VectorStoreError::SnapshotError(e.to_string()))?;
            serde_json::from_str(&content)
                .map_err(|e| VectorStoreError::SnapshotError(format!("{}: {e}", path.display())))?
        } else {
            HashMap::new()
        };
        debug!(path = %path.display(), collections = collections.len(), "loaded vector snapshot");

        Ok(Self {
            metric,
            collections: RwLock::new(
                collections
                    .into_iter()
                    .map(|(name, c)| (name, Arc::new(RwLock::new(c))))
                    .collect(),
            ),
            snapshot: Some(path),
        })
    }

    fn similarity(&self, a: &[f32], b: &[f32]) -> f32 {
        match self.metric {
            DistanceMetric::Cosine => cosine_similarity(a, b),
            DistanceMetric::Dot => a.iter().zip(b).map(|(x, y)| x * y).sum(),
            DistanceMetric::Euclidean => {
                let dist: f32 = a
                    .iter()
                    .zip(b)
                    .map(|(x, y)| (x - y) * (x - y))
                    .sum::<f32>()
                    .sqrt();
                1.0 / (1.0 + dist)
            }
        }
    }

    async fn get(&self, collection: &str) -> Option<Arc<RwLock<Collection>>> {
        self.collections.read().await.get(collection).cloned()
    }

    async fn require(&self, collection: &str) -> Result<Arc<RwLock<Collection>>, VectorStoreError> {
        self.get(collection).await.ok_or_else(|| {
            VectorStoreError::CollectionError(format!("collection '{collection}' does not exist"))
        })
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new(DistanceMetric::Cosine)
    }
}

#[async_trait]
impl VectorStore for MemoryStore {
    fn name(&self) -> &'static str {
        "memory"
    }

    async fn health_check(&self) -> Result<(), VectorStoreError> {
        Ok(())
    }

    async fn create_collection(
        &self,
        collection: &str,
        dimension: usize,
    ) -> Result<(), VectorStoreError> {
        validate_collection_name(collection)?;
        let mut collections = self.collections.write().await;
        if let Some(existing) = collections.get(collection) {
            return existing.read().await.check_dimension(collection, dimension);
        }
        collections.insert(
            collection.to_string(),
            Arc::new(RwLock::new(Collection {
                dimension,
                ..Default::default()
            })),
        );
        debug!(collection, dimension, "created collection");
        Ok(())
    }

    async fn collection_info(
        &self,
        collection: &str,
    ) -> Result<Option<CollectionInfo>, VectorStoreError> {
        let Some(handle) = self.get(collection).await else {
            return Ok(None);
        };
        let c = handle.read().await;
        Ok(Some(CollectionInfo {
            name: collection.to_string(),
            dimension: c.dimension,
            points_count: c.entries.len() as u64,
        }))
    }

    async fn drop_collection(&self, collection: &str) -> Result<(), VectorStoreError> {
        self.collections.write().await.remove(collection);
        Ok(())
    }

    async fn upsert(
        &self,
        collection: &str,
        chunk: &Chunk,
        embedding: &[f32],
    ) -> Result<(), VectorStoreError> {
        let handle = self.require(collection).await?;
        let mut c = handle.write().await;
        c.check_dimension(collection, embedding.len())?;

        let seq = match c.entries.get(&chunk.id) {
            Some(existing) => existing.seq,
            None => {
                c.next_seq += 1;
                c.next_seq
            }
        };
        c.entries.insert(
            chunk.id.clone(),
            Entry {
                seq,
                chunk: chunk.clone(),
                vector: embedding.to_vec(),
            },
        );
        Ok(())
    }

    async fn query(
        &self,
        collection: &str,
        vector: &[f32],
        k: usize,
    ) -> Result<Vec<VectorHit>, VectorStoreError> {
        let Some(handle) = self.get(collection).await else {
            return Ok(Vec::new());
        };
        let c = handle.read().await;
        if c.entries.is_empty() {
            return Ok(Vec::new());
        }
        c.check_dimension(collection, vector.len())?;

        let hits = c
            .entries
            .values()
            .map(|entry| {
                let hit = VectorHit {
                    chunk: entry.chunk.clone(),
                    similarity: self.similarity(vector, &entry.vector),
                };
                (hit, entry.seq)
            })
            .collect();
        Ok(rank_hits(hits, k))
    }

    async fn delete(&self, collection: &str, chunk_id: &str) -> Result<(), VectorStoreError> {
        if let Some(handle) = self.get(collection).await {
            handle.write().await.entries.remove(chunk_id);
        }
        Ok(())
    }

    async fn delete_document(
        &self,
        collection: &str,
        document_id: &str,
    ) -> Result<(), VectorStoreError> {
        if let Some(handle) = self.get(collection).await {
            handle
                .write()
                .await
                .entries
                .retain(|_, e| e.chunk.document_id != document_id);
        }
        Ok(())
    }

    async fn document_fingerprint(
        &self,
        collection: &str,
        document_id: &str,
    ) -> Result<Option<String>, VectorStoreError> {
        let Some(handle) = self.get(collection).await else {
            return Ok(None);
        };
        let c = handle.read().await;
        Ok(c.entries
            .values()
            .find(|e| e.chunk.document_id == document_id)
            .map(|e| e.chunk.fingerprint.clone()))
    }

    async fn flush(&self) -> Result<(), VectorStoreError> {
        let Some(path) = &self.snapshot else {
            return Ok(());
        };

        let mut snapshot: HashMap<String, Collection> = HashMap::new();
        for (name, handle) in self.collections.read().await.iter() {
            snapshot.insert(name.clone(), handle.read().await.clone());
        }
        let json = serde_json::to_string(&snapshot)
            .map_err(|e| VectorStoreError::SnapshotError(e.to_string()))?;

        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| VectorStoreError::SnapshotError(e.to_string()))?;
        }
        let tmp = path.with_extension("json.tmp");
        tokio::fs::write(&tmp, json)
            .await
            .map_err(|e| VectorStoreError::SnapshotError(e.to_string()))?;
        tokio::fs::rename(&tmp, path)
            .await
            .map_err(|e| VectorStoreError::SnapshotError(e.to_string()))?;
        debug!(path = %path.display(), "wrote vector snapshot");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{ChunkingStrategy, Document, Source};
    use crate::utils::text::TextIndex;

    fn chunk(doc: &Document, index: u32) -> Chunk {
        let text_index = TextIndex::new(&doc.text);
        let len = text_index.char_len();
        Chunk::from_span(doc, &text_index, index, 0, len, ChunkingStrategy::Lexical)
    }

    #[tokio::test]
    async fn test_own_embedding_ranks_first_with_max_similarity() {
        let store = MemoryStore::default();
        store.create_collection("docs", 3).await.unwrap();
        let doc = Document::new("alpha", Source::text("a.txt"));
        let a = chunk(&doc, 0);
        let b = chunk(&doc, 1);
        store.upsert("docs", &a, &[1.0, 0.0, 0.0]).await.unwrap();
        store.upsert("docs", &b, &[0.6, 0.8, 0.0]).await.unwrap();

        let hits = store.query("docs", &[1.0, 0.0, 0.0], 5).await.unwrap();
        assert_eq!(hits.len(), 2);
        assert_eq!(hits[0].chunk.id, a.id);
        assert!((hits[0].similarity - 1.0).abs() < 1e-6);
    }

    #[tokio::test]
    async fn test_ties_break_by_insertion_order_and_k_is_respected() {
        let store = MemoryStore::default();
        store.create_collection("docs", 2).await.unwrap();
        let doc = Document::new("same", Source::text("s.txt"));
        let chunks: Vec<Chunk> = (0..4).map(|i| chunk(&doc, i)).collect();
        for c in chunks.iter().rev() {
            store.upsert("docs", c, &[0.5, 0.5]).await.unwrap();
        }

        let hits = store.query("docs", &[1.0, 1.0], 3).await.unwrap();
        let order: Vec<u32> = hits.iter().map(|h| h.chunk.chunk_index).collect();
        assert_eq!(order, vec![3, 2, 1]);
    }

    #[tokio::test]
    async fn test_dimension_is_fixed_per_collection() {
        let store = MemoryStore::default();
        store.create_collection("docs", 3).await.unwrap();
        assert!(store.create_collection("docs", 3).await.is_ok());
        assert!(matches!(
            store.create_collection("docs", 4).await,
            Err(VectorStoreError::DimensionMismatch { .. })
        ));

        let doc = Document::new("x", Source::text("x.txt"));
        assert!(matches!(
            store.upsert("docs", &chunk(&doc, 0), &[1.0, 0.0]).await,
            Err(VectorStoreError::DimensionMismatch {
                expected: 3,
                actual: 2,
                ..
            })
        ));
    }

    #[tokio::test]
    async fn test_removing_everything_leaves_empty_results() {
        let store = MemoryStore::default();
        store.create_collection("docs", 2).await.unwrap();
        let doc = Document::new("x", Source::text("x.txt"));
        let c0 = chunk(&doc, 0);
        let c1 = chunk(&doc, 1);
        store.upsert("docs", &c0, &[1.0, 0.0]).await.unwrap();
        store.upsert("docs", &c1, &[0.0, 1.0]).await.unwrap();

        store.delete("docs", &c0.id).await.unwrap();
        store.delete_document("docs", &doc.id).await.unwrap();
        assert!(store.query("docs", &[1.0, 0.0], 5).await.unwrap().is_empty());
        assert!(store.query("missing", &[1.0, 0.0], 5).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_euclidean_metric_is_bounded() {
        let store = MemoryStore::new(DistanceMetric::Euclidean);
        store.create_collection("docs", 2).await.unwrap();
        let doc = Document::new("x", Source::text("x.txt"));
        store.upsert("docs", &chunk(&doc, 0), &[3.0, 4.0]).await.unwrap();
        let hits = store.query("docs", &[3.0, 4.0], 1).await.unwrap();
        assert!((hits[0].similarity - 1.0).abs() < 1e-6);
        let hits = store.query("docs", &[0.0, 0.0], 1).await.unwrap();
        assert!((hits[0].similarity - 1.0 / 6.0).abs() < 1e-6);
    }

    #[tokio::test]
    async fn test_snapshot_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("vectors.json");
        let doc = Document::new("persisted", Source::text("p.txt"));
        let mut c = chunk(&doc, 0);
        c.fingerprint = "fp".to_string();

        {
            let store = MemoryStore::with_snapshot(path.clone(), DistanceMetric::Cosine).unwrap();
            store.create_collection("docs", 2).await.unwrap();
            store.upsert("docs", &c, &[1.0, 0.0]).await.unwrap();
            store.flush().await.unwrap();
        }

        let store = MemoryStore::with_snapshot(path, DistanceMetric::Cosine).unwrap();
        let info = store.collection_info("docs").await.unwrap().unwrap();
        assert_eq!(info.dimension, 2);
        assert_eq!(info.points_count, 1);
        assert_eq!(
            store.document_fingerprint("docs", &doc.id).await.unwrap(),
            Some("fp".to_string())
        );
    }
}
