//! Vector store abstraction layer.
//!
//! One trait, one variant per backend (in-process memory, Qdrant,
//! PostgreSQL/pgvector), selected from configuration. Every backend reports
//! similarity on a higher-is-closer scale and breaks score ties by insertion
//! order.

mod memory;
mod pgvector;
mod qdrant;

pub use memory::MemoryStore;
pub use pgvector::PgVectorBackend;
pub use qdrant::QdrantBackend;

use std::sync::Arc;

use async_trait::async_trait;
use serde::Serialize;

use crate::error::VectorStoreError;
use crate::models::{Chunk, Config, VectorDriver, VectorHit};

/// Collection/table information.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CollectionInfo {
    pub name: String,
    pub dimension: usize,
    pub points_count: u64,
}

/// Capabilities every vector backend provides.
///
/// Upserts are atomic per chunk. A backend that cannot be reached fails with
/// [`VectorStoreError::ConnectionError`] rather than returning an empty result.
#[async_trait]
pub trait VectorStore: Send + Sync {
    /// Backend name for status output.
    fn name(&self) -> &'static str;

    async fn health_check(&self) -> Result<(), VectorStoreError>;

    /// Create the collection if missing. An existing collection with another
    /// dimension is a [`VectorStoreError::DimensionMismatch`].
    async fn create_collection(&self, collection: &str, dimension: usize)
    -> Result<(), VectorStoreError>;

    /// `None` if the collection does not exist.
    async fn collection_info(&self, collection: &str)
    -> Result<Option<CollectionInfo>, VectorStoreError>;

    async fn drop_collection(&self, collection: &str) -> Result<(), VectorStoreError>;

    /// Insert or replace one chunk and its embedding.
    async fn upsert(
        &self,
        collection: &str,
        chunk: &Chunk,
        embedding: &[f32],
    ) -> Result<(), VectorStoreError>;

    /// At most `k` hits by descending similarity. A missing or empty
    /// collection yields an empty list.
    async fn query(
        &self,
        collection: &str,
        vector: &[f32],
        k: usize,
    ) -> Result<Vec<VectorHit>, VectorStoreError>;

    async fn delete(&self, collection: &str, chunk_id: &str) -> Result<(), VectorStoreError>;

    /// Remove every chunk of a document.
    async fn delete_document(
        &self,
        collection: &str,
        document_id: &str,
    ) -> Result<(), VectorStoreError>;

    /// Fingerprint stored with a document's chunks, if any are stored.
    async fn document_fingerprint(
        &self,
        collection: &str,
        document_id: &str,
    ) -> Result<Option<String>, VectorStoreError>;

    /// Persist buffered state. Remote backends write through.
    async fn flush(&self) -> Result<(), VectorStoreError> {
        Ok(())
    }
}

/// Create the vector store backend selected by configuration.
pub async fn create_backend(config: &Config) -> Result<Arc<dyn VectorStore>, VectorStoreError> {
    let store = &config.vector_store;
    match store.driver {
        VectorDriver::Memory => {
            let backend = match config.data_dir() {
                Some(dir) => MemoryStore::with_snapshot(dir.join("vectors.json"), store.metric)?,
                None => MemoryStore::new(store.metric),
            };
            Ok(Arc::new(backend))
        }
        VectorDriver::Qdrant => Ok(Arc::new(QdrantBackend::new(store)?)),
        VectorDriver::PostgreSQL => Ok(Arc::new(PgVectorBackend::new(store).await?)),
    }
}

/// Order hits by similarity descending, then by insertion sequence.
pub(crate) fn rank_hits(mut hits: Vec<(VectorHit, u64)>, k: usize) -> Vec<VectorHit> {
    hits.sort_by(|a, b| {
        b.0.similarity
            .total_cmp(&a.0.similarity)
            .then_with(|| a.1.cmp(&b.1))
    });
    hits.into_iter().take(k).map(|(hit, _)| hit).collect()
}
