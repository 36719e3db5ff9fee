//! Build-time pipeline: chunk → embed → upsert into the vector store and the
//! lexical index.

use std::sync::Arc;

use futures::{StreamExt, TryStreamExt, stream};
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::error::IngestionError;
use crate::models::{Chunk, ChunkingStrategy, Document, validate_collection_name};
use crate::services::chunker::{ChunkParams, Chunker};
use crate::services::embedding::EmbeddingProvider;
use crate::services::lexical_index::LexicalIndex;
use crate::services::vector_store::VectorStore;
use crate::utils::retry::{RetryConfig, with_retry};

const DEFAULT_BATCH_SIZE: usize = 16;
const DEFAULT_CONCURRENCY: usize = 4;

/// What happened to one document.
#[derive(Debug, Clone, Serialize)]
pub struct IngestReport {
    pub document_id: String,
    pub location: String,
    pub chunks: usize,
    /// Unchanged text and model: nothing was re-embedded.
    pub skipped: bool,
    /// Chunks whose strategy differs from the requested one (lexical fallback).
    pub fallback_chunks: usize,
}

pub struct Ingestor {
    provider: Arc<dyn EmbeddingProvider>,
    store: Arc<dyn VectorStore>,
    lexical: Arc<LexicalIndex>,
    chunker: Chunker,
    strategy: ChunkingStrategy,
    params: ChunkParams,
    batch_size: usize,
    concurrency: usize,
    retry: RetryConfig,
}

impl Ingestor {
    pub fn new(
        provider: Arc<dyn EmbeddingProvider>,
        store: Arc<dyn VectorStore>,
        lexical: Arc<LexicalIndex>,
    ) -> Self {
        Self {
            chunker: Chunker::new(Some(provider.clone())),
            provider,
            store,
            lexical,
            strategy: ChunkingStrategy::default(),
            params: ChunkParams::default(),
            batch_size: DEFAULT_BATCH_SIZE,
            concurrency: DEFAULT_CONCURRENCY,
            retry: RetryConfig::default(),
        }
    }

    pub fn with_chunking(mut self, strategy: ChunkingStrategy, params: ChunkParams) -> Self {
        self.strategy = strategy;
        self.params = params;
        self
    }

    pub fn with_batching(mut self, batch_size: usize, concurrency: usize) -> Self {
        self.batch_size = batch_size.max(1);
        self.concurrency = concurrency.max(1);
        self.chunker = self.chunker.with_embed_batch_size(self.batch_size);
        self
    }

    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }


    /// Ingest one document into `collection`, replacing any previous version.
    pub async fn ingest(
        &self,
        collection: &str,
        document: &Document,
    ) -> Result<IngestReport, IngestionError> {
        validate_collection_name(collection)?;
        self.params.validate()?;

        let fingerprint = document.fingerprint(self.provider.model_id());
        let previous = with_retry(&self.retry, || {
            self.store.document_fingerprint(collection, &document.id)
        })
        .await
        .into_result()?;

        if previous.as_deref() == Some(fingerprint.as_str()) {
            debug!(document = %document.id, "unchanged, skipping");
            return Ok(IngestReport {
                document_id: document.id.clone(),
                location: document.source.location.clone(),
                chunks: 0,
                skipped: true,
                fallback_chunks: 0,
            });
        }

        let mut chunks = self.chunker.chunk(document, self.strategy, &self.params).await?;
        let fallback_chunks = chunks.iter().filter(|c| c.strategy != self.strategy).count();

        let texts: Vec<String> = chunks.iter().map(|c| c.content.clone()).collect();
        let embeddings = self.embed_chunks(collection, &texts).await?;

        let dimension = self.provider.dimension();
        with_retry(&self.retry, || self.store.create_collection(collection, dimension))
            .await
            .into_result()?;

        if previous.is_some() {
            with_retry(&self.retry, || self.store.delete_document(collection, &document.id))
                .await
                .into_result()?;
        }
        self.lexical.remove_document(collection, &document.id);

        for chunk in &mut chunks {
            chunk.fingerprint.clone_from(&fingerprint);
        }
        if let Err(e) = self.write_chunks(collection, &chunks, &embeddings).await {
            self.rollback(collection, &document.id).await;
            return Err(e);
        }

        info!(
            document = %document.id,
            location = %document.source.location,
            chunks = chunks.len(),
            fallback_chunks,
            "ingested document"
        );

        Ok(IngestReport {
            document_id: document.id.clone(),
            location: document.source.location.clone(),
            chunks: chunks.len(),
            skipped: false,
            fallback_chunks,
        })
    }

    async fn write_chunks(
        &self,
        collection: &str,
        chunks: &[Chunk],
        embeddings: &[Vec<f32>],
    ) -> Result<(), IngestionError> {
        for (chunk, embedding) in chunks.iter().zip(embeddings) {
            with_retry(&self.retry, || self.store.upsert(collection, chunk, embedding))
                .await
                .into_result()?;
            self.lexical.add(collection, chunk);
        }
        Ok(())
    }

    /// Drop a partially written document so its fingerprint cannot mark it
    /// as indexed on the next run.
    async fn rollback(&self, collection: &str, document_id: &str) {
        if let Err(e) = self.store.delete_document(collection, document_id).await {
            warn!(document = document_id, error = %e, "rollback of partial ingest failed");
        }
        self.lexical.remove_document(collection, document_id);
    }

    /// Embed in batches, `concurrency` batches in flight, output in input order.
    async fn embed_chunks(
        &self,
        collection: &str,
        texts: &[String],
    ) -> Result<Vec<Vec<f32>>, IngestionError> {
        let provider = self.provider.as_ref();
        let batches: Vec<Vec<Vec<f32>>> = stream::iter(texts.chunks(self.batch_size))
            .map(|batch| async move {
                let embeddings = provider.embed_batch(batch).await?;
                if embeddings.len() != batch.len() {
                    return Err(IngestionError::Embedding(
                        crate::error::EmbeddingError::InvalidResponse(format!(
                            "expected {} embeddings, got {}",
                            batch.len(),
                            embeddings.len()
                        )),
                    ));
                }
                Ok(embeddings)
            })
            .buffered(self.concurrency)
            .try_collect()
            .await?;

        let expected = provider.dimension();
        let embeddings: Vec<Vec<f32>> = batches.into_iter().flatten().collect();
        if let Some(bad) = embeddings.iter().find(|e| e.len() != expected) {
            return Err(IngestionError::DimensionMismatch {
                collection: collection.to_string(),
                expected,
                actual: bad.len(),
            });
        }
        Ok(embeddings)
    }

    /// Remove a document from both indexes.
    pub async fn delete_document(
        &self,
        collection: &str,
        document_id: &str,
    ) -> Result<usize, IngestionError> {
        with_retry(&self.retry, || self.store.delete_document(collection, document_id))
            .await
            .into_result()?;
        Ok(self.lexical.remove_document(collection, document_id))
    }

    pub async fn drop_collection(&self, collection: &str) -> Result<(), IngestionError> {
        validate_collection_name(collection)?;
        with_retry(&self.retry, || self.store.drop_collection(collection))
            .await
            .into_result()?;
        self.lexical.drop_collection(collection);
        Ok(())
    }
}
