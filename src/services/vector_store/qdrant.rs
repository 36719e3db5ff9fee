//! Qdrant vector store backend implementation.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use qdrant_client::Qdrant;
use qdrant_client::qdrant::value::Kind;
use qdrant_client::qdrant::{
    Condition, CreateCollectionBuilder, DeletePointsBuilder, Distance, Filter, GetPointsBuilder,
    PointStruct,
    PointsIdsList, ScrollPointsBuilder, SearchPointsBuilder, UpsertPointsBuilder,
    VectorParamsBuilder, vectors_config,
};
use tracing::debug;

use super::{CollectionInfo, VectorStore, rank_hits};
use crate::error::VectorStoreError;
use crate::models::{
    Chunk, ChunkingStrategy, DistanceMetric, Source, VectorHit, VectorStoreConfig,
    validate_collection_name,
};

type Payload = HashMap<String, qdrant_client::qdrant::Value>;

/// Qdrant vector store backend.
pub struct QdrantBackend {
    client: Qdrant,
    metric: DistanceMetric,
}

impl QdrantBackend {
    pub fn new(config: &VectorStoreConfig) -> Result<Self, VectorStoreError> {
        let mut builder = Qdrant::from_url(&config.url)
            .timeout(Duration::from_secs(config.timeout_secs))
            .connect_timeout(Duration::from_secs(config.timeout_secs));

        if let Some(ref api_key) = config.api_key {
            builder = builder.api_key(api_key.clone());
        }

        let client = builder
            .build()
            .map_err(|e| VectorStoreError::ConnectionError(e.to_string()))?;

        Ok(Self {
            client,
            metric: config.metric,
        })
    }

    fn distance(&self) -> Distance {
        match self.metric {
            DistanceMetric::Cosine => Distance::Cosine,
            DistanceMetric::Dot => Distance::Dot,
            DistanceMetric::Euclidean => Distance::Euclid,
        }
    }

    /// Qdrant reports Euclidean distance; everything else is already a similarity.
    fn similarity(&self, score: f32) -> f32 {
        match self.metric {
            DistanceMetric::Euclidean => 1.0 / (1.0 + score.max(0.0)),
            _ => score,
        }
    }

    fn chunk_payload(chunk: &Chunk, seq: i64) -> Payload {
        let mut payload = Payload::new();
        payload.insert("document_id".to_string(), chunk.document_id.clone().into());
        payload.insert("chunk_index".to_string(), i64::from(chunk.chunk_index).into());
        payload.insert("content".to_string(), chunk.content.clone().into());
        payload.insert("char_start".to_string(), (chunk.char_start as i64).into());
        payload.insert("char_end".to_string(), (chunk.char_end as i64).into());
        payload.insert("line_start".to_string(), i64::from(chunk.line_start).into());
        payload.insert("line_end".to_string(), i64::from(chunk.line_end).into());
        payload.insert("strategy".to_string(), chunk.strategy.to_string().into());
        payload.insert("fingerprint".to_string(), chunk.fingerprint.clone().into());
        payload.insert("location".to_string(), chunk.source.location.clone().into());
        payload.insert("mime_type".to_string(), chunk.source.mime_type.clone().into());
        payload.insert("seq".to_string(), seq.into());
        payload
    }

    /// Insertion order of an already stored point.
    async fn stored_seq(
        &self,
        collection: &str,
        chunk_id: &str,
    ) -> Result<Option<i64>, VectorStoreError> {
        let get = GetPointsBuilder::new(collection, vec![chunk_id.to_string().into()])
            .with_payload(true);
        match self.client.get_points(get).await {
            Ok(response) => Ok(response
                .result
                .first()
                .and_then(|point| payload_opt_int(&point.payload, "seq"))),
            Err(e) if is_not_found(&e.to_string()) => Ok(None),
            Err(e) => Err(classify(VectorStoreError::SearchError)(e)),
        }
    }

    fn chunk_from_payload(id: String, payload: &Payload) -> Chunk {
        Chunk {
            id,
            document_id: payload_str(payload, "document_id"),
            chunk_index: payload_int(payload, "chunk_index") as u32,
            content: payload_str(payload, "content"),
            char_start: payload_int(payload, "char_start") as usize,
            char_end: payload_int(payload, "char_end") as usize,
            line_start: payload_int(payload, "line_start") as u32,
            line_end: payload_int(payload, "line_end") as u32,
            strategy: payload_str(payload, "strategy")
                .parse()
                .unwrap_or(ChunkingStrategy::Lexical),
            fingerprint: payload_str(payload, "fingerprint"),
            source: Source::new(
                payload_str(payload, "location"),
                payload_str(payload, "mime_type"),
            ),
        }
    }
}

fn payload_str(payload: &Payload, key: &str) -> String {
    payload
        .get(key)
        .and_then(|v| match &v.kind {
            Some(Kind::StringValue(s)) => Some(s.clone()),
            _ => None,
        })
        .unwrap_or_default()
}

fn payload_opt_int(payload: &Payload, key: &str) -> Option<i64> {
    payload.get(key).and_then(|v| match &v.kind {
        Some(Kind::IntegerValue(n)) => Some(*n),
        _ => None,
    })
}

fn payload_int(payload: &Payload, key: &str) -> i64 {
    payload_opt_int(payload, key).unwrap_or_default()
}

/// A replaced point keeps its original `seq`; new points are ordered by
/// insertion time.
fn upsert_seq(stored: Option<i64>, now: i64) -> i64 {
    stored.unwrap_or(now)
}

fn point_id_string(id: Option<&qdrant_client::qdrant::PointId>) -> String {
    use qdrant_client::qdrant::point_id::PointIdOptions;
    match id.and_then(|id| id.point_id_options.as_ref()) {
        Some(PointIdOptions::Uuid(uuid)) => uuid.clone(),
        Some(PointIdOptions::Num(num)) => num.to_string(),
        None => String::new(),
    }
}

fn is_not_found(msg: &str) -> bool {
    msg.contains("not found") || msg.contains("doesn't exist") || msg.contains("Not found")
}

/// Transport failures become `ConnectionError`; everything else keeps `wrap`.
fn classify(wrap: fn(String) -> VectorStoreError) -> impl Fn(qdrant_client::QdrantError) -> VectorStoreError {
    move |e| {
        let msg = e.to_string();
        let lower = msg.to_lowercase();
        if lower.contains("transport")
            || lower.contains("connect")
            || lower.contains("unavailable")
            || lower.contains("deadline")
        {
            VectorStoreError::ConnectionError(msg)
        } else {
            wrap(msg)
        }
    }
}

#[async_trait]
impl VectorStore for QdrantBackend {
    fn name(&self) -> &'static str {
        "qdrant"
    }

    async fn health_check(&self) -> Result<(), VectorStoreError> {
        self.client
            .health_check()
            .await
            .map(|_| ())
            .map_err(|e| VectorStoreError::ConnectionError(e.to_string()))
    }

    async fn create_collection(
        &self,
        collection: &str,
        dimension: usize,
    ) -> Result<(), VectorStoreError> {
        validate_collection_name(collection)?;
        if let Some(info) = self.collection_info(collection).await? {
            if info.dimension != dimension {
                return Err(VectorStoreError::DimensionMismatch {
                    collection: collection.to_string(),
                    expected: info.dimension,
                    actual: dimension,
                });
            }
            return Ok(());
        }

        let create = CreateCollectionBuilder::new(collection)
            .vectors_config(VectorParamsBuilder::new(dimension as u64, self.distance()));

        self.client
            .create_collection(create)
            .await
            .map_err(classify(VectorStoreError::CollectionError))?;

        debug!(collection, dimension, "created qdrant collection");
        Ok(())
    }

    async fn collection_info(
        &self,
        collection: &str,
    ) -> Result<Option<CollectionInfo>, VectorStoreError> {
        match self.client.collection_info(collection).await {
            Ok(response) => {
                let Some(result) = response.result else {
                    return Ok(None);
                };
                let dimension = result
                    .config
                    .as_ref()
                    .and_then(|c| c.params.as_ref())
                    .and_then(|p| p.vectors_config.as_ref())
                    .and_then(|v| v.config.as_ref())
                    .map_or(0, |config| match config {
                        vectors_config::Config::Params(params) => params.size as usize,
                        vectors_config::Config::ParamsMap(map) => map
                            .map
                            .values()
                            .next()
                            .map_or(0, |params| params.size as usize),
                    });
                Ok(Some(CollectionInfo {
                    name: collection.to_string(),
                    dimension,
                    points_count: result.points_count.unwrap_or(0),
                }))
            }
            Err(e) => {
                let msg = e.to_string();
                if is_not_found(&msg) {
                    Ok(None)
                } else {
                    Err(classify(VectorStoreError::CollectionError)(e))
                }
            }
        }
    }

    async fn drop_collection(&self, collection: &str) -> Result<(), VectorStoreError> {
        if self.collection_info(collection).await?.is_none() {
            return Ok(());
        }

        self.client
            .delete_collection(collection)
            .await
            .map_err(classify(VectorStoreError::DeleteError))?;

        Ok(())
    }

    async fn upsert(
        &self,
        collection: &str,
        chunk: &Chunk,
        embedding: &[f32],
    ) -> Result<(), VectorStoreError> {
        let now = chrono::Utc::now().timestamp_nanos_opt().unwrap_or_default();
        let seq = upsert_seq(self.stored_seq(collection, &chunk.id).await?, now);
        let point = PointStruct::new(
            chunk.id.clone(),
            embedding.to_vec(),
            Self::chunk_payload(chunk, seq),
        );
        let upsert = UpsertPointsBuilder::new(collection, vec![point]).wait(true);

        match self.client.upsert_points(upsert).await {
            Ok(_) => Ok(()),
            Err(e) if e.to_string().contains("dimension") => {
                let expected = self
                    .collection_info(collection)
                    .await?
                    .map_or(0, |info| info.dimension);
                Err(VectorStoreError::DimensionMismatch {
                    collection: collection.to_string(),
                    expected,
                    actual: embedding.len(),
                })
            }
            Err(e) => Err(classify(VectorStoreError::UpsertError)(e)),
        }
    }

    async fn query(
        &self,
        collection: &str,
        vector: &[f32],
        k: usize,
    ) -> Result<Vec<VectorHit>, VectorStoreError> {
        if k == 0 {
            return Ok(Vec::new());
        }

        let search =
            SearchPointsBuilder::new(collection, vector.to_vec(), k as u64).with_payload(true);

        let response = match self.client.search_points(search).await {
            Ok(response) => response,
            Err(e) if is_not_found(&e.to_string()) => return Ok(Vec::new()),
            Err(e) => return Err(classify(VectorStoreError::SearchError)(e)),
        };

        let hits = response
            .result
            .into_iter()
            .map(|point| {
                let seq = payload_int(&point.payload, "seq") as u64;
                let chunk =
                    Self::chunk_from_payload(point_id_string(point.id.as_ref()), &point.payload);
                let hit = VectorHit {
                    chunk,
                    similarity: self.similarity(point.score),
                };
                (hit, seq)
            })
            .collect();

        Ok(rank_hits(hits, k))
    }

    async fn delete(&self, collection: &str, chunk_id: &str) -> Result<(), VectorStoreError> {
        let delete = DeletePointsBuilder::new(collection)
            .points(PointsIdsList {
                ids: vec![chunk_id.to_string().into()],
            })
            .wait(true);

        match self.client.delete_points(delete).await {
            Ok(_) => Ok(()),
            Err(e) if is_not_found(&e.to_string()) => Ok(()),
            Err(e) => Err(classify(VectorStoreError::DeleteError)(e)),
        }
    }

    async fn delete_document(
        &self,
        collection: &str,
        document_id: &str,
    ) -> Result<(), VectorStoreError> {
        let filter = Filter::must([Condition::matches("document_id", document_id.to_string())]);
        let delete = DeletePointsBuilder::new(collection).points(filter).wait(true);

        match self.client.delete_points(delete).await {
            Ok(_) => Ok(()),
            Err(e) if is_not_found(&e.to_string()) => Ok(()),
            Err(e) => Err(classify(VectorStoreError::DeleteError)(e)),
        }
    }

    async fn document_fingerprint(
        &self,
        collection: &str,
        document_id: &str,
    ) -> Result<Option<String>, VectorStoreError> {
        let scroll = ScrollPointsBuilder::new(collection)
            .filter(Filter::must([Condition::matches(
                "document_id",
                document_id.to_string(),
            )]))
            .limit(1)
            .with_payload(true);

        let response = match self.client.scroll(scroll).await {
            Ok(response) => response,
            Err(e) if is_not_found(&e.to_string()) => return Ok(None),
            Err(e) => return Err(classify(VectorStoreError::SearchError)(e)),
        };

        Ok(response
            .result
            .first()
            .map(|point| payload_str(&point.payload, "fingerprint")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Document;
    use crate::utils::text::TextIndex;

    #[test]
    fn test_upsert_seq_keeps_stored_order() {
        assert_eq!(upsert_seq(Some(3), 1_000), 3);
        assert_eq!(upsert_seq(None, 1_000), 1_000);
    }

    #[test]
    fn test_chunk_payload_round_trips_seq_and_fields() {
        let doc = Document::new("Qdrant keeps payloads beside vectors.", Source::text("q.txt"));
        let index = TextIndex::new(&doc.text);
        let chunk = Chunk::from_span(&doc, &index, 0, 0, 6, ChunkingStrategy::Lexical);

        let payload = QdrantBackend::chunk_payload(&chunk, 42);
        assert_eq!(payload_opt_int(&payload, "seq"), Some(42));
        assert_eq!(payload_opt_int(&payload, "missing"), None);

        let restored = QdrantBackend::chunk_from_payload(chunk.id.clone(), &payload);
        assert_eq!(restored.document_id, chunk.document_id);
        assert_eq!(restored.content, "Qdrant");
        assert_eq!(restored.strategy, ChunkingStrategy::Lexical);
    }
}
