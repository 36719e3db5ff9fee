use std::time::Duration;

use async_trait::async_trait;
use pgvector::Vector;
use sqlx::Row;
use sqlx::postgres::{PgPool, PgPoolOptions, PgRow};
use tracing::debug;

use super::{CollectionInfo, VectorStore, rank_hits};
use crate::error::VectorStoreError;
use crate::models::{
    Chunk, ChunkingStrategy, DistanceMetric, Source, VectorHit, VectorStoreConfig,
    validate_collection_name,
};

const TABLE_PREFIX: &str = "arag_";

/// One table per collection, named `arag_<collection>`.
pub struct PgVectorBackend {
    pool: PgPool,
    metric: DistanceMetric,
}

impl PgVectorBackend {
    pub async fn new(config: &VectorStoreConfig) -> Result<Self, VectorStoreError> {
        let pool = PgPoolOptions::new()
            .max_connections(config.pool_max_connections)
            .acquire_timeout(Duration::from_secs(config.timeout_secs))
            .connect(&config.url)
            .await
            .map_err(|e| VectorStoreError::ConnectionError(e.to_string()))?;

        let backend = Self {
            pool,
            metric: config.metric,
        };

        backend.check_pgvector_extension().await?;

        Ok(backend)
    }

    async fn check_pgvector_extension(&self) -> Result<(), VectorStoreError> {
        let result: Option<(String,)> =
            sqlx::query_as("SELECT extname FROM pg_extension WHERE extname = 'vector'")
                .fetch_optional(&self.pool)
                .await
                .map_err(pg_error)?;

        if result.is_none() {
            return Err(VectorStoreError::PgVectorExtensionError(
                "pgvector extension is not installed. Run: CREATE EXTENSION vector;".to_string(),
            ));
        }

        Ok(())
    }

    fn table_name(collection: &str) -> Result<String, VectorStoreError> {
        validate_collection_name(collection)?;
        Ok(format!("{TABLE_PREFIX}{collection}"))
    }

    /// Score expression with higher meaning closer, plus the matching index opclass.
    fn score_sql(&self) -> (&'static str, &'static str) {
        match self.metric {
            DistanceMetric::Cosine => ("1 - (embedding <=> $1)", "vector_cosine_ops"),
            DistanceMetric::Dot => ("(embedding <#> $1) * -1", "vector_ip_ops"),
            DistanceMetric::Euclidean => ("1 / (1 + (embedding <-> $1))", "vector_l2_ops"),
        }
    }

    fn chunk_from_row(row: &PgRow) -> Chunk {
        let strategy: String = row.get("strategy");
        Chunk {
            id: row.get("id"),
            document_id: row.get("document_id"),
            chunk_index: row.get::<i32, _>("chunk_index") as u32,
            content: row.get("content"),
            char_start: row.get::<i64, _>("char_start") as usize,
            char_end: row.get::<i64, _>("char_end") as usize,
            line_start: row.get::<i32, _>("line_start") as u32,
            line_end: row.get::<i32, _>("line_end") as u32,
            strategy: strategy.parse().unwrap_or(ChunkingStrategy::Lexical),
            fingerprint: row.get("fingerprint"),
            source: Source::new(
                row.get::<String, _>("location"),
                row.get::<String, _>("mime_type"),
            ),
        }
    }
}

fn pg_error(e: sqlx::Error) -> VectorStoreError {
    match e {
        sqlx::Error::Io(_) | sqlx::Error::PoolTimedOut | sqlx::Error::PoolClosed => {
            VectorStoreError::ConnectionError(e.to_string())
        }
        _ => VectorStoreError::PostgresError(e.to_string()),
    }
}

#[async_trait]
impl VectorStore for PgVectorBackend {
    fn name(&self) -> &'static str {
        "pgvector"
    }

    async fn health_check(&self) -> Result<(), VectorStoreError> {
        sqlx::query("SELECT 1")
            .execute(&self.pool)
            .await
            .map(|_| ())
            .map_err(|e| VectorStoreError::ConnectionError(e.to_string()))
    }

    async fn create_collection(
        &self,
        collection: &str,
        dimension: usize,
    ) -> Result<(), VectorStoreError> {
        let table = Self::table_name(collection)?;
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

        let create_table = format!(
            r#"
            CREATE TABLE IF NOT EXISTS "{table}" (
                id TEXT PRIMARY KEY,
                seq BIGSERIAL,
                document_id TEXT NOT NULL,
                chunk_index INTEGER NOT NULL,
                content TEXT NOT NULL,
                char_start BIGINT NOT NULL,
                char_end BIGINT NOT NULL,
                line_start INTEGER NOT NULL,
                line_end INTEGER NOT NULL,
                strategy TEXT NOT NULL,
                fingerprint TEXT NOT NULL,
                location TEXT NOT NULL,
                mime_type TEXT NOT NULL,
                embedding vector({dimension}) NOT NULL
            )
            "#
        );

        sqlx::query(&create_table)
            .execute(&self.pool)
            .await
            .map_err(|e| VectorStoreError::CollectionError(e.to_string()))?;

        let (_, opclass) = self.score_sql();
        let indices = [
            format!(
                r#"CREATE INDEX IF NOT EXISTS "{table}_embedding_idx" ON "{table}" USING hnsw (embedding {opclass})"#
            ),
            format!(
                r#"CREATE INDEX IF NOT EXISTS "{table}_document_id_idx" ON "{table}" (document_id)"#
            ),
        ];

        for index_sql in &indices {
            sqlx::query(index_sql)
                .execute(&self.pool)
                .await
                .map_err(|e| VectorStoreError::CollectionError(e.to_string()))?;
        }

        debug!(collection, dimension, "created pgvector table");
        Ok(())
    }

    async fn collection_info(
        &self,
        collection: &str,
    ) -> Result<Option<CollectionInfo>, VectorStoreError> {
        let table = Self::table_name(collection)?;

        // pgvector stores the declared dimension in atttypmod.
        let dimension: Option<(i32,)> = sqlx::query_as(
            r#"
            SELECT a.atttypmod
            FROM pg_attribute a
            JOIN pg_class c ON c.oid = a.attrelid
            WHERE c.relname = $1 AND a.attname = 'embedding' AND NOT a.attisdropped
            "#,
        )
        .bind(&table)
        .fetch_optional(&self.pool)
        .await
        .map_err(pg_error)?;

        let Some((dimension,)) = dimension else {
            return Ok(None);
        };

        let count: (i64,) = sqlx::query_as(&format!(r#"SELECT COUNT(*) FROM "{table}""#))
            .fetch_one(&self.pool)
            .await
            .map_err(pg_error)?;

        Ok(Some(CollectionInfo {
            name: collection.to_string(),
            dimension: dimension.max(0) as usize,
            points_count: count.0 as u64,
        }))
    }

    async fn drop_collection(&self, collection: &str) -> Result<(), VectorStoreError> {
        let table = Self::table_name(collection)?;
        sqlx::query(&format!(r#"DROP TABLE IF EXISTS "{table}""#))
            .execute(&self.pool)
            .await
            .map_err(|e| VectorStoreError::DeleteError(e.to_string()))?;
        Ok(())
    }

    async fn upsert(
        &self,
        collection: &str,
        chunk: &Chunk,
        embedding: &[f32],
    ) -> Result<(), VectorStoreError> {
        let table = Self::table_name(collection)?;
        let Some(info) = self.collection_info(collection).await? else {
            return Err(VectorStoreError::CollectionError(format!(
                "collection '{collection}' does not exist"
            )));
        };
        if info.dimension != embedding.len() {
            return Err(VectorStoreError::DimensionMismatch {
                collection: collection.to_string(),
                expected: info.dimension,
                actual: embedding.len(),
            });
        }

        // seq is left untouched on conflict so a replaced chunk keeps its position.
        let query = format!(
            r#"
            INSERT INTO "{table}" (id, document_id, chunk_index, content, char_start, char_end,
                                   line_start, line_end, strategy, fingerprint, location,
                                   mime_type, embedding)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13)
            ON CONFLICT (id) DO UPDATE SET
                document_id = EXCLUDED.document_id,
                chunk_index = EXCLUDED.chunk_index,
                content = EXCLUDED.content,
                char_start = EXCLUDED.char_start,
                char_end = EXCLUDED.char_end,
                line_start = EXCLUDED.line_start,
                line_end = EXCLUDED.line_end,
                strategy = EXCLUDED.strategy,
                fingerprint = EXCLUDED.fingerprint,
                location = EXCLUDED.location,
                mime_type = EXCLUDED.mime_type,
                embedding = EXCLUDED.embedding
            "#
        );

        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| VectorStoreError::UpsertError(e.to_string()))?;

        sqlx::query(&query)
            .bind(&chunk.id)
            .bind(&chunk.document_id)
            .bind(chunk.chunk_index as i32)
            .bind(&chunk.content)
            .bind(chunk.char_start as i64)
            .bind(chunk.char_end as i64)
            .bind(chunk.line_start as i32)
            .bind(chunk.line_end as i32)
            .bind(chunk.strategy.to_string())
            .bind(&chunk.fingerprint)
            .bind(&chunk.source.location)
            .bind(&chunk.source.mime_type)
            .bind(Vector::from(embedding.to_vec()))
            .execute(&mut *tx)
            .await
            .map_err(|e| VectorStoreError::UpsertError(e.to_string()))?;

        tx.commit()
            .await
            .map_err(|e| VectorStoreError::UpsertError(e.to_string()))?;

        Ok(())
    }

    async fn query(
        &self,
        collection: &str,
        vector: &[f32],
        k: usize,
    ) -> Result<Vec<VectorHit>, VectorStoreError> {
        let table = Self::table_name(collection)?;
        let Some(info) = self.collection_info(collection).await? else {
            return Ok(Vec::new());
        };
        if info.points_count == 0 || k == 0 {
            return Ok(Vec::new());
        }
        if info.dimension != vector.len() {
            return Err(VectorStoreError::DimensionMismatch {
                collection: collection.to_string(),
                expected: info.dimension,
                actual: vector.len(),
            });
        }

        let (score, _) = self.score_sql();
        let query = format!(
            r#"
            SELECT id, seq, document_id, chunk_index, content, char_start, char_end,
                   line_start, line_end, strategy, fingerprint, location, mime_type,
                   ({score})::float8 AS score
            FROM "{table}"
            ORDER BY score DESC, seq ASC
            LIMIT $2
            "#
        );

        let rows = sqlx::query(&query)
            .bind(Vector::from(vector.to_vec()))
            .bind(k as i64)
            .fetch_all(&self.pool)
            .await
            .map_err(|e| VectorStoreError::SearchError(e.to_string()))?;

        let hits = rows
            .iter()
            .map(|row| {
                let seq: i64 = row.get("seq");
                let score: f64 = row.get("score");
                let hit = VectorHit {
                    chunk: Self::chunk_from_row(row),
                    similarity: score as f32,
                };
                (hit, seq as u64)
            })
            .collect();

        Ok(rank_hits(hits, k))
    }

    async fn delete(&self, collection: &str, chunk_id: &str) -> Result<(), VectorStoreError> {
        let table = Self::table_name(collection)?;
        if self.collection_info(collection).await?.is_none() {
            return Ok(());
        }
        sqlx::query(&format!(r#"DELETE FROM "{table}" WHERE id = $1"#))
            .bind(chunk_id)
            .execute(&self.pool)
            .await
            .map_err(|e| VectorStoreError::DeleteError(e.to_string()))?;
        Ok(())
    }

    async fn delete_document(
        &self,
        collection: &str,
        document_id: &str,
    ) -> Result<(), VectorStoreError> {
        let table = Self::table_name(collection)?;
        if self.collection_info(collection).await?.is_none() {
            return Ok(());
        }
        sqlx::query(&format!(r#"DELETE FROM "{table}" WHERE document_id = $1"#))
            .bind(document_id)
            .execute(&self.pool)
            .await
            .map_err(|e| VectorStoreError::DeleteError(e.to_string()))?;
        Ok(())
    }

    async fn document_fingerprint(
        &self,
        collection: &str,
        document_id: &str,
    ) -> Result<Option<String>, VectorStoreError> {
        let table = Self::table_name(collection)?;
        if self.collection_info(collection).await?.is_none() {
            return Ok(None);
        }
        let row: Option<(String,)> = sqlx::query_as(&format!(
            r#"SELECT fingerprint FROM "{table}" WHERE document_id = $1 LIMIT 1"#
        ))
        .bind(document_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(pg_error)?;
        Ok(row.map(|(fingerprint,)| fingerprint))
    }
}
