//! Error types for the retrieval engine.

use thiserror::Error;

use crate::utils::retry::Retryable;

/// Errors related to embedding operations.
#[derive(Debug, Error)]
pub enum EmbeddingError {
    #[error("failed to connect to embedding server: {0}")]
    ConnectionError(String),

    #[error("embedding server error: {0}")]
    ServerError(String),

    #[error("embedding request failed: {0}")]
    RequestError(#[from] reqwest::Error),

    #[error("invalid embedding response: {0}")]
    InvalidResponse(String),

    #[error("embedding dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },

    #[error("embedding timeout")]
    Timeout,
}

impl Retryable for EmbeddingError {
    fn is_retryable(&self) -> bool {
        match self {
            // Connection and timeout errors are retryable
            EmbeddingError::ConnectionError(_) | EmbeddingError::Timeout => true,
            // Server errors might be transient (e.g., 503 Service Unavailable)
            EmbeddingError::ServerError(msg) => {
                msg.contains("503")
                    || msg.contains("502")
                    || msg.contains("504")
                    || msg.contains("429")
                    || msg.to_lowercase().contains("unavailable")
                    || msg.to_lowercase().contains("too many requests")
            }
            // Request errors depend on the underlying cause
            EmbeddingError::RequestError(e) => e.is_timeout() || e.is_connect(),
            EmbeddingError::InvalidResponse(_) | EmbeddingError::DimensionMismatch { .. } => false,
        }
    }
}

/// Errors related to vector store operations.
#[derive(Debug, Error)]
pub enum VectorStoreError {
    #[error("failed to connect to vector store: {0}")]
    ConnectionError(String),

    #[error("collection error: {0}")]
    CollectionError(String),

    #[error("upsert error: {0}")]
    UpsertError(String),

    #[error("search error: {0}")]
    SearchError(String),

    #[error("delete error: {0}")]
    DeleteError(String),

    #[error("collection '{collection}' expects {expected}-dimensional vectors, got {actual}")]
    DimensionMismatch {
        collection: String,
        expected: usize,
        actual: usize,
    },

    #[error("invalid collection name: {0}")]
    InvalidCollection(String),

    #[error("PostgreSQL error: {0}")]
    PostgresError(String),

    #[error("pgvector extension error: {0}")]
    PgVectorExtensionError(String),

    #[error("snapshot error: {0}")]
    SnapshotError(String),
}

impl Retryable for VectorStoreError {
    fn is_retryable(&self) -> bool {
        match self {
            // Connection errors are always retryable
            VectorStoreError::ConnectionError(_) => true,
            VectorStoreError::DimensionMismatch { .. }
            | VectorStoreError::InvalidCollection(_)
            | VectorStoreError::PgVectorExtensionError(_)
            | VectorStoreError::SnapshotError(_) => false,
            // Other errors might be transient
            VectorStoreError::CollectionError(msg)
            | VectorStoreError::UpsertError(msg)
            | VectorStoreError::SearchError(msg)
            | VectorStoreError::DeleteError(msg)
            | VectorStoreError::PostgresError(msg) => {
                let msg_lower = msg.to_lowercase();
                msg_lower.contains("timeout")
                    || msg_lower.contains("timed out")
                    || msg_lower.contains("connection")
                    || msg_lower.contains("unavailable")
                    || msg_lower.contains("too many")
            }
        }
    }
}

impl VectorStoreError {
    /// True when the error means the backend could not be reached at all.
    pub fn is_connectivity(&self) -> bool {
        matches!(self, VectorStoreError::ConnectionError(_)) || self.is_retryable()
    }
}

/// Errors raised by the lexical index snapshot layer.
#[derive(Debug, Error)]
pub enum LexicalIndexError {
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("snapshot parse error: {0}")]
    JsonError(#[from] serde_json::Error),
}

/// Errors raised while loading documents from disk.
#[derive(Debug, Error)]
pub enum SourceError {
    #[error("path not found: {0}")]
    NotFound(String),

    #[error("failed to walk directory: {0}")]
    WalkError(String),

    #[error("failed to read {path}: {reason}")]
    ReadError { path: String, reason: String },

    #[error("invalid exclude pattern '{pattern}': {reason}")]
    InvalidPattern { pattern: String, reason: String },
}

/// Errors related to chunking.
#[derive(Debug, Error)]
pub enum ChunkError {
    #[error("invalid chunking parameters: {0}")]
    InvalidParams(String),
}

/// Errors related to ingestion (chunk, embed, upsert).
#[derive(Debug, Error)]
pub enum IngestionError {
    #[error("invalid chunking parameters: {0}")]
    InvalidParams(String),

    #[error("collection '{collection}' holds {expected}-dimensional embeddings, model produces {actual}")]
    DimensionMismatch {
        collection: String,
        expected: usize,
        actual: usize,
    },

    #[error("embedding error: {0}")]
    Embedding(#[from] EmbeddingError),

    #[error("vector store unavailable: {0}")]
    BackendUnavailable(String),

    #[error("vector store error: {0}")]
    VectorStore(VectorStoreError),
}

impl From<ChunkError> for IngestionError {
    fn from(err: ChunkError) -> Self {
        match err {
            ChunkError::InvalidParams(msg) => IngestionError::InvalidParams(msg),
        }
    }
}

impl From<VectorStoreError> for IngestionError {
    fn from(err: VectorStoreError) -> Self {
        match err {
            VectorStoreError::DimensionMismatch {
                collection,
                expected,
                actual,
            } => IngestionError::DimensionMismatch {
                collection,
                expected,
                actual,
            },
            e if e.is_connectivity() => IngestionError::BackendUnavailable(e.to_string()),
            e => IngestionError::VectorStore(e),
        }
    }
}

/// Errors related to search operations.
#[derive(Debug, Error)]
pub enum SearchError {
    #[error("vector store unavailable: {0}")]
    BackendUnavailable(String),

    #[error("vector store error: {0}")]
    VectorStore(VectorStoreError),

    #[error("invalid query: {0}")]
    InvalidQuery(String),

    #[error("invalid retrieval parameters: {0}")]
    InvalidParams(String),
}

impl From<VectorStoreError> for SearchError {
    fn from(err: VectorStoreError) -> Self {
        if err.is_connectivity() {
            SearchError::BackendUnavailable(err.to_string())
        } else {
            SearchError::VectorStore(err)
        }
    }
}

/// Errors related to reranking.
#[derive(Debug, Error)]
pub enum RerankError {
    #[error("rerank request failed: {0}")]
    RequestError(#[from] reqwest::Error),

    #[error("rerank server error: {0}")]
    ServerError(String),

    #[error("invalid rerank response: {0}")]
    InvalidResponse(String),
}

/// Errors related to external tool calls.
#[derive(Debug, Error)]
pub enum ToolCallError {
    #[error("unknown tool: {0}")]
    UnknownTool(String),

    #[error("invalid arguments for {tool}: {reason}")]
    InvalidArguments { tool: String, reason: String },

    #[error("tool call timed out after {0}s")]
    Timeout(u64),

    #[error("tool returned an error: {0}")]
    Remote(String),

    #[error("tool transport error: {0}")]
    Transport(String),

    #[error("protocol error: {0}")]
    Protocol(String),

    #[error("duplicate call to {0} with identical arguments suppressed")]
    Duplicate(String),
}

impl Retryable for ToolCallError {
    fn is_retryable(&self) -> bool {
        false
    }
}

/// Errors raised by a sufficiency policy.
#[derive(Debug, Error)]
pub enum PolicyError {
    #[error("policy request failed: {0}")]
    RequestError(#[from] reqwest::Error),

    #[error("policy server error: {0}")]
    ServerError(String),

    #[error("invalid policy response: {0}")]
    InvalidResponse(String),
}

/// Errors that abort an agentic query.
#[derive(Debug, Error)]
pub enum AgentError {
    #[error("invalid query: {0}")]
    InvalidQuery(String),

    #[error("retrieval failed: {0}")]
    Search(#[from] SearchError),
}

/// Errors related to configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("TOML parse error: {0}")]
    TomlParseError(#[from] toml::de::Error),

    #[error("TOML serialize error: {0}")]
    TomlSerializeError(#[from] toml::ser::Error),

    #[error("validation error: {0}")]
    ValidationError(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_connection_error_maps_to_backend_unavailable() {
        let err: SearchError = VectorStoreError::ConnectionError("refused".to_string()).into();
        assert!(matches!(err, SearchError::BackendUnavailable(_)));

        let err: IngestionError = VectorStoreError::ConnectionError("refused".to_string()).into();
        assert!(matches!(err, IngestionError::BackendUnavailable(_)));
    }

    #[test]
    fn test_dimension_mismatch_is_ingestion_error() {
        let err: IngestionError = VectorStoreError::DimensionMismatch {
            collection: "docs".to_string(),
            expected: 8,
            actual: 4,
        }
        .into();
        assert!(matches!(
            err,
            IngestionError::DimensionMismatch {
                expected: 8,
                actual: 4,
                ..
            }
        ));
    }

    #[test]
    fn test_retryable_classification() {
        assert!(EmbeddingError::Timeout.is_retryable());
        assert!(EmbeddingError::ServerError("status 503".to_string()).is_retryable());
        assert!(!EmbeddingError::InvalidResponse("bad".to_string()).is_retryable());
        assert!(VectorStoreError::ConnectionError("x".to_string()).is_retryable());
        assert!(!VectorStoreError::UpsertError("constraint violated".to_string()).is_retryable());
    }
}
