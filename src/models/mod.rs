mod collection;
mod config;
mod document;
mod search;
mod tool;

pub use collection::validate_collection_name;
pub use config::{
    AgenticConfig, ChunkUnit, ChunkingConfig, ChunkingStrategy, Config, DEFAULT_COLLECTION,
    DEFAULT_EMBEDDING_DIMENSION, DEFAULT_EMBEDDING_MODEL, DEFAULT_EMBEDDING_URL,
    DEFAULT_FALLBACK_TOOL, DEFAULT_QDRANT_URL, DistanceMetric, EmbeddingConfig,
    EmbeddingProviderKind, LlmConfig, OutputConfig, PolicyKind, RerankerKind, ResolvedConfig,
    RetrievalConfig, ToolServerConfig, ToolsConfig, VectorDriver, VectorStoreConfig,
};
pub use document::{Chunk, Document, Source};
pub use search::{OutputFormat, SearchResult, SearchResults, VectorHit};
pub use tool::{ToolCall, ToolOutcome, ToolResult, ToolSpec};
