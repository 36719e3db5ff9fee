pub mod agent;
pub mod chunker;
pub mod embedding;
pub mod ingest;
pub mod lexical_index;
pub mod rerank;
pub mod retriever;
pub mod tool_bridge;
pub mod vector_store;

pub use agent::{AgentLimits, AgentResponse, AgentStatus, Orchestrator, SufficiencyPolicy, create_policy};
pub use chunker::{ChunkParams, Chunker};
pub use embedding::{EmbeddingClient, EmbeddingProvider, HashEmbedder, HealthResponse, create_provider};
pub use ingest::{IngestReport, Ingestor};
pub use lexical_index::{LexicalHit, LexicalIndex};
pub use rerank::{Reranker, create_reranker};
pub use retriever::{HybridRetriever, RetrievalParams};
pub use tool_bridge::{McpHttpBridge, ToolBridge, ToolOutput, ToolRouter};
pub use vector_store::{CollectionInfo, MemoryStore, VectorStore, create_backend};
