use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

use super::search::OutputFormat;

pub const DEFAULT_EMBEDDING_URL: &str = "http://localhost:11411";
pub const DEFAULT_EMBEDDING_MODEL: &str = "bge-small-en-v1.5";
pub const DEFAULT_EMBEDDING_DIMENSION: usize = 384;
pub const DEFAULT_QDRANT_URL: &str = "http://localhost:6334";
pub const DEFAULT_COLLECTION: &str = "documents";
pub const DEFAULT_FALLBACK_TOOL: &str = "search_web";

const APP_DIR: &str = "arag";
const WEIGHT_EPSILON: f32 = 1e-6;

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub embedding: EmbeddingConfig,

    #[serde(default)]
    pub vector_store: VectorStoreConfig,

    #[serde(default)]
    pub chunking: ChunkingConfig,

    #[serde(default)]
    pub retrieval: RetrievalConfig,

    #[serde(default)]
    pub agentic: AgenticConfig,

    #[serde(default)]
    pub tools: ToolsConfig,

    #[serde(default)]
    pub llm: LlmConfig,

    #[serde(default)]
    pub output: OutputConfig,
}

/// A configuration together with the files that contributed to it.
#[derive(Debug, Clone)]
pub struct ResolvedConfig {
    pub config: Config,
    pub sources: Vec<PathBuf>,
}

impl Config {
    /// Global configuration file, `<config_dir>/arag/config.toml`.
    pub fn config_path() -> Option<PathBuf> {
        dirs::config_dir().map(|p| p.join(APP_DIR).join("config.toml"))
    }

    /// Project configuration file, `./.arag/config.toml`.
    pub fn project_config_path() -> PathBuf {
        PathBuf::from(".arag").join("config.toml")
    }

    /// Directory for local snapshots (memory vector store, lexical index).
    pub fn data_dir(&self) -> Option<PathBuf> {
        self.vector_store
            .data_dir
            .clone()
            .or_else(|| dirs::data_dir().map(|p| p.join(APP_DIR)))
    }

    /// Resolve defaults, then the global file, then the project file, then `ARAG_*` variables.
    pub fn load() -> Result<ResolvedConfig, ConfigError> {
        let mut paths = Vec::new();
        if let Some(global) = Self::config_path() {
            paths.push(global);
        }
        paths.push(Self::project_config_path());
        Self::load_layers(&paths, |key| std::env::var(key).ok())
    }

    /// Layered load over explicit files and an environment lookup.
    pub fn load_layers<F>(paths: &[PathBuf], env: F) -> Result<ResolvedConfig, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut merged = toml::Table::new();
        let mut sources = Vec::new();

        for path in paths {
            if !path.exists() {
                continue;
            }
            let content = std::fs::read_to_string(path)?;
            let layer: toml::Table = toml::from_str(&content)?;
            merge_tables(&mut merged, layer);
            sources.push(path.clone());
        }

        let mut config: Config = toml::Value::Table(merged).try_into()?;
        config.apply_env(env)?;
        config.validate()?;

        Ok(ResolvedConfig { config, sources })
    }

    fn apply_env<F>(&mut self, env: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(url) = env("ARAG_EMBEDDING_URL") {
            self.embedding.url = url;
        }
        if let Some(provider) = env("ARAG_EMBEDDING_PROVIDER") {
            self.embedding.provider = parse_env("ARAG_EMBEDDING_PROVIDER", &provider)?;
        }
        if let Some(driver) = env("ARAG_VECTOR_BACKEND") {
            self.vector_store.driver = parse_env("ARAG_VECTOR_BACKEND", &driver)?;
        }
        if let Some(url) = env("ARAG_VECTOR_STORE_URL") {
            self.vector_store.url = url;
        }
        if let Some(key) = env("ARAG_VECTOR_STORE_API_KEY") {
            self.vector_store.api_key = Some(key);
        }
        if let Some(collection) = env("ARAG_COLLECTION") {
            self.vector_store.collection = collection;
        }
        if let Some(strategy) = env("ARAG_CHUNKING_STRATEGY") {
            self.chunking.strategy = parse_env("ARAG_CHUNKING_STRATEGY", &strategy)?;
        }
        if let Some(url) = env("ARAG_LLM_URL") {
            self.llm.url = Some(url);
        }
        if let Some(key) = env("ARAG_LLM_API_KEY") {
            self.llm.api_key = Some(key);
        }
        Ok(())
    }

    pub fn save_to(&self, path: &Path) -> Result<(), ConfigError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Reject configurations that cannot be run.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let invalid = |msg: String| -> Result<(), ConfigError> { Err(ConfigError::ValidationError(msg)) };

        if self.embedding.dimension == 0 {
            return invalid("embedding.dimension must be positive".to_string());
        }
        if self.embedding.batch_size == 0 || self.embedding.concurrency == 0 {
            return invalid("embedding.batch_size and embedding.concurrency must be positive".to_string());
        }

        let c = &self.chunking;
        if c.chunk_size == 0 {
            return invalid("chunking.chunk_size must be positive".to_string());
        }
        if c.chunk_overlap >= c.chunk_size {
            return invalid(format!(
                "chunking.chunk_overlap ({}) must be smaller than chunk_size ({})",
                c.chunk_overlap, c.chunk_size
            ));
        }
        if !(-1.0..=1.0).contains(&c.semantic_similarity_threshold) {
            return invalid("chunking.semantic_similarity_threshold must be within [-1, 1]".to_string());
        }
        check_weights(
            "chunking.hybrid_semantic_weight",
            c.hybrid_semantic_weight,
            "chunking.hybrid_lexical_weight",
            c.hybrid_lexical_weight,
        )?;
        if !(0.0..=1.0).contains(&c.hybrid_fusion_threshold) {
            return invalid("chunking.hybrid_fusion_threshold must be within [0, 1]".to_string());
        }

        let r = &self.retrieval;
        check_weights(
            "retrieval.vector_weight",
            r.vector_weight,
            "retrieval.lexical_weight",
            r.lexical_weight,
        )?;
        if r.top_k == 0 || r.top_k_rerank == 0 {
            return invalid("retrieval.top_k and retrieval.top_k_rerank must be positive".to_string());
        }
        if let Some(threshold) = r.relevance_threshold
            && !(0.0..=1.0).contains(&threshold)
        {
            return invalid("retrieval.relevance_threshold must be within [0, 1]".to_string());
        }
        if r.rerank && r.reranker == RerankerKind::CrossEncoder && r.reranker_url.is_none() {
            return invalid("retrieval.reranker_url is required for the cross_encoder reranker".to_string());
        }

        if self.agentic.query_budget_secs == 0 || self.agentic.tool_timeout_secs == 0 {
            return invalid("agentic budgets must be positive".to_string());
        }
        if self.agentic.policy == PolicyKind::Llm && self.llm.url.is_none() {
            return invalid("llm.url is required for the llm policy".to_string());
        }

        for server in &self.tools.servers {
            if server.name.trim().is_empty() || server.url.trim().is_empty() {
                return invalid("tools.servers entries need a name and a url".to_string());
            }
        }
        Ok(())
    }
}

fn check_weights(a_name: &str, a: f32, b_name: &str, b: f32) -> Result<(), ConfigError> {
    if a < 0.0 || b < 0.0 || ((a + b) - 1.0).abs() > WEIGHT_EPSILON {
        return Err(ConfigError::ValidationError(format!(
            "{a_name} ({a}) and {b_name} ({b}) must be non-negative and sum to 1"
        )));
    }
    Ok(())
}

fn parse_env<T: for<'de> Deserialize<'de>>(key: &str, value: &str) -> Result<T, ConfigError> {
    toml::Value::String(value.to_lowercase())
        .try_into()
        .map_err(|e| ConfigError::ValidationError(format!("{key}: {e}")))
}

fn merge_tables(base: &mut toml::Table, layer: toml::Table) {
    for (key, value) in layer {
        match (base.get_mut(&key), value) {
            (Some(toml::Value::Table(existing)), toml::Value::Table(incoming)) => {
                merge_tables(existing, incoming);
            }
            (_, value) => {
                base.insert(key, value);
            }
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EmbeddingProviderKind {
    /// Remote embedding server.
    #[default]
    Http,
    /// Offline feature-hashing embedder.
    Hash,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmbeddingConfig {
    #[serde(default)]
    pub provider: EmbeddingProviderKind,

    #[serde(default = "default_embedding_url")]
    pub url: String,

    #[serde(default = "default_embedding_model")]
    pub model_id: String,

    #[serde(default = "default_embedding_dimension")]
    pub dimension: usize,

    #[serde(default = "default_embedding_timeout")]
    pub timeout_secs: u64,

    #[serde(default = "default_batch_size")]
    pub batch_size: usize,

    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    #[serde(default = "default_concurrency")]
    pub concurrency: usize,
}

fn default_embedding_url() -> String {
    DEFAULT_EMBEDDING_URL.to_string()
}

fn default_embedding_model() -> String {
    DEFAULT_EMBEDDING_MODEL.to_string()
}

fn default_embedding_dimension() -> usize {
    DEFAULT_EMBEDDING_DIMENSION
}

fn default_embedding_timeout() -> u64 {
    30
}

fn default_batch_size() -> usize {
    16
}

fn default_max_attempts() -> u32 {
    3
}

fn default_concurrency() -> usize {
    4
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: EmbeddingProviderKind::default(),
            url: default_embedding_url(),
            model_id: default_embedding_model(),
            dimension: default_embedding_dimension(),
            timeout_secs: default_embedding_timeout(),
            batch_size: default_batch_size(),
            max_attempts: default_max_attempts(),
            concurrency: default_concurrency(),
        }
    }
}

/// Vector store driver type.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VectorDriver {
    /// In-process store with optional JSON snapshot.
    #[default]
    Memory,
    Qdrant,
    #[serde(alias = "postgres", alias = "pgvector")]
    PostgreSQL,
}

impl std::fmt::Display for VectorDriver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            VectorDriver::Memory => write!(f, "memory"),
            VectorDriver::Qdrant => write!(f, "qdrant"),
            VectorDriver::PostgreSQL => write!(f, "postgresql"),
        }
    }
}

/// Similarity metric for backends that let it be chosen.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DistanceMetric {
    #[default]
    Cosine,
    Dot,
    Euclidean,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VectorStoreConfig {
    #[serde(default, alias = "vector_backend")]
    pub driver: VectorDriver,

    /// Qdrant gRPC URL or PostgreSQL connection string.
    #[serde(default = "default_qdrant_url")]
    pub url: String,

    #[serde(default = "default_collection")]
    pub collection: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,

    #[serde(default)]
    pub metric: DistanceMetric,

    #[serde(default = "default_store_timeout")]
    pub timeout_secs: u64,

    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    #[serde(default = "default_pool_max_connections")]
    pub pool_max_connections: u32,

    /// Snapshot directory for the memory driver and the lexical index.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data_dir: Option<PathBuf>,
}

fn default_qdrant_url() -> String {
    DEFAULT_QDRANT_URL.to_string()
}

fn default_collection() -> String {
    DEFAULT_COLLECTION.to_string()
}

fn default_store_timeout() -> u64 {
    10
}

fn default_pool_max_connections() -> u32 {
    5
}

impl Default for VectorStoreConfig {
    fn default() -> Self {
        Self {
            driver: VectorDriver::default(),
            url: default_qdrant_url(),
            collection: default_collection(),
            api_key: None,
            metric: DistanceMetric::default(),
            timeout_secs: default_store_timeout(),
            max_attempts: default_max_attempts(),
            pool_max_connections: default_pool_max_connections(),
            data_dir: None,
        }
    }
}

/// Chunking strategy.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChunkingStrategy {
    #[default]
    Lexical,
    Semantic,
    Hybrid,
}

impl std::fmt::Display for ChunkingStrategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ChunkingStrategy::Lexical => write!(f, "lexical"),
            ChunkingStrategy::Semantic => write!(f, "semantic"),
            ChunkingStrategy::Hybrid => write!(f, "hybrid"),
        }
    }
}

impl std::str::FromStr for ChunkingStrategy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "lexical" => Ok(ChunkingStrategy::Lexical),
            "semantic" => Ok(ChunkingStrategy::Semantic),
            "hybrid" => Ok(ChunkingStrategy::Hybrid),
            _ => Err(format!("unknown chunking strategy: {s}")),
        }
    }
}

/// Unit counted by the lexical strategy.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChunkUnit {
    #[default]
    Character,
    Token,
    Sentence,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChunkingConfig {
    #[serde(default, alias = "chunking_strategy")]
    pub strategy: ChunkingStrategy,

    #[serde(default)]
    pub unit: ChunkUnit,

    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,

    #[serde(default = "default_chunk_overlap")]
    pub chunk_overlap: usize,

    #[serde(default = "default_similarity_threshold")]
    pub semantic_similarity_threshold: f32,

    #[serde(default = "default_hybrid_semantic_weight")]
    pub hybrid_semantic_weight: f32,

    #[serde(default = "default_hybrid_lexical_weight")]
    pub hybrid_lexical_weight: f32,

    #[serde(default = "default_fusion_threshold")]
    pub hybrid_fusion_threshold: f32,

    #[serde(default = "default_exclude_patterns")]
    pub exclude_patterns: Vec<String>,

    #[serde(default = "default_max_file_size")]
    pub max_file_size: u64,
}

fn default_chunk_size() -> usize {
    1000
}

fn default_chunk_overlap() -> usize {
    100
}

fn default_similarity_threshold() -> f32 {
    0.7
}

fn default_hybrid_semantic_weight() -> f32 {
    0.6
}

fn default_hybrid_lexical_weight() -> f32 {
    0.4
}

fn default_fusion_threshold() -> f32 {
    0.5
}

fn default_exclude_patterns() -> Vec<String> {
    vec![
        "**/.git/**".to_string(),
        "**/node_modules/**".to_string(),
        "**/target/**".to_string(),
        "**/.venv/**".to_string(),
        "**/__pycache__/**".to_string(),
        "**/.arag/**".to_string(),
    ]
}

fn default_max_file_size() -> u64 {
    10 * 1024 * 1024
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            strategy: ChunkingStrategy::default(),
            unit: ChunkUnit::default(),
            chunk_size: default_chunk_size(),
            chunk_overlap: default_chunk_overlap(),
            semantic_similarity_threshold: default_similarity_threshold(),
            hybrid_semantic_weight: default_hybrid_semantic_weight(),
            hybrid_lexical_weight: default_hybrid_lexical_weight(),
            hybrid_fusion_threshold: default_fusion_threshold(),
            exclude_patterns: default_exclude_patterns(),
            max_file_size: default_max_file_size(),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RerankerKind {
    /// In-process query term coverage.
    #[default]
    Term,
    /// Remote cross-encoder `/rerank` endpoint.
    CrossEncoder,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetrievalConfig {
    #[serde(default = "default_half_weight")]
    pub vector_weight: f32,

    #[serde(default = "default_half_weight")]
    pub lexical_weight: f32,

    #[serde(default = "default_top_k")]
    pub top_k: usize,

    #[serde(default = "default_top_k_rerank")]
    pub top_k_rerank: usize,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub relevance_threshold: Option<f32>,

    #[serde(default)]
    pub rerank: bool,

    #[serde(default)]
    pub reranker: RerankerKind,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reranker_url: Option<String>,
}

fn default_half_weight() -> f32 {
    0.5
}

fn default_top_k() -> usize {
    10
}

fn default_top_k_rerank() -> usize {
    5
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            vector_weight: default_half_weight(),
            lexical_weight: default_half_weight(),
            top_k: default_top_k(),
            top_k_rerank: default_top_k_rerank(),
            relevance_threshold: None,
            rerank: false,
            reranker: RerankerKind::default(),
            reranker_url: None,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PolicyKind {
    /// Score threshold with a fallback tool.
    #[default]
    Heuristic,
    /// OpenAI-compatible chat completion.
    Llm,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgenticConfig {
    #[serde(default = "default_max_iterations", alias = "agentic_max_iterations")]
    pub max_iterations: u32,

    /// Wall-clock budget for one query.
    #[serde(default = "default_query_budget")]
    pub query_budget_secs: u64,

    #[serde(default = "default_tool_timeout")]
    pub tool_timeout_secs: u64,

    #[serde(default)]
    pub policy: PolicyKind,

    /// Heuristic policy: best similarity needed to answer without tools.
    #[serde(default = "default_min_top_score")]
    pub min_top_score: f32,

    #[serde(default = "default_fallback_tool")]
    pub fallback_tool: String,

    #[serde(default = "default_fallback_query_arg")]
    pub fallback_query_arg: String,
}

fn default_max_iterations() -> u32 {
    3
}

fn default_query_budget() -> u64 {
    60
}

fn default_tool_timeout() -> u64 {
    15
}

fn default_min_top_score() -> f32 {
    0.5
}

fn default_fallback_tool() -> String {
    DEFAULT_FALLBACK_TOOL.to_string()
}

fn default_fallback_query_arg() -> String {
    "query".to_string()
}

impl Default for AgenticConfig {
    fn default() -> Self {
        Self {
            max_iterations: default_max_iterations(),
            query_budget_secs: default_query_budget(),
            tool_timeout_secs: default_tool_timeout(),
            policy: PolicyKind::default(),
            min_top_score: default_min_top_score(),
            fallback_tool: default_fallback_tool(),
            fallback_query_arg: default_fallback_query_arg(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ToolsConfig {
    #[serde(default)]
    pub servers: Vec<ToolServerConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolServerConfig {
    pub name: String,
    pub url: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmConfig {
    /// Base URL of an OpenAI-compatible API.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,

    #[serde(default = "default_llm_model")]
    pub model: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,

    #[serde(default = "default_llm_timeout")]
    pub timeout_secs: u64,
}

fn default_llm_model() -> String {
    "gpt-4o-mini".to_string()
}

fn default_llm_timeout() -> u64 {
    30
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            url: None,
            model: default_llm_model(),
            api_key: None,
            timeout_secs: default_llm_timeout(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct OutputConfig {
    #[serde(default)]
    pub default_format: OutputFormat,
}
