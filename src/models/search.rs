//! Search-related models.

use serde::{Deserialize, Serialize};

use super::document::Chunk;

/// Output format for CLI results.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    /// Human-readable text format
    #[default]
    Text,
    /// Machine-parseable JSON format
    Json,
    /// Documentation-friendly Markdown format
    Markdown,
}

impl std::str::FromStr for OutputFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "text" => Ok(OutputFormat::Text),
            "json" => Ok(OutputFormat::Json),
            "markdown" | "md" => Ok(OutputFormat::Markdown),
            _ => Err(format!("unknown output format: {}", s)),
        }
    }
}

impl std::fmt::Display for OutputFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            OutputFormat::Text => write!(f, "text"),
            OutputFormat::Json => write!(f, "json"),
            OutputFormat::Markdown => write!(f, "markdown"),
        }
    }
}

/// One nearest-neighbour hit from a vector backend.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VectorHit {
    pub chunk: Chunk,
    /// Similarity on the backend's normalized scale (higher is closer).
    pub similarity: f32,
}

/// A ranked retrieval result. Transient: produced per query and discarded.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchResult {
    pub chunk: Chunk,

    /// Raw vector similarity, if the chunk was a vector candidate.
    pub vector_score: Option<f32>,

    /// Raw BM25 score, if the chunk was a lexical candidate.
    pub lexical_score: Option<f32>,

    pub vector_norm: f32,
    pub lexical_norm: f32,
    pub fused_score: f32,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub rerank_score: Option<f32>,

    /// 1-based position in the final list.
    pub rank: usize,
}

impl SearchResult {
    /// The score that ordered this result: rerank score when present, fused otherwise.
    pub fn score(&self) -> f32 {
        self.rerank_score.unwrap_or(self.fused_score)
    }
}

/// Results of one retrieval pass.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchResults {
    pub query: String,
    pub collection: String,
    pub results: Vec<SearchResult>,
    /// True when the pass ran lexical-only because query embedding failed.
    pub degraded: bool,
    pub duration_ms: u64,
}

impl SearchResults {
    pub fn is_empty(&self) -> bool {
        self.results.is_empty()
    }

    pub fn len(&self) -> usize {
        self.results.len()
    }
}
