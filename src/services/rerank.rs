//! Second-pass relevance scoring over an already-shortlisted result list.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};

use crate::error::RerankError;
use crate::models::{RerankerKind, RetrievalConfig, SearchResult};
use crate::utils::tokenize;

/// Scores a shortlist against the query. Returns one score per input, in
/// input order; callers re-sort.
#[async_trait]
pub trait Reranker: Send + Sync {
    fn name(&self) -> &'static str;

    async fn rerank(&self, query: &str, results: &[SearchResult]) -> Result<Vec<f32>, RerankError>;
}

/// Build the reranker selected by configuration, or `None` when reranking is off.
pub fn create_reranker(
    config: &RetrievalConfig,
    timeout_secs: u64,
) -> Result<Option<Arc<dyn Reranker>>, RerankError> {
    if !config.rerank {
        return Ok(None);
    }
    match config.reranker {
        RerankerKind::Term => Ok(Some(Arc::new(TermCoverageReranker::default()))),
        RerankerKind::CrossEncoder => {
            let url = config.reranker_url.as_deref().ok_or_else(|| {
                RerankError::InvalidResponse("cross_encoder reranker requires reranker_url".to_string())
            })?;
            Ok(Some(Arc::new(CrossEncoderReranker::new(url, timeout_secs)?)))
        }
    }
}

/// In-process reranker: how much of the query the chunk actually covers.
///
/// `term_score = 0.8 · coverage + 0.2 · bigram_ratio` (coverage alone for
/// one-term queries), blended evenly with the fused score.
#[derive(Debug, Clone)]
pub struct TermCoverageReranker {
    fused_weight: f32,
}

impl Default for TermCoverageReranker {
    fn default() -> Self {
        Self { fused_weight: 0.5 }
    }
}

impl TermCoverageReranker {
    fn term_score(query_terms: &[String], content: &str) -> f32 {
        let content_terms = tokenize(content);
        let vocabulary: HashSet<&str> = content_terms.iter().map(String::as_str).collect();

        let distinct: HashSet<&str> = query_terms.iter().map(String::as_str).collect();
        if distinct.is_empty() {
            return 0.0;
        }
        let covered = distinct.iter().filter(|t| vocabulary.contains(*t)).count();
        let coverage = covered as f32 / distinct.len() as f32;

        let query_bigrams: HashSet<(&str, &str)> = query_terms
            .windows(2)
            .map(|w| (w[0].as_str(), w[1].as_str()))
            .collect();
        if query_bigrams.is_empty() {
            return coverage;
        }
        let content_bigrams: HashSet<(&str, &str)> = content_terms
            .windows(2)
            .map(|w| (w[0].as_str(), w[1].as_str()))
            .collect();
        let matched = query_bigrams
            .iter()
            .filter(|b| content_bigrams.contains(*b))
            .count();
        let bigram_ratio = matched as f32 / query_bigrams.len() as f32;

        0.8 * coverage + 0.2 * bigram_ratio
    }
}

#[async_trait]
impl Reranker for TermCoverageReranker {
    fn name(&self) -> &'static str {
        "term"
    }

    async fn rerank(&self, query: &str, results: &[SearchResult]) -> Result<Vec<f32>, RerankError> {
        let query_terms = tokenize(query);
        Ok(results
            .iter()
            .map(|r| {
                let term = Self::term_score(&query_terms, &r.chunk.content);
                self.fused_weight * r.fused_score + (1.0 - self.fused_weight) * term
            })
            .collect())
    }
}

#[derive(Debug, Serialize)]
struct RerankRequest<'a> {
    query: &'a str,
    texts: Vec<&'a str>,
}

#[derive(Debug, Deserialize)]
struct RerankScore {
    index: usize,
    score: f32,
}

/// Remote cross-encoder behind a `/rerank` endpoint.
#[derive(Debug, Clone)]
pub struct CrossEncoderReranker {
    client: Client,
    base_url: String,
}

impl CrossEncoderReranker {
    pub fn new(url: &str, timeout_secs: u64) -> Result<Self, RerankError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .build()?;
        Ok(Self {
            client,
            base_url: url.trim_end_matches('/').to_string(),
        })
    }
}

#[async_trait]
impl Reranker for CrossEncoderReranker {
    fn name(&self) -> &'static str {
        "cross_encoder"
    }

    async fn rerank(&self, query: &str, results: &[SearchResult]) -> Result<Vec<f32>, RerankError> {
        if results.is_empty() {
            return Ok(Vec::new());
        }

        let request = RerankRequest {
            query,
            texts: results.iter().map(|r| r.chunk.content.as_str()).collect(),
        };
        let response = self
            .client
            .post(format!("{}/rerank", self.base_url))
            .json(&request)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(RerankError::ServerError(format!("{status}: {body}")));
        }

        let scored: Vec<RerankScore> = response
            .json()
            .await
            .map_err(|e| RerankError::InvalidResponse(e.to_string()))?;

        let mut scores = vec![None; results.len()];
        for RerankScore { index, score } in scored {
            let slot = scores.get_mut(index).ok_or_else(|| {
                RerankError::InvalidResponse(format!("index {index} out of range"))
            })?;
            *slot = Some(score);
        }
        scores
            .into_iter()
            .enumerate()
            .map(|(i, s)| {
                s.ok_or_else(|| RerankError::InvalidResponse(format!("no score for text {i}")))
            })
            .collect()
    }
}
