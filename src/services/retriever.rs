//! Hybrid retrieval: vector and BM25 candidates, min-max normalized, fused
//! by configured weights, optionally reranked.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use tracing::{debug, warn};

use crate::error::SearchError;
use crate::models::{RetrievalConfig, SearchResult, SearchResults, VectorHit};
use crate::services::embedding::EmbeddingProvider;
use crate::services::lexical_index::{LexicalHit, LexicalIndex};
use crate::services::rerank::Reranker;
use crate::services::vector_store::VectorStore;
use crate::utils::retry::{RetryConfig, with_retry};

const WEIGHT_TOLERANCE: f32 = 1e-6;

/// Per-call retrieval settings. Passed explicitly so concurrent queries with
/// different weights never interfere.
#[derive(Debug, Clone, PartialEq)]
pub struct RetrievalParams {
    pub vector_weight: f32,
    pub lexical_weight: f32,
    /// Maximum number of results returned.
    pub top_k: usize,
    /// Size of the final (reranked) list.
    pub top_k_rerank: usize,
    pub relevance_threshold: Option<f32>,
}

impl Default for RetrievalParams {
    fn default() -> Self {
        Self::from(&RetrievalConfig::default())
    }
}

impl From<&RetrievalConfig> for RetrievalParams {
    fn from(config: &RetrievalConfig) -> Self {
        Self {
            vector_weight: config.vector_weight,
            lexical_weight: config.lexical_weight,
            top_k: config.top_k,
            top_k_rerank: config.top_k_rerank,
            relevance_threshold: config.relevance_threshold,
        }
    }
}

impl RetrievalParams {
    pub fn with_top_k(mut self, top_k: usize) -> Self {
        self.top_k = top_k;
        self
    }

    pub fn with_top_k_rerank(mut self, top_k_rerank: usize) -> Self {
        self.top_k_rerank = top_k_rerank;
        self
    }

    pub fn with_relevance_threshold(mut self, threshold: Option<f32>) -> Self {
        self.relevance_threshold = threshold;
        self
    }

    pub fn validate(&self) -> Result<(), SearchError> {
        if self.vector_weight < 0.0 || self.lexical_weight < 0.0 {
            return Err(SearchError::InvalidParams("weights must be non-negative".to_string()));
        }
        if (self.vector_weight + self.lexical_weight - 1.0).abs() > WEIGHT_TOLERANCE {
            return Err(SearchError::InvalidParams(format!(
                "vector_weight + lexical_weight must be 1 (got {} + {})",
                self.vector_weight, self.lexical_weight
            )));
        }
        if self.top_k == 0 || self.top_k_rerank == 0 {
            return Err(SearchError::InvalidParams(
                "top_k and top_k_rerank must be greater than 0".to_string(),
            ));
        }
        if let Some(t) = self.relevance_threshold
            && !(0.0..=1.0).contains(&t)
        {
            return Err(SearchError::InvalidParams(format!(
                "relevance_threshold must be in [0, 1] (got {t})"
            )));
        }
        Ok(())
    }

    /// Length of the final list.
    pub fn limit(&self) -> usize {
        self.top_k.min(self.top_k_rerank)
    }
}

/// Min-max normalize to [0, 1]. A flat distribution maps to 1.0.
pub fn normalize(scores: &[f32]) -> Vec<f32> {
    let Some(min) = scores.iter().copied().reduce(f32::min) else {
        return Vec::new();
    };
    let max = scores.iter().copied().fold(min, f32::max);
    let range = max - min;
    if range <= f32::EPSILON {
        return vec![1.0; scores.len()];
    }
    scores.iter().map(|s| (s - min) / range).collect()
}

/// Weighted sum of normalized scores; a missing side contributes 0.
pub fn fused_score(vector_weight: f32, vector_norm: f32, lexical_weight: f32, lexical_norm: f32) -> f32 {
    vector_weight * vector_norm + lexical_weight * lexical_norm
}

/// Merge both candidate sets into one list sorted by fused score, then vector
/// similarity, then chunk sequence index. Ranks are not assigned here.
pub fn fuse(
    vector_hits: Vec<VectorHit>,
    lexical_hits: Vec<LexicalHit>,
    vector_weight: f32,
    lexical_weight: f32,
) -> Vec<SearchResult> {
    let vector_norms = normalize(&vector_hits.iter().map(|h| h.similarity).collect::<Vec<_>>());
    let lexical_norms = normalize(&lexical_hits.iter().map(|h| h.score).collect::<Vec<_>>());

    let mut by_id: HashMap<String, SearchResult> = HashMap::new();
    let mut order: Vec<String> = Vec::new();

    for (hit, norm) in vector_hits.into_iter().zip(vector_norms) {
        order.push(hit.chunk.id.clone());
        by_id.insert(
            hit.chunk.id.clone(),
            SearchResult {
                chunk: hit.chunk,
                vector_score: Some(hit.similarity),
                lexical_score: None,
                vector_norm: norm,
                lexical_norm: 0.0,
                fused_score: 0.0,
                rerank_score: None,
                rank: 0,
            },
        );
    }

    for (hit, norm) in lexical_hits.into_iter().zip(lexical_norms) {
        match by_id.get_mut(&hit.chunk.id) {
            Some(existing) => {
                existing.lexical_score = Some(hit.score);
                existing.lexical_norm = norm;
            }
            None => {
                order.push(hit.chunk.id.clone());
                by_id.insert(
                    hit.chunk.id.clone(),
                    SearchResult {
                        chunk: hit.chunk,
                        vector_score: None,
                        lexical_score: Some(hit.score),
                        vector_norm: 0.0,
                        lexical_norm: norm,
                        fused_score: 0.0,
                        rerank_score: None,
                        rank: 0,
                    },
                );
            }
        }
    }

    let mut results: Vec<SearchResult> = order
        .into_iter()
        .filter_map(|id| by_id.remove(&id))
        .map(|mut r| {
            r.fused_score = fused_score(vector_weight, r.vector_norm, lexical_weight, r.lexical_norm);
            r
        })
        .collect();

    results.sort_by(|a, b| {
        b.fused_score
            .total_cmp(&a.fused_score)
            .then_with(|| {
                let av = a.vector_score.unwrap_or(f32::NEG_INFINITY);
                let bv = b.vector_score.unwrap_or(f32::NEG_INFINITY);
                bv.total_cmp(&av)
            })
            .then_with(|| a.chunk.chunk_index.cmp(&b.chunk.chunk_index))
            .then_with(|| a.chunk.id.cmp(&b.chunk.id))
    });
    results
}

/// Hybrid retriever over one vector store and the shared lexical index.
#[derive(Clone)]
pub struct HybridRetriever {
    provider: Arc<dyn EmbeddingProvider>,
    store: Arc<dyn VectorStore>,
    lexical: Arc<LexicalIndex>,
    reranker: Option<Arc<dyn Reranker>>,
    retry: RetryConfig,
}

impl HybridRetriever {
    pub fn new(
        provider: Arc<dyn EmbeddingProvider>,
        store: Arc<dyn VectorStore>,
        lexical: Arc<LexicalIndex>,
    ) -> Self {
        Self {
            provider,
            store,
            lexical,
            reranker: None,
            retry: RetryConfig::default(),
        }
    }

    pub fn with_reranker(mut self, reranker: Option<Arc<dyn Reranker>>) -> Self {
        self.reranker = reranker;
        self
    }

    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    /// Ranked results for `query` in `collection`.
    ///
    /// A failed query embedding degrades the pass to lexical-only; an
    /// unreachable vector store (after retries) is an error.
    pub async fn search(
        &self,
        collection: &str,
        query: &str,
        params: &RetrievalParams,
    ) -> Result<SearchResults, SearchError> {
        let start = Instant::now();
        let query = query.trim();
        if query.is_empty() {
            return Err(SearchError::InvalidQuery("query must not be empty".to_string()));
        }
        params.validate()?;

        let pool = params.top_k.max(params.top_k_rerank);
        let mut degraded = false;

        let vector_hits = match self.provider.embed(query).await {
            Ok(embedding) => {
                with_retry(&self.retry, || self.store.query(collection, &embedding, pool))
                    .await
                    .into_result()?
            }
            Err(e) => {
                warn!(error = %e, collection, "query embedding failed, running lexical-only pass");
                degraded = true;
                Vec::new()
            }
        };
        let lexical_hits = self.lexical.search(collection, query, pool);
        debug!(
            collection,
            vector = vector_hits.len(),
            lexical = lexical_hits.len(),
            "retrieved candidates"
        );

        let mut results = fuse(vector_hits, lexical_hits, params.vector_weight, params.lexical_weight);

        if let Some(threshold) = params.relevance_threshold {
            results.retain(|r| r.fused_score >= threshold);
        }
        results.truncate(params.limit());

        if let Some(reranker) = &self.reranker {
            self.apply_rerank(reranker.as_ref(), query, &mut results).await;
        }

        for (i, r) in results.iter_mut().enumerate() {
            r.rank = i + 1;
        }

        Ok(SearchResults {
            query: query.to_string(),
            collection: collection.to_string(),
            results,
            degraded,
            duration_ms: start.elapsed().as_millis() as u64,
        })
    }

    async fn apply_rerank(&self, reranker: &dyn Reranker, query: &str, results: &mut [SearchResult]) {
        if results.is_empty() {
            return;
        }
        match reranker.rerank(query, results).await {
            Ok(scores) if scores.len() == results.len() => {
                for (r, s) in results.iter_mut().zip(scores) {
                    r.rerank_score = Some(s);
                }
                // Stable: equal rerank scores keep fused order.
                results.sort_by(|a, b| b.score().total_cmp(&a.score()));
            }
            Ok(scores) => {
                warn!(
                    reranker = reranker.name(),
                    expected = results.len(),
                    got = scores.len(),
                    "reranker returned wrong number of scores, keeping fused order"
                );
            }
            Err(e) => {
                warn!(reranker = reranker.name(), error = %e, "rerank failed, keeping fused order");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Chunk, ChunkingStrategy, Document, Source};
    use crate::services::embedding::HashEmbedder;
    use crate::services::rerank::TermCoverageReranker;
    use crate::services::vector_store::MemoryStore;
    use crate::utils::text::TextIndex;

    fn chunk(location: &str, index: u32, text: &str) -> Chunk {
        let doc = Document::new(text, Source::text(location));
        let ti = TextIndex::new(&doc.text);
        Chunk::from_span(&doc, &ti, index, 0, ti.char_len(), ChunkingStrategy::Lexical)
    }

    fn vhit(c: &Chunk, similarity: f32) -> VectorHit {
        VectorHit {
            chunk: c.clone(),
            similarity,
        }
    }

    fn lhit(c: &Chunk, score: f32) -> LexicalHit {
        LexicalHit {
            chunk: c.clone(),
            score,
        }
    }

    #[test]
    fn test_normalize() {
        assert_eq!(normalize(&[]), Vec::<f32>::new());
        assert_eq!(normalize(&[0.3]), vec![1.0]);
        assert_eq!(normalize(&[2.0, 2.0]), vec![1.0, 1.0]);
        let n = normalize(&[1.0, 3.0, 2.0]);
        assert_eq!(n, vec![0.0, 1.0, 0.5]);
    }

    #[test]
    fn test_fuse_missing_side_counts_zero() {
        let a = chunk("a", 0, "a");
        let b = chunk("b", 0, "b");
        let c = chunk("c", 0, "c");
        let results = fuse(
            vec![vhit(&a, 0.9), vhit(&b, 0.1)],
            vec![lhit(&b, 4.0), lhit(&c, 2.0)],
            0.5,
            0.5,
        );
        let scores: HashMap<&str, f32> = results
            .iter()
            .map(|r| (r.chunk.source.location.as_str(), r.fused_score))
            .collect();
        assert!((scores["a"] - 0.5).abs() < 1e-6);
        assert!((scores["b"] - 0.5).abs() < 1e-6);
        assert!(scores["c"].abs() < 1e-6);
        // a and b tie on fused score; a has the higher vector similarity.
        assert_eq!(results[0].chunk.source.location, "a");
        assert_eq!(results[1].chunk.source.location, "b");
    }

    #[test]
    fn test_tie_breaks_on_chunk_index() {
        let first = chunk("doc", 0, "x");
        let second = chunk("doc", 1, "x");
        let results = fuse(vec![vhit(&second, 0.5), vhit(&first, 0.5)], Vec::new(), 1.0, 0.0);
        assert_eq!(results[0].chunk.chunk_index, 0);
        assert_eq!(results[1].chunk.chunk_index, 1);
    }

    #[test]
    fn test_fused_score_monotone_in_weights() {
        let (vn, ln) = (0.7, 0.4);
        let mut previous = f32::NEG_INFINITY;
        for step in 0..=10 {
            let w = step as f32 / 10.0;
            let s = fused_score(w, vn, 0.3, ln);
            assert!(s >= previous);
            previous = s;
        }
        let mut previous = f32::NEG_INFINITY;
        for step in 0..=10 {
            let w = step as f32 / 10.0;
            let s = fused_score(0.3, vn, w, ln);
            assert!(s >= previous);
            previous = s;
        }
    }

    #[test]
    fn test_params_validation() {
        assert!(RetrievalParams::default().validate().is_ok());
        let bad = RetrievalParams {
            vector_weight: 0.7,
            ..RetrievalParams::default()
        };
        assert!(matches!(bad.validate(), Err(SearchError::InvalidParams(_))));
        assert!(RetrievalParams::default().with_top_k(0).validate().is_err());
        assert!(
            RetrievalParams::default()
                .with_relevance_threshold(Some(1.5))
                .validate()
                .is_err()
        );
    }

    async fn populated() -> (HybridRetriever, Vec<Chunk>) {
        let provider = Arc::new(HashEmbedder::with_dimension(128));
        let store = Arc::new(MemoryStore::default());
        let lexical = Arc::new(LexicalIndex::new());
        store.create_collection("docs", 128).await.unwrap();

        let texts = [
            "tokio is an asynchronous runtime for rust",
            "the borrow checker enforces ownership rules",
            "sourdough bread needs a healthy starter",
            "async tasks are scheduled by the tokio runtime",
        ];
        let mut chunks = Vec::new();
        for (i, text) in texts.iter().enumerate() {
            let c = chunk(&format!("doc{i}"), 0, text);
            let embedding = provider.embed(text).await.unwrap();
            store.upsert("docs", &c, &embedding).await.unwrap();
            lexical.add("docs", &c);
            chunks.push(c);
        }
        (HybridRetriever::new(provider, store, lexical), chunks)
    }

    #[tokio::test]
    async fn test_search_respects_k_and_collection() {
        let (retriever, chunks) = populated().await;
        let params = RetrievalParams::default().with_top_k(2).with_top_k_rerank(5);
        let results = retriever.search("docs", "tokio runtime", &params).await.unwrap();

        assert!(results.len() <= 2);
        assert!(!results.degraded);
        let ids: Vec<&str> = chunks.iter().map(|c| c.id.as_str()).collect();
        assert!(results.results.iter().all(|r| ids.contains(&r.chunk.id.as_str())));
        assert_eq!(results.results[0].rank, 1);
        assert!(results.results[0].chunk.content.contains("tokio"));

        let other = retriever.search("other", "tokio runtime", &params).await.unwrap();
        assert!(other.is_empty());
    }

    #[tokio::test]
    async fn test_relevance_threshold_and_rerank() {
        let (retriever, _) = populated().await;
        let retriever = retriever.with_reranker(Some(Arc::new(TermCoverageReranker::default())));
        let params = RetrievalParams::default().with_relevance_threshold(Some(0.4));
        let results = retriever.search("docs", "tokio runtime", &params).await.unwrap();

        assert!(results.results.iter().all(|r| r.fused_score >= 0.4));
        assert!(results.results.iter().all(|r| r.rerank_score.is_some()));
        let scores: Vec<f32> = results.results.iter().map(SearchResult::score).collect();
        assert!(scores.windows(2).all(|w| w[0] >= w[1]));
    }

    #[tokio::test]
    async fn test_empty_query_rejected() {
        let (retriever, _) = populated().await;
        let err = retriever
            .search("docs", "   ", &RetrievalParams::default())
            .await
            .unwrap_err();
        assert!(matches!(err, SearchError::InvalidQuery(_)));
    }
}
