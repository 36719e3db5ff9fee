//! Document chunking under lexical, semantic and hybrid strategies.
//!
//! Every strategy tiles the document: chunks cover the text with no gaps and
//! in order. Only lexical windows overlap.

mod hybrid;
mod lexical;
mod segment;
mod semantic;

use std::sync::Arc;

use tracing::{debug, warn};

use crate::error::ChunkError;
use crate::models::{Chunk, ChunkUnit, ChunkingConfig, ChunkingStrategy, Document};
use crate::services::embedding::EmbeddingProvider;
use crate::utils::text::TextIndex;

use segment::Span;
use semantic::CutRule;

const DEFAULT_EMBED_BATCH: usize = 32;
const WEIGHT_EPSILON: f32 = 1e-6;

/// Parameters for one chunking call.
#[derive(Debug, Clone, PartialEq)]
pub struct ChunkParams {
    pub unit: ChunkUnit,
    /// Window size in units (lexical); character cap per chunk (semantic, hybrid).
    pub chunk_size: usize,
    pub chunk_overlap: usize,
    pub similarity_threshold: f32,
    pub semantic_weight: f32,
    pub lexical_weight: f32,
    pub fusion_threshold: f32,
}

impl Default for ChunkParams {
    fn default() -> Self {
        Self::from(&ChunkingConfig::default())
    }
}

impl From<&ChunkingConfig> for ChunkParams {
    fn from(config: &ChunkingConfig) -> Self {
        Self {
            unit: config.unit,
            chunk_size: config.chunk_size,
            chunk_overlap: config.chunk_overlap,
            similarity_threshold: config.semantic_similarity_threshold,
            semantic_weight: config.hybrid_semantic_weight,
            lexical_weight: config.hybrid_lexical_weight,
            fusion_threshold: config.hybrid_fusion_threshold,
        }
    }
}

impl ChunkParams {
    pub fn validate(&self) -> Result<(), ChunkError> {
        if self.chunk_size == 0 {
            return Err(ChunkError::InvalidParams(
                "chunk_size must be positive".to_string(),
            ));
        }
        if self.chunk_overlap >= self.chunk_size {
            return Err(ChunkError::InvalidParams(format!(
                "chunk_overlap ({}) must be smaller than chunk_size ({})",
                self.chunk_overlap, self.chunk_size
            )));
        }
        if !(-1.0..=1.0).contains(&self.similarity_threshold) {
            return Err(ChunkError::InvalidParams(
                "similarity threshold must be within [-1, 1]".to_string(),
            ));
        }
        if self.semantic_weight < 0.0
            || self.lexical_weight < 0.0
            || ((self.semantic_weight + self.lexical_weight) - 1.0).abs() > WEIGHT_EPSILON
        {
            return Err(ChunkError::InvalidParams(format!(
                "hybrid weights ({}, {}) must be non-negative and sum to 1",
                self.semantic_weight, self.lexical_weight
            )));
        }
        if !(0.0..=1.0).contains(&self.fusion_threshold) {
            return Err(ChunkError::InvalidParams(
                "fusion threshold must be within [0, 1]".to_string(),
            ));
        }
        Ok(())
    }
}

/// Splits documents into chunks.
///
/// Semantic and hybrid chunking need an embedding provider; without one, or
/// when the provider fails, the undivided text is split lexically.
#[derive(Clone)]
pub struct Chunker {
    provider: Option<Arc<dyn EmbeddingProvider>>,
    embed_batch_size: usize,
}

impl Chunker {
    pub fn new(provider: Option<Arc<dyn EmbeddingProvider>>) -> Self {
        Self {
            provider,
            embed_batch_size: DEFAULT_EMBED_BATCH,
        }
    }

    /// A chunker that can only split lexically.
    pub fn lexical_only() -> Self {
        Self::new(None)
    }

    #[must_use]
    pub fn with_embed_batch_size(mut self, size: usize) -> Self {
        self.embed_batch_size = size.max(1);
        self
    }

    pub async fn chunk(
        &self,
        document: &Document,
        strategy: ChunkingStrategy,
        params: &ChunkParams,
    ) -> Result<Vec<Chunk>, ChunkError> {
        params.validate()?;

        let index = TextIndex::new(&document.text);
        let chars = index.chars();
        if chars.is_empty() {
            return Ok(Vec::new());
        }

        let spans = match strategy {
            ChunkingStrategy::Lexical => tag(
                lexical::spans(chars, 0, params.unit, params.chunk_size, params.chunk_overlap),
                ChunkingStrategy::Lexical,
            ),
            ChunkingStrategy::Semantic => {
                let rule = CutRule::Similarity {
                    threshold: params.similarity_threshold,
                };
                self.boundary_spans(chars, strategy, rule, params).await
            }
            ChunkingStrategy::Hybrid => {
                let rule = CutRule::Fused {
                    semantic_weight: params.semantic_weight,
                    lexical_weight: params.lexical_weight,
                    threshold: params.fusion_threshold,
                };
                self.boundary_spans(chars, strategy, rule, params).await
            }
        };

        debug!(
            document = %document.id,
            strategy = %strategy,
            chunks = spans.len(),
            "chunked document"
        );

        Ok(spans
            .into_iter()
            .enumerate()
            .map(|(i, (span, produced_by))| {
                Chunk::from_span(document, &index, i as u32, span.start, span.end, produced_by)
            })
            .collect())
    }

    async fn boundary_spans(
        &self,
        chars: &[char],
        strategy: ChunkingStrategy,
        rule: CutRule,
        params: &ChunkParams,
    ) -> Vec<(Span, ChunkingStrategy)> {
        let Some(provider) = self.provider.as_deref() else {
            warn!(strategy = %strategy, "no embedding provider, using lexical chunking");
            return tag(self.lexical_from(chars, 0, params), ChunkingStrategy::Lexical);
        };

        let sentences = segment::sentences(chars);
        let walk = semantic::walk(
            chars,
            &sentences,
            provider,
            rule,
            params.chunk_size,
            self.embed_batch_size,
        )
        .await;

        let mut spans = tag(walk.spans, strategy);
        if let Some(from) = walk.fallback_from {
            spans.extend(tag(
                self.lexical_from(chars, from, params),
                ChunkingStrategy::Lexical,
            ));
        }
        spans
    }

    fn lexical_from(&self, chars: &[char], from: usize, params: &ChunkParams) -> Vec<Span> {
        lexical::spans(chars, from, params.unit, params.chunk_size, params.chunk_overlap)
    }
}

fn tag(spans: Vec<Span>, strategy: ChunkingStrategy) -> Vec<(Span, ChunkingStrategy)> {
    spans.into_iter().map(|s| (s, strategy)).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::EmbeddingError;
    use crate::models::Source;
    use crate::services::embedding::HashEmbedder;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn create_test_document(text: &str) -> Document {
        Document::new(text, Source::text("/test/doc.md"))
    }

    /// Fails every call after the first `ok_calls`.
    struct FailingAfter {
        inner: HashEmbedder,
        ok_calls: usize,
        calls: AtomicUsize,
    }

    #[async_trait]
    impl EmbeddingProvider for FailingAfter {
        fn model_id(&self) -> &str {
            "failing"
        }

        fn dimension(&self) -> usize {
            self.inner.dimension()
        }

        async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingError> {
            if self.calls.fetch_add(1, Ordering::SeqCst) >= self.ok_calls {
                return Err(EmbeddingError::Timeout);
            }
            self.inner.embed_batch(texts).await
        }
    }

    fn assert_covers(chunks: &[Chunk], len: usize) {
        assert!(!chunks.is_empty());
        assert_eq!(chunks[0].char_start, 0);
        for pair in chunks.windows(2) {
            assert!(pair[1].char_start <= pair[0].char_end, "gap between chunks");
            assert!(pair[1].char_start > pair[0].char_start, "order not preserved");
        }
        assert_eq!(chunks.last().unwrap().char_end, len);
    }

    fn sample_text() -> String {
        let mut text = String::from("# Tokio\n\nTokio is an async runtime. It schedules tasks on worker threads.\n\n");
        text.push_str("# Bread\n\nSourdough needs a starter. Flour and water ferment for days.\n");
        text.push_str("Bake at high heat. Let the loaf cool before slicing.");
        text
    }

    #[tokio::test]
    async fn test_lexical_chunking_offsets() {
        let doc = create_test_document(&"a".repeat(2300));
        let params = ChunkParams {
            chunk_size: 1000,
            chunk_overlap: 100,
            ..Default::default()
        };
        let chunks = Chunker::lexical_only()
            .chunk(&doc, ChunkingStrategy::Lexical, &params)
            .await
            .unwrap();

        let starts: Vec<usize> = chunks.iter().map(|c| c.char_start).collect();
        assert_eq!(starts, vec![0, 900, 1800]);
        assert_eq!(chunks[2].content.len(), 500);
        assert_eq!(
            chunks.iter().map(|c| c.chunk_index).collect::<Vec<_>>(),
            vec![0, 1, 2]
        );
    }

    #[tokio::test]
    async fn test_every_strategy_covers_the_text() {
        let text = sample_text();
        let doc = create_test_document(&text);
        let len = text.chars().count();
        let chunker = Chunker::new(Some(Arc::new(HashEmbedder::with_dimension(128))));
        let params = ChunkParams {
            chunk_size: 80,
            chunk_overlap: 10,
            ..Default::default()
        };

        for strategy in [
            ChunkingStrategy::Lexical,
            ChunkingStrategy::Semantic,
            ChunkingStrategy::Hybrid,
        ] {
            let chunks = chunker.chunk(&doc, strategy, &params).await.unwrap();
            assert_covers(&chunks, len);
        }
    }

    #[tokio::test]
    async fn test_semantic_never_cuts_inside_a_sentence() {
        let text = sample_text();
        let doc = create_test_document(&text);
        let chars: Vec<char> = text.chars().collect();
        let sentence_ends: Vec<usize> = segment::sentences(&chars).iter().map(|s| s.end).collect();
        let chunker = Chunker::new(Some(Arc::new(HashEmbedder::with_dimension(128))));

        let chunks = chunker
            .chunk(&doc, ChunkingStrategy::Semantic, &ChunkParams::default())
            .await
            .unwrap();

        assert!(chunks.len() > 1);
        for chunk in &chunks {
            assert!(sentence_ends.contains(&chunk.char_end));
            assert_eq!(chunk.strategy, ChunkingStrategy::Semantic);
        }
        // Semantic chunks do not overlap.
        for pair in chunks.windows(2) {
            assert_eq!(pair[0].char_end, pair[1].char_start);
        }
    }

    #[tokio::test]
    async fn test_hybrid_cuts_at_paragraph_breaks() {
        let text = "Alpha beta gamma.\n\nAlpha beta gamma.";
        let doc = create_test_document(text);
        let chunker = Chunker::new(Some(Arc::new(HashEmbedder::with_dimension(64))));
        let params = ChunkParams {
            semantic_weight: 0.4,
            lexical_weight: 0.6,
            fusion_threshold: 0.5,
            ..Default::default()
        };

        let chunks = chunker
            .chunk(&doc, ChunkingStrategy::Hybrid, &params)
            .await
            .unwrap();
        assert_eq!(chunks.len(), 2);
        assert_eq!(chunks[0].content, "Alpha beta gamma.\n\n");
        assert_eq!(chunks[1].line_start, 3);
    }

    #[tokio::test]
    async fn test_provider_failure_falls_back_to_lexical_for_remainder() {
        let text = sample_text();
        let doc = create_test_document(&text);
        let len = text.chars().count();
        let provider = FailingAfter {
            inner: HashEmbedder::with_dimension(128),
            ok_calls: 1,
            calls: AtomicUsize::new(0),
        };
        let chunker = Chunker::new(Some(Arc::new(provider))).with_embed_batch_size(3);
        let params = ChunkParams {
            chunk_size: 60,
            chunk_overlap: 5,
            ..Default::default()
        };

        let chunks = chunker
            .chunk(&doc, ChunkingStrategy::Semantic, &params)
            .await
            .unwrap();

        assert_covers(&chunks, len);
        assert!(chunks.iter().any(|c| c.strategy == ChunkingStrategy::Lexical));
        assert_eq!(chunks.last().unwrap().strategy, ChunkingStrategy::Lexical);
    }

    #[tokio::test]
    async fn test_semantic_without_provider_is_lexical() {
        let doc = create_test_document("One sentence. Another sentence.");
        let chunks = Chunker::lexical_only()
            .chunk(&doc, ChunkingStrategy::Semantic, &ChunkParams::default())
            .await
            .unwrap();
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].strategy, ChunkingStrategy::Lexical);
    }

    #[tokio::test]
    async fn test_invalid_params_are_rejected() {
        let doc = create_test_document("text");
        let chunker = Chunker::lexical_only();

        let zero = ChunkParams {
            chunk_size: 0,
            ..Default::default()
        };
        assert!(chunker.chunk(&doc, ChunkingStrategy::Lexical, &zero).await.is_err());

        let overlap = ChunkParams {
            chunk_size: 10,
            chunk_overlap: 10,
            ..Default::default()
        };
        assert!(chunker.chunk(&doc, ChunkingStrategy::Lexical, &overlap).await.is_err());

        let weights = ChunkParams {
            semantic_weight: 0.7,
            lexical_weight: 0.7,
            ..Default::default()
        };
        assert!(chunker.chunk(&doc, ChunkingStrategy::Hybrid, &weights).await.is_err());
    }

    #[tokio::test]
    async fn test_empty_document_has_no_chunks() {
        let doc = create_test_document("");
        let chunks = Chunker::lexical_only()
            .chunk(&doc, ChunkingStrategy::Lexical, &ChunkParams::default())
            .await
            .unwrap();
        assert!(chunks.is_empty());
    }
}
