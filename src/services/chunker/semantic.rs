//! Sentence-boundary walk shared by the semantic and hybrid strategies.

use tracing::warn;

use super::hybrid;
use super::segment::{Span, structural_strength};
use crate::services::embedding::{EmbeddingProvider, cosine_similarity};

/// When to cut between two consecutive sentences.
#[derive(Debug, Clone, Copy)]
pub enum CutRule {
    /// Cut when similarity drops below the threshold.
    Similarity { threshold: f32 },
    /// Cut when the weighted semantic/structural strength exceeds the threshold.
    Fused {
        semantic_weight: f32,
        lexical_weight: f32,
        threshold: f32,
    },
}

impl CutRule {
    fn cuts(&self, similarity: f32, structural: f32) -> bool {
        match *self {
            CutRule::Similarity { threshold } => similarity < threshold,
            CutRule::Fused {
                semantic_weight,
                lexical_weight,
                threshold,
            } => {
                hybrid::boundary_strength(similarity, structural, semantic_weight, lexical_weight)
                    > threshold
            }
        }
    }
}

/// Result of a boundary walk.
#[derive(Debug, Default)]
pub struct Walk {
    /// Chunks decided from embeddings, in order.
    pub spans: Vec<Span>,
    /// Set when embedding failed: the undivided remainder starts here.
    pub fallback_from: Option<usize>,
}

/// Group sentences into chunks.
///
/// A chunk also closes before a sentence that would push it past
/// `max_chars`; a single longer sentence is kept whole.
pub async fn walk(
    chars: &[char],
    sentences: &[Span],
    provider: &dyn EmbeddingProvider,
    rule: CutRule,
    max_chars: usize,
    batch_size: usize,
) -> Walk {
    let mut walk = Walk::default();
    let Some(last) = sentences.last() else {
        return walk;
    };

    let mut embeddings: Vec<Vec<f32>> = Vec::with_capacity(sentences.len());
    let mut open = 0;
    let mut open_len = sentences[0].len();

    for k in 0..sentences.len() - 1 {
        let next = k + 1;

        while embeddings.len() <= next {
            let from = embeddings.len();
            let to = (from + batch_size.max(1)).min(sentences.len());
            let texts: Vec<String> = sentences[from..to]
                .iter()
                .map(|s| chars[s.start..s.end].iter().collect::<String>().trim().to_string())
                .collect();

            match provider.embed_batch(&texts).await {
                Ok(batch) if batch.len() == texts.len() => embeddings.extend(batch),
                Ok(batch) => {
                    warn!(
                        expected = texts.len(),
                        got = batch.len(),
                        "embedding provider returned a short batch, splitting remainder lexically"
                    );
                    walk.fallback_from = Some(sentences[open].start);
                    return walk;
                }
                Err(e) => {
                    warn!(error = %e, "sentence embedding failed, splitting remainder lexically");
                    walk.fallback_from = Some(sentences[open].start);
                    return walk;
                }
            }
        }

        let similarity = cosine_similarity(&embeddings[k], &embeddings[next]);
        let over_size = open_len + sentences[next].len() > max_chars;
        let structural = structural_strength(chars, sentences[k]);

        if over_size || rule.cuts(similarity, structural) {
            walk.spans.push(Span::new(sentences[open].start, sentences[k].end));
            open = next;
            open_len = 0;
        }
        open_len += sentences[next].len();
    }

    walk.spans.push(Span::new(sentences[open].start, last.end));
    walk
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::chunker::segment::sentences;
    use crate::services::embedding::HashEmbedder;

    fn chars(s: &str) -> Vec<char> {
        s.chars().collect()
    }

    #[tokio::test]
    async fn test_identical_sentences_stay_together() {
        let c = chars("Rust is fast. Rust is fast. Rust is fast.");
        let sents = sentences(&c);
        let provider = HashEmbedder::with_dimension(64);
        let walk = walk(&c, &sents, &provider, CutRule::Similarity { threshold: 0.9 }, 1000, 2).await;
        assert_eq!(walk.spans, vec![Span::new(0, c.len())]);
        assert!(walk.fallback_from.is_none());
    }

    #[tokio::test]
    async fn test_unrelated_sentences_are_cut_at_sentence_ends() {
        let c = chars("Tokio schedules async tasks. Sourdough needs a starter.");
        let sents = sentences(&c);
        let provider = HashEmbedder::with_dimension(256);
        let walk = walk(&c, &sents, &provider, CutRule::Similarity { threshold: 0.5 }, 1000, 8).await;
        assert_eq!(walk.spans, sents);
    }

    #[tokio::test]
    async fn test_size_cap_closes_chunk() {
        let c = chars("Same words here. Same words here. Same words here.");
        let sents = sentences(&c);
        let provider = HashEmbedder::with_dimension(64);
        let walk = walk(&c, &sents, &provider, CutRule::Similarity { threshold: -1.0 }, 20, 8).await;
        assert_eq!(walk.spans.len(), 3);
    }
}
