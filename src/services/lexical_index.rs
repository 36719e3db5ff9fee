//! Incremental BM25 index, one per collection.
//!
//! Term and document frequencies are updated on every add/remove, so scoring
//! always reflects the current collection without a rebuild. Scoring is pure
//! CPU work and never suspends, hence `parking_lot` locks.

use std::collections::{HashMap, HashSet};
use std::path::Path;
use std::sync::Arc;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::LexicalIndexError;
use crate::models::Chunk;
use crate::utils::tokenize;

const K1: f32 = 1.2;
const B: f32 = 0.75;

/// A chunk matched by keyword scoring.
#[derive(Debug, Clone)]
pub struct LexicalHit {
    pub chunk: Chunk,
    pub score: f32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct Posting {
    seq: u64,
    chunk: Chunk,
    term_freqs: HashMap<String, u32>,
    length: u32,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct CollectionIndex {
    postings: HashMap<String, Posting>,
    doc_freqs: HashMap<String, u32>,
    total_length: u64,
    next_seq: u64,
}

impl CollectionIndex {
    fn insert(&mut self, chunk: &Chunk) {
        let seq = match self.remove(&chunk.id) {
            Some(old) => old.seq,
            None => {
                self.next_seq += 1;
                self.next_seq
            }
        };

        let terms = tokenize(&chunk.content);
        let mut term_freqs: HashMap<String, u32> = HashMap::new();
        for term in &terms {
            *term_freqs.entry(term.clone()).or_insert(0) += 1;
        }
        for term in term_freqs.keys() {
            *self.doc_freqs.entry(term.clone()).or_insert(0) += 1;
        }
        self.total_length += terms.len() as u64;

        self.postings.insert(
            chunk.id.clone(),
            Posting {
                seq,
                chunk: chunk.clone(),
                term_freqs,
                length: terms.len() as u32,
            },
        );
    }

    fn remove(&mut self, chunk_id: &str) -> Option<Posting> {
        let posting = self.postings.remove(chunk_id)?;
        for term in posting.term_freqs.keys() {
            if let Some(df) = self.doc_freqs.get_mut(term) {
                *df -= 1;
                if *df == 0 {
                    self.doc_freqs.remove(term);
                }
            }
        }
        self.total_length -= u64::from(posting.length);
        Some(posting)
    }

    fn idf(&self, term: &str) -> f32 {
        let n = self.postings.len() as f32;
        let df = self.doc_freqs.get(term).copied().unwrap_or(0) as f32;
        (1.0 + (n - df + 0.5) / (df + 0.5)).ln()
    }

    fn avg_length(&self) -> f32 {
        if self.postings.is_empty() {
            return 0.0;
        }
        self.total_length as f32 / self.postings.len() as f32
    }

    fn score_posting(&self, terms: &[String], posting: &Posting) -> f32 {
        let avg = self.avg_length().max(1.0);
        let len = posting.length as f32;
        terms
            .iter()
            .filter_map(|term| {
                let tf = *posting.term_freqs.get(term)? as f32;
                let numerator = tf * (K1 + 1.0);
                let denominator = tf + K1 * (1.0 - B + B * (len / avg));
                Some(self.idf(term) * numerator / denominator)
            })
            .sum()
    }
}

fn unique_terms(query: &str) -> Vec<String> {
    let mut seen = HashSet::new();
    tokenize(query)
        .into_iter()
        .filter(|t| seen.insert(t.clone()))
        .collect()
}

/// Shared keyword index over all collections.
#[derive(Default)]
pub struct LexicalIndex {
    collections: RwLock<HashMap<String, Arc<RwLock<CollectionIndex>>>>,
}

impl LexicalIndex {
    pub fn new() -> Self {
        Self::default()
    }

    fn get(&self, collection: &str) -> Option<Arc<RwLock<CollectionIndex>>> {
        self.collections.read().get(collection).cloned()
    }

    fn get_or_create(&self, collection: &str) -> Arc<RwLock<CollectionIndex>> {
        if let Some(existing) = self.get(collection) {
            return existing;
        }
        self.collections
            .write()
            .entry(collection.to_string())
            .or_default()
            .clone()
    }

    /// Add or replace a chunk.
    pub fn add(&self, collection: &str, chunk: &Chunk) {
        self.get_or_create(collection).write().insert(chunk);
    }

    pub fn remove(&self, collection: &str, chunk_id: &str) -> bool {
        self.get(collection)
            .is_some_and(|index| index.write().remove(chunk_id).is_some())
    }

    /// Remove every chunk of a document; returns how many were removed.
    pub fn remove_document(&self, collection: &str, document_id: &str) -> usize {
        let Some(index) = self.get(collection) else {
            return 0;
        };
        let mut index = index.write();
        let ids: Vec<String> = index
            .postings
            .values()
            .filter(|p| p.chunk.document_id == document_id)
            .map(|p| p.chunk.id.clone())
            .collect();
        for id in &ids {
            index.remove(id);
        }
        ids.len()
    }

    pub fn drop_collection(&self, collection: &str) {
        self.collections.write().remove(collection);
    }

    pub fn len(&self, collection: &str) -> usize {
        self.get(collection).map_or(0, |index| index.read().postings.len())
    }

    pub fn is_empty(&self, collection: &str) -> bool {
        self.len(collection) == 0
    }

    /// BM25 score of one chunk; 0 when the chunk or collection is unknown.
    pub fn score(&self, collection: &str, query_terms: &[String], chunk_id: &str) -> f32 {
        let Some(index) = self.get(collection) else {
            return 0.0;
        };
        let index = index.read();
        index
            .postings
            .get(chunk_id)
            .map_or(0.0, |posting| index.score_posting(query_terms, posting))
    }

    /// Up to `k` chunks with a positive score, best first, ties by insertion.
    pub fn search(&self, collection: &str, query: &str, k: usize) -> Vec<LexicalHit> {
        let terms = unique_terms(query);
        if terms.is_empty() || k == 0 {
            return Vec::new();
        }
        let Some(index) = self.get(collection) else {
            return Vec::new();
        };
        let index = index.read();

        let mut scored: Vec<(f32, &Posting)> = index
            .postings
            .values()
            .map(|posting| (index.score_posting(&terms, posting), posting))
            .filter(|(score, _)| *score > 0.0)
            .collect();
        scored.sort_by(|a, b| b.0.total_cmp(&a.0).then_with(|| a.1.seq.cmp(&b.1.seq)));

        scored
            .into_iter()
            .take(k)
            .map(|(score, posting)| LexicalHit {
                chunk: posting.chunk.clone(),
                score,
            })
            .collect()
    }

    /// Write one collection to a JSON file.
    pub fn save_collection(&self, collection: &str, path: &Path) -> Result<(), LexicalIndexError> {
        let json = match self.get(collection) {
            Some(index) => serde_json::to_string(&*index.read())?,
            None => serde_json::to_string(&CollectionIndex::default())?,
        };
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, json)?;
        debug!(collection, path = %path.display(), "saved lexical index");
        Ok(())
    }

    /// Replace a collection with the contents of a JSON file. A missing file
    /// leaves the collection untouched.
    pub fn load_collection(&self, collection: &str, path: &Path) -> Result<(), LexicalIndexError> {
        if !path.exists() {
            return Ok(());
        }
        let content = std::fs::read_to_string(path)?;
        let index: CollectionIndex = serde_json::from_str(&content)?;
        debug!(collection, chunks = index.postings.len(), "loaded lexical index");
        self.collections
            .write()
            .insert(collection.to_string(), Arc::new(RwLock::new(index)));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{ChunkingStrategy, Document, Source};
    use crate::utils::text::TextIndex;

    fn chunk_of(location: &str, text: &str) -> Chunk {
        let doc = Document::new(text, Source::text(location));
        let index = TextIndex::new(&doc.text);
        Chunk::from_span(&doc, &index, 0, 0, index.char_len(), ChunkingStrategy::Lexical)
    }

    fn terms(q: &str) -> Vec<String> {
        tokenize(q)
    }

    #[test]
    fn test_rare_terms_outweigh_common_ones() {
        let index = LexicalIndex::new();
        let a = chunk_of("a", "rust tokio runtime");
        let b = chunk_of("b", "rust borrow checker");
        let c = chunk_of("c", "rust ownership");
        for chunk in [&a, &b, &c] {
            index.add("docs", chunk);
        }

        let common = index.score("docs", &terms("rust"), &a.id);
        let rare = index.score("docs", &terms("tokio"), &a.id);
        assert!(common > 0.0);
        assert!(rare > common);
        assert_eq!(index.score("docs", &terms("tokio"), &b.id), 0.0);
    }

    #[test]
    fn test_incremental_updates_match_fresh_index() {
        let incremental = LexicalIndex::new();
        let a = chunk_of("a", "vector search engine");
        let b = chunk_of("b", "lexical search index");
        let c = chunk_of("c", "cooking pasta");
        incremental.add("docs", &a);
        incremental.add("docs", &c);
        incremental.add("docs", &b);
        incremental.remove("docs", &c.id);

        let fresh = LexicalIndex::new();
        fresh.add("docs", &a);
        fresh.add("docs", &b);

        let q = terms("search index");
        for id in [&a.id, &b.id] {
            let x = incremental.score("docs", &q, id);
            let y = fresh.score("docs", &q, id);
            assert!((x - y).abs() < 1e-6);
        }
    }

    #[test]
    fn test_search_orders_and_limits() {
        let index = LexicalIndex::new();
        let a = chunk_of("a", "hybrid retrieval fuses scores");
        let b = chunk_of("b", "retrieval retrieval retrieval");
        let c = chunk_of("c", "nothing relevant here");
        for chunk in [&a, &b, &c] {
            index.add("docs", chunk);
        }

        let hits = index.search("docs", "retrieval", 5);
        assert_eq!(hits.len(), 2);
        assert_eq!(hits[0].chunk.id, b.id);
        assert!(hits.iter().all(|h| h.score > 0.0));
        assert_eq!(index.search("docs", "retrieval", 1).len(), 1);
        assert!(index.search("other", "retrieval", 5).is_empty());
        assert!(index.search("docs", "   ", 5).is_empty());
    }

    #[test]
    fn test_remove_document_empties_collection() {
        let index = LexicalIndex::new();
        let doc = Document::new("alpha beta\ngamma delta", Source::text("d.txt"));
        let text_index = TextIndex::new(&doc.text);
        let first = Chunk::from_span(&doc, &text_index, 0, 0, 11, ChunkingStrategy::Lexical);
        let second = Chunk::from_span(&doc, &text_index, 1, 11, 22, ChunkingStrategy::Lexical);
        index.add("docs", &first);
        index.add("docs", &second);

        assert_eq!(index.remove_document("docs", &doc.id), 2);
        assert!(index.is_empty("docs"));
        assert!(index.search("docs", "alpha", 5).is_empty());
    }

    #[test]
    fn test_save_and_load_collection() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("lexical").join("docs.json");
        let index = LexicalIndex::new();
        let a = chunk_of("a", "persisted keyword index");
        index.add("docs", &a);
        index.save_collection("docs", &path).unwrap();

        let restored = LexicalIndex::new();
        restored.load_collection("docs", &path).unwrap();
        assert_eq!(restored.len("docs"), 1);
        let q = terms("keyword");
        assert!((restored.score("docs", &q, &a.id) - index.score("docs", &q, &a.id)).abs() < 1e-6);

        restored
            .load_collection("docs", &dir.path().join("missing.json"))
            .unwrap();
        assert_eq!(restored.len("docs"), 1);
    }
}
