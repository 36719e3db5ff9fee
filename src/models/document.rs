use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use uuid::Uuid;

use super::config::ChunkingStrategy;
use crate::utils::text::TextIndex;

/// Where a document came from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Source {
    /// Origin path or URI.
    pub location: String,
    pub mime_type: String,
}

impl Source {
    pub fn new(location: impl Into<String>, mime_type: impl Into<String>) -> Self {
        Self {
            location: location.into(),
            mime_type: mime_type.into(),
        }
    }

    pub fn text(location: impl Into<String>) -> Self {
        Self::new(location, "text/plain")
    }
}

/// An immutable input unit.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Document {
    pub id: String,
    pub text: String,
    pub source: Source,
    pub checksum: String,
    pub created_at: String,
}

impl Document {
    /// Stable id derived from the source location, so re-ingesting a path replaces it.
    pub fn generate_id(source: &Source) -> String {
        let hash = Sha256::digest(source.location.as_bytes());
        hex::encode(&hash[..16])
    }

    pub fn new(text: impl Into<String>, source: Source) -> Self {
        let text = text.into();
        Self {
            id: Self::generate_id(&source),
            checksum: crate::utils::calculate_checksum(&text),
            text,
            source,
            created_at: chrono::Utc::now().to_rfc3339(),
        }
    }

    /// Embedding cache key: changes when either the text or the model changes.
    pub fn fingerprint(&self, model_id: &str) -> String {
        let mut hasher = Sha256::new();
        hasher.update(model_id.as_bytes());
        hasher.update([0u8]);
        hasher.update(self.text.as_bytes());
        hex::encode(hasher.finalize())
    }
}

/// A contiguous span of a document's text.
///
/// Offsets are in characters, `char_start..char_end`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Chunk {
    pub id: String,
    pub document_id: String,
    pub chunk_index: u32,
    pub content: String,
    pub char_start: usize,
    pub char_end: usize,
    pub line_start: u32,
    pub line_end: u32,
    pub strategy: ChunkingStrategy,
    #[serde(default)]
    pub fingerprint: String,
    pub source: Source,
}

impl Chunk {
    pub fn generate_id(document_id: &str, chunk_index: u32) -> String {
        let name = format!("{document_id}:{chunk_index}");
        Uuid::new_v5(&Uuid::NAMESPACE_OID, name.as_bytes()).to_string()
    }

    /// Build the chunk covering characters `char_start..char_end` of `document`.
    pub fn from_span(
        document: &Document,
        index: &TextIndex<'_>,
        chunk_index: u32,
        char_start: usize,
        char_end: usize,
        strategy: ChunkingStrategy,
    ) -> Self {
        Self {
            id: Self::generate_id(&document.id, chunk_index),
            document_id: document.id.clone(),
            chunk_index,
            content: index.slice(char_start, char_end).to_string(),
            char_start,
            char_end,
            line_start: index.line_of(char_start),
            line_end: index.line_of(char_end.saturating_sub(1).max(char_start)),
            strategy,
            fingerprint: String::new(),
            source: document.source.clone(),
        }
    }

    pub fn char_len(&self) -> usize {
        self.char_end - self.char_start
    }

    /// `path:start-end` in 1-based lines.
    pub fn location(&self) -> String {
        format!(
            "{}:{}-{}",
            self.source.location, self.line_start, self.line_end
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_document_generate_id() {
        let source = Source::text("/path/to/notes.md");
        let id = Document::generate_id(&source);
        assert_eq!(id.len(), 32);
        assert_eq!(id, Document::generate_id(&Source::new("/path/to/notes.md", "text/markdown")));
    }

    #[test]
    fn test_chunk_generate_id() {
        let id = Chunk::generate_id("abc123", 5);
        assert_eq!(id.len(), 36);
        assert_eq!(id, Chunk::generate_id("abc123", 5));
        assert_ne!(id, Chunk::generate_id("abc123", 6));
    }

    #[test]
    fn test_fingerprint_tracks_text_and_model() {
        let doc = Document::new("alpha", Source::text("a.txt"));
        let same = Document::new("alpha", Source::text("b.txt"));
        let edited = Document::new("alpha!", Source::text("a.txt"));

        assert_eq!(doc.fingerprint("m1"), same.fingerprint("m1"));
        assert_ne!(doc.fingerprint("m1"), doc.fingerprint("m2"));
        assert_ne!(doc.fingerprint("m1"), edited.fingerprint("m1"));
    }

    #[test]
    fn test_chunk_from_span_lines_and_unicode() {
        let doc = Document::new("héllo\nwörld\nagain", Source::text("u.txt"));
        let index = TextIndex::new(&doc.text);
        let chunk = Chunk::from_span(&doc, &index, 1, 6, 12, ChunkingStrategy::Lexical);
        assert_eq!(chunk.content, "wörld\n");
        assert_eq!(chunk.line_start, 2);
        assert_eq!(chunk.line_end, 2);
        assert_eq!(chunk.char_len(), 6);
        assert_eq!(chunk.id, Chunk::generate_id(&doc.id, 1));
    }
}
