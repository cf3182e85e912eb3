//! Storage abstraction for legislation chunks.
//!
//! The [`Store`] trait defines every storage operation the ingestion and
//! retrieval paths need, so backends are pluggable (SQLite in the app
//! crate, [`memory::InMemoryStore`] for tests).
//!
//! # Eligibility
//!
//! Both search legs only ever return *eligible* chunks: every child chunk,
//! plus parent chunks that have no children (small documents). Parents of
//! split documents exist only for context expansion.

pub mod memory;

use anyhow::Result;
use async_trait::async_trait;

use crate::models::{Chunk, ChunkRole, Document, Jurisdiction};

/// A candidate chunk returned from keyword or vector search.
///
/// Carries the document metadata needed to build a citation without an
/// extra round-trip.
#[derive(Debug, Clone)]
pub struct ChunkCandidate {
    pub chunk_id: String,
    pub document_id: String,
    pub parent_id: Option<String>,
    pub role: ChunkRole,
    pub content: String,
    pub citation: String,
    pub jurisdiction: Jurisdiction,
    pub source_url: Option<String>,
    /// Cosine similarity (vector leg) or full-text relevance (keyword leg).
    /// Higher is better in both cases.
    pub raw_score: f64,
    /// Monotonic creation sequence; breaks fusion ties.
    pub seq: i64,
}

/// An embedding ready to attach to a stored chunk.
#[derive(Debug, Clone)]
pub struct ChunkEmbedding {
    pub chunk_id: String,
    pub vector: Vec<f32>,
    pub model: String,
    /// Hash of the chunk text the vector was computed from.
    pub content_hash: String,
}

/// Abstract storage backend.
///
/// | Method | Purpose |
/// |--------|---------|
/// | [`replace_document`](Store::replace_document) | Upsert a document, dropping its old chunks |
/// | [`insert_chunks`](Store::insert_chunks) | Atomically insert a batch of chunks |
/// | [`attach_embeddings`](Store::attach_embeddings) | Atomically store a batch of vectors |
/// | [`pending_embeddings`](Store::pending_embeddings) | Eligible chunks with missing or stale vectors |
/// | [`vector_search`](Store::vector_search) | Nearest eligible chunks by cosine similarity |
/// | [`keyword_search`](Store::keyword_search) | Full-text search over eligible chunks |
#[async_trait]
pub trait Store: Send + Sync {
    /// Insert or replace a document. Any chunks and embeddings from a
    /// previous ingestion of the same id are removed.
    async fn replace_document(&self, doc: &Document) -> Result<()>;

    /// Insert a batch of chunks in one transaction. Parents must be
    /// inserted before any child that references them.
    async fn insert_chunks(&self, chunks: &[Chunk]) -> Result<()>;

    /// Store a batch of embeddings in one transaction.
    async fn attach_embeddings(&self, embeddings: &[ChunkEmbedding]) -> Result<()>;

    /// Eligible chunks whose embedding is missing or was computed from
    /// different text, in creation order.
    async fn pending_embeddings(&self, limit: Option<usize>) -> Result<Vec<Chunk>>;

    async fn get_document(&self, id: &str) -> Result<Option<Document>>;

    async fn get_chunk(&self, id: &str) -> Result<Option<Chunk>>;

    /// Up to `limit` eligible chunks ordered by similarity, best first.
    async fn vector_search(
        &self,
        query_vec: &[f32],
        limit: usize,
        jurisdiction: Option<Jurisdiction>,
    ) -> Result<Vec<ChunkCandidate>>;

    /// Up to `limit` eligible chunks ordered by relevance, best first.
    ///
    /// All query terms must match. When that yields nothing, any-term
    /// matching is used instead.
    async fn keyword_search(
        &self,
        query: &str,
        limit: usize,
        jurisdiction: Option<Jurisdiction>,
    ) -> Result<Vec<ChunkCandidate>>;
}

const STOPWORDS: &[&str] = &[
    "a", "an", "and", "are", "as", "at", "be", "by", "can", "do", "does", "for", "from", "how",
    "i", "if", "in", "is", "it", "me", "my", "of", "on", "or", "the", "to", "what", "when",
    "which", "who", "with",
];

/// Lowercased alphanumeric query terms with common stopwords removed.
///
/// Falls back to the unfiltered terms if every word is a stopword.
pub fn keyword_terms(query: &str) -> Vec<String> {
    let all: Vec<String> = query
        .split(|c: char| !c.is_alphanumeric())
        .filter(|w| !w.is_empty())
        .map(|w| w.to_lowercase())
        .collect();
    let filtered: Vec<String> = all
        .iter()
        .filter(|w| !STOPWORDS.contains(&w.as_str()))
        .cloned()
        .collect();
    if filtered.is_empty() {
        all
    } else {
        filtered
    }
}

/// Build an FTS5 `MATCH` expression. Terms are quoted so user input never
/// reaches the FTS query syntax.
pub fn fts_match_expr(terms: &[String], any: bool) -> String {
    let quoted: Vec<String> = terms.iter().map(|t| format!("\"{}\"", t)).collect();
    quoted.join(if any { " OR " } else { " " })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_keyword_terms_strip_stopwords() {
        assert_eq!(
            keyword_terms("What is the notice period for a rent increase?"),
            vec!["notice", "period", "rent", "increase"]
        );
    }

    #[test]
    fn test_keyword_terms_all_stopwords() {
        assert_eq!(keyword_terms("what is it"), vec!["what", "is", "it"]);
        assert!(keyword_terms("  ?! ").is_empty());
    }

    #[test]
    fn test_fts_expr() {
        let terms = vec!["rent".to_string(), "notice".to_string()];
        assert_eq!(fts_match_expr(&terms, false), "\"rent\" \"notice\"");
        assert_eq!(fts_match_expr(&terms, true), "\"rent\" OR \"notice\"");
    }
}
