//! In-memory [`Store`] implementation for tests.
//!
//! Uses `HashMap` and `Vec` behind `std::sync::RwLock`. Vector search is
//! brute-force cosine similarity; keyword search counts term occurrences.

use std::collections::{HashMap, HashSet};
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use anyhow::{anyhow, bail, Result};
use async_trait::async_trait;

use crate::embedding::cosine_similarity;
use crate::models::{Chunk, ChunkRole, Document, Jurisdiction};

use super::{keyword_terms, ChunkCandidate, ChunkEmbedding, Store};

struct StoredChunk {
    chunk: Chunk,
    seq: i64,
}

struct StoredVector {
    vector: Vec<f32>,
    content_hash: String,
}

#[derive(Default)]
struct Inner {
    docs: HashMap<String, Document>,
    chunks: Vec<StoredChunk>,
    vectors: HashMap<String, StoredVector>,
    next_seq: i64,
}

impl Inner {
    fn has_children(&self, parent_id: &str) -> bool {
        self.chunks
            .iter()
            .any(|sc| sc.chunk.parent_id.as_deref() == Some(parent_id))
    }

    fn eligible(&self) -> Vec<&StoredChunk> {
        let parents_with_children: HashSet<&str> = self
            .chunks
            .iter()
            .filter_map(|sc| sc.chunk.parent_id.as_deref())
            .collect();
        self.chunks
            .iter()
            .filter(|sc| {
                sc.chunk.role == ChunkRole::Child
                    || !parents_with_children.contains(sc.chunk.id.as_str())
            })
            .collect()
    }

    fn candidate(&self, sc: &StoredChunk, raw_score: f64) -> Option<ChunkCandidate> {
        let doc = self.docs.get(&sc.chunk.document_id)?;
        Some(ChunkCandidate {
            chunk_id: sc.chunk.id.clone(),
            document_id: doc.id.clone(),
            parent_id: sc.chunk.parent_id.clone(),
            role: sc.chunk.role,
            content: sc.chunk.text.clone(),
            citation: doc.citation.clone(),
            jurisdiction: doc.jurisdiction,
            source_url: doc.source_url.clone(),
            raw_score,
            seq: sc.seq,
        })
    }

    fn in_jurisdiction(&self, sc: &StoredChunk, jurisdiction: Option<Jurisdiction>) -> bool {
        match jurisdiction {
            None => true,
            Some(j) => self
                .docs
                .get(&sc.chunk.document_id)
                .map(|d| d.jurisdiction == j)
                .unwrap_or(false),
        }
    }
}

/// In-memory store for tests and small embedded corpora.
pub struct InMemoryStore {
    inner: RwLock<Inner>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(Inner::default()),
        }
    }

    fn read(&self) -> Result<RwLockReadGuard<'_, Inner>> {
        self.inner.read().map_err(|_| anyhow!("in-memory store lock poisoned"))
    }

    fn write(&self) -> Result<RwLockWriteGuard<'_, Inner>> {
        self.inner.write().map_err(|_| anyhow!("in-memory store lock poisoned"))
    }
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

fn sort_best_first(candidates: &mut [ChunkCandidate]) {
    candidates.sort_by(|a, b| {
        b.raw_score
            .partial_cmp(&a.raw_score)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then(a.seq.cmp(&b.seq))
    });
}

#[async_trait]
impl Store for InMemoryStore {
    async fn replace_document(&self, doc: &Document) -> Result<()> {
        let mut inner = self.write()?;
        let removed: HashSet<String> = inner
            .chunks
            .iter()
            .filter(|sc| sc.chunk.document_id == doc.id)
            .map(|sc| sc.chunk.id.clone())
            .collect();
        inner.chunks.retain(|sc| sc.chunk.document_id != doc.id);
        inner.vectors.retain(|id, _| !removed.contains(id));
        inner.docs.insert(doc.id.clone(), doc.clone());
        Ok(())
    }

    async fn insert_chunks(&self, chunks: &[Chunk]) -> Result<()> {
        let mut inner = self.write()?;
        // Validate the whole batch before touching state so it applies all-or-nothing.
        let batch_ids: HashSet<&str> = chunks.iter().map(|c| c.id.as_str()).collect();
        for c in chunks {
            if !inner.docs.contains_key(&c.document_id) {
                bail!("Chunk {} references unknown document {}", c.id, c.document_id);
            }
            if let Some(pid) = &c.parent_id {
                let known = inner.chunks.iter().any(|sc| &sc.chunk.id == pid);
                if !known && !batch_ids.contains(pid.as_str()) {
                    bail!("Chunk {} references unknown parent {}", c.id, pid);
                }
            }
        }
        for c in chunks {
            let seq = inner.next_seq;
            inner.next_seq += 1;
            inner.chunks.retain(|sc| sc.chunk.id != c.id);
            inner.chunks.push(StoredChunk {
                chunk: c.clone(),
                seq,
            });
        }
        Ok(())
    }

    async fn attach_embeddings(&self, embeddings: &[ChunkEmbedding]) -> Result<()> {
        let mut inner = self.write()?;
        for e in embeddings {
            if !inner.chunks.iter().any(|sc| sc.chunk.id == e.chunk_id) {
                bail!("Embedding references unknown chunk {}", e.chunk_id);
            }
        }
        for e in embeddings {
            inner.vectors.insert(
                e.chunk_id.clone(),
                StoredVector {
                    vector: e.vector.clone(),
                    content_hash: e.content_hash.clone(),
                },
            );
        }
        Ok(())
    }

    async fn pending_embeddings(&self, limit: Option<usize>) -> Result<Vec<Chunk>> {
        let inner = self.read()?;
        let pending = inner
            .eligible()
            .into_iter()
            .filter(|sc| match inner.vectors.get(&sc.chunk.id) {
                Some(v) => v.content_hash != sc.chunk.hash,
                None => true,
            })
            .map(|sc| sc.chunk.clone());
        Ok(match limit {
            Some(n) => pending.take(n).collect(),
            None => pending.collect(),
        })
    }

    async fn get_document(&self, id: &str) -> Result<Option<Document>> {
        Ok(self.read()?.docs.get(id).cloned())
    }

    async fn get_chunk(&self, id: &str) -> Result<Option<Chunk>> {
        Ok(self
            .read()?
            .chunks
            .iter()
            .find(|sc| sc.chunk.id == id)
            .map(|sc| sc.chunk.clone()))
    }

    async fn vector_search(
        &self,
        query_vec: &[f32],
        limit: usize,
        jurisdiction: Option<Jurisdiction>,
    ) -> Result<Vec<ChunkCandidate>> {
        let inner = self.read()?;
        let mut candidates: Vec<ChunkCandidate> = inner
            .eligible()
            .into_iter()
            .filter(|sc| inner.in_jurisdiction(sc, jurisdiction))
            .filter_map(|sc| {
                let stored = inner.vectors.get(&sc.chunk.id)?;
                let sim = cosine_similarity(query_vec, &stored.vector) as f64;
                inner.candidate(sc, sim)
            })
            .collect();
        sort_best_first(&mut candidates);
        candidates.truncate(limit);
        Ok(candidates)
    }

    async fn keyword_search(
        &self,
        query: &str,
        limit: usize,
        jurisdiction: Option<Jurisdiction>,
    ) -> Result<Vec<ChunkCandidate>> {
        let terms = keyword_terms(query);
        if terms.is_empty() {
            return Ok(Vec::new());
        }
        let inner = self.read()?;
        let eligible: Vec<&StoredChunk> = inner
            .eligible()
            .into_iter()
            .filter(|sc| inner.in_jurisdiction(sc, jurisdiction))
            .collect();

        let score = |sc: &StoredChunk, require_all: bool| -> Option<f64> {
            let text = sc.chunk.text.to_lowercase();
            let counts: Vec<usize> = terms.iter().map(|t| text.matches(t.as_str()).count()).collect();
            let matched = counts.iter().filter(|c| **c > 0).count();
            let ok = if require_all {
                matched == terms.len()
            } else {
                matched > 0
            };
            ok.then(|| counts.iter().sum::<usize>() as f64)
        };

        let mut candidates: Vec<ChunkCandidate> = eligible
            .iter()
            .filter_map(|sc| score(sc, true).and_then(|s| inner.candidate(sc, s)))
            .collect();
        if candidates.is_empty() {
            candidates = eligible
                .iter()
                .filter_map(|sc| score(sc, false).and_then(|s| inner.candidate(sc, s)))
                .collect();
        }
        sort_best_first(&mut candidates);
        candidates.truncate(limit);
        Ok(candidates)
    }
}

impl InMemoryStore {
    /// Whether a parent chunk has been split into children.
    pub fn parent_has_children(&self, parent_id: &str) -> Result<bool> {
        Ok(self.read()?.has_children(parent_id))
    }
}
