//! Shared fakes for unit tests.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;

use auslaw_core::chunk::{chunk_document, ChunkingParams};
use auslaw_core::models::{Chunk, Document, Jurisdiction};
use auslaw_core::rerank::Reranker;
use auslaw_core::search::SearchParams;
use auslaw_core::store::memory::InMemoryStore;
use auslaw_core::store::{ChunkCandidate, ChunkEmbedding, Store};

use crate::embedding::EmbeddingProvider;
use crate::retriever::HybridRetriever;

/// Bag-of-letters embedding: deterministic and good enough to rank.
pub struct LetterEmbedder;

#[async_trait]
impl EmbeddingProvider for LetterEmbedder {
    fn model_name(&self) -> &str {
        "letters"
    }
    fn dims(&self) -> usize {
        26
    }
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        Ok(texts
            .iter()
            .map(|t| {
                let mut v = vec![0.0f32; 26];
                for c in t.to_lowercase().chars().filter(|c| c.is_ascii_lowercase()) {
                    v[(c as u8 - b'a') as usize] += 1.0;
                }
                v
            })
            .collect())
    }
}

/// Store whose every call fails.
pub struct DownStore;

#[async_trait]
impl Store for DownStore {
    async fn replace_document(&self, _doc: &Document) -> Result<()> {
        anyhow::bail!("down")
    }
    async fn insert_chunks(&self, _chunks: &[Chunk]) -> Result<()> {
        anyhow::bail!("down")
    }
    async fn attach_embeddings(&self, _e: &[ChunkEmbedding]) -> Result<()> {
        anyhow::bail!("down")
    }
    async fn pending_embeddings(&self, _limit: Option<usize>) -> Result<Vec<Chunk>> {
        anyhow::bail!("down")
    }
    async fn get_document(&self, _id: &str) -> Result<Option<Document>> {
        anyhow::bail!("down")
    }
    async fn get_chunk(&self, _id: &str) -> Result<Option<Chunk>> {
        anyhow::bail!("down")
    }
    async fn vector_search(
        &self,
        _q: &[f32],
        _l: usize,
        _j: Option<Jurisdiction>,
    ) -> Result<Vec<ChunkCandidate>> {
        anyhow::bail!("down")
    }
    async fn keyword_search(
        &self,
        _q: &str,
        _l: usize,
        _j: Option<Jurisdiction>,
    ) -> Result<Vec<ChunkCandidate>> {
        anyhow::bail!("down")
    }
}

/// Three small documents, chunked and embedded with [`LetterEmbedder`].
pub async fn seeded_store() -> Arc<InMemoryStore> {
    store_with(&[
        (
            "rta",
            Jurisdiction::Nsw,
            "A landlord must give 60 days written notice of a rent increase.",
        ),
        (
            "bond",
            Jurisdiction::Nsw,
            "The bond must be lodged with the authority within 10 working days.",
        ),
        (
            "qld",
            Jurisdiction::Qld,
            "A rent increase notice must give at least two months notice.",
        ),
    ])
    .await
}

/// Chunks and embeds `(id, jurisdiction, text)` documents into a fresh store.
pub async fn store_with(docs: &[(&str, Jurisdiction, &str)]) -> Arc<InMemoryStore> {
    let store = Arc::new(InMemoryStore::new());
    for &(id, j, text) in docs {
        let doc = Document {
            id: id.into(),
            citation: format!("{} citation", id),
            jurisdiction: j,
            source_url: None,
            text: text.into(),
            effective_date: None,
        };
        store.replace_document(&doc).await.unwrap();
        let tree = chunk_document(id, text, &ChunkingParams::default());
        store.insert_chunks(&tree.parents).await.unwrap();
    }
    let pending = store.pending_embeddings(None).await.unwrap();
    let texts: Vec<String> = pending.iter().map(|c| c.text.clone()).collect();
    let vecs = LetterEmbedder.embed(&texts).await.unwrap();
    let batch: Vec<ChunkEmbedding> = pending
        .iter()
        .zip(vecs)
        .map(|(c, v)| ChunkEmbedding {
            chunk_id: c.id.clone(),
            vector: v,
            model: "letters".into(),
            content_hash: c.hash.clone(),
        })
        .collect();
    store.attach_embeddings(&batch).await.unwrap();
    store
}

pub fn retriever_with(store: Arc<dyn Store>, reranker: Option<Arc<dyn Reranker>>) -> HybridRetriever {
    HybridRetriever::new(
        store,
        Arc::new(LetterEmbedder),
        reranker,
        SearchParams::default(),
        Duration::from_secs(5),
    )
}

pub fn retriever_over(store: Arc<dyn Store>) -> HybridRetriever {
    retriever_with(store, None)
}
