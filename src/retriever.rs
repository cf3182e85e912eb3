//! Hybrid retrieval service.
//!
//! Wires the pure fusion logic from `auslaw_core::search` to a concrete
//! store, embedding provider and optional reranker:
//!
//! 1. Validate the query: empty text or an unusable caller-supplied
//!    embedding is `InvalidQuery`; an unusable vector from the provider is
//!    `RetrievalUnavailable`.
//! 2. Run the vector and keyword legs concurrently, each bounded by a
//!    timeout. Either leg failing → `RetrievalUnavailable`.
//! 3. Fuse with RRF.
//! 4. Rerank the fused window if a reranker is configured; any rerank
//!    failure keeps the fused order.
//! 5. Attach parent context to child hits.

use std::sync::Arc;
use std::time::Duration;

use auslaw_core::embedding::is_usable_vector;
use auslaw_core::error::RetrievalError;
use auslaw_core::models::Jurisdiction;
use auslaw_core::rerank::{apply_rerank, fallback_order, Reranker};
use auslaw_core::search::{apply_min_score, expand_parents, fuse_rrf, validate_query, SearchHit, SearchParams};
use auslaw_core::store::{ChunkCandidate, Store};

use crate::config::Config;
use crate::embedding::{self, EmbeddingProvider};
use crate::reranker::create_reranker;
use crate::sqlite_store::SqliteStore;

pub struct HybridRetriever {
    store: Arc<dyn Store>,
    embedder: Arc<dyn EmbeddingProvider>,
    reranker: Option<Arc<dyn Reranker>>,
    params: SearchParams,
    call_timeout: Duration,
}

impl HybridRetriever {
    pub fn new(
        store: Arc<dyn Store>,
        embedder: Arc<dyn EmbeddingProvider>,
        reranker: Option<Arc<dyn Reranker>>,
        params: SearchParams,
        call_timeout: Duration,
    ) -> Self {
        Self {
            store,
            embedder,
            reranker,
            params,
            call_timeout,
        }
    }

    /// Retriever over the SQLite store with the configured providers.
    pub fn from_config(config: &Config, pool: sqlx::SqlitePool) -> anyhow::Result<Self> {
        Ok(Self::new(
            Arc::new(SqliteStore::new(pool)),
            embedding::create_provider(&config.embedding)?,
            create_reranker(&config.reranker),
            config.retrieval.params(),
            Duration::from_secs(config.retrieval.timeout_secs),
        ))
    }

    pub fn params(&self) -> &SearchParams {
        &self.params
    }

    pub fn store(&self) -> &Arc<dyn Store> {
        &self.store
    }

    /// Fused search with a caller-supplied embedding.
    ///
    /// Each leg contributes its top `limit`; the fused list is cut to
    /// `limit` and expanded with parent context. No reranking.
    pub async fn search(
        &self,
        query_text: &str,
        query_embedding: &[f32],
        jurisdiction: Option<Jurisdiction>,
        limit: usize,
    ) -> Result<Vec<SearchHit>, RetrievalError> {
        let mut hits = self
            .fused(query_text, query_embedding, jurisdiction, limit)
            .await?;
        hits.truncate(limit);
        self.expand(hits).await
    }

    /// Full retrieval for a natural-language query: embed, fuse over the
    /// candidate window, rerank to the final size, expand.
    pub async fn retrieve(
        &self,
        query_text: &str,
        jurisdiction: Option<Jurisdiction>,
    ) -> Result<Vec<SearchHit>, RetrievalError> {
        if query_text.trim().is_empty() {
            return Err(RetrievalError::invalid("query text is empty"));
        }

        let embedding = match tokio::time::timeout(
            self.call_timeout,
            self.embedder.embed_query(query_text),
        )
        .await
        {
            Ok(Ok(v)) if is_usable_vector(&v) => v,
            Ok(Ok(_)) => {
                tracing::error!(provider = self.embedder.model_name(), "query embedding is empty, zero or non-finite");
                return Err(RetrievalError::unavailable("query embedding is unusable"));
            }
            Ok(Err(e)) => return Err(RetrievalError::unavailable(format!("query embedding failed: {}", e))),
            Err(_) => return Err(RetrievalError::unavailable("query embedding timed out")),
        };

        let fused = self
            .fused(query_text, &embedding, jurisdiction, self.params.candidate_limit)
            .await?;
        let ranked = self.rerank(query_text, fused).await;
        self.expand(ranked).await
    }

    async fn fused(
        &self,
        query_text: &str,
        query_embedding: &[f32],
        jurisdiction: Option<Jurisdiction>,
        limit: usize,
    ) -> Result<Vec<SearchHit>, RetrievalError> {
        validate_query(query_text, query_embedding)?;

        let vector_leg = self.leg(
            "vector",
            self.store.vector_search(query_embedding, limit, jurisdiction),
        );
        let keyword_leg = self.leg(
            "keyword",
            self.store.keyword_search(query_text, limit, jurisdiction),
        );
        let (vector, keyword) = tokio::join!(vector_leg, keyword_leg);
        let (vector, keyword) = (vector?, keyword?);

        let hits = apply_min_score(
            fuse_rrf(&vector, &keyword, self.params.rrf_k),
            self.params.min_rrf_score,
        );
        tracing::debug!(
            vector = vector.len(),
            keyword = keyword.len(),
            fused = hits.len(),
            jurisdiction = ?jurisdiction,
            "hybrid search legs complete"
        );
        Ok(hits)
    }

    async fn leg<F>(&self, name: &'static str, fut: F) -> Result<Vec<ChunkCandidate>, RetrievalError>
    where
        F: std::future::Future<Output = anyhow::Result<Vec<ChunkCandidate>>>,
    {
        match tokio::time::timeout(self.call_timeout, fut).await {
            Ok(Ok(c)) => Ok(c),
            Ok(Err(e)) => {
                tracing::error!(leg = name, error = %e, "search leg failed");
                Err(RetrievalError::unavailable(format!("{} search failed: {}", name, e)))
            }
            Err(_) => {
                tracing::error!(leg = name, "search leg timed out");
                Err(RetrievalError::unavailable(format!("{} search timed out", name)))
            }
        }
    }

    async fn rerank(&self, query_text: &str, fused: Vec<SearchHit>) -> Vec<SearchHit> {
        let Some(reranker) = &self.reranker else {
            return fallback_order(&fused, self.params.final_limit);
        };
        if fused.is_empty() {
            return fused;
        }

        let docs: Vec<String> = fused.iter().map(|h| h.content.clone()).collect();
        let top_n = self.params.rerank_top_n;
        match tokio::time::timeout(self.call_timeout, reranker.rerank(query_text, &docs, top_n)).await {
            Ok(Ok(scores)) if !scores.is_empty() => apply_rerank(&fused, &scores, top_n),
            Ok(Ok(_)) => fallback_order(&fused, top_n),
            Ok(Err(e)) => {
                tracing::warn!(reranker = reranker.name(), error = %e, "rerank failed, keeping fused order");
                fallback_order(&fused, top_n)
            }
            Err(_) => {
                tracing::warn!(reranker = reranker.name(), "rerank timed out, keeping fused order");
                fallback_order(&fused, top_n)
            }
        }
    }

    async fn expand(&self, hits: Vec<SearchHit>) -> Result<Vec<SearchHit>, RetrievalError> {
        match tokio::time::timeout(self.call_timeout, expand_parents(self.store.as_ref(), hits)).await {
            Ok(Ok(h)) => Ok(h),
            Ok(Err(e)) => Err(RetrievalError::unavailable(format!("parent lookup failed: {}", e))),
            Err(_) => Err(RetrievalError::unavailable("parent lookup timed out")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::Result;
    use async_trait::async_trait;
    use auslaw_core::rerank::RerankScore;
    use auslaw_core::search::HitMethod;

    use crate::test_support::{retriever_with as retriever, seeded_store, store_with, DownStore, LetterEmbedder};

    struct ReverseReranker;

    #[async_trait]
    impl Reranker for ReverseReranker {
        fn name(&self) -> &str {
            "reverse"
        }
        async fn rerank(&self, _q: &str, docs: &[String], top_n: usize) -> Result<Vec<RerankScore>> {
            Ok((0..docs.len())
                .rev()
                .take(top_n)
                .map(|i| RerankScore { index: i, relevance: i as f64 })
                .collect())
        }
    }

    struct FailingReranker;

    #[async_trait]
    impl Reranker for FailingReranker {
        fn name(&self) -> &str {
            "failing"
        }
        async fn rerank(&self, _q: &str, _d: &[String], _n: usize) -> Result<Vec<RerankScore>> {
            anyhow::bail!("503 from reranker")
        }
    }

    #[tokio::test]
    async fn test_retrieve_filters_jurisdiction() {
        let r = retriever(seeded_store().await, None);
        let hits = r.retrieve("rent increase notice", Some(Jurisdiction::Nsw)).await.unwrap();
        assert!(!hits.is_empty());
        assert!(hits.iter().all(|h| h.jurisdiction == Jurisdiction::Nsw));
        assert_eq!(hits[0].document_id, "rta");
        assert_eq!(hits[0].method, HitMethod::Both);
        assert_eq!(hits[0].context, hits[0].content);
    }

    #[tokio::test]
    async fn test_partial_keyword_match_still_fuses() {
        // No document contains "period", so the keyword leg falls back to any-term matching.
        let store = store_with(&[
            ("rta", Jurisdiction::Nsw, "A landlord must give 60 days written notice of a rent increase."),
            ("bond", Jurisdiction::Nsw, "The bond must be lodged with the authority within 10 working days."),
        ])
        .await;
        let r = retriever(store, None);
        let hits = r
            .retrieve("rent increase notice period", Some(Jurisdiction::Nsw))
            .await
            .unwrap();
        assert_eq!(hits[0].document_id, "rta");
        assert_eq!(hits[0].method, HitMethod::Both);
        assert!(hits.iter().skip(1).all(|h| h.method != HitMethod::Both));
    }

    #[tokio::test]
    async fn test_empty_query_is_invalid() {
        let r = retriever(seeded_store().await, None);
        let err = r.retrieve("   ", None).await.unwrap_err();
        assert!(matches!(err, RetrievalError::InvalidQuery { .. }));
        let err = r.search("rent", &[], None, 5).await.unwrap_err();
        assert!(matches!(err, RetrievalError::InvalidQuery { .. }));
    }

    #[tokio::test]
    async fn test_degenerate_query_embedding_is_unavailable() {
        let r = retriever(seeded_store().await, None);
        // No ASCII letters, so the letter embedder returns a zero vector.
        let err = r.retrieve("租金上涨", None).await.unwrap_err();
        assert!(matches!(err, RetrievalError::RetrievalUnavailable { .. }));
        assert!(err.is_retryable());
    }

    #[tokio::test]
    async fn test_store_down_is_unavailable() {
        let r = retriever(Arc::new(DownStore), None);
        let err = r.retrieve("rent", None).await.unwrap_err();
        assert!(err.is_retryable());
    }

    #[tokio::test]
    async fn test_reranker_reorders() {
        let r = retriever(seeded_store().await, Some(Arc::new(ReverseReranker)));
        let plain = retriever(seeded_store().await, None);
        let fused = plain.retrieve("rent increase notice", None).await.unwrap();
        let reranked = r.retrieve("rent increase notice", None).await.unwrap();
        assert_eq!(reranked.len(), fused.len());
        assert_eq!(reranked[0].chunk_id, fused.last().unwrap().chunk_id);
        assert!(reranked[0].rerank_score.is_some());
    }

    #[tokio::test]
    async fn test_rerank_failure_keeps_fused_order() {
        let r = retriever(seeded_store().await, Some(Arc::new(FailingReranker)));
        let plain = retriever(seeded_store().await, None);
        let a: Vec<_> = r.retrieve("rent increase notice", None).await.unwrap();
        let b: Vec<_> = plain.retrieve("rent increase notice", None).await.unwrap();
        let ids_a: Vec<_> = a.iter().map(|h| h.chunk_id.clone()).collect();
        let ids_b: Vec<_> = b.iter().map(|h| h.chunk_id.clone()).collect();
        assert_eq!(ids_a, ids_b);
        assert!(a.iter().all(|h| h.rerank_score.is_none()));
    }

    #[tokio::test]
    async fn test_search_truncates_to_limit() {
        let r = retriever(seeded_store().await, None);
        let q = LetterEmbedder.embed_query("rent").await.unwrap();
        let hits = r.search("rent", &q, None, 1).await.unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].fused_rank, 1);
    }
}
