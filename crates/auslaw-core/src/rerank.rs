//! Cross-encoder reranking seam.
//!
//! A [`Reranker`] scores `(query, passage)` pairs and returns the best
//! `top_n` indices. The concrete HTTP client lives in the app crate; this
//! module owns the trait and the pure reordering step so the retrieval
//! path can fall back to fused order when reranking fails.

use anyhow::Result;
use async_trait::async_trait;

use crate::search::SearchHit;

/// One scored passage returned by a reranker.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RerankScore {
    /// Index into the `documents` slice passed to [`Reranker::rerank`].
    pub index: usize,
    pub relevance: f64,
}

#[async_trait]
pub trait Reranker: Send + Sync {
    fn name(&self) -> &str;

    /// Score `documents` against `query`, best first, at most `top_n`.
    async fn rerank(&self, query: &str, documents: &[String], top_n: usize)
        -> Result<Vec<RerankScore>>;
}

/// Reorder `hits` by reranker output.
///
/// Indices that are out of range or repeated are ignored. The result holds
/// at most `top_n` hits; each keeps its fused rank and gains a
/// `rerank_score`.
pub fn apply_rerank(hits: &[SearchHit], scores: &[RerankScore], top_n: usize) -> Vec<SearchHit> {
    let mut seen = vec![false; hits.len()];
    let mut out = Vec::with_capacity(top_n.min(hits.len()));
    for s in scores {
        if out.len() >= top_n {
            break;
        }
        if s.index >= hits.len() || seen[s.index] {
            continue;
        }
        seen[s.index] = true;
        let mut hit = hits[s.index].clone();
        hit.rerank_score = Some(s.relevance);
        out.push(hit);
    }
    out
}

/// Fused-order fallback used when the reranker is absent or fails.
pub fn fallback_order(hits: &[SearchHit], top_n: usize) -> Vec<SearchHit> {
    hits.iter().take(top_n).cloned().collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::search::tests::hit;

    #[test]
    fn test_apply_rerank_reorders() {
        let hits = vec![hit("a", 1), hit("b", 2), hit("c", 3)];
        let scores = vec![
            RerankScore { index: 2, relevance: 0.9 },
            RerankScore { index: 0, relevance: 0.5 },
        ];
        let out = apply_rerank(&hits, &scores, 5);
        assert_eq!(out.len(), 2);
        assert_eq!(out[0].chunk_id, "c");
        assert_eq!(out[0].rerank_score, Some(0.9));
        assert_eq!(out[0].fused_rank, 3);
        assert_eq!(out[1].chunk_id, "a");
    }

    #[test]
    fn test_apply_rerank_ignores_bad_indices() {
        let hits = vec![hit("a", 1)];
        let scores = vec![
            RerankScore { index: 7, relevance: 0.9 },
            RerankScore { index: 0, relevance: 0.4 },
            RerankScore { index: 0, relevance: 0.3 },
        ];
        let out = apply_rerank(&hits, &scores, 5);
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].rerank_score, Some(0.4));
    }

    #[test]
    fn test_fallback_takes_fused_prefix() {
        let hits = vec![hit("a", 1), hit("b", 2), hit("c", 3)];
        let out = fallback_order(&hits, 2);
        assert_eq!(out.iter().map(|h| h.chunk_id.as_str()).collect::<Vec<_>>(), ["a", "b"]);
        assert!(out.iter().all(|h| h.rerank_score.is_none()));
    }
}
