//! Reciprocal Rank Fusion and parent expansion.
//!
//! The vector and keyword legs each return a ranked list of eligible
//! chunks. Their scores live on different scales, so they are combined by
//! rank only:
//!
//! ```text
//! fused(c) = Σ over legs containing c of 1 / (k + rank_leg(c))
//! ```
//!
//! with 1-based ranks and `k = 60` by default. A chunk absent from a leg's
//! window contributes nothing from that leg. Equal fused scores are
//! ordered by chunk creation sequence, oldest first.
//!
//! After fusion (and optional reranking), child hits are expanded with
//! their parent's text so the model sees the surrounding provisions.

use std::collections::HashMap;

use anyhow::Result;
use serde::Serialize;

use crate::embedding::is_usable_vector;
use crate::error::RetrievalError;
use crate::models::{ChunkRole, Jurisdiction};
use crate::store::{ChunkCandidate, Store};

/// Standard RRF smoothing constant.
pub const DEFAULT_RRF_K: f64 = 60.0;

/// Retrieval tuning parameters, decoupled from application config.
#[derive(Debug, Clone)]
pub struct SearchParams {
    pub rrf_k: f64,
    /// Window fetched from each leg.
    pub candidate_limit: usize,
    /// Hits returned when no reranker is involved.
    pub final_limit: usize,
    pub rerank_top_n: usize,
    /// Fused hits scoring below this are dropped. `0.0` disables the cut.
    pub min_rrf_score: f64,
}

impl Default for SearchParams {
    fn default() -> Self {
        Self {
            rrf_k: DEFAULT_RRF_K,
            candidate_limit: 20,
            final_limit: 5,
            rerank_top_n: 5,
            min_rrf_score: 0.0,
        }
    }
}

/// Which legs produced a hit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum HitMethod {
    Vector,
    Keyword,
    Both,
}

/// A fused retrieval result.
#[derive(Debug, Clone, Serialize)]
pub struct SearchHit {
    pub chunk_id: String,
    pub document_id: String,
    pub parent_chunk_id: Option<String>,
    pub chunk_type: ChunkRole,
    /// Text of the matched chunk.
    pub content: String,
    /// Parent text for child hits after expansion, otherwise `content`.
    pub context: String,
    pub citation: String,
    pub jurisdiction: Jurisdiction,
    pub source_url: Option<String>,
    pub vector_rank: Option<usize>,
    pub keyword_rank: Option<usize>,
    pub vector_similarity: Option<f64>,
    pub keyword_score: Option<f64>,
    pub method: HitMethod,
    pub fused_rank: usize,
    pub fused_score: f64,
    pub rerank_score: Option<f64>,
    #[serde(skip)]
    pub seq: i64,
}

impl SearchHit {
    fn from_candidate(c: &ChunkCandidate) -> Self {
        Self {
            chunk_id: c.chunk_id.clone(),
            document_id: c.document_id.clone(),
            parent_chunk_id: c.parent_id.clone(),
            chunk_type: c.role,
            content: c.content.clone(),
            context: c.content.clone(),
            citation: c.citation.clone(),
            jurisdiction: c.jurisdiction,
            source_url: c.source_url.clone(),
            vector_rank: None,
            keyword_rank: None,
            vector_similarity: None,
            keyword_score: None,
            method: HitMethod::Vector,
            fused_rank: 0,
            fused_score: 0.0,
            rerank_score: None,
            seq: c.seq,
        }
    }
}

/// Reject inputs that must never reach a store or provider.
pub fn validate_query(query: &str, query_vec: &[f32]) -> Result<(), RetrievalError> {
    if query.trim().is_empty() {
        return Err(RetrievalError::invalid("query text is empty"));
    }
    if !is_usable_vector(query_vec) {
        return Err(RetrievalError::invalid(
            "query embedding is empty, zero, or non-finite",
        ));
    }
    Ok(())
}

/// One leg's contribution for a 1-based `rank`.
pub fn rrf_contribution(k: f64, rank: usize) -> f64 {
    1.0 / (k + rank as f64)
}

/// Fuse the two ranked legs with RRF.
///
/// Both inputs must already be ordered best first. The output is ordered
/// by fused score (desc), then creation sequence (asc), and carries
/// 1-based `fused_rank` values.
pub fn fuse_rrf(vector: &[ChunkCandidate], keyword: &[ChunkCandidate], k: f64) -> Vec<SearchHit> {
    let mut by_id: HashMap<&str, SearchHit> = HashMap::new();

    for (i, c) in vector.iter().enumerate() {
        let rank = i + 1;
        let hit = by_id
            .entry(c.chunk_id.as_str())
            .or_insert_with(|| SearchHit::from_candidate(c));
        hit.vector_rank = Some(rank);
        hit.vector_similarity = Some(c.raw_score);
        hit.fused_score += rrf_contribution(k, rank);
    }

    for (i, c) in keyword.iter().enumerate() {
        let rank = i + 1;
        let hit = by_id
            .entry(c.chunk_id.as_str())
            .or_insert_with(|| SearchHit::from_candidate(c));
        hit.keyword_rank = Some(rank);
        hit.keyword_score = Some(c.raw_score);
        hit.fused_score += rrf_contribution(k, rank);
    }

    let mut hits: Vec<SearchHit> = by_id
        .into_values()
        .map(|mut h| {
            h.method = match (h.vector_rank, h.keyword_rank) {
                (Some(_), Some(_)) => HitMethod::Both,
                (None, Some(_)) => HitMethod::Keyword,
                _ => HitMethod::Vector,
            };
            h
        })
        .collect();

    hits.sort_by(|a, b| {
        b.fused_score
            .partial_cmp(&a.fused_score)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then(a.seq.cmp(&b.seq))
    });
    for (i, h) in hits.iter_mut().enumerate() {
        h.fused_rank = i + 1;
    }
    hits
}

/// Drop hits whose fused score is below `min_score`.
pub fn apply_min_score(hits: Vec<SearchHit>, min_score: f64) -> Vec<SearchHit> {
    if min_score <= 0.0 {
        return hits;
    }
    hits.into_iter().filter(|h| h.fused_score >= min_score).collect()
}

/// Replace each child hit's `context` with its parent's text.
///
/// Parent lookups are cached per call. Parent hits keep their own text.
/// Applying this twice yields the same hits.
pub async fn expand_parents<S: Store + ?Sized>(
    store: &S,
    mut hits: Vec<SearchHit>,
) -> Result<Vec<SearchHit>> {
    let mut cache: HashMap<String, Option<String>> = HashMap::new();
    for hit in hits.iter_mut() {
        let parent_id = match (&hit.chunk_type, &hit.parent_chunk_id) {
            (ChunkRole::Child, Some(pid)) => pid.clone(),
            _ => {
                hit.context = hit.content.clone();
                continue;
            }
        };
        if !cache.contains_key(&parent_id) {
            let text = store.get_chunk(&parent_id).await?.map(|c| c.text);
            cache.insert(parent_id.clone(), text);
        }
        if let Some(Some(text)) = cache.get(&parent_id) {
            hit.context = text.clone();
        }
    }
    Ok(hits)
}
