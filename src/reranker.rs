//! Cohere rerank client.
//!
//! Calls `POST https://api.cohere.com/v1/rerank`. The retriever treats any
//! failure here as "keep fused order", so this client makes a single
//! attempt and does not retry.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Result};
use async_trait::async_trait;

use auslaw_core::rerank::{RerankScore, Reranker};

use crate::config::RerankerConfig;

pub struct CohereReranker {
    model: String,
    api_key: String,
    client: reqwest::Client,
}

impl CohereReranker {
    pub fn new(config: &RerankerConfig) -> Result<Self> {
        let api_key = std::env::var("COHERE_API_KEY")
            .map_err(|_| anyhow::anyhow!("COHERE_API_KEY environment variable not set"))?;
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;
        Ok(Self {
            model: config.model.clone(),
            api_key,
            client,
        })
    }
}

#[async_trait]
impl Reranker for CohereReranker {
    fn name(&self) -> &str {
        "cohere"
    }

    async fn rerank(
        &self,
        query: &str,
        documents: &[String],
        top_n: usize,
    ) -> Result<Vec<RerankScore>> {
        if documents.is_empty() {
            return Ok(Vec::new());
        }
        let body = serde_json::json!({
            "model": self.model,
            "query": query,
            "documents": documents,
            "top_n": top_n.min(documents.len()),
            "return_documents": false,
        });

        let response = self
            .client
            .post("https://api.cohere.com/v1/rerank")
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            bail!("Cohere rerank error {}: {}", status, text);
        }
        let json: serde_json::Value = response.json().await?;
        parse_rerank_response(&json)
    }
}

fn parse_rerank_response(json: &serde_json::Value) -> Result<Vec<RerankScore>> {
    let results = json
        .get("results")
        .and_then(|r| r.as_array())
        .ok_or_else(|| anyhow::anyhow!("Invalid rerank response: missing results"))?;

    results
        .iter()
        .map(|r| {
            let index = r
                .get("index")
                .and_then(|i| i.as_u64())
                .ok_or_else(|| anyhow::anyhow!("Invalid rerank response: missing index"))?;
            let relevance = r
                .get("relevance_score")
                .and_then(|s| s.as_f64())
                .unwrap_or(0.0);
            Ok(RerankScore {
                index: index as usize,
                relevance,
            })
        })
        .collect()
}

/// Build the configured reranker, or `None` when reranking is disabled or
/// cannot be initialised.
pub fn create_reranker(config: &RerankerConfig) -> Option<Arc<dyn Reranker>> {
    match config.provider.as_str() {
        "cohere" => match CohereReranker::new(config) {
            Ok(r) => {
                tracing::info!(model = %config.model, "Cohere reranker initialised");
                Some(Arc::new(r))
            }
            Err(e) => {
                tracing::warn!(error = %e, "reranking disabled");
                None
            }
        },
        _ => None,
    }
}
