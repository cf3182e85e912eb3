//! `auslaw search`: run the full retrieval path from the command line.

use anyhow::Result;

use auslaw_core::models::Jurisdiction;
use auslaw_core::search::SearchHit;

use crate::config::Config;
use crate::db;
use crate::retriever::HybridRetriever;

/// One-line preview of a chunk.
pub fn snippet(text: &str, max_chars: usize) -> String {
    let flat: String = text.split_whitespace().collect::<Vec<_>>().join(" ");
    match flat.char_indices().nth(max_chars) {
        Some((cut, _)) => format!("{}…", &flat[..cut]),
        None => flat,
    }
}

fn score_of(hit: &SearchHit) -> f64 {
    hit.rerank_score.unwrap_or(hit.fused_score)
}

pub async fn run_search(
    config: &Config,
    query: &str,
    state: Option<String>,
    limit: Option<usize>,
    json: bool,
) -> Result<()> {
    let jurisdiction = match state.as_deref() {
        Some(s) => Some(s.parse::<Jurisdiction>()?),
        None => None,
    };

    let pool = db::connect(config).await?;
    let retriever = HybridRetriever::from_config(config, pool.clone())?;
    let mut hits = retriever.retrieve(query, jurisdiction).await?;
    if let Some(n) = limit {
        hits.truncate(n);
    }

    if json {
        println!("{}", serde_json::to_string_pretty(&hits)?);
    } else if hits.is_empty() {
        println!("No results.");
    } else {
        for (i, hit) in hits.iter().enumerate() {
            println!(
                "{}. [{:.4}] {} ({}) via {:?}",
                i + 1,
                score_of(hit),
                hit.citation,
                hit.jurisdiction,
                hit.method
            );
            if let Some(url) = &hit.source_url {
                println!("    {}", url);
            }
            println!("    {}", snippet(&hit.content, 160));
        }
    }

    pool.close().await;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_snippet_flattens_and_truncates() {
        assert_eq!(snippet("a\n\n b   c", 10), "a b c");
        assert_eq!(snippet("abcdefghij", 4), "abcd…");
    }
}
