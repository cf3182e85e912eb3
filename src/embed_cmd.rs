//! Embedding backfill.
//!
//! Finds eligible chunks whose vector is missing or stale (hash changed)
//! and embeds them in batches. Each batch is attached atomically, so a
//! failing batch leaves every earlier batch intact and is simply retried
//! on the next run.

use anyhow::{bail, Result};

use auslaw_core::embedding::is_usable_vector;
use auslaw_core::models::Chunk;
use auslaw_core::store::{ChunkEmbedding, Store};

use crate::config::Config;
use crate::db;
use crate::embedding::{self, EmbeddingProvider};
use crate::sqlite_store::SqliteStore;

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct EmbedReport {
    pub pending: usize,
    pub embedded: usize,
    pub failed: usize,
    pub failed_batches: usize,
}

async fn embed_batch(
    store: &dyn Store,
    provider: &dyn EmbeddingProvider,
    batch: &[Chunk],
) -> Result<()> {
    let texts: Vec<String> = batch.iter().map(|c| c.text.clone()).collect();
    let vectors = provider.embed(&texts).await?;
    if vectors.len() != batch.len() {
        bail!(
            "provider returned {} vectors for {} texts",
            vectors.len(),
            batch.len()
        );
    }
    if let Some(i) = vectors.iter().position(|v| !is_usable_vector(v)) {
        bail!("unusable vector for chunk {}", batch[i].id);
    }

    let embeddings: Vec<ChunkEmbedding> = batch
        .iter()
        .zip(vectors)
        .map(|(chunk, vector)| ChunkEmbedding {
            chunk_id: chunk.id.clone(),
            vector,
            model: provider.model_name().to_string(),
            content_hash: chunk.hash.clone(),
        })
        .collect();
    store.attach_embeddings(&embeddings).await
}

/// Embed up to `limit` pending chunks, `batch_size` at a time.
pub async fn embed_pending(
    store: &dyn Store,
    provider: &dyn EmbeddingProvider,
    limit: Option<usize>,
    batch_size: usize,
) -> Result<EmbedReport> {
    let pending = store.pending_embeddings(limit).await?;
    let mut report = EmbedReport {
        pending: pending.len(),
        ..Default::default()
    };

    for (i, batch) in pending.chunks(batch_size.max(1)).enumerate() {
        match embed_batch(store, provider, batch).await {
            Ok(()) => report.embedded += batch.len(),
            Err(e) => {
                tracing::warn!(batch = i, size = batch.len(), error = %e, "embedding batch failed");
                report.failed += batch.len();
                report.failed_batches += 1;
            }
        }
    }

    tracing::info!(
        pending = report.pending,
        embedded = report.embedded,
        failed = report.failed,
        model = provider.model_name(),
        "embedding backfill finished"
    );
    Ok(report)
}

/// `auslaw embed pending`
pub async fn run_embed_pending(
    config: &Config,
    limit: Option<usize>,
    batch_size_override: Option<usize>,
    dry_run: bool,
) -> Result<()> {
    if !config.embedding.is_enabled() {
        bail!("Embedding provider is disabled. Set [embedding] provider in config.");
    }

    let pool = db::connect(config).await?;
    let store = SqliteStore::new(pool.clone());

    if dry_run {
        let pending = store.pending_embeddings(limit).await?;
        println!("embed pending (dry-run)");
        println!("  chunks needing embeddings: {}", pending.len());
        pool.close().await;
        return Ok(());
    }

    let provider = embedding::create_provider(&config.embedding)?;
    let batch_size = batch_size_override.unwrap_or(config.embedding.batch_size);
    let report = embed_pending(&store, provider.as_ref(), limit, batch_size).await?;

    println!("embed pending");
    if report.pending == 0 {
        println!("  all chunks up to date");
    } else {
        println!("  total pending: {}", report.pending);
        println!("  embedded: {}", report.embedded);
        println!("  failed: {}", report.failed);
    }

    pool.close().await;
    Ok(())
}
