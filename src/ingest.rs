//! Legislation ingestion.
//!
//! Reads a JSONL file where each line is one document:
//!
//! ```json
//! {"external_id": "nsw-rta-2010", "citation": "Residential Tenancies Act 2010 (NSW)",
//!  "jurisdiction": "NSW", "source_url": "https://...", "text": "...",
//!  "effective_date": "2024-01-01"}
//! ```
//!
//! Each document is chunked into its parent/child tree and written through
//! the [`Store`] trait: document first, then the parent batch, then the
//! child batch. Re-ingesting an `external_id` replaces the document and all
//! of its chunks (and therefore its embeddings).

use std::io::BufRead;
use std::path::Path;

use anyhow::{Context, Result};
use chrono::NaiveDate;
use serde::Deserialize;

use auslaw_core::chunk::{chunk_document, ChunkingParams};
use auslaw_core::models::{Document, Jurisdiction};
use auslaw_core::store::Store;

use crate::config::Config;
use crate::db;
use crate::sqlite_store::SqliteStore;

/// One line of the ingest file.
#[derive(Debug, Deserialize)]
pub struct IngestRecord {
    pub external_id: String,
    pub citation: String,
    pub jurisdiction: String,
    #[serde(default)]
    pub source_url: Option<String>,
    pub text: String,
    #[serde(default)]
    pub effective_date: Option<NaiveDate>,
}

impl IngestRecord {
    pub fn into_document(self) -> Result<Document> {
        let id = self.external_id.trim().to_string();
        if id.is_empty() {
            anyhow::bail!("external_id must not be empty");
        }
        if self.text.trim().is_empty() {
            anyhow::bail!("text must not be empty for {}", id);
        }
        let jurisdiction: Jurisdiction = self.jurisdiction.parse()?;
        if jurisdiction == Jurisdiction::Unknown {
            anyhow::bail!("jurisdiction is required for {}", id);
        }
        Ok(Document {
            id,
            citation: self.citation.trim().to_string(),
            jurisdiction,
            source_url: self.source_url.filter(|u| !u.trim().is_empty()),
            text: self.text,
            effective_date: self.effective_date,
        })
    }
}

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct IngestReport {
    pub documents: usize,
    pub parents: usize,
    pub children: usize,
    /// Lines that could not be parsed or validated.
    pub rejected: usize,
}

/// Replace `doc` in the store and write its chunk tree. Returns
/// `(parents, children)`.
pub async fn ingest_document(
    store: &dyn Store,
    doc: &Document,
    params: &ChunkingParams,
) -> Result<(usize, usize)> {
    let tree = chunk_document(&doc.id, &doc.text, params);
    store
        .replace_document(doc)
        .await
        .with_context(|| format!("Failed to store document {}", doc.id))?;
    // Parents first: children reference them.
    store
        .insert_chunks(&tree.parents)
        .await
        .with_context(|| format!("Failed to store parent chunks for {}", doc.id))?;
    if !tree.children.is_empty() {
        store
            .insert_chunks(&tree.children)
            .await
            .with_context(|| format!("Failed to store child chunks for {}", doc.id))?;
    }
    tracing::debug!(
        document = %doc.id,
        parents = tree.parents.len(),
        children = tree.children.len(),
        "document ingested"
    );
    Ok((tree.parents.len(), tree.children.len()))
}

/// Ingest every line of `reader`. Bad lines are logged and counted; store
/// failures abort.
pub async fn ingest_lines<R: BufRead>(
    store: &dyn Store,
    reader: R,
    params: &ChunkingParams,
    dry_run: bool,
) -> Result<IngestReport> {
    let mut report = IngestReport::default();

    for (n, line) in reader.lines().enumerate() {
        let line = line.with_context(|| format!("Failed to read line {}", n + 1))?;
        if line.trim().is_empty() {
            continue;
        }
        let doc = match serde_json::from_str::<IngestRecord>(&line)
            .map_err(anyhow::Error::from)
            .and_then(IngestRecord::into_document)
        {
            Ok(doc) => doc,
            Err(e) => {
                tracing::warn!(line = n + 1, error = %e, "skipping invalid ingest record");
                report.rejected += 1;
                continue;
            }
        };

        let (parents, children) = if dry_run {
            let tree = chunk_document(&doc.id, &doc.text, params);
            (tree.parents.len(), tree.children.len())
        } else {
            ingest_document(store, &doc, params).await?
        };
        report.documents += 1;
        report.parents += parents;
        report.children += children;
    }

    Ok(report)
}

/// `auslaw ingest <file.jsonl>`
pub async fn run_ingest(config: &Config, path: &Path, dry_run: bool) -> Result<()> {
    let file = std::fs::File::open(path)
        .with_context(|| format!("Failed to open ingest file: {}", path.display()))?;
    let reader = std::io::BufReader::new(file);

    let pool = db::connect(config).await?;
    let store = SqliteStore::new(pool.clone());
    let report = ingest_lines(&store, reader, &config.chunking.params(), dry_run).await?;

    if dry_run {
        println!("ingest {} (dry-run)", path.display());
    } else {
        println!("ingest {}", path.display());
    }
    println!("  documents: {}", report.documents);
    println!("  parent chunks: {}", report.parents);
    println!("  child chunks: {}", report.children);
    if report.rejected > 0 {
        println!("  rejected lines: {}", report.rejected);
    }
    if !dry_run && config.embedding.is_enabled() {
        println!("  run `auslaw embed pending` to embed new chunks");
    }
    println!("ok");

    pool.close().await;
    Ok(())
}
