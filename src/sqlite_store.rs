//! SQLite-backed [`Store`] implementation.
//!
//! Translates every `Store` method into SQL against the schema created by
//! [`crate::migrate`] (documents, chunks, chunks_fts, chunk_vectors,
//! embeddings). Keyword relevance comes from FTS5 `bm25()`; vector
//! similarity is brute-force cosine over the stored blobs.

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use chrono::NaiveDate;
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};

use auslaw_core::embedding::{blob_to_vec, cosine_similarity, vec_to_blob};
use auslaw_core::models::{Chunk, Document, Jurisdiction};
use auslaw_core::store::{fts_match_expr, keyword_terms, ChunkCandidate, ChunkEmbedding, Store};

/// Chunks the search legs may return: children, and parents with no children.
const ELIGIBLE: &str =
    "(c.role = 'child' OR NOT EXISTS (SELECT 1 FROM chunks k WHERE k.parent_id = c.id))";

pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    async fn keyword_pass(
        &self,
        expr: &str,
        limit: usize,
        jurisdiction: Option<&str>,
    ) -> Result<Vec<ChunkCandidate>> {
        let sql = format!(
            r#"
            SELECT c.id AS chunk_id, c.document_id, c.parent_id, c.role, c.text, c.seq,
                   d.citation, d.jurisdiction, d.source_url,
                   bm25(chunks_fts) AS score
            FROM chunks_fts
            JOIN chunks c ON c.id = chunks_fts.chunk_id
            JOIN documents d ON d.id = c.document_id
            WHERE chunks_fts MATCH ?
              AND {}
              AND (? IS NULL OR d.jurisdiction = ?)
            ORDER BY score ASC, c.seq ASC
            LIMIT ?
            "#,
            ELIGIBLE
        );
        let rows = sqlx::query(&sql)
            .bind(expr)
            .bind(jurisdiction)
            .bind(jurisdiction)
            .bind(limit as i64)
            .fetch_all(&self.pool)
            .await?;

        rows.iter()
            .map(|row| {
                // bm25() is lower-is-better; flip so every leg is higher-is-better.
                let score: f64 = row.get("score");
                row_to_candidate(row, -score)
            })
            .collect()
    }
}

fn row_to_chunk(row: &SqliteRow) -> Result<Chunk> {
    let role: String = row.get("role");
    let token_count: i64 = row.get("token_count");
    Ok(Chunk {
        id: row.get("id"),
        document_id: row.get("document_id"),
        parent_id: row.get("parent_id"),
        role: role.parse()?,
        chunk_index: row.get("chunk_index"),
        text: row.get("text"),
        token_count: token_count.max(0) as usize,
        hash: row.get("hash"),
    })
}

fn row_to_candidate(row: &SqliteRow, raw_score: f64) -> Result<ChunkCandidate> {
    let role: String = row.get("role");
    let jurisdiction: String = row.get("jurisdiction");
    Ok(ChunkCandidate {
        chunk_id: row.get("chunk_id"),
        document_id: row.get("document_id"),
        parent_id: row.get("parent_id"),
        role: role.parse()?,
        content: row.get("text"),
        citation: row.get("citation"),
        jurisdiction: jurisdiction.parse().unwrap_or(Jurisdiction::Unknown),
        source_url: row.get("source_url"),
        raw_score,
        seq: row.get("seq"),
    })
}

#[async_trait]
impl Store for SqliteStore {
    async fn replace_document(&self, doc: &Document) -> Result<()> {
        let mut tx = self.pool.begin().await?;

        sqlx::query(
            "DELETE FROM chunk_vectors WHERE chunk_id IN (SELECT id FROM chunks WHERE document_id = ?)",
        )
        .bind(&doc.id)
        .execute(&mut *tx)
        .await?;

        sqlx::query(
            "DELETE FROM embeddings WHERE chunk_id IN (SELECT id FROM chunks WHERE document_id = ?)",
        )
        .bind(&doc.id)
        .execute(&mut *tx)
        .await?;

        sqlx::query("DELETE FROM chunks_fts WHERE document_id = ?")
            .bind(&doc.id)
            .execute(&mut *tx)
            .await?;

        // Children first: they reference parents.
        sqlx::query("DELETE FROM chunks WHERE document_id = ? AND role = 'child'")
            .bind(&doc.id)
            .execute(&mut *tx)
            .await?;
        sqlx::query("DELETE FROM chunks WHERE document_id = ?")
            .bind(&doc.id)
            .execute(&mut *tx)
            .await?;

        sqlx::query(
            r#"
            INSERT INTO documents (id, citation, jurisdiction, source_url, body, effective_date, ingested_at)
            VALUES (?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(id) DO UPDATE SET
                citation = excluded.citation,
                jurisdiction = excluded.jurisdiction,
                source_url = excluded.source_url,
                body = excluded.body,
                effective_date = excluded.effective_date,
                ingested_at = excluded.ingested_at
            "#,
        )
        .bind(&doc.id)
        .bind(&doc.citation)
        .bind(doc.jurisdiction.as_str())
        .bind(&doc.source_url)
        .bind(&doc.text)
        .bind(doc.effective_date.map(|d| d.format("%Y-%m-%d").to_string()))
        .bind(chrono::Utc::now().timestamp())
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(())
    }

    async fn insert_chunks(&self, chunks: &[Chunk]) -> Result<()> {
        let mut tx = self.pool.begin().await?;

        for chunk in chunks {
            sqlx::query(
                r#"
                INSERT INTO chunks (id, document_id, parent_id, role, chunk_index, text, token_count, hash)
                VALUES (?, ?, ?, ?, ?, ?, ?, ?)
                "#,
            )
            .bind(&chunk.id)
            .bind(&chunk.document_id)
            .bind(&chunk.parent_id)
            .bind(chunk.role.as_str())
            .bind(chunk.chunk_index)
            .bind(&chunk.text)
            .bind(chunk.token_count as i64)
            .bind(&chunk.hash)
            .execute(&mut *tx)
            .await
            .with_context(|| format!("Failed to insert chunk {}", chunk.id))?;

            sqlx::query("INSERT INTO chunks_fts (chunk_id, document_id, text) VALUES (?, ?, ?)")
                .bind(&chunk.id)
                .bind(&chunk.document_id)
                .bind(&chunk.text)
                .execute(&mut *tx)
                .await?;
        }

        tx.commit().await?;
        Ok(())
    }

    async fn attach_embeddings(&self, embeddings: &[ChunkEmbedding]) -> Result<()> {
        let now = chrono::Utc::now().timestamp();
        let mut tx = self.pool.begin().await?;

        for e in embeddings {
            let document_id: Option<String> =
                sqlx::query_scalar("SELECT document_id FROM chunks WHERE id = ?")
                    .bind(&e.chunk_id)
                    .fetch_optional(&mut *tx)
                    .await?;
            let Some(document_id) = document_id else {
                bail!("Embedding references unknown chunk {}", e.chunk_id);
            };

            sqlx::query(
                r#"
                INSERT INTO embeddings (chunk_id, model, dims, created_at, hash)
                VALUES (?, ?, ?, ?, ?)
                ON CONFLICT(chunk_id) DO UPDATE SET
                    model = excluded.model,
                    dims = excluded.dims,
                    created_at = excluded.created_at,
                    hash = excluded.hash
                "#,
            )
            .bind(&e.chunk_id)
            .bind(&e.model)
            .bind(e.vector.len() as i64)
            .bind(now)
            .bind(&e.content_hash)
            .execute(&mut *tx)
            .await?;

            sqlx::query(
                r#"
                INSERT INTO chunk_vectors (chunk_id, document_id, embedding)
                VALUES (?, ?, ?)
                ON CONFLICT(chunk_id) DO UPDATE SET
                    document_id = excluded.document_id,
                    embedding = excluded.embedding
                "#,
            )
            .bind(&e.chunk_id)
            .bind(&document_id)
            .bind(vec_to_blob(&e.vector))
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(())
    }

    async fn pending_embeddings(&self, limit: Option<usize>) -> Result<Vec<Chunk>> {
        let sql = format!(
            r#"
            SELECT c.id, c.document_id, c.parent_id, c.role, c.chunk_index, c.text,
                   c.token_count, c.hash
            FROM chunks c
            LEFT JOIN embeddings e ON e.chunk_id = c.id
            WHERE {}
              AND (e.chunk_id IS NULL OR e.hash != c.hash)
            ORDER BY c.seq ASC
            LIMIT ?
            "#,
            ELIGIBLE
        );
        let rows = sqlx::query(&sql)
            .bind(limit.map(|n| n as i64).unwrap_or(-1))
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(row_to_chunk).collect()
    }

    async fn get_document(&self, id: &str) -> Result<Option<Document>> {
        let row = sqlx::query(
            "SELECT id, citation, jurisdiction, source_url, body, effective_date FROM documents WHERE id = ?",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        let Some(row) = row else {
            return Ok(None);
        };
        let jurisdiction: String = row.get("jurisdiction");
        let effective_date: Option<String> = row.get("effective_date");
        Ok(Some(Document {
            id: row.get("id"),
            citation: row.get("citation"),
            jurisdiction: jurisdiction.parse().unwrap_or(Jurisdiction::Unknown),
            source_url: row.get("source_url"),
            text: row.get("body"),
            effective_date: effective_date
                .and_then(|d| NaiveDate::parse_from_str(&d, "%Y-%m-%d").ok()),
        }))
    }

    async fn get_chunk(&self, id: &str) -> Result<Option<Chunk>> {
        let row = sqlx::query(
            "SELECT id, document_id, parent_id, role, chunk_index, text, token_count, hash FROM chunks WHERE id = ?",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        row.as_ref().map(row_to_chunk).transpose()
    }

    async fn vector_search(
        &self,
        query_vec: &[f32],
        limit: usize,
        jurisdiction: Option<Jurisdiction>,
    ) -> Result<Vec<ChunkCandidate>> {
        let filter = jurisdiction.map(|j| j.as_str());
        let sql = format!(
            r#"
            SELECT c.id AS chunk_id, c.document_id, c.parent_id, c.role, c.text, c.seq,
                   d.citation, d.jurisdiction, d.source_url, cv.embedding
            FROM chunk_vectors cv
            JOIN chunks c ON c.id = cv.chunk_id
            JOIN documents d ON d.id = c.document_id
            WHERE {}
              AND (? IS NULL OR d.jurisdiction = ?)
            "#,
            ELIGIBLE
        );
        let rows = sqlx::query(&sql)
            .bind(filter)
            .bind(filter)
            .fetch_all(&self.pool)
            .await?;

        let mut candidates = rows
            .iter()
            .map(|row| {
                let blob: Vec<u8> = row.get("embedding");
                let similarity = cosine_similarity(query_vec, &blob_to_vec(&blob)) as f64;
                row_to_candidate(row, similarity)
            })
            .collect::<Result<Vec<_>>>()?;

        candidates.sort_by(|a, b| {
            b.raw_score
                .partial_cmp(&a.raw_score)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then(a.seq.cmp(&b.seq))
        });
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
        let filter = jurisdiction.map(|j| j.as_str());

        let all_terms = self
            .keyword_pass(&fts_match_expr(&terms, false), limit, filter)
            .await?;
        if !all_terms.is_empty() || terms.len() == 1 {
            return Ok(all_terms);
        }

        tracing::debug!(terms = terms.len(), "keyword leg falling back to any-term match");
        self.keyword_pass(&fts_match_expr(&terms, true), limit, filter)
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use auslaw_core::chunk::{chunk_document, ChunkingParams};
    use auslaw_core::models::ChunkRole;
    use sqlx::sqlite::SqlitePoolOptions;

    async fn memory_store() -> SqliteStore {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .unwrap();
        crate::migrate::migrate_pool(&pool).await.unwrap();
        SqliteStore::new(pool)
    }

    fn doc(id: &str, jurisdiction: Jurisdiction, text: &str) -> Document {
        Document {
            id: id.to_string(),
            citation: format!("{} Act", id),
            jurisdiction,
            source_url: Some(format!("https://legislation.example/{}", id)),
            text: text.to_string(),
            effective_date: NaiveDate::from_ymd_opt(2024, 1, 1),
        }
    }

    async fn ingest(store: &SqliteStore, d: &Document, params: &ChunkingParams) {
        store.replace_document(d).await.unwrap();
        let tree = chunk_document(&d.id, &d.text, params);
        store.insert_chunks(&tree.parents).await.unwrap();
        store.insert_chunks(&tree.children).await.unwrap();
    }

    fn tiny_params() -> ChunkingParams {
        ChunkingParams {
            small_doc_chars: 60,
            parent_tokens: 20,
            child_tokens: 8,
        }
    }

    const SPLIT_TEXT: &str = "Rent increase notice must be given.\n\nSixty days notice applies to rent.\n\nBond rules differ entirely.";

    #[tokio::test]
    async fn test_document_roundtrip() {
        let store = memory_store().await;
        let d = doc("rta", Jurisdiction::Nsw, "Short text.");
        ingest(&store, &d, &ChunkingParams::default()).await;
        let loaded = store.get_document("rta").await.unwrap().unwrap();
        assert_eq!(loaded, d);
    }

    #[tokio::test]
    async fn test_keyword_search_eligible_and_filtered() {
        let store = memory_store().await;
        ingest(&store, &doc("rta", Jurisdiction::Nsw, SPLIT_TEXT), &tiny_params()).await;
        ingest(
            &store,
            &doc("qld", Jurisdiction::Qld, "Rent increase notice in Queensland."),
            &ChunkingParams::default(),
        )
        .await;

        let nsw = store
            .keyword_search("rent notice", 10, Some(Jurisdiction::Nsw))
            .await
            .unwrap();
        assert!(!nsw.is_empty());
        assert!(nsw.iter().all(|c| c.role == ChunkRole::Child));
        assert!(nsw.iter().all(|c| c.jurisdiction == Jurisdiction::Nsw));

        let qld = store
            .keyword_search("rent notice", 10, Some(Jurisdiction::Qld))
            .await
            .unwrap();
        assert_eq!(qld.len(), 1);
        assert_eq!(qld[0].role, ChunkRole::Parent);
    }

    #[tokio::test]
    async fn test_keyword_or_fallback() {
        let store = memory_store().await;
        ingest(
            &store,
            &doc("a", Jurisdiction::Nsw, "Termination of a residential tenancy."),
            &ChunkingParams::default(),
        )
        .await;
        let hits = store.keyword_search("tenancy spaceship", 5, None).await.unwrap();
        assert_eq!(hits.len(), 1);
    }

    #[tokio::test]
    async fn test_keyword_query_syntax_is_inert() {
        let store = memory_store().await;
        ingest(
            &store,
            &doc("a", Jurisdiction::Nsw, "Notice NEAR the landlord."),
            &ChunkingParams::default(),
        )
        .await;
        // Would be an FTS5 syntax error if passed through unquoted.
        let hits = store.keyword_search("notice AND (\"", 5, None).await.unwrap();
        assert_eq!(hits.len(), 1);
    }

    #[tokio::test]
    async fn test_embeddings_pending_and_vector_search() {
        let store = memory_store().await;
        ingest(&store, &doc("a", Jurisdiction::Nsw, "alpha"), &ChunkingParams::default()).await;
        ingest(&store, &doc("b", Jurisdiction::Qld, "beta"), &ChunkingParams::default()).await;

        let pending = store.pending_embeddings(None).await.unwrap();
        assert_eq!(pending.len(), 2);
        let batch: Vec<ChunkEmbedding> = pending
            .iter()
            .zip([vec![1.0f32, 0.0], vec![0.0, 1.0]])
            .map(|(c, v)| ChunkEmbedding {
                chunk_id: c.id.clone(),
                vector: v,
                model: "test".into(),
                content_hash: c.hash.clone(),
            })
            .collect();
        store.attach_embeddings(&batch).await.unwrap();
        assert!(store.pending_embeddings(None).await.unwrap().is_empty());

        let all = store.vector_search(&[0.2, 0.9], 5, None).await.unwrap();
        assert_eq!(all[0].document_id, "b");
        let nsw = store
            .vector_search(&[0.2, 0.9], 5, Some(Jurisdiction::Nsw))
            .await
            .unwrap();
        assert_eq!(nsw.len(), 1);
        assert_eq!(nsw[0].document_id, "a");
    }

    #[tokio::test]
    async fn test_attach_embeddings_is_atomic() {
        let store = memory_store().await;
        ingest(&store, &doc("a", Jurisdiction::Nsw, "alpha"), &ChunkingParams::default()).await;
        let pending = store.pending_embeddings(None).await.unwrap();
        let batch = vec![
            ChunkEmbedding {
                chunk_id: pending[0].id.clone(),
                vector: vec![1.0],
                model: "test".into(),
                content_hash: pending[0].hash.clone(),
            },
            ChunkEmbedding {
                chunk_id: "missing".into(),
                vector: vec![1.0],
                model: "test".into(),
                content_hash: "h".into(),
            },
        ];
        assert!(store.attach_embeddings(&batch).await.is_err());
        assert_eq!(store.pending_embeddings(None).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_reingest_replaces_chunks() {
        let store = memory_store().await;
        ingest(&store, &doc("rta", Jurisdiction::Nsw, SPLIT_TEXT), &tiny_params()).await;
        ingest(&store, &doc("rta", Jurisdiction::Nsw, "Entirely new wording."), &tiny_params()).await;
        assert!(store.keyword_search("bond", 5, None).await.unwrap().is_empty());
        assert_eq!(store.keyword_search("wording", 5, None).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_child_resolves_to_parent() {
        let store = memory_store().await;
        ingest(&store, &doc("rta", Jurisdiction::Nsw, SPLIT_TEXT), &tiny_params()).await;
        let hit = store.keyword_search("bond", 1, None).await.unwrap().remove(0);
        let parent = store
            .get_chunk(hit.parent_id.as_deref().unwrap())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(parent.role, ChunkRole::Parent);
        assert_eq!(parent.document_id, "rta");
    }
}
