//! SQLite-backed implementations of the core index traits.
//!
//! All four share one [`SqlitePool`]:
//!
//! | Type | Trait | Tables |
//! |------|-------|--------|
//! | [`SqliteChunkStore`] | [`ChunkStore`] | `documents`, `chunks` |
//! | [`SqliteLexicalIndex`] | [`LexicalIndex`] | `chunks_fts` (FTS5, BM25 ranking) |
//! | [`SqliteVectorIndex`] | [`VectorIndex`] | `chunk_vectors` (brute-force cosine) |
//! | [`SqliteRetrievalLog`] | [`RetrievalLog`] | `retrieval_log` |
//!
//! Multi-row writes (`replace_document`, `insert_chunks`, `insert_batch`)
//! each run in one transaction.

use anyhow::{bail, Result};
use async_trait::async_trait;
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};

use hybrid_rag_core::embedding::{blob_to_vec, cosine_similarity, vec_to_blob};
use hybrid_rag_core::lexical::LexicalIndex;
use hybrid_rag_core::log::RetrievalLog;
use hybrid_rag_core::models::{
    Chunk, ChunkCandidate, DocumentRecord, IndexStats, ResolvedChunk, RetrievalLogEntry,
    SourceKind,
};
use hybrid_rag_core::query::ParsedQuery;
use hybrid_rag_core::store::ChunkStore;
use hybrid_rag_core::vector::VectorIndex;

fn parse_kind(s: &str) -> Result<SourceKind> {
    SourceKind::parse(s).ok_or_else(|| anyhow::anyhow!("unknown source_kind in database: {}", s))
}

fn row_to_record(row: &SqliteRow) -> Result<DocumentRecord> {
    let kind: String = row.get("source_kind");
    let chunk_count: i64 = row.get("chunk_count");
    Ok(DocumentRecord {
        id: row.get("id"),
        source_kind: parse_kind(&kind)?,
        origin_ref: row.get("origin_ref"),
        content_hash: row.get("content_hash"),
        updated_at: row.get("updated_at"),
        indexed_at: row.get("indexed_at"),
        chunk_count: chunk_count.max(0) as usize,
        provenance: row.get("provenance"),
    })
}

fn row_to_chunk(row: &SqliteRow) -> Chunk {
    let token_count: i64 = row.get("token_count");
    let overlap_tokens: i64 = row.get("overlap_tokens");
    Chunk {
        id: row.get("id"),
        document_id: row.get("document_id"),
        chunk_index: row.get("chunk_index"),
        token_count: token_count.max(0) as usize,
        overlap_tokens: overlap_tokens.max(0) as usize,
        text: row.get("text"),
        hash: row.get("hash"),
        created_at: row.get("created_at"),
    }
}

fn placeholders(n: usize) -> String {
    vec!["?"; n].join(", ")
}

// ─── Chunk store ────────────────────────────────────────────────────

pub struct SqliteChunkStore {
    pool: SqlitePool,
}

impl SqliteChunkStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl ChunkStore for SqliteChunkStore {
    async fn get_document(&self, id: &str) -> Result<Option<DocumentRecord>> {
        let row = sqlx::query(
            "SELECT id, source_kind, origin_ref, content_hash, updated_at, indexed_at, chunk_count, provenance FROM documents WHERE id = ?",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(row_to_record).transpose()
    }

    async fn list_documents(&self) -> Result<Vec<DocumentRecord>> {
        let rows = sqlx::query(
            "SELECT id, source_kind, origin_ref, content_hash, updated_at, indexed_at, chunk_count, provenance FROM documents ORDER BY id",
        )
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(row_to_record).collect()
    }

    async fn replace_document(&self, record: &DocumentRecord, chunks: &[Chunk]) -> Result<()> {
        let mut tx = self.pool.begin().await?;

        sqlx::query(
            r#"
            INSERT INTO documents (id, source_kind, origin_ref, content_hash, updated_at,
                                   indexed_at, chunk_count, provenance)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(id) DO UPDATE SET
                source_kind = excluded.source_kind,
                origin_ref = excluded.origin_ref,
                content_hash = excluded.content_hash,
                updated_at = excluded.updated_at,
                indexed_at = excluded.indexed_at,
                chunk_count = excluded.chunk_count,
                provenance = excluded.provenance
            "#,
        )
        .bind(&record.id)
        .bind(record.source_kind.as_str())
        .bind(&record.origin_ref)
        .bind(&record.content_hash)
        .bind(record.updated_at)
        .bind(record.indexed_at)
        .bind(record.chunk_count as i64)
        .bind(&record.provenance)
        .execute(&mut *tx)
        .await?;

        sqlx::query("DELETE FROM chunks WHERE document_id = ?")
            .bind(&record.id)
            .execute(&mut *tx)
            .await?;

        for chunk in chunks {
            sqlx::query(
                r#"
                INSERT INTO chunks (id, document_id, chunk_index, token_count, overlap_tokens,
                                    text, hash, created_at)
                VALUES (?, ?, ?, ?, ?, ?, ?, ?)
                "#,
            )
            .bind(&chunk.id)
            .bind(&record.id)
            .bind(chunk.chunk_index)
            .bind(chunk.token_count as i64)
            .bind(chunk.overlap_tokens as i64)
            .bind(&chunk.text)
            .bind(&chunk.hash)
            .bind(chunk.created_at)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(())
    }

    async fn remove_document(&self, id: &str) -> Result<bool> {
        let mut tx = self.pool.begin().await?;
        sqlx::query("DELETE FROM chunks WHERE document_id = ?")
            .bind(id)
            .execute(&mut *tx)
            .await?;
        let removed = sqlx::query("DELETE FROM documents WHERE id = ?")
            .bind(id)
            .execute(&mut *tx)
            .await?
            .rows_affected();
        tx.commit().await?;
        Ok(removed > 0)
    }

    async fn get_chunks(&self, ids: &[String]) -> Result<Vec<ResolvedChunk>> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        let sql = format!(
            r#"
            SELECT c.id, c.document_id, c.chunk_index, c.token_count, c.overlap_tokens,
                   c.text, c.hash, c.created_at,
                   d.origin_ref, d.source_kind, d.indexed_at
            FROM chunks c
            JOIN documents d ON d.id = c.document_id
            WHERE c.id IN ({})
            "#,
            placeholders(ids.len())
        );
        let mut query = sqlx::query(&sql);
        for id in ids {
            query = query.bind(id);
        }
        let rows = query.fetch_all(&self.pool).await?;

        rows.iter()
            .map(|row| {
                let kind: String = row.get("source_kind");
                Ok(ResolvedChunk {
                    chunk: row_to_chunk(row),
                    origin_ref: row.get("origin_ref"),
                    source_kind: parse_kind(&kind)?,
                    indexed_at: row.get("indexed_at"),
                })
            })
            .collect()
    }

    async fn document_chunks(&self, document_id: &str) -> Result<Vec<Chunk>> {
        let rows = sqlx::query(
            r#"
            SELECT id, document_id, chunk_index, token_count, overlap_tokens, text, hash, created_at
            FROM chunks WHERE document_id = ? ORDER BY chunk_index ASC
            "#,
        )
        .bind(document_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.iter().map(row_to_chunk).collect())
    }

    async fn stats(&self) -> Result<IndexStats> {
        let document_count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM documents")
            .fetch_one(&self.pool)
            .await?;
        let chunk_count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM chunks")
            .fetch_one(&self.pool)
            .await?;
        let last_indexed_at: Option<i64> = sqlx::query_scalar("SELECT MAX(indexed_at) FROM documents")
            .fetch_one(&self.pool)
            .await?;

        let rows = sqlx::query(
            r#"
            SELECT d.source_kind AS source_kind, COUNT(c.id) AS n
            FROM chunks c
            JOIN documents d ON d.id = c.document_id
            GROUP BY d.source_kind
            ORDER BY d.source_kind
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        let mut stats = IndexStats {
            document_count: document_count as usize,
            chunk_count: chunk_count as usize,
            embedded_count: 0,
            last_indexed_at,
            ..Default::default()
        };
        for row in &rows {
            let kind: String = row.get("source_kind");
            let n: i64 = row.get("n");
            stats.chunks_by_source.insert(kind, n as usize);
        }
        Ok(stats)
    }
}

// ─── Lexical index ──────────────────────────────────────────────────

/// FTS5 index. The query reaches `MATCH` only as quoted terms joined with
/// `OR` (see [`ParsedQuery::fts_expression`]).
pub struct SqliteLexicalIndex {
    pool: SqlitePool,
}

impl SqliteLexicalIndex {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl LexicalIndex for SqliteLexicalIndex {
    async fn insert(&self, chunk: &Chunk) -> Result<()> {
        let mut tx = self.pool.begin().await?;
        sqlx::query("DELETE FROM chunks_fts WHERE chunk_id = ?")
            .bind(&chunk.id)
            .execute(&mut *tx)
            .await?;
        sqlx::query("INSERT INTO chunks_fts (chunk_id, document_id, text) VALUES (?, ?, ?)")
            .bind(&chunk.id)
            .bind(&chunk.document_id)
            .bind(&chunk.text)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;
        Ok(())
    }

    async fn remove_document(&self, document_id: &str) -> Result<()> {
        sqlx::query("DELETE FROM chunks_fts WHERE document_id = ?")
            .bind(document_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn search(&self, query: &ParsedQuery, limit: usize) -> Result<Vec<ChunkCandidate>> {
        if query.is_empty() || limit == 0 {
            return Ok(Vec::new());
        }

        let rows = sqlx::query(
            r#"
            SELECT chunk_id, document_id, rank
            FROM chunks_fts
            WHERE chunks_fts MATCH ?
            ORDER BY rank
            LIMIT ?
            "#,
        )
        .bind(query.fts_expression())
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .iter()
            .map(|row| {
                let rank: f64 = row.get("rank");
                ChunkCandidate {
                    chunk_id: row.get("chunk_id"),
                    document_id: row.get("document_id"),
                    raw_score: -rank,
                }
            })
            .collect())
    }

    async fn len(&self) -> Result<usize> {
        let n: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM chunks_fts")
            .fetch_one(&self.pool)
            .await?;
        Ok(n as usize)
    }

    async fn insert_chunks(&self, chunks: &[Chunk]) -> Result<()> {
        let mut tx = self.pool.begin().await?;
        for chunk in chunks {
            sqlx::query("DELETE FROM chunks_fts WHERE chunk_id = ?")
                .bind(&chunk.id)
                .execute(&mut *tx)
                .await?;
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

    async fn retain_document(&self, document_id: &str, keep: &[String]) -> Result<()> {
        if keep.is_empty() {
            return self.remove_document(document_id).await;
        }
        let sql = format!(
            "DELETE FROM chunks_fts WHERE document_id = ? AND chunk_id NOT IN ({})",
            placeholders(keep.len())
        );
        let mut query = sqlx::query(&sql).bind(document_id);
        for id in keep {
            query = query.bind(id);
        }
        query.execute(&self.pool).await?;
        Ok(())
    }
}

// ─── Vector index ───────────────────────────────────────────────────

pub struct SqliteVectorIndex {
    pool: SqlitePool,
}

impl SqliteVectorIndex {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    async fn check_dims(&self, dims: usize) -> Result<()> {
        let existing: Option<i64> = sqlx::query_scalar("SELECT dims FROM chunk_vectors LIMIT 1")
            .fetch_optional(&self.pool)
            .await?;
        if let Some(existing) = existing {
            if existing as usize != dims {
                bail!(
                    "dimension mismatch: index holds {}-d vectors, got {}-d (re-create the database after changing embedding models)",
                    existing,
                    dims
                );
            }
        }
        Ok(())
    }
}

#[async_trait]
impl VectorIndex for SqliteVectorIndex {
    async fn insert(&self, chunk_id: &str, document_id: &str, vector: &[f32]) -> Result<()> {
        if vector.is_empty() {
            bail!("refusing to store empty vector for chunk {}", chunk_id);
        }
        self.check_dims(vector.len()).await?;
        sqlx::query(
            r#"
            INSERT INTO chunk_vectors (chunk_id, document_id, dims, embedding)
            VALUES (?, ?, ?, ?)
            ON CONFLICT(chunk_id) DO UPDATE SET
                document_id = excluded.document_id,
                dims = excluded.dims,
                embedding = excluded.embedding
            "#,
        )
        .bind(chunk_id)
        .bind(document_id)
        .bind(vector.len() as i64)
        .bind(vec_to_blob(vector))
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn remove_document(&self, document_id: &str) -> Result<()> {
        sqlx::query("DELETE FROM chunk_vectors WHERE document_id = ?")
            .bind(document_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn search(&self, query: &[f32], limit: usize) -> Result<Vec<ChunkCandidate>> {
        let rows = sqlx::query("SELECT chunk_id, document_id, embedding FROM chunk_vectors")
            .fetch_all(&self.pool)
            .await?;

        let mut candidates: Vec<ChunkCandidate> = rows
            .iter()
            .map(|row| {
                let blob: Vec<u8> = row.get("embedding");
                let vec = blob_to_vec(&blob);
                ChunkCandidate {
                    chunk_id: row.get("chunk_id"),
                    document_id: row.get("document_id"),
                    raw_score: cosine_similarity(query, &vec) as f64,
                }
            })
            .collect();

        candidates.sort_by(|a, b| {
            b.raw_score
                .partial_cmp(&a.raw_score)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.chunk_id.cmp(&b.chunk_id))
        });
        candidates.truncate(limit);
        Ok(candidates)
    }

    async fn len(&self) -> Result<usize> {
        let n: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM chunk_vectors")
            .fetch_one(&self.pool)
            .await?;
        Ok(n as usize)
    }

    async fn insert_batch(&self, document_id: &str, entries: &[(String, Vec<f32>)]) -> Result<()> {
        let Some((_, first)) = entries.first() else {
            return Ok(());
        };
        if entries.iter().any(|(_, v)| v.len() != first.len() || v.is_empty()) {
            bail!("inconsistent vector dimensions for document {}", document_id);
        }
        self.check_dims(first.len()).await?;

        let mut tx = self.pool.begin().await?;
        for (chunk_id, vector) in entries {
            sqlx::query(
                r#"
                INSERT INTO chunk_vectors (chunk_id, document_id, dims, embedding)
                VALUES (?, ?, ?, ?)
                ON CONFLICT(chunk_id) DO UPDATE SET
                    document_id = excluded.document_id,
                    dims = excluded.dims,
                    embedding = excluded.embedding
                "#,
            )
            .bind(chunk_id)
            .bind(document_id)
            .bind(vector.len() as i64)
            .bind(vec_to_blob(vector))
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;
        Ok(())
    }

    async fn retain_document(&self, document_id: &str, keep: &[String]) -> Result<()> {
        if keep.is_empty() {
            return self.remove_document(document_id).await;
        }
        let sql = format!(
            "DELETE FROM chunk_vectors WHERE document_id = ? AND chunk_id NOT IN ({})",
            placeholders(keep.len())
        );
        let mut query = sqlx::query(&sql).bind(document_id);
        for id in keep {
            query = query.bind(id);
        }
        query.execute(&self.pool).await?;
        Ok(())
    }
}

// ─── Retrieval log ──────────────────────────────────────────────────

/// Insert-only audit table. Score aggregates are stored alongside the
/// full result list for cheap quality queries.
pub struct SqliteRetrievalLog {
    pool: SqlitePool,
}

impl SqliteRetrievalLog {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl RetrievalLog for SqliteRetrievalLog {
    async fn append(&self, entry: &RetrievalLogEntry) -> Result<()> {
        let scores = entry.results.iter().map(|(_, s)| *s);
        let min_score = scores.clone().reduce(f64::min);
        let max_score = scores.reduce(f64::max);

        sqlx::query(
            r#"
            INSERT INTO retrieval_log (query, timestamp, results_json, result_count, avg_score,
                                       min_score, max_score, sufficient, vector_available,
                                       lexical_weight, vector_weight)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&entry.query)
        .bind(entry.timestamp)
        .bind(serde_json::to_string(&entry.results)?)
        .bind(entry.results.len() as i64)
        .bind(entry.avg_score())
        .bind(min_score)
        .bind(max_score)
        .bind(entry.sufficient)
        .bind(entry.vector_available)
        .bind(entry.lexical_weight)
        .bind(entry.vector_weight)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn recent(&self, limit: usize) -> Result<Vec<RetrievalLogEntry>> {
        let rows = sqlx::query(
            r#"
            SELECT query, timestamp, results_json, sufficient, vector_available,
                   lexical_weight, vector_weight
            FROM retrieval_log
            ORDER BY id DESC
            LIMIT ?
            "#,
        )
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await?;

        rows.iter()
            .map(|row| {
                let results_json: String = row.get("results_json");
                Ok(RetrievalLogEntry {
                    query: row.get("query"),
                    timestamp: row.get("timestamp"),
                    results: serde_json::from_str(&results_json)?,
                    sufficient: row.get("sufficient"),
                    vector_available: row.get("vector_available"),
                    lexical_weight: row.get("lexical_weight"),
                    vector_weight: row.get("vector_weight"),
                })
            })
            .collect()
    }
}
