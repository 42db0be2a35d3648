//! SQLite-backed [`DocumentStore`] and [`ChunkStore`].
//!
//! Embedding vectors are stored as little-endian `f32` BLOBs; document
//! metadata and tags as JSON text columns.

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};

use crate::models::{Chunk, DocStatus, Document, SourceType};

use super::{ChunkStore, DocumentStore, HydratedChunk};

pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

/// Encode a float vector as a BLOB (little-endian f32 bytes).
pub fn vec_to_blob(vec: &[f32]) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(vec.len() * 4);
    for &v in vec {
        bytes.extend_from_slice(&v.to_le_bytes());
    }
    bytes
}

/// Decode a BLOB back into a float vector.
pub fn blob_to_vec(blob: &[u8]) -> Vec<f32> {
    blob.chunks_exact(4)
        .map(|chunk| f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
        .collect()
}

fn doc_from_row(row: &SqliteRow) -> Result<Document> {
    let source_type: String = row.get("source_type");
    let status: String = row.get("status");
    let metadata_json: String = row.get("metadata_json");
    let tags_json: String = row.get("tags_json");

    Ok(Document {
        id: row.get("id"),
        owner_id: row.get("owner_id"),
        title: row.get("title"),
        original_filename: row.get("original_filename"),
        source_type: SourceType::parse(&source_type)
            .ok_or_else(|| anyhow!("unknown source_type in row: {}", source_type))?,
        page_count: row.get("page_count"),
        metadata: serde_json::from_str(&metadata_json).unwrap_or_default(),
        tags: serde_json::from_str(&tags_json).unwrap_or_default(),
        uploaded_at: row.get("uploaded_at"),
        status: DocStatus::parse(&status)
            .ok_or_else(|| anyhow!("unknown status in row: {}", status))?,
    })
}

fn chunk_from_row(row: &SqliteRow) -> Chunk {
    let embedding: Option<Vec<u8>> = row.get("embedding");
    Chunk {
        id: row.get("id"),
        document_id: row.get("document_id"),
        text: row.get("text"),
        embedding: embedding.map(|b| blob_to_vec(&b)),
        page: row.get("page"),
        start_char: row.get("start_char"),
        end_char: row.get("end_char"),
        chunk_index: row.get("chunk_index"),
        created_at: row.get("created_at"),
    }
}

const DOC_COLUMNS: &str = "id, owner_id, title, original_filename, source_type, page_count, \
                           metadata_json, tags_json, uploaded_at, status";

#[async_trait]
impl DocumentStore for SqliteStore {
    async fn insert(&self, doc: &Document) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO documents (id, owner_id, title, original_filename, source_type,
                                   page_count, metadata_json, tags_json, uploaded_at, status)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&doc.id)
        .bind(&doc.owner_id)
        .bind(&doc.title)
        .bind(&doc.original_filename)
        .bind(doc.source_type.as_str())
        .bind(doc.page_count)
        .bind(serde_json::to_string(&doc.metadata)?)
        .bind(serde_json::to_string(&doc.tags)?)
        .bind(doc.uploaded_at)
        .bind(doc.status.as_str())
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn get(&self, id: &str) -> Result<Option<Document>> {
        let row = sqlx::query(&format!("SELECT {DOC_COLUMNS} FROM documents WHERE id = ?"))
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        row.as_ref().map(doc_from_row).transpose()
    }

    async fn list(&self, owner_id: &str) -> Result<Vec<Document>> {
        let rows = sqlx::query(&format!(
            "SELECT {DOC_COLUMNS} FROM documents WHERE owner_id = ? ORDER BY uploaded_at DESC, id ASC"
        ))
        .bind(owner_id)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(doc_from_row).collect()
    }

    async fn finish(&self, id: &str, status: DocStatus) -> Result<bool> {
        if !status.is_terminal() {
            anyhow::bail!("finish requires a terminal status, got '{}'", status);
        }

        // Conditional write: terminal states are never overwritten.
        let result = sqlx::query(
            "UPDATE documents SET status = ? WHERE id = ? AND status = 'processing'",
        )
        .bind(status.as_str())
        .bind(id)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn delete(&self, id: &str) -> Result<bool> {
        let result = sqlx::query("DELETE FROM documents WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected() > 0)
    }
}

#[async_trait]
impl ChunkStore for SqliteStore {
    async fn insert_many(&self, chunks: &[Chunk]) -> Result<()> {
        let mut tx = self.pool.begin().await?;

        for chunk in chunks {
            sqlx::query(
                r#"
                INSERT INTO chunks (id, document_id, chunk_index, text, embedding,
                                    page, start_char, end_char, created_at)
                VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
                "#,
            )
            .bind(&chunk.id)
            .bind(&chunk.document_id)
            .bind(chunk.chunk_index)
            .bind(&chunk.text)
            .bind(chunk.embedding.as_deref().map(vec_to_blob))
            .bind(chunk.page)
            .bind(chunk.start_char)
            .bind(chunk.end_char)
            .bind(chunk.created_at)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(())
    }

    async fn get_many(&self, ids: &[String]) -> Result<Vec<HydratedChunk>> {
        let mut hydrated = Vec::with_capacity(ids.len());

        for id in ids {
            let row = sqlx::query(
                r#"
                SELECT c.id, c.document_id, c.chunk_index, c.text, c.embedding,
                       c.page, c.start_char, c.end_char, c.created_at,
                       d.title AS document_title
                FROM chunks c
                LEFT JOIN documents d ON d.id = c.document_id
                WHERE c.id = ?
                "#,
            )
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

            if let Some(row) = row {
                hydrated.push(HydratedChunk {
                    chunk: chunk_from_row(&row),
                    document_title: row.get("document_title"),
                });
            }
        }

        Ok(hydrated)
    }

    async fn for_document(&self, document_id: &str) -> Result<Vec<Chunk>> {
        let rows = sqlx::query(
            r#"
            SELECT id, document_id, chunk_index, text, embedding,
                   page, start_char, end_char, created_at
            FROM chunks WHERE document_id = ? ORDER BY chunk_index ASC
            "#,
        )
        .bind(document_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.iter().map(chunk_from_row).collect())
    }

    async fn delete_for_document(&self, document_id: &str) -> Result<u64> {
        let result = sqlx::query("DELETE FROM chunks WHERE document_id = ?")
            .bind(document_id)
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected())
    }

    async fn orphaned(&self) -> Result<Vec<String>> {
        let ids: Vec<String> = sqlx::query_scalar(
            r#"
            SELECT c.id FROM chunks c
            LEFT JOIN documents d ON d.id = c.document_id
            WHERE d.id IS NULL
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(ids)
    }

    async fn delete_many(&self, ids: &[String]) -> Result<u64> {
        let mut tx = self.pool.begin().await?;
        let mut deleted = 0u64;

        for id in ids {
            let result = sqlx::query("DELETE FROM chunks WHERE id = ?")
                .bind(id)
                .execute(&mut *tx)
                .await?;
            deleted += result.rows_affected();
        }

        tx.commit().await?;
        Ok(deleted)
    }
}
