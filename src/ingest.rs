//! Document ingestion pipeline.
//!
//! Drives an uploaded file from a `processing` record to a terminal status:
//! extract → persist chunks → register vectors → finish. The document record
//! is created before any external call so every upload attempt is visible to
//! its owner, including failed ones. Every dependency failure after that
//! point is caught here and recorded as the `error` status; nothing
//! propagates past the pipeline once the record exists, and no document is
//! ever left in `processing` by a completed run.
//!
//! Re-ingesting a failed document is a new upload, not a retry of the old
//! record; there is no retry-in-place.

use std::sync::Arc;

use anyhow::Result;
use chrono::Utc;
use uuid::Uuid;

use crate::error::IngestError;
use crate::extraction::Extractor;
use crate::models::{Chunk, DocStatus, Document, SourceType};
use crate::store::{ChunkStore, DocumentStore};
use crate::vector_index::{IndexEntry, VectorIndex};

/// An upload handed to the pipeline by the HTTP layer or the CLI.
#[derive(Debug, Clone)]
pub struct UploadRequest {
    pub owner_id: String,
    pub file: Vec<u8>,
    pub filename: String,
    pub title: Option<String>,
    pub source_type: Option<SourceType>,
}

pub struct IngestPipeline {
    docs: Arc<dyn DocumentStore>,
    chunks: Arc<dyn ChunkStore>,
    extractor: Arc<dyn Extractor>,
    index: Arc<dyn VectorIndex>,
}

impl IngestPipeline {
    pub fn new(
        docs: Arc<dyn DocumentStore>,
        chunks: Arc<dyn ChunkStore>,
        extractor: Arc<dyn Extractor>,
        index: Arc<dyn VectorIndex>,
    ) -> Self {
        Self {
            docs,
            chunks,
            extractor,
            index,
        }
    }

    /// Validate the upload and create the `processing` document record.
    ///
    /// Rejections happen before any state exists; once this returns `Ok`,
    /// the record is durable and [`process`](Self::process) must run so the
    /// document reaches a terminal status.
    pub async fn accept(&self, req: &UploadRequest) -> Result<Document, IngestError> {
        if req.file.is_empty() {
            return Err(IngestError::EmptyFile);
        }

        let source_type = match req.source_type {
            Some(st) => st,
            None => SourceType::from_filename(&req.filename)
                .ok_or_else(|| IngestError::UnknownSourceType(req.filename.clone()))?,
        };

        let title = req
            .title
            .as_deref()
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .unwrap_or(&req.filename);

        let doc = Document::new(&req.owner_id, title, &req.filename, source_type);
        self.docs.insert(&doc).await?;

        tracing::info!(doc_id = %doc.id, filename = %doc.original_filename, "upload accepted");
        Ok(doc)
    }

    /// Run extract → persist → index for an accepted document and record the
    /// terminal status. Infallible from the caller's perspective: failures
    /// end up on the document, not in a return value.
    pub async fn process(&self, doc: &Document, file: Vec<u8>) -> DocStatus {
        let fragments = match self
            .extractor
            .extract(file, &doc.original_filename, &doc.id, doc.source_type)
            .await
        {
            Ok(fragments) => fragments,
            Err(e) => {
                tracing::warn!(doc_id = %doc.id, error = %e, "extraction failed");
                return self.finish(&doc.id, DocStatus::Error).await;
            }
        };

        let now = Utc::now().timestamp();
        let chunks: Vec<Chunk> = fragments
            .into_iter()
            .enumerate()
            .map(|(i, fragment)| Chunk {
                id: Uuid::new_v4().to_string(),
                document_id: doc.id.clone(),
                text: fragment.text,
                embedding: fragment.embedding,
                page: None,
                start_char: None,
                end_char: None,
                chunk_index: i as i64,
                created_at: now,
            })
            .collect();

        if let Err(e) = self.chunks.insert_many(&chunks).await {
            tracing::error!(doc_id = %doc.id, error = %e, "failed to persist chunks");
            return self.finish(&doc.id, DocStatus::Error).await;
        }

        let entries: Vec<IndexEntry> = chunks
            .iter()
            .filter_map(|c| {
                c.embedding.as_ref().map(|v| IndexEntry {
                    id: c.id.clone(),
                    embedding: v.clone(),
                })
            })
            .collect();

        if let Err(e) = self.index.register(&entries).await {
            // Persisted chunks are kept: they are unreachable via search but
            // removed with the document on delete.
            tracing::warn!(doc_id = %doc.id, error = %e, "index registration failed");
            return self.finish(&doc.id, DocStatus::Error).await;
        }

        tracing::info!(doc_id = %doc.id, chunks = chunks.len(), "ingestion complete");
        self.finish(&doc.id, DocStatus::Ready).await
    }

    /// Full pipeline in one call, used by the CLI. The HTTP layer splits
    /// [`accept`](Self::accept) from [`process`](Self::process) so it can
    /// respond before processing finishes.
    pub async fn run(&self, req: UploadRequest) -> Result<(Document, DocStatus), IngestError> {
        let doc = self.accept(&req).await?;
        let status = self.process(&doc, req.file).await;
        Ok((doc, status))
    }

    /// Cascade delete: remove the document, then every chunk referencing it.
    /// Returns `false` when the document did not exist.
    pub async fn delete_document(&self, id: &str) -> Result<bool> {
        if !self.docs.delete(id).await? {
            return Ok(false);
        }

        let removed = self.chunks.delete_for_document(id).await?;
        tracing::info!(doc_id = %id, chunks = removed, "document deleted");
        Ok(true)
    }

    async fn finish(&self, id: &str, status: DocStatus) -> DocStatus {
        match self.docs.finish(id, status).await {
            Ok(true) => {
                tracing::info!(doc_id = %id, status = %status, "document finished");
            }
            Ok(false) => {
                tracing::warn!(doc_id = %id, "document already in a terminal status");
            }
            Err(e) => {
                tracing::error!(doc_id = %id, error = %e, "failed to record terminal status");
            }
        }
        status
    }
}
