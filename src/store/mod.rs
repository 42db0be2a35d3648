//! Storage abstraction for documents and chunks.
//!
//! [`DocumentStore`] and [`ChunkStore`] define the data access needed by the
//! ingestion and chat pipelines, enabling pluggable backends: the SQLite
//! implementation used in production ([`sqlite::SqliteStore`]) and an
//! in-memory implementation for tests ([`memory::InMemoryStore`]).
//!
//! Implementations must be `Send + Sync` to work with async runtimes.

pub mod memory;
pub mod sqlite;

use anyhow::Result;
use async_trait::async_trait;

use crate::models::{Chunk, DocStatus, Document};

/// A chunk joined to its parent document's title for attribution display.
///
/// `document_title` is `None` when the parent document no longer exists;
/// callers label such chunks rather than dropping them, so inconsistent
/// data stays visible instead of masquerading as a search miss.
#[derive(Debug, Clone)]
pub struct HydratedChunk {
    pub chunk: Chunk,
    pub document_title: Option<String>,
}

/// Persistence for document records and their lifecycle status.
#[async_trait]
pub trait DocumentStore: Send + Sync {
    async fn insert(&self, doc: &Document) -> Result<()>;

    async fn get(&self, id: &str) -> Result<Option<Document>>;

    /// Documents owned by `owner_id`, newest first.
    async fn list(&self, owner_id: &str) -> Result<Vec<Document>>;

    /// Move a `processing` document to a terminal status.
    ///
    /// Returns `false` when the document was already terminal (or absent):
    /// terminal states are never overwritten. Passing a non-terminal status
    /// is a caller bug and returns an error.
    async fn finish(&self, id: &str, status: DocStatus) -> Result<bool>;

    /// Delete the document row. Chunk cleanup is the caller's duty (see
    /// `IngestPipeline::delete_document` for the cascading path).
    async fn delete(&self, id: &str) -> Result<bool>;
}

/// Persistence for the text fragments belonging to documents.
#[async_trait]
pub trait ChunkStore: Send + Sync {
    /// Bulk-insert chunks, preserving their assigned ordinal indices.
    async fn insert_many(&self, chunks: &[Chunk]) -> Result<()>;

    /// Fetch chunks by id, each joined to its parent document's title.
    ///
    /// The order of `ids` is preserved in the result; ids with no stored
    /// chunk are skipped.
    async fn get_many(&self, ids: &[String]) -> Result<Vec<HydratedChunk>>;

    /// All chunks of a document, ordered by `chunk_index`.
    async fn for_document(&self, document_id: &str) -> Result<Vec<Chunk>>;

    async fn delete_for_document(&self, document_id: &str) -> Result<u64>;

    /// Ids of chunks whose parent document no longer exists.
    async fn orphaned(&self) -> Result<Vec<String>>;

    async fn delete_many(&self, ids: &[String]) -> Result<u64>;
}

/// Delete every chunk whose parent document is gone. Returns the number of
/// chunks removed. Used by the `cleanup` maintenance command.
pub async fn sweep_orphaned_chunks(chunks: &dyn ChunkStore) -> Result<u64> {
    let ids = chunks.orphaned().await?;
    if ids.is_empty() {
        return Ok(0);
    }
    chunks.delete_many(&ids).await
}
