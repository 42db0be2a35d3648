//! In-memory [`DocumentStore`] and [`ChunkStore`] for tests.
//!
//! Uses `HashMap` and `Vec` behind `std::sync::RwLock` for thread safety.

use std::collections::HashMap;
use std::sync::RwLock;

use anyhow::Result;
use async_trait::async_trait;

use crate::models::{Chunk, DocStatus, Document};

use super::{ChunkStore, DocumentStore, HydratedChunk};

/// In-memory store for orchestrator tests.
pub struct InMemoryStore {
    docs: RwLock<HashMap<String, Document>>,
    chunks: RwLock<Vec<Chunk>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self {
            docs: RwLock::new(HashMap::new()),
            chunks: RwLock::new(Vec::new()),
        }
    }
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl DocumentStore for InMemoryStore {
    async fn insert(&self, doc: &Document) -> Result<()> {
        let mut docs = self.docs.write().unwrap();
        docs.insert(doc.id.clone(), doc.clone());
        Ok(())
    }

    async fn get(&self, id: &str) -> Result<Option<Document>> {
        let docs = self.docs.read().unwrap();
        Ok(docs.get(id).cloned())
    }

    async fn list(&self, owner_id: &str) -> Result<Vec<Document>> {
        let docs = self.docs.read().unwrap();
        let mut owned: Vec<Document> = docs
            .values()
            .filter(|d| d.owner_id == owner_id)
            .cloned()
            .collect();
        owned.sort_by(|a, b| b.uploaded_at.cmp(&a.uploaded_at).then(a.id.cmp(&b.id)));
        Ok(owned)
    }

    async fn finish(&self, id: &str, status: DocStatus) -> Result<bool> {
        if !status.is_terminal() {
            anyhow::bail!("finish requires a terminal status, got '{}'", status);
        }

        let mut docs = self.docs.write().unwrap();
        match docs.get_mut(id) {
            Some(doc) if doc.status == DocStatus::Processing => {
                doc.status = status;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn delete(&self, id: &str) -> Result<bool> {
        let mut docs = self.docs.write().unwrap();
        Ok(docs.remove(id).is_some())
    }
}

#[async_trait]
impl ChunkStore for InMemoryStore {
    async fn insert_many(&self, chunks: &[Chunk]) -> Result<()> {
        let mut stored = self.chunks.write().unwrap();
        stored.extend(chunks.iter().cloned());
        Ok(())
    }

    async fn get_many(&self, ids: &[String]) -> Result<Vec<HydratedChunk>> {
        let docs = self.docs.read().unwrap();
        let chunks = self.chunks.read().unwrap();

        let mut hydrated = Vec::with_capacity(ids.len());
        for id in ids {
            if let Some(chunk) = chunks.iter().find(|c| &c.id == id) {
                hydrated.push(HydratedChunk {
                    chunk: chunk.clone(),
                    document_title: docs.get(&chunk.document_id).map(|d| d.title.clone()),
                });
            }
        }
        Ok(hydrated)
    }

    async fn for_document(&self, document_id: &str) -> Result<Vec<Chunk>> {
        let chunks = self.chunks.read().unwrap();
        let mut owned: Vec<Chunk> = chunks
            .iter()
            .filter(|c| c.document_id == document_id)
            .cloned()
            .collect();
        owned.sort_by_key(|c| c.chunk_index);
        Ok(owned)
    }

    async fn delete_for_document(&self, document_id: &str) -> Result<u64> {
        let mut chunks = self.chunks.write().unwrap();
        let before = chunks.len();
        chunks.retain(|c| c.document_id != document_id);
        Ok((before - chunks.len()) as u64)
    }

    async fn orphaned(&self) -> Result<Vec<String>> {
        let docs = self.docs.read().unwrap();
        let chunks = self.chunks.read().unwrap();
        Ok(chunks
            .iter()
            .filter(|c| !docs.contains_key(&c.document_id))
            .map(|c| c.id.clone())
            .collect())
    }

    async fn delete_many(&self, ids: &[String]) -> Result<u64> {
        let mut chunks = self.chunks.write().unwrap();
        let before = chunks.len();
        chunks.retain(|c| !ids.contains(&c.id));
        Ok((before - chunks.len()) as u64)
    }
}
