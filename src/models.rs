//! Core data models for the ingestion and chat pipelines.
//!
//! A [`Document`] tracks an uploaded file through its lifecycle; its
//! [`Chunk`]s are the retrieval units produced by extraction. Chat output
//! types are included here because their shape is part of the API contract.

use std::collections::BTreeMap;
use std::fmt;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Kind of source a document was ingested from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceType {
    Pdf,
    Docx,
    Text,
    Transcript,
    Url,
}

impl SourceType {
    pub fn as_str(&self) -> &'static str {
        match self {
            SourceType::Pdf => "pdf",
            SourceType::Docx => "docx",
            SourceType::Text => "text",
            SourceType::Transcript => "transcript",
            SourceType::Url => "url",
        }
    }

    /// Parse a declared source type string.
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "pdf" => Some(SourceType::Pdf),
            "docx" => Some(SourceType::Docx),
            "text" => Some(SourceType::Text),
            "transcript" => Some(SourceType::Transcript),
            "url" => Some(SourceType::Url),
            _ => None,
        }
    }

    /// Derive a source type from a filename extension when the uploader
    /// did not declare one. Plain-text extensions map to `text`.
    pub fn from_filename(name: &str) -> Option<Self> {
        let ext = name.rsplit_once('.').map(|(_, e)| e.to_lowercase())?;
        match ext.as_str() {
            "pdf" => Some(SourceType::Pdf),
            "docx" => Some(SourceType::Docx),
            "txt" | "md" | "text" => Some(SourceType::Text),
            "vtt" | "srt" => Some(SourceType::Transcript),
            _ => None,
        }
    }
}

impl fmt::Display for SourceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Processing state of a document.
///
/// `Processing` is the initial state; `Ready` and `Error` are terminal and
/// are never left once entered. The only code path that writes a terminal
/// status is `DocumentStore::finish`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DocStatus {
    Processing,
    Ready,
    Error,
}

impl DocStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            DocStatus::Processing => "processing",
            DocStatus::Ready => "ready",
            DocStatus::Error => "error",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "processing" => Some(DocStatus::Processing),
            "ready" => Some(DocStatus::Ready),
            "error" => Some(DocStatus::Error),
            _ => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, DocStatus::Processing)
    }
}

impl fmt::Display for DocStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An uploaded document and its lifecycle status.
#[derive(Debug, Clone)]
pub struct Document {
    pub id: String,
    pub owner_id: String,
    pub title: String,
    pub original_filename: String,
    pub source_type: SourceType,
    /// 0 when the extractor did not report a page count.
    pub page_count: i64,
    pub metadata: BTreeMap<String, String>,
    pub tags: Vec<String>,
    /// Unix seconds.
    pub uploaded_at: i64,
    pub status: DocStatus,
}

impl Document {
    /// Create a fresh `processing` document for an upload.
    pub fn new(
        owner_id: &str,
        title: &str,
        original_filename: &str,
        source_type: SourceType,
    ) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            owner_id: owner_id.to_string(),
            title: title.to_string(),
            original_filename: original_filename.to_string(),
            source_type,
            page_count: 0,
            metadata: BTreeMap::new(),
            tags: Vec::new(),
            uploaded_at: Utc::now().timestamp(),
            status: DocStatus::Processing,
        }
    }
}

/// A fragment of a document's text, the unit of retrieval.
///
/// Chunks are created in bulk after a successful extraction call and never
/// mutated; they are destroyed only when the parent document is deleted.
#[derive(Debug, Clone)]
pub struct Chunk {
    pub id: String,
    pub document_id: String,
    pub text: String,
    pub embedding: Option<Vec<f32>>,
    pub page: Option<i64>,
    pub start_char: Option<i64>,
    pub end_char: Option<i64>,
    /// Ordinal position within the document, starting at 0.
    pub chunk_index: i64,
    /// Unix seconds.
    pub created_at: i64,
}

/// A source attribution shown alongside an answer.
///
/// `text` is a bounded display snippet, never the full chunk text.
#[derive(Debug, Clone, Serialize)]
pub struct SourceRef {
    pub id: String,
    pub title: String,
    pub text: String,
}

/// The chat pipeline's output: an answer plus the chunks that ground it.
#[derive(Debug, Clone, Serialize)]
pub struct ChatAnswer {
    pub answer: String,
    pub sources: Vec<SourceRef>,
    /// True when generation failed and `answer` is a context excerpt.
    pub degraded: bool,
}
