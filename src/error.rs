//! Error taxonomy for the ingestion and chat pipelines.
//!
//! Dependency failures are typed per external service so orchestrators can
//! apply the right recovery policy: ingestion converts them into a terminal
//! `error` status, chat either surfaces them ([`SearchFailure`]) or degrades
//! ([`CompletionFailure`]). None of these may leak to the transport layer as
//! a panic or unhandled error.

use thiserror::Error;

/// The extraction service call failed (network, non-success status, or
/// malformed payload). Single attempt; retry policy is deliberately absent.
#[derive(Debug, Error)]
#[error("extraction service: {0}")]
pub struct ExtractionFailure(pub String);

/// Registering chunk vectors with the index service failed.
#[derive(Debug, Error)]
#[error("index service: {0}")]
pub struct IndexFailure(pub String);

/// The index search call failed. Unrecoverable for a chat turn: with no
/// retrieved context there is nothing to answer from.
#[derive(Debug, Error)]
#[error("index search: {0}")]
pub struct SearchFailure(pub String);

/// The completion provider failed (bad credential, provider error, timeout).
/// The chat pipeline never surfaces this to the caller; it answers with the
/// retrieved context instead.
#[derive(Debug, Error)]
#[error("completion service: {0}")]
pub struct CompletionFailure(pub String);

/// Upload rejections raised before ingestion mutates any state.
#[derive(Debug, Error)]
pub enum IngestError {
    #[error("no file content supplied")]
    EmptyFile,

    #[error("unsupported source type for '{0}'")]
    UnknownSourceType(String),

    #[error("{0}")]
    Store(#[from] anyhow::Error),
}

/// Failures of the chat pipeline that reach the caller.
#[derive(Debug, Error)]
pub enum ChatError {
    #[error("query must not be empty")]
    EmptyQuery,

    #[error("no model API key available; supply one per request or configure a server default")]
    MissingCredential,

    #[error(transparent)]
    Search(#[from] SearchFailure),

    #[error("{0}")]
    Store(#[from] anyhow::Error),
}
