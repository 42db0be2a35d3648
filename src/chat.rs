//! Retrieval-augmented chat pipeline.
//!
//! Turns a user query into a grounded answer with cited sources: search the
//! vector index, hydrate the hits from the chunk store, assemble a labeled
//! context, and generate. A search failure is surfaced (with no context
//! there is nothing to answer from), but a completion failure degrades to a
//! context excerpt, because retrieval already succeeded and that partial
//! result has value.

use std::sync::Arc;

use crate::completion::CompletionProvider;
use crate::config::Config;
use crate::error::ChatError;
use crate::models::{ChatAnswer, SourceRef};
use crate::store::{ChunkStore, HydratedChunk};
use crate::vector_index::VectorIndex;

/// Grounding instruction sent with every completion request.
pub const SYSTEM_PROMPT: &str = "You are a helpful assistant. Answer questions based only on \
    the provided context. If the answer is not in the context, say \"I don't know\".";

/// Label used when a chunk's parent document no longer exists. Such chunks
/// stay in the context: dropping them would look like a search miss instead
/// of the data inconsistency it actually is.
pub const UNKNOWN_DOCUMENT: &str = "Unknown Document";

const CONTEXT_SEPARATOR: &str = "\n\n---\n\n";

/// Retrieval and presentation tuning, decoupled from the full config.
#[derive(Debug, Clone)]
pub struct ChatParams {
    pub top_k: i64,
    pub snippet_chars: usize,
    pub degraded_excerpt_chars: usize,
    /// Server-wide fallback credential; a per-request key always wins.
    pub fallback_api_key: Option<String>,
}

impl ChatParams {
    pub fn from_config(config: &Config) -> Self {
        Self {
            top_k: config.retrieval.top_k,
            snippet_chars: config.retrieval.snippet_chars,
            degraded_excerpt_chars: config.retrieval.degraded_excerpt_chars,
            fallback_api_key: config.services.completion_api_key.clone(),
        }
    }
}

pub struct ChatPipeline {
    chunks: Arc<dyn ChunkStore>,
    index: Arc<dyn VectorIndex>,
    completion: Arc<dyn CompletionProvider>,
    params: ChatParams,
}

impl ChatPipeline {
    pub fn new(
        chunks: Arc<dyn ChunkStore>,
        index: Arc<dyn VectorIndex>,
        completion: Arc<dyn CompletionProvider>,
        params: ChatParams,
    ) -> Self {
        Self {
            chunks,
            index,
            completion,
            params,
        }
    }

    /// Answer a query from the indexed documents.
    ///
    /// `user_api_key` is the per-request credential; it takes precedence
    /// over the configured fallback. With neither present the query is
    /// rejected before any search call; there is no value in partial work
    /// for chat.
    pub async fn answer(
        &self,
        query: &str,
        user_api_key: Option<&str>,
    ) -> Result<ChatAnswer, ChatError> {
        if query.trim().is_empty() {
            return Err(ChatError::EmptyQuery);
        }

        let api_key = effective_key(user_api_key, self.params.fallback_api_key.as_deref())
            .ok_or(ChatError::MissingCredential)?;

        let hits = self.index.search(query, self.params.top_k).await?;

        let ids: Vec<String> = hits.into_iter().map(|h| h.chunk_id).collect();
        let hydrated = self.chunks.get_many(&ids).await?;

        let context = build_context(&hydrated);
        let user_prompt = format!("Context:\n{}\n\nQuestion: {}", context, query);

        let (answer, degraded) = match self
            .completion
            .complete(SYSTEM_PROMPT, &user_prompt, &api_key)
            .await
        {
            Ok(text) => (text, false),
            Err(e) => {
                tracing::warn!(error = %e, "completion failed, answering from retrieved context");
                (
                    degraded_answer(&context, self.params.degraded_excerpt_chars),
                    true,
                )
            }
        };

        let sources = hydrated
            .iter()
            .map(|h| SourceRef {
                id: h.chunk.id.clone(),
                title: h
                    .document_title
                    .clone()
                    .unwrap_or_else(|| UNKNOWN_DOCUMENT.to_string()),
                text: snippet(&h.chunk.text, self.params.snippet_chars),
            })
            .collect();

        Ok(ChatAnswer {
            answer,
            sources,
            degraded,
        })
    }
}

/// Per-request key over configured fallback; blank keys count as absent.
fn effective_key(user: Option<&str>, fallback: Option<&str>) -> Option<String> {
    user.map(str::trim)
        .filter(|k| !k.is_empty())
        .or_else(|| fallback.map(str::trim).filter(|k| !k.is_empty()))
        .map(str::to_string)
}

/// Concatenate labeled source blocks in relevance order. Full chunk text
/// goes into the context; display truncation never applies here.
fn build_context(chunks: &[HydratedChunk]) -> String {
    chunks
        .iter()
        .map(|h| {
            format!(
                "Source: {}\n{}",
                h.document_title.as_deref().unwrap_or(UNKNOWN_DOCUMENT),
                h.chunk.text
            )
        })
        .collect::<Vec<_>>()
        .join(CONTEXT_SEPARATOR)
}

fn degraded_answer(context: &str, max_chars: usize) -> String {
    format!(
        "Based on your documents:\n\n{}...\n\n(Answer generation failed. \
         Check your API key or try again.)",
        truncate_chars(context, max_chars)
    )
}

fn snippet(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        text.to_string()
    } else {
        format!("{}...", truncate_chars(text, max_chars))
    }
}

/// Truncate to at most `max` characters on a char boundary.
fn truncate_chars(s: &str, max: usize) -> &str {
    match s.char_indices().nth(max) {
        Some((idx, _)) => &s[..idx],
        None => s,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Chunk;

    fn hydrated(id: &str, title: Option<&str>, text: &str) -> HydratedChunk {
        HydratedChunk {
            chunk: Chunk {
                id: id.to_string(),
                document_id: "d1".to_string(),
                text: text.to_string(),
                embedding: None,
                page: None,
                start_char: None,
                end_char: None,
                chunk_index: 0,
                created_at: 0,
            },
            document_title: title.map(str::to_string),
        }
    }

    #[test]
    fn test_effective_key_prefers_user_key() {
        assert_eq!(
            effective_key(Some("user-key"), Some("server-key")),
            Some("user-key".to_string())
        );
    }

    #[test]
    fn test_effective_key_falls_back() {
        assert_eq!(
            effective_key(None, Some("server-key")),
            Some("server-key".to_string())
        );
        assert_eq!(
            effective_key(Some("   "), Some("server-key")),
            Some("server-key".to_string())
        );
    }

    #[test]
    fn test_effective_key_none_when_absent() {
        assert_eq!(effective_key(None, None), None);
        assert_eq!(effective_key(Some(""), Some("  ")), None);
    }

    #[test]
    fn test_build_context_preserves_order_and_labels() {
        let chunks = vec![
            hydrated("c1", Some("Alpha"), "first text"),
            hydrated("c3", Some("Beta"), "third text"),
            hydrated("c2", None, "second text"),
        ];
        let context = build_context(&chunks);

        let first = context.find("Source: Alpha\nfirst text").unwrap();
        let second = context.find("Source: Beta\nthird text").unwrap();
        let third = context.find("Source: Unknown Document\nsecond text").unwrap();
        assert!(first < second && second < third);
        assert_eq!(context.matches("\n\n---\n\n").count(), 2);
    }

    #[test]
    fn test_build_context_empty() {
        assert_eq!(build_context(&[]), "");
    }

    #[test]
    fn test_snippet_short_text_untouched() {
        assert_eq!(snippet("short", 50), "short");
    }

    #[test]
    fn test_snippet_truncates_with_ellipsis() {
        let s = snippet("abcdefghij", 4);
        assert_eq!(s, "abcd...");
    }

    #[test]
    fn test_snippet_multibyte_boundary() {
        // Must not panic on a char boundary inside a multibyte sequence
        let s = snippet("héllo wörld ünïcode", 6);
        assert_eq!(s, "héllo ...");
    }

    #[test]
    fn test_degraded_answer_contains_excerpt_and_note() {
        let context = "Source: Doc\nsome retrieved evidence";
        let answer = degraded_answer(context, 500);
        assert!(answer.contains("some retrieved evidence"));
        assert!(answer.contains("generation failed"));
    }

    #[test]
    fn test_degraded_answer_bounded() {
        let context = "x".repeat(2000);
        let answer = degraded_answer(&context, 500);
        assert!(answer.len() < 700);
    }
}
