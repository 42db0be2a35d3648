//! Vector index service client.
//!
//! Two operations against the external index: registering chunk vectors
//! after ingestion and searching for the top-k most relevant chunks for a
//! query. Registration is fire-and-forget from a consistency standpoint:
//! the index is trusted to eventually reflect it; nothing reads it back to
//! verify. Search results come back in the index's own relevance order and
//! are never re-sorted here.

use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use serde::Serialize;

use crate::config::ServicesConfig;
use crate::error::{IndexFailure, SearchFailure};

/// A chunk id + embedding pair to register.
#[derive(Debug, Clone, Serialize)]
pub struct IndexEntry {
    pub id: String,
    pub embedding: Vec<f32>,
}

/// One search result; the index orders hits by descending relevance.
#[derive(Debug, Clone, PartialEq)]
pub struct SearchHit {
    pub chunk_id: String,
    pub score: f64,
}

#[async_trait]
pub trait VectorIndex: Send + Sync {
    async fn register(&self, entries: &[IndexEntry]) -> Result<(), IndexFailure>;

    async fn search(&self, query: &str, top_k: i64) -> Result<Vec<SearchHit>, SearchFailure>;
}

/// HTTP client for `POST {index_url}/add_chunks` and `POST {index_url}/search`.
pub struct HttpVectorIndex {
    client: reqwest::Client,
    base_url: String,
}

impl HttpVectorIndex {
    pub fn new(services: &ServicesConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(services.timeout_secs))
            .build()?;

        Ok(Self {
            client,
            base_url: services.index_url.trim_end_matches('/').to_string(),
        })
    }
}

#[async_trait]
impl VectorIndex for HttpVectorIndex {
    async fn register(&self, entries: &[IndexEntry]) -> Result<(), IndexFailure> {
        let resp = self
            .client
            .post(format!("{}/add_chunks", self.base_url))
            .json(entries)
            .send()
            .await
            .map_err(|e| IndexFailure(e.to_string()))?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(IndexFailure(format!("HTTP {}: {}", status, body)));
        }

        Ok(())
    }

    async fn search(&self, query: &str, top_k: i64) -> Result<Vec<SearchHit>, SearchFailure> {
        let body = serde_json::json!({ "query": query, "top_k": top_k });

        let resp = self
            .client
            .post(format!("{}/search", self.base_url))
            .json(&body)
            .send()
            .await
            .map_err(|e| SearchFailure(e.to_string()))?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(SearchFailure(format!("HTTP {}: {}", status, body)));
        }

        let json: serde_json::Value = resp
            .json()
            .await
            .map_err(|e| SearchFailure(format!("invalid response body: {}", e)))?;

        parse_search_response(&json)
    }
}

/// Parse `{ "results": [{ "chunkId", "score" }] }`, preserving order.
fn parse_search_response(json: &serde_json::Value) -> Result<Vec<SearchHit>, SearchFailure> {
    let results = json
        .get("results")
        .and_then(|r| r.as_array())
        .ok_or_else(|| SearchFailure("missing results array".to_string()))?;

    let mut hits = Vec::with_capacity(results.len());

    for item in results {
        let chunk_id = item
            .get("chunkId")
            .and_then(|c| c.as_str())
            .ok_or_else(|| SearchFailure("result without chunkId".to_string()))?;
        let score = item.get("score").and_then(|s| s.as_f64()).unwrap_or(0.0);

        hits.push(SearchHit {
            chunk_id: chunk_id.to_string(),
            score,
        });
    }

    Ok(hits)
}
