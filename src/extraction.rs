//! Extraction service client.
//!
//! Ships raw file bytes to the external extraction/embedding service and
//! returns ordered text+vector fragments. File content always travels over
//! the wire: the service may run as a separate process with no shared
//! filesystem, so a path would be meaningless to it.
//!
//! Exactly one attempt per call: failures are terminal and handled by the
//! ingestion pipeline, not retried here.

use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use reqwest::multipart;

use crate::config::ServicesConfig;
use crate::error::ExtractionFailure;
use crate::models::SourceType;

/// One extracted fragment, in document order.
#[derive(Debug, Clone)]
pub struct ExtractedChunk {
    pub text: String,
    pub embedding: Option<Vec<f32>>,
}

/// Turns raw file bytes into ordered text+vector fragments.
#[async_trait]
pub trait Extractor: Send + Sync {
    async fn extract(
        &self,
        file: Vec<u8>,
        filename: &str,
        doc_id: &str,
        source_type: SourceType,
    ) -> Result<Vec<ExtractedChunk>, ExtractionFailure>;
}

/// HTTP client for `POST {extraction_url}/extract`.
pub struct HttpExtractor {
    client: reqwest::Client,
    base_url: String,
}

impl HttpExtractor {
    pub fn new(services: &ServicesConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(services.timeout_secs))
            .build()?;

        Ok(Self {
            client,
            base_url: services.extraction_url.trim_end_matches('/').to_string(),
        })
    }
}

#[async_trait]
impl Extractor for HttpExtractor {
    async fn extract(
        &self,
        file: Vec<u8>,
        filename: &str,
        doc_id: &str,
        source_type: SourceType,
    ) -> Result<Vec<ExtractedChunk>, ExtractionFailure> {
        let part = multipart::Part::bytes(file).file_name(filename.to_string());
        let form = multipart::Form::new()
            .part("file", part)
            .text("doc_id", doc_id.to_string())
            .text("source_type", source_type.as_str());

        let resp = self
            .client
            .post(format!("{}/extract", self.base_url))
            .multipart(form)
            .send()
            .await
            .map_err(|e| ExtractionFailure(e.to_string()))?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(ExtractionFailure(format!("HTTP {}: {}", status, body)));
        }

        let json: serde_json::Value = resp
            .json()
            .await
            .map_err(|e| ExtractionFailure(format!("invalid response body: {}", e)))?;

        parse_extract_response(&json)
    }
}

/// Parse `{ "chunks": [{ "text", "embedding" }] }`, preserving order.
fn parse_extract_response(json: &serde_json::Value) -> Result<Vec<ExtractedChunk>, ExtractionFailure> {
    let chunks = json
        .get("chunks")
        .and_then(|c| c.as_array())
        .ok_or_else(|| ExtractionFailure("missing chunks array".to_string()))?;

    let mut fragments = Vec::with_capacity(chunks.len());

    for item in chunks {
        let text = item
            .get("text")
            .and_then(|t| t.as_str())
            .ok_or_else(|| ExtractionFailure("chunk without text".to_string()))?;

        let embedding = match item.get("embedding") {
            Some(serde_json::Value::Array(values)) => Some(
                values
                    .iter()
                    .map(|v| v.as_f64().unwrap_or(0.0) as f32)
                    .collect(),
            ),
            Some(serde_json::Value::Null) | None => None,
            Some(_) => return Err(ExtractionFailure("embedding is not an array".to_string())),
        };

        fragments.push(ExtractedChunk {
            text: text.to_string(),
            embedding,
        });
    }

    Ok(fragments)
}
