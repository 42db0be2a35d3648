//! End-to-end tests for the ingestion and chat pipelines, run against the
//! in-memory store and fake service clients. No network, no database file.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;

use docchat::chat::{ChatParams, ChatPipeline};
use docchat::completion::CompletionProvider;
use docchat::error::{
    ChatError, CompletionFailure, ExtractionFailure, IndexFailure, SearchFailure,
};
use docchat::extraction::{ExtractedChunk, Extractor};
use docchat::ingest::{IngestPipeline, UploadRequest};
use docchat::models::{Chunk, DocStatus, Document, SourceType};
use docchat::store::memory::InMemoryStore;
use docchat::store::{ChunkStore, DocumentStore};
use docchat::vector_index::{IndexEntry, SearchHit, VectorIndex};

// ============ Fake clients ============

struct FakeExtractor {
    fragments: Vec<ExtractedChunk>,
    fail: bool,
}

impl FakeExtractor {
    fn returning(texts: &[&str]) -> Self {
        Self {
            fragments: texts
                .iter()
                .map(|t| ExtractedChunk {
                    text: t.to_string(),
                    embedding: Some(vec![0.1, 0.2, 0.3]),
                })
                .collect(),
            fail: false,
        }
    }

    fn failing() -> Self {
        Self {
            fragments: Vec::new(),
            fail: true,
        }
    }
}

#[async_trait]
impl Extractor for FakeExtractor {
    async fn extract(
        &self,
        _file: Vec<u8>,
        _filename: &str,
        _doc_id: &str,
        _source_type: SourceType,
    ) -> Result<Vec<ExtractedChunk>, ExtractionFailure> {
        if self.fail {
            return Err(ExtractionFailure("connection refused".to_string()));
        }
        Ok(self.fragments.clone())
    }
}

#[derive(Default)]
struct FakeIndex {
    fail_register: bool,
    fail_search: bool,
    hits: Vec<SearchHit>,
    registered: Mutex<Vec<IndexEntry>>,
    search_calls: AtomicUsize,
}

impl FakeIndex {
    fn with_hits(hits: Vec<SearchHit>) -> Self {
        Self {
            hits,
            ..Default::default()
        }
    }
}

#[async_trait]
impl VectorIndex for FakeIndex {
    async fn register(&self, entries: &[IndexEntry]) -> Result<(), IndexFailure> {
        if self.fail_register {
            return Err(IndexFailure("index unavailable".to_string()));
        }
        self.registered.lock().unwrap().extend_from_slice(entries);
        Ok(())
    }

    async fn search(&self, _query: &str, top_k: i64) -> Result<Vec<SearchHit>, SearchFailure> {
        self.search_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_search {
            return Err(SearchFailure("index unavailable".to_string()));
        }
        let mut hits = self.hits.clone();
        hits.truncate(top_k as usize);
        Ok(hits)
    }
}

#[derive(Default)]
struct FakeCompletion {
    fail: bool,
    reply: String,
    seen_keys: Mutex<Vec<String>>,
    seen_prompts: Mutex<Vec<String>>,
}

impl FakeCompletion {
    fn replying(reply: &str) -> Self {
        Self {
            reply: reply.to_string(),
            ..Default::default()
        }
    }

    fn failing() -> Self {
        Self {
            fail: true,
            ..Default::default()
        }
    }
}

#[async_trait]
impl CompletionProvider for FakeCompletion {
    async fn complete(
        &self,
        _system: &str,
        user: &str,
        api_key: &str,
    ) -> Result<String, CompletionFailure> {
        self.seen_keys.lock().unwrap().push(api_key.to_string());
        self.seen_prompts.lock().unwrap().push(user.to_string());
        if self.fail {
            return Err(CompletionFailure("invalid api key".to_string()));
        }
        Ok(self.reply.clone())
    }
}

// ============ Harness ============

fn hit(id: &str, score: f64) -> SearchHit {
    SearchHit {
        chunk_id: id.to_string(),
        score,
    }
}

fn upload(filename: &str) -> UploadRequest {
    UploadRequest {
        owner_id: "u1".to_string(),
        file: b"file bytes".to_vec(),
        filename: filename.to_string(),
        title: None,
        source_type: None,
    }
}

fn ingest_pipeline(
    store: &Arc<InMemoryStore>,
    extractor: FakeExtractor,
    index: FakeIndex,
) -> (IngestPipeline, Arc<FakeIndex>) {
    let index = Arc::new(index);
    let pipeline = IngestPipeline::new(
        store.clone(),
        store.clone(),
        Arc::new(extractor),
        index.clone(),
    );
    (pipeline, index)
}

fn chat_params() -> ChatParams {
    ChatParams {
        top_k: 5,
        snippet_chars: 50,
        degraded_excerpt_chars: 500,
        fallback_api_key: None,
    }
}

fn chat_pipeline(
    store: &Arc<InMemoryStore>,
    index: FakeIndex,
    completion: FakeCompletion,
    params: ChatParams,
) -> (ChatPipeline, Arc<FakeIndex>, Arc<FakeCompletion>) {
    let index = Arc::new(index);
    let completion = Arc::new(completion);
    let pipeline = ChatPipeline::new(store.clone(), index.clone(), completion.clone(), params);
    (pipeline, index, completion)
}

/// Seed a ready document with chunks c0..cN directly into the store.
async fn seed_document(store: &Arc<InMemoryStore>, title: &str, chunk_ids: &[(&str, &str)]) -> String {
    let mut doc = Document::new("u1", title, "seed.txt", SourceType::Text);
    doc.status = DocStatus::Ready;
    let doc_id = doc.id.clone();
    DocumentStore::insert(store.as_ref(), &doc).await.unwrap();

    let chunks: Vec<Chunk> = chunk_ids
        .iter()
        .enumerate()
        .map(|(i, (id, text))| Chunk {
            id: id.to_string(),
            document_id: doc_id.clone(),
            text: text.to_string(),
            embedding: Some(vec![0.5; 3]),
            page: None,
            start_char: None,
            end_char: None,
            chunk_index: i as i64,
            created_at: 0,
        })
        .collect();
    ChunkStore::insert_many(store.as_ref(), &chunks)
        .await
        .unwrap();

    doc_id
}

// ============ Ingestion ============

#[tokio::test]
async fn test_accept_creates_processing_record_before_any_external_call() {
    let store = Arc::new(InMemoryStore::new());
    let (pipeline, _) = ingest_pipeline(&store, FakeExtractor::failing(), FakeIndex::default());

    let doc = pipeline.accept(&upload("notes.txt")).await.unwrap();

    let stored = DocumentStore::get(store.as_ref(), &doc.id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(stored.status, DocStatus::Processing);
    assert_eq!(stored.title, "notes.txt");
}

#[tokio::test]
async fn test_empty_file_rejected_without_creating_document() {
    let store = Arc::new(InMemoryStore::new());
    let (pipeline, _) = ingest_pipeline(
        &store,
        FakeExtractor::returning(&["a"]),
        FakeIndex::default(),
    );

    let mut req = upload("notes.txt");
    req.file.clear();
    assert!(pipeline.accept(&req).await.is_err());
    assert!(DocumentStore::list(store.as_ref(), "u1")
        .await
        .unwrap()
        .is_empty());
}

#[tokio::test]
async fn test_unknown_extension_rejected_without_creating_document() {
    let store = Arc::new(InMemoryStore::new());
    let (pipeline, _) = ingest_pipeline(
        &store,
        FakeExtractor::returning(&["a"]),
        FakeIndex::default(),
    );

    assert!(pipeline.accept(&upload("binary.exe")).await.is_err());
    assert!(DocumentStore::list(store.as_ref(), "u1")
        .await
        .unwrap()
        .is_empty());
}

#[tokio::test]
async fn test_successful_ingest_reaches_ready_with_ordered_chunks() {
    let store = Arc::new(InMemoryStore::new());
    let (pipeline, index) = ingest_pipeline(
        &store,
        FakeExtractor::returning(&["page one", "page two", "page three"]),
        FakeIndex::default(),
    );

    let (doc, status) = pipeline.run(upload("report.pdf")).await.unwrap();
    assert_eq!(status, DocStatus::Ready);

    let stored = DocumentStore::get(store.as_ref(), &doc.id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(stored.status, DocStatus::Ready);

    let chunks = ChunkStore::for_document(store.as_ref(), &doc.id)
        .await
        .unwrap();
    assert_eq!(chunks.len(), 3);
    let texts: Vec<&str> = chunks.iter().map(|c| c.text.as_str()).collect();
    assert_eq!(texts, vec!["page one", "page two", "page three"]);
    for (i, chunk) in chunks.iter().enumerate() {
        assert_eq!(chunk.chunk_index, i as i64);
    }

    // Every chunk's vector was registered with the index
    assert_eq!(index.registered.lock().unwrap().len(), 3);
}

#[tokio::test]
async fn test_extraction_failure_marks_error_and_persists_no_chunks() {
    let store = Arc::new(InMemoryStore::new());
    let (pipeline, index) = ingest_pipeline(&store, FakeExtractor::failing(), FakeIndex::default());

    let (doc, status) = pipeline.run(upload("report.pdf")).await.unwrap();
    assert_eq!(status, DocStatus::Error);

    let stored = DocumentStore::get(store.as_ref(), &doc.id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(stored.status, DocStatus::Error);
    assert!(ChunkStore::for_document(store.as_ref(), &doc.id)
        .await
        .unwrap()
        .is_empty());
    assert!(index.registered.lock().unwrap().is_empty());
}

#[tokio::test]
async fn test_index_failure_marks_error_but_keeps_chunks() {
    let store = Arc::new(InMemoryStore::new());
    let (pipeline, _) = ingest_pipeline(
        &store,
        FakeExtractor::returning(&["alpha", "beta"]),
        FakeIndex {
            fail_register: true,
            ..Default::default()
        },
    );

    let (doc, status) = pipeline.run(upload("report.pdf")).await.unwrap();
    assert_eq!(status, DocStatus::Error);

    // Persisted chunks are not rolled back; they go away with the document.
    let chunks = ChunkStore::for_document(store.as_ref(), &doc.id)
        .await
        .unwrap();
    assert_eq!(chunks.len(), 2);
}

#[tokio::test]
async fn test_terminal_status_is_never_overwritten() {
    let store = Arc::new(InMemoryStore::new());
    let doc = Document::new("u1", "t", "t.txt", SourceType::Text);
    DocumentStore::insert(store.as_ref(), &doc).await.unwrap();

    assert!(DocumentStore::finish(store.as_ref(), &doc.id, DocStatus::Ready)
        .await
        .unwrap());
    assert!(!DocumentStore::finish(store.as_ref(), &doc.id, DocStatus::Error)
        .await
        .unwrap());

    let stored = DocumentStore::get(store.as_ref(), &doc.id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(stored.status, DocStatus::Ready);
}

#[tokio::test]
async fn test_finish_rejects_non_terminal_status() {
    let store = Arc::new(InMemoryStore::new());
    let doc = Document::new("u1", "t", "t.txt", SourceType::Text);
    DocumentStore::insert(store.as_ref(), &doc).await.unwrap();

    assert!(
        DocumentStore::finish(store.as_ref(), &doc.id, DocStatus::Processing)
            .await
            .is_err()
    );
}

#[tokio::test]
async fn test_delete_cascades_to_chunks() {
    let store = Arc::new(InMemoryStore::new());
    let (pipeline, _) = ingest_pipeline(
        &store,
        FakeExtractor::returning(&["a", "b"]),
        FakeIndex::default(),
    );

    let (doc, _) = pipeline.run(upload("report.pdf")).await.unwrap();
    assert!(pipeline.delete_document(&doc.id).await.unwrap());

    assert!(DocumentStore::get(store.as_ref(), &doc.id)
        .await
        .unwrap()
        .is_none());
    assert!(ChunkStore::for_document(store.as_ref(), &doc.id)
        .await
        .unwrap()
        .is_empty());
    assert!(ChunkStore::orphaned(store.as_ref()).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_delete_missing_document_returns_false() {
    let store = Arc::new(InMemoryStore::new());
    let (pipeline, _) = ingest_pipeline(
        &store,
        FakeExtractor::returning(&["a"]),
        FakeIndex::default(),
    );

    assert!(!pipeline.delete_document("no-such-id").await.unwrap());
}

// ============ Chat ============

#[tokio::test]
async fn test_chat_empty_query_rejected() {
    let store = Arc::new(InMemoryStore::new());
    let (pipeline, index, _) = chat_pipeline(
        &store,
        FakeIndex::default(),
        FakeCompletion::replying("hi"),
        chat_params(),
    );

    let err = pipeline.answer("   \n", Some("key")).await.unwrap_err();
    assert!(matches!(err, ChatError::EmptyQuery));
    assert_eq!(index.search_calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_chat_missing_credential_skips_search() {
    let store = Arc::new(InMemoryStore::new());
    let (pipeline, index, _) = chat_pipeline(
        &store,
        FakeIndex::with_hits(vec![hit("c1", 0.9)]),
        FakeCompletion::replying("hi"),
        chat_params(),
    );

    let err = pipeline.answer("What is X?", None).await.unwrap_err();
    assert!(matches!(err, ChatError::MissingCredential));
    assert_eq!(index.search_calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_chat_user_key_takes_precedence_over_fallback() {
    let store = Arc::new(InMemoryStore::new());
    seed_document(&store, "Doc", &[("c1", "text one")]).await;

    let mut params = chat_params();
    params.fallback_api_key = Some("server-key".to_string());
    let (pipeline, _, completion) = chat_pipeline(
        &store,
        FakeIndex::with_hits(vec![hit("c1", 0.9)]),
        FakeCompletion::replying("answer"),
        params,
    );

    pipeline.answer("q", Some("user-key")).await.unwrap();
    pipeline.answer("q", None).await.unwrap();

    let keys = completion.seen_keys.lock().unwrap();
    assert_eq!(keys.as_slice(), ["user-key", "server-key"]);
}

#[tokio::test]
async fn test_chat_search_failure_is_surfaced() {
    let store = Arc::new(InMemoryStore::new());
    let (pipeline, _, _) = chat_pipeline(
        &store,
        FakeIndex {
            fail_search: true,
            ..Default::default()
        },
        FakeCompletion::replying("hi"),
        chat_params(),
    );

    let err = pipeline.answer("What is X?", Some("key")).await.unwrap_err();
    assert!(matches!(err, ChatError::Search(_)));
}

#[tokio::test]
async fn test_chat_context_and_sources_preserve_relevance_order() {
    let store = Arc::new(InMemoryStore::new());
    seed_document(
        &store,
        "Manual",
        &[("c1", "first chunk"), ("c2", "second chunk"), ("c3", "third chunk")],
    )
    .await;

    // Search returns c1, c3, c2 by descending score
    let (pipeline, _, completion) = chat_pipeline(
        &store,
        FakeIndex::with_hits(vec![hit("c1", 0.9), hit("c3", 0.7), hit("c2", 0.5)]),
        FakeCompletion::replying("generated answer"),
        chat_params(),
    );

    let result = pipeline.answer("What is X?", Some("key")).await.unwrap();

    let ids: Vec<&str> = result.sources.iter().map(|s| s.id.as_str()).collect();
    assert_eq!(ids, vec!["c1", "c3", "c2"]);
    assert!(result.sources.len() <= 5);
    assert!(!result.degraded);
    assert_eq!(result.answer, "generated answer");

    // The prompt context lists the chunks in the same order
    let prompts = completion.seen_prompts.lock().unwrap();
    let prompt = &prompts[0];
    let p1 = prompt.find("first chunk").unwrap();
    let p3 = prompt.find("third chunk").unwrap();
    let p2 = prompt.find("second chunk").unwrap();
    assert!(p1 < p3 && p3 < p2);
    assert!(prompt.contains("Source: Manual"));
    assert!(prompt.contains("Question: What is X?"));
}

#[tokio::test]
async fn test_chat_sources_capped_at_top_k() {
    let store = Arc::new(InMemoryStore::new());
    let ids: Vec<String> = (0..8).map(|i| format!("c{}", i)).collect();
    let pairs: Vec<(&str, &str)> = ids.iter().map(|id| (id.as_str(), "text")).collect();
    seed_document(&store, "Doc", &pairs).await;

    let hits: Vec<SearchHit> = ids
        .iter()
        .enumerate()
        .map(|(i, id)| hit(id, 1.0 - i as f64 * 0.1))
        .collect();

    let (pipeline, _, _) = chat_pipeline(
        &store,
        FakeIndex::with_hits(hits),
        FakeCompletion::replying("ok"),
        chat_params(),
    );

    let result = pipeline.answer("q", Some("key")).await.unwrap();
    assert_eq!(result.sources.len(), 5);
}

#[tokio::test]
async fn test_chat_completion_failure_degrades_with_sources() {
    let store = Arc::new(InMemoryStore::new());
    seed_document(&store, "Evidence", &[("c1", "the relevant passage")]).await;

    let (pipeline, _, _) = chat_pipeline(
        &store,
        FakeIndex::with_hits(vec![hit("c1", 0.9)]),
        FakeCompletion::failing(),
        chat_params(),
    );

    let result = pipeline.answer("What is X?", Some("bad-key")).await.unwrap();

    assert!(result.degraded);
    assert!(!result.answer.is_empty());
    assert!(result.answer.contains("the relevant passage"));
    assert!(result.answer.contains("generation failed"));
    assert_eq!(result.sources.len(), 1);
    assert_eq!(result.sources[0].title, "Evidence");
}

#[tokio::test]
async fn test_chat_missing_parent_labeled_unknown_document() {
    let store = Arc::new(InMemoryStore::new());

    // A chunk whose parent document was never stored
    let chunk = Chunk {
        id: "orphan".to_string(),
        document_id: "gone".to_string(),
        text: "orphaned evidence".to_string(),
        embedding: None,
        page: None,
        start_char: None,
        end_char: None,
        chunk_index: 0,
        created_at: 0,
    };
    ChunkStore::insert_many(store.as_ref(), &[chunk]).await.unwrap();

    let (pipeline, _, completion) = chat_pipeline(
        &store,
        FakeIndex::with_hits(vec![hit("orphan", 0.9)]),
        FakeCompletion::replying("ok"),
        chat_params(),
    );

    let result = pipeline.answer("q", Some("key")).await.unwrap();
    assert_eq!(result.sources[0].title, "Unknown Document");

    // The orphaned chunk still appears in the generation context
    let prompts = completion.seen_prompts.lock().unwrap();
    assert!(prompts[0].contains("Source: Unknown Document\norphaned evidence"));
}

#[tokio::test]
async fn test_chat_snippet_is_bounded_but_prompt_gets_full_text() {
    let store = Arc::new(InMemoryStore::new());
    let long_text = "word ".repeat(100);
    seed_document(&store, "Doc", &[("c1", long_text.as_str())]).await;

    let (pipeline, _, completion) = chat_pipeline(
        &store,
        FakeIndex::with_hits(vec![hit("c1", 0.9)]),
        FakeCompletion::replying("ok"),
        chat_params(),
    );

    let result = pipeline.answer("q", Some("key")).await.unwrap();

    // Display snippet is truncated; prompt context carries the full chunk
    assert!(result.sources[0].text.chars().count() <= 53);
    let prompts = completion.seen_prompts.lock().unwrap();
    assert!(prompts[0].contains(long_text.trim_end()));
}
