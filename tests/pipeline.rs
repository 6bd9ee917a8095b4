//! End-to-end pipeline tests against a temporary SQLite database, with
//! deterministic stand-ins for the embedding and chat providers.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use tempfile::TempDir;

use studystack::answer::{ChatEngine, SendOptions};
use studystack::blob::{BlobStore, LocalBlobStore};
use studystack::chunker::chunk_id;
use studystack::config::{
    ChunkingConfig, IngestConfig, LlmConfig, RetrievalConfig, SummarizeConfig, TopicsConfig,
};
use studystack::db;
use studystack::embedding::Embedder;
use studystack::ingest::IngestCoordinator;
use studystack::llm::{ChatModel, CompletionRequest, TokenStream};
use studystack::migrate;
use studystack::models::{ChunkMetadata, ProcessingStatus, Role, VectorRecord};
use studystack::retrieval::RetrievalEngine;
use studystack::store::{LockAcquisition, Store};
use studystack::summarize::Summarizer;
use studystack::topics::{LabelCache, TopicClassifier, UPLOADED_TAG};
use studystack::vector_index::{SqliteVectorIndex, VectorIndex};

// ============ Test doubles ============

/// Deterministic embedder: "alpha" texts map near one axis, "beta" texts
/// near the other, everything else in between. Counts embed calls so tests
/// can assert on idempotence.
struct StubEmbedder {
    calls: AtomicUsize,
}

impl StubEmbedder {
    fn new() -> Self {
        Self {
            calls: AtomicUsize::new(0),
        }
    }

    fn vector_for(text: &str) -> Vec<f32> {
        if text.contains("alpha") {
            vec![1.0, 0.05]
        } else if text.contains("beta") {
            vec![0.05, 1.0]
        } else {
            vec![0.7, 0.7]
        }
    }
}

#[async_trait]
impl Embedder for StubEmbedder {
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(texts.iter().map(|t| Self::vector_for(t)).collect())
    }

    fn model_name(&self) -> &str {
        "stub-embedder"
    }

    fn dims(&self) -> usize {
        2
    }
}

/// Embedder that always fails, for ingestion failure paths.
struct FailingEmbedder;

#[async_trait]
impl Embedder for FailingEmbedder {
    async fn embed(&self, _texts: &[String]) -> Result<Vec<Vec<f32>>> {
        anyhow::bail!("embedding provider unavailable")
    }

    fn model_name(&self) -> &str {
        "failing-embedder"
    }

    fn dims(&self) -> usize {
        2
    }
}

/// Scriptable chat model. Streaming and batch paths can fail independently
/// to exercise the fallback chain.
struct StubChat {
    reply: String,
    fail_stream: bool,
    fail_batch: bool,
}

impl StubChat {
    fn replying(reply: &str) -> Self {
        Self {
            reply: reply.to_string(),
            fail_stream: false,
            fail_batch: false,
        }
    }

    fn broken() -> Self {
        Self {
            reply: String::new(),
            fail_stream: true,
            fail_batch: true,
        }
    }
}

#[async_trait]
impl ChatModel for StubChat {
    async fn complete(&self, _request: &CompletionRequest) -> Result<String> {
        if self.fail_batch {
            anyhow::bail!("batch completion unavailable")
        }
        Ok(self.reply.clone())
    }

    async fn stream(&self, _request: &CompletionRequest) -> Result<TokenStream> {
        if self.fail_stream {
            anyhow::bail!("stream unavailable")
        }
        let tokens: Vec<Result<String>> = self
            .reply
            .split_inclusive(' ')
            .map(|t| Ok(t.to_string()))
            .collect();
        Ok(Box::pin(futures_util::stream::iter(tokens)))
    }
}

// ============ Harness ============

struct TestEnv {
    _tmp: TempDir,
    store: Store,
    index: Arc<dyn VectorIndex>,
    blob: Arc<dyn BlobStore>,
}

async fn setup() -> TestEnv {
    let tmp = TempDir::new().unwrap();
    let db_path = tmp.path().join("test.db");
    let blob_root = tmp.path().join("blobs");

    let pool = db::connect_path(&db_path).await.unwrap();
    migrate::apply(&pool).await.unwrap();

    TestEnv {
        store: Store::new(pool.clone()),
        index: Arc::new(SqliteVectorIndex::new(pool)),
        blob: Arc::new(LocalBlobStore::new(&blob_root)),
        _tmp: tmp,
    }
}

fn fast_ingest_config() -> IngestConfig {
    IngestConfig {
        max_text_chars: 2_500_000,
        min_text_chars: 10,
        progress_interval: 25,
        chunk_delay_ms: 0,
        content_copy_cap: 100_000,
    }
}

fn coordinator(env: &TestEnv, embedder: Arc<dyn Embedder>) -> IngestCoordinator {
    IngestCoordinator::new(
        env.store.clone(),
        Arc::clone(&env.blob),
        embedder,
        Arc::clone(&env.index),
        ChunkingConfig::default(),
        fast_ingest_config(),
    )
}

/// Minimal valid PDF containing `phrase` as its only text. Body first, then
/// an xref table with correct byte offsets so pdf-extract can parse it.
fn minimal_pdf(phrase: &str) -> Vec<u8> {
    let content = format!("BT /F1 12 Tf 100 700 Td ({}) Tj ET\n", phrase);
    let mut out = Vec::new();
    out.extend_from_slice(b"%PDF-1.4\n");
    let o1 = out.len();
    out.extend_from_slice(b"1 0 obj << /Type /Catalog /Pages 2 0 R >> endobj\n");
    let o2 = out.len();
    out.extend_from_slice(b"2 0 obj << /Type /Pages /Kids [3 0 R] /Count 1 >> endobj\n");
    let o3 = out.len();
    out.extend_from_slice(b"3 0 obj << /Type /Page /Parent 2 0 R /MediaBox [0 0 612 792] /Contents 4 0 R /Resources << /Font << /F1 5 0 R >> >> >> endobj\n");
    let o4 = out.len();
    out.extend_from_slice(
        format!("4 0 obj << /Length {} >> stream\n{}endstream endobj\n", content.len(), content)
            .as_bytes(),
    );
    let o5 = out.len();
    out.extend_from_slice(
        b"5 0 obj << /Type /Font /Subtype /Type1 /BaseFont /Helvetica >> endobj\n",
    );
    let xref_start = out.len();
    out.extend_from_slice(b"xref\n0 6\n");
    out.extend_from_slice(format!("{:010} 65535 f \n", 0).as_bytes());
    for offset in [o1, o2, o3, o4, o5] {
        out.extend_from_slice(format!("{:010} 00000 n \n", offset).as_bytes());
    }
    out.extend_from_slice(b"trailer << /Size 6 /Root 1 0 R >>\nstartxref\n");
    out.extend_from_slice(format!("{}\n", xref_start).as_bytes());
    out.extend_from_slice(b"%%EOF\n");
    out
}

async fn upload_pdf(env: &TestEnv, user_id: &str, phrase: &str) -> String {
    let document = env
        .store
        .create_document(user_id, "Test Doc", "pdf", None, Some("test.pdf"))
        .await
        .unwrap();
    let path = format!("{}/{}/test.pdf", user_id, document.id);
    env.blob
        .upload(&path, &minimal_pdf(phrase), "application/pdf", HashMap::new())
        .await
        .unwrap();
    env.store
        .set_storage_path(user_id, &document.id, &path)
        .await
        .unwrap();
    document.id
}

fn record(user_id: &str, document_id: &str, index: i64, text: &str) -> VectorRecord {
    VectorRecord {
        id: chunk_id(document_id, index),
        embedding: StubEmbedder::vector_for(text),
        metadata: ChunkMetadata {
            user_id: user_id.to_string(),
            document_id: document_id.to_string(),
            chunk_index: index,
            text: text.to_string(),
            title: "Test Doc".to_string(),
            file_name: "test.pdf".to_string(),
            timestamp: 0,
        },
    }
}

// ============ Locking ============

#[tokio::test]
async fn processing_lock_admits_exactly_one_worker() {
    let env = setup().await;
    let user_id = env.store.ensure_user("lock@test.dev").await.unwrap();
    let doc = env
        .store
        .create_document(&user_id, "Doc", "pdf", Some("p"), None)
        .await
        .unwrap();

    let (a, b) = tokio::join!(
        env.store.try_acquire_processing_lock(&user_id, &doc.id),
        env.store.try_acquire_processing_lock(&user_id, &doc.id),
    );
    let acquired = [a.unwrap(), b.unwrap()]
        .iter()
        .filter(|r| matches!(r, LockAcquisition::Acquired { .. }))
        .count();
    assert_eq!(acquired, 1);
}

#[tokio::test]
async fn completed_document_cannot_be_relocked() {
    let env = setup().await;
    let user_id = env.store.ensure_user("done@test.dev").await.unwrap();
    let doc = env
        .store
        .create_document(&user_id, "Doc", "pdf", Some("p"), None)
        .await
        .unwrap();
    env.store
        .mark_completed(&user_id, &doc.id, 3, 100, false, "text")
        .await
        .unwrap();

    let result = env
        .store
        .try_acquire_processing_lock(&user_id, &doc.id)
        .await
        .unwrap();
    assert!(matches!(result, LockAcquisition::NotAcquired));
}

#[tokio::test]
async fn failed_document_can_be_relocked() {
    let env = setup().await;
    let user_id = env.store.ensure_user("retry@test.dev").await.unwrap();
    let doc = env
        .store
        .create_document(&user_id, "Doc", "pdf", Some("p"), None)
        .await
        .unwrap();
    env.store
        .mark_failed(&user_id, &doc.id, "boom")
        .await
        .unwrap();

    let result = env
        .store
        .try_acquire_processing_lock(&user_id, &doc.id)
        .await
        .unwrap();
    assert!(matches!(result, LockAcquisition::Acquired { .. }));

    // Acquisition clears the previous failure.
    let doc = env.store.get_document(&user_id, &doc.id).await.unwrap().unwrap();
    assert_eq!(doc.status, ProcessingStatus::Processing);
    assert!(doc.error.is_none());
}

// ============ Ingestion ============

#[tokio::test]
async fn ingestion_completes_and_indexes_chunks() {
    let env = setup().await;
    let user_id = env.store.ensure_user("ingest@test.dev").await.unwrap();
    let doc_id = upload_pdf(&env, &user_id, "alpha entropy lecture notes with enough words").await;

    let embedder = Arc::new(StubEmbedder::new());
    coordinator(&env, embedder.clone())
        .run(&user_id, &doc_id)
        .await
        .unwrap();

    let doc = env.store.get_document(&user_id, &doc_id).await.unwrap().unwrap();
    assert_eq!(doc.status, ProcessingStatus::Completed);
    assert_eq!(doc.progress, 100);
    assert_eq!(doc.chunk_count, 1);
    assert!(doc.character_count > 0);
    assert!(!doc.truncated);
    assert!(doc.lock_token.is_none());
    assert!(doc.content_raw.as_deref().unwrap_or("").contains("alpha"));

    let query = StubEmbedder::vector_for("alpha");
    let matches = env
        .index
        .query(&query, 5, &user_id, Some(&doc_id))
        .await
        .unwrap();
    assert_eq!(matches.len(), 1);
    assert_eq!(matches[0].metadata.chunk_index, 0);
}

#[tokio::test]
async fn completed_document_is_not_reprocessed() {
    let env = setup().await;
    let user_id = env.store.ensure_user("idem@test.dev").await.unwrap();
    let doc_id = upload_pdf(&env, &user_id, "alpha text that gets indexed exactly once").await;

    let embedder = Arc::new(StubEmbedder::new());
    let coord = coordinator(&env, embedder.clone());
    coord.run(&user_id, &doc_id).await.unwrap();
    let calls_after_first = embedder.calls.load(Ordering::SeqCst);
    assert!(calls_after_first > 0);

    coord.run(&user_id, &doc_id).await.unwrap();
    assert_eq!(embedder.calls.load(Ordering::SeqCst), calls_after_first);
}

#[tokio::test]
async fn malformed_pdf_marks_document_failed() {
    let env = setup().await;
    let user_id = env.store.ensure_user("bad@test.dev").await.unwrap();
    let document = env
        .store
        .create_document(&user_id, "Bad", "pdf", None, None)
        .await
        .unwrap();
    let path = format!("{}/{}/bad.pdf", user_id, document.id);
    env.blob
        .upload(&path, b"not a pdf at all", "application/pdf", HashMap::new())
        .await
        .unwrap();
    env.store
        .set_storage_path(&user_id, &document.id, &path)
        .await
        .unwrap();

    coordinator(&env, Arc::new(StubEmbedder::new()))
        .run(&user_id, &document.id)
        .await
        .unwrap();

    let doc = env.store.get_document(&user_id, &document.id).await.unwrap().unwrap();
    assert_eq!(doc.status, ProcessingStatus::Failed);
    assert!(doc.error.is_some());
    assert!(doc.failed_at.is_some());
    assert!(doc.lock_token.is_none());
}

#[tokio::test]
async fn unsupported_document_type_is_skipped_without_locking() {
    let env = setup().await;
    let user_id = env.store.ensure_user("docx@test.dev").await.unwrap();
    let document = env
        .store
        .create_document(&user_id, "Word", "docx", None, Some("x.docx"))
        .await
        .unwrap();
    let path = format!("{}/{}/x.docx", user_id, document.id);
    env.blob
        .upload(&path, b"zip bytes", "application/zip", HashMap::new())
        .await
        .unwrap();
    env.store
        .set_storage_path(&user_id, &document.id, &path)
        .await
        .unwrap();

    coordinator(&env, Arc::new(StubEmbedder::new()))
        .run(&user_id, &document.id)
        .await
        .unwrap();

    // Type is checked before the lock: the row is neither locked nor
    // settled as failed.
    let doc = env.store.get_document(&user_id, &document.id).await.unwrap().unwrap();
    assert_eq!(doc.status, ProcessingStatus::Uploading);
    assert!(doc.lock_token.is_none());
    assert!(doc.error.is_none());
}

#[tokio::test]
async fn oversized_document_text_is_truncated() {
    let env = setup().await;
    let user_id = env.store.ensure_user("big@test.dev").await.unwrap();
    let phrase = "alpha item ".repeat(20);
    let doc_id = upload_pdf(&env, &user_id, phrase.trim()).await;

    let config = IngestConfig {
        max_text_chars: 60,
        ..fast_ingest_config()
    };
    let coord = IngestCoordinator::new(
        env.store.clone(),
        Arc::clone(&env.blob),
        Arc::new(StubEmbedder::new()),
        Arc::clone(&env.index),
        ChunkingConfig::default(),
        config,
    );
    coord.run(&user_id, &doc_id).await.unwrap();

    let doc = env.store.get_document(&user_id, &doc_id).await.unwrap().unwrap();
    assert_eq!(doc.status, ProcessingStatus::Completed);
    assert!(doc.truncated);
    assert_eq!(doc.character_count, 60);
    assert!(doc.content_raw.as_deref().unwrap().chars().count() <= 60);
}

#[tokio::test]
async fn all_chunks_failing_marks_document_failed() {
    let env = setup().await;
    let user_id = env.store.ensure_user("embedfail@test.dev").await.unwrap();
    let doc_id = upload_pdf(&env, &user_id, "alpha text whose embedding always fails").await;

    coordinator(&env, Arc::new(FailingEmbedder))
        .run(&user_id, &doc_id)
        .await
        .unwrap();

    let doc = env.store.get_document(&user_id, &doc_id).await.unwrap().unwrap();
    assert_eq!(doc.status, ProcessingStatus::Failed);
}

// ============ Retrieval ============

#[tokio::test]
async fn retrieval_is_tenant_scoped() {
    let env = setup().await;
    let user_a = env.store.ensure_user("a@test.dev").await.unwrap();
    let user_b = env.store.ensure_user("b@test.dev").await.unwrap();

    env.index
        .upsert(&[record(&user_a, "doc-a", 0, "alpha content for user a")])
        .await
        .unwrap();
    env.index
        .upsert(&[record(&user_b, "doc-a", 0, "alpha content for user b")])
        .await
        .unwrap();

    let engine = RetrievalEngine::new(
        Arc::new(StubEmbedder::new()),
        Arc::clone(&env.index),
        RetrievalConfig::default(),
    );
    let result = engine
        .retrieve("alpha", &user_a, &["doc-a".to_string()])
        .await
        .unwrap();
    assert_eq!(result.matches.len(), 1);
    assert_eq!(result.matches[0].metadata.user_id, user_a);
}

#[tokio::test]
async fn retrieval_ranks_across_documents_and_packs_context() {
    let env = setup().await;
    let user_id = env.store.ensure_user("rank@test.dev").await.unwrap();

    env.index
        .upsert(&[
            record(&user_id, "doc-1", 0, "alpha highly relevant chunk"),
            record(&user_id, "doc-1", 1, "beta irrelevant chunk"),
        ])
        .await
        .unwrap();
    env.index
        .upsert(&[record(&user_id, "doc-2", 0, "alpha also relevant chunk")])
        .await
        .unwrap();

    let engine = RetrievalEngine::new(
        Arc::new(StubEmbedder::new()),
        Arc::clone(&env.index),
        RetrievalConfig::default(),
    );
    let result = engine
        .retrieve(
            "alpha",
            &user_id,
            &["doc-1".to_string(), "doc-2".to_string()],
        )
        .await
        .unwrap();

    assert_eq!(result.matches.len(), 3);
    // Relevant chunks from both documents outrank the irrelevant one.
    assert!(result.matches[0].metadata.text.contains("alpha"));
    assert!(result.matches[1].metadata.text.contains("alpha"));
    assert!(result.matches[2].metadata.text.contains("beta"));
    assert!(result.context.contains("highly relevant"));
    assert!(result.confidence.unwrap() > 0.0);
}

#[tokio::test]
async fn retrieval_with_no_matches_yields_empty_context() {
    let env = setup().await;
    let user_id = env.store.ensure_user("empty@test.dev").await.unwrap();

    let engine = RetrievalEngine::new(
        Arc::new(StubEmbedder::new()),
        Arc::clone(&env.index),
        RetrievalConfig::default(),
    );
    let result = engine
        .retrieve("alpha", &user_id, &["missing-doc".to_string()])
        .await
        .unwrap();
    assert!(result.matches.is_empty());
    assert!(result.context.is_empty());
    assert!(result.confidence.is_none());
}

// ============ Chat ============

fn chat_engine(env: &TestEnv, model: Arc<dyn ChatModel>) -> ChatEngine {
    ChatEngine::new(
        env.store.clone(),
        model,
        RetrievalEngine::new(
            Arc::new(StubEmbedder::new()),
            Arc::clone(&env.index),
            RetrievalConfig::default(),
        ),
        LlmConfig {
            replay_delay_ms: 0,
            ..LlmConfig::default()
        },
    )
}

#[tokio::test]
async fn send_message_records_turn_and_answer() {
    let env = setup().await;
    let user_id = env.store.ensure_user("chat@test.dev").await.unwrap();
    let chat = env.store.create_chat(&user_id, None).await.unwrap();

    let engine = chat_engine(&env, Arc::new(StubChat::replying("The answer is 42.")));
    let outcome = engine
        .send_message(&user_id, &chat.id, "What is the answer?", &SendOptions::default())
        .await
        .unwrap();

    assert_eq!(outcome.message.content, "The answer is 42.");
    assert!(!outcome.message.streaming);

    let messages = env.store.list_messages(&chat.id).await.unwrap();
    assert_eq!(messages.len(), 2);
    assert_eq!(messages[0].role, Role::User);
    assert_eq!(messages[1].role, Role::Assistant);
    assert!(!messages[1].streaming);

    // First message titles the chat.
    let chat = env.store.get_chat(&user_id, &chat.id).await.unwrap().unwrap();
    assert_eq!(chat.title.as_deref(), Some("What is the answer?"));
}

#[tokio::test]
async fn duplicate_user_turn_is_recorded_once() {
    let env = setup().await;
    let user_id = env.store.ensure_user("dup@test.dev").await.unwrap();
    let chat = env.store.create_chat(&user_id, None).await.unwrap();

    // A retried request delivers the user turn that is already the newest
    // row in the chat.
    env.store
        .append_message(&chat.id, Role::User, "same question", false)
        .await
        .unwrap();

    let engine = chat_engine(&env, Arc::new(StubChat::replying("ok")));
    engine
        .send_message(&user_id, &chat.id, "same question", &SendOptions::default())
        .await
        .unwrap();

    let messages = env.store.list_messages(&chat.id).await.unwrap();
    let user_turns = messages.iter().filter(|m| m.role == Role::User).count();
    assert_eq!(user_turns, 1);
}

#[tokio::test]
async fn model_failure_yields_apology_not_error() {
    let env = setup().await;
    let user_id = env.store.ensure_user("fail@test.dev").await.unwrap();
    let chat = env.store.create_chat(&user_id, None).await.unwrap();

    let engine = chat_engine(&env, Arc::new(StubChat::broken()));
    let outcome = engine
        .send_message(&user_id, &chat.id, "hello?", &SendOptions::default())
        .await
        .unwrap();

    assert!(outcome.message.content.contains("sorry"));
    assert!(!outcome.message.streaming);

    // No message row is ever left in the streaming state.
    let messages = env.store.list_messages(&chat.id).await.unwrap();
    assert!(messages.iter().all(|m| !m.streaming));
}

#[tokio::test]
async fn stream_failure_falls_back_to_batch_completion() {
    let env = setup().await;
    let user_id = env.store.ensure_user("fallback@test.dev").await.unwrap();
    let chat = env.store.create_chat(&user_id, None).await.unwrap();

    let model = StubChat {
        reply: "batch answer".to_string(),
        fail_stream: true,
        fail_batch: false,
    };
    let engine = chat_engine(&env, Arc::new(model));
    let outcome = engine
        .send_message(&user_id, &chat.id, "question", &SendOptions::default())
        .await
        .unwrap();

    assert_eq!(outcome.message.content, "batch answer");
}

#[tokio::test]
async fn empty_message_is_rejected() {
    let env = setup().await;
    let user_id = env.store.ensure_user("blank@test.dev").await.unwrap();
    let chat = env.store.create_chat(&user_id, None).await.unwrap();

    let engine = chat_engine(&env, Arc::new(StubChat::replying("x")));
    let result = engine
        .send_message(&user_id, &chat.id, "   ", &SendOptions::default())
        .await;
    assert!(result.is_err());
    assert!(env.store.list_messages(&chat.id).await.unwrap().is_empty());
}

// ============ Summarization ============

#[tokio::test]
async fn summary_is_generated_from_chunks_and_cached() {
    let env = setup().await;
    let user_id = env.store.ensure_user("sum@test.dev").await.unwrap();
    let doc = env
        .store
        .create_document(&user_id, "Notes", "pdf", Some("p"), None)
        .await
        .unwrap();
    env.index
        .upsert(&[
            record(&user_id, &doc.id, 0, "first chunk of the notes"),
            record(&user_id, &doc.id, 1, "second chunk of the notes"),
        ])
        .await
        .unwrap();
    env.store
        .mark_completed(&user_id, &doc.id, 2, 100, false, "raw copy")
        .await
        .unwrap();

    let summarizer = Summarizer::new(
        env.store.clone(),
        Arc::clone(&env.index),
        Arc::new(StubChat::replying("A concise summary.")),
        SummarizeConfig::default(),
    );
    let summary = summarizer.summarize(&user_id, &doc.id).await.unwrap();
    assert_eq!(summary, "A concise summary.");

    // Cached: a broken model must not be consulted again.
    let cached = Summarizer::new(
        env.store.clone(),
        Arc::clone(&env.index),
        Arc::new(StubChat::broken()),
        SummarizeConfig::default(),
    );
    assert_eq!(cached.summarize(&user_id, &doc.id).await.unwrap(), "A concise summary.");
}

#[tokio::test]
async fn summary_falls_back_to_stored_text_when_model_fails() {
    let env = setup().await;
    let user_id = env.store.ensure_user("sumfail@test.dev").await.unwrap();
    let doc = env
        .store
        .create_document(&user_id, "Notes", "pdf", Some("p"), None)
        .await
        .unwrap();
    // No indexed chunks; only the stored raw copy.
    env.store
        .mark_completed(&user_id, &doc.id, 0, 50, false, "the raw document text")
        .await
        .unwrap();

    let summarizer = Summarizer::new(
        env.store.clone(),
        Arc::clone(&env.index),
        Arc::new(StubChat::broken()),
        SummarizeConfig::default(),
    );
    let summary = summarizer.summarize(&user_id, &doc.id).await.unwrap();
    assert_eq!(summary, "the raw document text");
}

#[tokio::test]
async fn summary_of_empty_document_is_the_sentinel() {
    let env = setup().await;
    let user_id = env.store.ensure_user("nothing@test.dev").await.unwrap();
    let doc = env
        .store
        .create_document(&user_id, "Empty", "pdf", Some("p"), None)
        .await
        .unwrap();

    let summarizer = Summarizer::new(
        env.store.clone(),
        Arc::clone(&env.index),
        Arc::new(StubChat::broken()),
        SummarizeConfig::default(),
    );
    let summary = summarizer.summarize(&user_id, &doc.id).await.unwrap();
    assert_eq!(summary, studystack::summarize::NO_CONTENT_SENTINEL);
}

// ============ Topics ============

#[tokio::test]
async fn classification_replaces_upload_tag_with_topics() {
    let env = setup().await;
    let user_id = env.store.ensure_user("topics@test.dev").await.unwrap();
    let doc = env
        .store
        .create_document(&user_id, "Physics Notes", "pdf", Some("p"), None)
        .await
        .unwrap();
    assert_eq!(doc.tags, vec![UPLOADED_TAG.to_string()]);

    env.store
        .mark_completed(&user_id, &doc.id, 1, 100, false, "alpha mechanics and motion")
        .await
        .unwrap();

    let classifier = TopicClassifier::new(
        env.store.clone(),
        Arc::new(StubEmbedder::new()),
        Arc::new(LabelCache::new()),
        TopicsConfig::default(),
    );
    let tags = classifier.classify_document(&user_id, &doc.id).await.unwrap();

    assert!(!tags.is_empty());
    assert!(tags.len() <= 3);
    assert!(!tags.contains(&UPLOADED_TAG.to_string()));

    let doc = env.store.get_document(&user_id, &doc.id).await.unwrap().unwrap();
    assert_eq!(doc.tags, tags);
}

#[tokio::test]
async fn classification_without_content_keeps_the_upload_tag() {
    let env = setup().await;
    let user_id = env.store.ensure_user("blanktopics@test.dev").await.unwrap();
    // No title, no stored text: there is nothing to classify.
    let doc = env
        .store
        .create_document(&user_id, "", "pdf", Some("p"), None)
        .await
        .unwrap();

    let classifier = TopicClassifier::new(
        env.store.clone(),
        Arc::new(StubEmbedder::new()),
        Arc::new(LabelCache::new()),
        TopicsConfig::default(),
    );
    let tags = classifier.classify_document(&user_id, &doc.id).await.unwrap();
    assert_eq!(tags, vec![UPLOADED_TAG.to_string()]);

    let doc = env.store.get_document(&user_id, &doc.id).await.unwrap().unwrap();
    assert_eq!(doc.tags, vec![UPLOADED_TAG.to_string()]);
}
