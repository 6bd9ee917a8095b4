//! Document ingestion pipeline.
//!
//! Drives a document from uploaded bytes to an indexed, queryable state:
//! acquire the processing lock, download and extract text, then walk the
//! chunk windows lazily, embedding and upserting one chunk at a time so
//! memory stays flat regardless of document size.
//!
//! Every terminal path settles the document row: success via
//! `mark_completed`, any failure via `mark_failed`. A lost lock race is not
//! a failure, the holder's run is authoritative.

use std::sync::Arc;

use anyhow::{anyhow, bail, Context, Result};
use sha2::{Digest, Sha256};
use tracing::{info, warn};

use crate::blob::BlobStore;
use crate::chunker::{chunk_id, chunk_words, count_chunks};
use crate::config::{ChunkingConfig, IngestConfig};
use crate::embedding::Embedder;
use crate::extract::{extract_text, normalize_whitespace};
use crate::models::{ChunkMetadata, Document, ProcessingStatus, VectorRecord};
use crate::store::{LockAcquisition, Store};
use crate::vector_index::VectorIndex;

/// Snapshot pair delivered on a document write. `before` is `None` for a
/// freshly created row.
#[derive(Debug)]
pub struct WriteEvent {
    pub user_id: String,
    pub document_id: String,
    pub before: Option<Document>,
    pub after: Option<Document>,
}

/// A write should trigger ingestion only when it makes the document newly
/// processable: creation with a storage path already attached, or the
/// storage path appearing on an existing row. Status flips, progress
/// updates, and tag edits pass through without re-triggering.
pub fn should_ingest(before: Option<&Document>, after: Option<&Document>) -> bool {
    let Some(after) = after else {
        return false;
    };
    if after.storage_path.is_none() {
        return false;
    }
    match before {
        None => true,
        Some(before) => before.storage_path.is_none(),
    }
}

pub struct IngestCoordinator {
    store: Store,
    blob: Arc<dyn BlobStore>,
    embedder: Arc<dyn Embedder>,
    index: Arc<dyn VectorIndex>,
    chunking: ChunkingConfig,
    ingest: IngestConfig,
}

impl IngestCoordinator {
    pub fn new(
        store: Store,
        blob: Arc<dyn BlobStore>,
        embedder: Arc<dyn Embedder>,
        index: Arc<dyn VectorIndex>,
        chunking: ChunkingConfig,
        ingest: IngestConfig,
    ) -> Self {
        Self {
            store,
            blob,
            embedder,
            index,
            chunking,
            ingest,
        }
    }

    /// Entry point for document write notifications.
    pub async fn handle_write_event(&self, event: &WriteEvent) -> Result<()> {
        if !should_ingest(event.before.as_ref(), event.after.as_ref()) {
            return Ok(());
        }
        self.run(&event.user_id, &event.document_id).await
    }

    /// Process one document end to end. Idempotent: a row that is already
    /// completed, currently held by another worker, or of a type this
    /// pipeline cannot ingest is skipped without touching its status.
    pub async fn run(&self, user_id: &str, document_id: &str) -> Result<()> {
        let document = self
            .store
            .get_document(user_id, document_id)
            .await?
            .ok_or_else(|| anyhow!("document {} not found", document_id))?;

        if matches!(
            document.status,
            ProcessingStatus::Processing | ProcessingStatus::Completed
        ) {
            info!(document_id, status = document.status.as_str(), "skipping ingestion");
            return Ok(());
        }

        if document.doc_type != "pdf" {
            info!(
                document_id,
                doc_type = %document.doc_type,
                "unsupported document type, skipping ingestion"
            );
            return Ok(());
        }

        let storage_path = match &document.storage_path {
            Some(path) => path.clone(),
            None => {
                info!(document_id, "no storage path yet, skipping ingestion");
                return Ok(());
            }
        };

        match self
            .store
            .try_acquire_processing_lock(user_id, document_id)
            .await?
        {
            LockAcquisition::Acquired { lock_token } => {
                info!(document_id, lock_token = %lock_token, "acquired processing lock");
            }
            LockAcquisition::NotAcquired => {
                info!(document_id, "processing lock held elsewhere, skipping");
                return Ok(());
            }
        }

        // From here the lock is ours; any error settles the row as failed.
        match self.process(user_id, &document, &storage_path).await {
            Ok(outcome) => {
                self.store
                    .mark_completed(
                        user_id,
                        document_id,
                        outcome.chunk_count,
                        outcome.character_count,
                        outcome.truncated,
                        &outcome.content_copy,
                    )
                    .await?;
                info!(
                    document_id,
                    chunks = outcome.chunk_count,
                    skipped = outcome.skipped,
                    truncated = outcome.truncated,
                    "ingestion completed"
                );
                Ok(())
            }
            Err(e) => {
                let message = format!("{:#}", e);
                warn!(document_id, error = %message, "ingestion failed");
                self.store.mark_failed(user_id, document_id, &message).await?;
                Ok(())
            }
        }
    }

    async fn process(
        &self,
        user_id: &str,
        document: &Document,
        storage_path: &str,
    ) -> Result<IngestOutcome> {
        let bytes = self
            .blob
            .download(storage_path)
            .await
            .context("failed to download document")?;

        // Record the content hash so re-uploads of identical files are
        // identifiable from blob metadata alone.
        let checksum = format!("{:x}", Sha256::digest(&bytes));
        let mut blob_meta = self.blob.get_metadata(storage_path).await.unwrap_or_default();
        blob_meta.insert("sha256".to_string(), checksum.clone());
        if let Err(e) = self.blob.set_metadata(storage_path, blob_meta).await {
            warn!(document_id = %document.id, error = %format!("{:#}", e), "failed to record checksum");
        }
        info!(document_id = %document.id, bytes = bytes.len(), checksum = %checksum, "downloaded document");

        let raw = extract_text(&bytes, &document.doc_type)
            .map_err(|e| anyhow!("text extraction failed: {}", e))?;
        let text = normalize_whitespace(&raw);

        let (text, truncated) = truncate_chars(&text, self.ingest.max_text_chars);
        if truncated {
            warn!(
                document_id = %document.id,
                cap = self.ingest.max_text_chars,
                "document text exceeds cap, truncating"
            );
        }

        let character_count = text.chars().count() as i64;
        if (character_count as usize) < self.ingest.min_text_chars {
            bail!("no meaningful text extracted from document");
        }

        // Reprocessing after a failure may leave stale vectors behind.
        self.index
            .delete_document(&document.id, user_id)
            .await
            .context("failed to clear existing vectors")?;

        let word_count = text.split_whitespace().count();
        let total = count_chunks(
            word_count,
            self.chunking.window_words,
            self.chunking.overlap_words,
        );

        let title = document.title.clone();
        let file_name = document.file_name.clone().unwrap_or_default();
        let timestamp = chrono::Utc::now().timestamp();

        let mut processed: usize = 0;
        let mut skipped: usize = 0;

        for (index, chunk_text) in chunk_words(
            &text,
            self.chunking.window_words,
            self.chunking.overlap_words,
        )
        .enumerate()
        {
            match self
                .index_chunk(user_id, document, index as i64, &chunk_text, &title, &file_name, timestamp)
                .await
            {
                Ok(()) => {}
                Err(e) => {
                    // One bad chunk must not sink the document.
                    warn!(
                        document_id = %document.id,
                        chunk_index = index,
                        error = %format!("{:#}", e),
                        "failed to index chunk, skipping"
                    );
                    skipped += 1;
                }
            }

            processed += 1;
            if processed % self.ingest.progress_interval == 0 {
                // Chunk-based progress; windows are fixed-size, so this
                // tracks character progress to within one window.
                let progress = ((processed * 100) / total.max(1)).min(99) as i64;
                self.store
                    .set_progress(user_id, &document.id, progress)
                    .await?;
            }

            if self.ingest.chunk_delay_ms > 0 {
                tokio::time::sleep(std::time::Duration::from_millis(self.ingest.chunk_delay_ms))
                    .await;
            }
        }

        if processed > 0 && skipped == processed {
            bail!("all {} chunks failed to index", processed);
        }

        let (content_copy, _) = truncate_chars(&text, self.ingest.content_copy_cap);

        Ok(IngestOutcome {
            chunk_count: total as i64,
            character_count,
            truncated,
            skipped,
            content_copy,
        })
    }

    #[allow(clippy::too_many_arguments)]
    async fn index_chunk(
        &self,
        user_id: &str,
        document: &Document,
        chunk_index: i64,
        chunk_text: &str,
        title: &str,
        file_name: &str,
        timestamp: i64,
    ) -> Result<()> {
        let embedding = self
            .embedder
            .embed(&[chunk_text.to_string()])
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| anyhow!("embedder returned no vector"))?;

        let (metadata_text, _) = truncate_chars(chunk_text, self.chunking.metadata_text_cap);

        let record = VectorRecord {
            id: chunk_id(&document.id, chunk_index),
            embedding,
            metadata: ChunkMetadata {
                user_id: user_id.to_string(),
                document_id: document.id.clone(),
                chunk_index,
                text: metadata_text,
                title: title.to_string(),
                file_name: file_name.to_string(),
                timestamp,
            },
        };

        self.index.upsert(&[record]).await
    }
}

struct IngestOutcome {
    chunk_count: i64,
    character_count: i64,
    truncated: bool,
    skipped: usize,
    content_copy: String,
}

/// Truncate to at most `max` characters, respecting UTF-8 boundaries.
/// Returns the (possibly shortened) text and whether truncation happened.
pub fn truncate_chars(text: &str, max: usize) -> (String, bool) {
    match text.char_indices().nth(max) {
        Some((byte_pos, _)) => (text[..byte_pos].to_string(), true),
        None => (text.to_string(), false),
    }
}
