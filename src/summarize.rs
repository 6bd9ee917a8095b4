//! Map-reduce document summarization.
//!
//! Rebuilds the document text from its indexed chunks using the persisted
//! chunk count, packs it into bounded parts, summarizes each part, then
//! reduces the partial summaries into one final summary. Results are cached
//! as a `summary` artifact; generation failures degrade to the raw text and
//! finally to a fixed sentinel rather than erroring out.

use std::sync::Arc;

use anyhow::{anyhow, Result};
use tracing::{debug, warn};

use crate::chunker::{chunk_id, parse_chunk_index};
use crate::config::SummarizeConfig;
use crate::ingest::truncate_chars;
use crate::llm::{ChatModel, CompletionRequest, PromptMessage, Route};
use crate::store::Store;
use crate::vector_index::VectorIndex;

pub const SUMMARY_KIND: &str = "summary";
pub const NO_CONTENT_SENTINEL: &str = "No content available to summarize.";

pub struct Summarizer {
    store: Store,
    index: Arc<dyn VectorIndex>,
    model: Arc<dyn ChatModel>,
    config: SummarizeConfig,
}

impl Summarizer {
    pub fn new(
        store: Store,
        index: Arc<dyn VectorIndex>,
        model: Arc<dyn ChatModel>,
        config: SummarizeConfig,
    ) -> Self {
        Self {
            store,
            index,
            model,
            config,
        }
    }

    /// Summarize a document, serving the cached artifact when one exists.
    pub async fn summarize(&self, user_id: &str, document_id: &str) -> Result<String> {
        if let Some(cached) = self.store.get_artifact(document_id, SUMMARY_KIND).await? {
            debug!(document_id, version = cached.version, "serving cached summary");
            return Ok(cached.content);
        }

        let document = self
            .store
            .get_document(user_id, document_id)
            .await?
            .ok_or_else(|| anyhow!("document {} not found", document_id))?;

        let text = match assemble_text(
            self.index.as_ref(),
            &document.id,
            document.chunk_count,
            self.config.max_chunks,
        )
        .await
        {
            Ok(text) => text,
            Err(e) => {
                warn!(document_id, error = %format!("{:#}", e), "chunk fetch failed, using stored copy");
                String::new()
            }
        };
        // Stored raw copy covers documents indexed before chunk counts were
        // persisted, and chunk-fetch failures.
        let text = if text.trim().is_empty() {
            document.content_raw.clone().unwrap_or_default()
        } else {
            text
        };

        if text.trim().is_empty() {
            return Ok(NO_CONTENT_SENTINEL.to_string());
        }

        let parts = pack_parts(&text, self.config.part_chars, self.config.max_parts);
        let summary = match self.map_reduce(&document.title, &parts).await {
            Ok(summary) => summary,
            Err(e) => {
                warn!(document_id, error = %format!("{:#}", e), "summarization failed, returning raw text");
                truncate_chars(&text, self.config.part_chars).0
            }
        };

        self.store
            .put_artifact(document_id, SUMMARY_KIND, &summary, "map-reduce")
            .await?;
        Ok(summary)
    }

    async fn map_reduce(&self, title: &str, parts: &[String]) -> Result<String> {
        if parts.is_empty() {
            return Ok(NO_CONTENT_SENTINEL.to_string());
        }

        if parts.len() == 1 {
            return self.summarize_text(title, &parts[0], self.config.default_length_words).await;
        }

        let mut partials = Vec::with_capacity(parts.len());
        for (i, part) in parts.iter().enumerate() {
            debug!(part = i + 1, of = parts.len(), "summarizing part");
            partials.push(self.summarize_text(title, part, self.config.default_length_words).await?);
        }

        let combined = partials.join("\n\n");
        let prompt = vec![
            PromptMessage::system(
                "You combine partial summaries of one document into a single \
                 coherent summary. Do not mention that the input was split.",
            ),
            PromptMessage::user(format!(
                "Combine these partial summaries of \"{}\" into one summary of \
                 at most {} words:\n\n{}",
                title, self.config.default_length_words, combined
            )),
        ];
        self.model
            .complete(&CompletionRequest::new(prompt, Route::Default, 0.3))
            .await
    }

    async fn summarize_text(&self, title: &str, text: &str, max_words: usize) -> Result<String> {
        let prompt = vec![
            PromptMessage::system(
                "You write faithful, plain-prose summaries of document excerpts.",
            ),
            PromptMessage::user(format!(
                "Summarize this excerpt from \"{}\" in at most {} words:\n\n{}",
                title, max_words, text
            )),
        ];
        self.model
            .complete(&CompletionRequest::new(prompt, Route::Default, 0.3))
            .await
    }
}

/// Reassemble document text from indexed chunks, in chunk order. Ids are
/// derived from the persisted chunk count; the fetch comes back unordered.
pub(crate) async fn assemble_text(
    index: &dyn VectorIndex,
    document_id: &str,
    chunk_count: i64,
    max_chunks: usize,
) -> Result<String> {
    if chunk_count <= 0 {
        return Ok(String::new());
    }

    let take = (chunk_count as usize).min(max_chunks);
    let ids: Vec<String> = (0..take as i64).map(|i| chunk_id(document_id, i)).collect();

    let mut records = index.fetch(&ids).await?;
    records.sort_by_key(|r| parse_chunk_index(&r.id).unwrap_or(i64::MAX));

    Ok(records
        .iter()
        .map(|r| r.metadata.text.as_str())
        .filter(|t| !t.is_empty())
        .collect::<Vec<_>>()
        .join(" "))
}

/// Split text into at most `max_parts` pieces of at most `part_chars`
/// characters, cutting at word boundaries. Text beyond the final part is
/// dropped.
pub fn pack_parts(text: &str, part_chars: usize, max_parts: usize) -> Vec<String> {
    let mut parts = Vec::new();
    let mut current = String::new();

    for word in text.split_whitespace() {
        let extra = word.chars().count() + if current.is_empty() { 0 } else { 1 };
        if !current.is_empty() && current.chars().count() + extra > part_chars {
            parts.push(std::mem::take(&mut current));
            if parts.len() == max_parts {
                return parts;
            }
        }
        if !current.is_empty() {
            current.push(' ');
        }
        // A single word longer than the part size is truncated to fit.
        let (word, _) = truncate_chars(word, part_chars);
        current.push_str(&word);
    }

    if !current.is_empty() {
        parts.push(current);
    }
    parts
}
