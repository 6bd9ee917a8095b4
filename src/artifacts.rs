//! Generated study artifacts: flashcards, quizzes, and podcast audio.
//!
//! All artifacts are cached per document per kind and regenerated only when
//! missing. Flashcards and quizzes are structured JSON parsed into typed
//! values before caching, so a malformed model response fails the request
//! instead of poisoning the cache.

use std::collections::HashMap;
use std::sync::Arc;

use anyhow::{anyhow, Context, Result};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::blob::BlobStore;
use crate::config::SummarizeConfig;
use crate::ingest::truncate_chars;
use crate::llm::{ChatModel, CompletionRequest, PromptMessage, Route};
use crate::models::Document;
use crate::store::Store;
use crate::summarize::assemble_text;
use crate::vector_index::VectorIndex;

pub const FLASHCARDS_KIND: &str = "flashcards";
pub const PODCAST_KIND: &str = "podcast";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Flashcard {
    pub front: String,
    pub back: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QuizQuestion {
    pub question: String,
    pub options: Vec<String>,
    pub answer_index: usize,
    #[serde(default)]
    pub explanation: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QuizDifficulty {
    Easy,
    Medium,
    Hard,
}

impl QuizDifficulty {
    pub fn as_str(&self) -> &'static str {
        match self {
            QuizDifficulty::Easy => "easy",
            QuizDifficulty::Medium => "medium",
            QuizDifficulty::Hard => "hard",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "easy" => Some(QuizDifficulty::Easy),
            "medium" => Some(QuizDifficulty::Medium),
            "hard" => Some(QuizDifficulty::Hard),
            _ => None,
        }
    }
}

/// Cache key for a quiz variant. Different difficulty or question count is
/// a different artifact.
pub fn quiz_kind(difficulty: QuizDifficulty, count: usize) -> String {
    format!("quiz_{}_{}", difficulty.as_str(), count)
}

pub struct ArtifactGenerator {
    store: Store,
    blob: Arc<dyn BlobStore>,
    index: Arc<dyn VectorIndex>,
    model: Arc<dyn ChatModel>,
    config: SummarizeConfig,
}

impl ArtifactGenerator {
    pub fn new(
        store: Store,
        blob: Arc<dyn BlobStore>,
        index: Arc<dyn VectorIndex>,
        model: Arc<dyn ChatModel>,
        config: SummarizeConfig,
    ) -> Self {
        Self {
            store,
            blob,
            index,
            model,
            config,
        }
    }

    pub async fn flashcards(
        &self,
        user_id: &str,
        document_id: &str,
        count: usize,
    ) -> Result<Vec<Flashcard>> {
        if let Some(cached) = self.store.get_artifact(document_id, FLASHCARDS_KIND).await? {
            debug!(document_id, "serving cached flashcards");
            return serde_json::from_str(&cached.content)
                .context("cached flashcards are malformed");
        }

        let document = self.load_document(user_id, document_id).await?;
        let material = self.study_material(&document).await?;

        let prompt = vec![
            PromptMessage::system(
                "You create study flashcards. Respond with a JSON array only, \
                 each element {\"front\": question, \"back\": answer}. No prose.",
            ),
            PromptMessage::user(format!(
                "Create {} flashcards covering the key ideas in \"{}\":\n\n{}",
                count, document.title, material
            )),
        ];
        let raw = self
            .model
            .complete(&CompletionRequest::new(prompt, Route::Default, 0.4))
            .await?;

        let cards: Vec<Flashcard> = serde_json::from_str(strip_code_fences(&raw))
            .context("model returned malformed flashcard JSON")?;
        if cards.is_empty() {
            return Err(anyhow!("model returned no flashcards"));
        }

        self.store
            .put_artifact(
                document_id,
                FLASHCARDS_KIND,
                &serde_json::to_string(&cards)?,
                "chat",
            )
            .await?;
        Ok(cards)
    }

    pub async fn quiz(
        &self,
        user_id: &str,
        document_id: &str,
        difficulty: QuizDifficulty,
        count: usize,
    ) -> Result<Vec<QuizQuestion>> {
        let kind = quiz_kind(difficulty, count);
        if let Some(cached) = self.store.get_artifact(document_id, &kind).await? {
            debug!(document_id, kind = %kind, "serving cached quiz");
            return serde_json::from_str(&cached.content).context("cached quiz is malformed");
        }

        let document = self.load_document(user_id, document_id).await?;
        let material = self.study_material(&document).await?;

        let prompt = vec![
            PromptMessage::system(
                "You write multiple-choice quizzes. Respond with a JSON array \
                 only, each element {\"question\", \"options\" (4 strings), \
                 \"answer_index\" (0-3), \"explanation\"}. No prose.",
            ),
            PromptMessage::user(format!(
                "Write {} {}-difficulty questions about \"{}\":\n\n{}",
                count,
                difficulty.as_str(),
                document.title,
                material
            )),
        ];
        let raw = self
            .model
            .complete(&CompletionRequest::new(prompt, Route::Default, 0.4))
            .await?;

        let questions: Vec<QuizQuestion> = serde_json::from_str(strip_code_fences(&raw))
            .context("model returned malformed quiz JSON")?;
        for q in &questions {
            if q.answer_index >= q.options.len() {
                return Err(anyhow!("quiz answer index out of range"));
            }
        }
        if questions.is_empty() {
            return Err(anyhow!("model returned no quiz questions"));
        }

        self.store
            .put_artifact(document_id, &kind, &serde_json::to_string(&questions)?, "chat")
            .await?;
        Ok(questions)
    }

    /// Generate podcast audio for a document. Returns the blob path of the
    /// audio file; the script is written by the model from the document
    /// material, then synthesized to speech.
    pub async fn podcast(&self, user_id: &str, document_id: &str, voice: &str) -> Result<String> {
        if let Some(cached) = self.store.get_artifact(document_id, PODCAST_KIND).await? {
            debug!(document_id, "serving cached podcast");
            return Ok(cached.content);
        }

        let document = self.load_document(user_id, document_id).await?;
        let material = self.study_material(&document).await?;

        let prompt = vec![
            PromptMessage::system(
                "You write short, engaging single-narrator podcast scripts. \
                 Plain spoken prose only, no stage directions or headings.",
            ),
            PromptMessage::user(format!(
                "Write a podcast script (about 500 words) explaining \"{}\":\n\n{}",
                document.title, material
            )),
        ];
        let script = self
            .model
            .complete(&CompletionRequest::new(prompt, Route::Default, 0.6))
            .await?;

        let audio = self.model.synthesize_speech(&script, voice).await?;

        let path = format!("{}/{}/podcast.mp3", user_id, document_id);
        let metadata = HashMap::from([
            ("document_id".to_string(), document_id.to_string()),
            ("voice".to_string(), voice.to_string()),
        ]);
        self.blob
            .upload(&path, &audio, "audio/mpeg", metadata)
            .await?;
        info!(document_id, path = %path, bytes = audio.len(), "podcast audio stored");

        self.store
            .put_artifact(document_id, PODCAST_KIND, &path, "tts")
            .await?;
        Ok(path)
    }

    async fn load_document(&self, user_id: &str, document_id: &str) -> Result<Document> {
        self.store
            .get_document(user_id, document_id)
            .await?
            .ok_or_else(|| anyhow!("document {} not found", document_id))
    }

    /// Source text for generation: reassembled chunks, falling back to the
    /// stored raw copy, bounded to one part's worth of characters.
    async fn study_material(&self, document: &Document) -> Result<String> {
        let text = assemble_text(
            self.index.as_ref(),
            &document.id,
            document.chunk_count,
            self.config.max_chunks,
        )
        .await
        .unwrap_or_default();

        let text = if text.trim().is_empty() {
            document.content_raw.clone().unwrap_or_default()
        } else {
            text
        };
        if text.trim().is_empty() {
            return Err(anyhow!("document has no content to generate from"));
        }
        Ok(truncate_chars(&text, self.config.part_chars * 2).0)
    }
}

/// Models often wrap JSON in markdown fences despite instructions.
fn strip_code_fences(raw: &str) -> &str {
    let trimmed = raw.trim();
    let Some(inner) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    let inner = inner.strip_prefix("json").unwrap_or(inner);
    inner.trim_end_matches('`').trim()
}
