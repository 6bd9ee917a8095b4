//! Answer generation over chats.
//!
//! [`ChatEngine::send_message`] runs the full turn: record the user message,
//! retrieve context when documents are attached, stream the model's answer
//! into a placeholder assistant row, and settle that row no matter what
//! failed along the way. The placeholder is updated in place on a fixed
//! flush cadence so readers see the answer grow; the final write always
//! clears the streaming flag.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, bail, Result};
use futures_util::StreamExt;
use tokio::time::Instant;
use tracing::{debug, warn};

use crate::config::LlmConfig;
use crate::llm::{ChatModel, CompletionRequest, PromptMessage, Route};
use crate::models::{ChatMessage, Role};
use crate::retrieval::RetrievalEngine;
use crate::store::Store;

const APOLOGY: &str =
    "I'm sorry, I ran into a problem generating a response. Please try again.";

const SYSTEM_PROMPT: &str = "You are a study assistant. Answer the user's question \
clearly and concisely. When document excerpts are provided, ground your answer in \
them and say so when they do not cover the question.";

/// Per-request options. Routes are mutually exclusive; `Route::Default`
/// streams, the others are replayed incrementally from a batch answer.
#[derive(Debug, Clone, Default)]
pub struct SendOptions {
    pub route: Route,
    pub document_ids: Vec<String>,
}

#[derive(Debug)]
pub struct AnswerOutcome {
    pub message: ChatMessage,
    pub confidence: Option<f32>,
}

pub struct ChatEngine {
    store: Store,
    model: Arc<dyn ChatModel>,
    retrieval: RetrievalEngine,
    config: LlmConfig,
}

impl ChatEngine {
    pub fn new(
        store: Store,
        model: Arc<dyn ChatModel>,
        retrieval: RetrievalEngine,
        config: LlmConfig,
    ) -> Self {
        Self {
            store,
            model,
            retrieval,
            config,
        }
    }

    pub async fn send_message(
        &self,
        user_id: &str,
        chat_id: &str,
        content: &str,
        options: &SendOptions,
    ) -> Result<AnswerOutcome> {
        let content = content.trim();
        if content.is_empty() {
            bail!("message content must not be empty");
        }

        let chat = self
            .store
            .get_chat(user_id, chat_id)
            .await?
            .ok_or_else(|| anyhow!("chat {} not found", chat_id))?;

        // A retried request may deliver the same user turn twice; keep one row.
        let duplicate = match self.store.last_message(chat_id).await? {
            Some(last) => last.role == Role::User && last.content == content,
            None => false,
        };
        if duplicate {
            debug!(chat_id, "duplicate user turn, not re-recording");
        } else {
            self.store
                .append_message(chat_id, Role::User, content, false)
                .await?;
        }

        if chat.title.as_deref().unwrap_or("").is_empty() {
            self.store
                .set_chat_title_if_empty(chat_id, &derive_title(content))
                .await?;
        }

        // Retrieval failures degrade to an unaugmented answer.
        let retrieval = if options.document_ids.is_empty() {
            None
        } else {
            match self
                .retrieval
                .retrieve(content, user_id, &options.document_ids)
                .await
            {
                Ok(r) => Some(r),
                Err(e) => {
                    warn!(chat_id, error = %format!("{:#}", e), "retrieval failed, answering without context");
                    None
                }
            }
        };
        let confidence = retrieval.as_ref().and_then(|r| r.confidence);

        let prompt = self.build_prompt(chat_id, retrieval.as_ref().map(|r| r.context.as_str())).await?;

        let placeholder = self
            .store
            .append_message(chat_id, Role::Assistant, "", true)
            .await?;

        let request = CompletionRequest::new(prompt, options.route, self.config.temperature);
        let answer = match self.generate(&placeholder.id, &request).await {
            Ok(text) => text,
            Err(e) => {
                warn!(chat_id, error = %format!("{:#}", e), "generation failed, trying fallback model");
                self.fallback(&placeholder.id, &request).await
            }
        };

        // Terminal write: the row never stays marked streaming.
        self.store
            .update_message(&placeholder.id, &answer, false)
            .await?;
        self.store.touch_chat(chat_id).await?;

        Ok(AnswerOutcome {
            message: ChatMessage {
                content: answer,
                streaming: false,
                ..placeholder
            },
            confidence,
        })
    }

    async fn build_prompt(
        &self,
        chat_id: &str,
        context: Option<&str>,
    ) -> Result<Vec<PromptMessage>> {
        let mut system = SYSTEM_PROMPT.to_string();
        if let Some(context) = context.filter(|c| !c.is_empty()) {
            system.push_str("\n\nDocument excerpts:\n");
            system.push_str(context);
        }

        let mut prompt = vec![PromptMessage::system(system)];
        for message in self.store.list_messages(chat_id).await? {
            if message.content.is_empty() {
                continue;
            }
            prompt.push(PromptMessage {
                role: message.role,
                content: message.content,
            });
        }
        Ok(prompt)
    }

    /// Produce the answer, persisting incremental snapshots to the
    /// placeholder row along the way.
    async fn generate(&self, message_id: &str, request: &CompletionRequest) -> Result<String> {
        match request.route {
            Route::Default => self.generate_streaming(message_id, request).await,
            Route::Think | Route::WebSearch => {
                let answer = self.model.complete(request).await?;
                self.replay(message_id, &answer).await?;
                Ok(answer)
            }
        }
    }

    async fn generate_streaming(
        &self,
        message_id: &str,
        request: &CompletionRequest,
    ) -> Result<String> {
        let mut stream = self.model.stream(request).await?;
        let mut buffer = String::new();
        let flush_every = Duration::from_millis(self.config.stream_flush_ms);
        let mut last_flush = Instant::now();

        while let Some(delta) = stream.next().await {
            buffer.push_str(&delta?);
            if last_flush.elapsed() >= flush_every {
                self.store.update_message(message_id, &buffer, true).await?;
                last_flush = Instant::now();
            }
        }

        if buffer.is_empty() {
            bail!("model stream produced no content");
        }
        Ok(buffer)
    }

    /// Batch answers are surfaced incrementally so the client renders the
    /// same progressive experience as a true stream.
    async fn replay(&self, message_id: &str, answer: &str) -> Result<()> {
        let chars: Vec<char> = answer.chars().collect();
        let slice = self.config.replay_slice_chars.max(1);

        let mut shown = slice.min(chars.len());
        while shown < chars.len() {
            let partial: String = chars[..shown].iter().collect();
            self.store.update_message(message_id, &partial, true).await?;
            tokio::time::sleep(Duration::from_millis(self.config.replay_delay_ms)).await;
            shown += slice;
        }
        Ok(())
    }

    /// One retry on the default model at the same temperature, then the
    /// canned apology. Never propagates an error.
    async fn fallback(&self, message_id: &str, request: &CompletionRequest) -> String {
        let retry = CompletionRequest::new(
            request.messages.clone(),
            Route::Default,
            request.temperature,
        );
        match self.model.complete(&retry).await {
            Ok(answer) => {
                if self.replay(message_id, &answer).await.is_err() {
                    warn!(message_id, "failed to replay fallback answer");
                }
                answer
            }
            Err(e) => {
                warn!(message_id, error = %format!("{:#}", e), "fallback model failed");
                APOLOGY.to_string()
            }
        }
    }
}

/// Derive a chat title from the first user message: whole message when it
/// is short, otherwise cut near 60 characters at a word boundary.
pub fn derive_title(content: &str) -> String {
    let collapsed = content.split_whitespace().collect::<Vec<_>>().join(" ");
    if collapsed.chars().count() <= 60 {
        return collapsed;
    }

    let head: String = collapsed.chars().take(60).collect();
    let cut = head.rfind(' ').unwrap_or(head.len());
    let mut title = head[..cut].trim_end().to_string();
    title.push_str("...");
    title
}
