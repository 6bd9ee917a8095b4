//! Language-model provider client.
//!
//! [`ChatModel`] is the seam the answer generator, summarizer, and artifact
//! generators depend on. [`OpenAiChat`] implements it against the provider's
//! chat-completions API (streaming and batch) and the responses-style API for
//! web-search requests. Each API version gets one typed response struct,
//! selected explicitly by the call site.
//!
//! Model routing: exactly one of three mutually exclusive modes is active per
//! request: the fast default model (streams), the "think" reasoning model,
//! and the web-search-capable variant (both batch).

use anyhow::{bail, Result};
use async_trait::async_trait;
use futures_util::stream::BoxStream;
use futures_util::StreamExt;
use serde::Deserialize;
use std::time::Duration;

use crate::config::LlmConfig;
use crate::models::Role;

/// Which model handles the request. Selected by request flags upstream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Route {
    #[default]
    Default,
    Think,
    WebSearch,
}

/// One prompt turn handed to the model.
#[derive(Debug, Clone)]
pub struct PromptMessage {
    pub role: Role,
    pub content: String,
}

impl PromptMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct CompletionRequest {
    pub messages: Vec<PromptMessage>,
    pub route: Route,
    pub temperature: f32,
}

impl CompletionRequest {
    pub fn new(messages: Vec<PromptMessage>, route: Route, temperature: f32) -> Self {
        Self {
            messages,
            route,
            temperature,
        }
    }
}

/// Token-delta stream for streaming completions.
pub type TokenStream = BoxStream<'static, Result<String>>;

#[async_trait]
pub trait ChatModel: Send + Sync {
    /// Produce the full answer in one call.
    async fn complete(&self, request: &CompletionRequest) -> Result<String>;

    /// Produce the answer as a stream of token deltas. Only the default
    /// route streams; other routes should be served via [`complete`].
    async fn stream(&self, request: &CompletionRequest) -> Result<TokenStream>;

    /// Synthesize speech for generated podcast scripts.
    async fn synthesize_speech(&self, _text: &str, _voice: &str) -> Result<Vec<u8>> {
        bail!("speech synthesis not supported by this model provider")
    }
}

// ============ OpenAI provider ============

pub struct OpenAiChat {
    config: LlmConfig,
    api_key: String,
    client: reqwest::Client,
}

impl OpenAiChat {
    /// Create a provider from configuration. Requires `OPENAI_API_KEY`.
    pub fn new(config: &LlmConfig) -> Result<Self> {
        let api_key = std::env::var("OPENAI_API_KEY")
            .map_err(|_| anyhow::anyhow!("OPENAI_API_KEY environment variable not set"))?;

        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;

        Ok(Self {
            config: config.clone(),
            api_key,
            client,
        })
    }

    fn model_for(&self, route: Route) -> &str {
        match route {
            Route::Default => &self.config.default_model,
            Route::Think => &self.config.think_model,
            Route::WebSearch => &self.config.web_search_model,
        }
    }

    fn wire_messages(request: &CompletionRequest) -> Vec<serde_json::Value> {
        request
            .messages
            .iter()
            .map(|m| {
                serde_json::json!({
                    "role": m.role.as_str(),
                    "content": m.content,
                })
            })
            .collect()
    }

    async fn chat_completion(&self, request: &CompletionRequest) -> Result<String> {
        let url = format!(
            "{}/chat/completions",
            self.config.base_url.trim_end_matches('/')
        );
        let body = serde_json::json!({
            "model": self.model_for(request.route),
            "messages": Self::wire_messages(request),
            "temperature": request.temperature,
        });

        let response = self
            .client
            .post(&url)
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            bail!("chat completion error {}: {}", status, text);
        }

        let parsed: ChatCompletionResponse = response.json().await?;
        parsed
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .filter(|c| !c.is_empty())
            .ok_or_else(|| anyhow::anyhow!("chat completion returned no content"))
    }

    /// Responses-style call with the live web-search tool enabled.
    async fn responses_with_web_search(&self, request: &CompletionRequest) -> Result<String> {
        let url = format!("{}/responses", self.config.base_url.trim_end_matches('/'));
        let body = serde_json::json!({
            "model": self.model_for(Route::WebSearch),
            "input": Self::wire_messages(request),
            "tools": [{ "type": "web_search" }],
            "temperature": request.temperature,
        });

        let response = self
            .client
            .post(&url)
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            bail!("responses API error {}: {}", status, text);
        }

        let parsed: ResponsesApiResponse = response.json().await?;
        parsed
            .output_text()
            .ok_or_else(|| anyhow::anyhow!("responses API returned no message output"))
    }
}

#[async_trait]
impl ChatModel for OpenAiChat {
    async fn complete(&self, request: &CompletionRequest) -> Result<String> {
        match request.route {
            Route::WebSearch => self.responses_with_web_search(request).await,
            _ => self.chat_completion(request).await,
        }
    }

    async fn stream(&self, request: &CompletionRequest) -> Result<TokenStream> {
        let url = format!(
            "{}/chat/completions",
            self.config.base_url.trim_end_matches('/')
        );
        let body = serde_json::json!({
            "model": self.model_for(request.route),
            "messages": Self::wire_messages(request),
            "temperature": request.temperature,
            "stream": true,
        });

        let response = self
            .client
            .post(&url)
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            bail!("chat completion stream error {}: {}", status, text);
        }

        // Parse SSE off the byte stream on a background task; the returned
        // stream yields token deltas until `[DONE]`.
        let (tx, rx) = tokio::sync::mpsc::channel::<Result<String>>(64);
        let mut bytes = response.bytes_stream();

        tokio::spawn(async move {
            let mut pending = String::new();
            while let Some(next) = bytes.next().await {
                let data = match next {
                    Ok(d) => d,
                    Err(e) => {
                        let _ = tx.send(Err(e.into())).await;
                        return;
                    }
                };
                pending.push_str(&String::from_utf8_lossy(&data));

                while let Some(pos) = pending.find('\n') {
                    let line = pending[..pos].trim().to_string();
                    pending.drain(..=pos);

                    let Some(payload) = line.strip_prefix("data: ") else {
                        continue;
                    };
                    if payload == "[DONE]" {
                        return;
                    }
                    match serde_json::from_str::<ChatCompletionChunk>(payload) {
                        Ok(chunk) => {
                            if let Some(delta) = chunk.delta_content() {
                                if tx.send(Ok(delta)).await.is_err() {
                                    return;
                                }
                            }
                        }
                        Err(e) => {
                            let _ = tx
                                .send(Err(anyhow::anyhow!("malformed stream chunk: {}", e)))
                                .await;
                            return;
                        }
                    }
                }
            }
        });

        Ok(Box::pin(futures_util::stream::unfold(rx, |mut rx| async {
            rx.recv().await.map(|item| (item, rx))
        })))
    }

    async fn synthesize_speech(&self, text: &str, voice: &str) -> Result<Vec<u8>> {
        let url = format!("{}/audio/speech", self.config.base_url.trim_end_matches('/'));
        let body = serde_json::json!({
            "model": "tts-1",
            "voice": voice,
            "input": text,
        });

        let response = self
            .client
            .post(&url)
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            bail!("speech synthesis error {}: {}", status, text);
        }

        Ok(response.bytes().await?.to_vec())
    }
}

// ============ Wire types ============

/// Batch chat-completions response.
#[derive(Debug, Deserialize)]
struct ChatCompletionResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatChoiceMessage,
}

#[derive(Debug, Deserialize)]
struct ChatChoiceMessage {
    content: Option<String>,
}

/// One SSE chunk of a streaming chat completion.
#[derive(Debug, Deserialize)]
struct ChatCompletionChunk {
    choices: Vec<ChunkChoice>,
}

#[derive(Debug, Deserialize)]
struct ChunkChoice {
    delta: ChunkDelta,
}

#[derive(Debug, Deserialize)]
struct ChunkDelta {
    content: Option<String>,
}

impl ChatCompletionChunk {
    fn delta_content(self) -> Option<String> {
        self.choices
            .into_iter()
            .next()
            .and_then(|c| c.delta.content)
            .filter(|c| !c.is_empty())
    }
}

/// Responses-API result: the answer text lives in `output[].content[].text`
/// on items of type `message`.
#[derive(Debug, Deserialize)]
struct ResponsesApiResponse {
    output: Vec<ResponsesOutputItem>,
}

#[derive(Debug, Deserialize)]
struct ResponsesOutputItem {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    content: Vec<ResponsesContentPart>,
}

#[derive(Debug, Deserialize)]
struct ResponsesContentPart {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    text: String,
}

impl ResponsesApiResponse {
    fn output_text(&self) -> Option<String> {
        let text: String = self
            .output
            .iter()
            .filter(|item| item.kind == "message")
            .flat_map(|item| item.content.iter())
            .filter(|part| part.kind == "output_text" && !part.text.is_empty())
            .map(|part| part.text.as_str())
            .collect();
        if text.is_empty() {
            None
        } else {
            Some(text)
        }
    }
}
