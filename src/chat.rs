//! Chat model client.
//!
//! [`ChatModel`] is the seam between the query service and the external
//! language model. The OpenAI-compatible implementation posts to
//! `/v1/chat/completions`; responses may carry either a plain string or a
//! sequence of content blocks, and [`extract_text`] flattens both shapes
//! without silently dropping non-text blocks.

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::config::ChatConfig;
use crate::models::ChatMessage;

/// Produces a completion for an ordered conversation.
#[async_trait]
pub trait ChatModel: Send + Sync {
    async fn complete(&self, messages: &[ChatMessage]) -> Result<String>;
}

/// Client for an OpenAI-compatible chat completions endpoint.
pub struct OpenAiChat {
    client: reqwest::Client,
    api_key: String,
    config: ChatConfig,
}

impl OpenAiChat {
    /// Build a client from configuration plus the stored API key; a missing
    /// key fails here, before any model invocation.
    pub fn new(config: &ChatConfig, api_key: &str) -> Result<Self> {
        if api_key.trim().is_empty() {
            bail!("Chat API key is required");
        }

        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;

        Ok(Self {
            client,
            api_key: api_key.to_string(),
            config: config.clone(),
        })
    }
}

#[async_trait]
impl ChatModel for OpenAiChat {
    async fn complete(&self, messages: &[ChatMessage]) -> Result<String> {
        let url = format!("{}/v1/chat/completions", self.config.api_base);

        let request = CompletionRequest {
            model: self.config.model.clone(),
            messages: messages.to_vec(),
            temperature: self.config.temperature,
        };

        let response = self
            .client
            .post(&url)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .json(&request)
            .send()
            .await
            .context("Failed to reach chat API")?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            bail!("Chat API error {}: {}", status, body);
        }

        let body: CompletionResponse = response
            .json()
            .await
            .context("Failed to parse chat response")?;

        let choice = body
            .choices
            .into_iter()
            .next()
            .context("Chat response contained no choices")?;

        Ok(extract_text(&choice.message.content))
    }
}

#[derive(Serialize)]
struct CompletionRequest {
    model: String,
    messages: Vec<ChatMessage>,
    temperature: f32,
}

#[derive(Deserialize)]
struct CompletionResponse {
    choices: Vec<CompletionChoice>,
}

#[derive(Deserialize)]
struct CompletionChoice {
    message: ResponseMessage,
}

#[derive(Deserialize)]
struct ResponseMessage {
    content: MessageContent,
}

/// A model response body: either one string or a sequence of blocks.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
pub enum MessageContent {
    Text(String),
    Blocks(Vec<ContentBlock>),
}

/// One block of a multi-part response. Text blocks carry a `text` field;
/// anything else is kept verbatim for the JSON fallback.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
pub enum ContentBlock {
    Text { text: String },
    Other(serde_json::Value),
}

/// Flatten a response into plain text. Text blocks are joined by newline;
/// non-text blocks fall back to their JSON representation rather than being
/// dropped.
pub fn extract_text(content: &MessageContent) -> String {
    match content {
        MessageContent::Text(text) => text.clone(),
        MessageContent::Blocks(blocks) => blocks
            .iter()
            .map(|block| match block {
                ContentBlock::Text { text } => text.clone(),
                ContentBlock::Other(value) => value.to_string(),
            })
            .collect::<Vec<_>>()
            .join("\n"),
    }
}
