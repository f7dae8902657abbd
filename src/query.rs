//! Retrieval-augmented query service.
//!
//! Given a conversation and a target repository, embeds the most recent
//! message, retrieves the top-K most similar chunks from that repository's
//! namespace, and asks the chat model to answer with the retrieved text as
//! grounding context. A namespace with zero documents is not an error — the
//! model simply answers ungrounded.

use anyhow::{bail, Context, Result};
use sqlx::SqlitePool;

use crate::chat::ChatModel;
use crate::embedding::Embedder;
use crate::models::ChatMessage;
use crate::store;
use crate::vector;

const SYSTEM_PROMPT: &str = "You are a helpful coding assistant. Use the following context:";

/// Answer a conversation against one repository's indexed chunks.
///
/// Fails before any model invocation if the conversation is empty or the
/// repository does not exist.
pub async fn answer(
    pool: &SqlitePool,
    embedder: &dyn Embedder,
    chat_model: &dyn ChatModel,
    namespace_id: &str,
    conversation: &[ChatMessage],
    top_k: usize,
) -> Result<String> {
    let last = conversation
        .last()
        .context("No messages provided")?;

    let repository = store::get_repository(pool, namespace_id)
        .await?
        .with_context(|| format!("Repository {} not found", namespace_id))?;

    let query_vector = embedder.embed(&last.content).await?;
    let retrieved = vector::similarity_search(pool, &repository.id, &query_vector, top_k).await?;

    let context_block = retrieved
        .iter()
        .map(|chunk| chunk.content.as_str())
        .collect::<Vec<_>>()
        .join("\n\n");

    let mut messages = Vec::with_capacity(conversation.len() + 1);
    messages.push(ChatMessage::system(format!(
        "{}\n\n{}",
        SYSTEM_PROMPT, context_block
    )));
    messages.extend_from_slice(conversation);

    let response = chat_model.complete(&messages).await?;
    if response.is_empty() {
        bail!("Chat model returned an empty response");
    }
    Ok(response)
}
