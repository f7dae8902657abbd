//! Core data models for the indexing pipeline and query path.
//!
//! These types represent the repositories, raw documents, chunks, and chat
//! messages that flow through load → chunk → embed → store → retrieve.

use anyhow::{bail, Result};
use serde::{Deserialize, Serialize};

/// Lifecycle state of a repository, driven exclusively by the indexer.
///
/// Transitions: `NotStarted → Loading → Imported` on success,
/// `Loading → Error` on a load/chunk/credential failure, and
/// `Loading → NotStarted` on a storage failure (chunks were produced but
/// could not be persisted — retry from scratch).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RepoStatus {
    NotStarted,
    Loading,
    Imported,
    Error,
    Ready,
}

impl RepoStatus {
    /// Storage representation (also the wire representation).
    pub fn as_str(&self) -> &'static str {
        match self {
            RepoStatus::NotStarted => "NOT_STARTED",
            RepoStatus::Loading => "LOADING",
            RepoStatus::Imported => "IMPORTED",
            RepoStatus::Error => "ERROR",
            RepoStatus::Ready => "READY",
        }
    }

    pub fn parse(s: &str) -> Result<Self> {
        match s {
            "NOT_STARTED" => Ok(RepoStatus::NotStarted),
            "LOADING" => Ok(RepoStatus::Loading),
            "IMPORTED" => Ok(RepoStatus::Imported),
            "ERROR" => Ok(RepoStatus::Error),
            "READY" => Ok(RepoStatus::Ready),
            other => bail!("Unknown repository status: {}", other),
        }
    }
}

/// One indexed source-code project. Owns its document chunks (cascade delete).
#[derive(Debug, Clone, Serialize)]
pub struct Repository {
    pub id: String,
    /// Display name derived from the last two URL path segments.
    pub name: String,
    /// Unique across all repositories.
    pub url: String,
    pub status: RepoStatus,
    /// Failure message from the most recent run, cleared on success.
    pub error: Option<String>,
    pub created_at: i64,
    pub updated_at: i64,
}

/// Process-wide credentials, read-only from the pipeline's perspective.
/// The most recently created row wins.
#[derive(Debug, Clone)]
pub struct StoreSettings {
    pub id: String,
    /// Embedding/chat API key.
    pub api_key: String,
    /// Source-hosting access token.
    pub access_token: String,
    pub created_at: i64,
}

/// A raw file fetched from the hosting API, before chunking.
#[derive(Debug, Clone, PartialEq)]
pub struct SourceDocument {
    /// Path of the file within the repository tree.
    pub path: String,
    pub content: String,
}

/// A bounded slice of a source document prepared for embedding.
/// Retains the source path as metadata.
#[derive(Debug, Clone)]
pub struct DocumentChunk {
    pub path: String,
    pub content: String,
}

/// A role-tagged message in a chat conversation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    /// `system`, `user`, or `assistant`.
    pub role: String,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: "system".to_string(),
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: "user".to_string(),
            content: content.into(),
        }
    }
}

/// A retrieved chunk with its similarity score, most-similar first.
#[derive(Debug, Clone)]
pub struct ScoredChunk {
    pub content: String,
    pub score: f32,
}

/// Strip embedded null bytes. Some storage layers reject `\0` inside TEXT
/// columns, and embedding APIs choke on them.
pub fn sanitize_text(input: &str) -> String {
    if input.contains('\0') {
        input.replace('\0', "")
    } else {
        input.to_string()
    }
}
