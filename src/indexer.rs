//! Indexing pipeline orchestration.
//!
//! One run drives load → chunk → sanitize → embed → replace-and-store for a
//! single repository, then records the outcome on the repository row:
//!
//! - success → `IMPORTED`, error cleared
//! - load/chunk/credential/embed failure → `ERROR` with the failure message
//!   (actionable: fix the URL, branch, or tokens, then import again)
//! - storage failure → `NOT_STARTED` (valid chunks were produced but could
//!   not be persisted — just retry)
//!
//! Imports triggered over HTTP run as detached background tasks; the only
//! channel back to the caller is the persisted status field. The
//! [`crate::store::try_begin_indexing`] check-and-set keeps concurrent runs
//! for the same repository down to at most one.

use anyhow::{anyhow, Context, Result};
use sqlx::SqlitePool;
use tracing::{error, info, warn};

use crate::chunk;
use crate::config::Config;
use crate::embedding::{Embedder, OpenAiEmbedder};
use crate::loader::{DocumentSource, GithubSource};
use crate::models::{sanitize_text, RepoStatus, Repository};
use crate::store;
use crate::vector::{self, VectorRecord};

/// A pipeline failure, split by which terminal status it maps to.
enum StageError {
    /// Talking to the source, credentials, or the embedding model failed.
    Upstream(anyhow::Error),
    /// Chunks were produced but could not be persisted.
    Storage(anyhow::Error),
}

/// Trigger a background indexing run for an existing repository.
///
/// Returns immediately after the status guard flips the repository to
/// `LOADING`; pipeline errors are observable only through the persisted
/// status and the log. A repository that is already `LOADING` is skipped.
pub async fn start_indexing(
    pool: &SqlitePool,
    config: &Config,
    repository_id: &str,
    branch: Option<String>,
) -> Result<()> {
    // Fail fast for unknown ids — nothing to record a status on
    store::get_repository(pool, repository_id)
        .await?
        .with_context(|| format!("Repository {} not found", repository_id))?;

    if !store::try_begin_indexing(pool, repository_id).await? {
        warn!(repository_id, "indexing already in progress, skipping");
        return Ok(());
    }

    let pool = pool.clone();
    let config = config.clone();
    let repository_id = repository_id.to_string();
    let branch = branch.unwrap_or_else(|| config.loader.default_branch.clone());

    tokio::spawn(async move {
        if let Err(e) = run(&pool, &config, &repository_id, &branch).await {
            error!(repository_id, error = %e, "indexing run failed");
        }
    });

    Ok(())
}

/// Run the pipeline to completion for one repository.
///
/// Expects the repository to already be `LOADING` (the caller went through
/// [`store::try_begin_indexing`]). Credentials are resolved from the stored
/// settings and both clients are constructed before any network call.
pub async fn run(
    pool: &SqlitePool,
    config: &Config,
    repository_id: &str,
    branch: &str,
) -> Result<()> {
    let repository = store::get_repository(pool, repository_id)
        .await?
        .with_context(|| format!("Repository {} not found", repository_id))?;

    let outcome = build_clients(pool, config).await;
    let outcome = match outcome {
        Ok((source, embedder)) => {
            execute(pool, config, &repository, branch, &source, &embedder).await
        }
        Err(e) => Err(e),
    };

    finish(pool, &repository, outcome).await
}

/// Like [`run`], but with caller-supplied source and embedding clients.
pub async fn run_with_clients(
    pool: &SqlitePool,
    config: &Config,
    repository_id: &str,
    branch: &str,
    source: &dyn DocumentSource,
    embedder: &dyn Embedder,
) -> Result<()> {
    let repository = store::get_repository(pool, repository_id)
        .await?
        .with_context(|| format!("Repository {} not found", repository_id))?;

    let outcome = execute(pool, config, &repository, branch, source, embedder).await;
    finish(pool, &repository, outcome).await
}

/// Resolve credentials and construct the per-run clients. Missing settings
/// or keys surface here, before anything touches the network.
async fn build_clients(
    pool: &SqlitePool,
    config: &Config,
) -> Result<(GithubSource, OpenAiEmbedder), StageError> {
    let settings = store::latest_settings(pool)
        .await
        .map_err(StageError::Storage)?
        .ok_or_else(|| StageError::Upstream(anyhow!("Store settings are not configured")))?;

    let source =
        GithubSource::new(&config.loader, &settings.access_token).map_err(StageError::Upstream)?;
    let embedder =
        OpenAiEmbedder::new(&config.embedding, &settings.api_key).map_err(StageError::Upstream)?;

    Ok((source, embedder))
}

/// The pipeline stages proper: load, chunk, sanitize, embed, replace.
async fn execute(
    pool: &SqlitePool,
    config: &Config,
    repository: &Repository,
    branch: &str,
    source: &dyn DocumentSource,
    embedder: &dyn Embedder,
) -> Result<usize, StageError> {
    let documents = source
        .fetch(&repository.url, branch)
        .await
        .map_err(StageError::Upstream)?;
    info!(
        repository_id = repository.id,
        documents = documents.len(),
        "loaded documents from {}",
        repository.url
    );

    let chunks = chunk::split_documents(&documents, &config.chunking);
    let contents: Vec<String> = chunks
        .iter()
        .map(|chunk| sanitize_text(&chunk.content))
        .collect();
    info!(
        repository_id = repository.id,
        chunks = contents.len(),
        "split documents into chunks"
    );

    let embeddings = embedder
        .embed_batch(&contents)
        .await
        .map_err(StageError::Upstream)?;
    if embeddings.len() != contents.len() {
        return Err(StageError::Upstream(anyhow!(
            "Embedding count {} does not match chunk count {}",
            embeddings.len(),
            contents.len()
        )));
    }
    if let Some(bad) = embeddings.iter().find(|e| e.len() != embedder.dims()) {
        return Err(StageError::Upstream(anyhow!(
            "Embedding dimension {} does not match expected {}",
            bad.len(),
            embedder.dims()
        )));
    }

    let records: Vec<VectorRecord> = contents
        .into_iter()
        .zip(embeddings)
        .map(|(content, embedding)| VectorRecord { content, embedding })
        .collect();

    // Delete-then-insert in one transaction: no stale chunks survive, no
    // partial insert is ever observable.
    vector::replace_namespace(pool, &repository.id, &records)
        .await
        .map_err(StageError::Storage)?;

    Ok(records.len())
}

/// Map the pipeline outcome onto the repository's terminal status.
async fn finish(
    pool: &SqlitePool,
    repository: &Repository,
    outcome: Result<usize, StageError>,
) -> Result<()> {
    match outcome {
        Ok(stored) => {
            store::update_status(pool, &repository.id, RepoStatus::Imported, None).await?;
            info!(
                repository_id = repository.id,
                stored, "indexing completed"
            );
            Ok(())
        }
        Err(StageError::Upstream(e)) => {
            store::update_status(pool, &repository.id, RepoStatus::Error, Some(&e.to_string()))
                .await?;
            Err(e)
        }
        Err(StageError::Storage(e)) => {
            // The run produced valid chunks but could not persist them;
            // NOT_STARTED signals "retry from scratch" rather than
            // surfacing a stale partial error.
            store::update_status(pool, &repository.id, RepoStatus::NotStarted, None).await?;
            Err(e)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db;
    use crate::migrate;

    #[tokio::test]
    async fn test_run_unknown_repository_fails_fast() {
        let pool = db::connect_memory().await.unwrap();
        migrate::run_migrations(&pool).await.unwrap();
        let config = test_config();

        let result = run(&pool, &config, "missing-id", "main").await;
        let message = result.unwrap_err().to_string();
        assert!(message.contains("not found"));
    }

    #[tokio::test]
    async fn test_run_without_settings_sets_error() {
        let pool = db::connect_memory().await.unwrap();
        migrate::run_migrations(&pool).await.unwrap();
        let config = test_config();

        let repo = store::create_repository(&pool, "https://github.com/acme/widgets")
            .await
            .unwrap();
        store::try_begin_indexing(&pool, &repo.id).await.unwrap();

        assert!(run(&pool, &config, &repo.id, "main").await.is_err());

        let fetched = store::get_repository(&pool, &repo.id).await.unwrap().unwrap();
        assert_eq!(fetched.status, RepoStatus::Error);
        assert!(fetched.error.unwrap().contains("settings"));
    }

    #[tokio::test]
    async fn test_run_with_missing_api_key_sets_error() {
        let pool = db::connect_memory().await.unwrap();
        migrate::run_migrations(&pool).await.unwrap();
        let config = test_config();

        store::save_settings(&pool, "", "ghp_token").await.unwrap();
        let repo = store::create_repository(&pool, "https://github.com/acme/widgets")
            .await
            .unwrap();
        store::try_begin_indexing(&pool, &repo.id).await.unwrap();

        assert!(run(&pool, &config, &repo.id, "main").await.is_err());

        let fetched = store::get_repository(&pool, &repo.id).await.unwrap().unwrap();
        assert_eq!(fetched.status, RepoStatus::Error);
        assert!(fetched.error.unwrap().contains("API key"));
    }

    fn test_config() -> Config {
        let toml = "[db]\npath = \":memory:\"\n";
        toml::from_str(toml).unwrap()
    }
}
