//! GitHub repository document loader.
//!
//! Fetches every eligible file of a branch through the GitHub REST API:
//! one call to the recursive tree endpoint, then one contents request per
//! blob with a bounded number of in-flight fetches. Paths matching the
//! ignore deny-list are skipped before any content is requested.
//!
//! Unreadable or binary files are skipped with a warning; authentication
//! failures and missing repositories abort the whole load.

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use globset::{Glob, GlobSet, GlobSetBuilder};
use serde::Deserialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tracing::warn;

use crate::config::LoaderConfig;
use crate::models::SourceDocument;

/// Produces the raw documents of a repository branch.
///
/// The pipeline depends on this trait rather than on the GitHub client
/// directly, so tests can supply a canned source.
#[async_trait]
pub trait DocumentSource: Send + Sync {
    async fn fetch(&self, repo_url: &str, branch: &str) -> Result<Vec<SourceDocument>>;
}

/// [`DocumentSource`] backed by the GitHub REST API.
pub struct GithubSource {
    client: reqwest::Client,
    access_token: String,
    api_base: String,
    max_concurrency: usize,
    ignore: GlobSet,
}

impl GithubSource {
    /// Build a source from loader configuration plus the stored access
    /// token. A missing token is a configuration error, caught here before
    /// any network call.
    pub fn new(config: &LoaderConfig, access_token: &str) -> Result<Self> {
        if access_token.trim().is_empty() {
            bail!("GitHub access token is required");
        }

        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .user_agent(concat!("repochat/", env!("CARGO_PKG_VERSION")))
            .build()?;

        Ok(Self {
            client,
            access_token: access_token.to_string(),
            api_base: config.api_base.trim_end_matches('/').to_string(),
            max_concurrency: config.max_concurrency.max(1),
            ignore: build_globset(&config.ignore_globs)?,
        })
    }

    async fn fetch_tree(&self, owner_repo: &str, branch: &str) -> Result<Vec<TreeEntry>> {
        let url = format!(
            "{}/repos/{}/git/trees/{}?recursive=1",
            self.api_base, owner_repo, branch
        );

        let response = self
            .client
            .get(&url)
            .header("Authorization", format!("Bearer {}", self.access_token))
            .header("Accept", "application/vnd.github+json")
            .send()
            .await
            .with_context(|| format!("Failed to reach hosting API at {}", self.api_base))?;

        let status = response.status();
        if status.as_u16() == 401 || status.as_u16() == 403 {
            bail!("Authentication against the hosting API failed ({})", status);
        }
        if status.as_u16() == 404 {
            bail!("Repository {} or branch {} not found", owner_repo, branch);
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            bail!("Hosting API error {}: {}", status, body);
        }

        let tree: TreeResponse = response
            .json()
            .await
            .context("Failed to parse repository tree response")?;

        if tree.truncated {
            warn!(repo = owner_repo, "repository tree response was truncated");
        }

        Ok(tree.tree)
    }

}

/// Fetch one file's raw content. Returns `None` (with a warning) for files
/// that cannot be read as text. Free function so spawned tasks can own
/// their inputs.
async fn fetch_file(
    client: &reqwest::Client,
    access_token: &str,
    api_base: &str,
    owner_repo: &str,
    branch: &str,
    path: &str,
) -> Option<String> {
    let url = format!(
        "{}/repos/{}/contents/{}?ref={}",
        api_base, owner_repo, path, branch
    );

    let response = client
        .get(&url)
        .header("Authorization", format!("Bearer {}", access_token))
        .header("Accept", "application/vnd.github.raw+json")
        .send()
        .await;

    let response = match response {
        Ok(r) if r.status().is_success() => r,
        Ok(r) => {
            warn!(path, status = %r.status(), "skipping unreadable file");
            return None;
        }
        Err(e) => {
            warn!(path, error = %e, "skipping unreadable file");
            return None;
        }
    };

    let bytes = match response.bytes().await {
        Ok(b) => b,
        Err(e) => {
            warn!(path, error = %e, "skipping unreadable file");
            return None;
        }
    };

    match String::from_utf8(bytes.to_vec()) {
        Ok(text) => Some(text),
        Err(_) => {
            warn!(path, "skipping non-text file");
            None
        }
    }
}

#[async_trait]
impl DocumentSource for GithubSource {
    async fn fetch(&self, repo_url: &str, branch: &str) -> Result<Vec<SourceDocument>> {
        let owner_repo = parse_owner_repo(repo_url)?;
        let tree = self.fetch_tree(&owner_repo, branch).await?;

        let paths: Vec<String> = tree
            .into_iter()
            .filter(|entry| entry.kind == "blob")
            .map(|entry| entry.path)
            .filter(|path| !self.ignore.is_match(path))
            .collect();

        // Bounded fan-out; results land in tree order regardless of
        // completion order.
        let semaphore = Arc::new(Semaphore::new(self.max_concurrency));
        let mut tasks = tokio::task::JoinSet::new();

        for (idx, path) in paths.iter().enumerate() {
            let semaphore = semaphore.clone();
            let client = self.client.clone();
            let access_token = self.access_token.clone();
            let api_base = self.api_base.clone();
            let owner_repo = owner_repo.clone();
            let branch = branch.to_string();
            let path = path.clone();

            tasks.spawn(async move {
                let _permit = match semaphore.acquire_owned().await {
                    Ok(permit) => permit,
                    // The semaphore is never closed while tasks run
                    Err(_) => return (idx, path, None),
                };
                let content = fetch_file(
                    &client,
                    &access_token,
                    &api_base,
                    &owner_repo,
                    &branch,
                    &path,
                )
                .await;
                (idx, path, content)
            });
        }

        let mut slots: Vec<Option<SourceDocument>> = vec![None; paths.len()];
        while let Some(joined) = tasks.join_next().await {
            let (idx, path, content) = joined.context("File fetch task panicked")?;
            if let Some(content) = content {
                slots[idx] = Some(SourceDocument { path, content });
            }
        }

        Ok(slots.into_iter().flatten().collect())
    }
}

/// Extract `owner/repo` from a GitHub URL.
fn parse_owner_repo(repo_url: &str) -> Result<String> {
    let trimmed = repo_url
        .trim()
        .trim_end_matches('/')
        .trim_end_matches(".git");

    let rest = trimmed
        .strip_prefix("https://github.com/")
        .or_else(|| trimmed.strip_prefix("http://github.com/"))
        .or_else(|| trimmed.strip_prefix("git@github.com:"))
        .unwrap_or(trimmed);

    let segments: Vec<&str> = rest.split('/').filter(|s| !s.is_empty()).collect();
    if segments.len() < 2 {
        bail!("Cannot determine owner/repo from URL: {}", repo_url);
    }

    Ok(segments[segments.len() - 2..].join("/"))
}

fn build_globset(patterns: &[String]) -> Result<GlobSet> {
    let mut builder = GlobSetBuilder::new();
    for pattern in patterns {
        builder.add(Glob::new(pattern)?);
    }
    Ok(builder.build()?)
}

#[derive(Deserialize)]
struct TreeResponse {
    tree: Vec<TreeEntry>,
    #[serde(default)]
    truncated: bool,
}

#[derive(Deserialize)]
struct TreeEntry {
    path: String,
    #[serde(rename = "type")]
    kind: String,
}
