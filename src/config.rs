use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub db: DbConfig,
    #[serde(default)]
    pub loader: LoaderConfig,
    #[serde(default)]
    pub chunking: ChunkingConfig,
    #[serde(default)]
    pub embedding: EmbeddingConfig,
    #[serde(default)]
    pub chat: ChatConfig,
    #[serde(default)]
    pub retrieval: RetrievalConfig,
    #[serde(default)]
    pub server: ServerConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DbConfig {
    pub path: PathBuf,
}

#[derive(Debug, Deserialize, Clone)]
pub struct LoaderConfig {
    /// Base URL of the hosting API. Overridable for tests and GHE.
    #[serde(default = "default_api_base")]
    pub api_base: String,
    /// Branch used when an import request does not name one.
    #[serde(default = "default_branch")]
    pub default_branch: String,
    /// Maximum in-flight file fetches against the hosting API.
    #[serde(default = "default_max_concurrency")]
    pub max_concurrency: usize,
    /// Glob deny-list applied to repository paths.
    #[serde(default = "default_ignore_globs")]
    pub ignore_globs: Vec<String>,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for LoaderConfig {
    fn default() -> Self {
        Self {
            api_base: default_api_base(),
            default_branch: default_branch(),
            max_concurrency: default_max_concurrency(),
            ignore_globs: default_ignore_globs(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

fn default_api_base() -> String {
    "https://api.github.com".to_string()
}
fn default_branch() -> String {
    "main".to_string()
}
fn default_max_concurrency() -> usize {
    5
}
fn default_timeout_secs() -> u64 {
    30
}

/// Lockfiles, build output, VCS metadata, and editor config are never
/// worth embedding.
fn default_ignore_globs() -> Vec<String> {
    [
        "**/node_modules/**",
        "**/dist/**",
        "**/build/**",
        "**/target/**",
        "**/coverage/**",
        "**/.github/**",
        "**/.git/**",
        "**/.vscode/**",
        "**/.idea/**",
        "**/.gitignore",
        "**/.npmignore",
        "**/.eslintrc.js",
        "**/tsconfig.json",
        "**/package.json",
        "**/package-lock.json",
        "**/yarn.lock",
        "**/pnpm-lock.yaml",
        "**/Cargo.lock",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect()
}

#[derive(Debug, Deserialize, Clone)]
pub struct ChunkingConfig {
    /// Target chunk size in characters.
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,
    /// Characters shared between consecutive chunks of one document.
    #[serde(default = "default_chunk_overlap")]
    pub chunk_overlap: usize,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            chunk_size: default_chunk_size(),
            chunk_overlap: default_chunk_overlap(),
        }
    }
}

fn default_chunk_size() -> usize {
    2000
}
fn default_chunk_overlap() -> usize {
    200
}

#[derive(Debug, Deserialize, Clone)]
pub struct EmbeddingConfig {
    #[serde(default = "default_embedding_base")]
    pub api_base: String,
    #[serde(default = "default_embedding_model")]
    pub model: String,
    #[serde(default = "default_dims")]
    pub dims: usize,
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            api_base: default_embedding_base(),
            model: default_embedding_model(),
            dims: default_dims(),
            batch_size: default_batch_size(),
            max_retries: default_max_retries(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

fn default_embedding_base() -> String {
    "https://api.openai.com".to_string()
}
fn default_embedding_model() -> String {
    "text-embedding-3-small".to_string()
}
fn default_dims() -> usize {
    1536
}
fn default_batch_size() -> usize {
    64
}
fn default_max_retries() -> u32 {
    5
}

#[derive(Debug, Deserialize, Clone)]
pub struct ChatConfig {
    #[serde(default = "default_embedding_base")]
    pub api_base: String,
    #[serde(default = "default_chat_model")]
    pub model: String,
    /// Zero for deterministic, reproducible answers.
    #[serde(default)]
    pub temperature: f32,
    #[serde(default = "default_chat_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for ChatConfig {
    fn default() -> Self {
        Self {
            api_base: default_embedding_base(),
            model: default_chat_model(),
            temperature: 0.0,
            timeout_secs: default_chat_timeout_secs(),
        }
    }
}

fn default_chat_model() -> String {
    "gpt-4o-mini".to_string()
}
fn default_chat_timeout_secs() -> u64 {
    120
}

#[derive(Debug, Deserialize, Clone)]
pub struct RetrievalConfig {
    /// Number of chunks retrieved as grounding context.
    #[serde(default = "default_top_k")]
    pub top_k: usize,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            top_k: default_top_k(),
        }
    }
}

fn default_top_k() -> usize {
    6
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    #[serde(default = "default_bind")]
    pub bind: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
        }
    }
}

fn default_bind() -> String {
    "127.0.0.1:7410".to_string()
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let config: Config = toml::from_str(&content).with_context(|| "Failed to parse config file")?;

    if config.chunking.chunk_size == 0 {
        anyhow::bail!("chunking.chunk_size must be > 0");
    }
    if config.chunking.chunk_overlap >= config.chunking.chunk_size {
        anyhow::bail!("chunking.chunk_overlap must be smaller than chunking.chunk_size");
    }
    if config.loader.max_concurrency == 0 {
        anyhow::bail!("loader.max_concurrency must be > 0");
    }
    if config.embedding.dims == 0 {
        anyhow::bail!("embedding.dims must be > 0");
    }
    if config.embedding.batch_size == 0 {
        anyhow::bail!("embedding.batch_size must be > 0");
    }
    if config.retrieval.top_k == 0 {
        anyhow::bail!("retrieval.top_k must be >= 1");
    }

    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_config(content: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(content.as_bytes()).unwrap();
        file
    }

    #[test]
    fn test_minimal_config_uses_defaults() {
        let file = write_config("[db]\npath = \"/tmp/repochat.sqlite\"\n");
        let config = load_config(file.path()).unwrap();
        assert_eq!(config.chunking.chunk_size, 2000);
        assert_eq!(config.chunking.chunk_overlap, 200);
        assert_eq!(config.loader.max_concurrency, 5);
        assert_eq!(config.loader.default_branch, "main");
        assert_eq!(config.retrieval.top_k, 6);
        assert_eq!(config.chat.temperature, 0.0);
        assert!(config
            .loader
            .ignore_globs
            .iter()
            .any(|g| g.contains("node_modules")));
    }

    #[test]
    fn test_rejects_overlap_not_below_size() {
        let file = write_config(
            "[db]\npath = \"/tmp/repochat.sqlite\"\n[chunking]\nchunk_size = 100\nchunk_overlap = 100\n",
        );
        assert!(load_config(file.path()).is_err());
    }

    #[test]
    fn test_rejects_zero_chunk_size() {
        let file = write_config(
            "[db]\npath = \"/tmp/repochat.sqlite\"\n[chunking]\nchunk_size = 0\n",
        );
        assert!(load_config(file.path()).is_err());
    }
}
