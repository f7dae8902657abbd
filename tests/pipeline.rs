//! End-to-end pipeline tests with in-memory SQLite and test-double clients.

use anyhow::Result;
use async_trait::async_trait;
use sqlx::{Row, SqlitePool};
use std::sync::Mutex;

use repochat::chat::ChatModel;
use repochat::config::Config;
use repochat::embedding::Embedder;
use repochat::loader::DocumentSource;
use repochat::models::{ChatMessage, RepoStatus, SourceDocument};
use repochat::{db, indexer, migrate, query, store, vector};

/// Serves a canned set of files, swappable between runs.
struct FakeSource {
    documents: Mutex<Vec<SourceDocument>>,
}

impl FakeSource {
    fn new(documents: Vec<SourceDocument>) -> Self {
        Self {
            documents: Mutex::new(documents),
        }
    }

    fn set(&self, documents: Vec<SourceDocument>) {
        *self.documents.lock().unwrap() = documents;
    }
}

#[async_trait]
impl DocumentSource for FakeSource {
    async fn fetch(&self, _repo_url: &str, _branch: &str) -> Result<Vec<SourceDocument>> {
        Ok(self.documents.lock().unwrap().clone())
    }
}

/// Always fails, standing in for an unreachable source.
struct BrokenSource;

#[async_trait]
impl DocumentSource for BrokenSource {
    async fn fetch(&self, repo_url: &str, _branch: &str) -> Result<Vec<SourceDocument>> {
        anyhow::bail!("Repository {} or branch main not found", repo_url)
    }
}

/// Deterministic, content-dependent embeddings without any network.
struct HashEmbedder;

fn hash_vector(text: &str) -> Vec<f32> {
    use sha2::{Digest, Sha256};
    let digest = Sha256::digest(text.as_bytes());
    digest[..8].iter().map(|&b| b as f32 / 255.0).collect()
}

#[async_trait]
impl Embedder for HashEmbedder {
    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        Ok(texts.iter().map(|t| hash_vector(t)).collect())
    }

    fn dims(&self) -> usize {
        8
    }
}

/// Returns vectors narrower than its advertised dimensionality.
struct NarrowEmbedder;

#[async_trait]
impl Embedder for NarrowEmbedder {
    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        Ok(texts.iter().map(|_| vec![1.0, 0.0]).collect())
    }

    fn dims(&self) -> usize {
        8
    }
}

/// Always fails, standing in for an embedding service outage.
struct BrokenEmbedder;

#[async_trait]
impl Embedder for BrokenEmbedder {
    async fn embed_batch(&self, _texts: &[String]) -> Result<Vec<Vec<f32>>> {
        anyhow::bail!("Embedding API error 503: service unavailable")
    }

    fn dims(&self) -> usize {
        8
    }
}

struct CannedChat;

#[async_trait]
impl ChatModel for CannedChat {
    async fn complete(&self, _messages: &[ChatMessage]) -> Result<String> {
        Ok("The stack appears to be Rust with axum and sqlx.".to_string())
    }
}

fn test_config() -> Config {
    toml::from_str("[db]\npath = \":memory:\"\n").unwrap()
}

async fn setup() -> (SqlitePool, Config) {
    let pool = db::connect_memory().await.unwrap();
    migrate::run_migrations(&pool).await.unwrap();
    (pool, test_config())
}

async fn create_and_begin(pool: &SqlitePool, url: &str) -> String {
    let repo = store::create_repository(pool, url).await.unwrap();
    assert!(store::try_begin_indexing(pool, &repo.id).await.unwrap());
    repo.id
}

async fn namespace_contents(pool: &SqlitePool, namespace_id: &str) -> Vec<String> {
    let rows = sqlx::query(
        "SELECT content FROM documents WHERE namespace_id = ? ORDER BY content",
    )
    .bind(namespace_id)
    .fetch_all(pool)
    .await
    .unwrap();
    rows.iter().map(|r| r.get("content")).collect()
}

fn doc(path: &str, content: impl Into<String>) -> SourceDocument {
    SourceDocument {
        path: path.to_string(),
        content: content.into(),
    }
}

#[tokio::test]
async fn test_successful_run_imports_two_files() {
    let (pool, config) = setup().await;
    let id = create_and_begin(&pool, "https://github.com/acme/widgets").await;

    // One small file (single chunk) and one large file (several chunks
    // at the 2000/200 split)
    let source = FakeSource::new(vec![
        doc("README.md", "a".repeat(500)),
        doc("src/big.rs", "fn f() {}\n".repeat(500)),
    ]);

    indexer::run_with_clients(&pool, &config, &id, "main", &source, &HashEmbedder)
        .await
        .unwrap();

    let repo = store::get_repository(&pool, &id).await.unwrap().unwrap();
    assert_eq!(repo.status, RepoStatus::Imported);
    assert!(repo.error.is_none());

    let count = vector::count_namespace(&pool, &id).await.unwrap();
    assert!(count >= 4, "expected >= 4 chunks, got {}", count);
}

#[tokio::test]
async fn test_load_failure_sets_error_with_message() {
    let (pool, config) = setup().await;
    let id = create_and_begin(&pool, "https://github.com/acme/missing").await;

    let result =
        indexer::run_with_clients(&pool, &config, &id, "main", &BrokenSource, &HashEmbedder).await;
    assert!(result.is_err());

    let repo = store::get_repository(&pool, &id).await.unwrap().unwrap();
    assert_eq!(repo.status, RepoStatus::Error);
    assert!(repo.error.unwrap().contains("not found"));
}

#[tokio::test]
async fn test_embedding_failure_sets_error() {
    let (pool, config) = setup().await;
    let id = create_and_begin(&pool, "https://github.com/acme/widgets").await;

    let source = FakeSource::new(vec![doc("README.md", "hello world")]);
    let result =
        indexer::run_with_clients(&pool, &config, &id, "main", &source, &BrokenEmbedder).await;
    assert!(result.is_err());

    let repo = store::get_repository(&pool, &id).await.unwrap().unwrap();
    assert_eq!(repo.status, RepoStatus::Error);
    assert!(repo.error.unwrap().contains("Embedding API error"));
}

#[tokio::test]
async fn test_wrong_embedding_dimension_sets_error() {
    let (pool, config) = setup().await;
    let id = create_and_begin(&pool, "https://github.com/acme/widgets").await;

    let source = FakeSource::new(vec![doc("README.md", "hello world")]);
    let result =
        indexer::run_with_clients(&pool, &config, &id, "main", &source, &NarrowEmbedder).await;
    assert!(result.is_err());

    let repo = store::get_repository(&pool, &id).await.unwrap().unwrap();
    assert_eq!(repo.status, RepoStatus::Error);
    assert!(repo.error.unwrap().contains("dimension"));
    assert_eq!(vector::count_namespace(&pool, &id).await.unwrap(), 0);
}

#[tokio::test]
async fn test_storage_failure_resets_to_not_started() {
    let (pool, config) = setup().await;
    let id = create_and_begin(&pool, "https://github.com/acme/widgets").await;

    // Make the replace step fail while load/chunk/embed succeed
    sqlx::query("DROP TABLE documents").execute(&pool).await.unwrap();

    let source = FakeSource::new(vec![doc("README.md", "hello world")]);
    let result =
        indexer::run_with_clients(&pool, &config, &id, "main", &source, &HashEmbedder).await;
    assert!(result.is_err());

    let repo = store::get_repository(&pool, &id).await.unwrap().unwrap();
    assert_eq!(repo.status, RepoStatus::NotStarted);
    assert!(repo.error.is_none());
}

#[tokio::test]
async fn test_reimport_replaces_not_appends() {
    let (pool, config) = setup().await;
    let id = create_and_begin(&pool, "https://github.com/acme/widgets").await;

    // First import: ten files
    let files: Vec<SourceDocument> = (0..10)
        .map(|i| doc(&format!("src/file{}.rs", i), format!("contents of file {}", i)))
        .collect();
    let source = FakeSource::new(files);
    indexer::run_with_clients(&pool, &config, &id, "main", &source, &HashEmbedder)
        .await
        .unwrap();
    assert_eq!(vector::count_namespace(&pool, &id).await.unwrap(), 10);

    // Second import: the source shrank to one small file
    source.set(vec![doc("src/only.rs", "the last file standing")]);
    assert!(store::try_begin_indexing(&pool, &id).await.unwrap());
    indexer::run_with_clients(&pool, &config, &id, "main", &source, &HashEmbedder)
        .await
        .unwrap();

    assert_eq!(vector::count_namespace(&pool, &id).await.unwrap(), 1);
    let contents = namespace_contents(&pool, &id).await;
    assert_eq!(contents, vec!["the last file standing".to_string()]);
}

#[tokio::test]
async fn test_rerun_with_unchanged_source_is_idempotent() {
    let (pool, config) = setup().await;
    let id = create_and_begin(&pool, "https://github.com/acme/widgets").await;

    let source = FakeSource::new(vec![
        doc("a.txt", "alpha\n\nbeta\n\ngamma"),
        doc("b.txt", "delta\n\nepsilon"),
    ]);

    indexer::run_with_clients(&pool, &config, &id, "main", &source, &HashEmbedder)
        .await
        .unwrap();
    let first = namespace_contents(&pool, &id).await;

    assert!(store::try_begin_indexing(&pool, &id).await.unwrap());
    indexer::run_with_clients(&pool, &config, &id, "main", &source, &HashEmbedder)
        .await
        .unwrap();
    let second = namespace_contents(&pool, &id).await;

    assert_eq!(first, second);
}

#[tokio::test]
async fn test_null_bytes_stripped_before_persistence() {
    let (pool, config) = setup().await;
    let id = create_and_begin(&pool, "https://github.com/acme/widgets").await;

    let source = FakeSource::new(vec![doc("bin.txt", "left\0middle\0right")]);
    indexer::run_with_clients(&pool, &config, &id, "main", &source, &HashEmbedder)
        .await
        .unwrap();

    let contents = namespace_contents(&pool, &id).await;
    assert_eq!(contents, vec!["leftmiddleright".to_string()]);
}

#[tokio::test]
async fn test_indexed_namespaces_stay_isolated() {
    let (pool, config) = setup().await;
    let id_a = create_and_begin(&pool, "https://github.com/acme/widgets").await;
    let id_b = create_and_begin(&pool, "https://github.com/acme/gadgets").await;

    let source_a = FakeSource::new(vec![doc("a.rs", "widgets implementation")]);
    let source_b = FakeSource::new(vec![doc("b.rs", "gadgets implementation")]);
    indexer::run_with_clients(&pool, &config, &id_a, "main", &source_a, &HashEmbedder)
        .await
        .unwrap();
    indexer::run_with_clients(&pool, &config, &id_b, "main", &source_b, &HashEmbedder)
        .await
        .unwrap();

    let query_vec = hash_vector("widgets implementation");
    let hits = vector::similarity_search(&pool, &id_a, &query_vec, 10)
        .await
        .unwrap();
    assert_eq!(hits.len(), 1);
    assert_eq!(hits[0].content, "widgets implementation");
}

#[tokio::test]
async fn test_chat_over_indexed_repository() {
    let (pool, config) = setup().await;
    let id = create_and_begin(&pool, "https://github.com/acme/widgets").await;

    let source = FakeSource::new(vec![doc("Cargo.toml", "[dependencies]\naxum = \"0.8\"")]);
    indexer::run_with_clients(&pool, &config, &id, "main", &source, &HashEmbedder)
        .await
        .unwrap();

    let conversation = vec![ChatMessage::user("What's the tech stack?")];
    let answer = query::answer(&pool, &HashEmbedder, &CannedChat, &id, &conversation, 6)
        .await
        .unwrap();
    assert!(!answer.is_empty());
}

#[tokio::test]
async fn test_chat_against_empty_namespace_still_answers() {
    let (pool, _config) = setup().await;
    let repo = store::create_repository(&pool, "https://github.com/acme/empty")
        .await
        .unwrap();

    let conversation = vec![ChatMessage::user("What's the tech stack?")];
    let answer = query::answer(&pool, &HashEmbedder, &CannedChat, &repo.id, &conversation, 6)
        .await
        .unwrap();
    assert!(!answer.is_empty());
}

#[tokio::test]
async fn test_status_guard_skips_concurrent_start() {
    let (pool, config) = setup().await;
    let repo = store::create_repository(&pool, "https://github.com/acme/widgets")
        .await
        .unwrap();

    assert!(store::try_begin_indexing(&pool, &repo.id).await.unwrap());
    // A second trigger while LOADING must not start another run
    indexer::start_indexing(&pool, &config, &repo.id, None)
        .await
        .unwrap();

    let fetched = store::get_repository(&pool, &repo.id).await.unwrap().unwrap();
    assert_eq!(fetched.status, RepoStatus::Loading);
}
