//! # repochat CLI
//!
//! Commands for database initialization, repository import, retrieval-
//! augmented chat, and the HTTP server.
//!
//! ```bash
//! repochat --config ./repochat.toml <command>
//! ```
//!
//! | Command | Description |
//! |---------|-------------|
//! | `repochat init` | Create the SQLite database and run schema migrations |
//! | `repochat settings set` | Store the embedding API key and GitHub token |
//! | `repochat import <url>` | Register a repository and index it |
//! | `repochat list` | List repositories with their statuses |
//! | `repochat delete <id>` | Delete a repository and all its chunks |
//! | `repochat ask <id> "<question>"` | Ask a question against one repository |
//! | `repochat serve` | Start the HTTP server |

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;

use repochat::chat::OpenAiChat;
use repochat::config::load_config;
use repochat::embedding::OpenAiEmbedder;
use repochat::models::ChatMessage;
use repochat::{db, indexer, migrate, query, server, store};

/// repochat — index a GitHub repository and chat with it.
#[derive(Parser)]
#[command(
    name = "repochat",
    about = "Index a GitHub repository into a SQLite vector store and chat with it",
    version
)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./repochat.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize the database schema. Idempotent.
    Init,

    /// Manage stored credentials.
    Settings {
        #[command(subcommand)]
        command: SettingsCommands,
    },

    /// Register a repository and run the indexing pipeline to completion.
    Import {
        /// Repository URL, e.g. https://github.com/acme/widgets
        url: String,

        /// Branch to index (defaults to the configured default branch).
        #[arg(long)]
        branch: Option<String>,
    },

    /// Re-run the indexing pipeline for an existing repository.
    Reimport {
        /// Repository id (see `repochat list`).
        id: String,

        /// Branch to index (defaults to the configured default branch).
        #[arg(long)]
        branch: Option<String>,
    },

    /// List repositories with their indexing statuses.
    List,

    /// Delete a repository and every chunk it owns.
    Delete {
        /// Repository id.
        id: String,
    },

    /// Ask a question against one repository's index.
    Ask {
        /// Repository id.
        id: String,

        /// The question.
        question: String,
    },

    /// Start the HTTP server.
    Serve,
}

#[derive(Subcommand)]
enum SettingsCommands {
    /// Store a new credentials record (most recent record wins).
    Set {
        /// Embedding/chat API key.
        #[arg(long)]
        api_key: String,

        /// GitHub access token.
        #[arg(long)]
        access_token: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "repochat=info".into()),
        )
        .init();

    let cli = Cli::parse();
    let config = load_config(&cli.config)?;

    match cli.command {
        Commands::Init => {
            let pool = db::connect(&config).await?;
            migrate::run_migrations(&pool).await?;
            pool.close().await;
            println!("initialized {}", config.db.path.display());
        }

        Commands::Settings {
            command: SettingsCommands::Set {
                api_key,
                access_token,
            },
        } => {
            let pool = db::connect(&config).await?;
            migrate::run_migrations(&pool).await?;
            store::save_settings(&pool, &api_key, &access_token).await?;
            pool.close().await;
            println!("settings saved");
        }

        Commands::Import { url, branch } => {
            let pool = db::connect(&config).await?;
            migrate::run_migrations(&pool).await?;

            let repository = store::create_repository(&pool, &url).await?;
            println!("created {} ({})", repository.name, repository.id);

            anyhow::ensure!(
                store::try_begin_indexing(&pool, &repository.id).await?,
                "indexing already in progress for {}",
                repository.id
            );
            let branch = branch.unwrap_or_else(|| config.loader.default_branch.clone());
            let outcome = run_and_report(&pool, &config, &repository.id, &branch).await;
            pool.close().await;
            outcome?;
        }

        Commands::Reimport { id, branch } => {
            let pool = db::connect(&config).await?;
            anyhow::ensure!(
                store::try_begin_indexing(&pool, &id).await?,
                "indexing already in progress (or repository not found) for {}",
                id
            );
            let branch = branch.unwrap_or_else(|| config.loader.default_branch.clone());
            let outcome = run_and_report(&pool, &config, &id, &branch).await;
            pool.close().await;
            outcome?;
        }

        Commands::List => {
            let pool = db::connect(&config).await?;
            let repositories = store::list_repositories(&pool).await?;
            if repositories.is_empty() {
                println!("No repositories.");
            }
            for repo in repositories {
                println!("{}  {}  {}", repo.id, repo.status.as_str(), repo.name);
                if let Some(error) = repo.error {
                    println!("    error: {}", error);
                }
            }
            pool.close().await;
        }

        Commands::Delete { id } => {
            let pool = db::connect(&config).await?;
            store::delete_repository(&pool, &id).await?;
            pool.close().await;
            println!("deleted {}", id);
        }

        Commands::Ask { id, question } => {
            let pool = db::connect(&config).await?;
            let settings = store::latest_settings(&pool)
                .await?
                .context("Store settings are not configured; run `repochat settings set`")?;

            let embedder = OpenAiEmbedder::new(&config.embedding, &settings.api_key)?;
            let chat_model = OpenAiChat::new(&config.chat, &settings.api_key)?;
            let conversation = vec![ChatMessage::user(question)];

            let answer = query::answer(
                &pool,
                &embedder,
                &chat_model,
                &id,
                &conversation,
                config.retrieval.top_k,
            )
            .await?;
            pool.close().await;
            println!("{}", answer);
        }

        Commands::Serve => {
            let pool = db::connect(&config).await?;
            migrate::run_migrations(&pool).await?;
            server::run_server(&config, pool).await?;
        }
    }

    Ok(())
}

/// Run one indexing pass synchronously and print the terminal status.
/// The error is propagated so a failed run exits non-zero; the repository's
/// persisted status already carries the outcome.
async fn run_and_report(
    pool: &sqlx::SqlitePool,
    config: &repochat::config::Config,
    id: &str,
    branch: &str,
) -> Result<()> {
    indexer::run(pool, config, id, branch)
        .await
        .context("indexing failed")?;
    println!("imported");
    Ok(())
}
