//! # repochat
//!
//! Index a GitHub repository into a SQLite vector store and chat with it.
//!
//! repochat fetches every eligible file of a repository branch through the
//! GitHub API, splits the files into overlapping chunks, embeds each chunk
//! with an external embedding model, and persists chunk text plus embedding
//! under the repository's namespace. A chat request then retrieves the
//! most similar chunks and asks a language model to answer with them as
//! grounding context (retrieval-augmented generation).
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────┐   ┌──────────────────────────┐   ┌───────────┐
//! │  GitHub  │──▶│   Indexing Pipeline       │──▶│  SQLite   │
//! │   API    │   │ load→chunk→embed→replace │   │ vectors   │
//! └──────────┘   └──────────────────────────┘   └─────┬─────┘
//!                                                     │
//!                                  ┌──────────────────┤
//!                                  ▼                  ▼
//!                            ┌──────────┐      ┌──────────┐
//!                            │   CLI    │      │   HTTP   │
//!                            │(repochat)│      │  (axum)  │
//!                            └──────────┘      └──────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```bash
//! repochat init                                  # create database
//! repochat settings set --api-key K --access-token T
//! repochat import https://github.com/acme/widgets
//! repochat ask <repo-id> "What's the tech stack?"
//! repochat serve                                 # start HTTP server
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`models`] | Core data types |
//! | [`loader`] | GitHub document loader |
//! | [`chunk`] | Recursive text chunking |
//! | [`embedding`] | Embedding client + vector utilities |
//! | [`vector`] | Namespace-scoped vector store |
//! | [`indexer`] | Indexing pipeline state machine |
//! | [`chat`] | Chat model client |
//! | [`query`] | Retrieval-augmented answering |
//! | [`server`] | HTTP API |
//! | [`db`] | Database connection |
//! | [`migrate`] | Schema migrations |

pub mod chat;
pub mod chunk;
pub mod config;
pub mod db;
pub mod embedding;
pub mod indexer;
pub mod loader;
pub mod migrate;
pub mod models;
pub mod query;
pub mod server;
pub mod store;
pub mod vector;
