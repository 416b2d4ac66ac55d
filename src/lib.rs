//! # cursor-docs
//!
//! A local documentation indexer and hybrid search service for the URLs
//! Cursor tracks under @Docs.
//!
//! Cursor's built-in docs indexing is opaque and often stalls. cursor-docs
//! reads the same URL list out of Cursor's own state databases, scrapes the
//! pages itself, stores chunks in SQLite (FTS5) and, when an embedding model
//! and a vector backend are reachable, in a vector index as well. Queries are
//! answered by keyword, semantic, or fused hybrid ranking.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────┐   ┌──────────────┐   ┌──────────────────┐
//! │ Cursor state │──▶│   Indexer    │──▶│  Storage facade  │
//! │   watcher    │   │ fetch+chunk  │   │ SQLite + vectors │
//! └──────────────┘   └──────┬───────┘   └────────┬─────────┘
//!                           │                    │
//!                    ┌──────┴──────┐      ┌──────┴──────┐
//!                    │ rate limiter│      │HybridSearch │
//!                    └─────────────┘      └─────────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```bash
//! cursor-docs init
//! cursor-docs add https://docs.rs/tokio --follow-links --max-pages 20
//! cursor-docs search "spawn blocking" --mode hybrid
//! cursor-docs cursor sync
//! cursor-docs serve
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`models`] | Sources, chunks, search results |
//! | [`error`] | Error taxonomy |
//! | [`db`] / [`migrate`] | SQLite pools and schema |
//! | [`store`] | Primary and vector store backends |
//! | [`storage`] | Backend selection and capability probing |
//! | [`embedding`] | Embedding provider abstraction |
//! | [`extract`] | HTML/markdown text extraction |
//! | [`chunk`] | Text chunking |
//! | [`rate_limit`] | FIFO token bucket for outbound fetches |
//! | [`indexer`] | Scrape, chunk, store, follow links |
//! | [`search`] | Keyword, semantic, and hybrid search |
//! | [`watcher`] | Cursor state database reader and watcher |
//! | [`supervisor`] | Restarting supervisor for background workers |
//! | [`service`] | The assembled service |
//! | [`logging`] | Tracing subscriber setup |

pub mod chunk;
pub mod config;
pub mod db;
pub mod embedding;
pub mod error;
pub mod extract;
pub mod indexer;
pub mod logging;
pub mod migrate;
pub mod models;
pub mod rate_limit;
pub mod search;
pub mod service;
pub mod storage;
pub mod store;
pub mod supervisor;
pub mod watcher;

pub use error::{DocsError, Result};
pub use service::DocsService;
