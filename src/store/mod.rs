//! Storage abstraction for cursor-docs.
//!
//! Two traits split the persistence concerns:
//!
//! - [`Store`]: the primary store. Sources, chunks, keyword search and
//!   link-follow bookkeeping. Always present (SQLite + FTS5).
//! - [`VectorStore`]: optional similarity index over chunk embeddings,
//!   detected at startup (local SQLite table or a remote SurrealDB).
//!
//! Both are selected once and injected as `Arc<dyn …>` into the
//! [`Storage`](crate::storage::Storage) facade.
//!
//! Implementations must be `Send + Sync` to work with async runtimes.

pub mod local_vector;
pub mod sqlite;
pub mod surreal;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::error::Result;
use crate::models::{Chunk, Source};

/// A candidate chunk returned from keyword or vector search.
#[derive(Debug, Clone)]
pub struct ChunkCandidate {
    pub chunk_id: String,
    pub source_id: String,
    /// Positive, higher-is-better score (`abs(bm25)` or cosine similarity).
    pub raw_score: f64,
}

/// Link-follow attempt state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Queued,
    Done,
    Failed,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Queued => "queued",
            JobStatus::Done => "done",
            JobStatus::Failed => "failed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "queued" => Some(JobStatus::Queued),
            "done" => Some(JobStatus::Done),
            "failed" => Some(JobStatus::Failed),
            _ => None,
        }
    }
}

/// One row of `scrape_jobs`.
#[derive(Debug, Clone, Serialize)]
pub struct ScrapeJob {
    pub source_id: String,
    pub url: String,
    pub status: JobStatus,
    pub error: Option<String>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct StoreStats {
    pub sources: i64,
    pub chunks: i64,
    pub queued_jobs: i64,
}

/// Primary persistence backend.
///
/// # Operations
///
/// | Method | Purpose |
/// |--------|---------|
/// | [`create_source`](Store::create_source) | Insert a new source (url must be unique) |
/// | [`update_source`](Store::update_source) | Persist status, counts, hash, timestamps |
/// | [`store_chunks`](Store::store_chunks) | Insert one page's chunks in one transaction |
/// | [`clear_chunks`](Store::clear_chunks) | Drop every chunk of a source |
/// | [`keyword_search`](Store::keyword_search) | FTS5 bm25 search |
/// | [`enqueue_job`](Store::enqueue_job) | Record a link to follow, once per source |
#[async_trait]
pub trait Store: Send + Sync {
    fn backend_name(&self) -> &str;

    async fn create_source(&self, source: &Source) -> Result<()>;
    async fn update_source(&self, source: &Source) -> Result<()>;
    /// Set only the page and chunk counters, leaving status and hash alone.
    async fn update_counts(&self, source_id: &str, pages: i64, chunks: i64) -> Result<()>;
    async fn get_source(&self, id: &str) -> Result<Option<Source>>;
    async fn get_source_by_url(&self, url: &str) -> Result<Option<Source>>;
    async fn list_sources(&self) -> Result<Vec<Source>>;

    /// Delete the source with its chunks and job rows. Returns whether it existed.
    async fn remove_source(&self, id: &str) -> Result<bool>;

    /// Returns the number of chunks removed.
    async fn clear_chunks(&self, source_id: &str) -> Result<u64>;

    /// Insert chunks in position order within one transaction.
    async fn store_chunks(&self, chunks: &[Chunk]) -> Result<()>;

    /// Fetch chunks by id. Unknown ids are silently absent from the result.
    async fn get_chunks(&self, ids: &[String]) -> Result<Vec<Chunk>>;

    /// `(pages, chunks)` currently persisted for a source.
    async fn count_source_content(&self, source_id: &str) -> Result<(i64, i64)>;

    /// Full-text matches, best first. `sources: Some(&[])` matches nothing.
    async fn keyword_search(
        &self,
        query: &str,
        limit: usize,
        sources: Option<&[String]>,
    ) -> Result<Vec<ChunkCandidate>>;

    async fn stats(&self) -> Result<StoreStats>;

    /// Queue `url` for `source_id`. Returns `false` if the pair was seen before.
    async fn enqueue_job(&self, source_id: &str, url: &str) -> Result<bool>;
    async fn finish_job(&self, source_id: &str, url: &str, error: Option<&str>) -> Result<()>;
    async fn queued_jobs(&self) -> Result<Vec<ScrapeJob>>;
    async fn clear_jobs(&self, source_id: &str) -> Result<()>;
}

/// Optional similarity index over chunk embeddings.
#[async_trait]
pub trait VectorStore: Send + Sync {
    fn backend_name(&self) -> &str;

    /// Cheap reachability check; never errors.
    async fn probe(&self) -> bool;

    async fn upsert(&self, chunk: &Chunk, vector: &[f32], model: &str) -> Result<()>;

    /// Nearest chunks by cosine similarity, best first. An empty `sources`
    /// filter matches nothing.
    async fn search(
        &self,
        query: &[f32],
        limit: usize,
        sources: Option<&[String]>,
    ) -> Result<Vec<ChunkCandidate>>;

    async fn delete_source(&self, source_id: &str) -> Result<()>;

    async fn count(&self) -> Result<i64>;
}
