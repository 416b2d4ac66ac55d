//! Storage facade: one contract over the primary store, an optional vector
//! backend and an optional embedding provider.
//!
//! Backend selection happens once in [`Storage::open`]:
//!
//! | `vector.backend` | Vector store | Probed with |
//! |------------------|--------------|-------------|
//! | `none` | none (keyword only) | n/a |
//! | `local` | [`LocalVectorStore`] | `SELECT` on `chunk_vectors` |
//! | `surrealdb` | [`SurrealVectorStore`] | `GET /health` |
//!
//! Whether the vector backend and the embedder are usable is cached and
//! re-probed lazily once `storage.probe_ttl_secs` has elapsed. The cache
//! lock is never held across an await.
//!
//! Writes always land in the primary store first. Embedding and vector
//! upserts follow on a best-effort basis: their failures are logged and
//! counted, never returned.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::db;
use crate::embedding::{create_provider, EmbeddingProvider};
use crate::error::{DocsError, Result};
use crate::models::{Chunk, MatchType, SearchResult, Source};
use crate::store::local_vector::LocalVectorStore;
use crate::store::sqlite::SqliteStore;
use crate::store::surreal::SurrealVectorStore;
use crate::store::{ChunkCandidate, Store, VectorStore};

/// Result of the last backend probe.
#[derive(Debug, Clone, Copy)]
pub struct Capabilities {
    pub vector: bool,
    pub embeddings: bool,
    checked_at: Instant,
}

/// Snapshot reported by [`Storage::status`].
#[derive(Debug, Clone, Serialize)]
pub struct StorageStatus {
    pub primary_backend: String,
    pub vector_backend: Option<String>,
    pub vector_available: bool,
    pub embeddings_available: bool,
    pub embedding_model: String,
    pub semantic_ready: bool,
    pub sources: i64,
    pub chunks: i64,
    pub vectors: Option<i64>,
    pub queued_jobs: i64,
    pub checked_at: DateTime<Utc>,
}

/// Outcome of a chunk batch write.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StoreReport {
    pub stored: usize,
    pub embedded: usize,
    pub embed_failures: usize,
}

pub struct Storage {
    primary: Arc<dyn Store>,
    vector: Option<Arc<dyn VectorStore>>,
    embedder: Arc<dyn EmbeddingProvider>,
    caps: RwLock<Capabilities>,
    ttl: Duration,
}

impl Storage {
    /// Open the configured backends and run the initial capability probe.
    pub async fn open(config: &Config) -> Result<Self> {
        let pools = db::connect(&config.db.path).await?;
        let primary: Arc<dyn Store> = Arc::new(SqliteStore::new(pools.clone()));

        let vector: Option<Arc<dyn VectorStore>> = match config.vector.backend.as_str() {
            "none" => None,
            "local" => Some(Arc::new(LocalVectorStore::new(pools))),
            "surrealdb" => Some(Arc::new(SurrealVectorStore::new(&config.vector)?)),
            other => {
                return Err(DocsError::InvalidInput(format!(
                    "Unknown vector backend: {}",
                    other
                )))
            }
        };
        let embedder = create_provider(&config.embedding)?;

        Ok(Self::detect(
            primary,
            vector,
            embedder,
            Duration::from_secs(config.storage.probe_ttl_secs),
        )
        .await)
    }

    /// Assemble a facade from already-built backends and probe them.
    pub async fn detect(
        primary: Arc<dyn Store>,
        vector: Option<Arc<dyn VectorStore>>,
        embedder: Arc<dyn EmbeddingProvider>,
        ttl: Duration,
    ) -> Self {
        let caps = probe(vector.as_deref(), embedder.as_ref()).await;
        info!(
            primary = primary.backend_name(),
            vector = vector.as_ref().map(|v| v.backend_name()).unwrap_or("none"),
            vector_available = caps.vector,
            embeddings_available = caps.embeddings,
            "storage backends selected"
        );
        Self {
            primary,
            vector,
            embedder,
            caps: RwLock::new(caps),
            ttl,
        }
    }

    pub fn primary(&self) -> &Arc<dyn Store> {
        &self.primary
    }

    pub fn embedder(&self) -> &Arc<dyn EmbeddingProvider> {
        &self.embedder
    }

    fn cached_caps(&self) -> Option<Capabilities> {
        self.caps.read().ok().map(|c| *c)
    }

    fn store_caps(&self, caps: Capabilities) {
        if let Ok(mut guard) = self.caps.write() {
            *guard = caps;
        }
    }

    /// Current capabilities, re-probing when the cached answer is stale.
    async fn capabilities(&self) -> Capabilities {
        if let Some(caps) = self.cached_caps() {
            if caps.checked_at.elapsed() < self.ttl {
                return caps;
            }
        }
        self.recheck().await
    }

    /// Force a fresh probe of the vector backend and embedder.
    pub async fn recheck(&self) -> Capabilities {
        let caps = probe(self.vector.as_deref(), self.embedder.as_ref()).await;
        debug!(vector = caps.vector, embeddings = caps.embeddings, "storage capabilities probed");
        self.store_caps(caps);
        caps
    }

    fn mark_embeddings_down(&self) {
        if let Ok(mut guard) = self.caps.write() {
            guard.embeddings = false;
            guard.checked_at = Instant::now();
        }
    }

    /// Whether semantic search can run right now.
    pub async fn semantic_ready(&self) -> bool {
        let caps = self.capabilities().await;
        caps.vector && caps.embeddings
    }

    // ============ Sources ============

    pub async fn create_source(&self, source: &Source) -> Result<()> {
        self.primary.create_source(source).await
    }

    pub async fn update_source(&self, source: &Source) -> Result<()> {
        self.primary.update_source(source).await
    }

    pub async fn update_counts(&self, source_id: &str, pages: i64, chunks: i64) -> Result<()> {
        self.primary.update_counts(source_id, pages, chunks).await
    }

    pub async fn get_source(&self, id: &str) -> Result<Source> {
        self.primary
            .get_source(id)
            .await?
            .ok_or_else(|| DocsError::NotFound(format!("source {}", id)))
    }

    pub async fn get_source_by_url(&self, url: &str) -> Result<Option<Source>> {
        self.primary.get_source_by_url(url).await
    }

    pub async fn list_sources(&self) -> Result<Vec<Source>> {
        self.primary.list_sources().await
    }

    /// Remove a source with its chunks, vectors and job rows.
    pub async fn remove_source(&self, id: &str) -> Result<()> {
        if !self.primary.remove_source(id).await? {
            return Err(DocsError::NotFound(format!("source {}", id)));
        }
        self.drop_vectors(id).await;
        Ok(())
    }

    pub async fn clear_chunks(&self, source_id: &str) -> Result<u64> {
        let removed = self.primary.clear_chunks(source_id).await?;
        self.drop_vectors(source_id).await;
        Ok(removed)
    }

    async fn drop_vectors(&self, source_id: &str) {
        if let Some(vector) = &self.vector {
            if let Err(e) = vector.delete_source(source_id).await {
                warn!(source_id, error = %e, "failed to delete vectors");
            }
        }
    }

    // ============ Chunks ============

    pub async fn store_chunk(&self, chunk: Chunk) -> Result<StoreReport> {
        self.store_chunks(vec![chunk]).await
    }

    /// Persist one page's chunks, then embed and index them when possible.
    pub async fn store_chunks(&self, chunks: Vec<Chunk>) -> Result<StoreReport> {
        self.primary.store_chunks(&chunks).await?;
        let mut report = StoreReport {
            stored: chunks.len(),
            ..StoreReport::default()
        };

        let Some(vector) = &self.vector else {
            return Ok(report);
        };
        let caps = self.capabilities().await;
        if !caps.vector {
            return Ok(report);
        }

        let mut embed_ok = caps.embeddings;
        for chunk in &chunks {
            let embedding = match &chunk.embedding {
                Some(v) => v.clone(),
                None if embed_ok => match self.embedder.embed(&chunk.content).await {
                    Ok(v) => v,
                    Err(e) => {
                        report.embed_failures += 1;
                        warn!(chunk_id = %chunk.id, error = %e, "embedding failed, chunk stored without vector");
                        if matches!(e, DocsError::EmbeddingUnavailable(_)) {
                            embed_ok = false;
                            self.mark_embeddings_down();
                        }
                        continue;
                    }
                },
                None => continue,
            };

            match vector
                .upsert(chunk, &embedding, self.embedder.model_name())
                .await
            {
                Ok(()) => report.embedded += 1,
                Err(e) => {
                    report.embed_failures += 1;
                    warn!(chunk_id = %chunk.id, error = %e, "vector upsert failed");
                }
            }
        }

        Ok(report)
    }

    // ============ Search ============

    /// Keyword search over the primary store.
    pub async fn search_text(
        &self,
        query: &str,
        limit: usize,
        sources: Option<&[String]>,
    ) -> Result<Vec<SearchResult>> {
        let candidates = self.primary.keyword_search(query, limit, sources).await?;
        self.hydrate(candidates, MatchType::Keyword).await
    }

    /// Vector search. Fails with `semantic_unavailable` unless both a live
    /// vector backend and a working embedder are present.
    pub async fn search_semantic(
        &self,
        query: &str,
        limit: usize,
        sources: Option<&[String]>,
    ) -> Result<Vec<SearchResult>> {
        let Some(vector) = &self.vector else {
            return Err(DocsError::SemanticUnavailable(
                "no vector backend configured".to_string(),
            ));
        };
        let caps = self.capabilities().await;
        if !caps.vector {
            return Err(DocsError::SemanticUnavailable(format!(
                "{} vector backend is not reachable",
                vector.backend_name()
            )));
        }
        if !caps.embeddings {
            return Err(DocsError::SemanticUnavailable(format!(
                "embedding provider {} is not available",
                self.embedder.model_name()
            )));
        }

        let query_vec = self.embed_query(query).await?;
        let candidates = vector.search(&query_vec, limit, sources).await?;
        self.hydrate(candidates, MatchType::Semantic).await
    }

    /// Embed a search query; embedder failures mean semantic search is unavailable.
    async fn embed_query(&self, query: &str) -> Result<Vec<f32>> {
        match self.embedder.embed(query).await {
            Ok(v) => Ok(v),
            Err(e @ DocsError::EmbeddingUnavailable(_)) => {
                self.mark_embeddings_down();
                Err(DocsError::SemanticUnavailable(e.to_string()))
            }
            Err(e @ DocsError::EmbeddingFailed(_)) => {
                Err(DocsError::SemanticUnavailable(e.to_string()))
            }
            Err(e) => Err(e),
        }
    }

    /// Semantic when ready, keyword otherwise.
    pub async fn search(
        &self,
        query: &str,
        limit: usize,
        sources: Option<&[String]>,
    ) -> Result<Vec<SearchResult>> {
        if self.semantic_ready().await {
            self.search_semantic(query, limit, sources).await
        } else {
            self.search_text(query, limit, sources).await
        }
    }

    /// Attach full chunk content to candidates, keeping candidate order.
    async fn hydrate(
        &self,
        candidates: Vec<ChunkCandidate>,
        match_type: MatchType,
    ) -> Result<Vec<SearchResult>> {
        let ids: Vec<String> = candidates.iter().map(|c| c.chunk_id.clone()).collect();
        let mut by_id: HashMap<String, Chunk> = self
            .primary
            .get_chunks(&ids)
            .await?
            .into_iter()
            .map(|c| (c.id.clone(), c))
            .collect();

        Ok(candidates
            .into_iter()
            .filter_map(|cand| {
                by_id
                    .remove(&cand.chunk_id)
                    .map(|chunk| SearchResult::from_chunk(chunk, cand.raw_score, match_type))
            })
            .collect())
    }

    /// Raw vector candidates, used by the hybrid engine.
    pub(crate) async fn semantic_candidates(
        &self,
        query: &str,
        limit: usize,
        sources: Option<&[String]>,
    ) -> Result<Vec<ChunkCandidate>> {
        let Some(vector) = &self.vector else {
            return Err(DocsError::SemanticUnavailable(
                "no vector backend configured".to_string(),
            ));
        };
        let query_vec = self.embed_query(query).await?;
        vector.search(&query_vec, limit, sources).await
    }

    pub(crate) async fn keyword_candidates(
        &self,
        query: &str,
        limit: usize,
        sources: Option<&[String]>,
    ) -> Result<Vec<ChunkCandidate>> {
        self.primary.keyword_search(query, limit, sources).await
    }

    pub(crate) async fn chunks_by_id(&self, ids: &[String]) -> Result<Vec<Chunk>> {
        self.primary.get_chunks(ids).await
    }

    // ============ Status ============

    pub async fn status(&self) -> Result<StorageStatus> {
        let caps = self.recheck().await;
        let stats = self.primary.stats().await?;
        let vectors = match &self.vector {
            Some(v) if caps.vector => v.count().await.ok(),
            _ => None,
        };

        Ok(StorageStatus {
            primary_backend: self.primary.backend_name().to_string(),
            vector_backend: self.vector.as_ref().map(|v| v.backend_name().to_string()),
            vector_available: caps.vector,
            embeddings_available: caps.embeddings,
            embedding_model: self.embedder.model_name().to_string(),
            semantic_ready: caps.vector && caps.embeddings,
            sources: stats.sources,
            chunks: stats.chunks,
            vectors,
            queued_jobs: stats.queued_jobs,
            checked_at: Utc::now(),
        })
    }
}

async fn probe(vector: Option<&dyn VectorStore>, embedder: &dyn EmbeddingProvider) -> Capabilities {
    let vector_ok = match vector {
        Some(v) => v.probe().await,
        None => false,
    };
    // No point waking the embedder when there is nowhere to put vectors.
    let embeddings_ok = vector_ok && embedder.health().await;
    Capabilities {
        vector: vector_ok,
        embeddings: embeddings_ok,
        checked_at: Instant::now(),
    }
}
