//! The assembled documentation service.
//!
//! [`DocsService::open`] builds every component from a [`Config`] and wires
//! them together; the CLI (or any embedding application) holds the returned
//! value and calls the public operations on it. Long-lived loops run under
//! the service's [`Supervisor`]:
//!
//! - the rate limiter actor, started on open;
//! - the Cursor watcher, started by [`DocsService::serve`] when enabled.
//!
//! Scrapes and searches are one-shot, so they are not restarted. Each runs
//! on its own task instead; a panic inside one comes back as an `internal`
//! error and leaves the service usable.

use std::future::Future;
use std::sync::Arc;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use crate::config::Config;
use crate::error::{DocsError, Result};
use crate::indexer::{AcceptAll, AddOptions, AddReport, ContentReviewer, FollowReport, Indexer};
use crate::models::{SearchResult, Source};
use crate::rate_limit::RateLimiter;
use crate::search::{HybridSearch, SearchOptions, SearchResponse};
use crate::storage::{Storage, StorageStatus};
use crate::supervisor::{ChildState, ChildStatus, RestartPolicy, Supervisor};
use crate::watcher::{CursorWatcher, SyncReport, WatcherRecord};

pub struct DocsService {
    config: Config,
    storage: Arc<Storage>,
    indexer: Indexer,
    search: HybridSearch,
    watcher: Arc<CursorWatcher>,
    supervisor: Mutex<Supervisor>,
}

impl DocsService {
    /// Open storage and start the rate limiter. Must run inside a tokio runtime.
    pub async fn open(config: Config) -> Result<Self> {
        Self::open_with_reviewer(config, Arc::new(AcceptAll)).await
    }

    /// Like [`open`](Self::open) with a custom gate in front of the index.
    pub async fn open_with_reviewer(
        config: Config,
        reviewer: Arc<dyn ContentReviewer>,
    ) -> Result<Self> {
        let storage = Arc::new(Storage::open(&config).await?);

        let (limiter, limiter_worker) = RateLimiter::new(
            config.rate_limit.requests_per_second,
            config.rate_limit.burst,
        );
        let mut supervisor = Supervisor::new(RestartPolicy::default());
        supervisor.spawn(limiter_worker);

        let indexer = Indexer::new(&config, storage.clone(), limiter, reviewer)?;
        let search = HybridSearch::new(storage.clone(), &config.retrieval);
        let watcher = Arc::new(CursorWatcher::new(config.watcher.clone(), indexer.clone()));

        Ok(Self {
            config,
            storage,
            indexer,
            search,
            watcher,
            supervisor: Mutex::new(supervisor),
        })
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    // ============ Sources ============

    pub async fn add(&self, url: &str, opts: AddOptions) -> Result<AddReport> {
        let indexer = self.indexer.clone();
        let url = url.to_string();
        isolated("add", async move { indexer.add(&url, opts).await }).await
    }

    pub async fn refresh(&self, source_id: &str) -> Result<AddReport> {
        let indexer = self.indexer.clone();
        let source_id = source_id.to_string();
        isolated("refresh", async move { indexer.refresh(&source_id).await }).await
    }

    pub async fn remove(&self, source_id: &str) -> Result<()> {
        self.indexer.remove(source_id).await
    }

    pub async fn list(&self) -> Result<Vec<Source>> {
        self.storage.list_sources().await
    }

    // ============ Search ============

    /// Mode-aware search; see [`HybridSearch`].
    pub async fn search(&self, query: &str, opts: SearchOptions) -> Result<SearchResponse> {
        let search = self.search.clone();
        let query = query.to_string();
        isolated("search", async move { search.query(&query, opts).await }).await
    }

    /// Vector-only search. Errors with `semantic_unavailable` instead of falling back.
    pub async fn search_semantic(
        &self,
        query: &str,
        opts: SearchOptions,
    ) -> Result<Vec<SearchResult>> {
        let limit = self.limit(&opts);
        self.storage
            .search_semantic(query, limit, opts.sources.as_deref())
            .await
    }

    pub async fn search_text(&self, query: &str, opts: SearchOptions) -> Result<Vec<SearchResult>> {
        let limit = self.limit(&opts);
        self.storage
            .search_text(query, limit, opts.sources.as_deref())
            .await
    }

    fn limit(&self, opts: &SearchOptions) -> usize {
        opts.limit
            .unwrap_or(self.config.retrieval.default_limit)
            .max(1)
    }

    // ============ Status and Cursor ============

    pub async fn storage_status(&self) -> Result<StorageStatus> {
        self.storage.status().await
    }

    pub async fn sync_from_cursor(&self) -> SyncReport {
        self.watcher.sync_from_cursor().await
    }

    pub async fn list_cursor_docs(&self) -> Vec<WatcherRecord> {
        self.watcher.list_cursor_docs().await
    }

    // ============ Lifecycle ============

    /// Recover sources abandoned mid-index, resume unfinished
    /// link-following and start the watcher.
    ///
    /// Returns the resumed follow tasks.
    pub async fn start_background(&self) -> Result<Vec<JoinHandle<FollowReport>>> {
        let recovered = self.indexer.recover_stuck().await?;
        if !recovered.is_empty() {
            info!(sources = recovered.len(), "marked interrupted sources as failed");
        }

        let resumed = self.indexer.resume_interrupted().await?;
        if !resumed.is_empty() {
            info!(sources = resumed.len(), "resumed interrupted link-following");
        }

        if self.config.watcher.enabled {
            self.supervisor.lock().await.spawn(self.watcher.clone());
            info!("Cursor watcher started");
        } else {
            info!("Cursor watcher disabled");
        }
        Ok(resumed)
    }

    /// Run background work until Ctrl-C, then shut down.
    pub async fn serve(self) -> Result<()> {
        self.start_background().await?;
        info!(db = %self.config.db.path.display(), "cursor-docs service running");

        tokio::signal::ctrl_c()
            .await
            .map_err(|e| DocsError::Internal(format!("cannot listen for Ctrl-C: {}", e)))?;
        info!("shutting down");

        self.shutdown().await;
        Ok(())
    }

    /// Stop supervised workers. Database pools close when the service drops.
    pub async fn shutdown(self) {
        let supervisor = self.supervisor.into_inner();
        for name in ["rate_limiter", "cursor_watcher"] {
            if let Some(status) = supervisor.status(name) {
                if status.state == ChildState::GaveUp {
                    warn!(worker = name, error = ?status.last_error, "worker had given up before shutdown");
                }
            }
        }
        supervisor.shutdown().await;
    }

    /// Supervision state of a background worker, if it was ever started.
    pub async fn worker_status(&self, name: &str) -> Option<ChildStatus> {
        self.supervisor.lock().await.status(name)
    }
}

/// Run `fut` on its own task so a panic surfaces as an error.
async fn isolated<T, F>(op: &'static str, fut: F) -> Result<T>
where
    T: Send + 'static,
    F: Future<Output = Result<T>> + Send + 'static,
{
    match tokio::spawn(fut).await {
        Ok(result) => result,
        Err(e) => {
            error!(op, error = %e, "task did not complete");
            Err(DocsError::Internal(format!("{} task failed: {}", op, e)))
        }
    }
}
