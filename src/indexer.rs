//! Scrape → extract → chunk → store pipeline.
//!
//! ```text
//! add(url)
//!   │ rate limiter token
//!   ▼
//! fetch ──▶ extract ──▶ review ──▶ chunk ──▶ Storage::store_chunks
//!   │                                             │
//!   │ failure: source → failed, error returned    ▼
//!   │                                     source → indexed
//!   ▼
//! follow_links? ──▶ background task, BFS over same-host links,
//!                   bounded by max_pages, failures skipped
//! ```
//!
//! Every attempted link is mirrored in `scrape_jobs`. A link is queued at
//! most once per source, and never more links than the remaining page
//! budget, so the queue left behind by a crash is exactly the work still
//! owed. [`Indexer::resume_interrupted`] picks it up at service start.
//!
//! A source is indexed by at most one task of this process at a time. A
//! source found in `indexing` with no such task was abandoned by a run that
//! died mid-index; [`Indexer::recover_stuck`] marks it `failed`, and `add`
//! or `refresh` re-enter it directly. Each source has at most one
//! link-following task; re-indexing or removing the source cancels it.

use sha2::{Digest, Sha256};
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::task::{AbortHandle, JoinHandle};
use tracing::{debug, info, warn};
use url::Url;

use crate::chunk::chunk_text;
use crate::config::Config;
use crate::error::{DocsError, Result};
use crate::extract::{extract, ExtractedPage};
use crate::models::{name_from_url, Chunk, Source, SourceConfig, SourceStatus};
use crate::rate_limit::RateLimiter;
use crate::storage::Storage;

// ============ Review gate ============

/// Verdict of a [`ContentReviewer`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Review {
    Accept,
    Reject(String),
}

/// Decides whether extracted content may enter the index.
pub trait ContentReviewer: Send + Sync {
    fn review(&self, url: &str, page: &ExtractedPage) -> Review;
}

/// Reviewer that accepts everything.
pub struct AcceptAll;

impl ContentReviewer for AcceptAll {
    fn review(&self, _url: &str, _page: &ExtractedPage) -> Review {
        Review::Accept
    }
}

// ============ Requests and reports ============

/// Per-call overrides for [`Indexer::add`]; `None` uses the configured default.
#[derive(Debug, Clone, Default)]
pub struct AddOptions {
    pub name: Option<String>,
    pub max_pages: Option<usize>,
    pub follow_links: Option<bool>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AddOutcome {
    /// The root page was (re)indexed.
    Indexed,
    /// The URL is already indexed with identical content, or is mid-index.
    Skipped,
}

#[derive(Debug)]
pub struct AddReport {
    pub source: Source,
    pub outcome: AddOutcome,
    /// Chunks written for the root page.
    pub chunks: usize,
    /// Background link-following, when started.
    pub follow: Option<JoinHandle<FollowReport>>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FollowReport {
    pub pages_indexed: usize,
    pub pages_failed: usize,
    pub chunks: usize,
}

struct Fetched {
    url: Url,
    content_type: String,
    body: String,
    hash: String,
}

// ============ Task bookkeeping ============

/// Link-following tasks by source id, tagged with a generation so a task
/// can tell it has been superseded.
#[derive(Default)]
struct FollowTasks {
    next_generation: u64,
    tasks: HashMap<String, (u64, AbortHandle)>,
}

/// Marks a source as being indexed by this process until dropped.
struct Claim {
    claims: Arc<Mutex<HashSet<String>>>,
    source_id: String,
}

impl Drop for Claim {
    fn drop(&mut self) {
        self.claims
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&self.source_id);
    }
}

// ============ Indexer ============

#[derive(Clone)]
pub struct Indexer {
    storage: Arc<Storage>,
    limiter: RateLimiter,
    client: reqwest::Client,
    reviewer: Arc<dyn ContentReviewer>,
    chunk_size: usize,
    overlap: usize,
    default_max_pages: usize,
    default_follow: bool,
    claims: Arc<Mutex<HashSet<String>>>,
    follows: Arc<Mutex<FollowTasks>>,
}

impl Indexer {
    pub fn new(
        config: &Config,
        storage: Arc<Storage>,
        limiter: RateLimiter,
        reviewer: Arc<dyn ContentReviewer>,
    ) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.scraper.timeout_secs))
            .redirect(reqwest::redirect::Policy::limited(config.scraper.max_redirects))
            .user_agent(config.scraper.user_agent.clone())
            .build()?;

        Ok(Self {
            storage,
            limiter,
            client,
            reviewer,
            chunk_size: config.chunking.chunk_size,
            overlap: config.chunking.overlap,
            default_max_pages: config.scraper.max_pages,
            default_follow: config.scraper.follow_links,
            claims: Arc::default(),
            follows: Arc::default(),
        })
    }

    pub fn storage(&self) -> &Arc<Storage> {
        &self.storage
    }

    /// Index `url`, creating its source if needed.
    ///
    /// For a known URL the root page is re-fetched and hashed; identical
    /// content on an indexed source is reported as [`AddOutcome::Skipped`]
    /// with no writes, as is a source another task is indexing right now.
    /// A failed fetch of a new source marks it `failed`.
    pub async fn add(&self, url: &str, opts: AddOptions) -> Result<AddReport> {
        let url = parse_doc_url(url)?;

        if let Some(mut source) = self.storage.get_source_by_url(url.as_str()).await? {
            let Some(_claim) = self.claim(&source.id) else {
                debug!(source_id = %source.id, "source is already being indexed");
                return Ok(skipped(source));
            };

            let fetched = self.fetch(&url).await?;
            if source.status == SourceStatus::Indexed
                && source.content_hash.as_deref() == Some(fetched.hash.as_str())
            {
                info!(source_id = %source.id, url = %url, "content unchanged, skipping");
                return Ok(skipped(source));
            }

            if let Some(name) = opts.name {
                source.name = name;
            }
            if let Some(max_pages) = opts.max_pages {
                source.config.max_pages = max_pages.max(1);
            }
            if let Some(follow) = opts.follow_links {
                source.config.follow_links = follow;
            }
            self.begin_reindex(&mut source).await?;
            return self.index_root(source, fetched).await;
        }

        let config = SourceConfig {
            max_pages: opts.max_pages.unwrap_or(self.default_max_pages).max(1),
            follow_links: opts.follow_links.unwrap_or(self.default_follow),
        };
        let name = opts.name.unwrap_or_else(|| name_from_url(url.as_str()));
        let mut source = Source::new(url.as_str(), &name, config);
        self.storage.create_source(&source).await?;
        info!(source_id = %source.id, url = %url, "source created");
        let _claim = self.claim(&source.id);

        source.transition(SourceStatus::Indexing)?;
        self.storage.update_source(&source).await?;

        match self.fetch(&url).await {
            Ok(fetched) => self.index_root(source, fetched).await,
            Err(e) => {
                self.fail(&mut source, &e).await;
                Err(e)
            }
        }
    }

    /// Re-scrape an existing source from scratch.
    ///
    /// A source another task is indexing right now is reported as
    /// [`AddOutcome::Skipped`].
    pub async fn refresh(&self, source_id: &str) -> Result<AddReport> {
        let mut source = self.storage.get_source(source_id).await?;
        let Some(_claim) = self.claim(&source.id) else {
            debug!(source_id, "source is already being indexed");
            return Ok(skipped(source));
        };
        self.begin_reindex(&mut source).await?;

        let url = parse_doc_url(&source.url)?;
        match self.fetch(&url).await {
            Ok(fetched) => self.index_root(source, fetched).await,
            Err(e) => {
                self.fail(&mut source, &e).await;
                Err(e)
            }
        }
    }

    /// Remove a source with its chunks, vectors and jobs.
    pub async fn remove(&self, source_id: &str) -> Result<()> {
        self.cancel_follow(source_id);
        self.storage.remove_source(source_id).await?;
        info!(source_id, "source removed");
        Ok(())
    }

    /// Mark sources left in `indexing` by a dead run as `failed`.
    ///
    /// Sources this process is indexing are left alone. Returns the ids of
    /// the recovered sources.
    pub async fn recover_stuck(&self) -> Result<Vec<String>> {
        let interrupted = DocsError::Internal("indexing was interrupted".to_string());
        let mut recovered = Vec::new();
        for mut source in self.storage.list_sources().await? {
            if source.status != SourceStatus::Indexing {
                continue;
            }
            let Some(_claim) = self.claim(&source.id) else {
                continue;
            };
            self.fail(&mut source, &interrupted).await;
            recovered.push(source.id);
        }
        Ok(recovered)
    }

    /// Restart link-following left unfinished by a previous run.
    ///
    /// Returns the spawned tasks, one per source with queued links.
    pub async fn resume_interrupted(&self) -> Result<Vec<JoinHandle<FollowReport>>> {
        let jobs = self.storage.primary().queued_jobs().await?;
        let mut by_source: HashMap<String, Vec<String>> = HashMap::new();
        for job in jobs {
            by_source.entry(job.source_id).or_default().push(job.url);
        }

        let mut handles = Vec::new();
        for (source_id, urls) in by_source {
            let source = match self.storage.get_source(&source_id).await {
                Ok(s) => s,
                Err(e) => {
                    warn!(source_id = %source_id, error = %e, "dropping jobs of unknown source");
                    continue;
                }
            };
            if source.status != SourceStatus::Indexed {
                debug!(source_id = %source.id, status = %source.status, "not resuming jobs of unindexed source");
                continue;
            }
            let (pages, _) = self.storage.primary().count_source_content(&source.id).await?;
            let remaining = (source.config.max_pages as i64 - pages).max(0) as usize;
            info!(source_id = %source.id, queued = urls.len(), remaining, "resuming link-following");
            handles.push(self.spawn_follow(source.id.clone(), urls.into(), remaining));
        }
        Ok(handles)
    }

    // ============ Internals ============

    fn claim(&self, source_id: &str) -> Option<Claim> {
        let fresh = self
            .claims
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(source_id.to_string());
        fresh.then(|| Claim {
            claims: self.claims.clone(),
            source_id: source_id.to_string(),
        })
    }

    /// Caller must hold the source's claim.
    async fn begin_reindex(&self, source: &mut Source) -> Result<()> {
        self.cancel_follow(&source.id);
        if source.status == SourceStatus::Indexing {
            warn!(source_id = %source.id, "recovering source abandoned mid-index");
            source.transition(SourceStatus::Failed)?;
        }
        source.transition(SourceStatus::Indexing)?;
        self.storage.update_source(source).await?;
        self.storage.clear_chunks(&source.id).await?;
        self.storage.primary().clear_jobs(&source.id).await?;
        Ok(())
    }

    async fn fail(&self, source: &mut Source, err: &DocsError) {
        warn!(source_id = %source.id, url = %source.url, error = %err, "indexing failed");
        if source.transition(SourceStatus::Failed).is_ok() {
            if let Err(e) = self.storage.update_source(source).await {
                warn!(source_id = %source.id, error = %e, "could not persist failed status");
            }
        }
    }

    async fn index_root(&self, mut source: Source, fetched: Fetched) -> Result<AddReport> {
        let page = extract(&fetched.body, &fetched.content_type, &fetched.url);

        if let Review::Reject(reason) = self.reviewer.review(fetched.url.as_str(), &page) {
            let err = DocsError::Rejected {
                url: fetched.url.to_string(),
                reason,
            };
            self.fail(&mut source, &err).await;
            return Err(err);
        }

        let chunks = match self.store_page(&source.id, fetched.url.as_str(), &page).await {
            Ok(n) => n,
            Err(e) => {
                self.fail(&mut source, &e).await;
                return Err(e);
            }
        };

        if let Err(e) = self.mark_indexed(&mut source, &fetched).await {
            self.fail(&mut source, &e).await;
            return Err(e);
        }
        info!(source_id = %source.id, chunks, "root page indexed");

        let follow = if source.config.follow_links && source.config.max_pages > 1 {
            let budget = source.config.max_pages - 1;
            let mut queue = VecDeque::new();
            for link in page.links {
                if queue.len() >= budget {
                    break;
                }
                match self.storage.primary().enqueue_job(&source.id, &link).await {
                    Ok(true) => queue.push_back(link),
                    Ok(false) => {}
                    Err(e) => {
                        warn!(source_id = %source.id, error = %e, "could not queue links");
                        break;
                    }
                }
            }
            Some(self.spawn_follow(source.id.clone(), queue, budget))
        } else {
            None
        };

        Ok(AddReport {
            source,
            outcome: AddOutcome::Indexed,
            chunks,
            follow,
        })
    }

    /// Record the root page as visited and persist the `indexed` state.
    /// `source` is only updated once the write succeeds.
    async fn mark_indexed(&self, source: &mut Source, fetched: &Fetched) -> Result<()> {
        // Root URLs count as visited for link-following.
        let primary = self.storage.primary();
        for seen in [source.url.as_str(), fetched.url.as_str()] {
            primary.enqueue_job(&source.id, seen).await?;
            primary.finish_job(&source.id, seen, None).await?;
        }

        let (pages, chunks) = primary.count_source_content(&source.id).await?;
        let mut indexed = source.clone();
        indexed.pages_count = pages;
        indexed.chunks_count = chunks;
        indexed.content_hash = Some(fetched.hash.clone());
        indexed.last_indexed = Some(chrono::Utc::now());
        indexed.transition(SourceStatus::Indexed)?;
        self.storage.update_source(&indexed).await?;
        *source = indexed;
        Ok(())
    }

    /// Chunk and store one extracted page. Returns the number of chunks.
    async fn store_page(&self, source_id: &str, url: &str, page: &ExtractedPage) -> Result<usize> {
        let chunks: Vec<Chunk> = chunk_text(&page.content, self.chunk_size, self.overlap)
            .into_iter()
            .enumerate()
            .map(|(i, content)| Chunk::new(source_id, url, &page.title, &content, i as i64))
            .collect();
        let n = chunks.len();
        let report = self.storage.store_chunks(chunks).await?;
        debug!(url, stored = report.stored, embedded = report.embedded, "page stored");
        Ok(n)
    }

    /// Start link-following for a source, replacing any task it already has.
    fn spawn_follow(
        &self,
        source_id: String,
        queue: VecDeque<String>,
        budget: usize,
    ) -> JoinHandle<FollowReport> {
        let mut follows = self.follows.lock().unwrap_or_else(PoisonError::into_inner);
        follows.next_generation += 1;
        let generation = follows.next_generation;

        let indexer = self.clone();
        let id = source_id.clone();
        let handle = tokio::spawn(async move {
            let report = indexer.follow_links(&id, generation, queue, budget).await;
            indexer.release_follow(&id, generation);
            report
        });

        if let Some((_, previous)) = follows
            .tasks
            .insert(source_id, (generation, handle.abort_handle()))
        {
            previous.abort();
        }
        handle
    }

    /// Abort the source's link-following task, if any.
    fn cancel_follow(&self, source_id: &str) {
        let removed = self
            .follows
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .tasks
            .remove(source_id);
        if let Some((_, task)) = removed {
            debug!(source_id, "cancelling link-following");
            task.abort();
        }
    }

    fn follow_is_current(&self, source_id: &str, generation: u64) -> bool {
        self.follows
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .tasks
            .get(source_id)
            .is_some_and(|(g, _)| *g == generation)
    }

    fn release_follow(&self, source_id: &str, generation: u64) {
        let mut follows = self.follows.lock().unwrap_or_else(PoisonError::into_inner);
        if follows.tasks.get(source_id).is_some_and(|(g, _)| *g == generation) {
            follows.tasks.remove(source_id);
        }
    }

    /// Breadth-first walk over already-queued links. Each attempt, failed or
    /// not, spends one unit of `budget`; newly found links are admitted only
    /// while the queue is shorter than the budget left.
    /// Stops early once a newer task has replaced this one.
    async fn follow_links(
        &self,
        source_id: &str,
        generation: u64,
        mut queue: VecDeque<String>,
        mut budget: usize,
    ) -> FollowReport {
        let mut report = FollowReport::default();
        let primary = self.storage.primary().clone();

        while budget > 0 {
            let Some(link) = queue.pop_front() else {
                break;
            };
            if !self.follow_is_current(source_id, generation) {
                debug!(source_id, "link-following superseded");
                return report;
            }
            budget -= 1;

            match self.index_linked_page(source_id, generation, &link).await {
                Ok(None) => {
                    debug!(source_id, "link-following superseded");
                    return report;
                }
                Ok(Some((chunks, links))) => {
                    report.pages_indexed += 1;
                    report.chunks += chunks;
                    if let Err(e) = primary.finish_job(source_id, &link, None).await {
                        warn!(url = %link, error = %e, "could not record finished job");
                    }
                    for next in links {
                        if queue.len() >= budget {
                            break;
                        }
                        match primary.enqueue_job(source_id, &next).await {
                            Ok(true) => queue.push_back(next),
                            Ok(false) => {}
                            Err(e) => {
                                // Most likely the source was removed mid-walk.
                                warn!(source_id, error = %e, "stopping link-following");
                                return report;
                            }
                        }
                    }
                    self.refresh_counts(source_id).await;
                }
                Err(DocsError::NotFound(_)) => {
                    debug!(source_id, "source removed, stopping link-following");
                    return report;
                }
                Err(e) => {
                    report.pages_failed += 1;
                    debug!(url = %link, error = %e, "skipping linked page");
                    if let Err(e) = primary.finish_job(source_id, &link, Some(&e.to_string())).await {
                        warn!(url = %link, error = %e, "could not record failed job");
                    }
                }
            }
        }

        info!(
            source_id,
            indexed = report.pages_indexed,
            failed = report.pages_failed,
            "link-following finished"
        );
        report
    }

    /// `None` when the task was superseded before anything was stored.
    async fn index_linked_page(
        &self,
        source_id: &str,
        generation: u64,
        link: &str,
    ) -> Result<Option<(usize, Vec<String>)>> {
        // Fail fast when the source disappeared.
        self.storage.get_source(source_id).await?;

        let url = parse_doc_url(link)?;
        let fetched = self.fetch(&url).await?;
        let page = extract(&fetched.body, &fetched.content_type, &fetched.url);

        if let Review::Reject(reason) = self.reviewer.review(fetched.url.as_str(), &page) {
            return Err(DocsError::Rejected {
                url: fetched.url.to_string(),
                reason,
            });
        }

        if !self.follow_is_current(source_id, generation) {
            return Ok(None);
        }
        let chunks = self.store_page(source_id, fetched.url.as_str(), &page).await?;
        Ok(Some((chunks, page.links)))
    }

    async fn refresh_counts(&self, source_id: &str) {
        let result: Result<()> = async {
            let (pages, chunks) = self.storage.primary().count_source_content(source_id).await?;
            self.storage.update_counts(source_id, pages, chunks).await
        }
        .await;
        if let Err(e) = result {
            debug!(source_id, error = %e, "could not refresh source counts");
        }
    }

    async fn fetch(&self, url: &Url) -> Result<Fetched> {
        self.limiter.acquire().await?;

        let resp = self.client.get(url.clone()).send().await?;
        let status = resp.status();
        if !status.is_success() {
            return Err(DocsError::Network(format!("HTTP {} for {}", status, url)));
        }

        let final_url = resp.url().clone();
        let content_type = resp
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or("")
            .to_string();
        let bytes = resp.bytes().await?;
        let hash = format!("{:x}", Sha256::digest(&bytes));

        Ok(Fetched {
            url: final_url,
            content_type,
            body: String::from_utf8_lossy(&bytes).into_owned(),
            hash,
        })
    }
}

fn skipped(source: Source) -> AddReport {
    AddReport {
        source,
        outcome: AddOutcome::Skipped,
        chunks: 0,
        follow: None,
    }
}

/// Parse and normalise a documentation URL: http(s) only, no fragment.
pub fn parse_doc_url(raw: &str) -> Result<Url> {
    let mut url = Url::parse(raw.trim())
        .map_err(|e| DocsError::InvalidInput(format!("invalid URL '{}': {}", raw, e)))?;
    if !matches!(url.scheme(), "http" | "https") {
        return Err(DocsError::InvalidInput(format!(
            "unsupported URL scheme '{}': {}",
            url.scheme(),
            raw
        )));
    }
    url.set_fragment(None);
    Ok(url)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_doc_url_normalises() {
        let url = parse_doc_url("  https://docs.example.com/guide#intro ").unwrap();
        assert_eq!(url.as_str(), "https://docs.example.com/guide");
    }

    #[test]
    fn test_parse_doc_url_rejects_non_http() {
        assert_eq!(parse_doc_url("ftp://x.org").unwrap_err().kind(), "invalid_input");
        assert_eq!(parse_doc_url("nope").unwrap_err().kind(), "invalid_input");
    }

    #[test]
    fn test_accept_all_reviewer() {
        let page = ExtractedPage {
            title: "t".into(),
            content: "c".into(),
            links: vec![],
        };
        assert_eq!(AcceptAll.review("https://x.dev", &page), Review::Accept);
    }
}
