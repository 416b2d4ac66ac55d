//! Hybrid search engine.
//!
//! | Mode | Behaviour |
//! |------|-----------|
//! | `keyword` | FTS5 bm25 over chunk title and content |
//! | `semantic` | embed the query, nearest chunks from the vector backend |
//! | `hybrid` | both branches concurrently, scores fused |
//! | `auto` | `hybrid` when semantic search is ready, else `keyword` |
//!
//! Explicit `semantic`/`hybrid` requests fall back to `keyword` with a
//! warning when the vector backend or the embedder is unavailable.
//!
//! # Fusion
//!
//! Each branch's scores are divided by that branch's best score, so the
//! top hit of each branch is `1.0`. Per chunk:
//!
//! ```text
//! score = w_sem × sem / max(sem) + w_kw × kw / max(kw)
//! ```
//!
//! with `w_sem = 0.7`, `w_kw = 0.3` by default. A chunk found by both
//! branches is tagged `hybrid`; otherwise it keeps its branch's tag. In
//! hybrid mode each branch is time-boxed; a branch that errors or times out
//! contributes nothing.

use serde::Serialize;
use std::cmp::Ordering;
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

use crate::config::RetrievalConfig;
use crate::error::Result;
use crate::models::{Chunk, MatchType, SearchMode, SearchResult};
use crate::storage::Storage;
use crate::store::ChunkCandidate;

#[derive(Debug, Clone, Default)]
pub struct SearchOptions {
    pub mode: SearchMode,
    /// Defaults to `retrieval.default_limit`.
    pub limit: Option<usize>,
    /// Restrict to these source ids. An empty list matches nothing.
    pub sources: Option<Vec<String>>,
}

#[derive(Debug, Clone, Serialize)]
pub struct SearchResponse {
    pub query: String,
    pub requested: SearchMode,
    pub resolved: SearchMode,
    pub warning: Option<String>,
    pub results: Vec<SearchResult>,
}

/// A fused score before chunk content is attached.
#[derive(Debug, Clone, PartialEq)]
pub struct FusedHit {
    pub chunk_id: String,
    pub score: f64,
    pub match_type: MatchType,
}

#[derive(Clone)]
pub struct HybridSearch {
    storage: Arc<Storage>,
    semantic_weight: f64,
    keyword_weight: f64,
    branch_timeout: Duration,
    default_limit: usize,
    candidate_k: usize,
}

impl HybridSearch {
    pub fn new(storage: Arc<Storage>, config: &RetrievalConfig) -> Self {
        Self {
            storage,
            semantic_weight: config.semantic_weight,
            keyword_weight: config.keyword_weight,
            branch_timeout: Duration::from_secs(config.branch_timeout_secs),
            default_limit: config.default_limit,
            candidate_k: config.candidate_k,
        }
    }

    pub async fn query(&self, text: &str, opts: SearchOptions) -> Result<SearchResponse> {
        let limit = opts.limit.unwrap_or(self.default_limit).max(1);
        let sources = opts.sources.as_deref();

        let ready = self.storage.semantic_ready().await;
        let (resolved, mut warning) = resolve_mode(opts.mode, ready);

        let mut response = SearchResponse {
            query: text.to_string(),
            requested: opts.mode,
            resolved,
            warning: None,
            results: Vec::new(),
        };
        if text.trim().is_empty() {
            response.warning = warning;
            return Ok(response);
        }

        response.results = match resolved {
            SearchMode::Keyword | SearchMode::Auto => {
                self.storage.search_text(text, limit, sources).await?
            }
            SearchMode::Semantic => match self.storage.search_semantic(text, limit, sources).await {
                Ok(results) => results,
                Err(e) => {
                    warn!(error = %e, "semantic search failed");
                    warning = Some(format!("semantic search failed: {}", e));
                    Vec::new()
                }
            },
            SearchMode::Hybrid => self.hybrid(text, limit, sources).await?,
        };
        response.warning = warning;

        debug!(
            requested = %response.requested,
            resolved = %response.resolved,
            results = response.results.len(),
            "search finished"
        );
        Ok(response)
    }

    async fn hybrid(
        &self,
        text: &str,
        limit: usize,
        sources: Option<&[String]>,
    ) -> Result<Vec<SearchResult>> {
        let k = self.candidate_k.max(limit);
        let (semantic, keyword) = tokio::join!(
            self.time_boxed("semantic", self.storage.semantic_candidates(text, k, sources)),
            self.time_boxed("keyword", self.storage.keyword_candidates(text, k, sources)),
        );

        let mut hits = fuse(&semantic, &keyword, self.semantic_weight, self.keyword_weight);
        hits.truncate(limit);

        let ids: Vec<String> = hits.iter().map(|h| h.chunk_id.clone()).collect();
        let mut by_id: HashMap<String, Chunk> = self
            .storage
            .chunks_by_id(&ids)
            .await?
            .into_iter()
            .map(|c| (c.id.clone(), c))
            .collect();

        Ok(hits
            .into_iter()
            .filter_map(|hit| {
                by_id
                    .remove(&hit.chunk_id)
                    .map(|chunk| SearchResult::from_chunk(chunk, hit.score, hit.match_type))
            })
            .collect())
    }

    async fn time_boxed(
        &self,
        branch: &str,
        fut: impl Future<Output = Result<Vec<ChunkCandidate>>>,
    ) -> Vec<ChunkCandidate> {
        match tokio::time::timeout(self.branch_timeout, fut).await {
            Ok(Ok(candidates)) => candidates,
            Ok(Err(e)) => {
                warn!(branch, error = %e, "search branch failed");
                Vec::new()
            }
            Err(_) => {
                warn!(branch, timeout_secs = self.branch_timeout.as_secs(), "search branch timed out");
                Vec::new()
            }
        }
    }
}

/// Pick the mode that will actually run, with a warning when downgraded.
pub fn resolve_mode(requested: SearchMode, semantic_ready: bool) -> (SearchMode, Option<String>) {
    match requested {
        SearchMode::Auto if semantic_ready => (SearchMode::Hybrid, None),
        SearchMode::Auto | SearchMode::Keyword => (SearchMode::Keyword, None),
        SearchMode::Semantic | SearchMode::Hybrid if semantic_ready => (requested, None),
        SearchMode::Semantic | SearchMode::Hybrid => (
            SearchMode::Keyword,
            Some(format!(
                "{} search unavailable (no vector backend or embedding provider); using keyword",
                requested
            )),
        ),
    }
}

/// Divide every score by the branch maximum, clamped to `[0, 1]`.
fn normalize_by_max(candidates: &[ChunkCandidate]) -> Vec<(&str, f64)> {
    let max = candidates
        .iter()
        .map(|c| c.raw_score)
        .fold(f64::NEG_INFINITY, f64::max);

    candidates
        .iter()
        .map(|c| {
            let norm = if max > f64::EPSILON {
                (c.raw_score / max).clamp(0.0, 1.0)
            } else {
                0.0
            };
            (c.chunk_id.as_str(), norm)
        })
        .collect()
}

/// Weighted sum of max-normalised branch scores, best first.
pub fn fuse(
    semantic: &[ChunkCandidate],
    keyword: &[ChunkCandidate],
    semantic_weight: f64,
    keyword_weight: f64,
) -> Vec<FusedHit> {
    let mut acc: HashMap<&str, (f64, bool, bool)> = HashMap::new();

    for (id, s) in normalize_by_max(semantic) {
        let entry = acc.entry(id).or_insert((0.0, false, false));
        entry.0 += semantic_weight * s;
        entry.1 = true;
    }
    for (id, s) in normalize_by_max(keyword) {
        let entry = acc.entry(id).or_insert((0.0, false, false));
        entry.0 += keyword_weight * s;
        entry.2 = true;
    }

    let mut hits: Vec<FusedHit> = acc
        .into_iter()
        .map(|(id, (score, sem, kw))| FusedHit {
            chunk_id: id.to_string(),
            score,
            match_type: match (sem, kw) {
                (true, true) => MatchType::Hybrid,
                (true, false) => MatchType::Semantic,
                _ => MatchType::Keyword,
            },
        })
        .collect();

    hits.sort_by(|a, b| {
        b.score
            .partial_cmp(&a.score)
            .unwrap_or(Ordering::Equal)
            .then_with(|| {
                let a_both = a.match_type == MatchType::Hybrid;
                let b_both = b.match_type == MatchType::Hybrid;
                b_both.cmp(&a_both)
            })
            .then_with(|| a.chunk_id.cmp(&b.chunk_id))
    });
    hits
}
