//! Core data models used throughout cursor-docs.
//!
//! These types represent the sources, chunks, and search results that flow
//! through the scrape → chunk → store → search pipeline.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::{DocsError, Result};

/// Lifecycle state of a [`Source`].
///
/// Legal transitions:
///
/// ```text
/// pending ──▶ indexing ──▶ indexed
///               │  ▲          │
///               ▼  └──────────┘ (refresh)
///             failed ──▶ indexing (refresh retry)
/// ```
///
/// `failed ──▶ indexing` extends the basic pending/indexing/indexed/failed
/// cycle: it is the only way back for a failed source, taken by `refresh`
/// and by re-adding its URL. A source abandoned in `indexing` by a dead run
/// goes through `failed` before it is indexed again, so `indexing` never
/// re-enters itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceStatus {
    Pending,
    Indexing,
    Indexed,
    Failed,
}

impl SourceStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SourceStatus::Pending => "pending",
            SourceStatus::Indexing => "indexing",
            SourceStatus::Indexed => "indexed",
            SourceStatus::Failed => "failed",
        }
    }

    /// Whether moving from `self` to `next` is a legal lifecycle step.
    pub fn can_transition_to(&self, next: SourceStatus) -> bool {
        use SourceStatus::*;
        matches!(
            (self, next),
            (Pending, Indexing)
                | (Indexing, Indexed)
                | (Indexing, Failed)
                | (Indexed, Indexing)
                | (Failed, Indexing)
        )
    }
}

impl fmt::Display for SourceStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SourceStatus {
    type Err = DocsError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "pending" => Ok(SourceStatus::Pending),
            "indexing" => Ok(SourceStatus::Indexing),
            "indexed" => Ok(SourceStatus::Indexed),
            "failed" => Ok(SourceStatus::Failed),
            other => Err(DocsError::Decode(format!("unknown source status: {}", other))),
        }
    }
}

/// Per-source crawl settings, stored as JSON alongside the source row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceConfig {
    /// Upper bound on pages indexed for this source, root page included.
    pub max_pages: usize,
    /// Whether outbound same-host links are followed in the background.
    pub follow_links: bool,
}

impl Default for SourceConfig {
    fn default() -> Self {
        Self {
            max_pages: 50,
            follow_links: false,
        }
    }
}

/// A documentation site being indexed.
#[derive(Debug, Clone, Serialize)]
pub struct Source {
    pub id: String,
    pub url: String,
    pub name: String,
    pub status: SourceStatus,
    pub pages_count: i64,
    pub chunks_count: i64,
    pub config: SourceConfig,
    pub created_at: DateTime<Utc>,
    pub last_indexed: Option<DateTime<Utc>>,
    /// SHA-256 of the raw root-page payload from the last successful scrape.
    pub content_hash: Option<String>,
}

impl Source {
    /// Build a fresh `pending` source with a new UUID.
    pub fn new(url: &str, name: &str, config: SourceConfig) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            url: url.to_string(),
            name: name.to_string(),
            status: SourceStatus::Pending,
            pages_count: 0,
            chunks_count: 0,
            config,
            created_at: Utc::now(),
            last_indexed: None,
            content_hash: None,
        }
    }

    /// Move to `next`, rejecting transitions the lifecycle does not allow.
    pub fn transition(&mut self, next: SourceStatus) -> Result<()> {
        if !self.status.can_transition_to(next) {
            return Err(DocsError::InvalidTransition {
                from: self.status,
                to: next,
            });
        }
        self.status = next;
        Ok(())
    }
}

/// A positioned fragment of a source's extracted text.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Chunk {
    pub id: String,
    pub source_id: String,
    /// Page the chunk was cut from.
    pub url: String,
    pub title: String,
    pub content: String,
    /// Ordering within the page, starting at 0.
    pub position: i64,
    /// Caller-supplied vector; when absent the storage facade may embed.
    #[serde(skip)]
    pub embedding: Option<Vec<f32>>,
    pub created_at: DateTime<Utc>,
}

impl Chunk {
    pub fn new(source_id: &str, url: &str, title: &str, content: &str, position: i64) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            source_id: source_id.to_string(),
            url: url.to_string(),
            title: title.to_string(),
            content: content.to_string(),
            position,
            embedding: None,
            created_at: Utc::now(),
        }
    }
}

/// Requested retrieval strategy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SearchMode {
    #[default]
    Auto,
    Semantic,
    Keyword,
    Hybrid,
}

impl SearchMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            SearchMode::Auto => "auto",
            SearchMode::Semantic => "semantic",
            SearchMode::Keyword => "keyword",
            SearchMode::Hybrid => "hybrid",
        }
    }
}

impl fmt::Display for SearchMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SearchMode {
    type Err = DocsError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "auto" => Ok(SearchMode::Auto),
            "semantic" => Ok(SearchMode::Semantic),
            "keyword" => Ok(SearchMode::Keyword),
            "hybrid" => Ok(SearchMode::Hybrid),
            other => Err(DocsError::InvalidInput(format!(
                "unknown search mode: {}. Use auto, keyword, semantic, or hybrid.",
                other
            ))),
        }
    }
}

/// Which branch produced a result.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum MatchType {
    Semantic,
    Keyword,
    Hybrid,
}

/// A ranked chunk returned from the search engine.
#[derive(Debug, Clone, Serialize)]
pub struct SearchResult {
    pub chunk_id: String,
    pub source_id: String,
    pub url: String,
    pub title: String,
    pub content: String,
    pub position: i64,
    /// Higher is better. Branch-local scale for single-branch searches,
    /// weighted `[0, 1]` sum for hybrid.
    pub score: f64,
    pub match_type: MatchType,
}

impl SearchResult {
    pub fn from_chunk(chunk: Chunk, score: f64, match_type: MatchType) -> Self {
        Self {
            chunk_id: chunk.id,
            source_id: chunk.source_id,
            url: chunk.url,
            title: chunk.title,
            content: chunk.content,
            position: chunk.position,
            score,
            match_type,
        }
    }
}

/// Human-readable site name derived from a URL's host.
///
/// Strips `www.`, `docs.`, `api.`, `developer.` and `developers.` prefixes
/// and the TLD, then title-cases what is left:
/// `https://docs.rust-lang.org/book` → `"Rust Lang"`.
pub fn name_from_url(url: &str) -> String {
    let Some(host) = url::Url::parse(url)
        .ok()
        .and_then(|u| u.host_str().map(str::to_string))
    else {
        return url.to_string();
    };

    let mut rest = host.as_str();
    loop {
        let stripped = ["www.", "docs.", "api.", "developer.", "developers."]
            .iter()
            .find_map(|p| rest.strip_prefix(p));
        match stripped {
            Some(s) if !s.is_empty() => rest = s,
            _ => break,
        }
    }
    if let Some((stem, _tld)) = rest.rsplit_once('.') {
        rest = stem;
    }

    let words: Vec<String> = rest
        .split(['.', '-', '_'])
        .filter(|w| !w.is_empty())
        .map(|w| {
            let mut chars = w.chars();
            match chars.next() {
                Some(first) => first.to_uppercase().chain(chars).collect(),
                None => String::new(),
            }
        })
        .collect();

    if words.is_empty() {
        host
    } else {
        words.join(" ")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn legal_transitions() {
        use SourceStatus::*;
        assert!(Pending.can_transition_to(Indexing));
        assert!(Indexing.can_transition_to(Indexed));
        assert!(Indexing.can_transition_to(Failed));
        assert!(Indexed.can_transition_to(Indexing));
        assert!(Failed.can_transition_to(Indexing));
    }

    #[test]
    fn failed_source_only_leaves_through_reindex() {
        let mut source = Source::new("https://d.dev", "D", SourceConfig::default());
        source.transition(SourceStatus::Indexing).unwrap();
        source.transition(SourceStatus::Failed).unwrap();

        for next in [SourceStatus::Pending, SourceStatus::Indexed, SourceStatus::Failed] {
            assert_eq!(source.transition(next).unwrap_err().kind(), "invalid_transition");
        }
        assert!(!SourceStatus::Indexing.can_transition_to(SourceStatus::Indexing));

        source.transition(SourceStatus::Indexing).unwrap();
        source.transition(SourceStatus::Indexed).unwrap();
        assert_eq!(source.status, SourceStatus::Indexed);
    }

    #[test]
    fn illegal_transitions() {
        use SourceStatus::*;
        assert!(!Pending.can_transition_to(Indexed));
        assert!(!Pending.can_transition_to(Failed));
        assert!(!Indexed.can_transition_to(Failed));
        assert!(!Indexed.can_transition_to(Pending));
        assert!(!Failed.can_transition_to(Indexed));
        assert!(!Indexing.can_transition_to(Pending));
    }

    #[test]
    fn transition_rejects_and_keeps_state() {
        let mut source = Source::new("https://example.com", "Example", SourceConfig::default());
        let err = source.transition(SourceStatus::Indexed).unwrap_err();
        assert_eq!(err.kind(), "invalid_transition");
        assert_eq!(source.status, SourceStatus::Pending);

        source.transition(SourceStatus::Indexing).unwrap();
        source.transition(SourceStatus::Indexed).unwrap();
        assert_eq!(source.status, SourceStatus::Indexed);
    }

    #[test]
    fn status_roundtrips_through_str() {
        for s in ["pending", "indexing", "indexed", "failed"] {
            let parsed: SourceStatus = s.parse().unwrap();
            assert_eq!(parsed.as_str(), s);
        }
        assert!("done".parse::<SourceStatus>().is_err());
    }

    #[test]
    fn search_mode_parse() {
        assert_eq!("hybrid".parse::<SearchMode>().unwrap(), SearchMode::Hybrid);
        assert_eq!(SearchMode::default(), SearchMode::Auto);
        assert!("fuzzy".parse::<SearchMode>().is_err());
    }

    #[test]
    fn name_from_url_strips_prefixes_and_tld() {
        assert_eq!(name_from_url("https://docs.rust-lang.org/book/"), "Rust Lang");
        assert_eq!(name_from_url("https://react.dev"), "React");
        assert_eq!(name_from_url("https://developer.mozilla.org/en-US/"), "Mozilla");
        assert_eq!(name_from_url("https://www.docs.python.org"), "Python");
        assert_eq!(name_from_url("http://localhost:8080/x"), "Localhost");
        assert_eq!(name_from_url("not a url"), "not a url");
    }
}
