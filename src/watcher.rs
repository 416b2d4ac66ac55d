//! Watcher over Cursor's own `state.vscdb` databases.
//!
//! Cursor remembers the documentation URLs a user added under `@Docs` in
//! SQLite key-value tables. This module reads them (strictly read-only) and
//! feeds URLs it has not seen before into [`Indexer::add`].
//!
//! Databases scanned:
//!
//! - the global `globalStorage/state.vscdb`;
//! - every `workspaceStorage/*/state.vscdb`.
//!
//! In each, the `ItemTable` and `cursorDiskKV` tables are queried for keys
//! mentioning docs. Either table may be absent. Values come in several
//! shapes, all decoded by [`decode_value`]:
//!
//! ```text
//! [{"name": "Tokio", "url": "https://docs.rs/tokio"}, "https://react.dev"]
//! {"docs": [{"title": "Axum", "link": "https://docs.rs/axum", "pagesIndexed": 12}]}
//! "https://docs.python.org/3/"
//! ```
//!
//! Records are merged by normalised URL across every database. A missing or
//! unreadable database contributes nothing and is only logged at debug.

use async_trait::async_trait;
use globset::{Glob, GlobSetBuilder};
use notify::{Event, RecursiveMode, Watcher};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::time::Instant;
use tracing::{debug, info, warn};
use walkdir::WalkDir;

use crate::config::WatcherConfig;
use crate::db;
use crate::error::{DocsError, Result};
use crate::indexer::{parse_doc_url, AddOptions, AddOutcome, Indexer};
use crate::models::name_from_url;
use crate::supervisor::Worker;

const TABLES: &[&str] = &["ItemTable", "cursorDiskKV"];

/// One documentation entry as Cursor knows it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct WatcherRecord {
    pub url: String,
    pub name: String,
    pub status: Option<String>,
    pub pages_indexed: Option<i64>,
}

/// Outcome of [`CursorWatcher::sync_from_cursor`].
#[derive(Debug, Clone, Default, Serialize)]
pub struct SyncReport {
    pub discovered: usize,
    pub added: usize,
    pub skipped: usize,
    pub failed: usize,
    pub errors: Vec<String>,
}

// ============ Value decoding ============

#[derive(Deserialize)]
#[serde(untagged)]
enum DocsPayload {
    // Elements are decoded one by one so a bad entry only drops itself.
    List(Vec<serde_json::Value>),
    Wrapped { docs: Vec<serde_json::Value> },
    Single(DocEntry),
}

#[derive(Deserialize)]
#[serde(untagged)]
enum DocEntry {
    Url(String),
    Object(RawDoc),
}

#[derive(Deserialize)]
struct RawDoc {
    #[serde(default, alias = "link", alias = "href")]
    url: Option<String>,
    #[serde(default)]
    prefix: Option<String>,
    #[serde(default, alias = "title")]
    name: Option<String>,
    #[serde(default, alias = "state")]
    status: Option<String>,
    #[serde(default, alias = "pagesIndexed", alias = "pages")]
    pages_indexed: Option<serde_json::Value>,
}

impl RawDoc {
    fn into_record(self) -> Option<WatcherRecord> {
        let raw_url = self.url.or(self.prefix)?;
        let url = parse_doc_url(&raw_url).ok()?;
        let pages_indexed = self.pages_indexed.and_then(|v| match v {
            serde_json::Value::Number(n) => n.as_i64(),
            serde_json::Value::String(s) => s.trim().parse().ok(),
            _ => None,
        });
        Some(WatcherRecord {
            name: self
                .name
                .map(|n| n.trim().to_string())
                .filter(|n| !n.is_empty())
                .unwrap_or_else(|| name_from_url(url.as_str())),
            url: url.to_string(),
            status: self.status,
            pages_indexed,
        })
    }
}

fn record_from_url(raw: &str) -> Option<WatcherRecord> {
    let url = parse_doc_url(raw).ok()?;
    Some(WatcherRecord {
        name: name_from_url(url.as_str()),
        url: url.to_string(),
        status: None,
        pages_indexed: None,
    })
}

fn entry_to_record(entry: DocEntry) -> Option<WatcherRecord> {
    match entry {
        DocEntry::Url(s) => record_from_url(&s),
        DocEntry::Object(doc) => doc.into_record(),
    }
}

fn element_to_record(value: serde_json::Value) -> Option<WatcherRecord> {
    match serde_json::from_value::<DocEntry>(value) {
        Ok(entry) => entry_to_record(entry),
        Err(e) => {
            debug!(error = %e, "skipping undecodable docs entry");
            None
        }
    }
}

/// Decode one stored value into zero or more records.
///
/// Tries each known shape in turn; a raw (non-JSON) string is accepted when
/// it looks like a URL. Anything else yields nothing.
pub fn decode_value(raw: &str) -> Vec<WatcherRecord> {
    match serde_json::from_str::<DocsPayload>(raw) {
        Ok(DocsPayload::List(entries)) | Ok(DocsPayload::Wrapped { docs: entries }) => {
            entries.into_iter().filter_map(element_to_record).collect()
        }
        Ok(DocsPayload::Single(entry)) => entry_to_record(entry).into_iter().collect(),
        Err(_) if raw.trim_start().starts_with("http") => {
            record_from_url(raw.trim()).into_iter().collect()
        }
        Err(e) => {
            debug!(error = %e, "unparseable docs value, skipping");
            Vec::new()
        }
    }
}

/// Merge records by URL. The first non-derived name wins; missing status
/// and page counts are filled from later duplicates.
pub fn merge_records(records: impl IntoIterator<Item = WatcherRecord>) -> Vec<WatcherRecord> {
    let mut merged: BTreeMap<String, WatcherRecord> = BTreeMap::new();
    for record in records {
        match merged.get_mut(&record.url) {
            None => {
                merged.insert(record.url.clone(), record);
            }
            Some(existing) => {
                let derived = name_from_url(&existing.url);
                if existing.name == derived && record.name != derived {
                    existing.name = record.name;
                }
                if existing.status.is_none() {
                    existing.status = record.status;
                }
                if existing.pages_indexed.is_none() {
                    existing.pages_indexed = record.pages_indexed;
                }
            }
        }
    }
    merged.into_values().collect()
}

// ============ Database discovery ============

/// Every Cursor database that currently exists on disk.
pub fn discover_databases(config: &WatcherConfig) -> Vec<PathBuf> {
    let mut paths = Vec::new();
    if config.global_db.is_file() {
        paths.push(config.global_db.clone());
    }

    let root = &config.workspace_storage;
    if !root.is_dir() {
        return paths;
    }
    let mut builder = GlobSetBuilder::new();
    match Glob::new("*/state.vscdb") {
        Ok(glob) => {
            builder.add(glob);
        }
        Err(e) => {
            warn!(error = %e, "invalid workspace glob");
            return paths;
        }
    }
    let Ok(set) = builder.build() else {
        return paths;
    };

    let mut found: Vec<PathBuf> = WalkDir::new(root)
        .min_depth(2)
        .max_depth(2)
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_file())
        .filter(|e| {
            let rel = e.path().strip_prefix(root).unwrap_or(e.path());
            set.is_match(rel)
        })
        .map(|e| e.into_path())
        .collect();
    found.sort();
    paths.extend(found);
    paths
}

/// Read the docs records from one database. Never fails: problems are
/// logged at debug and yield an empty result.
pub async fn read_database(path: &Path) -> Vec<WatcherRecord> {
    let pool = match db::connect_read_only(path).await {
        Ok(pool) => pool,
        Err(e) => {
            debug!(path = %path.display(), error = %e, "cannot open Cursor database");
            return Vec::new();
        }
    };

    let mut records = Vec::new();
    for table in TABLES {
        let sql = format!(
            "SELECT key, CAST(value AS TEXT) AS value FROM {} \
             WHERE key LIKE '%docs%' OR key LIKE '%Docs%' OR key LIKE '%selectedDocs%'",
            table
        );
        let rows: std::result::Result<Vec<(String, Option<String>)>, sqlx::Error> =
            sqlx::query_as(&sql).fetch_all(&pool).await;
        match rows {
            Ok(rows) => {
                for (key, value) in rows {
                    let Some(value) = value else { continue };
                    let decoded = decode_value(&value);
                    if !decoded.is_empty() {
                        debug!(path = %path.display(), table, key = %key, count = decoded.len(), "docs key decoded");
                    }
                    records.extend(decoded);
                }
            }
            Err(e) => debug!(path = %path.display(), table, error = %e, "table not readable"),
        }
    }
    pool.close().await;
    records
}

// ============ Watcher ============

pub struct CursorWatcher {
    config: WatcherConfig,
    indexer: Indexer,
    known: Mutex<HashSet<String>>,
}

impl CursorWatcher {
    pub fn new(config: WatcherConfig, indexer: Indexer) -> Self {
        Self {
            config,
            indexer,
            known: Mutex::new(HashSet::new()),
        }
    }

    /// All documentation entries Cursor currently knows about, merged.
    pub async fn list_cursor_docs(&self) -> Vec<WatcherRecord> {
        let mut all = Vec::new();
        for path in discover_databases(&self.config) {
            all.extend(read_database(&path).await);
        }
        merge_records(all)
    }

    /// Add every discovered URL, waiting for each root page to finish.
    pub async fn sync_from_cursor(&self) -> SyncReport {
        let records = self.list_cursor_docs().await;
        let mut report = SyncReport {
            discovered: records.len(),
            ..SyncReport::default()
        };

        for record in records {
            self.mark_known(&record.url);
            let opts = AddOptions {
                name: Some(record.name.clone()),
                ..AddOptions::default()
            };
            match self.indexer.add(&record.url, opts).await {
                Ok(r) if r.outcome == AddOutcome::Skipped => report.skipped += 1,
                Ok(_) => report.added += 1,
                Err(e) => {
                    report.failed += 1;
                    report.errors.push(format!("{}: {}", record.url, e));
                }
            }
        }
        info!(
            discovered = report.discovered,
            added = report.added,
            skipped = report.skipped,
            failed = report.failed,
            "cursor sync finished"
        );
        report
    }

    fn mark_known(&self, url: &str) -> bool {
        self.known
            .lock()
            .map(|mut k| k.insert(url.to_string()))
            .unwrap_or(false)
    }

    /// Seed the known set with URLs already in the index.
    async fn seed_known(&self) -> Result<()> {
        let urls: Vec<String> = self
            .indexer
            .storage()
            .list_sources()
            .await?
            .into_iter()
            .map(|s| s.url)
            .collect();
        if let Ok(mut known) = self.known.lock() {
            known.extend(urls);
        }
        Ok(())
    }

    /// Diff Cursor's docs against the known set and queue the new URLs.
    /// Returns how many were queued.
    pub async fn poll(&self) -> usize {
        let records = self.list_cursor_docs().await;
        let fresh: Vec<_> = records
            .into_iter()
            .filter(|r| self.mark_known(&r.url))
            .collect();

        for record in &fresh {
            info!(url = %record.url, name = %record.name, "new Cursor docs URL");
            let indexer = self.indexer.clone();
            let url = record.url.clone();
            let opts = AddOptions {
                name: Some(record.name.clone()),
                ..AddOptions::default()
            };
            tokio::spawn(async move {
                if let Err(e) = indexer.add(&url, opts).await {
                    warn!(url = %url, error = %e, "failed to add Cursor docs URL");
                }
            });
        }
        fresh.len()
    }

    fn watch_paths(&self) -> Vec<(PathBuf, RecursiveMode)> {
        let mut paths = Vec::new();
        if let Some(parent) = self.config.global_db.parent() {
            if parent.is_dir() {
                paths.push((parent.to_path_buf(), RecursiveMode::NonRecursive));
            }
        }
        if self.config.workspace_storage.is_dir() {
            paths.push((self.config.workspace_storage.clone(), RecursiveMode::Recursive));
        }
        paths
    }
}

fn touches_state_db(event: &Event) -> bool {
    event.paths.iter().any(|p| {
        p.file_name()
            .and_then(|n| n.to_str())
            .is_some_and(|n| n.starts_with("state.vscdb"))
    })
}

#[async_trait]
impl Worker for CursorWatcher {
    fn name(&self) -> &str {
        "cursor_watcher"
    }

    async fn run(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) -> Result<()> {
        tokio::select! {
            _ = shutdown.changed() => return Ok(()),
            _ = tokio::time::sleep(Duration::from_secs(self.config.initial_delay_secs)) => {}
        }

        self.seed_known().await?;
        let queued = self.poll().await;
        info!(queued, "initial Cursor docs poll done");

        let (tx, mut rx) = mpsc::unbounded_channel::<notify::Result<Event>>();
        // Kept alive for the lifetime of the loop; dropping it stops events.
        let _fs_watcher = match notify::recommended_watcher(move |event| {
            if tx.send(event).is_err() {
                debug!("watch event dropped because worker channel is closed");
            }
        }) {
            Ok(mut w) => {
                for (path, mode) in self.watch_paths() {
                    if let Err(e) = w.watch(&path, mode) {
                        warn!(path = %path.display(), error = %e, "cannot watch path");
                    }
                }
                Some(w)
            }
            Err(e) => {
                warn!(error = %e, "filesystem notifications unavailable, polling only");
                None
            }
        };

        let debounce = Duration::from_millis(self.config.debounce_ms);
        let period = Duration::from_secs(self.config.poll_interval_secs.max(1));
        let mut fallback = tokio::time::interval_at(Instant::now() + period, period);
        let mut deadline: Option<Instant> = None;

        loop {
            tokio::select! {
                _ = shutdown.changed() => return Ok(()),
                event = rx.recv() => match event {
                    Some(Ok(event)) if touches_state_db(&event) => {
                        deadline = Some(Instant::now() + debounce);
                    }
                    Some(Ok(_)) => {}
                    Some(Err(e)) => debug!(error = %e, "watch backend error"),
                    None => {
                        return Err(DocsError::Internal("filesystem watcher stopped".into()));
                    }
                },
                _ = tokio::time::sleep_until(deadline.unwrap_or_else(Instant::now)), if deadline.is_some() => {
                    deadline = None;
                    let queued = self.poll().await;
                    debug!(queued, "debounced Cursor docs poll done");
                }
                _ = fallback.tick() => {
                    let queued = self.poll().await;
                    debug!(queued, "periodic Cursor docs poll done");
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
    use std::str::FromStr;

    #[test]
    fn test_decode_array_of_objects_and_strings() {
        let raw = r#"[
            {"name": "Tokio", "url": "https://docs.rs/tokio"},
            "https://react.dev",
            {"name": "No URL"},
            {"title": "Axum", "link": "https://docs.rs/axum#top", "pagesIndexed": "12"}
        ]"#;
        let records = decode_value(raw);
        assert_eq!(records.len(), 3);
        assert_eq!(records[0].name, "Tokio");
        assert_eq!(records[1].url, "https://react.dev/");
        assert_eq!(records[1].name, "React");
        assert_eq!(records[2].url, "https://docs.rs/axum");
        assert_eq!(records[2].pages_indexed, Some(12));
    }

    #[test]
    fn test_decode_wrapped_and_bare_shapes() {
        let wrapped = decode_value(r#"{"docs": [{"url": "https://a.dev", "status": "indexed", "pages": 3}]}"#);
        assert_eq!(wrapped.len(), 1);
        assert_eq!(wrapped[0].status.as_deref(), Some("indexed"));
        assert_eq!(wrapped[0].pages_indexed, Some(3));

        assert_eq!(decode_value(r#""https://b.dev/docs""#).len(), 1);
        assert_eq!(decode_value("https://c.dev/raw").len(), 1);
    }

    #[test]
    fn test_decode_bad_element_keeps_the_rest() {
        let records = decode_value(
            r#"[{"url": "https://a.dev/x"}, {"url": 123}, {"url": "https://b.dev", "name": 7}, "https://c.dev"]"#,
        );
        let urls: Vec<&str> = records.iter().map(|r| r.url.as_str()).collect();
        assert_eq!(urls, vec!["https://a.dev/x", "https://c.dev/"]);

        let wrapped = decode_value(r#"{"docs": [{"url": false}, {"link": "https://d.dev/guide"}]}"#);
        assert_eq!(wrapped.len(), 1);
        assert_eq!(wrapped[0].url, "https://d.dev/guide");
    }

    #[test]
    fn test_decode_garbage_yields_nothing() {
        assert!(decode_value("{not json").is_empty());
        assert!(decode_value("42").is_empty());
        assert!(decode_value(r#""ftp://x.org""#).is_empty());
        assert!(decode_value(r#"{"docs": "nope"}"#).is_empty());
    }

    #[test]
    fn test_merge_dedups_across_shapes() {
        let mut all = decode_value(r#"["https://docs.rs/tokio"]"#);
        all.extend(decode_value(
            r#"[{"name": "Tokio Docs", "url": "https://docs.rs/tokio", "status": "ok"}]"#,
        ));
        let merged = merge_records(all);
        assert_eq!(merged.len(), 1);
        assert_eq!(merged[0].name, "Tokio Docs");
        assert_eq!(merged[0].status.as_deref(), Some("ok"));
    }

    async fn write_state_db(path: &Path, tables: &[(&str, &str, &str)]) {
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        let opts = SqliteConnectOptions::from_str(&format!("sqlite:{}", path.display()))
            .unwrap()
            .create_if_missing(true);
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(opts)
            .await
            .unwrap();
        for (table, key, value) in tables {
            sqlx::query(&format!(
                "CREATE TABLE IF NOT EXISTS {} (key TEXT UNIQUE ON CONFLICT REPLACE, value BLOB)",
                table
            ))
            .execute(&pool)
            .await
            .unwrap();
            sqlx::query(&format!("INSERT INTO {} (key, value) VALUES (?, ?)", table))
                .bind(*key)
                .bind(value.as_bytes())
                .execute(&pool)
                .await
                .unwrap();
        }
        pool.close().await;
    }

    #[tokio::test]
    async fn test_discovers_and_reads_global_and_workspace_dbs() {
        let tmp = tempfile::TempDir::new().unwrap();
        let global = tmp.path().join("globalStorage").join("state.vscdb");
        let workspaces = tmp.path().join("workspaceStorage");

        write_state_db(
            &global,
            &[
                ("ItemTable", "cursor.docs", r#"[{"name": "Tokio", "url": "https://docs.rs/tokio"}]"#),
                ("ItemTable", "editor.fontSize", "14"),
            ],
        )
        .await;
        write_state_db(
            &workspaces.join("abc123").join("state.vscdb"),
            &[(
                "cursorDiskKV",
                "composer.selectedDocs",
                r#"{"docs": ["https://docs.rs/tokio", "https://react.dev"]}"#,
            )],
        )
        .await;
        std::fs::create_dir_all(workspaces.join("empty")).unwrap();

        let config = WatcherConfig {
            global_db: global.clone(),
            workspace_storage: workspaces.clone(),
            ..WatcherConfig::default()
        };
        let dbs = discover_databases(&config);
        assert_eq!(dbs.len(), 2);

        let mut all = Vec::new();
        for db in &dbs {
            all.extend(read_database(db).await);
        }
        let merged = merge_records(all);
        let urls: Vec<&str> = merged.iter().map(|r| r.url.as_str()).collect();
        assert_eq!(urls, vec!["https://docs.rs/tokio", "https://react.dev/"]);
        assert_eq!(merged[0].name, "Tokio");
    }

    #[tokio::test]
    async fn test_missing_and_corrupt_databases_yield_nothing() {
        let tmp = tempfile::TempDir::new().unwrap();
        assert!(read_database(&tmp.path().join("absent.vscdb")).await.is_empty());

        let corrupt = tmp.path().join("state.vscdb");
        std::fs::write(&corrupt, b"this is not sqlite").unwrap();
        assert!(read_database(&corrupt).await.is_empty());
    }
}
