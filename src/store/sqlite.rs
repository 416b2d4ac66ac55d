//! SQLite-backed [`Store`] implementation.
//!
//! Writes go through the single-connection writer pool; reads use the
//! reader pool. `chunks_fts` is maintained by triggers on `chunks`, so no
//! method here touches it directly except to search.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::sqlite::SqliteRow;
use sqlx::Row;
use tracing::warn;

use super::{ChunkCandidate, JobStatus, ScrapeJob, Store, StoreStats};
use crate::db::Pools;
use crate::error::{DocsError, Result};
use crate::models::{Chunk, Source, SourceConfig, SourceStatus};

pub struct SqliteStore {
    pools: Pools,
}

impl SqliteStore {
    pub fn new(pools: Pools) -> Self {
        Self { pools }
    }

    pub fn pools(&self) -> &Pools {
        &self.pools
    }
}

const SOURCE_COLUMNS: &str = "id, url, name, status, pages_count, chunks_count, config_json, \
                              created_at, last_indexed, content_hash";

const CHUNK_COLUMNS: &str = "id, source_id, url, title, content, position, created_at";

fn ts_to_datetime(ts: i64) -> DateTime<Utc> {
    DateTime::from_timestamp(ts, 0).unwrap_or_default()
}

fn row_to_source(row: &SqliteRow) -> Result<Source> {
    let status: String = row.try_get("status")?;
    let config_json: String = row.try_get("config_json")?;
    let config: SourceConfig = serde_json::from_str(&config_json)?;
    let last_indexed: Option<i64> = row.try_get("last_indexed")?;

    Ok(Source {
        id: row.try_get("id")?,
        url: row.try_get("url")?,
        name: row.try_get("name")?,
        status: status.parse::<SourceStatus>()?,
        pages_count: row.try_get("pages_count")?,
        chunks_count: row.try_get("chunks_count")?,
        config,
        created_at: ts_to_datetime(row.try_get("created_at")?),
        last_indexed: last_indexed.map(ts_to_datetime),
        content_hash: row.try_get("content_hash")?,
    })
}

fn row_to_chunk(row: &SqliteRow) -> Result<Chunk> {
    Ok(Chunk {
        id: row.try_get("id")?,
        source_id: row.try_get("source_id")?,
        url: row.try_get("url")?,
        title: row.try_get("title")?,
        content: row.try_get("content")?,
        position: row.try_get("position")?,
        embedding: None,
        created_at: ts_to_datetime(row.try_get("created_at")?),
    })
}

/// Turn free text into an FTS5 expression of quoted terms joined by `OR`.
///
/// Quoting every term means operators and punctuation in user input are
/// matched literally instead of being parsed as FTS5 syntax.
pub fn fts_query(input: &str) -> Option<String> {
    let terms: Vec<String> = input
        .split(|c: char| !c.is_alphanumeric() && c != '_')
        .filter(|t| !t.is_empty())
        .map(|t| format!("\"{}\"", t))
        .collect();

    if terms.is_empty() {
        None
    } else {
        Some(terms.join(" OR "))
    }
}

fn placeholders(n: usize) -> String {
    vec!["?"; n].join(", ")
}

#[async_trait]
impl Store for SqliteStore {
    fn backend_name(&self) -> &str {
        "sqlite"
    }

    async fn create_source(&self, source: &Source) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO sources (id, url, name, status, pages_count, chunks_count,
                                 config_json, created_at, last_indexed, content_hash)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&source.id)
        .bind(&source.url)
        .bind(&source.name)
        .bind(source.status.as_str())
        .bind(source.pages_count)
        .bind(source.chunks_count)
        .bind(serde_json::to_string(&source.config)?)
        .bind(source.created_at.timestamp())
        .bind(source.last_indexed.map(|t| t.timestamp()))
        .bind(&source.content_hash)
        .execute(&self.pools.writer)
        .await?;
        Ok(())
    }

    async fn update_source(&self, source: &Source) -> Result<()> {
        let result = sqlx::query(
            r#"
            UPDATE sources SET
                name = ?, status = ?, pages_count = ?, chunks_count = ?,
                config_json = ?, last_indexed = ?, content_hash = ?
            WHERE id = ?
            "#,
        )
        .bind(&source.name)
        .bind(source.status.as_str())
        .bind(source.pages_count)
        .bind(source.chunks_count)
        .bind(serde_json::to_string(&source.config)?)
        .bind(source.last_indexed.map(|t| t.timestamp()))
        .bind(&source.content_hash)
        .bind(&source.id)
        .execute(&self.pools.writer)
        .await?;

        if result.rows_affected() == 0 {
            return Err(DocsError::NotFound(format!("source {}", source.id)));
        }
        Ok(())
    }

    async fn update_counts(&self, source_id: &str, pages: i64, chunks: i64) -> Result<()> {
        let result = sqlx::query("UPDATE sources SET pages_count = ?, chunks_count = ? WHERE id = ?")
            .bind(pages)
            .bind(chunks)
            .bind(source_id)
            .execute(&self.pools.writer)
            .await?;

        if result.rows_affected() == 0 {
            return Err(DocsError::NotFound(format!("source {}", source_id)));
        }
        Ok(())
    }

    async fn get_source(&self, id: &str) -> Result<Option<Source>> {
        let row = sqlx::query(&format!("SELECT {} FROM sources WHERE id = ?", SOURCE_COLUMNS))
            .bind(id)
            .fetch_optional(&self.pools.reader)
            .await?;
        row.as_ref().map(row_to_source).transpose()
    }

    async fn get_source_by_url(&self, url: &str) -> Result<Option<Source>> {
        let row = sqlx::query(&format!("SELECT {} FROM sources WHERE url = ?", SOURCE_COLUMNS))
            .bind(url)
            .fetch_optional(&self.pools.reader)
            .await?;
        row.as_ref().map(row_to_source).transpose()
    }

    async fn list_sources(&self) -> Result<Vec<Source>> {
        let rows = sqlx::query(&format!(
            "SELECT {} FROM sources ORDER BY created_at, name",
            SOURCE_COLUMNS
        ))
        .fetch_all(&self.pools.reader)
        .await?;

        let mut sources = Vec::with_capacity(rows.len());
        for row in &rows {
            match row_to_source(row) {
                Ok(source) => sources.push(source),
                Err(e) => {
                    let id: String = row.try_get("id").unwrap_or_default();
                    warn!(source_id = %id, error = %e, "skipping undecodable source row");
                }
            }
        }
        Ok(sources)
    }

    async fn remove_source(&self, id: &str) -> Result<bool> {
        let mut tx = self.pools.writer.begin().await?;

        sqlx::query("DELETE FROM chunks WHERE source_id = ?")
            .bind(id)
            .execute(&mut *tx)
            .await?;
        sqlx::query("DELETE FROM scrape_jobs WHERE source_id = ?")
            .bind(id)
            .execute(&mut *tx)
            .await?;
        let result = sqlx::query("DELETE FROM sources WHERE id = ?")
            .bind(id)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok(result.rows_affected() > 0)
    }

    async fn clear_chunks(&self, source_id: &str) -> Result<u64> {
        let result = sqlx::query("DELETE FROM chunks WHERE source_id = ?")
            .bind(source_id)
            .execute(&self.pools.writer)
            .await?;
        Ok(result.rows_affected())
    }

    async fn store_chunks(&self, chunks: &[Chunk]) -> Result<()> {
        if chunks.is_empty() {
            return Ok(());
        }
        let mut ordered: Vec<&Chunk> = chunks.iter().collect();
        ordered.sort_by_key(|c| c.position);

        let mut tx = self.pools.writer.begin().await?;
        for chunk in ordered {
            sqlx::query(
                r#"
                INSERT INTO chunks (id, source_id, url, title, content, position, created_at)
                VALUES (?, ?, ?, ?, ?, ?, ?)
                "#,
            )
            .bind(&chunk.id)
            .bind(&chunk.source_id)
            .bind(&chunk.url)
            .bind(&chunk.title)
            .bind(&chunk.content)
            .bind(chunk.position)
            .bind(chunk.created_at.timestamp())
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;
        Ok(())
    }

    async fn get_chunks(&self, ids: &[String]) -> Result<Vec<Chunk>> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        let sql = format!(
            "SELECT {} FROM chunks WHERE id IN ({})",
            CHUNK_COLUMNS,
            placeholders(ids.len())
        );
        let mut query = sqlx::query(&sql);
        for id in ids {
            query = query.bind(id);
        }
        let rows = query.fetch_all(&self.pools.reader).await?;

        let mut chunks = Vec::with_capacity(rows.len());
        for row in &rows {
            match row_to_chunk(row) {
                Ok(chunk) => chunks.push(chunk),
                Err(e) => warn!(error = %e, "skipping undecodable chunk row"),
            }
        }
        Ok(chunks)
    }

    async fn count_source_content(&self, source_id: &str) -> Result<(i64, i64)> {
        let row = sqlx::query(
            "SELECT COUNT(DISTINCT url) AS pages, COUNT(*) AS chunks FROM chunks WHERE source_id = ?",
        )
        .bind(source_id)
        .fetch_one(&self.pools.reader)
        .await?;
        Ok((row.try_get("pages")?, row.try_get("chunks")?))
    }

    async fn keyword_search(
        &self,
        query: &str,
        limit: usize,
        sources: Option<&[String]>,
    ) -> Result<Vec<ChunkCandidate>> {
        let Some(match_expr) = fts_query(query) else {
            return Ok(Vec::new());
        };
        if sources.is_some_and(<[String]>::is_empty) {
            return Ok(Vec::new());
        }

        let source_filter = match sources {
            Some(ids) => format!("AND c.source_id IN ({})", placeholders(ids.len())),
            None => String::new(),
        };
        let sql = format!(
            r#"
            SELECT c.id AS chunk_id, c.source_id AS source_id, bm25(chunks_fts) AS score
            FROM chunks_fts
            JOIN chunks c ON c.id = chunks_fts.chunk_id
            WHERE chunks_fts MATCH ? {}
            ORDER BY score
            LIMIT ?
            "#,
            source_filter
        );

        let mut q = sqlx::query(&sql).bind(match_expr);
        if let Some(ids) = sources {
            for id in ids {
                q = q.bind(id);
            }
        }
        let rows = q.bind(limit as i64).fetch_all(&self.pools.reader).await?;

        let candidates = rows
            .iter()
            .map(|row| {
                let score: f64 = row.get("score");
                ChunkCandidate {
                    chunk_id: row.get("chunk_id"),
                    source_id: row.get("source_id"),
                    raw_score: score.abs(),
                }
            })
            .collect();

        Ok(candidates)
    }

    async fn stats(&self) -> Result<StoreStats> {
        let row = sqlx::query(
            r#"
            SELECT
                (SELECT COUNT(*) FROM sources) AS sources,
                (SELECT COUNT(*) FROM chunks) AS chunks,
                (SELECT COUNT(*) FROM scrape_jobs WHERE status = 'queued') AS queued_jobs
            "#,
        )
        .fetch_one(&self.pools.reader)
        .await?;

        Ok(StoreStats {
            sources: row.try_get("sources")?,
            chunks: row.try_get("chunks")?,
            queued_jobs: row.try_get("queued_jobs")?,
        })
    }

    async fn enqueue_job(&self, source_id: &str, url: &str) -> Result<bool> {
        let result = sqlx::query(
            r#"
            INSERT INTO scrape_jobs (source_id, url, status, updated_at)
            VALUES (?, ?, 'queued', ?)
            ON CONFLICT(source_id, url) DO NOTHING
            "#,
        )
        .bind(source_id)
        .bind(url)
        .bind(Utc::now().timestamp())
        .execute(&self.pools.writer)
        .await?;
        Ok(result.rows_affected() == 1)
    }

    async fn finish_job(&self, source_id: &str, url: &str, error: Option<&str>) -> Result<()> {
        let status = if error.is_some() {
            JobStatus::Failed
        } else {
            JobStatus::Done
        };
        sqlx::query(
            "UPDATE scrape_jobs SET status = ?, error = ?, updated_at = ? WHERE source_id = ? AND url = ?",
        )
        .bind(status.as_str())
        .bind(error)
        .bind(Utc::now().timestamp())
        .bind(source_id)
        .bind(url)
        .execute(&self.pools.writer)
        .await?;
        Ok(())
    }

    async fn queued_jobs(&self) -> Result<Vec<ScrapeJob>> {
        let rows = sqlx::query(
            r#"
            SELECT source_id, url, status, error, updated_at
            FROM scrape_jobs
            WHERE status = 'queued'
            ORDER BY updated_at, rowid
            "#,
        )
        .fetch_all(&self.pools.reader)
        .await?;

        let mut jobs = Vec::with_capacity(rows.len());
        for row in &rows {
            let status: String = row.get("status");
            let Some(status) = JobStatus::parse(&status) else {
                warn!(status = %status, "skipping scrape job with unknown status");
                continue;
            };
            jobs.push(ScrapeJob {
                source_id: row.get("source_id"),
                url: row.get("url"),
                status,
                error: row.get("error"),
                updated_at: ts_to_datetime(row.get("updated_at")),
            });
        }
        Ok(jobs)
    }

    async fn clear_jobs(&self, source_id: &str) -> Result<()> {
        sqlx::query("DELETE FROM scrape_jobs WHERE source_id = ?")
            .bind(source_id)
            .execute(&self.pools.writer)
            .await?;
        Ok(())
    }
}
