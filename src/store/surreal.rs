//! Remote vector store over SurrealDB's HTTP `/sql` endpoint.
//!
//! Records live in the `chunk_vector` table, keyed by chunk id. Statements
//! are sent as SurrealQL text; every interpolated value is JSON-encoded,
//! which is also valid SurrealQL literal syntax, so ids and vectors cannot
//! break out of their positions.
//!
//! The backend is only used after [`VectorStore::probe`] succeeds against
//! `GET /health`.

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};
use std::time::Duration;
use tracing::debug;

use super::{ChunkCandidate, VectorStore};
use crate::config::VectorConfig;
use crate::error::{DocsError, Result};
use crate::models::Chunk;

const TABLE: &str = "chunk_vector";

pub struct SurrealVectorStore {
    base_url: String,
    namespace: String,
    database: String,
    username: Option<String>,
    password: Option<String>,
    client: reqwest::Client,
}

#[derive(Debug, Deserialize)]
struct StatementResult {
    status: String,
    #[serde(default)]
    result: Value,
}

impl SurrealVectorStore {
    pub fn new(config: &VectorConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;
        Ok(Self {
            base_url: config.url.trim_end_matches('/').to_string(),
            namespace: config.namespace.clone(),
            database: config.database.clone(),
            username: config.username.clone(),
            password: config.password.clone(),
            client,
        })
    }

    /// Run one or more statements and return the result of the last one.
    async fn sql(&self, statement: String) -> Result<Value> {
        let mut req = self
            .client
            .post(format!("{}/sql", self.base_url))
            .header("Accept", "application/json")
            .header("surreal-ns", &self.namespace)
            .header("surreal-db", &self.database)
            .body(statement);
        if let Some(user) = &self.username {
            req = req.basic_auth(user, self.password.as_deref());
        }

        let resp = req.send().await?;
        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(DocsError::VectorStore(format!(
                "SurrealDB returned {}: {}",
                status, body
            )));
        }

        let results: Vec<StatementResult> = resp.json().await?;
        let mut last = Value::Null;
        for r in results {
            if r.status != "OK" {
                return Err(DocsError::VectorStore(format!(
                    "SurrealDB statement failed: {}",
                    r.result
                )));
            }
            last = r.result;
        }
        Ok(last)
    }
}

fn source_filter(sources: Option<&[String]>) -> String {
    match sources {
        Some(ids) => format!(" WHERE source_id IN {}", json!(ids)),
        None => String::new(),
    }
}

fn candidate_from(value: &Value) -> Option<ChunkCandidate> {
    Some(ChunkCandidate {
        chunk_id: value.get("chunk_id")?.as_str()?.to_string(),
        source_id: value.get("source_id")?.as_str()?.to_string(),
        raw_score: value.get("score")?.as_f64()?,
    })
}

#[async_trait]
impl VectorStore for SurrealVectorStore {
    fn backend_name(&self) -> &str {
        "surrealdb"
    }

    async fn probe(&self) -> bool {
        match self
            .client
            .get(format!("{}/health", self.base_url))
            .send()
            .await
        {
            Ok(resp) => resp.status().is_success(),
            Err(e) => {
                debug!(url = %self.base_url, error = %e, "SurrealDB not reachable");
                false
            }
        }
    }

    async fn upsert(&self, chunk: &Chunk, vector: &[f32], model: &str) -> Result<()> {
        let content = json!({
            "chunk_id": chunk.id,
            "source_id": chunk.source_id,
            "model": model,
            "embedding": vector,
        });
        self.sql(format!(
            "UPSERT type::thing({}, {}) CONTENT {};",
            json!(TABLE),
            json!(chunk.id),
            content
        ))
        .await?;
        Ok(())
    }

    async fn search(
        &self,
        query: &[f32],
        limit: usize,
        sources: Option<&[String]>,
    ) -> Result<Vec<ChunkCandidate>> {
        if sources.is_some_and(<[String]>::is_empty) {
            return Ok(Vec::new());
        }
        let statement = format!(
            "SELECT chunk_id, source_id, vector::similarity::cosine(embedding, {}) AS score \
             FROM {}{} ORDER BY score DESC LIMIT {};",
            json!(query),
            TABLE,
            source_filter(sources),
            limit
        );
        let result = self.sql(statement).await?;

        let rows = result.as_array().cloned().unwrap_or_default();
        let mut candidates = Vec::with_capacity(rows.len());
        for row in &rows {
            match candidate_from(row) {
                Some(c) => candidates.push(c),
                None => debug!(row = %row, "skipping malformed vector row"),
            }
        }
        Ok(candidates)
    }

    async fn delete_source(&self, source_id: &str) -> Result<()> {
        self.sql(format!(
            "DELETE {} WHERE source_id = {};",
            TABLE,
            json!(source_id)
        ))
        .await?;
        Ok(())
    }

    async fn count(&self) -> Result<i64> {
        let result = self
            .sql(format!("SELECT count() AS n FROM {} GROUP ALL;", TABLE))
            .await?;
        Ok(result
            .as_array()
            .and_then(|rows| rows.first())
            .and_then(|row| row.get("n"))
            .and_then(Value::as_i64)
            .unwrap_or(0))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_source_filter_is_json_quoted() {
        assert_eq!(source_filter(None), "");
        let ids = vec!["a\"b".to_string()];
        assert_eq!(source_filter(Some(&ids)), " WHERE source_id IN [\"a\\\"b\"]");
    }

    #[test]
    fn test_candidate_from_skips_incomplete_rows() {
        let ok = json!({"chunk_id": "c1", "source_id": "s1", "score": 0.5});
        assert_eq!(candidate_from(&ok).unwrap().raw_score, 0.5);
        assert!(candidate_from(&json!({"chunk_id": "c1"})).is_none());
    }
}
