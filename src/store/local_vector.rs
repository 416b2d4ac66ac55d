//! Brute-force vector index in the primary SQLite file.
//!
//! Embeddings live in `chunk_vectors` as little-endian f32 BLOBs. Search
//! loads candidate vectors and ranks them by cosine similarity in memory,
//! which is adequate for the few thousand chunks a local docs index holds.

use async_trait::async_trait;
use sqlx::Row;

use super::{ChunkCandidate, VectorStore};
use crate::db::Pools;
use crate::embedding::{blob_to_vec, cosine_similarity, vec_to_blob};
use crate::error::Result;
use crate::models::Chunk;

pub struct LocalVectorStore {
    pools: Pools,
}

impl LocalVectorStore {
    pub fn new(pools: Pools) -> Self {
        Self { pools }
    }
}

#[async_trait]
impl VectorStore for LocalVectorStore {
    fn backend_name(&self) -> &str {
        "local"
    }

    async fn probe(&self) -> bool {
        sqlx::query("SELECT 1 FROM chunk_vectors LIMIT 1")
            .fetch_optional(&self.pools.reader)
            .await
            .is_ok()
    }

    async fn upsert(&self, chunk: &Chunk, vector: &[f32], model: &str) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO chunk_vectors (chunk_id, source_id, model, dims, embedding)
            VALUES (?, ?, ?, ?, ?)
            ON CONFLICT(chunk_id) DO UPDATE SET
                model = excluded.model,
                dims = excluded.dims,
                embedding = excluded.embedding
            "#,
        )
        .bind(&chunk.id)
        .bind(&chunk.source_id)
        .bind(model)
        .bind(vector.len() as i64)
        .bind(vec_to_blob(vector))
        .execute(&self.pools.writer)
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
        // Vectors of orphaned chunks are skipped by the join.
        let mut sql = String::from(
            r#"
            SELECT cv.chunk_id, cv.source_id, cv.embedding
            FROM chunk_vectors cv
            JOIN chunks c ON c.id = cv.chunk_id
            WHERE cv.dims = ?
            "#,
        );
        if let Some(ids) = sources {
            sql.push_str(&format!(
                " AND cv.source_id IN ({})",
                vec!["?"; ids.len()].join(", ")
            ));
        }

        let mut q = sqlx::query(&sql).bind(query.len() as i64);
        if let Some(ids) = sources {
            for id in ids {
                q = q.bind(id);
            }
        }
        let rows = q.fetch_all(&self.pools.reader).await?;

        let mut candidates: Vec<ChunkCandidate> = rows
            .iter()
            .map(|row| {
                let blob: Vec<u8> = row.get("embedding");
                let similarity = cosine_similarity(query, &blob_to_vec(&blob)) as f64;
                ChunkCandidate {
                    chunk_id: row.get("chunk_id"),
                    source_id: row.get("source_id"),
                    raw_score: similarity,
                }
            })
            .collect();

        candidates.sort_by(|a, b| {
            b.raw_score
                .partial_cmp(&a.raw_score)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        candidates.truncate(limit);

        Ok(candidates)
    }

    async fn delete_source(&self, source_id: &str) -> Result<()> {
        sqlx::query("DELETE FROM chunk_vectors WHERE source_id = ?")
            .bind(source_id)
            .execute(&self.pools.writer)
            .await?;
        Ok(())
    }

    async fn count(&self) -> Result<i64> {
        let n: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM chunk_vectors")
            .fetch_one(&self.pools.reader)
            .await?;
        Ok(n)
    }
}
