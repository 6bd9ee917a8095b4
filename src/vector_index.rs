//! Tenant-scoped vector index.
//!
//! Every operation carries an explicit tenant predicate (`user_id`, optionally
//! `document_id`); the index is multi-tenant and must never return cross-tenant
//! matches, so the filter is constructed inside this module, not by callers.
//!
//! Two backends implement [`VectorIndex`]:
//! - [`SqliteVectorIndex`] keeps embeddings as little-endian f32 blobs in the
//!   local database and ranks by cosine similarity in-process.
//! - [`HttpVectorIndex`] talks to a remote provider (named index, API key),
//!   batching upserts at 50 records and fetches at the provider's 100-id
//!   limit, with pacing between batches.
//!
//! `fetch` responses are not guaranteed ordered (multi-batch fetches in
//! particular interleave arbitrarily), so callers restore numeric chunk order
//! themselves.

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use serde::Deserialize;
use sqlx::{Row, SqlitePool};
use std::collections::HashMap;
use std::time::Duration;

use crate::config::VectorIndexConfig;
use crate::embedding::{blob_to_vec, cosine_similarity, vec_to_blob};
use crate::models::{ChunkMetadata, VectorMatch, VectorRecord};

#[async_trait]
pub trait VectorIndex: Send + Sync {
    /// Insert or replace records. Record ids are deterministic, so re-running
    /// an ingestion overwrites rather than duplicates.
    async fn upsert(&self, records: &[VectorRecord]) -> Result<()>;

    /// Top-K similarity query scoped to one tenant, optionally one document.
    async fn query(
        &self,
        vector: &[f32],
        top_k: usize,
        user_id: &str,
        document_id: Option<&str>,
    ) -> Result<Vec<VectorMatch>>;

    /// Fetch records by id. Order is not guaranteed.
    async fn fetch(&self, ids: &[String]) -> Result<Vec<VectorRecord>>;

    /// Delete every record for one document of one tenant. Never global.
    async fn delete_document(&self, document_id: &str, user_id: &str) -> Result<()>;
}

// ============ SQLite backend ============

pub struct SqliteVectorIndex {
    pool: SqlitePool,
}

impl SqliteVectorIndex {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl VectorIndex for SqliteVectorIndex {
    async fn upsert(&self, records: &[VectorRecord]) -> Result<()> {
        let mut tx = self.pool.begin().await?;
        let now = chrono::Utc::now().timestamp();

        for record in records {
            let blob = vec_to_blob(&record.embedding);
            sqlx::query(
                r#"
                INSERT INTO chunk_vectors
                    (id, user_id, document_id, chunk_index, text, title, file_name, embedding, created_at)
                VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
                ON CONFLICT(id) DO UPDATE SET
                    text = excluded.text,
                    title = excluded.title,
                    file_name = excluded.file_name,
                    embedding = excluded.embedding
                "#,
            )
            .bind(&record.id)
            .bind(&record.metadata.user_id)
            .bind(&record.metadata.document_id)
            .bind(record.metadata.chunk_index)
            .bind(&record.metadata.text)
            .bind(&record.metadata.title)
            .bind(&record.metadata.file_name)
            .bind(&blob)
            .bind(now)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(())
    }

    async fn query(
        &self,
        vector: &[f32],
        top_k: usize,
        user_id: &str,
        document_id: Option<&str>,
    ) -> Result<Vec<VectorMatch>> {
        // Tenant predicate is part of the SQL, never appended by callers.
        let rows = match document_id {
            Some(doc) => {
                sqlx::query(
                    "SELECT id, user_id, document_id, chunk_index, text, title, file_name, embedding
                     FROM chunk_vectors WHERE user_id = ? AND document_id = ?",
                )
                .bind(user_id)
                .bind(doc)
                .fetch_all(&self.pool)
                .await?
            }
            None => {
                sqlx::query(
                    "SELECT id, user_id, document_id, chunk_index, text, title, file_name, embedding
                     FROM chunk_vectors WHERE user_id = ?",
                )
                .bind(user_id)
                .fetch_all(&self.pool)
                .await?
            }
        };

        let mut matches: Vec<VectorMatch> = rows
            .iter()
            .map(|row| {
                let blob: Vec<u8> = row.get("embedding");
                let score = cosine_similarity(vector, &blob_to_vec(&blob));
                VectorMatch {
                    id: row.get("id"),
                    score,
                    metadata: metadata_from_row(row),
                }
            })
            .collect();

        // Stable sort keeps provider (insertion) order among score ties.
        matches.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        matches.truncate(top_k);
        Ok(matches)
    }

    async fn fetch(&self, ids: &[String]) -> Result<Vec<VectorRecord>> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }

        let placeholders = vec!["?"; ids.len()].join(", ");
        let sql = format!(
            "SELECT id, user_id, document_id, chunk_index, text, title, file_name, embedding
             FROM chunk_vectors WHERE id IN ({})",
            placeholders
        );

        let mut query = sqlx::query(&sql);
        for id in ids {
            query = query.bind(id);
        }
        let rows = query.fetch_all(&self.pool).await?;

        Ok(rows
            .iter()
            .map(|row| {
                let blob: Vec<u8> = row.get("embedding");
                VectorRecord {
                    id: row.get("id"),
                    embedding: blob_to_vec(&blob),
                    metadata: metadata_from_row(row),
                }
            })
            .collect())
    }

    async fn delete_document(&self, document_id: &str, user_id: &str) -> Result<()> {
        sqlx::query("DELETE FROM chunk_vectors WHERE document_id = ? AND user_id = ?")
            .bind(document_id)
            .bind(user_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}

fn metadata_from_row(row: &sqlx::sqlite::SqliteRow) -> ChunkMetadata {
    ChunkMetadata {
        user_id: row.get("user_id"),
        document_id: row.get("document_id"),
        chunk_index: row.get("chunk_index"),
        text: row.get("text"),
        title: row.get("title"),
        file_name: row.get("file_name"),
        timestamp: 0,
    }
}

// ============ HTTP provider backend ============

pub struct HttpVectorIndex {
    base_url: String,
    index_name: String,
    api_key: String,
    upsert_batch_size: usize,
    fetch_batch_size: usize,
    batch_delay: Duration,
    client: reqwest::Client,
}

impl HttpVectorIndex {
    /// Create a remote index client. Requires `VECTOR_INDEX_API_KEY`.
    pub fn new(config: &VectorIndexConfig) -> Result<Self> {
        let base_url = config
            .base_url
            .clone()
            .context("vector_index.base_url required for the http backend")?;
        let index_name = config
            .index_name
            .clone()
            .context("vector_index.index_name required for the http backend")?;
        let api_key = std::env::var("VECTOR_INDEX_API_KEY")
            .map_err(|_| anyhow::anyhow!("VECTOR_INDEX_API_KEY environment variable not set"))?;

        Ok(Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            index_name,
            api_key,
            upsert_batch_size: config.upsert_batch_size,
            fetch_batch_size: config.fetch_batch_size,
            batch_delay: Duration::from_millis(config.batch_delay_ms),
            client: reqwest::Client::new(),
        })
    }

    async fn post(&self, path: &str, body: serde_json::Value) -> Result<reqwest::Response> {
        let url = format!("{}/indexes/{}{}", self.base_url, self.index_name, path);
        let response = self
            .client
            .post(&url)
            .header("Api-Key", &self.api_key)
            .json(&body)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            bail!("vector index error {} on {}: {}", status, path, text);
        }
        Ok(response)
    }
}

/// Provider wire types, one struct per response shape.
#[derive(Debug, Deserialize)]
struct QueryResponse {
    matches: Vec<WireMatch>,
}

#[derive(Debug, Deserialize)]
struct WireMatch {
    id: String,
    score: f32,
    metadata: ChunkMetadata,
}

#[derive(Debug, Deserialize)]
struct FetchResponse {
    vectors: HashMap<String, WireVector>,
}

#[derive(Debug, Deserialize)]
struct WireVector {
    id: String,
    values: Vec<f32>,
    metadata: ChunkMetadata,
}

#[async_trait]
impl VectorIndex for HttpVectorIndex {
    async fn upsert(&self, records: &[VectorRecord]) -> Result<()> {
        for (i, batch) in records.chunks(self.upsert_batch_size).enumerate() {
            if i > 0 && !self.batch_delay.is_zero() {
                tokio::time::sleep(self.batch_delay).await;
            }

            let vectors: Vec<serde_json::Value> = batch
                .iter()
                .map(|r| {
                    serde_json::json!({
                        "id": r.id,
                        "values": r.embedding,
                        "metadata": r.metadata,
                    })
                })
                .collect();

            self.post("/vectors/upsert", serde_json::json!({ "vectors": vectors }))
                .await?;
        }
        Ok(())
    }

    async fn query(
        &self,
        vector: &[f32],
        top_k: usize,
        user_id: &str,
        document_id: Option<&str>,
    ) -> Result<Vec<VectorMatch>> {
        let mut filter = serde_json::json!({ "user_id": { "$eq": user_id } });
        if let Some(doc) = document_id {
            filter["document_id"] = serde_json::json!({ "$eq": doc });
        }

        let response = self
            .post(
                "/query",
                serde_json::json!({
                    "vector": vector,
                    "topK": top_k,
                    "filter": filter,
                    "includeMetadata": true,
                }),
            )
            .await?;

        let parsed: QueryResponse = response.json().await?;
        Ok(parsed
            .matches
            .into_iter()
            .map(|m| VectorMatch {
                id: m.id,
                score: m.score,
                metadata: m.metadata,
            })
            .collect())
    }

    async fn fetch(&self, ids: &[String]) -> Result<Vec<VectorRecord>> {
        let mut records = Vec::with_capacity(ids.len());

        for (i, batch) in ids.chunks(self.fetch_batch_size).enumerate() {
            if i > 0 && !self.batch_delay.is_zero() {
                tokio::time::sleep(self.batch_delay).await;
            }

            let response = self
                .post("/vectors/fetch", serde_json::json!({ "ids": batch }))
                .await?;
            let parsed: FetchResponse = response.json().await?;
            records.extend(parsed.vectors.into_values().map(|v| VectorRecord {
                id: v.id,
                embedding: v.values,
                metadata: v.metadata,
            }));
        }

        Ok(records)
    }

    async fn delete_document(&self, document_id: &str, user_id: &str) -> Result<()> {
        self.post(
            "/vectors/delete",
            serde_json::json!({
                "filter": {
                    "user_id": { "$eq": user_id },
                    "document_id": { "$eq": document_id },
                }
            }),
        )
        .await?;
        Ok(())
    }
}
