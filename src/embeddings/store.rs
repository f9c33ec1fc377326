use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use rusqlite::params;
use serde::Serialize;
use serde_json::Value;
use sha2::{Digest, Sha256};

use super::ledger::{normalize_id, IndexLedger};
use super::Embedder;
use crate::cache::QueryEmbeddingCache;
use crate::db::{migrate, Db};
use crate::error::{RagchatError, Result};
use crate::ingest::element::Metadata;
use crate::ingest::segmenter::StructuredRecord;
use crate::search::{cosine_similarity, Retriever};

const VECTOR_DB_FILE: &str = "vectors.db";

/// Per-id write lock, dropped from the map once nobody else holds it
struct IdLock<'a> {
    store: &'a EmbeddingsStore,
    id: String,
    lock: Arc<tokio::sync::Mutex<()>>,
}

impl Drop for IdLock<'_> {
    fn drop(&mut self) {
        let mut locks = self.store.id_locks.lock().unwrap();
        // One reference in the map plus ours: no other writer is waiting
        let idle = locks
            .get(&self.id)
            .map(|held| Arc::ptr_eq(held, &self.lock) && Arc::strong_count(&self.lock) == 2)
            .unwrap_or(false);
        if idle {
            locks.remove(&self.id);
        }
    }
}

/// How prose records (no question) are rendered before embedding
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum EmbeddingFormat {
    /// Raw answer text
    #[default]
    Plain,
    /// `Answer: """<answer>"""`
    TripleQuoted,
}

/// A stored record returned by similarity search
#[derive(Debug, Clone, Serialize)]
pub struct ScoredRecord {
    pub record_id: String,
    pub text: String,
    pub metadata: Metadata,
    pub score: f32,
}

/// Persistent vector index plus the ledger of embedded source ids.
///
/// Everything lives under one root directory: `vectors.db` holds the records
/// and their embeddings, `indexed/` holds one marker file per source id.
pub struct EmbeddingsStore {
    root: PathBuf,
    db: Db,
    ledger: IndexLedger,
    embedder: Arc<dyn Embedder>,
    format: EmbeddingFormat,
    id_locks: Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>,
    // Upserts hold it shared, reset holds it exclusively
    reset_guard: tokio::sync::RwLock<()>,
    query_cache: Option<Arc<QueryEmbeddingCache>>,
}

impl EmbeddingsStore {
    /// Open (or create) the store rooted at `root`
    pub async fn open(root: impl AsRef<Path>, embedder: Arc<dyn Embedder>) -> Result<Self> {
        let root = root.as_ref().to_path_buf();
        let store = Self {
            db: Db::new(root.join(VECTOR_DB_FILE)),
            ledger: IndexLedger::new(&root),
            root,
            embedder,
            format: EmbeddingFormat::default(),
            id_locks: Mutex::new(HashMap::new()),
            reset_guard: tokio::sync::RwLock::new(()),
            query_cache: None,
        };
        store.with_db(|_| Ok(())).await?;
        log::info!("Embeddings store opened at {}", store.root.display());
        Ok(store)
    }

    pub fn with_format(mut self, format: EmbeddingFormat) -> Self {
        self.format = format;
        self
    }

    /// Cache query embeddings in an LRU of the given capacity
    pub fn with_query_cache(mut self, capacity: usize) -> Self {
        self.query_cache = Some(Arc::new(QueryEmbeddingCache::new(capacity)));
        self
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn ledger(&self) -> &IndexLedger {
        &self.ledger
    }

    /// Retriever returning the `top_k` most similar records
    pub fn retriever(self: &Arc<Self>, top_k: usize) -> Retriever {
        Retriever::new(Arc::clone(self), top_k)
    }

    /// Run `f` against the vector database, recreating the root and schema if
    /// a reset removed them.
    async fn with_db<F, T>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&mut rusqlite::Connection) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        tokio::fs::create_dir_all(&self.root).await?;
        self.db
            .with_connection(move |conn| {
                migrate::run_migrations(conn)?;
                f(conn)
            })
            .await
    }

    fn lock_for(&self, id: &str) -> IdLock<'_> {
        let mut locks = self.id_locks.lock().unwrap();
        IdLock {
            store: self,
            id: id.to_string(),
            lock: Arc::clone(locks.entry(id.to_string()).or_default()),
        }
    }

    /// Number of source ids with a write in progress or queued
    #[cfg(test)]
    fn pending_ids(&self) -> usize {
        self.id_locks.lock().unwrap().len()
    }

    /// Text that gets embedded for a record
    pub fn embedding_text(&self, record: &StructuredRecord) -> String {
        match (&record.question, self.format) {
            (Some(question), _) => {
                format!("Question: \"\"\"{}\"\"\"\nAnswer: \"\"\"{}\"\"\"", question, record.answer)
            }
            (None, EmbeddingFormat::Plain) => record.answer.clone(),
            (None, EmbeddingFormat::TripleQuoted) => format!("Answer: \"\"\"{}\"\"\"", record.answer),
        }
    }

    /// Embed and persist `records` under source `id`.
    ///
    /// Returns `Ok(false)` when `id` is already in the ledger or there is
    /// nothing to store. The ledger marker is written only after the records
    /// are committed, so a failed write leaves the id storable.
    pub async fn upsert(&self, records: &[StructuredRecord], id: Option<&str>) -> Result<bool> {
        let _reset = self.reset_guard.read().await;

        let id = id.map(normalize_id).transpose()?;
        let id_lock = id.as_deref().map(|id| self.lock_for(id));
        let _id_guard = match &id_lock {
            Some(entry) => Some(entry.lock.lock().await),
            None => None,
        };

        if let Some(id) = &id {
            if self.ledger.is_indexed(id)? {
                log::debug!("Ledger already has {}", id);
                return Ok(false);
            }
        }
        if records.is_empty() {
            return Ok(false);
        }

        let label = id.clone().unwrap_or_else(|| "<anonymous batch>".to_string());
        let write_failure = |reason: String| RagchatError::StoreWriteFailure {
            id: label.clone(),
            reason,
        };

        let texts: Vec<String> = records.iter().map(|r| self.embedding_text(r)).collect();
        let embeddings = self
            .embedder
            .embed_documents(texts.clone())
            .await
            .map_err(|e| write_failure(e.to_string()))?;
        if embeddings.len() != records.len() {
            return Err(write_failure(format!(
                "embedder returned {} vectors for {} records",
                embeddings.len(),
                records.len()
            )));
        }

        let prefix = match &id {
            Some(id) => hex_digest(id),
            None => uuid::Uuid::new_v4().simple().to_string(),
        };
        let now = chrono::Utc::now().to_rfc3339();
        let mut rows = Vec::with_capacity(records.len());
        for (index, ((record, text), embedding)) in records.iter().zip(texts).zip(embeddings).enumerate() {
            let metadata = flatten_metadata(&record.metadata, &record.file);
            let metadata_json = serde_json::to_string(&metadata)
                .map_err(|e| write_failure(format!("metadata serialization failed: {}", e)))?;
            rows.push((
                format!("{}::{}", prefix, index),
                text,
                metadata_json,
                encode_embedding(&embedding),
            ));
        }

        let source_id = id.clone();
        let row_count = rows.len();
        self.with_db(move |conn| {
            let tx = conn.transaction()?;
            if let Some(source_id) = &source_id {
                tx.execute("DELETE FROM vector_records WHERE source_id = ?1", params![source_id])?;
            }
            {
                let mut stmt = tx.prepare(
                    "INSERT INTO vector_records (record_id, source_id, text, metadata_json, embedding, created_at)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                )?;
                for (record_id, text, metadata_json, blob) in &rows {
                    stmt.execute(params![record_id, source_id, text, metadata_json, blob, now])?;
                }
            }
            tx.commit()?;
            Ok(())
        })
        .await
        .map_err(|e| write_failure(e.to_string()))?;

        if let Some(id) = &id {
            self.ledger.mark(id).map_err(|e| write_failure(e.to_string()))?;
        }
        log::debug!("Stored {} record(s) for {}", row_count, label);

        Ok(true)
    }

    /// Delete everything under the store root. A missing root is a no-op.
    pub async fn reset(&self) -> Result<()> {
        let _exclusive = self.reset_guard.write().await;

        if tokio::fs::metadata(&self.root).await.is_err() {
            return Ok(());
        }

        let mut entries = tokio::fs::read_dir(&self.root).await?;
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if entry.file_type().await?.is_dir() {
                tokio::fs::remove_dir_all(&path).await?;
            } else {
                tokio::fs::remove_file(&path).await?;
            }
        }

        if let Some(cache) = &self.query_cache {
            cache.clear();
        }
        self.id_locks.lock().unwrap().clear();
        log::info!("Embeddings store reset: {}", self.root.display());
        Ok(())
    }

    /// Number of stored records
    pub async fn count(&self) -> Result<usize> {
        self.with_db(|conn| {
            let n: i64 = conn.query_row("SELECT COUNT(*) FROM vector_records", [], |row| row.get(0))?;
            Ok(n as usize)
        })
        .await
    }

    async fn query_embedding(&self, query: &str) -> Result<Vec<f32>> {
        if let Some(cache) = &self.query_cache {
            if let Some(hit) = cache.get(query) {
                let (hits, misses) = cache.stats();
                log::debug!("Query embedding cache hit ({} hits, {} misses)", hits, misses);
                return Ok(hit);
            }
        }
        let embedding = self.embedder.embed_query(query).await?;
        if let Some(cache) = &self.query_cache {
            cache.put(query, embedding.clone());
        }
        Ok(embedding)
    }

    /// Top `k` records by cosine similarity to `query`, best first
    pub async fn similarity_search(&self, query: &str, k: usize) -> Result<Vec<ScoredRecord>> {
        if k == 0 {
            return Ok(Vec::new());
        }
        let query_embedding = self.query_embedding(query).await?;

        let _reset = self.reset_guard.read().await;
        let mut results = self
            .with_db(move |conn| {
                let mut stmt = conn.prepare(
                    "SELECT record_id, text, metadata_json, embedding FROM vector_records",
                )?;
                let rows = stmt.query_map([], |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, String>(2)?,
                        row.get::<_, Vec<u8>>(3)?,
                    ))
                })?;

                let mut scored = Vec::new();
                for row in rows {
                    let (record_id, text, metadata_json, blob) = row?;
                    let Some(embedding) = decode_embedding(&blob) else {
                        log::warn!("Skipping record {} with malformed embedding", record_id);
                        continue;
                    };
                    if embedding.len() != query_embedding.len() {
                        continue;
                    }
                    let metadata: Metadata = serde_json::from_str(&metadata_json).unwrap_or_default();
                    scored.push(ScoredRecord {
                        score: cosine_similarity(&query_embedding, &embedding),
                        record_id,
                        text,
                        metadata,
                    });
                }
                Ok(scored)
            })
            .await?;

        results.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));
        results.truncate(k);
        Ok(results)
    }
}

fn hex_digest(id: &str) -> String {
    let digest = Sha256::digest(id.as_bytes());
    digest.iter().map(|b| format!("{:02x}", b)).collect()
}

/// Scalar-only metadata: lists become comma-joined strings, maps become JSON
fn flatten_metadata(metadata: &Metadata, file: &str) -> Metadata {
    let mut flat = Metadata::new();
    for (key, value) in metadata {
        let scalar = match value {
            Value::Array(items) => Value::String(
                items
                    .iter()
                    .map(|item| match item {
                        Value::String(s) => s.clone(),
                        other => other.to_string(),
                    })
                    .collect::<Vec<_>>()
                    .join(", "),
            ),
            Value::Object(_) => Value::String(value.to_string()),
            other => other.clone(),
        };
        flat.insert(key.clone(), scalar);
    }
    flat.insert("file".to_string(), Value::String(file.to_string()));
    flat
}

/// f32 little-endian BLOB
fn encode_embedding(embedding: &[f32]) -> Vec<u8> {
    embedding.iter().flat_map(|v| v.to_le_bytes()).collect()
}

fn decode_embedding(blob: &[u8]) -> Option<Vec<f32>> {
    if blob.len() % 4 != 0 {
        return None;
    }
    Some(
        blob.chunks_exact(4)
            .map(|b| f32::from_le_bytes([b[0], b[1], b[2], b[3]]))
            .collect(),
    )
}
