//! Storage abstraction for OSINT Harness.
//!
//! Two stores make up the knowledge base:
//!
//! | Trait | Holds | Keyed by |
//! |-------|-------|----------|
//! | [`DocumentStore`] | whole ingested documents | document UUID |
//! | [`VectorStore`] | chunks plus their embeddings | `"<doc_id>-<index>"` |
//!
//! Both keep an index of entries in insertion order. Every id in an index
//! has a readable backing record; implementations drop entries whose record
//! has gone missing rather than return them.
//!
//! Implementations must be `Send + Sync` so a store can be shared behind an
//! `Arc` by concurrent agent turns.

pub mod memory;

use std::collections::BTreeMap;

use anyhow::Result;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::models::{Chunk, Document, DocumentContent, SearchResult};

/// Index metadata for one stored document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DocumentEntry {
    pub id: String,
    pub source_type: String,
    pub source_name: String,
    pub ingested_at: DateTime<Utc>,
    pub path: String,
}

impl DocumentEntry {
    pub fn of(doc: &Document) -> Self {
        Self {
            id: doc.id.clone(),
            source_type: doc.source_type.clone(),
            source_name: doc.source_name.clone(),
            ingested_at: doc.ingested_at,
            path: doc.storage_path.clone(),
        }
    }
}

/// Index metadata for one stored chunk.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VectorEntry {
    pub id: String,
    pub original_doc_id: String,
    pub source_type: String,
    pub source_name: String,
    pub ingested_at: DateTime<Utc>,
    pub path: String,
    pub has_embedding: bool,
}

/// Counts for a store, broken down by source type.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct StoreStats {
    pub count: usize,
    pub by_source_type: BTreeMap<String, usize>,
}

impl StoreStats {
    /// Tally `source_types` into a stats value.
    pub fn tally<'a>(source_types: impl IntoIterator<Item = &'a str>) -> Self {
        let mut stats = StoreStats::default();
        for st in source_types {
            stats.count += 1;
            *stats.by_source_type.entry(st.to_string()).or_insert(0) += 1;
        }
        stats
    }
}

/// Persistent collection of ingested documents.
///
/// # Operations
///
/// | Method | Purpose |
/// |--------|---------|
/// | [`add`](DocumentStore::add) | Assign an id, persist, and index a document |
/// | [`get`](DocumentStore::get) | Load a document by id |
/// | [`remove`](DocumentStore::remove) | Drop a document from index and storage |
/// | [`list`](DocumentStore::list) | Index entries in insertion order |
/// | [`stats`](DocumentStore::stats) | Count and per-source-type breakdown |
pub trait DocumentStore: Send + Sync {
    /// Persist `content` as a new document and return it.
    ///
    /// The returned document carries the freshly generated UUID, the UTC
    /// ingestion time, and its storage path.
    fn add(&self, content: DocumentContent, source_type: &str, source_name: &str)
        -> Result<Document>;

    /// Load a document. Unknown ids yield `Ok(None)`.
    fn get(&self, id: &str) -> Result<Option<Document>>;

    /// Remove a document. Returns `false` when the id was not indexed.
    fn remove(&self, id: &str) -> Result<bool>;

    fn list(&self) -> Result<Vec<DocumentEntry>>;

    fn stats(&self) -> Result<StoreStats>;
}

/// Persistent collection of chunks with exact similarity search.
pub trait VectorStore: Send + Sync {
    /// Store `chunk`, replacing any chunk with the same id. Returns the id.
    ///
    /// A replaced chunk moves to the end of the insertion order.
    fn add(&self, chunk: Chunk) -> Result<String>;

    /// Rank stored chunks by cosine similarity to `query`.
    ///
    /// Only chunks with an embedding take part; `source_type` restricts
    /// the scan before scoring.
    fn search(
        &self,
        query: &[f32],
        limit: usize,
        source_type: Option<&str>,
    ) -> Result<Vec<SearchResult>>;

    fn get(&self, chunk_id: &str) -> Result<Option<Chunk>>;

    /// Returns `false` when the id was not indexed.
    fn delete(&self, chunk_id: &str) -> Result<bool>;

    /// Remove every chunk.
    fn clear(&self) -> Result<()>;

    /// Index entries in insertion order.
    fn list(&self) -> Result<Vec<VectorEntry>>;

    /// All chunks of one document, ordered by `chunk_index`.
    fn chunks_for_document(&self, doc_id: &str) -> Result<Vec<Chunk>> {
        let mut chunks = Vec::new();
        for entry in self.list()? {
            if entry.original_doc_id != doc_id {
                continue;
            }
            if let Some(chunk) = self.get(&entry.id)? {
                chunks.push(chunk);
            }
        }
        chunks.sort_by_key(|c| c.chunk_index);
        Ok(chunks)
    }

    fn stats(&self) -> Result<StoreStats> {
        let entries = self.list()?;
        Ok(StoreStats::tally(entries.iter().map(|e| e.source_type.as_str())))
    }
}

impl VectorEntry {
    pub fn of(chunk: &Chunk, path: impl Into<String>) -> Self {
        Self {
            id: chunk.id.clone(),
            original_doc_id: chunk.original_doc_id.clone(),
            source_type: chunk.source_type.clone(),
            source_name: chunk.source_name.clone(),
            ingested_at: chunk.ingested_at,
            path: path.into(),
            has_embedding: chunk.has_embedding(),
        }
    }
}
