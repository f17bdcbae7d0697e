//! File-backed document and vector stores.
//!
//! # On-disk layout
//!
//! ```text
//! <root>/
//! ├── documents/<doc_id>.json      {"content": {...}, "metadata": {...}}
//! ├── documents.log                index operations (see index_log)
//! ├── vectors/<chunk_id>.json      {"content": {...}, "metadata": {..., "embedding": [...]}}
//! └── vectors.log
//! ```
//!
//! Records are written to a temporary file and renamed into place, then the
//! index operation is appended. Removal logs first and deletes the file
//! second. Either way a crash leaves at worst an orphan file, never an
//! index entry without a record. Entries whose record is missing at open
//! time are dropped with a warning.
//!
//! Record files are always located from the store root and the record id.
//! The `path` kept in index entries reflects where the store was last
//! opened, so a store directory can be moved or opened through a different
//! relative path without losing anything.
//!
//! Writers serialise on the log mutex and only then take the index write
//! lock; readers take the index read lock alone.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use indexmap::IndexMap;
use parking_lot::{Mutex, RwLock};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use osint_harness_core::models::{Chunk, ChunkContent, Document, DocumentContent, SearchResult};
use osint_harness_core::search::{rank_exact, Candidate};
use osint_harness_core::store::{DocumentEntry, DocumentStore, StoreStats, VectorEntry, VectorStore};

use crate::error::StoreError;
use crate::index_log::{apply, IndexLog, Keyed, LogOp};

/// Write `value` as pretty JSON via a temporary file and rename.
fn write_json_atomic<T: Serialize>(path: &Path, value: &T) -> Result<(), StoreError> {
    let json = serde_json::to_vec_pretty(value).map_err(|e| StoreError::json(path, e))?;
    let tmp = path.with_extension("json.tmp");
    std::fs::write(&tmp, json).map_err(|e| StoreError::io(&tmp, e))?;
    std::fs::rename(&tmp, path).map_err(|e| StoreError::io(path, e))
}

/// Read a JSON record. A missing file yields `Ok(None)`.
fn read_json<T: DeserializeOwned>(path: &Path) -> Result<Option<T>, StoreError> {
    let bytes = match std::fs::read(path) {
        Ok(b) => b,
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(StoreError::io(path, e)),
    };
    serde_json::from_slice(&bytes)
        .map(Some)
        .map_err(|e| StoreError::json(path, e))
}

fn remove_file_if_present(path: &Path) -> Result<(), StoreError> {
    match std::fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
        Err(e) => Err(StoreError::io(path, e)),
    }
}

fn record_file(dir: &Path, id: &str) -> PathBuf {
    dir.join(format!("{}.json", id))
}

fn append_and_maybe_compact<T>(
    log: &mut IndexLog<T>,
    op: LogOp<T>,
    index: &mut IndexMap<String, T>,
) -> Result<(), StoreError>
where
    T: Keyed + Clone + Serialize + DeserializeOwned,
{
    log.append(&op)?;
    apply(index, op);
    if log.should_compact(index.len()) {
        log.compact(index)?;
    }
    Ok(())
}

// ═══════════════════════════════════════════════════════════════════════
// Document store
// ═══════════════════════════════════════════════════════════════════════

#[derive(Debug, Serialize, Deserialize)]
struct DocumentRecord {
    content: DocumentContent,
    metadata: DocumentEntry,
}

/// Documents persisted as one JSON file each.
pub struct FsDocumentStore {
    dir: PathBuf,
    index: RwLock<IndexMap<String, DocumentEntry>>,
    log: Mutex<IndexLog<DocumentEntry>>,
}

impl FsDocumentStore {
    /// Open or create the document store under `root`.
    pub fn open(root: &Path) -> Result<Self> {
        let dir = root.join("documents");
        std::fs::create_dir_all(&dir)
            .with_context(|| format!("Failed to create {}", dir.display()))?;
        let (mut log, mut index) = IndexLog::<DocumentEntry>::open(&root.join("documents.log"))?;

        let mut missing = Vec::new();
        for entry in index.values_mut() {
            let path = record_file(&dir, &entry.id);
            if path.exists() {
                entry.path = path.display().to_string();
            } else {
                missing.push(entry.id.clone());
            }
        }
        for id in missing {
            tracing::warn!(doc_id = %id, "document record missing, dropping from index");
            append_and_maybe_compact(&mut log, LogOp::Delete { id }, &mut index)?;
        }

        tracing::debug!(count = index.len(), dir = %dir.display(), "opened document store");
        Ok(Self {
            dir,
            index: RwLock::new(index),
            log: Mutex::new(log),
        })
    }

    fn record_path(&self, id: &str) -> PathBuf {
        record_file(&self.dir, id)
    }
}

impl DocumentStore for FsDocumentStore {
    fn add(
        &self,
        content: DocumentContent,
        source_type: &str,
        source_name: &str,
    ) -> Result<Document> {
        let id = Uuid::new_v4().to_string();
        let path = self.record_path(&id);
        let doc = Document {
            id: id.clone(),
            source_type: source_type.to_string(),
            source_name: source_name.to_string(),
            ingested_at: Utc::now(),
            content,
            storage_path: path.display().to_string(),
        };
        let entry = DocumentEntry::of(&doc);
        write_json_atomic(
            &path,
            &DocumentRecord {
                content: doc.content.clone(),
                metadata: entry.clone(),
            },
        )?;

        let mut log = self.log.lock();
        let mut index = self.index.write();
        append_and_maybe_compact(&mut log, LogOp::Put { entry }, &mut index)?;
        tracing::info!(doc_id = %id, source_type, "stored document");
        Ok(doc)
    }

    fn get(&self, id: &str) -> Result<Option<Document>> {
        let entry = match self.index.read().get(id) {
            Some(e) => e.clone(),
            None => return Ok(None),
        };
        let path = self.record_path(id);
        let record: DocumentRecord = match read_json(&path)? {
            Some(r) => r,
            None => {
                tracing::warn!(doc_id = %id, path = %path.display(), "indexed document has no record");
                return Ok(None);
            }
        };
        Ok(Some(Document {
            id: entry.id,
            source_type: entry.source_type,
            source_name: entry.source_name,
            ingested_at: entry.ingested_at,
            content: record.content,
            storage_path: path.display().to_string(),
        }))
    }

    fn remove(&self, id: &str) -> Result<bool> {
        let mut log = self.log.lock();
        let mut index = self.index.write();
        if !index.contains_key(id) {
            return Ok(false);
        }
        let path = self.record_path(id);
        append_and_maybe_compact(&mut log, LogOp::Delete { id: id.to_string() }, &mut index)?;
        remove_file_if_present(&path)?;
        tracing::info!(doc_id = %id, "removed document");
        Ok(true)
    }

    fn list(&self) -> Result<Vec<DocumentEntry>> {
        Ok(self.index.read().values().cloned().collect())
    }

    fn stats(&self) -> Result<StoreStats> {
        let index = self.index.read();
        Ok(StoreStats::tally(index.values().map(|e| e.source_type.as_str())))
    }
}

// ═══════════════════════════════════════════════════════════════════════
// Vector store
// ═══════════════════════════════════════════════════════════════════════

#[derive(Debug, Serialize, Deserialize)]
struct ChunkMetadata {
    id: String,
    chunk_index: usize,
    total_chunks: usize,
    original_doc_id: String,
    original_document_path: String,
    source_type: String,
    source_name: String,
    ingested_at: DateTime<Utc>,
    hash: String,
    #[serde(default)]
    embedding: Option<Vec<f32>>,
}

#[derive(Debug, Serialize, Deserialize)]
struct ChunkRecord {
    content: ChunkContent,
    metadata: ChunkMetadata,
}

impl From<Chunk> for ChunkRecord {
    fn from(c: Chunk) -> Self {
        ChunkRecord {
            content: c.content,
            metadata: ChunkMetadata {
                id: c.id,
                chunk_index: c.chunk_index,
                total_chunks: c.total_chunks,
                original_doc_id: c.original_doc_id,
                original_document_path: c.original_document_path,
                source_type: c.source_type,
                source_name: c.source_name,
                ingested_at: c.ingested_at,
                hash: c.hash,
                embedding: c.embedding,
            },
        }
    }
}

impl From<ChunkRecord> for Chunk {
    fn from(r: ChunkRecord) -> Self {
        let m = r.metadata;
        Chunk {
            id: m.id,
            original_doc_id: m.original_doc_id,
            chunk_index: m.chunk_index,
            total_chunks: m.total_chunks,
            content: r.content,
            embedding: m.embedding,
            original_document_path: m.original_document_path,
            source_type: m.source_type,
            source_name: m.source_name,
            ingested_at: m.ingested_at,
            hash: m.hash,
        }
    }
}

/// Chunks persisted as one JSON file each, with embeddings cached in memory
/// for the exact scan.
pub struct FsVectorStore {
    dir: PathBuf,
    index: RwLock<IndexMap<String, VectorEntry>>,
    embeddings: RwLock<IndexMap<String, Vec<f32>>>,
    log: Mutex<IndexLog<VectorEntry>>,
}

impl FsVectorStore {
    /// Open or create the vector store under `root`, loading embeddings.
    pub fn open(root: &Path) -> Result<Self> {
        let dir = root.join("vectors");
        std::fs::create_dir_all(&dir)
            .with_context(|| format!("Failed to create {}", dir.display()))?;
        let (mut log, mut index) = IndexLog::<VectorEntry>::open(&root.join("vectors.log"))?;

        let mut embeddings = IndexMap::new();
        let mut missing = Vec::new();
        for entry in index.values_mut() {
            let path = record_file(&dir, &entry.id);
            match read_json::<ChunkRecord>(&path) {
                Ok(Some(record)) => {
                    entry.path = path.display().to_string();
                    if let Some(v) = record.metadata.embedding {
                        embeddings.insert(entry.id.clone(), v);
                    }
                }
                Ok(None) => missing.push(entry.id.clone()),
                Err(e) => {
                    tracing::warn!(chunk_id = %entry.id, error = %e, "unreadable chunk record");
                    missing.push(entry.id.clone());
                }
            }
        }
        for id in missing {
            tracing::warn!(chunk_id = %id, "chunk record missing, dropping from index");
            append_and_maybe_compact(&mut log, LogOp::Delete { id }, &mut index)?;
        }

        tracing::debug!(count = index.len(), embedded = embeddings.len(), "opened vector store");
        Ok(Self {
            dir,
            index: RwLock::new(index),
            embeddings: RwLock::new(embeddings),
            log: Mutex::new(log),
        })
    }

    fn record_path(&self, id: &str) -> PathBuf {
        record_file(&self.dir, id)
    }
}

impl VectorStore for FsVectorStore {
    fn add(&self, chunk: Chunk) -> Result<String> {
        let id = chunk.id.clone();
        let path = self.record_path(&id);
        let entry = VectorEntry::of(&chunk, path.display().to_string());
        let embedding = chunk.embedding.clone();
        write_json_atomic(&path, &ChunkRecord::from(chunk))?;

        let mut log = self.log.lock();
        let mut index = self.index.write();
        let mut embeddings = self.embeddings.write();
        append_and_maybe_compact(&mut log, LogOp::Put { entry }, &mut index)?;
        embeddings.shift_remove(&id);
        if let Some(v) = embedding {
            embeddings.insert(id.clone(), v);
        }
        tracing::debug!(chunk_id = %id, "stored chunk");
        Ok(id)
    }

    fn search(
        &self,
        query: &[f32],
        limit: usize,
        source_type: Option<&str>,
    ) -> Result<Vec<SearchResult>> {
        let ranked: Vec<(String, f32)> = {
            let index = self.index.read();
            let embeddings = self.embeddings.read();
            // Index order drives tie-breaking, so iterate the index.
            let candidates = index.values().filter_map(|e| {
                embeddings.get(&e.id).map(|v| Candidate {
                    id: &e.id,
                    source_type: &e.source_type,
                    embedding: v,
                })
            });
            rank_exact(query, candidates, limit, source_type)
                .into_iter()
                .map(|r| (r.id.to_string(), r.similarity))
                .collect()
        };

        let mut results = Vec::with_capacity(ranked.len());
        for (chunk_id, similarity) in ranked {
            if let Some(chunk) = self.get(&chunk_id)? {
                results.push(SearchResult {
                    chunk_id,
                    similarity,
                    chunk,
                });
            }
        }
        Ok(results)
    }

    fn get(&self, chunk_id: &str) -> Result<Option<Chunk>> {
        if !self.index.read().contains_key(chunk_id) {
            return Ok(None);
        }
        match read_json::<ChunkRecord>(&self.record_path(chunk_id))? {
            Some(record) => Ok(Some(record.into())),
            None => {
                tracing::warn!(chunk_id, "indexed chunk has no record");
                Ok(None)
            }
        }
    }

    fn delete(&self, chunk_id: &str) -> Result<bool> {
        let mut log = self.log.lock();
        let mut index = self.index.write();
        if !index.contains_key(chunk_id) {
            return Ok(false);
        }
        let path = self.record_path(chunk_id);
        append_and_maybe_compact(
            &mut log,
            LogOp::Delete {
                id: chunk_id.to_string(),
            },
            &mut index,
        )?;
        self.embeddings.write().shift_remove(chunk_id);
        remove_file_if_present(&path)?;
        Ok(true)
    }

    fn clear(&self) -> Result<()> {
        let mut log = self.log.lock();
        let mut index = self.index.write();
        let paths: Vec<PathBuf> = index.keys().map(|id| self.record_path(id)).collect();
        append_and_maybe_compact(&mut log, LogOp::Clear, &mut index)?;
        log.compact(&index)?;
        self.embeddings.write().clear();
        for path in paths {
            remove_file_if_present(&path)?;
        }
        tracing::info!("cleared vector store");
        Ok(())
    }

    fn list(&self) -> Result<Vec<VectorEntry>> {
        Ok(self.index.read().values().cloned().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::TempDir;

    fn chunk(doc: &str, index: usize, embedding: Option<Vec<f32>>) -> Chunk {
        Chunk {
            id: format!("{}-{}", doc, index),
            original_doc_id: doc.to_string(),
            chunk_index: index,
            total_chunks: 1,
            content: ChunkContent {
                title: "T (Part 1)".to_string(),
                text: format!("chunk text {}", index),
                attributes: Default::default(),
            },
            embedding,
            original_document_path: format!("documents/{}.json", doc),
            source_type: "vulnerability".to_string(),
            source_name: "nvd".to_string(),
            ingested_at: Utc::now(),
            hash: "h".to_string(),
        }
    }

    #[test]
    fn test_document_roundtrip_survives_reopen() {
        let tmp = TempDir::new().unwrap();
        let content = DocumentContent::from_value(json!({
            "title": "CVE-2021-44228",
            "description": "Log4Shell remote code execution.",
            "cvss": 10.0
        }));
        let id = {
            let store = FsDocumentStore::open(tmp.path()).unwrap();
            let doc = store.add(content.clone(), "vulnerability", "nvd").unwrap();
            assert!(Path::new(&doc.storage_path).exists());
            doc.id
        };

        let store = FsDocumentStore::open(tmp.path()).unwrap();
        let doc = store.get(&id).unwrap().unwrap();
        assert_eq!(doc.content, content);
        assert_eq!(doc.source_name, "nvd");
        assert!(store.get("nope").unwrap().is_none());
    }

    #[test]
    fn test_document_record_layout() {
        let tmp = TempDir::new().unwrap();
        let store = FsDocumentStore::open(tmp.path()).unwrap();
        let doc = store
            .add(DocumentContent::titled("t", "body"), "report", "blog")
            .unwrap();
        let raw: serde_json::Value =
            serde_json::from_slice(&std::fs::read(&doc.storage_path).unwrap()).unwrap();
        assert_eq!(raw["content"], json!({"title": "t", "text": "body"}));
        assert_eq!(raw["metadata"]["id"], json!(doc.id));
        assert_eq!(raw["metadata"]["source_type"], json!("report"));
    }

    #[test]
    fn test_document_remove_deletes_file_and_entry() {
        let tmp = TempDir::new().unwrap();
        let store = FsDocumentStore::open(tmp.path()).unwrap();
        let doc = store
            .add(DocumentContent::titled("t", "x"), "malware", "vt")
            .unwrap();
        assert!(store.remove(&doc.id).unwrap());
        assert!(!Path::new(&doc.storage_path).exists());
        assert!(!store.remove(&doc.id).unwrap());

        let reopened = FsDocumentStore::open(tmp.path()).unwrap();
        assert_eq!(reopened.stats().unwrap().count, 0);
    }

    #[test]
    fn test_missing_record_dropped_on_open() {
        let tmp = TempDir::new().unwrap();
        let (keep, lost) = {
            let store = FsDocumentStore::open(tmp.path()).unwrap();
            let keep = store.add(DocumentContent::titled("a", "x"), "r", "s").unwrap();
            let lost = store.add(DocumentContent::titled("b", "y"), "r", "s").unwrap();
            (keep, lost)
        };
        std::fs::remove_file(&lost.storage_path).unwrap();

        let store = FsDocumentStore::open(tmp.path()).unwrap();
        let ids: Vec<String> = store.list().unwrap().into_iter().map(|e| e.id).collect();
        assert_eq!(ids, vec![keep.id]);
    }

    #[test]
    fn test_moved_store_keeps_index() {
        let tmp = TempDir::new().unwrap();
        let before = tmp.path().join("kb_a");
        let after = tmp.path().join("kb_b");
        let doc = {
            let docs = FsDocumentStore::open(&before).unwrap();
            let vectors = FsVectorStore::open(&before).unwrap();
            vectors.add(chunk("d1", 0, Some(vec![1.0, 0.0]))).unwrap();
            docs.add(DocumentContent::titled("moved", "body"), "report", "blog")
                .unwrap()
        };
        std::fs::rename(&before, &after).unwrap();

        let docs = FsDocumentStore::open(&after).unwrap();
        let vectors = FsVectorStore::open(&after).unwrap();
        assert_eq!(docs.stats().unwrap().count, 1);
        assert_eq!(vectors.list().unwrap().len(), 1);

        let found = docs.get(&doc.id).unwrap().unwrap();
        assert_eq!(found.content.title.as_deref(), Some("moved"));
        assert!(Path::new(&found.storage_path).starts_with(&after));
        assert_eq!(vectors.search(&[1.0, 0.0], 1, None).unwrap()[0].chunk_id, "d1-0");

        // Moving back still finds everything: nothing was dropped from the log.
        drop((docs, vectors));
        std::fs::rename(&after, &before).unwrap();
        let docs = FsDocumentStore::open(&before).unwrap();
        assert!(docs.remove(&doc.id).unwrap());
        assert!(!before.join("documents").join(format!("{}.json", doc.id)).exists());
    }

    #[test]
    fn test_vector_search_after_reopen() {
        let tmp = TempDir::new().unwrap();
        {
            let store = FsVectorStore::open(tmp.path()).unwrap();
            store.add(chunk("d1", 0, Some(vec![1.0, 0.0]))).unwrap();
            store.add(chunk("d2", 0, Some(vec![0.0, 1.0]))).unwrap();
            store.add(chunk("d3", 0, None)).unwrap();
        }
        let store = FsVectorStore::open(tmp.path()).unwrap();
        let hits = store.search(&[0.1, 1.0], 5, None).unwrap();
        assert_eq!(hits.len(), 2);
        assert_eq!(hits[0].chunk_id, "d2-0");
        assert_eq!(hits[0].chunk.content.text, "chunk text 0");
        assert!(hits[0].similarity > hits[1].similarity);

        let entries = store.list().unwrap();
        assert_eq!(entries.len(), 3);
        assert!(!entries[2].has_embedding);
    }

    #[test]
    fn test_vector_readd_replaces_and_moves_to_end() {
        let tmp = TempDir::new().unwrap();
        let store = FsVectorStore::open(tmp.path()).unwrap();
        store.add(chunk("a", 0, Some(vec![1.0]))).unwrap();
        store.add(chunk("b", 0, Some(vec![1.0]))).unwrap();
        store.add(chunk("a", 0, Some(vec![1.0]))).unwrap();
        let ids: Vec<String> = store
            .search(&[1.0], 10, None)
            .unwrap()
            .into_iter()
            .map(|h| h.chunk_id)
            .collect();
        assert_eq!(ids, vec!["b-0", "a-0"]);
    }

    #[test]
    fn test_vector_delete_and_clear() {
        let tmp = TempDir::new().unwrap();
        let store = FsVectorStore::open(tmp.path()).unwrap();
        store.add(chunk("a", 0, Some(vec![1.0]))).unwrap();
        store.add(chunk("a", 1, Some(vec![1.0]))).unwrap();
        store.add(chunk("b", 0, Some(vec![1.0]))).unwrap();

        assert!(store.delete("a-1").unwrap());
        assert!(!store.delete("a-1").unwrap());
        assert_eq!(store.chunks_for_document("a").unwrap().len(), 1);

        store.clear().unwrap();
        assert!(store.search(&[1.0], 10, None).unwrap().is_empty());
        let reopened = FsVectorStore::open(tmp.path()).unwrap();
        assert!(reopened.list().unwrap().is_empty());
    }
}
