//! In-memory store implementations for tests and embedding in other hosts.
//!
//! Both stores keep their records in an [`IndexMap`] behind a
//! `parking_lot::RwLock`, so iteration order is insertion order. Vector
//! search is the same exact scan the persistent store uses.

use anyhow::Result;
use chrono::Utc;
use indexmap::IndexMap;
use parking_lot::RwLock;
use uuid::Uuid;

use crate::models::{Chunk, Document, DocumentContent, SearchResult};
use crate::search::{rank_exact, Candidate};

use super::{DocumentEntry, DocumentStore, StoreStats, VectorEntry, VectorStore};

#[derive(Default)]
pub struct InMemoryDocumentStore {
    docs: RwLock<IndexMap<String, Document>>,
}

impl InMemoryDocumentStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl DocumentStore for InMemoryDocumentStore {
    fn add(
        &self,
        content: DocumentContent,
        source_type: &str,
        source_name: &str,
    ) -> Result<Document> {
        let id = Uuid::new_v4().to_string();
        let doc = Document {
            storage_path: format!("memory://{}", id),
            id: id.clone(),
            source_type: source_type.to_string(),
            source_name: source_name.to_string(),
            ingested_at: Utc::now(),
            content,
        };
        self.docs.write().insert(id, doc.clone());
        Ok(doc)
    }

    fn get(&self, id: &str) -> Result<Option<Document>> {
        Ok(self.docs.read().get(id).cloned())
    }

    fn remove(&self, id: &str) -> Result<bool> {
        Ok(self.docs.write().shift_remove(id).is_some())
    }

    fn list(&self) -> Result<Vec<DocumentEntry>> {
        Ok(self.docs.read().values().map(DocumentEntry::of).collect())
    }

    fn stats(&self) -> Result<StoreStats> {
        let docs = self.docs.read();
        Ok(StoreStats::tally(docs.values().map(|d| d.source_type.as_str())))
    }
}

#[derive(Default)]
pub struct InMemoryVectorStore {
    chunks: RwLock<IndexMap<String, Chunk>>,
}

impl InMemoryVectorStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl VectorStore for InMemoryVectorStore {
    fn add(&self, chunk: Chunk) -> Result<String> {
        let id = chunk.id.clone();
        let mut chunks = self.chunks.write();
        chunks.shift_remove(&id);
        chunks.insert(id.clone(), chunk);
        Ok(id)
    }

    fn search(
        &self,
        query: &[f32],
        limit: usize,
        source_type: Option<&str>,
    ) -> Result<Vec<SearchResult>> {
        let chunks = self.chunks.read();
        let candidates = chunks.values().filter_map(|c| {
            c.embedding.as_deref().map(|embedding| Candidate {
                id: &c.id,
                source_type: &c.source_type,
                embedding,
            })
        });
        Ok(rank_exact(query, candidates, limit, source_type)
            .into_iter()
            .filter_map(|r| {
                chunks.get(r.id).map(|chunk| SearchResult {
                    chunk_id: r.id.to_string(),
                    similarity: r.similarity,
                    chunk: chunk.clone(),
                })
            })
            .collect())
    }

    fn get(&self, chunk_id: &str) -> Result<Option<Chunk>> {
        Ok(self.chunks.read().get(chunk_id).cloned())
    }

    fn delete(&self, chunk_id: &str) -> Result<bool> {
        Ok(self.chunks.write().shift_remove(chunk_id).is_some())
    }

    fn clear(&self) -> Result<()> {
        self.chunks.write().clear();
        Ok(())
    }

    fn list(&self) -> Result<Vec<VectorEntry>> {
        Ok(self
            .chunks
            .read()
            .values()
            .map(|c| VectorEntry::of(c, c.original_document_path.clone()))
            .collect())
    }
}
