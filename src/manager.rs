//! Knowledge store manager.
//!
//! Ties the document store, chunker, embedding provider, and vector store
//! into one ingestion and retrieval surface.
//!
//! # Ingestion Pipeline
//!
//! ```text
//! DocumentContent
//!   → DocumentStore::add        (persisted, id assigned)
//!   → Chunker::chunk            (bounded fragments)
//!   → embed_chunks              (per-chunk, failures leave no embedding)
//!   → VectorStore::add          (one record per chunk)
//! ```
//!
//! Once the document is written it stays retrievable. Later failures are
//! logged and reported in [`IngestReport::warnings`]; nothing is rolled back.
//!
//! # Retrieval
//!
//! | Method | Ranks | Unit |
//! |--------|-------|------|
//! | [`query`](KnowledgeStore::query) | cosine similarity | chunk |
//! | [`text_search`](KnowledgeStore::text_search) | keyword relevance | document |
//! | [`hybrid_search`](KnowledgeStore::hybrid_search) | weighted blend of both | document |

use std::collections::BTreeMap;
use std::sync::Arc;

use anyhow::Result;
use serde::Serialize;

use osint_harness_core::chunk::Chunker;
use osint_harness_core::embedding::{embed_chunks, embed_or_zero, EmbeddingProvider};
use osint_harness_core::models::{Chunk, Document, DocumentContent, SearchResult};
use osint_harness_core::search::{keyword_score, merge_hybrid, HybridScore};
use osint_harness_core::store::{DocumentStore, VectorStore};

use crate::config::Config;
use crate::embedding::create_provider;
use crate::fs_store::{FsDocumentStore, FsVectorStore};

/// Weight of the semantic score in [`KnowledgeStore::hybrid_search`].
pub const DEFAULT_SEMANTIC_WEIGHT: f64 = 0.7;

/// Outcome of ingesting one document.
#[derive(Debug, Clone, Default, Serialize)]
pub struct IngestReport {
    pub doc_id: String,
    pub chunk_ids: Vec<String>,
    /// Chunks stored with an embedding.
    pub embedded: usize,
    /// Chunks stored without one.
    pub failed: usize,
    pub warnings: Vec<String>,
}

/// A document ranked by keyword relevance.
#[derive(Debug, Clone, Serialize)]
pub struct TextHit {
    pub doc_id: String,
    pub score: f64,
    pub document: Document,
}

/// A document ranked by the hybrid merge.
#[derive(Debug, Clone, Serialize)]
pub struct HybridHit {
    #[serde(flatten)]
    pub score: HybridScore,
    pub document: Document,
}

/// A document together with its chunks.
#[derive(Debug, Clone, Serialize)]
pub struct DocumentView {
    pub document: Document,
    /// Empty unless chunks were requested.
    pub chunks: Vec<Chunk>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct DeleteReport {
    pub document_removed: bool,
    pub chunks_removed: usize,
}

/// Aggregate counts across both stores.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct KnowledgeStats {
    pub document_count: usize,
    pub chunk_count: usize,
    pub embedded_count: usize,
    pub avg_chunks_per_document: f64,
    pub by_source_type: BTreeMap<String, usize>,
}

pub struct KnowledgeStore {
    documents: Arc<dyn DocumentStore>,
    vectors: Arc<dyn VectorStore>,
    provider: Arc<dyn EmbeddingProvider>,
    chunker: Chunker,
}

impl KnowledgeStore {
    pub fn new(
        documents: Arc<dyn DocumentStore>,
        vectors: Arc<dyn VectorStore>,
        provider: Arc<dyn EmbeddingProvider>,
        chunker: Chunker,
    ) -> Self {
        Self {
            documents,
            vectors,
            provider,
            chunker,
        }
    }

    /// Open the file-backed stores and the configured provider.
    pub fn open(config: &Config) -> Result<Self> {
        let root = &config.store.path;
        let documents = Arc::new(FsDocumentStore::open(root)?);
        let vectors = Arc::new(FsVectorStore::open(root)?);
        let provider: Arc<dyn EmbeddingProvider> = Arc::from(create_provider(&config.embedding)?);
        let chunker = Chunker::new(config.chunking.to_chunker_config())?;

        tracing::info!(
            path = %root.display(),
            provider = provider.model_name(),
            dims = provider.dims(),
            "opened knowledge store"
        );
        Ok(Self::new(documents, vectors, provider, chunker))
    }

    pub fn provider(&self) -> &dyn EmbeddingProvider {
        self.provider.as_ref()
    }

    pub fn documents(&self) -> &dyn DocumentStore {
        self.documents.as_ref()
    }

    pub fn vectors(&self) -> &dyn VectorStore {
        self.vectors.as_ref()
    }

    /// Store, chunk, embed, and index one document.
    pub fn ingest(
        &self,
        content: DocumentContent,
        source_type: &str,
        source_name: &str,
    ) -> Result<IngestReport> {
        let doc = self.documents.add(content, source_type, source_name)?;
        let mut report = IngestReport {
            doc_id: doc.id.clone(),
            ..Default::default()
        };

        let mut chunks = self.chunker.chunk(&doc);
        let embed = embed_chunks(self.provider.as_ref(), &mut chunks);
        if embed.failed > 0 {
            report.warnings.push(format!(
                "{} of {} chunks stored without an embedding",
                embed.failed,
                chunks.len()
            ));
        }

        for chunk in chunks {
            let has_embedding = chunk.has_embedding();
            let chunk_id = chunk.id.clone();
            match self.vectors.add(chunk) {
                Ok(id) => {
                    if has_embedding {
                        report.embedded += 1;
                    } else {
                        report.failed += 1;
                    }
                    report.chunk_ids.push(id);
                }
                Err(e) => {
                    tracing::error!(doc_id = %doc.id, chunk_id = %chunk_id, error = %e, "failed to store chunk");
                    report
                        .warnings
                        .push(format!("chunk {} not stored: {}", chunk_id, e));
                }
            }
        }

        tracing::info!(
            doc_id = %doc.id,
            source_type,
            chunks = report.chunk_ids.len(),
            embedded = report.embedded,
            "ingested document"
        );
        Ok(report)
    }

    /// Semantic search over chunks.
    pub fn query(
        &self,
        text: &str,
        limit: usize,
        source_type: Option<&str>,
    ) -> Result<Vec<SearchResult>> {
        let embedding = embed_or_zero(self.provider.as_ref(), text);
        let results = self.vectors.search(&embedding, limit, source_type)?;
        tracing::debug!(query = text, limit, hits = results.len(), "semantic query");
        Ok(results)
    }

    /// Keyword search over whole documents.
    ///
    /// Documents scoring zero are left out. Ties keep insertion order.
    pub fn text_search(
        &self,
        query: &str,
        limit: usize,
        source_type: Option<&str>,
    ) -> Result<Vec<TextHit>> {
        let mut hits = Vec::new();
        for entry in self.documents.list()? {
            if source_type.is_some_and(|st| entry.source_type != st) {
                continue;
            }
            let Some(document) = self.documents.get(&entry.id)? else {
                continue;
            };
            let score = keyword_score(&document.content, query);
            if score > 0.0 {
                hits.push(TextHit {
                    doc_id: entry.id,
                    score,
                    document,
                });
            }
        }
        hits.sort_by(|a, b| b.score.total_cmp(&a.score));
        hits.truncate(limit);
        Ok(hits)
    }

    /// Blend semantic and keyword relevance per document.
    ///
    /// Both searches fetch `2 × limit` candidates before merging.
    pub fn hybrid_search(
        &self,
        query: &str,
        limit: usize,
        source_type: Option<&str>,
        semantic_weight: f64,
    ) -> Result<Vec<HybridHit>> {
        let fetch = limit.saturating_mul(2);
        let semantic: Vec<(String, f32)> = self
            .query(query, fetch, source_type)?
            .into_iter()
            .map(|r| (r.chunk.original_doc_id, r.similarity))
            .collect();
        let keyword: Vec<(String, f64)> = self
            .text_search(query, fetch, source_type)?
            .into_iter()
            .map(|h| (h.doc_id, h.score))
            .collect();

        let mut hits = Vec::new();
        for score in merge_hybrid(&semantic, &keyword, semantic_weight, limit) {
            match self.documents.get(&score.doc_id)? {
                Some(document) => hits.push(HybridHit { score, document }),
                None => tracing::warn!(doc_id = %score.doc_id, "chunk refers to a missing document"),
            }
        }
        Ok(hits)
    }

    pub fn get_document(&self, id: &str, with_chunks: bool) -> Result<Option<DocumentView>> {
        let Some(document) = self.documents.get(id)? else {
            return Ok(None);
        };
        let chunks = if with_chunks {
            self.vectors.chunks_for_document(id)?
        } else {
            Vec::new()
        };
        Ok(Some(DocumentView { document, chunks }))
    }

    /// Remove a document and every chunk derived from it.
    pub fn delete_document(&self, id: &str) -> Result<DeleteReport> {
        let mut report = DeleteReport::default();
        for entry in self.vectors.list()? {
            if entry.original_doc_id == id && self.vectors.delete(&entry.id)? {
                report.chunks_removed += 1;
            }
        }
        report.document_removed = self.documents.remove(id)?;
        tracing::info!(
            doc_id = id,
            removed = report.document_removed,
            chunks = report.chunks_removed,
            "deleted document"
        );
        Ok(report)
    }

    pub fn stats(&self) -> Result<KnowledgeStats> {
        let docs = self.documents.stats()?;
        let entries = self.vectors.list()?;
        let embedded_count = entries.iter().filter(|e| e.has_embedding).count();
        let avg_chunks_per_document = if docs.count > 0 {
            entries.len() as f64 / docs.count as f64
        } else {
            0.0
        };
        Ok(KnowledgeStats {
            document_count: docs.count,
            chunk_count: entries.len(),
            embedded_count,
            avg_chunks_per_document,
            by_source_type: docs.by_source_type,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use osint_harness_core::chunk::{ChunkStrategy, ChunkerConfig};
    use osint_harness_core::embedding::{EmbeddingError, HashingProvider};
    use osint_harness_core::store::memory::{InMemoryDocumentStore, InMemoryVectorStore};
    use serde_json::json;

    fn store_with(provider: Arc<dyn EmbeddingProvider>) -> KnowledgeStore {
        KnowledgeStore::new(
            Arc::new(InMemoryDocumentStore::new()),
            Arc::new(InMemoryVectorStore::new()),
            provider,
            Chunker::new(ChunkerConfig {
                max_chunk_size: 200,
                overlap: 20,
                strategy: ChunkStrategy::Security,
            })
            .unwrap(),
        )
    }

    fn store() -> KnowledgeStore {
        store_with(Arc::new(HashingProvider::new(128)))
    }

    fn content(v: serde_json::Value) -> DocumentContent {
        DocumentContent::from_value(v)
    }

    #[test]
    fn test_ingest_then_query() {
        let kb = store();
        let report = kb
            .ingest(
                content(json!({
                    "title": "Ransomware campaign",
                    "description": "A ransomware group encrypts hospital file servers."
                })),
                "threat_report",
                "test",
            )
            .unwrap();
        assert_eq!(report.chunk_ids, vec![format!("{}-0", report.doc_id)]);
        assert_eq!(report.embedded, 1);
        assert!(report.warnings.is_empty());

        let results = kb.query("ransomware hospital", 5, None).unwrap();
        assert_eq!(results[0].chunk.original_doc_id, report.doc_id);
    }

    #[test]
    fn test_embedding_failures_are_reported_not_fatal() {
        struct Broken;
        impl EmbeddingProvider for Broken {
            fn model_name(&self) -> &str {
                "broken"
            }
            fn dims(&self) -> usize {
                8
            }
            fn embed(&self, _text: &str) -> Result<Vec<f32>, EmbeddingError> {
                Err(EmbeddingError::Request("offline".into()))
            }
        }

        let kb = store_with(Arc::new(Broken));
        let report = kb
            .ingest(content(json!({"text": "phishing kit"})), "report", "test")
            .unwrap();
        assert_eq!(report.failed, 1);
        assert_eq!(report.embedded, 0);
        assert_eq!(report.warnings.len(), 1);
        assert!(kb.get_document(&report.doc_id, false).unwrap().is_some());
        assert!(kb.query("phishing", 5, None).unwrap().is_empty());
    }

    #[test]
    fn test_text_search_weights_title() {
        let kb = store();
        let in_title = kb
            .ingest(
                content(json!({"title": "Botnet takedown", "description": "Police action."})),
                "news",
                "test",
            )
            .unwrap();
        let in_body = kb
            .ingest(
                content(json!({"title": "Weekly digest", "description": "A botnet was observed."})),
                "news",
                "test",
            )
            .unwrap();
        kb.ingest(content(json!({"title": "Unrelated"})), "news", "test")
            .unwrap();

        let hits = kb.text_search("botnet", 10, None).unwrap();
        let ids: Vec<&str> = hits.iter().map(|h| h.doc_id.as_str()).collect();
        assert_eq!(ids, vec![in_title.doc_id.as_str(), in_body.doc_id.as_str()]);
        assert_eq!(hits[0].score, 3.0);
        assert_eq!(hits[1].score, 2.0);

        assert!(kb.text_search("botnet", 10, Some("cve")).unwrap().is_empty());
    }

    #[test]
    fn test_hybrid_search_is_document_level() {
        let kb = store();
        let long = "Credential stuffing against VPN portals. ".repeat(20);
        let report = kb
            .ingest(
                content(json!({"title": "VPN credential stuffing", "description": long})),
                "threat_report",
                "test",
            )
            .unwrap();
        assert!(report.chunk_ids.len() > 1);

        let hits = kb
            .hybrid_search("credential stuffing", 5, None, DEFAULT_SEMANTIC_WEIGHT)
            .unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].score.doc_id, report.doc_id);
        assert!(hits[0].score.text_score > 0.0);
        assert!(hits[0].score.semantic_score > 0.0);
    }

    #[test]
    fn test_delete_cascades_to_chunks() {
        let kb = store();
        let long = "Lateral movement via SMB shares. ".repeat(20);
        let report = kb
            .ingest(content(json!({"description": long})), "report", "test")
            .unwrap();
        let other = kb
            .ingest(content(json!({"description": "keep me"})), "report", "test")
            .unwrap();

        let view = kb.get_document(&report.doc_id, true).unwrap().unwrap();
        assert_eq!(view.chunks.len(), report.chunk_ids.len());

        let deleted = kb.delete_document(&report.doc_id).unwrap();
        assert!(deleted.document_removed);
        assert_eq!(deleted.chunks_removed, report.chunk_ids.len());
        assert!(kb.get_document(&report.doc_id, false).unwrap().is_none());

        let stats = kb.stats().unwrap();
        assert_eq!(stats.document_count, 1);
        assert_eq!(stats.chunk_count, other.chunk_ids.len());

        let again = kb.delete_document(&report.doc_id).unwrap();
        assert_eq!(again, DeleteReport::default());
    }

    #[test]
    fn test_stats() {
        let kb = store();
        assert_eq!(kb.stats().unwrap(), KnowledgeStats::default());

        kb.ingest(content(json!({"text": "a"})), "cve", "nvd").unwrap();
        kb.ingest(content(json!({"text": "b"})), "cve", "nvd").unwrap();
        kb.ingest(content(json!({"text": "c"})), "technique", "mitre")
            .unwrap();

        let stats = kb.stats().unwrap();
        assert_eq!(stats.document_count, 3);
        assert_eq!(stats.chunk_count, 3);
        assert_eq!(stats.embedded_count, 3);
        assert!((stats.avg_chunks_per_document - 1.0).abs() < f64::EPSILON);
        assert_eq!(stats.by_source_type.get("cve"), Some(&2));
        assert_eq!(stats.by_source_type.get("technique"), Some(&1));
    }
}
