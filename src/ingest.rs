//! `osint ingest`: load files and push them through the knowledge store.
//!
//! Every file is loaded by [`crate::loader`]; each document it yields is
//! stored, chunked, embedded, and indexed. A file that fails to load is
//! skipped with a warning, and a document that fails to ingest does not
//! stop the run.

use std::path::Path;

use anyhow::Result;

use crate::config::Config;
use crate::loader::load_path;
use crate::manager::KnowledgeStore;

/// Totals for one ingest run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IngestSummary {
    pub files: usize,
    pub documents: usize,
    pub chunks: usize,
    pub embedded: usize,
    pub failed_documents: usize,
}

/// Ingest every document under `path` into an already opened store.
///
/// `source_name` defaults to the file name of each loaded file.
pub fn ingest_path(
    store: &KnowledgeStore,
    path: &Path,
    source_type: &str,
    source_name: Option<&str>,
    include: &[String],
    exclude: &[String],
) -> Result<IngestSummary> {
    let files = load_path(path, include, exclude)?;
    let mut summary = IngestSummary {
        files: files.len(),
        ..Default::default()
    };

    for file in files {
        let file_name = file
            .path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_default();
        let name = source_name.unwrap_or(&file_name);

        for content in file.documents {
            match store.ingest(content, source_type, name) {
                Ok(report) => {
                    summary.documents += 1;
                    summary.chunks += report.chunk_ids.len();
                    summary.embedded += report.embedded;
                    for warning in &report.warnings {
                        tracing::warn!(doc_id = %report.doc_id, "{}", warning);
                    }
                }
                Err(e) => {
                    summary.failed_documents += 1;
                    tracing::error!(path = %file.path.display(), error = %e, "failed to ingest document");
                }
            }
        }
    }
    Ok(summary)
}

/// Run the ingest command and print a summary.
pub fn run_ingest(
    config: &Config,
    path: &Path,
    source_type: &str,
    source_name: Option<&str>,
    include: &[String],
    exclude: &[String],
    dry_run: bool,
) -> Result<()> {
    if dry_run {
        let files = load_path(path, include, exclude)?;
        let documents: usize = files.iter().map(|f| f.documents.len()).sum();
        println!("ingest {} (dry-run)", path.display());
        println!("  files found: {}", files.len());
        println!("  documents found: {}", documents);
        return Ok(());
    }

    let store = KnowledgeStore::open(config)?;
    let summary = ingest_path(&store, path, source_type, source_name, include, exclude)?;

    println!("ingest {}", path.display());
    println!("  source type: {}", source_type);
    println!("  files: {}", summary.files);
    println!("  documents: {}", summary.documents);
    println!("  chunks written: {}", summary.chunks);
    println!("  chunks embedded: {}", summary.embedded);
    if summary.failed_documents > 0 {
        println!("  failed documents: {}", summary.failed_documents);
    }
    println!("ok");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use osint_harness_core::chunk::{Chunker, ChunkerConfig};
    use osint_harness_core::embedding::HashingProvider;
    use osint_harness_core::store::memory::{InMemoryDocumentStore, InMemoryVectorStore};
    use std::sync::Arc;
    use tempfile::TempDir;

    fn memory_store() -> KnowledgeStore {
        KnowledgeStore::new(
            Arc::new(InMemoryDocumentStore::new()),
            Arc::new(InMemoryVectorStore::new()),
            Arc::new(HashingProvider::new(64)),
            Chunker::new(ChunkerConfig::default()).unwrap(),
        )
    }

    #[test]
    fn test_ingest_path_counts_documents_and_chunks() {
        let tmp = TempDir::new().unwrap();
        std::fs::write(
            tmp.path().join("cves.json"),
            r#"[{"title": "CVE-1", "description": "Buffer overflow."},
                {"title": "CVE-2", "description": "SQL injection."}]"#,
        )
        .unwrap();
        std::fs::write(tmp.path().join("note.txt"), "Phishing wave observed.").unwrap();

        let store = memory_store();
        let summary = ingest_path(&store, tmp.path(), "vulnerability", None, &[], &[]).unwrap();
        assert_eq!(summary.files, 2);
        assert_eq!(summary.documents, 3);
        assert_eq!(summary.chunks, 3);
        assert_eq!(summary.embedded, 3);

        let stats = store.stats().unwrap();
        assert_eq!(stats.by_source_type.get("vulnerability"), Some(&3));
    }

    #[test]
    fn test_source_name_defaults_to_file_name() {
        let tmp = TempDir::new().unwrap();
        let file = tmp.path().join("feed.json");
        std::fs::write(&file, r#"{"title": "x", "description": "y"}"#).unwrap();

        let store = memory_store();
        ingest_path(&store, &file, "threat_intel", None, &[], &[]).unwrap();
        let entry = &store.documents().list().unwrap()[0];
        assert_eq!(entry.source_name, "feed.json");
    }
}
