//! Knowledge store statistics.
//!
//! A quick summary of what's stored: document and chunk counts, embedding
//! coverage, on-disk size, and a per-source-type breakdown. Used by
//! `osint stats` to confirm that ingestion and embedding are working.

use std::path::Path;

use anyhow::Result;
use walkdir::WalkDir;

use crate::config::Config;
use crate::manager::{KnowledgeStats, KnowledgeStore};

/// Run the stats command: open the store and print a summary.
pub fn run_stats(config: &Config) -> Result<()> {
    let store = KnowledgeStore::open(config)?;
    let stats = store.stats()?;
    let size = dir_size(&config.store.path);
    print!("{}", render(&stats, &config.store.path, size));
    Ok(())
}

fn render(stats: &KnowledgeStats, path: &Path, size: u64) -> String {
    let mut out = String::new();
    out.push_str("OSINT Harness: Knowledge Store Stats\n");
    out.push_str("====================================\n\n");
    out.push_str(&format!("  Store:       {}\n", path.display()));
    out.push_str(&format!("  Size:        {}\n\n", format_bytes(size)));
    out.push_str(&format!("  Documents:   {}\n", stats.document_count));
    out.push_str(&format!("  Chunks:      {}\n", stats.chunk_count));
    out.push_str(&format!(
        "  Embedded:    {} / {} ({}%)\n",
        stats.embedded_count,
        stats.chunk_count,
        if stats.chunk_count > 0 {
            (stats.embedded_count * 100) / stats.chunk_count
        } else {
            0
        }
    ));
    out.push_str(&format!(
        "  Avg chunks:  {:.2} per document\n",
        stats.avg_chunks_per_document
    ));

    if !stats.by_source_type.is_empty() {
        out.push_str("\n  By source type:\n");
        out.push_str(&format!("  {:<24} {:>6}\n", "SOURCE TYPE", "DOCS"));
        out.push_str(&format!("  {}\n", "-".repeat(31)));
        let mut rows: Vec<(&String, &usize)> = stats.by_source_type.iter().collect();
        rows.sort_by(|a, b| b.1.cmp(a.1).then_with(|| a.0.cmp(b.0)));
        for (source_type, count) in rows {
            out.push_str(&format!("  {:<24} {:>6}\n", source_type, count));
        }
    }
    out.push('\n');
    out
}

fn dir_size(path: &Path) -> u64 {
    WalkDir::new(path)
        .into_iter()
        .filter_map(|e| e.ok())
        .filter_map(|e| e.metadata().ok())
        .filter(|m| m.is_file())
        .map(|m| m.len())
        .sum()
}

/// Format a byte count as a human-readable string.
fn format_bytes(bytes: u64) -> String {
    if bytes < 1024 {
        format!("{} B", bytes)
    } else if bytes < 1024 * 1024 {
        format!("{:.1} KB", bytes as f64 / 1024.0)
    } else if bytes < 1024 * 1024 * 1024 {
        format!("{:.1} MB", bytes as f64 / (1024.0 * 1024.0))
    } else {
        format!("{:.2} GB", bytes as f64 / (1024.0 * 1024.0 * 1024.0))
    }
}
