//! Document retrieval and deletion by ID.
//!
//! Backs `osint get` and `osint delete`.

use anyhow::{bail, Result};

use crate::config::Config;
use crate::manager::{DocumentView, KnowledgeStore};

/// CLI entry point: print a document and optionally its chunks.
pub fn run_get(config: &Config, id: &str, with_chunks: bool) -> Result<()> {
    let store = KnowledgeStore::open(config)?;
    let Some(view) = store.get_document(id, with_chunks)? else {
        bail!("document not found: {}", id);
    };
    print!("{}", render(&view, with_chunks)?);
    Ok(())
}

fn render(view: &DocumentView, with_chunks: bool) -> Result<String> {
    let doc = &view.document;
    let mut out = String::new();
    out.push_str("--- Document ---\n");
    out.push_str(&format!("id:           {}\n", doc.id));
    out.push_str(&format!(
        "title:        {}\n",
        doc.content.title.as_deref().unwrap_or("(untitled)")
    ));
    out.push_str(&format!("source_type:  {}\n", doc.source_type));
    out.push_str(&format!("source_name:  {}\n", doc.source_name));
    out.push_str(&format!("ingested_at:  {}\n", doc.ingested_at.to_rfc3339()));
    out.push_str(&format!("path:         {}\n\n", doc.storage_path));

    out.push_str("--- Content ---\n");
    out.push_str(&serde_json::to_string_pretty(&doc.content)?);
    out.push_str("\n\n");

    if with_chunks {
        out.push_str(&format!("--- Chunks ({}) ---\n", view.chunks.len()));
        for chunk in &view.chunks {
            let embedded = if chunk.has_embedding() { "embedded" } else { "no embedding" };
            out.push_str(&format!(
                "[chunk {}/{}] {} ({})\n",
                chunk.chunk_index + 1,
                chunk.total_chunks,
                chunk.id,
                embedded
            ));
            out.push_str(chunk.text());
            out.push_str("\n\n");
        }
    }
    Ok(out)
}

/// CLI entry point: delete a document and its chunks.
pub fn run_delete(config: &Config, id: &str) -> Result<()> {
    let store = KnowledgeStore::open(config)?;
    let report = store.delete_document(id)?;
    if !report.document_removed && report.chunks_removed == 0 {
        bail!("document not found: {}", id);
    }
    println!("delete {}", id);
    println!("  document removed: {}", report.document_removed);
    println!("  chunks removed: {}", report.chunks_removed);
    println!("ok");
    Ok(())
}
