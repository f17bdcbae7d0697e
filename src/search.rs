//! `osint search`: query the knowledge store from the command line.
//!
//! | Mode | Backed by | Unit |
//! |------|-----------|------|
//! | `semantic` | [`KnowledgeStore::query`] | chunk |
//! | `keyword` | [`KnowledgeStore::text_search`] | document |
//! | `hybrid` | [`KnowledgeStore::hybrid_search`] | document |

use std::str::FromStr;

use anyhow::{bail, Result};
use osint_harness_core::models::Document;

use crate::config::Config;
use crate::manager::{KnowledgeStore, DEFAULT_SEMANTIC_WEIGHT};

const EXCERPT_CHARS: usize = 200;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SearchMode {
    Semantic,
    Keyword,
    Hybrid,
}

impl FromStr for SearchMode {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "semantic" => Ok(SearchMode::Semantic),
            "keyword" => Ok(SearchMode::Keyword),
            "hybrid" => Ok(SearchMode::Hybrid),
            other => bail!(
                "Unknown search mode: '{}'. Must be semantic, keyword, or hybrid.",
                other
            ),
        }
    }
}

/// One printable search hit, whatever the mode.
#[derive(Debug, Clone, PartialEq)]
pub struct SearchLine {
    pub id: String,
    pub score: f64,
    pub title: String,
    pub source_type: String,
    pub source_name: String,
    pub excerpt: String,
}

/// Run a search against an opened store.
pub fn search(
    store: &KnowledgeStore,
    query: &str,
    mode: SearchMode,
    limit: usize,
    source_type: Option<&str>,
) -> Result<Vec<SearchLine>> {
    if query.trim().is_empty() {
        bail!("Search query must not be empty");
    }
    let lines = match mode {
        SearchMode::Semantic => store
            .query(query, limit, source_type)?
            .into_iter()
            .map(|r| SearchLine {
                id: r.chunk_id,
                score: f64::from(r.similarity),
                title: r.chunk.content.title.clone(),
                source_type: r.chunk.source_type.clone(),
                source_name: r.chunk.source_name.clone(),
                excerpt: excerpt(r.chunk.text()),
            })
            .collect(),
        SearchMode::Keyword => store
            .text_search(query, limit, source_type)?
            .into_iter()
            .map(|h| document_line(h.doc_id, h.score, &h.document))
            .collect(),
        SearchMode::Hybrid => store
            .hybrid_search(query, limit, source_type, DEFAULT_SEMANTIC_WEIGHT)?
            .into_iter()
            .map(|h| document_line(h.score.doc_id.clone(), h.score.combined_score, &h.document))
            .collect(),
    };
    Ok(lines)
}

fn document_line(id: String, score: f64, doc: &Document) -> SearchLine {
    SearchLine {
        id,
        score,
        title: doc.content.title.clone().unwrap_or_default(),
        source_type: doc.source_type.clone(),
        source_name: doc.source_name.clone(),
        excerpt: excerpt(&doc.content.extract_text()),
    }
}

fn excerpt(text: &str) -> String {
    let flat = text.replace('\n', " ");
    let flat = flat.trim();
    match flat.char_indices().nth(EXCERPT_CHARS) {
        Some((idx, _)) => format!("{}...", &flat[..idx]),
        None => flat.to_string(),
    }
}

/// Run the search command and print ranked results.
pub fn run_search(
    config: &Config,
    query: &str,
    mode: &str,
    limit: usize,
    source_type: Option<&str>,
) -> Result<()> {
    let mode: SearchMode = mode.parse()?;
    let store = KnowledgeStore::open(config)?;
    let lines = search(&store, query, mode, limit, source_type)?;

    if lines.is_empty() {
        println!("No results.");
        return Ok(());
    }

    for (i, line) in lines.iter().enumerate() {
        let title = if line.title.is_empty() {
            "(untitled)"
        } else {
            line.title.as_str()
        };
        println!("{}. [{:.2}] {} / {}", i + 1, line.score, line.source_type, title);
        println!("    source: {}", line.source_name);
        println!("    excerpt: \"{}\"", line.excerpt);
        println!("    id: {}", line.id);
        println!();
    }
    Ok(())
}
