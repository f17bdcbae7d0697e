//! Paragraph-boundary text chunker with character overlap.
//!
//! Splits a [`Document`]'s extracted text into [`Chunk`]s no longer than
//! `max_chunk_size + overlap` characters. Sizes are measured in Unicode
//! scalar values, not bytes.
//!
//! # Algorithm
//!
//! 1. Extract text with [`DocumentContent::extract_text`](crate::models::DocumentContent::extract_text).
//! 2. Split into paragraphs on blank lines (whitespace-only lines count).
//! 3. With [`ChunkStrategy::Security`], merge neighbouring paragraphs
//!    when a security term only appears across their boundary.
//! 4. Hard-split any paragraph longer than `max_chunk_size` at the last
//!    whitespace before the bound.
//! 5. Pack pieces greedily, joined by `"\n\n"`. When the next piece does not
//!    fit, close the chunk and seed the next one with the previous chunk's
//!    tail (fewer than `overlap` characters, starting on a word boundary).
//! 6. A document with no extractable text yields exactly one chunk holding
//!    its JSON-rendered content.
//!
//! # Example
//!
//! ```rust
//! use osint_harness_core::chunk::{Chunker, ChunkerConfig};
//! use osint_harness_core::models::{Document, DocumentContent};
//!
//! let chunker = Chunker::new(ChunkerConfig::default()).unwrap();
//! let doc = Document {
//!     id: "doc-1".into(),
//!     source_type: "report".into(),
//!     source_name: "test".into(),
//!     ingested_at: chrono::Utc::now(),
//!     content: DocumentContent::titled("Note", "Hello world.\n\nSecond paragraph."),
//!     storage_path: "memory://doc-1".into(),
//! };
//! let chunks = chunker.chunk(&doc);
//! assert_eq!(chunks.len(), 1);
//! assert_eq!(chunks[0].id, "doc-1-0");
//! ```

use indexmap::IndexMap;
use serde::Deserialize;
use sha2::{Digest, Sha256};
use thiserror::Error;

use crate::models::{Chunk, ChunkContent, Document, CHUNK_ATTRIBUTE_KEYS};

/// Terms whose presence keeps neighbouring paragraphs together.
pub const SECURITY_TERMS: [&str; 14] = [
    "CVE-",
    "vulnerability",
    "exploit",
    "malware",
    "ransomware",
    "attack",
    "threat actor",
    "APT",
    "zero-day",
    "injection",
    "XSS",
    "CSRF",
    "buffer overflow",
    "privilege escalation",
];

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ChunkerError {
    #[error("invalid chunker configuration: {0}")]
    InvalidConfig(String),
}

/// How paragraphs are grouped before packing.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChunkStrategy {
    Simple,
    #[default]
    #[serde(alias = "security-aware")]
    Security,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkerConfig {
    /// Soft upper bound on chunk length, in characters.
    pub max_chunk_size: usize,
    /// Characters of trailing context carried into the next chunk.
    pub overlap: usize,
    pub strategy: ChunkStrategy,
}

impl Default for ChunkerConfig {
    fn default() -> Self {
        Self {
            max_chunk_size: 1000,
            overlap: 100,
            strategy: ChunkStrategy::Security,
        }
    }
}

/// Deterministic document splitter.
#[derive(Debug, Clone)]
pub struct Chunker {
    config: ChunkerConfig,
}

impl Chunker {
    /// Validate `config` and build a chunker.
    ///
    /// Fails when `max_chunk_size` is zero or `overlap >= max_chunk_size`.
    pub fn new(config: ChunkerConfig) -> Result<Self, ChunkerError> {
        if config.max_chunk_size == 0 {
            return Err(ChunkerError::InvalidConfig(
                "max_chunk_size must be > 0".to_string(),
            ));
        }
        if config.overlap >= config.max_chunk_size {
            return Err(ChunkerError::InvalidConfig(format!(
                "overlap ({}) must be smaller than max_chunk_size ({})",
                config.overlap, config.max_chunk_size
            )));
        }
        Ok(Self { config })
    }

    pub fn config(&self) -> &ChunkerConfig {
        &self.config
    }

    /// Split `doc` into chunks.
    ///
    /// Always returns at least one chunk. Indices are contiguous from 0 and
    /// every chunk's `total_chunks` equals the number returned.
    pub fn chunk(&self, doc: &Document) -> Vec<Chunk> {
        let text = doc.content.extract_text();
        let texts = if text.is_empty() {
            vec![serde_json::to_string(&doc.content).unwrap_or_default()]
        } else {
            self.split_text(&text)
        };

        let total = texts.len();
        let attributes = chunk_attributes(doc);
        texts
            .into_iter()
            .enumerate()
            .map(|(index, text)| make_chunk(doc, index, total, text, &attributes))
            .collect()
    }

    /// Split raw text into chunk bodies without building [`Chunk`]s.
    pub fn split_text(&self, text: &str) -> Vec<String> {
        let mut paragraphs = split_paragraphs(text);
        if self.config.strategy == ChunkStrategy::Security {
            paragraphs = merge_on_security_terms(paragraphs);
        }

        let pieces: Vec<String> = paragraphs
            .iter()
            .flat_map(|p| hard_split(p, self.config.max_chunk_size))
            .collect();

        let mut chunks = pack(pieces, self.config.max_chunk_size, self.config.overlap);
        if chunks.is_empty() {
            chunks.push(text.trim().to_string());
        }
        chunks
    }
}

fn char_len(s: &str) -> usize {
    s.chars().count()
}

/// Split on blank lines, trimming each paragraph and dropping empty ones.
fn split_paragraphs(text: &str) -> Vec<String> {
    let mut paragraphs = Vec::new();
    let mut current: Vec<&str> = Vec::new();
    for line in text.lines() {
        if line.trim().is_empty() {
            if !current.is_empty() {
                paragraphs.push(current.join("\n").trim().to_string());
                current.clear();
            }
        } else {
            current.push(line);
        }
    }
    if !current.is_empty() {
        paragraphs.push(current.join("\n").trim().to_string());
    }
    paragraphs.retain(|p| !p.is_empty());
    paragraphs
}

fn contains_security_term(lowered: &str) -> bool {
    SECURITY_TERMS
        .iter()
        .any(|t| lowered.contains(&t.to_lowercase()))
}

/// Merge `p[i]` and `p[i+1]` when a term matches only in their combination.
fn merge_on_security_terms(paragraphs: Vec<String>) -> Vec<String> {
    let mut out: Vec<String> = Vec::with_capacity(paragraphs.len());
    for para in paragraphs {
        if let Some(last) = out.last_mut() {
            let combined = format!("{} {}", last, para);
            let spans_term = SECURITY_TERMS.iter().any(|t| {
                let t = t.to_lowercase();
                combined.to_lowercase().contains(&t)
                    && !last.to_lowercase().contains(&t)
                    && !para.to_lowercase().contains(&t)
            });
            if spans_term {
                *last = combined;
                continue;
            }
        }
        out.push(para);
    }
    out
}

/// Cut `para` into pieces of at most `max` characters, preferring whitespace.
fn hard_split(para: &str, max: usize) -> Vec<String> {
    let mut pieces = Vec::new();
    let mut rest = para;
    while char_len(rest) > max {
        let cut = rest
            .char_indices()
            .nth(max)
            .map(|(i, _)| i)
            .unwrap_or(rest.len());
        let split = if rest[cut..].starts_with(char::is_whitespace) {
            cut
        } else {
            rest[..cut]
                .rfind(char::is_whitespace)
                .filter(|&i| i > 0)
                .unwrap_or(cut)
        };
        let piece = rest[..split].trim_end();
        if !piece.is_empty() {
            pieces.push(piece.to_string());
        }
        rest = rest[split..].trim_start();
    }
    if !rest.is_empty() {
        pieces.push(rest.to_string());
    }
    pieces
}

/// Trailing context for the next chunk: fewer than `overlap` chars, word aligned.
fn overlap_tail(text: &str, overlap: usize) -> &str {
    if overlap == 0 {
        return "";
    }
    let len = char_len(text);
    if len < overlap {
        return text.trim();
    }
    let start = text
        .char_indices()
        .nth(len - overlap)
        .map(|(i, _)| i)
        .unwrap_or(0);
    let window = &text[start..];
    match window.find(char::is_whitespace) {
        Some(ws) => window[ws..].trim(),
        None => "",
    }
}

fn pack(pieces: Vec<String>, max: usize, overlap: usize) -> Vec<String> {
    let mut chunks = Vec::new();
    let mut current = String::new();
    let mut current_len = 0usize;

    for piece in pieces {
        let piece_len = char_len(&piece);
        if current.is_empty() {
            current = piece;
            current_len = piece_len;
            continue;
        }
        if current_len + 2 + piece_len <= max {
            current.push_str("\n\n");
            current.push_str(&piece);
            current_len += 2 + piece_len;
            continue;
        }

        let tail = overlap_tail(&current, overlap).to_string();
        chunks.push(std::mem::take(&mut current));
        if tail.is_empty() {
            current = piece;
        } else {
            current = format!("{} {}", tail, piece);
        }
        current_len = char_len(&current);
    }

    if !current.is_empty() {
        chunks.push(current);
    }
    chunks
}

fn chunk_attributes(doc: &Document) -> IndexMap<String, serde_json::Value> {
    CHUNK_ATTRIBUTE_KEYS
        .iter()
        .filter_map(|k| {
            doc.content
                .extra
                .get(*k)
                .map(|v| (k.to_string(), v.clone()))
        })
        .collect()
}

fn chunk_title(doc: &Document, index: usize) -> String {
    match doc.content.title.as_deref().map(str::trim) {
        Some(title) if !title.is_empty() => format!("{} (Part {})", title, index + 1),
        _ => format!("Chunk {} of {}", index + 1, doc.id),
    }
}

/// SHA-256 hex digest of `text`.
pub fn content_hash(text: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(text.as_bytes());
    format!("{:x}", hasher.finalize())
}

fn make_chunk(
    doc: &Document,
    index: usize,
    total: usize,
    text: String,
    attributes: &IndexMap<String, serde_json::Value>,
) -> Chunk {
    Chunk {
        id: format!("{}-{}", doc.id, index),
        original_doc_id: doc.id.clone(),
        chunk_index: index,
        total_chunks: total,
        hash: content_hash(&text),
        content: ChunkContent {
            title: chunk_title(doc, index),
            text,
            attributes: attributes.clone(),
        },
        embedding: None,
        original_document_path: doc.storage_path.clone(),
        source_type: doc.source_type.clone(),
        source_name: doc.source_name.clone(),
        ingested_at: doc.ingested_at,
    }
}

/// True when `text` mentions any recognised security term.
pub fn mentions_security_term(text: &str) -> bool {
    contains_security_term(&text.to_lowercase())
}
